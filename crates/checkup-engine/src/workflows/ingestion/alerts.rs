use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::BatchId;

/// Out-of-band notification port for batch outcomes.
pub trait BatchNotifier: Send + Sync {
    fn notify(&self, alert: BatchAlert) -> Result<(), AlertError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAlert {
    pub template: String,
    pub batch_id: BatchId,
    pub details: BTreeMap<String, String>,
}

impl BatchAlert {
    pub fn failed(batch_id: &BatchId, kind: &str, message: &str) -> Self {
        let mut details = BTreeMap::new();
        details.insert("type".to_string(), kind.to_string());
        details.insert("message".to_string(), message.to_string());
        Self {
            template: "batch_failed".to_string(),
            batch_id: batch_id.clone(),
            details,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert transport unavailable: {0}")]
    Transport(String),
}
