use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::ReferenceSnapshot;
use crate::store::RepositoryError;

/// Anything able to produce a fresh reference snapshot (normally the SQLite store).
pub trait ReferenceSource: Send + Sync {
    fn load_snapshot(&self) -> Result<ReferenceSnapshot, RepositoryError>;
}

struct CachedSnapshot {
    loaded_at: Instant,
    snapshot: Arc<ReferenceSnapshot>,
}

/// Read-through cache with a time-to-live and explicit invalidation.
///
/// Callers hold the returned `Arc` for a whole validation + write cycle, so a
/// refresh in the middle of a batch never changes the rules that batch sees.
pub struct ReferenceCache {
    source: Arc<dyn ReferenceSource>,
    ttl: Duration,
    state: Mutex<Option<CachedSnapshot>>,
}

impl ReferenceCache {
    pub fn new(source: Arc<dyn ReferenceSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Result<Arc<ReferenceSnapshot>, RepositoryError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("reference cache poisoned".to_string()))?;

        if let Some(cached) = guard.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.snapshot));
            }
        }

        let snapshot = Arc::new(self.source.load_snapshot()?);
        debug!(
            parameters = snapshot.parameters.len(),
            companies = snapshot.companies.len(),
            "reference snapshot loaded"
        );
        *guard = Some(CachedSnapshot {
            loaded_at: Instant::now(),
            snapshot: Arc::clone(&snapshot),
        });
        Ok(snapshot)
    }

    /// Drops the cached snapshot; call after any reference-data write.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.state.lock() {
            guard.take();
        }
    }
}
