use rusqlite::{params, Connection};
use tracing::info;

use super::{decode, RepositoryError, SqliteStore};
use crate::reference::{Gender, ParameterDefinition, ParameterKind, ReferenceSnapshot, ReferenceSource};
use crate::workflows::scoring::bio_age::{BioAgeDirection, BioAgeRule};
use crate::workflows::scoring::expression::{self, RuleExpr};
use crate::workflows::scoring::health_index::{
    CombinationRule, CombinationTrigger, ConditionRule, DeviationDirection, HealthIndexConfig,
    HealthIndexRules, PenaltyDirection, PenaltyRule, SafetyRule,
};

impl ReferenceSource for SqliteStore {
    fn load_snapshot(&self) -> Result<ReferenceSnapshot, RepositoryError> {
        self.with_connection(load_snapshot)
    }
}

impl SqliteStore {
    /// Replaces every reference table with the contents of `snapshot`.
    pub fn seed_reference(&self, snapshot: &ReferenceSnapshot) -> Result<(), RepositoryError> {
        self.with_transaction(|tx| seed_snapshot(tx, snapshot))
    }
}

/// Reads every reference table into one consistent snapshot.
pub fn load_snapshot(conn: &Connection) -> Result<ReferenceSnapshot, RepositoryError> {
    let companies = conn
        .prepare("SELECT company_id FROM companies ORDER BY company_id")?
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let parameters = load_parameters(conn)?;

    let health_index = HealthIndexRules {
        penalty_rules: load_penalty_rules(conn)?,
        condition_rules: load_condition_rules(conn)?,
        safety_rules: load_safety_rules(conn)?,
        parameter_configs: load_parameter_configs(conn)?,
        combination_rules: load_combination_rules(conn)?,
    };

    Ok(ReferenceSnapshot::new(
        companies,
        parameters,
        health_index,
        load_bio_age_rules(conn)?,
    ))
}

/// Accepts the structured JSON form and falls back to legacy rule text.
pub fn decode_expression(raw: String) -> Result<RuleExpr, RepositoryError> {
    if let Ok(parsed) = serde_json::from_str::<RuleExpr>(&raw) {
        return Ok(parsed);
    }
    expression::parse(&raw).map_err(|_| RepositoryError::InvalidStored {
        field: "rule expression",
        value: raw,
    })
}

fn load_parameters(conn: &Connection) -> Result<Vec<ParameterDefinition>, RepositoryError> {
    let mut statement = conn.prepare(
        "SELECT key, display_name, unit, kind, reference_min, reference_max, male_min, male_max, \
         female_min, female_max, priority, category FROM parameters ORDER BY priority, key",
    )?;
    let rows = statement
        .query_map([], |row| {
            Ok((
                ParameterDefinition {
                    key: row.get(0)?,
                    display_name: row.get(1)?,
                    unit: row.get(2)?,
                    kind: ParameterKind::Numeric,
                    reference_min: row.get(4)?,
                    reference_max: row.get(5)?,
                    male_min: row.get(6)?,
                    male_max: row.get(7)?,
                    female_min: row.get(8)?,
                    female_max: row.get(9)?,
                    priority: row.get(10)?,
                    category: row.get(11)?,
                    aliases: Vec::new(),
                },
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut aliases = conn.prepare("SELECT alias, parameter_key FROM parameter_aliases ORDER BY alias")?;
    let aliases = aliases
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(mut definition, kind)| {
            definition.kind = decode("parameter kind", kind, ParameterKind::parse)?;
            definition.aliases = aliases
                .iter()
                .filter(|(_, key)| *key == definition.key)
                .map(|(alias, _)| alias.clone())
                .collect();
            Ok(definition)
        })
        .collect()
}

fn penalty(field: &'static str, raw: i64) -> Result<u16, RepositoryError> {
    u16::try_from(raw).map_err(|_| RepositoryError::InvalidStored {
        field,
        value: raw.to_string(),
    })
}

fn load_penalty_rules(conn: &Connection) -> Result<Vec<PenaltyRule>, RepositoryError> {
    let mut statement = conn.prepare(
        "SELECT parameter_key, direction, lower_bound, upper_bound, penalty \
         FROM hi_penalty_rules ORDER BY id",
    )?;
    let raw = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(parameter_key, direction, lower, upper, points)| {
            Ok(PenaltyRule {
                parameter_key,
                direction: decode("penalty direction", direction, PenaltyDirection::parse)?,
                lower,
                upper,
                penalty: penalty("penalty", points)?,
            })
        })
        .collect()
}

fn load_condition_rules(conn: &Connection) -> Result<Vec<ConditionRule>, RepositoryError> {
    let mut statement = conn.prepare(
        "SELECT name, expression, penalty FROM hi_condition_rules WHERE active = 1 ORDER BY id",
    )?;
    let raw = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(name, expression, points)| {
            Ok(ConditionRule {
                name,
                expression: decode_expression(expression)?,
                penalty: penalty("condition penalty", points)?,
            })
        })
        .collect()
}

fn load_safety_rules(conn: &Connection) -> Result<Vec<SafetyRule>, RepositoryError> {
    let mut statement = conn.prepare(
        "SELECT flag, expression, message FROM hi_safety_rules WHERE active = 1 ORDER BY id",
    )?;
    let raw = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(flag, expression, message)| {
            Ok(SafetyRule {
                flag,
                expression: decode_expression(expression)?,
                message,
            })
        })
        .collect()
}

fn load_parameter_configs(conn: &Connection) -> Result<Vec<HealthIndexConfig>, RepositoryError> {
    let mut statement = conn.prepare(
        "SELECT parameter_key, include_in_index, direction, pmax, k_full, weight, active \
         FROM hi_parameter_config ORDER BY rowid",
    )?;
    let raw = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(parameter_key, include, direction, pmax, k_full, weight, active)| {
            Ok(HealthIndexConfig {
                parameter_key,
                include,
                direction: decode("deviation direction", direction, DeviationDirection::parse)?,
                pmax,
                k_full,
                weight,
                active,
            })
        })
        .collect()
}

fn load_combination_rules(conn: &Connection) -> Result<Vec<CombinationRule>, RepositoryError> {
    let mut statement = conn.prepare(
        "SELECT name, members, trigger_type, threshold, combo_max, scale_by_average, active \
         FROM hi_combination_rules ORDER BY id",
    )?;
    let raw = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(
            |(name, members, trigger, threshold, combo_max, scale_by_average, active)| {
                Ok(CombinationRule {
                    name,
                    members: serde_json::from_str(&members)?,
                    trigger: decode("combination trigger", trigger, CombinationTrigger::parse)?,
                    threshold,
                    combo_max,
                    scale_by_average,
                    active,
                })
            },
        )
        .collect()
}

fn load_bio_age_rules(conn: &Connection) -> Result<Vec<BioAgeRule>, RepositoryError> {
    let mut statement = conn.prepare(
        "SELECT parameter_key, gender, direction, range_start, range_end, penalty_years, flag_extreme \
         FROM bio_age_rules ORDER BY id",
    )?;
    let raw = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(
            |(parameter_key, gender, direction, range_start, range_end, penalty_years, flag_extreme)| {
                Ok(BioAgeRule {
                    parameter_key,
                    gender: gender
                        .map(|gender| decode("bio-age gender", gender, Gender::parse))
                        .transpose()?,
                    direction: decode("bio-age direction", direction, BioAgeDirection::parse)?,
                    range_start,
                    range_end,
                    penalty_years,
                    flag_extreme,
                })
            },
        )
        .collect()
}

/// Upserts companies and parameters, then rewrites every rule table.
pub fn seed_snapshot(conn: &Connection, snapshot: &ReferenceSnapshot) -> Result<(), RepositoryError> {
    conn.execute_batch(
        "DELETE FROM hi_penalty_rules;
         DELETE FROM hi_condition_rules;
         DELETE FROM hi_safety_rules;
         DELETE FROM hi_parameter_config;
         DELETE FROM hi_combination_rules;
         DELETE FROM bio_age_rules;
         DELETE FROM parameter_aliases;",
    )?;

    for company in &snapshot.companies {
        conn.execute(
            "INSERT OR IGNORE INTO companies (company_id) VALUES (?1)",
            [company],
        )?;
    }

    for definition in snapshot.parameters.values() {
        conn.execute(
            "INSERT INTO parameters (key, display_name, unit, kind, reference_min, reference_max, \
             male_min, male_max, female_min, female_max, priority, category) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(key) DO UPDATE SET display_name = excluded.display_name, \
             unit = excluded.unit, kind = excluded.kind, reference_min = excluded.reference_min, \
             reference_max = excluded.reference_max, male_min = excluded.male_min, \
             male_max = excluded.male_max, female_min = excluded.female_min, \
             female_max = excluded.female_max, priority = excluded.priority, \
             category = excluded.category",
            params![
                definition.key,
                definition.display_name,
                definition.unit,
                definition.kind.as_str(),
                definition.reference_min,
                definition.reference_max,
                definition.male_min,
                definition.male_max,
                definition.female_min,
                definition.female_max,
                definition.priority,
                definition.category,
            ],
        )?;
        for alias in &definition.aliases {
            conn.execute(
                "INSERT OR REPLACE INTO parameter_aliases (alias, parameter_key) VALUES (?1, ?2)",
                params![alias, definition.key],
            )?;
        }
    }

    let rules = &snapshot.health_index;
    for rule in &rules.penalty_rules {
        conn.execute(
            "INSERT INTO hi_penalty_rules (parameter_key, direction, lower_bound, upper_bound, penalty) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rule.parameter_key,
                rule.direction.as_str(),
                rule.lower,
                rule.upper,
                rule.penalty
            ],
        )?;
    }
    for rule in &rules.condition_rules {
        conn.execute(
            "INSERT INTO hi_condition_rules (name, expression, penalty) VALUES (?1, ?2, ?3)",
            params![rule.name, serde_json::to_string(&rule.expression)?, rule.penalty],
        )?;
    }
    for rule in &rules.safety_rules {
        conn.execute(
            "INSERT INTO hi_safety_rules (flag, expression, message) VALUES (?1, ?2, ?3)",
            params![rule.flag, serde_json::to_string(&rule.expression)?, rule.message],
        )?;
    }
    for config in &rules.parameter_configs {
        conn.execute(
            "INSERT INTO hi_parameter_config (parameter_key, include_in_index, direction, pmax, \
             k_full, weight, active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                config.parameter_key,
                config.include,
                config.direction.as_str(),
                config.pmax,
                config.k_full,
                config.weight,
                config.active
            ],
        )?;
    }
    for rule in &rules.combination_rules {
        conn.execute(
            "INSERT INTO hi_combination_rules (name, members, trigger_type, threshold, combo_max, \
             scale_by_average, active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.name,
                serde_json::to_string(&rule.members)?,
                rule.trigger.as_str(),
                rule.threshold,
                rule.combo_max,
                rule.scale_by_average,
                rule.active
            ],
        )?;
    }
    for rule in &snapshot.bio_age_rules {
        conn.execute(
            "INSERT INTO bio_age_rules (parameter_key, gender, direction, range_start, range_end, \
             penalty_years, flag_extreme) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.parameter_key,
                rule.gender.map(Gender::label),
                rule.direction.as_str(),
                rule.range_start,
                rule.range_end,
                rule.penalty_years,
                rule.flag_extreme
            ],
        )?;
    }

    info!(
        parameters = snapshot.parameters.len(),
        companies = snapshot.companies.len(),
        "reference data seeded"
    );
    Ok(())
}
