use crate::analysis::spam::SpamConfig;
use crate::analysis::velocity::{ScoringWeights, VelocityConfig};
use crate::commands::github::RetryPolicy;
use crate::error::{RadarError, Result};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

const SETTINGS_SCHEMA_VERSION: i64 = 2;

/// Typed view over the settings file, handed to every component at startup.
#[derive(Debug, Clone)]
pub struct RadarSettings {
    pub velocity: VelocityConfig,
    pub spam: SpamConfig,
    pub retry: RetryPolicy,
    /// Trailing window for the activity counters.
    pub window_days: u32,
    /// Minimum velocity for pinning and the watch-list hand-off.
    pub archive_threshold: f64,
    pub feed_limit: usize,
    pub search_limit: usize,
}

impl Default for RadarSettings {
    fn default() -> Self {
        effective_settings(&default_settings())
    }
}

/// Load settings from `path`, migrating and writing them back when they changed.
///
/// With no path the built-in defaults are used and nothing touches disk.
pub fn load_settings(path: Option<&Path>) -> Result<Value> {
    let Some(path) = path else {
        return Ok(migrate_settings(json!({})));
    };

    let original = if path.exists() {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str::<Value>(&raw).map_err(|e| {
            RadarError::config(format!("invalid settings file {}: {e}", path.display()))
        })?
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(path, &migrated)?;
        log::debug!("Wrote settings to {}", path.display());
    }

    Ok(migrated)
}

pub fn load_effective_settings(path: Option<&Path>) -> Result<RadarSettings> {
    Ok(effective_settings(&load_settings(path)?))
}

/// Merge `incoming` over the stored settings and persist the sanitised result.
pub fn save_settings(path: &Path, incoming: &Value) -> Result<Value> {
    let mut merged = load_settings(Some(path)).unwrap_or_else(|_| default_settings());
    merge_settings(&mut merged, incoming);

    let migrated = migrate_settings(merged);
    write_settings_file(path, &migrated)?;
    Ok(migrated)
}

pub fn effective_settings(settings: &Value) -> RadarSettings {
    let defaults = VelocityConfig::default();
    let weights = settings.get("weights");
    let weight = |key: &str, fallback: f64| {
        weights
            .and_then(|w| w.get(key))
            .and_then(Value::as_f64)
            .unwrap_or(fallback)
    };

    let velocity = VelocityConfig {
        weights: ScoringWeights {
            commits: weight("commits", defaults.weights.commits),
            forks: weight("forks", defaults.weights.forks),
            contributors: weight("contributors", defaults.weights.contributors),
            issues: weight("issues", defaults.weights.issues),
            prs: weight("prs", defaults.weights.prs),
            watchers: weight("watchers", defaults.weights.watchers),
        },
        freshness_days: get_u64(settings, "freshnessDays", defaults.freshness_days as u64) as i64,
        freshness_boost: get_f64(settings, "freshnessBoost", defaults.freshness_boost),
        sustained_days: get_u64(settings, "sustainedDays", defaults.sustained_days as u64) as i64,
        sustained_bonus: get_f64(settings, "sustainedBonus", defaults.sustained_bonus),
    };

    let mut spam = SpamConfig::default();
    if let Some(section) = settings.get("spam") {
        spam.threshold = get_f64(section, "threshold", spam.threshold);
        spam.owner_concentration_threshold = get_u64(
            section,
            "ownerConcentrationThreshold",
            spam.owner_concentration_threshold,
        );
        spam.high_velocity_floor = get_f64(section, "highVelocityFloor", spam.high_velocity_floor);
        spam.cluster_tolerance = get_f64(section, "clusterTolerance", spam.cluster_tolerance);
        spam.cluster_min_size = get_u64(section, "clusterMinSize", spam.cluster_min_size);
        spam.keyword_blocklist
            .extend(string_list(section, "extraBlocklist").map(|s| s.to_lowercase()));
        spam.known_spam_owners.extend(string_list(section, "extraSpamOwners"));
    }

    let retry_defaults = RetryPolicy::default();
    let retry = match settings.get("retry") {
        Some(section) => RetryPolicy {
            max_attempts: get_u64(section, "maxAttempts", u64::from(retry_defaults.max_attempts))
                as u32,
            backoff_base: get_u64(section, "backoffBase", retry_defaults.backoff_base),
            ..retry_defaults
        },
        None => retry_defaults,
    };

    RadarSettings {
        velocity,
        spam,
        retry,
        window_days: get_u64(settings, "windowDays", 7) as u32,
        archive_threshold: get_f64(settings, "archiveThreshold", 25.0),
        feed_limit: get_u64(settings, "feedLimit", 100) as usize,
        search_limit: get_u64(settings, "searchLimit", 30) as usize,
    }
}

fn get_u64(value: &Value, key: &str, default: u64) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(default)
}

fn get_f64(value: &Value, key: &str, default: f64) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn string_list<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = String> + 'a {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<()> {
    let raw = serde_json::to_string_pretty(settings)?;
    fs::write(path, raw)?;
    Ok(())
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 2 {
        // V1 kept the spam threshold at the top level.
        migrate_flat_spam_threshold(&mut out);
    }

    deep_merge_defaults(&mut out, &defaults);

    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "windowDays": 7,
        "archiveThreshold": 25.0,
        "feedLimit": 100,
        "searchLimit": 30,
        "weights": {
            "commits": 10.0,
            "forks": 5.0,
            "contributors": 15.0,
            "issues": 2.0,
            "prs": 3.0,
            "watchers": 1.0
        },
        "freshnessDays": 30,
        "freshnessBoost": 1.5,
        "sustainedDays": 180,
        "sustainedBonus": 1.2,
        "spam": {
            "threshold": 0.7,
            "ownerConcentrationThreshold": 5,
            "highVelocityFloor": 500.0,
            "clusterTolerance": 5.0,
            "clusterMinSize": 5,
            "extraBlocklist": [],
            "extraSpamOwners": []
        },
        "retry": {
            "maxAttempts": 3,
            "backoffBase": 2
        }
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object())
    else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

fn migrate_flat_spam_threshold(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };
    let Some(legacy) = obj.remove("spamThreshold") else {
        return;
    };

    let spam = obj.entry("spam".to_string()).or_insert_with(|| json!({}));
    if let Some(spam_obj) = spam.as_object_mut() {
        spam_obj.insert("threshold".to_string(), legacy);
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    clamp_u64(obj, "windowDays", 1, 30, 7);
    clamp_u64(obj, "feedLimit", 10, 1000, 100);
    clamp_u64(obj, "searchLimit", 1, 100, 30);
    clamp_u64(obj, "freshnessDays", 1, 365, 30);
    clamp_u64(obj, "sustainedDays", 1, 3650, 180);
    clamp_f64(obj, "archiveThreshold", 0.0, 1_000_000.0, 25.0);
    clamp_f64(obj, "freshnessBoost", 1.0, 10.0, 1.5);
    clamp_f64(obj, "sustainedBonus", 1.0, 10.0, 1.2);

    let weights = obj.entry("weights".to_string()).or_insert_with(|| json!({}));
    if let Some(weight_obj) = weights.as_object_mut() {
        for (key, default) in [
            ("commits", 10.0),
            ("forks", 5.0),
            ("contributors", 15.0),
            ("issues", 2.0),
            ("prs", 3.0),
            ("watchers", 1.0),
        ] {
            // Negative weights would let activity lower a score.
            clamp_f64(weight_obj, key, 0.0, 1000.0, default);
        }
    } else {
        *weights = default_settings()["weights"].clone();
    }

    if let Some(spam) = obj.get_mut("spam").and_then(Value::as_object_mut) {
        clamp_f64(spam, "threshold", 0.0, 1.0, 0.7);
        clamp_u64(spam, "ownerConcentrationThreshold", 1, 1000, 5);
        clamp_f64(spam, "highVelocityFloor", 0.0, 1_000_000.0, 500.0);
        clamp_f64(spam, "clusterTolerance", 0.0, 1000.0, 5.0);
        clamp_u64(spam, "clusterMinSize", 1, 1000, 5);
        ensure_string_list(spam, "extraBlocklist");
        ensure_string_list(spam, "extraSpamOwners");
    }

    if let Some(retry) = obj.get_mut("retry").and_then(Value::as_object_mut) {
        clamp_u64(retry, "maxAttempts", 1, 10, 3);
        clamp_u64(retry, "backoffBase", 1, 10, 2);
    }
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn clamp_f64(map: &mut Map<String, Value>, key: &str, min: f64, max: f64, default: f64) {
    let raw = map
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn ensure_string_list(map: &mut Map<String, Value>, key: &str) {
    let cleaned: Vec<Value> = map
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| json!(s))
                .collect()
        })
        .unwrap_or_default();
    map.insert(key.to_string(), Value::Array(cleaned));
}
