use crate::models::repo::ActivityCounts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-metric weights of the linear velocity sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub commits: f64,
    pub forks: f64,
    pub contributors: f64,
    pub issues: f64,
    pub prs: f64,
    pub watchers: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            commits: 10.0,
            forks: 5.0,
            contributors: 15.0,
            issues: 2.0,
            prs: 3.0,
            watchers: 1.0,
        }
    }
}

/// Weights plus the age bands that scale the sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityConfig {
    pub weights: ScoringWeights,
    /// Repos younger than this many days get `freshness_boost`.
    pub freshness_days: i64,
    pub freshness_boost: f64,
    /// Repos older than this many days with recent commits get `sustained_bonus`.
    pub sustained_days: i64,
    pub sustained_bonus: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            freshness_days: 30,
            freshness_boost: 1.5,
            sustained_days: 180,
            sustained_bonus: 1.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VelocityScorer {
    config: VelocityConfig,
}

impl VelocityScorer {
    pub fn new(config: VelocityConfig) -> Self {
        Self { config }
    }

    /// Score against the current UTC clock.
    pub fn score(&self, counts: &ActivityCounts, created_at: Option<&str>) -> f64 {
        self.score_at(counts, created_at, Utc::now())
    }

    /// Weighted sum of the counts, scaled by the age band of `created_at`
    /// relative to `now`, rounded to two decimals.
    ///
    /// An unparseable `created_at` is treated as absent.
    pub fn score_at(
        &self,
        counts: &ActivityCounts,
        created_at: Option<&str>,
        now: DateTime<Utc>,
    ) -> f64 {
        let w = &self.config.weights;
        let mut score = counts.commits as f64 * w.commits
            + counts.forks as f64 * w.forks
            + counts.contributors as f64 * w.contributors
            + counts.issues as f64 * w.issues
            + counts.prs as f64 * w.prs
            + counts.watchers as f64 * w.watchers;

        if let Some(age_days) = created_at.and_then(|raw| age_in_days(raw, now)) {
            if age_days < self.config.freshness_days {
                score *= self.config.freshness_boost;
            } else if age_days > self.config.sustained_days && counts.commits > 0 {
                score *= self.config.sustained_bonus;
            }
        }

        round_to(score, 2)
    }
}

/// Whole days between `created_at` and `now`, or `None` when the timestamp
/// does not parse as RFC 3339.
pub fn age_in_days(created_at: &str, now: DateTime<Utc>) -> Option<i64> {
    let created = DateTime::parse_from_rfc3339(created_at.trim()).ok()?;
    Some((now - created.with_timezone(&Utc)).num_days())
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
