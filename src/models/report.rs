use super::verdict::{SignalType, SpamVerdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_repos: usize,
    pub clean_repos: usize,
    pub spam_repos: usize,
    pub spam_percentage: f64,
}

/// Whole-database spam analysis, written as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamReport {
    pub report_id: String,
    pub generated_at: String,
    pub summary: ReportSummary,
    pub signal_frequency: BTreeMap<SignalType, usize>,
    pub top_spam_owners: Vec<(String, usize)>,
    pub spam_repos: Vec<SpamVerdict>,
    pub borderline_clean: Vec<SpamVerdict>,
}
