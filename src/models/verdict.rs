use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    KeywordBlocklist,
    SpamNameKeyword,
    SuspiciousPattern,
    SeoName,
    KnownSpamOwner,
    OwnerConcentration,
    VelocityClustering,
}

impl SignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeywordBlocklist => "keyword_blocklist",
            Self::SpamNameKeyword => "spam_name_keyword",
            Self::SuspiciousPattern => "suspicious_pattern",
            Self::SeoName => "seo_name",
            Self::KnownSpamOwner => "known_spam_owner",
            Self::OwnerConcentration => "owner_concentration",
            Self::VelocityClustering => "velocity_clustering",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector's finding. `severity` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamSignal {
    pub signal_type: SignalType,
    pub severity: f64,
    pub detail: String,
}

impl SpamSignal {
    pub fn new(signal_type: SignalType, severity: f64, detail: impl Into<String>) -> Self {
        Self {
            signal_type,
            severity,
            detail: detail.into(),
        }
    }
}

/// Outcome of one analysis pass over a repository. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamVerdict {
    pub full_name: String,
    pub velocity_score: f64,
    pub is_spam: bool,
    pub spam_probability: f64,
    pub signals: Vec<SpamSignal>,
    pub timestamp: String,
}
