use serde::{Deserialize, Serialize};

/// Raw activity counts feeding the velocity score.
///
/// `contributors` is the lifetime contributor total reported by the source,
/// not a windowed count, even though it is stored as `contributors_7d`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub commits: u64,
    pub forks: u64,
    pub contributors: u64,
    pub issues: u64,
    pub prs: u64,
    pub watchers: u64,
}

/// One tracked repository, keyed by `full_name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub description: String,
    pub created_at: Option<String>,
    pub pushed_at: Option<String>,
    pub velocity_score: f64,
    pub commits_7d: u64,
    pub forks_7d: u64,
    pub contributors_7d: u64, // lifetime total, see ActivityCounts
    pub issues_7d: u64,
    pub prs_7d: u64,
    pub stars: u64,
    pub watchers: u64,
    pub ipfs_cid: Option<String>,
    pub fed_to_gar: bool,
    pub last_seen: Option<String>,
    pub last_scored: Option<String>,
}

impl RepoRecord {
    /// Empty record with owner/name split out of `full_name`.
    pub fn new(full_name: &str) -> Self {
        let (owner, name) = split_full_name(full_name);
        Self {
            full_name: full_name.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn activity(&self) -> ActivityCounts {
        ActivityCounts {
            commits: self.commits_7d,
            forks: self.forks_7d,
            contributors: self.contributors_7d,
            issues: self.issues_7d,
            prs: self.prs_7d,
            watchers: self.watchers,
        }
    }
}

/// Split `owner/name`. A bare name has an empty owner.
pub fn split_full_name(full_name: &str) -> (&str, &str) {
    match full_name.split_once('/') {
        Some((owner, name)) => (owner, name),
        None => ("", full_name),
    }
}

/// The part after the last `/`.
pub fn short_name(full_name: &str) -> &str {
    full_name.rsplit('/').next().unwrap_or(full_name)
}
