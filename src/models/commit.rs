use serde::{Deserialize, Serialize};

/// A commit as seen by the archive relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub repo: String,
    pub message: String,
    pub author: String,
    pub timestamp: String,
    pub url: String,
    pub tree_sha: String,
    pub ipfs_cid: Option<String>,
    pub arweave_tx: Option<String>,
    pub archived_at: Option<String>,
}

/// Aggregate counters for `relay-stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayStats {
    pub total: usize,
    pub last_hour: usize,
    pub last_24h: usize,
    pub ipfs_archived: usize,
    pub arweave_archived: usize,
    pub top_repos: Vec<(String, usize)>,
}
