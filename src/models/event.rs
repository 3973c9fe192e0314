use serde::{Deserialize, Serialize};

/// A public activity event, keyed by the source's own event id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: String,
    pub repo_name: String,
    pub actor: Option<String>,
    pub created_at: Option<String>,
    pub processed: bool,
}
