use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A knowledge store row: the indexed content of one project file.
///
/// Fingerprints live in the manifest only; the store holds content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub project_id: String,
    pub path: String,
    pub content: String,
    pub byte_size: u64,
    pub indexed_at: DateTime<Utc>,
}
