use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod download;
pub mod manager;
pub mod observer;
pub mod placement;
pub mod record;
pub mod transport;
pub mod validation;

/// What the caller wants downloaded. `expected_size` is an estimate used
/// for display only, the server reported length always wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDescriptor {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub expected_size: u64,
}
