pub mod httpdownload;
pub mod util;

pub use httpdownload::manager::DownloadManager;
pub use httpdownload::DownloadDescriptor;

pub const DEFAULT_USER_AGENT: &str = "artifact-dl";
