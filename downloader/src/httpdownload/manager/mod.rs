mod inner;
mod item;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::httpdownload::download::config::{HttpDownloadConfig, ManagerConfig};
use crate::httpdownload::download::DownloadUpdate;
use crate::httpdownload::observer::{ManagerSnapshot, TransferSnapshot};
use crate::httpdownload::record::{Action, Status};
use crate::httpdownload::transport::{HttpTransport, Transport, TransportError};
use crate::httpdownload::DownloadDescriptor;

use self::inner::Inner;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("Download with id {0} is already active")]
    AlreadyActive(Uuid),
    #[error("Download with id {0} not found")]
    NotFound(Uuid),
    #[error("Cannot {action} download {id} while it is {status}")]
    InvalidStateTransition {
        id: Uuid,
        status: Status,
        action: Action,
    },
    #[error("Download is not running")]
    DownloadNotRunning,
    #[error("JoinError for download: {0}")]
    TokioJoinError(#[from] tokio::task::JoinError),
    #[error("Could not set up the http transport: {0}")]
    Transport(#[from] TransportError),
    #[error("Manager shut down before download {0} finished")]
    Closed(Uuid),
}

/// This struct takes care of storing/running/pausing/cancelling downloads.
/// Internally it uses a RwLock to allow for concurrent access,
/// this exposes a thread-safe interface.
/// Worker updates are applied by a background task in the order each worker
/// sent them, every change is published as a [`ManagerSnapshot`].
/// This struct is supposed to be cloned as it uses an Arc internally.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<RwLock<Inner>>,
    snapshots: watch::Receiver<ManagerSnapshot>,
}

impl DownloadManager {
    /// Creates a manager downloading over http(s). Needs a running tokio runtime.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let transport = HttpTransport::new(HttpDownloadConfig::from(&config))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ManagerConfig, transport: Arc<dyn Transport>) -> Self {
        let (update_sender, mut update_recv) = mpsc::unbounded_channel::<DownloadUpdate>();
        let (publisher, snapshots) = watch::channel(ManagerSnapshot::default());
        let inner = Arc::new(RwLock::new(Inner::new(
            config,
            transport,
            update_sender,
            publisher,
        )));
        let weak = Arc::downgrade(&inner);
        log::info!("Spawning update consumer task");
        tokio::spawn(async move {
            while let Some(update) = update_recv.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.write().await.apply(update).await;
            }
            log::info!("Download manager dropped, update consumer exiting");
        });
        Self { inner, snapshots }
    }

    /// Starts downloading `descriptor` into `destination_dir`. The record is
    /// `Downloading` (or `Queued` under a full concurrency cap) when this returns.
    pub async fn start(&self, descriptor: &DownloadDescriptor, destination_dir: impl Into<PathBuf>) -> Result<Uuid> {
        let mut inner = self.inner.write().await;
        inner.start(descriptor, destination_dir.into())
    }

    pub async fn pause(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.pause(id).await
    }

    pub async fn resume(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.resume(id)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.cancel(id).await
    }

    pub async fn cancel_all(&self) -> Vec<(Uuid, Result<()>)> {
        let mut inner = self.inner.write().await;
        inner.cancel_all().await
    }

    /// Latest published snapshot of both collections.
    pub fn snapshot(&self) -> ManagerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<TransferSnapshot> {
        self.snapshots.borrow().get(id).cloned()
    }

    /// Receiver notified after every change, for consumers that react to updates.
    pub fn subscribe(&self) -> watch::Receiver<ManagerSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until the active transfer for `id` reaches a terminal state and
    /// returns its final snapshot. An already finished id resolves at once.
    pub async fn wait(&self, id: Uuid) -> Result<TransferSnapshot> {
        let mut snapshots = self.snapshots.clone();
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if !snapshot.is_active(id) {
                    return snapshot.get(id).cloned().ok_or(Error::NotFound(id));
                }
            }
            snapshots.changed().await.map_err(|_| Error::Closed(id))?;
        }
    }
}
