use super::{Error, Result};
use crate::httpdownload::download::{DownloadUpdate, HttpDownload, Reporter, UpdateType};
use crate::httpdownload::record::TransferRecord;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A record in the active collection together with the worker driving it.
#[derive(Debug)]
pub struct DownloaderItem {
    pub record: TransferRecord,
    /// Handed out by the manager on every launch and every stop, never
    /// reused for another launch, even across items sharing an id.
    generation: u64,
    tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DownloaderItem {
    pub fn new(record: TransferRecord) -> Self {
        DownloaderItem {
            record,
            generation: 0,
            tx: None,
            handle: None,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn run(
        &mut self,
        download: HttpDownload,
        offset: u64,
        update_ch: mpsc::UnboundedSender<DownloadUpdate>,
        generation: u64,
    ) {
        let (tx, rx) = oneshot::channel();
        self.generation = generation;
        let reporter = Reporter::new(download.id, self.generation, update_ch);
        let handle = tokio::spawn(async move {
            log::info!(
                "Launching download: {}, offset: {}",
                download.id,
                offset
            );
            match download.start(offset, rx, &reporter).await {
                Ok(Some(staged)) => reporter.send(UpdateType::Complete(staged)),
                Ok(None) => log::info!("Download {} stopped at user request", download.id),
                Err(e) => {
                    log::error!(
                        "Error encountered while downloading {}, Error: {}",
                        download.id,
                        e
                    );
                    reporter.send(UpdateType::Error(e));
                }
            }
        });
        self.tx = Some(tx);
        self.handle = Some(handle);
    }

    /// Asks the worker to stop and waits until it flushed the staging file.
    pub async fn stop(&mut self, generation: u64) -> Result<()> {
        self.generation = generation;
        let handle = self.handle.take().ok_or(Error::DownloadNotRunning)?;
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
        handle.await?;
        Ok(())
    }

    /// Drops the worker where it stands, releasing its connection.
    pub async fn abort(&mut self, generation: u64) {
        self.generation = generation;
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    log::error!("Worker for download {} panicked: {}", self.record.id, e);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn worker_done(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// The worker ended on its own and its final update is being applied.
    pub fn finished(&mut self) {
        self.tx = None;
        self.handle = None;
    }
}
