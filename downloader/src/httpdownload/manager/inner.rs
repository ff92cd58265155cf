use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::httpdownload::download::config::{HttpDownloadConfig, ManagerConfig};
use crate::httpdownload::download::{DownloadUpdate, HttpDownload, StagedArtifact, UpdateType};
use crate::httpdownload::observer::ManagerSnapshot;
use crate::httpdownload::placement;
use crate::httpdownload::record::{Action, Plan, Status, TransferRecord};
use crate::httpdownload::transport::Transport;
use crate::httpdownload::DownloadDescriptor;
use crate::util::file_size;

use super::item::DownloaderItem;
use super::{Error, Result};

const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

pub struct Inner {
    config: ManagerConfig,
    http_config: HttpDownloadConfig,
    transport: Arc<dyn Transport>,
    update_ch: mpsc::UnboundedSender<DownloadUpdate>,
    active: Vec<DownloaderItem>,
    history: Vec<TransferRecord>,
    publisher: watch::Sender<ManagerSnapshot>,
    /// Last generation handed to an item, shared by all ids.
    generation: u64,
}

impl Inner {
    pub fn new(
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        update_ch: mpsc::UnboundedSender<DownloadUpdate>,
        publisher: watch::Sender<ManagerSnapshot>,
    ) -> Self {
        let http_config = HttpDownloadConfig::from(&config);
        Inner {
            config,
            http_config,
            transport,
            update_ch,
            active: Vec::new(),
            history: Vec::new(),
            publisher,
            generation: 0,
        }
    }

    pub fn start(&mut self, descriptor: &DownloadDescriptor, destination_dir: PathBuf) -> Result<Uuid> {
        let url = parse_url(&descriptor.url)?;
        if self.active.iter().any(|item| item.record.id == descriptor.id) {
            return Err(Error::AlreadyActive(descriptor.id));
        }
        log::info!("Adding download: {} ({})", descriptor.name, url);
        let mut record = TransferRecord::new(descriptor, url, destination_dir);
        let queued = !self.has_free_slot();
        record.begin(queued);
        self.active.push(DownloaderItem::new(record));
        if queued {
            log::info!("Download {} queued, all slots are busy", descriptor.id);
        } else {
            self.launch(self.active.len() - 1, 0);
        }
        self.publish();
        Ok(descriptor.id)
    }

    pub async fn pause(&mut self, id: Uuid) -> Result<()> {
        log::info!("Pause action requested for download: {}", id);
        let idx = self.position(id, Action::Pause)?;
        match self.active[idx].record.plan(Action::Pause) {
            Plan::NoOp => return Ok(()),
            Plan::Reject => return Err(invalid(&self.active[idx].record, Action::Pause)),
            Plan::Apply => {}
        }
        let generation = self.next_generation();
        let item = &mut self.active[idx];
        match item.stop(generation).await {
            Ok(()) | Err(Error::DownloadNotRunning) => {}
            Err(e) => return Err(e),
        }
        let bytes_on_disk = file_size(&item.record.part_path()).await;
        item.record.pause(bytes_on_disk);
        log::info!("Download {} paused at {} bytes", id, bytes_on_disk);
        self.promote_queued();
        self.publish();
        Ok(())
    }

    pub fn resume(&mut self, id: Uuid) -> Result<()> {
        log::info!("Resume action requested for download: {}", id);
        let idx = self.position(id, Action::Resume)?;
        match self.active[idx].record.plan(Action::Resume) {
            Plan::NoOp => return Ok(()),
            Plan::Reject => return Err(invalid(&self.active[idx].record, Action::Resume)),
            Plan::Apply => {}
        }
        let queued = !self.has_free_slot();
        let record = &mut self.active[idx].record;
        record.resume(queued);
        let offset = record.bytes_written;
        if !queued {
            self.launch(idx, offset);
        }
        self.publish();
        Ok(())
    }

    pub async fn cancel(&mut self, id: Uuid) -> Result<()> {
        log::info!("Cancel action requested for download: {}", id);
        let idx = match self.position(id, Action::Cancel) {
            Ok(idx) => idx,
            // already finished, nothing left to cancel
            Err(Error::InvalidStateTransition { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let generation = self.next_generation();
        let item = &mut self.active[idx];
        item.abort(generation).await;
        placement::discard(&item.record.part_path()).await;
        item.record.cancel();
        log::info!("Download {} cancelled", id);
        self.retire(idx);
        self.publish();
        Ok(())
    }

    /// Cancels every active download independently of the others' outcome.
    pub async fn cancel_all(&mut self) -> Vec<(Uuid, Result<()>)> {
        let ids: Vec<Uuid> = self.active.iter().map(|item| item.record.id).collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.cancel(id).await;
            if let Err(e) = &result {
                log::error!("Failed to cancel download {}: {}", id, e);
            }
            results.push((id, result));
        }
        results
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot::new(self.active.iter().map(|item| &item.record), &self.history)
    }

    /// Applies an update sent by a worker, dropping those of superseded launches.
    pub async fn apply(&mut self, update: DownloadUpdate) {
        let Some(idx) = self
            .active
            .iter()
            .position(|item| item.record.id == update.id && item.is_current(update.generation))
        else {
            log::debug!("Discarding stale update: {:?}", update);
            return;
        };
        let item = &mut self.active[idx];
        match update.update_type {
            UpdateType::Connected {
                bytes_written,
                bytes_expected,
                filename_hint,
            } => item
                .record
                .connected(bytes_written, bytes_expected, filename_hint),
            UpdateType::Running {
                bytes_written,
                bytes_per_second,
            } => item.record.advance(bytes_written, bytes_per_second),
            UpdateType::Complete(staged) => {
                item.finished();
                self.place(idx, staged).await;
            }
            UpdateType::Error(e) => {
                item.finished();
                placement::discard(&item.record.part_path()).await;
                item.record.fail(e.to_string());
                log::error!("Download {} failed: {}", update.id, e);
                self.retire(idx);
            }
        }
        self.publish();
    }

    async fn place(&mut self, idx: usize, staged: StagedArtifact) {
        let record = &mut self.active[idx].record;
        let destination = record.destination_dir.join(&staged.file_name);
        match placement::relocate(&staged.part_path, &destination).await {
            Ok(()) => {
                log::info!("Download {} completed: {}", record.id, destination.display());
                record.complete(destination, staged.size, staged.verdict);
            }
            Err(e) => {
                log::error!(
                    "Failed to place download {} at {}: {}",
                    record.id,
                    destination.display(),
                    e
                );
                placement::discard(&staged.part_path).await;
                record.fail(format!("File IO operation failed, error: '{}'", e));
            }
        }
        self.retire(idx);
    }

    /// Moves a finished record to history and hands its slot to the queue.
    fn retire(&mut self, idx: usize) {
        let item = self.active.remove(idx);
        self.history.push(item.record);
        self.promote_queued();
    }

    fn promote_queued(&mut self) {
        while self.has_free_slot() {
            let Some(idx) = self
                .active
                .iter()
                .position(|item| item.record.status == Status::Queued)
            else {
                break;
            };
            let record = &mut self.active[idx].record;
            record.dequeue();
            log::info!("Download {} leaves the queue", record.id);
            let offset = record.bytes_written;
            self.launch(idx, offset);
        }
    }

    fn has_free_slot(&self) -> bool {
        let max = self.config.max_concurrent_downloads;
        max == 0
            || self
                .active
                .iter()
                .filter(|item| item.record.status == Status::Downloading)
                .count()
                < max
    }

    fn launch(&mut self, idx: usize, offset: u64) {
        let download = self.download_for(&self.active[idx].record);
        let update_ch = self.update_ch.clone();
        let generation = self.next_generation();
        self.active[idx].run(download, offset, update_ch, generation);
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn download_for(&self, record: &TransferRecord) -> HttpDownload {
        HttpDownload {
            id: record.id,
            url: record.url.clone(),
            name: record.name.clone(),
            part_path: record.part_path(),
            destination_dir: record.destination_dir.clone(),
            bytes_expected: record.bytes_expected,
            filename_hint: record.filename_hint.clone(),
            transport: self.transport.clone(),
            config: self.http_config.clone(),
            policy: self.config.validation.clone(),
        }
    }

    /// Index of the active record, or why there is none.
    fn position(&self, id: Uuid, action: Action) -> Result<usize> {
        if let Some(idx) = self.active.iter().position(|item| item.record.id == id) {
            return Ok(idx);
        }
        match self.history.iter().rev().find(|record| record.id == id) {
            Some(record) => Err(invalid(record, action)),
            None => Err(Error::NotFound(id)),
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot());
    }

    #[cfg(test)]
    pub fn running_workers(&self) -> usize {
        self.active.iter().filter(|item| item.is_running()).count()
    }

    /// Every worker has returned, its last update is sent.
    #[cfg(test)]
    pub fn workers_done(&self) -> bool {
        self.active.iter().all(|item| item.worker_done())
    }
}

fn invalid(record: &TransferRecord, action: Action) -> Error {
    Error::InvalidStateTransition {
        id: record.id,
        status: record.status,
        action,
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidUrl(raw.to_owned(), e.to_string()))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(Error::InvalidUrl(
            raw.to_owned(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_http_urls_are_accepted() {
        assert!(parse_url("https://swcdn.apple.com/InstallAssistant.pkg").is_ok());
        assert!(parse_url("http://swcdn.apple.com/InstallAssistant.pkg").is_ok());
        assert!(matches!(
            parse_url("ihttp://swcdn.apple.com/InstallAssistant.pkg"),
            Err(Error::InvalidUrl(..))
        ));
        assert!(matches!(parse_url("hgesdg98wq19"), Err(Error::InvalidUrl(..))));
    }
}
