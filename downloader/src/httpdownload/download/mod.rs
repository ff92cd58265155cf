pub mod config;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Url;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::util::{bytes_per_second, file_size, mb};

use super::transport::{Transport, TransportError};
use super::validation::{self, ValidationError, ValidationPolicy, Verdict};

use self::config::HttpDownloadConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File IO operation failed, error: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct DownloadUpdate {
    pub id: Uuid,
    /// Launch that produced the update, see [`super::manager`].
    pub generation: u64,
    pub update_type: UpdateType,
}

#[derive(Debug)]
pub enum UpdateType {
    /// Response headers arrived, `bytes_expected` is 0 when the length is unknown.
    Connected {
        bytes_written: u64,
        bytes_expected: u64,
        filename_hint: Option<String>,
    },
    Running {
        bytes_written: u64,
        bytes_per_second: u64,
    },
    /// The payload passed validation and waits in its staging file.
    Complete(StagedArtifact),
    Error(Error),
}

#[derive(Debug)]
pub struct StagedArtifact {
    pub part_path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub verdict: Verdict,
}

/// Sends the updates of one launch, tagged with its generation.
#[derive(Debug, Clone)]
pub struct Reporter {
    id: Uuid,
    generation: u64,
    update_ch: mpsc::UnboundedSender<DownloadUpdate>,
}

impl Reporter {
    pub fn new(id: Uuid, generation: u64, update_ch: mpsc::UnboundedSender<DownloadUpdate>) -> Self {
        Reporter {
            id,
            generation,
            update_ch,
        }
    }

    pub fn send(&self, update_type: UpdateType) {
        let update = DownloadUpdate {
            id: self.id,
            generation: self.generation,
            update_type,
        };
        if self.update_ch.send(update).is_err() {
            log::warn!("Update channel closed, dropping update for download {}", self.id);
        }
    }
}

/// Everything one launch of a transfer needs, detached from the manager.
#[derive(Clone)]
pub struct HttpDownload {
    pub id: Uuid,
    pub url: Url,
    pub name: String,
    pub part_path: PathBuf,
    pub destination_dir: PathBuf,
    /// Length learned by an earlier launch, 0 if unknown.
    pub bytes_expected: u64,
    pub filename_hint: Option<String>,
    pub transport: Arc<dyn Transport>,
    pub config: HttpDownloadConfig,
    pub policy: ValidationPolicy,
}

impl fmt::Debug for HttpDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDownload")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("part_path", &self.part_path)
            .field("bytes_expected", &self.bytes_expected)
            .finish()
    }
}

impl HttpDownload {
    /**
     * Runs the transfer from `offset` until the stream ends or `stop_ch` fires.
     * Returns the validated staging file, or `None` when stopped.
     * With `offset > 0` the request asks for the remaining bytes only, a
     * server ignoring the range makes the payload restart from scratch.
     */
    pub async fn start(
        &self,
        offset: u64,
        mut stop_ch: oneshot::Receiver<()>,
        reporter: &Reporter,
    ) -> Result<Option<StagedArtifact>> {
        tokio::fs::create_dir_all(&self.destination_dir).await?;
        let offset = offset.min(file_size(&self.part_path).await);
        if offset > 0 && self.bytes_expected > 0 && offset >= self.bytes_expected {
            log::info!(
                "Payload for {} is already fully staged, skipping request",
                self.url
            );
            return self
                .stage(self.filename_hint.clone())
                .await
                .map(Some);
        }

        let payload = tokio::select! {
            _ = &mut stop_ch => {
                log::info!("Download stop signal received before response for: {}", self.url);
                return Ok(None);
            }
            payload = self.transport.open(&self.url, offset) => payload?,
        };

        let (file_handler, offset) = if offset > 0 && payload.partial {
            let file_handler = OpenOptions::new()
                .append(true)
                .open(&self.part_path)
                .await?;
            (file_handler, offset)
        } else {
            if offset > 0 {
                log::warn!(
                    "Server ignored the range request for {}, starting from scratch",
                    self.url
                );
            }
            (File::create(&self.part_path).await?, 0)
        };
        let bytes_expected = payload
            .content_length
            .map(|len| len + offset)
            .unwrap_or(0);
        let filename_hint = payload.filename_hint.or_else(|| self.filename_hint.clone());
        reporter.send(UpdateType::Connected {
            bytes_written: offset,
            bytes_expected,
            filename_hint: filename_hint.clone(),
        });

        let stopped = self
            .progress(payload.body, file_handler, stop_ch, reporter, offset, bytes_expected)
            .await?
            .is_none();
        if stopped {
            return Ok(None);
        }
        self.stage(filename_hint).await.map(Some)
    }

    async fn progress(
        &self,
        mut stream: BoxStream<'static, std::result::Result<bytes::Bytes, TransportError>>,
        mut file_handler: File,
        mut stop_ch: oneshot::Receiver<()>,
        reporter: &Reporter,
        mut downloaded_bytes: u64,
        bytes_expected: u64,
    ) -> Result<Option<u64>> {
        let period = self.config.sample_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sample = Instant::now();
        let mut bytes_at_last_sample = downloaded_bytes;
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_ch => {
                    file_handler.flush().await?;
                    log::info!("Download stop signal received for: {}", self.url);
                    return Ok(None);
                }
                _ = ticker.tick() => {
                    reporter.send(UpdateType::Running {
                        bytes_written: downloaded_bytes,
                        bytes_per_second: bytes_per_second(
                            downloaded_bytes - bytes_at_last_sample,
                            last_sample.elapsed(),
                        ),
                    });
                    last_sample = Instant::now();
                    bytes_at_last_sample = downloaded_bytes;
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let item = chunk?;
                    let len = item.len() as u64;
                    if bytes_expected > 0 && downloaded_bytes + len > bytes_expected {
                        return Err(TransportError::Overrun(downloaded_bytes + len, bytes_expected).into());
                    }
                    file_handler.write_all(&item).await?;
                    downloaded_bytes += len;
                }
            }
        }
        file_handler.flush().await?;
        if bytes_expected > 0 && downloaded_bytes < bytes_expected {
            log::error!(
                "Download stream ended before completion, downloaded bytes: {}, content length: {}",
                downloaded_bytes,
                bytes_expected
            );
            return Err(TransportError::StreamEndedBeforeCompletion(downloaded_bytes, bytes_expected).into());
        }
        log::info!(
            "Download stream finished: {}, {:.2}MB",
            self.url,
            mb(downloaded_bytes)
        );
        Ok(Some(downloaded_bytes))
    }

    /// Validates the staging file and names its final destination.
    async fn stage(&self, filename_hint: Option<String>) -> Result<StagedArtifact> {
        let size = file_size(&self.part_path).await;
        let verdict = validation::inspect(&self.part_path, size, &self.policy).await?;
        let file_name = validation::resolve_filename(
            filename_hint.as_deref(),
            &self.url,
            &self.name,
            &self.policy.expected_extension,
        );
        Ok(StagedArtifact {
            part_path: self.part_path.clone(),
            file_name,
            size,
            verdict,
        })
    }
}
