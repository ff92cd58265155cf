use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::observer::{format_duration, format_speed, TransferSnapshot, UNKNOWN_ETA};
use super::validation::Verdict;
use super::DownloadDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    NotStarted,
    /// Waiting for a free slot under the concurrency cap.
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NotStarted => "not started",
            Status::Queued => "queued",
            Status::Downloading => "downloading",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// User requests routed through the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Pause,
    Resume,
    Cancel,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// How a record reacts to an [`Action`] in its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Apply,
    NoOp,
    Reject,
}

/// The mutable state of one transfer. Only the manager touches it.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub id: Uuid,
    pub name: String,
    pub url: Url,
    pub destination_dir: PathBuf,
    /// Size announced by the catalog, for display only.
    pub estimated_size: u64,
    pub status: Status,
    pub bytes_written: u64,
    /// 0 until the server reports a content length.
    pub bytes_expected: u64,
    pub bytes_per_second: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub destination_path: Option<PathBuf>,
    pub verdict: Option<Verdict>,
    /// Content-Disposition name remembered across resumes.
    pub filename_hint: Option<String>,
}

impl TransferRecord {
    pub fn new(descriptor: &DownloadDescriptor, url: Url, destination_dir: PathBuf) -> Self {
        TransferRecord {
            id: descriptor.id,
            name: descriptor.name.clone(),
            url,
            destination_dir,
            estimated_size: descriptor.expected_size,
            status: Status::NotStarted,
            bytes_written: 0,
            bytes_expected: 0,
            bytes_per_second: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
            destination_path: None,
            verdict: None,
            filename_hint: None,
        }
    }

    /// Where the payload is staged while it is being received.
    pub fn part_path(&self) -> PathBuf {
        self.destination_dir.join(format!(".{}.part", self.id))
    }

    pub fn plan(&self, action: Action) -> Plan {
        use Status::*;
        match (self.status, action) {
            (NotStarted, Action::Start) => Plan::Apply,
            (Downloading | Queued, Action::Pause) => Plan::Apply,
            (Paused, Action::Pause) => Plan::NoOp,
            (Paused, Action::Resume) => Plan::Apply,
            (Downloading | Queued, Action::Resume) => Plan::NoOp,
            (Queued | Downloading | Paused, Action::Cancel) => Plan::Apply,
            (status, Action::Cancel) if status.is_terminal() => Plan::NoOp,
            _ => Plan::Reject,
        }
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.status == Status::Completed {
            1.0
        } else if self.bytes_expected > 0 {
            (self.bytes_written as f64 / self.bytes_expected as f64).min(1.0)
        } else {
            0.0
        }
    }

    /// Seconds left at the current throughput, `None` while it is unknown.
    pub fn eta_seconds(&self) -> Option<f64> {
        if self.bytes_per_second > 0 && self.bytes_expected > self.bytes_written {
            Some((self.bytes_expected - self.bytes_written) as f64 / self.bytes_per_second as f64)
        } else {
            None
        }
    }

    pub fn begin(&mut self, queued: bool) {
        self.status = if queued {
            Status::Queued
        } else {
            Status::Downloading
        };
        self.started_at = Some(Utc::now());
    }

    /// Response headers arrived for the current launch.
    pub fn connected(&mut self, bytes_written: u64, bytes_expected: u64, hint: Option<String>) {
        self.bytes_expected = bytes_expected;
        self.bytes_written = bytes_written;
        if hint.is_some() {
            self.filename_hint = hint;
        }
    }

    pub fn advance(&mut self, bytes_written: u64, bytes_per_second: u64) {
        self.bytes_written = if self.bytes_expected > 0 {
            bytes_written.min(self.bytes_expected)
        } else {
            bytes_written
        };
        self.bytes_per_second = bytes_per_second;
    }

    /// `bytes_on_disk` is the staged payload's size once the worker stopped.
    pub fn pause(&mut self, bytes_on_disk: u64) {
        self.status = Status::Paused;
        self.advance(bytes_on_disk, 0);
    }

    pub fn resume(&mut self, queued: bool) {
        self.status = if queued {
            Status::Queued
        } else {
            Status::Downloading
        };
    }

    /// Leaves the queue for a free slot.
    pub fn dequeue(&mut self) {
        self.status = Status::Downloading;
    }

    pub fn complete(&mut self, destination_path: PathBuf, size: u64, verdict: Verdict) {
        if self.bytes_expected == 0 {
            self.bytes_expected = size;
        }
        self.bytes_written = size;
        self.destination_path = Some(destination_path);
        self.verdict = Some(verdict);
        self.finish(Status::Completed);
    }

    pub fn fail(&mut self, reason: String) {
        self.last_error = Some(reason);
        self.finish(Status::Failed);
    }

    pub fn cancel(&mut self) {
        self.finish(Status::Cancelled);
    }

    fn finish(&mut self, status: Status) {
        self.status = status;
        self.bytes_per_second = 0;
        self.ended_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id,
            name: self.name.clone(),
            url: self.url.to_string(),
            status: self.status,
            progress_fraction: self.progress_fraction(),
            bytes_written: self.bytes_written,
            bytes_expected: self.bytes_expected,
            estimated_size: self.estimated_size,
            bytes_per_second: self.bytes_per_second,
            speed: format_speed(self.bytes_per_second),
            estimated_time_remaining: self
                .eta_seconds()
                .map(format_duration)
                .unwrap_or_else(|| UNKNOWN_ETA.to_owned()),
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_error: self.last_error.clone(),
            destination_path: self.destination_path.clone(),
            verdict: self.verdict,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::TestResult;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn record(expected_size: u64) -> TestResult<TransferRecord> {
        let descriptor = DownloadDescriptor {
            id: Uuid::new_v4(),
            name: "macOS Catalina 10.15.7".to_owned(),
            url: "https://swcdn.apple.com/content/downloads/InstallAssistant.pkg".to_owned(),
            expected_size,
        };
        let url = Url::parse(&descriptor.url)?;
        Ok(TransferRecord::new(&descriptor, url, PathBuf::from("/tmp")))
    }

    #[test]
    fn six_gigabyte_transfer_completes_at_full_progress() -> TestResult<()> {
        // given
        let tmp_dir = TempDir::new()?;
        let destination = tmp_dir.path().join("InstallAssistant.pkg");
        std::fs::write(&destination, b"placed")?;
        let mut record = record(6_000_000_000)?;
        record.begin(false);
        assert_eq!(record.status, Status::Downloading);
        record.connected(0, 6_000_000_000, None);
        // when
        let mut written = 0u64;
        for _ in 0..6 {
            written += 1_000_000_000;
            record.advance(written, 1_000_000_000);
            assert!(record.bytes_written <= record.bytes_expected);
        }
        record.complete(destination.clone(), written, Verdict::Confirmed);
        // then
        assert_eq!(record.status, Status::Completed);
        assert_eq!(record.progress_fraction(), 1.0);
        assert_eq!(record.bytes_written, 6_000_000_000);
        assert!(record.ended_at.is_some());
        assert!(record.destination_path.as_ref().unwrap().exists());
        Ok(())
    }

    #[test]
    fn advance_never_passes_expected_length() -> TestResult<()> {
        let mut record = record(0)?;
        record.begin(false);
        record.advance(500, 10);
        assert_eq!(record.bytes_written, 500, "unknown length leaves the count alone");
        assert_eq!(record.progress_fraction(), 0.0);
        record.connected(500, 1000, None);
        record.advance(1500, 10);
        assert_eq!(record.bytes_written, 1000);
        assert_eq!(record.progress_fraction(), 1.0);
        Ok(())
    }

    #[test]
    fn state_machine_plans() -> TestResult<()> {
        let mut record = record(0)?;
        assert_eq!(record.plan(Action::Start), Plan::Apply);
        assert_eq!(record.plan(Action::Pause), Plan::Reject);
        record.begin(false);
        assert_eq!(record.plan(Action::Start), Plan::Reject);
        assert_eq!(record.plan(Action::Resume), Plan::NoOp);
        assert_eq!(record.plan(Action::Pause), Plan::Apply);
        record.pause(10);
        assert_eq!(record.plan(Action::Pause), Plan::NoOp);
        assert_eq!(record.plan(Action::Resume), Plan::Apply);
        assert_eq!(record.plan(Action::Cancel), Plan::Apply);
        record.cancel();
        assert_eq!(record.plan(Action::Cancel), Plan::NoOp);
        assert_eq!(record.plan(Action::Pause), Plan::Reject);
        assert_eq!(record.plan(Action::Resume), Plan::Reject);
        Ok(())
    }

    #[test]
    fn eta_needs_throughput_and_known_length() -> TestResult<()> {
        let mut record = record(0)?;
        record.begin(false);
        assert_eq!(record.snapshot().estimated_time_remaining, UNKNOWN_ETA);
        record.connected(0, 10_000, None);
        record.advance(1000, 0);
        assert_eq!(record.eta_seconds(), None);
        record.advance(1000, 200);
        assert_eq!(record.eta_seconds(), Some(45.0));
        assert_eq!(record.snapshot().estimated_time_remaining, "45s");
        record.pause(1000);
        assert_eq!(record.eta_seconds(), None, "paused transfers have no ETA");
        Ok(())
    }

    #[test]
    fn failure_keeps_reason_and_end_time() -> TestResult<()> {
        let mut record = record(0)?;
        record.begin(false);
        record.fail("Connection interrupted: reset by peer".to_owned());
        assert_eq!(record.status, Status::Failed);
        assert!(record.status.is_terminal());
        assert!(record.ended_at.is_some());
        assert_eq!(
            record.snapshot().last_error.as_deref(),
            Some("Connection interrupted: reset by peer")
        );
        Ok(())
    }
}
