//! Read side of the manager: immutable snapshots of the transfer
//! collections, the counters derived from them and their display strings.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::record::{Status, TransferRecord};
use super::validation::Verdict;

/// Rendered in place of an ETA that cannot be estimated.
pub const UNKNOWN_ETA: &str = "—";

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Point-in-time view of one transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSnapshot {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub status: Status,
    pub progress_fraction: f64,
    pub bytes_written: u64,
    pub bytes_expected: u64,
    pub estimated_size: u64,
    pub bytes_per_second: u64,
    pub speed: String,
    pub estimated_time_remaining: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub destination_path: Option<PathBuf>,
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub active_count: usize,
    pub completed_count: usize,
    pub total_count: usize,
}

/// Both collections in order of insertion, plus their counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManagerSnapshot {
    pub active: Vec<TransferSnapshot>,
    pub history: Vec<TransferSnapshot>,
    pub summary: Summary,
}

impl ManagerSnapshot {
    pub fn new<'a>(
        active: impl IntoIterator<Item = &'a TransferRecord>,
        history: &[TransferRecord],
    ) -> Self {
        let active: Vec<_> = active.into_iter().map(TransferRecord::snapshot).collect();
        let history: Vec<_> = history.iter().map(TransferRecord::snapshot).collect();
        let summary = summarize(&active, &history);
        ManagerSnapshot {
            active,
            history,
            summary,
        }
    }

    /// The active transfer for `id`, or its most recent finished one.
    pub fn get(&self, id: Uuid) -> Option<&TransferSnapshot> {
        self.active
            .iter()
            .find(|transfer| transfer.id == id)
            .or_else(|| self.history.iter().rev().find(|transfer| transfer.id == id))
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.active.iter().any(|transfer| transfer.id == id)
    }
}

pub fn summarize(active: &[TransferSnapshot], history: &[TransferSnapshot]) -> Summary {
    let completed_count = history
        .iter()
        .filter(|transfer| transfer.status == Status::Completed)
        .count();
    Summary {
        active_count: active.len(),
        completed_count,
        total_count: active.len() + history.len(),
    }
}

/**
 * Renders a duration the way the download list shows it:
 * whole seconds below a minute, whole minutes below an hour, hours with
 * one decimal above that.
 */
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.0}s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.0}m", seconds / 60.0)
    } else {
        format!("{:.1}h", seconds / 3600.0)
    }
}

/// Binary units, one decimal from KB up.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, BYTE_UNITS[0])
    } else {
        format!("{:.1} {}", value, BYTE_UNITS[unit])
    }
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
