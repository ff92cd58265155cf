//! Plausibility checks run on a fully received payload before it is placed.

use std::path::Path;

use chrono::Local;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::util::parse_filename;

use super::download;

/// Substrings that give away an HTML error page served in place of the artifact.
const ERROR_PAGE_MARKERS: [&str; 3] = ["<!DOCTYPE", "<html", "404"];

/// Size thresholds used to judge a payload. The defaults are heuristics for
/// OS installer packages and are meant to be tuned, not trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Below this the payload is rejected without looking at its content.
    pub min_sniff_bytes: u64,
    /// Below this the payload is rejected as a stub.
    pub min_artifact_bytes: u64,
    /// Payloads smaller than this are read as text and checked for error pages.
    pub sniff_limit_bytes: u64,
    /// At or above this a payload is considered a plausible, if partial, artifact.
    pub partial_floor_bytes: u64,
    /// At or above this a payload is considered a complete artifact.
    pub full_artifact_bytes: u64,
    /// Extension the placed file must carry, without the dot.
    pub expected_extension: String,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_sniff_bytes: 1024,
            min_artifact_bytes: 1_000_000,
            sniff_limit_bytes: 5_000_000,
            partial_floor_bytes: 100_000_000,
            full_artifact_bytes: 5_000_000_000,
            expected_extension: "pkg".to_owned(),
        }
    }
}

/// Informational judgement on an accepted payload, it never fails a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Confirmed,
    PossiblyPartial,
    Suspicious,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("artifact too small to be a valid installer ({0} bytes)")]
    TooSmall(u64),
    #[error("server returned an error page instead of the artifact")]
    ErrorPage,
}

impl ValidationPolicy {
    /// Judges a payload of `size` bytes. `text` is its content when it was
    /// sniffed and decoded as UTF-8.
    pub fn classify(&self, size: u64, text: Option<&str>) -> Result<Verdict, ValidationError> {
        if size < self.min_sniff_bytes {
            return Err(ValidationError::TooSmall(size));
        }
        if size < self.sniff_limit_bytes {
            if let Some(text) = text {
                if ERROR_PAGE_MARKERS.iter().any(|marker| text.contains(marker)) {
                    return Err(ValidationError::ErrorPage);
                }
            }
        }
        if size < self.min_artifact_bytes {
            return Err(ValidationError::TooSmall(size));
        }
        if size >= self.full_artifact_bytes {
            Ok(Verdict::Confirmed)
        } else if size >= self.partial_floor_bytes {
            Ok(Verdict::PossiblyPartial)
        } else {
            Ok(Verdict::Suspicious)
        }
    }

    fn should_sniff(&self, size: u64) -> bool {
        size >= self.min_sniff_bytes && size < self.sniff_limit_bytes
    }
}

/// Reads the staged payload when it is small enough to be an error page and
/// classifies it.
pub async fn inspect(path: &Path, size: u64, policy: &ValidationPolicy) -> download::Result<Verdict> {
    let text = if policy.should_sniff(size) {
        String::from_utf8(tokio::fs::read(path).await?).ok()
    } else {
        None
    };
    let verdict = policy.classify(size, text.as_deref())?;
    match verdict {
        Verdict::Confirmed => log::info!("Payload {} looks like a complete artifact", path.display()),
        Verdict::PossiblyPartial => log::warn!(
            "Payload {} is smaller than a full artifact, it may be a delta or partial installer",
            path.display()
        ),
        Verdict::Suspicious => log::warn!(
            "Payload {} is unusually small for an installer ({} bytes)",
            path.display(),
            size
        ),
    }
    Ok(verdict)
}

/**
 * Picks the name of the placed file: the server hint first, then the URL's
 * last segment when it already carries the extension, otherwise a name built
 * from the descriptor and the current time. The extension is appended when
 * missing.
 */
pub fn resolve_filename(hint: Option<&str>, url: &Url, name: &str, extension: &str) -> String {
    let suffix = format!(".{}", extension);
    let file_name = hint
        .filter(|hint| !hint.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            parse_filename(url)
                .filter(|segment| segment.ends_with(&suffix))
                .map(str::to_owned)
        })
        .unwrap_or_else(|| synthesize_filename(name));
    if file_name.ends_with(&suffix) {
        file_name
    } else {
        file_name + &suffix
    }
}

fn synthesize_filename(name: &str) -> String {
    let stem = name.split_whitespace().collect::<Vec<_>>().join("_");
    let stem = if stem.is_empty() { "artifact".to_owned() } else { stem };
    format!("{}_{}", stem, Local::now().format("%Y%m%d_%H%M%S"))
}
