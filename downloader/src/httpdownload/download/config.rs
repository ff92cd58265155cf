use std::time::Duration;

use reqwest::header;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::httpdownload::validation::ValidationPolicy;
use crate::util::HALF_SECOND;
use crate::DEFAULT_USER_AGENT;

/**
Holds the http configuration for the Download
 */
#[derive(Debug, Clone)]
pub struct HttpDownloadConfig {
    /**
     * Timeout for request setup, until the response headers arrive.
     * `None` waits as long as the connection stays open
     */
    pub timeout: Option<Duration>,
    /**
     * Request headers for the Download
     */
    pub headers: HeaderMap,
    /**
     * Cadence of throughput samples
     */
    pub sample_interval: Duration,
}

impl Default for HttpDownloadConfig {
    /**
    Creates a default set of settings:
    * headers: { user-agent: "artifact-dl" }
    * timeout: 30s
    * sample_interval: 500ms
     */
    fn default() -> Self {
        let mut config = HttpDownloadConfig {
            timeout: Some(Duration::from_secs(30)),
            headers: HeaderMap::new(),
            sample_interval: HALF_SECOND,
        };
        config.headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );
        config
    }
}

/// Tunables of the download manager, deserializable from the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// 0 means no cap, every start runs immediately.
    pub max_concurrent_downloads: usize,
    /// 0 disables the request setup timeout.
    pub request_timeout_secs: u64,
    pub sample_interval_ms: u64,
    pub validation: ValidationPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 0,
            request_timeout_secs: 30,
            sample_interval_ms: HALF_SECOND.as_millis() as u64,
            validation: ValidationPolicy::default(),
        }
    }
}

impl From<&ManagerConfig> for HttpDownloadConfig {
    fn from(value: &ManagerConfig) -> Self {
        HttpDownloadConfig {
            timeout: (value.request_timeout_secs > 0)
                .then(|| Duration::from_secs(value.request_timeout_secs)),
            // a zero period would make tokio's interval panic
            sample_interval: Duration::from_millis(value.sample_interval_ms.max(1)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn manager_config_maps_to_http_config() {
        let http_config = HttpDownloadConfig::from(&ManagerConfig::default());
        assert_eq!(http_config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(http_config.sample_interval, HALF_SECOND);
        assert_eq!(
            http_config.headers.get(header::USER_AGENT).unwrap(),
            DEFAULT_USER_AGENT
        );
    }

    #[test]
    fn zero_values_disable_timeout_and_keep_sampling() {
        let config = ManagerConfig {
            request_timeout_secs: 0,
            sample_interval_ms: 0,
            ..Default::default()
        };
        let http_config = HttpDownloadConfig::from(&config);
        assert_eq!(http_config.timeout, None);
        assert_eq!(http_config.sample_interval, Duration::from_millis(1));
    }
}
