use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode, Url};

use crate::util::disposition_filename;

use super::download::config::HttpDownloadConfig;

/// Longest slice of a non-2xx response body kept in the error message.
const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request error: '{0}'")]
    Request(#[from] reqwest::Error),
    #[error("Request setup timed out after {0:?}")]
    Timeout(Duration),
    #[error("Download req did not yield 2xx, instead: '{0}', body: '{1}'")]
    NotOk(StatusCode, String),
    #[error("Connection interrupted: {0}")]
    Interrupted(String),
    #[error("Download ended before completion, downloaded bytes: '{0}', expected: '{1}'")]
    StreamEndedBeforeCompletion(u64, u64),
    #[error("Server sent more bytes than announced, downloaded bytes: '{0}', expected: '{1}'")]
    Overrun(u64, u64),
}

/// Response of a successfully opened request, headers already received.
pub struct Payload {
    /// Length of this body, not of the whole artifact when `partial` is set.
    pub content_length: Option<u64>,
    /// The server honored the range request (206).
    pub partial: bool,
    pub filename_hint: Option<String>,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

/// Opens one streaming GET per call. `offset > 0` asks for the tail of the
/// resource starting at that byte.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &Url, offset: u64) -> Result<Payload, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpDownloadConfig,
}

impl HttpTransport {
    pub fn new(config: HttpDownloadConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &Url, offset: u64) -> Result<Payload, TransportError> {
        let mut request = self
            .client
            .get(url.as_ref())
            .headers(self.config.headers.clone());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        // Only the wait for headers is bounded, the body may take hours.
        let resp = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, request.send())
                .await
                .map_err(|_| TransportError::Timeout(limit))??,
            None => request.send().await?,
        };

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::NotOk(status, body));
        }
        let filename_hint = disposition_filename(resp.headers());
        let partial = status == StatusCode::PARTIAL_CONTENT;
        let content_length = resp.content_length();
        log::debug!(
            "Opened {} at offset {}, status: {}, content length: {:?}",
            url,
            offset,
            status,
            content_length
        );
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();
        Ok(Payload {
            content_length,
            partial,
            filename_hint,
            body,
        })
    }
}

#[cfg(test)]
pub mod test {
    //! In-memory transport whose responses are scripted by the test.
    use super::*;
    use futures::channel::mpsc;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    enum Scripted {
        Fail(TransportError),
        Serve {
            content_length: Option<u64>,
            partial: bool,
            filename_hint: Option<String>,
            body: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
        },
    }

    /// Pushes body chunks into a scripted response, dropping it ends the body.
    pub struct Feed(mpsc::UnboundedSender<Result<Bytes, TransportError>>);

    impl Feed {
        pub fn send(&self, bytes: &[u8]) {
            let _ = self.0.unbounded_send(Ok(Bytes::copy_from_slice(bytes)));
        }

        pub fn error(&self, reason: &str) {
            let _ = self
                .0
                .unbounded_send(Err(TransportError::Interrupted(reason.to_owned())));
        }

        pub fn finish(self) {}
    }

    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
        requests: Mutex<Vec<(String, u64)>>,
    }

    impl ScriptedTransport {
        fn push(&self, url: &str, scripted: Scripted) {
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_owned())
                .or_default()
                .push_back(scripted);
        }

        fn serve_with(
            &self,
            url: &str,
            content_length: Option<u64>,
            partial: bool,
            filename_hint: Option<&str>,
        ) -> Feed {
            let (tx, rx) = mpsc::unbounded();
            self.push(
                url,
                Scripted::Serve {
                    content_length,
                    partial,
                    filename_hint: filename_hint.map(str::to_owned),
                    body: rx,
                },
            );
            Feed(tx)
        }

        /// Queues a 200 response for the next request to `url`.
        pub fn serve(&self, url: &str, content_length: Option<u64>) -> Feed {
            self.serve_with(url, content_length, false, None)
        }

        pub fn serve_named(&self, url: &str, content_length: Option<u64>, hint: &str) -> Feed {
            self.serve_with(url, content_length, false, Some(hint))
        }

        /// Queues a 206 response, `content_length` is the length of the tail.
        pub fn serve_partial(&self, url: &str, content_length: Option<u64>) -> Feed {
            self.serve_with(url, content_length, true, None)
        }

        pub fn fail(&self, url: &str, error: TransportError) {
            self.push(url, Scripted::Fail(error));
        }

        /// Every `(url, offset)` pair that was opened so far.
        pub fn requests(&self) -> Vec<(String, u64)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, url: &Url, offset: u64) -> Result<Payload, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), offset));
            let scripted = self
                .responses
                .lock()
                .unwrap()
                .get_mut(url.as_str())
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(Scripted::Serve {
                    content_length,
                    partial,
                    filename_hint,
                    body,
                }) => Ok(Payload {
                    content_length,
                    partial,
                    filename_hint,
                    body: body.boxed(),
                }),
                Some(Scripted::Fail(error)) => Err(error),
                None => Err(TransportError::Interrupted(format!(
                    "no scripted response for {}",
                    url
                ))),
            }
        }
    }
}
