use reqwest::header::HeaderMap;
use reqwest::{header, Url};
use std::path::Path;
use std::time::Duration;

/// Extracts filesize from path, if file does not exist or read fails the function returns 0
pub async fn file_size(fpath: &Path) -> u64 {
    match tokio::fs::metadata(fpath).await {
        Ok(metadata) => metadata.len(),
        _ => 0,
    }
}

pub const HALF_SECOND: Duration = Duration::from_millis(500);

#[cfg(test)]
pub type TestResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/**
 * Parses the filename from the download URL
 * Returns None if there is no filename or if url.path_segments() fails
 */
pub fn parse_filename(url: &Url) -> Option<&str> {
    let segments = url.path_segments()?;
    let filename = segments.last()?;
    if filename.is_empty() {
        None
    } else {
        Some(filename)
    }
}

/**
 * Reads the `filename=` parameter of a Content-Disposition header.
 * Quotes are stripped and only the last path component is kept, so a hint
 * can never point outside the directory it is joined onto.
 */
pub fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_DISPOSITION)?.to_str().ok()?;
    let (_, rest) = value.split_once("filename=")?;
    let raw = rest.split(';').next()?.trim().trim_matches('"');
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_owned())
    }
}

/// Average rate over `elapsed`, 0 when no time has passed.
pub fn bytes_per_second(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

pub fn mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

#[cfg(test)]
pub mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use tempfile::TempDir;
    use tokio::{fs::File, io::AsyncWriteExt};

    fn disposition(value: &str) -> HeaderMap {
        let mut headermap = HeaderMap::new();
        headermap.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(value).unwrap(),
        );
        headermap
    }

    #[test]
    fn parse_filename_test() -> TestResult<()> {
        let url = Url::parse("https://swcdn.apple.com/content/downloads/InstallAssistant.pkg")?;
        let filename = parse_filename(&url).unwrap();
        assert_eq!(filename, "InstallAssistant.pkg", "File name doesn't match!");
        let url = Url::parse("https://somewebsite.biz/")?;
        assert!(parse_filename(&url).is_none());
        Ok(())
    }

    #[test]
    fn disposition_filename_test() {
        // Given a quoted hint with trailing parameters
        let headers = disposition("attachment; filename=\"Sequoia_24G84.pkg\"; size=12");
        // Then
        assert_eq!(
            disposition_filename(&headers).as_deref(),
            Some("Sequoia_24G84.pkg")
        );
        // Given an unquoted hint
        let headers = disposition("attachment; filename=Sonoma.pkg");
        assert_eq!(disposition_filename(&headers).as_deref(), Some("Sonoma.pkg"));
        // Given a hint trying to escape the destination directory
        let headers = disposition("attachment; filename=\"../../etc/passwd\"");
        assert_eq!(disposition_filename(&headers).as_deref(), Some("passwd"));
        // Given no filename parameter at all
        let headers = disposition("inline");
        assert!(disposition_filename(&headers).is_none());
        assert!(disposition_filename(&HeaderMap::new()).is_none());
    }

    #[test]
    fn bytes_per_second_test() {
        assert_eq!(bytes_per_second(1000, Duration::from_millis(500)), 2000);
        assert_eq!(bytes_per_second(1000, Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn file_size_retrieval_test() -> TestResult<()> {
        // Setup
        let tmp_dir = TempDir::new()?;
        let fpath = tmp_dir.path().join("InstallAssistant.pkg");
        assert_eq!(file_size(&fpath).await, 0, "Missing file should have 0 Bytes!");
        let mut file_handler = File::create(&fpath).await?;
        assert_eq!(
            file_size(fpath.as_path()).await,
            0,
            "Newly created file should have 0 Bytes!"
        );
        // Write some bytes to the buffer
        file_handler.write_all(b"bytes").await?;
        // Flush the buffer to the file
        file_handler.flush().await?;
        assert_eq!(
            file_size(&fpath).await,
            5,
            "File should have as many bytes as written in the buffer!"
        );
        Ok(())
    }
}
