use std::io::ErrorKind;
use std::path::Path;

/// Moves the staged payload to `destination`, replacing whatever file sits
/// there. The payload is staged next to its destination, so the final
/// rename never crosses a filesystem and either fully happens or not at all.
pub async fn relocate(staged: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(destination).await {
        Ok(()) => log::info!("Removed existing file at {}", destination.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::rename(staged, destination).await?;
    log::info!(
        "Relocated {} to {}",
        staged.display(),
        destination.display()
    );
    Ok(())
}

/// Deletes a staged payload, a missing file is not an error.
pub async fn discard(staged: &Path) {
    match tokio::fs::remove_file(staged).await {
        Ok(()) => log::debug!("Discarded staged payload {}", staged.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::error!(
            "Failed to discard staged payload {}: {}",
            staged.display(),
            e
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::TestResult;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn relocate_creates_missing_directories() -> TestResult<()> {
        let tmp_dir = TempDir::new()?;
        let staged = tmp_dir.path().join(".artifact.part");
        tokio::fs::write(&staged, b"payload").await?;
        let destination = tmp_dir.path().join("nested/deeper/InstallAssistant.pkg");
        relocate(&staged, &destination).await?;
        assert_eq!(tokio::fs::read(&destination).await?, b"payload");
        assert!(!staged.exists(), "staged payload should be gone");
        Ok(())
    }

    #[tokio::test]
    async fn relocate_replaces_existing_file() -> TestResult<()> {
        let tmp_dir = TempDir::new()?;
        let staged = tmp_dir.path().join(".artifact.part");
        tokio::fs::write(&staged, b"new").await?;
        let destination = tmp_dir.path().join("InstallAssistant.pkg");
        tokio::fs::write(&destination, b"old and much longer content").await?;
        relocate(&staged, &destination).await?;
        assert_eq!(tokio::fs::read(&destination).await?, b"new");
        Ok(())
    }

    #[tokio::test]
    async fn relocate_onto_directory_fails_and_keeps_payload() -> TestResult<()> {
        let tmp_dir = TempDir::new()?;
        let staged = tmp_dir.path().join(".artifact.part");
        tokio::fs::write(&staged, b"payload").await?;
        let destination = tmp_dir.path().join("InstallAssistant.pkg");
        tokio::fs::create_dir(&destination).await?;
        assert!(relocate(&staged, &destination).await.is_err());
        assert!(destination.is_dir(), "directory must be left untouched");
        assert!(staged.exists(), "caller decides what happens to the payload");
        discard(&staged).await;
        assert!(!staged.exists());
        // discarding twice is fine
        discard(&staged).await;
        Ok(())
    }
}
