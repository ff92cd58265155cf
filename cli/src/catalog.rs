use anyhow::Context;
use downloader::DownloadDescriptor;
use std::path::Path;
use uuid::Uuid;

/// Reads a YAML list of descriptors.
pub async fn load(path: &Path) -> anyhow::Result<Vec<DownloadDescriptor>> {
    let file = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let descriptors: Vec<DownloadDescriptor> = serde_yaml::from_str(&file)
        .with_context(|| format!("parsing catalog {}", path.display()))?;
    log::info!("Loaded {} descriptors from {}", descriptors.len(), path.display());
    Ok(descriptors)
}

/// Picks the requested descriptors in the order they were asked for.
pub fn select(
    descriptors: &[DownloadDescriptor],
    ids: &[Uuid],
) -> anyhow::Result<Vec<DownloadDescriptor>> {
    ids.iter()
        .map(|id| {
            descriptors
                .iter()
                .find(|descriptor| descriptor.id == *id)
                .cloned()
                .with_context(|| format!("no descriptor with id {} in catalog", id))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use test_log::test;

    const CATALOG: &str = r#"
- id: 6f1c2e0a-8a4b-4c1e-9a51-0d5c8f9b1a01
  name: macOS Sequoia 15.1
  url: https://swcdn.apple.com/content/downloads/sequoia/InstallAssistant.pkg
  expected_size: 14900000000
- id: 6f1c2e0a-8a4b-4c1e-9a51-0d5c8f9b1a02
  name: macOS Sonoma 14.6
  url: https://swcdn.apple.com/content/downloads/sonoma/InstallAssistant.pkg
"#;

    #[test(tokio::test)]
    async fn catalog_is_parsed_and_selected() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("catalog.yaml");
        tokio::fs::write(&path, CATALOG).await?;

        let descriptors = load(&path).await?;

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].expected_size, 14_900_000_000);
        assert_eq!(descriptors[1].expected_size, 0);
        let sonoma: Uuid = "6f1c2e0a-8a4b-4c1e-9a51-0d5c8f9b1a02".parse()?;
        let selected = select(&descriptors, &[sonoma])?;
        assert_eq!(selected, vec![descriptors[1].clone()]);
        assert!(select(&descriptors, &[Uuid::new_v4()]).is_err());
        Ok(())
    }
}
