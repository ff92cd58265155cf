use anyhow::Context;
use dirs::{download_dir, home_dir};
use downloader::httpdownload::download::config::ManagerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

fn user_download_dir() -> PathBuf {
    download_dir()
        .map(|p| p.join("artifact-dl"))
        .unwrap_or_else(|| PathBuf::from("artifact-dl"))
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "user_download_dir")]
    pub default_download_dir: PathBuf,
    #[serde(flatten)]
    pub manager: ManagerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_download_dir: user_download_dir(),
            manager: ManagerConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingManager {
    inner: Arc<RwLock<Settings>>,
    settings_path: PathBuf,
}

fn default_settings_path() -> PathBuf {
    home_dir()
        .unwrap_or_default()
        .join(".artifact-dl/settings.yaml")
}

impl SettingManager {
    /// Reads the settings file, creating it with defaults when missing.
    pub async fn load(p: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = p.unwrap_or_else(default_settings_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating settings directory {}", parent.display()))?;
        }
        let settings = load_settings(&path).await?;
        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
            settings_path: path,
        })
    }

    pub async fn read(&self) -> RwLockReadGuard<Settings> {
        self.inner.read().await
    }

    pub async fn write(&self, settings: Settings) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(&settings)?;
        tokio::fs::write(&self.settings_path, yaml)
            .await
            .with_context(|| format!("writing {}", self.settings_path.display()))?;
        log::info!(
            "Settings file written to {}",
            self.settings_path.to_string_lossy()
        );
        log::info!("Overwriting inner settings, new value: {:?}", settings);
        let mut guard = self.inner.write().await;
        *guard = settings;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

async fn load_settings(p: &Path) -> anyhow::Result<Settings> {
    if tokio::fs::try_exists(p).await.unwrap_or(false) {
        log::info!("Found settings file at {}, reading...", p.to_string_lossy());
        let file = tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("reading {}", p.display()))?;
        let settings: Settings = serde_yaml::from_str(&file)
            .with_context(|| format!("parsing {}", p.display()))?;
        log::info!("Settings loaded: {:?}", settings);
        return Ok(settings);
    }
    log::info!(
        "No settings file found at {}, creating...",
        p.to_string_lossy()
    );
    let settings = Settings::default();
    tokio::fs::write(p, serde_yaml::to_string(&settings)?)
        .await
        .with_context(|| format!("writing {}", p.display()))?;
    Ok(settings)
}
