mod catalog;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use downloader::httpdownload::observer::{format_bytes, ManagerSnapshot, TransferSnapshot};
use downloader::httpdownload::record::Status;
use downloader::{DownloadDescriptor, DownloadManager};
use futures::future::join_all;
use tokio::sync::watch;
use uuid::Uuid;

use self::settings::{SettingManager, Settings};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "artifact-dl", version = env!("CARGO_PKG_VERSION"), about = "Resumable installer downloads", long_about = None)]
struct App {
    /// Settings file, defaults to ~/.artifact-dl/settings.yaml
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the descriptors of a catalog
    #[command(alias = "ls", name = "list")]
    List {
        #[arg(long)]
        catalog: PathBuf,
    },
    /// Download catalog entries by id
    #[command(name = "fetch")]
    Fetch {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        dest: Option<PathBuf>,
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Download a single URL
    #[command(name = "get")]
    Get {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Show or update the settings file
    #[command(alias = "cfg", name = "config")]
    Config {
        #[arg(long)]
        download_dir: Option<PathBuf>,
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app = App::parse();
    let settings = SettingManager::load(app.settings).await?;
    match app.cmd {
        Commands::List { catalog } => {
            for descriptor in catalog::load(&catalog).await? {
                println!(
                    "{}  {}  ~{}",
                    descriptor.id,
                    descriptor.name,
                    format_bytes(descriptor.expected_size)
                );
            }
            Ok(())
        }
        Commands::Fetch { catalog, dest, ids } => {
            let descriptors = catalog::load(&catalog).await?;
            let selected = catalog::select(&descriptors, &ids)?;
            let settings = settings.read().await.clone();
            fetch(&settings, selected, dest).await
        }
        Commands::Get { url, name, dest } => {
            let descriptor = DownloadDescriptor {
                id: Uuid::new_v4(),
                name: name.unwrap_or_else(|| "artifact".to_owned()),
                url,
                expected_size: 0,
            };
            let settings = settings.read().await.clone();
            fetch(&settings, vec![descriptor], dest).await
        }
        Commands::Config {
            download_dir,
            max_concurrent,
        } => {
            let mut current = settings.read().await.clone();
            if download_dir.is_some() || max_concurrent.is_some() {
                if let Some(dir) = download_dir {
                    current.default_download_dir = dir;
                }
                if let Some(max) = max_concurrent {
                    current.manager.max_concurrent_downloads = max;
                }
                settings.write(current.clone()).await?;
            }
            println!("# {}", settings.path().display());
            print!("{}", serde_yaml::to_string(&current)?);
            Ok(())
        }
    }
}

/// Runs the downloads to the end, Ctrl-C cancels all of them.
async fn fetch(
    settings: &Settings,
    descriptors: Vec<DownloadDescriptor>,
    dest: Option<PathBuf>,
) -> anyhow::Result<()> {
    let manager = DownloadManager::new(settings.manager.clone())?;
    let dest = dest.unwrap_or_else(|| settings.default_download_dir.clone());
    let mut ids = Vec::with_capacity(descriptors.len());
    for descriptor in &descriptors {
        ids.push(manager.start(descriptor, dest.clone()).await?);
    }
    let reporter = tokio::spawn(report_progress(manager.subscribe()));

    let results = tokio::select! {
        results = join_all(ids.iter().map(|id| manager.wait(*id))) => results,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, cancelling all downloads");
            for (id, result) in manager.cancel_all().await {
                if let Err(e) = result {
                    log::error!("Could not cancel {}: {}", id, e);
                }
            }
            join_all(ids.iter().map(|id| manager.wait(*id))).await
        }
    };
    reporter.abort();

    let mut unfinished = 0;
    for result in results {
        let transfer = result?;
        log_final(&transfer);
        if transfer.status != Status::Completed {
            unfinished += 1;
        }
    }
    let summary = manager.snapshot().summary;
    log::info!(
        "{} of {} downloads completed",
        summary.completed_count,
        summary.total_count
    );
    if unfinished > 0 {
        anyhow::bail!("{} of {} downloads did not complete", unfinished, ids.len());
    }
    Ok(())
}

async fn report_progress(mut snapshots: watch::Receiver<ManagerSnapshot>) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        ticker.tick().await;
        if snapshots.has_changed().is_err() {
            break;
        }
        let snapshot = snapshots.borrow_and_update().clone();
        for transfer in snapshot.active.iter() {
            log::info!(
                "{}: {} {:.1}% {} of {} at {}, {} left",
                transfer.name,
                transfer.status,
                transfer.progress_fraction * 100.0,
                format_bytes(transfer.bytes_written),
                format_bytes(transfer.bytes_expected.max(transfer.estimated_size)),
                transfer.speed,
                transfer.estimated_time_remaining
            );
        }
    }
}

fn log_final(transfer: &TransferSnapshot) {
    match transfer.status {
        Status::Completed => log::info!(
            "{} saved to {} ({:?})",
            transfer.name,
            transfer
                .destination_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            transfer.verdict
        ),
        status => log::error!(
            "{} ended {}: {}",
            transfer.name,
            status,
            transfer.last_error.as_deref().unwrap_or("no error recorded")
        ),
    }
}
