use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wardwatch::data::{LogisticModel, SnapshotBuilder};
use wardwatch::monitor::MonitorLoop;
use wardwatch::notify::{NotificationEngine, NotifyConfig, SmtpChannel};
use wardwatch::source::{CsvAlertFeed, CsvReadings};

#[derive(Parser, Debug)]
#[command(name = "wardwatch")]
#[command(about = "Ward risk monitor: scores patient vitals and dispatches deterioration alerts")]
struct Args {
    /// Path to the readings CSV export (primary source, fatal if unreadable)
    #[arg(short, long, default_value = "data/readings.csv")]
    data: PathBuf,

    /// Path to the external alerts CSV (best effort, empty if unreadable)
    #[arg(short, long, default_value = "data/patient_alerts.csv")]
    alerts: PathBuf,

    /// Path to classifier coefficients (JSON); rule-only scoring when absent
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Notification config file (TOML); WARDWATCH_* env vars override
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between monitor cycles
    #[arg(short, long, default_value_t = 20)]
    interval: u64,

    /// Build one snapshot, print its summary as JSON, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut builder = SnapshotBuilder::new(
        Box::new(CsvReadings::new(&args.data)),
        Box::new(CsvAlertFeed::new(&args.alerts)),
    );
    if let Some(ref model_path) = args.model {
        match LogisticModel::from_path(model_path) {
            Ok(model) => {
                info!("classifier loaded from {}", model_path.display());
                builder = builder.with_classifier(Box::new(model));
            }
            Err(e) => warn!("classifier unavailable, scoring rule-only: {:#}", e),
        }
    }

    if args.once {
        let snapshot = builder.rebuild()?;
        println!("{}", serde_json::to_string_pretty(&snapshot.summary)?);
        return Ok(());
    }

    let config = NotifyConfig::load(args.config.as_deref())?;
    if config.enabled && !config.delivery_ready() {
        warn!("notifications enabled but delivery settings are incomplete");
    }
    let channel = SmtpChannel::from_config(&config);
    let engine = Arc::new(Mutex::new(NotificationEngine::new(config, Box::new(channel))));

    let monitor = MonitorLoop::new(
        Arc::new(builder),
        Arc::clone(&engine),
        Duration::from_secs(args.interval.max(1)),
    );
    let handle = monitor.start();

    info!(
        "wardwatch monitoring {} every {}s; ctrl-c to stop",
        args.data.display(),
        args.interval.max(1)
    );
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    handle.stop().await;

    let report = engine.lock().await.report();
    info!(
        "final report: {} sent, {} errors across retained history",
        report.sent_count, report.error_count
    );

    Ok(())
}
