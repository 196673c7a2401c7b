//! # wardwatch
//!
//! A ward risk monitor: ingests periodic vital-sign/lab readings per
//! patient, derives a composite deterioration risk per patient, classifies
//! patients into tiers, and dispatches deduplicated notifications for
//! patients crossing the danger threshold. The computed state is published
//! as an immutable snapshot for API/WebSocket consumers to read.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Monitor Loop                          │
//! │  ┌─────────┐    ┌────────────┐    ┌──────────┐   ┌────────┐ │
//! │  │ source  │───▶│    data    │───▶│ Snapshot │──▶│ notify │ │
//! │  │(reading)│    │ (features, │    │(published│   │(engine)│ │
//! │  │         │    │  scoring)  │    │ Arc swap)│   │        │ │
//! │  └─────────┘    └────────────┘    └──────────┘   └───┬────┘ │
//! │                                                       │      │
//! │                                                       ▼      │
//! │                                             DeliveryChannel  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: trait-based data sources: the primary reading history
//!   ([`ReadingSource`], fatal when unreadable) and the best-effort external
//!   alerts feed ([`AlertSource`], degrades to empty)
//! - **[`data`]**: the risk pipeline: windowed feature extraction, hybrid
//!   rule/classifier scoring, tiering, and snapshot assembly
//! - **[`notify`]**: the notification engine: eligibility, per-patient
//!   cooldown, delivery via a [`DeliveryChannel`], bounded audit history
//! - **[`monitor`]**: the recurring scheduler tying rebuild and notify
//!   together, with observable health and cooperative cancellation
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::Mutex;
//! use wardwatch::data::SnapshotBuilder;
//! use wardwatch::monitor::MonitorLoop;
//! use wardwatch::notify::{NotificationEngine, NotifyConfig, SmtpChannel};
//! use wardwatch::source::{CsvAlertFeed, CsvReadings};
//!
//! # tokio_test::block_on(async {
//! let builder = Arc::new(SnapshotBuilder::new(
//!     Box::new(CsvReadings::new("data/readings.csv")),
//!     Box::new(CsvAlertFeed::new("data/patient_alerts.csv")),
//! ));
//! let config = NotifyConfig::load(None).unwrap();
//! let channel = SmtpChannel::from_config(&config);
//! let engine = Arc::new(Mutex::new(NotificationEngine::new(config, Box::new(channel))));
//!
//! let handle = MonitorLoop::new(builder, engine, Duration::from_secs(20)).start();
//! // ... serve snapshots to consumers ...
//! handle.stop().await;
//! # });
//! ```

pub mod data;
pub mod monitor;
pub mod notify;
pub mod source;

// Re-export main types for convenience
pub use data::{
    AlertRecord, FeatureVector, LogisticModel, PatientRiskRow, RiskClassifier, RiskSummary,
    RiskTier, Snapshot, SnapshotBuilder, TimelinePoint,
};
pub use monitor::{MonitorHandle, MonitorHealth, MonitorLoop};
pub use notify::{
    AlertMessage, DeliveryChannel, EventStatus, NotificationEngine, NotificationEvent,
    NotifyConfig, NotifyReport, SmtpChannel,
};
pub use source::{AlertSource, CsvAlertFeed, CsvReadings, Reading, ReadingSource};
