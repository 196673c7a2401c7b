//! Data source abstractions for patient readings and external alerts.
//!
//! This module provides trait-based abstractions over the two tabular stores
//! the monitor consumes: the primary reading history (fatal when unreadable)
//! and the best-effort external alerts feed (degrades to empty).

mod alerts;
mod csv;

pub use alerts::{CsvAlertFeed, ExternalAlert};
pub use csv::CsvReadings;

use std::fmt::Debug;

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Serialize;

/// One timestamped vital/lab observation for a patient.
///
/// Every numeric field is independently optional: bedside exports routinely
/// omit labs, and a reading with only vitals is still usable. Readings are
/// immutable once produced by a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub patient_id: i64,
    pub taken_at: NaiveDateTime,
    pub heart_rate: Option<f64>,
    pub bp_mean: Option<f64>,
    pub spo2: Option<f64>,
    pub temp: Option<f64>,
    pub creatinine: Option<f64>,
    pub lactate: Option<f64>,
    pub wbc: Option<f64>,
}

/// Trait for loading the full reading history across all patients.
///
/// Implementations back the snapshot builder. Loading must surface a hard
/// error when the underlying store is missing or unreadable: a snapshot is
/// never built from a partial primary source.
///
/// # Example
///
/// ```no_run
/// use wardwatch::source::{CsvReadings, ReadingSource};
///
/// let source = CsvReadings::new("data/readings.csv");
/// let readings = source.load().expect("primary source must be readable");
/// println!("{} readings from {}", readings.len(), source.description());
/// ```
pub trait ReadingSource: Send + Sync + Debug {
    /// Load every available reading, in no particular order.
    fn load(&self) -> Result<Vec<Reading>>;

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}

/// Trait for the secondary, best-effort feed of externally-flagged alerts.
///
/// Unlike [`ReadingSource`], this feed never fails: a missing or malformed
/// store yields an empty list so snapshot construction is never blocked on
/// secondary data.
pub trait AlertSource: Send + Sync + Debug {
    /// Load externally-flagged alert records, oldest first.
    fn load(&self) -> Vec<ExternalAlert>;

    /// Returns a human-readable description of the feed.
    fn description(&self) -> &str;
}
