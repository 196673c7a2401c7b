//! CSV-backed reading source.
//!
//! Loads the full reading history from a CSV export keyed by patient id and
//! chart time. Numeric fields are coerced leniently (unparseable values
//! become absent) and clamped into fixed physiological bands; rows without a
//! patient id or timestamp are dropped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use super::{Reading, ReadingSource};

// Physiological bands applied on ingest. Values outside a band are clamped
// to its edge; the bands themselves are fixed design constants.
const HEART_RATE_BAND: (f64, f64) = (35.0, 190.0);
const BP_MEAN_BAND: (f64, f64) = (40.0, 135.0);
const SPO2_BAND: (f64, f64) = (72.0, 100.0);
const TEMP_BAND: (f64, f64) = (34.0, 41.0);
const CREATININE_BAND: (f64, f64) = (0.3, 8.0);
const LACTATE_BAND: (f64, f64) = (0.3, 9.5);
const WBC_BAND: (f64, f64) = (1.0, 35.0);

/// A reading source that loads patient observations from a CSV file.
///
/// The expected columns are `subject_id`, `charttime`, and the seven numeric
/// observation fields. Extra columns are ignored; missing observation columns
/// read as absent values.
#[derive(Debug)]
pub struct CsvReadings {
    path: PathBuf,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(default)]
    charttime: Option<String>,
    #[serde(default)]
    heart_rate: Option<String>,
    #[serde(default)]
    bp_mean: Option<String>,
    #[serde(default)]
    spo2: Option<String>,
    #[serde(default)]
    temp: Option<String>,
    #[serde(default)]
    creatinine: Option<String>,
    #[serde(default)]
    lactate: Option<String>,
    #[serde(default)]
    wbc: Option<String>,
}

impl CsvReadings {
    /// Create a new CSV reading source for the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("csv: {}", path.display());
        Self { path, description }
    }

    /// Returns the path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadingSource for CsvReadings {
    fn load(&self) -> Result<Vec<Reading>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to open readings file {}", self.path.display()))?;

        let mut readings = Vec::new();
        let mut dropped = 0usize;

        for result in reader.deserialize::<RawRow>() {
            let row = result
                .with_context(|| format!("malformed readings file {}", self.path.display()))?;

            let (Some(patient_id), Some(taken_at)) = (
                row.subject_id.as_deref().and_then(parse_patient_id),
                row.charttime.as_deref().and_then(parse_timestamp),
            ) else {
                dropped += 1;
                continue;
            };

            readings.push(Reading {
                patient_id,
                taken_at,
                heart_rate: clean_numeric(row.heart_rate.as_deref(), HEART_RATE_BAND),
                bp_mean: clean_numeric(row.bp_mean.as_deref(), BP_MEAN_BAND),
                spo2: clean_numeric(row.spo2.as_deref(), SPO2_BAND),
                temp: clean_numeric(row.temp.as_deref(), TEMP_BAND),
                creatinine: clean_numeric(row.creatinine.as_deref(), CREATININE_BAND),
                lactate: clean_numeric(row.lactate.as_deref(), LACTATE_BAND),
                wbc: clean_numeric(row.wbc.as_deref(), WBC_BAND),
            });
        }

        if dropped > 0 {
            debug!("dropped {} rows without patient id or timestamp", dropped);
        }

        Ok(readings)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Parse a patient id, tolerating float-formatted ids ("10006.0").
fn parse_patient_id(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(id) = value.parse::<i64>() {
        return Some(id);
    }
    let as_float = value.parse::<f64>().ok()?;
    if as_float.is_finite() {
        Some(as_float as i64)
    } else {
        None
    }
}

/// Parse a chart timestamp in either space- or T-separated form.
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Coerce a raw field to a number and clamp it into the given band.
///
/// Unparseable or non-finite values become absent.
fn clean_numeric(value: Option<&str>, band: (f64, f64)) -> Option<f64> {
    let parsed = value?.trim().parse::<f64>().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(parsed.clamp(band.0, band.1))
}
