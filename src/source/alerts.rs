//! Best-effort CSV feed of externally-flagged alerts.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::AlertSource;

/// An externally-flagged alert record, prior to snapshot enrichment.
///
/// `noted_at` is passed through as the source wrote it; alert feeds are not
/// held to the primary source's timestamp format.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalAlert {
    pub patient_id: i64,
    pub noted_at: String,
    pub text: String,
    pub heart_rate: Option<f64>,
    pub bp_mean: Option<f64>,
}

/// An alert source that reads a CSV file, degrading to empty on any failure.
#[derive(Debug)]
pub struct CsvAlertFeed {
    path: PathBuf,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawAlert {
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(default)]
    charttime: Option<String>,
    #[serde(default)]
    alert: Option<String>,
    #[serde(default)]
    heart_rate: Option<String>,
    #[serde(default)]
    bp_mean: Option<String>,
}

impl CsvAlertFeed {
    /// Create a new alert feed for the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("alerts csv: {}", path.display());
        Self { path, description }
    }

    /// Returns the path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AlertSource for CsvAlertFeed {
    fn load(&self) -> Vec<ExternalAlert> {
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(e) => {
                debug!("alert feed unavailable ({}): {}", self.path.display(), e);
                return Vec::new();
            }
        };

        let mut alerts = Vec::new();
        for result in reader.deserialize::<RawAlert>() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    debug!("skipping malformed alert row: {}", e);
                    continue;
                }
            };
            let Some(patient_id) = row.subject_id.as_deref().and_then(parse_id) else {
                continue;
            };
            alerts.push(ExternalAlert {
                patient_id,
                noted_at: row.charttime.unwrap_or_default(),
                text: row.alert.unwrap_or_default(),
                heart_rate: row.heart_rate.as_deref().and_then(parse_float),
                bp_mean: row.bp_mean.as_deref().and_then(parse_float),
            });
        }
        alerts
    }

    fn description(&self) -> &str {
        &self.description
    }
}

fn parse_id(value: &str) -> Option<i64> {
    let value = value.trim();
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
}

fn parse_float(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_alert_rows() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "subject_id,charttime,alert,heart_rate,bp_mean\n\
             42,2138-07-03 14:00:00,High Heart Rate,130.0,80.0\n\
             43,2138-07-03 15:00:00,Low Blood Pressure (Shock Risk),,55.0\n",
        )
        .unwrap();
        file.flush().unwrap();

        let feed = CsvAlertFeed::new(file.path());
        let alerts = feed.load();

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].patient_id, 42);
        assert_eq!(alerts[0].text, "High Heart Rate");
        assert_eq!(alerts[0].heart_rate, Some(130.0));
        assert_eq!(alerts[1].heart_rate, None);
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let feed = CsvAlertFeed::new("/nonexistent/path/alerts.csv");
        assert!(feed.load().is_empty());
    }

    #[test]
    fn rows_without_patient_id_are_skipped() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "subject_id,charttime,alert,heart_rate,bp_mean\n\
             ,2138-07-03 14:00:00,orphan,,\n\
             7,2138-07-03 15:00:00,kept,,\n",
        )
        .unwrap();
        file.flush().unwrap();

        let alerts = CsvAlertFeed::new(file.path()).load();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].patient_id, 7);
    }
}
