//! Feature extraction over a patient's recent reading window.
//!
//! A [`FeatureVector`] summarizes the last three chronologically-ordered
//! readings for a patient: short rolling averages for vitals, the most recent
//! lab values, the heart-rate trend, and missingness flags. Extraction is a
//! windowed fold over the already-sorted reading sequence.

use serde::Serialize;

use crate::source::Reading;

/// Number of trailing readings the feature window covers.
pub const WINDOW: usize = 3;

/// Fixed-size feature summary for one patient at evaluation time.
///
/// Numeric fields follow ignore-missing aggregation: an average skips absent
/// entries per field, and is itself absent only when every reading in the
/// window misses that field. The trend is absent when either of its two
/// inputs is absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub hr_avg: Option<f64>,
    pub bp_avg: Option<f64>,
    pub spo2_avg: Option<f64>,
    pub temp_avg: Option<f64>,
    pub hr_trend: Option<f64>,
    pub creatinine: Option<f64>,
    pub lactate: Option<f64>,
    pub wbc: Option<f64>,
    pub spo2_missing: bool,
    pub temp_missing: bool,
}

impl FeatureVector {
    /// Extract features from a patient's reading history.
    ///
    /// `readings` must be sorted by `taken_at` ascending; only the trailing
    /// [`WINDOW`] readings are consulted. Returns `None` when fewer than
    /// [`WINDOW`] readings exist; callers treat that as "skip this patient
    /// for the cycle", not as an error.
    pub fn extract(readings: &[Reading]) -> Option<Self> {
        if readings.len() < WINDOW {
            return None;
        }
        let window = &readings[readings.len() - WINDOW..];
        let latest = &window[WINDOW - 1];
        let previous = &window[WINDOW - 2];

        Some(Self {
            hr_avg: mean(window.iter().map(|r| r.heart_rate)),
            bp_avg: mean(window.iter().map(|r| r.bp_mean)),
            spo2_avg: mean(window.iter().map(|r| r.spo2)),
            temp_avg: mean(window.iter().map(|r| r.temp)),
            hr_trend: match (latest.heart_rate, previous.heart_rate) {
                (Some(now), Some(before)) => Some(now - before),
                _ => None,
            },
            creatinine: latest.creatinine,
            lactate: latest.lactate,
            wbc: latest.wbc,
            spo2_missing: latest.spo2.is_none(),
            temp_missing: latest.temp.is_none(),
        })
    }

    /// Dense model-input vector, in fixed column order.
    ///
    /// Returns `None` when any numeric feature is absent; classifiers that
    /// need complete input surface that as a prediction failure, which the
    /// scorer treats as "classifier unavailable".
    pub fn dense(&self) -> Option<[f64; 10]> {
        Some([
            self.hr_avg?,
            self.bp_avg?,
            self.spo2_avg?,
            self.temp_avg?,
            self.hr_trend?,
            self.creatinine?,
            self.lactate?,
            self.wbc?,
            self.spo2_missing as u8 as f64,
            self.temp_missing as u8 as f64,
        ])
    }
}

/// Mean over the present values, `None` when every value is absent.
fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values.flatten() {
        sum += value;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
