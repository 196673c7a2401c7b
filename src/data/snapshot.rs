//! Snapshot assembly: one immutable, queryable view of every patient's
//! current risk state.
//!
//! A [`SnapshotBuilder`] owns the data sources and the optional classifier.
//! Each build consumes the full reading history, folds every patient's
//! sorted reading sequence into a [`PatientRiskRow`] plus a short timeline,
//! and publishes the result as an atomically-swapped [`Arc<Snapshot>`].
//! Readers always see a fully-formed snapshot; a failed rebuild leaves the
//! previously published one in place.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use super::features::FeatureVector;
use super::risk::{hybrid_probability, risk_reasons, RiskClassifier, RiskTier};
use super::round_to;
use crate::source::{AlertSource, Reading, ReadingSource};

/// Number of trailing readings retained per patient timeline.
pub const TIMELINE_LEN: usize = 12;

/// Number of trailing external alert records retained per snapshot.
pub const ALERT_FEED_LEN: usize = 60;

/// One timeline entry: vitals only, rounded for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub taken_at: NaiveDateTime,
    pub heart_rate: Option<f64>,
    pub bp_mean: Option<f64>,
    pub spo2: Option<f64>,
    pub temp: Option<f64>,
}

impl TimelinePoint {
    fn from_reading(reading: &Reading) -> Self {
        Self {
            taken_at: reading.taken_at,
            heart_rate: reading.heart_rate.map(|v| round_to(v, 1)),
            bp_mean: reading.bp_mean.map(|v| round_to(v, 1)),
            spo2: reading.spo2.map(|v| round_to(v, 1)),
            temp: reading.temp.map(|v| round_to(v, 1)),
        }
    }
}

/// One patient's scored state for the current cycle.
///
/// Created fresh every cycle and never mutated; the next cycle's row for the
/// same patient supersedes it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientRiskRow {
    pub patient_id: i64,
    pub updated_at: NaiveDateTime,
    pub risk_probability: f64,
    pub risk_tier: RiskTier,
    pub risk_reasons: Vec<String>,
    pub heart_rate: Option<f64>,
    pub bp_mean: Option<f64>,
    pub spo2: Option<f64>,
    pub temp: Option<f64>,
    pub creatinine: Option<f64>,
    pub lactate: Option<f64>,
    pub wbc: Option<f64>,
    pub heart_rate_trend: Option<f64>,
}

/// Global counts for the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSummary {
    pub patients_monitored: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub average_risk: f64,
}

impl RiskSummary {
    fn from_rows(rows: &[PatientRiskRow]) -> Self {
        let count_tier = |tier: RiskTier| rows.iter().filter(|r| r.risk_tier == tier).count();
        let average_risk = if rows.is_empty() {
            0.0
        } else {
            let sum: f64 = rows.iter().map(|r| r.risk_probability).sum();
            round_to(sum / rows.len() as f64, 4)
        };
        Self {
            patients_monitored: rows.len(),
            critical_count: count_tier(RiskTier::Critical),
            high_count: count_tier(RiskTier::High),
            medium_count: count_tier(RiskTier::Medium),
            low_count: count_tier(RiskTier::Low),
            average_risk,
        }
    }
}

/// An external alert enriched with the patient's current tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub patient_id: i64,
    pub noted_at: String,
    pub text: String,
    pub risk_tier: RiskTier,
    pub heart_rate: Option<f64>,
    pub bp_mean: Option<f64>,
}

/// An immutable, fully-computed view of all patients' current risk state.
///
/// Invariant: `by_id` and `timeline` hold exactly the patient ids present in
/// `rows`; `rows` is sorted by probability descending (stable, so equal
/// probabilities keep encounter order).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub last_refreshed: DateTime<Utc>,
    pub summary: RiskSummary,
    pub rows: Vec<PatientRiskRow>,
    pub by_id: HashMap<i64, PatientRiskRow>,
    pub timeline: HashMap<i64, Vec<TimelinePoint>>,
    pub alerts: Vec<AlertRecord>,
}

impl Snapshot {
    /// Look up one patient's current row.
    pub fn row(&self, patient_id: i64) -> Option<&PatientRiskRow> {
        self.by_id.get(&patient_id)
    }

    /// Look up one patient's recent timeline.
    pub fn timeline_for(&self, patient_id: i64) -> Option<&[TimelinePoint]> {
        self.timeline.get(&patient_id).map(|points| points.as_slice())
    }
}

/// Builds and publishes snapshots from the configured sources.
///
/// Supports two access modes: [`latest`](Self::latest) returns the cached
/// published snapshot (building one on first use) and
/// [`rebuild`](Self::rebuild) always recomputes. Concurrent forced rebuilds
/// are expected to be serialized by the monitor loop, not by the builder.
#[derive(Debug)]
pub struct SnapshotBuilder {
    readings: Box<dyn ReadingSource>,
    alerts: Box<dyn AlertSource>,
    classifier: Option<Box<dyn RiskClassifier>>,
    published: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotBuilder {
    /// Create a builder over the given primary and secondary sources.
    pub fn new(readings: Box<dyn ReadingSource>, alerts: Box<dyn AlertSource>) -> Self {
        Self {
            readings,
            alerts,
            classifier: None,
            published: RwLock::new(None),
        }
    }

    /// Attach a risk classifier. Without one, scoring is rule-only.
    pub fn with_classifier(mut self, classifier: Box<dyn RiskClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// The last published snapshot, if any cycle has completed.
    pub fn published(&self) -> Option<Arc<Snapshot>> {
        self.published.read().clone()
    }

    /// Cached read: return the published snapshot, building one on first use.
    pub fn latest(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.published() {
            return Ok(snapshot);
        }
        self.rebuild()
    }

    /// Forced rebuild: recompute and publish a fresh snapshot.
    ///
    /// On failure the previously published snapshot stays in place.
    pub fn rebuild(&self) -> Result<Arc<Snapshot>> {
        let snapshot = Arc::new(self.build()?);
        *self.published.write() = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn build(&self) -> Result<Snapshot> {
        let readings = self.readings.load()?;

        // Group by patient id; BTreeMap iteration gives ascending id order,
        // which the stable sort below preserves for equal probabilities.
        let mut groups: BTreeMap<i64, Vec<Reading>> = BTreeMap::new();
        for reading in readings {
            groups.entry(reading.patient_id).or_default().push(reading);
        }

        let mut rows = Vec::new();
        let mut timeline = HashMap::new();
        let mut skipped = 0usize;

        for (patient_id, mut group) in groups {
            group.sort_by_key(|r| r.taken_at);

            let Some(features) = FeatureVector::extract(&group) else {
                skipped += 1;
                continue;
            };
            let Some(latest) = group.last() else {
                continue;
            };

            let probability =
                hybrid_probability(&features, latest, self.classifier.as_deref());

            rows.push(PatientRiskRow {
                patient_id,
                updated_at: latest.taken_at,
                risk_probability: round_to(probability, 4),
                risk_tier: RiskTier::from_probability(probability),
                risk_reasons: risk_reasons(latest),
                heart_rate: latest.heart_rate.map(|v| round_to(v, 1)),
                bp_mean: latest.bp_mean.map(|v| round_to(v, 1)),
                spo2: latest.spo2.map(|v| round_to(v, 1)),
                temp: latest.temp.map(|v| round_to(v, 1)),
                creatinine: latest.creatinine.map(|v| round_to(v, 2)),
                lactate: latest.lactate.map(|v| round_to(v, 2)),
                wbc: latest.wbc.map(|v| round_to(v, 2)),
                heart_rate_trend: features.hr_trend.map(|v| round_to(v, 2)),
            });

            let tail_start = group.len().saturating_sub(TIMELINE_LEN);
            timeline.insert(
                patient_id,
                group[tail_start..].iter().map(TimelinePoint::from_reading).collect(),
            );
        }

        if skipped > 0 {
            debug!("skipped {} patients with fewer than 3 readings", skipped);
        }

        rows.sort_by(|a, b| {
            b.risk_probability
                .partial_cmp(&a.risk_probability)
                .unwrap_or(Ordering::Equal)
        });

        let by_id: HashMap<i64, PatientRiskRow> =
            rows.iter().map(|row| (row.patient_id, row.clone())).collect();
        let summary = RiskSummary::from_rows(&rows);
        let alerts = self.enriched_alerts(&by_id);

        Ok(Snapshot {
            last_refreshed: Utc::now(),
            summary,
            rows,
            by_id,
            timeline,
            alerts,
        })
    }

    /// Read the best-effort alerts feed, keep the most recent entries, and
    /// stamp each with the patient's current tier.
    fn enriched_alerts(&self, by_id: &HashMap<i64, PatientRiskRow>) -> Vec<AlertRecord> {
        let feed = self.alerts.load();
        let tail_start = feed.len().saturating_sub(ALERT_FEED_LEN);
        feed[tail_start..]
            .iter()
            .map(|alert| {
                let text = alert.text.trim();
                AlertRecord {
                    patient_id: alert.patient_id,
                    noted_at: alert.noted_at.clone(),
                    text: if text.is_empty() {
                        "Clinical alert".to_string()
                    } else {
                        text.to_string()
                    },
                    risk_tier: by_id
                        .get(&alert.patient_id)
                        .map(|row| row.risk_tier)
                        .unwrap_or(RiskTier::Medium),
                    heart_rate: alert.heart_rate,
                    bp_mean: alert.bp_mean,
                }
            })
            .collect()
    }
}
