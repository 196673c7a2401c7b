//! Hybrid risk scoring: deterministic rules blended with an optional
//! learned classifier, plus tiering and human-readable reason tags.
//!
//! The rule component never fails. The classifier is consulted when present
//! and its failures are absorbed, so scoring always produces a probability.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::FeatureVector;
use crate::source::Reading;

// Scoring constants. These are fixed design values, not configuration.
const RULE_BASE: f64 = 0.12;
const RULE_FLOOR: f64 = 0.02;
const RULE_CEILING: f64 = 0.98;
const BLEND_FLOOR: f64 = 0.01;
const BLEND_CEILING: f64 = 0.99;
const ML_WEIGHT: f64 = 0.68;
const RULE_WEIGHT: f64 = 0.32;

// Clinical thresholds shared by the rule penalties and the reason tags.
const TACHYCARDIA_HR: f64 = 120.0;
const BRADYCARDIA_HR: f64 = 50.0;
const HYPOTENSION_BP: f64 = 60.0;
const HYPERTENSION_BP: f64 = 110.0;
const HYPOXEMIA_SPO2: f64 = 90.0;
const ELEVATED_LACTATE: f64 = 2.2;

/// Ordinal risk classification. Ordering follows severity:
/// `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Map a probability to its tier. Boundaries are inclusive on the
    /// lower bound: 0.86 is already `Critical`, 0.70 already `High`.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.86 {
            RiskTier::Critical
        } else if probability >= 0.70 {
            RiskTier::High
        } else if probability >= 0.40 {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    /// The lowercase wire name of this tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    /// Parse a lowercase tier name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" => Some(RiskTier::Low),
            "medium" => Some(RiskTier::Medium),
            "high" => Some(RiskTier::High),
            "critical" => Some(RiskTier::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for an external deterioration classifier.
///
/// Implementations take a feature vector and return a probability in [0, 1]
/// that the patient deteriorates. A prediction failure of any kind is
/// treated by the scorer as "classifier absent" and never propagated.
pub trait RiskClassifier: Send + Sync + fmt::Debug {
    /// Predict the deterioration probability for one patient.
    fn predict(&self, features: &FeatureVector) -> Result<f64>;
}

/// A logistic model over the dense feature vector.
///
/// Coefficients are loaded from a JSON sidecar of the form
/// `{"weights": [...], "intercept": -1.2}` with one weight per feature
/// column. Prediction fails when the feature vector has missing values.
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    weights: Vec<f64>,
    intercept: f64,
}

impl LogisticModel {
    /// Load model coefficients from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read model file {}", path.display()))?;
        let model: Self = serde_json::from_str(&content)
            .with_context(|| format!("malformed model file {}", path.display()))?;
        anyhow::ensure!(
            model.weights.len() == 10,
            "model file {} has {} weights, expected 10",
            path.display(),
            model.weights.len()
        );
        Ok(model)
    }
}

impl RiskClassifier for LogisticModel {
    fn predict(&self, features: &FeatureVector) -> Result<f64> {
        let dense = features
            .dense()
            .context("feature vector has missing values")?;
        let z: f64 = self
            .weights
            .iter()
            .zip(dense.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept;
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// Rule-based risk probability from the latest raw reading.
///
/// Always succeeds: a comparison against a missing value contributes
/// nothing. The result is clamped to [0.02, 0.98].
pub fn rule_probability(latest: &Reading) -> f64 {
    let mut penalty = 0.0;

    if let Some(hr) = latest.heart_rate {
        if hr > TACHYCARDIA_HR {
            penalty += 0.20;
        } else if hr < BRADYCARDIA_HR {
            penalty += 0.15;
        }
    }
    if let Some(bp) = latest.bp_mean {
        if bp < HYPOTENSION_BP {
            penalty += 0.25;
        } else if bp > HYPERTENSION_BP {
            penalty += 0.10;
        }
    }
    if latest.spo2.is_some_and(|spo2| spo2 < HYPOXEMIA_SPO2) {
        penalty += 0.20;
    }
    if latest.lactate.is_some_and(|lactate| lactate > ELEVATED_LACTATE) {
        penalty += 0.15;
    }

    (RULE_BASE + penalty).clamp(RULE_FLOOR, RULE_CEILING)
}

/// Final blended risk probability.
///
/// Without a classifier (or when it fails) this is the rule probability
/// unchanged. With a classifier result, the blend is
/// `0.68 * ml + 0.32 * rule`, clamped to [0.01, 0.99].
pub fn hybrid_probability(
    features: &FeatureVector,
    latest: &Reading,
    classifier: Option<&dyn RiskClassifier>,
) -> f64 {
    let ml = classifier.and_then(|c| match c.predict(features) {
        Ok(probability) => Some(probability),
        Err(e) => {
            debug!("classifier unavailable, scoring rule-only: {:#}", e);
            None
        }
    });

    let rule = rule_probability(latest);
    match ml {
        None => rule,
        Some(ml) => (ML_WEIGHT * ml + RULE_WEIGHT * rule).clamp(BLEND_FLOOR, BLEND_CEILING),
    }
}

/// Human-readable reason tags from the latest raw reading.
///
/// Descriptive only: these share thresholds with the rule penalties but
/// play no part in the scoring math. Never empty: patients with no abnormal
/// value are tagged `monitoring`.
pub fn risk_reasons(latest: &Reading) -> Vec<String> {
    let mut reasons = Vec::new();
    if latest.heart_rate.is_some_and(|hr| hr > TACHYCARDIA_HR) {
        reasons.push("tachycardia".to_string());
    }
    if latest.bp_mean.is_some_and(|bp| bp < HYPOTENSION_BP) {
        reasons.push("hypotension".to_string());
    }
    if latest.spo2.is_some_and(|spo2| spo2 < HYPOXEMIA_SPO2) {
        reasons.push("hypoxemia".to_string());
    }
    if latest.lactate.is_some_and(|lactate| lactate > ELEVATED_LACTATE) {
        reasons.push("elevated lactate".to_string());
    }
    if reasons.is_empty() {
        reasons.push("monitoring".to_string());
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(
        hr: Option<f64>,
        bp: Option<f64>,
        spo2: Option<f64>,
        lactate: Option<f64>,
    ) -> Reading {
        Reading {
            patient_id: 1,
            taken_at: NaiveDate::from_ymd_opt(2138, 7, 3)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            heart_rate: hr,
            bp_mean: bp,
            spo2,
            temp: Some(36.8),
            creatinine: Some(1.1),
            lactate,
            wbc: Some(8.0),
        }
    }

    fn features_for(latest: &Reading) -> FeatureVector {
        FeatureVector {
            hr_avg: latest.heart_rate,
            bp_avg: latest.bp_mean,
            spo2_avg: latest.spo2,
            temp_avg: latest.temp,
            hr_trend: Some(0.0),
            creatinine: latest.creatinine,
            lactate: latest.lactate,
            wbc: latest.wbc,
            spo2_missing: latest.spo2.is_none(),
            temp_missing: latest.temp.is_none(),
        }
    }

    #[derive(Debug)]
    struct FixedClassifier(f64);

    impl RiskClassifier for FixedClassifier {
        fn predict(&self, _features: &FeatureVector) -> Result<f64> {
            Ok(self.0)
        }
    }

    #[derive(Debug)]
    struct FailingClassifier;

    impl RiskClassifier for FailingClassifier {
        fn predict(&self, _features: &FeatureVector) -> Result<f64> {
            anyhow::bail!("model backend offline")
        }
    }

    #[test]
    fn tier_boundaries_are_inclusive_on_the_lower_bound() {
        assert_eq!(RiskTier::from_probability(0.86), RiskTier::Critical);
        assert_eq!(RiskTier::from_probability(0.859999), RiskTier::High);
        assert_eq!(RiskTier::from_probability(0.70), RiskTier::High);
        assert_eq!(RiskTier::from_probability(0.40), RiskTier::Medium);
        assert_eq!(RiskTier::from_probability(0.399999), RiskTier::Low);
        assert_eq!(RiskTier::from_probability(0.0), RiskTier::Low);
        assert_eq!(RiskTier::from_probability(1.0), RiskTier::Critical);
    }

    #[test]
    fn tier_ordering_follows_severity() {
        assert!(RiskTier::Low < RiskTier::Medium);
        assert!(RiskTier::Medium < RiskTier::High);
        assert!(RiskTier::High < RiskTier::Critical);
    }

    #[test]
    fn tier_parse_round_trips() {
        for tier in [RiskTier::Low, RiskTier::Medium, RiskTier::High, RiskTier::Critical] {
            assert_eq!(RiskTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(RiskTier::parse("CRITICAL"), Some(RiskTier::Critical));
        assert_eq!(RiskTier::parse("severe"), None);
    }

    #[test]
    fn deteriorating_patient_scores_critical_on_rules_alone() {
        let latest = reading(Some(130.0), Some(55.0), Some(85.0), Some(3.0));
        let probability = rule_probability(&latest);
        assert!((probability - 0.92).abs() < 1e-9);
        assert_eq!(RiskTier::from_probability(probability), RiskTier::Critical);

        let reasons = risk_reasons(&latest);
        assert_eq!(
            reasons,
            vec!["tachycardia", "hypotension", "hypoxemia", "elevated lactate"]
        );
    }

    #[test]
    fn rule_probability_stays_in_declared_bounds() {
        let quiet = reading(Some(80.0), Some(75.0), Some(98.0), Some(1.0));
        assert!((rule_probability(&quiet) - 0.12).abs() < 1e-9);

        let worst = reading(Some(180.0), Some(40.0), Some(72.0), Some(9.5));
        let p = rule_probability(&worst);
        assert!((0.02..=0.98).contains(&p));
    }

    #[test]
    fn missing_values_contribute_nothing() {
        let latest = reading(None, None, None, None);
        assert!((rule_probability(&latest) - 0.12).abs() < 1e-9);
        assert_eq!(risk_reasons(&latest), vec!["monitoring"]);
    }

    #[test]
    fn bradycardia_and_hypertension_use_the_else_branches() {
        let latest = reading(Some(45.0), Some(120.0), Some(97.0), Some(1.0));
        // 0.12 + 0.15 (HR < 50) + 0.10 (BP > 110)
        assert!((rule_probability(&latest) - 0.37).abs() < 1e-9);
    }

    #[test]
    fn blend_weights_classifier_and_rules() {
        let latest = reading(Some(130.0), Some(55.0), Some(85.0), Some(3.0));
        let features = features_for(&latest);
        let classifier = FixedClassifier(0.5);
        let p = hybrid_probability(&features, &latest, Some(&classifier));
        // 0.68 * 0.5 + 0.32 * 0.92
        assert!((p - 0.6344).abs() < 1e-9);
    }

    #[test]
    fn blend_is_clamped_with_a_classifier_present() {
        let latest = reading(Some(130.0), Some(55.0), Some(85.0), Some(3.0));
        let features = features_for(&latest);
        let p = hybrid_probability(&features, &latest, Some(&FixedClassifier(1.0)));
        assert!(p <= 0.99);
        let p = hybrid_probability(&features, &latest, Some(&FixedClassifier(0.0)));
        assert!(p >= 0.01);
    }

    #[test]
    fn classifier_failure_falls_back_to_rules() {
        let latest = reading(Some(130.0), Some(55.0), Some(85.0), Some(3.0));
        let features = features_for(&latest);
        let p = hybrid_probability(&features, &latest, Some(&FailingClassifier));
        assert!((p - 0.92).abs() < 1e-9);
    }

    #[test]
    fn absent_classifier_returns_rule_probability_unchanged() {
        let latest = reading(Some(80.0), Some(75.0), Some(98.0), Some(1.0));
        let features = features_for(&latest);
        let p = hybrid_probability(&features, &latest, None);
        assert!((p - 0.12).abs() < 1e-9);
    }

    #[test]
    fn logistic_model_predicts_through_the_sigmoid() {
        let model = LogisticModel {
            weights: vec![0.0; 10],
            intercept: 0.0,
        };
        let latest = reading(Some(80.0), Some(75.0), Some(98.0), Some(1.0));
        let p = model.predict(&features_for(&latest)).unwrap();
        assert!((p - 0.5).abs() < 1e-9);
    }

    #[test]
    fn logistic_model_fails_on_incomplete_features() {
        let model = LogisticModel {
            weights: vec![0.0; 10],
            intercept: 0.0,
        };
        let latest = reading(None, Some(75.0), Some(98.0), Some(1.0));
        let mut features = features_for(&latest);
        features.hr_trend = None;
        assert!(model.predict(&features).is_err());
    }

    #[test]
    fn logistic_model_loads_from_json() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"weights": [0.1, 0.0, -0.2, 0.0, 0.05, 0.3, 0.4, 0.0, 0.5, 0.5], "intercept": -1.5}}"#
        )
        .unwrap();
        file.flush().unwrap();

        let model = LogisticModel::from_path(file.path()).unwrap();
        assert_eq!(model.weights.len(), 10);

        let mut short = tempfile::NamedTempFile::new().unwrap();
        write!(short, r#"{{"weights": [1.0], "intercept": 0.0}}"#).unwrap();
        short.flush().unwrap();
        assert!(LogisticModel::from_path(short.path()).is_err());
    }
}
