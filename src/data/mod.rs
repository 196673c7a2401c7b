//! Risk pipeline: feature extraction, hybrid scoring, snapshot assembly.
//!
//! ## Submodules
//!
//! - [`features`]: windowed feature extraction over a patient's readings
//! - [`risk`]: rule/classifier scoring, tiering, reason tags
//! - [`snapshot`]: per-cycle snapshot assembly and cached/forced access
//!
//! ## Data Flow
//!
//! ```text
//! Vec<Reading> (per patient, sorted)
//!        │
//!        ▼
//! FeatureVector::extract()
//!        │
//!        ▼
//! hybrid_probability() ──▶ RiskTier / reasons
//!        │
//!        ▼
//! SnapshotBuilder::rebuild() ──▶ Arc<Snapshot> (published, read-only)
//! ```

pub mod features;
pub mod risk;
pub mod snapshot;

pub use features::FeatureVector;
pub use risk::{LogisticModel, RiskClassifier, RiskTier};
pub use snapshot::{
    AlertRecord, PatientRiskRow, RiskSummary, Snapshot, SnapshotBuilder, TimelinePoint,
};

/// Round to a fixed number of decimal places for wire/display values.
pub(crate) fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
