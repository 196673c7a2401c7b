//! Notification engine: eligibility filtering, cooldown deduplication,
//! delivery, and a bounded audit history.
//!
//! The engine consumes each cycle's snapshot rows in their published
//! (probability-descending) order, so higher-risk patients are always
//! attempted first. No failure escapes [`NotificationEngine::process`]:
//! delivery and configuration problems become `error` events.

mod email;

pub use email::SmtpChannel;

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::{Config, Environment, File};
use serde::Serialize;
use tracing::warn;

use crate::data::{round_to, PatientRiskRow, RiskTier, Snapshot};

/// Maximum number of retained notification events.
pub const HISTORY_CAPACITY: usize = 300;

/// Number of events included in a [`NotifyReport`].
const REPORT_RECENT: usize = 20;

/// Notification settings, fixed at process start.
///
/// Loaded from an optional config file with `WARDWATCH_`-prefixed
/// environment overrides; every key has a safe default. An engine with
/// incomplete delivery settings still runs; dispatches surface the gap as
/// `error` events rather than failing.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub sender: Option<String>,
    pub password: Option<String>,
    pub recipients: Vec<String>,
    pub smtp_relay: String,
    pub cooldown_minutes: i64,
    pub minimum_tier: RiskTier,
    pub minimum_probability: f64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sender: None,
            password: None,
            recipients: Vec::new(),
            smtp_relay: "smtp.gmail.com".to_string(),
            cooldown_minutes: 30,
            minimum_tier: RiskTier::Critical,
            minimum_probability: 0.85,
        }
    }
}

impl NotifyConfig {
    /// Load settings from an optional file plus the environment.
    ///
    /// Recognized keys: `enabled`, `email_user`, `email_pass`, `email_to`
    /// (comma-separated), `smtp_relay`, `cooldown_minutes`, `minimum_tier`,
    /// `minimum_probability`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let cfg = builder
            .add_source(Environment::with_prefix("WARDWATCH"))
            .build()
            .context("failed to load notification configuration")?;

        let defaults = Self::default();
        let minimum_tier = match cfg.get_string("minimum_tier") {
            Ok(value) => RiskTier::parse(&value).unwrap_or_else(|| {
                warn!("unknown minimum_tier {:?}, using critical", value);
                defaults.minimum_tier
            }),
            Err(_) => defaults.minimum_tier,
        };

        Ok(Self {
            enabled: cfg.get_bool("enabled").unwrap_or(defaults.enabled),
            sender: cfg.get_string("email_user").ok().filter(|s| !s.is_empty()),
            password: cfg.get_string("email_pass").ok().filter(|s| !s.is_empty()),
            recipients: cfg
                .get_string("email_to")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            smtp_relay: cfg.get_string("smtp_relay").unwrap_or(defaults.smtp_relay),
            cooldown_minutes: cfg.get_int("cooldown_minutes").unwrap_or(defaults.cooldown_minutes),
            minimum_probability: cfg
                .get_float("minimum_probability")
                .unwrap_or(defaults.minimum_probability),
            minimum_tier,
        })
    }

    /// Whether sender, password, and at least one recipient are present.
    pub fn delivery_ready(&self) -> bool {
        self.sender.as_deref().is_some_and(|s| !s.is_empty())
            && self.password.as_deref().is_some_and(|s| !s.is_empty())
            && !self.recipients.is_empty()
    }
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Sent,
    Skipped,
    Error,
}

/// One dispatch attempt, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub timestamp: DateTime<Utc>,
    pub patient_id: i64,
    pub risk_tier: RiskTier,
    pub risk_probability: f64,
    pub status: EventStatus,
    pub message: String,
}

/// Structured payload handed to a delivery channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub sender: String,
    pub recipients: Vec<String>,
    pub patient_id: i64,
    pub risk_tier: RiskTier,
    pub risk_probability: f64,
    pub updated_at: chrono::NaiveDateTime,
    pub heart_rate: Option<f64>,
    pub bp_mean: Option<f64>,
    pub spo2: Option<f64>,
    pub temp: Option<f64>,
    pub lactate: Option<f64>,
    pub reasons: Vec<String>,
}

impl AlertMessage {
    fn from_row(row: &PatientRiskRow, config: &NotifyConfig) -> Self {
        Self {
            sender: config.sender.clone().unwrap_or_default(),
            recipients: config.recipients.clone(),
            patient_id: row.patient_id,
            risk_tier: row.risk_tier,
            risk_probability: row.risk_probability,
            updated_at: row.updated_at,
            heart_rate: row.heart_rate,
            bp_mean: row.bp_mean,
            spo2: row.spo2,
            temp: row.temp,
            lactate: row.lactate,
            reasons: row.risk_reasons.clone(),
        }
    }

    /// Risk probability as a display percentage.
    pub fn risk_percent(&self) -> f64 {
        round_to(self.risk_probability * 100.0, 1)
    }

    /// Subject line for the alert.
    pub fn subject(&self) -> String {
        format!(
            "WARD ALERT: Patient #{} {} risk ({}%)",
            self.patient_id,
            self.risk_tier.as_str().to_uppercase(),
            self.risk_percent()
        )
    }

    /// Plain-text body for the alert.
    pub fn body(&self) -> String {
        format!(
            "Ward Risk Monitor Alert\n\n\
             Patient ID: {}\n\
             Risk Tier: {}\n\
             Risk Probability: {}%\n\
             Updated At: {}\n\n\
             Vitals\n\
             - Heart Rate: {}\n\
             - MAP: {}\n\
             - SpO2: {}\n\
             - Temp: {}\n\
             - Lactate: {}\n\n\
             Reasons: {}\n\n\
             This alert was generated automatically by wardwatch.\n",
            self.patient_id,
            self.risk_tier.as_str().to_uppercase(),
            self.risk_percent(),
            self.updated_at,
            fmt_value(self.heart_rate),
            fmt_value(self.bp_mean),
            fmt_value(self.spo2),
            fmt_value(self.temp),
            fmt_value(self.lactate),
            self.reasons.join(", "),
        )
    }
}

fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    }
}

/// Trait for transmitting a single alert.
///
/// Delivery is blocking I/O from the scheduler's point of view;
/// implementations offload the blocking part internally (see
/// [`SmtpChannel`]) so the engine can await each attempt without stalling
/// the runtime. Returning an error marks the attempt failed; the engine
/// converts it to an `error` event and never retries within the cycle.
#[async_trait]
pub trait DeliveryChannel: Send + Sync + Debug {
    /// Attempt delivery of one alert.
    async fn deliver(&self, message: &AlertMessage) -> Result<()>;
}

/// Thresholds, counts, and recent events for display.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyReport {
    pub enabled: bool,
    pub minimum_tier: RiskTier,
    pub minimum_probability: f64,
    pub cooldown_minutes: i64,
    pub sent_count: usize,
    pub error_count: usize,
    pub recent: Vec<NotificationEvent>,
}

/// Filters snapshot rows, enforces per-patient cooldown, and drives the
/// delivery channel.
///
/// The cooldown ledger and event history are owned here and only mutated
/// from within a single in-progress [`process`](Self::process) call; the
/// monitor loop guarantees at most one concurrent cycle.
#[derive(Debug)]
pub struct NotificationEngine {
    config: NotifyConfig,
    channel: Box<dyn DeliveryChannel>,
    last_sent: HashMap<i64, DateTime<Utc>>,
    history: VecDeque<NotificationEvent>,
}

impl NotificationEngine {
    /// Create an engine with the given settings and delivery channel.
    pub fn new(config: NotifyConfig, channel: Box<dyn DeliveryChannel>) -> Self {
        Self {
            config,
            channel,
            last_sent: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Run one notification pass over a snapshot.
    ///
    /// Rows are visited in snapshot order. Rows failing eligibility or still
    /// in cooldown produce no event at all; every attempted dispatch
    /// produces exactly one.
    pub async fn process(&mut self, snapshot: &Snapshot) {
        let now = Utc::now();
        for row in &snapshot.rows {
            if !self.eligible(row) {
                continue;
            }
            if !self.cooldown_over(row.patient_id, now) {
                continue;
            }
            let event = self.dispatch(row, now).await;
            // Ledger update and event recording happen together, after the
            // delivery await: cancellation mid-dispatch leaves neither.
            if event.status == EventStatus::Sent {
                self.last_sent.insert(row.patient_id, now);
            }
            self.record(event);
        }
    }

    /// Enablement, thresholds, counts, and the most recent events.
    pub fn report(&self) -> NotifyReport {
        NotifyReport {
            enabled: self.config.enabled,
            minimum_tier: self.config.minimum_tier,
            minimum_probability: self.config.minimum_probability,
            cooldown_minutes: self.config.cooldown_minutes,
            sent_count: self.history.iter().filter(|e| e.status == EventStatus::Sent).count(),
            error_count: self.history.iter().filter(|e| e.status == EventStatus::Error).count(),
            recent: self.history.iter().take(REPORT_RECENT).cloned().collect(),
        }
    }

    fn eligible(&self, row: &PatientRiskRow) -> bool {
        row.risk_tier >= self.config.minimum_tier
            && row.risk_probability >= self.config.minimum_probability
    }

    fn cooldown_over(&self, patient_id: i64, now: DateTime<Utc>) -> bool {
        match self.last_sent.get(&patient_id) {
            None => true,
            Some(last) => (now - *last).num_seconds() >= self.config.cooldown_minutes * 60,
        }
    }

    async fn dispatch(&self, row: &PatientRiskRow, now: DateTime<Utc>) -> NotificationEvent {
        if !self.config.enabled {
            return self.event(row, now, EventStatus::Skipped, "Alerts disabled by config".into());
        }
        if !self.config.delivery_ready() {
            return self.event(
                row,
                now,
                EventStatus::Error,
                "Missing sender/password/recipients configuration".into(),
            );
        }

        let message = AlertMessage::from_row(row, &self.config);
        match self.channel.deliver(&message).await {
            Ok(()) => self.event(
                row,
                now,
                EventStatus::Sent,
                format!("Alert sent to {}", self.config.recipients.join(", ")),
            ),
            Err(e) => {
                warn!("alert delivery failed for patient {}: {:#}", row.patient_id, e);
                self.event(row, now, EventStatus::Error, format!("Delivery failed: {:#}", e))
            }
        }
    }

    fn event(
        &self,
        row: &PatientRiskRow,
        now: DateTime<Utc>,
        status: EventStatus,
        message: String,
    ) -> NotificationEvent {
        NotificationEvent {
            timestamp: now,
            patient_id: row.patient_id,
            risk_tier: row.risk_tier,
            risk_probability: row.risk_probability,
            status,
            message,
        }
    }

    fn record(&mut self, event: NotificationEvent) {
        self.history.push_front(event);
        self.history.truncate(HISTORY_CAPACITY);
    }
}
