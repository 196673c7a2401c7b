//! Periodic monitor loop.
//!
//! A single long-lived task rebuilds the snapshot at a fixed interval and
//! feeds it to the notification engine. One bad cycle never terminates
//! monitoring: failures are recorded in observable health state and the
//! loop re-arms after the same interval regardless of outcome. Cancellation
//! is cooperative via a watch channel and takes effect at the next
//! suspension point.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::data::SnapshotBuilder;
use crate::notify::NotificationEngine;

/// Default pause between monitor cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

/// Observable state of the monitor loop.
///
/// `last_error` holds the most recent cycle failure and clears once a later
/// cycle succeeds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorHealth {
    pub cycles: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// The recurring rebuild-then-notify scheduler.
///
/// Owns shared handles to the snapshot builder and the notification engine;
/// the same handles are what a consumer layer reads from. Start it with
/// [`start`](Self::start), which returns a [`MonitorHandle`] for health
/// inspection and shutdown.
pub struct MonitorLoop {
    builder: Arc<SnapshotBuilder>,
    engine: Arc<Mutex<NotificationEngine>>,
    interval: Duration,
    health: Arc<RwLock<MonitorHealth>>,
}

impl MonitorLoop {
    /// Create a loop over the given builder and engine.
    pub fn new(
        builder: Arc<SnapshotBuilder>,
        engine: Arc<Mutex<NotificationEngine>>,
        interval: Duration,
    ) -> Self {
        Self {
            builder,
            engine,
            interval,
            health: Arc::new(RwLock::new(MonitorHealth::default())),
        }
    }

    /// Spawn the background task. The first cycle runs immediately.
    pub fn start(self) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let health = Arc::clone(&self.health);

        info!("monitor loop starting, interval {:?}", self.interval);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_cycle().await,
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            debug!("monitor loop stopping");
                            break;
                        }
                    }
                }
            }
        });

        MonitorHandle {
            stop_tx,
            task,
            health,
        }
    }

    async fn run_cycle(&self) {
        // Holding the engine lock for the whole cycle keeps process() calls
        // strictly serialized.
        let mut engine = self.engine.lock().await;
        match self.builder.rebuild() {
            Ok(snapshot) => {
                debug!(
                    "snapshot rebuilt: {} patients monitored",
                    snapshot.summary.patients_monitored
                );
                engine.process(&snapshot).await;
                let mut health = self.health.write();
                health.cycles += 1;
                health.last_success = Some(Utc::now());
                health.last_error = None;
            }
            Err(e) => {
                warn!("monitor cycle failed: {:#}", e);
                let mut health = self.health.write();
                health.cycles += 1;
                health.last_error = Some(format!("{:#}", e));
            }
        }
    }
}

/// Handle for inspecting and stopping a running monitor loop.
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    health: Arc<RwLock<MonitorHealth>>,
}

impl MonitorHandle {
    /// Current health state of the loop.
    pub fn health(&self) -> MonitorHealth {
        self.health.read().clone()
    }

    /// Request cooperative shutdown and wait for the loop to exit.
    ///
    /// Takes effect at the loop's next suspension point; an in-flight cycle
    /// finishes its current dispatch so the cooldown ledger and history are
    /// never left partially updated.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{AlertMessage, DeliveryChannel, NotifyConfig};
    use crate::source::{AlertSource, ExternalAlert, Reading, ReadingSource};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Debug)]
    struct StaticReadings(Vec<Reading>);

    impl ReadingSource for StaticReadings {
        fn load(&self) -> Result<Vec<Reading>> {
            Ok(self.0.clone())
        }

        fn description(&self) -> &str {
            "static"
        }
    }

    #[derive(Debug)]
    struct FailingReadings;

    impl ReadingSource for FailingReadings {
        fn load(&self) -> Result<Vec<Reading>> {
            anyhow::bail!("primary store unreadable")
        }

        fn description(&self) -> &str {
            "failing"
        }
    }

    #[derive(Debug)]
    struct EmptyAlerts;

    impl AlertSource for EmptyAlerts {
        fn load(&self) -> Vec<ExternalAlert> {
            Vec::new()
        }

        fn description(&self) -> &str {
            "empty"
        }
    }

    #[derive(Debug, Default)]
    struct RecordingChannel {
        delivered: Arc<SyncMutex<Vec<AlertMessage>>>,
    }

    #[async_trait]
    impl DeliveryChannel for RecordingChannel {
        async fn deliver(&self, message: &AlertMessage) -> Result<()> {
            self.delivered.lock().push(message.clone());
            Ok(())
        }
    }

    fn crashing_reading(hour: u32) -> Reading {
        Reading {
            patient_id: 1,
            taken_at: NaiveDate::from_ymd_opt(2138, 7, 3)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            heart_rate: Some(130.0),
            bp_mean: Some(55.0),
            spo2: Some(85.0),
            temp: Some(36.8),
            creatinine: Some(1.1),
            lactate: Some(3.0),
            wbc: Some(8.0),
        }
    }

    fn ready_config() -> NotifyConfig {
        NotifyConfig {
            sender: Some("ward@example.com".to_string()),
            password: Some("secret".to_string()),
            recipients: vec!["oncall@example.com".to_string()],
            ..NotifyConfig::default()
        }
    }

    fn monitor_over(
        source: Box<dyn ReadingSource>,
    ) -> (MonitorLoop, Arc<Mutex<NotificationEngine>>, Arc<SyncMutex<Vec<AlertMessage>>>) {
        let builder = Arc::new(SnapshotBuilder::new(source, Box::new(EmptyAlerts)));
        let channel = RecordingChannel::default();
        let delivered = Arc::clone(&channel.delivered);
        let engine = Arc::new(Mutex::new(NotificationEngine::new(
            ready_config(),
            Box::new(channel),
        )));
        let monitor = MonitorLoop::new(builder, Arc::clone(&engine), Duration::from_secs(20));
        (monitor, engine, delivered)
    }

    #[tokio::test(start_paused = true)]
    async fn first_cycle_runs_immediately_and_notifies() {
        let source = StaticReadings(vec![
            crashing_reading(1),
            crashing_reading(2),
            crashing_reading(3),
        ]);
        let (monitor, engine, delivered) = monitor_over(Box::new(source));
        let handle = monitor.start();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let health = handle.health();
        assert_eq!(health.cycles, 1);
        assert!(health.last_success.is_some());
        assert!(health.last_error.is_none());
        assert_eq!(delivered.lock().len(), 1);

        let report = engine.lock().await.report();
        assert_eq!(report.sent_count, 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_holds_across_cycles() {
        let source = StaticReadings(vec![
            crashing_reading(1),
            crashing_reading(2),
            crashing_reading(3),
        ]);
        let (monitor, _engine, delivered) = monitor_over(Box::new(source));
        let handle = monitor.start();

        // Three cycles inside one 30-minute cooldown window.
        tokio::time::sleep(Duration::from_secs(45)).await;

        assert!(handle.health().cycles >= 3);
        assert_eq!(delivered.lock().len(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_cycles_record_errors_and_the_loop_survives() {
        let (monitor, _engine, delivered) = monitor_over(Box::new(FailingReadings));
        let handle = monitor.start();

        tokio::time::sleep(Duration::from_secs(45)).await;

        let health = handle.health();
        assert!(health.cycles >= 3);
        assert!(health.last_success.is_none());
        assert!(health
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("primary store unreadable")));
        assert!(delivered.lock().is_empty());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_terminates_the_loop() {
        let source = StaticReadings(Vec::new());
        let (monitor, _engine, _delivered) = monitor_over(Box::new(source));
        let handle = monitor.start();

        tokio::time::sleep(Duration::from_millis(10)).await;
        // stop() awaits the task itself; returning proves the loop exited.
        handle.stop().await;
    }
}
