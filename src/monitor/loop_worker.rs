use std::time::Instant;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::models::{CalibrationProfile, ClassifiedReading};
use crate::sensor::VoltageSource;
use crate::signal::SignalProcessor;
use crate::sleep::{SleepStateMachine, SleepThresholds};
use crate::store::ReadingsStore;

/// Consecutive failed reads before the device is reported degraded.
const READ_FAILURE_BOUND: u32 = 50;
/// Consecutive exact-zero reads before the sensor is reported disconnected.
const ZERO_READ_BOUND: u32 = 10;

/// Device-health condition published to the controller on a watch channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceHealth {
    pub consecutive_read_failures: u32,
    /// Reads have failed for longer than the tolerated bound.
    pub degraded: bool,
    /// The sensor has read exactly 0V long enough to look disconnected.
    pub sensor_fault: bool,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub channel: u8,
    pub tick_interval: std::time::Duration,
    /// Pending-queue drain and retention pruning run every this many ticks.
    pub maintenance_every_ticks: u64,
    pub window_size: usize,
    pub sleep_delay: std::time::Duration,
    /// Overrides the profile-derived occupancy threshold when set.
    pub occupancy_threshold_percent: Option<f64>,
}

/// Fixed-period sampling loop: read -> smooth -> classify -> persist, strictly
/// sequentially, one tick at a time. Runs until the cancellation token fires,
/// then attempts one final pending drain.
pub async fn monitor_loop(
    run_id: String,
    mut source: Box<dyn VoltageSource>,
    profile: CalibrationProfile,
    mut store: ReadingsStore,
    settings: LoopSettings,
    health_tx: watch::Sender<DeviceHealth>,
    cancel_token: CancellationToken,
) {
    let thresholds = SleepThresholds {
        occupancy_threshold_percent: settings
            .occupancy_threshold_percent
            .unwrap_or_else(|| profile.occupancy_threshold_percent()),
        movement_variance_threshold: profile.movement_variance_threshold,
        sleep_delay: settings.sleep_delay,
    };
    let mut processor = SignalProcessor::new(settings.window_size);
    let mut machine = SleepStateMachine::new(thresholds, Instant::now());

    let mut ticker = tokio::time::interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut health = DeviceHealth::default();
    let mut last_voltage: Option<f64> = None;
    let mut zero_streak: u32 = 0;
    let mut tick_count: u64 = 0;

    info!(
        "monitor run {run_id} started: {}ms tick, occupancy threshold {:.1}%, movement variance {:.5}",
        settings.tick_interval.as_millis(),
        thresholds.occupancy_threshold_percent,
        thresholds.movement_variance_threshold
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick_started = Instant::now();
                tick_count += 1;

                run_tick(
                    &mut *source,
                    &profile,
                    &mut processor,
                    &mut machine,
                    &mut store,
                    &settings,
                    &mut health,
                    &health_tx,
                    &mut last_voltage,
                    &mut zero_streak,
                )
                .await;

                if tick_count % settings.maintenance_every_ticks == 0 {
                    store.drain_pending().await;
                    let cutoff = ReadingsStore::retention_cutoff(Utc::now());
                    if let Err(err) = store.prune_retention(cutoff).await {
                        warn!("retention pruning failed: {err:#}");
                    }
                }

                let elapsed = tick_started.elapsed();
                if elapsed > settings.tick_interval {
                    warn!(
                        "tick overran its {}ms budget by {}ms",
                        settings.tick_interval.as_millis(),
                        (elapsed - settings.tick_interval).as_millis()
                    );
                }
            }
            _ = cancel_token.cancelled() => {
                info!("monitor run {run_id} shutting down after {tick_count} ticks");
                let flushed = store.drain_pending().await;
                if store.pending_len() > 0 {
                    error!(
                        "{} readings still queued at shutdown (flushed {flushed})",
                        store.pending_len()
                    );
                }
                break;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_tick(
    source: &mut dyn VoltageSource,
    profile: &CalibrationProfile,
    processor: &mut SignalProcessor,
    machine: &mut SleepStateMachine,
    store: &mut ReadingsStore,
    settings: &LoopSettings,
    health: &mut DeviceHealth,
    health_tx: &watch::Sender<DeviceHealth>,
    last_voltage: &mut Option<f64>,
    zero_streak: &mut u32,
) {
    let voltage = match source.read_voltage(settings.channel) {
        Ok(v) => {
            if health.consecutive_read_failures > 0 {
                info!(
                    "sensor recovered after {} failed reads",
                    health.consecutive_read_failures
                );
                health.consecutive_read_failures = 0;
                health.degraded = false;
                let _ = health_tx.send(*health);
            }
            *last_voltage = Some(v);
            v
        }
        Err(err) => {
            health.consecutive_read_failures += 1;
            if health.consecutive_read_failures == READ_FAILURE_BOUND {
                health.degraded = true;
                error!(
                    "{READ_FAILURE_BOUND} consecutive read failures, reporting device degraded: {err}"
                );
            } else {
                warn!(
                    "read failed ({} consecutive), holding last value: {err}",
                    health.consecutive_read_failures
                );
            }
            let _ = health_tx.send(*health);

            // Hold-last-value: re-run the pipeline on the previous sample so
            // the classified state persists through the dropout. Before the
            // first successful read there is nothing to hold, so the tick is
            // skipped.
            match *last_voltage {
                Some(v) => v,
                None => return,
            }
        }
    };

    let signal = processor.process(voltage, profile);

    if signal.sensor_fault {
        *zero_streak += 1;
        if *zero_streak == ZERO_READ_BOUND {
            health.sensor_fault = true;
            error!(
                "sensor has read 0V for {ZERO_READ_BOUND} consecutive ticks; \
                 divider looks disconnected"
            );
            let _ = health_tx.send(*health);
        } else if *zero_streak == 1 {
            warn!("sensor read exactly 0V, flagging as fault rather than empty bed");
        }
    } else if *zero_streak > 0 {
        *zero_streak = 0;
        if health.sensor_fault {
            health.sensor_fault = false;
            info!("sensor voltage back above 0V, clearing fault");
            let _ = health_tx.send(*health);
        }
    }

    let state = machine.update(signal.force_percent, signal.variance, Instant::now());

    let reading = ClassifiedReading {
        id: None,
        timestamp: Utc::now(),
        voltage,
        force_percent: signal.force_percent,
        state,
        variance: signal.variance,
        synced: false,
    };

    store.insert(reading).await;
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::db::Database;
    use crate::errors::SensorReadError;
    use crate::sleep::SleepState;

    struct TempDb {
        db: Database,
        path: PathBuf,
    }

    impl TempDb {
        fn open() -> Self {
            let path = std::env::temp_dir().join(format!(
                "sleepsense-loop-test-{}.sqlite3",
                uuid::Uuid::new_v4()
            ));
            let db = Database::new(path.clone()).expect("open test database");
            Self { db, path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn test_profile() -> CalibrationProfile {
        CalibrationProfile {
            device_id: "bed-node-1".into(),
            baseline_voltage: 0.5,
            occupied_voltage: 2.5,
            occupancy_threshold: 1.5,
            movement_variance_threshold: 0.01,
            created_at: Utc::now(),
        }
    }

    /// Always reads the occupied voltage.
    struct SteadySource(f64);

    impl VoltageSource for SteadySource {
        fn read_voltage(&mut self, _channel: u8) -> Result<f64, SensorReadError> {
            Ok(self.0)
        }
    }

    fn fast_settings() -> LoopSettings {
        LoopSettings {
            channel: 0,
            tick_interval: Duration::from_millis(1),
            maintenance_every_ticks: 1000,
            window_size: 8,
            sleep_delay: Duration::from_secs(60),
            occupancy_threshold_percent: None,
        }
    }

    #[tokio::test]
    async fn loop_persists_classified_readings_until_cancelled() {
        let tmp = TempDb::open();
        let store = ReadingsStore::new(tmp.db.clone(), "bed-node-1".into(), "user-1".into(), 0);

        let (health_tx, _health_rx) = watch::channel(DeviceHealth::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(
            "test-run".into(),
            Box::new(SteadySource(2.4)),
            test_profile(),
            store,
            fast_settings(),
            health_tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.expect("loop task joins cleanly");

        let check = ReadingsStore::new(tmp.db.clone(), "bed-node-1".into(), "user-1".into(), 0);
        let rows = check.get_unsynced(100).await.expect("query succeeds");
        assert!(!rows.is_empty(), "expected readings to be persisted");
        for row in &rows {
            assert!((0.0..=100.0).contains(&row.force_percent));
            // Steady occupied voltage never looks empty or restless.
            assert!(matches!(row.state, SleepState::Awake | SleepState::Asleep));
        }
    }

    #[tokio::test]
    async fn read_failures_escalate_to_degraded_health() {
        let tmp = TempDb::open();
        let store = ReadingsStore::new(tmp.db.clone(), "bed-node-1".into(), "user-1".into(), 0);

        struct FailingSource;
        impl VoltageSource for FailingSource {
            fn read_voltage(&mut self, channel: u8) -> Result<f64, SensorReadError> {
                Err(SensorReadError {
                    channel,
                    reason: "bus gone".into(),
                })
            }
        }

        let (health_tx, health_rx) = watch::channel(DeviceHealth::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(
            "test-run".into(),
            Box::new(FailingSource),
            test_profile(),
            store,
            fast_settings(),
            health_tx,
            cancel.clone(),
        ));

        // 50 failing ticks at 1ms pass well within this window.
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.expect("loop task joins cleanly");

        let health = *health_rx.borrow();
        assert!(health.degraded);
        assert!(health.consecutive_read_failures >= READ_FAILURE_BOUND);

        // No sample ever succeeded, so nothing was persisted.
        let check = ReadingsStore::new(tmp.db.clone(), "bed-node-1".into(), "user-1".into(), 0);
        assert!(check.get_unsynced(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_reads_raise_sensor_fault_instead_of_empty() {
        let tmp = TempDb::open();
        let store = ReadingsStore::new(tmp.db.clone(), "bed-node-1".into(), "user-1".into(), 0);

        let (health_tx, health_rx) = watch::channel(DeviceHealth::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(
            "test-run".into(),
            Box::new(SteadySource(0.0)),
            test_profile(),
            store,
            fast_settings(),
            health_tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.expect("loop task joins cleanly");

        let health = *health_rx.borrow();
        assert!(health.sensor_fault);
        assert!(!health.degraded, "a zero read is a successful read");
    }
}
