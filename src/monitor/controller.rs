use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::models::CalibrationProfile;
use crate::sensor::VoltageSource;
use crate::store::ReadingsStore;

use super::loop_worker::{monitor_loop, DeviceHealth, LoopSettings};

/// Owns the running tick loop: spawn on start, cancel and join on stop.
pub struct MonitorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    health_rx: Option<watch::Receiver<DeviceHealth>>,
}

impl MonitorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            health_rx: None,
        }
    }

    pub fn start(
        &mut self,
        source: Box<dyn VoltageSource>,
        profile: CalibrationProfile,
        store: ReadingsStore,
        settings: LoopSettings,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("monitor already active");
        }

        let run_id = Uuid::new_v4().to_string();
        info!("starting monitor run {run_id}");

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let (health_tx, health_rx) = watch::channel(DeviceHealth::default());

        let handle = tokio::spawn(monitor_loop(
            run_id,
            source,
            profile,
            store,
            settings,
            health_tx,
            token_clone,
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.health_rx = Some(health_rx);
        Ok(())
    }

    /// Current device-health condition as reported by the loop.
    pub fn health(&self) -> Option<DeviceHealth> {
        self.health_rx.as_ref().map(|rx| *rx.borrow())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.health_rx = None;

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("monitor loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for MonitorController {
    fn default() -> Self {
        Self::new()
    }
}
