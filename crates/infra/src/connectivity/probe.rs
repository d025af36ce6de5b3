//! Active reachability probing.
//!
//! Platforms that cannot report connectivity (or report it optimistically)
//! still get a signal: the probe hits the backend health endpoint on a fixed
//! interval and feeds the result into the [`ConnectivityMonitor`].

use std::sync::Arc;
use std::time::Duration;

use haven_core::sync::RemoteApi;
use haven_core::ConnectivityMonitor;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls the server health endpoint and reports the result to the monitor.
pub struct ReachabilityProbe {
    remote: Arc<dyn RemoteApi>,
    monitor: ConnectivityMonitor,
    interval: Duration,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ReachabilityProbe {
    pub fn new(remote: Arc<dyn RemoteApi>, monitor: ConnectivityMonitor, interval: Duration) -> Self {
        Self {
            remote,
            monitor,
            interval,
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Probe once and report the outcome.
    pub async fn probe_once(&self) -> bool {
        probe(self.remote.as_ref(), &self.monitor).await
    }

    pub fn start(&mut self) -> Result<(), String> {
        if self.is_running() {
            return Err("Reachability probe already running".to_string());
        }
        if self.interval.is_zero() {
            return Err("Probe interval must be positive".to_string());
        }
        self.cancellation = CancellationToken::new();

        let remote = Arc::clone(&self.remote);
        let monitor = self.monitor.clone();
        let interval = self.interval;
        let cancel = self.cancellation.clone();
        self.task_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        probe(remote.as_ref(), &monitor).await;
                    }
                }
            }
            debug!("Reachability probe loop exited");
        }));
        info!(interval_secs = interval.as_secs(), "Reachability probe started");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), String> {
        let Some(handle) = self.task_handle.take() else {
            return Err("Reachability probe not running".to_string());
        };
        self.cancellation.cancel();
        match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Reachability probe panicked: {}", e);
                Err("Reachability probe panicked".to_string())
            }
            Err(_) => Err("Reachability probe stop timed out".to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }
}

impl Drop for ReachabilityProbe {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancellation.cancel();
        }
    }
}

/// Any HTTP answer, even an error status, proves the network path works.
/// Only transport failures and timeouts count as offline.
async fn probe(remote: &dyn RemoteApi, monitor: &ConnectivityMonitor) -> bool {
    let reachable = match remote.check_health().await {
        Ok(()) => true,
        Err(err) if err.is_rejection() => true,
        Err(haven_domain::HavenError::ServerUnavailable { status: Some(_), .. }) => true,
        Err(err) => {
            debug!(error = %err, "health probe failed");
            false
        }
    };
    monitor.report(reachable);
    reachable
}
