//! Periodic eviction of idle buckets.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::registry::Registries;
use crate::error::{Result, TurnstileError};

/// Default time between sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Background task that sweeps the registries on a fixed interval.
///
/// The task runs until [`CleanupScheduler::stop`] is called or the
/// scheduler is dropped.
#[derive(Debug)]
pub struct CleanupScheduler {
    shutdown_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CleanupScheduler {
    /// Spawn the sweep task on the current tokio runtime.
    ///
    /// Fails if `interval` is zero.
    pub fn spawn(registries: Arc<Registries>, interval: Duration, threshold: usize) -> Result<Self> {
        if interval.is_zero() {
            return Err(TurnstileError::Config(
                "cleanup interval must be > 0".to_string(),
            ));
        }

        let shutdown_token = CancellationToken::new();
        let token = shutdown_token.clone();

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                threshold = threshold,
                "Rate limiter cleanup worker started"
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = registries.sweep(threshold);
                        if report.total() > 0 {
                            info!(
                                endpoint_cleared = report.endpoint_cleared,
                                ip_cleared = report.ip_cleared,
                                user_cleared = report.user_cleared,
                                "Swept rate limiter registries"
                            );
                        } else {
                            debug!("Rate limiter sweep found nothing to clear");
                        }
                    }
                    _ = token.cancelled() => {
                        info!("Rate limiter cleanup worker shutting down");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            shutdown_token,
            handle: Some(handle),
        })
    }

    /// Signal the task to stop. Idempotent.
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Rate limiter cleanup worker failed");
            }
        }
    }

    /// Whether the task was told to stop or has exited on its own.
    pub fn is_stopped(&self) -> bool {
        self.shutdown_token.is_cancelled()
            || self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
