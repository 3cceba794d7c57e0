use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::quota::QuotaService;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polls quota state and publishes it as gauges. Warns when users sit at
/// or over the blocked threshold.
pub struct QuotaMonitor {
    quota: Arc<QuotaService>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl QuotaMonitor {
    #[must_use]
    pub fn new(quota: Arc<QuotaService>) -> Self {
        Self {
            quota,
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut guard = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        info!("Quota monitor polling every {}s", POLL_INTERVAL.as_secs());
        let quota = Arc::clone(&self.quota);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let stats = quota.stats();

                #[allow(clippy::cast_precision_loss)]
                {
                    metrics::gauge!("guardarr_quota_tracked_users").set(stats.tracked_users as f64);
                    metrics::gauge!("guardarr_quota_blocked_users").set(stats.blocked_users as f64);
                    metrics::gauge!("guardarr_quota_active_last_hour")
                        .set(stats.active_last_hour.len() as f64);
                }

                if stats.blocked_users > 0 {
                    warn!("{} user(s) at or over the blocked threshold", stats.blocked_users);
                } else {
                    debug!("Quota monitor: {} tracked users", stats.tracked_users);
                }
            }
        }));
    }

    pub fn stop(&self) {
        let mut guard = self
            .handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

impl Drop for QuotaMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
