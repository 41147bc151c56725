use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lariat_core::AppResult;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Target whose deadline the auto-renewer keeps pushing forward.
///
/// A worker-side lease handle renews against the Lease Manager; a claimed
/// task renews by heartbeating the Task Dispatcher.
#[async_trait]
pub trait RenewalTarget: Send + Sync {
    /// Renews the target and returns the new expiry deadline.
    async fn renew(&self) -> AppResult<DateTime<Utc>>;
}

/// Periodic renewal driver for one lease-backed claim.
///
/// The interval must stay strictly below half the lease TTL so that a single
/// missed renewal cannot expire the claim. Contention or a vanished lease is
/// terminal: the loop records the loss and exits; transient failures are
/// retried on the next tick.
pub struct AutoRenewer {
    stop: watch::Sender<bool>,
    lost: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl AutoRenewer {
    /// Spawns the renewal loop on the current runtime.
    #[must_use]
    pub fn spawn(target: Arc<dyn RenewalTarget>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (lost_tx, lost_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick completes immediately; consume it so the
            // first renewal lands one full interval after the claim.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                match target.renew().await {
                    Ok(expires_at) => {
                        debug!(%expires_at, "renewed claim");
                    }
                    Err(error) if error.is_claim_loss() => {
                        warn!(error = %error, "claim lost; stopping renewal");
                        let _ = lost_tx.send(true);
                        break;
                    }
                    Err(error) => {
                        warn!(error = %error, "renewal attempt failed; will retry");
                    }
                }
            }
        });

        Self {
            stop: stop_tx,
            lost: lost_rx,
            task,
        }
    }

    /// Returns true once a renewal observed the claim as lost.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Signals the loop and waits for it to exit. Does not release the
    /// underlying lease.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}
