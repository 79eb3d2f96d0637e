//! Periodic driver for [`ValidatorService::refresh`].
//!
//! Refreshes once immediately, then on every tick. A failed refresh is logged
//! and the loop carries on; the registry keeps serving its previous set.

use crate::error::RelayError;
use crate::payload_cache::PayloadCache;
use crate::validator_registry::ValidatorService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct RegistryRefresher<S: ValidatorService + ?Sized> {
    registry: Arc<S>,
    every: Duration,
}

impl<S: ValidatorService + ?Sized + 'static> RegistryRefresher<S> {
    pub fn new(registry: Arc<S>, every: Duration) -> Self {
        Self { registry, every }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures: u32 = 0;

        info!("Registry refresher started (every {:?})", self.every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.registry.refresh().await {
                        Ok(()) => {
                            if consecutive_failures > 0 {
                                info!("Registry refresh recovered after {} failures", consecutive_failures);
                            }
                            consecutive_failures = 0;
                            debug!("Registry holds {} validators", self.registry.count());
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!(
                                kind = %e.kind(),
                                transient = e.kind().is_transient(),
                                consecutive_failures,
                                "Registry refresh failed, serving previous set: {}",
                                e
                            );
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Registry refresher stopping");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// One housekeeping pass: the payload store must answer, then the registry
/// is refreshed. Returns the number of validators now installed.
pub async fn run_once<S: ValidatorService + ?Sized>(
    cache: &PayloadCache,
    registry: &S,
) -> Result<u64, RelayError> {
    cache.check_store().await?;
    registry.refresh().await?;
    Ok(registry.count())
}
