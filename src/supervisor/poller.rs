use super::services::Supervisor;
use super::state::LauncherState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// One periodic liveness check per service, publishing into [`LauncherState`].
pub struct Poller {
    supervisor: Supervisor,
    state: Arc<LauncherState>,
    interval: Duration,
}

impl Poller {
    pub fn new(supervisor: Supervisor, state: Arc<LauncherState>, interval: Duration) -> Self {
        Self {
            supervisor,
            state,
            interval,
        }
    }

    /// Spawn a poller task for every registered service. They exit when
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_all(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(interval = ?self.interval, "Starting service pollers");
        self.supervisor
            .registry()
            .names()
            .into_iter()
            .map(|name| {
                tokio::spawn(poll_service(
                    self.supervisor.clone(),
                    Arc::clone(&self.state),
                    name,
                    self.interval,
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}

async fn poll_service(
    supervisor: Supervisor,
    state: Arc<LauncherState>,
    name: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(service = %name, "Poller stopped");
                    return;
                }
                continue;
            }
        }

        if state.is_initializing() {
            continue;
        }

        let liveness = match supervisor.check(&name).await {
            Ok(liveness) => liveness,
            Err(e) => {
                debug!(service = %name, error = %e, "Poller stopping, service not registered");
                return;
            }
        };

        if state.publish(&name, liveness) {
            info!(service = %name, %liveness, "Service status changed");
            state.release();
        }
    }
}
