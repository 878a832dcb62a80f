use super::services::{Liveness, Supervisor};
use super::state::LauncherState;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum VerifyOutcome {
    AlreadyRunning,
    Started,
    StartFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub services: Vec<(String, VerifyOutcome)>,
}

impl VerifyReport {
    pub fn started(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .filter(|(_, outcome)| *outcome == VerifyOutcome::Started)
            .map(|(name, _)| name.as_str())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.services.iter().filter_map(|(name, outcome)| match outcome {
            VerifyOutcome::StartFailed(reason) => Some((name.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

/// Single pass over the registry at startup that brings up whatever is down.
/// Not a retry loop: later corrections are the pollers' and the user's job.
pub struct BackgroundVerifier {
    supervisor: Supervisor,
    state: Option<Arc<LauncherState>>,
}

impl BackgroundVerifier {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            state: None,
        }
    }

    /// Clear the state's initializing flag once the pass is over.
    pub fn with_state(mut self, state: Arc<LauncherState>) -> Self {
        self.state = Some(state);
        self
    }

    pub async fn run(&self) -> VerifyReport {
        info!("Verifying services");
        let mut report = VerifyReport::default();

        for spec in self.supervisor.registry().services() {
            let name = spec.name.as_str();

            let outcome = match self.supervisor.check(name).await {
                Ok(Liveness::Running) => VerifyOutcome::AlreadyRunning,
                Ok(Liveness::Stopped) | Err(_) => match self.supervisor.start(name).await {
                    Ok(()) => {
                        info!(service = %name, "Started stopped service");
                        if let Some(delay) = spec.settle_delay {
                            info!(service = %name, ?delay, "Waiting for service to settle");
                            tokio::time::sleep(delay).await;
                        }
                        VerifyOutcome::Started
                    }
                    Err(e) => {
                        error!(service = %name, error = %e, "Failed to start service");
                        VerifyOutcome::StartFailed(e.to_string())
                    }
                },
            };

            report.services.push((name.to_string(), outcome));
        }

        if let Some(state) = &self.state {
            state.finish_initializing();
        }

        info!(
            started = report.started().count(),
            failed = report.failures().count(),
            "Service verification finished"
        );
        report
    }
}
