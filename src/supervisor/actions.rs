use super::services::{Liveness, Supervisor};
use super::state::LauncherState;
use crate::error::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    /// The status that makes this action pointless.
    fn target(self) -> Liveness {
        match self {
            Action::Start => Liveness::Running,
            Action::Stop => Liveness::Stopped,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Start => "start",
            Action::Stop => "stop",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The service already shows the status the action would produce.
    AlreadyThere,
    /// Another action is still waiting for its status change.
    Busy,
    /// Sent to the supervisor; busy stays set until a poller sees the change.
    Issued,
}

/// User-initiated start/stop, serialised through the shared busy indicator.
#[derive(Clone)]
pub struct ActionGate {
    supervisor: Supervisor,
    state: Arc<LauncherState>,
}

impl ActionGate {
    pub fn new(supervisor: Supervisor, state: Arc<LauncherState>) -> Self {
        Self { supervisor, state }
    }

    pub async fn request(&self, action: Action, name: &str) -> Result<ActionOutcome> {
        self.supervisor.registry().require(name)?;

        if self.state.status_of(name) == Some(action.target()) {
            info!(service = %name, %action, "Ignoring request, already {}", action.target());
            return Ok(ActionOutcome::AlreadyThere);
        }

        if !self.state.try_begin_action() {
            info!(service = %name, %action, "Ignoring request, another action is in progress");
            return Ok(ActionOutcome::Busy);
        }

        let result = match action {
            Action::Start => self.supervisor.start(name).await,
            Action::Stop => self.supervisor.stop(name).await,
        };

        match result {
            Ok(()) => Ok(ActionOutcome::Issued),
            Err(e) => {
                warn!(service = %name, %action, error = %e, "Action failed");
                self.state.release();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LauncherError;
    use crate::supervisor::control::tests::{Call, MockControl};
    use crate::supervisor::query::tests::MockTable;
    use crate::supervisor::services::tests::registry_in;

    fn gate(dir: &std::path::Path, control: Arc<MockControl>) -> (ActionGate, Arc<LauncherState>) {
        let supervisor = Supervisor::new(registry_in(dir), Arc::new(MockTable::default()), control);
        let state = Arc::new(LauncherState::new());
        (ActionGate::new(supervisor, Arc::clone(&state)), state)
    }

    #[tokio::test]
    async fn redundant_requests_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(MockControl::default());
        let (gate, state) = gate(dir.path(), control.clone());

        state.publish("ocr", Liveness::Running);
        assert_eq!(
            gate.request(Action::Start, "ocr").await.unwrap(),
            ActionOutcome::AlreadyThere
        );
        assert!(control.calls().is_empty());
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn second_action_waits_for_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(MockControl::default());
        let (gate, state) = gate(dir.path(), control.clone());

        state.publish("ocr", Liveness::Running);
        assert_eq!(gate.request(Action::Stop, "ocr").await.unwrap(), ActionOutcome::Issued);
        assert!(state.is_busy());
        assert_eq!(gate.request(Action::Start, "gpms").await.unwrap(), ActionOutcome::Busy);
        assert_eq!(control.calls(), vec![Call::TerminateImage("GlntProxySvr.exe".into())]);

        // a poller seeing the change frees the gate
        state.publish("ocr", Liveness::Stopped);
        state.release();
        assert_eq!(gate.request(Action::Start, "gpms").await.unwrap(), ActionOutcome::Issued);
    }

    #[tokio::test]
    async fn failed_action_releases_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, state) = gate(dir.path(), Arc::new(MockControl::failing_launch()));

        let err = gate.request(Action::Start, "relay").await.expect_err("launch fails");
        assert!(matches!(err, LauncherError::Launch { .. }));
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn unknown_service_does_not_take_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, state) = gate(dir.path(), Arc::new(MockControl::default()));

        assert!(matches!(
            gate.request(Action::Start, "nope").await,
            Err(LauncherError::UnknownService(_))
        ));
        assert!(!state.is_busy());
    }
}
