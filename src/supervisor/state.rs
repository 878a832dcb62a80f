//! State shared between the verifier, the pollers and whatever presents
//! service status to the user.

use super::services::Liveness;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::trace;

/// Last published liveness per service. Absent until its first poll.
pub type StatusBoard = BTreeMap<String, Liveness>;

/// Writers:
/// - `initializing`: set at construction, cleared once by the verifier.
/// - `busy`: set by [`try_begin_action`](Self::try_begin_action), cleared by
///   the poller that observes the resulting status change, or by the action
///   itself when it fails.
/// - the status board: pollers only.
#[derive(Debug)]
pub struct LauncherState {
    initializing: AtomicBool,
    busy: AtomicBool,
    board: watch::Sender<StatusBoard>,
}

impl LauncherState {
    pub fn new() -> Self {
        let (board, _) = watch::channel(StatusBoard::new());
        Self {
            initializing: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            board,
        }
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::Acquire)
    }

    pub fn finish_initializing(&self) {
        self.initializing.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the busy indicator. `false` means another action holds it.
    pub fn try_begin_action(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn status_of(&self, name: &str) -> Option<Liveness> {
        self.board.borrow().get(name).copied()
    }

    pub fn snapshot(&self) -> StatusBoard {
        self.board.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusBoard> {
        self.board.subscribe()
    }

    /// Record `liveness` for `name`; subscribers are only woken, and `true`
    /// only returned, when it differs from the previous value.
    pub fn publish(&self, name: &str, liveness: Liveness) -> bool {
        let changed = self.board.send_if_modified(|board| {
            match board.insert(name.to_string(), liveness) {
                Some(previous) => previous != liveness,
                None => true,
            }
        });
        if changed {
            trace!(service = %name, %liveness, "Status changed");
        }
        changed
    }
}

impl Default for LauncherState {
    fn default() -> Self {
        Self::new()
    }
}
