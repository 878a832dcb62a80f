//! Service supervision core
//!
//! Answers "is service X running?", starts it if not and stops it on demand.
//! Nothing here caches process state; every answer is re-derived from the OS.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  BackgroundVerifier │ Poller(s) │ ActionGate  │
//! ├──────────────────────────────────────────────┤
//! │                  Supervisor                   │
//! │   (check / start / stop per ServiceSpec)      │
//! ├───────────────────────┬──────────────────────┤
//! │ ProcessQuery          │ ProcessControl       │
//! │ (list | filter)       │ (terminate, launch)  │
//! ├───────────────────────┴──────────────────────┤
//! │                   Pipeline                    │
//! └──────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod control;
pub mod host;
pub mod instance;
pub mod pid_file;
pub mod pipeline;
pub mod poller;
pub mod query;
pub mod registry;
pub mod services;
pub mod state;
pub mod verifier;

pub use actions::{Action, ActionGate, ActionOutcome};
pub use host::{HostTools, ToolFlavor};
pub use pipeline::{CommandStage, Pipeline, PipelineOutput};
pub use poller::Poller;
pub use query::{MatchPolicy, ProcessFilter, ProcessQuery};
pub use registry::{Identification, ServiceRegistry, ServiceSpec};
pub use services::{Liveness, Supervisor};
pub use state::LauncherState;
pub use verifier::{BackgroundVerifier, VerifyOutcome, VerifyReport};
