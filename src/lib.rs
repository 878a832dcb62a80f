pub mod clienv;
pub mod error;
pub mod logging;
pub mod supervisor;
pub mod user_config;

pub use error::{LauncherError, PipelineError, Result};
pub use supervisor::{Liveness, Supervisor};
pub use user_config::{LauncherConfig, Settings};
