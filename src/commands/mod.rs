pub mod check;
pub mod config;
pub mod open;
pub mod start;
pub mod status;
pub mod stop;
pub mod verify;
pub mod watch;

use anyhow::{Context, Result};
use launcher::supervisor::{HostTools, Supervisor};
use launcher::user_config::{LauncherConfig, Settings};
use std::path::Path;
use std::sync::Arc;

pub(crate) fn load_config(path: Option<&Path>) -> Result<LauncherConfig> {
    match path {
        Some(path) => LauncherConfig::load_from(path),
        None => LauncherConfig::load(),
    }
}

pub(crate) fn load_settings(path: Option<&Path>) -> Result<Settings> {
    load_config(path)?
        .resolve()
        .context("Invalid launcher configuration")
}

pub(crate) fn build_supervisor(settings: Settings) -> Supervisor {
    Supervisor::system(
        Arc::new(settings.registry),
        HostTools::native(),
        settings.command_timeout,
    )
}
