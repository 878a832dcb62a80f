use super::{build_supervisor, load_settings};
use anyhow::Result;
use std::path::Path;

/// Prints the status and returns whether the service is running.
pub(crate) async fn cmd_check(config: Option<&Path>, service: &str, strict: bool) -> Result<bool> {
    let supervisor = build_supervisor(load_settings(config)?);

    let liveness = if strict {
        supervisor.try_check(service).await?
    } else {
        supervisor.check(service).await?
    };

    println!("{service}: {liveness}");
    Ok(liveness.is_running())
}
