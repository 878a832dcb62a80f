use super::{build_supervisor, load_settings};
use anyhow::{Context, Result};
use std::path::Path;

pub(crate) async fn cmd_stop(config: Option<&Path>, service: &str) -> Result<()> {
    let supervisor = build_supervisor(load_settings(config)?);

    supervisor
        .stop(service)
        .await
        .with_context(|| format!("Failed to stop '{service}'"))?;

    println!("Stopped {service}");
    Ok(())
}
