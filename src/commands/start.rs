use super::{build_supervisor, load_settings};
use anyhow::{Context, Result};
use std::path::Path;

pub(crate) async fn cmd_start(config: Option<&Path>, service: &str) -> Result<()> {
    let supervisor = build_supervisor(load_settings(config)?);

    supervisor
        .start(service)
        .await
        .with_context(|| format!("Failed to start '{service}'"))?;

    println!("Launched {service}; run `launcher check {service}` to confirm it is up");
    Ok(())
}
