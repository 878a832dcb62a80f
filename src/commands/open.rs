use super::{build_supervisor, load_settings};
use anyhow::{Context, Result};
use std::path::Path;

pub(crate) async fn cmd_open(config: Option<&Path>, tool: &str) -> Result<()> {
    let supervisor = build_supervisor(load_settings(config)?);

    supervisor
        .launch_tool(tool)
        .await
        .with_context(|| format!("Failed to open '{tool}'"))?;

    println!("Opened {tool}");
    Ok(())
}
