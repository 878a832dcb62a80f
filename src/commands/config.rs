use super::load_config;
use anyhow::{Context, Result};
use launcher::user_config::LauncherConfig;
use std::path::Path;

pub(crate) fn cmd_config(path: Option<&Path>, init: bool) -> Result<()> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(LauncherConfig::config_path);

    if init {
        if config_path.exists() {
            anyhow::bail!("{} already exists", config_path.display());
        }
        LauncherConfig::with_builtin_entries().save_to(&config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let settings = load_config(path)?
        .resolve()
        .context("Invalid launcher configuration")?;

    println!("Config file:     {}", config_path.display());
    println!("Pid directory:   {}", settings.paths.pid_dir.display());
    println!("Script dir:      {}", settings.paths.script_dir.display());
    println!(
        "Launch program:  {} (*.{})",
        settings.paths.launch_program, settings.paths.script_ext
    );
    println!("Poll interval:   {:?}", settings.poll_interval);
    println!("Command timeout: {:?}", settings.command_timeout);
    println!();
    println!("Services:");
    for spec in settings.registry.services() {
        let settle = spec
            .settle_delay
            .map(|d| format!(", settles {}s", d.as_secs()))
            .unwrap_or_default();
        println!("  {:<8} {}{settle}", spec.name, spec.identification.target());
    }
    println!("Tools:");
    for tool in settings.registry.tools() {
        println!("  {:<8} {}", tool.name, tool.launch.stage());
    }
    Ok(())
}
