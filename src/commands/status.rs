use super::{build_supervisor, load_settings};
use anyhow::{Context, Result};
use launcher::supervisor::Liveness;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct StatusRow {
    name: String,
    status: Liveness,
    target: String,
}

pub(crate) async fn cmd_status(config: Option<&Path>, json: bool) -> Result<()> {
    let supervisor = build_supervisor(load_settings(config)?);

    let rows: Vec<StatusRow> = supervisor
        .status_all()
        .await
        .into_iter()
        .map(|(name, status)| {
            let target = supervisor
                .registry()
                .get(&name)
                .map(|spec| spec.identification.target())
                .unwrap_or_default();
            StatusRow {
                name,
                status,
                target,
            }
        })
        .collect();

    if json {
        let out = serde_json::to_string_pretty(&rows).context("Failed to serialize status")?;
        println!("{out}");
        return Ok(());
    }

    let width = rows.iter().map(|row| row.name.len()).max().unwrap_or(0).max(7);
    println!("{:<width$}  {:<8}  TARGET", "SERVICE", "STATUS");
    for row in &rows {
        println!("{:<width$}  {:<8}  {}", row.name, row.status, row.target);
    }
    Ok(())
}
