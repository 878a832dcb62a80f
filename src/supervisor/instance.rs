use super::query::{MatchPolicy, ProcessFilter, ProcessQuery};
use crate::error::{LauncherError, Result};
use tracing::debug;

/// Refuse to run when another launcher already shows up in the process
/// table. Our own entry matches the marker too, hence `ExcludeSelf`.
pub async fn ensure_single_instance(query: &ProcessQuery, marker: &str) -> Result<()> {
    let filter = ProcessFilter::text(marker);
    let matches = query.matching(&filter).await?;

    let stderr = matches.stderr.trim();
    if !stderr.is_empty() {
        return Err(LauncherError::AlreadyRunning(format!(
            "could not verify that no other launcher is running: {stderr}"
        )));
    }

    debug!(marker = %marker, lines = matches.count(), "Instance check");
    if MatchPolicy::ExcludeSelf.is_found(matches.count()) {
        return Err(LauncherError::AlreadyRunning(format!(
            "another '{marker}' process is already running"
        )));
    }

    Ok(())
}
