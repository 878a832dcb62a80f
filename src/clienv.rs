use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    LauncherConfigDir,
    LauncherPidDir,
    LauncherScriptDir,
    LauncherPollIntervalMs,
    LauncherCommandTimeoutSecs,
    LauncherInstanceMarker,
}

impl EnvVar {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvVar::LauncherConfigDir => "LAUNCHER_CONFIG_DIR",
            EnvVar::LauncherPidDir => "LAUNCHER_PID_DIR",
            EnvVar::LauncherScriptDir => "LAUNCHER_SCRIPT_DIR",
            EnvVar::LauncherPollIntervalMs => "LAUNCHER_POLL_INTERVAL_MS",
            EnvVar::LauncherCommandTimeoutSecs => "LAUNCHER_COMMAND_TIMEOUT_SECS",
            EnvVar::LauncherInstanceMarker => "LAUNCHER_INSTANCE_MARKER",
        }
    }
}

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const LAUNCHER_SUBDIR: &str = "launcher";
/// Where the managed services drop their pid files.
const DEFAULT_PID_DIR: &str = "/tmp";
const DEFAULT_SCRIPT_DIR: &str = "./cmd";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_INSTANCE_MARKER: &str = "launcher";

/// Non-empty value of an environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(var: EnvVar) -> Option<T> {
    let raw = env_opt(var.as_str())?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = var.as_str(), value = %raw, "Ignoring unparsable env var");
            None
        }
    }
}

/// Launcher config directory ($LAUNCHER_CONFIG_DIR or ~/.config/launcher)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(EnvVar::LauncherConfigDir.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(LAUNCHER_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Pid file directory override ($LAUNCHER_PID_DIR)
pub fn pid_dir_override() -> Option<PathBuf> {
    let val = env_opt(EnvVar::LauncherPidDir.as_str()).map(PathBuf::from);
    tracing::trace!(value = ?val, "LAUNCHER_PID_DIR env var");
    val
}

pub fn default_pid_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PID_DIR)
}

/// Launcher script directory override ($LAUNCHER_SCRIPT_DIR)
pub fn script_dir_override() -> Option<PathBuf> {
    let val = env_opt(EnvVar::LauncherScriptDir.as_str()).map(PathBuf::from);
    tracing::trace!(value = ?val, "LAUNCHER_SCRIPT_DIR env var");
    val
}

pub fn default_script_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SCRIPT_DIR)
}

/// Poll interval override ($LAUNCHER_POLL_INTERVAL_MS)
pub fn poll_interval_override() -> Option<Duration> {
    let val = env_parse::<u64>(EnvVar::LauncherPollIntervalMs)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);
    tracing::trace!(value = ?val, "LAUNCHER_POLL_INTERVAL_MS env var");
    val
}

/// External command timeout override ($LAUNCHER_COMMAND_TIMEOUT_SECS)
pub fn command_timeout_override() -> Option<Duration> {
    let val = env_parse::<u64>(EnvVar::LauncherCommandTimeoutSecs)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);
    tracing::trace!(value = ?val, "LAUNCHER_COMMAND_TIMEOUT_SECS env var");
    val
}

/// Text that identifies a launcher process in the process table
/// ($LAUNCHER_INSTANCE_MARKER or the executable's file stem)
pub fn instance_marker() -> String {
    let marker = env_opt(EnvVar::LauncherInstanceMarker.as_str())
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        })
        .unwrap_or_else(|| FALLBACK_INSTANCE_MARKER.to_string());
    tracing::trace!(marker = %marker, "Instance marker");
    marker
}
