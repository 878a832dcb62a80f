use crate::clienv;
use crate::supervisor::registry::{RegistryPaths, ServiceRegistry};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyBy {
    /// `target` is the process image name
    Image,
    /// `target` is the process family the pid must appear under
    PidFile,
}

/// One `[[services]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub identify: IdentifyBy,
    pub target: String,
    /// Defaults to `<pid_dir>/<name>.pid`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,
    /// Defaults to `<script_dir>/<name>.<ext>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_secs: Option<u64>,
}

/// One `[[tools]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LauncherConfig {
    /// Directory the services write their pid files into
    pub pid_dir: Option<PathBuf>,
    /// Directory holding one launcher script per service
    pub script_dir: Option<PathBuf>,
    /// Program the scripts are run with (e.g. "wscript.exe")
    pub launch_program: Option<String>,
    /// Script extension without the dot (e.g. "vbs")
    pub script_ext: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub command_timeout_secs: Option<u64>,
    /// Replaces the built-in service list when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceEntry>,
    /// Replaces the built-in tool list when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolEntry>,
}

impl LauncherConfig {
    /// $LAUNCHER_CONFIG_DIR/launcher.toml or ~/.config/launcher/launcher.toml
    pub fn config_path() -> PathBuf {
        clienv::config_dir().join("launcher.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading launcher config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        tracing::trace!(
            services = config.services.len(),
            tools = config.tools.len(),
            "Launcher config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "Saving launcher config");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        tracing::trace!("Launcher config saved");
        Ok(())
    }

    /// Resolve env var > config file > built-in default.
    pub fn resolve(&self) -> Result<Settings> {
        let mut paths = RegistryPaths::new(
            clienv::pid_dir_override()
                .or_else(|| self.pid_dir.clone())
                .unwrap_or_else(clienv::default_pid_dir),
            clienv::script_dir_override()
                .or_else(|| self.script_dir.clone())
                .unwrap_or_else(clienv::default_script_dir),
        );
        if let Some(program) = &self.launch_program {
            paths.launch_program = program.clone();
        }
        if let Some(ext) = &self.script_ext {
            paths.script_ext = ext.trim_start_matches('.').to_string();
        }

        let poll_interval = clienv::poll_interval_override()
            .or_else(|| {
                self.poll_interval_ms
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis)
            })
            .unwrap_or(clienv::DEFAULT_POLL_INTERVAL);

        let command_timeout = clienv::command_timeout_override()
            .or_else(|| {
                self.command_timeout_secs
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
            })
            .unwrap_or(clienv::DEFAULT_COMMAND_TIMEOUT);

        let registry = ServiceRegistry::from_entries(&paths, &self.services, &self.tools)?;

        Ok(Settings {
            paths,
            poll_interval,
            command_timeout,
            registry,
        })
    }

    /// The built-in services and tools written out as config entries.
    pub fn with_builtin_entries() -> Self {
        let services = vec![
            ServiceEntry {
                name: "ocr".into(),
                identify: IdentifyBy::Image,
                target: "GlntProxySvr.exe".into(),
                pid_file: None,
                script: None,
                settle_secs: None,
            },
            ServiceEntry {
                name: "gpms".into(),
                identify: IdentifyBy::PidFile,
                target: "javaw.exe".into(),
                pid_file: None,
                script: None,
                settle_secs: Some(5),
            },
            ServiceEntry {
                name: "relay".into(),
                identify: IdentifyBy::PidFile,
                target: "javaw.exe".into(),
                pid_file: None,
                script: None,
                settle_secs: None,
            },
        ];
        let tools = ["dabit", "wiznet"]
            .into_iter()
            .map(|name| ToolEntry {
                name: name.into(),
                script: None,
            })
            .collect();

        Self {
            poll_interval_ms: Some(clienv::DEFAULT_POLL_INTERVAL.as_millis() as u64),
            command_timeout_secs: Some(clienv::DEFAULT_COMMAND_TIMEOUT.as_secs()),
            services,
            tools,
            ..Self::default()
        }
    }
}

/// Effective settings after every layer has been applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: RegistryPaths,
    pub poll_interval: Duration,
    pub command_timeout: Duration,
    pub registry: ServiceRegistry,
}
