use super::pid_file::pid_path;
use super::pipeline::CommandStage;
use crate::error::{LauncherError, Result};
use crate::user_config::{IdentifyBy, ServiceEntry, ToolEntry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Image name of the OCR proxy server.
const OCR_IMAGE: &str = "GlntProxySvr.exe";
/// Both Java services run under this image; only their pid tells them apart.
const JAVA_FAMILY: &str = "javaw.exe";
const GPMS_SETTLE: Duration = Duration::from_secs(5);

/// How a service is recognised in the process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identification {
    /// Any process with this image name is the service.
    ImageName { image: String },
    /// The service writes its own pid to `path`; the pid must show up under
    /// the `family` image.
    PidFile { path: PathBuf, family: String },
}

impl Identification {
    /// What `check` looks for, for display.
    pub fn target(&self) -> String {
        match self {
            Identification::ImageName { image } => image.clone(),
            Identification::PidFile { path, family } => {
                format!("{} ({})", path.display(), family)
            }
        }
    }
}

/// The external script that brings a service (or tool) up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn stage(&self) -> CommandStage {
        CommandStage::new(&self.program).hidden().args(&self.args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub name: String,
    pub identification: Identification,
    pub launch: LaunchSpec,
    /// Pause after starting this service before the verifier moves on.
    pub settle_delay: Option<Duration>,
}

/// A program that is launched on request but never supervised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub launch: LaunchSpec,
}

/// Where pid files and launcher scripts live and how scripts are run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths {
    pub pid_dir: PathBuf,
    pub script_dir: PathBuf,
    /// Interpreter the scripts are handed to (`wscript.exe`, `sh`).
    pub launch_program: String,
    /// Script file extension, without the dot.
    pub script_ext: String,
}

impl RegistryPaths {
    pub fn new(pid_dir: impl Into<PathBuf>, script_dir: impl Into<PathBuf>) -> Self {
        let (program, ext) = if cfg!(windows) {
            ("wscript.exe", "vbs")
        } else {
            ("sh", "sh")
        };
        Self {
            pid_dir: pid_dir.into(),
            script_dir: script_dir.into(),
            launch_program: program.to_string(),
            script_ext: ext.to_string(),
        }
    }

    /// `<launch program> <script dir>/<name>.<ext>`
    pub fn launch_for(&self, name: &str) -> LaunchSpec {
        self.launch_script(&self.script_dir.join(format!("{name}.{}", self.script_ext)))
    }

    fn launch_script(&self, script: &Path) -> LaunchSpec {
        LaunchSpec {
            program: self.launch_program.clone(),
            args: vec![script.display().to_string()],
        }
    }
}

/// The closed set of services (and tools) this launcher manages, in the
/// order the verifier walks them.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceSpec>,
    tools: Vec<ToolSpec>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ocr, gpms, relay plus the dabit and wiznet setup tools.
    pub fn builtin(paths: &RegistryPaths) -> Self {
        let mut registry = Self::new();

        registry.register(ServiceSpec {
            name: "ocr".to_string(),
            identification: Identification::ImageName {
                image: OCR_IMAGE.to_string(),
            },
            launch: paths.launch_for("ocr"),
            settle_delay: None,
        });

        for (name, settle_delay) in [("gpms", Some(GPMS_SETTLE)), ("relay", None)] {
            registry.register(ServiceSpec {
                name: name.to_string(),
                identification: Identification::PidFile {
                    path: pid_path(&paths.pid_dir, name),
                    family: JAVA_FAMILY.to_string(),
                },
                launch: paths.launch_for(name),
                settle_delay,
            });
        }

        for name in ["dabit", "wiznet"] {
            registry.register_tool(ToolSpec {
                name: name.to_string(),
                launch: paths.launch_for(name),
            });
        }

        registry
    }

    /// Builtins, with the configured lists replacing them when present.
    pub fn from_entries(
        paths: &RegistryPaths,
        services: &[ServiceEntry],
        tools: &[ToolEntry],
    ) -> Result<Self> {
        let builtin = Self::builtin(paths);
        if services.is_empty() && tools.is_empty() {
            return Ok(builtin);
        }

        let mut registry = Self::new();

        if services.is_empty() {
            registry.services = builtin.services;
        } else {
            for entry in services {
                registry.register(service_from_entry(paths, entry)?);
            }
        }

        if tools.is_empty() {
            registry.tools = builtin.tools;
        } else {
            for entry in tools {
                registry.register_tool(ToolSpec {
                    name: entry.name.clone(),
                    launch: match &entry.script {
                        Some(script) => paths.launch_script(script),
                        None => paths.launch_for(&entry.name),
                    },
                });
            }
        }

        Ok(registry)
    }

    /// Add or replace a service, keeping its original position on replace.
    pub fn register(&mut self, spec: ServiceSpec) {
        debug!(service = %spec.name, target = %spec.identification.target(), "Registered service");
        match self.services.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.services.push(spec),
        }
    }

    pub fn register_tool(&mut self, spec: ToolSpec) {
        match self.tools.iter_mut().find(|t| t.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.tools.push(spec),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&ServiceSpec> {
        self.get(name)
            .ok_or_else(|| LauncherError::UnknownService(name.to_string()))
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

fn service_from_entry(paths: &RegistryPaths, entry: &ServiceEntry) -> Result<ServiceSpec> {
    if entry.name.trim().is_empty() {
        return Err(LauncherError::Config("service entry without a name".into()));
    }
    if entry.target.trim().is_empty() {
        return Err(LauncherError::Config(format!(
            "service '{}' has an empty match target",
            entry.name
        )));
    }

    let identification = match entry.identify {
        IdentifyBy::Image => Identification::ImageName {
            image: entry.target.clone(),
        },
        IdentifyBy::PidFile => Identification::PidFile {
            path: entry
                .pid_file
                .clone()
                .unwrap_or_else(|| pid_path(&paths.pid_dir, &entry.name)),
            family: entry.target.clone(),
        },
    };

    Ok(ServiceSpec {
        name: entry.name.clone(),
        identification,
        launch: match &entry.script {
            Some(script) => paths.launch_script(script),
            None => paths.launch_for(&entry.name),
        },
        settle_delay: entry
            .settle_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    })
}
