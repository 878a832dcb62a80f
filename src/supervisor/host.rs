//! The OS tools the supervisor drives: enumerate processes, filter lines,
//! terminate by image name or pid.

use super::pipeline::CommandStage;
use serde::{Deserialize, Serialize};

/// Which family of process tools to build stages for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFlavor {
    /// `tasklist` / `findstr` / `taskkill`
    Windows,
    /// `ps` / `grep` / `pkill` / `kill`
    Posix,
}

impl ToolFlavor {
    pub fn native() -> Self {
        if cfg!(windows) {
            ToolFlavor::Windows
        } else {
            ToolFlavor::Posix
        }
    }
}

/// Builds the [`CommandStage`]s for each host capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTools {
    flavor: ToolFlavor,
}

impl HostTools {
    pub fn new(flavor: ToolFlavor) -> Self {
        Self { flavor }
    }

    pub fn native() -> Self {
        Self::new(ToolFlavor::native())
    }

    pub fn flavor(&self) -> ToolFlavor {
        self.flavor
    }

    /// One line per process. With an image the Windows listing is narrowed to
    /// that image; the POSIX listing always covers the whole table.
    pub fn list_processes(&self, image: Option<&str>) -> CommandStage {
        match self.flavor {
            ToolFlavor::Windows => {
                let stage = CommandStage::new("tasklist").hidden();
                match image {
                    Some(image) => stage.args(["/FI".to_string(), format!("IMAGENAME eq {image}")]),
                    None => stage,
                }
            }
            ToolFlavor::Posix => CommandStage::new("ps").args(["-e", "-o", "pid=,comm="]),
        }
    }

    /// Pass through only the lines containing `needle` literally.
    pub fn filter_lines(&self, needle: &str) -> CommandStage {
        match self.flavor {
            ToolFlavor::Windows => CommandStage::new("findstr")
                .hidden()
                .args(["/L".to_string(), format!("/C:{needle}")]),
            ToolFlavor::Posix => CommandStage::new("grep").args(["-F", "-e", needle]),
        }
    }

    pub fn terminate_image(&self, image: &str) -> CommandStage {
        match self.flavor {
            ToolFlavor::Windows => CommandStage::new("taskkill")
                .hidden()
                .args(["/F", "/IM", image]),
            ToolFlavor::Posix => CommandStage::new("pkill").args(["-9", "-x", image]),
        }
    }

    pub fn terminate_pid(&self, pid: u32) -> CommandStage {
        match self.flavor {
            ToolFlavor::Windows => CommandStage::new("taskkill")
                .hidden()
                .args(["/F".to_string(), "/PID".to_string(), pid.to_string()]),
            ToolFlavor::Posix => CommandStage::new("kill").args(["-9".to_string(), pid.to_string()]),
        }
    }
}

impl Default for HostTools {
    fn default() -> Self {
        Self::native()
    }
}
