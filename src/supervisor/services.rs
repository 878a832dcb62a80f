use super::control::{ProcessControl, SystemProcessControl};
use super::host::HostTools;
use super::pid_file::{read_pid_file, PidFileState};
use super::query::{MatchPolicy, ProcessFilter, ProcessQuery, ProcessTable, SystemProcessTable};
use super::registry::{Identification, ServiceRegistry, ServiceSpec};
use crate::error::{LauncherError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Whether a service is up, derived from the OS on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Running,
    Stopped,
}

impl Liveness {
    pub fn is_running(&self) -> bool {
        matches!(self, Liveness::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Running => "running",
            Liveness::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Check, start and stop for every registered service.
///
/// Holds no per-service state: every answer comes from the process table and
/// the pid files at the moment of the call, so concurrent callers never
/// interfere with each other.
#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<ServiceRegistry>,
    query: ProcessQuery,
    control: Arc<dyn ProcessControl>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        table: Arc<dyn ProcessTable>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            registry,
            query: ProcessQuery::new(table),
            control,
        }
    }

    /// Supervisor backed by the host's own process tools.
    pub fn system(registry: Arc<ServiceRegistry>, tools: HostTools, timeout: Duration) -> Self {
        Self::new(
            registry,
            Arc::new(SystemProcessTable::new(tools, timeout)),
            Arc::new(SystemProcessControl::new(tools, timeout)),
        )
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn query(&self) -> &ProcessQuery {
        &self.query
    }

    /// Liveness of `name`. Failures of the OS tools count as `Stopped` so a
    /// polling loop never sees an error; only an unknown name is one.
    pub async fn check(&self, name: &str) -> Result<Liveness> {
        let spec = self.registry.require(name)?;
        Ok(self.check_spec(spec).await)
    }

    /// Like [`check`](Self::check) but with tool failures surfaced.
    pub async fn try_check(&self, name: &str) -> Result<Liveness> {
        let spec = self.registry.require(name)?;
        self.probe(spec).await
    }

    async fn check_spec(&self, spec: &ServiceSpec) -> Liveness {
        match self.probe(spec).await {
            Ok(liveness) => liveness,
            Err(e) => {
                warn!(service = %spec.name, error = %e, "Liveness check failed, assuming stopped");
                Liveness::Stopped
            }
        }
    }

    async fn probe(&self, spec: &ServiceSpec) -> Result<Liveness> {
        let filter = match &spec.identification {
            Identification::ImageName { image } => ProcessFilter::text(image),
            Identification::PidFile { path, family } => match read_pid_file(path).await {
                PidFileState::Pid(pid) => ProcessFilter::pid_of(family, pid),
                PidFileState::Missing => {
                    debug!(service = %spec.name, "No pid file, service is stopped");
                    return Ok(Liveness::Stopped);
                }
                PidFileState::Invalid(content) => {
                    warn!(service = %spec.name, path = %path.display(), content = %content, "Pid file holds no pid, treating as stopped");
                    return Ok(Liveness::Stopped);
                }
            },
        };

        let found = self.query.exists(&filter, MatchPolicy::AnyLine).await?;
        let liveness = if found {
            Liveness::Running
        } else {
            Liveness::Stopped
        };
        debug!(service = %spec.name, %liveness, "Checked service");
        Ok(liveness)
    }

    /// Run the service's launcher. Returns once the launcher has; the service
    /// itself may still be coming up, so poll [`check`](Self::check).
    pub async fn start(&self, name: &str) -> Result<()> {
        let spec = self.registry.require(name)?;
        info!(service = %name, "Starting service");
        self.control.launch(&spec.name, &spec.launch.stage()).await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        let spec = self.registry.require(name)?;
        match &spec.identification {
            Identification::ImageName { image } => {
                info!(service = %name, image = %image, "Stopping service by image");
                self.control.terminate_image(image).await
            }
            Identification::PidFile { path, .. } => match read_pid_file(path).await {
                PidFileState::Pid(pid) => {
                    info!(service = %name, pid, "Stopping service by pid");
                    self.control.terminate_pid(pid).await
                }
                PidFileState::Missing => {
                    info!(service = %name, "No pid file, service already stopped");
                    Ok(())
                }
                PidFileState::Invalid(content) => {
                    warn!(service = %name, path = %path.display(), content = %content, "Pid file holds no pid, nothing to stop");
                    Ok(())
                }
            },
        }
    }

    /// Launch an unsupervised tool by name.
    pub async fn launch_tool(&self, name: &str) -> Result<()> {
        let tool = self
            .registry
            .tool(name)
            .ok_or_else(|| LauncherError::UnknownTool(name.to_string()))?;
        self.control.launch(&tool.name, &tool.launch.stage()).await
    }

    /// Check every service concurrently; results come back in registry order.
    pub async fn status_all(&self) -> Vec<(String, Liveness)> {
        let mut set = JoinSet::new();
        for (index, spec) in self.registry.services().iter().enumerate() {
            let supervisor = self.clone();
            let spec = spec.clone();
            set.spawn(async move {
                let liveness = supervisor.check_spec(&spec).await;
                (index, spec.name, liveness)
            });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => warn!(error = %e, "Status task failed"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, name, liveness)| (name, liveness))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::supervisor::control::tests::{Call, MockControl};
    use crate::supervisor::query::tests::MockTable;
    use crate::supervisor::registry::RegistryPaths;
    use std::path::Path;

    pub(crate) fn registry_in(pid_dir: &Path) -> Arc<ServiceRegistry> {
        let mut paths = RegistryPaths::new(pid_dir, "./cmd");
        paths.launch_program = "wscript.exe".into();
        paths.script_ext = "vbs".into();
        Arc::new(ServiceRegistry::builtin(&paths))
    }

    fn supervisor(
        pid_dir: &Path,
        table: Arc<MockTable>,
        control: Arc<MockControl>,
    ) -> Supervisor {
        Supervisor::new(registry_in(pid_dir), table, control)
    }

    const JAVA_4321: &str = "javaw.exe                     4321 Console                    1    310,112 K";
    const PROXY_1200: &str = "GlntProxySvr.exe              1200 Services                   0     40,220 K";

    #[tokio::test]
    async fn pid_file_missing_is_stopped_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(MockTable::with_lines([JAVA_4321]));
        let sup = supervisor(dir.path(), table.clone(), Arc::new(MockControl::default()));

        for name in ["gpms", "relay"] {
            assert_eq!(sup.try_check(name).await.unwrap(), Liveness::Stopped);
        }
        assert_eq!(table.query_count(), 0);
    }

    #[tokio::test]
    async fn pid_file_with_matching_process_is_running() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gpms.pid"), "4321").unwrap();
        let table = Arc::new(MockTable::with_lines([PROXY_1200, JAVA_4321]));
        let sup = supervisor(dir.path(), table, Arc::new(MockControl::default()));

        assert_eq!(sup.check("gpms").await.unwrap(), Liveness::Running);
        assert_eq!(sup.check("relay").await.unwrap(), Liveness::Stopped);
    }

    #[tokio::test]
    async fn stale_pid_file_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("relay.pid"), "43\n").unwrap();
        let table = Arc::new(MockTable::with_lines([JAVA_4321]));
        let sup = supervisor(dir.path(), table, Arc::new(MockControl::default()));

        assert_eq!(sup.check("relay").await.unwrap(), Liveness::Stopped);
    }

    #[tokio::test]
    async fn pid_of_another_image_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gpms.pid"), "1200").unwrap();
        let table = Arc::new(MockTable::with_lines([PROXY_1200]));
        let sup = supervisor(dir.path(), table, Arc::new(MockControl::default()));

        assert_eq!(sup.check("gpms").await.unwrap(), Liveness::Stopped);
    }

    #[tokio::test]
    async fn image_name_without_lines_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(MockTable::with_lines([JAVA_4321]));
        let sup = supervisor(dir.path(), table.clone(), Arc::new(MockControl::default()));

        assert_eq!(sup.check("ocr").await.unwrap(), Liveness::Stopped);

        table.set_lines([JAVA_4321, PROXY_1200]);
        assert_eq!(sup.check("ocr").await.unwrap(), Liveness::Running);
    }

    #[tokio::test]
    async fn tool_failure_is_downgraded_only_by_check() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(
            dir.path(),
            Arc::new(MockTable::failing()),
            Arc::new(MockControl::default()),
        );

        assert_eq!(sup.check("ocr").await.unwrap(), Liveness::Stopped);
        assert!(matches!(
            sup.try_check("ocr").await,
            Err(LauncherError::Pipeline(_))
        ));
    }

    #[tokio::test]
    async fn unknown_service_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(MockControl::default());
        let sup = supervisor(dir.path(), Arc::new(MockTable::default()), control.clone());

        assert!(matches!(sup.check("x").await, Err(LauncherError::UnknownService(_))));
        assert!(matches!(sup.start("x").await, Err(LauncherError::UnknownService(_))));
        assert!(matches!(sup.stop("x").await, Err(LauncherError::UnknownService(_))));
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_without_pid_file_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(MockControl::default());
        let sup = supervisor(dir.path(), Arc::new(MockTable::default()), control.clone());

        sup.stop("gpms").await.unwrap();
        sup.stop("relay").await.unwrap();
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_uses_the_identification_strategy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("relay.pid"), "777\r\n").unwrap();
        let control = Arc::new(MockControl::default());
        let sup = supervisor(dir.path(), Arc::new(MockTable::default()), control.clone());

        sup.stop("ocr").await.unwrap();
        sup.stop("relay").await.unwrap();
        assert_eq!(
            control.calls(),
            vec![
                Call::TerminateImage("GlntProxySvr.exe".into()),
                Call::TerminatePid(777)
            ]
        );
    }

    #[tokio::test]
    async fn start_passes_launcher_errors_through() {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(MockControl::failing_launch());
        let sup = supervisor(dir.path(), Arc::new(MockTable::default()), control.clone());

        let err = sup.start("ocr").await.expect_err("launch fails");
        assert!(matches!(err, LauncherError::Launch { .. }));
        assert_eq!(control.calls(), vec![Call::Launch("ocr".into())]);
    }

    #[tokio::test]
    async fn tools_are_launched_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let control = Arc::new(MockControl::default());
        let sup = supervisor(dir.path(), Arc::new(MockTable::default()), control.clone());

        sup.launch_tool("dabit").await.unwrap();
        assert!(matches!(
            sup.launch_tool("ocr").await,
            Err(LauncherError::UnknownTool(_))
        ));
        assert_eq!(control.calls(), vec![Call::Launch("dabit".into())]);
    }

    #[tokio::test]
    async fn repeated_checks_are_stable_and_side_effect_free() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gpms.pid"), "4321").unwrap();
        let control = Arc::new(MockControl::default());
        let table = Arc::new(MockTable::with_lines([JAVA_4321]));
        let sup = supervisor(dir.path(), table, control.clone());

        let before = std::fs::read_dir(dir.path()).unwrap().count();
        let first = sup.status_all().await;
        for _ in 0..5 {
            assert_eq!(sup.status_all().await, first);
        }
        let after = std::fs::read_dir(dir.path()).unwrap().count();

        assert_eq!(before, after);
        assert_eq!(std::fs::read_to_string(dir.path().join("gpms.pid")).unwrap(), "4321");
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn status_all_keeps_registry_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gpms.pid"), "4321").unwrap();
        let table = Arc::new(MockTable::with_lines([JAVA_4321, PROXY_1200]));
        let sup = supervisor(dir.path(), table, Arc::new(MockControl::default()));

        assert_eq!(
            sup.status_all().await,
            vec![
                ("ocr".to_string(), Liveness::Running),
                ("gpms".to_string(), Liveness::Running),
                ("relay".to_string(), Liveness::Stopped),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_against_independent_backends() {
        let mut handles = Vec::new();
        for i in 0..8u32 {
            handles.push(tokio::spawn(async move {
                let dir = tempfile::tempdir().unwrap();
                let pid = 5000 + i;
                let running = i % 2 == 0;
                std::fs::write(dir.path().join("gpms.pid"), pid.to_string()).unwrap();
                let line = if running {
                    format!("javaw.exe   {pid} Console   1   100,000 K")
                } else {
                    "javaw.exe   1 Console   1   100,000 K".to_string()
                };
                let sup = supervisor(
                    dir.path(),
                    Arc::new(MockTable::with_lines([line])),
                    Arc::new(MockControl::default()),
                );
                let liveness = sup.check("gpms").await.unwrap();
                (running, liveness)
            }));
        }

        for handle in handles {
            let (running, liveness) = handle.await.unwrap();
            assert_eq!(liveness.is_running(), running);
        }
    }

    #[test]
    fn liveness_text() {
        assert_eq!(Liveness::Running.to_string(), "running");
        assert_eq!(Liveness::Stopped.as_str(), "stopped");
        assert_eq!(
            serde_json::to_string(&Liveness::Running).unwrap(),
            "\"running\""
        );
    }
}
