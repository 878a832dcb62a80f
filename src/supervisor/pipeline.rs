//! Shell-style command pipelines.
//!
//! A [`Pipeline`] connects N external commands so that stage `i`'s stdout
//! feeds stage `i + 1`'s stdin, the way `a | b | c` would in a shell:
//!
//! ```text
//!  stage 0 ──stdout──▶ stage 1 ──stdout──▶ stage 2 ──stdout──▶ output buffer
//!     │                   │                   │
//!     └──────stderr───────┴───────stderr──────┴──────────────▶ error buffer
//! ```
//!
//! Execution happens in three phases. All pipes are created and assigned
//! before any process exists (wiring), every stage is spawned before any is
//! waited on (start), and stages are then reaped in start order (wait).
//! Waiting on a producer before its consumer runs would deadlock as soon as
//! the producer fills the pipe buffer.

use crate::error::{PipelineError, PipelineFailure};
use std::fmt;
use std::io::{ErrorKind, PipeReader, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// How long a failed pipeline waits for its buffers to close before giving up on them.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// One external command invocation within a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStage {
    program: String,
    args: Vec<String>,
    hide_window: bool,
}

impl CommandStage {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            hide_window: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Suppress the console window the tool would otherwise flash on Windows.
    pub fn hidden(mut self) -> Self {
        self.hide_window = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        #[cfg(windows)]
        if self.hide_window {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }
}

impl fmt::Display for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Buffers captured from a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    /// Everything the last stage wrote to stdout.
    pub stdout: Vec<u8>,
    /// Everything any stage wrote to stderr, interleaved as written.
    pub stderr: Vec<u8>,
    /// Exit status of each stage that was reaped, in start order.
    pub statuses: Vec<ExitStatus>,
}

impl PipelineOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Non-blank lines of the captured stdout.
    pub fn lines(&self) -> Vec<String> {
        self.stdout_text()
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// An ordered sequence of [`CommandStage`]s executed as one pipe.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<CommandStage>,
    timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(stages: impl IntoIterator<Item = CommandStage>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
            timeout: None,
        }
    }

    /// Bound the whole run; stages still alive at the deadline are killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stages(&self) -> &[CommandStage] {
        &self.stages
    }

    /// Run every stage and collect the last stage's stdout plus all stderr.
    ///
    /// Zero stages is a successful no-op. `Spawn`, `Wire` and `Timeout`
    /// failures kill whatever had already started before returning. A stage
    /// that exits unsuccessfully is reported as `Wait` only after every stage
    /// has been reaped, with the full buffers attached.
    pub async fn execute(&self) -> Result<PipelineOutput, PipelineFailure> {
        if self.stages.is_empty() {
            return Ok(PipelineOutput::default());
        }

        debug!(pipeline = %self, "Executing pipeline");

        let no_output = |e: PipelineError| PipelineFailure::new(e, PipelineOutput::default());
        let Wired {
            commands,
            out_reader,
            err_reader,
        } = self.wire().map_err(no_output)?;
        let mut stdout = Drain::spawn(out_reader).map_err(no_output)?;
        let mut stderr = Drain::spawn(err_reader).map_err(no_output)?;

        match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, run(commands, &mut stdout, &mut stderr)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(pipeline = %self, ?limit, "Pipeline timed out, stages killed");
                        let partial = collect_partial(&mut stdout, &mut stderr).await;
                        Err(PipelineFailure::new(PipelineError::Timeout(limit), partial))
                    }
                }
            }
            None => run(commands, &mut stdout, &mut stderr).await,
        }
    }

    /// Create every pipe and assign every stream before any process exists.
    fn wire(&self) -> Result<Wired, PipelineError> {
        let last = self.stages.len() - 1;
        let wire_err = |stage: usize| {
            move |e: std::io::Error| PipelineError::Wire {
                stage,
                reason: e.to_string(),
            }
        };

        let (err_reader, err_writer) = std::io::pipe().map_err(wire_err(0))?;
        let (out_reader, out_writer) = std::io::pipe().map_err(wire_err(last))?;
        let mut out_writer = Some(out_writer);

        let mut commands = Vec::with_capacity(self.stages.len());
        let mut upstream: Option<PipeReader> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let mut cmd = stage.command();
            cmd.kill_on_drop(true);

            match upstream.take() {
                Some(reader) => cmd.stdin(reader),
                None => cmd.stdin(Stdio::null()),
            };

            if index == last {
                let writer = out_writer.take().ok_or_else(|| PipelineError::Wire {
                    stage: index,
                    reason: "output buffer already assigned".to_string(),
                })?;
                cmd.stdout(writer);
            } else {
                let (reader, writer) = std::io::pipe().map_err(wire_err(index))?;
                cmd.stdout(writer);
                upstream = Some(reader);
            }

            cmd.stderr(err_writer.try_clone().map_err(wire_err(index))?);

            trace!(stage = index, command = %stage, "Stage wired");
            commands.push((index, stage.program.clone(), cmd));
        }

        // Only the stages may hold write ends, or the buffers never see EOF.
        drop(err_writer);

        Ok(Wired {
            commands,
            out_reader,
            err_reader,
        })
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}

/// Fully wired, not yet started pipeline.
struct Wired {
    commands: Vec<(usize, String, Command)>,
    out_reader: PipeReader,
    err_reader: PipeReader,
}

async fn run(
    commands: Vec<(usize, String, Command)>,
    stdout: &mut Drain,
    stderr: &mut Drain,
) -> Result<PipelineOutput, PipelineFailure> {
    let mut started = StartedStages::default();

    // Start phase. Each Command is dropped right after its spawn so the
    // parent does not keep pipe ends open.
    let mut spawn_error = None;
    for (index, program, mut cmd) in commands {
        match cmd.spawn() {
            Ok(child) => {
                debug!(stage = index, program = %program, pid = ?child.id(), "Stage started");
                started.push(index, program, child);
            }
            Err(source) => {
                warn!(stage = index, program = %program, error = %source, "Stage failed to spawn");
                spawn_error = Some(PipelineError::Spawn {
                    stage: index,
                    program,
                    source,
                });
                break;
            }
        }
    }

    if let Some(error) = spawn_error {
        started.kill_remaining();
        drop(started);
        let partial = collect_partial(stdout, stderr).await;
        return Err(PipelineFailure::new(error, partial));
    }

    // Wait phase, in start order.
    let mut statuses = Vec::with_capacity(started.len());
    let mut first_failure: Option<(usize, String, Option<i32>)> = None;
    for stage in started.iter_mut() {
        let status = match stage.child.wait().await {
            Ok(status) => status,
            Err(e) => {
                warn!(stage = stage.index, program = %stage.program, error = %e, "Failed to reap stage");
                let partial = PipelineOutput {
                    statuses,
                    ..PipelineOutput::default()
                };
                return Err(PipelineFailure::new(PipelineError::Io(e), partial));
            }
        };
        stage.waited = true;
        trace!(stage = stage.index, program = %stage.program, ?status, "Stage exited");
        if !status.success() && first_failure.is_none() {
            first_failure = Some((stage.index, stage.program.clone(), status.code()));
        }
        statuses.push(status);
    }
    drop(started);

    let output = PipelineOutput {
        stdout: stdout.finish().await,
        stderr: stderr.finish().await,
        statuses,
    };

    match first_failure {
        Some((stage, program, code)) => {
            debug!(stage, program = %program, ?code, "Pipeline stage exited unsuccessfully");
            let error = PipelineError::Wait {
                stage,
                program,
                code,
                stderr: output.stderr_text(),
            };
            Err(PipelineFailure::new(error, output))
        }
        None => Ok(output),
    }
}

/// Reader thread for one pipe. Bytes land in a shared buffer as they arrive,
/// so a run that is cut short can still hand back what was written.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: oneshot::Receiver<()>,
}

impl Drain {
    /// A plain thread rather than the blocking pool: a grandchild holding the
    /// pipe open must not keep the runtime from shutting down.
    fn spawn(mut reader: PipeReader) -> Result<Self, PipelineError> {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let (tx, done) = oneshot::channel();

        std::thread::Builder::new()
            .name("pipeline-drain".to_string())
            .spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            trace!(error = %e, "Pipe read ended with error");
                            break;
                        }
                    }
                }
                let _ = tx.send(());
            })?;

        Ok(Self { buf, done })
    }

    /// Everything written until the last writer closed the pipe.
    async fn finish(&mut self) -> Vec<u8> {
        if (&mut self.done).await.is_err() {
            warn!("Pipe reader thread ended without reporting");
        }
        self.take()
    }

    /// Whatever arrived, waiting at most `grace` for the pipe to close.
    async fn finish_within(&mut self, grace: Duration) -> Vec<u8> {
        if tokio::time::timeout(grace, &mut self.done).await.is_err() {
            trace!(?grace, "Pipe still held open, keeping what was read");
        }
        self.take()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.buf))
    }
}

fn lock(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Gather what the buffers hold after a failed start or a timeout. A
/// grandchild that inherited a pipe can keep it open indefinitely, so this is
/// bounded.
async fn collect_partial(stdout: &mut Drain, stderr: &mut Drain) -> PipelineOutput {
    PipelineOutput {
        stdout: stdout.finish_within(DRAIN_GRACE).await,
        stderr: stderr.finish_within(DRAIN_GRACE).await,
        statuses: Vec::new(),
    }
}

struct StartedStage {
    index: usize,
    program: String,
    child: Child,
    waited: bool,
}

/// Stages that were spawned by this run. Anything not yet reaped when this
/// goes out of scope is killed, whichever way the run ends.
#[derive(Default)]
struct StartedStages {
    stages: Vec<StartedStage>,
}

impl StartedStages {
    fn push(&mut self, index: usize, program: String, child: Child) {
        self.stages.push(StartedStage {
            index,
            program,
            child,
            waited: false,
        });
    }

    fn len(&self) -> usize {
        self.stages.len()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut StartedStage> {
        self.stages.iter_mut()
    }

    fn kill_remaining(&mut self) {
        for stage in self.stages.iter_mut().filter(|s| !s.waited) {
            match stage.child.start_kill() {
                Ok(()) => debug!(stage = stage.index, program = %stage.program, "Killed stage"),
                Err(e) => {
                    trace!(stage = stage.index, program = %stage.program, error = %e, "Stage already gone")
                }
            }
            stage.waited = true;
        }
    }
}

impl Drop for StartedStages {
    fn drop(&mut self) {
        self.kill_remaining();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn printf(text: &str) -> CommandStage {
        CommandStage::new("printf").arg(text)
    }

    fn grep(pattern: &str) -> CommandStage {
        CommandStage::new("grep").arg(pattern)
    }

    /// Live processes whose command line contains `needle`. Zombies show up
    /// as `[sleep] <defunct>` and never match.
    fn live_processes(needle: &str) -> Vec<String> {
        let out = std::process::Command::new("ps")
            .args(["-eo", "args="])
            .output()
            .expect("ps");
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }

    async fn assert_gone(needle: &str) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let left = live_processes(needle);
            if left.is_empty() {
                return;
            }
            assert!(Instant::now() < deadline, "still running: {left:?}");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn empty_pipeline_is_a_noop() {
        let output = Pipeline::new(Vec::new()).execute().await.expect("no-op");
        assert!(output.stdout.is_empty());
        assert!(output.stderr.is_empty());
        assert!(output.statuses.is_empty());
    }

    #[tokio::test]
    async fn single_stage_captures_stdout() {
        let output = Pipeline::new([printf("hello\n")]).execute().await.expect("printf");
        assert_eq!(output.stdout_text(), "hello\n");
        assert_eq!(output.statuses.len(), 1);
    }

    #[tokio::test]
    async fn filter_keeps_matching_lines() {
        let output = Pipeline::new([printf("a\nb\nc\n"), grep("b")])
            .execute()
            .await
            .expect("pipeline");
        assert_eq!(output.stdout_text(), "b\n");
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn stages_compose_left_to_right() {
        let output = Pipeline::new([
            printf("one\ntwo\nthree\n"),
            CommandStage::new("cat"),
            CommandStage::new("tr").args(["a-z", "A-Z"]),
            grep("T"),
        ])
        .execute()
        .await
        .expect("pipeline");
        assert_eq!(output.stdout_text(), "TWO\nTHREE\n");
        assert_eq!(output.lines(), vec!["TWO", "THREE"]);
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock() {
        let output = Pipeline::new([
            CommandStage::new("seq").args(["1", "200000"]),
            grep("9"),
            CommandStage::new("wc").arg("-l"),
        ])
        .with_timeout(Duration::from_secs(20))
        .execute()
        .await
        .expect("pipeline");
        let count: usize = output.stdout_text().trim().parse().expect("count");
        assert!(count > 0);
    }

    #[tokio::test]
    async fn stderr_of_every_stage_is_collected() {
        let output = Pipeline::new([
            CommandStage::new("sh").args(["-c", "echo first >&2; echo data"]),
            CommandStage::new("sh").args(["-c", "cat; echo second >&2"]),
        ])
        .execute()
        .await
        .expect("pipeline");
        assert_eq!(output.stdout_text(), "data\n");
        let stderr = output.stderr_text();
        assert!(stderr.contains("first"));
        assert!(stderr.contains("second"));
    }

    #[tokio::test]
    async fn no_match_is_a_wait_error_with_buffers() {
        let failure = Pipeline::new([printf("a\nb\n"), grep("zzz")])
            .execute()
            .await
            .expect_err("grep finds nothing");
        match &failure.error {
            PipelineError::Wait { stage, code, .. } => {
                assert_eq!(*stage, 1);
                assert_eq!(*code, Some(1));
            }
            other => panic!("expected Wait, got {other:?}"),
        }
        assert!(failure.error.stages_started());
        assert!(failure.partial.stdout.is_empty());
        assert_eq!(failure.partial.statuses.len(), 2);
    }

    #[tokio::test]
    async fn spawn_failure_stops_the_start_sequence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("third-stage-ran");

        let pipeline = Pipeline::new([
            CommandStage::new("sleep").arg("31.337"),
            CommandStage::new("launcher-test-no-such-binary"),
            CommandStage::new("touch").arg(marker.display().to_string()),
        ]);

        let started = Instant::now();
        let failure = tokio::time::timeout(Duration::from_secs(10), pipeline.execute())
            .await
            .expect("pipeline must not hang")
            .expect_err("second stage cannot spawn");

        assert!(started.elapsed() < Duration::from_secs(10));
        match failure.error {
            PipelineError::Spawn { stage, ref program, .. } => {
                assert_eq!(stage, 1);
                assert_eq!(program, "launcher-test-no-such-binary");
            }
            ref other => panic!("expected Spawn, got {other:?}"),
        }
        assert!(!marker.exists());
        assert_gone("sleep 31.337").await;
    }

    #[tokio::test]
    async fn timeout_kills_running_stages() {
        let started = Instant::now();
        let failure = Pipeline::new([
            CommandStage::new("sleep").arg("32.441"),
            CommandStage::new("cat"),
        ])
        .with_timeout(Duration::from_millis(300))
        .execute()
        .await
        .expect_err("sleep outlives the deadline");
        assert!(matches!(failure.error, PipelineError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_gone("sleep 32.441").await;
    }

    #[tokio::test]
    async fn timeout_keeps_output_written_so_far() {
        // The backgrounded sleep inherits stdout and outlives the killed shell.
        let started = Instant::now();
        let failure = Pipeline::new([CommandStage::new("sh")
            .arg("-c")
            .arg("echo partial; sleep 33.5 & wait")])
        .with_timeout(Duration::from_millis(300))
        .execute()
        .await
        .expect_err("shell outlives the deadline");

        let _ = std::process::Command::new("pkill")
            .args(["-f", "sleep 33.5"])
            .status();

        assert!(matches!(failure.error, PipelineError::Timeout(_)));
        assert_eq!(failure.partial.stdout_text(), "partial\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn display_reads_like_a_shell_pipe() {
        let pipeline = Pipeline::new([
            CommandStage::new("tasklist"),
            CommandStage::new("findstr").arg("GlntProxySvr").hidden(),
        ]);
        assert_eq!(pipeline.to_string(), "tasklist | findstr GlntProxySvr");
        assert_eq!(pipeline.stages().len(), 2);
        assert_eq!(pipeline.stages()[1].argv(), ["GlntProxySvr".to_string()]);
    }
}
