use crate::supervisor::pipeline::PipelineOutput;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single [`Pipeline`](crate::supervisor::pipeline::Pipeline) execution.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The stage's process could not be created (e.g. executable not found).
    #[error("stage {stage} ({program}) could not be spawned: {source}")]
    Spawn {
        stage: usize,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Connecting a stage's output to the next stage's input failed.
    #[error("stage {stage} could not be wired: {reason}")]
    Wire { stage: usize, reason: String },

    /// A stage ran and exited unsuccessfully.
    #[error("stage {stage} ({program}) exited with {}", describe_code(.code))]
    Wait {
        stage: usize,
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("pipeline did not finish within {0:?}")]
    Timeout(Duration),

    #[error("pipeline io: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether every stage started; only `Wait` failures qualify.
    pub fn stages_started(&self) -> bool {
        matches!(self, Self::Wait { .. })
    }

    /// Index of the stage the error belongs to, if any.
    pub fn stage(&self) -> Option<usize> {
        match self {
            Self::Spawn { stage, .. } | Self::Wire { stage, .. } | Self::Wait { stage, .. } => {
                Some(*stage)
            }
            Self::Timeout(_) | Self::Io(_) => None,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// A pipeline error together with whatever output had been buffered when it occurred.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct PipelineFailure {
    #[source]
    pub error: PipelineError,
    pub partial: PipelineOutput,
}

impl PipelineFailure {
    pub fn new(error: PipelineError, partial: PipelineOutput) -> Self {
        Self { error, partial }
    }
}

impl From<PipelineFailure> for PipelineError {
    fn from(failure: PipelineFailure) -> Self {
        failure.error
    }
}

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("launcher for '{name}' failed: {reason}")]
    Launch { name: String, reason: String },

    #[error("could not terminate '{target}': {reason}")]
    Terminate { target: String, reason: String },

    #[error("{0}")]
    AlreadyRunning(String),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LauncherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_error_reports_exit_code() {
        let err = PipelineError::Wait {
            stage: 1,
            program: "findstr".into(),
            code: Some(1),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "stage 1 (findstr) exited with exit code 1");
        assert!(err.stages_started());
        assert_eq!(err.stage(), Some(1));
    }

    #[test]
    fn spawn_error_is_not_started() {
        let err = PipelineError::Spawn {
            stage: 0,
            program: "tasklist".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!err.stages_started());
        assert!(err.to_string().starts_with("stage 0 (tasklist) could not be spawned"));
    }

    #[test]
    fn failure_converts_into_its_error() {
        let failure = PipelineFailure::new(
            PipelineError::Timeout(Duration::from_secs(3)),
            PipelineOutput::default(),
        );
        let err: PipelineError = failure.into();
        assert!(matches!(err, PipelineError::Timeout(d) if d == Duration::from_secs(3)));
    }
}
