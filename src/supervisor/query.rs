//! Existence questions against the live process table.
//!
//! A query is the two-stage pipeline `list processes | filter by text`
//! followed by a count of the surviving lines. How many lines mean "found" is
//! not uniform across callers, so every call site passes a [`MatchPolicy`].

use super::host::HostTools;
use super::pipeline::Pipeline;
use crate::error::{PipelineError, PipelineFailure};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Position of the text filter in the query pipeline.
const FILTER_STAGE: usize = 1;

/// How many matching lines count as "found".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// One or more lines. Used when checking some other program.
    AnyLine,
    /// More than one line: the querying program's own entry is discounted.
    ExcludeSelf,
}

impl MatchPolicy {
    pub fn is_found(self, lines: usize) -> bool {
        match self {
            MatchPolicy::AnyLine => lines >= 1,
            MatchPolicy::ExcludeSelf => lines > 1,
        }
    }
}

/// What to look for in the process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFilter {
    /// Process image the line must belong to, if any.
    pub image: Option<String>,
    /// Text the line must contain.
    pub needle: String,
}

impl ProcessFilter {
    /// Lines containing `needle` anywhere.
    pub fn text(needle: impl Into<String>) -> Self {
        Self {
            image: None,
            needle: needle.into(),
        }
    }

    /// Lines naming `image` that carry `pid` as a column of their own.
    pub fn pid_of(image: impl Into<String>, pid: u32) -> Self {
        Self {
            image: Some(image.into()),
            needle: pid.to_string(),
        }
    }

    /// Re-check a line the filter stage let through. The text filter is a
    /// plain substring match, so `43` also passes `4321`; with an image the
    /// needle has to be a whitespace-delimited token.
    pub fn matches(&self, line: &str) -> bool {
        match &self.image {
            None => line.contains(&self.needle),
            Some(image) => {
                let lower = line.to_ascii_lowercase();
                lower.contains(&image.to_ascii_lowercase())
                    && line.split_whitespace().any(|token| token == self.needle)
            }
        }
    }
}

/// Lines of the process table that passed a [`ProcessFilter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessMatches {
    pub lines: Vec<String>,
    /// Anything the listing or filter tools wrote to stderr.
    pub stderr: String,
}

impl ProcessMatches {
    pub fn count(&self) -> usize {
        self.lines.len()
    }
}

/// Source of process listings.
#[async_trait]
pub trait ProcessTable: Send + Sync {
    async fn matching(&self, filter: &ProcessFilter) -> Result<ProcessMatches, PipelineError>;
}

/// The real process table, read through the host's listing and filter tools.
#[derive(Debug, Clone)]
pub struct SystemProcessTable {
    tools: HostTools,
    timeout: Duration,
}

impl SystemProcessTable {
    pub fn new(tools: HostTools, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    fn pipeline(&self, filter: &ProcessFilter) -> Pipeline {
        Pipeline::new([
            self.tools.list_processes(filter.image.as_deref()),
            self.tools.filter_lines(&filter.needle),
        ])
        .with_timeout(self.timeout)
    }
}

#[async_trait]
impl ProcessTable for SystemProcessTable {
    async fn matching(&self, filter: &ProcessFilter) -> Result<ProcessMatches, PipelineError> {
        let pipeline = self.pipeline(filter);

        let output = match pipeline.execute().await {
            Ok(output) => output,
            // The filter ran and found nothing. Only a stage that never
            // started (or the listing itself failing) is a real fault.
            Err(PipelineFailure {
                error: PipelineError::Wait { stage, code, .. },
                partial,
            }) if stage == FILTER_STAGE => {
                trace!(pipeline = %pipeline, ?code, "Filter stage matched nothing");
                partial
            }
            Err(failure) => return Err(failure.error),
        };

        let lines: Vec<String> = output
            .lines()
            .into_iter()
            .filter(|line| filter.matches(line))
            .collect();

        debug!(pipeline = %pipeline, matches = lines.len(), "Process query finished");

        Ok(ProcessMatches {
            lines,
            stderr: output.stderr_text(),
        })
    }
}

/// `exists(pattern)` over a [`ProcessTable`].
#[derive(Clone)]
pub struct ProcessQuery {
    table: Arc<dyn ProcessTable>,
}

impl ProcessQuery {
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self { table }
    }

    pub async fn matching(&self, filter: &ProcessFilter) -> Result<ProcessMatches, PipelineError> {
        self.table.matching(filter).await
    }

    pub async fn exists(
        &self,
        filter: &ProcessFilter,
        policy: MatchPolicy,
    ) -> Result<bool, PipelineError> {
        let matches = self.table.matching(filter).await?;
        let found = policy.is_found(matches.count());
        trace!(needle = %filter.needle, image = ?filter.image, ?policy, lines = matches.count(), found, "Process exists?");
        Ok(found)
    }
}
