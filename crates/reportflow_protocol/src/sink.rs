//! The downstream lifecycle-event sink.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a sink callback.
///
/// A failing sink aborts processing of the current report file only; the
/// pipeline never retries against a sink that is itself broken.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    pub fn message(message: impl Into<String>) -> Self {
        SinkError::Message {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for SinkError {
    fn from(err: anyhow::Error) -> Self {
        SinkError::Source {
            message: err.to_string(),
            source: err,
        }
    }
}

/// A category of inspection finding, registered before (or alongside) the
/// first finding of that category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionType {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
}

/// One static-analysis finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// Id of the [`InspectionType`] this finding belongs to.
    pub type_id: String,
    /// Source file the finding refers to, as spelled in the report.
    pub file: String,
    pub line: u32,
    pub message: String,
    /// Grammar-native priority, 1 = most severe.
    pub priority: u32,
}

/// Ordered lifecycle callbacks consumed by the embedding build agent.
///
/// Guarantees the pipeline upholds towards implementations:
///
/// - for any file, `test_started(x)` precedes `test_finished(x)`, and
///   `suite_started(s)` precedes every event of a test nested in `s`,
///   followed eventually by the matching `suite_finished(s)`;
/// - no unit is ever delivered twice, even though the source file is parsed
///   many times while it grows;
/// - every started unit is eventually finished, even when the source file is
///   truncated forever (forced closure on abnormal end).
///
/// Implementations must be shareable across the two pipeline threads.
pub trait ReportSink: Send + Sync {
    fn suite_started(&self, name: &str) -> SinkResult<()>;
    fn suite_finished(&self, name: &str) -> SinkResult<()>;

    fn test_started(&self, name: &str) -> SinkResult<()>;
    fn test_failed(&self, name: &str, message: &str, details: &str) -> SinkResult<()>;
    fn test_finished(&self, name: &str, duration: Duration) -> SinkResult<()>;

    fn inspection_type(&self, ty: &InspectionType) -> SinkResult<()>;
    fn inspection(&self, finding: &Inspection) -> SinkResult<()>;

    /// Free-text diagnostics destined for the build log.
    fn message(&self, text: &str) -> SinkResult<()>;
    fn warning(&self, text: &str) -> SinkResult<()>;
    fn error(&self, text: &str) -> SinkResult<()>;

    /// Bracketing for grouped log sections (watch registrations, totals).
    fn target_started(&self, name: &str) -> SinkResult<()>;
    fn target_finished(&self, name: &str) -> SinkResult<()>;

    /// Raised at most once per run, when report processing failed badly
    /// enough that the build outcome should reflect it.
    fn build_failure(&self, text: &str) -> SinkResult<()>;
}
