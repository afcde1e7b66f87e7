//! The pluggable format-parser contract.

use crate::sink::SinkError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What one parse attempt achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The document is not structurally closed yet. The value is the new
    /// total of processed units, `>=` the count passed in; equal means the
    /// file grew (or stalled) mid-unit and nothing new was parseable.
    Progress(u64),
    /// The document's root closing construct has been fully seen. The file
    /// is done and will never be offered to the parser again.
    Terminal,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sink rejected event: {0}")]
    Sink(#[from] SinkError),
}

impl ParseError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        ParseError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type ParseResult = Result<ParseOutcome, ParseError>;

/// One implementation per report grammar.
///
/// The processor invokes `parse` repeatedly against the same (growing) file,
/// passing back the unit count from the previous attempt. Implementations may
/// re-read the whole file but must never re-emit a unit already counted.
/// Parsers are driven from a single thread and are never given a second file
/// before the current one reached [`ParseOutcome::Terminal`] or was abandoned.
pub trait FormatParser: Send {
    /// Parse the unconsumed tail of `file`, emitting lifecycle events to the
    /// sink as a side effect.
    fn parse(&mut self, file: &Path, already_processed: u64) -> ParseResult;

    /// Force closure of any currently-open suite/test so the sink's
    /// "every started unit is eventually finished" invariant holds even when
    /// the source file is truncated forever. Best effort; sink errors during
    /// forced closure are swallowed.
    fn abnormal_end(&mut self);

    /// Final human-readable summary for one fully-processed file.
    fn log_report_totals(&mut self, file: &Path, verbose: bool);

    /// Aggregate summary across all files of this kind processed this run.
    fn log_parsing_totals(&mut self, verbose: bool);
}
