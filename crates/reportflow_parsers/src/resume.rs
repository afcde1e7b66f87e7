//! Cross-attempt bookkeeping for suite-shaped reports.
//!
//! A growing report is re-scanned from the start on every attempt. Completed
//! test cases are deduplicated by the processor-owned unit count; suite
//! open/close events are deduplicated here, by counting them in document
//! order. Because the file only ever grows, the Nth suite-open of one
//! snapshot is the Nth suite-open of every later snapshot, so a plain pair
//! of counters is a complete resume token.

use reportflow_protocol::{ReportSink, SinkResult};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Default)]
pub struct SuiteResume {
    file: Option<PathBuf>,
    /// suite_started events already emitted for the current file.
    opened: u64,
    /// suite_finished events already emitted for the current file.
    closed: u64,
    /// Suites started but not yet finished, innermost last.
    open_names: Vec<String>,
}

impl SuiteResume {
    /// Called at the top of every parse attempt; resets state when the
    /// parser has moved on to a different file.
    pub fn begin_attempt(&mut self, file: &Path) {
        if self.file.as_deref() != Some(file) {
            if let Some(stale) = &self.file {
                if !self.open_names.is_empty() {
                    warn!(
                        file = %stale.display(),
                        open_suites = self.open_names.len(),
                        "previous report left suites open"
                    );
                }
            }
            *self = SuiteResume {
                file: Some(file.to_path_buf()),
                ..SuiteResume::default()
            };
        }
    }

    /// Observe the `nth` suite-open of the current snapshot (1-based,
    /// document order). Emits `suite_started` only the first time this
    /// position is seen across attempts.
    pub fn suite_open(&mut self, nth: u64, name: &str, sink: &dyn ReportSink) -> SinkResult<()> {
        if nth > self.opened {
            sink.suite_started(name)?;
            self.opened += 1;
            self.open_names.push(name.to_string());
        }
        Ok(())
    }

    /// Observe the `nth` suite-close of the current snapshot.
    pub fn suite_close(&mut self, nth: u64, sink: &dyn ReportSink) -> SinkResult<()> {
        if nth > self.closed {
            if let Some(name) = self.open_names.pop() {
                sink.suite_finished(&name)?;
            }
            self.closed += 1;
        }
        Ok(())
    }

    /// Force-close every open suite, innermost first. Sink errors are
    /// swallowed: this runs when the file is already being abandoned.
    pub fn abnormal_end(&mut self, sink: &dyn ReportSink) {
        while let Some(name) = self.open_names.pop() {
            if let Err(err) = sink.suite_finished(&name) {
                warn!(suite = %name, error = %err, "sink rejected forced suite close");
            }
            self.closed += 1;
        }
    }

    /// The document closed cleanly; nothing to carry to the next file.
    pub fn finish_file(&mut self) {
        *self = SuiteResume::default();
    }

    pub fn has_open_suites(&self) -> bool {
        !self.open_names.is_empty()
    }
}
