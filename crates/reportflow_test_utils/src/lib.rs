//! Test scaffolding shared across the workspace.
//!
//! `RecordingSink` captures the ordered lifecycle stream so tests can assert
//! on exact event sequences; the file helpers simulate a tool writing a
//! report incrementally.

use reportflow_protocol::{Inspection, InspectionType, ReportSink, SinkError, SinkResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One observed sink callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    SuiteStarted(String),
    SuiteFinished(String),
    TestStarted(String),
    TestFailed {
        name: String,
        message: String,
        details: String,
    },
    TestFinished {
        name: String,
        duration: Duration,
    },
    InspectionType(InspectionType),
    Inspection(Inspection),
    Message(String),
    Warning(String),
    Error(String),
    TargetStarted(String),
    TargetFinished(String),
    BuildFailure(String),
}

impl SinkEvent {
    /// Lifecycle events are the ones the dedup/ordering guarantees apply to;
    /// diagnostics and target bracketing are noise for most assertions.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            SinkEvent::SuiteStarted(_)
                | SinkEvent::SuiteFinished(_)
                | SinkEvent::TestStarted(_)
                | SinkEvent::TestFailed { .. }
                | SinkEvent::TestFinished { .. }
                | SinkEvent::InspectionType(_)
                | SinkEvent::Inspection(_)
        )
    }

    /// Compact form used in sequence assertions, e.g. `suiteStarted(Math)`.
    pub fn label(&self) -> String {
        match self {
            SinkEvent::SuiteStarted(n) => format!("suiteStarted({n})"),
            SinkEvent::SuiteFinished(n) => format!("suiteFinished({n})"),
            SinkEvent::TestStarted(n) => format!("testStarted({n})"),
            SinkEvent::TestFailed { name, .. } => format!("testFailed({name})"),
            SinkEvent::TestFinished { name, .. } => format!("testFinished({name})"),
            SinkEvent::InspectionType(t) => format!("inspectionType({})", t.id),
            SinkEvent::Inspection(i) => format!("inspection({}:{})", i.file, i.line),
            SinkEvent::Message(_) => "message".to_string(),
            SinkEvent::Warning(_) => "warning".to_string(),
            SinkEvent::Error(_) => "error".to_string(),
            SinkEvent::TargetStarted(n) => format!("targetStarted({n})"),
            SinkEvent::TargetFinished(n) => format!("targetFinished({n})"),
            SinkEvent::BuildFailure(_) => "buildFailure".to_string(),
        }
    }
}

/// A [`ReportSink`] that records everything it receives.
///
/// With [`RecordingSink::failing_after`], lifecycle callbacks start returning
/// errors once the given number of lifecycle events has been recorded, which
/// is how tests exercise the broken-sink path.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    fail_lifecycle_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(n: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_lifecycle_after: Some(n),
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn lifecycle_events(&self) -> Vec<SinkEvent> {
        self.events()
            .into_iter()
            .filter(SinkEvent::is_lifecycle)
            .collect()
    }

    /// Labels of all lifecycle events, in order.
    pub fn lifecycle_labels(&self) -> Vec<String> {
        self.lifecycle_events()
            .iter()
            .map(SinkEvent::label)
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Warning(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn build_failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::BuildFailure(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record_lifecycle(&self, event: SinkEvent) -> SinkResult<()> {
        let mut events = self.events.lock().unwrap();
        if let Some(limit) = self.fail_lifecycle_after {
            let seen = events.iter().filter(|e| e.is_lifecycle()).count();
            if seen >= limit {
                return Err(SinkError::message("sink closed"));
            }
        }
        events.push(event);
        Ok(())
    }

    fn record(&self, event: SinkEvent) -> SinkResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl ReportSink for RecordingSink {
    fn suite_started(&self, name: &str) -> SinkResult<()> {
        self.record_lifecycle(SinkEvent::SuiteStarted(name.to_string()))
    }

    fn suite_finished(&self, name: &str) -> SinkResult<()> {
        self.record_lifecycle(SinkEvent::SuiteFinished(name.to_string()))
    }

    fn test_started(&self, name: &str) -> SinkResult<()> {
        self.record_lifecycle(SinkEvent::TestStarted(name.to_string()))
    }

    fn test_failed(&self, name: &str, message: &str, details: &str) -> SinkResult<()> {
        self.record_lifecycle(SinkEvent::TestFailed {
            name: name.to_string(),
            message: message.to_string(),
            details: details.to_string(),
        })
    }

    fn test_finished(&self, name: &str, duration: Duration) -> SinkResult<()> {
        self.record_lifecycle(SinkEvent::TestFinished {
            name: name.to_string(),
            duration,
        })
    }

    fn inspection_type(&self, ty: &InspectionType) -> SinkResult<()> {
        self.record_lifecycle(SinkEvent::InspectionType(ty.clone()))
    }

    fn inspection(&self, finding: &Inspection) -> SinkResult<()> {
        self.record_lifecycle(SinkEvent::Inspection(finding.clone()))
    }

    fn message(&self, text: &str) -> SinkResult<()> {
        self.record(SinkEvent::Message(text.to_string()))
    }

    fn warning(&self, text: &str) -> SinkResult<()> {
        self.record(SinkEvent::Warning(text.to_string()))
    }

    fn error(&self, text: &str) -> SinkResult<()> {
        self.record(SinkEvent::Error(text.to_string()))
    }

    fn target_started(&self, name: &str) -> SinkResult<()> {
        self.record(SinkEvent::TargetStarted(name.to_string()))
    }

    fn target_finished(&self, name: &str) -> SinkResult<()> {
        self.record(SinkEvent::TargetFinished(name.to_string()))
    }

    fn build_failure(&self, text: &str) -> SinkResult<()> {
        self.record(SinkEvent::BuildFailure(text.to_string()))
    }
}

/// Write a report file in one shot, creating parent directories.
pub fn write_report(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Append a tail to an existing report, simulating a tool still writing it.
pub fn append_report(path: &Path, tail: &str) -> anyhow::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(tail.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Poll `pred` until it returns true or `timeout` elapses.
pub fn eventually(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
