//! Reportflow - streams growing build-report files as lifecycle events.
//!
//! External tools write test and static-analysis reports incrementally while
//! a build is still running. This crate discovers those files, re-parses
//! them as they grow, and forwards their content to a reporting sink as
//! ordered suite/test/inspection lifecycle events, without ever emitting a
//! partial or duplicate event.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────┐      ┌───────────────────┐
//! │ DirectoryWatcher │      │ HandoffQueue │      │  ReportProcessor  │
//! │ (scan targets,   │─────▶│ (bounded,    │─────▶│ (one cursor at a  │─────▶ ReportSink
//! │  dedup, enqueue) │      │  FIFO)       │      │  time, retry/stall│
//! └──────────────────┘      └──────────────┘      │  engine → parser) │
//!                                                 └───────────────────┘
//! ```
//!
//! Two OS threads, one queue, one stop flag; the processor owns all cursor
//! state and parses a single file at a time, which is what guarantees
//! per-file event ordering.

pub mod config;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod watcher;

// Re-exports for convenience
pub use config::{PipelineConfig, TargetConfig};
pub use error::{PipelineError, Result};
pub use paths::{classify, PathMatcher, TargetShape};
pub use pipeline::{PipelineHandle, ReportPipeline, RunOutcome};
pub use processor::{ParserRegistry, ProcessorSettings, ReportProcessor};
pub use queue::{handoff_queue, NotificationReceiver, NotificationSender, ReportNotification};
pub use reportflow_protocol::{FormatParser, ParseOutcome, ReportKind, ReportSink};
pub use watcher::DirectoryWatcher;
