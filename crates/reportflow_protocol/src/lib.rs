//! Shared contracts for the report pipeline.
//!
//! This crate is the seam between the three moving parts of the system:
//!
//! - the **watcher/processor pipeline** (crate `reportflow`), which discovers
//!   report files while a build is running and drives parsing,
//! - the **format parsers** (crate `reportflow_parsers`), one per report
//!   grammar, which turn a growing file into lifecycle events,
//! - the **sink**, owned by the embedding build agent, which receives the
//!   ordered event stream.
//!
//! Nothing here does I/O. The pipeline and the parsers only ever talk to each
//! other through [`FormatParser`] and to the outside world through
//! [`ReportSink`], both injected at construction.

pub mod kind;
pub mod parser;
pub mod sink;

pub use kind::{ReportKind, UnknownReportKind};
pub use parser::{FormatParser, ParseError, ParseOutcome, ParseResult};
pub use sink::{Inspection, InspectionType, ReportSink, SinkError, SinkResult};
