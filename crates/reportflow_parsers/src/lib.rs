//! Report grammars for the reportflow pipeline.
//!
//! One [`FormatParser`] implementation per report grammar. All of them share
//! the same resume discipline: re-read the whole file each attempt, count
//! completed units in document order, and only emit units beyond the count
//! the processor passes back in. Truncated input is never an error here;
//! it just means the unit the cut fell into is not parseable yet.

pub mod antjunit;
pub mod checkstyle;
pub mod nunit;
pub mod pmd;
pub mod resume;
pub mod tag;

pub use antjunit::JunitReportParser;
pub use checkstyle::CheckstyleReportParser;
pub use nunit::NunitReportParser;
pub use pmd::PmdReportParser;

use reportflow_protocol::{FormatParser, ReportKind, ReportSink};
use std::sync::Arc;

/// Look up the parser implementation for a report kind.
///
/// This is the whole dispatch story: a match, not a hierarchy. Kinds without
/// a shipped grammar (currently FindBugs) return `None` and are skipped by
/// the processor with a debug log.
pub fn parser_for(kind: ReportKind, sink: Arc<dyn ReportSink>) -> Option<Box<dyn FormatParser>> {
    match kind {
        ReportKind::Junit | ReportKind::Surefire => Some(Box::new(JunitReportParser::new(sink))),
        ReportKind::Nunit => Some(Box::new(NunitReportParser::new(sink))),
        ReportKind::Pmd => Some(Box::new(PmdReportParser::new(sink))),
        ReportKind::Checkstyle => Some(Box::new(CheckstyleReportParser::new(sink))),
        ReportKind::Findbugs => None,
    }
}
