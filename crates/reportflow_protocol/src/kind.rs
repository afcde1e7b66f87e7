//! The report type registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named report grammar understood by the pipeline.
///
/// Test-style kinds stream suite/test lifecycle events; inspection-style
/// kinds stream categorized findings. The two families feed different
/// downstream state, which is why at most one inspection kind may be watched
/// per run (see the watcher's conflict rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Ant JUnit task XML output.
    Junit,
    /// Maven Surefire output, same grammar as Ant JUnit.
    Surefire,
    /// NUnit `test-results` XML.
    Nunit,
    /// FindBugs analysis output.
    Findbugs,
    /// PMD analysis output.
    Pmd,
    /// Checkstyle analysis output.
    Checkstyle,
}

impl ReportKind {
    pub const ALL: &'static [ReportKind] = &[
        ReportKind::Junit,
        ReportKind::Surefire,
        ReportKind::Nunit,
        ReportKind::Findbugs,
        ReportKind::Pmd,
        ReportKind::Checkstyle,
    ];

    /// Human-readable name used in log output.
    pub fn display_name(&self) -> &'static str {
        match self {
            ReportKind::Junit => "Ant JUnit",
            ReportKind::Surefire => "Surefire",
            ReportKind::Nunit => "NUnit",
            ReportKind::Findbugs => "FindBugs",
            ReportKind::Pmd => "PMD",
            ReportKind::Checkstyle => "Checkstyle",
        }
    }

    /// The identifier used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Junit => "junit",
            ReportKind::Surefire => "surefire",
            ReportKind::Nunit => "nunit",
            ReportKind::Findbugs => "findbugs",
            ReportKind::Pmd => "pmd",
            ReportKind::Checkstyle => "checkstyle",
        }
    }

    /// Inspection-style kinds report categorized findings rather than test
    /// lifecycles. Two different inspection producers cannot share one sink.
    pub fn is_inspection(&self) -> bool {
        matches!(
            self,
            ReportKind::Findbugs | ReportKind::Pmd | ReportKind::Checkstyle
        )
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = UnknownReportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "junit" => Ok(ReportKind::Junit),
            "surefire" => Ok(ReportKind::Surefire),
            "nunit" => Ok(ReportKind::Nunit),
            "findbugs" => Ok(ReportKind::Findbugs),
            "pmd" => Ok(ReportKind::Pmd),
            "checkstyle" => Ok(ReportKind::Checkstyle),
            other => Err(UnknownReportKind(other.to_string())),
        }
    }
}

/// Returned when a configured type string matches no known grammar.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown report type: {0}")]
pub struct UnknownReportKind(pub String);
