//! PMD static-analysis report grammar.
//!
//! Root is `<pmd>`; `<file name="…">` elements wrap `<violation>` findings.
//! The progress unit is a completed violation. Each distinct rule is
//! registered with the sink once per run, the first time a finding of that
//! rule is emitted.

use crate::tag::{text_content, TagKind, TagScanner};
use reportflow_protocol::{
    FormatParser, Inspection, InspectionType, ParseError, ParseOutcome, ParseResult, ReportSink,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

struct PendingViolation {
    rule: String,
    ruleset: String,
    line: u32,
    priority: u32,
    body_start: usize,
}

pub struct PmdReportParser {
    sink: Arc<dyn ReportSink>,
    registered_rules: HashSet<String>,
    current_file: Option<PathBuf>,
    current_findings: u64,
    run_files: u64,
    run_findings: u64,
}

impl PmdReportParser {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sink,
            registered_rules: HashSet::new(),
            current_file: None,
            current_findings: 0,
            run_files: 0,
            run_findings: 0,
        }
    }

    fn emit_violation(
        &mut self,
        violation: &PendingViolation,
        source_file: &str,
        message: String,
    ) -> Result<(), ParseError> {
        if self.registered_rules.insert(violation.rule.clone()) {
            self.sink.inspection_type(&InspectionType {
                id: violation.rule.clone(),
                name: violation.rule.clone(),
                category: violation.ruleset.clone(),
                description: violation.ruleset.clone(),
            })?;
        }
        self.sink.inspection(&Inspection {
            type_id: violation.rule.clone(),
            file: source_file.to_string(),
            line: violation.line,
            message,
            priority: violation.priority,
        })?;
        self.current_findings += 1;
        self.run_findings += 1;
        Ok(())
    }
}

fn uint_attr(tag: &crate::tag::ScannedTag<'_>, name: &str) -> u32 {
    tag.attr(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

impl FormatParser for PmdReportParser {
    fn parse(&mut self, file: &Path, already_processed: u64) -> ParseResult {
        if self.current_file.as_deref() != Some(file) {
            self.current_file = Some(file.to_path_buf());
            self.current_findings = 0;
        }

        let bytes = std::fs::read(file).map_err(|e| ParseError::io(file, e))?;
        let content = String::from_utf8_lossy(&bytes);

        let mut scanner = TagScanner::new(&content);
        let mut findings_seen = 0u64;
        let mut depth = 0i64;
        let mut root_closed = false;
        let mut source_file = String::new();
        let mut pending: Option<PendingViolation> = None;

        while let Some(tag) = scanner.next_tag() {
            match tag.kind {
                TagKind::Open => {
                    depth += 1;
                    match tag.name {
                        "file" => {
                            source_file = tag.attr("name").unwrap_or_default();
                        }
                        "violation" => {
                            pending = Some(PendingViolation {
                                rule: tag.attr("rule").unwrap_or_default(),
                                ruleset: tag.attr("ruleset").unwrap_or_default(),
                                line: uint_attr(&tag, "beginline"),
                                priority: uint_attr(&tag, "priority"),
                                body_start: tag.range.end,
                            });
                        }
                        _ => {}
                    }
                }
                TagKind::SelfClose => {
                    if tag.name == "violation" {
                        let violation = PendingViolation {
                            rule: tag.attr("rule").unwrap_or_default(),
                            ruleset: tag.attr("ruleset").unwrap_or_default(),
                            line: uint_attr(&tag, "beginline"),
                            priority: uint_attr(&tag, "priority"),
                            body_start: 0,
                        };
                        findings_seen += 1;
                        if findings_seen > already_processed {
                            self.emit_violation(&violation, &source_file, String::new())?;
                        }
                    }
                    // A self-closed element at the top level is a complete
                    // document.
                    if depth == 0 {
                        root_closed = true;
                    }
                }
                TagKind::Close => {
                    depth -= 1;
                    match tag.name {
                        "violation" => {
                            if let Some(violation) = pending.take() {
                                findings_seen += 1;
                                if findings_seen > already_processed {
                                    let message = text_content(
                                        &content[violation.body_start..tag.range.start],
                                    );
                                    self.emit_violation(&violation, &source_file, message)?;
                                }
                            }
                        }
                        "file" => source_file.clear(),
                        _ => {}
                    }
                    if depth <= 0 {
                        root_closed = true;
                    }
                }
            }
        }

        if root_closed {
            self.run_files += 1;
            return Ok(ParseOutcome::Terminal);
        }
        Ok(ParseOutcome::Progress(findings_seen.max(already_processed)))
    }

    fn abnormal_end(&mut self) {
        // Findings are only emitted once complete; nothing is left open.
        debug!("PMD parser abandoned mid-report");
    }

    fn log_report_totals(&mut self, file: &Path, verbose: bool) {
        let outcome = if self.current_findings == 0 {
            self.sink
                .warning(&format!("{}: no inspections found", file.display()))
        } else if verbose {
            self.sink.message(&format!(
                "{}: {} inspection(s) found",
                file.display(),
                self.current_findings
            ))
        } else {
            Ok(())
        };
        if let Err(err) = outcome {
            warn!(file = %file.display(), error = %err, "sink rejected report totals");
        }
    }

    fn log_parsing_totals(&mut self, verbose: bool) {
        if self.run_files == 0 {
            if verbose {
                debug!("no PMD reports were processed");
            }
            return;
        }
        if let Err(err) = self.sink.message(&format!(
            "PMD reports: {} file(s), {} inspection(s)",
            self.run_files, self.run_findings
        )) {
            warn!(error = %err, "sink rejected parsing totals");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportflow_test_utils::{write_report, RecordingSink, SinkEvent};

    const TWO_VIOLATIONS: &str = r#"<?xml version="1.0"?>
<pmd version="4.2.5" timestamp="2009-11-23T16:26:31">
  <file name="src/Main.java">
    <violation beginline="3" endline="3" rule="UnusedImports" ruleset="Import Statements" priority="3">
      Avoid unused imports such as 'java.util.List'
    </violation>
    <violation beginline="10" endline="10" rule="UnusedImports" ruleset="Import Statements" priority="3">
      Avoid unused imports such as 'java.io.File'
    </violation>
  </file>
</pmd>
"#;

    #[test]
    fn registers_each_rule_once() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("pmd.xml");
        write_report(&report, TWO_VIOLATIONS).unwrap();

        let sink = Arc::new(RecordingSink::new());
        let mut parser = PmdReportParser::new(sink.clone());
        assert_eq!(parser.parse(&report, 0).unwrap(), ParseOutcome::Terminal);

        let events = sink.lifecycle_events();
        let types = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::InspectionType(_)))
            .count();
        let findings = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Inspection(_)))
            .count();
        assert_eq!(types, 1);
        assert_eq!(findings, 2);

        match &events[1] {
            SinkEvent::Inspection(finding) => {
                assert_eq!(finding.type_id, "UnusedImports");
                assert_eq!(finding.file, "src/Main.java");
                assert_eq!(finding.line, 3);
                assert_eq!(finding.priority, 3);
                assert_eq!(
                    finding.message,
                    "Avoid unused imports such as 'java.util.List'"
                );
            }
            other => panic!("expected inspection, got {other:?}"),
        }
    }

    #[test]
    fn empty_self_closed_report_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("pmd.xml");
        write_report(&report, "<pmd version=\"4.2.5\"/>\n").unwrap();

        let sink = Arc::new(RecordingSink::new());
        let mut parser = PmdReportParser::new(sink.clone());
        assert_eq!(parser.parse(&report, 0).unwrap(), ParseOutcome::Terminal);
        assert!(sink.lifecycle_events().is_empty());
    }

    #[test]
    fn resume_skips_already_reported_findings() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("pmd.xml");
        let cut = TWO_VIOLATIONS.find("java.io.File").unwrap();
        write_report(&report, &TWO_VIOLATIONS[..cut]).unwrap();

        let sink = Arc::new(RecordingSink::new());
        let mut parser = PmdReportParser::new(sink.clone());
        let ParseOutcome::Progress(processed) = parser.parse(&report, 0).unwrap() else {
            panic!("truncated report must not be terminal");
        };
        assert_eq!(processed, 1);

        write_report(&report, TWO_VIOLATIONS).unwrap();
        assert_eq!(
            parser.parse(&report, processed).unwrap(),
            ParseOutcome::Terminal
        );

        let findings = sink
            .lifecycle_events()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::Inspection(_)))
            .count();
        assert_eq!(findings, 2);
    }
}
