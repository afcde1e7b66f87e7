//! Checkstyle static-analysis report grammar.
//!
//! Root is `<checkstyle>`; `<file name="…">` elements wrap `<error>` (or
//! `<warning>`) findings, usually self-closing. The progress unit is one
//! finding. Severity maps to priority: error 1, warning 2, info 3.

use crate::tag::{ScannedTag, TagKind, TagScanner};
use reportflow_protocol::{
    FormatParser, Inspection, InspectionType, ParseError, ParseOutcome, ParseResult, ReportSink,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CheckstyleReportParser {
    sink: Arc<dyn ReportSink>,
    registered_checks: HashSet<String>,
    current_file: Option<PathBuf>,
    current_findings: u64,
    run_files: u64,
    run_findings: u64,
}

impl CheckstyleReportParser {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sink,
            registered_checks: HashSet::new(),
            current_file: None,
            current_findings: 0,
            run_files: 0,
            run_findings: 0,
        }
    }

    fn emit_finding(
        &mut self,
        tag: &ScannedTag<'_>,
        source_file: &str,
    ) -> Result<(), ParseError> {
        let source = tag.attr("source").unwrap_or_default();
        let check = source.rsplit('.').next().unwrap_or("Check").to_string();
        if self.registered_checks.insert(check.clone()) {
            self.sink.inspection_type(&InspectionType {
                id: check.clone(),
                name: check.clone(),
                category: "Checkstyle".to_string(),
                description: source.clone(),
            })?;
        }
        let priority = match tag.attr("severity").as_deref() {
            Some("error") => 1,
            Some("warning") => 2,
            _ => 3,
        };
        self.sink.inspection(&Inspection {
            type_id: check,
            file: source_file.to_string(),
            line: tag
                .attr("line")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            message: tag.attr("message").unwrap_or_default(),
            priority,
        })?;
        self.current_findings += 1;
        self.run_findings += 1;
        Ok(())
    }
}

impl FormatParser for CheckstyleReportParser {
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

        while let Some(tag) = scanner.next_tag() {
            let is_finding = matches!(tag.name, "error" | "warning" | "info");
            match tag.kind {
                TagKind::Open => {
                    depth += 1;
                    if tag.name == "file" {
                        source_file = tag.attr("name").unwrap_or_default();
                    }
                }
                TagKind::SelfClose => {
                    if is_finding {
                        findings_seen += 1;
                        if findings_seen > already_processed {
                            self.emit_finding(&tag, &source_file)?;
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
                    if tag.name == "file" {
                        source_file.clear();
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
        debug!("Checkstyle parser abandoned mid-report");
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
                debug!("no Checkstyle reports were processed");
            }
            return;
        }
        if let Err(err) = self.sink.message(&format!(
            "Checkstyle reports: {} file(s), {} inspection(s)",
            self.run_files, self.run_findings
        )) {
            warn!(error = %err, "sink rejected parsing totals");
        }
    }
}
