//! NUnit 2.x `test-results` report grammar.
//!
//! Suites are `<test-suite>` elements (assemblies, namespaces, fixtures all
//! alike); the progress unit is a completed `<test-case>`. A case fails when
//! `success="False"` or a `<failure>` child is present; message and stack
//! come from the failure's `<message>`/`<stack-trace>` children.

use crate::resume::SuiteResume;
use crate::tag::{text_content, TagKind, TagScanner};
use reportflow_protocol::{FormatParser, ParseError, ParseOutcome, ParseResult, ReportSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SUITE_TAG: &str = "test-suite";
const CASE_TAG: &str = "test-case";

#[derive(Default, Clone, Copy)]
struct Totals {
    files: u64,
    tests: u64,
    failures: u64,
}

#[derive(Default)]
struct PendingCase {
    name: String,
    duration: Duration,
    failed_attr: bool,
    in_failure: bool,
    message: Option<String>,
    stack: Option<String>,
    body_start: usize,
}

pub struct NunitReportParser {
    sink: Arc<dyn ReportSink>,
    resume: SuiteResume,
    current_file: Option<PathBuf>,
    current: Totals,
    run: Totals,
}

impl NunitReportParser {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sink,
            resume: SuiteResume::default(),
            current_file: None,
            current: Totals::default(),
            run: Totals::default(),
        }
    }

    fn emit_case(&mut self, case: PendingCase) -> Result<(), ParseError> {
        self.sink.test_started(&case.name)?;
        if case.failed_attr || case.message.is_some() || case.stack.is_some() {
            self.sink.test_failed(
                &case.name,
                case.message.as_deref().unwrap_or("Test failed"),
                case.stack.as_deref().unwrap_or(""),
            )?;
            self.current.failures += 1;
            self.run.failures += 1;
        }
        self.sink.test_finished(&case.name, case.duration)?;
        self.current.tests += 1;
        self.run.tests += 1;
        Ok(())
    }
}

impl FormatParser for NunitReportParser {
    fn parse(&mut self, file: &Path, already_processed: u64) -> ParseResult {
        if self.current_file.as_deref() != Some(file) {
            self.current_file = Some(file.to_path_buf());
            self.current = Totals::default();
        }
        self.resume.begin_attempt(file);

        let bytes = std::fs::read(file).map_err(|e| ParseError::io(file, e))?;
        let content = String::from_utf8_lossy(&bytes);

        let mut scanner = TagScanner::new(&content);
        let mut opens_seen = 0u64;
        let mut closes_seen = 0u64;
        let mut cases_seen = 0u64;
        let mut depth = 0i64;
        let mut root_closed = false;
        let mut pending: Option<PendingCase> = None;

        while let Some(tag) = scanner.next_tag() {
            match tag.kind {
                TagKind::Open => {
                    depth += 1;
                    match tag.name {
                        SUITE_TAG => {
                            opens_seen += 1;
                            let name =
                                tag.attr("name").unwrap_or_else(|| "unnamed".to_string());
                            self.resume.suite_open(opens_seen, &name, &*self.sink)?;
                        }
                        CASE_TAG => {
                            pending = Some(PendingCase {
                                name: tag
                                    .attr("name")
                                    .unwrap_or_else(|| "unnamed".to_string()),
                                duration: tag
                                    .attr("time")
                                    .and_then(|t| t.parse::<f64>().ok())
                                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                                    .map(Duration::from_secs_f64)
                                    .unwrap_or_default(),
                                failed_attr: tag
                                    .attr("success")
                                    .map(|s| s.eq_ignore_ascii_case("false"))
                                    .unwrap_or(false),
                                ..PendingCase::default()
                            });
                        }
                        "failure" => {
                            if let Some(case) = pending.as_mut() {
                                case.in_failure = true;
                            }
                        }
                        "message" | "stack-trace" => {
                            if let Some(case) = pending.as_mut() {
                                if case.in_failure {
                                    case.body_start = tag.range.end;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                TagKind::SelfClose => {
                    if tag.name == CASE_TAG {
                        let case = PendingCase {
                            name: tag.attr("name").unwrap_or_else(|| "unnamed".to_string()),
                            duration: tag
                                .attr("time")
                                .and_then(|t| t.parse::<f64>().ok())
                                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                                .map(Duration::from_secs_f64)
                                .unwrap_or_default(),
                            failed_attr: tag
                                .attr("success")
                                .map(|s| s.eq_ignore_ascii_case("false"))
                                .unwrap_or(false),
                            ..PendingCase::default()
                        };
                        cases_seen += 1;
                        if cases_seen > already_processed {
                            self.emit_case(case)?;
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
                        "message" => {
                            if let Some(case) = pending.as_mut() {
                                if case.in_failure && case.message.is_none() {
                                    case.message = Some(text_content(
                                        &content[case.body_start..tag.range.start],
                                    ));
                                }
                            }
                        }
                        "stack-trace" => {
                            if let Some(case) = pending.as_mut() {
                                if case.in_failure && case.stack.is_none() {
                                    case.stack = Some(text_content(
                                        &content[case.body_start..tag.range.start],
                                    ));
                                }
                            }
                        }
                        "failure" => {
                            if let Some(case) = pending.as_mut() {
                                case.in_failure = false;
                            }
                        }
                        CASE_TAG => {
                            if let Some(case) = pending.take() {
                                cases_seen += 1;
                                if cases_seen > already_processed {
                                    self.emit_case(case)?;
                                }
                            }
                        }
                        SUITE_TAG => {
                            closes_seen += 1;
                            self.resume.suite_close(closes_seen, &*self.sink)?;
                        }
                        _ => {}
                    }
                    if depth <= 0 {
                        root_closed = true;
                    }
                }
            }
        }

        if root_closed {
            if self.resume.has_open_suites() {
                warn!(file = %file.display(), "document closed with unbalanced suites");
                self.resume.abnormal_end(&*self.sink);
            }
            self.resume.finish_file();
            self.run.files += 1;
            return Ok(ParseOutcome::Terminal);
        }
        Ok(ParseOutcome::Progress(cases_seen.max(already_processed)))
    }

    fn abnormal_end(&mut self) {
        self.resume.abnormal_end(&*self.sink);
    }

    fn log_report_totals(&mut self, file: &Path, verbose: bool) {
        let totals = self.current;
        let outcome = if totals.tests == 0 {
            self.sink.warning(&format!("{}: no tests found", file.display()))
        } else if verbose || totals.failures > 0 {
            self.sink.message(&format!(
                "{}: {} test(s), {} failure(s)",
                file.display(),
                totals.tests,
                totals.failures
            ))
        } else {
            self.sink
                .message(&format!("{}: {} test(s)", file.display(), totals.tests))
        };
        if let Err(err) = outcome {
            warn!(file = %file.display(), error = %err, "sink rejected report totals");
        }
    }

    fn log_parsing_totals(&mut self, verbose: bool) {
        if self.run.files == 0 {
            if verbose {
                debug!("no NUnit reports were processed");
            }
            return;
        }
        if let Err(err) = self.sink.message(&format!(
            "NUnit reports: {} file(s), {} test(s), {} failure(s)",
            self.run.files, self.run.tests, self.run.failures
        )) {
            warn!(error = %err, "sink rejected parsing totals");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportflow_test_utils::{write_report, RecordingSink, SinkEvent};

    const PASS_AND_FAIL: &str = r#"<?xml version="1.0"?>
<test-results total="2" failures="1">
  <test-suite name="Lib.dll" success="False">
    <results>
      <test-case name="Lib.Adds" executed="True" success="True" time="0.001"/>
      <test-case name="Lib.Breaks" executed="True" success="False" time="0.002">
        <failure>
          <message><![CDATA[expected 2 but was 3]]></message>
          <stack-trace><![CDATA[at Lib.Breaks()]]></stack-trace>
        </failure>
      </test-case>
    </results>
  </test-suite>
</test-results>
"#;

    #[test]
    fn emits_pass_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("r.xml");
        write_report(&report, PASS_AND_FAIL).unwrap();

        let sink = Arc::new(RecordingSink::new());
        let mut parser = NunitReportParser::new(sink.clone());
        assert_eq!(parser.parse(&report, 0).unwrap(), ParseOutcome::Terminal);

        assert_eq!(
            sink.lifecycle_labels(),
            vec![
                "suiteStarted(Lib.dll)",
                "testStarted(Lib.Adds)",
                "testFinished(Lib.Adds)",
                "testStarted(Lib.Breaks)",
                "testFailed(Lib.Breaks)",
                "testFinished(Lib.Breaks)",
                "suiteFinished(Lib.dll)",
            ]
        );
        let failed = sink
            .lifecycle_events()
            .into_iter()
            .find_map(|e| match e {
                SinkEvent::TestFailed {
                    message, details, ..
                } => Some((message, details)),
                _ => None,
            })
            .unwrap();
        assert_eq!(failed.0, "expected 2 but was 3");
        assert_eq!(failed.1, "at Lib.Breaks()");
    }

    #[test]
    fn resumes_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("r.xml");
        let cut = PASS_AND_FAIL.find("Lib.Breaks").unwrap();
        write_report(&report, &PASS_AND_FAIL[..cut]).unwrap();

        let sink = Arc::new(RecordingSink::new());
        let mut parser = NunitReportParser::new(sink.clone());
        let ParseOutcome::Progress(processed) = parser.parse(&report, 0).unwrap() else {
            panic!("truncated report must not be terminal");
        };
        assert_eq!(processed, 1);

        write_report(&report, PASS_AND_FAIL).unwrap();
        assert_eq!(
            parser.parse(&report, processed).unwrap(),
            ParseOutcome::Terminal
        );

        let started: Vec<_> = sink
            .lifecycle_events()
            .into_iter()
            .filter(|e| matches!(e, SinkEvent::TestStarted(_)))
            .collect();
        assert_eq!(started.len(), 2);
    }
}
