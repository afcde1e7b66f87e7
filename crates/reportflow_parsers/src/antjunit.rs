//! Ant JUnit task report grammar (also produced by Maven Surefire).
//!
//! Roots are `<testsuites>` or a bare `<testsuite>`; the progress unit is a
//! completed `<testcase>` element. A case only counts once its closing
//! construct has been seen, so a snapshot that ends mid-case contributes
//! nothing and the next attempt picks the case up whole.

use crate::resume::SuiteResume;
use crate::tag::{text_content, ScannedTag, TagKind, TagScanner};
use reportflow_protocol::{FormatParser, ParseError, ParseOutcome, ParseResult, ReportSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SUITE_TAG: &str = "testsuite";
const CASE_TAG: &str = "testcase";

#[derive(Default, Clone, Copy)]
struct Totals {
    files: u64,
    tests: u64,
    failures: u64,
}

struct OpenFailure {
    message: String,
    body_start: usize,
}

struct PendingCase {
    name: String,
    duration: Duration,
    failure: Option<(String, String)>,
}

pub struct JunitReportParser {
    sink: Arc<dyn ReportSink>,
    resume: SuiteResume,
    current_file: Option<PathBuf>,
    current: Totals,
    run: Totals,
}

impl JunitReportParser {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sink,
            resume: SuiteResume::default(),
            current_file: None,
            current: Totals::default(),
            run: Totals::default(),
        }
    }

    fn case_name(tag: &ScannedTag<'_>) -> String {
        let name = tag.attr("name").unwrap_or_else(|| "unnamed".to_string());
        match tag.attr("classname") {
            Some(class) if !class.is_empty() => format!("{class}.{name}"),
            _ => name,
        }
    }

    fn duration(tag: &ScannedTag<'_>) -> Duration {
        tag.attr("time")
            .and_then(|t| t.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default()
    }

    fn emit_case(&mut self, case: PendingCase) -> Result<(), ParseError> {
        self.sink.test_started(&case.name)?;
        if let Some((message, details)) = &case.failure {
            self.sink.test_failed(&case.name, message, details)?;
            self.current.failures += 1;
            self.run.failures += 1;
        }
        self.sink.test_finished(&case.name, case.duration)?;
        self.current.tests += 1;
        self.run.tests += 1;
        Ok(())
    }
}

impl FormatParser for JunitReportParser {
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
        let mut open_failure: Option<OpenFailure> = None;

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
                                name: Self::case_name(&tag),
                                duration: Self::duration(&tag),
                                failure: None,
                            });
                            open_failure = None;
                        }
                        "failure" | "error" if pending.is_some() => {
                            open_failure = Some(OpenFailure {
                                message: tag
                                    .attr("message")
                                    .or_else(|| tag.attr("type"))
                                    .unwrap_or_default(),
                                body_start: tag.range.end,
                            });
                        }
                        _ => {}
                    }
                }
                TagKind::SelfClose => {
                    match tag.name {
                        SUITE_TAG => {
                            opens_seen += 1;
                            let name =
                                tag.attr("name").unwrap_or_else(|| "unnamed".to_string());
                            self.resume.suite_open(opens_seen, &name, &*self.sink)?;
                            closes_seen += 1;
                            self.resume.suite_close(closes_seen, &*self.sink)?;
                        }
                        CASE_TAG => {
                            let case = PendingCase {
                                name: Self::case_name(&tag),
                                duration: Self::duration(&tag),
                                failure: None,
                            };
                            cases_seen += 1;
                            if cases_seen > already_processed {
                                self.emit_case(case)?;
                            }
                        }
                        "failure" | "error" => {
                            if let Some(case) = pending.as_mut() {
                                if case.failure.is_none() {
                                    let message = tag
                                        .attr("message")
                                        .or_else(|| tag.attr("type"))
                                        .unwrap_or_default();
                                    case.failure = Some((message, String::new()));
                                }
                            }
                        }
                        _ => {}
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
                        "failure" | "error" => {
                            if let (Some(case), Some(open)) =
                                (pending.as_mut(), open_failure.take())
                            {
                                if case.failure.is_none() {
                                    let details =
                                        text_content(&content[open.body_start..tag.range.start]);
                                    case.failure = Some((open.message, details));
                                }
                            }
                        }
                        CASE_TAG => {
                            if let Some(case) = pending.take() {
                                cases_seen += 1;
                                if cases_seen > already_processed {
                                    self.emit_case(case)?;
                                }
                            }
                            open_failure = None;
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
        // Completed cases are emitted atomically within one attempt, so only
        // suites can be left open across attempts.
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
                debug!("no Ant JUnit reports were processed");
            }
            return;
        }
        if let Err(err) = self.sink.message(&format!(
            "Ant JUnit reports: {} file(s), {} test(s), {} failure(s)",
            self.run.files, self.run.tests, self.run.failures
        )) {
            warn!(error = %err, "sink rejected parsing totals");
        }
    }
}
