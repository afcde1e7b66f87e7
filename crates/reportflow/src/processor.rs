//! Report processor: the retry/stall engine.
//!
//! One cursor per in-flight file, at most one file being parsed at a time.
//! A file that keeps growing is re-parsed on a fixed interval, resuming at
//! the unit count the parser reported last time; a file that stops growing
//! for too many attempts is force-closed and abandoned. Per-file event
//! ordering follows from the single-cursor discipline: a file is never
//! interleaved with parsing of another file.

use crate::queue::{NotificationReceiver, Poll, ReportNotification};
use reportflow_protocol::{FormatParser, ParseOutcome, ReportKind, ReportSink};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Factory resolving a report kind to its parser; invoked at most once per
/// kind per run. A plain lookup table, injected so embedders can swap
/// grammars without touching the pipeline.
pub type ParserRegistry = Box<dyn FnMut(ReportKind) -> Option<Box<dyn FormatParser>> + Send>;

/// Knobs the processor runs with, lifted out of [`crate::PipelineConfig`].
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub verbose: bool,
    pub retry_interval: Duration,
    pub poll_timeout: Duration,
    pub stale_attempt_ceiling: u32,
}

/// Progress state for the one file currently being parsed.
///
/// `processed_units` is monotonically non-decreasing across attempts; the
/// cursor lives until the parser reports terminal completion or the file is
/// abandoned, and the file is never revisited after that.
struct ReportCursor {
    file: PathBuf,
    kind: ReportKind,
    processed_units: u64,
    last_size: u64,
    stale_attempts: u32,
}

/// What the run produced, surfaced to the embedding build.
#[derive(Debug, Default)]
pub struct ProcessorOutcome {
    pub processed: Vec<ReportKind>,
    pub failed: Vec<ReportKind>,
}

impl ProcessorOutcome {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ReportProcessor {
    sink: Arc<dyn ReportSink>,
    settings: ProcessorSettings,
    registry: ParserRegistry,
    queue: NotificationReceiver,
    stop: Arc<AtomicBool>,
    parsers: BTreeMap<ReportKind, Box<dyn FormatParser>>,
    current: Option<ReportCursor>,
    processed_kinds: BTreeSet<ReportKind>,
    failed_kinds: BTreeSet<ReportKind>,
}

impl ReportProcessor {
    pub fn new(
        sink: Arc<dyn ReportSink>,
        settings: ProcessorSettings,
        registry: ParserRegistry,
        queue: NotificationReceiver,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sink,
            settings,
            registry,
            queue,
            stop,
            parsers: BTreeMap::new(),
            current: None,
            processed_kinds: BTreeSet::new(),
            failed_kinds: BTreeSet::new(),
        }
    }

    /// Main loop. Consumes the processor; returns the run's report card.
    pub fn run(mut self) -> ProcessorOutcome {
        debug!("report processor started");
        while !self.stop.load(Ordering::Relaxed) {
            if self.current.is_some() {
                // Re-offer the in-flight file before taking new work; this
                // is what keeps per-file event ordering intact.
                self.attempt();
            } else {
                match self.queue.poll_timeout(self.settings.poll_timeout) {
                    Poll::Item(notification) => {
                        if self.admit(notification) {
                            self.attempt();
                        }
                    }
                    Poll::Empty => {}
                    // Watcher gone early; nothing more will ever arrive.
                    Poll::Disconnected => break,
                }
            }
        }

        // Shutdown: the watcher owes one more full scan before it drops its
        // sender, so draining to disconnect covers every late discovery.
        // Each remaining file gets exactly one final parse, no retry loop.
        if self.current.is_some() {
            self.final_attempt();
        }
        while let Some(notification) = self.queue.recv() {
            if self.admit(notification) {
                self.final_attempt();
            }
        }

        for parser in self.parsers.values_mut() {
            parser.log_parsing_totals(self.settings.verbose);
        }
        self.report_failures();

        debug!("report processor terminated");
        ProcessorOutcome {
            processed: self.processed_kinds.into_iter().collect(),
            failed: self.failed_kinds.into_iter().collect(),
        }
    }

    /// Initialize a cursor for a fresh notification. Returns false when the
    /// kind has no parser (logged at debug, file dropped).
    fn admit(&mut self, notification: ReportNotification) -> bool {
        let ReportNotification { kind, file } = notification;
        if !self.parsers.contains_key(&kind) {
            match (self.registry)(kind) {
                Some(parser) => {
                    self.parsers.insert(kind, parser);
                }
                None => {
                    debug!(kind = %kind, file = %file.display(), "no parser available");
                    return false;
                }
            }
        }
        let _ = self
            .sink
            .message(&format!("Found report file: {}", file.display()));
        let last_size = std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
        self.current = Some(ReportCursor {
            file,
            kind,
            processed_units: 0,
            last_size,
            stale_attempts: 0,
        });
        true
    }

    /// One parse attempt against the current cursor during normal operation.
    fn attempt(&mut self) {
        let Some(cursor) = self.current.as_mut() else {
            return;
        };
        let kind = cursor.kind;
        let file = cursor.file.clone();
        let Some(parser) = self.parsers.get_mut(&kind) else {
            self.current = None;
            return;
        };

        match parser.parse(&file, cursor.processed_units) {
            Ok(ParseOutcome::Terminal) => {
                debug!(file = %file.display(), "report fully processed");
                parser.log_report_totals(&file, self.settings.verbose);
                self.processed_kinds.insert(kind);
                self.current = None;
            }
            Ok(ParseOutcome::Progress(units)) => {
                cursor.processed_units = cursor.processed_units.max(units);

                let size = std::fs::metadata(&file)
                    .map(|m| m.len())
                    .unwrap_or(cursor.last_size);
                if size > cursor.last_size {
                    cursor.last_size = size;
                    cursor.stale_attempts = 0;
                } else {
                    cursor.stale_attempts += 1;
                }

                if cursor.stale_attempts >= self.settings.stale_attempt_ceiling {
                    debug!(
                        file = %file.display(),
                        attempts = cursor.stale_attempts,
                        "unable to get a complete report; assuming illegal structure or unsupported format"
                    );
                    parser.abnormal_end();
                    let _ = self.sink.warning(&format!(
                        "{} report has unexpected finish or unsupported format",
                        file.display()
                    ));
                    self.failed_kinds.insert(kind);
                    self.current = None;
                } else {
                    std::thread::sleep(self.settings.retry_interval);
                }
            }
            Err(err) => {
                error!(file = %file.display(), error = %err, "parse attempt failed");
                let _ = self
                    .sink
                    .error(&format!("Failed to parse {}: {err}", file.display()));
                parser.abnormal_end();
                self.failed_kinds.insert(kind);
                self.current = None;
            }
        }
    }

    /// One-shot parse during shutdown draining: whatever is parseable now is
    /// the final state. Incomplete files are closed out and logged, never
    /// silently dropped.
    fn final_attempt(&mut self) {
        let Some(cursor) = self.current.take() else {
            return;
        };
        let Some(parser) = self.parsers.get_mut(&cursor.kind) else {
            return;
        };

        match parser.parse(&cursor.file, cursor.processed_units) {
            Ok(ParseOutcome::Terminal) => {
                parser.log_report_totals(&cursor.file, self.settings.verbose);
                self.processed_kinds.insert(cursor.kind);
            }
            Ok(ParseOutcome::Progress(_)) => {
                let message = format!(
                    "Failed to parse {} with {} parser",
                    cursor.file.display(),
                    cursor.kind.display_name()
                );
                error!("{message}");
                let _ = self.sink.error(&message);
                parser.abnormal_end();
                self.failed_kinds.insert(cursor.kind);
            }
            Err(err) => {
                error!(file = %cursor.file.display(), error = %err, "final parse failed");
                let _ = self
                    .sink
                    .error(&format!("Failed to parse {}: {err}", cursor.file.display()));
                parser.abnormal_end();
                self.failed_kinds.insert(cursor.kind);
            }
        }
    }

    /// Surface the aggregate failure signal once, at end of run. If some
    /// kinds failed and nothing was processed successfully, the build status
    /// itself is flagged.
    fn report_failures(&mut self) {
        if self.failed_kinds.is_empty() {
            return;
        }
        let names: Vec<&str> = self
            .failed_kinds
            .iter()
            .map(|kind| kind.display_name())
            .collect();
        let message = format!("Failed to process some {} reports", names.join(", "));
        let _ = self.sink.error(&message);
        if self.processed_kinds.is_empty() {
            warn!("no report type produced a single parsed report");
            let _ = self.sink.build_failure(&message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::handoff_queue;
    use reportflow_protocol::{ParseError, ParseResult, SinkError};
    use reportflow_test_utils::RecordingSink;
    use std::path::Path;
    use std::sync::Mutex;

    fn settings(ceiling: u32) -> ProcessorSettings {
        ProcessorSettings {
            verbose: false,
            retry_interval: Duration::from_millis(1),
            poll_timeout: Duration::from_millis(5),
            stale_attempt_ceiling: ceiling,
        }
    }

    /// Scripted parser: pops one outcome per attempt, records calls.
    struct ScriptedParser {
        outcomes: Vec<ParseResult>,
        abnormal_ends: Arc<Mutex<u32>>,
    }

    impl FormatParser for ScriptedParser {
        fn parse(&mut self, _file: &Path, already: u64) -> ParseResult {
            if self.outcomes.is_empty() {
                Ok(ParseOutcome::Progress(already))
            } else {
                self.outcomes.remove(0)
            }
        }

        fn abnormal_end(&mut self) {
            *self.abnormal_ends.lock().unwrap() += 1;
        }

        fn log_report_totals(&mut self, _file: &Path, _verbose: bool) {}
        fn log_parsing_totals(&mut self, _verbose: bool) {}
    }

    fn registry_of(outcomes: Vec<ParseResult>, abnormal_ends: Arc<Mutex<u32>>) -> ParserRegistry {
        let mut outcomes = Some(outcomes);
        Box::new(move |_kind| {
            outcomes.take().map(|outcomes| {
                Box::new(ScriptedParser {
                    outcomes,
                    abnormal_ends: abnormal_ends.clone(),
                }) as Box<dyn FormatParser>
            })
        })
    }

    fn run_processor(
        registry: ParserRegistry,
        ceiling: u32,
        sink: Arc<RecordingSink>,
        notifications: Vec<ReportNotification>,
    ) -> ProcessorOutcome {
        let (tx, rx) = handoff_queue(Some(16));
        let stop = Arc::new(AtomicBool::new(false));
        let processor = ReportProcessor::new(sink, settings(ceiling), registry, rx, stop.clone());

        for notification in notifications {
            tx.put(notification).unwrap();
        }

        let handle = std::thread::spawn(move || processor.run());
        // Give the processor time to work through its queue, then stop. The
        // sender drop below is the watcher-done signal for the drain phase.
        std::thread::sleep(Duration::from_millis(100));
        stop.store(true, Ordering::Relaxed);
        drop(tx);
        handle.join().unwrap()
    }

    fn junit_notification(dir: &Path) -> ReportNotification {
        let file = dir.join("r.xml");
        std::fs::write(&file, "<stub/>").unwrap();
        ReportNotification {
            kind: ReportKind::Junit,
            file,
        }
    }

    #[test]
    fn terminal_completion_marks_kind_processed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let abnormal = Arc::new(Mutex::new(0));
        let outcome = run_processor(
            registry_of(vec![Ok(ParseOutcome::Terminal)], abnormal.clone()),
            100,
            sink.clone(),
            vec![junit_notification(dir.path())],
        );

        assert_eq!(outcome.processed, vec![ReportKind::Junit]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.success());
        assert_eq!(*abnormal.lock().unwrap(), 0);
        assert!(sink.errors().is_empty());
    }

    #[test]
    fn stalled_file_abandoned_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let abnormal = Arc::new(Mutex::new(0));
        // Parser forever reports no new units; file never grows.
        let outcome = run_processor(
            registry_of(Vec::new(), abnormal.clone()),
            3,
            sink.clone(),
            vec![junit_notification(dir.path())],
        );

        assert!(outcome.processed.is_empty());
        assert_eq!(outcome.failed, vec![ReportKind::Junit]);
        assert_eq!(*abnormal.lock().unwrap(), 1);

        let stall_warnings = sink
            .warnings()
            .iter()
            .filter(|w| w.contains("unexpected finish or unsupported format"))
            .count();
        assert_eq!(stall_warnings, 1);
        // Nothing was processed at all: the build status reflects it.
        assert_eq!(sink.build_failures().len(), 1);
    }

    #[test]
    fn sink_failure_abandons_file_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let abnormal = Arc::new(Mutex::new(0));
        let outcome = run_processor(
            registry_of(
                vec![Err(ParseError::Sink(SinkError::message("sink closed")))],
                abnormal.clone(),
            ),
            100,
            sink.clone(),
            vec![junit_notification(dir.path())],
        );

        assert_eq!(outcome.failed, vec![ReportKind::Junit]);
        assert_eq!(*abnormal.lock().unwrap(), 1);
        assert!(sink.errors().iter().any(|e| e.contains("Failed to parse")));
    }

    #[test]
    fn unknown_parser_kind_is_skipped_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let registry: ParserRegistry = Box::new(|_| None);
        let outcome = run_processor(
            registry,
            100,
            sink.clone(),
            vec![junit_notification(dir.path())],
        );

        assert!(outcome.processed.is_empty());
        assert!(outcome.failed.is_empty());
        assert!(sink.errors().is_empty());
        assert!(sink.build_failures().is_empty());
    }

    #[test]
    fn file_growth_resets_stale_counter() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("r.xml");
        std::fs::write(&file, "<stub/>").unwrap();

        // Ceiling 2: two stale attempts, then growth, then two more stale
        // attempts would abandon it, but the script terminates first.
        let grow_file = file.clone();
        let attempts = Arc::new(Mutex::new(0u32));
        let attempts_inner = attempts.clone();
        struct GrowingParser {
            file: PathBuf,
            attempts: Arc<Mutex<u32>>,
        }
        impl FormatParser for GrowingParser {
            fn parse(&mut self, _file: &Path, already: u64) -> ParseResult {
                let mut attempts = self.attempts.lock().unwrap();
                *attempts += 1;
                match *attempts {
                    1 => Ok(ParseOutcome::Progress(already)),
                    2 => {
                        // Grow the file so the next size check resets staleness.
                        reportflow_test_utils::append_report(&self.file, "<more/>").unwrap();
                        Ok(ParseOutcome::Progress(already))
                    }
                    3 => Ok(ParseOutcome::Progress(already)),
                    _ => Ok(ParseOutcome::Terminal),
                }
            }
            fn abnormal_end(&mut self) {
                panic!("must not abandon a file that keeps growing");
            }
            fn log_report_totals(&mut self, _file: &Path, _verbose: bool) {}
            fn log_parsing_totals(&mut self, _verbose: bool) {}
        }

        let sink = Arc::new(RecordingSink::new());
        let registry: ParserRegistry = Box::new(move |_| {
            Some(Box::new(GrowingParser {
                file: grow_file.clone(),
                attempts: attempts_inner.clone(),
            }) as Box<dyn FormatParser>)
        });
        let outcome = run_processor(
            registry,
            3,
            sink,
            vec![ReportNotification {
                kind: ReportKind::Junit,
                file,
            }],
        );

        assert_eq!(outcome.processed, vec![ReportKind::Junit]);
        assert!(*attempts.lock().unwrap() >= 4);
    }
}
