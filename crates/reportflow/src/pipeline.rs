//! Pipeline wiring: two threads, one queue, one stop flag.
//!
//! The watcher and processor are the only long-lived threads; the handoff
//! queue is the only channel between them, and the stop flag the only other
//! shared state. Cancellation is cooperative: both threads poll the flag at
//! loop boundaries, and an in-progress parse attempt always finishes before
//! a stop takes effect.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::paths::PathMatcher;
use crate::processor::{ParserRegistry, ProcessorOutcome, ProcessorSettings, ReportProcessor};
use crate::queue::handoff_queue;
use crate::watcher::{DirectoryWatcher, WatchCommand};
use reportflow_protocol::{ReportKind, ReportSink};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

pub struct ReportPipeline;

impl ReportPipeline {
    /// Spawn the watcher and processor threads and start discovering the
    /// configured targets.
    pub fn start(
        config: PipelineConfig,
        sink: Arc<dyn ReportSink>,
        registry: ParserRegistry,
    ) -> Result<PipelineHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let (queue_tx, queue_rx) = handoff_queue(config.queue_capacity);
        let (control_tx, control_rx) = mpsc::channel();

        let matcher = PathMatcher::new(config.build_start, config.parse_out_of_date);
        let mut watcher = DirectoryWatcher::new(
            sink.clone(),
            matcher,
            config.scan_interval(),
            config.verbose,
            config.parse_out_of_date,
            stop.clone(),
            control_rx,
            queue_tx,
        );
        for target in &config.targets {
            watcher.add_paths(target.kind, vec![target.path.clone()]);
        }

        let processor = ReportProcessor::new(
            sink,
            ProcessorSettings {
                verbose: config.verbose,
                retry_interval: config.retry_interval(),
                poll_timeout: config.poll_timeout(),
                stale_attempt_ceiling: config.stale_attempt_ceiling,
            },
            registry,
            queue_rx,
            stop.clone(),
        );

        let watcher_handle = std::thread::Builder::new()
            .name("report-watcher".to_string())
            .spawn(move || watcher.run())?;
        let processor_handle = std::thread::Builder::new()
            .name("report-processor".to_string())
            .spawn(move || processor.run())?;

        Ok(PipelineHandle {
            stop,
            control: control_tx,
            watcher: Some(watcher_handle),
            processor: Some(processor_handle),
        })
    }

    /// [`ReportPipeline::start`] with the grammars shipped in
    /// `reportflow_parsers`.
    pub fn start_with_default_parsers(
        config: PipelineConfig,
        sink: Arc<dyn ReportSink>,
    ) -> Result<PipelineHandle> {
        let parser_sink = sink.clone();
        let registry: ParserRegistry =
            Box::new(move |kind| reportflow_parsers::parser_for(kind, parser_sink.clone()));
        Self::start(config, sink, registry)
    }
}

/// The run's report card, returned by [`PipelineHandle::stop`].
#[derive(Debug)]
pub struct RunOutcome {
    /// Kinds that produced at least one fully parsed report.
    pub processed: Vec<ReportKind>,
    /// Kinds with at least one abandoned or unparsable report.
    pub failed: Vec<ReportKind>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    control: mpsc::Sender<WatchCommand>,
    watcher: Option<JoinHandle<DirectoryWatcher>>,
    processor: Option<JoinHandle<ProcessorOutcome>>,
}

impl PipelineHandle {
    /// Register more paths for a kind while the pipeline runs. Paths already
    /// watched for that kind are not duplicated.
    pub fn add_paths(&self, kind: ReportKind, paths: Vec<PathBuf>) -> Result<()> {
        self.control
            .send(WatchCommand::AddPaths { kind, paths })
            .map_err(|_| PipelineError::ShuttingDown)
    }

    /// The cooperative stop flag; hand this to signal handlers.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Signal stop and wait for the run to wind down: the watcher performs
    /// its guaranteed final scan, the processor drains whatever that scan
    /// discovered, and the watcher's totals go out before the outcome is
    /// returned.
    pub fn stop(mut self) -> Result<RunOutcome> {
        self.stop.store(true, Ordering::Relaxed);

        let watcher = self
            .watcher
            .take()
            .ok_or(PipelineError::ShuttingDown)?
            .join()
            .map_err(|_| PipelineError::ThreadPanicked("watcher"))?;
        watcher.log_totals();

        let outcome = self
            .processor
            .take()
            .ok_or(PipelineError::ShuttingDown)?
            .join()
            .map_err(|_| PipelineError::ThreadPanicked("processor"))?;

        Ok(RunOutcome {
            processed: outcome.processed,
            failed: outcome.failed,
        })
    }
}
