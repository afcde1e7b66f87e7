//! reportflow CLI: watch report paths and print lifecycle events.
//!
//! A thin runnable surface over the library. In production the pipeline is
//! embedded in a build agent and the sink forwards into its logger; here the
//! sink prints to stdout so the event stream is visible.

use anyhow::{bail, Context, Result};
use clap::Parser;
use reportflow::{PipelineConfig, ReportPipeline, TargetConfig};
use reportflow_logging::{init_logging, LogConfig};
use reportflow_protocol::{Inspection, InspectionType, ReportSink, SinkResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "reportflow",
    version,
    about = "Stream growing build-report files as lifecycle events"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Watch target, repeatable: KIND=PATH where KIND is junit, surefire,
    /// nunit, pmd or checkstyle and PATH is a file, directory or mask.
    #[arg(long = "watch", value_name = "KIND=PATH")]
    watch: Vec<String>,

    /// Per-file detail in summaries.
    #[arg(short, long)]
    verbose: bool,

    /// Also parse report files that predate pipeline start.
    #[arg(long)]
    parse_out_of_date: bool,
}

/// Prints every lifecycle event as one stdout line.
struct ConsoleSink;

impl ConsoleSink {
    fn line(&self, text: String) -> SinkResult<()> {
        println!("{text}");
        Ok(())
    }
}

impl ReportSink for ConsoleSink {
    fn suite_started(&self, name: &str) -> SinkResult<()> {
        self.line(format!("suite started: {name}"))
    }

    fn suite_finished(&self, name: &str) -> SinkResult<()> {
        self.line(format!("suite finished: {name}"))
    }

    fn test_started(&self, name: &str) -> SinkResult<()> {
        self.line(format!("test started: {name}"))
    }

    fn test_failed(&self, name: &str, message: &str, details: &str) -> SinkResult<()> {
        self.line(format!("test FAILED: {name}: {message}"))?;
        if !details.is_empty() {
            self.line(format!("  {details}"))?;
        }
        Ok(())
    }

    fn test_finished(&self, name: &str, duration: Duration) -> SinkResult<()> {
        self.line(format!("test finished: {name} ({duration:?})"))
    }

    fn inspection_type(&self, ty: &InspectionType) -> SinkResult<()> {
        self.line(format!("inspection type: {} [{}]", ty.name, ty.category))
    }

    fn inspection(&self, finding: &Inspection) -> SinkResult<()> {
        self.line(format!(
            "inspection: {}:{} [{}] {}",
            finding.file, finding.line, finding.type_id, finding.message
        ))
    }

    fn message(&self, text: &str) -> SinkResult<()> {
        self.line(text.to_string())
    }

    fn warning(&self, text: &str) -> SinkResult<()> {
        self.line(format!("WARNING: {text}"))
    }

    fn error(&self, text: &str) -> SinkResult<()> {
        self.line(format!("ERROR: {text}"))
    }

    fn target_started(&self, name: &str) -> SinkResult<()> {
        self.line(format!("--- {name} ---"))
    }

    fn target_finished(&self, name: &str) -> SinkResult<()> {
        self.line(format!("--- end {name} ---"))
    }

    fn build_failure(&self, text: &str) -> SinkResult<()> {
        self.line(format!("BUILD FAILURE: {text}"))
    }
}

#[cfg(unix)]
fn install_signal_handlers(stop: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    signal_hook::flag::register(SIGINT, stop.clone())?;
    signal_hook::flag::register(SIGTERM, stop)?;
    Ok(())
}

#[cfg(windows)]
fn install_signal_handlers(stop: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))?;
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if cli.verbose {
        config.verbose = true;
    }
    if cli.parse_out_of_date {
        config.parse_out_of_date = true;
    }
    for spec in &cli.watch {
        let (kind, path) = spec
            .split_once('=')
            .with_context(|| format!("--watch expects KIND=PATH, got '{spec}'"))?;
        config.targets.push(TargetConfig {
            kind: kind.parse().context("unsupported report kind")?,
            path: PathBuf::from(path),
        });
    }
    if config.targets.is_empty() {
        bail!("no watch targets configured; pass --watch KIND=PATH or --config FILE");
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "reportflow",
        verbose: cli.verbose,
    })?;

    let config = resolve_config(&cli)?;
    let handle = ReportPipeline::start_with_default_parsers(config, Arc::new(ConsoleSink))?;

    let stop = handle.stop_flag();
    install_signal_handlers(stop.clone())?;
    eprintln!("reportflow: watching (Ctrl-C to stop)");

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    let outcome = handle.stop()?;
    if !outcome.success() {
        let failed: Vec<&str> = outcome.failed.iter().map(|k| k.display_name()).collect();
        bail!("failed to process some reports: {}", failed.join(", "));
    }
    Ok(())
}
