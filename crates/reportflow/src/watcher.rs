//! Directory watcher: discovers report files while the build runs.
//!
//! The watcher owns all target and statistics state; nothing else reads or
//! writes it. It rescans every configured target on a fixed interval and
//! pushes newly discovered files onto the handoff queue, blocking when the
//! queue is full so a slow processor throttles discovery. Runtime target
//! additions arrive over a control channel drained at the top of each cycle.
//!
//! Stop protocol: once the shared stop flag is observed at the top of the
//! loop, exactly one more full scan runs, so files that appeared just before
//! shutdown are still discovered. The queue sender is dropped on exit; the
//! processor treats the resulting disconnect as "final scan done, queue
//! drained means done".

use crate::paths::{classify, PathMatcher, TargetShape};
use crate::queue::{NotificationSender, ReportNotification};
use reportflow_protocol::{ReportKind, ReportSink};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, warn};

/// Requests the pipeline handle can send to a running watcher.
pub enum WatchCommand {
    AddPaths {
        kind: ReportKind,
        paths: Vec<PathBuf>,
    },
}

/// Per-kind discovery summary, keyed by the target that found each file.
/// Feeds only the end-of-run totals; dedup correctness lives in `seen`.
#[derive(Default)]
struct TypeStatistics {
    seen: BTreeSet<PathBuf>,
    direct: BTreeSet<PathBuf>,
    by_dir: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    by_mask: BTreeMap<String, BTreeSet<PathBuf>>,
}

#[derive(Default)]
struct TypeWatch {
    paths: BTreeSet<PathBuf>,
    stats: TypeStatistics,
}

enum Bucket<'a> {
    Direct,
    Dir(&'a Path),
    Mask(&'a str),
}

pub struct DirectoryWatcher {
    sink: Arc<dyn ReportSink>,
    matcher: PathMatcher,
    scan_interval: Duration,
    verbose: bool,
    parse_out_of_date: bool,
    stop: Arc<AtomicBool>,
    control: mpsc::Receiver<WatchCommand>,
    queue: Option<NotificationSender>,
    watches: BTreeMap<ReportKind, TypeWatch>,
}

impl DirectoryWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sink: Arc<dyn ReportSink>,
        matcher: PathMatcher,
        scan_interval: Duration,
        verbose: bool,
        parse_out_of_date: bool,
        stop: Arc<AtomicBool>,
        control: mpsc::Receiver<WatchCommand>,
        queue: NotificationSender,
    ) -> Self {
        Self {
            sink,
            matcher,
            scan_interval,
            verbose,
            parse_out_of_date,
            stop,
            control,
            queue: Some(queue),
            watches: BTreeMap::new(),
        }
    }

    /// Scan loop. Consumes the watcher and returns it on termination so the
    /// owner can emit [`DirectoryWatcher::log_totals`] after joining.
    pub fn run(mut self) -> Self {
        debug!("report watcher started");
        loop {
            self.drain_control();
            let stopping = self.stop.load(Ordering::Relaxed);
            self.scan();
            if stopping {
                break;
            }
            std::thread::sleep(self.scan_interval);
        }
        // Signals the processor that no further notifications can arrive.
        self.queue = None;
        debug!("report watcher terminated");
        self
    }

    fn drain_control(&mut self) {
        while let Ok(command) = self.control.try_recv() {
            match command {
                WatchCommand::AddPaths { kind, paths } => self.add_paths(kind, paths),
            }
        }
    }

    /// Register paths for a report kind. Paths already watched for that kind
    /// are ignored; a second distinct inspection kind is rejected outright.
    pub fn add_paths(&mut self, kind: ReportKind, paths: Vec<PathBuf>) {
        if !self.watches.contains_key(&kind) {
            if kind.is_inspection() && self.watches.keys().any(|k| k.is_inspection()) {
                let _ = self.sink.warning(&format!(
                    "Two different inspections can not be processed during one build, skipping {} reports",
                    kind.display_name()
                ));
                if !paths.is_empty() {
                    self.log_paths_block(kind, &paths, "Skip watching:");
                }
                return;
            }
            self.watches.insert(kind, TypeWatch::default());
        }

        let watch = match self.watches.get_mut(&kind) {
            Some(watch) => watch,
            None => return,
        };
        let fresh: Vec<PathBuf> = paths
            .into_iter()
            .filter(|p| !watch.paths.contains(p))
            .collect();
        watch.paths.extend(fresh.iter().cloned());

        let target = format!("{} report watcher", kind.display_name());
        let _ = self.sink.target_started(&target);
        if fresh.is_empty() {
            let _ = self.sink.warning("Watching paths: <no paths>");
        } else {
            let _ = self.sink.message("Watching paths:");
            for path in &fresh {
                let _ = self.sink.message(&path.display().to_string());
            }
        }
        let _ = self.sink.target_finished(&target);

        if !self.parse_out_of_date {
            self.log_existing_stale_files(kind, &fresh);
        }
    }

    /// Files that already exist under freshly registered targets but predate
    /// the build start will never be picked up; say so once.
    fn log_existing_stale_files(&mut self, kind: ReportKind, targets: &[PathBuf]) {
        let mut stale = BTreeSet::new();
        for target in targets {
            for file in self.matcher.expand_ignoring_freshness(target) {
                if self.matcher.is_out_of_date(&file) {
                    stale.insert(file);
                }
            }
        }
        if !stale.is_empty() {
            let stale: Vec<PathBuf> = stale.into_iter().collect();
            self.log_paths_block(kind, &stale, "Found existing files (ignored as out-of-date):");
        }
    }

    fn log_paths_block(&self, kind: ReportKind, paths: &[PathBuf], header: &str) {
        let target = format!("{} report watcher", kind.display_name());
        let _ = self.sink.target_started(&target);
        let _ = self.sink.warning(header);
        for path in paths {
            let _ = self.sink.warning(&path.display().to_string());
        }
        let _ = self.sink.target_finished(&target);
    }

    fn scan(&mut self) {
        let kinds: Vec<ReportKind> = self.watches.keys().copied().collect();
        for kind in kinds {
            let paths: Vec<PathBuf> = match self.watches.get(&kind) {
                Some(watch) => watch.paths.iter().cloned().collect(),
                None => continue,
            };
            for path in paths {
                match classify(&path) {
                    TargetShape::File => {
                        for file in self.matcher.expand(&path) {
                            self.discover(kind, Bucket::Direct, file);
                        }
                    }
                    TargetShape::Directory => {
                        let found = self.matcher.expand(&path);
                        if let Some(watch) = self.watches.get_mut(&kind) {
                            watch.stats.by_dir.entry(path.clone()).or_default();
                        }
                        for file in found {
                            self.discover(kind, Bucket::Dir(&path), file);
                        }
                    }
                    TargetShape::Mask => {
                        let found = self.matcher.expand(&path);
                        let mask = path.to_string_lossy().into_owned();
                        if let Some(watch) = self.watches.get_mut(&kind) {
                            watch.stats.by_mask.entry(mask.clone()).or_default();
                        }
                        for file in found {
                            self.discover(kind, Bucket::Mask(&mask), file);
                        }
                    }
                }
            }
        }
    }

    fn discover(&mut self, kind: ReportKind, bucket: Bucket<'_>, file: PathBuf) {
        let Some(watch) = self.watches.get_mut(&kind) else {
            return;
        };
        if !watch.stats.seen.insert(file.clone()) {
            return;
        }
        match bucket {
            Bucket::Direct => {
                watch.stats.direct.insert(file.clone());
            }
            Bucket::Dir(dir) => {
                watch
                    .stats
                    .by_dir
                    .entry(dir.to_path_buf())
                    .or_default()
                    .insert(file.clone());
            }
            Bucket::Mask(mask) => {
                watch
                    .stats
                    .by_mask
                    .entry(mask.to_string())
                    .or_default()
                    .insert(file.clone());
            }
        }
        debug!(file = %file.display(), kind = %kind, "queueing discovered report");
        if let Some(queue) = &self.queue {
            if queue.put(ReportNotification { kind, file }).is_err() {
                warn!("report processor is gone; dropping notification");
            }
        }
    }

    /// End-of-run summary: per kind, how many files were found, broken down
    /// by the directory/mask that found them, plus a warning for every
    /// configured path that never matched anything.
    pub fn log_totals(&self) {
        for (kind, watch) in &self.watches {
            let stats = &watch.stats;
            let target = format!("{} report watcher", kind.display_name());
            let _ = self.sink.target_started(&target);

            if stats.seen.is_empty() {
                let _ = self.sink.warning("no files found");
            } else {
                let _ = self
                    .sink
                    .message(&format!("{} file(s) found", stats.seen.len()));
            }

            for (dir, files) in &stats.by_dir {
                self.log_bucket(&dir.display().to_string(), files);
            }
            for (mask, files) in &stats.by_mask {
                self.log_bucket(mask, files);
            }
            if self.verbose {
                for file in &stats.direct {
                    let _ = self.sink.message(&format!("{} found", file.display()));
                }
            }

            for path in &watch.paths {
                if !self.target_matched(stats, path) {
                    let _ = self.sink.warning(&format!(
                        "{}: couldn't find any matching files",
                        path.display()
                    ));
                }
            }

            let _ = self.sink.target_finished(&target);
        }
    }

    fn log_bucket(&self, key: &str, files: &BTreeSet<PathBuf>) {
        if files.is_empty() {
            let _ = self.sink.warning(&format!("{key}: no files found"));
        } else if self.verbose {
            let _ = self
                .sink
                .message(&format!("{key}: {} file(s) found", files.len()));
            for file in files {
                let _ = self.sink.message(&format!("{} found", file.display()));
            }
        }
    }

    fn target_matched(&self, stats: &TypeStatistics, path: &Path) -> bool {
        match classify(path) {
            TargetShape::File => stats.direct.contains(path),
            TargetShape::Directory => stats
                .by_dir
                .get(path)
                .map_or(false, |files| !files.is_empty()),
            TargetShape::Mask => stats
                .by_mask
                .get(path.to_string_lossy().as_ref())
                .map_or(false, |files| !files.is_empty()),
        }
    }
}
