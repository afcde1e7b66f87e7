//! End-to-end pipeline scenarios: real temp directories, real threads, a
//! recording sink asserting on exact event sequences.

use chrono::{TimeDelta, Utc};
use filetime::{set_file_mtime, FileTime};
use reportflow::{PipelineConfig, ReportKind, ReportPipeline, RunOutcome, TargetConfig};
use reportflow_test_utils::{append_report, eventually, write_report, RecordingSink, SinkEvent};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn fast_config(kind: ReportKind, path: &Path) -> PipelineConfig {
    PipelineConfig {
        build_start: Utc::now() - TimeDelta::hours(1),
        scan_interval_ms: 10,
        retry_interval_ms: 10,
        poll_timeout_ms: 50,
        targets: vec![TargetConfig {
            kind,
            path: path.to_path_buf(),
        }],
        ..PipelineConfig::default()
    }
}

fn start(config: PipelineConfig) -> (reportflow::PipelineHandle, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let handle = ReportPipeline::start_with_default_parsers(config, sink.clone())
        .expect("pipeline must start");
    (handle, sink)
}

fn lifecycle(sink: &RecordingSink) -> Vec<String> {
    sink.lifecycle_labels()
}

const SINGLE_SUITE_SEQUENCE: [&str; 4] = [
    "suiteStarted(TestCase)",
    "testStarted(TestCase.test)",
    "testFinished(TestCase.test)",
    "suiteFinished(TestCase)",
];

#[test]
fn one_shot_report_yields_exact_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, sink) = start(fast_config(ReportKind::Junit, dir.path()));

    write_report(
        &dir.path().join("report.xml"),
        r#"<testsuite name="TestCase" tests="1">
  <testcase classname="TestCase" name="test" time="0.03"/>
</testsuite>
"#,
    )
    .unwrap();

    assert!(eventually(WAIT, || lifecycle(&sink).len() >= 4));
    let outcome = handle.stop().unwrap();

    assert_eq!(lifecycle(&sink), SINGLE_SUITE_SEQUENCE);
    assert!(outcome.success());
    assert_eq!(outcome.processed, vec![ReportKind::Junit]);
}

#[test]
fn split_write_yields_identical_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.xml");
    // Only the suite's opening tag and the first test's opening tag exist
    // when the file is discovered.
    write_report(
        &report,
        "<testsuite name=\"TestCase\" tests=\"1\">\n  <testcase classname=\"TestCase\" name=\"test\" ",
    )
    .unwrap();

    let (handle, sink) = start(fast_config(ReportKind::Junit, dir.path()));

    assert!(eventually(WAIT, || {
        lifecycle(&sink).contains(&"suiteStarted(TestCase)".to_string())
    }));
    append_report(&report, "time=\"0.03\"/>\n</testsuite>\n").unwrap();

    assert!(eventually(WAIT, || lifecycle(&sink).len() >= 4));
    let outcome = handle.stop().unwrap();

    // Identical to the one-shot sequence, with no duplicate suiteStarted.
    assert_eq!(lifecycle(&sink), SINGLE_SUITE_SEQUENCE);
    assert!(outcome.success());
}

#[test]
fn same_suite_in_two_files_brackets_twice() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, sink) = start(fast_config(ReportKind::Junit, dir.path()));

    write_report(
        &dir.path().join("first.xml"),
        r#"<testsuite name="Shared"><testcase name="a" time="0"/></testsuite>"#,
    )
    .unwrap();
    assert!(eventually(WAIT, || lifecycle(&sink).len() >= 4));

    // The second file re-opens a suite of the same name after the first
    // instance finished; that is a fresh bracketed sequence, not a merge.
    write_report(
        &dir.path().join("second.xml"),
        r#"<testsuite name="Shared"><testcase name="b" time="0"/></testsuite>"#,
    )
    .unwrap();
    assert!(eventually(WAIT, || lifecycle(&sink).len() >= 8));
    let outcome = handle.stop().unwrap();

    assert_eq!(
        lifecycle(&sink),
        vec![
            "suiteStarted(Shared)",
            "testStarted(a)",
            "testFinished(a)",
            "suiteFinished(Shared)",
            "suiteStarted(Shared)",
            "testStarted(b)",
            "testFinished(b)",
            "suiteFinished(Shared)",
        ]
    );
    assert!(outcome.success());
}

#[test]
fn stalled_report_abandoned_after_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(ReportKind::Junit, dir.path());
    config.stale_attempt_ceiling = 3;
    let (handle, sink) = start(config);

    // A suite that never closes and a file that never grows.
    write_report(&dir.path().join("hung.xml"), "<testsuite name=\"Hung\">\n").unwrap();

    assert!(eventually(WAIT, || {
        sink.warnings()
            .iter()
            .any(|w| w.contains("unexpected finish or unsupported format"))
    }));
    let outcome = handle.stop().unwrap();

    // Abandoned exactly once, with the open suite force-closed.
    let stall_warnings = sink
        .warnings()
        .iter()
        .filter(|w| w.contains("unexpected finish or unsupported format"))
        .count();
    assert_eq!(stall_warnings, 1);
    assert_eq!(
        lifecycle(&sink),
        vec!["suiteStarted(Hung)", "suiteFinished(Hung)"]
    );
    assert_eq!(outcome.failed, vec![ReportKind::Junit]);
    // No kind processed anything: the failure reaches the build status.
    assert_eq!(sink.build_failures().len(), 1);
}

#[test]
fn file_appearing_just_before_stop_is_still_processed() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, sink) = start(fast_config(ReportKind::Junit, dir.path()));

    // Land the report and stop immediately: the watcher's guaranteed final
    // scan plus the processor's drain must still deliver every event.
    write_report(
        &dir.path().join("late.xml"),
        r#"<testsuite name="Late"><testcase name="t" time="0"/></testsuite>"#,
    )
    .unwrap();
    let outcome = handle.stop().unwrap();

    assert_eq!(
        lifecycle(&sink),
        vec![
            "suiteStarted(Late)",
            "testStarted(t)",
            "testFinished(t)",
            "suiteFinished(Late)",
        ]
    );
    assert!(outcome.success());
}

#[test]
fn mask_target_discovers_nested_reports() {
    let dir = tempfile::tempdir().unwrap();
    let mask = dir.path().join("**/*.xml");
    let (handle, sink) = start(fast_config(ReportKind::Junit, &mask));

    write_report(
        &dir.path().join("sub/inner.xml"),
        r#"<testsuite name="Nested"><testcase name="t" time="0"/></testsuite>"#,
    )
    .unwrap();
    write_report(&dir.path().join("sub/readme.txt"), "not a report").unwrap();

    assert!(eventually(WAIT, || lifecycle(&sink).len() >= 4));
    let outcome = handle.stop().unwrap();

    assert_eq!(
        lifecycle(&sink),
        vec![
            "suiteStarted(Nested)",
            "testStarted(t)",
            "testFinished(t)",
            "suiteFinished(Nested)",
        ]
    );
    assert!(outcome.success());
}

#[test]
fn inspection_reports_flow_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, sink) = start(fast_config(ReportKind::Pmd, dir.path()));

    write_report(
        &dir.path().join("pmd.xml"),
        r#"<pmd>
  <file name="src/Main.java">
    <violation beginline="3" rule="UnusedImports" ruleset="Import Statements" priority="3">Avoid unused imports</violation>
  </file>
</pmd>
"#,
    )
    .unwrap();

    assert!(eventually(WAIT, || lifecycle(&sink).len() >= 2));
    let outcome = handle.stop().unwrap();

    let events = sink.lifecycle_events();
    assert!(matches!(&events[0], SinkEvent::InspectionType(t) if t.id == "UnusedImports"));
    assert!(
        matches!(&events[1], SinkEvent::Inspection(f) if f.file == "src/Main.java" && f.line == 3)
    );
    assert_eq!(outcome.processed, vec![ReportKind::Pmd]);
}

#[test]
fn out_of_date_reports_are_ignored_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let stale = dir.path().join("old.xml");
    write_report(
        &stale,
        r#"<testsuite name="Old"><testcase name="t" time="0"/></testsuite>"#,
    )
    .unwrap();
    set_file_mtime(&stale, FileTime::from_unix_time(1_000_000, 0)).unwrap();

    let mut config = fast_config(ReportKind::Junit, dir.path());
    config.build_start = Utc::now();
    let (handle, sink) = start(config);

    std::thread::sleep(Duration::from_millis(150));
    let outcome = handle.stop().unwrap();

    assert!(lifecycle(&sink).is_empty());
    assert!(outcome.processed.is_empty());
    assert!(outcome.failed.is_empty());
    // The totals still flag the configured path as having matched nothing.
    assert!(sink
        .warnings()
        .iter()
        .any(|w| w.contains("couldn't find any matching files")));
}

#[test]
fn paths_added_at_runtime_are_watched() {
    let dir = tempfile::tempdir().unwrap();
    let initial = dir.path().join("initial");
    std::fs::create_dir_all(&initial).unwrap();
    let (handle, sink) = start(fast_config(ReportKind::Junit, &initial));

    let extra = dir.path().join("extra");
    write_report(
        &extra.join("report.xml"),
        r#"<testsuite name="Extra"><testcase name="t" time="0"/></testsuite>"#,
    )
    .unwrap();
    handle.add_paths(ReportKind::Junit, vec![extra]).unwrap();

    assert!(eventually(WAIT, || lifecycle(&sink).len() >= 4));
    let outcome = handle.stop().unwrap();
    assert!(outcome.success());
    assert_eq!(lifecycle(&sink)[0], "suiteStarted(Extra)");
}

#[test]
fn run_outcome_reports_mixed_results() {
    let dir = tempfile::tempdir().unwrap();
    let junit_dir = dir.path().join("junit");
    let hung_dir = dir.path().join("hung");
    std::fs::create_dir_all(&junit_dir).unwrap();
    std::fs::create_dir_all(&hung_dir).unwrap();

    let mut config = fast_config(ReportKind::Junit, &junit_dir);
    config.stale_attempt_ceiling = 3;
    config.targets.push(TargetConfig {
        kind: ReportKind::Nunit,
        path: hung_dir.clone(),
    });
    let (handle, sink) = start(config);

    write_report(
        &junit_dir.join("good.xml"),
        r#"<testsuite name="Good"><testcase name="t" time="0"/></testsuite>"#,
    )
    .unwrap();
    write_report(&hung_dir.join("bad.xml"), "<test-results>\n").unwrap();

    assert!(eventually(WAIT, || {
        sink.warnings()
            .iter()
            .any(|w| w.contains("unexpected finish"))
            && lifecycle(&sink).len() >= 4
    }));
    let RunOutcome { processed, failed } = handle.stop().unwrap();

    assert_eq!(processed, vec![ReportKind::Junit]);
    assert_eq!(failed, vec![ReportKind::Nunit]);
    // Something was processed, so the failure is reported but the build
    // status is not flagged.
    assert!(sink.errors().iter().any(|e| e.contains("Failed to process some")));
    assert!(sink.build_failures().is_empty());
}
