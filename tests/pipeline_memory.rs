//! Failure handling against the in-process store

mod common;

use common::{SINK, SOURCE, scenario};
use coupon_pipeline::database::{DatabaseBackend, DatabaseError, FaultPlan, MemoryBackend};
use coupon_pipeline::models::WriteMode;
use coupon_pipeline::pipeline::{
    CommitPolicy, PipelineError, RunOutcome, RunSettings, compare_strategies, run,
};
use coupon_pipeline::seed::synthetic_candidates;

fn store(faults: FaultPlan) -> MemoryBackend {
    let mut store = MemoryBackend::with_faults(faults);
    store.initialize(SOURCE, SINK).unwrap();
    store.load_candidates(SOURCE, &scenario()).unwrap();
    store
}

fn committed_ids(store: &MemoryBackend) -> Vec<String> {
    let mut ids: Vec<String> = store
        .committed_rows(SINK)
        .iter()
        .map(|r| r.customer_id.clone())
        .collect();
    ids.sort();
    ids
}

#[test]
fn partial_batch_keeps_the_accepted_rows() {
    let mut store = store(FaultPlan {
        partial_batches: true,
        ..FaultPlan::reject(&["C003"])
    });
    let settings = RunSettings::default()
        .with_mode(WriteMode::ArrayBatch)
        .with_commit(CommitPolicy::EveryN(2));

    let report = run(&mut store, settings).unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.statistics.errors, 1);
    assert_eq!(report.statistics.written, 4);
    assert_eq!(report.statistics.replays, 0);
    assert_eq!(committed_ids(&store), vec!["C001", "C002", "C004", "C005"]);
}

#[test]
fn whole_batch_rejection_counts_every_row() {
    let mut store = store(FaultPlan::reject(&["C003"]));
    let settings = RunSettings::default()
        .with_mode(WriteMode::ArrayBatch)
        .with_commit(CommitPolicy::EveryN(2));

    let report = run(&mut store, settings).unwrap();
    assert_eq!(report.statistics.errors, 2);
    assert_eq!(report.statistics.written, 3);
    assert_eq!(committed_ids(&store), vec!["C001", "C002", "C005"]);
}

#[test]
fn commit_failure_is_fatal_and_rolls_back() {
    let mut store = store(FaultPlan {
        fail_commit_at: Some(2),
        ..FaultPlan::default()
    });
    let settings = RunSettings::default()
        .with_mode(WriteMode::PerRow)
        .with_commit(CommitPolicy::EveryN(2));

    let err = run(&mut store, settings).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Fatal {
            source: DatabaseError::CommitFailed(_),
            ..
        }
    ));

    let stats = err.statistics().unwrap();
    assert_eq!(stats.written, 2);
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.rollbacks, 1);
    assert_eq!(committed_ids(&store), vec!["C001", "C002"]);
    assert!(!store.in_transaction());
}

#[test]
fn fetch_failure_keeps_committed_windows() {
    let mut store = store(FaultPlan {
        fail_fetch_at: Some(3),
        ..FaultPlan::default()
    });
    let settings = RunSettings::default()
        .with_mode(WriteMode::ArrayBatch)
        .with_prefetch_window(2)
        .with_commit(CommitPolicy::EveryN(2));

    let err = run(&mut store, settings).unwrap_err();
    assert!(err.to_string().contains("Run aborted after 4 rows written"));

    let stats = err.statistics().unwrap();
    assert_eq!(stats.written, 4);
    // The failed round trip never delivered a page
    assert_eq!(stats.fetches, 2);
    assert_eq!(store.activity().fetches, 3);
    assert_eq!(committed_ids(&store), vec!["C001", "C002", "C003", "C004"]);
}

#[test]
fn prepared_statement_is_released_on_every_path() {
    let mut clean = store(FaultPlan::default());
    let settings = RunSettings::default().with_mode(WriteMode::ReusedStatement);
    run(&mut clean, settings.clone()).unwrap();
    assert!(!clean.has_prepared_insert());
    assert_eq!(clean.activity().prepares, 1);
    assert_eq!(clean.activity().releases, 1);

    let mut failing = store(FaultPlan {
        fail_commit_at: Some(1),
        ..FaultPlan::default()
    });
    assert!(run(&mut failing, settings).is_err());
    assert!(!failing.has_prepared_insert());
    assert_eq!(failing.activity().releases, 1);
}

#[test]
fn ceiling_on_batches_stops_after_the_offending_batch() {
    let mut store = store(FaultPlan::reject(&["C002"]));
    let settings = RunSettings::default()
        .with_mode(WriteMode::ArrayBatch)
        .with_batch_size(1)
        .with_error_ceiling(0);

    let report = run(&mut store, settings).unwrap();
    assert_eq!(report.outcome, RunOutcome::ErrorCeilingReached);
    assert_eq!(report.statistics.errors, 1);
    assert_eq!(report.statistics.written, 1);
    assert_eq!(report.statistics.commits, 1);
    assert_eq!(committed_ids(&store), vec!["C001"]);
}

#[test]
fn at_end_holds_a_single_transaction() {
    let mut store = MemoryBackend::new();
    store.initialize(SOURCE, SINK).unwrap();
    store
        .load_candidates(SOURCE, &synthetic_candidates(2_500))
        .unwrap();
    let settings = RunSettings::default()
        .with_mode(WriteMode::ArrayBatch)
        .with_batch_size(500)
        .with_commit(CommitPolicy::AtEnd);

    let report = run(&mut store, settings).unwrap();
    assert_eq!(report.statistics.commits, 1);
    assert_eq!(store.activity().commits, 1);
    assert_eq!(
        store.committed_rows(SINK).len() as u64,
        report.statistics.written
    );
    assert!(report.statistics.batches >= 4);
}

#[test]
fn empty_source_completes_cleanly() {
    let mut store = MemoryBackend::new();
    store.initialize(SOURCE, SINK).unwrap();

    for mode in WriteMode::ALL {
        let report = run(&mut store, RunSettings::default().with_mode(mode)).unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed, "{mode}");
        assert_eq!(report.statistics.written, 0, "{mode}");
        assert_eq!(report.statistics.errors, 0, "{mode}");
    }
    assert!(store.committed_rows(SINK).is_empty());
}

#[test]
fn strategies_agree_under_every_commit_policy() {
    for policy in [
        CommitPolicy::PerWrite,
        CommitPolicy::EveryN(7),
        CommitPolicy::AtEnd,
    ] {
        let mut store = MemoryBackend::new();
        store.initialize(SOURCE, SINK).unwrap();
        store
            .load_candidates(SOURCE, &synthetic_candidates(150))
            .unwrap();

        let settings = RunSettings::default()
            .with_batch_size(16)
            .with_commit(policy);
        let comparison = compare_strategies(&mut store, &settings).unwrap();
        assert!(comparison.is_equivalent(), "{policy}");
    }
}
