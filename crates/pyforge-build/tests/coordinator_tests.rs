//! Batch builds through the coordinator

mod common;

use common::{orchestrator, Behavior, Gauge, MockBackend, TestProject};
use pretty_assertions::assert_eq;
use pyforge_build::{BackendId, BuildRequest, Coordinator, FailureClass, OutcomeStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn batch(project: &TestProject, count: usize) -> Vec<BuildRequest> {
    (0..count)
        .map(|i| {
            let name = format!("tool_{}.py", i);
            project.add_script(&name, &format!("import sys\nprint({})\n", i));
            project.request(&name)
        })
        .collect()
}

#[test]
fn test_batch_respects_worker_limit() {
    let project = TestProject::console();
    let gauge = Arc::new(Gauge::default());
    let translator = MockBackend::new(BackendId::Translator, Behavior::Succeed)
        .with_delay(Duration::from_millis(100))
        .with_gauge(gauge.clone())
        .shared();
    let coordinator = Coordinator::new(Arc::new(orchestrator(
        &[BackendId::Translator],
        &[translator.clone()],
    )));
    let requests = batch(&project, 5);

    let outcomes = coordinator.run_all(&requests, 2);

    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(gauge.peak() <= 2, "peak concurrency {}", gauge.peak());
    assert_eq!(translator.calls(), 5);
    let entries: Vec<_> = outcomes.iter().map(|o| o.entry_point.clone()).collect();
    let expected: Vec<_> = requests.iter().map(|r| r.entry_point.clone()).collect();
    assert_eq!(entries, expected);
}

#[test]
fn test_outputs_are_partitioned_per_entry() {
    let project = TestProject::console();
    let translator = MockBackend::new(BackendId::Translator, Behavior::Succeed).shared();
    let coordinator = Coordinator::new(Arc::new(orchestrator(
        &[BackendId::Translator],
        &[translator],
    )));
    let requests = batch(&project, 3);

    let outcomes = coordinator.run_all(&requests, 3);

    let dirs: BTreeSet<_> = outcomes
        .iter()
        .map(|o| o.artifact.as_ref().and_then(|a| a.parent()).unwrap().to_path_buf())
        .collect();
    assert_eq!(dirs.len(), 3);
    assert!(dirs.iter().all(|d| d.starts_with(project.path().join("dist"))));
}

#[test]
fn test_panicking_build_is_isolated() {
    let project = TestProject::console();
    let panicking = MockBackend::new(BackendId::Translator, Behavior::Panic).shared();
    let coordinator = Coordinator::new(Arc::new(orchestrator(
        &[BackendId::Translator],
        &[panicking],
    )));
    let requests = batch(&project, 3);

    let outcomes = coordinator.run_all(&requests, 2);

    assert_eq!(outcomes.len(), 3);
    for outcome in &outcomes {
        assert_eq!(outcome.failure_class(), Some(FailureClass::Internal));
        assert_eq!(outcome.exit_code(), 6);
    }
    assert_eq!(coordinator.orchestrator().cache().stats().in_flight, 0);
}

#[test]
fn test_one_failure_does_not_stop_the_batch() {
    let project = TestProject::console();
    let translator = MockBackend::new(BackendId::Translator, Behavior::Succeed).shared();
    let coordinator = Coordinator::new(Arc::new(orchestrator(
        &[BackendId::Translator],
        &[translator],
    )));
    let mut requests = batch(&project, 2);
    requests.insert(1, project.request("missing.py"));

    let outcomes = coordinator.run_all(&requests, 1);

    let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            OutcomeStatus::Succeeded,
            OutcomeStatus::Failed,
            OutcomeStatus::Succeeded
        ]
    );
}

#[test]
fn test_stop_on_error_cancels_the_rest() {
    let project = TestProject::console();
    let translator = MockBackend::new(BackendId::Translator, Behavior::Succeed).shared();
    let coordinator = Coordinator::new(Arc::new(orchestrator(
        &[BackendId::Translator],
        &[translator.clone()],
    )))
    .with_stop_on_error(true);
    let mut requests = vec![project.request("missing.py")];
    requests.extend(batch(&project, 3));

    // One worker runs the requests in order.
    let outcomes = coordinator.run_all(&requests, 1);

    assert_eq!(outcomes[0].failure_class(), Some(FailureClass::Configuration));
    for outcome in &outcomes[1..] {
        assert_eq!(outcome.failure_class(), Some(FailureClass::Cancelled));
        assert!(outcome.attempts.is_empty());
    }
    assert_eq!(translator.calls(), 0);
}

#[test]
fn test_cancelled_batch_resolves_every_request() {
    let project = TestProject::console();
    let translator = MockBackend::new(BackendId::Translator, Behavior::Succeed).shared();
    let orch = Arc::new(orchestrator(&[BackendId::Translator], &[translator.clone()]));
    orch.cancellation().cancel();
    let coordinator = Coordinator::new(orch);

    let outcomes = coordinator.run_all(&batch(&project, 4), 2);

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes
        .iter()
        .all(|o| o.failure_class() == Some(FailureClass::Cancelled) && o.exit_code() == 5));
    assert_eq!(translator.calls(), 0);
}

#[test]
fn test_duplicate_requests_build_once() {
    let project = TestProject::console();
    let translator = MockBackend::new(BackendId::Translator, Behavior::Succeed)
        .with_delay(Duration::from_millis(100))
        .shared();
    let coordinator = Coordinator::new(Arc::new(orchestrator(
        &[BackendId::Translator],
        &[translator.clone()],
    )))
    .with_partitioned_outputs(false);
    let request = project.request("main.py");
    let requests = vec![request.clone(), request.clone(), request];

    let outcomes = coordinator.run_all(&requests, 3);

    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(translator.calls(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.from_cache).count(), 2);
}
