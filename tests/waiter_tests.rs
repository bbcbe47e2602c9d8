//! Integration tests for the completion waiter and its retry policy.


use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use farm_dispatch::classifier::Classifier;
use farm_dispatch::markers::{Marker, MarkerState};
use farm_dispatch::registry::{JobStatus, SubmitOptions};
use farm_dispatch::waiter::{CompletionWaiter, WaitOptions, WaitOutcome};
use test_harness::{fast_timing, TestFarm};

fn quick(timeout: Duration) -> WaitOptions {
    WaitOptions {
        poll_interval: Duration::from_millis(20),
        timeout,
        ..WaitOptions::default()
    }
}

#[test]
fn test_wait_returns_immediately_when_settled() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.complete(&id, true, "ok\n");

    let mut waiter = CompletionWaiter::new(&mut farm.registry, Classifier::default());
    let report = waiter
        .wait_for_all(&WaitOptions {
            poll_interval: Duration::from_secs(60),
            ..WaitOptions::default()
        })
        .unwrap();

    assert_eq!(report.outcome, WaitOutcome::Completed);
    assert_eq!(report.passes, 1);
    assert_eq!(report.buckets.ids(JobStatus::Passed), &[id]);
}

#[test]
fn test_wait_sees_markers_written_mid_wait() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let markers = farm.registry.markers().clone();
    let worker_id = id.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        markers.touch(&worker_id, Marker::Started).unwrap();
        markers.touch(&worker_id, Marker::Passed).unwrap();
    });

    let mut waiter = CompletionWaiter::new(&mut farm.registry, Classifier::default());
    let report = waiter.wait_for_all(&quick(Duration::from_secs(10))).unwrap();
    worker.join().unwrap();

    assert_eq!(report.outcome, WaitOutcome::Completed);
    assert!(report.passes >= 2);
    assert_eq!(report.buckets.bucket_of(&id), Some(JobStatus::Passed));
    assert_eq!(report.resubmitted, 0);
}

#[test]
fn test_wait_times_out_on_stuck_job() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let start = Instant::now();
    let mut waiter = CompletionWaiter::new(&mut farm.registry, Classifier::default());
    let report = waiter.wait_for_all(&quick(Duration::from_millis(100))).unwrap();

    assert_eq!(report.outcome, WaitOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(report.buckets.bucket_of(&id), Some(JobStatus::Queuing));
}

#[test]
fn test_lost_jobs_are_retried_up_to_limit() {
    let mut farm = TestFarm::with_timing(fast_timing());
    farm.scheduler.vanish_submissions(true);
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let classifier = Classifier::new(fast_timing());
    let mut waiter = CompletionWaiter::new(&mut farm.registry, classifier);
    let report = waiter
        .wait_for_all(&WaitOptions {
            max_lost_retries: 2,
            ..quick(Duration::from_secs(10))
        })
        .unwrap();

    drop(waiter);
    assert_eq!(report.outcome, WaitOutcome::Completed);
    assert_eq!(report.resubmitted, 2);
    assert_eq!(report.buckets.bucket_of(&id), Some(JobStatus::Lost));
    assert_eq!(farm.registry.get(&id).unwrap().submission_count, 3);
    assert_eq!(farm.scheduler.submissions().len(), 3);
}

#[test]
fn test_failed_jobs_not_retried_by_default() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.complete(&id, false, "boom\n");

    let mut waiter = CompletionWaiter::new(&mut farm.registry, Classifier::default());
    let report = waiter.wait_for_all(&quick(Duration::from_secs(10))).unwrap();

    drop(waiter);
    assert_eq!(report.outcome, WaitOutcome::Completed);
    assert_eq!(report.resubmitted, 0);
    assert_eq!(report.buckets.bucket_of(&id), Some(JobStatus::Failed));
    assert_eq!(farm.registry.get(&id).unwrap().submission_count, 1);
}

#[test]
fn test_failed_jobs_retried_when_allowed() {
    let mut farm = TestFarm::with_timing(fast_timing());
    farm.scheduler.vanish_submissions(true);
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.complete(&id, false, "boom\n");

    let classifier = Classifier::new(fast_timing());
    let mut waiter = CompletionWaiter::new(&mut farm.registry, classifier);
    let report = waiter
        .wait_for_all(&WaitOptions {
            max_fail_retries: 1,
            max_lost_retries: 0,
            ..quick(Duration::from_secs(10))
        })
        .unwrap();

    drop(waiter);
    assert_eq!(report.outcome, WaitOutcome::Completed);
    assert_eq!(report.resubmitted, 1);
    // The retry vanished from the farm and is not retried again.
    assert_eq!(report.buckets.bucket_of(&id), Some(JobStatus::Lost));
    assert_eq!(farm.registry.get(&id).unwrap().submission_count, 2);
    assert_eq!(farm.registry.markers().state(&id), MarkerState::NotStarted);
}

#[test]
fn test_submission_errors_are_not_retried() {
    let mut farm = TestFarm::new();
    farm.scheduler.reject_submissions(true);
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let mut waiter = CompletionWaiter::new(&mut farm.registry, Classifier::default());
    let report = waiter.wait_for_all(&quick(Duration::from_secs(10))).unwrap();

    assert_eq!(report.outcome, WaitOutcome::Completed);
    assert_eq!(report.resubmitted, 0);
    assert_eq!(report.buckets.bucket_of(&id), Some(JobStatus::Lost));
    assert_eq!(farm.scheduler.submissions().len(), 1);
}

#[test]
fn test_interrupt_stops_wait() {
    let mut farm = TestFarm::new();
    farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let flag = Arc::new(AtomicBool::new(true));
    let mut waiter =
        CompletionWaiter::new(&mut farm.registry, Classifier::default()).with_interrupt(flag);
    let report = waiter.wait_for_all(&quick(Duration::from_secs(60))).unwrap();

    assert_eq!(report.outcome, WaitOutcome::Interrupted);
    assert_eq!(report.passes, 1);
}

#[test]
fn test_waiter_wait_for_ids_reads_markers_only() {
    let mut farm = TestFarm::new();
    let a = farm.registry.submit_job("a", SubmitOptions::default()).unwrap();
    let b = farm.registry.submit_job("b", SubmitOptions::default()).unwrap();
    farm.mark(&a, Marker::Started);
    farm.mark(&a, Marker::Passed);
    farm.mark(&b, Marker::Started);

    let waiter = CompletionWaiter::new(&mut farm.registry, Classifier::default());
    let report = waiter.wait_for_ids(
        &[a.clone(), b.clone()],
        Duration::from_millis(10),
        Duration::from_millis(50),
    );

    assert!(report.timed_out);
    assert!(!report.all_passed());
    assert_eq!(report.states[&a], MarkerState::Passed);
    assert_eq!(report.states[&b], MarkerState::Started);
    assert_eq!(report.not_passed(), vec![b.as_str()]);
}

#[test]
fn test_pass_callback_sees_every_summary() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let markers = farm.registry.markers().clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        markers.touch(&id, Marker::Started).unwrap();
        markers.touch(&id, Marker::Passed).unwrap();
    });

    let mut summaries = Vec::new();
    let report = {
        let mut waiter = CompletionWaiter::new(&mut farm.registry, Classifier::default())
            .on_pass(|buckets| summaries.push(buckets.to_string()));
        waiter.wait_for_all(&quick(Duration::from_secs(10))).unwrap()
    };
    worker.join().unwrap();

    assert_eq!(summaries.len(), report.passes as usize);
    assert_eq!(
        summaries.first().map(String::as_str),
        Some("queuing: 1  running: 0  lost: 0  passed: 0  failed: 0")
    );
    assert_eq!(
        summaries.last().map(String::as_str),
        Some("queuing: 0  running: 0  lost: 0  passed: 1  failed: 0")
    );
}
