//! Integration tests for the per-pass lifecycle classification.


use chrono::{DateTime, Duration, Utc};
use farm_dispatch::classifier::{Classification, Classifier};
use farm_dispatch::markers::Marker;
use farm_dispatch::registry::{JobStatus, SubmitOptions};
use farm_dispatch::scheduler::{QueueSnapshot, SchedulerAdapter};
use test_harness::TestFarm;

fn submitted_at(farm: &TestFarm, id: &str) -> DateTime<Utc> {
    farm.registry.get(id).unwrap().submitted_at
}

fn classify_at(farm: &mut TestFarm, now: DateTime<Utc>) -> Classification {
    let probe = farm.scheduler.snapshot().unwrap();
    Classifier::default().classify(&mut farm.registry, &probe, now)
}

#[test]
fn test_queued_in_probe_is_queuing() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let later = submitted_at(&farm, &id) + Duration::hours(2);
    let buckets = classify_at(&mut farm, later);

    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Queuing));
}

#[test]
fn test_missing_from_probe_is_queuing_then_lost() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.scheduler.finish_all();
    let t0 = submitted_at(&farm, &id);

    let buckets = classify_at(&mut farm, t0 + Duration::seconds(30));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Queuing));

    let buckets = classify_at(&mut farm, t0 + Duration::seconds(61));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Lost));

    // Lost from the heuristics is not cached.
    assert!(farm.registry.get(&id).unwrap().status.is_none());
}

#[test]
fn test_classification_is_idempotent() {
    let mut farm = TestFarm::new();
    let a = farm.registry.submit_job("a", SubmitOptions::default()).unwrap();
    let b = farm.registry.submit_job("b", SubmitOptions::default()).unwrap();
    farm.registry.submit_job("c", SubmitOptions::default()).unwrap();
    farm.complete(&a, false, "boom\n");
    farm.scheduler.start(farm.external_id(&b));

    let now = Utc::now();
    let first = classify_at(&mut farm, now);
    let second = classify_at(&mut farm, now);

    assert_eq!(first, second);
    assert_eq!(first.total(), 3);
    assert_eq!(first.to_string(), "queuing: 1  running: 1  lost: 0  passed: 0  failed: 1");
}

#[test]
fn test_terminal_status_is_sticky() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.complete(&id, true, "ok\n");

    let now = Utc::now();
    let buckets = classify_at(&mut farm, now);
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Passed));

    let job = farm.registry.get(&id).unwrap();
    assert_eq!(job.status, Some(JobStatus::Passed));
    assert_eq!(job.completed_at, Some(now));

    // Markers vanishing afterwards does not change the cached answer.
    farm.registry.markers().clear(&id).unwrap();
    let buckets = classify_at(&mut farm, now + Duration::hours(1));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Passed));
}

#[test]
fn test_failed_marker_is_terminal() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.complete(&id, false, "boom\n");

    let buckets = classify_at(&mut farm, Utc::now());
    assert_eq!(buckets.ids(JobStatus::Failed), &[id.clone()]);
    assert_eq!(farm.registry.get(&id).unwrap().status, Some(JobStatus::Failed));
}

#[test]
fn test_running_in_probe_writes_started_marker() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.scheduler.start(farm.external_id(&id));
    assert!(!farm.registry.markers().has(&id, Marker::Started));

    let buckets = classify_at(&mut farm, Utc::now());

    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Running));
    assert!(farm.registry.markers().has(&id, Marker::Started));
}

#[test]
fn test_started_without_result_gets_grace_window() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.mark(&id, Marker::Started);
    farm.scheduler.finish_all();

    let t1 = submitted_at(&farm, &id) + Duration::minutes(10);
    let buckets = classify_at(&mut farm, t1);
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Running));
    assert_eq!(farm.registry.get(&id).unwrap().completed_at, Some(t1));

    let buckets = classify_at(&mut farm, t1 + Duration::seconds(30));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Running));

    let buckets = classify_at(&mut farm, t1 + Duration::seconds(61));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Lost));
}

#[test]
fn test_rerun_job_gets_fresh_grace_window() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    let external = farm.external_id(&id);
    farm.mark(&id, Marker::Started);
    farm.scheduler.finish_all();

    let t1 = submitted_at(&farm, &id) + Duration::minutes(10);
    assert_eq!(classify_at(&mut farm, t1).bucket_of(&id), Some(JobStatus::Running));
    assert_eq!(farm.registry.get(&id).unwrap().completed_at, Some(t1));

    // The scheduler reruns the job after a host failure.
    farm.scheduler.requeue(external);
    let buckets = classify_at(&mut farm, t1 + Duration::seconds(30));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Queuing));
    assert!(farm.registry.get(&id).unwrap().completed_at.is_none());

    farm.scheduler.start(external);
    let buckets = classify_at(&mut farm, t1 + Duration::seconds(90));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Running));
    assert!(farm.registry.get(&id).unwrap().completed_at.is_none());

    // It drops out again; the window restarts from this pass, not from t1.
    farm.scheduler.finish(external);
    let t2 = t1 + Duration::seconds(120);
    assert_eq!(classify_at(&mut farm, t2).bucket_of(&id), Some(JobStatus::Running));
    assert_eq!(farm.registry.get(&id).unwrap().completed_at, Some(t2));

    let buckets = classify_at(&mut farm, t2 + Duration::seconds(30));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Running));

    let buckets = classify_at(&mut farm, t2 + Duration::seconds(61));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Lost));
}

#[test]
fn test_result_arriving_in_grace_window_wins() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.mark(&id, Marker::Started);
    farm.scheduler.finish_all();

    let t1 = Utc::now();
    assert_eq!(classify_at(&mut farm, t1).bucket_of(&id), Some(JobStatus::Running));

    farm.mark(&id, Marker::Passed);
    let buckets = classify_at(&mut farm, t1 + Duration::seconds(10));
    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Passed));
    // The grace timestamp already set is kept as the completion time.
    assert_eq!(farm.registry.get(&id).unwrap().completed_at, Some(t1));
}

#[test]
fn test_result_marker_without_started_is_not_terminal() {
    let mut farm = TestFarm::new();
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();
    farm.mark(&id, Marker::Passed);
    farm.scheduler.finish_all();

    let later = submitted_at(&farm, &id) + Duration::seconds(61);
    let buckets = classify_at(&mut farm, later);

    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Lost));
    assert!(farm.registry.get(&id).unwrap().status.is_none());
}

#[test]
fn test_submission_error_is_sticky_lost() {
    let mut farm = TestFarm::new();
    farm.scheduler.reject_submissions(true);
    let id = farm.registry.submit_job("step", SubmitOptions::default()).unwrap();

    let now = submitted_at(&farm, &id);
    let buckets = classify_at(&mut farm, now);

    assert_eq!(buckets.bucket_of(&id), Some(JobStatus::Lost));
    let job = farm.registry.get(&id).unwrap();
    assert_eq!(job.status, Some(JobStatus::Lost));
    assert_eq!(job.completed_at, Some(now));
}

#[test]
fn test_job_waiting_on_dependent_stays_queuing() {
    let mut farm = TestFarm::new();
    let a = farm.registry.submit_job("a", SubmitOptions::default()).unwrap();
    let b = farm
        .registry
        .submit_job("b", SubmitOptions::default().after(a.as_str()))
        .unwrap();

    // The scheduler holds `b` back somewhere it does not report.
    farm.scheduler.start(farm.external_id(&a));
    farm.scheduler.finish(farm.external_id(&b));

    let later = submitted_at(&farm, &b) + Duration::minutes(5);
    let buckets = classify_at(&mut farm, later);
    assert_eq!(buckets.bucket_of(&a), Some(JobStatus::Running));
    assert_eq!(buckets.bucket_of(&b), Some(JobStatus::Queuing));

    // Once `a` settles, `b` is judged on its own again.
    farm.complete(&a, true, "ok\n");
    let buckets = classify_at(&mut farm, later);
    assert_eq!(buckets.bucket_of(&a), Some(JobStatus::Passed));
    assert_eq!(buckets.bucket_of(&b), Some(JobStatus::Lost));
}

#[test]
fn test_running_probe_ignored_while_dependent_unsettled() {
    let mut farm = TestFarm::new();
    let a = farm.registry.submit_job("a", SubmitOptions::default()).unwrap();
    let b = farm
        .registry
        .submit_job("b", SubmitOptions::default().after(a.as_str()))
        .unwrap();
    farm.scheduler.start(farm.external_id(&a));
    farm.scheduler.start(farm.external_id(&b));

    let buckets = classify_at(&mut farm, Utc::now());

    assert_eq!(buckets.bucket_of(&a), Some(JobStatus::Running));
    assert_eq!(buckets.bucket_of(&b), Some(JobStatus::Queuing));
    assert!(!farm.registry.markers().has(&b, Marker::Started));
}

#[test]
fn test_classify_now_uses_scheduler_probe() {
    let mut farm = TestFarm::new();
    let a = farm.registry.submit_job("a", SubmitOptions::default()).unwrap();
    let b = farm.registry.submit_job("b", SubmitOptions::default()).unwrap();
    farm.scheduler.start(farm.external_id(&b));

    let buckets = Classifier::default().classify_now(&mut farm.registry).unwrap();

    assert_eq!(buckets.ids(JobStatus::Queuing), &[a]);
    assert_eq!(buckets.ids(JobStatus::Running), &[b]);
    assert_eq!(buckets.outstanding(), 2);
}

#[test]
fn test_empty_registry_classifies_empty() {
    let mut farm = TestFarm::new();
    let buckets = Classifier::default().classify(
        &mut farm.registry,
        &QueueSnapshot::default(),
        Utc::now(),
    );
    assert_eq!(buckets.total(), 0);
    assert_eq!(buckets, Classification::default());
}
