//! Job bookkeeping against a live registry.

mod common;

use common::{CLOCK, FakeSupervisor, Harness};
use enclave_am::{AmError, JobBookkeeper, JobKey, JobSpec};
use enclave_core::{ComponentName, UserId};

fn sync() -> ComponentName {
    "com.example.clock/com.example.clock.Sync".parse().unwrap()
}

fn cleanup() -> ComponentName {
    "com.example.clock/com.example.clock.Cleanup".parse().unwrap()
}

#[test]
fn test_schedule_keys_by_process() {
    let h = Harness::new();
    h.install(CLOCK, UserId::SYSTEM);
    let jobs = JobBookkeeper::attach(&h.pm);

    let key = jobs.schedule(JobSpec::new(sync(), 1), UserId::SYSTEM).unwrap();
    assert_eq!(key, JobKey::new("com.example.clock:sync", 1));

    let key = jobs.schedule(JobSpec::new(cleanup(), 2), UserId::SYSTEM).unwrap();
    assert_eq!(key.as_str(), "com.example.clock:ui_2");

    let record = jobs.query(&key).unwrap();
    assert_eq!(record.process, "com.example.clock:ui");
    assert_eq!(h.supervisor.started(), vec!["com.example.clock:sync", "com.example.clock:ui"]);
}

#[test]
fn test_schedule_requires_installed_service() {
    let h = Harness::new();
    let jobs = JobBookkeeper::attach(&h.pm);

    let err = jobs.schedule(JobSpec::new(sync(), 1), UserId::SYSTEM).unwrap_err();
    assert!(matches!(err, AmError::UnknownService(_)));

    h.install(CLOCK, UserId::SYSTEM);
    let err = jobs.schedule(JobSpec::new(sync(), 1), UserId(3)).unwrap_err();
    assert!(matches!(err, AmError::UnknownService(_)));
}

#[test]
fn test_schedule_fails_without_process() {
    let h = Harness::with_supervisor(FakeSupervisor::refusing());
    h.install(CLOCK, UserId::SYSTEM);
    let jobs = JobBookkeeper::attach(&h.pm);

    let err = jobs.schedule(JobSpec::new(sync(), 1), UserId::SYSTEM).unwrap_err();
    assert!(matches!(err, AmError::ProcessStart { .. }));
    assert!(jobs.packages().is_empty());
}

#[test]
fn test_cancel() {
    let h = Harness::new();
    h.install(CLOCK, UserId::SYSTEM);
    let jobs = JobBookkeeper::attach(&h.pm);

    let key = jobs.schedule(JobSpec::new(sync(), 9), UserId::SYSTEM).unwrap();
    assert!(jobs.cancel(&key));
    assert!(!jobs.cancel(&key));
    assert!(jobs.query(&key).is_none());
}

#[test]
fn test_user_uninstall_cancels_only_that_users_jobs() {
    let h = Harness::new();
    let pkg = h.install(CLOCK, UserId::SYSTEM);
    h.install(CLOCK, UserId(1));
    let jobs = JobBookkeeper::attach(&h.pm);

    jobs.schedule(JobSpec::new(sync(), 1), UserId::SYSTEM).unwrap();
    jobs.schedule(JobSpec::new(cleanup(), 2), UserId(1)).unwrap();

    h.pm.uninstall_for_user(&pkg, UserId::SYSTEM).unwrap();
    let left = jobs.jobs_for(&pkg);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].user, UserId(1));
}

#[test]
fn test_entire_removal_drops_all_jobs() {
    let h = Harness::new();
    let pkg = h.install(CLOCK, UserId::SYSTEM);
    let jobs = JobBookkeeper::attach(&h.pm);

    jobs.schedule(JobSpec::new(sync(), 1), UserId::SYSTEM).unwrap();
    jobs.schedule(JobSpec::new(cleanup(), 2).with_extra("reason", "test"), UserId::SYSTEM)
        .unwrap();
    assert_eq!(jobs.jobs_for(&pkg).len(), 2);

    h.pm.uninstall_everywhere(&pkg).unwrap();
    assert!(jobs.jobs_for(&pkg).is_empty());
}

#[test]
fn test_cancel_all_for_every_user() {
    let h = Harness::new();
    let pkg = h.install(CLOCK, UserId::SYSTEM);
    let jobs = JobBookkeeper::attach(&h.pm);
    jobs.schedule(JobSpec::new(sync(), 1), UserId::SYSTEM).unwrap();

    assert_eq!(jobs.cancel_all(&pkg, UserId(5)), 0);
    assert_eq!(jobs.cancel_all(&pkg, UserId::ALL), 1);
}
