//! Scheduled job bookkeeping.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use enclave_core::{ComponentKind, ComponentName, PackageName, QueryFlags, UserId};
use enclave_events::PackageWatcher;
use enclave_pm::PackageManager;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AmError, AmResult};

/// A job a guest asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    /// Service that runs the job.
    pub service: ComponentName,
    /// Caller-chosen id, unique per process.
    pub job_id: i32,
    /// Opaque parameters.
    pub extras: BTreeMap<String, String>,
}

impl JobSpec {
    /// A job without extras.
    #[must_use]
    pub fn new(service: ComponentName, job_id: i32) -> Self {
        Self {
            service,
            job_id,
            extras: BTreeMap::new(),
        }
    }

    /// Attach an extra.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// `<process>_<job_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    /// Key for a job in a process.
    #[must_use]
    pub fn new(process: &str, job_id: i32) -> Self {
        Self(format!("{process}_{job_id}"))
    }

    /// The key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    /// Lookup key.
    pub key: JobKey,
    /// What was scheduled.
    pub spec: JobSpec,
    /// User it runs as.
    pub user: UserId,
    /// Process hosting the service.
    pub process: String,
    /// Process id reported by the supervisor.
    pub pid: u32,
    /// When it was scheduled.
    pub scheduled_at: DateTime<Utc>,
}

impl JobRecord {
    /// Owning package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        self.spec.service.package()
    }
}

/// Tracks scheduled jobs and drops them with their package.
pub struct JobBookkeeper {
    pm: Weak<PackageManager>,
    jobs: Mutex<BTreeMap<JobKey, JobRecord>>,
}

impl std::fmt::Debug for JobBookkeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobBookkeeper")
            .field("jobs", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl JobBookkeeper {
    /// A bookkeeper registered as a watcher on `pm`.
    pub fn attach(pm: &Arc<PackageManager>) -> Arc<Self> {
        let jobs = Arc::new(Self {
            pm: Arc::downgrade(pm),
            jobs: Mutex::new(BTreeMap::new()),
        });
        pm.add_watcher(Arc::clone(&jobs) as Arc<dyn PackageWatcher>);
        jobs
    }

    /// Schedule a job, starting its process if needed.
    ///
    /// Rescheduling the same id in the same process replaces the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is not installed and enabled for
    /// `user`, or no process could be started for it.
    pub fn schedule(&self, spec: JobSpec, user: UserId) -> AmResult<JobKey> {
        let pm = self.pm.upgrade().ok_or(AmError::RegistryGone)?;
        let service = pm
            .component_info(ComponentKind::Service, &spec.service, QueryFlags::GET_META_DATA, user)
            .ok_or_else(|| AmError::UnknownService(spec.service.to_string()))?;
        let process = match &service.process {
            Some(process) => process.clone(),
            None => pm
                .application_info(service.package(), QueryFlags::empty(), user)
                .map(|app| app.process_name)
                .ok_or_else(|| AmError::UnknownService(spec.service.to_string()))?,
        };

        let pid = pm
            .supervisor()
            .find_or_start_process_for_component(&service, &process, user)
            .ok_or_else(|| AmError::ProcessStart {
                service: spec.service.to_string(),
                process: process.clone(),
            })?;

        let key = JobKey::new(&process, spec.job_id);
        info!(job = %key, service = %spec.service, user = %user, pid, "Scheduled job");
        self.lock().insert(
            key.clone(),
            JobRecord {
                key: key.clone(),
                spec,
                user,
                process,
                pid,
                scheduled_at: Utc::now(),
            },
        );
        Ok(key)
    }

    /// Look a job up.
    #[must_use]
    pub fn query(&self, key: &JobKey) -> Option<JobRecord> {
        self.lock().get(key).cloned()
    }

    /// Cancel one job. Returns whether it existed.
    pub fn cancel(&self, key: &JobKey) -> bool {
        let removed = self.lock().remove(key).is_some();
        if removed {
            debug!(job = %key, "Cancelled job");
        }
        removed
    }

    /// Cancel every job of `package` for `user`; [`UserId::ALL`] means every
    /// user. Returns how many were cancelled.
    pub fn cancel_all(&self, package: &PackageName, user: UserId) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, job| job.package() != package || (user != UserId::ALL && job.user != user));
        let cancelled = before.saturating_sub(jobs.len());
        if cancelled > 0 {
            debug!(package = %package, user = %user, cancelled, "Cancelled jobs");
        }
        cancelled
    }

    /// Jobs of `package`, by key.
    #[must_use]
    pub fn jobs_for(&self, package: &PackageName) -> Vec<JobRecord> {
        self.lock()
            .values()
            .filter(|job| job.package() == package)
            .cloned()
            .collect()
    }

    /// Packages with at least one job.
    #[must_use]
    pub fn packages(&self) -> BTreeSet<PackageName> {
        self.lock().values().map(|job| job.package().clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobKey, JobRecord>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PackageWatcher for JobBookkeeper {
    fn name(&self) -> &str {
        "job-bookkeeper"
    }

    fn on_package_installed(&self, _package: &PackageName, _user: UserId) {}

    fn on_package_uninstalled(&self, package: &PackageName, removed_entirely: bool, user: UserId) {
        let scope = if removed_entirely { UserId::ALL } else { user };
        self.cancel_all(package, scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_format() {
        assert_eq!(JobKey::new("com.example.a:sync", 7).as_str(), "com.example.a:sync_7");
        assert_eq!(JobKey::new("p", -1).to_string(), "p_-1");
    }

    #[test]
    fn test_job_spec_serializes_service_as_string() {
        let service: ComponentName = "com.example.a/com.example.a.Sync".parse().unwrap();
        let spec = JobSpec::new(service, 3).with_extra("k", "v");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["service"], "com.example.a/com.example.a.Sync");
        assert_eq!(json["extras"]["k"], "v");
    }
}
