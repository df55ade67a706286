//! In-process registry of observable jobs.
//!
//! Every submitted job tree is registered here (parent and sub-jobs alike)
//! so pollers can follow progress. Finished jobs are retained until a client
//! has retrieved their terminal status, then pruned, so no final state is
//! ever lost to a poller that was briefly away.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use super::runner::Job;
use super::status::Status;
use super::types::{JobInfo, JobType};

struct RegisteredJob {
    id: String,
    job_type: JobType,
    name: String,
    owner: String,
    parent_job_id: Option<String>,
    status: Status,
}

impl RegisteredJob {
    async fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id.clone(),
            job_type: self.job_type,
            name: self.name.clone(),
            owner: self.owner.clone(),
            parent_job_id: self.parent_job_id.clone(),
            status: self.status.snapshot().await,
        }
    }
}

/// Registry of all jobs currently observable, keyed by owner.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Vec<RegisteredJob>>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job tree and spawn it on a new task.
    ///
    /// Returns the top-level job id immediately; progress is observed through
    /// [`JobRegistry::jobs_for_user`] and [`JobRegistry::find`].
    pub async fn submit(&self, job: Job) -> String {
        let job_id = job.id().to_string();
        self.register_tree(&job).await;
        tokio::spawn(job.run());
        job_id
    }

    /// Run a job tree to completion on the current task.
    ///
    /// Like [`JobRegistry::submit`] but blocking; used where the caller has
    /// nothing to do until the job finishes.
    pub async fn run_synchronously(&self, job: Job) -> String {
        let job_id = job.id().to_string();
        self.register_tree(&job).await;
        job.run().await;
        job_id
    }

    async fn register_tree(&self, job: &Job) {
        let mut entries = Vec::new();
        collect_registrations(job, &mut entries);
        let mut jobs = self.jobs.write().await;
        for entry in entries {
            debug!("Registering job {} for user {}", entry.id, entry.owner);
            jobs.entry(entry.owner.clone()).or_default().push(entry);
        }
    }

    /// Snapshot all jobs for a user, pruning the ones whose terminal status
    /// has now been delivered.
    pub async fn jobs_for_user(&self, user_id: &str) -> Vec<JobInfo> {
        let mut jobs = self.jobs.write().await;
        let Some(user_jobs) = jobs.get_mut(user_id) else {
            return Vec::new();
        };

        let mut infos = Vec::with_capacity(user_jobs.len());
        for job in user_jobs.iter() {
            infos.push(job.info().await);
        }

        // Retain only jobs that have not yet reached a terminal state; the
        // snapshot just taken is the client's one delivery of the rest.
        let mut retained = Vec::new();
        for job in user_jobs.drain(..) {
            if !job.status.is_completed().await {
                retained.push(job);
            }
        }
        if retained.is_empty() {
            jobs.remove(user_id);
        } else {
            jobs.insert(user_id.to_string(), retained);
        }

        infos
    }

    /// Look up one job by id without pruning it.
    pub async fn find(&self, job_id: &str) -> Option<JobInfo> {
        let jobs = self.jobs.read().await;
        for user_jobs in jobs.values() {
            for job in user_jobs {
                if job.id == job_id {
                    return Some(job.info().await);
                }
            }
        }
        None
    }

    /// Number of jobs currently observable across all users.
    pub async fn active_count(&self) -> usize {
        self.jobs.read().await.values().map(Vec::len).sum()
    }
}

fn collect_registrations(job: &Job, out: &mut Vec<RegisteredJob>) {
    out.push(RegisteredJob {
        id: job.id().to_string(),
        job_type: job.job_type(),
        name: job.name().to_string(),
        owner: job.owner().user_id.clone(),
        parent_job_id: job.parent().map(|p| p.job_id.clone()),
        status: job.status(),
    });
    for sub_job in job.sub_jobs() {
        collect_registrations(sub_job, out);
    }
}
