//! Job tree construction and execution.
//!
//! A [`Job`] couples a [`Status`] record with the logic that drives it and an
//! ordered list of sub-jobs. The whole tree runs on a single task: sub-jobs
//! execute sequentially, in declaration order, and only while everything
//! before them succeeded. Anything after a failure is explicitly cancelled,
//! never silently skipped, so a poller can tell "never ran" from "ran and
//! succeeded".

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;
use uuid::Uuid;

use super::status::Status;
use super::types::{JobError, JobOwner, JobType, ParentRef};

/// The job-specific core logic, run exactly once by [`Job::run`].
#[async_trait]
pub trait JobLogic: Send + Sync {
    /// Perform the core steps of the job.
    ///
    /// Failures may be reported either by returning an error or by failing
    /// `status` directly; the runner treats both the same way.
    async fn execute(&mut self, status: &Status) -> Result<(), JobError>;

    /// Final step run after the core logic and all sub-jobs, regardless of
    /// outcome. Cleanup and result persistence go here; implementations that
    /// only care about success should check `status` first.
    async fn finished(&mut self, status: &Status) {
        let _ = status;
    }
}

/// A unit of asynchronous work with an owner, a type tag and follow-up jobs.
pub struct Job {
    id: String,
    owner: JobOwner,
    name: String,
    job_type: JobType,
    parent: Option<ParentRef>,
    status: Status,
    logic: Box<dyn JobLogic>,
    sub_jobs: Vec<Job>,
}

impl Job {
    /// Create a new job. Fails if the owner id is empty: every job must be
    /// attributable.
    pub fn new(
        owner: JobOwner,
        name: impl Into<String>,
        job_type: JobType,
        logic: impl JobLogic + 'static,
    ) -> Result<Self, JobError> {
        if owner.user_id.is_empty() {
            return Err(JobError::MissingOwner);
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            owner,
            name: name.into(),
            job_type,
            parent: None,
            status: Status::new(),
            logic: Box::new(logic),
            sub_jobs: Vec::new(),
        })
    }

    /// Unique job id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Job type tag.
    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Owning identity.
    pub fn owner(&self) -> &JobOwner {
        &self.owner
    }

    /// Parent reference, when enqueued as a sub-job.
    pub fn parent(&self) -> Option<&ParentRef> {
        self.parent.as_ref()
    }

    /// Handle to this job's status record.
    pub fn status(&self) -> Status {
        self.status.clone()
    }

    /// Sub-jobs in declaration order.
    pub fn sub_jobs(&self) -> &[Job] {
        &self.sub_jobs
    }

    /// Enqueue a job to run after this job's core logic has succeeded.
    ///
    /// Only valid before execution starts; `run` consumes the job, so the
    /// list is immutable once the tree is running.
    pub fn add_next_job(&mut self, mut job: Job) {
        job.parent = Some(ParentRef {
            job_id: self.id.clone(),
            job_type: self.job_type,
        });
        self.sub_jobs.push(job);
    }

    /// Execute the job tree. This is the one standard sequence every job
    /// follows:
    ///
    /// 1. run the core logic;
    /// 2. on failure, cancel every sub-job (they never start);
    /// 3. otherwise run sub-jobs sequentially on this task, cancelling the
    ///    remainder after the first sub-job failure;
    /// 4. run the finalize hook regardless of outcome;
    /// 5. mark the status completed.
    ///
    /// No fault propagates past this boundary: an error returned by the
    /// logic becomes an errored, completed status.
    pub fn run(mut self) -> BoxFuture<'static, ()> {
        async move {
            let status = self.status.clone();

            let mut cancel_message = match self.logic.execute(&status).await {
                Ok(()) => None,
                Err(err) => {
                    // The logic may have already failed the status with a more
                    // specific message; keep the first failure.
                    status.fail(err.to_string()).await;
                    None
                }
            };
            if status.has_error().await {
                cancel_message = Some(format!(
                    "Task cancelled due to error in {} task",
                    self.name
                ));
            }

            let total_steps = self.sub_jobs.len() + 1;
            let mut sub_job_failed = false;
            for (index, sub_job) in self.sub_jobs.drain(..).enumerate() {
                match &cancel_message {
                    None => {
                        let step = index + 1;
                        status
                            .update(
                                format!("Running {} task", sub_job.name),
                                step as f64 * 100.0 / total_steps as f64,
                            )
                            .await;
                        let sub_name = sub_job.name.clone();
                        let sub_status = sub_job.status.clone();
                        sub_job.run().await;
                        if sub_status.has_error().await {
                            sub_job_failed = true;
                            cancel_message = Some(format!(
                                "Task cancelled due to error in {} task",
                                sub_name
                            ));
                        }
                    }
                    Some(message) => {
                        sub_job.cancel_tree(message.clone()).await;
                    }
                }
            }

            if sub_job_failed {
                if let Some(ref message) = cancel_message {
                    status.fail(message.clone()).await;
                }
            }

            self.logic.finished(&status).await;
            status.mark_completed().await;

            let snapshot = status.snapshot().await;
            info!(
                "{} {} {} in {} ms",
                self.job_type.as_str(),
                self.id,
                if snapshot.error { "errored" } else { "completed" },
                snapshot.duration_ms
            );
        }
        .boxed()
    }

    /// Mark this job and all of its descendants as cancelled without running
    /// any of them.
    async fn cancel_tree(self, message: String) {
        let mut statuses = Vec::new();
        self.collect_statuses(&mut statuses);
        for status in statuses {
            status.cancel(message.clone()).await;
        }
    }

    fn collect_statuses(&self, out: &mut Vec<Status>) {
        out.push(self.status.clone());
        for sub_job in &self.sub_jobs {
            sub_job.collect_statuses(out);
        }
    }
}
