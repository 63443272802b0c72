/// Job registry and lifecycle.
///
/// A job is created on POST, runs on its own task, reaches a terminal state
/// and is then retained for 30 seconds for polling clients before being
/// erased. Reading a terminal status deletes the job immediately.

use crate::error::EngineError;
use crate::execution::{run_sql, PlanRunner, Progress, ProgressCB, QueryResult, SharedValues};
use crate::safeevent::SafeEvent;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub const RETENTION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Running { progress: Option<Progress> },
    Done { result: QueryResult },
    Error { reason: String },
}

enum JobState {
    Running(Option<Progress>),
    Done(QueryResult),
    Error(String),
}

pub struct Job {
    pub id: String,
    pub interrupt: SafeEvent,
    state: Mutex<JobState>,
    finished: SafeEvent,
}

impl Job {
    fn status(&self) -> (JobStatus, bool) {
        match &*self.state.lock() {
            JobState::Running(p) => (
                JobStatus::Running {
                    progress: p.clone(),
                },
                false,
            ),
            JobState::Done(result) => (
                JobStatus::Done {
                    result: result.clone(),
                },
                true,
            ),
            JobState::Error(reason) => (
                JobStatus::Error {
                    reason: reason.clone(),
                },
                true,
            ),
        }
    }

    pub async fn wait(&self) {
        self.finished.wait().await
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> JobRegistry {
        JobRegistry::default()
    }

    pub fn spawn(
        &self,
        runner: Arc<dyn PlanRunner>,
        sql: String,
        shared: SharedValues,
    ) -> Arc<Job> {
        let job = Arc::new(Job {
            id: Uuid::new_v4().simple().to_string(),
            interrupt: SafeEvent::new(),
            state: Mutex::new(JobState::Running(None)),
            finished: SafeEvent::new(),
        });
        self.jobs.insert(job.id.clone(), job.clone());
        info!(job_id = %job.id, "job created");

        let registry = self.clone();
        let task_job = job.clone();
        tokio::spawn(async move {
            let progress_job = task_job.clone();
            let progress: ProgressCB = Arc::new(move |p: Progress| {
                let mut state = progress_job.state.lock();
                if let JobState::Running(slot) = &mut *state {
                    *slot = Some(p);
                }
            });
            let result = run_sql(
                &sql,
                runner.as_ref(),
                &shared,
                Some(progress),
                &task_job.interrupt,
                false,
            )
            .await;
            {
                let mut state = task_job.state.lock();
                *state = match result {
                    Ok(r) => JobState::Done(r),
                    Err(e) => JobState::Error(error_reason(&e)),
                };
            }
            task_job.finished.set();
            info!(job_id = %task_job.id, "job finished");

            // Terminal jobs linger for pollers, then are erased.
            tokio::time::sleep(RETENTION).await;
            registry.jobs.remove(&task_job.id);
        });
        job
    }

    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.get(id).map(|j| j.value().clone())
    }

    /// Current status; a terminal read deletes the job.
    pub fn status_and_reap(&self, id: &str) -> Option<JobStatus> {
        let job = self.get(id)?;
        let (status, terminal) = job.status();
        if terminal {
            self.jobs.remove(id);
        }
        Some(status)
    }
}

/// What the client sees. User errors verbatim; anything else keeps its
/// system-side label.
pub fn error_reason(e: &EngineError) -> String {
    e.to_string()
}
