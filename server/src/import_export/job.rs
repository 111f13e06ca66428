use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------- job status ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

// ---------- job ----------

pub struct ImportExportJob {
    pub id: String,
    pub user_id: i32,
    pub datasource_id: i32,
    /// Human-readable summary, e.g. "Copying table data 'public.t' ...".
    pub description: String,
    pub status: JobStatus,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl ImportExportJob {
    pub fn new(user_id: i32, datasource_id: i32, description: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            user_id,
            datasource_id,
            description,
            status: JobStatus::Running,
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub datasource_id: i32,
    pub description: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl From<&ImportExportJob> for JobStatusResponse {
    fn from(job: &ImportExportJob) -> Self {
        Self {
            job_id: job.id.clone(),
            datasource_id: job.datasource_id,
            description: job.description.clone(),
            status: job.status,
            started_at: job.started_at,
            finished_at: job.finished_at,
            exit_code: job.exit_code,
            error: job.error.clone(),
        }
    }
}

// ---------- job store ----------

/// Finished jobs kept for status polling before the oldest are dropped.
pub const MAX_FINISHED_JOBS: usize = 256;

/// In-memory registry of import/export jobs.
/// At most one job runs per data source.
#[derive(Default)]
pub struct JobStore {
    jobs: HashMap<String, ImportExportJob>,
    /// datasource_id → job_id of the running job.
    active_by_ds: HashMap<i32, String>,
    /// Finished job ids, oldest first.
    finished: VecDeque<String>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job. Returns `Err(existing_job_id)` when the data source
    /// already has a running job.
    pub fn try_register(&mut self, job: ImportExportJob) -> Result<String, String> {
        if let Some(existing_id) = self.active_by_ds.get(&job.datasource_id)
            && self
                .jobs
                .get(existing_id)
                .is_some_and(|j| j.status == JobStatus::Running)
        {
            return Err(existing_id.clone());
        }

        let ds_id = job.datasource_id;
        let job_id = job.id.clone();
        self.jobs.insert(job_id.clone(), job);
        self.active_by_ds.insert(ds_id, job_id.clone());
        Ok(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<&ImportExportJob> {
        self.jobs.get(job_id)
    }

    fn finish(
        &mut self,
        job_id: &str,
        status: JobStatus,
        exit_code: Option<i32>,
        error: Option<String>,
    ) {
        if let Some(job) = self.jobs.get_mut(job_id)
            && job.status == JobStatus::Running
        {
            job.status = status;
            job.exit_code = exit_code;
            job.error = error;
            job.finished_at = Some(Utc::now());
            self.active_by_ds.remove(&job.datasource_id);
            self.finished.push_back(job_id.to_string());
            while self.finished.len() > MAX_FINISHED_JOBS {
                if let Some(old) = self.finished.pop_front() {
                    self.jobs.remove(&old);
                }
            }
        }
    }

    pub fn complete(&mut self, job_id: &str, exit_code: Option<i32>) {
        self.finish(job_id, JobStatus::Completed, exit_code, None);
    }

    pub fn fail(&mut self, job_id: &str, error: String, exit_code: Option<i32>) {
        self.finish(job_id, JobStatus::Failed, exit_code, Some(error));
    }

    /// Cancel a running job. Returns false if it is unknown or already finished.
    pub fn cancel(&mut self, job_id: &str) -> bool {
        let Some(job) = self.jobs.get(job_id) else {
            return false;
        };
        if job.status != JobStatus::Running {
            return false;
        }
        job.cancel.cancel();
        self.finish(job_id, JobStatus::Failed, None, Some("cancelled".to_string()));
        true
    }
}
