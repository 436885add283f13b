use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    #[error("batch backend refused the submission: {raw_error_message}")]
    SubmissionRefused { raw_error_message: String },

    #[error("cannot terminate job `{job_id}`: {raw_error_message}")]
    CannotTerminate { job_id: String, raw_error_message: String },
}

#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub id: String,
}

/// Contract over the batch execution backend. Submission hands over the
/// envelope as process environment; the backend assigns the job id.
pub trait BatchClient: Send + Sync {
    fn submit_job(&self, job_name: &str, envs: &BTreeMap<String, String>) -> Result<SubmittedJob, BatchError>;
    /// Best-effort, not awaited.
    fn terminate_job(&self, job_id: &str, reason: &str) -> Result<(), BatchError>;
    /// Runtime-reported start time, if the backend knows it.
    fn job_started_at(&self, job_id: &str) -> Option<DateTime<Utc>>;
}

/// On-prem backend: runs the executor binary as a detached local process.
pub struct LocalBatchClient {
    executor_bin: PathBuf,
    running: Mutex<HashMap<String, (u32, DateTime<Utc>)>>,
}

impl LocalBatchClient {
    pub fn new(executor_bin: PathBuf) -> Self {
        LocalBatchClient {
            executor_bin,
            running: Mutex::new(HashMap::new()),
        }
    }
}

impl BatchClient for LocalBatchClient {
    fn submit_job(&self, job_name: &str, envs: &BTreeMap<String, String>) -> Result<SubmittedJob, BatchError> {
        let job_id = Uuid::new_v4().to_string();
        info!("submitting local batch job {job_name} as {job_id}");

        let mut command = Command::new(&self.executor_bin);
        command
            .envs(envs)
            .env(crate::constants::ENV_JOB_ID, &job_id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let child = command.spawn().map_err(|err| BatchError::SubmissionRefused {
            raw_error_message: err.to_string(),
        })?;
        self.running
            .lock()
            .unwrap()
            .insert(job_id.clone(), (child.id(), Utc::now()));

        Ok(SubmittedJob { id: job_id })
    }

    fn terminate_job(&self, job_id: &str, reason: &str) -> Result<(), BatchError> {
        let pid = self.running.lock().unwrap().get(job_id).map(|(pid, _)| *pid);
        let pid = match pid {
            Some(pid) => pid,
            None => return Ok(()),
        };
        info!("terminating local batch job {job_id} (pid {pid}): {reason}");
        // SIGTERM first; the worker traps it and fails the job itself
        unsafe {
            let _ = libc::kill(pid as i32, libc::SIGTERM);
        }
        Ok(())
    }

    fn job_started_at(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.running.lock().unwrap().get(job_id).map(|(_, started)| *started)
    }
}

/// Test double recording submissions; can be told to refuse.
#[derive(Default)]
pub struct RecordingBatchClient {
    pub refuse: bool,
    pub submitted: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub terminated: Mutex<Vec<String>>,
}

impl RecordingBatchClient {
    pub fn refusing() -> Self {
        RecordingBatchClient {
            refuse: true,
            ..Default::default()
        }
    }
}

impl BatchClient for RecordingBatchClient {
    fn submit_job(&self, job_name: &str, envs: &BTreeMap<String, String>) -> Result<SubmittedJob, BatchError> {
        if self.refuse {
            return Err(BatchError::SubmissionRefused {
                raw_error_message: "backend is unavailable".to_string(),
            });
        }
        self.submitted
            .lock()
            .unwrap()
            .push((job_name.to_string(), envs.clone()));
        Ok(SubmittedJob {
            id: Uuid::new_v4().to_string(),
        })
    }

    fn terminate_job(&self, job_id: &str, _reason: &str) -> Result<(), BatchError> {
        self.terminated.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    fn job_started_at(&self, _job_id: &str) -> Option<DateTime<Utc>> {
        None
    }
}
