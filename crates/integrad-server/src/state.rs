//! State shared by the command handlers.

use integrad_scheduler::JobQueue;
use integrad_store::{JobRepo, LogRepo, Store};
use std::sync::Arc;

/// Bucket holding job records.
pub const JOB_BUCKET: &str = "jobs";
/// Parent bucket of the per-job log buckets.
pub const LOG_BUCKET: &str = "logs";

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub jobs: JobRepo,
    pub logs: LogRepo,
}

impl AppState {
    pub fn new(store: Store, queue: Arc<JobQueue>) -> Self {
        let jobs = JobRepo::new(store.clone(), queue.bucket());
        let logs = LogRepo::new(store, LOG_BUCKET);
        Self { queue, jobs, logs }
    }
}
