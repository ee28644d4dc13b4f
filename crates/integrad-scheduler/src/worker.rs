//! Workers that run dispatched jobs.

use integrad_core::Job;
use integrad_core::runner::BuildRunner;
use integrad_store::{LogRepo, RetryPolicy};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::log_writer::{LogWriter, LogWriterSettings};
use crate::queue::{JobOutput, JobQueue};
use crate::Fault;

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSettings {
    pub log: LogWriterSettings,
    pub retry: RetryPolicy,
}

/// A fixed set of workers sharing one queue output.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        size: usize,
        queue: Arc<JobQueue>,
        logs: LogRepo,
        runner: Arc<dyn BuildRunner>,
        settings: WorkerSettings,
        fault: Fault,
    ) -> Self {
        let output = queue.output();
        let handles = (1..=size.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    output: output.clone(),
                    logs: logs.clone(),
                    runner: runner.clone(),
                    settings,
                    fault: fault.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = size.max(1), runner = runner.name(), "Started worker pool");
        Self { handles }
    }

    /// Wait for every worker to exit. Workers exit once the queue output ends.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Worker task panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    output: JobOutput,
    logs: LogRepo,
    runner: Arc<dyn BuildRunner>,
    settings: WorkerSettings,
    fault: Fault,
}

impl Worker {
    async fn run(self) {
        info!(worker_id = self.id, "Starting worker");

        while let Some(dispatched) = self.output.next().await {
            info!(worker_id = self.id, job = %dispatched.number(), "Running job");
            let success = self.execute(&dispatched.job).await;
            self.queue.finish_job(dispatched, success);
        }

        info!(worker_id = self.id, "Worker stopped");
    }

    async fn execute(&self, job: &Job) -> bool {
        let writer = match LogWriter::open(
            self.logs.clone(),
            job.number,
            self.settings.log,
            self.settings.retry,
            self.fault.clone(),
        )
        .await
        {
            Ok(writer) => writer,
            Err(err) => {
                error!(job = %job.number, error = %err, "Failed to open job log");
                self.fault
                    .raise(format!("could not open log of job #{}: {err}", job.number));
                return false;
            }
        };

        // The runner gets its own task so a panic fails the job instead of the worker.
        let runner = self.runner.clone();
        let logger = writer.logger();
        let task_job = job.clone();
        let result = tokio::spawn(async move { runner.run(&task_job, &logger).await }).await;
        writer.close().await;

        match result {
            Ok(Ok(())) => {
                info!(job = %job.number, "Job succeeded");
                true
            }
            Ok(Err(err)) => {
                warn!(job = %job.number, error = %err, "Job failed");
                false
            }
            Err(err) => {
                error!(job = %job.number, error = %err, "Build runner panicked");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use integrad_core::runner::JobLogger;
    use integrad_core::{Error, JobArgs, JobNumber, JobStatus};
    use integrad_store::{JobRepo, Order, Store};
    use std::time::Duration;

    struct ScriptedRunner;

    #[async_trait]
    impl BuildRunner for ScriptedRunner {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, job: &Job, logger: &JobLogger) -> integrad_core::Result<()> {
            logger.log(format!("Building job #{}", job.number)).await;
            match job.arg("outcome") {
                Some("fail") => {
                    logger.log("Build failed.").await;
                    Err(Error::ExecutionFailed("exit status 1".to_string()))
                }
                Some("panic") => panic!("runner blew up"),
                _ => {
                    logger.write("    compiled\n").await;
                    logger.log("Deploy succeeded.").await;
                    Ok(())
                }
            }
        }
    }

    fn outcome(value: &str) -> JobArgs {
        JobArgs::from([("outcome".to_string(), value.to_string())])
    }

    async fn wait_until_terminal(jobs: &JobRepo, count: usize) -> Vec<Job> {
        for _ in 0..200 {
            let all = jobs.list(Order::Ascending).await.unwrap();
            if all.len() == count && all.iter().all(|j| j.status.is_terminal()) {
                return all;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("jobs did not finish in time");
    }

    #[tokio::test]
    async fn test_pool_runs_jobs_and_persists_logs() {
        let store = Store::open_in_memory().await.unwrap();
        let fault = Fault::new();
        let queue = Arc::new(
            JobQueue::open(store.clone(), "jobs", RetryPolicy::default(), fault.clone())
                .await
                .unwrap(),
        );
        let logs = LogRepo::new(store.clone(), "logs");
        let settings = WorkerSettings {
            log: LogWriterSettings {
                flush_interval: Duration::from_millis(10),
                capacity: 8,
            },
            retry: RetryPolicy::default(),
        };
        let pool = WorkerPool::start(
            2,
            queue.clone(),
            logs.clone(),
            Arc::new(ScriptedRunner),
            settings,
            fault.clone(),
        );

        queue.add_job(outcome("ok")).await.unwrap();
        queue.add_job(outcome("fail")).await.unwrap();
        queue.add_job(outcome("panic")).await.unwrap();

        let jobs = JobRepo::new(store.clone(), "jobs");
        let finished = wait_until_terminal(&jobs, 3).await;
        queue.close().await;
        pool.join().await;

        let statuses: Vec<JobStatus> = finished.iter().map(|j| j.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Succeeded, JobStatus::Failed, JobStatus::Failed]
        );

        let first = logs.read(JobNumber::new(1)).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first[0].ends_with("Building job #1\n"));
        assert_eq!(first[1], "    compiled\n");
        assert!(first[2].ends_with("Deploy succeeded.\n"));

        let second = logs.read(JobNumber::new(2)).await.unwrap();
        assert!(second.last().unwrap().ends_with("Build failed.\n"));
        assert!(!fault.is_raised());
    }
}
