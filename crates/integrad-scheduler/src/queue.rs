//! Durable job queue backed by the store.
//!
//! Jobs are numbered by the job bucket's sequence and dispatched strictly in
//! number order by a single dispatch loop. The loop keeps an in-memory cursor
//! that is rebuilt from the bucket on every start.

use futures::TryStreamExt;
use integrad_core::{Job, JobArgs, JobNumber, JobStatus};
use integrad_store::txn::decode_json;
use integrad_store::{Order, RetryPolicy, Store, StoreResult, key};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, error, info, warn};

use crate::Fault;

/// A job handed to a consumer, already marked `Active` in the store.
///
/// Holds a lease on the queue: [`JobQueue::close`] does not return until every
/// dispatched job has been passed back through [`JobQueue::finish_job`].
#[derive(Debug)]
pub struct DispatchedJob {
    pub job: Job,
    lease: TaskTrackerToken,
}

impl DispatchedJob {
    pub fn number(&self) -> JobNumber {
        self.job.number
    }
}

/// Shared, in-order stream of dispatched jobs.
///
/// Clones share one channel, so each job reaches exactly one consumer.
/// Ends once the queue is closed and every queued job has been taken.
#[derive(Debug, Clone)]
pub struct JobOutput {
    rx: Arc<Mutex<mpsc::Receiver<DispatchedJob>>>,
}

impl JobOutput {
    pub async fn next(&self) -> Option<DispatchedJob> {
        self.rx.lock().await.recv().await
    }
}

pub struct JobQueue {
    store: Store,
    bucket: String,
    retry: RetryPolicy,
    fault: Fault,
    wake: Arc<Notify>,
    closed: CancellationToken,
    finishers: TaskTracker,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    output: JobOutput,
}

impl JobQueue {
    /// Open the queue over `bucket`, recover the dispatch cursor and start
    /// dispatching.
    pub async fn open(
        store: Store,
        bucket: impl Into<String>,
        retry: RetryPolicy,
        fault: Fault,
    ) -> StoreResult<Self> {
        let bucket = bucket.into();
        store.ensure_bucket(&bucket).await?;
        let current = recover(&store, &bucket).await?;

        let (tx, rx) = mpsc::channel(1);
        let wake = Arc::new(Notify::new());
        let closed = CancellationToken::new();
        let finishers = TaskTracker::new();

        let dispatcher = Dispatcher {
            store: store.clone(),
            bucket: bucket.clone(),
            retry,
            fault: fault.clone(),
            wake: wake.clone(),
            closed: closed.clone(),
            finishers: finishers.clone(),
            tx,
            current,
        };
        let handle = tokio::spawn(dispatcher.run());

        Ok(Self {
            store,
            bucket,
            retry,
            fault,
            wake,
            closed,
            finishers,
            dispatcher: Mutex::new(Some(handle)),
            output: JobOutput {
                rx: Arc::new(Mutex::new(rx)),
            },
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Persist a new queued job and wake the dispatch loop.
    pub async fn add_job(&self, args: JobArgs) -> StoreResult<Job> {
        let store = &self.store;
        let bucket = self.bucket.as_str();
        let args = &args;
        let job = self
            .retry
            .run("add job", || insert_job(store, bucket, args.clone()))
            .await?;

        self.wake.notify_one();
        info!(job = %job.number, "Added job");
        Ok(job)
    }

    pub fn output(&self) -> JobOutput {
        self.output.clone()
    }

    /// Record the outcome of a dispatched job. The write happens in the
    /// background; this returns immediately.
    pub fn finish_job(&self, dispatched: DispatchedJob, success: bool) {
        let DispatchedJob { job, lease } = dispatched;
        let status = if success {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        let store = self.store.clone();
        let bucket = self.bucket.clone();
        let retry = self.retry;
        let fault = self.fault.clone();

        self.finishers.spawn(async move {
            let _lease = lease;
            let number = job.number;
            let (store, bucket) = (&store, bucket.as_str());
            let result = retry
                .run("finish job", || complete(store, bucket, number, status))
                .await;
            match result {
                Ok(true) => info!(job = %number, status = %status, "Job finished"),
                Ok(false) => warn!(job = %number, "Job was not active, status left unchanged"),
                Err(err) => {
                    error!(job = %number, error = %err, "Failed to record job result");
                    fault.raise(format!("could not record result of job #{number}: {err}"));
                }
            }
        });
    }

    /// Dispatch the remaining backlog, end the output and wait until every
    /// dispatched job is finished and its result is stored.
    ///
    /// Consumers must keep draining [`JobQueue::output`] until it ends,
    /// otherwise this keeps waiting.
    pub async fn close(&self) {
        self.closed.cancel();
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "Dispatch loop panicked");
            }
        }

        self.finishers.close();
        self.finishers.wait().await;
        info!("Job queue closed");
    }
}

/// Rebuild the dispatch cursor: the first job of the trailing run of queued
/// jobs. Numbers are dense, so that is `total - trailing + 1`.
async fn recover(store: &Store, bucket: &str) -> StoreResult<JobNumber> {
    let mut txn = store.begin().await?;
    let total = txn.key_count(bucket).await?;

    let mut queued = 0;
    let mut records = txn.scan(bucket, Order::Descending);
    while let Some((_, value)) = records.try_next().await? {
        let job: Job = decode_json(bucket, &value)?;
        match job.status {
            JobStatus::Queued => queued += 1,
            JobStatus::Active => {
                warn!(job = %job.number, "Job was interrupted while active and will not be retried");
                break;
            }
            JobStatus::Succeeded | JobStatus::Failed => break,
        }
    }
    drop(records);

    let current = JobNumber::new(total - queued + 1);
    info!(total, queued, cursor = %current, "Recovered job queue");
    Ok(current)
}

async fn insert_job(store: &Store, bucket: &str, args: JobArgs) -> StoreResult<Job> {
    let mut txn = store.begin().await?;
    let number = JobNumber::new(txn.next_sequence(bucket).await?);
    let job = Job::queued(number, args);
    txn.put_json(bucket, &key::encode(number.get()), &job).await?;
    txn.commit().await?;
    Ok(job)
}

/// Move an active job to its final status. Returns false if it was not active.
async fn complete(
    store: &Store,
    bucket: &str,
    number: JobNumber,
    status: JobStatus,
) -> StoreResult<bool> {
    let key = key::encode(number.get());
    let mut txn = store.begin().await?;
    let Some(mut job) = txn.get_json::<Job>(bucket, &key).await? else {
        return Ok(false);
    };
    if !job.transition(status) {
        return Ok(false);
    }
    txn.put_json(bucket, &key, &job).await?;
    txn.commit().await?;
    Ok(true)
}

enum Activation {
    Ready(Job),
    Skipped(JobStatus),
    Missing,
}

async fn activate(store: &Store, bucket: &str, number: JobNumber) -> StoreResult<Activation> {
    let key = key::encode(number.get());
    let mut txn = store.begin().await?;
    let Some(mut job) = txn.get_json::<Job>(bucket, &key).await? else {
        return Ok(Activation::Missing);
    };
    if !job.transition(JobStatus::Active) {
        return Ok(Activation::Skipped(job.status));
    }
    txn.put_json(bucket, &key, &job).await?;
    txn.commit().await?;
    Ok(Activation::Ready(job))
}

struct Dispatcher {
    store: Store,
    bucket: String,
    retry: RetryPolicy,
    fault: Fault,
    wake: Arc<Notify>,
    closed: CancellationToken,
    finishers: TaskTracker,
    tx: mpsc::Sender<DispatchedJob>,
    current: JobNumber,
}

impl Dispatcher {
    async fn run(mut self) {
        debug!(cursor = %self.current, "Dispatch loop started");

        loop {
            // Room in the channel comes first so an activated job is always delivered.
            let Ok(permit) = self.tx.reserve().await else {
                break;
            };

            let (store, bucket, current) = (&self.store, self.bucket.as_str(), self.current);
            let activated = self
                .retry
                .run("activate job", || activate(store, bucket, current))
                .await;

            match activated {
                Ok(Activation::Ready(job)) => {
                    info!(job = %job.number, "Dispatching job");
                    permit.send(DispatchedJob {
                        job,
                        lease: self.finishers.token(),
                    });
                    self.current = current.next();
                }
                Ok(Activation::Skipped(status)) => {
                    warn!(job = %current, status = %status, "Skipping job that is no longer queued");
                    self.current = current.next();
                }
                // Only an empty backlog gives way to close.
                Ok(Activation::Missing) => {
                    drop(permit);
                    tokio::select! {
                        biased;
                        _ = self.closed.cancelled() => break,
                        _ = self.wake.notified() => {}
                    }
                }
                Err(err) => {
                    error!(job = %current, error = %err, "Failed to dispatch job");
                    self.fault
                        .raise(format!("could not dispatch job #{current}: {err}"));
                    break;
                }
            }
        }

        debug!(cursor = %self.current, "Dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const BUCKET: &str = "jobs";

    fn args(source: &str) -> JobArgs {
        JobArgs::from([
            ("source".to_string(), source.to_string()),
            ("git".to_string(), "main".to_string()),
        ])
    }

    async fn open(store: &Store) -> JobQueue {
        JobQueue::open(store.clone(), BUCKET, RetryPolicy::default(), Fault::new())
            .await
            .unwrap()
    }

    /// Write jobs 1..=n with the given statuses straight into the bucket.
    async fn seed(store: &Store, statuses: &[JobStatus]) {
        let mut txn = store.begin().await.unwrap();
        txn.create_bucket_if_not_exists(BUCKET).await.unwrap();
        for status in statuses {
            let n = txn.next_sequence(BUCKET).await.unwrap();
            let mut job = Job::queued(JobNumber::new(n), args("/seed"));
            job.status = *status;
            txn.put_json(BUCKET, &key::encode(n), &job).await.unwrap();
        }
        txn.commit().await.unwrap();
    }

    async fn stored(store: &Store, number: u64) -> Job {
        let mut txn = store.begin().await.unwrap();
        txn.get_json(BUCKET, &key::encode(number))
            .await
            .unwrap()
            .unwrap()
    }

    async fn next_within(output: &JobOutput, wait: Duration) -> Option<DispatchedJob> {
        tokio::time::timeout(wait, output.next()).await.ok().flatten()
    }

    /// Close the queue while draining whatever is still in flight.
    async fn close_draining(queue: Arc<JobQueue>) -> Vec<JobNumber> {
        let closing = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.close().await })
        };
        let output = queue.output();
        let mut drained = Vec::new();
        while let Some(job) = output.next().await {
            drained.push(job.number());
            queue.finish_job(job, true);
        }
        closing.await.unwrap();
        drained
    }

    #[tokio::test]
    async fn test_numbers_are_dense_under_concurrency() {
        let store = Store::open_in_memory().await.unwrap();
        let queue = Arc::new(open(&store).await);

        let adds = (0..20).map(|i| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.add_job(args(&format!("/src/{i}"))).await })
        });
        let mut numbers: Vec<u64> = futures::future::join_all(adds)
            .await
            .into_iter()
            .map(|res| res.unwrap().unwrap().number.get())
            .collect();
        numbers.sort_unstable();

        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_dispatches_in_number_order() {
        let store = Store::open_in_memory().await.unwrap();
        let queue = Arc::new(open(&store).await);
        let output = queue.output();

        for i in 0..3 {
            let job = queue.add_job(args(&format!("/src/{i}"))).await.unwrap();
            assert_eq!(job.status, JobStatus::Queued);
        }

        let first = output.next().await.unwrap();
        assert_eq!(first.number(), JobNumber::new(1));
        assert_eq!(first.job.status, JobStatus::Active);
        assert_eq!(stored(&store, 1).await.status, JobStatus::Active);
        queue.finish_job(first, true);

        let second = output.next().await.unwrap();
        assert_eq!(second.number(), JobNumber::new(2));
        queue.finish_job(second, false);

        let third = output.next().await.unwrap();
        assert_eq!(third.number(), JobNumber::new(3));
        queue.finish_job(third, true);

        assert!(close_draining(queue).await.is_empty());
        assert_eq!(stored(&store, 1).await.status, JobStatus::Succeeded);
        assert_eq!(stored(&store, 2).await.status, JobStatus::Failed);
        assert_eq!(stored(&store, 3).await.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_idle_queue_wakes_on_add() {
        let store = Store::open_in_memory().await.unwrap();
        let queue = Arc::new(open(&store).await);
        let output = queue.output();

        assert!(next_within(&output, Duration::from_millis(50)).await.is_none());

        queue.add_job(args("/late")).await.unwrap();
        let job = next_within(&output, Duration::from_secs(5)).await.unwrap();
        assert_eq!(job.number(), JobNumber::FIRST);
        queue.finish_job(job, true);

        close_draining(queue).await;
    }

    #[tokio::test]
    async fn test_recovery_with_all_jobs_queued() {
        let store = Store::open_in_memory().await.unwrap();
        seed(&store, &[JobStatus::Queued, JobStatus::Queued]).await;

        let queue = Arc::new(open(&store).await);
        let output = queue.output();
        let first = output.next().await.unwrap();
        assert_eq!(first.number(), JobNumber::new(1));
        queue.finish_job(first, true);

        let drained = close_draining(queue).await;
        assert_eq!(drained, vec![JobNumber::new(2)]);
        assert_eq!(stored(&store, 2).await.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_recovery_resumes_after_finished_jobs() {
        let store = Store::open_in_memory().await.unwrap();
        seed(
            &store,
            &[
                JobStatus::Succeeded,
                JobStatus::Failed,
                JobStatus::Queued,
                JobStatus::Queued,
            ],
        )
        .await;

        let queue = Arc::new(open(&store).await);
        let output = queue.output();
        let first = output.next().await.unwrap();
        assert_eq!(first.number(), JobNumber::new(3));
        queue.finish_job(first, true);
        let second = output.next().await.unwrap();
        assert_eq!(second.number(), JobNumber::new(4));
        queue.finish_job(second, true);

        close_draining(queue).await;
        assert_eq!(stored(&store, 1).await.status, JobStatus::Succeeded);
        assert_eq!(stored(&store, 2).await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_recovery_stops_at_active_job() {
        let store = Store::open_in_memory().await.unwrap();
        seed(
            &store,
            &[JobStatus::Queued, JobStatus::Active, JobStatus::Queued],
        )
        .await;

        let queue = Arc::new(open(&store).await);
        let output = queue.output();
        let job = output.next().await.unwrap();
        assert_eq!(job.number(), JobNumber::new(3));
        queue.finish_job(job, true);
        close_draining(queue).await;

        // The interrupted job is left alone, and so is the queued job before it.
        assert_eq!(stored(&store, 2).await.status, JobStatus::Active);
        assert_eq!(stored(&store, 1).await.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_close_runs_backlog_before_ending() {
        let store = Store::open_in_memory().await.unwrap();
        let queue = Arc::new(open(&store).await);
        let output = queue.output();

        for i in 0..4 {
            queue.add_job(args(&format!("/src/{i}"))).await.unwrap();
        }
        let first = output.next().await.unwrap();
        assert_eq!(first.number(), JobNumber::new(1));

        let consumer = {
            let queue = queue.clone();
            let output = output.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(job) = output.next().await {
                    seen.push(job.number().get());
                    queue.finish_job(job, true);
                }
                seen
            })
        };
        let closing = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.close().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Still waiting on the job we hold.
        assert!(!closing.is_finished());

        queue.finish_job(first, true);
        closing.await.unwrap();
        assert_eq!(consumer.await.unwrap(), vec![2, 3, 4]);
        for n in 1..=4 {
            assert_eq!(stored(&store, n).await.status, JobStatus::Succeeded);
        }

        // Numbering and dispatch carry on after a restart.
        let reopened = Arc::new(open(&store).await);
        let late = reopened.add_job(args("/after-close")).await.unwrap();
        assert_eq!(late.number, JobNumber::new(5));
        let job = reopened.output().next().await.unwrap();
        assert_eq!(job.number(), JobNumber::new(5));
        reopened.finish_job(job, true);
        close_draining(reopened).await;
    }

    #[tokio::test]
    async fn test_output_ends_after_close() {
        let store = Store::open_in_memory().await.unwrap();
        let queue = open(&store).await;
        let output = queue.output();

        queue.close().await;
        assert!(output.next().await.is_none());
    }
}
