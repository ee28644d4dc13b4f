//! Batched writer for a single job's log.
//!
//! Producers push chunks into a bounded channel. A flush loop appends
//! everything buffered since the previous flush in one store transaction,
//! once per flush interval and once more when the input closes.

use async_trait::async_trait;
use integrad_core::JobNumber;
use integrad_core::runner::{JobLogger, LogSink};
use integrad_store::{LogRepo, RetryPolicy, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::Fault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogWriterSettings {
    /// Time between flushes.
    pub flush_interval: Duration,
    /// Chunks buffered before `write` waits.
    pub capacity: usize,
}

impl Default for LogWriterSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(500),
            capacity: 64,
        }
    }
}

pub struct LogWriter {
    job: JobNumber,
    tx: mpsc::Sender<String>,
    flusher: JoinHandle<()>,
}

impl LogWriter {
    /// Create the job's log bucket and start the flush loop.
    pub async fn open(
        logs: LogRepo,
        job: JobNumber,
        settings: LogWriterSettings,
        retry: RetryPolicy,
        fault: Fault,
    ) -> StoreResult<Self> {
        let repo = &logs;
        retry.run("open job log", || repo.ensure(job)).await?;

        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let flusher = tokio::spawn(flush_loop(
            logs,
            job,
            rx,
            settings.flush_interval,
            retry,
            fault,
        ));
        debug!(job = %job, "Log writer opened");

        Ok(Self { job, tx, flusher })
    }

    /// A cloneable handle feeding this writer.
    pub fn input(&self) -> LogInput {
        LogInput {
            job: self.job,
            tx: self.tx.clone(),
        }
    }

    /// A timestamping logger feeding this writer.
    pub fn logger(&self) -> JobLogger {
        JobLogger::new(Arc::new(self.input()))
    }

    pub async fn write(&self, chunk: impl Into<String>) {
        self.input().write(chunk.into()).await;
    }

    /// Close the input and wait for the final flush to commit.
    ///
    /// Every [`LogInput`] and [`JobLogger`] taken from this writer must be
    /// dropped first, the flush loop only ends once all of them are gone.
    pub async fn close(self) {
        let Self { job, tx, flusher } = self;
        drop(tx);
        if let Err(err) = flusher.await {
            error!(job = %job, error = %err, "Log flush loop panicked");
        }
        debug!(job = %job, "Log writer closed");
    }
}

/// Sending half of a [`LogWriter`].
#[derive(Debug, Clone)]
pub struct LogInput {
    job: JobNumber,
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl LogSink for LogInput {
    async fn write(&self, chunk: String) {
        if self.tx.send(chunk).await.is_err() {
            warn!(job = %self.job, "Log writer is closed, dropping output");
        }
    }
}

async fn flush_loop(
    logs: LogRepo,
    job: JobNumber,
    mut rx: mpsc::Receiver<String>,
    interval: Duration,
    retry: RetryPolicy,
    fault: Fault,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = ticker.tick() => {
                while let Ok(chunk) = rx.try_recv() {
                    batch.push(chunk);
                }
                flush(&logs, job, &mut batch, retry, &fault).await;
            }
            chunk = rx.recv() => match chunk {
                Some(chunk) => batch.push(chunk),
                None => break,
            },
        }
    }

    flush(&logs, job, &mut batch, retry, &fault).await;
}

async fn flush(
    logs: &LogRepo,
    job: JobNumber,
    batch: &mut Vec<String>,
    retry: RetryPolicy,
    fault: &Fault,
) {
    if batch.is_empty() {
        return;
    }

    let chunks = std::mem::take(batch);
    let pending = chunks.as_slice();
    match retry
        .run("flush job log", || logs.append(job, pending))
        .await
    {
        Ok(()) => debug!(job = %job, chunks = chunks.len(), "Flushed job log"),
        Err(err) => {
            error!(
                job = %job,
                chunks = chunks.len(),
                error = %err,
                "Failed to persist job log, dropping records"
            );
            fault.raise(format!("could not persist log of job #{job}: {err}"));
        }
    }
}
