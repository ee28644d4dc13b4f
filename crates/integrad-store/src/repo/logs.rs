//! Log repository for storing and retrieving job logs.
//!
//! Every job gets its own bucket nested under the log parent bucket
//! (`logs/job-7`). Records are keyed by the bucket's own sequence, so reading
//! them in key order replays the log in the order it was written.

use futures::TryStreamExt;
use integrad_core::JobNumber;

use crate::{Order, Store, StoreResult, key, nested};

#[derive(Clone, Debug)]
pub struct LogRepo {
    store: Store,
    parent: String,
}

impl LogRepo {
    pub fn new(store: Store, parent: impl Into<String>) -> Self {
        Self {
            store,
            parent: parent.into(),
        }
    }

    /// Bucket holding the records of `job`.
    pub fn bucket_for(&self, job: JobNumber) -> String {
        nested(&self.parent, &format!("job-{job}"))
    }

    /// Create the job's log bucket (and the parent) if missing.
    pub async fn ensure(&self, job: JobNumber) -> StoreResult<()> {
        let mut txn = self.store.begin().await?;
        txn.create_bucket_if_not_exists(&self.parent).await?;
        txn.create_bucket_if_not_exists(&self.bucket_for(job)).await?;
        txn.commit().await
    }

    /// Append chunks in order, all in one transaction.
    pub async fn append(&self, job: JobNumber, chunks: &[String]) -> StoreResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let bucket = self.bucket_for(job);
        let mut txn = self.store.begin().await?;
        for chunk in chunks {
            let seq = txn.next_sequence(&bucket).await?;
            txn.put(&bucket, &key::encode(seq), chunk.as_bytes()).await?;
        }
        txn.commit().await
    }

    /// All records of a job, oldest first. A job that never logged has none.
    pub async fn read(&self, job: JobNumber) -> StoreResult<Vec<String>> {
        let bucket = self.bucket_for(job);
        let mut txn = self.store.begin().await?;
        if !txn.bucket_exists(&bucket).await? {
            return Ok(Vec::new());
        }

        let records: Vec<_> = txn.scan(&bucket, Order::Ascending).try_collect().await?;
        Ok(records
            .into_iter()
            .map(|(_, value)| String::from_utf8_lossy(&value).into_owned())
            .collect())
    }
}
