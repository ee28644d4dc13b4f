//! Job repository: read access to the job bucket.
//!
//! Writes belong to the job queue, which owns number allocation and status
//! transitions; this repository only reads committed job records.

use futures::TryStreamExt;
use integrad_core::{Job, JobNumber};

use crate::txn::decode_json;
use crate::{Order, Store, StoreError, StoreResult, key};

#[derive(Clone, Debug)]
pub struct JobRepo {
    store: Store,
    bucket: String,
}

impl JobRepo {
    pub fn new(store: Store, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get a job by number.
    pub async fn get(&self, number: JobNumber) -> StoreResult<Option<Job>> {
        let mut txn = self.store.begin().await?;
        txn.get_json(&self.bucket, &key::encode(number.get())).await
    }

    /// Get a job by number, failing with `NotFound` if it does not exist.
    pub async fn require(&self, number: JobNumber) -> StoreResult<Job> {
        self.get(number)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job #{number}")))
    }

    /// All jobs in number order.
    pub async fn list(&self, order: Order) -> StoreResult<Vec<Job>> {
        let mut txn = self.store.begin().await?;
        let bucket = self.bucket.as_str();
        let records: Vec<_> = txn.scan(bucket, order).try_collect().await?;
        records
            .iter()
            .map(|(_, value)| decode_json(bucket, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use integrad_core::{JobArgs, JobStatus};

    async fn seed(store: &Store, count: u64) {
        let mut txn = store.begin().await.unwrap();
        txn.create_bucket_if_not_exists("jobs").await.unwrap();
        for _ in 0..count {
            let n = txn.next_sequence("jobs").await.unwrap();
            let job = Job::queued(JobNumber::new(n), JobArgs::new());
            txn.put_json("jobs", &key::encode(n), &job).await.unwrap();
        }
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let store = Store::open_in_memory().await.unwrap();
        seed(&store, 3).await;
        let repo = JobRepo::new(store, "jobs");

        let job = repo.require(JobNumber::new(2)).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(repo.get(JobNumber::new(9)).await.unwrap().is_none());
        assert!(matches!(
            repo.require(JobNumber::new(9)).await,
            Err(StoreError::NotFound(_))
        ));

        let newest_first: Vec<u64> = repo
            .list(Order::Descending)
            .await
            .unwrap()
            .iter()
            .map(|j| j.number.get())
            .collect();
        assert_eq!(newest_first, vec![3, 2, 1]);
    }
}
