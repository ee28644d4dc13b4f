//! Store transactions.

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{Sqlite, Transaction};

use crate::{StoreError, StoreResult};

/// A `(key, value)` pair read from a bucket.
pub type Record = (Vec<u8>, Vec<u8>);

/// Iteration order of a bucket scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// An open transaction. All reads see one consistent snapshot and all writes
/// land together on [`Txn::commit`]; dropping it rolls everything back.
pub struct Txn {
    tx: Transaction<'static, Sqlite>,
}

impl Txn {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn create_bucket_if_not_exists(&mut self, bucket: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO buckets (name) VALUES (?1) ON CONFLICT (name) DO NOTHING")
            .bind(bucket)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn bucket_exists(&mut self, bucket: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS (SELECT 1 FROM buckets WHERE name = ?1)",
        )
        .bind(bucket)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists != 0)
    }

    async fn require_bucket(&mut self, bucket: &str) -> StoreResult<()> {
        if self.bucket_exists(bucket).await? {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
    }

    pub async fn get(&mut self, bucket: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.require_bucket(bucket).await?;
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM records WHERE bucket = ?1 AND key = ?2",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(value)
    }

    pub async fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.require_bucket(bucket).await?;
        sqlx::query(
            r#"
            INSERT INTO records (bucket, key, value) VALUES (?1, ?2, ?3)
            ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Advance and return the bucket's sequence. The first call yields 1.
    pub async fn next_sequence(&mut self, bucket: &str) -> StoreResult<u64> {
        let next = sqlx::query_scalar::<_, i64>(
            "UPDATE buckets SET sequence = sequence + 1 WHERE name = ?1 RETURNING sequence",
        )
        .bind(bucket)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        Ok(next as u64)
    }

    /// Number of records in the bucket.
    pub async fn key_count(&mut self, bucket: &str) -> StoreResult<u64> {
        self.require_bucket(bucket).await?;
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records WHERE bucket = ?1")
                .bind(bucket)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(count as u64)
    }

    /// Lazily iterate the bucket's records in key order.
    /// Records are fetched as the stream is polled, so stopping early is cheap.
    pub fn scan(&mut self, bucket: &str, order: Order) -> BoxStream<'_, StoreResult<Record>> {
        let sql = match order {
            Order::Ascending => {
                "SELECT key, value FROM records WHERE bucket = ?1 ORDER BY key ASC"
            }
            Order::Descending => {
                "SELECT key, value FROM records WHERE bucket = ?1 ORDER BY key DESC"
            }
        };
        sqlx::query_as::<_, Record>(sql)
            .bind(bucket.to_owned())
            .fetch(&mut *self.tx)
            .map(|row| row.map_err(StoreError::from))
            .boxed()
    }

    pub async fn get_json<T: DeserializeOwned>(
        &mut self,
        bucket: &str,
        key: &[u8],
    ) -> StoreResult<Option<T>> {
        match self.get(bucket, key).await? {
            Some(raw) => decode_json(bucket, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(
        &mut self,
        bucket: &str,
        key: &[u8],
        value: &T,
    ) -> StoreResult<()> {
        let raw = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
            bucket: bucket.to_string(),
            source,
        })?;
        self.put(bucket, key, &raw).await
    }
}

/// Decode a JSON record value read from `bucket`.
pub fn decode_json<T: DeserializeOwned>(bucket: &str, raw: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(raw).map_err(|source| StoreError::Codec {
        bucket: bucket.to_string(),
        source,
    })
}
