//! Redis-backed `QueueStore` (spec §3/§4.1): the FIFO job queue, image blob
//! cache, dedup cache, retry counters, and DLQ list. `collect_batch` matches
//! `original_source/workers/redis_queue.py`'s blocking-pop-then-drain shape:
//! a single `BRPOP` for the first id, then non-blocking `RPOP` until either
//! the window elapses or the batch fills -- never busy-spinning (§9).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{InferenceError, InferenceResult};

const QUEUE_KEY: &str = "queue:inference";
const DLQ_KEY: &str = "dlq:failed_jobs";
const DLQ_MAX_LEN: isize = 1000;
const IMAGE_TTL_SECS: u64 = 600;
const CACHE_TTL_SECS: u64 = 600;
const RETRY_TTL_SECS: u64 = 3600;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, job_id: i64) -> InferenceResult<()>;

    async fn collect_batch(
        &self,
        first_wait_ms: u64,
        window_ms: u64,
        max_size: usize,
    ) -> InferenceResult<Vec<i64>>;

    async fn store_image(&self, sha256: &str, bytes: &[u8]) -> InferenceResult<()>;
    async fn fetch_image(&self, sha256: &str) -> InferenceResult<Option<Vec<u8>>>;

    async fn get_cached_job(&self, sha256: &str) -> InferenceResult<Option<i64>>;
    async fn set_cached_job(&self, sha256: &str, job_id: i64) -> InferenceResult<()>;

    async fn incr_retry(&self, job_id: i64) -> InferenceResult<u32>;
    async fn clear_retry(&self, job_id: i64) -> InferenceResult<()>;

    async fn push_dlq(&self, job_id: i64) -> InferenceResult<()>;
    async fn list_dlq(&self) -> InferenceResult<Vec<i64>>;
}

/// `ConnectionManager` is cheaply `Clone` (an `Arc`-backed multiplexed
/// handle, per `libs/database::redis::connector`'s own doc example) -- each
/// call below clones it rather than sharing one connection behind a mutex,
/// so concurrent workers never serialize behind a single in-flight op.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
}

impl RedisQueueStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn image_key(sha256: &str) -> String {
        format!("image:{sha256}")
    }

    fn cache_key(sha256: &str) -> String {
        format!("cache:sha256:{sha256}")
    }

    fn retry_key(job_id: i64) -> String {
        format!("retry:{job_id}")
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, job_id: i64) -> InferenceResult<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(QUEUE_KEY, job_id)
            .await
            .map_err(InferenceError::from)
    }

    async fn collect_batch(
        &self,
        first_wait_ms: u64,
        window_ms: u64,
        max_size: usize,
    ) -> InferenceResult<Vec<i64>> {
        if max_size == 0 {
            return Ok(vec![]);
        }

        let mut conn = self.conn.clone();

        let first: Option<(String, i64)> = conn
            .brpop(QUEUE_KEY, first_wait_ms as f64 / 1000.0)
            .await
            .map_err(InferenceError::from)?;

        let Some((_, first_id)) = first else {
            return Ok(vec![]);
        };

        let mut batch = vec![first_id];
        let deadline = Instant::now() + Duration::from_millis(window_ms);

        while batch.len() < max_size && Instant::now() < deadline {
            let next: Option<i64> = conn.rpop(QUEUE_KEY, None).await.map_err(InferenceError::from)?;
            match next {
                Some(id) => batch.push(id),
                None => break,
            }
        }

        Ok(batch)
    }

    async fn store_image(&self, sha256: &str, bytes: &[u8]) -> InferenceResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::image_key(sha256), bytes, IMAGE_TTL_SECS)
            .await
            .map_err(InferenceError::from)
    }

    async fn fetch_image(&self, sha256: &str) -> InferenceResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(Self::image_key(sha256))
            .await
            .map_err(InferenceError::from)
    }

    async fn get_cached_job(&self, sha256: &str) -> InferenceResult<Option<i64>> {
        let mut conn = self.conn.clone();
        conn.get(Self::cache_key(sha256))
            .await
            .map_err(InferenceError::from)
    }

    async fn set_cached_job(&self, sha256: &str, job_id: i64) -> InferenceResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::cache_key(sha256), job_id, CACHE_TTL_SECS)
            .await
            .map_err(InferenceError::from)
    }

    async fn incr_retry(&self, job_id: i64) -> InferenceResult<u32> {
        let mut conn = self.conn.clone();
        let key = Self::retry_key(job_id);
        let attempt: i64 = conn.incr(&key, 1).await.map_err(InferenceError::from)?;
        conn.expire::<_, ()>(&key, RETRY_TTL_SECS as i64)
            .await
            .map_err(InferenceError::from)?;
        Ok(attempt as u32)
    }

    async fn clear_retry(&self, job_id: i64) -> InferenceResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::retry_key(job_id))
            .await
            .map_err(InferenceError::from)
    }

    async fn push_dlq(&self, job_id: i64) -> InferenceResult<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(DLQ_KEY, job_id)
            .await
            .map_err(InferenceError::from)?;
        conn.ltrim::<_, ()>(DLQ_KEY, 0, DLQ_MAX_LEN - 1)
            .await
            .map_err(InferenceError::from)
    }

    async fn list_dlq(&self) -> InferenceResult<Vec<i64>> {
        let mut conn = self.conn.clone();
        conn.lrange(DLQ_KEY, 0, -1).await.map_err(InferenceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_naming_matches_spec_section_3() {
        assert_eq!(RedisQueueStore::image_key("abc"), "image:abc");
        assert_eq!(RedisQueueStore::cache_key("abc"), "cache:sha256:abc");
        assert_eq!(RedisQueueStore::retry_key(42), "retry:42");
    }

    #[test]
    fn mock_queue_store_can_be_constructed() {
        let mut mock = MockQueueStore::new();
        mock.expect_enqueue().returning(|_| Ok(()));
        let _ = mock;
    }
}
