//! Named, non-blocking job locks.
//!
//! At most one instance of a periodic job type runs at a time. A second
//! trigger that finds the lock held exits as a no-op; it never waits and
//! never retries.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::future::Future;

pub const SYNC_DAILY_LOCK: &str = "sync-daily";
pub const WEEKLY_REPORTS_LOCK: &str = "weekly-reports";

#[async_trait]
pub trait JobLock: Send + Sync {
    /// Takes the lock if it is free. Returns `false` when someone else holds it.
    async fn try_acquire(&self, name: &str) -> Result<bool>;

    async fn release(&self, name: &str) -> Result<()>;

    /// Starts a release without waiting for it. Used when the job future is
    /// dropped before it finishes.
    fn release_detached(&self, name: &str);
}

/// Lock rows in the `job_locks` table.
///
/// A row older than `ttl_secs` belongs to a crashed holder and may be taken
/// over. Each instance has its own holder id, so one instance cannot release
/// a lock another instance took.
pub struct SqliteJobLock {
    pool: SqlitePool,
    holder: String,
    ttl_secs: i64,
}

impl SqliteJobLock {
    pub fn new(pool: SqlitePool, ttl_secs: i64) -> Self {
        Self {
            pool,
            holder: uuid::Uuid::new_v4().to_string(),
            ttl_secs,
        }
    }
}

#[async_trait]
impl JobLock for SqliteJobLock {
    async fn try_acquire(&self, name: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        // Clear an abandoned row, then claim atomically via the primary key.
        sqlx::query("DELETE FROM job_locks WHERE name = ? AND acquired_at < ?")
            .bind(name)
            .bind(now - self.ttl_secs)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            "INSERT INTO job_locks (name, holder, acquired_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(&self.holder)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM job_locks WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(&self.holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn release_detached(&self, name: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock = name, "no runtime to release job lock, it expires after the TTL");
            return;
        };
        let pool = self.pool.clone();
        let holder = self.holder.clone();
        let name = name.to_string();
        handle.spawn(async move {
            let result = sqlx::query("DELETE FROM job_locks WHERE name = ? AND holder = ?")
                .bind(&name)
                .bind(&holder)
                .execute(&pool)
                .await;
            match result {
                Ok(_) => tracing::info!(lock = %name, "released job lock of cancelled run"),
                Err(e) => tracing::error!(lock = %name, error = %e, "failed to release job lock"),
            }
        });
    }
}

/// Releases the lock in the background if the run is dropped mid-flight.
struct ReleaseOnDrop<'a> {
    lock: &'a dyn JobLock,
    name: &'a str,
    armed: bool,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lock.release_detached(self.name);
        }
    }
}

/// Runs `work` only if `name` can be locked, releasing the lock afterwards.
///
/// Returns `Ok(None)` when the lock was held elsewhere. The result of `work`
/// is returned even if the release itself fails; that failure is logged and
/// the row expires after the TTL. If the returned future is dropped while
/// `work` is running, the lock is released in the background.
pub async fn with_lock<T, F>(lock: &dyn JobLock, name: &str, work: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    if !lock.try_acquire(name).await? {
        tracing::info!(lock = name, "job lock held elsewhere, skipping");
        return Ok(None);
    }

    let mut guard = ReleaseOnDrop {
        lock,
        name,
        armed: true,
    };
    let outcome = work.await;
    guard.armed = false;

    if let Err(e) = lock.release(name).await {
        tracing::error!(lock = name, error = %e, "failed to release job lock");
    }

    outcome.map(Some)
}
