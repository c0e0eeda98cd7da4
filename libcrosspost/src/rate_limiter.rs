//! Per-platform publish rate limiting
//!
//! Counters are keyed by (platform, minute bucket) and live in the shared
//! store, so every worker of a platform sees the same budget regardless of
//! which process it runs in. The check and the increment are a single SQL
//! statement; there is no application-side lock to race past.

use std::collections::HashMap;

use crate::db::Database;
use crate::error::Result;
use crate::types::Platform;

/// Seconds per counting window; buckets expire one window after they open.
const WINDOW_SECONDS: i64 = 60;

#[derive(Clone)]
pub struct RateLimiter {
    /// Platform-specific limits (publishes per minute)
    limits: HashMap<Platform, u32>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given limits
    pub fn new(limits: HashMap<Platform, u32>) -> Self {
        Self { limits }
    }

    /// Build from the per-platform config table.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let limits = Platform::ALL
            .iter()
            .filter_map(|&p| config.rate_limit(p).map(|limit| (p, limit)))
            .collect();
        Self::new(limits)
    }

    /// Check-and-increment against the current minute bucket.
    ///
    /// Returns `Ok(true)` and consumes one unit of budget if the platform is
    /// under its limit for this window; returns `Ok(false)` without
    /// incrementing otherwise. Platforms with no configured limit are always
    /// allowed.
    pub async fn allow(&self, db: &Database, platform: Platform, now: i64) -> Result<bool> {
        let limit = match self.limits.get(&platform) {
            Some(l) => *l,
            None => return Ok(true),
        };

        if limit == 0 {
            return Ok(false);
        }

        let window_start = window_start(now);

        // The insert seeds a fresh bucket at 1; on conflict the conditional
        // update only fires while the pre-increment count is under the limit,
        // so concurrent callers cannot push the bucket past it.
        let result = sqlx::query(
            r#"
            INSERT INTO rate_limits (platform, window_start, post_count, expires_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(platform, window_start)
            DO UPDATE SET post_count = post_count + 1
            WHERE rate_limits.post_count < ?
            "#,
        )
        .bind(platform.as_str())
        .bind(window_start)
        .bind(window_start + WINDOW_SECONDS)
        .bind(limit as i64)
        .execute(db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Drop buckets whose expiry has passed.
    pub async fn cleanup_expired(&self, db: &Database, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM rate_limits WHERE expires_at <= ?
            "#,
        )
        .bind(now)
        .execute(db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }
}

/// Floor a timestamp to its minute bucket
fn window_start(timestamp: i64) -> i64 {
    (timestamp / WINDOW_SECONDS) * WINDOW_SECONDS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(platform: Platform, limit: u32) -> RateLimiter {
        let mut limits = HashMap::new();
        limits.insert(platform, limit);
        RateLimiter::new(limits)
    }

    #[tokio::test]
    async fn test_allows_first_publish() {
        let db = Database::in_memory().await.unwrap();
        let limiter = limiter_with(Platform::Facebook, 50);

        let allowed = limiter.allow(&db, Platform::Facebook, 1_000_000).await.unwrap();
        assert!(allowed, "first publish should be allowed");
    }

    #[tokio::test]
    async fn test_blocks_at_limit() {
        let db = Database::in_memory().await.unwrap();
        let limiter = limiter_with(Platform::Facebook, 5);
        let now = 1_000_000;

        for i in 0..5 {
            let allowed = limiter.allow(&db, Platform::Facebook, now).await.unwrap();
            assert!(allowed, "publish {} should be under the limit", i + 1);
        }

        let allowed = limiter.allow(&db, Platform::Facebook, now).await.unwrap();
        assert!(!allowed, "publish 6 should be denied");
    }

    #[tokio::test]
    async fn test_denial_does_not_consume_budget() {
        let db = Database::in_memory().await.unwrap();
        let limiter = limiter_with(Platform::Facebook, 1);
        let now = 1_000_000;

        assert!(limiter.allow(&db, Platform::Facebook, now).await.unwrap());
        assert!(!limiter.allow(&db, Platform::Facebook, now).await.unwrap());

        // Denials in this window leave the counter untouched
        let (count,): (i64,) =
            sqlx::query_as("SELECT post_count FROM rate_limits WHERE platform = 'facebook'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_new_window_resets_budget() {
        let db = Database::in_memory().await.unwrap();
        let limiter = limiter_with(Platform::Instagram, 2);
        let now = 1_000_020; // mid-window

        assert!(limiter.allow(&db, Platform::Instagram, now).await.unwrap());
        assert!(limiter.allow(&db, Platform::Instagram, now).await.unwrap());
        assert!(!limiter.allow(&db, Platform::Instagram, now + 10).await.unwrap());

        // Next minute bucket starts from zero
        assert!(limiter.allow(&db, Platform::Instagram, now + 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_platforms_are_independent() {
        let db = Database::in_memory().await.unwrap();
        let mut limits = HashMap::new();
        limits.insert(Platform::Facebook, 1);
        limits.insert(Platform::Linkedin, 1);
        let limiter = RateLimiter::new(limits);
        let now = 1_000_000;

        assert!(limiter.allow(&db, Platform::Facebook, now).await.unwrap());
        assert!(!limiter.allow(&db, Platform::Facebook, now).await.unwrap());

        assert!(limiter.allow(&db, Platform::Linkedin, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_unconfigured_platform_allowed() {
        let db = Database::in_memory().await.unwrap();
        let limiter = RateLimiter::new(HashMap::new());

        assert!(limiter.allow(&db, Platform::Youtube, 1_000_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_limit_always_denied() {
        let db = Database::in_memory().await.unwrap();
        let limiter = limiter_with(Platform::Youtube, 0);

        assert!(!limiter.allow(&db, Platform::Youtube, 1_000_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_allows_never_exceed_limit() {
        let db = Database::in_memory().await.unwrap();
        let limiter = std::sync::Arc::new(limiter_with(Platform::Facebook, 10));
        let now = 1_000_000;

        let mut handles = vec![];
        for _ in 0..30 {
            let db = db.clone();
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.allow(&db, Platform::Facebook, now).await.unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10, "exactly the limit should be admitted");
    }

    #[tokio::test]
    async fn test_cleanup_expired_windows() {
        let db = Database::in_memory().await.unwrap();
        let limiter = limiter_with(Platform::Facebook, 5);

        limiter.allow(&db, Platform::Facebook, 1_000_000).await.unwrap();
        limiter.allow(&db, Platform::Facebook, 1_000_120).await.unwrap();

        // First bucket expired two minutes later, second is still live
        limiter.cleanup_expired(&db, 1_000_140).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rate_limits")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
