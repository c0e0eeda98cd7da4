//! Status tracking for content items
//!
//! The tracker is the sole source of truth for "already published". Every
//! write is an upsert keyed by content id, so replaying an update is safe;
//! an unknown id is a not-found error, never a fresh row.

use chrono::Utc;

use crate::db::Database;
use crate::error::{CrosspostError, Result};
use crate::types::ContentStatus;

/// Optional fields accompanying a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusMetadata {
    /// New attempt count. Applied as `MAX(current, new)` so the stored value
    /// is monotonically non-decreasing even under redelivery races.
    pub attempts: Option<u32>,
    pub failure_reason: Option<String>,
    pub platform_post_id: Option<String>,
}

#[derive(Clone)]
pub struct StatusTracker {
    db: Database,
}

impl StatusTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Transition a content item to `status`, merging in any metadata.
    ///
    /// Repeating the same update is a no-op beyond the timestamp; unknown ids
    /// return `NotFound` rather than creating a record.
    pub async fn update(
        &self,
        content_id: &str,
        status: ContentStatus,
        metadata: StatusMetadata,
    ) -> Result<()> {
        let published_at = if status == ContentStatus::Published {
            Some(Utc::now().timestamp())
        } else {
            None
        };

        let result = sqlx::query(
            r#"
            UPDATE content
            SET status = ?,
                attempts = MAX(attempts, COALESCE(?, attempts)),
                failure_reason = COALESCE(?, failure_reason),
                platform_post_id = COALESCE(?, platform_post_id),
                published_at = COALESCE(?, published_at)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(metadata.attempts.map(|a| a as i64))
        .bind(&metadata.failure_reason)
        .bind(&metadata.platform_post_id)
        .bind(published_at)
        .bind(content_id)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(CrosspostError::NotFound(content_id.to_string()));
        }

        Ok(())
    }

    /// Current status of a content item, or `None` for an unknown id.
    pub async fn get_status(&self, content_id: &str) -> Result<Option<ContentStatus>> {
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT status FROM content WHERE id = ?
            "#,
        )
        .bind(content_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        row.map(|(s,)| s.parse()).transpose()
    }

    /// Guarded admission: `scheduled` to `queued` only if the item is still
    /// `scheduled`. Returns whether this caller won the transition, which is
    /// what keeps overlapping discovery runs from double-admitting without a
    /// distributed lock.
    pub async fn try_admit(&self, content_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE content SET status = 'queued'
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(content_id)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }
}
