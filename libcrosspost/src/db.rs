//! Database operations for Crosspost
//!
//! One SQLite store backs the whole pipeline: content rows (the status
//! tracker's source of truth), broker lanes, dead letters, rate-limit
//! counters, and tenant profiles.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::Result;
use crate::types::{ContentStatus, Platform, ScheduledContent, UserProfile};

const SCHEDULED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::DbError::IoError)?;
        }

        // Forward slashes work for SQLite URLs on both Windows and Unix;
        // mode=rwc creates the file if it does not exist.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory database with migrations applied. For tests.
    ///
    /// Pinned to a single pooled connection that never retires: every
    /// `:memory:` connection is its own database, so a second connection
    /// would see none of the migrated tables.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a tenant profile
    pub async fn create_user(&self, user: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, timezone, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.timezone)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Record whether a user has an active connection to a platform
    pub async fn set_platform_connection(
        &self,
        user_id: &str,
        platform: Platform,
        active: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_connections (user_id, platform, active)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, platform)
            DO UPDATE SET active = excluded.active
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .bind(if active { 1 } else { 0 })
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Create a content item
    pub async fn create_content(&self, content: &ScheduledContent) -> Result<()> {
        let media_refs = serde_json::to_string(&content.media_refs)
            .map_err(|e| crate::error::CrosspostError::InvalidInput(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO content
                (id, user_id, platform, body, media_refs, scheduled_at, status,
                 priority, attempts, failure_reason, platform_post_id,
                 created_at, published_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&content.user_id)
        .bind(content.platform.as_str())
        .bind(&content.body)
        .bind(media_refs)
        .bind(content.scheduled_at.format(SCHEDULED_AT_FORMAT).to_string())
        .bind(content.status.as_str())
        .bind(content.priority.as_str())
        .bind(content.attempts as i64)
        .bind(&content.failure_reason)
        .bind(&content.platform_post_id)
        .bind(content.created_at)
        .bind(content.published_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Get a content item by ID
    pub async fn get_content(&self, content_id: &str) -> Result<Option<ScheduledContent>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, body, media_refs, scheduled_at,
                   status, priority, attempts, failure_reason, platform_post_id,
                   created_at, published_at
            FROM content WHERE id = ?
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        row.map(content_from_row).transpose()
    }

    /// Not-yet-admitted content whose owner has an active connection for the
    /// item's platform, oldest schedule first. Returns each item paired with
    /// the owner's timezone.
    pub async fn discovery_candidates(&self) -> Result<Vec<(ScheduledContent, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.user_id, c.platform, c.body, c.media_refs,
                   c.scheduled_at, c.status, c.priority, c.attempts,
                   c.failure_reason, c.platform_post_id, c.created_at,
                   c.published_at, u.timezone
            FROM content c
            JOIN users u ON u.id = c.user_id
            JOIN platform_connections pc
                ON pc.user_id = c.user_id AND pc.platform = c.platform
            WHERE c.status = 'scheduled' AND pc.active = 1
            ORDER BY c.scheduled_at, c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.into_iter()
            .map(|row| {
                let timezone: String = row.get("timezone");
                content_from_row(row).map(|content| (content, timezone))
            })
            .collect()
    }

    /// Content items in a given status, newest first. Operator queries.
    pub async fn content_by_status(&self, status: ContentStatus) -> Result<Vec<ScheduledContent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, platform, body, media_refs, scheduled_at,
                   status, priority, attempts, failure_reason, platform_post_id,
                   created_at, published_at
            FROM content WHERE status = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.into_iter().map(content_from_row).collect()
    }
}

fn content_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ScheduledContent> {
    let platform: String = row.get("platform");
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let scheduled_at: String = row.get("scheduled_at");
    let media_refs: Option<String> = row.get("media_refs");

    let media_refs = match media_refs {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| crate::error::CrosspostError::InvalidInput(e.to_string()))?,
        None => Vec::new(),
    };

    Ok(ScheduledContent {
        id: row.get("id"),
        user_id: row.get("user_id"),
        platform: platform.parse()?,
        body: row.get("body"),
        media_refs,
        scheduled_at: chrono::NaiveDateTime::parse_from_str(&scheduled_at, SCHEDULED_AT_FORMAT)
            .map_err(|e| {
                crate::error::CrosspostError::InvalidInput(format!(
                    "Bad scheduled_at '{}': {}",
                    scheduled_at, e
                ))
            })?,
        status: status.parse()?,
        priority: priority.parse()?,
        attempts: row.get::<i64, _>("attempts") as u32,
        failure_reason: row.get("failure_reason"),
        platform_post_id: row.get("platform_post_id"),
        created_at: row.get("created_at"),
        published_at: row.get("published_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use chrono::NaiveDate;

    fn test_content(user_id: &str, platform: Platform) -> ScheduledContent {
        ScheduledContent::new(
            user_id.to_string(),
            platform,
            "Test body".to_string(),
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        )
    }

    async fn seed_user(db: &Database, id: &str, timezone: &str, platform: Platform) {
        db.create_user(&UserProfile::new(id.to_string(), timezone.to_string()))
            .await
            .unwrap();
        db.set_platform_connection(id, platform, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_retrieve_content() {
        let db = Database::in_memory().await.unwrap();
        seed_user(&db, "user-1", "UTC", Platform::Facebook).await;

        let mut content = test_content("user-1", Platform::Facebook);
        content.media_refs = vec!["media://a".to_string(), "media://b".to_string()];
        db.create_content(&content).await.unwrap();

        let retrieved = db.get_content(&content.id).await.unwrap().unwrap();
        assert_eq!(retrieved.id, content.id);
        assert_eq!(retrieved.body, content.body);
        assert_eq!(retrieved.platform, Platform::Facebook);
        assert_eq!(retrieved.scheduled_at, content.scheduled_at);
        assert_eq!(retrieved.status, ContentStatus::Scheduled);
        assert_eq!(retrieved.priority, Priority::Normal);
        assert_eq!(retrieved.media_refs, content.media_refs);
        assert_eq!(retrieved.attempts, 0);
    }

    #[tokio::test]
    async fn test_get_nonexistent_content_returns_none() {
        let db = Database::in_memory().await.unwrap();
        let result = db.get_content("no-such-id").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_content_id_rejected() {
        let db = Database::in_memory().await.unwrap();
        seed_user(&db, "user-1", "UTC", Platform::Facebook).await;

        let content = test_content("user-1", Platform::Facebook);
        db.create_content(&content).await.unwrap();

        let mut duplicate = content.clone();
        duplicate.body = "Different body".to_string();
        assert!(db.create_content(&duplicate).await.is_err());

        // Original row unchanged
        let retrieved = db.get_content(&content.id).await.unwrap().unwrap();
        assert_eq!(retrieved.body, content.body);
    }

    #[tokio::test]
    async fn test_discovery_candidates_requires_active_connection() {
        let db = Database::in_memory().await.unwrap();
        seed_user(&db, "user-1", "UTC", Platform::Facebook).await;
        seed_user(&db, "user-2", "UTC", Platform::Facebook).await;
        db.set_platform_connection("user-2", Platform::Facebook, false)
            .await
            .unwrap();

        let connected = test_content("user-1", Platform::Facebook);
        let disconnected = test_content("user-2", Platform::Facebook);
        db.create_content(&connected).await.unwrap();
        db.create_content(&disconnected).await.unwrap();

        let candidates = db.discovery_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0.id, connected.id);
        assert_eq!(candidates[0].1, "UTC");
    }

    #[tokio::test]
    async fn test_discovery_candidates_only_scheduled_status() {
        let db = Database::in_memory().await.unwrap();
        seed_user(&db, "user-1", "America/New_York", Platform::Linkedin).await;

        let scheduled = test_content("user-1", Platform::Linkedin);
        let mut queued = test_content("user-1", Platform::Linkedin);
        queued.status = ContentStatus::Queued;
        let mut published = test_content("user-1", Platform::Linkedin);
        published.status = ContentStatus::Published;

        db.create_content(&scheduled).await.unwrap();
        db.create_content(&queued).await.unwrap();
        db.create_content(&published).await.unwrap();

        let candidates = db.discovery_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0.id, scheduled.id);
        assert_eq!(candidates[0].1, "America/New_York");
    }

    #[tokio::test]
    async fn test_discovery_candidates_ordered_by_schedule() {
        let db = Database::in_memory().await.unwrap();
        seed_user(&db, "user-1", "UTC", Platform::Facebook).await;

        let mut late = test_content("user-1", Platform::Facebook);
        late.scheduled_at = NaiveDate::from_ymd_opt(2024, 1, 16)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let early = test_content("user-1", Platform::Facebook);

        db.create_content(&late).await.unwrap();
        db.create_content(&early).await.unwrap();

        let candidates = db.discovery_candidates().await.unwrap();
        assert_eq!(candidates[0].0.id, early.id);
        assert_eq!(candidates[1].0.id, late.id);
    }

    #[tokio::test]
    async fn test_content_by_status() {
        let db = Database::in_memory().await.unwrap();
        seed_user(&db, "user-1", "UTC", Platform::Youtube).await;

        let mut failed = test_content("user-1", Platform::Youtube);
        failed.status = ContentStatus::Failed;
        failed.failure_reason = Some("max_retries_exceeded".to_string());
        db.create_content(&failed).await.unwrap();
        db.create_content(&test_content("user-1", Platform::Youtube))
            .await
            .unwrap();

        let failed_rows = db.content_by_status(ContentStatus::Failed).await.unwrap();
        assert_eq!(failed_rows.len(), 1);
        assert_eq!(
            failed_rows[0].failure_reason.as_deref(),
            Some("max_retries_exceeded")
        );
    }
}
