//! Durable priority queue broker
//!
//! Four lanes (`high`, `normal`, `low`, `retry`) live in one SQLite table,
//! drained in strict lane order and FIFO within a lane. Delivery is
//! at-least-once: consuming a message stamps a lease token and a visibility
//! deadline, and only an explicit acknowledgment deletes the row. A consumer
//! that crashes mid-flight simply lets the lease lapse and the message is
//! redelivered. Delayed redelivery (retry backoff, rate-limit deferral) is a
//! persisted `visible_at` instant, so it survives restarts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{CrosspostError, Result};
use crate::types::{Platform, Priority, QueueMessage};

/// One of the broker's priority-ordered sub-queues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    High,
    Normal,
    Low,
    Retry,
}

impl Lane {
    pub const ALL: [Lane; 4] = [Lane::High, Lane::Normal, Lane::Low, Lane::Retry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::High => "high",
            Lane::Normal => "normal",
            Lane::Low => "low",
            Lane::Retry => "retry",
        }
    }
}

impl From<Priority> for Lane {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::High => Lane::High,
            Priority::Normal => Lane::Normal,
            Priority::Low => Lane::Low,
        }
    }
}

impl std::str::FromStr for Lane {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Lane::High),
            "normal" => Ok(Lane::Normal),
            "low" => Ok(Lane::Low),
            "retry" => Ok(Lane::Retry),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unknown lane: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An in-flight delivery. The body is kept raw so a message that fails to
/// deserialize can still be dead-lettered with its original bytes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub content_ref: String,
    pub lane: Lane,
    pub routing_platform: Platform,
    pub body: String,
    pub lease_token: String,
}

impl Delivery {
    /// Parse the wire body. Failure routes the message to the dead-letter
    /// path, never into business logic.
    pub fn parse(&self) -> std::result::Result<QueueMessage, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Depth summary for one lane.
#[derive(Debug, Clone, Serialize)]
pub struct LaneStats {
    pub lane: Lane,
    pub ready: i64,
    pub delayed: i64,
    pub in_flight: i64,
}

/// A dead-lettered message, surfaced for operator inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: String,
    pub content_ref: Option<String>,
    pub lane: Lane,
    pub platform: Platform,
    pub body: String,
    pub reason: String,
    pub dead_at: i64,
}

#[derive(Clone)]
pub struct QueueBroker {
    db: Database,
    ttl_seconds: i64,
    lease_seconds: i64,
}

impl QueueBroker {
    pub fn new(db: Database, ttl_seconds: i64, lease_seconds: i64) -> Self {
        Self {
            db,
            ttl_seconds,
            lease_seconds,
        }
    }

    pub fn from_config(db: Database, config: &crate::config::Config) -> Self {
        Self::new(
            db,
            config.delivery.message_ttl_seconds,
            config.delivery.lease_seconds,
        )
    }

    /// Publish a message into a lane, optionally delayed.
    pub async fn publish(
        &self,
        message: &QueueMessage,
        lane: Lane,
        delay_seconds: i64,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let body = serde_json::to_string(message)
            .map_err(|e| CrosspostError::InvalidInput(e.to_string()))?;
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO queue_messages
                (id, content_ref, lane, platform, body, enqueued_at,
                 visible_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&message.content_ref)
        .bind(lane.as_str())
        .bind(message.platform.as_str())
        .bind(&body)
        .bind(now)
        .bind(now + delay_seconds)
        .bind(now + self.ttl_seconds)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(id)
    }

    /// Claim the next visible message routed to `platform`.
    ///
    /// Lanes drain in strict priority order (high, normal, low, then retry)
    /// and FIFO within a lane; retries never starve fresh content. The claim
    /// is a single statement, so two workers cannot lease the same row.
    pub async fn consume(&self, platform: Platform, now: i64) -> Result<Option<Delivery>> {
        let token = Uuid::new_v4().to_string();

        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET leased_until = ?, lease_token = ?
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE platform = ?
                  AND visible_at <= ?
                  AND expires_at > ?
                  AND (leased_until IS NULL OR leased_until <= ?)
                ORDER BY CASE lane
                             WHEN 'high' THEN 0
                             WHEN 'normal' THEN 1
                             WHEN 'low' THEN 2
                             ELSE 3
                         END,
                         rowid
                LIMIT 1
            )
            RETURNING id, content_ref, lane, platform, body
            "#,
        )
        .bind(now + self.lease_seconds)
        .bind(&token)
        .bind(platform.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_optional(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lane: String = row.get("lane");
        let routing_platform: String = row.get("platform");

        Ok(Some(Delivery {
            message_id: row.get("id"),
            content_ref: row.get("content_ref"),
            lane: lane.parse()?,
            routing_platform: routing_platform.parse()?,
            body: row.get("body"),
            lease_token: token,
        }))
    }

    /// Acknowledge a delivery, removing the message for good.
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM queue_messages WHERE id = ? AND lease_token = ?
            "#,
        )
        .bind(&delivery.message_id)
        .bind(&delivery.lease_token)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Return a delivery to its lane, visible again after `delay_seconds`.
    /// The body is rewritten so an updated attempt count travels with the
    /// message.
    pub async fn release(
        &self,
        delivery: &Delivery,
        message: &QueueMessage,
        lane: Lane,
        delay_seconds: i64,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let body = serde_json::to_string(message)
            .map_err(|e| CrosspostError::InvalidInput(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE queue_messages
            SET lane = ?, body = ?, visible_at = ?,
                leased_until = NULL, lease_token = NULL
            WHERE id = ? AND lease_token = ?
            "#,
        )
        .bind(lane.as_str())
        .bind(body)
        .bind(now + delay_seconds)
        .bind(&delivery.message_id)
        .bind(&delivery.lease_token)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Release without touching the body. Used when the outcome is unknown
    /// (e.g. a status-tracker write failed) and the message should simply be
    /// redelivered.
    pub async fn nack(&self, delivery: &Delivery, delay_seconds: i64) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE queue_messages
            SET visible_at = ?, leased_until = NULL, lease_token = NULL
            WHERE id = ? AND lease_token = ?
            "#,
        )
        .bind(now + delay_seconds)
        .bind(&delivery.message_id)
        .bind(&delivery.lease_token)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Move a delivery to the dead-letter table. Terminal; never requeued
    /// automatically.
    pub async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO dead_letters
                (id, content_ref, lane, platform, body, reason, dead_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&delivery.message_id)
        .bind(&delivery.content_ref)
        .bind(delivery.lane.as_str())
        .bind(delivery.routing_platform.as_str())
        .bind(&delivery.body)
        .bind(reason)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        self.ack(delivery).await
    }

    /// Remove messages past their TTL and report the content refs they
    /// carried so callers can mark that content `expired`. In-flight
    /// messages are left to finish; they are swept on a later pass if their
    /// lease lapses.
    pub async fn expire_stale(&self, now: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE expires_at <= ?
              AND (leased_until IS NULL OR leased_until <= ?)
            RETURNING content_ref
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_all(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.into_iter().map(|r| r.get("content_ref")).collect())
    }

    /// Per-lane depth summary for operator tooling.
    pub async fn lane_stats(&self, now: i64) -> Result<Vec<LaneStats>> {
        let mut stats = Vec::with_capacity(Lane::ALL.len());

        for lane in Lane::ALL {
            let row = sqlx::query(
                r#"
                SELECT
                    SUM(CASE WHEN visible_at <= ?
                             AND (leased_until IS NULL OR leased_until <= ?)
                        THEN 1 ELSE 0 END) AS ready,
                    SUM(CASE WHEN visible_at > ? THEN 1 ELSE 0 END) AS delayed,
                    SUM(CASE WHEN leased_until > ? THEN 1 ELSE 0 END) AS in_flight
                FROM queue_messages WHERE lane = ?
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(lane.as_str())
            .fetch_one(self.db.pool())
            .await
            .map_err(crate::error::DbError::SqlxError)?;

            stats.push(LaneStats {
                lane,
                ready: row.get::<Option<i64>, _>("ready").unwrap_or(0),
                delayed: row.get::<Option<i64>, _>("delayed").unwrap_or(0),
                in_flight: row.get::<Option<i64>, _>("in_flight").unwrap_or(0),
            });
        }

        Ok(stats)
    }

    /// All messages currently in a lane, FIFO order.
    pub async fn list_lane(&self, lane: Lane) -> Result<Vec<Delivery>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_ref, lane, platform, body
            FROM queue_messages WHERE lane = ?
            ORDER BY rowid
            "#,
        )
        .bind(lane.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.into_iter()
            .map(|row| {
                let lane: String = row.get("lane");
                let platform: String = row.get("platform");
                Ok(Delivery {
                    message_id: row.get("id"),
                    content_ref: row.get("content_ref"),
                    lane: lane.parse()?,
                    routing_platform: platform.parse()?,
                    body: row.get("body"),
                    lease_token: String::new(),
                })
            })
            .collect()
    }

    /// Dead letters, newest first.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_ref, lane, platform, body, reason, dead_at
            FROM dead_letters ORDER BY dead_at DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.into_iter()
            .map(|row| {
                let lane: String = row.get("lane");
                let platform: String = row.get("platform");
                Ok(DeadLetter {
                    id: row.get("id"),
                    content_ref: row.get("content_ref"),
                    lane: lane.parse()?,
                    platform: platform.parse()?,
                    body: row.get("body"),
                    reason: row.get("reason"),
                    dead_at: row.get("dead_at"),
                })
            })
            .collect()
    }

    /// Move a dead letter back into its original lane, visible immediately.
    /// Operator action after fixing whatever killed the message.
    pub async fn requeue_dead_letter(&self, dead_letter_id: &str) -> Result<()> {
        let row = sqlx::query(
            r#"
            SELECT id, content_ref, lane, platform, body
            FROM dead_letters WHERE id = ?
            "#,
        )
        .bind(dead_letter_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        let Some(row) = row else {
            return Err(CrosspostError::NotFound(dead_letter_id.to_string()));
        };

        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO queue_messages
                (id, content_ref, lane, platform, body, enqueued_at,
                 visible_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.get::<String, _>("id"))
        .bind(row.get::<Option<String>, _>("content_ref"))
        .bind(row.get::<String, _>("lane"))
        .bind(row.get::<String, _>("platform"))
        .bind(row.get::<String, _>("body"))
        .bind(now)
        .bind(now)
        .bind(now + self.ttl_seconds)
        .execute(self.db.pool())
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        sqlx::query("DELETE FROM dead_letters WHERE id = ?")
            .bind(dead_letter_id)
            .execute(self.db.pool())
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentPayload, DEFAULT_MAX_ATTEMPTS};

    fn test_message(content_ref: &str, platform: Platform, priority: Priority) -> QueueMessage {
        QueueMessage {
            content_ref: content_ref.to_string(),
            platform,
            post: ContentPayload {
                body: "queued body".to_string(),
                media_refs: vec![],
            },
            enqueued_at: Utc::now(),
            priority,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    async fn test_broker() -> QueueBroker {
        let db = Database::in_memory().await.unwrap();
        QueueBroker::new(db, 24 * 3600, 120)
    }

    #[tokio::test]
    async fn test_publish_and_consume() {
        let broker = test_broker().await;
        let message = test_message("c-1", Platform::Facebook, Priority::Normal);
        broker.publish(&message, Lane::Normal, 0).await.unwrap();

        let now = Utc::now().timestamp();
        let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();

        assert_eq!(delivery.content_ref, "c-1");
        assert_eq!(delivery.lane, Lane::Normal);
        assert_eq!(delivery.parse().unwrap(), message);
    }

    #[tokio::test]
    async fn test_consume_empty_lane_returns_none() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();
        assert!(broker.consume(Platform::Facebook, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_filters_by_platform() {
        let broker = test_broker().await;
        let message = test_message("c-1", Platform::Instagram, Priority::Normal);
        broker.publish(&message, Lane::Normal, 0).await.unwrap();

        let now = Utc::now().timestamp();
        assert!(broker.consume(Platform::Facebook, now).await.unwrap().is_none());
        assert!(broker.consume(Platform::Instagram, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_strict_lane_priority() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        broker
            .publish(&test_message("low", Platform::Facebook, Priority::Low), Lane::Low, 0)
            .await
            .unwrap();
        broker
            .publish(
                &test_message("retry", Platform::Facebook, Priority::Normal),
                Lane::Retry,
                0,
            )
            .await
            .unwrap();
        broker
            .publish(
                &test_message("normal", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();
        broker
            .publish(
                &test_message("high", Platform::Facebook, Priority::High),
                Lane::High,
                0,
            )
            .await
            .unwrap();

        let mut order = Vec::new();
        while let Some(delivery) = broker.consume(Platform::Facebook, now).await.unwrap() {
            order.push(delivery.content_ref.clone());
            broker.ack(&delivery).await.unwrap();
        }

        assert_eq!(order, vec!["high", "normal", "low", "retry"]);
    }

    #[tokio::test]
    async fn test_fifo_within_lane() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        for i in 0..3 {
            broker
                .publish(
                    &test_message(&format!("c-{}", i), Platform::Facebook, Priority::Normal),
                    Lane::Normal,
                    0,
                )
                .await
                .unwrap();
        }

        for i in 0..3 {
            let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
            assert_eq!(delivery.content_ref, format!("c-{}", i));
            broker.ack(&delivery).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_leased_message_not_redelivered() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        let message = test_message("c-1", Platform::Facebook, Priority::Normal);
        broker.publish(&message, Lane::Normal, 0).await.unwrap();

        let _held = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
        // Same instant: the lease blocks a second claim
        assert!(broker.consume(Platform::Facebook, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lapsed_lease_is_redelivered() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        let message = test_message("c-1", Platform::Facebook, Priority::Normal);
        broker.publish(&message, Lane::Normal, 0).await.unwrap();

        let first = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();

        // No ack; after the lease window the message comes back
        let later = now + 121;
        let second = broker.consume(Platform::Facebook, later).await.unwrap().unwrap();
        assert_eq!(second.message_id, first.message_id);
        assert_ne!(second.lease_token, first.lease_token);
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        broker
            .publish(
                &test_message("c-1", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();

        let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
        broker.ack(&delivery).await.unwrap();

        assert!(broker.consume(Platform::Facebook, now + 3600).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_moves_to_retry_with_delay_and_new_body() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        let message = test_message("c-1", Platform::Facebook, Priority::Normal);
        broker.publish(&message, Lane::Normal, 0).await.unwrap();

        let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
        let mut retried = delivery.parse().unwrap();
        retried.attempts += 1;
        broker.release(&delivery, &retried, Lane::Retry, 300).await.unwrap();

        // Invisible during the delay
        assert!(broker.consume(Platform::Facebook, now + 10).await.unwrap().is_none());

        // Redelivered from the retry lane with the incremented attempt count
        let redelivered = broker
            .consume(Platform::Facebook, now + 301)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.lane, Lane::Retry);
        let parsed = redelivered.parse().unwrap();
        assert_eq!(parsed.content_ref, "c-1");
        assert_eq!(parsed.attempts, message.attempts + 1);
    }

    #[tokio::test]
    async fn test_nack_keeps_lane_and_body() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        let message = test_message("c-1", Platform::Facebook, Priority::High);
        broker.publish(&message, Lane::High, 0).await.unwrap();

        let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
        broker.nack(&delivery, 60).await.unwrap();

        let redelivered = broker
            .consume(Platform::Facebook, now + 61)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.lane, Lane::High);
        assert_eq!(redelivered.parse().unwrap().attempts, message.attempts);
    }

    #[tokio::test]
    async fn test_dead_letter_is_terminal_and_inspectable() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        broker
            .publish(
                &test_message("c-1", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();

        let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
        broker.dead_letter(&delivery, "unknown content id").await.unwrap();

        assert!(broker.consume(Platform::Facebook, now + 3600).await.unwrap().is_none());

        let dead = broker.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "unknown content id");
        assert_eq!(dead[0].content_ref.as_deref(), Some("c-1"));
    }

    #[tokio::test]
    async fn test_requeue_dead_letter() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        broker
            .publish(
                &test_message("c-1", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();

        let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
        broker.dead_letter(&delivery, "oops").await.unwrap();

        let dead = broker.dead_letters().await.unwrap();
        broker.requeue_dead_letter(&dead[0].id).await.unwrap();

        assert!(broker.dead_letters().await.unwrap().is_empty());
        let redelivered = broker
            .consume(Platform::Facebook, Utc::now().timestamp())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.content_ref, "c-1");
    }

    #[tokio::test]
    async fn test_requeue_unknown_dead_letter() {
        let broker = test_broker().await;
        let result = broker.requeue_dead_letter("no-such-id").await;
        assert!(matches!(result, Err(CrosspostError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_messages_are_swept() {
        let db = Database::in_memory().await.unwrap();
        let broker = QueueBroker::new(db, 10, 120); // 10s TTL
        let now = Utc::now().timestamp();

        broker
            .publish(
                &test_message("c-1", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();

        // Before the TTL nothing is swept
        assert!(broker.expire_stale(now + 5).await.unwrap().is_empty());

        let expired = broker.expire_stale(now + 11).await.unwrap();
        assert_eq!(expired, vec!["c-1".to_string()]);
        assert!(broker.consume(Platform::Facebook, now + 11).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_message_not_consumable() {
        let db = Database::in_memory().await.unwrap();
        let broker = QueueBroker::new(db, 10, 120);
        let now = Utc::now().timestamp();

        broker
            .publish(
                &test_message("c-1", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();

        // Past the TTL the message is dead even before a sweep runs
        assert!(broker.consume(Platform::Facebook, now + 11).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lane_stats() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        broker
            .publish(
                &test_message("ready", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();
        broker
            .publish(
                &test_message("delayed", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                600,
            )
            .await
            .unwrap();
        broker
            .publish(
                &test_message("held", Platform::Facebook, Priority::Normal),
                Lane::Normal,
                0,
            )
            .await
            .unwrap();
        // Lease one of the ready messages
        broker.consume(Platform::Facebook, now).await.unwrap().unwrap();

        let stats = broker.lane_stats(now).await.unwrap();
        let normal = stats.iter().find(|s| s.lane == Lane::Normal).unwrap();
        assert_eq!(normal.ready, 1);
        assert_eq!(normal.delayed, 1);
        assert_eq!(normal.in_flight, 1);

        let high = stats.iter().find(|s| s.lane == Lane::High).unwrap();
        assert_eq!(high.ready + high.delayed + high.in_flight, 0);
    }

    #[tokio::test]
    async fn test_malformed_body_detected_at_parse() {
        let broker = test_broker().await;
        let now = Utc::now().timestamp();

        // Simulate an out-of-band writer inserting junk
        sqlx::query(
            r#"
            INSERT INTO queue_messages
                (id, content_ref, lane, platform, body, enqueued_at, visible_at, expires_at)
            VALUES ('bad-1', 'c-1', 'normal', 'facebook', '{not json', ?, ?, ?)
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now + 3600)
        .execute(broker.db.pool())
        .await
        .unwrap();

        let delivery = broker.consume(Platform::Facebook, now).await.unwrap().unwrap();
        assert!(delivery.parse().is_err());
    }
}
