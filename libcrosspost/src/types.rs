//! Core types for Crosspost

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CrosspostError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Target platform for a content item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
    Linkedin,
    Youtube,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::Linkedin,
        Platform::Youtube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
            Platform::Youtube => "youtube",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "linkedin" => Ok(Platform::Linkedin),
            "youtube" => Ok(Platform::Youtube),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unknown platform: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a content item. `Published`, `Failed`, and `Expired`
/// are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    /// Awaiting admission by the discovery scheduler.
    Scheduled,
    /// Admitted into the broker (or re-queued after a retryable failure).
    Queued,
    /// A worker holds the message and is calling the publish adapter.
    Publishing,
    Published,
    Failed,
    Expired,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Scheduled => "scheduled",
            ContentStatus::Queued => "queued",
            ContentStatus::Publishing => "publishing",
            ContentStatus::Published => "published",
            ContentStatus::Failed => "failed",
            ContentStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContentStatus::Published | ContentStatus::Failed | ContentStatus::Expired
        )
    }
}

impl std::str::FromStr for ContentStatus {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(ContentStatus::Draft),
            "scheduled" => Ok(ContentStatus::Scheduled),
            "queued" => Ok(ContentStatus::Queued),
            "publishing" => Ok(ContentStatus::Publishing),
            "published" => Ok(ContentStatus::Published),
            "failed" => Ok(ContentStatus::Failed),
            "expired" => Ok(ContentStatus::Expired),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unknown content status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Admission priority, mapped one-to-one onto the broker's non-retry lanes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unknown priority: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One content item awaiting or having undergone publication.
///
/// `scheduled_at` is a wall-clock instant in the owning user's timezone;
/// the discovery scheduler resolves it to UTC at admission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledContent {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub body: String,
    pub media_refs: Vec<String>,
    pub scheduled_at: NaiveDateTime,
    pub status: ContentStatus,
    pub priority: Priority,
    pub attempts: u32,
    pub failure_reason: Option<String>,
    pub platform_post_id: Option<String>,
    pub created_at: i64,
    pub published_at: Option<i64>,
}

impl ScheduledContent {
    pub fn new(
        user_id: String,
        platform: Platform,
        body: String,
        scheduled_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            platform,
            body,
            media_refs: Vec::new(),
            scheduled_at,
            status: ContentStatus::Scheduled,
            priority: Priority::Normal,
            attempts: 0,
            failure_reason: None,
            platform_post_id: None,
            created_at: Utc::now().timestamp(),
            published_at: None,
        }
    }

    /// Resolve the stored wall-clock instant to UTC in the given timezone.
    ///
    /// An ambiguous local time (DST fall-back) resolves to the earlier
    /// instant; a nonexistent one (spring-forward gap) is an error and the
    /// item is skipped until an operator fixes the schedule.
    pub fn scheduled_at_utc(&self, timezone: &str) -> Result<DateTime<Utc>> {
        use chrono::offset::LocalResult;
        use chrono::TimeZone;

        let tz: chrono_tz::Tz = timezone.parse().map_err(|_| {
            CrosspostError::InvalidInput(format!("Unknown timezone: {}", timezone))
        })?;

        match tz.from_local_datetime(&self.scheduled_at) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earlier, _) => Ok(earlier.with_timezone(&Utc)),
            LocalResult::None => Err(CrosspostError::InvalidInput(format!(
                "Schedule instant {} does not exist in timezone {}",
                self.scheduled_at, timezone
            ))),
        }
    }
}

/// Platform-opaque content payload carried inside a queue message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentPayload {
    pub body: String,
    #[serde(default)]
    pub media_refs: Vec<String>,
}

/// The unit traveling through the broker.
///
/// All fields are required at deserialization; a message that does not parse
/// is dead-lettered instead of reaching business logic. The platform is an
/// explicit field, never recovered from a routing string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMessage {
    pub content_ref: String,
    pub platform: Platform,
    pub post: ContentPayload,
    pub enqueued_at: DateTime<Utc>,
    pub priority: Priority,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl QueueMessage {
    /// Build the admission message for a content item.
    pub fn for_content(content: &ScheduledContent, max_attempts: u32) -> Self {
        Self {
            content_ref: content.id.clone(),
            platform: content.platform,
            post: ContentPayload {
                body: content.body.clone(),
                media_refs: content.media_refs.clone(),
            },
            enqueued_at: Utc::now(),
            priority: content.priority,
            attempts: content.attempts,
            max_attempts,
        }
    }
}

/// Tenant profile consulted during discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub timezone: String,
    pub created_at: i64,
}

impl UserProfile {
    pub fn new(id: String, timezone: String) -> Self {
        Self {
            id,
            timezone,
            created_at: Utc::now().timestamp(),
        }
    }
}
