//! Discovery scheduler
//!
//! One run scans scheduled content, resolves each item's schedule to UTC in
//! its owner's timezone, and admits the due items into the broker under a
//! capacity budget. Admission is a guarded status transition, so two
//! overlapping runs (or two scheduler processes) cannot admit the same item
//! twice; there is no lock, the losing run simply sees zero rows updated and
//! moves on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::broker::{Lane, QueueBroker};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::status::{StatusMetadata, StatusTracker};
use crate::types::{ContentStatus, Platform, QueueMessage};

/// What one discovery run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AdmissionReport {
    /// Candidates examined.
    pub examined: usize,
    /// Items admitted and enqueued.
    pub admitted: usize,
    /// Items not yet due.
    pub not_due: usize,
    /// Items skipped because the global or per-platform budget was spent.
    pub over_budget: usize,
    /// Items another run admitted first.
    pub contended: usize,
    /// Items with an unresolvable timezone or a schedule that does not
    /// exist in it (spring-forward gap).
    pub invalid_schedule: usize,
    /// Queue messages past their TTL, swept and marked expired.
    pub expired: usize,
}

pub struct Scheduler {
    db: Database,
    broker: QueueBroker,
    tracker: StatusTracker,
    rate_limiter: RateLimiter,
    max_attempts: u32,
    global_budget: usize,
    platform_budgets: HashMap<Platform, usize>,
}

impl Scheduler {
    pub fn new(db: Database, config: &Config) -> Self {
        let broker = QueueBroker::from_config(db.clone(), config);
        let tracker = StatusTracker::new(db.clone());
        let rate_limiter = RateLimiter::from_config(config);

        let platform_budgets = Platform::ALL
            .iter()
            .map(|&p| (p, config.concurrency_limit(p) as usize))
            .collect();

        Self {
            db,
            broker,
            tracker,
            rate_limiter,
            max_attempts: config.delivery.max_attempts,
            global_budget: config.admission_budget() as usize,
            platform_budgets,
        }
    }

    /// One discovery pass: sweep expired messages, then admit due items.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<AdmissionReport> {
        let mut report = AdmissionReport::default();

        report.expired = self.sweep_expired(now).await?;
        self.rate_limiter
            .cleanup_expired(&self.db, now.timestamp())
            .await?;

        let candidates = self.db.discovery_candidates().await?;
        report.examined = candidates.len();

        let mut admitted_per_platform: HashMap<Platform, usize> = HashMap::new();

        for (content, timezone) in candidates {
            let due_at = match content.scheduled_at_utc(&timezone) {
                Ok(instant) => instant,
                Err(e) => {
                    // One bad timezone never aborts the scan; the item stays
                    // scheduled and is examined again next run.
                    warn!(
                        content_id = %content.id,
                        timezone = %timezone,
                        error = %e,
                        "Skipping item with unresolvable schedule"
                    );
                    report.invalid_schedule += 1;
                    continue;
                }
            };

            if now < due_at {
                report.not_due += 1;
                continue;
            }

            if report.admitted >= self.global_budget {
                report.over_budget += 1;
                continue;
            }
            let platform_budget = self
                .platform_budgets
                .get(&content.platform)
                .copied()
                .unwrap_or(1);
            let platform_count = admitted_per_platform
                .entry(content.platform)
                .or_insert(0);
            if *platform_count >= platform_budget {
                report.over_budget += 1;
                continue;
            }

            // Guarded transition; a concurrent run may have won already
            if !self.tracker.try_admit(&content.id).await? {
                debug!(content_id = %content.id, "Lost admission race, skipping");
                report.contended += 1;
                continue;
            }

            let message = QueueMessage::for_content(&content, self.max_attempts);
            self.broker
                .publish(&message, Lane::from(content.priority), 0)
                .await?;

            debug!(
                content_id = %content.id,
                platform = %content.platform,
                priority = %content.priority,
                "Admitted content"
            );
            *platform_count += 1;
            report.admitted += 1;
        }

        info!(
            examined = report.examined,
            admitted = report.admitted,
            not_due = report.not_due,
            over_budget = report.over_budget,
            contended = report.contended,
            invalid_schedule = report.invalid_schedule,
            expired = report.expired,
            "Discovery run complete"
        );

        Ok(report)
    }

    /// Drop queue messages past their TTL and mark the content they carried
    /// as expired. Content some other path already resolved is left alone.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let refs = self.broker.expire_stale(now.timestamp()).await?;
        let swept = refs.len();

        for content_ref in refs {
            match self.tracker.get_status(&content_ref).await? {
                Some(status) if !status.is_terminal() => {
                    self.tracker
                        .update(&content_ref, ContentStatus::Expired, StatusMetadata::default())
                        .await?;
                    warn!(content_id = %content_ref, "Content expired in queue");
                }
                _ => {}
            }
        }

        Ok(swept)
    }
}
