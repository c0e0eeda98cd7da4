//! Worker pool dispatcher
//!
//! One bounded pool per registered platform. Each worker holds exactly one
//! message at a time (no prefetch hoarding), checks the status tracker for a
//! duplicate delivery, asks the rate limiter for a slot, and only then calls
//! the platform's publish adapter. The outcome of the call decides the fate
//! of the message: ack on success or permanent failure, retry lane with
//! backoff on transient failure, dead-letter for malformed or unroutable
//! messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broker::{Delivery, Lane, QueueBroker};
use crate::config::Config;
use crate::db::Database;
use crate::error::{CrosspostError, Result};
use crate::platforms::AdapterRegistry;
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::status::{StatusMetadata, StatusTracker};
use crate::types::{ContentStatus, Platform};

/// Tally of message outcomes across one dispatch session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchCounts {
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub rate_deferred: usize,
    pub duplicates_skipped: usize,
    pub redirected: usize,
    /// Messages nacked back for redelivery after a status store write or
    /// unclassified adapter failure
    pub error_deferred: usize,
}

impl DispatchCounts {
    fn merge(&mut self, other: DispatchCounts) {
        self.published += other.published;
        self.retried += other.retried;
        self.failed += other.failed;
        self.dead_lettered += other.dead_lettered;
        self.rate_deferred += other.rate_deferred;
        self.duplicates_skipped += other.duplicates_skipped;
        self.redirected += other.redirected;
        self.error_deferred += other.error_deferred;
    }

    pub fn total(&self) -> usize {
        self.published
            + self.retried
            + self.failed
            + self.dead_lettered
            + self.rate_deferred
            + self.duplicates_skipped
            + self.redirected
            + self.error_deferred
    }
}

enum Outcome {
    Published,
    Retried,
    Failed,
    DeadLettered,
    RateDeferred,
    DuplicateSkipped,
    Redirected,
    ErrorDeferred,
}

#[derive(Clone)]
pub struct Dispatcher {
    db: Database,
    broker: QueueBroker,
    tracker: StatusTracker,
    rate_limiter: RateLimiter,
    registry: AdapterRegistry,
    policy: RetryPolicy,
    rate_limit_delay_seconds: i64,
    concurrency: std::collections::HashMap<Platform, u32>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(db: Database, config: &Config, registry: AdapterRegistry) -> Self {
        let concurrency = Platform::ALL
            .iter()
            .map(|&p| (p, config.concurrency_limit(p)))
            .collect();

        Self {
            broker: QueueBroker::from_config(db.clone(), config),
            tracker: StatusTracker::new(db.clone()),
            rate_limiter: RateLimiter::from_config(config),
            registry,
            policy: RetryPolicy::from_config(config),
            rate_limit_delay_seconds: config.delivery.rate_limit_delay_seconds,
            concurrency,
            poll_interval: Duration::from_secs(config.scheduling.poll_interval),
            db,
        }
    }

    /// Spawn every platform's pool and drain until all lanes are empty.
    /// Rate-deferred and retried messages are left for a later session
    /// rather than busy-waited on.
    pub async fn drain(&self) -> Result<DispatchCounts> {
        let shutdown = Arc::new(AtomicBool::new(false));
        self.run_pools(shutdown, true).await
    }

    /// Spawn every platform's pool and keep polling until `shutdown` is
    /// set. Idle workers sleep a jittered poll interval between checks.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<DispatchCounts> {
        self.run_pools(shutdown, false).await
    }

    async fn run_pools(
        &self,
        shutdown: Arc<AtomicBool>,
        stop_when_empty: bool,
    ) -> Result<DispatchCounts> {
        let mut workers = JoinSet::new();

        for platform in self.registry.platforms() {
            let pool_size = self.concurrency.get(&platform).copied().unwrap_or(1).max(1);
            debug!(platform = %platform, workers = pool_size, "Starting worker pool");

            for _ in 0..pool_size {
                let dispatcher = self.clone();
                let shutdown = Arc::clone(&shutdown);
                workers.spawn(async move {
                    dispatcher
                        .worker_loop(platform, shutdown, stop_when_empty)
                        .await
                });
            }
        }

        let mut counts = DispatchCounts::default();
        while let Some(joined) = workers.join_next().await {
            let worker_counts = joined.map_err(|e| {
                CrosspostError::InvalidInput(format!("Worker task panicked: {}", e))
            })??;
            counts.merge(worker_counts);
        }

        info!(
            published = counts.published,
            retried = counts.retried,
            failed = counts.failed,
            dead_lettered = counts.dead_lettered,
            rate_deferred = counts.rate_deferred,
            duplicates_skipped = counts.duplicates_skipped,
            redirected = counts.redirected,
            error_deferred = counts.error_deferred,
            "Dispatch session complete"
        );

        Ok(counts)
    }

    async fn worker_loop(
        &self,
        platform: Platform,
        shutdown: Arc<AtomicBool>,
        stop_when_empty: bool,
    ) -> Result<DispatchCounts> {
        let mut counts = DispatchCounts::default();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.process_one(platform).await? {
                Some(outcome) => {
                    match outcome {
                        Outcome::Published => counts.published += 1,
                        Outcome::Retried => counts.retried += 1,
                        Outcome::Failed => counts.failed += 1,
                        Outcome::DeadLettered => counts.dead_lettered += 1,
                        Outcome::RateDeferred => counts.rate_deferred += 1,
                        Outcome::DuplicateSkipped => counts.duplicates_skipped += 1,
                        Outcome::Redirected => counts.redirected += 1,
                        Outcome::ErrorDeferred => counts.error_deferred += 1,
                    }
                    // Back off briefly after a rate denial; the whole pool
                    // is over the same limit
                    if matches!(outcome, Outcome::RateDeferred) && !stop_when_empty {
                        tokio::time::sleep(self.jittered_poll()).await;
                    }
                }
                None if stop_when_empty => break,
                None => tokio::time::sleep(self.jittered_poll()).await,
            }
        }

        Ok(counts)
    }

    /// Record a status transition for `content_ref`. A failed write must
    /// never take the worker (and with it the whole pool) down: the message
    /// is nacked so a later delivery retries once the store recovers.
    /// Returns false when the write failed and the message was deferred.
    async fn update_or_defer(
        &self,
        delivery: &Delivery,
        content_ref: &str,
        status: ContentStatus,
        metadata: StatusMetadata,
    ) -> Result<bool> {
        match self.tracker.update(content_ref, status, metadata).await {
            Ok(()) => Ok(true),
            Err(e) => {
                error!(
                    content_id = %content_ref,
                    status = %status,
                    error = %e,
                    "Status update failed, forcing redelivery"
                );
                self.broker
                    .nack(delivery, self.rate_limit_delay_seconds)
                    .await?;
                Ok(false)
            }
        }
    }

    /// Jitter spreads idle workers out so they do not poll in lockstep.
    fn jittered_poll(&self) -> Duration {
        let base = self.poll_interval.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
        Duration::from_millis(base + jitter)
    }

    /// Consume and fully resolve one message for `platform`. Returns `None`
    /// when nothing is visible for this platform.
    async fn process_one(&self, platform: Platform) -> Result<Option<Outcome>> {
        let now = Utc::now().timestamp();
        let Some(delivery) = self.broker.consume(platform, now).await? else {
            return Ok(None);
        };

        let message = match delivery.parse() {
            Ok(message) => message,
            Err(e) => {
                // Not a business failure: the body never deserialized, so
                // there is no content to mark failed
                error!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Dead-lettering malformed message"
                );
                self.broker
                    .dead_letter(&delivery, &format!("malformed message: {}", e))
                    .await?;
                return Ok(Some(Outcome::DeadLettered));
            }
        };

        // The message itself names its platform; a mismatch means it was
        // enqueued under the wrong routing column. Put it back where it
        // belongs instead of publishing it here.
        if message.platform != platform {
            warn!(
                message_id = %delivery.message_id,
                routed = %platform,
                declared = %message.platform,
                "Redirecting misrouted message"
            );
            self.broker
                .publish(&message, delivery.lane, 0)
                .await?;
            self.broker.ack(&delivery).await?;
            return Ok(Some(Outcome::Redirected));
        }

        // Duplicate detection against the tracker, not local memory: a
        // redelivered message whose content already published is dropped
        match self.tracker.get_status(&message.content_ref).await? {
            None => {
                error!(
                    message_id = %delivery.message_id,
                    content_id = %message.content_ref,
                    "Dead-lettering message for unknown content"
                );
                self.broker
                    .dead_letter(&delivery, "unknown content id")
                    .await?;
                return Ok(Some(Outcome::DeadLettered));
            }
            Some(status) if status.is_terminal() => {
                debug!(
                    content_id = %message.content_ref,
                    status = %status,
                    "Skipping duplicate delivery"
                );
                self.broker.ack(&delivery).await?;
                return Ok(Some(Outcome::DuplicateSkipped));
            }
            Some(_) => {}
        }

        // A denied slot is not a publish failure: the message comes back
        // after a fixed delay with its attempt count untouched
        if !self.rate_limiter.allow(&self.db, platform, now).await? {
            debug!(platform = %platform, "Rate limit reached, deferring message");
            self.broker
                .nack(&delivery, self.rate_limit_delay_seconds)
                .await?;
            return Ok(Some(Outcome::RateDeferred));
        }

        let Some(adapter) = self.registry.get(platform) else {
            // Pools only start for registered platforms, so this is a
            // configuration hole, not a routine condition
            self.broker
                .dead_letter(&delivery, "no adapter registered")
                .await?;
            return Ok(Some(Outcome::DeadLettered));
        };

        let attempts = message.attempts + 1;

        // Recorded before the call so a crash mid-publish leaves a
        // truthful trail
        let recorded = self
            .update_or_defer(
                &delivery,
                &message.content_ref,
                ContentStatus::Publishing,
                StatusMetadata {
                    attempts: Some(attempts),
                    ..Default::default()
                },
            )
            .await?;
        if !recorded {
            return Ok(Some(Outcome::ErrorDeferred));
        }

        match adapter.publish(&message.post).await {
            Ok(post_id) => {
                info!(
                    content_id = %message.content_ref,
                    platform = %platform,
                    post_id = %post_id,
                    attempts,
                    "Published"
                );
                let updated = self
                    .tracker
                    .update(
                        &message.content_ref,
                        ContentStatus::Published,
                        StatusMetadata {
                            attempts: Some(attempts),
                            platform_post_id: Some(post_id),
                            ..Default::default()
                        },
                    )
                    .await;
                if let Err(e) = updated {
                    // Do not lose the outcome silently: force redelivery and
                    // let the duplicate check resolve it next time
                    error!(
                        content_id = %message.content_ref,
                        error = %e,
                        "Status update failed after publish, forcing redelivery"
                    );
                    self.broker.nack(&delivery, self.rate_limit_delay_seconds).await?;
                    return Ok(Some(Outcome::Published));
                }
                self.broker.ack(&delivery).await?;
                Ok(Some(Outcome::Published))
            }
            Err(CrosspostError::Platform(platform_error)) => {
                match self.policy.decide(&platform_error, attempts) {
                    RetryDecision::Retry { delay_seconds } => {
                        warn!(
                            content_id = %message.content_ref,
                            platform = %platform,
                            attempts,
                            delay_seconds,
                            error = %platform_error,
                            "Transient failure, requeueing for retry"
                        );
                        let mut retried = message.clone();
                        retried.attempts = attempts;
                        let recorded = self
                            .update_or_defer(
                                &delivery,
                                &message.content_ref,
                                ContentStatus::Queued,
                                StatusMetadata {
                                    attempts: Some(attempts),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        if !recorded {
                            return Ok(Some(Outcome::ErrorDeferred));
                        }
                        self.broker
                            .release(&delivery, &retried, Lane::Retry, delay_seconds)
                            .await?;
                        Ok(Some(Outcome::Retried))
                    }
                    RetryDecision::Fail { reason } => {
                        warn!(
                            content_id = %message.content_ref,
                            platform = %platform,
                            attempts,
                            reason = %reason,
                            error = %platform_error,
                            "Permanent failure"
                        );
                        let recorded = self
                            .update_or_defer(
                                &delivery,
                                &message.content_ref,
                                ContentStatus::Failed,
                                StatusMetadata {
                                    attempts: Some(attempts),
                                    failure_reason: Some(reason),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        if !recorded {
                            return Ok(Some(Outcome::ErrorDeferred));
                        }
                        self.broker.ack(&delivery).await?;
                        Ok(Some(Outcome::Failed))
                    }
                }
            }
            Err(e) => {
                // Adapter failed outside the platform-error taxonomy; leave
                // the message for redelivery rather than guessing, and keep
                // the worker alive for the rest of its lane
                error!(
                    content_id = %message.content_ref,
                    error = %e,
                    "Unclassified adapter error, forcing redelivery"
                );
                self.broker.nack(&delivery, self.rate_limit_delay_seconds).await?;
                Ok(Some(Outcome::ErrorDeferred))
            }
        }
    }
}
