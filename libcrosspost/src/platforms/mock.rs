//! Mock adapter for testing
//!
//! A configurable adapter that can simulate successes, scripted failure
//! sequences, and latency. Integration tests drive the whole pipeline
//! against it without network access or real credentials.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::platforms::PublishAdapter;
use crate::types::{ContentPayload, Platform};

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Platform this adapter claims to publish to
    pub platform: Platform,

    /// Whether publishing succeeds once the script is exhausted
    pub publish_succeeds: bool,

    /// Error to return on publish failure
    pub publish_error: Option<PlatformError>,

    /// Scripted outcomes consumed one per call, before the default
    /// behavior applies. `None` means success.
    pub script: Arc<Mutex<VecDeque<Option<PlatformError>>>>,

    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Payload bodies that were published (for verification)
    pub published_bodies: Arc<Mutex<Vec<String>>>,
}

impl MockConfig {
    fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            publish_succeeds: true,
            publish_error: None,
            script: Arc::new(Mutex::new(VecDeque::new())),
            delay: Duration::from_millis(0),
            publish_call_count: Arc::new(Mutex::new(0)),
            published_bodies: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock adapter for testing
pub struct MockAdapter {
    config: MockConfig,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// An adapter that always succeeds. The name must parse as a platform.
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig::for_platform(parse_platform(name)))
    }

    /// An adapter that always fails with the given error.
    pub fn failure(name: &str, error: PlatformError) -> Self {
        let mut config = MockConfig::for_platform(parse_platform(name));
        config.publish_succeeds = false;
        config.publish_error = Some(error);
        Self::new(config)
    }

    /// An adapter that plays back a fixed outcome sequence, then succeeds.
    /// `None` entries are successes.
    pub fn scripted(name: &str, outcomes: Vec<Option<PlatformError>>) -> Self {
        let config = MockConfig::for_platform(parse_platform(name));
        *config.script.lock().unwrap() = outcomes.into();
        Self::new(config)
    }

    /// An adapter that succeeds after the given latency.
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        let mut config = MockConfig::for_platform(parse_platform(name));
        config.delay = delay;
        Self::new(config)
    }

    /// Number of times publish was called.
    pub fn publish_call_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap()
    }

    /// Bodies successfully published, in call order.
    pub fn published_bodies(&self) -> Vec<String> {
        self.config.published_bodies.lock().unwrap().clone()
    }

    /// Shared handles for asserting on an adapter after it has been moved
    /// into a registry.
    pub fn probes(&self) -> MockProbes {
        MockProbes {
            publish_call_count: Arc::clone(&self.config.publish_call_count),
            published_bodies: Arc::clone(&self.config.published_bodies),
        }
    }
}

/// Counters that outlive the adapter itself.
#[derive(Debug, Clone)]
pub struct MockProbes {
    publish_call_count: Arc<Mutex<usize>>,
    published_bodies: Arc<Mutex<Vec<String>>>,
}

impl MockProbes {
    pub fn publish_call_count(&self) -> usize {
        *self.publish_call_count.lock().unwrap()
    }

    pub fn published_bodies(&self) -> Vec<String> {
        self.published_bodies.lock().unwrap().clone()
    }
}

fn parse_platform(name: &str) -> Platform {
    name.parse()
        .unwrap_or_else(|_| panic!("mock adapter name must be a platform, got {:?}", name))
}

#[async_trait]
impl PublishAdapter for MockAdapter {
    async fn publish(&self, payload: &ContentPayload) -> Result<String> {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        let call_number = {
            let mut count = self.config.publish_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        let scripted = self.config.script.lock().unwrap().pop_front();
        let outcome = match scripted {
            Some(outcome) => outcome,
            None if self.config.publish_succeeds => None,
            None => Some(
                self.config
                    .publish_error
                    .clone()
                    .unwrap_or_else(|| PlatformError::Publishing("mock failure".to_string())),
            ),
        };

        match outcome {
            Some(error) => Err(error.into()),
            None => {
                self.config
                    .published_bodies
                    .lock()
                    .unwrap()
                    .push(payload.body.clone());
                Ok(format!(
                    "{}-post-{}",
                    self.config.platform.as_str(),
                    call_number
                ))
            }
        }
    }

    fn platform(&self) -> Platform {
        self.config.platform
    }
}
