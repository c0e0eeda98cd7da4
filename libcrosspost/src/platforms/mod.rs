//! Publish adapter abstraction
//!
//! Each destination platform implements [`PublishAdapter`], the seam between
//! the dispatcher and the outside world. The dispatcher never knows how a
//! publish happens, only whether it succeeded and what the remote post id is.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::platforms::{PublishAdapter, mock::MockAdapter};
//! use libcrosspost::types::ContentPayload;
//!
//! # async fn example() -> libcrosspost::error::Result<()> {
//! let adapter = MockAdapter::success("facebook");
//!
//! let payload = ContentPayload {
//!     body: "Hello from the pipeline".to_string(),
//!     media_refs: vec![],
//! };
//!
//! let post_id = adapter.publish(&payload).await?;
//! println!("Published as {}", post_id);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ContentPayload, Platform};

pub mod mock;

/// Common interface for delivering a payload to one platform.
///
/// Implementations must be cheap to share: the dispatcher hands one adapter
/// to every worker in a platform's pool.
#[async_trait]
pub trait PublishAdapter: Send + Sync {
    /// Deliver the payload and return the platform-assigned post id.
    ///
    /// # Errors
    ///
    /// Returns a [`PlatformError`](crate::error::PlatformError) classified
    /// so the retry policy can tell
    /// transient failures (network, timeout, server) from permanent ones
    /// (authentication, validation).
    async fn publish(&self, payload: &ContentPayload) -> Result<String>;

    /// The platform this adapter publishes to.
    fn platform(&self) -> Platform;
}

/// Maps each platform to its adapter. The dispatcher spawns a worker pool
/// per registered platform; unregistered platforms get no workers at all.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PublishAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PublishAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PublishAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockAdapter;

    #[test]
    fn test_registry_lookup() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapter::success("facebook")));
        registry.register(Arc::new(MockAdapter::success("linkedin")));

        assert!(registry.get(Platform::Facebook).is_some());
        assert!(registry.get(Platform::Linkedin).is_some());
        assert!(registry.get(Platform::Youtube).is_none());
        assert_eq!(
            registry.platforms(),
            vec![Platform::Facebook, Platform::Linkedin]
        );
    }

    #[test]
    fn test_empty_registry() {
        let registry = AdapterRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.platforms().is_empty());
    }
}
