//! Portal collectors: the capability that turns a line's decrypted portal
//! login into a quota snapshot.
//!
//! Collectors must be safe to call again after a failure; the scrape
//! orchestrator retries them once.

pub mod http;
pub mod mock;

use crate::models::{Connection, QuotaSnapshot};
use crate::services::vault::PortalCredentials;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use http::HttpPortalCollector;
pub use mock::MockPortalCollector;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Portal unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected portal response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PortalCollector: Send + Sync {
    /// Provider identifier this collector serves.
    fn provider(&self) -> &str;

    async fn collect(
        &self,
        credentials: &PortalCredentials,
        connection: &Connection,
    ) -> Result<QuotaSnapshot, CollectorError>;
}

/// Collectors keyed by provider id.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: HashMap<String, Arc<dyn PortalCollector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector under its provider id, replacing any previous one.
    pub fn register(mut self, collector: Arc<dyn PortalCollector>) -> Self {
        self.collectors
            .insert(collector.provider().to_string(), collector);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn PortalCollector>> {
        self.collectors.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut providers: Vec<&str> = self.collectors.keys().map(String::as_str).collect();
        providers.sort_unstable();
        providers
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
