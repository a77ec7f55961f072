//! Feature flag lookups.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Flags consulted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureName {
    /// Timeout-tagged failures match `TIMEOUT` failure strategies.
    TimeoutFailureSupport,
    /// Record delegate selection logs for dispatched tasks.
    DelegateSelectionLogs,
}

impl std::fmt::Display for FeatureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeoutFailureSupport => write!(f, "TIMEOUT_FAILURE_SUPPORT"),
            Self::DelegateSelectionLogs => write!(f, "DELEGATE_SELECTION_LOGS"),
        }
    }
}

#[async_trait]
pub trait FeatureFlagService: Send + Sync {
    async fn is_enabled(&self, feature: FeatureName, account_id: &str) -> bool;
}

/// Flags enabled globally or per account.
#[derive(Default)]
pub struct InMemoryFeatureFlagService {
    global: RwLock<HashSet<FeatureName>>,
    per_account: RwLock<HashSet<(FeatureName, String)>>,
}

impl InMemoryFeatureFlagService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enable_globally(&self, feature: FeatureName) {
        self.global.write().await.insert(feature);
    }

    pub async fn enable_for_account(&self, feature: FeatureName, account_id: &str) {
        self.per_account
            .write()
            .await
            .insert((feature, account_id.to_string()));
    }
}

#[async_trait]
impl FeatureFlagService for InMemoryFeatureFlagService {
    async fn is_enabled(&self, feature: FeatureName, account_id: &str) -> bool {
        if self.global.read().await.contains(&feature) {
            return true;
        }
        self.per_account
            .read()
            .await
            .contains(&(feature, account_id.to_string()))
    }
}
