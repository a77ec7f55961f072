//! Sweeping output persistence.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use super::instance::{SweepingOutputInquiry, SweepingOutputInstance, SweepingOutputScope};
use crate::error::{EngineError, EngineResult};

/// Durable store for sweeping outputs. Writes are append-only; readers
/// resolve to the newest matching instance.
#[async_trait]
pub trait SweepingOutputService: Send + Sync {
    /// Persist `instance`. Saving the same logical output twice is allowed;
    /// the newer instance becomes current.
    async fn save(&self, instance: SweepingOutputInstance) -> EngineResult<SweepingOutputInstance>;

    /// Newest instance matching `inquiry`, if any.
    async fn find(&self, inquiry: &SweepingOutputInquiry) -> EngineResult<Option<SweepingOutputInstance>>;

    /// Every instance whose name starts with the inquiry name and whose id
    /// for `scope` equals the inquiry's, oldest first.
    async fn find_many_with_name_prefix(
        &self,
        inquiry: &SweepingOutputInquiry,
        scope: SweepingOutputScope,
    ) -> EngineResult<Vec<SweepingOutputInstance>>;
}

/// Find an output and deserialize its value.
pub async fn find_sweeping_output<T: DeserializeOwned>(
    service: &dyn SweepingOutputService,
    inquiry: &SweepingOutputInquiry,
) -> EngineResult<Option<T>> {
    match service.find(inquiry).await? {
        Some(instance) => Ok(Some(instance.value_as()?)),
        None => Ok(None),
    }
}

/// Process-local store backed by an append-only vector.
#[derive(Default)]
pub struct InMemorySweepingOutputStore {
    instances: RwLock<Vec<SweepingOutputInstance>>,
    unavailable: AtomicBool,
}

impl InMemorySweepingOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a persistence error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    fn check_available(&self) -> EngineResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Persistence(
                "Sweeping output store is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SweepingOutputService for InMemorySweepingOutputStore {
    async fn save(&self, instance: SweepingOutputInstance) -> EngineResult<SweepingOutputInstance> {
        self.check_available()?;
        tracing::debug!(
            name = %instance.name,
            scope = %instance.scope,
            uuid = %instance.uuid,
            "Saving sweeping output"
        );
        self.instances.write().await.push(instance.clone());
        Ok(instance)
    }

    async fn find(&self, inquiry: &SweepingOutputInquiry) -> EngineResult<Option<SweepingOutputInstance>> {
        self.check_available()?;
        let instances = self.instances.read().await;
        // Appended in save order, so the last match is the newest.
        Ok(instances.iter().rev().find(|i| i.matches(inquiry)).cloned())
    }

    async fn find_many_with_name_prefix(
        &self,
        inquiry: &SweepingOutputInquiry,
        scope: SweepingOutputScope,
    ) -> EngineResult<Vec<SweepingOutputInstance>> {
        self.check_available()?;
        let instances = self.instances.read().await;
        Ok(instances
            .iter()
            .filter(|i| i.matches_prefix(inquiry, scope))
            .cloned()
            .collect())
    }
}
