//! Read-only lookups of infrastructure mappings and provider settings.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::EngineResult;

/// Where a service is deployed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureMapping {
    pub uuid: String,
    pub env_id: String,
    pub service_id: String,
    pub compute_provider_setting_id: String,
    pub region: String,
    /// ECS cluster, when the mapping targets ECS.
    pub cluster_name: Option<String>,
}

/// A cloud provider credential or connector setting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingAttribute {
    pub uuid: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn infrastructure_mapping(&self, app_id: &str, id: &str) -> EngineResult<Option<InfrastructureMapping>>;

    async fn setting(&self, id: &str) -> EngineResult<Option<SettingAttribute>>;
}

#[derive(Default)]
pub struct InMemoryMetadataService {
    mappings: RwLock<HashMap<String, InfrastructureMapping>>,
    settings: RwLock<HashMap<String, SettingAttribute>>,
}

impl InMemoryMetadataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_infrastructure_mapping(&self, mapping: InfrastructureMapping) {
        self.mappings.write().await.insert(mapping.uuid.clone(), mapping);
    }

    pub async fn add_setting(&self, setting: SettingAttribute) {
        self.settings.write().await.insert(setting.uuid.clone(), setting);
    }
}

#[async_trait]
impl MetadataService for InMemoryMetadataService {
    async fn infrastructure_mapping(&self, _app_id: &str, id: &str) -> EngineResult<Option<InfrastructureMapping>> {
        Ok(self.mappings.read().await.get(id).cloned())
    }

    async fn setting(&self, id: &str) -> EngineResult<Option<SettingAttribute>> {
        Ok(self.settings.read().await.get(id).cloned())
    }
}
