//! Backing store access for ConfigMaps.
//!
//! The API server is the single source of truth. Updates are full replaces
//! carrying the caller's resourceVersion, so a stale copy is rejected with a
//! conflict instead of overwriting someone else's change.

use crate::error::StoreError;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};

/// Update side of the backing store.
#[async_trait::async_trait]
pub trait ConfigMapStore: Send + Sync {
    /// Replaces the ConfigMap in its own namespace and returns the stored object.
    async fn replace(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError>;
}

/// [`ConfigMapStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeConfigMapStore {
    client: Client,
}

impl KubeConfigMapStore {
    /// Creates a store using `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ConfigMapStore for KubeConfigMapStore {
    async fn replace(&self, config_map: &ConfigMap) -> Result<ConfigMap, StoreError> {
        let name = config_map.name_any();
        let namespace = config_map
            .namespace()
            .unwrap_or_else(|| self.client.default_namespace().to_string());
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);

        api.replace(&name, &PostParams::default(), config_map)
            .await
            .map_err(|e| match e {
                kube::Error::Api(ref response) if response.code == 409 => {
                    StoreError::Conflict(format!("{namespace}/{name}"))
                }
                other => StoreError::Api(other),
            })
    }
}
