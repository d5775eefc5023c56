//! Fixed credential map, for tests and single-tenant setups.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::budget::ResourceId;
use crate::core::error::StoreError;
use crate::core::executor::{Credential, CredentialRegistry};

/// Registry holding credentials in memory. Empty tokens count as absent.
#[derive(Default)]
pub struct StaticCredentialRegistry {
    tokens: RwLock<HashMap<ResourceId, Credential>>,
}

impl StaticCredentialRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a resource's credential.
    pub fn set(&self, resource_id: ResourceId, token: impl Into<String>) {
        self.tokens.write().insert(resource_id, Credential::new(token));
    }

    /// Forget a resource's credential.
    pub fn revoke(&self, resource_id: ResourceId) {
        self.tokens.write().remove(&resource_id);
    }
}

#[async_trait]
impl CredentialRegistry for StaticCredentialRegistry {
    async fn credentials(
        &self,
        resource_ids: &[ResourceId],
    ) -> Result<HashMap<ResourceId, Credential>, StoreError> {
        let tokens = self.tokens.read();
        Ok(resource_ids
            .iter()
            .filter_map(|id| {
                tokens
                    .get(id)
                    .filter(|c| !c.expose().is_empty())
                    .map(|c| (*id, c.clone()))
            })
            .collect())
    }
}
