//! Operation types and the catalog that turns them into concrete calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::budget::ApiTypeId;

/// Reference record for an operation type. Immutable once seeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiType {
    /// Identifier.
    pub id: ApiTypeId,
    /// Unique name, e.g. `ads_insights`.
    pub name: String,
    /// Human description.
    pub description: Option<String>,
}

/// Listing call whose random element supplies the id for the target call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupStep {
    /// Listing path returning `{"data": [...]}`.
    pub path: String,
    /// Keys tried in order on the picked element.
    pub id_keys: Vec<String>,
}

/// Everything an invoker needs to perform one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Operation type.
    pub api_type_id: ApiTypeId,
    /// Operation name, used in endpoint labels.
    pub name: String,
    /// Optional id lookup performed first.
    pub lookup: Option<LookupStep>,
    /// Target path; `{id}` is replaced by the looked-up id.
    pub target: String,
    /// Fixed query parameters.
    pub params: Vec<(String, String)>,
}

impl OperationDescriptor {
    /// Target path with the looked-up id substituted.
    #[must_use]
    pub fn target_path(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => self.target.replace("{id}", id),
            None => self.target.clone(),
        }
    }
}

/// Catalog miss.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported operation `{name}` ({api_type_id})")]
pub struct Unsupported {
    /// Requested type.
    pub api_type_id: ApiTypeId,
    /// Known name, or `unknown:<id>`.
    pub name: String,
}

impl Unsupported {
    /// Endpoint label recorded for the miss.
    #[must_use]
    pub fn endpoint_label(&self) -> String {
        format!("type:{}[unsupported]", self.name)
    }
}

/// Resolves an api type into an executable call.
pub trait OperationCatalog: Send + Sync + 'static {
    /// Resolve `api_type_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Unsupported`] when the type is unknown or has no call shape.
    fn resolve(&self, api_type_id: ApiTypeId) -> Result<OperationDescriptor, Unsupported>;

    /// Display name for `api_type_id`, `unknown:<id>` if absent.
    fn name_of(&self, api_type_id: ApiTypeId) -> String;
}

struct CallShape {
    lookup: Option<LookupStep>,
    target: String,
    params: Vec<(String, String)>,
}

/// In-process catalog of api types and their call shapes.
#[derive(Default)]
pub struct ApiTypeCatalog {
    types: HashMap<ApiTypeId, ApiType>,
    shapes: HashMap<String, CallShape>,
}

impl ApiTypeCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog seeded with the built-in operation types.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        for ty in default_api_types() {
            catalog.insert(ty);
        }
        catalog.define(
            "list_page_posts",
            Some(LookupStep {
                path: "/me/accounts".into(),
                id_keys: vec!["id".into()],
            }),
            "/{id}/posts",
            vec![(
                "fields".into(),
                "id,message,created_time,reactions.summary(true),comments.summary(true)".into(),
            )],
        );
        catalog.define(
            "ads_insights",
            Some(LookupStep {
                path: "/me/adaccounts".into(),
                id_keys: vec!["id".into(), "account_id".into()],
            }),
            "/act_{id}/insights",
            Vec::new(),
        );
        catalog
    }

    /// Register or replace an api type record.
    pub fn insert(&mut self, ty: ApiType) {
        self.types.insert(ty.id, ty);
    }

    /// Attach a call shape to an operation name.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        lookup: Option<LookupStep>,
        target: impl Into<String>,
        params: Vec<(String, String)>,
    ) {
        self.shapes.insert(
            name.into(),
            CallShape {
                lookup,
                target: target.into(),
                params,
            },
        );
    }

    /// Look up by id.
    #[must_use]
    pub fn get(&self, id: ApiTypeId) -> Option<&ApiType> {
        self.types.get(&id)
    }

    /// Look up by unique name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ApiType> {
        self.types.values().find(|t| t.name == name)
    }

    /// All registered types ordered by id.
    #[must_use]
    pub fn types(&self) -> Vec<ApiType> {
        let mut all: Vec<_> = self.types.values().cloned().collect();
        all.sort_by_key(|t| t.id);
        all
    }
}

impl OperationCatalog for ApiTypeCatalog {
    fn resolve(&self, api_type_id: ApiTypeId) -> Result<OperationDescriptor, Unsupported> {
        let name = self.name_of(api_type_id);
        let Some(shape) = self.types.get(&api_type_id).and_then(|t| self.shapes.get(&t.name)) else {
            return Err(Unsupported { api_type_id, name });
        };
        Ok(OperationDescriptor {
            api_type_id,
            name,
            lookup: shape.lookup.clone(),
            target: shape.target.clone(),
            params: shape.params.clone(),
        })
    }

    fn name_of(&self, api_type_id: ApiTypeId) -> String {
        self.types
            .get(&api_type_id)
            .map_or_else(|| format!("unknown:{api_type_id}"), |t| t.name.clone())
    }
}

/// Built-in operation types, ids 1..=3.
#[must_use]
pub fn default_api_types() -> Vec<ApiType> {
    vec![
        ApiType {
            id: 1,
            name: "list_page_posts".into(),
            description: Some("List posts of a page".into()),
        },
        ApiType {
            id: 2,
            name: "ads_insights".into(),
            description: Some("Ad account insights".into()),
        },
        ApiType {
            id: 3,
            name: "ads_campaigns".into(),
            description: Some("Ad account campaigns".into()),
        },
    ]
}
