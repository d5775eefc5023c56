//! Execution traits: the worker-side job executor and the external
//! collaborators a job talks to.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::api_type::OperationDescriptor;
use crate::core::budget::ResourceId;
use crate::core::error::{InvokeError, StoreError};

/// Executor trait for worker pools.
///
/// The pool hands every job payload `P` to `execute` on one of its workers
/// and collects the returned `R`.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_call_budget::core::WorkerExecutor;
///
/// #[derive(Clone)]
/// struct Echo;
///
/// #[async_trait]
/// impl WorkerExecutor<String, String> for Echo {
///     async fn execute(&self, payload: String) -> String {
///         payload
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Execute a job payload and return its result.
    async fn execute(&self, payload: P) -> R;
}

/// Access credential for one resource. Debug output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for the invoker only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Resource registry: who may call on behalf of which resource.
#[async_trait]
pub trait CredentialRegistry: Send + Sync + 'static {
    /// Credentials for the given resources. Resources without a usable
    /// credential are simply absent from the map.
    async fn credentials(
        &self,
        resource_ids: &[ResourceId],
    ) -> Result<HashMap<ResourceId, Credential>, StoreError>;
}

/// What an external call produced once a response (or a synthetic failure
/// such as an empty lookup) was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// 2xx and usable.
    pub ok: bool,
    /// HTTP status, if a response arrived.
    pub http_status: Option<u16>,
    /// Provider error code.
    pub error_code: Option<i64>,
    /// Provider error subcode.
    pub error_subcode: Option<i64>,
    /// Response body or failure text.
    pub body: String,
    /// Path or label of the endpoint that decided the outcome.
    pub endpoint_label: String,
}

impl InvokeResponse {
    /// Successful response.
    pub fn success(http_status: u16, body: impl Into<String>, endpoint_label: impl Into<String>) -> Self {
        Self {
            ok: true,
            http_status: Some(http_status),
            error_code: None,
            error_subcode: None,
            body: body.into(),
            endpoint_label: endpoint_label.into(),
        }
    }

    /// Failed response with optional provider diagnostics.
    pub fn failure(
        http_status: Option<u16>,
        error_code: Option<i64>,
        error_subcode: Option<i64>,
        body: impl Into<String>,
        endpoint_label: impl Into<String>,
    ) -> Self {
        Self {
            ok: false,
            http_status,
            error_code,
            error_subcode,
            body: body.into(),
            endpoint_label: endpoint_label.into(),
        }
    }
}

/// Performs the external call described by an [`OperationDescriptor`].
#[async_trait]
pub trait CallInvoker: Send + Sync + 'static {
    /// Invoke the operation with the resource's credential.
    ///
    /// # Errors
    ///
    /// [`InvokeError`] when no response could be obtained at all.
    async fn invoke(
        &self,
        operation: &OperationDescriptor,
        credential: &Credential,
    ) -> Result<InvokeResponse, InvokeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let c = Credential::new("EAAB-secret");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        assert_eq!(c.expose(), "EAAB-secret");
    }
}
