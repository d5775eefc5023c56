//! Graph-style REST invoker.
//!
//! Performs at most two GETs per operation: an optional listing lookup whose
//! random element supplies an id, then the target call. The access token
//! travels as the `access_token` query parameter.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde_json::Value;
use tracing::debug;

use crate::config::scheduler::DEFAULT_GRAPH_BASE_URL;
use crate::core::api_type::{LookupStep, OperationDescriptor};
use crate::core::error::InvokeError;
use crate::core::executor::{CallInvoker, Credential, InvokeResponse};

/// Raw response: status plus body text.
struct Fetched {
    status: u16,
    ok: bool,
    body: String,
}

/// Invoker for a Graph-style API over `reqwest`.
#[derive(Clone)]
pub struct GraphInvoker {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GraphInvoker {
    /// Invoker against `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Client`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| InvokeError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Invoker against the public Graph API.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_default_base(timeout: Duration) -> Result<Self, InvokeError> {
        Self::new(DEFAULT_GRAPH_BASE_URL, timeout)
    }

    /// Base URL requests are sent to, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
        credential: &Credential,
    ) -> Result<Fetched, InvokeError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .query(&[("access_token", credential.expose())])
            .send()
            .await
            .map_err(|e| self.map_err(&e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_err(&e))?;
        debug!(path, status = status.as_u16(), "graph response");
        Ok(Fetched {
            status: status.as_u16(),
            ok: status.is_success(),
            body,
        })
    }

    fn map_err(&self, err: &reqwest::Error) -> InvokeError {
        if err.is_timeout() {
            InvokeError::Timeout(self.timeout.as_secs())
        } else {
            InvokeError::Network(err.to_string())
        }
    }

    /// Run the lookup step; `Err` carries the failed response to report.
    async fn lookup_id(
        &self,
        operation: &OperationDescriptor,
        step: &LookupStep,
        credential: &Credential,
    ) -> Result<Result<String, InvokeResponse>, InvokeError> {
        let fetched = self.get(&step.path, &[], credential).await?;
        let label = |marker: &str| format!("type:{}{}[{marker}]", operation.name, step.path);

        if !fetched.ok {
            let (code, subcode) = error_fields(&fetched.body);
            return Ok(Err(InvokeResponse::failure(
                Some(fetched.status),
                code,
                subcode,
                fetched.body,
                label("lookup"),
            )));
        }

        let items = serde_json::from_str::<Value>(&fetched.body)
            .ok()
            .and_then(|v| v.get("data").and_then(Value::as_array).cloned())
            .unwrap_or_default();
        let Some(item) = items.choose(&mut rand::rng()) else {
            return Ok(Err(InvokeResponse::failure(
                Some(fetched.status),
                None,
                None,
                fetched.body,
                label("no-data"),
            )));
        };

        match pick_id(item, &step.id_keys) {
            Some(id) => Ok(Ok(id)),
            None => Ok(Err(InvokeResponse::failure(
                Some(fetched.status),
                None,
                None,
                fetched.body,
                label("invalid-item"),
            ))),
        }
    }
}

/// Provider `error.code` and `error.error_subcode` from a JSON body.
#[must_use]
pub fn error_fields(body: &str) -> (Option<i64>, Option<i64>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };
    let err = value.get("error");
    (
        err.and_then(|e| e.get("code")).and_then(Value::as_i64),
        err.and_then(|e| e.get("error_subcode")).and_then(Value::as_i64),
    )
}

/// First non-empty id under `keys`; numbers are accepted too.
fn pick_id(item: &Value, keys: &[String]) -> Option<String> {
    keys.iter().find_map(|k| match item.get(k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl CallInvoker for GraphInvoker {
    async fn invoke(
        &self,
        operation: &OperationDescriptor,
        credential: &Credential,
    ) -> Result<InvokeResponse, InvokeError> {
        let id = match &operation.lookup {
            Some(step) => match self.lookup_id(operation, step, credential).await? {
                Ok(id) => Some(id),
                Err(failed) => return Ok(failed),
            },
            None => None,
        };

        let path = operation.target_path(id.as_deref());
        let fetched = self.get(&path, &operation.params, credential).await?;
        if fetched.ok {
            return Ok(InvokeResponse::success(fetched.status, fetched.body, path));
        }
        let (code, subcode) = error_fields(&fetched.body);
        Ok(InvokeResponse::failure(
            Some(fetched.status),
            code,
            subcode,
            fetched.body,
            path,
        ))
    }
}
