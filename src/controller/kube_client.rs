//! The Kubernetes API surface the controller needs, abstracted behind one
//! verb/url/body call so the controller can be tested without a live cluster.
//!
//! Grounded on `SendKubeHttpRequest` in the reference source: one opaque
//! function, status 200/201/202/203 is success, everything else is a
//! transport error. Modeled as an `async_trait` seam the way this codebase's
//! `Worker` trait abstracts backend calls, backed here by `kube::Client`'s
//! raw request path rather than a hand-rolled HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use kube::Client;

use crate::errors::{CoordinatorError, Feature, Module, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeMethod {
    Get,
    Post,
    Patch,
    Delete,
}

#[async_trait]
pub trait KubeClient: Send + Sync {
    /// `target` is an absolute K8s API path, e.g.
    /// `/api/v1/namespaces/default/configmaps`. Returns the raw status code
    /// and response body; the caller treats 200/201/202/203 as success.
    async fn send(
        &self,
        target: &str,
        method: KubeMethod,
        content_type: Option<&str>,
        body: String,
    ) -> Result<(u16, String)>;
}

fn is_success(status: u16) -> bool {
    matches!(status, 200 | 201 | 202 | 203)
}

/// Returns `Ok(body)` on a successful status, `Err(CallError)` otherwise.
pub fn require_success(status: u16, body: String, feature: Feature) -> Result<String> {
    if is_success(status) {
        Ok(body)
    } else {
        Err(CoordinatorError::CallError {
            module: Module::Controller,
            feature,
            message: format!("kubernetes API returned status {status}"),
        })
    }
}

/// The real client, talking to the in-cluster (or kubeconfig-resolved) API
/// server through the `kube` crate's client transport.
pub struct RealKubeClient {
    client: Client,
    timeout: Duration,
    retries: u32,
}

impl RealKubeClient {
    pub async fn try_new(timeout: Duration, retries: u32) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client, timeout, retries })
    }
}

#[async_trait]
impl KubeClient for RealKubeClient {
    async fn send(
        &self,
        target: &str,
        method: KubeMethod,
        content_type: Option<&str>,
        body: String,
    ) -> Result<(u16, String)> {
        let http_method = match method {
            KubeMethod::Get => http::Method::GET,
            KubeMethod::Post => http::Method::POST,
            KubeMethod::Patch => http::Method::PATCH,
            KubeMethod::Delete => http::Method::DELETE,
        };

        let mut last_err = None;
        for attempt in 0..=self.retries {
            let mut builder = http::Request::builder().method(http_method.clone()).uri(target);
            if let Some(ct) = content_type {
                builder = builder.header(http::header::CONTENT_TYPE, ct);
            }
            let request = builder.body(body.clone().into_bytes()).map_err(|e| CoordinatorError::Exception {
                module: Module::Controller,
                feature: Feature::KubeClient,
                message: format!("failed to build kube request: {e}"),
            })?;

            match tokio::time::timeout(self.timeout, self.client.send(request)).await {
                Ok(Ok(response)) => {
                    let status = response.status().as_u16();
                    let bytes = response.into_body();
                    let text = String::from_utf8_lossy(&bytes).to_string();
                    return Ok((status, text));
                }
                Ok(Err(err)) => last_err = Some(CoordinatorError::from(err)),
                Err(_) => {
                    last_err = Some(CoordinatorError::CallError {
                        module: Module::Controller,
                        feature: Feature::KubeClient,
                        message: format!("kubernetes API call to {target} timed out after {:?}", self.timeout),
                    })
                }
            }
            if attempt < self.retries {
                tracing::debug!(target, attempt, "retrying kubernetes API call");
            }
        }
        Err(last_err.unwrap_or(CoordinatorError::CallError {
            module: Module::Controller,
            feature: Feature::KubeClient,
            message: format!("kubernetes API call to {target} failed with no attempts made"),
        }))
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub target: String,
        pub method: KubeMethod,
        pub body: String,
    }

    /// Scripted fake: returns queued `(status, body)` responses in order,
    /// recording every call it received for assertions.
    pub struct FakeKubeClient {
        responses: Mutex<VecDeque<(u16, String)>>,
        pub calls: Mutex<Vec<RecordedCall>>,
    }

    impl FakeKubeClient {
        pub fn new(responses: Vec<(u16, String)>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KubeClient for FakeKubeClient {
        async fn send(
            &self,
            target: &str,
            method: KubeMethod,
            _content_type: Option<&str>,
            body: String,
        ) -> Result<(u16, String)> {
            self.calls.lock().push(RecordedCall {
                target: target.to_string(),
                method,
                body,
            });
            let (status, body) = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or((200, "{}".to_string()));
            Ok((status, body))
        }
    }
}
