//! HTTP client for the application's auth endpoint.

use async_trait::async_trait;
use herald_core::{AuthClient, AuthError, AuthRequest, AuthResponse};
use reqwest::Method;

/// [`AuthClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: reqwest::Client,
}

impl ReqwestAuthClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AuthClient for ReqwestAuthClient {
    async fn send(&self, request: AuthRequest) -> Result<AuthResponse, AuthError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout(request.timeout)
            } else {
                AuthError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout(request.timeout)
            } else {
                AuthError::Transport(e.to_string())
            }
        })?;

        Ok(AuthResponse {
            status,
            body: body.to_vec(),
        })
    }
}
