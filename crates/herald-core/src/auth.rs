//! Private channel authorization.
//!
//! Joins to private and presence channels are delegated to the backend
//! application: the authorizer POSTs `{"channel_name": ..}` to the auth
//! endpoint, forwarding the client's cookies, and interprets the reply.

use async_trait::async_trait;
use herald_protocol::{Member, SubscribeData};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::socket::Socket;

/// Auth host used when neither auth hosts nor bind hosts are configured.
pub const DEFAULT_AUTH_HOST: &str = "http://localhost";

/// Default path of the application's auth endpoint.
pub const DEFAULT_AUTH_ENDPOINT: &str = "/broadcasting/auth";

/// Scheme prefixed to auth hosts that don't carry one.
pub const DEFAULT_AUTH_PROTOCOL: &str = "http";

/// Default timeout of an auth round-trip.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Status reported when the auth server could not be reached or answered
/// with something unreadable.
pub const GATEWAY_ERROR: u16 = 502;

/// Authorization errors.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The auth server answered with a non-2xx status.
    #[error("Client can not be authenticated, got HTTP status {0}")]
    Rejected(u16),

    /// The request could not be sent.
    #[error("Error sending authentication request: {0}")]
    Transport(String),

    /// The auth server did not answer in time.
    #[error("Authentication request timed out after {0:?}")]
    Timeout(Duration),

    /// The response body was neither channel data nor a boolean.
    #[error("Malformed authentication response: {0}")]
    Decode(String),
}

impl AuthError {
    /// The status code reported to the client in `subscription_error`.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Rejected(code) => *code,
            AuthError::Transport(_) | AuthError::Timeout(_) | AuthError::Decode(_) => GATEWAY_ERROR,
        }
    }
}

/// One host or a list of hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hosts {
    /// A single host.
    One(String),
    /// Several hosts, tried in order.
    Many(Vec<String>),
}

impl Default for Hosts {
    fn default() -> Self {
        Hosts::Many(Vec::new())
    }
}

impl Hosts {
    /// Normalize to a list, dropping empty entries.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        let hosts: Vec<&String> = match self {
            Hosts::One(host) => vec![host],
            Hosts::Many(hosts) => hosts.iter().collect(),
        };
        hosts
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect()
    }

    /// Check if no usable host is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_vec().is_empty()
    }
}

impl From<&str> for Hosts {
    fn from(host: &str) -> Self {
        Hosts::One(host.to_string())
    }
}

/// Authorizer configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Candidate auth hosts, in preference order. Never empty.
    pub hosts: Vec<String>,
    /// Path appended to the selected host.
    pub endpoint: String,
    /// Scheme for hosts configured without one.
    pub protocol: String,
    /// Bound on each auth round-trip.
    pub timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_AUTH_HOST.to_string()],
            endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            protocol: DEFAULT_AUTH_PROTOCOL.to_string(),
            timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

impl AuthConfig {
    /// Pick the candidate host list: the auth hosts when any are set,
    /// otherwise the bind hosts, otherwise [`DEFAULT_AUTH_HOST`].
    #[must_use]
    pub fn resolve_hosts(auth_host: Option<&Hosts>, host: Option<&Hosts>) -> Vec<String> {
        let hosts = auth_host
            .map(Hosts::to_vec)
            .filter(|h| !h.is_empty())
            .or_else(|| host.map(Hosts::to_vec).filter(|h| !h.is_empty()))
            .unwrap_or_else(|| vec![DEFAULT_AUTH_HOST.to_string()]);

        hosts
            .into_iter()
            .map(|h| h.trim_end_matches('/').to_string())
            .collect()
    }

    /// Set the candidate hosts.
    #[must_use]
    pub fn with_hosts(mut self, auth_host: Option<&Hosts>, host: Option<&Hosts>) -> Self {
        self.hosts = Self::resolve_hosts(auth_host, host);
        self
    }
}

/// An outbound auth request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    /// HTTP method.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Vec<u8>,
    /// Bound on the round-trip.
    pub timeout: Duration,
}

/// The auth server's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    /// HTTP status.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

/// HTTP client used to reach the auth endpoint.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Perform a single request. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: AuthRequest) -> Result<AuthResponse, AuthError>;
}

/// The body of a successful auth response.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthPayload {
    /// An object, optionally carrying presence member data.
    ChannelData(Option<Member>),
    /// A bare boolean.
    Bool(bool),
}

#[derive(Deserialize)]
struct ChannelDataBody {
    #[serde(default)]
    channel_data: Option<Value>,
}

impl AuthPayload {
    /// Decode a response body, trying the object shape first and then a
    /// boolean.
    ///
    /// `channel_data` may be an object or a string holding JSON. A `null`
    /// body decodes as an object without member data.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Decode`] if neither shape matches.
    pub fn decode(body: &[u8]) -> Result<Self, AuthError> {
        if let Ok(object) = serde_json::from_slice::<Option<ChannelDataBody>>(body) {
            let member = match object.and_then(|o| o.channel_data) {
                None | Some(Value::Null) => None,
                Some(Value::String(raw)) => Some(
                    serde_json::from_str::<Member>(&raw)
                        .map_err(|e| AuthError::Decode(e.to_string()))?,
                ),
                Some(value) => Some(
                    serde_json::from_value::<Member>(value)
                        .map_err(|e| AuthError::Decode(e.to_string()))?,
                ),
            };
            return Ok(AuthPayload::ChannelData(member));
        }

        serde_json::from_slice::<bool>(body)
            .map(AuthPayload::Bool)
            .map_err(|e| AuthError::Decode(e.to_string()))
    }
}

/// The outcome of a successful authorization.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthDecision {
    /// Decoded body.
    pub payload: AuthPayload,
    /// HTTP status of the response.
    pub status: u16,
}

impl AuthDecision {
    /// Presence member data, if the response carried any.
    #[must_use]
    pub fn member(&self) -> Option<&Member> {
        match &self.payload {
            AuthPayload::ChannelData(member) => member.as_ref(),
            AuthPayload::Bool(_) => None,
        }
    }

    /// Take the presence member data.
    #[must_use]
    pub fn into_member(self) -> Option<Member> {
        match self.payload {
            AuthPayload::ChannelData(member) => member,
            AuthPayload::Bool(_) => None,
        }
    }
}

/// Check if a referer belongs to an auth host.
///
/// Matches when the referer's domain without its first label equals the
/// host (`app.example.com` vs `.example.com`), when its origin equals the
/// host, or when its `host[:port]` equals the host.
#[must_use]
pub fn has_matching_host(referer: &Url, host: &str) -> bool {
    let Some(hostname) = referer.host_str() else {
        return false;
    };

    if let Some(dot) = hostname.find('.') {
        if &hostname[dot..] == host {
            return true;
        }
    }

    let authority = match referer.port() {
        Some(port) => format!("{hostname}:{port}"),
        None => hostname.to_string(),
    };
    format!("{}://{}", referer.scheme(), authority) == host || authority == host
}

fn origin(referer: &Url) -> String {
    let hostname = referer.host_str().unwrap_or_default();
    match referer.port() {
        Some(port) => format!("{}://{hostname}:{port}", referer.scheme()),
        None => format!("{}://{hostname}", referer.scheme()),
    }
}

fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: impl Into<String>) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value.into());
}

fn get_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sends auth requests for private channel joins.
pub struct PrivateChannelAuthorizer {
    client: Arc<dyn AuthClient>,
    config: AuthConfig,
}

impl PrivateChannelAuthorizer {
    /// Create an authorizer.
    #[must_use]
    pub fn new(client: Arc<dyn AuthClient>, config: AuthConfig) -> Self {
        Self { client, config }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Ask the application whether `socket` may join `data.channel`.
    ///
    /// # Errors
    ///
    /// Fails on non-2xx responses, transport failures, timeouts and
    /// unreadable bodies. Nothing is retried.
    pub async fn authenticate(
        &self,
        socket: &Socket,
        data: &SubscribeData,
    ) -> Result<AuthDecision, AuthError> {
        let body = serde_json::to_vec(&serde_json::json!({ "channel_name": data.channel }))
            .map_err(|e| AuthError::Decode(e.to_string()))?;

        let request = AuthRequest {
            method: "POST".to_string(),
            url: format!("{}{}", self.auth_host(socket), self.config.endpoint),
            headers: self.prepare_headers(socket, data),
            body,
            timeout: self.config.timeout,
        };

        debug!(socket = %socket.id(), channel = %data.channel, url = %request.url, "Sending auth request");

        let response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(socket = %socket.id(), channel = %data.channel, error = %e, "Error authenticating");
                return Err(e);
            }
        };

        if !(200..300).contains(&response.status) {
            warn!(
                socket = %socket.id(),
                channel = %data.channel,
                code = response.status,
                "Client could not be authenticated"
            );
            debug!(body = %String::from_utf8_lossy(&response.body), "Auth response body");
            return Err(AuthError::Rejected(response.status));
        }

        let payload = AuthPayload::decode(&response.body)?;
        debug!(socket = %socket.id(), channel = %data.channel, "Authenticated");

        Ok(AuthDecision {
            payload,
            status: response.status,
        })
    }

    /// Select the auth host for a socket, honoring its `Referer`.
    ///
    /// When a referer is present, the configured hosts are tried in order;
    /// a match selects the referer's own origin, and no match leaves the
    /// last host tried.
    #[must_use]
    pub fn auth_host(&self, socket: &Socket) -> String {
        let hosts = &self.config.hosts;
        let mut selected = hosts
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_AUTH_HOST.to_string());

        if let Some(referer) = socket.referer().and_then(|r| Url::parse(r).ok()) {
            for host in hosts {
                selected.clone_from(host);
                if has_matching_host(&referer, host) {
                    selected = origin(&referer);
                    break;
                }
            }
        }

        if selected.contains("://") {
            selected
        } else {
            format!("{}://{selected}", self.config.protocol)
        }
    }

    fn prepare_headers(&self, socket: &Socket, data: &SubscribeData) -> BTreeMap<String, String> {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &data.auth.headers {
            set_header(&mut headers, name, value.clone());
        }

        if get_header(&headers, "Cookie").map_or(true, str::is_empty) {
            if let Some(cookie) = socket.cookie() {
                set_header(&mut headers, "Cookie", cookie);
            }
        }
        set_header(&mut headers, "X-Requested-With", "XMLHttpRequest");
        set_header(&mut headers, "Content-Type", "application/json");

        headers
    }
}
