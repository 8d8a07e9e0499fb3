//! HTTP status API.
//!
//! Every `/apps/{app_id}/..` route requires the application's key, either
//! as `Authorization: Bearer <key>` or as the `auth_key` query parameter.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{header, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use herald_protocol::{unique, UniqueOrder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{debug, warn};

use crate::config::ApiOriginAllow;
use crate::server::AppState;

/// Errors returned by the HTTP surface.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or wrong application key.
    #[error("Unauthorized")]
    Unauthorized,

    /// The request is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The request failed on our side.
    #[error("{0}")]
    Internal(String),

    /// The server is shutting down.
    #[error("Server is shutting down")]
    Unavailable,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// An application whose key was verified.
#[derive(Debug, Clone)]
pub struct AuthorizedApp {
    /// The application id from the path.
    pub app_id: String,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_key(parts: &Parts) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
    params.get("auth_key").filter(|k| !k.is_empty()).cloned()
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthorizedApp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized)?;
        let app_id = params.get("app_id").cloned().unwrap_or_default();

        let Some(expected) = state.config.client_key(&app_id) else {
            debug!(app_id = %app_id, "Unknown application");
            return Err(ApiError::Unauthorized);
        };

        match bearer_token(parts).or_else(|| query_key(parts)) {
            Some(key) if key == expected => Ok(Self { app_id }),
            _ => {
                warn!(app_id = %app_id, path = %parts.uri.path(), "Rejected API request with invalid key");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

/// Routes of the status API.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/apps/:app_id/status", get(status))
        .route("/apps/:app_id/channels", get(channels))
        .route("/apps/:app_id/channels/:channel", get(channel))
        .route("/apps/:app_id/channels/:channel/users", get(channel_users))
}

/// CORS layer for the API, if enabled.
pub fn cors_layer(settings: &ApiOriginAllow) -> Option<CorsLayer> {
    if !settings.allow_cors {
        return None;
    }

    let origin = match settings.allow_origin.trim() {
        "" | "*" => AllowOrigin::any(),
        list => AllowOrigin::list(
            list.split(',')
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok()),
        ),
    };

    let methods = match settings.allow_methods.trim() {
        "" | "*" => AllowMethods::any(),
        list => AllowMethods::list(
            list.split(',')
                .filter_map(|m| Method::from_bytes(m.trim().as_bytes()).ok()),
        ),
    };

    let headers = match settings.allow_headers.trim() {
        "" | "*" => AllowHeaders::any(),
        list => AllowHeaders::list(
            list.split(',')
                .filter_map(|h| HeaderName::from_bytes(h.trim().as_bytes()).ok()),
        ),
    };

    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(methods)
            .allow_headers(headers),
    )
}

/// Middleware adding the configured extra headers to every response.
pub async fn extra_headers(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    for (name, value) in &state.config.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => debug!(header = %name, "Skipping invalid configured header"),
        }
    }
    response
}

async fn root() -> &'static str {
    "OK"
}

async fn status(State(state): State<Arc<AppState>>, _app: AuthorizedApp) -> Json<Value> {
    Json(json!({
        "subscription_count": state.transport.connection_count(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

#[derive(Debug, Deserialize)]
struct ChannelsQuery {
    #[serde(default)]
    filter_by_prefix: Option<String>,
}

async fn channels(
    State(state): State<Arc<AppState>>,
    _app: AuthorizedApp,
    Query(query): Query<ChannelsQuery>,
) -> Json<Value> {
    let prefix = query.filter_by_prefix.unwrap_or_default();

    let mut channels = Map::new();
    let mut rooms = state.transport.room_sizes();
    rooms.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, size) in rooms {
        if !name.starts_with(&prefix) {
            continue;
        }
        channels.insert(
            name,
            json!({ "subscription_count": size, "occupied": size > 0 }),
        );
    }

    Json(json!({ "channels": channels }))
}

async fn presence_user_ids(state: &AppState, channel: &str) -> Result<Vec<u64>, ApiError> {
    let members = state
        .router
        .presence()
        .get_members(channel)
        .await
        .map_err(|e| {
            warn!(channel = %channel, error = %e, "Failed to read presence members");
            ApiError::Internal("Failed to read presence members".to_string())
        })?;

    Ok(unique(&members, UniqueOrder::First)
        .into_iter()
        .map(|m| m.user_id)
        .collect())
}

async fn channel(
    State(state): State<Arc<AppState>>,
    _app: AuthorizedApp,
    Path((_, channel)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let size = state.transport.room_size(&channel);
    let mut body = json!({
        "subscription_count": size,
        "occupied": size > 0,
    });

    if state.router.classifier().is_presence(&channel) {
        let users = presence_user_ids(&state, &channel).await?;
        body["user_count"] = json!(users.len());
    }

    Ok(Json(body))
}

async fn channel_users(
    State(state): State<Arc<AppState>>,
    _app: AuthorizedApp,
    Path((_, channel)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    if !state.router.classifier().is_presence(&channel) {
        return Err(ApiError::BadRequest(
            "User list is only possible for Presence Channels".to_string(),
        ));
    }

    let users = presence_user_ids(&state, &channel).await?;
    Ok(Json(json!({ "users": users })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts(uri: &str, auth: Option<&str>) -> Parts {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_key_from_bearer_header() {
        let parts = parts("/apps/a/status", Some("Bearer secret"));
        assert_eq!(bearer_token(&parts).as_deref(), Some("secret"));
    }

    #[test]
    fn test_key_from_query() {
        let parts = parts("/apps/a/status?auth_key=secret", None);
        assert_eq!(bearer_token(&parts), None);
        assert_eq!(query_key(&parts).as_deref(), Some("secret"));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_cors_disabled_by_default() {
        assert!(cors_layer(&ApiOriginAllow::default()).is_none());

        let settings = ApiOriginAllow {
            allow_cors: true,
            allow_origin: "https://app.test".into(),
            allow_methods: "GET, POST".into(),
            allow_headers: "Content-Type, Authorization".into(),
        };
        assert!(cors_layer(&settings).is_some());
    }
}
