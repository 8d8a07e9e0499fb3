//! `POST /apps/{app_id}/events`.

use axum::{extract::State, routing::post, Json, Router};
use bytes::Bytes;
use herald_core::{EventMessage, IngestSource};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::strip_prefix;
use crate::api::{ApiError, AuthorizedApp};
use crate::metrics;
use crate::server::AppState;

/// Body of an event publication.
#[derive(Debug, Default, Deserialize)]
struct PublishBody {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channels: Option<Vec<String>>,
    #[serde(default)]
    name: Option<String>,
    /// The payload as a JSON-encoded string.
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    socket_id: Option<String>,
}

/// Turn a request body into one event per target channel.
///
/// # Errors
///
/// Returns [`ApiError::BadRequest`] if the body, or the JSON string in its
/// `data` field, cannot be parsed, or if a required field is missing.
pub fn parse_events(key_prefix: &str, body: &[u8]) -> Result<Vec<EventMessage>, ApiError> {
    let body: PublishBody = serde_json::from_slice(body)
        .map_err(|_| ApiError::BadRequest("JSON parsing error".to_string()))?;

    let channels: Vec<String> = match (body.channels, body.channel) {
        (Some(channels), _) if !channels.is_empty() => channels,
        (_, Some(channel)) if !channel.is_empty() => vec![channel],
        _ => Vec::new(),
    };

    let (Some(name), Some(data)) = (body.name.filter(|n| !n.is_empty()), body.data) else {
        return Err(missing_fields());
    };
    if channels.is_empty() {
        return Err(missing_fields());
    }

    let data: Value = serde_json::from_str(&data)
        .map_err(|_| ApiError::BadRequest("Body data JSON parsing error".to_string()))?;

    Ok(channels
        .iter()
        .map(|channel| {
            let message = EventMessage::new(
                strip_prefix(key_prefix, channel),
                name.clone(),
                data.clone(),
            );
            match body.socket_id.as_deref().filter(|s| !s.is_empty()) {
                Some(socket) => message.with_socket(socket),
                None => message,
            }
        })
        .collect())
}

fn missing_fields() -> ApiError {
    ApiError::BadRequest("Event must include channel, event name and data".to_string())
}

/// Route for HTTP event ingestion.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/apps/:app_id/events", post(publish))
}

async fn publish(
    State(state): State<Arc<AppState>>,
    app: AuthorizedApp,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let events = parse_events(state.config.key_prefix(), &body).map_err(|e| {
        warn!(app_id = %app.app_id, error = %e, "Rejected event publication");
        e
    })?;

    for event in events {
        debug!(
            app_id = %app.app_id,
            channel = %event.channel,
            event = %event.event,
            "Event received over HTTP"
        );
        state
            .events
            .publish(IngestSource::Http, event)
            .await
            .map_err(|_| ApiError::Unavailable)?;
        metrics::record_broadcast(IngestSource::Http);
    }

    Ok(Json(json!({ "message": "OK" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_channel() {
        let body = br#"{"channel":"app_orders","name":"OrderShipped","data":"{\"id\":7}","socket_id":"s-1"}"#;
        let events = parse_events("app_", body).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, "orders");
        assert_eq!(events[0].event, "OrderShipped");
        assert_eq!(events[0].data, json!({"id": 7}));
        assert_eq!(events[0].origin(), Some("s-1"));
    }

    #[test]
    fn test_parse_multiple_channels() {
        let body = br#"{"channels":["a","b"],"name":"e","data":"[]"}"#;
        let events = parse_events("", body).unwrap();

        let channels: Vec<_> = events.iter().map(|e| e.channel.as_str()).collect();
        assert_eq!(channels, vec!["a", "b"]);
        assert!(events.iter().all(|e| e.origin().is_none()));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let err = parse_events("", b"nope").unwrap_err();
        assert_eq!(err.to_string(), "JSON parsing error");

        let err = parse_events("", br#"{"channel":"a","data":"{}"}"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Event must include channel, event name and data"
        );

        let err = parse_events("", br#"{"name":"e","data":"{}"}"#).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = parse_events("", br#"{"channel":"a","name":"e","data":"{oops"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Body data JSON parsing error");
    }
}
