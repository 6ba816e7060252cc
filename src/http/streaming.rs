use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::errors::{Error, Result};
use crate::models::EventId;
use crate::realtime::ConnectionStream;

pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Headers for SSE responses
pub fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(4);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    headers
}

/// Streaming response over a connection's sink. The body owns the stream, so
/// the connection is removed once hyper drops the body.
pub struct SseResponse(pub ConnectionStream);

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, sse_headers(), Body::from_stream(self.0)).into_response()
    }
}

/// Resume position sent by the client, from the `Last-Event-ID` header or
/// the `lastEventId` query parameter. The header wins.
pub fn last_event_id(headers: &HeaderMap, query: Option<&str>) -> Result<Option<EventId>> {
    let raw = match headers.get(LAST_EVENT_ID) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| Error::validation("Last-Event-ID must be an integer"))?,
        ),
        None => query,
    };
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<EventId>()
            .ok()
            .filter(|id| *id >= 0)
            .map(Some)
            .ok_or_else(|| Error::validation("Last-Event-ID must be an integer")),
    }
}
