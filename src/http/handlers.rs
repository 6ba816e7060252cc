use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::info;

use super::errors::{ApiError, ApiResult};
use super::streaming::{last_event_id, SseResponse};
use super::AppState;
use crate::models::{Event, EventId, NewEvent};
use crate::realtime::SubscribeRequest;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishBody {
    pub channel: Option<String>,
    pub event_type: Option<String>,
    pub payload: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipBody {
    pub user_id: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipResponse {
    pub status: String,
    pub user_id: String,
    pub channel: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub user_id: Option<String>,
    pub channels: Option<String>,
    pub last_event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub channel: Option<String>,
    pub after_id: Option<EventId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub events: Vec<Event>,
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "connections": state.hub.connection_count(),
    });
    if let Some(pool) = state.hub.pool_status() {
        body["database"] = json!({
            "size": pool.size,
            "available": pool.available,
            "maxSize": pool.max_size,
        });
    }
    Json(body)
}

pub async fn publish(
    State(state): State<AppState>,
    body: Result<Json<PublishBody>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(body) = body?;
    let (Some(channel), Some(event_type), Some(payload)) = (
        required(body.channel),
        required(body.event_type),
        body.payload.filter(|p| !p.is_null()),
    ) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    state
        .hub
        .publish(NewEvent::new(channel, event_type, payload))
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn subscribe_channel(
    State(state): State<AppState>,
    body: Result<Json<MembershipBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MembershipResponse>)> {
    let (user_id, channel) = membership(body)?;
    state.hub.add_membership(&user_id, &channel).await?;
    Ok((
        StatusCode::CREATED,
        Json(MembershipResponse {
            status: "subscribed".to_string(),
            user_id,
            channel,
        }),
    ))
}

pub async fn unsubscribe_channel(
    State(state): State<AppState>,
    body: Result<Json<MembershipBody>, JsonRejection>,
) -> ApiResult<Json<MembershipResponse>> {
    let (user_id, channel) = membership(body)?;
    state.hub.remove_membership(&user_id, &channel).await?;
    Ok(Json(MembershipResponse {
        status: "unsubscribed".to_string(),
        user_id,
        channel,
    }))
}

fn membership(body: Result<Json<MembershipBody>, JsonRejection>) -> ApiResult<(String, String)> {
    let Json(body) = body?;
    match (required(body.user_id), required(body.channel)) {
        (Some(user_id), Some(channel)) => Ok((user_id, channel)),
        _ => Err(ApiError::bad_request("Missing userId or channel")),
    }
}

pub async fn list_channels(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> ApiResult<Json<JsonValue>> {
    let Query(query) = query?;
    let user_id =
        required(query.user_id).ok_or_else(|| ApiError::bad_request("Missing userId"))?;
    let channels = state.hub.memberships(&user_id).await?;
    Ok(Json(json!({ "channels": channels })))
}

pub async fn active_connections(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({ "count": state.hub.connection_count() }))
}

pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> ApiResult<SseResponse> {
    let Query(query) = query?;
    let (Some(user_id), Some(channels)) = (required(query.user_id), required(query.channels))
    else {
        return Err(ApiError::bad_request("Missing userId or channels"));
    };
    let last_seen_id = last_event_id(&headers, query.last_event_id.as_deref())?;

    let request = SubscribeRequest {
        user_id,
        channels: channels.split(',').map(str::to_string).collect(),
        last_seen_id,
    };
    let subscription = state.hub.open_stream(request).await?;
    if !subscription.rejected.is_empty() {
        info!(
            connection_id = %subscription.connection().id(),
            rejected = ?subscription.rejected,
            "Stream opened without unauthorized channels"
        );
    }
    Ok(SseResponse(subscription.stream))
}

pub async fn history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<HistoryResponse>> {
    let Query(query) = query?;
    let channel =
        required(query.channel).ok_or_else(|| ApiError::bad_request("Missing channel"))?;
    let events = state
        .hub
        .history(&channel, query.after_id, query.limit)
        .await?;
    Ok(Json(HistoryResponse { events }))
}
