use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use mailroom::auth::AuthUser;
use mailroom::dispatch::{BulkEvent, BulkSendRequest, Dispatcher, SendRequest};
use mailroom::store::DeliveryLog;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::extract::JsonBody;
use crate::{AppState, Result};

const DEFAULT_LOG_LIMIT: u32 = 50;
const MAX_LOG_LIMIT: u32 = 500;

pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/send", post(send))
        .route("/send-bulk-stream", post(send_bulk_stream))
        .route("/test-connection", post(test_connection))
        .route("/logs", get(logs))
}

async fn send(
    auth: AuthUser,
    State(dispatcher): State<Dispatcher>,
    JsonBody(req): JsonBody<SendRequest>,
) -> Result<Json<Value>> {
    let message_id = dispatcher.send(auth.id, req).await?;
    Ok(Json(json!({ "success": true, "data": { "messageId": message_id } })))
}

/// Validation and setup errors are returned as ordinary JSON errors. Once
/// the batch is ready the response switches to `text/event-stream` and
/// carries one `data:` frame per [`BulkEvent`].
async fn send_bulk_stream(
    auth: AuthUser,
    State(dispatcher): State<Dispatcher>,
    JsonBody(req): JsonBody<BulkSendRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let batch = dispatcher.prepare_bulk(auth.id, req).await?;
    tracing::info!(user_id = %auth.id, total = batch.total(), "streaming bulk send");

    let events = batch.into_stream().map(|event| Ok(frame(&event)));
    Ok(Sse::new(events))
}

fn frame(event: &BulkEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|err| {
        tracing::error!(%err, "failed to encode progress event");
        Event::default().data(
            r#"{"type":"error","error":"bulk send aborted","details":"failed to encode progress"}"#,
        )
    })
}

async fn test_connection(auth: AuthUser, State(dispatcher): State<Dispatcher>) -> Result<Json<Value>> {
    dispatcher.test_connection(auth.id).await?;
    Ok(Json(json!({ "success": true, "message": "smtp connection successful" })))
}

#[derive(Deserialize)]
struct LogQuery {
    limit: Option<u32>,
}

async fn logs(
    auth: AuthUser,
    State(log): State<Arc<dyn DeliveryLog>>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let entries = log.recent(auth.id, limit).await?;
    Ok(Json(json!({ "success": true, "data": entries })))
}
