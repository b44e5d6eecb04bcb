use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;

use crate::errors::AppError;
use crate::models::ChatMessage;
use crate::routes::json_body;
use crate::service::chat_service::ChatService;
use crate::service::relay::RelayEvent;

const STREAM_CACHE_CONTROL: &str = "no-cache, must-revalidate";

/// Request body of both model endpoints. Null entries are ignored.
type MessageBatch = Option<Vec<Option<ChatMessage>>>;

fn messages_from(payload: Result<Json<MessageBatch>, JsonRejection>) -> Result<Vec<ChatMessage>, AppError> {
    Ok(json_body(payload)?.unwrap_or_default().into_iter().flatten().collect())
}

impl From<RelayEvent> for Event {
    fn from(event: RelayEvent) -> Self {
        // `event:` has to precede `data:` for line-at-a-time readers.
        let sse = match event.event_name() {
            Some(name) => Event::default().event(name),
            None => Event::default(),
        };
        sse.data(event.data())
    }
}

/// POST `/openaimodel`: one complete assistant reply
pub async fn reply_handler(
    State(svc): State<ChatService>,
    payload: Result<Json<MessageBatch>, JsonRejection>,
) -> Result<Json<ChatMessage>, AppError> {
    let messages = messages_from(payload)?;
    svc.reply(&messages).await.map(Json)
}

/// POST `/openaimodel/streaming`: the reply as server-sent events, one per fragment
pub async fn streaming_handler(
    State(svc): State<ChatService>,
    payload: Result<Json<MessageBatch>, JsonRejection>,
) -> Result<Response, AppError> {
    let messages = messages_from(payload)?;
    let events = svc
        .stream_reply(&messages)
        .await?
        .map(|event| Ok::<_, Infallible>(Event::from(event)));

    Ok((
        [(header::CACHE_CONTROL, HeaderValue::from_static(STREAM_CACHE_CONTROL))],
        Sse::new(events),
    )
        .into_response())
}
