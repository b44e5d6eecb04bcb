use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::errors::AppError;
use crate::models::ChatContext;
use crate::routes::{json_body, CallerId};
use crate::service::chat_service::ChatService;

/// GET `/topics`: the caller's topics, most recently updated first
pub async fn list_topics_handler(
    caller: CallerId,
    State(svc): State<ChatService>,
) -> Result<Json<Vec<ChatContext>>, AppError> {
    svc.get_topics(caller.as_deref()).await.map(Json)
}

/// GET `/topics/{id}`
pub async fn get_topic_handler(
    caller: CallerId,
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Result<Json<ChatContext>, AppError> {
    svc.get_topic(caller.as_deref(), &id).await.map(Json)
}

/// POST `/topics`: create or replace a topic
pub async fn save_topic_handler(
    caller: CallerId,
    State(svc): State<ChatService>,
    payload: Result<Json<Option<ChatContext>>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let topic = json_body(payload)?.ok_or_else(|| AppError::empty_field("messages"))?;
    svc.save_topic(caller.as_deref(), topic).await?;
    Ok(StatusCode::OK)
}

/// DELETE `/topics`: the body names the topic to remove
pub async fn delete_topic_handler(
    caller: CallerId,
    State(svc): State<ChatService>,
    payload: Result<Json<Option<ChatContext>>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let topic = json_body(payload)?.ok_or_else(|| AppError::empty_field("id"))?;
    svc.delete_topic(caller.as_deref(), &topic).await?;
    Ok(StatusCode::OK)
}
