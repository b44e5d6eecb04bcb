pub mod agent;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod routes;
pub mod service;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::routes::model_routes::{reply_handler, streaming_handler};
use crate::routes::topic_routes::{
    delete_topic_handler, get_topic_handler, list_topics_handler, save_topic_handler,
};
use crate::service::chat_service::ChatService;

/// The HTTP surface of the relay server.
pub fn router(chat_service: ChatService) -> Router {
    Router::new()
        // Topics
        .route(
            "/topics",
            get(list_topics_handler).post(save_topic_handler).delete(delete_topic_handler),
        )
        .route("/topics/{id}", get(get_topic_handler))
        // Completions
        .route("/openaimodel", post(reply_handler))
        .route("/openaimodel/streaming", post(streaming_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(chat_service)
}
