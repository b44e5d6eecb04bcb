use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::agent::CompletionGateway;
use crate::db::topic_repository::{TopicRepository, ANONYMOUS_USER_ID};
use crate::errors::AppError;
use crate::models::{ChatContext, ChatMessage, Role, Turn};
use crate::service::relay::{relay, RelayStream};

#[derive(Clone)]
pub struct ChatService {
    gateway: Arc<dyn CompletionGateway>,
    topics: TopicRepository,
}

impl ChatService {
    pub fn new(gateway: Arc<dyn CompletionGateway>, topics: TopicRepository) -> Self {
        Self { gateway, topics }
    }

    // ── Completions ───────────────────────────────────────────────────────────

    /// Validates the incoming messages and keeps the ones that can be forwarded,
    /// in their original order.
    fn turns_for(messages: &[ChatMessage]) -> Result<Vec<Turn>, AppError> {
        if messages.is_empty() {
            return Err(AppError::empty_field("messages"));
        }

        let turns: Vec<Turn> = messages
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                let turn = m.to_turn();
                if turn.is_none() {
                    debug!("Skipping message {i}: role {:?} is missing/unknown or content is missing", m.role);
                }
                turn
            })
            .collect();

        if turns.is_empty() {
            return Err(AppError::invalid_field("messages", "no message has a known role and content"));
        }
        Ok(turns)
    }

    /// Runs one completion and wraps the reply as a fresh assistant message.
    pub async fn reply(&self, messages: &[ChatMessage]) -> Result<ChatMessage, AppError> {
        let turns = Self::turns_for(messages)?;
        let content = self.gateway.complete(turns).await?;
        if content.is_empty() {
            warn!("Completion service returned an empty reply");
            return Err(AppError::NoReply);
        }
        Ok(ChatMessage::new(Role::Assistant, content))
    }

    /// Opens the upstream stream and waits for its first fragment before
    /// handing back the relay, so that failures which happen before anything
    /// is written can still be answered with a proper status code.
    pub async fn stream_reply(&self, messages: &[ChatMessage]) -> Result<RelayStream, AppError> {
        let turns = Self::turns_for(messages)?;
        let mut fragments = self.gateway.stream(turns).await?;

        let first = match fragments.next().await {
            Some(Ok(fragment)) => fragment,
            Some(Err(e)) => return Err(e),
            None => {
                warn!("Completion stream ended before the first fragment");
                return Err(AppError::NoReply);
            }
        };

        Ok(relay(stream::once(async move { Ok(first) }).chain(fragments).boxed()))
    }

    // ── Topics ────────────────────────────────────────────────────────────────

    pub async fn get_topics(&self, user_id: Option<&str>) -> Result<Vec<ChatContext>, AppError> {
        self.topics.find_by_user_id(user_id).await
    }

    pub async fn get_topic(&self, user_id: Option<&str>, topic_id: &str) -> Result<ChatContext, AppError> {
        self.topics
            .find_by_id(user_id, topic_id)
            .await?
            .ok_or_else(|| AppError::TopicNotFound { id: topic_id.to_string() })
    }

    /// A topic may only name its caller as owner. Callers without an id own the
    /// anonymous bucket and nothing else.
    fn check_owner(caller: Option<&str>, topic: &ChatContext) -> Result<(), AppError> {
        let caller = caller.unwrap_or(ANONYMOUS_USER_ID);
        match topic.user_id.as_deref() {
            Some(owner) if owner != caller => {
                warn!("Caller {caller} named topic owner {owner}");
                Err(AppError::invalid_field("userId", "does not match the caller"))
            }
            _ => Ok(()),
        }
    }

    /// Stores the topic as a whole. A topic without `userId` is filed under the
    /// caller; one that names a different user is rejected.
    pub async fn save_topic(&self, caller: Option<&str>, mut topic: ChatContext) -> Result<(), AppError> {
        if topic.messages.is_empty() {
            return Err(AppError::empty_field("messages"));
        }
        if topic.id.as_deref().map_or(true, str::is_empty) {
            return Err(AppError::empty_field("id"));
        }
        Self::check_owner(caller, &topic)?;
        if topic.user_id.is_none() {
            topic.user_id = caller.map(str::to_string);
        }

        self.topics.save(&topic).await?;
        info!("Saved topic {:?} with {} messages", topic.id, topic.messages.len());
        Ok(())
    }

    pub async fn delete_topic(&self, caller: Option<&str>, topic: &ChatContext) -> Result<(), AppError> {
        let id = topic.id.as_deref().ok_or_else(|| AppError::empty_field("id"))?;
        Self::check_owner(caller, topic)?;
        if self.topics.delete_by_id(caller, id).await? {
            info!("Deleted topic {id}");
            Ok(())
        } else {
            Err(AppError::TopicNotFound { id: id.to_string() })
        }
    }
}
