use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::blob_store::BlobStore;
use crate::errors::AppError;
use crate::models::ChatContext;

/// Bucket for callers that did not identify themselves.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Topics stored as one JSON blob each, under `"{userId}/{topicId}.json"`.
#[derive(Clone)]
pub struct TopicRepository {
    blobs: Arc<dyn BlobStore>,
}

impl TopicRepository {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// All topics of the user, most recently updated first.
    /// Blobs that no longer decode are skipped with a warning.
    pub async fn find_by_user_id(&self, user_id: Option<&str>) -> Result<Vec<ChatContext>, AppError> {
        let prefix = format!("{}/", user_key(user_id)?);
        let mut topics = Vec::new();

        for name in self.blobs.list(&prefix).await? {
            let Some(json) = self.blobs.get(&name).await? else {
                debug!("Blob {name} disappeared while listing");
                continue;
            };
            match serde_json::from_str::<ChatContext>(&json) {
                Ok(topic) => topics.push(topic),
                Err(e) => warn!("Deserialization failed for {name}: {e}"),
            }
        }

        topics.sort_by(|a, b| b.updated_date_time.cmp(&a.updated_date_time));
        Ok(topics)
    }

    pub async fn find_by_id(
        &self,
        user_id: Option<&str>,
        topic_id: &str,
    ) -> Result<Option<ChatContext>, AppError> {
        let name = blob_name(user_id, topic_id)?;
        match self.blobs.get(&name).await? {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| {
                warn!("Deserialization failed for {name}: {e}");
                AppError::Unexpected(format!("Topic {topic_id} is unreadable"))
            }),
            None => Ok(None),
        }
    }

    /// Writes the whole topic, replacing any previous version with the same key.
    pub async fn save(&self, topic: &ChatContext) -> Result<(), AppError> {
        let id = topic.id.as_deref().ok_or_else(|| AppError::empty_field("id"))?;
        let name = blob_name(topic.user_id.as_deref(), id)?;
        let json = serde_json::to_string(topic)
            .map_err(|source| AppError::TopicEncoding { id: id.to_string(), source })?;
        self.blobs.put(&name, json).await?;
        debug!("Saved topic {name}");
        Ok(())
    }

    pub async fn delete_by_id(&self, user_id: Option<&str>, topic_id: &str) -> Result<bool, AppError> {
        let name = blob_name(user_id, topic_id)?;
        self.blobs.delete(&name).await
    }
}

fn user_key(user_id: Option<&str>) -> Result<&str, AppError> {
    let key = user_id.unwrap_or(ANONYMOUS_USER_ID);
    check_segment("userId", key)?;
    Ok(key)
}

fn blob_name(user_id: Option<&str>, topic_id: &str) -> Result<String, AppError> {
    check_segment("id", topic_id)?;
    Ok(format!("{}/{topic_id}.json", user_key(user_id)?))
}

fn check_segment(field_name: &str, value: &str) -> Result<(), AppError> {
    if value.is_empty() {
        return Err(AppError::empty_field(field_name));
    }
    if value.contains('/') {
        return Err(AppError::invalid_field(field_name, "must not contain '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::db::blob_store::MemoryBlobStore;
    use crate::models::{ChatMessage, Role};

    fn repo() -> (TopicRepository, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new());
        (TopicRepository::new(store.clone()), store)
    }

    fn topic(id: &str, user_id: Option<&str>) -> ChatContext {
        let mut topic = ChatContext::start(
            user_id.map(str::to_string),
            ChatMessage::new(Role::User, "Hello"),
            ChatMessage::new(Role::Assistant, "Hi there"),
        );
        topic.id = Some(id.to_string());
        topic
    }

    #[test]
    fn blob_names_follow_user_and_topic_ids() {
        assert_eq!(blob_name(Some("alice"), "t1").unwrap(), "alice/t1.json");
        assert_eq!(blob_name(None, "t1").unwrap(), "anonymous/t1.json");
        assert!(blob_name(Some("a/b"), "t1").is_err());
        assert!(blob_name(None, "../t1").is_err());
        assert!(blob_name(None, "").is_err());
    }

    #[tokio::test]
    async fn saving_twice_keeps_one_record() {
        let (repo, store) = repo();
        let mut t = topic("t1", None);
        repo.save(&t).await.unwrap();
        t.push(ChatMessage::new(Role::User, "again"));
        repo.save(&t).await.unwrap();

        assert_eq!(store.len().await, 1);
        let topics = repo.find_by_user_id(None).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn saved_topic_round_trips() {
        let (repo, _) = repo();
        let t = topic("t1", Some("alice"));
        repo.save(&t).await.unwrap();

        assert_eq!(repo.find_by_user_id(Some("alice")).await.unwrap(), vec![t.clone()]);
        assert_eq!(repo.find_by_id(Some("alice"), "t1").await.unwrap(), Some(t));
        assert!(repo.find_by_user_id(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_requires_id() {
        let (repo, store) = repo();
        let mut t = topic("t1", None);
        t.id = None;
        let err = repo.save(&t).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn topics_are_listed_most_recent_first() {
        let (repo, _) = repo();
        let now = Utc::now();
        for (id, age) in [("old", 30), ("new", 1), ("mid", 10)] {
            let mut t = topic(id, None);
            t.updated_date_time = now - Duration::minutes(age);
            repo.save(&t).await.unwrap();
        }

        let ids: Vec<_> = repo
            .find_by_user_id(None)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn unreadable_blobs_are_skipped() {
        let (repo, store) = repo();
        repo.save(&topic("good", None)).await.unwrap();
        store.put("anonymous/bad.json", "not json".into()).await.unwrap();

        let topics = repo.find_by_user_id(None).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].id.as_deref(), Some("good"));
    }

    #[tokio::test]
    async fn deleting_missing_topic_reports_false_and_changes_nothing() {
        let (repo, store) = repo();
        repo.save(&topic("t1", None)).await.unwrap();

        assert!(!repo.delete_by_id(None, "nope").await.unwrap());
        assert!(!repo.delete_by_id(Some("alice"), "t1").await.unwrap());
        assert_eq!(store.len().await, 1);

        assert!(repo.delete_by_id(None, "t1").await.unwrap());
        assert_eq!(store.len().await, 0);
    }
}
