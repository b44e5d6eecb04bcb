use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// One turn of a conversation as it travels over the wire and into storage.
///
/// Every field is optional: clients send partial messages and stream frames
/// fill them in over time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Some(uuid::Uuid::new_v4().to_string()),
            role: Some(role.as_str().to_string()),
            content: Some(content.into()),
            created_date_time: Some(Utc::now()),
        }
    }

    /// Parses the message into a [`Turn`]. Returns `None` when the role or the
    /// content is missing, or the role is not one of the recognised values.
    pub fn to_turn(&self) -> Option<Turn> {
        let role = Role::try_from(self.role.as_deref()?).ok()?;
        let content = self.content.clone()?;
        Some(Turn { role, content })
    }

    /// Folds one stream frame into this message and returns the new snapshot.
    /// Content is appended; metadata is overwritten only when the frame carries it.
    pub fn absorb(&self, frame: &StreamFrame) -> ChatMessage {
        let mut content = self.content.clone().unwrap_or_default();
        if let Some(fragment) = &frame.content {
            content.push_str(fragment);
        }
        ChatMessage {
            id: frame.id.clone().or_else(|| self.id.clone()),
            role: frame.role.clone().or_else(|| self.role.clone()),
            content: Some(content),
            created_date_time: frame.created_date_time.or(self.created_date_time),
        }
    }
}

/// A validated role/content pair, the only shape forwarded to the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// A persisted conversation topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub created_date_time: DateTime<Utc>,
    #[serde(default)]
    pub updated_date_time: DateTime<Utc>,
}

impl ChatContext {
    /// Starts a topic after its first exchange; the title comes from the user message.
    pub fn start(user_id: Option<String>, question: ChatMessage, reply: ChatMessage) -> Self {
        let now = Utc::now();
        let title = question.content.as_deref().map(title_from);
        Self {
            id: Some(uuid::Uuid::new_v4().to_string()),
            user_id,
            title,
            messages: vec![question, reply],
            created_date_time: now,
            updated_date_time: now,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.updated_date_time = Utc::now();
    }
}

pub fn title_from(text: &str) -> String {
    let t = text.trim();
    if t.chars().count() > TITLE_MAX_CHARS {
        format!("{}…", t.chars().take(TITLE_MAX_CHARS).collect::<String>())
    } else {
        t.to_string()
    }
}

/// Payload of one `data:` line of the streaming endpoint.
/// `content` is the fragment only, never the running total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
}

impl StreamFrame {
    pub fn has_metadata(&self) -> bool {
        self.id.is_some() || self.role.is_some() || self.created_date_time.is_some()
    }

    /// Whether a consumer should be told about this frame: it carries text or metadata.
    pub fn is_signal(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty()) || self.has_metadata()
    }
}
