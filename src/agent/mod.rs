use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use rig::agent::MultiTurnStreamItem;
use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::{ollama, openai};
use rig::streaming::{StreamedAssistantContent, StreamingChat};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::config::{LlmConfig, LlmProvider};
use crate::errors::AppError;
use crate::models::{Role, Turn};

/// Fragments buffered between the upstream pump task and the relay.
const FRAGMENT_BUFFER: usize = 64;

/// One incremental piece of a streamed reply. Only the first fragment carries a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub role: Option<Role>,
    pub content: String,
}

impl Fragment {
    pub fn new(role: Option<Role>, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

pub type FragmentStream = BoxStream<'static, Result<Fragment, AppError>>;

/// The completion service seen by the rest of the server.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Runs one turn and returns the whole reply text.
    async fn complete(&self, turns: Vec<Turn>) -> Result<String, AppError>;

    /// Runs one turn and yields the reply as it is generated. The stream is
    /// finite and cannot be restarted; dropping it stops the upstream call.
    async fn stream(&self, turns: Vec<Turn>) -> Result<FragmentStream, AppError>;
}

/// A conversation laid out the way rig agents take it.
struct RigConversation {
    preamble: Option<String>,
    prompt: RigMessage,
    history: Vec<RigMessage>,
}

/// System turns (and the configured preamble) become the agent preamble, the
/// last remaining turn is the prompt and everything before it is history.
/// rig history has no free-form tool role, so tool output is replayed as user text.
fn to_rig_conversation(preamble: Option<&str>, turns: &[Turn]) -> Result<RigConversation, AppError> {
    let mut system: Vec<&str> = preamble.into_iter().collect();
    let mut history: Vec<RigMessage> = Vec::with_capacity(turns.len());

    for turn in turns {
        match turn.role {
            Role::System => system.push(&turn.content),
            Role::User | Role::Tool => history.push(RigMessage::user(&turn.content)),
            Role::Assistant => history.push(RigMessage::assistant(&turn.content)),
        }
    }

    let prompt = history.pop().ok_or_else(|| AppError::empty_field("messages"))?;
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));
    Ok(RigConversation { preamble, prompt, history })
}

fn is_context_overflow(message: &str) -> bool {
    message.contains("context_length_exceeded") || message.contains("maximum context length")
}

#[derive(Clone)]
enum LlmClient {
    Ollama(ollama::Client),
    OpenAi(openai::Client),
}

/// Builds a fresh agent for one request, so each call carries its own preamble.
macro_rules! rig_agent {
    ($client:expr, $model:expr, $preamble:expr) => {{
        let builder = $client.agent($model);
        match $preamble {
            Some(preamble) => builder.preamble(preamble).build(),
            None => builder.build(),
        }
    }};
}

/// [`CompletionGateway`] backed by a rig provider client.
#[derive(Clone)]
pub struct RigGateway {
    client: LlmClient,
    base_url: String,
    model: String,
    preamble: Option<String>,
}

impl RigGateway {
    pub fn from_config(config: &LlmConfig) -> Result<Self, AppError> {
        let client = match config.provider {
            LlmProvider::Ollama => {
                let client = ollama::Client::builder()
                    .api_key(Nothing)
                    .base_url(&config.base_url)
                    .build()
                    .map_err(|e| AppError::InvalidConfig {
                        key: "LLM_BASE_URL".to_string(),
                        value: format!("{} ({e})", config.base_url),
                    })?;
                LlmClient::Ollama(client)
            }
            LlmProvider::OpenAi => {
                let api_key = config
                    .api_key
                    .as_deref()
                    .ok_or_else(|| AppError::MissingConfig { key: "LLM_API_KEY".to_string() })?;
                let client = openai::Client::builder()
                    .api_key(api_key)
                    .base_url(&config.base_url)
                    .build()
                    .map_err(|e| AppError::InvalidConfig {
                        key: "LLM_BASE_URL".to_string(),
                        value: format!("{} ({e})", config.base_url),
                    })?;
                LlmClient::OpenAi(client)
            }
        };
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            preamble: config.preamble.clone(),
        })
    }

    fn classify(&self, message: String) -> AppError {
        if is_context_overflow(&message) {
            AppError::ContextTooLarge { message }
        } else if message.contains("Connection refused") || message.contains("error sending request") {
            AppError::UpstreamUnavailable { endpoint: self.base_url.clone() }
        } else {
            AppError::UpstreamFailure { message }
        }
    }

    /// Drives the upstream stream into `tx` until it ends, fails or the receiver goes away.
    async fn pump(self, conversation: RigConversation, tx: mpsc::Sender<Result<Fragment, AppError>>) {
        let RigConversation { preamble, prompt, history } = conversation;
        let model = self.model.as_str();
        match &self.client {
            LlmClient::Ollama(client) => {
                let agent = rig_agent!(client, model, preamble.as_deref());
                let stream = agent.stream_chat(prompt, history).await;
                self.forward(stream, &tx).await;
            }
            LlmClient::OpenAi(client) => {
                let agent = rig_agent!(client, model, preamble.as_deref());
                let stream = agent.stream_chat(prompt, history).await;
                self.forward(stream, &tx).await;
            }
        }
    }

    async fn forward<S, R, E>(&self, mut stream: S, tx: &mpsc::Sender<Result<Fragment, AppError>>)
    where
        S: Stream<Item = Result<MultiTurnStreamItem<R>, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut role = Some(Role::Assistant);
        loop {
            let item = tokio::select! {
                _ = tx.closed() => {
                    debug!("Relay went away, abandoning upstream stream");
                    return;
                }
                item = stream.next() => item,
            };
            let fragment = match item {
                None => return,
                Some(Ok(MultiTurnStreamItem::StreamAssistantItem(StreamedAssistantContent::Text(text)))) => {
                    Fragment { role: role.take(), content: text.text }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("Streaming inference failed (model {}): {e}", self.model);
                    let _ = tx.send(Err(self.classify(e.to_string()))).await;
                    return;
                }
            };
            if tx.send(Ok(fragment)).await.is_err() {
                debug!("Relay went away, abandoning upstream stream");
                return;
            }
        }
    }
}

#[async_trait]
impl CompletionGateway for RigGateway {
    async fn complete(&self, turns: Vec<Turn>) -> Result<String, AppError> {
        let RigConversation { preamble, prompt, history } =
            to_rig_conversation(self.preamble.as_deref(), &turns)?;
        let model = self.model.as_str();

        let result = match &self.client {
            LlmClient::Ollama(client) => {
                rig_agent!(client, model, preamble.as_deref()).chat(prompt, history).await
            }
            LlmClient::OpenAi(client) => {
                rig_agent!(client, model, preamble.as_deref()).chat(prompt, history).await
            }
        };

        result.map_err(|e| {
            error!("Inference failed (model {}): {e}", self.model);
            self.classify(e.to_string())
        })
    }

    async fn stream(&self, turns: Vec<Turn>) -> Result<FragmentStream, AppError> {
        let conversation = to_rig_conversation(self.preamble.as_deref(), &turns)?;
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(self.clone().pump(conversation, tx));
        Ok(ReceiverStream::new(rx).boxed())
    }
}
