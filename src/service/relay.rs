//! Turns a stream of reply fragments into the ordered SSE event sequence of
//! the streaming endpoint.
//!
//! Every fragment becomes exactly one data frame carrying the fragment text
//! only. A normal end adds one `[DONE]` marker. An upstream failure after the
//! first frame becomes an in-band `error` event and the stream ends without
//! `[DONE]`, so consumers must treat a missing marker as a failure.

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::agent::FragmentStream;
use crate::errors::Problem;
use crate::models::{Role, StreamFrame};

pub const DONE_MARKER: &str = "[DONE]";
pub const ERROR_EVENT: &str = "error";

/// One SSE event emitted by the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Frame(StreamFrame),
    Failed(Problem),
    Done,
}

impl RelayEvent {
    /// The SSE `event:` name, `None` for plain data events.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            RelayEvent::Failed(_) => Some(ERROR_EVENT),
            RelayEvent::Frame(_) | RelayEvent::Done => None,
        }
    }

    /// The text of the `data:` field.
    pub fn data(&self) -> String {
        let json = match self {
            RelayEvent::Frame(frame) => serde_json::to_string(frame),
            RelayEvent::Failed(problem) => serde_json::to_string(problem),
            RelayEvent::Done => return DONE_MARKER.to_string(),
        };
        // Both payloads are plain structs of strings and timestamps.
        json.unwrap_or_else(|e| {
            error!("Failed to encode relay event: {e}");
            "{}".to_string()
        })
    }
}

pub type RelayStream = BoxStream<'static, RelayEvent>;

/// Per-stream state: the id and timestamp are fixed when the stream starts and
/// the role is latched from the first fragment that names one.
struct RelayState {
    id: String,
    created: DateTime<Utc>,
    role: Option<Role>,
    reply: String,
    frames: usize,
}

impl RelayState {
    fn new() -> Self {
        Self { id: Uuid::new_v4().to_string(), created: Utc::now(), role: None, reply: String::new(), frames: 0 }
    }

    fn frame(&mut self, role: Option<Role>, content: String) -> StreamFrame {
        if self.role.is_none() {
            self.role = role;
        }
        self.reply.push_str(&content);
        self.frames += 1;
        StreamFrame {
            id: Some(self.id.clone()),
            role: self.role.map(|r| r.as_str().to_string()),
            content: Some(content),
            created_date_time: Some(self.created),
        }
    }
}

/// Relays `fragments` in arrival order. Dropping the returned stream drops
/// `fragments`, which is how a client disconnect cancels the upstream call.
pub fn relay(mut fragments: FragmentStream) -> RelayStream {
    let stream = async_stream::stream! {
        let mut state = RelayState::new();
        debug!("Relay {} started", state.id);

        while let Some(next) = fragments.next().await {
            match next {
                Ok(fragment) => {
                    yield RelayEvent::Frame(state.frame(fragment.role, fragment.content));
                }
                Err(e) => {
                    error!("Relay {} failed after {} frames: {e:?}", state.id, state.frames);
                    yield RelayEvent::Failed(e.problem());
                    return;
                }
            }
        }

        if state.reply.is_empty() {
            warn!("Relay {} finished with an empty reply", state.id);
        }
        debug!("Relay {} finished: {} frames, {} chars", state.id, state.frames, state.reply.chars().count());
        yield RelayEvent::Done;
    };
    stream.boxed()
}
