use crate::errors::Problem;
use crate::models::StreamFrame;
use crate::service::relay::{DONE_MARKER, ERROR_EVENT};

const DATA_PREFIX: &str = "data: ";
const EVENT_PREFIX: &str = "event:";

/// What one line of the event stream means to the reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Frame(StreamFrame),
    Failed(Problem),
    Done,
}

/// Line-at-a-time decoder for the streaming endpoint.
///
/// Blank lines end an event and are otherwise skipped, `event:` names the
/// next data line, `data: ` lines carry JSON and every other line is ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
}

impl SseDecoder {
    pub fn decode(&mut self, line: &str) -> Result<Option<Signal>, serde_json::Error> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            self.event = None;
            return Ok(None);
        }
        if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            self.event = Some(name.trim().to_string());
            return Ok(None);
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Ok(None);
        };
        if payload == DONE_MARKER {
            return Ok(Some(Signal::Done));
        }
        if self.event.as_deref() == Some(ERROR_EVENT) {
            return serde_json::from_str(payload).map(|problem| Some(Signal::Failed(problem)));
        }
        serde_json::from_str(payload).map(|frame| Some(Signal::Frame(frame)))
    }
}
