/// Wire codec for the `{type, data}` message envelope.
///
/// Decoding is two-stage: `decode_frame` only checks the envelope shape
/// (both keys present on a JSON object), then `classify` maps recognized
/// types onto `ServerEvent`. Type-specific field validation happens at the
/// second stage; the first stage stays schema-free on purpose.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::messages::{ClientCommand, ServerEvent};

const RAW_PREVIEW_MAX: usize = 256;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame {raw:?}: {source}")]
    MalformedFrame {
        raw: String,
        source: serde_json::Error,
    },
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        source: serde_json::Error,
    },
    #[error("failed to encode command: {source}")]
    EncodeFailed { source: serde_json::Error },
}

/// One raw message envelope. Missing `type` or `data` fails decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    serde_json::from_str(text).map_err(|source| CodecError::MalformedFrame {
        raw: preview(text),
        source,
    })
}

/// Decode raw frame text straight into a typed event.
pub fn decode_event(text: &str) -> Result<ServerEvent, CodecError> {
    classify(decode_frame(text)?)
}

pub fn classify(frame: Frame) -> Result<ServerEvent, CodecError> {
    let Frame { kind, data } = frame;
    let event = match kind.as_str() {
        "LS" => serde_json::from_value(data).map(ServerEvent::Ls),
        "RUNNING" => serde_json::from_value(data).map(ServerEvent::Running),
        "STDOUT" => serde_json::from_value(data).map(ServerEvent::Stdout),
        "STDERR" => serde_json::from_value(data).map(ServerEvent::Stderr),
        "EXIT" => serde_json::from_value(data).map(ServerEvent::Exit),
        "INSPECT" => Ok(ServerEvent::Inspect(data)),
        "directory_modified" => Ok(ServerEvent::DirectoryModified),
        "file_modified" => serde_json::from_value(data).map(ServerEvent::FileModified),
        other => {
            return Ok(ServerEvent::Unknown {
                kind: other.to_string(),
            });
        }
    };
    event.map_err(|source| CodecError::InvalidPayload { kind, source })
}

pub fn encode_command(command: &ClientCommand) -> Result<String, CodecError> {
    serde_json::to_string(command).map_err(|source| CodecError::EncodeFailed { source })
}

fn preview(text: &str) -> String {
    if text.len() <= RAW_PREVIEW_MAX {
        return text.to_string();
    }
    let mut end = RAW_PREVIEW_MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
