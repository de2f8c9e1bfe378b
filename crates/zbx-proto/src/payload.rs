//! JSON payloads carried inside frames.
//!
//! Sender requests are `{"request":"sender data","data":[...]}`. The server
//! replies with `{"response":"success","info":"processed: 1; failed: 0;
//! total: 1; seconds spent: 0.000055"}`; newer peers may send `info` as an
//! object with the same fields instead of the text form.
//!
//! Get requests and replies are plain text: the item key out, the value back.

use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ProtocolError;
use crate::item::ItemValue;

pub const SENDER_REQUEST: &str = "sender data";

/// Reply body of an agent that does not know the requested key.
pub const NOT_SUPPORTED: &str = "ZBX_NOTSUPPORTED";

static INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"processed:\s*(\d+);\s*failed:\s*(\d+);\s*total:\s*(\d+);\s*seconds spent:\s*(\d+(?:\.\d+)?)",
    )
    .expect("info pattern is valid")
});

#[derive(Serialize)]
struct SenderRequest<'a> {
    request: &'static str,
    data: &'a [ItemValue],
    #[serde(skip_serializing_if = "Option::is_none")]
    clock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ns: Option<i32>,
}

/// Serialize records into a sender request payload.
///
/// # Errors
///
/// Returns `ProtocolError::BadPayload` if a record cannot be serialized.
pub fn to_payload(records: &[ItemValue]) -> Result<Bytes, ProtocolError> {
    to_payload_at(records, None)
}

/// Like [`to_payload`], stamping the request itself with `(clock, ns)`.
///
/// # Errors
///
/// Returns `ProtocolError::BadPayload` if a record cannot be serialized.
pub fn to_payload_at(
    records: &[ItemValue],
    stamp: Option<(i64, i32)>,
) -> Result<Bytes, ProtocolError> {
    let request = SenderRequest {
        request: SENDER_REQUEST,
        data: records,
        clock: stamp.map(|(clock, _)| clock),
        ns: stamp.map(|(_, ns)| ns),
    };

    serde_json::to_vec(&request)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::bad_payload(e.to_string()))
}

/// Server acknowledgement for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    /// Seconds spent on the server, as the decimal string it reported.
    pub time: String,
    /// 1-based chunk ordinal.
    pub chunk: usize,
}

impl ChunkResponse {
    /// A chunk whose round-trip never completed: every record counts as failed.
    #[must_use]
    pub fn all_failed(chunk: usize, records: usize) -> Self {
        let records = records as u64;
        Self {
            processed: 0,
            failed: records,
            total: records,
            time: "0.000000".to_string(),
            chunk,
        }
    }
}

/// A parsed sender reply before it is tied to a local chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReply {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub time: String,
    /// Chunk ordinal echoed by the peer, if it sent one.
    pub chunk: Option<usize>,
}

impl SenderReply {
    /// Attach the reply to a chunk. The peer's ordinal wins over `local`.
    #[must_use]
    pub fn into_chunk_response(self, local: usize) -> ChunkResponse {
        let chunk = match self.chunk {
            Some(peer) if peer != local => {
                tracing::warn!(
                    "Peer answered chunk {} with ordinal {}, keeping the peer's",
                    local,
                    peer
                );
                peer
            }
            Some(peer) => peer,
            None => local,
        };

        ChunkResponse {
            processed: self.processed,
            failed: self.failed,
            total: self.total,
            time: self.time,
            chunk,
        }
    }
}

#[derive(Deserialize)]
struct RawReply {
    response: Option<String>,
    info: Option<JsonValue>,
    #[serde(default)]
    chunk: Option<usize>,
}

#[derive(Deserialize)]
struct StructuredInfo {
    processed: u64,
    failed: u64,
    total: u64,
    #[serde(alias = "seconds_spent", alias = "seconds spent")]
    time: JsonValue,
}

/// Parse a sender reply payload.
///
/// # Errors
///
/// Returns `ProtocolError::BadPayload` on malformed JSON, a non-success
/// response, or missing counters.
pub fn from_payload(bytes: &[u8]) -> Result<SenderReply, ProtocolError> {
    let raw: RawReply = serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::bad_payload(format!("invalid sender reply: {e}")))?;

    let info = raw
        .info
        .ok_or_else(|| ProtocolError::bad_payload("sender reply has no info field"))?;

    match raw.response.as_deref() {
        Some("success") => {}
        Some(other) => {
            return Err(ProtocolError::bad_payload(format!(
                "server responded \"{other}\": {}",
                info_text(&info)
            )));
        }
        None => return Err(ProtocolError::bad_payload("sender reply has no response field")),
    }

    let (processed, failed, total, time) = match info {
        JsonValue::String(text) => parse_info_text(&text)?,
        JsonValue::Object(_) => {
            let info: StructuredInfo = serde_json::from_value(info)
                .map_err(|e| ProtocolError::bad_payload(format!("invalid info object: {e}")))?;
            let time = match info.time {
                JsonValue::String(s) => s,
                JsonValue::Number(n) => n.to_string(),
                other => {
                    return Err(ProtocolError::bad_payload(format!(
                        "invalid time in info: {other}"
                    )));
                }
            };
            (info.processed, info.failed, info.total, time)
        }
        other => {
            return Err(ProtocolError::bad_payload(format!(
                "unexpected info type: {other}"
            )));
        }
    };

    Ok(SenderReply {
        processed,
        failed,
        total,
        time,
        chunk: raw.chunk,
    })
}

fn info_text(info: &JsonValue) -> String {
    match info {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_info_text(text: &str) -> Result<(u64, u64, u64, String), ProtocolError> {
    let bad = || ProtocolError::bad_payload(format!("unrecognised info: {text:?}"));
    let caps = INFO_RE.captures(text).ok_or_else(bad)?;
    let count = |i: usize| -> Result<u64, ProtocolError> {
        caps[i].parse().map_err(|_| bad())
    };

    Ok((count(1)?, count(2)?, count(3)?, caps[4].to_string()))
}

/// What an agent returned for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResponse {
    Value(String),
    /// The agent knows no such key, or cannot collect it.
    NotSupported { reason: Option<String> },
}

impl AgentResponse {
    /// Decode an agent reply body. Invalid UTF-8 is replaced, not rejected.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);

        let Some(rest) = text.strip_prefix(NOT_SUPPORTED) else {
            return Self::Value(text.into_owned());
        };

        if rest.is_empty() {
            return Self::NotSupported { reason: None };
        }

        match rest.strip_prefix('\0') {
            Some(reason) => {
                let reason = reason.trim_end_matches('\0');
                Self::NotSupported {
                    reason: (!reason.is_empty()).then(|| reason.to_string()),
                }
            }
            None => Self::Value(text.into_owned()),
        }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            Self::NotSupported { .. } => None,
        }
    }
}
