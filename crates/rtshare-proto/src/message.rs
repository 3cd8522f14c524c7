//! Request and response messages.
//!
//! Field names match the JSON keys used by browser clients. `payload` on a
//! [`Request`] is overloaded: it names the acting user for `join`/`leave`,
//! the target user for forwards and file sends, and the offering user for
//! `acceptFile`/`denyFile`.
//!
//! Binary file contents travel as standard base64 text; an empty payload is
//! written as `null`.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{FRAME_DELIMITER, errors::Result};

/// `type` of server-initiated liveness probes.
pub const HEARTBEAT_TYPE: &str = "heartbeat";

/// Request types understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Bind an identifier to the sending connection
    Join,
    /// Release the sender's identifier
    Leave,
    /// WebRTC session offer
    Offer,
    /// WebRTC session answer
    Answer,
    /// ICE candidate
    Candidate,
    /// Plain text message
    SendText,
    /// File transfer (consent-gated)
    SendFile,
    /// Receiver accepts a pending file transfer
    AcceptFile,
    /// Receiver declines a pending file transfer
    DenyFile,
}

impl MessageKind {
    /// Every kind, in wire order.
    pub const ALL: [Self; 9] = [
        Self::Join,
        Self::Leave,
        Self::Offer,
        Self::Answer,
        Self::Candidate,
        Self::SendText,
        Self::SendFile,
        Self::AcceptFile,
        Self::DenyFile,
    ];

    /// Parse the `type` field. `None` for anything unrecognized.
    pub fn from_type(ty: &str) -> Option<Self> {
        Some(match ty {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "offer" => Self::Offer,
            "answer" => Self::Answer,
            "candidate" => Self::Candidate,
            "sendText" => Self::SendText,
            "sendFile" => Self::SendFile,
            "acceptFile" => Self::AcceptFile,
            "denyFile" => Self::DenyFile,
            _ => return None,
        })
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::SendText => "sendText",
            Self::SendFile => "sendFile",
            Self::AcceptFile => "acceptFile",
            Self::DenyFile => "denyFile",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome or event carried by a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    /// Request succeeded
    Ok,
    /// Request failed; see `message`
    Error,
    /// Broadcast: a user joined (`data` is the id)
    UserJoin,
    /// Broadcast: a user left (`data` is the id)
    UserLeft,
    /// Relayed signaling or text from `sender`
    Forward,
    /// File contents from `sender`
    DataSend,
    /// `sender` asks to send `filename`
    RequestSendFile,
    /// Heartbeat probe
    Ping,
}

/// Message sent by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Request type; see [`MessageKind`]
    #[serde(rename = "type", deserialize_with = "null_as_empty")]
    pub kind: String,
    /// Acting, target, or offering user id depending on `kind`
    #[serde(deserialize_with = "null_as_empty")]
    pub payload: String,
    /// Signaling body or text message
    #[serde(deserialize_with = "null_as_empty")]
    pub text: String,
    /// File name for `sendFile`
    #[serde(deserialize_with = "null_as_empty")]
    pub filename: String,
    /// File contents for `sendFile`
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl Request {
    /// Request of `kind` with the given payload.
    pub fn new(kind: MessageKind, payload: impl Into<String>) -> Self {
        Self { kind: kind.as_str().to_owned(), payload: payload.into(), ..Self::default() }
    }

    /// Set the text body.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Attach a file.
    #[must_use]
    pub fn with_file(mut self, filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.filename = filename.into();
        self.bytes = bytes.into();
        self
    }

    /// Parsed `kind`, `None` if unrecognized.
    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::from_type(&self.kind)
    }

    /// Decode one frame (without delimiter).
    pub fn decode(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }

    /// Encode as a delimited frame.
    pub fn encode(&self) -> Result<Bytes> {
        encode_frame(self)
    }
}

/// Message sent by the relay: direct replies, forwards, and broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Echoed request type, or `heartbeat`/`leave` for server-initiated frames
    #[serde(rename = "type")]
    pub kind: String,
    /// Outcome or event
    pub status: Status,
    /// Human-readable detail
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    /// Multipurpose body: JSON id lists, user ids, relayed text
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: String,
    /// File name for file frames
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filename: String,
    /// Identifier of the user the frame originates from
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sender: String,
    /// File contents
    #[serde(default, with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// Resolved client IP, diagnostic only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Response {
    /// Empty response with the given type and status.
    pub fn new(kind: impl Into<String>, status: Status) -> Self {
        Self {
            kind: kind.into(),
            status,
            message: String::new(),
            data: String::new(),
            filename: String::new(),
            sender: String::new(),
            bytes: Vec::new(),
            ip: None,
        }
    }

    /// Successful reply to `kind`.
    pub fn ok(kind: impl Into<String>) -> Self {
        Self::new(kind, Status::Ok)
    }

    /// Failed reply to `kind` with a reason.
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(kind, Status::Error).with_message(message)
    }

    /// Presence broadcast for a new binding.
    pub fn user_joined(user_id: &str) -> Self {
        Self::new(MessageKind::Join.as_str(), Status::UserJoin)
            .with_message(format!("User {user_id} joined"))
            .with_data(user_id)
    }

    /// Presence broadcast for a released binding.
    pub fn user_left(user_id: &str) -> Self {
        Self::new(MessageKind::Leave.as_str(), Status::UserLeft)
            .with_message(format!("User {user_id} left"))
            .with_data(user_id)
    }

    /// Liveness probe.
    pub fn heartbeat() -> Self {
        Self::new(HEARTBEAT_TYPE, Status::Ping)
    }

    /// Set `message`.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set `data`.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Set `sender`.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Set `filename` and `bytes`.
    #[must_use]
    pub fn with_file(mut self, filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.filename = filename.into();
        self.bytes = bytes.into();
        self
    }

    /// Set `ip`.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Decode one frame (without delimiter).
    pub fn decode(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }

    /// Encode as a delimited frame.
    pub fn encode(&self) -> Result<Bytes> {
        encode_frame(self)
    }
}

fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes> {
    let mut buf = BytesMut::new().writer();
    serde_json::to_writer(&mut buf, message)?;
    let mut buf = buf.into_inner();
    buf.put_u8(FRAME_DELIMITER);
    Ok(buf.freeze())
}

/// `null` reads as an empty string.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if bytes.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&STANDARD.encode(bytes))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
