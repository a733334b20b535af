//! Frame codec.
//!
//! Wire format (JSON, camelCase):
//!
//! ```text
//! {"type":"update","noteId":"n1","senderId":"a1b2c3d4e5f67890","protocolVersion":1,"payload":{"bytes":[1,2,3]}}
//! ```
//!
//! Decoding runs in three stages, each with its own failure: the envelope
//! (field presence and types), the protocol version, then the payload shape
//! for the frame's type.

use super::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Hello,
    NoteList,
    StateVector,
    Update,
    Presence,
    Error,
}

impl FrameType {
    pub const ALL: [FrameType; 6] = [
        FrameType::Hello,
        FrameType::NoteList,
        FrameType::StateVector,
        FrameType::Update,
        FrameType::Presence,
        FrameType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Hello => "hello",
            FrameType::NoteList => "note_list",
            FrameType::StateVector => "state_vector",
            FrameType::Update => "update",
            FrameType::Presence => "presence",
            FrameType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid frame encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid frame envelope")]
    InvalidEnvelope,

    #[error("Unsupported protocol version: {received}")]
    VersionMismatch { received: String },

    #[error("Frame shape mismatch for {frame_type}")]
    PayloadMismatch { frame_type: FrameType },

    #[error("Cannot serialize invalid frame: {0}")]
    Unserializable(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;

// ==================== Payloads ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub open_note_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteListPayload {
    pub note_ids: Vec<String>,
}

/// Opaque CRDT bytes. Serialized as a JSON number array, each in `0..=255`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryPayload {
    pub bytes: Vec<u8>,
}

impl BinaryPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl From<&[u8]> for BinaryPayload {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

impl From<Vec<u8>> for BinaryPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// Editor viewport and cursor of the sender. All fields finite and >= 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub cursor_offset: f64,
    pub selection_size: f64,
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
    pub emitted_at: f64,
}

impl PresencePayload {
    pub fn is_valid(&self) -> bool {
        [
            self.cursor_offset,
            self.selection_size,
            self.scroll_top,
            self.scroll_height,
            self.client_height,
            self.emitted_at,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Hello(HelloPayload),
    NoteList(NoteListPayload),
    StateVector(BinaryPayload),
    Update(BinaryPayload),
    Presence(PresencePayload),
    Error(ErrorPayload),
}

impl FramePayload {
    pub fn frame_type(&self) -> FrameType {
        match self {
            FramePayload::Hello(_) => FrameType::Hello,
            FramePayload::NoteList(_) => FrameType::NoteList,
            FramePayload::StateVector(_) => FrameType::StateVector,
            FramePayload::Update(_) => FrameType::Update,
            FramePayload::Presence(_) => FrameType::Presence,
            FramePayload::Error(_) => FrameType::Error,
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            FramePayload::Presence(p) => p.is_valid(),
            _ => true,
        }
    }

    fn from_value(frame_type: FrameType, value: Value) -> Result<Self> {
        let mismatch = |_| FrameError::PayloadMismatch { frame_type };
        let payload = match frame_type {
            FrameType::Hello => FramePayload::Hello(serde_json::from_value(value).map_err(mismatch)?),
            FrameType::NoteList => {
                FramePayload::NoteList(serde_json::from_value(value).map_err(mismatch)?)
            }
            FrameType::StateVector => {
                FramePayload::StateVector(serde_json::from_value(value).map_err(mismatch)?)
            }
            FrameType::Update => FramePayload::Update(serde_json::from_value(value).map_err(mismatch)?),
            FrameType::Presence => {
                FramePayload::Presence(serde_json::from_value(value).map_err(mismatch)?)
            }
            FrameType::Error => FramePayload::Error(serde_json::from_value(value).map_err(mismatch)?),
        };
        if !payload.is_valid() {
            return Err(FrameError::PayloadMismatch { frame_type });
        }
        Ok(payload)
    }

    fn to_value(&self) -> std::result::Result<Value, serde_json::Error> {
        match self {
            FramePayload::Hello(p) => serde_json::to_value(p),
            FramePayload::NoteList(p) => serde_json::to_value(p),
            FramePayload::StateVector(p) | FramePayload::Update(p) => serde_json::to_value(p),
            FramePayload::Presence(p) => serde_json::to_value(p),
            FramePayload::Error(p) => serde_json::to_value(p),
        }
    }
}

// ==================== Frames ====================

/// Untyped frame as it appears on the wire. The payload is not checked
/// against the frame type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub note_id: String,
    pub sender_id: String,
    pub protocol_version: u32,
    pub payload: Value,
}

/// Build an untyped frame stamped with the current protocol version.
pub fn create_frame(
    frame_type: FrameType,
    note_id: impl Into<String>,
    sender_id: impl Into<String>,
    payload: Value,
) -> WireFrame {
    WireFrame {
        frame_type,
        note_id: note_id.into(),
        sender_id: sender_id.into(),
        protocol_version: PROTOCOL_VERSION,
        payload,
    }
}

/// A frame whose payload matches its type.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub note_id: String,
    pub sender_id: String,
    pub protocol_version: u32,
    pub payload: FramePayload,
}

impl Frame {
    pub fn new(note_id: impl Into<String>, sender_id: impl Into<String>, payload: FramePayload) -> Self {
        Self {
            note_id: note_id.into(),
            sender_id: sender_id.into(),
            protocol_version: PROTOCOL_VERSION,
            payload,
        }
    }

    pub fn hello(note_id: impl Into<String>, sender_id: impl Into<String>, open_note_ids: Vec<String>) -> Self {
        Self::new(note_id, sender_id, FramePayload::Hello(HelloPayload { open_note_ids }))
    }

    pub fn note_list(note_id: impl Into<String>, sender_id: impl Into<String>, note_ids: Vec<String>) -> Self {
        Self::new(note_id, sender_id, FramePayload::NoteList(NoteListPayload { note_ids }))
    }

    pub fn state_vector(note_id: impl Into<String>, sender_id: impl Into<String>, state_vector: &[u8]) -> Self {
        Self::new(note_id, sender_id, FramePayload::StateVector(state_vector.into()))
    }

    pub fn update(note_id: impl Into<String>, sender_id: impl Into<String>, update: &[u8]) -> Self {
        Self::new(note_id, sender_id, FramePayload::Update(update.into()))
    }

    pub fn presence(note_id: impl Into<String>, sender_id: impl Into<String>, presence: PresencePayload) -> Self {
        Self::new(note_id, sender_id, FramePayload::Presence(presence))
    }

    pub fn error(
        note_id: impl Into<String>,
        sender_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            note_id,
            sender_id,
            FramePayload::Error(ErrorPayload {
                code: code.into(),
                message: message.into(),
            }),
        )
    }

    pub fn frame_type(&self) -> FrameType {
        self.payload.frame_type()
    }

    pub fn to_wire(&self) -> Result<WireFrame> {
        let payload = self
            .payload
            .to_value()
            .map_err(|e| FrameError::Unserializable(e.to_string()))?;
        Ok(WireFrame {
            frame_type: self.frame_type(),
            note_id: self.note_id.clone(),
            sender_id: self.sender_id.clone(),
            protocol_version: self.protocol_version,
            payload,
        })
    }
}

// ==================== Codec ====================

/// Raw input accepted by [`decode`].
#[derive(Debug, Clone)]
pub enum RawFrame<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
    Value(Value),
}

impl<'a> From<&'a str> for RawFrame<'a> {
    fn from(text: &'a str) -> Self {
        RawFrame::Text(text)
    }
}

impl<'a> From<&'a [u8]> for RawFrame<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        RawFrame::Binary(bytes)
    }
}

impl From<Value> for RawFrame<'_> {
    fn from(value: Value) -> Self {
        RawFrame::Value(value)
    }
}

/// Envelope check only: `noteId`/`senderId` strings, numeric
/// `protocolVersion`, a known `type`, and a `payload` key (null counts).
pub fn is_valid_frame(input: &Value) -> bool {
    input
        .as_object()
        .is_some_and(|obj| envelope_type(obj).is_some() && obj.contains_key("payload"))
}

/// Serialize a typed frame to JSON text. Fails for frames that would not
/// decode, such as a foreign protocol version or negative presence fields.
pub fn serialize(frame: &Frame) -> Result<String> {
    if frame.protocol_version != PROTOCOL_VERSION {
        return Err(FrameError::Unserializable(format!(
            "protocol version {}",
            frame.protocol_version
        )));
    }
    if !frame.payload.is_valid() {
        return Err(FrameError::Unserializable(format!(
            "{} payload out of range",
            frame.frame_type()
        )));
    }
    serde_json::to_string(&frame.to_wire()?).map_err(|e| FrameError::Unserializable(e.to_string()))
}

pub fn decode<'a>(raw: impl Into<RawFrame<'a>>) -> Result<Frame> {
    let value = match raw.into() {
        RawFrame::Text(text) => parse_json(text)?,
        RawFrame::Binary(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| FrameError::InvalidEncoding(format!("invalid utf-8: {e}")))?;
            parse_json(text)?
        }
        RawFrame::Value(value) => value,
    };
    decode_value(value)
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| FrameError::InvalidEncoding(format!("invalid json frame: {e}")))
}

fn decode_value(value: Value) -> Result<Frame> {
    let Value::Object(mut obj) = value else {
        return Err(FrameError::InvalidEnvelope);
    };
    let frame_type = envelope_type(&obj).ok_or(FrameError::InvalidEnvelope)?;
    let payload = obj.remove("payload").ok_or(FrameError::InvalidEnvelope)?;

    let version = obj
        .get("protocolVersion")
        .ok_or(FrameError::InvalidEnvelope)?;
    // 1 and 1.0 are the same JSON number
    if version.as_f64() != Some(f64::from(PROTOCOL_VERSION)) {
        return Err(FrameError::VersionMismatch {
            received: version.to_string(),
        });
    }

    let payload = FramePayload::from_value(frame_type, payload)?;
    Ok(Frame {
        note_id: string_field(&obj, "noteId"),
        sender_id: string_field(&obj, "senderId"),
        protocol_version: PROTOCOL_VERSION,
        payload,
    })
}

/// Frame type of a well-formed envelope, ignoring the payload key.
fn envelope_type(obj: &Map<String, Value>) -> Option<FrameType> {
    obj.get("noteId")?.as_str()?;
    obj.get("senderId")?.as_str()?;
    if !obj.get("protocolVersion")?.is_number() {
        return None;
    }
    FrameType::parse(obj.get("type")?.as_str()?)
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}
