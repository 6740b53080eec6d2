//! JSON wire protocol for presence synchronization.
//!
//! Every frame is a WebSocket text message holding one JSON object tagged by
//! `"type"`:
//! ```text
//!  client ──► relay    {"type":"state","position":[x,y,z],"rotation":[x,y,z]}
//!
//!  relay  ──► client   {"type":"welcome","id","name","color","participants":[..]}
//!                      {"type":"join","id","name","color"}
//!                      {"type":"state","id","state":{"position","rotation"}}
//!                      {"type":"leave","id"}
//! ```
//!
//! Inbound client frames are parsed leniently first and validated second, so
//! that every way a report can be malformed maps to one [`ProtocolError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque participant identifier assigned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for the `seq`-th admission of a relay process.
    pub fn from_sequence(seq: u64) -> Self {
        Self(seq.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position and orientation of a participant.
///
/// Rotation holds Euler angles in radians, applied in XYZ order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
}

impl Transform {
    /// Spawn point: standing eye height at the origin, facing -Z.
    pub const SPAWN: Transform = Transform {
        position: [0.0, 1.6, 0.0],
        rotation: [0.0, 0.0, 0.0],
    };

    pub fn new(position: [f32; 3], rotation: [f32; 3]) -> Self {
        Self { position, rotation }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::SPAWN
    }
}

/// Cosmetic attributes assigned by the relay at admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayIdentity {
    pub name: String,
    /// Packed `0xRRGGBB`.
    pub color: u32,
}

impl DisplayIdentity {
    pub fn new(name: impl Into<String>, color: u32) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }
}

/// One pre-existing participant listed in a welcome snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub name: String,
    pub color: u32,
    pub state: Transform,
}

impl ParticipantSnapshot {
    pub fn identity(&self) -> DisplayIdentity {
        DisplayIdentity::new(self.name.clone(), self.color)
    }
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once to a newly admitted client.
    Welcome {
        id: ParticipantId,
        name: String,
        color: u32,
        participants: Vec<ParticipantSnapshot>,
    },
    /// A new participant was admitted. Carries no state.
    Join {
        id: ParticipantId,
        name: String,
        color: u32,
    },
    /// A participant reported a new transform.
    State { id: ParticipantId, state: Transform },
    /// A participant disconnected.
    Leave { id: ParticipantId },
}

impl ServerMessage {
    pub fn welcome(
        id: ParticipantId,
        identity: &DisplayIdentity,
        participants: Vec<ParticipantSnapshot>,
    ) -> Self {
        Self::Welcome {
            id,
            name: identity.name.clone(),
            color: identity.color,
            participants,
        }
    }

    pub fn join(id: ParticipantId, identity: &DisplayIdentity) -> Self {
        Self::Join {
            id,
            name: identity.name.clone(),
            color: identity.color,
        }
    }

    pub fn state(id: ParticipantId, state: Transform) -> Self {
        Self::State { id, state }
    }

    pub fn leave(id: ParticipantId) -> Self {
        Self::Leave { id }
    }

    /// Wire name of this event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Join { .. } => "join",
            Self::State { .. } => "state",
            Self::Leave { .. } => "leave",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Periodic report of the local transform.
    State(Transform),
}

/// Lenient shape of an inbound client frame, validated into [`ClientMessage`].
#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    position: Option<Vec<f32>>,
    #[serde(default)]
    rotation: Option<Vec<f32>>,
}

impl ClientMessage {
    pub fn state(transform: Transform) -> Self {
        Self::State(transform)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parse and validate a frame received from a client.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        match raw.kind.as_deref() {
            Some("state") => {
                let position = vec3("position", raw.position)?;
                let rotation = vec3("rotation", raw.rotation)?;
                Ok(Self::State(Transform { position, rotation }))
            }
            Some(other) => Err(ProtocolError::UnsupportedKind(other.to_string())),
            None => Err(ProtocolError::MissingField("type")),
        }
    }
}

fn vec3(field: &'static str, value: Option<Vec<f32>>) -> Result<[f32; 3], ProtocolError> {
    let values = value.ok_or(ProtocolError::MissingField(field))?;
    let vector = <[f32; 3]>::try_from(values.as_slice()).map_err(|_| ProtocolError::WrongArity {
        field,
        len: values.len(),
    })?;
    // Out-of-range numbers parse to infinity, which JSON cannot carry back out.
    if vector.iter().all(|v| v.is_finite()) {
        Ok(vector)
    } else {
        Err(ProtocolError::NonFinite { field })
    }
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unsupported message type '{0}'")]
    UnsupportedKind(String),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' must have 3 components, got {len}")]
    WrongArity { field: &'static str, len: usize },
    #[error("field '{field}' has a component outside the f32 range")]
    NonFinite { field: &'static str },
    #[error("sender {0} is not registered")]
    UnknownSender(ParticipantId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_state_report() {
        let msg = ClientMessage::parse(r#"{"type":"state","position":[1,2,3],"rotation":[0,0.5,0]}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::State(Transform::new([1.0, 2.0, 3.0], [0.0, 0.5, 0.0]))
        );
    }

    #[test]
    fn test_client_state_wire_shape() {
        let encoded = ClientMessage::state(Transform::new([1.0, 2.0, 3.0], [0.0; 3]))
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({"type": "state", "position": [1.0, 2.0, 3.0], "rotation": [0.0, 0.0, 0.0]})
        );
        // What a client encodes, the relay accepts.
        assert!(ClientMessage::parse(&encoded).is_ok());
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        let err = ClientMessage::parse(r#"{"type":"state","position":[1,2],"rotation":[0,0,0]}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::WrongArity { field: "position", len: 2 }));

        let err = ClientMessage::parse(r#"{"type":"state","position":[1,2,3],"rotation":[0,0,0,1]}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::WrongArity { field: "rotation", len: 4 }));
    }

    #[test]
    fn test_parse_rejects_out_of_range_components() {
        let err = ClientMessage::parse(r#"{"type":"state","position":[1e39,0,0],"rotation":[0,0,0]}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NonFinite { field: "position" }));

        let err = ClientMessage::parse(r#"{"type":"state","position":[0,0,0],"rotation":[0,-1e39,0]}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NonFinite { field: "rotation" }));

        // Large but representable values still pass.
        assert!(ClientMessage::parse(r#"{"type":"state","position":[3e38,0,0],"rotation":[0,0,0]}"#).is_ok());
    }

    #[test]
    fn test_parse_rejects_missing_arrays() {
        let err = ClientMessage::parse(r#"{"type":"state","position":[1,2,3]}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("rotation")));

        let err = ClientMessage::parse(r#"{"position":[1,2,3],"rotation":[0,0,0]}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("type")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            ClientMessage::parse("not json").unwrap_err(),
            ProtocolError::Malformed(_)
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"state","position":["a",2,3],"rotation":[0,0,0]}"#)
                .unwrap_err(),
            ProtocolError::Malformed(_)
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"join"}"#).unwrap_err(),
            ProtocolError::UnsupportedKind(kind) if kind == "join"
        ));
    }

    #[test]
    fn test_welcome_wire_shape() {
        let msg = ServerMessage::welcome(
            ParticipantId::new("2"),
            &DisplayIdentity::new("Blue", 0x1E88E5),
            vec![ParticipantSnapshot {
                id: ParticipantId::new("1"),
                name: "Red".into(),
                color: 0xE53935,
                state: Transform::new([1.0, 2.0, 3.0], [0.0; 3]),
            }],
        );
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "welcome",
                "id": "2",
                "name": "Blue",
                "color": 0x1E88E5,
                "participants": [{
                    "id": "1",
                    "name": "Red",
                    "color": 0xE53935,
                    "state": {"position": [1.0, 2.0, 3.0], "rotation": [0.0, 0.0, 0.0]}
                }]
            })
        );
    }

    #[test]
    fn test_relayed_state_and_leave_shape() {
        let state = ServerMessage::state(ParticipantId::new("7"), Transform::SPAWN);
        let value: serde_json::Value = serde_json::from_str(&state.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["id"], "7");
        assert_eq!(value["state"]["position"][1].as_f64().unwrap() as f32, 1.6);

        let leave = ServerMessage::decode(r#"{"type":"leave","id":"7"}"#).unwrap();
        assert_eq!(leave, ServerMessage::leave(ParticipantId::new("7")));
        assert_eq!(leave.kind(), "leave");
    }

    #[test]
    fn test_decode_join_from_text() {
        let msg = ServerMessage::decode(r#"{"type":"join","id":"3","name":"Player 3","color":255}"#)
            .unwrap();
        assert_eq!(
            msg,
            ServerMessage::join(ParticipantId::new("3"), &DisplayIdentity::new("Player 3", 255))
        );
    }

    #[test]
    fn test_participant_id_from_sequence() {
        assert_eq!(ParticipantId::from_sequence(12).as_str(), "12");
        assert_eq!(ParticipantId::from_sequence(12).to_string(), "12");
    }
}
