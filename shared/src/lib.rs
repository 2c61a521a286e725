use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const TAG_DISTANCE: f32 = 3.0;
/// Largest accepted frame payload, not counting the trailing newline.
pub const MAX_FRAME_BYTES: usize = 1023;
/// `server-id` value in a tag notice telling the recipient they are now It.
pub const YOU_ARE_IT: i64 = -1;

/// Server-assigned player identity. Starts at 1 and only ever grows.
pub type PlayerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ORIGIN: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message has no position field")]
    MissingPosition,
    #[error("invalid position: {0}")]
    InvalidPosition(String),
    #[error("unknown message type {0}")]
    UnknownKind(u8),
    #[error("{0} message without position")]
    IncompleteMessage(&'static str),
}

/// Messages accepted from clients, validated once at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientMessage {
    Position(Vec3),
}

impl ClientMessage {
    /// Parses one inbound frame. Anything other than an object carrying a
    /// `position` array of exactly three finite numbers is rejected.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(frame)?;
        let position = value.get("position").ok_or(DecodeError::MissingPosition)?;
        let items = position
            .as_array()
            .ok_or_else(|| DecodeError::InvalidPosition(format!("expected array, got {position}")))?;
        if items.len() != 3 {
            return Err(DecodeError::InvalidPosition(format!(
                "expected 3 components, got {}",
                items.len()
            )));
        }

        let mut coords = [0.0f32; 3];
        for (slot, item) in coords.iter_mut().zip(items) {
            let n = item
                .as_f64()
                .ok_or_else(|| DecodeError::InvalidPosition(format!("{item} is not a number")))?;
            let n = n as f32;
            if !n.is_finite() {
                return Err(DecodeError::InvalidPosition(format!("{item} is out of range")));
            }
            *slot = n;
        }

        Ok(ClientMessage::Position(coords.into()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let ClientMessage::Position(position) = self;
        let mut bytes = serde_json::to_vec(&serde_json::json!({ "position": position }))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Messages relayed from the server to clients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMessage", try_from = "WireMessage")]
pub enum ServerMessage {
    PositionUpdate { server_id: i64, position: Vec3 },
    PlayerLeft { server_id: i64 },
    /// `server_id` is [`YOU_ARE_IT`] when sent to the newly tagged player.
    PlayerTagged { server_id: i64 },
}

impl ServerMessage {
    pub fn position_update(id: PlayerId, position: Vec3) -> Self {
        ServerMessage::PositionUpdate {
            server_id: i64::from(id),
            position,
        }
    }

    pub fn player_left(id: PlayerId) -> Self {
        ServerMessage::PlayerLeft {
            server_id: i64::from(id),
        }
    }

    pub fn player_tagged(id: PlayerId) -> Self {
        ServerMessage::PlayerTagged {
            server_id: i64::from(id),
        }
    }

    pub fn you_are_it() -> Self {
        ServerMessage::PlayerTagged {
            server_id: YOU_ARE_IT,
        }
    }

    /// Serializes the message as a single newline-terminated JSON frame.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    PositionUpdate = 0,
    PlayerLeft = 1,
    PlayerTagged = 2,
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(MessageKind::PositionUpdate),
            1 => Ok(MessageKind::PlayerLeft),
            2 => Ok(MessageKind::PlayerTagged),
            other => Err(de::Error::custom(DecodeError::UnknownKind(other))),
        }
    }
}

// On-the-wire shape: {"type": <kind>, "server-id": <id>, "position": [x, y, z]?}
#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(rename = "server-id")]
    server_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Vec3>,
}

impl From<ServerMessage> for WireMessage {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::PositionUpdate {
                server_id,
                position,
            } => WireMessage {
                kind: MessageKind::PositionUpdate,
                server_id,
                position: Some(position),
            },
            ServerMessage::PlayerLeft { server_id } => WireMessage {
                kind: MessageKind::PlayerLeft,
                server_id,
                position: None,
            },
            ServerMessage::PlayerTagged { server_id } => WireMessage {
                kind: MessageKind::PlayerTagged,
                server_id,
                position: None,
            },
        }
    }
}

impl TryFrom<WireMessage> for ServerMessage {
    type Error = DecodeError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let server_id = wire.server_id;
        match wire.kind {
            MessageKind::PositionUpdate => {
                let position = wire
                    .position
                    .ok_or(DecodeError::IncompleteMessage("position update"))?;
                Ok(ServerMessage::PositionUpdate {
                    server_id,
                    position,
                })
            }
            MessageKind::PlayerLeft => Ok(ServerMessage::PlayerLeft { server_id }),
            MessageKind::PlayerTagged => Ok(ServerMessage::PlayerTagged { server_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vec3_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 0.0);
        assert_approx_eq!(a.distance(&b), 5.0, 1e-6);
        assert_approx_eq!(b.distance(&a), 5.0, 1e-6);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_vec3_default_is_origin() {
        assert_eq!(Vec3::default(), Vec3::ORIGIN);
    }

    #[test]
    fn test_decode_position() {
        let msg = ClientMessage::decode(br#"{"position":[1,2.5,-3]}"#).unwrap();
        assert_eq!(msg, ClientMessage::Position(Vec3::new(1.0, 2.5, -3.0)));
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let msg = ClientMessage::decode(br#"{"name":"bob","position":[0,0,1]}"#).unwrap();
        assert_eq!(msg, ClientMessage::Position(Vec3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = ClientMessage::decode(b"{\"position\":[1,2").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_missing_position() {
        let err = ClientMessage::decode(br#"{"velocity":[1,2,3]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingPosition));

        let err = ClientMessage::decode(b"42").unwrap_err();
        assert!(matches!(err, DecodeError::MissingPosition));
    }

    #[test]
    fn test_decode_rejects_bad_positions() {
        let bad = [
            br#"{"position":"here"}"#.as_slice(),
            br#"{"position":[1,2]}"#.as_slice(),
            br#"{"position":[1,2,3,4]}"#.as_slice(),
            br#"{"position":[1,"2",3]}"#.as_slice(),
            br#"{"position":[1,null,3]}"#.as_slice(),
            br#"{"position":[1e300,0,0]}"#.as_slice(),
        ];

        for frame in bad {
            let err = ClientMessage::decode(frame).unwrap_err();
            assert!(
                matches!(err, DecodeError::InvalidPosition(_)),
                "expected invalid position for {}",
                String::from_utf8_lossy(frame)
            );
        }
    }

    #[test]
    fn test_position_update_wire_format() {
        let msg = ServerMessage::position_update(2, Vec3::new(1.0, 0.0, 0.0));
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], 0);
        assert_eq!(value["server-id"], 2);
        assert_eq!(value["position"], serde_json::json!([1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_player_left_wire_format() {
        let bytes = ServerMessage::player_left(7).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["server-id"], 7);
        assert!(value.get("position").is_none());
    }

    #[test]
    fn test_you_are_it_sentinel() {
        let bytes = ServerMessage::you_are_it().encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], 2);
        assert_eq!(value["server-id"], -1);
    }

    #[test]
    fn test_server_message_decode() {
        let msg = ServerMessage::decode(br#"{"type":2,"server-id":4}"#).unwrap();
        assert_eq!(msg, ServerMessage::player_tagged(4));

        let msg = ServerMessage::decode(br#"{"type":0,"server-id":1,"position":[1,2,3]}"#).unwrap();
        assert_eq!(msg, ServerMessage::position_update(1, Vec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_server_message_decode_rejects_unknown_kind() {
        assert!(ServerMessage::decode(br#"{"type":9,"server-id":4}"#).is_err());
    }

    #[test]
    fn test_server_message_decode_requires_position_for_updates() {
        assert!(ServerMessage::decode(br#"{"type":0,"server-id":4}"#).is_err());
    }

    #[test]
    fn test_client_message_encode_is_decodable() {
        let msg = ClientMessage::Position(Vec3::new(-1.5, 2.0, 8.25));
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let decoded = ClientMessage::decode(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(decoded, msg);
    }
}
