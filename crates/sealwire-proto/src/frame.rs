//! The JSON envelope carried in every WebSocket text frame.

use serde::{Deserialize, Serialize};

use crate::{errors::ProtoError, kind::FrameKind, metadata::WsMetadata};

/// One wire message.
///
/// `value` and `nonce` are opaque byte strings, base64-encoded in JSON and
/// nullable. What `value` holds depends on [`FrameKind`]: an encapsulation
/// key, AEAD ciphertext, a room name, or JSON-serialized room/user lists.
/// `nonce` is only non-null for `encrypted_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// What this frame carries.
    #[serde(rename = "type")]
    pub kind: FrameKind,

    /// Opaque payload bytes, or null.
    #[serde(with = "base64_bytes")]
    pub value: Option<Vec<u8>>,

    /// AEAD nonce for `encrypted_message`, null otherwise.
    #[serde(with = "base64_bytes")]
    pub nonce: Option<Vec<u8>>,

    /// Sender identity at emit time.
    pub metadata: WsMetadata,
}

impl Frame {
    /// A frame with no payload.
    pub fn new(kind: FrameKind, metadata: WsMetadata) -> Self {
        Self { kind, value: None, nonce: None, metadata }
    }

    /// A frame carrying plaintext payload bytes (no nonce).
    pub fn with_value(kind: FrameKind, value: impl Into<Vec<u8>>, metadata: WsMetadata) -> Self {
        Self { kind, value: Some(value.into()), nonce: None, metadata }
    }

    /// An `encrypted_message` frame carrying ciphertext and its nonce.
    pub fn encrypted(ciphertext: Vec<u8>, nonce: Vec<u8>, metadata: WsMetadata) -> Self {
        Self {
            kind: FrameKind::EncryptedMessage,
            value: Some(ciphertext),
            nonce: Some(nonce),
            metadata,
        }
    }

    /// Serialize to the JSON text that goes on the wire.
    ///
    /// # Errors
    ///
    /// - `ProtoError::Encode` if serialization fails
    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(ProtoError::Encode)
    }

    /// Parse one wire message.
    ///
    /// An unknown `type` tag is not an error; it parses to
    /// [`FrameKind::Unknown`]. Missing fields, malformed JSON, and invalid
    /// base64 are.
    ///
    /// # Errors
    ///
    /// - `ProtoError::Decode` on malformed input
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(text).map_err(ProtoError::Decode)
    }

    /// `value` interpreted as UTF-8 text. Empty string when null.
    pub fn value_text(&self) -> String {
        self.value.as_deref().map(|v| String::from_utf8_lossy(v).into_owned()).unwrap_or_default()
    }
}

/// Serde adapter: `Option<Vec<u8>>` as a nullable base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| STANDARD.decode(text).map_err(de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> WsMetadata {
        WsMetadata {
            user_id: "u-42".to_string(),
            username: "Golden Eagle".to_string(),
            color: "#FFE119".to_string(),
            current_room_id: "lobby".to_string(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = Frame::encrypted(vec![1, 2, 3, 255], vec![0; 12], metadata());

        let text = frame.encode().unwrap();
        let parsed = Frame::decode(&text).unwrap();

        assert_eq!(parsed, frame);
    }

    #[test]
    fn value_and_nonce_are_base64_strings() {
        let frame = Frame::encrypted(b"ciphertext".to_vec(), vec![7; 12], metadata());

        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "encrypted_message");
        assert!(json["value"].is_string());
        assert!(json["nonce"].is_string());
    }

    #[test]
    fn null_value_and_nonce_decode_to_none() {
        let text = r##"{"type":"user_left_chat","value":null,"nonce":null,
            "metadata":{"userId":"u","username":"n","color":"#000000","currentRoomId":"lobby"}}"##;

        let frame = Frame::decode(text).unwrap();
        assert_eq!(frame.kind, FrameKind::UserLeftChat);
        assert!(frame.value.is_none());
        assert!(frame.nonce.is_none());
    }

    #[test]
    fn unknown_tag_decodes_instead_of_failing() {
        let text = r##"{"type":"group_call_offer","value":null,"nonce":null,
            "metadata":{"userId":"u","username":"n","color":"#000000","currentRoomId":"lobby"}}"##;

        let frame = Frame::decode(text).unwrap();
        assert_eq!(frame.kind, FrameKind::Unknown("group_call_offer".to_string()));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(matches!(Frame::decode("{\"type\":"), Err(ProtoError::Decode(_))));
        assert!(matches!(Frame::decode("not json at all"), Err(ProtoError::Decode(_))));
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let text = r##"{"type":"encrypted_message","value":"!!not-base64!!","nonce":null,
            "metadata":{"userId":"u","username":"n","color":"#000000","currentRoomId":"lobby"}}"##;

        assert!(matches!(Frame::decode(text), Err(ProtoError::Decode(_))));
    }

    #[test]
    fn value_text_reads_utf8_payload() {
        let frame = Frame::with_value(FrameKind::JoinRoom, "rust", metadata());
        assert_eq!(frame.value_text(), "rust");

        let empty = Frame::new(FrameKind::LeaveRoom, metadata());
        assert_eq!(empty.value_text(), "");
    }
}
