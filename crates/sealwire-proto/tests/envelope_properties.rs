//! Property-based tests for the JSON envelope.
//!
//! Verifies the encode/decode round trip for arbitrary frames, not just
//! hand-picked examples.

use proptest::prelude::*;
use sealwire_proto::{Frame, FrameKind, WsMetadata};

/// Strategy for generating arbitrary known frame kinds.
fn arbitrary_kind() -> impl Strategy<Value = FrameKind> {
    prop_oneof![
        Just(FrameKind::ExchangeKeys),
        Just(FrameKind::EncryptedMessage),
        Just(FrameKind::JoinRoom),
        Just(FrameKind::LeaveRoom),
        Just(FrameKind::CreateRoom),
        Just(FrameKind::DeleteRoom),
        Just(FrameKind::JoinedRoom),
        Just(FrameKind::LeftRoom),
        Just(FrameKind::CreatedRoom),
        Just(FrameKind::DeletedRoom),
        Just(FrameKind::AvailableRooms),
        Just(FrameKind::UserEnteredChat),
        Just(FrameKind::UserLeftChat),
        Just(FrameKind::CurrentUsers),
        Just(FrameKind::Success),
        Just(FrameKind::Error),
    ]
}

fn arbitrary_metadata() -> impl Strategy<Value = WsMetadata> {
    (".{0,16}", ".{0,16}", "#[0-9A-F]{6}", ".{0,16}").prop_map(
        |(user_id, username, color, current_room_id)| WsMetadata {
            user_id,
            username,
            color,
            current_room_id,
        },
    )
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (
        arbitrary_kind(),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..512)),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..24)),
        arbitrary_metadata(),
    )
        .prop_map(|(kind, value, nonce, metadata)| Frame { kind, value, nonce, metadata })
}

proptest! {
    #[test]
    fn envelope_round_trip(frame in arbitrary_frame()) {
        let text = frame.encode().expect("should encode");
        let parsed = Frame::decode(&text).expect("should decode");
        prop_assert_eq!(parsed, frame);
    }

    #[test]
    fn encoded_envelope_is_single_line_json(frame in arbitrary_frame()) {
        // The stdio bridge is line-delimited; an envelope must never contain
        // a raw newline.
        let text = frame.encode().expect("should encode");
        prop_assert!(!text.contains('\n'));
    }

    #[test]
    fn unknown_tags_survive_round_trip(tag in "[a-z_]{1,24}") {
        let frame = Frame::new(FrameKind::from(tag.as_str()), WsMetadata::default());
        let text = frame.encode().expect("should encode");
        let parsed = Frame::decode(&text).expect("should decode");
        prop_assert_eq!(parsed.kind.as_tag(), tag.as_str());
    }
}
