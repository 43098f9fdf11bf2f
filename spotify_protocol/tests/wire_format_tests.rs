//! Byte-level checks against hand-assembled frames, the way the service
//! writes them.

use spotify_protocol::{
    Album, Artist, Message, MessageHeader, MessageType, MessageView, Opcode, PlaybackState,
    ProtocolError, StatusInd, Tlv, TlvType, Track, GetTracksRsp,
};

fn be(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

/// Assemble a TLV by hand
fn raw_tlv(tlv_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&be(tlv_type));
    out.extend_from_slice(&be(payload.len() as u32));
    out.extend_from_slice(payload);
    out
}

fn raw_message(msg_type: u32, id: u32, tlvs: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = tlvs.concat();
    let mut out = Vec::new();
    out.extend_from_slice(&be(12 + body.len() as u32));
    out.extend_from_slice(&be(msg_type));
    out.extend_from_slice(&be(id));
    out.extend_from_slice(&body);
    out
}

#[test]
fn test_status_ind_from_service_bytes() {
    env_logger::try_init().ok();

    // Names are padded with NULs and spaces like fixed-width server buffers
    let track = raw_tlv(
        0x3,
        &[
            raw_tlv(0x702, b"Heart-Shaped Box\0\0\0"),
            raw_tlv(0x701, b"spotify:track:11  "),
            raw_tlv(0xa, &[raw_tlv(0x702, b"Nirvana"), raw_tlv(0x701, b"spotify:artist:1")].concat()),
            raw_tlv(0x9, &[raw_tlv(0x702, b"In Utero"), raw_tlv(0x701, b"spotify:album:3")].concat()),
            raw_tlv(0x304, &be(281_000)),
        ]
        .concat(),
    );
    let bytes = raw_message(
        0x4000_0401,
        0,
        &[raw_tlv(0x501, &be(1)), track, raw_tlv(0x502, &be(45_000))],
    );

    let ind = StatusInd::decode(&bytes).expect("status indication decodes");
    assert_eq!(ind.state(), Some(PlaybackState::Playing));
    assert_eq!(ind.progress(), Some(45_000));

    let playing = ind.playing_track().expect("track present");
    assert_eq!(playing.name, "Heart-Shaped Box");
    assert_eq!(playing.uri, "spotify:track:11");
    assert_eq!(playing.artists, vec![Artist::new("Nirvana", "spotify:artist:1")]);
    assert_eq!(playing.album, Some(Album::new("In Utero", "spotify:album:3")));
    assert_eq!(playing.duration_ms, Some(281_000));

    println!("✅ Decoded status indication: {:?}", playing.name);
}

#[test]
fn test_encoded_request_matches_hand_assembled_frame() {
    let req = spotify_protocol::PlayReq::new(17, "spotify:album:9", Some(2));
    let expected = raw_message(
        0x302,
        17,
        &[raw_tlv(0x701, b"spotify:album:9"), raw_tlv(0x307, &be(2))],
    );
    assert_eq!(req.encode(), expected);
}

#[test]
fn test_frames_are_split_by_length_prefix() {
    let first = spotify_protocol::GetStatusReq::new(1).encode();
    let second = spotify_protocol::SearchReq::new(2, "bleach").encode();
    let mut stream = first.clone();
    stream.extend_from_slice(&second);

    let header = MessageHeader::peek(&stream).unwrap();
    let (head, tail) = stream.split_at(header.length as usize);
    assert_eq!(head, &first[..]);

    let next = Message::decode(tail).unwrap();
    assert_eq!(next.msg_type(), MessageType::request(Opcode::GenericSearch));
    assert_eq!(next.correlation_id(), 2);
}

#[test]
fn test_unknown_message_type_reported() {
    let bytes = raw_message(0x8000_0777, 5, &[]);
    assert_eq!(
        Message::decode(&bytes),
        Err(ProtocolError::UnknownMessageType(0x8000_0777))
    );
    // the header itself is still readable
    assert_eq!(MessageHeader::peek(&bytes).unwrap().correlation_id, 5);
}

#[test]
fn test_unknown_tlvs_are_carried_through() {
    let bytes = raw_message(
        0x8000_0202,
        3,
        &[
            raw_tlv(0x9999, b"future field"),
            raw_tlv(0x3, &[raw_tlv(0x702, b"Dive"), raw_tlv(0x701, b"spotify:track:4")].concat()),
        ],
    );
    let rsp = GetTracksRsp::decode(&bytes).unwrap();
    assert_eq!(rsp.message().tlvs().len(), 2);
    assert_eq!(rsp.all_tracks(), vec![Track::new("Dive", "spotify:track:4")]);
    assert_eq!(rsp.message().encode(), bytes);
}

#[test]
fn test_track_serializes_to_json() {
    let track = Track::new("About a Girl", "spotify:track:8")
        .with_artist(Artist::new("Nirvana", "spotify:artist:1"))
        .with_duration(168_000);
    let json = serde_json::to_value(&track).unwrap();
    assert_eq!(json["name"], "About a Girl");
    assert_eq!(json["artists"][0]["uri"], "spotify:artist:1");
    assert_eq!(json["duration_ms"], 168_000);
    assert!(json["album"].is_null());
}

#[test]
fn test_tlv_length_matches_encoding_for_deep_tree() {
    let mut tlv = Tlv::container(TlvType::FOLDER).with(Tlv::string(TlvType::NAME, "leaf"));
    for depth in 0..8 {
        tlv = Tlv::container(TlvType::FOLDER)
            .with(Tlv::string(TlvType::NAME, &format!("level {}", depth)))
            .with(tlv);
    }
    let bytes = tlv.encode();
    assert_eq!(bytes.len(), tlv.length() as usize + 8);
    let (decoded, consumed) = Tlv::decode(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, Tlv::decode(&decoded.encode()).unwrap().0);
}
