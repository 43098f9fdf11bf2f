//! Type-Length-Value records.
//!
//! Every record starts with an 8 byte header, `[type: u32 BE][length: u32 BE]`,
//! followed by `length` payload bytes. A fixed set of types are containers
//! whose payload is a sequence of nested records. Everything else is a leaf.

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Size of the `[type][length]` header in front of every TLV
pub const TLV_HEADER_SIZE: usize = 8;

/// Maximum number of nested containers accepted when decoding
pub const MAX_TLV_DEPTH: usize = 16;

/// Bytes stripped from the end of string leaves
const STRING_PADDING: [char; 5] = [' ', '\t', '\r', '\n', '\0'];

/// TLV type tag. Unknown values are valid and decode as leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TlvType(pub u32);

impl TlvType {
    // Containers
    pub const FOLDER: TlvType = TlvType(0x1);
    pub const PLAYLIST: TlvType = TlvType(0x2);
    pub const TRACK: TlvType = TlvType(0x3);
    pub const IMAGE: TlvType = TlvType(0x8);
    pub const ALBUM: TlvType = TlvType(0x9);
    pub const ARTIST: TlvType = TlvType(0xa);
    pub const CLIENT: TlvType = TlvType(0x21);

    // Track
    pub const TRACK_DURATION: TlvType = TlvType(0x304);
    pub const TRACK_INDEX: TlvType = TlvType(0x307);

    // Search
    pub const SEARCH_QUERY: TlvType = TlvType(0x401);

    // Status
    pub const STATE: TlvType = TlvType(0x501);
    pub const PROGRESS: TlvType = TlvType(0x502);

    // Playback control
    pub const PLAY_MODE: TlvType = TlvType(0x601);
    pub const VOLUME: TlvType = TlvType(0x602);
    pub const PLAY_OPERATION: TlvType = TlvType(0x603);

    // Generic data items
    pub const LINK: TlvType = TlvType(0x701);
    pub const NAME: TlvType = TlvType(0x702);
    pub const IP_ADDRESS: TlvType = TlvType(0x703);
    pub const PORT: TlvType = TlvType(0x704);

    // Image
    pub const IMAGE_FORMAT: TlvType = TlvType(0x801);
    pub const IMAGE_DATA: TlvType = TlvType(0x802);

    // Session
    pub const LOGIN_USERNAME: TlvType = TlvType(0x1001);
    pub const LOGIN_PASSWORD: TlvType = TlvType(0x1002);
    pub const PROTOCOL_VERSION_MAJOR: TlvType = TlvType(0x1003);
    pub const PROTOCOL_VERSION_MINOR: TlvType = TlvType(0x1004);

    // Error handling
    pub const FAILURE: TlvType = TlvType(0x1101);

    // Audio data
    pub const AUDIO_DATA: TlvType = TlvType(0x2001);
    pub const AUDIO_CHANNELS: TlvType = TlvType(0x2002);
    pub const AUDIO_RATE: TlvType = TlvType(0x2003);
    pub const AUDIO_NOF_SAMPLES: TlvType = TlvType(0x2004);

    // Audio endpoint
    pub const AUDIO_EP_PROTOCOL: TlvType = TlvType(0x2102);

    /// Whether records of this type carry nested TLVs instead of raw bytes
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::FOLDER
                | Self::PLAYLIST
                | Self::TRACK
                | Self::IMAGE
                | Self::ALBUM
                | Self::ARTIST
                | Self::CLIENT
        )
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::FOLDER => "FOLDER",
            Self::PLAYLIST => "PLAYLIST",
            Self::TRACK => "TRACK",
            Self::IMAGE => "IMAGE",
            Self::ALBUM => "ALBUM",
            Self::ARTIST => "ARTIST",
            Self::CLIENT => "CLIENT",
            Self::TRACK_DURATION => "TRACK_DURATION",
            Self::TRACK_INDEX => "TRACK_INDEX",
            Self::SEARCH_QUERY => "SEARCH_QUERY",
            Self::STATE => "STATE",
            Self::PROGRESS => "PROGRESS",
            Self::PLAY_MODE => "PLAY_MODE",
            Self::VOLUME => "VOLUME",
            Self::PLAY_OPERATION => "PLAY_OPERATION",
            Self::LINK => "LINK",
            Self::NAME => "NAME",
            Self::IP_ADDRESS => "IP_ADDRESS",
            Self::PORT => "PORT",
            Self::IMAGE_FORMAT => "IMAGE_FORMAT",
            Self::IMAGE_DATA => "IMAGE_DATA",
            Self::LOGIN_USERNAME => "LOGIN_USERNAME",
            Self::LOGIN_PASSWORD => "LOGIN_PASSWORD",
            Self::PROTOCOL_VERSION_MAJOR => "PROTOCOL_VERSION_MAJOR",
            Self::PROTOCOL_VERSION_MINOR => "PROTOCOL_VERSION_MINOR",
            Self::FAILURE => "FAILURE",
            Self::AUDIO_DATA => "AUDIO_DATA",
            Self::AUDIO_CHANNELS => "AUDIO_CHANNELS",
            Self::AUDIO_RATE => "AUDIO_RATE",
            Self::AUDIO_NOF_SAMPLES => "AUDIO_NOF_SAMPLES",
            Self::AUDIO_EP_PROTOCOL => "AUDIO_EP_PROTOCOL",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for TlvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "TLV_{}", name),
            None => write!(f, "TLV_0x{:x}", self.0),
        }
    }
}

/// Payload of a TLV, fixed when the record is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvValue {
    /// Raw leaf bytes (strings, image data, audio data)
    Bytes(Vec<u8>),
    /// Leaf holding one big-endian u32
    Uint(u32),
    /// Nested records, in insertion order
    Container(Vec<Tlv>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    tlv_type: TlvType,
    value: TlvValue,
}

impl Tlv {
    pub fn bytes(tlv_type: TlvType, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            tlv_type,
            value: TlvValue::Bytes(bytes.into()),
        }
    }

    pub fn string(tlv_type: TlvType, s: &str) -> Self {
        Self::bytes(tlv_type, s.as_bytes())
    }

    pub fn uint(tlv_type: TlvType, value: u32) -> Self {
        Self {
            tlv_type,
            value: TlvValue::Uint(value),
        }
    }

    /// Empty container. `tlv_type` should be one of the container types,
    /// otherwise the peer will read the children back as a single leaf.
    pub fn container(tlv_type: TlvType) -> Self {
        debug_assert!(tlv_type.is_container(), "{} is not a container", tlv_type);
        Self {
            tlv_type,
            value: TlvValue::Container(Vec::new()),
        }
    }

    /// Builder-style append of a child
    pub fn with(mut self, child: Tlv) -> Self {
        self.push(child);
        self
    }

    /// Append a child. Leaves are turned into empty containers first.
    pub fn push(&mut self, child: Tlv) {
        match &mut self.value {
            TlvValue::Container(children) => children.push(child),
            value => *value = TlvValue::Container(vec![child]),
        }
    }

    pub fn tlv_type(&self) -> TlvType {
        self.tlv_type
    }

    pub fn value(&self) -> &TlvValue {
        &self.value
    }

    /// Payload length in bytes, not counting the header
    pub fn length(&self) -> u32 {
        match &self.value {
            TlvValue::Bytes(bytes) => bytes.len() as u32,
            TlvValue::Uint(_) => 4,
            TlvValue::Container(children) => children.iter().map(Tlv::encoded_len).sum(),
        }
    }

    /// Header plus payload
    pub fn encoded_len(&self) -> u32 {
        TLV_HEADER_SIZE as u32 + self.length()
    }

    pub fn children(&self) -> &[Tlv] {
        match &self.value {
            TlvValue::Container(children) => children,
            _ => &[],
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            TlvValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Integer leaf value. Decoded leaves are raw bytes, so a 4 byte payload
    /// is read as big-endian.
    pub fn as_u32(&self) -> Option<u32> {
        match &self.value {
            TlvValue::Uint(value) => Some(*value),
            TlvValue::Bytes(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().ok()?;
                Some(u32::from_be_bytes(raw))
            }
            TlvValue::Container(_) => None,
        }
    }

    /// String leaf value with trailing padding removed
    pub fn as_string(&self) -> Option<String> {
        self.as_bytes().map(decode_string)
    }

    pub fn find_first_child_of_type(&self, tlv_type: TlvType) -> Option<&Tlv> {
        find_first_of_type(self.children(), tlv_type)
    }

    /// Depth-first, pre-order search below this record. Every container child
    /// is searched, matching or not.
    pub fn find_all_descendants_of_type(&self, tlv_type: TlvType) -> Vec<&Tlv> {
        find_all_of_type(self.children(), tlv_type)
    }

    /// String value of the first direct child of `tlv_type`
    pub fn child_string(&self, tlv_type: TlvType) -> Option<String> {
        self.find_first_child_of_type(tlv_type)
            .and_then(Tlv::as_string)
    }

    /// Integer value of the first direct child of `tlv_type`
    pub fn child_u32(&self, tlv_type: TlvType) -> Option<u32> {
        self.find_first_child_of_type(tlv_type)
            .and_then(Tlv::as_u32)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.tlv_type.0.to_be_bytes());
        buf.extend_from_slice(&self.length().to_be_bytes());
        match &self.value {
            TlvValue::Bytes(bytes) => buf.extend_from_slice(bytes),
            TlvValue::Uint(value) => buf.extend_from_slice(&value.to_be_bytes()),
            TlvValue::Container(children) => {
                for child in children {
                    child.encode_into(buf);
                }
            }
        }
    }

    /// Decode one record from the front of `buf`, returning it together with
    /// the number of bytes consumed (`8 + length`).
    pub fn decode(buf: &[u8]) -> Result<(Tlv, usize)> {
        Self::decode_nested(buf, 0)
    }

    fn decode_nested(buf: &[u8], depth: usize) -> Result<(Tlv, usize)> {
        let (tlv_type, length) = read_header(buf)?;
        let total = TLV_HEADER_SIZE + length as usize;
        if buf.len() < total {
            return Err(ProtocolError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }
        let payload = &buf[TLV_HEADER_SIZE..total];

        if !tlv_type.is_container() {
            return Ok((Tlv::bytes(tlv_type, payload), total));
        }

        if depth >= MAX_TLV_DEPTH {
            return Err(ProtocolError::TlvDepthExceeded(MAX_TLV_DEPTH));
        }

        let children = decode_sequence(payload, tlv_type, length, depth + 1)?;
        Ok((
            Tlv {
                tlv_type,
                value: TlvValue::Container(children),
            },
            total,
        ))
    }
}

/// Decode back-to-back records filling `payload` exactly. Used for container
/// bodies and for the top level of a message.
pub(crate) fn decode_sequence(
    payload: &[u8],
    parent: TlvType,
    declared: u32,
    depth: usize,
) -> Result<Vec<Tlv>> {
    let mut children = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let remaining = &payload[offset..];
        if remaining.len() < TLV_HEADER_SIZE {
            return Err(ProtocolError::MalformedTlv {
                tlv_type: parent.0,
                declared,
                available: payload.len(),
            });
        }
        let (child_type, child_length) = read_header(remaining)?;
        let available = remaining.len() - TLV_HEADER_SIZE;
        if child_length as usize > available {
            return Err(ProtocolError::MalformedTlv {
                tlv_type: child_type.0,
                declared: child_length,
                available,
            });
        }

        let (child, consumed) = Tlv::decode_nested(remaining, depth)?;
        children.push(child);
        offset += consumed;
    }

    Ok(children)
}

fn read_header(buf: &[u8]) -> Result<(TlvType, u32)> {
    if buf.len() < TLV_HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            needed: TLV_HEADER_SIZE,
            available: buf.len(),
        });
    }
    let tlv_type = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok((TlvType(tlv_type), length))
}

pub(crate) fn find_first_of_type(tlvs: &[Tlv], tlv_type: TlvType) -> Option<&Tlv> {
    tlvs.iter().find(|tlv| tlv.tlv_type == tlv_type)
}

pub(crate) fn find_all_of_type(tlvs: &[Tlv], tlv_type: TlvType) -> Vec<&Tlv> {
    let mut found = Vec::new();
    collect_of_type(tlvs, tlv_type, &mut found);
    found
}

fn collect_of_type<'a>(tlvs: &'a [Tlv], tlv_type: TlvType, found: &mut Vec<&'a Tlv>) {
    for tlv in tlvs {
        if tlv.tlv_type == tlv_type {
            found.push(tlv);
        }
        if tlv.tlv_type.is_container() {
            collect_of_type(tlv.children(), tlv_type, found);
        }
    }
}

/// Decode a padded string leaf. Only space, tab, CR, LF and NUL are trimmed,
/// and only from the end.
pub fn decode_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(&STRING_PADDING[..])
        .to_string()
}
