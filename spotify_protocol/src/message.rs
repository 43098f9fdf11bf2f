use crate::error::{ProtocolError, Result};
use crate::tlv::{self, Tlv, TlvType};
use std::fmt;

/// Size of the `[length][type][correlation id]` message header
pub const MESSAGE_HEADER_SIZE: usize = 12;

/// Role bits OR'd onto an opcode to form the wire message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Request,
    Response,
    Indication,
}

impl Role {
    pub const REQ_BIT: u32 = 0x0000_0000;
    pub const RSP_BIT: u32 = 0x8000_0000;
    pub const IND_BIT: u32 = 0x4000_0000;
    const MASK: u32 = Self::RSP_BIT | Self::IND_BIT;

    fn bits(self) -> u32 {
        match self {
            Role::Request => Self::REQ_BIT,
            Role::Response => Self::RSP_BIT,
            Role::Indication => Self::IND_BIT,
        }
    }

    fn from_bits(bits: u32) -> Option<Self> {
        match bits & Self::MASK {
            Self::REQ_BIT => Some(Role::Request),
            Self::RSP_BIT => Some(Role::Response),
            Self::IND_BIT => Some(Role::Indication),
            _ => None,
        }
    }
}

/// Closed set of protocol operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    // Session
    Hello = 0x101,

    // Metadata
    GetPlaylists = 0x201,
    GetTracks = 0x202,
    GetImage = 0x203,
    GenericSearch = 0x204,

    // Playback
    Play = 0x302,
    PlayControl = 0x303,
    SetVolume = 0x304,

    // Status
    GetStatus = 0x401,

    // Audio endpoints
    CreateAudioEndpoint = 0x1001,
    DeleteAudioEndpoint = 0x1002,
    GetAudioEndpoints = 0x1003,
    AudioEndpointsUpdated = 0x1004,
    AudioData = 0x1011,
    AddAudioEndpoints = 0x1021,
    RemoveAudioEndpoints = 0x1022,
    GetCurrentAudioEndpoints = 0x1024,
}

impl TryFrom<u32> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x101 => Ok(Opcode::Hello),
            0x201 => Ok(Opcode::GetPlaylists),
            0x202 => Ok(Opcode::GetTracks),
            0x203 => Ok(Opcode::GetImage),
            0x204 => Ok(Opcode::GenericSearch),
            0x302 => Ok(Opcode::Play),
            0x303 => Ok(Opcode::PlayControl),
            0x304 => Ok(Opcode::SetVolume),
            0x401 => Ok(Opcode::GetStatus),
            0x1001 => Ok(Opcode::CreateAudioEndpoint),
            0x1002 => Ok(Opcode::DeleteAudioEndpoint),
            0x1003 => Ok(Opcode::GetAudioEndpoints),
            0x1004 => Ok(Opcode::AudioEndpointsUpdated),
            0x1011 => Ok(Opcode::AudioData),
            0x1021 => Ok(Opcode::AddAudioEndpoints),
            0x1022 => Ok(Opcode::RemoveAudioEndpoints),
            0x1024 => Ok(Opcode::GetCurrentAudioEndpoints),
            _ => Err(ProtocolError::UnknownMessageType(value)),
        }
    }
}

/// Wire message type: an opcode tagged with its role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub opcode: Opcode,
    pub role: Role,
}

impl MessageType {
    pub const fn new(opcode: Opcode, role: Role) -> Self {
        Self { opcode, role }
    }

    pub const fn request(opcode: Opcode) -> Self {
        Self::new(opcode, Role::Request)
    }

    pub const fn response(opcode: Opcode) -> Self {
        Self::new(opcode, Role::Response)
    }

    pub const fn indication(opcode: Opcode) -> Self {
        Self::new(opcode, Role::Indication)
    }

    pub fn to_u32(self) -> u32 {
        self.role.bits() | self.opcode as u32
    }

    /// Response type answering this request type
    pub fn response_type(self) -> Self {
        Self::response(self.opcode)
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        let role = Role::from_bits(value).ok_or(ProtocolError::UnknownMessageType(value))?;
        let opcode = Opcode::try_from(value & !Role::MASK)
            .map_err(|_| ProtocolError::UnknownMessageType(value))?;
        Ok(Self { opcode, role })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.role {
            Role::Request => "Req",
            Role::Response => "Rsp",
            Role::Indication => "Ind",
        };
        write!(f, "{:?}{}", self.opcode, suffix)
    }
}

/// Raw header fields, read without touching the TLVs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: u32,
    pub msg_type: u32,
    pub correlation_id: u32,
}

impl MessageHeader {
    pub fn peek(buf: &[u8]) -> Result<Self> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: MESSAGE_HEADER_SIZE,
                available: buf.len(),
            });
        }
        let word = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok(Self {
            length: word(0),
            msg_type: word(4),
            correlation_id: word(8),
        })
    }

    pub fn message_type(&self) -> Result<MessageType> {
        MessageType::try_from(self.msg_type)
    }
}

/// A framed protocol message: header plus an ordered list of top-level TLVs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    msg_type: MessageType,
    correlation_id: u32,
    tlvs: Vec<Tlv>,
}

impl Message {
    pub fn new(msg_type: MessageType, correlation_id: u32) -> Self {
        Self {
            msg_type,
            correlation_id,
            tlvs: Vec::new(),
        }
    }

    pub fn with(mut self, tlv: Tlv) -> Self {
        self.tlvs.push(tlv);
        self
    }

    pub fn add_tlv(&mut self, tlv: Tlv) {
        self.tlvs.push(tlv);
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    pub fn tlvs(&self) -> &[Tlv] {
        &self.tlvs
    }

    /// Empty response of the matching type, echoing the correlation id
    pub fn create_response(&self) -> Message {
        Message::new(self.msg_type.response_type(), self.correlation_id)
    }

    /// Total framed size including the header
    pub fn length(&self) -> u32 {
        MESSAGE_HEADER_SIZE as u32 + self.tlvs.iter().map(Tlv::encoded_len).sum::<u32>()
    }

    /// First top-level TLV of `tlv_type`
    pub fn tlv(&self, tlv_type: TlvType) -> Option<&Tlv> {
        tlv::find_first_of_type(&self.tlvs, tlv_type)
    }

    /// All TLVs of `tlv_type` at any depth, depth-first pre-order
    pub fn find_all(&self, tlv_type: TlvType) -> Vec<&Tlv> {
        tlv::find_all_of_type(&self.tlvs, tlv_type)
    }

    pub fn tlv_u32(&self, tlv_type: TlvType) -> Option<u32> {
        self.tlv(tlv_type).and_then(Tlv::as_u32)
    }

    pub fn tlv_string(&self, tlv_type: TlvType) -> Option<String> {
        self.tlv(tlv_type).and_then(Tlv::as_string)
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = self.length();
        let mut buf = Vec::with_capacity(length as usize);
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&self.msg_type.to_u32().to_be_bytes());
        buf.extend_from_slice(&self.correlation_id.to_be_bytes());
        for tlv in &self.tlvs {
            tlv.encode_into(&mut buf);
        }
        buf
    }

    /// Decode one complete message from the front of `buf`. Bytes past the
    /// declared length are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = MessageHeader::peek(buf)?;
        let length = header.length as usize;
        if length < MESSAGE_HEADER_SIZE {
            return Err(ProtocolError::InvalidLength(header.length));
        }
        if buf.len() < length {
            return Err(ProtocolError::Truncated {
                needed: length,
                available: buf.len(),
            });
        }
        let msg_type = header.message_type()?;

        let body = &buf[MESSAGE_HEADER_SIZE..length];
        let declared = (length - MESSAGE_HEADER_SIZE) as u32;
        let tlvs = tlv::decode_sequence(body, TlvType(0), declared, 0)?;

        Ok(Self {
            msg_type,
            correlation_id: header.correlation_id,
            tlvs,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id={}, {} bytes, {} TLVs)",
            self.msg_type,
            self.correlation_id,
            self.length(),
            self.tlvs.len()
        )
    }
}
