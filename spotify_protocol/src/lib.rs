//! # Spotify Protocol
//!
//! Wire protocol spoken with the spotify remote-control service.
//!
//! This crate provides:
//! - The TLV record codec, including nested container records
//! - Framed messages with a `[length][type][correlation id]` header
//! - Typed views for every request, response and indication
//! - Media value objects decoded from TLV trees
//!
//! ## Example Usage
//!
//! ```rust
//! use spotify_protocol::{GetTracksReq, GetTracksRsp, MessageView, Track};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Build a request for the tracks of a playlist
//! let req = GetTracksReq::new(1, "spotify:playlist:42");
//! let bytes = req.encode();
//! assert_eq!(bytes.len() as u32, req.message().length());
//!
//! // Decode the answer
//! let rsp = GetTracksRsp::new(1, &[Track::new("Lithium", "spotify:track:7")]);
//! let decoded = GetTracksRsp::decode(&rsp.encode())?;
//! assert_eq!(decoded.all_tracks()[0].name, "Lithium");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod media;
pub mod message;
pub mod messages;
pub mod tlv;

// Re-export commonly used types
pub use error::{ProtocolError, Result};
pub use media::{
    Album, Artist, AudioEndpointInfo, AudioEndpointProtocol, FailureCause, Folder, ImageFormat,
    PlayMode, PlayOperation, PlaybackState, Playlist, Track,
};
pub use message::{Message, MessageHeader, MessageType, Opcode, Role, MESSAGE_HEADER_SIZE};
pub use messages::*;
pub use tlv::{Tlv, TlvType, TlvValue, MAX_TLV_DEPTH, TLV_HEADER_SIZE};
