//! Media value objects rebuilt from decoded TLV trees.

use crate::tlv::{Tlv, TlvType};
use serde::Serialize;

/// Name and link of an entity, defaulting to empty strings when absent
fn name_and_link(tlv: &Tlv) -> (String, String) {
    (
        tlv.child_string(TlvType::NAME).unwrap_or_default(),
        tlv.child_string(TlvType::LINK).unwrap_or_default(),
    )
}

fn named_container(tlv_type: TlvType, name: &str, uri: &str) -> Tlv {
    Tlv::container(tlv_type)
        .with(Tlv::string(TlvType::NAME, name))
        .with(Tlv::string(TlvType::LINK, uri))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub name: String,
    pub uri: String,
}

impl Playlist {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }

    pub fn from_tlv(tlv: &Tlv) -> Self {
        let (name, uri) = name_and_link(tlv);
        Self { name, uri }
    }

    pub fn to_tlv(&self) -> Tlv {
        named_container(TlvType::PLAYLIST, &self.name, &self.uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artist {
    pub name: String,
    pub uri: String,
}

impl Artist {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }

    pub fn from_tlv(tlv: &Tlv) -> Self {
        let (name, uri) = name_and_link(tlv);
        Self { name, uri }
    }

    pub fn to_tlv(&self) -> Tlv {
        named_container(TlvType::ARTIST, &self.name, &self.uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Album {
    pub name: String,
    pub uri: String,
}

impl Album {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }

    pub fn from_tlv(tlv: &Tlv) -> Self {
        let (name, uri) = name_and_link(tlv);
        Self { name, uri }
    }

    pub fn to_tlv(&self) -> Tlv {
        named_container(TlvType::ALBUM, &self.name, &self.uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    pub name: String,
    pub uri: String,
    pub artists: Vec<Artist>,
    pub album: Option<Album>,
    pub duration_ms: Option<u32>,
    pub index: Option<u32>,
}

impl Track {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            artists: Vec::new(),
            album: None,
            duration_ms: None,
            index: None,
        }
    }

    pub fn with_artist(mut self, artist: Artist) -> Self {
        self.artists.push(artist);
        self
    }

    pub fn with_album(mut self, album: Album) -> Self {
        self.album = Some(album);
        self
    }

    pub fn with_duration(mut self, duration_ms: u32) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Artists are collected from anywhere below the track. When several
    /// albums are present the last one wins.
    pub fn from_tlv(tlv: &Tlv) -> Self {
        let (name, uri) = name_and_link(tlv);
        let artists = tlv
            .find_all_descendants_of_type(TlvType::ARTIST)
            .into_iter()
            .map(Artist::from_tlv)
            .collect();
        let album = tlv
            .find_all_descendants_of_type(TlvType::ALBUM)
            .last()
            .map(|album| Album::from_tlv(album));

        Self {
            name,
            uri,
            artists,
            album,
            duration_ms: tlv.child_u32(TlvType::TRACK_DURATION),
            index: tlv.child_u32(TlvType::TRACK_INDEX),
        }
    }

    pub fn to_tlv(&self) -> Tlv {
        let mut tlv = named_container(TlvType::TRACK, &self.name, &self.uri);
        for artist in &self.artists {
            tlv.push(artist.to_tlv());
        }
        if let Some(album) = &self.album {
            tlv.push(album.to_tlv());
        }
        if let Some(duration) = self.duration_ms {
            tlv.push(Tlv::uint(TlvType::TRACK_DURATION, duration));
        }
        if let Some(index) = self.index {
            tlv.push(Tlv::uint(TlvType::TRACK_INDEX, index));
        }
        tlv
    }
}

/// Playlist folder. Folders carry no id on the wire, so ids are handed out
/// in pre-order while decoding, starting with 0 for the outermost folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Folder {
    pub name: String,
    pub id: u32,
    pub playlists: Vec<Playlist>,
    pub folders: Vec<Folder>,
}

impl Folder {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
            playlists: Vec::new(),
            folders: Vec::new(),
        }
    }

    pub fn from_tlv(tlv: &Tlv) -> Self {
        let mut next_id = 0;
        Self::from_tlv_numbered(tlv, &mut next_id)
    }

    fn from_tlv_numbered(tlv: &Tlv, next_id: &mut u32) -> Self {
        let mut folder = Folder::new(
            tlv.child_string(TlvType::NAME).unwrap_or_default(),
            *next_id,
        );
        *next_id += 1;

        for child in tlv.children() {
            match child.tlv_type() {
                TlvType::PLAYLIST => folder.playlists.push(Playlist::from_tlv(child)),
                TlvType::FOLDER => folder
                    .folders
                    .push(Self::from_tlv_numbered(child, next_id)),
                _ => {}
            }
        }
        folder
    }

    /// Encodes name, playlists, then sub-folders. Ids are not encoded.
    pub fn to_tlv(&self) -> Tlv {
        let mut tlv = Tlv::container(TlvType::FOLDER).with(Tlv::string(TlvType::NAME, &self.name));
        for playlist in &self.playlists {
            tlv.push(playlist.to_tlv());
        }
        for folder in &self.folders {
            tlv.push(folder.to_tlv());
        }
        tlv
    }

    /// Every playlist in this folder and below, depth first
    pub fn all_playlists(&self) -> Vec<&Playlist> {
        let mut all: Vec<&Playlist> = self.playlists.iter().collect();
        for folder in &self.folders {
            all.extend(folder.all_playlists());
        }
        all
    }
}

/// A remote playback sink as reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioEndpointInfo {
    pub name: String,
    pub active: bool,
    pub volume: u8,
}

impl AudioEndpointInfo {
    /// Entries without a name or an active flag are skipped. A missing
    /// volume reads as 0.
    pub fn from_tlv(tlv: &Tlv) -> Option<Self> {
        let name = tlv.child_string(TlvType::LINK)?;
        let active = tlv.child_u32(TlvType::STATE)? != 0;
        let volume = tlv
            .child_u32(TlvType::VOLUME)
            .map(|v| v.min(u8::MAX as u32) as u8)
            .unwrap_or(0);
        Some(Self {
            name,
            active,
            volume,
        })
    }

    pub fn to_tlv(&self) -> Tlv {
        Tlv::container(TlvType::CLIENT)
            .with(Tlv::string(TlvType::LINK, &self.name))
            .with(Tlv::uint(TlvType::STATE, self.active as u32))
            .with(Tlv::uint(TlvType::VOLUME, self.volume as u32))
    }
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $($variant,)+
            Other(u32),
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                match value {
                    $($value => $name::$variant,)+
                    other => $name::Other(other),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                match value {
                    $($name::$variant => $value,)+
                    $name::Other(other) => other,
                }
            }
        }
    };
}

wire_enum! {
    /// Playback state reported in status messages
    PlaybackState {
        Idle = 0,
        Playing = 1,
        Paused = 2,
    }
}

wire_enum! {
    /// Transport operation carried by PlayControl requests
    PlayOperation {
        Pause = 0,
        Resume = 1,
        Next = 2,
        Prev = 3,
    }
}

wire_enum! {
    PlayMode {
        Shuffle = 0,
        Repeat = 1,
    }
}

wire_enum! {
    ImageFormat {
        Unknown = 0,
        Jpeg = 1,
    }
}

wire_enum! {
    /// Transport used for the audio endpoint datagram stream
    AudioEndpointProtocol {
        LightweightUdp = 0,
        Rtp = 1,
    }
}

wire_enum! {
    /// Cause carried in a FAILURE TLV of a rejected request
    FailureCause {
        GeneralError = 0x01,
        BadLogin = 0x11,
        ProtocolMismatch = 0x12,
        UnknownRequest = 0x21,
        MissingTlv = 0x22,
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Other(code) => write!(f, "failure 0x{:x}", code),
            known => write!(f, "{:?}", known),
        }
    }
}
