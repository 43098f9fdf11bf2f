//! Typed views over [`Message`], one per concrete message kind.
//!
//! Constructors build the TLV shape the service expects. Accessors walk the
//! decoded tree and return `None` when a field is missing.

use crate::error::{ProtocolError, Result};
use crate::media::{
    AudioEndpointInfo, AudioEndpointProtocol, FailureCause, Folder, ImageFormat, PlayOperation,
    PlaybackState, Playlist, Track,
};
use crate::message::{Message, MessageType, Opcode};
use crate::tlv::{Tlv, TlvType};

pub const PROTOCOL_VERSION_MAJOR: u32 = 1;
pub const PROTOCOL_VERSION_MINOR: u32 = 0;

impl Message {
    /// Cause of a rejected request, if the peer attached one
    pub fn failure(&self) -> Option<FailureCause> {
        self.tlv_u32(TlvType::FAILURE).map(FailureCause::from)
    }
}

/// Common behaviour of all typed message views
pub trait MessageView: Sized {
    const MSG_TYPE: MessageType;

    #[doc(hidden)]
    fn wrap(message: Message) -> Self;

    fn message(&self) -> &Message;

    fn into_message(self) -> Message;

    /// Wrap a decoded message, checking its type
    fn from_message(message: Message) -> Result<Self> {
        if message.msg_type() != Self::MSG_TYPE {
            return Err(ProtocolError::UnexpectedMessageType {
                expected: Self::MSG_TYPE.to_string(),
                actual: message.msg_type().to_string(),
            });
        }
        Ok(Self::wrap(message))
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        Self::from_message(Message::decode(buf)?)
    }

    fn correlation_id(&self) -> u32 {
        self.message().correlation_id()
    }

    fn encode(&self) -> Vec<u8> {
        self.message().encode()
    }

    fn failure(&self) -> Option<FailureCause> {
        self.message().failure()
    }
}

macro_rules! message_view {
    ($(#[$meta:meta])* $name:ident, $role:ident($opcode:ident)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(Message);

        impl MessageView for $name {
            const MSG_TYPE: MessageType = MessageType::$role(Opcode::$opcode);

            fn wrap(message: Message) -> Self {
                Self(message)
            }

            fn message(&self) -> &Message {
                &self.0
            }

            fn into_message(self) -> Message {
                self.0
            }
        }

        impl TryFrom<Message> for $name {
            type Error = ProtocolError;

            fn try_from(message: Message) -> Result<Self> {
                <Self as MessageView>::from_message(message)
            }
        }

        impl From<$name> for Message {
            fn from(view: $name) -> Message {
                view.0
            }
        }
    };
}

/// Views that carry nothing beyond the header
macro_rules! empty_message_view {
    ($(#[$meta:meta])* $name:ident, $role:ident($opcode:ident)) => {
        message_view!($(#[$meta])* $name, $role($opcode));

        impl $name {
            pub fn new(correlation_id: u32) -> Self {
                Self(Message::new(Self::MSG_TYPE, correlation_id))
            }
        }
    };
}

fn tracks_in(message: &Message) -> Vec<Track> {
    message
        .find_all(TlvType::TRACK)
        .into_iter()
        .map(Track::from_tlv)
        .collect()
}

fn message_with_tracks(msg_type: MessageType, correlation_id: u32, tracks: &[Track]) -> Message {
    tracks
        .iter()
        .fold(Message::new(msg_type, correlation_id), |msg, track| {
            msg.with(track.to_tlv())
        })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

message_view!(HelloReq, request(Hello));

impl HelloReq {
    pub fn new(correlation_id: u32, username: Option<&str>, password: Option<&str>) -> Self {
        let mut msg = Message::new(Self::MSG_TYPE, correlation_id)
            .with(Tlv::uint(TlvType::PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MAJOR))
            .with(Tlv::uint(TlvType::PROTOCOL_VERSION_MINOR, PROTOCOL_VERSION_MINOR));
        if let Some(username) = username {
            msg.add_tlv(Tlv::string(TlvType::LOGIN_USERNAME, username));
        }
        if let Some(password) = password {
            msg.add_tlv(Tlv::string(TlvType::LOGIN_PASSWORD, password));
        }
        Self(msg)
    }

    pub fn protocol_version(&self) -> Option<(u32, u32)> {
        protocol_version(&self.0)
    }

    pub fn username(&self) -> Option<String> {
        self.0.tlv_string(TlvType::LOGIN_USERNAME)
    }

    pub fn password(&self) -> Option<String> {
        self.0.tlv_string(TlvType::LOGIN_PASSWORD)
    }
}

message_view!(HelloRsp, response(Hello));

impl HelloRsp {
    pub fn new(correlation_id: u32) -> Self {
        Self(
            Message::new(Self::MSG_TYPE, correlation_id)
                .with(Tlv::uint(TlvType::PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MAJOR))
                .with(Tlv::uint(TlvType::PROTOCOL_VERSION_MINOR, PROTOCOL_VERSION_MINOR)),
        )
    }

    pub fn protocol_version(&self) -> Option<(u32, u32)> {
        protocol_version(&self.0)
    }
}

fn protocol_version(message: &Message) -> Option<(u32, u32)> {
    Some((
        message.tlv_u32(TlvType::PROTOCOL_VERSION_MAJOR)?,
        message.tlv_u32(TlvType::PROTOCOL_VERSION_MINOR)?,
    ))
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

empty_message_view!(GetPlaylistsReq, request(GetPlaylists));

message_view!(GetPlaylistsRsp, response(GetPlaylists));

impl GetPlaylistsRsp {
    pub fn new(correlation_id: u32, root: &Folder) -> Self {
        Self(Message::new(Self::MSG_TYPE, correlation_id).with(root.to_tlv()))
    }

    /// Every playlist in the response, in tree order
    pub fn all_playlists(&self) -> Vec<Playlist> {
        self.0
            .find_all(TlvType::PLAYLIST)
            .into_iter()
            .map(Playlist::from_tlv)
            .collect()
    }

    pub fn root_folder(&self) -> Option<Folder> {
        self.0.tlv(TlvType::FOLDER).map(Folder::from_tlv)
    }
}

message_view!(GetTracksReq, request(GetTracks));

impl GetTracksReq {
    pub fn new(correlation_id: u32, playlist_uri: &str) -> Self {
        let playlist =
            Tlv::container(TlvType::PLAYLIST).with(Tlv::string(TlvType::LINK, playlist_uri));
        Self(Message::new(Self::MSG_TYPE, correlation_id).with(playlist))
    }

    pub fn playlist_uri(&self) -> Option<String> {
        self.0
            .tlv(TlvType::PLAYLIST)
            .and_then(|playlist| playlist.child_string(TlvType::LINK))
    }
}

message_view!(GetTracksRsp, response(GetTracks));

impl GetTracksRsp {
    pub fn new(correlation_id: u32, tracks: &[Track]) -> Self {
        Self(message_with_tracks(Self::MSG_TYPE, correlation_id, tracks))
    }

    pub fn all_tracks(&self) -> Vec<Track> {
        tracks_in(&self.0)
    }
}

message_view!(GetImageReq, request(GetImage));

impl GetImageReq {
    pub fn new(correlation_id: u32, uri: &str) -> Self {
        Self(Message::new(Self::MSG_TYPE, correlation_id).with(Tlv::string(TlvType::LINK, uri)))
    }

    pub fn uri(&self) -> Option<String> {
        self.0.tlv_string(TlvType::LINK)
    }
}

message_view!(GetImageRsp, response(GetImage));

impl GetImageRsp {
    pub fn new(correlation_id: u32, format: ImageFormat, data: &[u8]) -> Self {
        let image = Tlv::container(TlvType::IMAGE)
            .with(Tlv::uint(TlvType::IMAGE_FORMAT, format.into()))
            .with(Tlv::bytes(TlvType::IMAGE_DATA, data));
        Self(Message::new(Self::MSG_TYPE, correlation_id).with(image))
    }

    pub fn image_format(&self) -> Option<ImageFormat> {
        self.0
            .tlv(TlvType::IMAGE)
            .and_then(|image| image.child_u32(TlvType::IMAGE_FORMAT))
            .map(ImageFormat::from)
    }

    pub fn image_data(&self) -> Option<&[u8]> {
        self.0
            .tlv(TlvType::IMAGE)
            .and_then(|image| image.find_first_child_of_type(TlvType::IMAGE_DATA))
            .and_then(Tlv::as_bytes)
    }
}

message_view!(SearchReq, request(GenericSearch));

impl SearchReq {
    pub fn new(correlation_id: u32, query: &str) -> Self {
        Self(
            Message::new(Self::MSG_TYPE, correlation_id)
                .with(Tlv::string(TlvType::SEARCH_QUERY, query)),
        )
    }

    pub fn query(&self) -> Option<String> {
        self.0.tlv_string(TlvType::SEARCH_QUERY)
    }
}

message_view!(SearchRsp, response(GenericSearch));

impl SearchRsp {
    pub fn new(correlation_id: u32, tracks: &[Track]) -> Self {
        Self(message_with_tracks(Self::MSG_TYPE, correlation_id, tracks))
    }

    pub fn all_tracks(&self) -> Vec<Track> {
        tracks_in(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

message_view!(PlayReq, request(Play));

impl PlayReq {
    pub fn new(correlation_id: u32, uri: &str, start_index: Option<u32>) -> Self {
        let mut msg =
            Message::new(Self::MSG_TYPE, correlation_id).with(Tlv::string(TlvType::LINK, uri));
        if let Some(index) = start_index {
            msg.add_tlv(Tlv::uint(TlvType::TRACK_INDEX, index));
        }
        Self(msg)
    }

    pub fn uri(&self) -> Option<String> {
        self.0.tlv_string(TlvType::LINK)
    }

    pub fn start_index(&self) -> Option<u32> {
        self.0.tlv_u32(TlvType::TRACK_INDEX)
    }
}

empty_message_view!(PlayRsp, response(Play));

message_view!(PlayControlReq, request(PlayControl));

impl PlayControlReq {
    pub fn new(correlation_id: u32, operation: PlayOperation) -> Self {
        Self(
            Message::new(Self::MSG_TYPE, correlation_id)
                .with(Tlv::uint(TlvType::PLAY_OPERATION, operation.into())),
        )
    }

    pub fn operation(&self) -> Option<PlayOperation> {
        self.0
            .tlv_u32(TlvType::PLAY_OPERATION)
            .map(PlayOperation::from)
    }
}

empty_message_view!(PlayControlRsp, response(PlayControl));

message_view!(
    /// Master volume when no endpoint is named, otherwise the volume of the
    /// named endpoint relative to the master
    SetVolumeReq,
    request(SetVolume)
);

impl SetVolumeReq {
    pub fn new(correlation_id: u32, volume: u8, endpoint: Option<&str>) -> Self {
        let volume_tlv = Tlv::uint(TlvType::VOLUME, volume as u32);
        let tlv = match endpoint {
            Some(name) => Tlv::container(TlvType::CLIENT)
                .with(Tlv::string(TlvType::LINK, name))
                .with(volume_tlv),
            None => volume_tlv,
        };
        Self(Message::new(Self::MSG_TYPE, correlation_id).with(tlv))
    }

    pub fn volume(&self) -> Option<u8> {
        let raw = match self.0.tlv(TlvType::CLIENT) {
            Some(client) => client.child_u32(TlvType::VOLUME),
            None => self.0.tlv_u32(TlvType::VOLUME),
        };
        raw.map(|v| v.min(u8::MAX as u32) as u8)
    }

    pub fn endpoint_name(&self) -> Option<String> {
        self.0
            .tlv(TlvType::CLIENT)
            .and_then(|client| client.child_string(TlvType::LINK))
    }
}

empty_message_view!(SetVolumeRsp, response(SetVolume));

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

empty_message_view!(GetStatusReq, request(GetStatus));

fn status_message(
    msg_type: MessageType,
    correlation_id: u32,
    state: PlaybackState,
    track: Option<&Track>,
    progress: Option<u32>,
) -> Message {
    let mut msg =
        Message::new(msg_type, correlation_id).with(Tlv::uint(TlvType::STATE, state.into()));
    if let Some(track) = track {
        msg.add_tlv(track.to_tlv());
    }
    if let Some(progress) = progress {
        msg.add_tlv(Tlv::uint(TlvType::PROGRESS, progress));
    }
    msg
}

fn status_state(message: &Message) -> Option<PlaybackState> {
    message.tlv_u32(TlvType::STATE).map(PlaybackState::from)
}

/// An idle player reports no track even if one is attached
fn status_track(message: &Message) -> Option<Track> {
    if status_state(message) == Some(PlaybackState::Idle) {
        return None;
    }
    message.tlv(TlvType::TRACK).map(Track::from_tlv)
}

fn status_progress(message: &Message) -> Option<u32> {
    message.tlv_u32(TlvType::PROGRESS)
}

macro_rules! status_view {
    ($name:ident, $role:ident) => {
        message_view!($name, $role(GetStatus));

        impl $name {
            pub fn new(
                correlation_id: u32,
                state: PlaybackState,
                track: Option<&Track>,
                progress: Option<u32>,
            ) -> Self {
                Self(status_message(
                    Self::MSG_TYPE,
                    correlation_id,
                    state,
                    track,
                    progress,
                ))
            }

            pub fn state(&self) -> Option<PlaybackState> {
                status_state(&self.0)
            }

            pub fn playing_track(&self) -> Option<Track> {
                status_track(&self.0)
            }

            /// Playback position in milliseconds
            pub fn progress(&self) -> Option<u32> {
                status_progress(&self.0)
            }
        }
    };
}

status_view!(GetStatusRsp, response);
status_view!(StatusInd, indication);

// ---------------------------------------------------------------------------
// Audio endpoints
// ---------------------------------------------------------------------------

message_view!(CreateAudioEndpointReq, request(CreateAudioEndpoint));

impl CreateAudioEndpointReq {
    pub fn new(
        correlation_id: u32,
        port: u16,
        protocol: AudioEndpointProtocol,
        volume: Option<u8>,
    ) -> Self {
        let mut client = Tlv::container(TlvType::CLIENT)
            .with(Tlv::uint(TlvType::PORT, port as u32))
            .with(Tlv::uint(TlvType::AUDIO_EP_PROTOCOL, protocol.into()));
        if let Some(volume) = volume {
            client.push(Tlv::uint(TlvType::VOLUME, volume as u32));
        }
        Self(Message::new(Self::MSG_TYPE, correlation_id).with(client))
    }

    fn client(&self) -> Option<&Tlv> {
        self.0.tlv(TlvType::CLIENT)
    }

    pub fn port(&self) -> Option<u16> {
        self.client()
            .and_then(|c| c.child_u32(TlvType::PORT))
            .and_then(|p| u16::try_from(p).ok())
    }

    pub fn protocol(&self) -> Option<AudioEndpointProtocol> {
        self.client()
            .and_then(|c| c.child_u32(TlvType::AUDIO_EP_PROTOCOL))
            .map(AudioEndpointProtocol::from)
    }

    pub fn volume(&self) -> Option<u8> {
        self.client()
            .and_then(|c| c.child_u32(TlvType::VOLUME))
            .map(|v| v.min(u8::MAX as u32) as u8)
    }
}

empty_message_view!(CreateAudioEndpointRsp, response(CreateAudioEndpoint));
empty_message_view!(DeleteAudioEndpointReq, request(DeleteAudioEndpoint));
empty_message_view!(DeleteAudioEndpointRsp, response(DeleteAudioEndpoint));
empty_message_view!(GetAudioEndpointsReq, request(GetAudioEndpoints));

message_view!(GetAudioEndpointsRsp, response(GetAudioEndpoints));

impl GetAudioEndpointsRsp {
    pub fn new(correlation_id: u32, endpoints: &[AudioEndpointInfo]) -> Self {
        let msg = endpoints
            .iter()
            .fold(Message::new(Self::MSG_TYPE, correlation_id), |msg, ep| {
                msg.with(ep.to_tlv())
            });
        Self(msg)
    }

    /// Endpoints missing a name or an active flag are left out
    pub fn endpoints(&self) -> Vec<AudioEndpointInfo> {
        self.0
            .tlvs()
            .iter()
            .filter(|tlv| tlv.tlv_type() == TlvType::CLIENT)
            .filter_map(AudioEndpointInfo::from_tlv)
            .collect()
    }
}

empty_message_view!(
    /// Sent by the service whenever the set of known endpoints changes
    AudioEndpointsUpdatedInd,
    indication(AudioEndpointsUpdated)
);

macro_rules! endpoint_selection_view {
    ($name:ident, $opcode:ident) => {
        message_view!($name, request($opcode));

        impl $name {
            /// `None` selects the local endpoint of this client
            pub fn new(correlation_id: u32, endpoint: Option<&str>) -> Self {
                let mut msg = Message::new(Self::MSG_TYPE, correlation_id);
                if let Some(name) = endpoint {
                    msg.add_tlv(Tlv::string(TlvType::LINK, name));
                }
                Self(msg)
            }

            pub fn endpoint_name(&self) -> Option<String> {
                self.0.tlv_string(TlvType::LINK)
            }
        }
    };
}

endpoint_selection_view!(AddAudioEndpointsReq, AddAudioEndpoints);
empty_message_view!(AddAudioEndpointsRsp, response(AddAudioEndpoints));
endpoint_selection_view!(RemoveAudioEndpointsReq, RemoveAudioEndpoints);
empty_message_view!(RemoveAudioEndpointsRsp, response(RemoveAudioEndpoints));

empty_message_view!(GetCurrentAudioEndpointsReq, request(GetCurrentAudioEndpoints));

message_view!(GetCurrentAudioEndpointsRsp, response(GetCurrentAudioEndpoints));

impl GetCurrentAudioEndpointsRsp {
    pub fn new<S: AsRef<str>>(correlation_id: u32, names: &[S]) -> Self {
        let msg = names
            .iter()
            .fold(Message::new(Self::MSG_TYPE, correlation_id), |msg, name| {
                msg.with(Tlv::string(TlvType::LINK, name.as_ref()))
            });
        Self(msg)
    }

    /// Names of the endpoints currently mixed to this client
    pub fn endpoint_names(&self) -> Vec<String> {
        self.0
            .tlvs()
            .iter()
            .filter(|tlv| tlv.tlv_type() == TlvType::LINK)
            .filter_map(Tlv::as_string)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Audio data
// ---------------------------------------------------------------------------

/// A block of interleaved signed 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub channels: u32,
    pub rate: u32,
    /// Number of frames, one sample per channel each
    pub nof_samples: u32,
    pub samples: Vec<i16>,
}

impl AudioData {
    /// Samples of one channel, de-interleaved
    pub fn channel(&self, index: usize) -> Vec<i16> {
        let channels = self.channels as usize;
        if index >= channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(index)
            .step_by(channels)
            .copied()
            .collect()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        self.nof_samples as u64 * 1000 / self.rate as u64
    }
}

message_view!(AudioDataInd, indication(AudioData));

impl AudioDataInd {
    /// `samples` must be interleaved. A trailing partial frame is dropped.
    pub fn new(correlation_id: u32, channels: u32, rate: u32, samples: &[i16]) -> Self {
        let frames = if channels == 0 {
            0
        } else {
            samples.len() / channels as usize
        };
        let used = frames * channels as usize;
        let payload: Vec<u8> = samples[..used]
            .iter()
            .flat_map(|s| s.to_be_bytes())
            .collect();

        Self(
            Message::new(Self::MSG_TYPE, correlation_id)
                .with(Tlv::uint(TlvType::AUDIO_CHANNELS, channels))
                .with(Tlv::uint(TlvType::AUDIO_RATE, rate))
                .with(Tlv::uint(TlvType::AUDIO_NOF_SAMPLES, frames as u32))
                .with(Tlv::bytes(TlvType::AUDIO_DATA, payload)),
        )
    }

    pub fn channels(&self) -> Option<u32> {
        self.0.tlv_u32(TlvType::AUDIO_CHANNELS)
    }

    pub fn rate(&self) -> Option<u32> {
        self.0.tlv_u32(TlvType::AUDIO_RATE)
    }

    pub fn nof_samples(&self) -> Option<u32> {
        self.0.tlv_u32(TlvType::AUDIO_NOF_SAMPLES)
    }

    /// Raw big-endian sample bytes
    pub fn raw_audio_data(&self) -> Option<&[u8]> {
        self.0
            .tlv(TlvType::AUDIO_DATA)
            .and_then(Tlv::as_bytes)
    }

    /// Decoded samples. Only frames that are both declared and fully present
    /// in the payload are returned.
    pub fn audio_data(&self) -> Option<AudioData> {
        let channels = self.channels()?;
        let rate = self.rate()?;
        let declared = self.nof_samples()?;
        let raw = self.raw_audio_data()?;

        let frame_bytes = channels as usize * 2;
        let present = if frame_bytes == 0 {
            0
        } else {
            raw.len() / frame_bytes
        };
        let frames = present.min(declared as usize);

        let samples = raw[..frames * frame_bytes]
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        Some(AudioData {
            channels,
            rate,
            nof_samples: frames as u32,
            samples,
        })
    }
}
