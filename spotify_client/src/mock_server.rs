//! Scripted stand-in for the spotify service, used by the integration tests
//! and the `mock_spotify_server` binary.
//!
//! Serves a fixed library over the real wire protocol, tracks a fake player
//! and streams a test tone to any audio endpoint a client creates.

use crate::connection::MAX_FRAME_LEN;
use log::{debug, error, info, warn};
use spotify_protocol::{
    AddAudioEndpointsReq, AddAudioEndpointsRsp, Album, Artist, AudioDataInd, AudioEndpointInfo,
    AudioEndpointsUpdatedInd, CreateAudioEndpointReq, CreateAudioEndpointRsp,
    DeleteAudioEndpointRsp, FailureCause, Folder, GetAudioEndpointsRsp,
    GetCurrentAudioEndpointsRsp, GetImageRsp, GetPlaylistsRsp, GetStatusRsp, GetTracksReq,
    GetTracksRsp, HelloRsp, ImageFormat, Message, MessageView, Opcode, PlayControlReq,
    PlayControlRsp, PlayOperation, PlayReq, PlayRsp, PlaybackState, Playlist,
    RemoveAudioEndpointsReq, RemoveAudioEndpointsRsp, Role, SearchReq, SearchRsp, SetVolumeReq,
    SetVolumeRsp, StatusInd, Tlv, TlvType, Track, MESSAGE_HEADER_SIZE,
};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

const ACCEPT_INTERVAL: Duration = Duration::from_millis(10);
const TONE_HZ: f32 = 440.0;

/// Configuration for the mock spotify server
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Address to bind the TCP server to (use "127.0.0.1:0" for random port)
    pub bind_address: String,
    /// Playlist tree served by GetPlaylists
    pub library: Folder,
    /// Tracks of each playlist, keyed by playlist uri
    pub tracks: HashMap<String, Vec<Track>>,
    /// Endpoints reported by GetAudioEndpoints
    pub endpoints: Vec<AudioEndpointInfo>,
    /// Requests of these kinds are read but never answered
    pub silent: Vec<Opcode>,
    /// Requests of these kinds are answered with a failure
    pub rejected: Vec<(Opcode, FailureCause)>,
    /// Answers of these kinds are held back for the given time
    pub delays: Vec<(Opcode, Duration)>,
    /// Time between streamed audio packets
    pub audio_interval: Duration,
    pub audio_rate: u32,
    pub audio_channels: u32,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        let (library, tracks) = demo_library();
        Self {
            bind_address: "127.0.0.1:0".to_string(), // Random port
            library,
            tracks,
            endpoints: vec![
                AudioEndpointInfo {
                    name: "Kitchen".to_string(),
                    active: true,
                    volume: 60,
                },
                AudioEndpointInfo {
                    name: "Living Room".to_string(),
                    active: false,
                    volume: 40,
                },
            ],
            silent: Vec::new(),
            rejected: Vec::new(),
            delays: Vec::new(),
            audio_interval: Duration::from_millis(20),
            audio_rate: 44_100,
            audio_channels: 2,
        }
    }
}

/// Library served when nothing else is configured
pub fn demo_library() -> (Folder, HashMap<String, Vec<Track>>) {
    let nirvana = Artist::new("Nirvana", "spotify:artist:nirvana");
    let nevermind = Album::new("Nevermind", "spotify:album:nevermind");
    let blur = Artist::new("Blur", "spotify:artist:blur");
    let parklife = Album::new("Parklife", "spotify:album:parklife");

    let grunge = vec![
        Track::new("Smells Like Teen Spirit", "spotify:track:teen-spirit")
            .with_artist(nirvana.clone())
            .with_album(nevermind.clone())
            .with_duration(301_000)
            .with_index(0),
        Track::new("Lithium", "spotify:track:lithium")
            .with_artist(nirvana.clone())
            .with_album(nevermind.clone())
            .with_duration(257_000)
            .with_index(1),
        Track::new("In Bloom", "spotify:track:in-bloom")
            .with_artist(nirvana)
            .with_album(nevermind)
            .with_duration(254_000)
            .with_index(2),
    ];
    let britpop = vec![
        Track::new("Girls & Boys", "spotify:track:girls-and-boys")
            .with_artist(blur.clone())
            .with_album(parklife.clone())
            .with_duration(290_000)
            .with_index(0),
        Track::new("Parklife", "spotify:track:parklife")
            .with_artist(blur)
            .with_album(parklife)
            .with_duration(185_000)
            .with_index(1),
    ];

    let mut nineties = Folder::new("Nineties", 1);
    nineties
        .playlists
        .push(Playlist::new("Britpop", "spotify:playlist:britpop"));
    let mut root = Folder::new("Library", 0);
    root.playlists
        .push(Playlist::new("Grunge", "spotify:playlist:grunge"));
    root.folders.push(nineties);

    let mut tracks = HashMap::new();
    tracks.insert("spotify:playlist:grunge".to_string(), grunge);
    tracks.insert("spotify:playlist:britpop".to_string(), britpop);
    (root, tracks)
}

#[derive(Debug, Clone)]
struct Player {
    state: PlaybackState,
    queue: Vec<Track>,
    position: usize,
    volume: u8,
}

impl Player {
    fn current(&self) -> Option<&Track> {
        self.queue.get(self.position)
    }
}

type Writer = Arc<Mutex<TcpStream>>;

struct ClientSlot {
    writer: Writer,
    audio_stop: Option<Arc<AtomicBool>>,
}

/// State shared by the accept loop and every client thread
struct ServerState {
    config: MockServerConfig,
    should_stop: AtomicBool,
    clients: Mutex<HashMap<usize, ClientSlot>>,
    next_client_id: AtomicUsize,
    player: Mutex<Player>,
    endpoints: Mutex<Vec<AudioEndpointInfo>>,
    received: Mutex<Vec<Message>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock spotify service
pub struct MockSpotifyServer {
    state: Arc<ServerState>,
    actual_port: Option<u16>,
}

impl MockSpotifyServer {
    pub fn new(config: MockServerConfig) -> Self {
        info!("🎵 Mock spotify server configured:");
        info!("  📁 Playlists: {}", config.library.all_playlists().len());
        info!("  🔊 Endpoints: {}", config.endpoints.len());

        let endpoints = config.endpoints.clone();
        Self {
            state: Arc::new(ServerState {
                config,
                should_stop: AtomicBool::new(false),
                clients: Mutex::new(HashMap::new()),
                next_client_id: AtomicUsize::new(1),
                player: Mutex::new(Player {
                    state: PlaybackState::Idle,
                    queue: Vec::new(),
                    position: 0,
                    volume: 50,
                }),
                endpoints: Mutex::new(endpoints),
                received: Mutex::new(Vec::new()),
            }),
            actual_port: None,
        }
    }

    /// Start the server and return the actual bound port
    pub fn start(&mut self) -> io::Result<u16> {
        let listener = TcpListener::bind(&self.state.config.bind_address)?;
        listener.set_nonblocking(true)?;
        let actual_port = listener.local_addr()?.port();
        self.actual_port = Some(actual_port);
        info!("🎵 Mock spotify server listening on port {}", actual_port);

        let state = self.state.clone();
        thread::Builder::new()
            .name("mock-spotify-accept".to_string())
            .spawn(move || accept_loop(listener, state))?;
        Ok(actual_port)
    }

    /// Start the server in a background thread and return a handle for testing
    pub fn start_background(mut self) -> io::Result<MockServerHandle> {
        let port = self.start()?;
        Ok(MockServerHandle {
            port,
            state: self.state.clone(),
        })
    }

    pub fn stop(&self) {
        stop_server(&self.state);
    }

    pub fn port(&self) -> Option<u16> {
        self.actual_port
    }
}

/// Handle for a mock server running in the background. Stops it on drop.
pub struct MockServerHandle {
    pub port: u16,
    state: Arc<ServerState>,
}

impl MockServerHandle {
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn client_count(&self) -> usize {
        lock(&self.state.clients).len()
    }

    /// Every request received so far, in arrival order
    pub fn received(&self) -> Vec<Message> {
        lock(&self.state.received).clone()
    }

    pub fn received_count(&self, opcode: Opcode) -> usize {
        lock(&self.state.received)
            .iter()
            .filter(|message| message.msg_type().opcode == opcode)
            .count()
    }

    /// Master volume last set without an endpoint name
    pub fn volume(&self) -> u8 {
        lock(&self.state.player).volume
    }

    pub fn endpoints(&self) -> Vec<AudioEndpointInfo> {
        lock(&self.state.endpoints).clone()
    }

    /// Push a message to every connected client
    pub fn broadcast(&self, message: &Message) {
        self.broadcast_raw(&message.encode());
    }

    /// Push raw bytes to every connected client
    pub fn broadcast_raw(&self, bytes: &[u8]) {
        let writers: Vec<Writer> = lock(&self.state.clients)
            .values()
            .map(|slot| slot.writer.clone())
            .collect();
        for writer in writers {
            if let Err(e) = lock(&writer).write_all(bytes) {
                debug!("Broadcast failed: {}", e);
            }
        }
    }

    /// Close every client connection while keeping the listener up
    pub fn disconnect_clients(&self) {
        for slot in lock(&self.state.clients).values() {
            let _ = lock(&slot.writer).shutdown(Shutdown::Both);
        }
    }

    pub fn stop(&self) {
        stop_server(&self.state);
    }
}

impl Drop for MockServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_server(state: &ServerState) {
    if state.should_stop.swap(true, Ordering::SeqCst) {
        return;
    }
    for slot in lock(&state.clients).values() {
        let _ = lock(&slot.writer).shutdown(Shutdown::Both);
        if let Some(stop) = &slot.audio_stop {
            stop.store(true, Ordering::Relaxed);
        }
    }
    info!("🛑 Mock spotify server stopped");
}

fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    while !state.should_stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = register_client(stream, peer, &state) {
                    error!("❌ Failed to set up client {}: {}", peer, e);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_INTERVAL)
            }
            Err(e) => {
                error!("Connection error: {}", e);
                thread::sleep(ACCEPT_INTERVAL);
            }
        }
    }
}

fn register_client(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let client_id = state.next_client_id.fetch_add(1, Ordering::Relaxed);
    let writer = Arc::new(Mutex::new(stream.try_clone()?));
    lock(&state.clients).insert(
        client_id,
        ClientSlot {
            writer: writer.clone(),
            audio_stop: None,
        },
    );
    info!("📡 Client {} connected from {}", client_id, peer);

    let state = state.clone();
    thread::Builder::new()
        .name(format!("mock-spotify-client-{}", client_id))
        .spawn(move || {
            if let Err(e) = handle_client(stream, peer, client_id, &writer, &state) {
                debug!("Client {} error: {}", client_id, e);
            }
            if let Some(slot) = lock(&state.clients).remove(&client_id) {
                if let Some(stop) = slot.audio_stop {
                    stop.store(true, Ordering::Relaxed);
                }
            }
            info!("🔌 Client {} disconnected", client_id);
        })?;
    Ok(())
}

fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix)?;
    let length = u32::from_be_bytes(prefix) as usize;
    if !(MESSAGE_HEADER_SIZE..=MAX_FRAME_LEN).contains(&length) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Bad frame length {}", length),
        ));
    }
    let mut frame = vec![0u8; length];
    frame[..4].copy_from_slice(&prefix);
    stream.read_exact(&mut frame[4..])?;
    Ok(frame)
}

fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    client_id: usize,
    writer: &Writer,
    state: &Arc<ServerState>,
) -> io::Result<()> {
    loop {
        if state.should_stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        let frame = read_frame(&mut stream)?;
        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("⚠️ Client {} sent an undecodable frame: {}", client_id, e);
                continue;
            }
        };
        debug!("📥 Client {}: {}", client_id, message);

        if message.msg_type().role != Role::Request {
            warn!(
                "⚠️ Client {} sent unexpected message: {}",
                client_id,
                message.msg_type()
            );
            continue;
        }
        lock(&state.received).push(message.clone());

        let opcode = message.msg_type().opcode;
        if state.config.silent.contains(&opcode) {
            debug!("🤐 Not answering {}", message.msg_type());
            continue;
        }

        let replies = match rejection(state, &message) {
            Some(failure) => vec![failure],
            None => answer(state, client_id, peer, message),
        };
        let delay = state
            .config
            .delays
            .iter()
            .find(|(delayed, _)| *delayed == opcode)
            .map(|(_, delay)| *delay);

        match delay {
            Some(delay) => {
                let writer = writer.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    if let Err(e) = write_all(&writer, &replies) {
                        debug!("Delayed reply failed: {}", e);
                    }
                });
            }
            None => write_all(writer, &replies)?,
        }
    }
}

fn write_all(writer: &Writer, replies: &[Message]) -> io::Result<()> {
    let mut stream = lock(writer);
    for reply in replies {
        debug!("📤 {}", reply);
        stream.write_all(&reply.encode())?;
    }
    Ok(())
}

fn rejection(state: &ServerState, request: &Message) -> Option<Message> {
    state
        .config
        .rejected
        .iter()
        .find(|(opcode, _)| *opcode == request.msg_type().opcode)
        .map(|(_, cause)| {
            Message::new(request.msg_type().response_type(), request.correlation_id())
                .with(Tlv::uint(TlvType::FAILURE, (*cause).into()))
        })
}

/// Replies for one request: the response first, then any indications it triggers
fn answer(state: &ServerState, client_id: usize, peer: SocketAddr, request: Message) -> Vec<Message> {
    let id = request.correlation_id();
    match request.msg_type().opcode {
        Opcode::Hello => vec![HelloRsp::new(id).into_message()],
        Opcode::GetPlaylists => {
            vec![GetPlaylistsRsp::new(id, &state.config.library).into_message()]
        }
        Opcode::GetTracks => {
            let uri = GetTracksReq::from_message(request)
                .ok()
                .and_then(|req| req.playlist_uri())
                .unwrap_or_default();
            let tracks = state.config.tracks.get(&uri).cloned().unwrap_or_default();
            vec![GetTracksRsp::new(id, &tracks).into_message()]
        }
        Opcode::GetImage => {
            // JPEG magic plus a few bytes of nothing
            let data = [0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];
            vec![GetImageRsp::new(id, ImageFormat::Jpeg, &data).into_message()]
        }
        Opcode::GenericSearch => {
            let query = SearchReq::from_message(request)
                .ok()
                .and_then(|req| req.query())
                .unwrap_or_default()
                .to_lowercase();
            let hits: Vec<Track> = state
                .config
                .tracks
                .values()
                .flatten()
                .filter(|track| !query.is_empty() && track.name.to_lowercase().contains(&query))
                .cloned()
                .collect();
            vec![SearchRsp::new(id, &hits).into_message()]
        }
        Opcode::Play => {
            if let Ok(req) = PlayReq::from_message(request) {
                start_playback(state, &req);
            }
            vec![PlayRsp::new(id).into_message(), status_indication(state)]
        }
        Opcode::PlayControl => {
            if let Some(operation) = PlayControlReq::from_message(request)
                .ok()
                .and_then(|req| req.operation())
            {
                control_playback(state, operation);
            }
            vec![PlayControlRsp::new(id).into_message(), status_indication(state)]
        }
        Opcode::SetVolume => {
            if let Ok(req) = SetVolumeReq::from_message(request) {
                set_volume(state, &req);
            }
            vec![SetVolumeRsp::new(id).into_message()]
        }
        Opcode::GetStatus => {
            let player = lock(&state.player);
            vec![GetStatusRsp::new(id, player.state, player.current(), Some(0)).into_message()]
        }
        Opcode::CreateAudioEndpoint => {
            if let Some(port) = CreateAudioEndpointReq::from_message(request)
                .ok()
                .and_then(|req| req.port())
            {
                start_audio_stream(state, client_id, SocketAddr::new(peer.ip(), port));
            }
            vec![CreateAudioEndpointRsp::new(id).into_message()]
        }
        Opcode::DeleteAudioEndpoint => {
            stop_audio_stream(state, client_id);
            vec![DeleteAudioEndpointRsp::new(id).into_message()]
        }
        Opcode::GetAudioEndpoints => {
            let endpoints = lock(&state.endpoints).clone();
            vec![GetAudioEndpointsRsp::new(id, &endpoints).into_message()]
        }
        Opcode::AddAudioEndpoints => {
            let name = AddAudioEndpointsReq::from_message(request)
                .ok()
                .and_then(|req| req.endpoint_name());
            set_endpoint_active(state, name.as_deref(), true);
            vec![
                AddAudioEndpointsRsp::new(id).into_message(),
                AudioEndpointsUpdatedInd::new(0).into_message(),
            ]
        }
        Opcode::RemoveAudioEndpoints => {
            let name = RemoveAudioEndpointsReq::from_message(request)
                .ok()
                .and_then(|req| req.endpoint_name());
            set_endpoint_active(state, name.as_deref(), false);
            vec![
                RemoveAudioEndpointsRsp::new(id).into_message(),
                AudioEndpointsUpdatedInd::new(0).into_message(),
            ]
        }
        Opcode::GetCurrentAudioEndpoints => {
            let active: Vec<String> = lock(&state.endpoints)
                .iter()
                .filter(|endpoint| endpoint.active)
                .map(|endpoint| endpoint.name.clone())
                .collect();
            vec![GetCurrentAudioEndpointsRsp::new(id, &active).into_message()]
        }
        Opcode::AudioEndpointsUpdated | Opcode::AudioData => {
            warn!("⚠️ {} is not a request the service answers", request.msg_type());
            Vec::new()
        }
    }
}

fn status_indication(state: &ServerState) -> Message {
    let player = lock(&state.player);
    StatusInd::new(0, player.state, player.current(), Some(0)).into_message()
}

fn start_playback(state: &ServerState, req: &PlayReq) {
    let uri = req.uri().unwrap_or_default();
    let queue = match state.config.tracks.get(&uri) {
        Some(tracks) => tracks.clone(),
        None => state
            .config
            .tracks
            .values()
            .flatten()
            .filter(|track| track.uri == uri)
            .take(1)
            .cloned()
            .collect(),
    };
    let mut player = lock(&state.player);
    player.position = req.start_index().unwrap_or(0) as usize;
    player.state = if queue.get(player.position).is_some() {
        PlaybackState::Playing
    } else {
        PlaybackState::Idle
    };
    player.queue = queue;
    info!("▶️ Playing {} from index {}", uri, player.position);
}

fn control_playback(state: &ServerState, operation: PlayOperation) {
    let mut player = lock(&state.player);
    match operation {
        PlayOperation::Pause if player.state == PlaybackState::Playing => {
            player.state = PlaybackState::Paused
        }
        PlayOperation::Resume if player.state == PlaybackState::Paused => {
            player.state = PlaybackState::Playing
        }
        PlayOperation::Next if player.position + 1 < player.queue.len() => player.position += 1,
        PlayOperation::Prev if player.position > 0 => player.position -= 1,
        _ => debug!("Ignoring {:?} in state {:?}", operation, player.state),
    }
}

fn set_volume(state: &ServerState, req: &SetVolumeReq) {
    let volume = req.volume().unwrap_or(0);
    match req.endpoint_name() {
        Some(name) => {
            for endpoint in lock(&state.endpoints).iter_mut() {
                if endpoint.name == name {
                    endpoint.volume = volume;
                }
            }
        }
        None => lock(&state.player).volume = volume,
    }
}

fn set_endpoint_active(state: &ServerState, name: Option<&str>, active: bool) {
    let mut endpoints = lock(&state.endpoints);
    match name {
        Some(name) => match endpoints.iter_mut().find(|endpoint| endpoint.name == name) {
            Some(endpoint) => endpoint.active = active,
            None => endpoints.push(AudioEndpointInfo {
                name: name.to_string(),
                active,
                volume: 50,
            }),
        },
        None => debug!("Local endpoint selection is not tracked"),
    }
}

fn start_audio_stream(state: &ServerState, client_id: usize, target: SocketAddr) {
    stop_audio_stream(state, client_id);
    let stop = Arc::new(AtomicBool::new(false));
    if let Some(slot) = lock(&state.clients).get_mut(&client_id) {
        slot.audio_stop = Some(stop.clone());
    }

    let interval = state.config.audio_interval;
    let rate = state.config.audio_rate.max(1);
    let channels = state.config.audio_channels.max(1);
    let spawned = thread::Builder::new()
        .name(format!("mock-spotify-audio-{}", client_id))
        .spawn(move || {
            if let Err(e) = stream_tone(target, interval, rate, channels, &stop) {
                warn!("⚠️ Audio stream to {} ended: {}", target, e);
            }
        });
    if let Err(e) = spawned {
        error!("❌ Failed to start audio stream: {}", e);
    }
}

fn stop_audio_stream(state: &ServerState, client_id: usize) {
    if let Some(slot) = lock(&state.clients).get_mut(&client_id) {
        if let Some(stop) = slot.audio_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
    }
}

/// Send interleaved sine tone packets until told to stop
fn stream_tone(
    target: SocketAddr,
    interval: Duration,
    rate: u32,
    channels: u32,
    stop: &AtomicBool,
) -> io::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    let frames_per_packet = ((rate as u128 * interval.as_millis()) / 1000).max(1) as usize;
    let mut phase = 0usize;
    let mut packets = 0u64;
    info!("🎶 Streaming test tone to {}", target);

    while !stop.load(Ordering::Relaxed) {
        let mut samples = Vec::with_capacity(frames_per_packet * channels as usize);
        for frame in 0..frames_per_packet {
            let t = (phase + frame) as f32 / rate as f32;
            let value = ((t * TONE_HZ * std::f32::consts::TAU).sin() * 8_000.0) as i16;
            samples.extend(std::iter::repeat(value).take(channels as usize));
        }
        phase += frames_per_packet;

        socket.send_to(&AudioDataInd::new(0, channels, rate, &samples).encode(), target)?;
        packets += 1;
        if packets % 500 == 0 {
            debug!("🎵 Sent {} audio packets", packets);
        }
        thread::sleep(interval);
    }
    info!("🛑 Audio stream to {} stopped", target);
    Ok(())
}
