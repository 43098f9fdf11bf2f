//! Session with the spotify service.
//!
//! A single worker thread owns the TCP connection and the audio endpoint
//! socket and multiplexes both with `mio`. Callers talk to it through a
//! command channel plus a waker; responses come back through the pending
//! table and observers are called on the worker thread.

use crate::audio_endpoint::AudioEndpoint;
use crate::backoff::Backoff;
use crate::config::{validate_ip, validate_port, ClientConfig};
use crate::connection::Connection;
use crate::error::{ClientError, Result};
use crate::observers::{ConnectionEvent, ObserverId, Observers, StatusEvent};
use crate::pending::{response_channel, CorrelationIds, PendingTable, ResponseHandle};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use mio::{Events, Interest, Poll, Token, Waker};
use spotify_protocol::{
    AddAudioEndpointsReq, AudioData, AudioDataInd, AudioEndpointInfo, AudioEndpointProtocol,
    CreateAudioEndpointReq, DeleteAudioEndpointReq, Folder, GetAudioEndpointsReq,
    GetAudioEndpointsRsp, GetCurrentAudioEndpointsReq, GetCurrentAudioEndpointsRsp, GetImageReq,
    GetImageRsp, GetPlaylistsReq, GetPlaylistsRsp, GetStatusReq, GetStatusRsp, GetTracksReq,
    GetTracksRsp, HelloReq, HelloRsp, ImageFormat, Message, MessageHeader, MessageView, Opcode,
    PlayControlReq, PlayOperation, PlayReq, Playlist, RemoveAudioEndpointsReq, Role, SearchReq,
    SearchRsp, SetVolumeReq, StatusInd, Track,
};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAKER: Token = Token(0);
const SERVER: Token = Token(1);
const AUDIO: Token = Token(2);

/// Upper bound on one poll wait. Pending deadlines are swept at least this often.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal, entered once `stop` has run
    Stopped,
}

/// Cover art returned by `get_image`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub format: ImageFormat,
    pub data: Vec<u8>,
}

enum Command {
    Send {
        frame: Vec<u8>,
        correlation_id: Option<u32>,
    },
    AttachAudio(AudioEndpoint),
    DetachAudio,
    Reconnect(SocketAddr),
}

/// State shared between the caller-facing handle and the worker
struct Shared {
    state: Mutex<ConnectionState>,
    stopping: AtomicBool,
    request_timeout: Duration,
    ids: CorrelationIds,
    pending: PendingTable,
    observers: Observers,
    playlists: Mutex<Vec<Playlist>>,
    root_folder: Mutex<Option<Folder>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Worker lifecycle. Start and stop both hold the same lock, so a stop
/// always sees either the unstarted worker or the handle to join.
enum WorkerSlot {
    Idle(Worker),
    Running(JoinHandle<()>),
    Finished,
}

/// Client for the spotify remote-control service.
///
/// `new` prepares everything but does not connect, so observers can be
/// registered before the first connection event. `start` launches the
/// worker. Dropping the client stops it.
pub struct SpotifyClient {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    waker: Arc<Waker>,
    worker: Mutex<WorkerSlot>,
    audio_port: Mutex<Option<u16>>,
}

impl SpotifyClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let server = config.server_addr()?;
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (commands, receiver) = channel::unbounded();

        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            stopping: AtomicBool::new(false),
            request_timeout: config.request_timeout(),
            ids: CorrelationIds::new(),
            pending: PendingTable::new(),
            observers: Observers::default(),
            playlists: Mutex::new(Vec::new()),
            root_folder: Mutex::new(None),
        });

        let worker = Worker {
            shared: shared.clone(),
            poll,
            commands: receiver,
            server,
            connect_timeout: config.connect_timeout(),
            backoff: Backoff::new(config.min_backoff(), config.max_backoff()),
            connection: None,
            write_interest: false,
            audio: None,
        };

        Ok(Self {
            shared,
            commands,
            waker,
            worker: Mutex::new(WorkerSlot::Idle(worker)),
            audio_port: Mutex::new(None),
        })
    }

    /// Launch the worker thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut slot = lock(&self.worker);
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(ClientError::Stopped);
        }
        let worker = match mem::replace(&mut *slot, WorkerSlot::Finished) {
            WorkerSlot::Idle(worker) => worker,
            other => {
                *slot = other;
                debug!("Session worker already started");
                return Ok(());
            }
        };
        let handle = thread::Builder::new()
            .name("spotify-session".to_string())
            .spawn(move || worker.run())?;
        *slot = WorkerSlot::Running(handle);
        Ok(())
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 Stopping spotify session");
        if let Err(e) = self.waker.wake() {
            warn!("⚠️ Failed to wake session worker: {}", e);
        }

        let slot = mem::replace(&mut *lock(&self.worker), WorkerSlot::Finished);
        match slot {
            // an observer calling stop runs on the worker itself
            WorkerSlot::Running(handle) if handle.thread().id() != thread::current().id() => {
                if handle.join().is_err() {
                    error!("❌ Session worker panicked");
                }
            }
            WorkerSlot::Running(_) => {}
            WorkerSlot::Idle(_) | WorkerSlot::Finished => {
                self.shared.pending.fail_all(|| ClientError::Stopped);
                self.shared.set_state(ConnectionState::Stopped);
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Drop the current connection and reconnect to a new address
    pub fn reconnect(&self, host: &str, port: u32) -> Result<()> {
        let ip = validate_ip(host).map_err(|e| ClientError::InvalidAddress(e.to_string()))?;
        let port = validate_port(port).map_err(|e| ClientError::InvalidAddress(e.to_string()))?;
        let addr = SocketAddr::from((ip, port));
        info!("🔄 Reconnecting to {}", addr);
        self.submit(Command::Reconnect(addr))
    }

    // ---------------------------------------------------------------------
    // Observers
    // ---------------------------------------------------------------------

    pub fn register_connection_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.observers.connection.register(observer)
    }

    /// Called with the full playlist list whenever a playlist response arrives
    pub fn register_playlists_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Vec<Playlist>) + Send + Sync + 'static,
    {
        self.shared.observers.playlists.register(observer)
    }

    pub fn register_status_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.shared.observers.status.register(observer)
    }

    pub fn register_audio_endpoints_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.shared.observers.endpoints_updated.register(observer)
    }

    /// Remove an observer from whichever category it was registered in
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        let observers = &self.shared.observers;
        observers.connection.unregister(id)
            || observers.playlists.unregister(id)
            || observers.status.unregister(id)
            || observers.endpoints_updated.unregister(id)
    }

    /// Install the single consumer of decoded audio, replacing any previous one
    pub fn set_audio_data_callback<F>(&self, callback: F)
    where
        F: FnMut(AudioData) + Send + 'static,
    {
        self.shared.observers.audio_data.set(Some(Box::new(callback)));
    }

    pub fn clear_audio_data_callback(&self) {
        self.shared.observers.audio_data.set(None);
    }

    /// Playlists from the most recent playlist response
    pub fn playlists(&self) -> Vec<Playlist> {
        lock(&self.shared.playlists).clone()
    }

    pub fn root_folder(&self) -> Option<Folder> {
        lock(&self.shared.root_folder).clone()
    }

    // ---------------------------------------------------------------------
    // Correlated requests
    // ---------------------------------------------------------------------

    /// Announce ourselves. Resolves to the peer's protocol version, if sent.
    pub fn hello(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<ResponseHandle<Option<(u32, u32)>>> {
        self.request(
            |id| HelloReq::new(id, username, password).into_message(),
            |rsp: HelloRsp| rsp.protocol_version(),
        )
    }

    pub fn get_tracks(&self, playlist_uri: &str) -> Result<ResponseHandle<Vec<Track>>> {
        self.request(
            |id| GetTracksReq::new(id, playlist_uri).into_message(),
            |rsp: GetTracksRsp| rsp.all_tracks(),
        )
    }

    pub fn search(&self, query: &str) -> Result<ResponseHandle<Vec<Track>>> {
        self.request(
            |id| SearchReq::new(id, query).into_message(),
            |rsp: SearchRsp| rsp.all_tracks(),
        )
    }

    pub fn get_image(&self, uri: &str) -> Result<ResponseHandle<Image>> {
        self.request(
            |id| GetImageReq::new(id, uri).into_message(),
            |rsp: GetImageRsp| Image {
                format: rsp.image_format().unwrap_or(ImageFormat::Unknown),
                data: rsp.image_data().map(<[u8]>::to_vec).unwrap_or_default(),
            },
        )
    }

    pub fn get_audio_endpoints(&self) -> Result<ResponseHandle<Vec<AudioEndpointInfo>>> {
        self.request(
            |id| GetAudioEndpointsReq::new(id).into_message(),
            |rsp: GetAudioEndpointsRsp| rsp.endpoints(),
        )
    }

    /// Names of the endpoints currently playing
    pub fn get_current_audio_endpoints(&self) -> Result<ResponseHandle<Vec<String>>> {
        self.request(
            |id| GetCurrentAudioEndpointsReq::new(id).into_message(),
            |rsp: GetCurrentAudioEndpointsRsp| rsp.endpoint_names(),
        )
    }

    // ---------------------------------------------------------------------
    // Fire-and-forget requests
    // ---------------------------------------------------------------------

    /// Ask for the playlists. The answer reaches the playlist observers.
    pub fn request_playlists(&self) -> Result<()> {
        self.send(|id| GetPlaylistsReq::new(id).into_message())
    }

    /// Ask for the playback status. The answer reaches the status observers.
    pub fn request_status(&self) -> Result<()> {
        self.send(|id| GetStatusReq::new(id).into_message())
    }

    /// Play a track, album or playlist uri, optionally from a track index
    pub fn play(&self, uri: &str, start_index: Option<u32>) -> Result<()> {
        self.send(|id| PlayReq::new(id, uri, start_index).into_message())
    }

    pub fn play_control(&self, operation: PlayOperation) -> Result<()> {
        self.send(|id| PlayControlReq::new(id, operation).into_message())
    }

    /// Set the volume (0-255) of one endpoint, or the master volume
    pub fn set_volume(&self, volume: u8, endpoint: Option<&str>) -> Result<()> {
        self.send(|id| SetVolumeReq::new(id, volume, endpoint).into_message())
    }

    /// Add an endpoint to the set being played to. `None` adds the local one.
    pub fn add_audio_endpoint(&self, endpoint: Option<&str>) -> Result<()> {
        self.send(|id| AddAudioEndpointsReq::new(id, endpoint).into_message())
    }

    pub fn remove_audio_endpoint(&self, endpoint: Option<&str>) -> Result<()> {
        self.send(|id| RemoveAudioEndpointsReq::new(id, endpoint).into_message())
    }

    // ---------------------------------------------------------------------
    // Local audio endpoint
    // ---------------------------------------------------------------------

    /// Bind a UDP socket for streamed audio and announce it to the service.
    /// Returns the bound port.
    pub fn create_audio_endpoint(&self, volume: Option<u8>) -> Result<u16> {
        self.ensure_connected()?;
        let endpoint = AudioEndpoint::bind()?;
        let port = endpoint.port();
        self.submit(Command::AttachAudio(endpoint))?;
        *lock(&self.audio_port) = Some(port);

        self.send(|id| {
            CreateAudioEndpointReq::new(id, port, AudioEndpointProtocol::LightweightUdp, volume)
                .into_message()
        })?;
        Ok(port)
    }

    /// Close the local socket, then tell the service to stop streaming
    pub fn delete_audio_endpoint(&self) -> Result<()> {
        if lock(&self.audio_port).take().is_none() {
            debug!("🔇 No audio endpoint to delete");
        }
        self.submit(Command::DetachAudio)?;
        self.send(|id| DeleteAudioEndpointReq::new(id).into_message())
    }

    /// Port of the local audio endpoint, if one was created
    pub fn audio_endpoint_port(&self) -> Option<u16> {
        *lock(&self.audio_port)
    }

    // ---------------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------------

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Stopped => Err(ClientError::Stopped),
            _ => Err(ClientError::NotConnected),
        }
    }

    fn request<R, T, B, X>(&self, build: B, extract: X) -> Result<ResponseHandle<T>>
    where
        R: MessageView,
        T: Send + 'static,
        B: FnOnce(u32) -> Message,
        X: FnOnce(R) -> T + Send + 'static,
    {
        self.ensure_connected()?;
        let correlation_id = self.shared.ids.next_id();
        let message = build(correlation_id);
        let (sender, handle) = response_channel(correlation_id);

        self.shared.pending.insert(
            correlation_id,
            Instant::now() + self.shared.request_timeout,
            Box::new(move |result: Result<Message>| {
                let typed = result
                    .and_then(|message| R::from_message(message).map_err(ClientError::from))
                    .map(extract);
                // the caller may have dropped the handle
                let _ = sender.send(typed);
            }),
        );

        debug!("📤 Sending {}", message);
        let sent = self.submit(Command::Send {
            frame: message.encode(),
            correlation_id: Some(correlation_id),
        });
        if let Err(e) = sent {
            self.shared.pending.cancel(correlation_id);
            return Err(e);
        }
        Ok(handle)
    }

    /// Uncorrelated send. Dropped with a log line while not connected.
    fn send<B>(&self, build: B) -> Result<()>
    where
        B: FnOnce(u32) -> Message,
    {
        let message = build(self.shared.ids.next_id());
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Stopped => return Err(ClientError::Stopped),
            _ => {
                debug!("📤 Not connected, dropping {}", message);
                return Ok(());
            }
        }
        debug!("📤 Sending {}", message);
        self.submit(Command::Send {
            frame: message.encode(),
            correlation_id: None,
        })
    }

    fn submit(&self, command: Command) -> Result<()> {
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(ClientError::Stopped);
        }
        self.commands
            .send(command)
            .map_err(|_| ClientError::Stopped)?;
        self.waker.wake()?;
        Ok(())
    }
}

impl Drop for SpotifyClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What a poll round asks the run loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    ConnectionLost,
    Reconnect,
}

struct Worker {
    shared: Arc<Shared>,
    poll: Poll,
    commands: Receiver<Command>,
    server: SocketAddr,
    connect_timeout: Duration,
    backoff: Backoff,
    connection: Option<Connection>,
    write_interest: bool,
    audio: Option<AudioEndpoint>,
}

impl Worker {
    fn run(mut self) {
        info!("🚀 Spotify session worker started for {}", self.server);
        let mut events = Events::with_capacity(64);
        let mut announce_disconnect = true;

        while !self.stopping() {
            if self.connection.is_none() {
                if announce_disconnect {
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.shared
                        .observers
                        .connection
                        .notify(&ConnectionEvent::Disconnected);
                    announce_disconnect = false;
                }
                if !self.try_connect() {
                    let delay = self.backoff.next_delay();
                    debug!("⏳ Next connection attempt in {:?}", delay);
                    self.wait(&mut events, delay);
                    continue;
                }
            }

            match self.poll_once(&mut events, POLL_INTERVAL) {
                Outcome::Continue => {}
                Outcome::ConnectionLost | Outcome::Reconnect => {
                    self.teardown();
                    announce_disconnect = true;
                }
            }
        }

        self.shared.pending.fail_all(|| ClientError::Stopped);
        self.teardown();
        self.detach_audio();
        self.shared.set_state(ConnectionState::Stopped);
        info!("✅ Spotify session worker stopped");
    }

    fn stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    fn try_connect(&mut self) -> bool {
        self.shared.set_state(ConnectionState::Connecting);
        info!("📡 Connecting to spotify service at {}", self.server);

        let mut connection = match Connection::connect(self.server, self.connect_timeout) {
            Ok(connection) => connection,
            Err(e) => {
                warn!("❌ Failed to connect to {}: {}", self.server, e);
                self.shared.set_state(ConnectionState::Disconnected);
                return false;
            }
        };
        if let Err(e) =
            self.poll
                .registry()
                .register(connection.stream_mut(), SERVER, Interest::READABLE)
        {
            error!("❌ Failed to register connection: {}", e);
            self.shared.set_state(ConnectionState::Disconnected);
            return false;
        }

        self.connection = Some(connection);
        self.write_interest = false;
        self.backoff.reset();
        self.shared.set_state(ConnectionState::Connected);
        info!("✅ Connected to spotify service at {}", self.server);
        self.shared
            .observers
            .connection
            .notify(&ConnectionEvent::Connected);
        true
    }

    /// Sleep out a backoff delay while still serving commands and audio.
    /// Returns early on stop or reconnect.
    fn wait(&mut self, events: &mut Events, delay: Duration) {
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline || self.stopping() {
                return;
            }
            if self.poll_once(events, deadline - now) == Outcome::Reconnect {
                self.backoff.reset();
                return;
            }
        }
    }

    fn poll_once(&mut self, events: &mut Events, timeout: Duration) -> Outcome {
        if let Err(e) = self.poll.poll(events, Some(timeout)) {
            if e.kind() != io::ErrorKind::Interrupted {
                error!("❌ Poll failed: {}", e);
            }
            return Outcome::Continue;
        }

        let mut outcome = Outcome::Continue;
        for event in events.iter() {
            match event.token() {
                SERVER => {
                    if event.is_readable() && !self.read_server() {
                        outcome = Outcome::ConnectionLost;
                    }
                    if event.is_writable() && !self.flush_server() {
                        outcome = Outcome::ConnectionLost;
                    }
                }
                AUDIO => self.read_audio(),
                // commands are drained below
                WAKER => {}
                _ => {}
            }
        }

        if self.drain_commands() == Outcome::Reconnect {
            outcome = Outcome::Reconnect;
        }
        if outcome == Outcome::Continue && !self.flush_server() {
            outcome = Outcome::ConnectionLost;
        }

        self.shared.pending.expire(Instant::now());
        outcome
    }

    fn drain_commands(&mut self) -> Outcome {
        let mut outcome = Outcome::Continue;
        loop {
            match self.commands.try_recv() {
                Ok(Command::Send {
                    frame,
                    correlation_id,
                }) => self.queue_frame(frame, correlation_id),
                Ok(Command::AttachAudio(endpoint)) => self.attach_audio(endpoint),
                Ok(Command::DetachAudio) => self.detach_audio(),
                Ok(Command::Reconnect(addr)) => {
                    self.server = addr;
                    outcome = Outcome::Reconnect;
                }
                Err(TryRecvError::Empty) => return outcome,
                Err(TryRecvError::Disconnected) => {
                    // the client handle is gone
                    self.shared.stopping.store(true, Ordering::SeqCst);
                    return outcome;
                }
            }
        }
    }

    fn queue_frame(&mut self, frame: Vec<u8>, correlation_id: Option<u32>) {
        match self.connection.as_mut() {
            Some(connection) => connection.queue_write(&frame),
            None => match correlation_id {
                Some(id) => {
                    self.shared.pending.complete(id, Err(ClientError::NotConnected));
                }
                None => debug!("📤 Connection gone, dropped {} byte frame", frame.len()),
            },
        }
    }

    /// Returns false when the connection has to be torn down
    fn flush_server(&mut self) -> bool {
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return true,
        };
        if let Err(e) = connection.flush_write_buffer() {
            error!("❌ Write to {} failed: {}", connection.peer(), e);
            return false;
        }

        let want_write = connection.write_pending() > 0;
        if want_write != self.write_interest {
            let interest = if want_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if let Err(e) =
                self.poll
                    .registry()
                    .reregister(connection.stream_mut(), SERVER, interest)
            {
                error!("❌ Failed to update connection interest: {}", e);
                return false;
            }
            self.write_interest = want_write;
        }
        true
    }

    /// Returns false when the connection has to be torn down
    fn read_server(&mut self) -> bool {
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return true,
        };

        let read = connection.fill_read_buffer();
        // frames that arrived before an EOF are still delivered
        loop {
            match connection.next_frame() {
                Ok(Some(frame)) => dispatch(&self.shared, &frame),
                Ok(None) => break,
                Err(e) => {
                    error!("❌ Corrupt frame from {}: {}", connection.peer(), e);
                    return false;
                }
            }
        }

        match read {
            Ok(_) => true,
            Err(e) => {
                warn!("⚠️ Connection to {} lost: {}", connection.peer(), e);
                false
            }
        }
    }

    fn read_audio(&mut self) {
        let shared = &self.shared;
        if let Some(audio) = self.audio.as_mut() {
            if let Err(e) = audio.receive(|data| deliver_audio(shared, data)) {
                warn!("⚠️ Audio endpoint receive failed: {}", e);
            }
        }
    }

    fn attach_audio(&mut self, mut endpoint: AudioEndpoint) {
        self.detach_audio();
        match self
            .poll
            .registry()
            .register(endpoint.socket_mut(), AUDIO, Interest::READABLE)
        {
            Ok(()) => {
                info!("🔊 Audio endpoint attached on port {}", endpoint.port());
                self.audio = Some(endpoint);
            }
            Err(e) => error!("❌ Failed to register audio endpoint: {}", e),
        }
    }

    fn detach_audio(&mut self) {
        if let Some(mut endpoint) = self.audio.take() {
            if let Err(e) = self.poll.registry().deregister(endpoint.socket_mut()) {
                debug!("Failed to deregister audio endpoint: {}", e);
            }
            info!("🔇 Audio endpoint on port {} closed", endpoint.port());
        }
    }

    fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = self.poll.registry().deregister(connection.stream_mut()) {
                debug!("Failed to deregister connection: {}", e);
            }
            if connection.buffered() > 0 {
                debug!(
                    "Discarding {} bytes of an incomplete frame",
                    connection.buffered()
                );
            }
            info!("🔌 Disconnected from {}", connection.peer());
        }
        self.write_interest = false;
        let failed = self.shared.pending.fail_all(|| ClientError::ConnectionLost);
        if failed > 0 {
            warn!("⚠️ {} pending requests failed on disconnect", failed);
        }
    }
}

/// Route one complete frame from the service
fn dispatch(shared: &Shared, frame: &[u8]) {
    let msg_type = match MessageHeader::peek(frame).map(|header| header.message_type()) {
        Ok(Ok(msg_type)) => msg_type,
        Ok(Err(e)) | Err(e) => {
            debug!("📥 Dropping frame: {}", e);
            return;
        }
    };

    if msg_type.role == Role::Request {
        error!("❌ Service sent a request ({}), dropping it", msg_type);
        return;
    }

    let message = match Message::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!("⚠️ Dropping undecodable {}: {}", msg_type, e);
            return;
        }
    };
    debug!("📥 Received {}", message);

    match msg_type.role {
        Role::Response => handle_response(shared, message),
        Role::Indication => handle_indication(shared, message),
        Role::Request => {}
    }
}

fn handle_response(shared: &Shared, message: Message) {
    if let Some(completion) = shared.pending.take(message.correlation_id()) {
        let result = match message.failure() {
            Some(cause) => Err(ClientError::Rejected(cause)),
            None => Ok(message),
        };
        completion(result);
        return;
    }

    if let Some(cause) = message.failure() {
        warn!("⚠️ {} rejected: {}", message.msg_type(), cause);
        return;
    }

    match message.msg_type().opcode {
        Opcode::GetPlaylists => match GetPlaylistsRsp::from_message(message) {
            Ok(rsp) => update_playlists(shared, &rsp),
            Err(e) => warn!("⚠️ {}", e),
        },
        Opcode::GetStatus => match GetStatusRsp::from_message(message) {
            Ok(rsp) => notify_status(shared, rsp.state(), rsp.playing_track(), rsp.progress()),
            Err(e) => warn!("⚠️ {}", e),
        },
        Opcode::Play
        | Opcode::PlayControl
        | Opcode::SetVolume
        | Opcode::CreateAudioEndpoint
        | Opcode::DeleteAudioEndpoint
        | Opcode::AddAudioEndpoints
        | Opcode::RemoveAudioEndpoints => debug!("✅ {} acknowledged", message.msg_type()),
        _ => warn!(
            "⚠️ No pending request for {} (id={})",
            message.msg_type(),
            message.correlation_id()
        ),
    }
}

fn handle_indication(shared: &Shared, message: Message) {
    match message.msg_type().opcode {
        Opcode::GetStatus => match StatusInd::from_message(message) {
            Ok(ind) => notify_status(shared, ind.state(), ind.playing_track(), ind.progress()),
            Err(e) => warn!("⚠️ {}", e),
        },
        Opcode::AudioEndpointsUpdated => shared.observers.endpoints_updated.notify(&()),
        Opcode::AudioData => {
            let data = AudioDataInd::from_message(message)
                .ok()
                .and_then(|ind| ind.audio_data());
            match data {
                Some(data) => deliver_audio(shared, data),
                None => warn!("⚠️ Malformed audio indication"),
            }
        }
        _ => debug!("📥 Ignoring {}", message.msg_type()),
    }
}

fn update_playlists(shared: &Shared, rsp: &GetPlaylistsRsp) {
    let playlists = rsp.all_playlists();
    info!("📥 Received {} playlists", playlists.len());
    *lock(&shared.playlists) = playlists.clone();
    *lock(&shared.root_folder) = rsp.root_folder();
    shared.observers.playlists.notify(&playlists);
}

fn notify_status(
    shared: &Shared,
    state: Option<spotify_protocol::PlaybackState>,
    track: Option<Track>,
    progress: Option<u32>,
) {
    match state {
        Some(state) => shared.observers.status.notify(&StatusEvent {
            state,
            track,
            progress,
        }),
        None => warn!("⚠️ Status message without a playback state"),
    }
}

fn deliver_audio(shared: &Shared, data: AudioData) {
    if !shared.observers.audio_data.deliver(data) {
        debug!("🔇 Audio received with no consumer");
    }
}
