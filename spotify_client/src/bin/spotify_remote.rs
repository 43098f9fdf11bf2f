use clap::{Parser, Subcommand, ValueEnum};
use crossbeam::channel;
use log::{info, warn};
use spotify_client::spotify_protocol::{Folder, PlayOperation, Track};
use spotify_client::{
    ClientConfig, ConfigStore, ConnectionEvent, SampleChunk, SampleQueue, SpotifyClient,
    StatusEvent,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "spotify-remote")]
#[command(about = "Remote control for the spotify playback service")]
struct Args {
    /// JSON config file with the service address and timeouts
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service IP address, overrides the config file and environment
    #[arg(long)]
    host: Option<String>,

    /// Service TCP port, overrides the config file and environment
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait for the connection and for answers
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the playlist tree
    Playlists,
    /// List the tracks of a playlist
    Tracks { uri: String },
    /// Search for tracks
    Search { query: String },
    /// Play a track, album or playlist
    Play {
        uri: String,
        /// Track index to start from within a playlist or album
        #[arg(short, long)]
        index: Option<u32>,
    },
    /// Pause, resume or skip
    Control {
        #[arg(value_enum)]
        operation: Operation,
    },
    /// Set the master volume, or the volume of one endpoint
    Volume {
        level: u8,
        #[arg(short, long)]
        endpoint: Option<String>,
    },
    /// Show the playback status
    Status,
    /// Print status changes until Ctrl+C
    Watch,
    /// List the audio endpoints known to the service
    Endpoints,
    /// Start playing to an endpoint
    Enable { name: String },
    /// Stop playing to an endpoint
    Disable { name: String },
    /// Fetch cover art into a file
    Image { uri: String, output: PathBuf },
    /// Receive streamed audio locally and print levels until Ctrl+C
    Listen {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Write the effective connection settings to the config file
    SaveConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Operation {
    Pause,
    Resume,
    Next,
    Prev,
}

impl From<Operation> for PlayOperation {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Pause => PlayOperation::Pause,
            Operation::Resume => PlayOperation::Resume,
            Operation::Next => PlayOperation::Next,
            Operation::Prev => PlayOperation::Prev,
        }
    }
}

fn load_config(args: &Args) -> Result<ClientConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = ConfigStore::new(path).load()?;
            config.apply_env()?;
            config
        }
        None => ClientConfig::from_env()?,
    };
    if let Some(host) = &args.host {
        config.server_ip = host.clone();
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    config.validate()?;
    Ok(config)
}

/// Start the client and block until it reports a connection
fn connect(config: ClientConfig, timeout: Duration) -> Result<SpotifyClient, Box<dyn Error>> {
    let client = SpotifyClient::new(config.clone())?;
    let (tx, rx) = channel::bounded(1);
    let observer = client.register_connection_observer(move |event: &ConnectionEvent| {
        if *event == ConnectionEvent::Connected {
            let _ = tx.try_send(());
        }
    });
    client.start()?;

    rx.recv_timeout(timeout).map_err(|_| {
        format!(
            "No connection to {}:{} within {:?}",
            config.server_ip, config.server_port, timeout
        )
    })?;
    client.unregister_observer(observer);
    Ok(client)
}

fn install_ctrlc() -> Result<Arc<AtomicBool>, Box<dyn Error>> {
    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = should_stop.clone();
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;
    Ok(should_stop)
}

fn print_tracks(tracks: &[Track], json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(tracks)?);
        return Ok(());
    }
    for (position, track) in tracks.iter().enumerate() {
        let artists: Vec<&str> = track.artists.iter().map(|a| a.name.as_str()).collect();
        let duration = track.duration_ms.unwrap_or(0);
        println!(
            "{:>3}. {} - {} ({}:{:02})  {}",
            track.index.unwrap_or(position as u32),
            artists.join(", "),
            track.name,
            duration / 60_000,
            (duration / 1000) % 60,
            track.uri
        );
    }
    Ok(())
}

fn print_folder(folder: &Folder, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}📁 {}", indent, folder.name);
    for playlist in &folder.playlists {
        println!("{}  🎵 {}  {}", indent, playlist.name, playlist.uri);
    }
    for child in &folder.folders {
        print_folder(child, depth + 1);
    }
}

fn print_status(status: &StatusEvent, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        let value = serde_json::json!({
            "state": format!("{:?}", status.state),
            "track": status.track,
            "progress_ms": status.progress,
        });
        println!("{}", value);
        return Ok(());
    }
    match &status.track {
        Some(track) => println!(
            "{:?}: {} [{}s]",
            status.state,
            track.name,
            status.progress.unwrap_or(0) / 1000
        ),
        None => println!("{:?}", status.state),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let timeout = Duration::from_secs(args.timeout.max(1));

    if let Command::SaveConfig = args.command {
        let path = args
            .config
            .clone()
            .ok_or("--config is required to save settings")?;
        ConfigStore::new(path).save(&config)?;
        return Ok(());
    }

    let client = connect(config, timeout)?;

    match &args.command {
        Command::Playlists => {
            let (tx, rx) = channel::bounded(1);
            client.register_playlists_observer(move |_: &Vec<_>| {
                let _ = tx.try_send(());
            });
            client.request_playlists()?;
            rx.recv_timeout(timeout)
                .map_err(|_| "No playlist answer from the service")?;
            match client.root_folder() {
                Some(root) if args.json => println!("{}", serde_json::to_string_pretty(&root)?),
                Some(root) => print_folder(&root, 0),
                None => println!("No playlists"),
            }
        }
        Command::Tracks { uri } => {
            let tracks = client.get_tracks(uri)?.wait_timeout(timeout)?;
            print_tracks(&tracks, args.json)?;
        }
        Command::Search { query } => {
            let tracks = client.search(query)?.wait_timeout(timeout)?;
            print_tracks(&tracks, args.json)?;
        }
        Command::Play { uri, index } => client.play(uri, *index)?,
        Command::Control { operation } => client.play_control((*operation).into())?,
        Command::Volume { level, endpoint } => client.set_volume(*level, endpoint.as_deref())?,
        Command::Status => {
            let (tx, rx) = channel::bounded(1);
            client.register_status_observer(move |status: &StatusEvent| {
                let _ = tx.try_send(status.clone());
            });
            client.request_status()?;
            let status = rx
                .recv_timeout(timeout)
                .map_err(|_| "No status answer from the service")?;
            print_status(&status, args.json)?;
        }
        Command::Watch => {
            let should_stop = install_ctrlc()?;
            let json = args.json;
            client.register_status_observer(move |status: &StatusEvent| {
                if let Err(e) = print_status(status, json) {
                    warn!("⚠️ Failed to print status: {}", e);
                }
            });
            client.request_status()?;
            while !should_stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
            }
        }
        Command::Endpoints => {
            let endpoints = client.get_audio_endpoints()?.wait_timeout(timeout)?;
            let current = client.get_current_audio_endpoints()?.wait_timeout(timeout)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&endpoints)?);
            } else {
                for endpoint in endpoints {
                    let marker = if current.contains(&endpoint.name) { "▶" } else { " " };
                    println!(
                        "{} {} (volume {}{})",
                        marker,
                        endpoint.name,
                        endpoint.volume,
                        if endpoint.active { ", active" } else { "" }
                    );
                }
            }
        }
        Command::Enable { name } => client.add_audio_endpoint(Some(name))?,
        Command::Disable { name } => client.remove_audio_endpoint(Some(name))?,
        Command::Image { uri, output } => {
            let image = client.get_image(uri)?.wait_timeout(timeout)?;
            std::fs::write(output, &image.data)?;
            info!(
                "💾 Saved {} bytes of {:?} to {}",
                image.data.len(),
                image.format,
                output.display()
            );
        }
        Command::Listen { seconds } => {
            let should_stop = install_ctrlc()?;
            let queue = SampleQueue::new(256);
            let producer = queue.clone();
            client.set_audio_data_callback(move |data| {
                producer.push(SampleChunk::from(data));
            });
            let port = client.create_audio_endpoint(None)?;
            println!("🔊 Listening on UDP port {}", port);

            let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
            let mut received = 0usize;
            while !should_stop.load(Ordering::Relaxed)
                && deadline.map_or(true, |deadline| Instant::now() < deadline)
            {
                let chunk = match queue.pop(Duration::from_millis(500)) {
                    Ok(chunk) => chunk,
                    // no audio right now
                    Err(_) => continue,
                };
                received += chunk.samples.len();
                let peak = chunk
                    .samples
                    .iter()
                    .map(|s| s.unsigned_abs())
                    .max()
                    .unwrap_or(0);
                println!(
                    "{} Hz x{}: {} samples, peak {}",
                    chunk.rate,
                    chunk.channels,
                    chunk.samples.len(),
                    peak
                );
            }
            client.delete_audio_endpoint()?;
            println!(
                "Received {} samples, dropped {} chunks",
                received,
                queue.dropped()
            );
        }
        Command::SaveConfig => {}
    }

    // fire-and-forget requests need a moment to leave the socket
    std::thread::sleep(Duration::from_millis(100));
    client.stop();
    Ok(())
}
