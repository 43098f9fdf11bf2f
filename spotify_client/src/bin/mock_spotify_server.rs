use clap::Parser;
use log::info;
use spotify_client::{MockServerConfig, MockSpotifyServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mock_spotify_server")]
#[command(about = "Mock spotify service serving a small fixed library for testing")]
struct Args {
    /// Address to bind the TCP server to
    #[arg(short, long, default_value = "127.0.0.1:7788")]
    address: String,

    /// Milliseconds between streamed audio packets
    #[arg(long, default_value = "20")]
    audio_interval_ms: u64,

    /// Sample rate of the streamed test tone
    #[arg(long, default_value = "44100")]
    rate: u32,

    /// Channel count of the streamed test tone
    #[arg(long, default_value = "2")]
    channels: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting mock spotify server with args: {:?}", args);

    let config = MockServerConfig {
        bind_address: args.address,
        audio_interval: Duration::from_millis(args.audio_interval_ms.max(1)),
        audio_rate: args.rate,
        audio_channels: args.channels,
        ..Default::default()
    };

    let mut server = MockSpotifyServer::new(config);

    // Handle Ctrl+C gracefully
    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = should_stop.clone();
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;

    let port = server.start()?;
    info!("🎵 Mock spotify server started on port {}", port);

    // Wait for shutdown signal
    while !should_stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    server.stop();
    Ok(())
}
