//! # Spotify Client
//!
//! Session client for the spotify remote-control service.
//!
//! A [`SpotifyClient`] keeps one TCP connection to the service alive,
//! reconnecting with backoff when it drops. Requests that expect an answer
//! return a [`ResponseHandle`]; the rest are fire-and-forget and their
//! effects arrive through observers. Streamed audio is received on a local
//! UDP endpoint and handed to a single audio callback.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use spotify_client::{ClientConfig, ConnectionEvent, SpotifyClient};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SpotifyClient::new(ClientConfig::new("192.168.1.20", 7788))?;
//! client.register_connection_observer(|event: &ConnectionEvent| {
//!     println!("connection: {:?}", event);
//! });
//! client.start()?;
//!
//! // ... once connected
//! let tracks = client
//!     .get_tracks("spotify:playlist:42")?
//!     .wait_timeout(Duration::from_secs(5))?;
//! for track in tracks {
//!     println!("{}", track.name);
//! }
//! client.stop();
//! # Ok(())
//! # }
//! ```

pub mod audio_endpoint;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod mock_server;
pub mod observers;
pub mod pending;
pub mod sample_queue;
pub mod session;

pub use config::{ClientConfig, ConfigError, ConfigStore};
pub use error::{ClientError, Result};
pub use mock_server::{MockServerConfig, MockServerHandle, MockSpotifyServer};
pub use observers::{ConnectionEvent, ObserverId, StatusEvent};
pub use pending::ResponseHandle;
pub use sample_queue::{SampleChunk, SampleQueue, SampleQueueError};
pub use session::{ConnectionState, Image, SpotifyClient};

pub use spotify_protocol;
