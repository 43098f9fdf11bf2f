//! Shared helpers for the session integration tests

#![allow(dead_code)]

use spotify_client::{
    ClientConfig, ConnectionEvent, ConnectionState, MockServerConfig, MockServerHandle,
    MockSpotifyServer, SpotifyClient,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn start_server(config: MockServerConfig) -> MockServerHandle {
    MockSpotifyServer::new(config)
        .start_background()
        .expect("Failed to start mock server")
}

/// Client settings tuned for fast tests
pub fn test_config(port: u16) -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 500,
        request_timeout_ms: 2_000,
        reconnect_min_backoff_ms: 50,
        reconnect_max_backoff_ms: 200,
        ..ClientConfig::new("127.0.0.1", port)
    }
}

/// Records every connection event in arrival order
#[derive(Clone, Default)]
pub struct ConnectionLog {
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl ConnectionLog {
    pub fn attach(client: &SpotifyClient) -> Self {
        let log = Self::default();
        let events = log.events.clone();
        client.register_connection_observer(move |event: &ConnectionEvent| {
            events.lock().unwrap().push(*event);
        });
        log
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: ConnectionEvent) -> usize {
        self.events().iter().filter(|seen| **seen == event).count()
    }
}

/// Start a client against `server` and wait for it to connect
pub fn connected_client(server: &MockServerHandle) -> (SpotifyClient, ConnectionLog) {
    connected_client_with(test_config(server.port))
}

pub fn connected_client_with(config: ClientConfig) -> (SpotifyClient, ConnectionLog) {
    let client = SpotifyClient::new(config).expect("Failed to create client");
    let log = ConnectionLog::attach(&client);
    client.start().expect("Failed to start client");
    assert!(
        wait_until(WAIT, || client.state() == ConnectionState::Connected),
        "client never connected"
    );
    (client, log)
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
