//! End-to-end tests of `SpotifyClient` against the mock spotify service

mod common;

use common::*;
use spotify_client::spotify_protocol::{
    FailureCause, GetStatusReq, MessageView, Opcode, PlayOperation, PlaybackState, StatusInd,
    Track,
};
use spotify_client::{
    ClientError, ConnectionEvent, ConnectionState, MockServerConfig, SpotifyClient, StatusEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn status_recorder(client: &SpotifyClient) -> Arc<Mutex<Vec<StatusEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.register_status_observer(move |status: &StatusEvent| {
        sink.lock().unwrap().push(status.clone());
    });
    seen
}

#[test_log::test]
fn test_connect_notifies_disconnected_then_connected() {
    let server = start_server(MockServerConfig::default());
    let (client, log) = connected_client(&server);

    assert!(wait_until(WAIT, || log.events().len() == 2));
    assert_eq!(
        log.events(),
        vec![ConnectionEvent::Disconnected, ConnectionEvent::Connected]
    );
    assert!(client.is_connected());
    assert!(wait_until(WAIT, || server.client_count() == 1));
}

#[test_log::test]
fn test_hello_and_tracks() {
    let server = start_server(MockServerConfig::default());
    let (client, _log) = connected_client(&server);

    let version = client.hello(Some("kurt"), None).unwrap().wait().unwrap();
    assert_eq!(version, Some((1, 0)));

    let tracks = client
        .get_tracks("spotify:playlist:grunge")
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    let names: Vec<&str> = tracks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Smells Like Teen Spirit", "Lithium", "In Bloom"]);
    assert_eq!(tracks[1].artists[0].name, "Nirvana");
    assert_eq!(tracks[1].album.as_ref().unwrap().name, "Nevermind");

    let hits = client.search("park").unwrap().wait_timeout(WAIT).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uri, "spotify:track:parklife");

    let image = client
        .get_image("spotify:album:nevermind")
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(&image.data[..2], &[0xff, 0xd8]);
}

#[test_log::test]
fn test_out_of_order_responses_reach_their_callers() {
    let server = start_server(MockServerConfig {
        delays: vec![(Opcode::GetTracks, Duration::from_millis(400))],
        ..Default::default()
    });
    let (client, _log) = connected_client(&server);

    let tracks = client.get_tracks("spotify:playlist:britpop").unwrap();
    let search = client.search("lithium").unwrap();
    assert!(tracks.correlation_id() < search.correlation_id());

    // the later request is answered first
    let hits = search.wait_timeout(WAIT).unwrap();
    assert_eq!(hits[0].name, "Lithium");
    assert!(tracks.try_get().is_none());

    let tracks = tracks.wait_timeout(WAIT).unwrap();
    assert_eq!(tracks[0].name, "Girls & Boys");
}

#[test_log::test]
fn test_playlists_observer_and_cache() {
    let server = start_server(MockServerConfig::default());
    let (client, _log) = connected_client(&server);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    client.register_playlists_observer(move |playlists: &Vec<_>| {
        assert_eq!(playlists.len(), 2);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(client.playlists().is_empty());

    client.request_playlists().unwrap();
    assert!(wait_until(WAIT, || calls.load(Ordering::SeqCst) == 1));

    let names: Vec<String> = client.playlists().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Grunge", "Britpop"]);
    let root = client.root_folder().unwrap();
    assert_eq!(root.name, "Library");
    assert_eq!(root.folders[0].id, 1);
}

#[test_log::test]
fn test_status_indication_reaches_observer() {
    let server = start_server(MockServerConfig::default());
    let (client, _log) = connected_client(&server);
    let seen = status_recorder(&client);

    let track = Track::new("Smells Like Teen Spirit", "spotify:track:teen-spirit");
    server.broadcast(
        &StatusInd::new(0, PlaybackState::Playing, Some(&track), Some(45_000)).into_message(),
    );

    assert!(wait_until(WAIT, || !seen.lock().unwrap().is_empty()));
    let status = seen.lock().unwrap()[0].clone();
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.track.unwrap().name, "Smells Like Teen Spirit");
    assert_eq!(status.progress, Some(45_000));
}

#[test_log::test]
fn test_playback_commands_reach_service() {
    let server = start_server(MockServerConfig::default());
    let (client, _log) = connected_client(&server);
    let seen = status_recorder(&client);

    client.play("spotify:playlist:grunge", Some(1)).unwrap();
    assert!(wait_until(WAIT, || !seen.lock().unwrap().is_empty()));
    assert_eq!(
        seen.lock().unwrap()[0].track.as_ref().map(|t| t.name.clone()),
        Some("Lithium".to_string())
    );

    client.play_control(PlayOperation::Pause).unwrap();
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 2));
    assert_eq!(seen.lock().unwrap()[1].state, PlaybackState::Paused);

    client.set_volume(30, None).unwrap();
    assert!(wait_until(WAIT, || server.volume() == 30));

    client.request_status().unwrap();
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 3));
    assert_eq!(seen.lock().unwrap()[2].state, PlaybackState::Paused);
}

#[test_log::test]
fn test_volume_uses_full_range() {
    let server = start_server(MockServerConfig::default());
    let (client, _log) = connected_client(&server);

    client.set_volume(200, None).unwrap();
    assert!(wait_until(WAIT, || server.volume() == 200));

    client.set_volume(255, Some("Kitchen")).unwrap();
    assert!(wait_until(WAIT, || {
        server
            .endpoints()
            .iter()
            .any(|endpoint| endpoint.name == "Kitchen" && endpoint.volume == 255)
    }));
    assert_eq!(server.volume(), 200);
}

#[test_log::test]
fn test_audio_endpoint_selection() {
    let server = start_server(MockServerConfig::default());
    let (client, _log) = connected_client(&server);

    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    client.register_audio_endpoints_observer(move |_: &()| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let endpoints = client
        .get_audio_endpoints()
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0].name, "Kitchen");
    assert!(endpoints[0].active);

    client.add_audio_endpoint(Some("Living Room")).unwrap();
    assert!(wait_until(WAIT, || updates.load(Ordering::SeqCst) == 1));

    let mut current = client
        .get_current_audio_endpoints()
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    current.sort();
    assert_eq!(current, vec!["Kitchen", "Living Room"]);

    client.remove_audio_endpoint(Some("Kitchen")).unwrap();
    assert!(wait_until(WAIT, || updates.load(Ordering::SeqCst) == 2));
    assert!(!server.endpoints()[0].active);
}

#[test_log::test]
fn test_audio_data_reaches_callback() {
    let server = start_server(MockServerConfig {
        audio_interval: Duration::from_millis(10),
        audio_rate: 8_000,
        audio_channels: 1,
        ..Default::default()
    });
    let (client, _log) = connected_client(&server);

    let blocks = Arc::new(Mutex::new(Vec::new()));
    let sink = blocks.clone();
    client.set_audio_data_callback(move |data| {
        sink.lock().unwrap().push(data);
    });

    let port = client.create_audio_endpoint(Some(50)).unwrap();
    assert_eq!(client.audio_endpoint_port(), Some(port));
    assert!(wait_until(WAIT, || blocks.lock().unwrap().len() >= 3));
    {
        let blocks = blocks.lock().unwrap();
        assert_eq!(blocks[0].channels, 1);
        assert_eq!(blocks[0].rate, 8_000);
        assert_eq!(blocks[0].samples.len(), blocks[0].nof_samples as usize);
    }

    client.delete_audio_endpoint().unwrap();
    assert_eq!(client.audio_endpoint_port(), None);
}

#[test_log::test]
fn test_request_times_out_when_unanswered() {
    let server = start_server(MockServerConfig {
        silent: vec![Opcode::GetTracks],
        ..Default::default()
    });
    let mut config = test_config(server.port);
    config.request_timeout_ms = 200;
    let (client, _log) = connected_client_with(config);

    let handle = client.get_tracks("spotify:playlist:grunge").unwrap();
    let id = handle.correlation_id();
    match handle.wait() {
        Err(ClientError::RequestTimedOut { correlation_id }) => assert_eq!(correlation_id, id),
        other => panic!("expected timeout, got {:?}", other),
    }

    // the session is still usable
    assert!(client.search("bloom").unwrap().wait_timeout(WAIT).is_ok());
}

#[test_log::test]
fn test_rejected_request() {
    let server = start_server(MockServerConfig {
        rejected: vec![(Opcode::GenericSearch, FailureCause::GeneralError)],
        ..Default::default()
    });
    let (client, _log) = connected_client(&server);

    let result = client.search("anything").unwrap().wait_timeout(WAIT);
    assert!(matches!(
        result,
        Err(ClientError::Rejected(FailureCause::GeneralError))
    ));
}

#[test_log::test]
fn test_request_from_service_is_ignored() {
    let server = start_server(MockServerConfig::default());
    let (client, log) = connected_client(&server);

    server.broadcast(&GetStatusReq::new(77).into_message());

    let tracks = client
        .get_tracks("spotify:playlist:grunge")
        .unwrap()
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(tracks.len(), 3);
    assert_eq!(log.count(ConnectionEvent::Disconnected), 1);
}

#[test_log::test]
fn test_service_disconnect_triggers_reconnect() {
    let server = start_server(MockServerConfig {
        silent: vec![Opcode::GetTracks],
        ..Default::default()
    });
    let (client, log) = connected_client(&server);
    assert!(wait_until(WAIT, || log.count(ConnectionEvent::Connected) == 1));

    let pending = client.get_tracks("spotify:playlist:grunge").unwrap();
    assert!(wait_until(WAIT, || server.received_count(Opcode::GetTracks) == 1));
    server.disconnect_clients();

    assert!(matches!(
        pending.wait_timeout(WAIT),
        Err(ClientError::ConnectionLost)
    ));
    assert!(wait_until(WAIT, || log.count(ConnectionEvent::Connected) == 2));
    assert_eq!(
        log.events(),
        vec![
            ConnectionEvent::Disconnected,
            ConnectionEvent::Connected,
            ConnectionEvent::Disconnected,
            ConnectionEvent::Connected,
        ]
    );
}

#[test_log::test]
fn test_malformed_frame_forces_reconnect() {
    let server = start_server(MockServerConfig::default());
    let (client, log) = connected_client(&server);
    assert!(wait_until(WAIT, || log.count(ConnectionEvent::Connected) == 1));

    // declared length is shorter than a header
    server.broadcast_raw(&[0, 0, 0, 4, 0, 0, 0, 0]);

    assert!(wait_until(WAIT, || log.count(ConnectionEvent::Connected) == 2));
    assert_eq!(log.count(ConnectionEvent::Disconnected), 2);
    assert!(wait_until(WAIT, || client.is_connected()));
}

#[test_log::test]
fn test_reconnect_to_another_service() {
    let first = start_server(MockServerConfig::default());
    let second = start_server(MockServerConfig::default());
    let (client, log) = connected_client(&first);
    assert!(wait_until(WAIT, || log.count(ConnectionEvent::Connected) == 1));

    client.reconnect("127.0.0.1", second.port as u32).unwrap();

    assert!(wait_until(WAIT, || log.count(ConnectionEvent::Connected) == 2));
    assert!(wait_until(WAIT, || second.client_count() == 1));
    assert!(wait_until(WAIT, || first.client_count() == 0));
}

#[test_log::test]
fn test_not_connected_without_service() {
    // grab a free port and release it again
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let client = SpotifyClient::new(test_config(port)).unwrap();
    let log = ConnectionLog::attach(&client);
    client.start().unwrap();

    assert!(wait_until(WAIT, || log.count(ConnectionEvent::Disconnected) == 1));
    assert!(matches!(
        client.get_tracks("spotify:playlist:grunge"),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.create_audio_endpoint(None),
        Err(ClientError::NotConnected)
    ));
    // fire-and-forget requests are dropped quietly
    client.play("spotify:track:lithium", None).unwrap();

    // repeated failed attempts do not repeat the notification
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(log.count(ConnectionEvent::Disconnected), 1);
    assert_ne!(client.state(), ConnectionState::Connected);
}

#[test_log::test]
fn test_stop_is_terminal() {
    let server = start_server(MockServerConfig {
        silent: vec![Opcode::GetTracks],
        ..Default::default()
    });
    let (client, _log) = connected_client(&server);
    let pending = client.get_tracks("spotify:playlist:grunge").unwrap();

    client.stop();
    client.stop();

    assert_eq!(client.state(), ConnectionState::Stopped);
    assert!(matches!(pending.wait(), Err(ClientError::Stopped)));
    assert!(matches!(client.search("x"), Err(ClientError::Stopped)));
    assert!(matches!(client.play("x", None), Err(ClientError::Stopped)));
    assert!(wait_until(WAIT, || server.client_count() == 0));
}
