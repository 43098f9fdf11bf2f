//! Local UDP socket receiving streamed audio from the service.
//!
//! Every datagram carries one complete `AudioDataInd` frame.

use crate::error::{ClientError, Result};
use log::{debug, info, warn};
use mio::net::UdpSocket;
use spotify_protocol::{AudioData, AudioDataInd, Message, MessageView};
use std::io;
use std::net::SocketAddr;

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

pub struct AudioEndpoint {
    socket: UdpSocket,
    port: u16,
}

impl AudioEndpoint {
    /// Bind to an ephemeral port on all interfaces
    pub fn bind() -> Result<Self> {
        Self::bind_to(SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    pub fn bind_to(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|e| {
            ClientError::AudioEndpoint(format!("Failed to bind UDP socket on {}: {}", addr, e))
        })?;
        let port = socket
            .local_addr()
            .map_err(|e| ClientError::AudioEndpoint(e.to_string()))?
            .port();
        info!("🔊 Audio endpoint listening on UDP port {}", port);
        Ok(Self { socket, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Underlying socket, for registering with a poll
    pub fn socket_mut(&mut self) -> &mut UdpSocket {
        &mut self.socket
    }

    /// Read every queued datagram, handing decoded audio to `deliver`.
    /// Returns the number of datagrams read.
    pub fn receive(&mut self, mut deliver: impl FnMut(AudioData)) -> io::Result<usize> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut count = 0;
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    count += 1;
                    match decode_datagram(&buf[..len]) {
                        Some(data) => deliver(data),
                        None => debug!("🔇 Dropped undecodable datagram from {}", from),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(count),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decode one audio datagram. Anything but a well-formed `AudioDataInd`
/// yields `None`.
pub fn decode_datagram(buf: &[u8]) -> Option<AudioData> {
    let message = match Message::decode(buf) {
        Ok(message) => message,
        Err(e) => {
            warn!("⚠️ Malformed audio datagram: {}", e);
            return None;
        }
    };
    let ind = match AudioDataInd::from_message(message) {
        Ok(ind) => ind,
        Err(e) => {
            warn!("⚠️ Unexpected message on audio endpoint: {}", e);
            return None;
        }
    };
    ind.audio_data()
}
