//! Buffered non-blocking TCP connection to the service.
//!
//! Reads are accumulated until a whole length-prefixed frame is present.
//! Writes are queued and flushed whenever the socket accepts more data.

use log::debug;
use mio::net::TcpStream;
use spotify_protocol::{ProtocolError, MESSAGE_HEADER_SIZE};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

/// Frames larger than this are treated as a corrupt length prefix
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 64 * 1024;

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
}

impl Connection {
    /// Blocking connect bounded by `timeout`, then switch to non-blocking
    pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = std::net::TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        Ok(Self {
            stream: TcpStream::from_std(stream),
            peer: addr,
            read_buffer: Vec::with_capacity(READ_CHUNK_SIZE),
            write_buffer: Vec::new(),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Underlying stream, for registering with a poll
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Drain the socket into the read buffer until it would block.
    /// EOF is reported as `ConnectionReset`.
    pub fn fill_read_buffer(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "Connection closed by peer",
                    ));
                }
                Ok(n) => {
                    self.read_buffer.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Next complete frame from the read buffer, if one has arrived
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        take_frame(&mut self.read_buffer)
    }

    /// Bytes received but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    pub fn queue_write(&mut self, data: &[u8]) {
        self.write_buffer.extend_from_slice(data);
    }

    /// Write as much of the queue as the socket accepts
    pub fn flush_write_buffer(&mut self) -> io::Result<()> {
        let mut written = 0;
        let result = loop {
            if written == self.write_buffer.len() {
                break Ok(());
            }
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "Failed to write to socket",
                    ));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    debug!(
                        "📤 Socket full, {} bytes left queued",
                        self.write_buffer.len() - written
                    );
                    break Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.write_buffer.drain(..written);
        result
    }

    /// Bytes queued but not yet written
    pub fn write_pending(&self) -> usize {
        self.write_buffer.len()
    }
}

/// Split one frame off the front of `buffer`. The frame length is the
/// big-endian u32 at the start and includes the header.
pub fn take_frame(buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, ProtocolError> {
    if buffer.len() < 4 {
        return Ok(None);
    }
    let declared = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    let length = declared as usize;
    if !(MESSAGE_HEADER_SIZE..=MAX_FRAME_LEN).contains(&length) {
        return Err(ProtocolError::InvalidLength(declared));
    }
    if buffer.len() < length {
        return Ok(None);
    }
    let rest = buffer.split_off(length);
    Ok(Some(std::mem::replace(buffer, rest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotify_protocol::{GetStatusReq, MessageView, SearchReq};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_take_frame_waits_for_whole_frame() {
        let frame = SearchReq::new(3, "in bloom").encode();
        let mut buffer = frame[..2].to_vec();
        assert_eq!(take_frame(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(&frame[2..frame.len() - 1]);
        assert_eq!(take_frame(&mut buffer).unwrap(), None);

        buffer.extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(take_frame(&mut buffer).unwrap(), Some(frame));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_frame_leaves_following_bytes() {
        let first = GetStatusReq::new(1).encode();
        let second = GetStatusReq::new(2).encode();
        let mut buffer = [first.clone(), second[..5].to_vec()].concat();

        assert_eq!(take_frame(&mut buffer).unwrap(), Some(first));
        assert_eq!(buffer, second[..5].to_vec());
    }

    #[test]
    fn test_take_frame_rejects_bad_lengths() {
        let mut short = vec![0, 0, 0, 11, 0, 0];
        assert_eq!(
            take_frame(&mut short),
            Err(ProtocolError::InvalidLength(11))
        );

        let huge = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut buffer = huge.to_vec();
        assert!(take_frame(&mut buffer).is_err());
    }

    #[test]
    fn test_loopback_read_and_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let request = SearchReq::new(9, "sliver").encode();
        let reply = GetStatusReq::new(10).encode();

        let expected = request.clone();
        let to_send = reply.clone();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = vec![0u8; expected.len()];
            stream.read_exact(&mut received).unwrap();
            assert_eq!(received, expected);
            // send the reply in two pieces
            stream.write_all(&to_send[..7]).unwrap();
            thread::sleep(Duration::from_millis(20));
            stream.write_all(&to_send[7..]).unwrap();
            // hold the socket open until the client hangs up
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest);
        });

        let mut connection = Connection::connect(addr, Duration::from_secs(2)).unwrap();
        assert_eq!(connection.peer(), addr);
        connection.queue_write(&request);
        let deadline = Instant::now() + Duration::from_secs(2);
        while connection.write_pending() > 0 && Instant::now() < deadline {
            connection.flush_write_buffer().unwrap();
        }

        let mut frame = None;
        while frame.is_none() && Instant::now() < deadline {
            connection.fill_read_buffer().unwrap();
            frame = connection.next_frame().unwrap();
            if frame.is_none() {
                assert!(connection.buffered() < reply.len());
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(frame, Some(reply));
        assert_eq!(connection.buffered(), 0);
        drop(connection);
        server.join().unwrap();
    }

    #[test]
    fn test_eof_is_connection_reset() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut connection = Connection::connect(addr, Duration::from_secs(2)).unwrap();
        server.join().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match connection.fill_read_buffer() {
                Ok(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
                Ok(_) => panic!("no EOF seen"),
                Err(e) => {
                    assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);
                    break;
                }
            }
        }
    }
}
