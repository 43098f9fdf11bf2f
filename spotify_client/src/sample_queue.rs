//! Bounded hand-off of PCM chunks between the network thread and an audio
//! output thread.

use crossbeam::channel::{self, Receiver, Sender};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleQueueError {
    /// Nothing arrived in time. Consumers treat this as a gap, not a failure.
    #[error("End of stream")]
    EndOfStream,
}

/// Interleaved samples with their format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChunk {
    pub channels: u32,
    pub rate: u32,
    pub samples: Vec<i16>,
}

impl From<spotify_protocol::AudioData> for SampleChunk {
    fn from(data: spotify_protocol::AudioData) -> Self {
        Self {
            channels: data.channels,
            rate: data.rate,
            samples: data.samples,
        }
    }
}

/// Cloneable handle; every clone shares the same queue
#[derive(Clone)]
pub struct SampleQueue {
    sender: Sender<SampleChunk>,
    receiver: Receiver<SampleChunk>,
    dropped: Arc<AtomicU64>,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Never blocks. Returns false and counts the chunk as dropped when the
    /// queue is full.
    pub fn push(&self, chunk: SampleChunk) -> bool {
        match self.sender.try_send(chunk) {
            Ok(()) => true,
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 100 == 1 {
                    debug!("🔇 Sample queue full, {} chunks dropped so far", dropped);
                }
                false
            }
        }
    }

    /// Wait up to `timeout` for the next chunk
    pub fn pop(&self, timeout: Duration) -> Result<SampleChunk, SampleQueueError> {
        self.receiver
            .recv_timeout(timeout)
            .map_err(|_| SampleQueueError::EndOfStream)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn chunk(value: i16) -> SampleChunk {
        SampleChunk {
            channels: 1,
            rate: 44_100,
            samples: vec![value; 4],
        }
    }

    #[test]
    fn test_push_never_blocks_when_full() {
        let queue = SampleQueue::new(2);
        assert!(queue.push(chunk(1)));
        assert!(queue.push(chunk(2)));
        assert!(!queue.push(chunk(3)));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap(), chunk(1));
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap(), chunk(2));
    }

    #[test]
    fn test_pop_timeout_is_end_of_stream() {
        let queue = SampleQueue::new(4);
        assert_eq!(
            queue.pop(Duration::from_millis(20)),
            Err(SampleQueueError::EndOfStream)
        );
    }

    #[test]
    fn test_cross_thread_handoff() {
        let queue = SampleQueue::new(8);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            for i in 0..5 {
                producer.push(chunk(i));
            }
        });
        handle.join().unwrap();

        let values: Vec<i16> = (0..5)
            .map(|_| queue.pop(Duration::from_millis(100)).unwrap().samples[0])
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_from_audio_data() {
        let data = spotify_protocol::AudioData {
            channels: 2,
            rate: 48_000,
            nof_samples: 1,
            samples: vec![3, -3],
        };
        let chunk = SampleChunk::from(data);
        assert_eq!(chunk.channels, 2);
        assert_eq!(chunk.samples, vec![3, -3]);
    }
}
