//! Per-category observer registries.

use spotify_protocol::{AudioData, PlaybackState, Playlist, Track};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

impl ObserverId {
    fn next() -> Self {
        ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Playback status from a status response or indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub state: PlaybackState,
    pub track: Option<Track>,
    /// Playback position in milliseconds
    pub progress: Option<u32>,
}

pub type Observer<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered set of callbacks for one event category
pub struct ObserverSet<E> {
    observers: Mutex<Vec<(ObserverId, Observer<E>)>>,
}

impl<E> Default for ObserverSet<E> {
    fn default() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }
}

impl<E> ObserverSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId::next();
        self.lock().push((id, Arc::new(observer)));
        id
    }

    /// Returns false if the id was not registered here
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every observer in registration order. Runs on a snapshot outside
    /// the lock, so observers may register or unregister from the callback.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Observer<E>> = self
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in snapshot {
            observer(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ObserverId, Observer<E>)>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub type AudioDataCallback = Box<dyn FnMut(AudioData) + Send>;

/// Single consumer slot for decoded audio. Registering replaces the
/// previous consumer.
#[derive(Default)]
pub struct AudioDataSlot {
    callback: Mutex<Option<AudioDataCallback>>,
}

impl AudioDataSlot {
    pub fn set(&self, callback: Option<AudioDataCallback>) {
        *self.lock() = callback;
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    /// Hand the block to the consumer. Returns false when nobody listens.
    /// The consumer runs under the slot lock and must not call `set`.
    pub fn deliver(&self, data: AudioData) -> bool {
        match self.lock().as_mut() {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AudioDataCallback>> {
        self.callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// All observer categories owned by a session
#[derive(Default)]
pub struct Observers {
    pub connection: ObserverSet<ConnectionEvent>,
    pub playlists: ObserverSet<Vec<Playlist>>,
    pub status: ObserverSet<StatusEvent>,
    pub endpoints_updated: ObserverSet<()>,
    pub audio_data: AudioDataSlot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_in_registration_order() {
        let set = ObserverSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            set.register(move |value: &u32| seen.lock().unwrap().push(format!("{}{}", tag, value)));
        }

        set.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_unregister() {
        let set = ObserverSet::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = set.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        set.notify(&());
        assert!(set.unregister(id));
        assert!(!set.unregister(id));
        set.notify(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_observer_may_unregister_itself() {
        let set = Arc::new(ObserverSet::<()>::new());
        let id_cell = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let (set2, id_cell2, calls2) = (set.clone(), id_cell.clone(), calls.clone());
        let id = set.register(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_cell2.lock().unwrap() {
                set2.unregister(id);
            }
        });
        *id_cell.lock().unwrap() = Some(id);

        set.notify(&());
        set.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_audio_slot_replaces_consumer() {
        let slot = AudioDataSlot::default();
        let data = AudioData {
            channels: 1,
            rate: 8000,
            nof_samples: 1,
            samples: vec![5],
        };
        assert!(!slot.deliver(data.clone()));

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        slot.set(Some(Box::new(move |_: AudioData| {
            f.fetch_add(1, Ordering::SeqCst);
        })));
        let s = second.clone();
        slot.set(Some(Box::new(move |_: AudioData| {
            s.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(slot.deliver(data));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
