use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::ErrorKind;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use sfrlink_frame::MAX_CHANNEL;
use tracing::warn;

use crate::error::{MuxError, Result};

/// Handler invoked with each payload received on a channel.
pub type Callback = Arc<dyn Fn(Bytes) + Send + Sync + 'static>;

/// Why a link stopped delivering frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Closed locally.
    Closed,
    /// The peer ended the stream.
    EndOfStream,
    /// Too many bytes were discarded without finding a valid frame.
    Desync { discarded: usize },
    /// The link failed with an I/O error.
    Io { kind: ErrorKind, message: String },
}

impl Fault {
    /// Error handed to readers blocked on, or arriving after, this fault.
    pub fn to_error(&self) -> MuxError {
        match self {
            Self::Desync { discarded } => MuxError::Desync {
                discarded: *discarded,
            },
            Self::Closed | Self::EndOfStream | Self::Io { .. } => MuxError::TransportClosed,
        }
    }

    /// Whether the fault should be reported to the owner on close.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Desync { .. } | Self::Io { .. })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::EndOfStream => f.write_str("end of stream"),
            Self::Desync { discarded } => write!(f, "desync after {discarded} discarded bytes"),
            Self::Io { kind, message } => write!(f, "i/o error ({kind:?}): {message}"),
        }
    }
}

struct Slot {
    queue: Mutex<VecDeque<Bytes>>,
    ready: Condvar,
}

/// Per-channel payload queues and callbacks.
///
/// Every channel id has its own bounded FIFO. When a queue is full the oldest
/// payload is dropped. Once [`ChannelRegistry::close`] records a fault, queued
/// payloads can still be drained but blocked and future reads on an empty
/// queue fail with the fault's error.
pub struct ChannelRegistry {
    slots: Vec<Slot>,
    callbacks: RwLock<HashMap<u8, Callback>>,
    fault: OnceLock<Fault>,
    max_queue_len: usize,
}

impl ChannelRegistry {
    pub fn new(max_queue_len: usize) -> Self {
        let slots = (0..=MAX_CHANNEL)
            .map(|_| Slot {
                queue: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
            })
            .collect();
        Self {
            slots,
            callbacks: RwLock::new(HashMap::new()),
            fault: OnceLock::new(),
            max_queue_len,
        }
    }

    pub fn max_queue_len(&self) -> usize {
        self.max_queue_len
    }

    /// Append a payload to a channel queue and wake one reader.
    ///
    /// Returns the payload that was evicted to make room, if any.
    pub fn push(&self, channel: u8, payload: Bytes) -> Option<Bytes> {
        if self.max_queue_len == 0 {
            warn!(channel, len = payload.len(), "queueing disabled, payload dropped");
            return Some(payload);
        }

        let slot = self.slot(channel);
        let mut queue = lock(&slot.queue);
        let dropped = if queue.len() >= self.max_queue_len {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(payload);
        drop(queue);
        slot.ready.notify_one();

        if let Some(old) = &dropped {
            warn!(
                channel,
                len = old.len(),
                max = self.max_queue_len,
                "channel queue full, oldest payload dropped"
            );
        }
        dropped
    }

    /// Block until a payload is available on `channel`.
    pub fn read(&self, channel: u8) -> Result<Bytes> {
        let slot = self.slot(channel);
        let mut queue = lock(&slot.queue);
        loop {
            if let Some(payload) = queue.pop_front() {
                return Ok(payload);
            }
            if let Some(fault) = self.fault.get() {
                return Err(fault.to_error());
            }
            queue = slot
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`ChannelRegistry::read`], giving up after `timeout`.
    pub fn read_timeout(&self, channel: u8, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;
        let slot = self.slot(channel);
        let mut queue = lock(&slot.queue);
        loop {
            if let Some(payload) = queue.pop_front() {
                return Ok(payload);
            }
            if let Some(fault) = self.fault.get() {
                return Err(fault.to_error());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MuxError::Timeout(timeout));
            }
            queue = slot
                .ready
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Pop a payload without blocking.
    ///
    /// `Ok(None)` means the queue is empty but the link is still open.
    pub fn try_read(&self, channel: u8) -> Result<Option<Bytes>> {
        let mut queue = lock(&self.slot(channel).queue);
        match queue.pop_front() {
            Some(payload) => Ok(Some(payload)),
            None => match self.fault.get() {
                Some(fault) => Err(fault.to_error()),
                None => Ok(None),
            },
        }
    }

    /// Remove and return everything queued on `channel`.
    pub fn drain(&self, channel: u8) -> Vec<Bytes> {
        lock(&self.slot(channel).queue).drain(..).collect()
    }

    /// Number of payloads waiting on `channel`.
    pub fn pending(&self, channel: u8) -> usize {
        lock(&self.slot(channel).queue).len()
    }

    /// Install or remove the callback for `channel`, returning the previous one.
    ///
    /// While a callback is installed, payloads for the channel bypass its queue.
    pub fn set_callback(&self, channel: u8, callback: Option<Callback>) -> Option<Callback> {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match callback {
            Some(callback) => callbacks.insert(channel, callback),
            None => callbacks.remove(&channel),
        }
    }

    pub fn callback(&self, channel: u8) -> Option<Callback> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .cloned()
    }

    /// Record why the link stopped and release every blocked reader.
    ///
    /// Only the first fault is kept. Returns `true` if this call recorded it.
    pub fn close(&self, fault: Fault) -> bool {
        let recorded = self.fault.set(fault).is_ok();
        for slot in &self.slots {
            // Taking the lock orders the wakeup after any reader that saw no
            // fault and is about to wait.
            let _queue = lock(&slot.queue);
            slot.ready.notify_all();
        }
        recorded
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.get()
    }

    fn slot(&self, channel: u8) -> &Slot {
        &self.slots[usize::from(channel)]
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("max_queue_len", &self.max_queue_len)
            .field("fault", &self.fault.get())
            .finish_non_exhaustive()
    }
}

// Queues hold plain byte buffers, so a panic while holding the lock cannot
// leave them half-updated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn queue_is_fifo_per_channel() {
        let registry = ChannelRegistry::new(10);
        registry.push(2, Bytes::from_static(b"a"));
        registry.push(3, Bytes::from_static(b"x"));
        registry.push(2, Bytes::from_static(b"b"));

        assert_eq!(registry.read(2).unwrap(), Bytes::from_static(b"a"));
        assert_eq!(registry.read(2).unwrap(), Bytes::from_static(b"b"));
        assert_eq!(registry.read(3).unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn full_queue_drops_oldest() {
        let registry = ChannelRegistry::new(2);
        assert!(registry.push(5, Bytes::from_static(b"1")).is_none());
        assert!(registry.push(5, Bytes::from_static(b"2")).is_none());
        let dropped = registry.push(5, Bytes::from_static(b"3"));

        assert_eq!(dropped, Some(Bytes::from_static(b"1")));
        assert_eq!(registry.pending(5), 2);
        assert_eq!(registry.read(5).unwrap(), Bytes::from_static(b"2"));
        assert_eq!(registry.read(5).unwrap(), Bytes::from_static(b"3"));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let registry = ChannelRegistry::new(0);
        assert!(registry.push(1, Bytes::from_static(b"x")).is_some());
        assert_eq!(registry.pending(1), 0);
    }

    #[test]
    fn blocked_read_wakes_on_push() {
        let registry = Arc::new(ChannelRegistry::new(4));
        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.read(7))
        };

        thread::sleep(Duration::from_millis(30));
        registry.push(7, Bytes::from_static(b"late"));

        assert_eq!(reader.join().unwrap().unwrap(), Bytes::from_static(b"late"));
    }

    #[test]
    fn close_releases_blocked_readers() {
        let registry = Arc::new(ChannelRegistry::new(4));
        let readers: Vec<_> = (0..3u8)
            .map(|channel| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.read(channel))
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        assert!(registry.close(Fault::EndOfStream));

        for reader in readers {
            let err = reader.join().unwrap().unwrap_err();
            assert!(matches!(err, MuxError::TransportClosed));
        }
    }

    #[test]
    fn desync_fault_reaches_readers() {
        let registry = ChannelRegistry::new(4);
        registry.close(Fault::Desync { discarded: 512 });

        let err = registry.read(0).unwrap_err();
        assert!(matches!(err, MuxError::Desync { discarded: 512 }));
    }

    #[test]
    fn first_fault_wins() {
        let registry = ChannelRegistry::new(4);
        assert!(registry.close(Fault::Desync { discarded: 9 }));
        assert!(!registry.close(Fault::Closed));
        assert_eq!(registry.fault(), Some(&Fault::Desync { discarded: 9 }));
    }

    #[test]
    fn queued_payloads_survive_close() {
        let registry = ChannelRegistry::new(4);
        registry.push(1, Bytes::from_static(b"kept"));
        registry.close(Fault::Closed);

        assert_eq!(registry.read(1).unwrap(), Bytes::from_static(b"kept"));
        assert!(matches!(registry.read(1), Err(MuxError::TransportClosed)));
    }

    #[test]
    fn try_read_and_timeout() {
        let registry = ChannelRegistry::new(4);
        assert!(registry.try_read(9).unwrap().is_none());

        let err = registry
            .read_timeout(9, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, MuxError::Timeout(_)));

        registry.push(9, Bytes::from_static(b"now"));
        assert_eq!(
            registry.read_timeout(9, Duration::from_millis(20)).unwrap(),
            Bytes::from_static(b"now")
        );
    }

    #[test]
    fn drain_empties_queue() {
        let registry = ChannelRegistry::new(4);
        registry.push(0, Bytes::from_static(b"stale1"));
        registry.push(0, Bytes::from_static(b"stale2"));

        assert_eq!(registry.drain(0).len(), 2);
        assert_eq!(registry.pending(0), 0);
    }

    #[test]
    fn set_callback_replaces_and_removes() {
        let registry = ChannelRegistry::new(4);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let callback: Callback = Arc::new(move |_payload| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.set_callback(1, Some(callback)).is_none());
        let installed = registry.callback(1).unwrap();
        installed(Bytes::from_static(b"x"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.set_callback(1, None).is_some());
        assert!(registry.callback(1).is_none());
    }
}
