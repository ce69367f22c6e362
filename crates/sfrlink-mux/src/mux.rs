use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use sfrlink_frame::{channel_name, Frame, FrameError, FrameReader, FrameWriter};
use sfrlink_transport::Link;
use tracing::{debug, error, trace, warn};

use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::registry::{Callback, ChannelRegistry, Fault};

struct Shared {
    registry: ChannelRegistry,
    closing: AtomicBool,
}

/// Multiplexes numbered channels over one link.
///
/// Dropping a `Mux` closes it.
pub struct Mux<L: Link> {
    shared: Arc<Shared>,
    writer: Mutex<Option<FrameWriter<L>>>,
    closer: Mutex<Option<L>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    config: MuxConfig,
}

impl<L: Link> Mux<L> {
    /// Take ownership of `link` and start the background reader.
    pub fn start(link: L, config: MuxConfig) -> Result<Self> {
        let reader_link = link.try_clone_link()?;
        let closer = link.try_clone_link()?;
        let writer = FrameWriter::with_config_link(link, config.frame.clone())?;
        let reader = FrameReader::with_config(reader_link, config.frame.clone());

        let shared = Arc::new(Shared {
            registry: ChannelRegistry::new(config.max_queue_len),
            closing: AtomicBool::new(false),
        });

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_reader(reader, &shared)
            })
            .map_err(MuxError::Spawn)?;

        debug!(
            max_queue_len = config.max_queue_len,
            thread = %config.thread_name,
            "mux started"
        );

        Ok(Self {
            shared,
            writer: Mutex::new(Some(writer)),
            closer: Mutex::new(Some(closer)),
            reader: Mutex::new(Some(handle)),
            config,
        })
    }

    /// Send one payload on `channel`.
    ///
    /// Frames from concurrent callers are written whole, one at a time.
    pub fn send(&self, channel: u16, payload: &[u8]) -> Result<()> {
        if let Some(fault) = self.shared.registry.fault() {
            return Err(fault.to_error());
        }

        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(MuxError::TransportClosed)?;
        writer.send(channel, payload).map_err(|err| match err {
            FrameError::ConnectionClosed => MuxError::TransportClosed,
            other => MuxError::Frame(other),
        })?;
        trace!(channel, len = payload.len(), "frame sent");
        Ok(())
    }

    /// Send a prepared frame.
    pub fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.send(u16::from(frame.channel), frame.payload.as_ref())
    }

    /// Block until a payload arrives on `channel`.
    pub fn read(&self, channel: u8) -> Result<Bytes> {
        self.shared.registry.read(channel)
    }

    /// Block until a payload arrives on `channel` or `timeout` elapses.
    pub fn read_timeout(&self, channel: u8, timeout: Duration) -> Result<Bytes> {
        self.shared.registry.read_timeout(channel, timeout)
    }

    /// Take a queued payload without blocking.
    pub fn try_read(&self, channel: u8) -> Result<Option<Bytes>> {
        self.shared.registry.try_read(channel)
    }

    /// Discard everything queued on `channel`, returning what was removed.
    pub fn drain(&self, channel: u8) -> Vec<Bytes> {
        self.shared.registry.drain(channel)
    }

    /// Payloads waiting on `channel`.
    pub fn pending(&self, channel: u8) -> usize {
        self.shared.registry.pending(channel)
    }

    /// Route every future payload on `channel` to `callback`.
    ///
    /// Each invocation runs on its own thread, so a slow callback never
    /// stalls the reader. Payloads already queued stay queued.
    pub fn set_callback<F>(&self, channel: u8, callback: F) -> Option<Callback>
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.shared
            .registry
            .set_callback(channel, Some(Arc::new(callback)))
    }

    /// Go back to queueing payloads for `channel`.
    pub fn clear_callback(&self, channel: u8) -> Option<Callback> {
        self.shared.registry.set_callback(channel, None)
    }

    /// Why the link stopped, if it has.
    pub fn fault(&self) -> Option<Fault> {
        self.shared.registry.fault().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry.fault().is_some()
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Shut the link down and wait for the reader to exit.
    ///
    /// Safe to call more than once. Returns the reader's error if it stopped
    /// on desync or an I/O failure before the link was closed.
    pub fn close(&self) -> Result<()> {
        self.shared.closing.store(true, Ordering::SeqCst);

        if let Some(closer) = lock(&self.closer).take() {
            if let Err(err) = closer.close() {
                debug!(error = %err, "link shutdown failed");
            }
        }
        lock(&self.writer).take();

        if let Some(handle) = lock(&self.reader).take() {
            if handle.join().is_err() {
                error!("frame reader thread panicked");
            }
        }
        self.shared.registry.close(Fault::Closed);

        match self.shared.registry.fault() {
            Some(Fault::Desync { discarded }) => Err(MuxError::Desync {
                discarded: *discarded,
            }),
            Some(fault @ Fault::Io { .. }) => Err(MuxError::ReaderFailed(fault.to_string())),
            _ => Ok(()),
        }
    }
}

impl<L: Link> Drop for Mux<L> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "mux dropped after reader failure");
        }
    }
}

impl<L: Link> std::fmt::Debug for Mux<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("registry", &self.shared.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn run_reader<L: Link>(mut reader: FrameReader<L>, shared: &Shared) {
    debug!("frame reader started");
    let fault = loop {
        match reader.read_frame() {
            Ok(frame) => dispatch(shared, frame),
            Err(err) => break classify(shared, err),
        }
    };

    if fault.is_failure() {
        error!(%fault, "frame reader stopped");
    } else {
        debug!(%fault, "frame reader stopped");
    }
    shared.registry.close(fault);
}

fn dispatch(shared: &Shared, frame: Frame) {
    let Frame { channel, payload } = frame;
    trace!(
        channel,
        kind = channel_name(channel),
        len = payload.len(),
        "frame received"
    );

    match shared.registry.callback(channel) {
        Some(callback) => {
            let spawned = thread::Builder::new()
                .name(format!("sfrlink-ch{channel}"))
                .spawn(move || callback(payload));
            if let Err(err) = spawned {
                warn!(channel, error = %err, "failed to spawn callback thread, payload dropped");
            }
        }
        None => {
            shared.registry.push(channel, payload);
        }
    }
}

fn classify(shared: &Shared, err: FrameError) -> Fault {
    if shared.closing.load(Ordering::SeqCst) {
        return Fault::Closed;
    }
    match err {
        FrameError::ConnectionClosed => Fault::EndOfStream,
        FrameError::Desync { discarded } => Fault::Desync { discarded },
        FrameError::Io(io) => Fault::Io {
            kind: io.kind(),
            message: io.to_string(),
        },
        other => Fault::Io {
            kind: std::io::ErrorKind::Other,
            message: other.to_string(),
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
