//! A software stand-in for the microcontroller firmware.
//!
//! [`Emulator`] answers register requests from an in-memory
//! [`RegisterFile`] and reports interrupts the host has enabled. It speaks
//! the same framing as real firmware, so a [`crate::Session`] cannot tell
//! the difference.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sfrlink_frame::{Frame, FrameError, FrameReader, FrameWriter, INTERRUPT_CHANNEL, REGISTER_CHANNEL};
use sfrlink_transport::Link;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::map::{AddressSpace, Width};
use crate::protocol::{decode_interrupt_control, decode_request, RegisterRequest};

const SPACE_SIZE: usize = 256;

/// Byte-addressed IO and memory spaces, 256 bytes each.
///
/// 16-bit registers are stored little-endian across two consecutive
/// addresses.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    io: Vec<u8>,
    mem: Vec<u8>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            io: vec![0; SPACE_SIZE],
            mem: vec![0; SPACE_SIZE],
        }
    }

    pub fn load(&self, space: AddressSpace, address: u8, width: Width) -> u16 {
        let bytes = self.space(space);
        let low = bytes[usize::from(address)];
        match width {
            Width::Bits8 => u16::from(low),
            Width::Bits16 => {
                let high = bytes[usize::from(address.wrapping_add(1))];
                u16::from_le_bytes([low, high])
            }
        }
    }

    pub fn store(&mut self, space: AddressSpace, address: u8, width: Width, value: u16) {
        let [low, high] = value.to_le_bytes();
        let bytes = self.space_mut(space);
        bytes[usize::from(address)] = low;
        if width == Width::Bits16 {
            bytes[usize::from(address.wrapping_add(1))] = high;
        }
    }

    fn space(&self, space: AddressSpace) -> &[u8] {
        match space {
            AddressSpace::Io => &self.io,
            AddressSpace::Mem => &self.mem,
        }
    }

    fn space_mut(&mut self, space: AddressSpace) -> &mut [u8] {
        match space {
            AddressSpace::Io => &mut self.io,
            AddressSpace::Mem => &mut self.mem,
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Register file shared between emulator connections.
pub type SharedRegisterFile = Arc<Mutex<RegisterFile>>;

/// Emulated firmware serving one host link.
pub struct Emulator<L: Link> {
    link: L,
    writer: Mutex<FrameWriter<L>>,
    registers: SharedRegisterFile,
    enabled: Mutex<HashSet<u8>>,
}

impl<L: Link> Emulator<L> {
    /// Emulator with a fresh, zeroed register file.
    pub fn new(link: L) -> Result<Self> {
        Self::with_registers(link, Arc::new(Mutex::new(RegisterFile::new())))
    }

    /// Emulator over an existing register file, which other emulators may
    /// share.
    pub fn with_registers(link: L, registers: SharedRegisterFile) -> Result<Self> {
        let writer_link = link.try_clone_link().map_err(FrameError::from)?;
        Ok(Self {
            link,
            writer: Mutex::new(FrameWriter::new(writer_link)),
            registers,
            enabled: Mutex::new(HashSet::new()),
        })
    }

    /// Serve requests until the host disconnects or the link fails.
    pub fn run(&self) -> Result<()> {
        let reader_link = self.link.try_clone_link().map_err(FrameError::from)?;
        let mut reader = FrameReader::new(reader_link);
        loop {
            match reader.read_frame() {
                Ok(frame) => self.handle_frame(&frame)?,
                Err(FrameError::ConnectionClosed) => {
                    debug!("host disconnected");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Apply one host frame, replying if it was a register read.
    pub fn handle_frame(&self, frame: &Frame) -> Result<()> {
        match frame.channel {
            REGISTER_CHANNEL => match decode_request(&frame.payload) {
                Some(RegisterRequest::Read {
                    address,
                    width,
                    space,
                }) => {
                    let value = lock(&self.registers).load(space, address, width);
                    trace!(%space, address, value, "register read");
                    let bytes = value.to_le_bytes();
                    self.send(REGISTER_CHANNEL, &bytes[..width.byte_len()])
                }
                Some(RegisterRequest::Write {
                    address,
                    width,
                    space,
                    value,
                }) => {
                    lock(&self.registers).store(space, address, width, value);
                    trace!(%space, address, value, "register written");
                    Ok(())
                }
                None => {
                    warn!(payload = ?frame.payload, "malformed register request ignored");
                    Ok(())
                }
            },
            INTERRUPT_CHANNEL => {
                match decode_interrupt_control(&frame.payload) {
                    Some((index, true)) => {
                        lock(&self.enabled).insert(index);
                        debug!(index, "interrupt enabled");
                    }
                    Some((index, false)) => {
                        lock(&self.enabled).remove(&index);
                        debug!(index, "interrupt disabled");
                    }
                    None => warn!(payload = ?frame.payload, "malformed interrupt control ignored"),
                }
                Ok(())
            }
            channel => {
                trace!(channel, "no firmware handler for channel");
                Ok(())
            }
        }
    }

    /// Report interrupt `index` to the host if it is enabled.
    ///
    /// Returns whether a notification was sent.
    pub fn trigger_interrupt(&self, index: u8) -> Result<bool> {
        if !self.interrupt_enabled(index) {
            return Ok(false);
        }
        self.send(INTERRUPT_CHANNEL, &[index])?;
        Ok(true)
    }

    pub fn interrupt_enabled(&self, index: u8) -> bool {
        lock(&self.enabled).contains(&index)
    }

    pub fn registers(&self) -> &SharedRegisterFile {
        &self.registers
    }

    /// Shut the link down, ending [`Emulator::run`].
    pub fn shutdown(&self) -> Result<()> {
        self.link.close().map_err(FrameError::from)?;
        Ok(())
    }

    fn send(&self, channel: u8, payload: &[u8]) -> Result<()> {
        lock(&self.writer).send(u16::from(channel), payload)?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
