use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sfrlink_frame::{INTERRUPT_CHANNEL, REGISTER_CHANNEL};
use sfrlink_mux::{Mux, MuxError};
use sfrlink_transport::Link;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::map::{RegisterDescriptor, RegisterMap, Symbol};
use crate::protocol::{
    check_value, decode_interrupt, decode_reply, encode_interrupt_control, encode_read,
    encode_write,
};

/// Function run when the firmware reports an interrupt.
pub type InterruptHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Result of reading a symbol with [`Session::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Register(u16),
    Constant(Option<i64>),
}

impl Value {
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::Register(value) => Some(i64::from(value)),
            Self::Constant(value) => value,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(value) => write!(f, "{value}"),
            Self::Constant(Some(value)) => write!(f, "{value}"),
            Self::Constant(None) => f.write_str("(defined)"),
        }
    }
}

struct InterruptTable {
    handlers: RwLock<HashMap<u8, InterruptHandler>>,
    enabled: AtomicBool,
}

impl InterruptTable {
    fn dispatch(&self, payload: &[u8]) {
        let Some(index) = decode_interrupt(payload) else {
            warn!(len = payload.len(), "malformed interrupt payload dropped");
            return;
        };
        if !self.enabled.load(Ordering::Acquire) {
            trace!(index, "interrupts disabled, dropped");
            return;
        }

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned();
        match handler {
            Some(handler) => {
                trace!(index, "dispatching interrupt");
                handler();
            }
            None => trace!(index, "no handler for interrupt"),
        }
    }
}

/// Named register access and interrupt handling for one microcontroller.
///
/// All methods take `&self`; share a session between threads with `Arc`.
/// Register operations are serialized, so a read always receives the reply
/// to its own request.
pub struct Session<L: Link> {
    mux: Mux<L>,
    map: RwLock<RegisterMap>,
    interrupts: Arc<InterruptTable>,
    register_lock: Mutex<()>,
    config: SessionConfig,
}

impl<L: Link> Session<L> {
    /// Start a session over `link` using `map` for name lookups.
    pub fn start(link: L, map: RegisterMap, config: SessionConfig) -> Result<Self> {
        let mux = Mux::start(link, config.mux.clone())?;

        let interrupts = Arc::new(InterruptTable {
            handlers: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        });
        let table = Arc::clone(&interrupts);
        mux.set_callback(INTERRUPT_CHANNEL, move |payload| table.dispatch(&payload));

        debug!(
            symbols = map.len(),
            register_timeout = ?config.register_timeout,
            "session started"
        );

        Ok(Self {
            mux,
            map: RwLock::new(map),
            interrupts,
            register_lock: Mutex::new(()),
            config,
        })
    }

    /// Read a register (or alias) from the device.
    pub fn read_register(&self, name: &str) -> Result<u16> {
        let register = self.map().resolve_register(name)?;
        let _guard = self.lock_registers();
        self.read_locked(&register)
    }

    /// Write a register (or alias). The device does not acknowledge writes.
    pub fn write_register(&self, name: &str, value: u16) -> Result<()> {
        let register = self.map().resolve_register(name)?;
        let _guard = self.lock_registers();
        self.write_locked(&register, value)
    }

    /// Read a register, apply `f`, and write the result back.
    ///
    /// No other register operation on this session runs in between.
    pub fn update_register<F>(&self, name: &str, f: F) -> Result<u16>
    where
        F: FnOnce(u16) -> u16,
    {
        let register = self.map().resolve_register(name)?;
        let _guard = self.lock_registers();
        let current = self.read_locked(&register)?;
        let next = f(current);
        check_value(&register, u32::from(next))?;
        self.write_locked(&register, next)?;
        Ok(next)
    }

    /// Set one bit (`sbi`).
    pub fn set_bit(&self, name: &str, bit: u8) -> Result<()> {
        let mask = self.bit_mask(name, bit)?;
        self.update_register(name, |value| value | mask).map(drop)
    }

    /// Clear one bit (`cbi`).
    pub fn clear_bit(&self, name: &str, bit: u8) -> Result<()> {
        let mask = self.bit_mask(name, bit)?;
        self.update_register(name, |value| value & !mask).map(drop)
    }

    pub fn bit_is_set(&self, name: &str, bit: u8) -> Result<bool> {
        let mask = self.bit_mask(name, bit)?;
        Ok((self.read_register(name)? & mask) != 0)
    }

    pub fn bit_is_clear(&self, name: &str, bit: u8) -> Result<bool> {
        self.bit_is_set(name, bit).map(|set| !set)
    }

    /// A handle bound to one register name.
    pub fn register(&self, name: &str) -> Result<RegisterHandle<'_, L>> {
        self.map().resolve_register(name)?;
        Ok(RegisterHandle {
            session: self,
            name: name.to_string(),
        })
    }

    /// Read any symbol: registers go to the device, constants are local.
    pub fn get(&self, name: &str) -> Result<Value> {
        match self.symbol(name)? {
            Symbol::Register(register) | Symbol::Alias { register, .. } => {
                let _guard = self.lock_registers();
                self.read_locked(&register).map(Value::Register)
            }
            Symbol::Constant(value) => Ok(Value::Constant(value)),
            Symbol::Vector(_) => Err(SessionError::VectorWriteOnly(name.to_string())),
        }
    }

    /// Write any symbol. Only registers and aliases accept values.
    pub fn set(&self, name: &str, value: u16) -> Result<()> {
        match self.symbol(name)? {
            Symbol::Register(register) | Symbol::Alias { register, .. } => {
                let _guard = self.lock_registers();
                self.write_locked(&register, value)
            }
            Symbol::Constant(_) => Err(SessionError::ConstantReadOnly(name.to_string())),
            Symbol::Vector(_) => Err(SessionError::NotARegister(name.to_string())),
        }
    }

    pub fn read_constant(&self, name: &str) -> Result<Option<i64>> {
        self.map().constant(name)
    }

    /// `#define name target` for a register target.
    pub fn define_alias(&self, name: &str, target: &str) -> Result<()> {
        self.map_mut().define_alias(name, target)?;
        debug!(name, target, "alias defined");
        Ok(())
    }

    /// `#define name value`.
    pub fn define_constant(&self, name: &str, value: Option<i64>) -> Result<()> {
        self.map_mut().define_constant(name, value)
    }

    /// `#undef name`. Returns whether an alias or constant was removed.
    pub fn undefine(&self, name: &str) -> bool {
        self.map_mut().undefine(name)
    }

    pub fn defined(&self, name: &str) -> bool {
        self.map().defined(name)
    }

    pub fn is_register(&self, name: &str) -> bool {
        self.map().is_register(name)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.map().is_constant(name)
    }

    pub fn is_vector(&self, name: &str) -> bool {
        self.map().is_vector(name)
    }

    /// Ask the firmware to report `vector`.
    pub fn enable_interrupt(&self, vector: &str) -> Result<()> {
        let index = self.map().vector(vector)?;
        self.send_interrupt_control(index, true)
    }

    /// Ask the firmware to stop reporting `vector`.
    pub fn disable_interrupt(&self, vector: &str) -> Result<()> {
        let index = self.map().vector(vector)?;
        self.send_interrupt_control(index, false)
    }

    /// Install (and enable) or remove (and disable) the handler for `vector`.
    ///
    /// Returns the handler that was previously installed. If the control
    /// frame cannot be sent the table is left as it was.
    pub fn set_interrupt_handler(
        &self,
        vector: &str,
        handler: Option<InterruptHandler>,
    ) -> Result<Option<InterruptHandler>> {
        let index = self.map().vector(vector)?;
        let enable = handler.is_some();
        // Installed before the enable goes out so an immediate interrupt
        // finds its handler.
        let previous = match handler {
            Some(handler) => self.handlers_mut().insert(index, handler),
            None => self.handlers_mut().remove(&index),
        };

        if let Err(err) = self.send_interrupt_control(index, enable) {
            let mut handlers = self.handlers_mut();
            match previous {
                Some(previous) => handlers.insert(index, previous),
                None => handlers.remove(&index),
            };
            return Err(err);
        }
        Ok(previous)
    }

    /// Whether a handler is installed for `vector`.
    pub fn has_interrupt_handler(&self, vector: &str) -> Result<bool> {
        let index = self.map().vector(vector)?;
        Ok(self
            .interrupts
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&index))
    }

    /// Shorthand for [`Session::set_interrupt_handler`] with a closure.
    pub fn on_interrupt<F>(&self, vector: &str, handler: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set_interrupt_handler(vector, Some(Arc::new(handler)))
            .map(drop)
    }

    /// Resume local interrupt delivery. Nothing is sent to the device.
    pub fn sei(&self) {
        self.interrupts.enabled.store(true, Ordering::Release);
    }

    /// Suspend local interrupt delivery; interrupts arriving meanwhile are
    /// dropped. Nothing is sent to the device.
    pub fn cli(&self) {
        self.interrupts.enabled.store(false, Ordering::Release);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts.enabled.load(Ordering::Acquire)
    }

    /// Run `f` with the symbol table.
    pub fn with_map<R>(&self, f: impl FnOnce(&RegisterMap) -> R) -> R {
        f(&self.map())
    }

    /// The multiplexer, for application-defined channels.
    pub fn mux(&self) -> &Mux<L> {
        &self.mux
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Close the link. See [`Mux::close`].
    pub fn close(&self) -> Result<()> {
        self.mux.close()?;
        Ok(())
    }

    fn read_locked(&self, register: &RegisterDescriptor) -> Result<u16> {
        let stale = self.mux.drain(REGISTER_CHANNEL);
        if !stale.is_empty() {
            warn!(
                register = %register.name,
                count = stale.len(),
                "discarded stale register replies"
            );
        }

        self.mux
            .send(u16::from(REGISTER_CHANNEL), &encode_read(register))?;
        let reply = self
            .mux
            .read_timeout(REGISTER_CHANNEL, self.config.register_timeout)
            .map_err(|err| match err {
                MuxError::Timeout(timeout) => SessionError::RegisterTimeout {
                    name: register.name.clone(),
                    timeout,
                },
                other => SessionError::Mux(other),
            })?;

        let value = decode_reply(&reply)?;
        trace!(register = %register.name, value, "register read");
        Ok(value)
    }

    fn write_locked(&self, register: &RegisterDescriptor, value: u16) -> Result<()> {
        let payload = encode_write(register, value)?;
        self.mux.send(u16::from(REGISTER_CHANNEL), &payload)?;
        trace!(register = %register.name, value, "register written");
        Ok(())
    }

    fn send_interrupt_control(&self, index: u8, enable: bool) -> Result<()> {
        self.mux.send(
            u16::from(INTERRUPT_CHANNEL),
            &encode_interrupt_control(index, enable),
        )?;
        debug!(index, enable, "interrupt control sent");
        Ok(())
    }

    fn bit_mask(&self, name: &str, bit: u8) -> Result<u16> {
        let register = self.map().resolve_register(name)?;
        let width = register.width.bits();
        if bit >= width {
            return Err(SessionError::InvalidBit {
                name: name.to_string(),
                bit,
                width,
            });
        }
        Ok(1 << bit)
    }

    fn symbol(&self, name: &str) -> Result<Symbol> {
        self.map()
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownName(name.to_string()))
    }

    fn map(&self) -> RwLockReadGuard<'_, RegisterMap> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, RegisterMap> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers_mut(&self) -> RwLockWriteGuard<'_, HashMap<u8, InterruptHandler>> {
        self.interrupts
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registers(&self) -> MutexGuard<'_, ()> {
        self.register_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L: Link> fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mux", &self.mux)
            .field("symbols", &self.map().len())
            .field("interrupts_enabled", &self.interrupts_enabled())
            .finish_non_exhaustive()
    }
}

/// A register name bound to a session.
pub struct RegisterHandle<'a, L: Link> {
    session: &'a Session<L>,
    name: String,
}

impl<L: Link> RegisterHandle<'_, L> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Result<u16> {
        self.session.read_register(&self.name)
    }

    pub fn set(&self, value: u16) -> Result<()> {
        self.session.write_register(&self.name, value)
    }
}
