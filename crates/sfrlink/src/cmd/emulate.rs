use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sfrlink_session::protocol::check_value;
use sfrlink_session::{Emulator, RegisterFile, RegisterMap, SharedRegisterFile};
use sfrlink_transport::ByteStream;

use crate::cmd::{install_ctrlc_handler, parse_duration, parse_value, Context, EmulateArgs};
use crate::exit::{io_error, session_error, transport_error, CliError, CliResult, SUCCESS, USAGE};

const ACCEPT_POLL: Duration = Duration::from_millis(25);

struct Connection {
    peer: SocketAddr,
    emulator: Arc<Emulator<ByteStream>>,
    handle: JoinHandle<sfrlink_session::Result<()>>,
}

struct Firing {
    vector: String,
    index: u8,
    every: Duration,
    next: Instant,
}

pub fn run(args: EmulateArgs, ctx: &Context) -> CliResult<i32> {
    let map = ctx.load_map()?;
    let registers: SharedRegisterFile = Arc::new(Mutex::new(RegisterFile::new()));
    for preset in &args.presets {
        apply_preset(&map, &registers, preset)?;
    }

    let mut firing = match &args.fire {
        Some(vector) => {
            let index = map
                .vector(vector)
                .map_err(|err| session_error("bad --fire", err))?;
            let every = parse_duration(&args.every)?;
            Some(Firing {
                vector: vector.clone(),
                index,
                every,
                next: Instant::now() + every,
            })
        }
        None => None,
    };

    let listener =
        TcpListener::bind(&args.listen).map_err(|err| io_error("bind failed", err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| io_error("bind failed", err))?;

    // The bound endpoint is the only stdout output, so callers using port 0
    // can read it back.
    let mut stdout = io::stdout();
    let _ = writeln!(stdout, "tcp://{local}");
    let _ = stdout.flush();
    tracing::info!(address = %local, "emulator listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut connections: Vec<Connection> = Vec::new();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => match serve(stream, peer, &registers) {
                Ok(connection) => connections.push(connection),
                Err(err) => tracing::warn!(%peer, error = %err, "connection rejected"),
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => return Err(io_error("accept failed", err)),
        }

        reap(&mut connections);

        if let Some(firing) = firing.as_mut() {
            if Instant::now() >= firing.next {
                fire(&connections, firing);
                firing.next += firing.every;
            }
        }
    }

    tracing::info!(connections = connections.len(), "emulator stopping");
    for connection in &connections {
        if let Err(err) = connection.emulator.shutdown() {
            tracing::debug!(peer = %connection.peer, error = %err, "shutdown failed");
        }
    }
    for connection in connections {
        let _ = connection.handle.join();
    }

    Ok(SUCCESS)
}

fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    registers: &SharedRegisterFile,
) -> CliResult<Connection> {
    stream
        .set_nonblocking(false)
        .map_err(|err| io_error("accept failed", err))?;
    let link = ByteStream::from_tcp(stream).map_err(|err| transport_error("accept failed", err))?;
    let emulator = Arc::new(
        Emulator::with_registers(link, Arc::clone(registers))
            .map_err(|err| session_error("accept failed", err))?,
    );

    let runner = Arc::clone(&emulator);
    let handle = thread::Builder::new()
        .name(format!("emulator-{peer}"))
        .spawn(move || runner.run())
        .map_err(|err| io_error("thread spawn failed", err))?;

    tracing::info!(%peer, "host connected");
    Ok(Connection {
        peer,
        emulator,
        handle,
    })
}

fn reap(connections: &mut Vec<Connection>) {
    let mut index = 0;
    while index < connections.len() {
        if !connections[index].handle.is_finished() {
            index += 1;
            continue;
        }
        let connection = connections.swap_remove(index);
        match connection.handle.join() {
            Ok(Ok(())) => tracing::info!(peer = %connection.peer, "host disconnected"),
            Ok(Err(err)) => tracing::warn!(peer = %connection.peer, error = %err, "link failed"),
            Err(_) => tracing::error!(peer = %connection.peer, "emulator thread panicked"),
        }
    }
}

fn fire(connections: &[Connection], firing: &Firing) {
    for connection in connections {
        match connection.emulator.trigger_interrupt(firing.index) {
            Ok(true) => {
                tracing::debug!(peer = %connection.peer, vector = %firing.vector, "interrupt fired")
            }
            Ok(false) => {}
            Err(err) => {
                tracing::debug!(peer = %connection.peer, error = %err, "interrupt not delivered")
            }
        }
    }
}

/// Store `NAME=VALUE` into the register file before any host connects.
fn apply_preset(map: &RegisterMap, registers: &SharedRegisterFile, preset: &str) -> CliResult<()> {
    let Some((name, value)) = preset.split_once('=') else {
        return Err(CliError::new(
            USAGE,
            format!("invalid preset '{preset}' (expected NAME=VALUE)"),
        ));
    };
    let name = name.trim();
    let register = map
        .resolve_register(name)
        .map_err(|err| session_error("bad --preset", err))?;
    let value = parse_value(value)?;
    check_value(&register, u32::from(value)).map_err(|err| session_error("bad --preset", err))?;

    registers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .store(register.space, register.wire_address(), register.width, value);
    tracing::debug!(%name, value, "preset applied");
    Ok(())
}
