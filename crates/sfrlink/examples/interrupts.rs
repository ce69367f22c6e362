//! Interrupt example: the emulated firmware raises INT0 and the host counts
//! deliveries, with a cli()/sei() window in the middle.
//!
//! Run with:
//!   cargo run --example interrupts

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sfrlink::session::{Emulator, RegisterMap, Session, SessionConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, firmware) = UnixStream::pair()?;
    let emulator = Arc::new(Emulator::new(firmware)?);
    let runner = Arc::clone(&emulator);
    let firmware_thread = thread::spawn(move || runner.run());

    let session = Session::start(host, RegisterMap::atmega32u4()?, SessionConfig::default())?;
    let index = session.with_map(|map| map.vector("INT0_vect"))?;

    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    session.on_interrupt("INT0_vect", move || {
        let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
        eprintln!("[host] INT0 #{n}");
    })?;

    // A register round trip guarantees the firmware has seen the enable.
    session.read_register("SREG")?;

    for round in 0..3 {
        if round == 1 {
            session.cli();
            eprintln!("[host] interrupts masked");
        } else {
            session.sei();
        }
        emulator.trigger_interrupt(index)?;
        thread::sleep(Duration::from_millis(50));
    }

    eprintln!("[host] delivered {} of 3", count.load(Ordering::SeqCst));
    session.close()?;
    firmware_thread.join().map_err(|_| "firmware thread panicked")??;
    Ok(())
}
