//! Blink example: drives PORTB5 on an emulated ATmega32U4.
//!
//! Run with:
//!   cargo run --example blink

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sfrlink::session::{Emulator, RegisterMap, Session, SessionConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, firmware) = UnixStream::pair()?;

    // Firmware side
    let emulator = Arc::new(Emulator::new(firmware)?);
    let runner = Arc::clone(&emulator);
    let firmware_thread = thread::spawn(move || runner.run());

    let session = Session::start(host, RegisterMap::atmega32u4()?, SessionConfig::default())?;
    let led = session.with_map(|map| map.constant("PORTB5"))?.unwrap_or(5);
    let led = u8::try_from(led)?;

    session.set_bit("DDRB", led)?;
    for _ in 0..4 {
        session.update_register("PORTB", |value| value ^ (1 << led))?;
        eprintln!(
            "[host] PORTB = {:#04x} (LED {})",
            session.read_register("PORTB")?,
            if session.bit_is_set("PORTB", led)? { "on" } else { "off" }
        );
        thread::sleep(Duration::from_millis(100));
    }

    session.close()?;
    firmware_thread.join().map_err(|_| "firmware thread panicked")??;
    eprintln!("[host] done");
    Ok(())
}
