use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sfrlink_mux::MuxError;
use sfrlink_session::{Emulator, RegisterMap, Session, SessionConfig, SessionError, Value};

const MAP: &str = r#"{
    "registers": [
        {"name": "DDRB", "address": 4, "width": 8, "space": "io"},
        {"name": "PORTB", "address": 5, "width": 8, "space": "io"},
        {"name": "EIMSK", "address": 29, "width": 8, "space": "io"},
        {"name": "TCNT1", "address": 132, "width": 16, "space": "mem"}
    ],
    "aliases": {"LED_PORT": "PORTB"},
    "constants": {"DDB5": 5, "__AVR_ATmega32U4__": null},
    "vectors": {"INT0_vect": 1, "TIMER1_OVF_vect": 20}
}"#;

fn map() -> RegisterMap {
    RegisterMap::from_json_str(MAP).unwrap()
}

fn quick_config() -> SessionConfig {
    SessionConfig {
        register_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

fn emulated() -> (Arc<Session<UnixStream>>, Arc<Emulator<UnixStream>>) {
    let (host, firmware) = UnixStream::pair().unwrap();
    let emulator = Arc::new(Emulator::new(firmware).unwrap());
    let runner = Arc::clone(&emulator);
    thread::spawn(move || runner.run());
    let session = Session::start(host, map(), SessionConfig::default()).unwrap();
    (Arc::new(session), emulator)
}

fn raw() -> (Session<UnixStream>, UnixStream) {
    let (host, firmware) = UnixStream::pair().unwrap();
    (Session::start(host, map(), quick_config()).unwrap(), firmware)
}

#[test]
fn ddrb_write_then_read_on_the_wire() {
    let (session, mut firmware) = raw();

    session.write_register("DDRB", 0xF0).unwrap();
    let mut write = [0u8; 7];
    firmware.read_exact(&mut write).unwrap();
    assert_eq!(write, [0xBE, 0x00, 0x03, 0x04, 0xF1, 0xF0, 0xEF]);

    let responder = thread::spawn(move || {
        let mut request = [0u8; 6];
        firmware.read_exact(&mut request).unwrap();
        firmware.write_all(&[0xBE, 0x00, 0x01, 0xF0, 0xEF]).unwrap();
        (request, firmware)
    });

    let value = session.read_register("DDRB").unwrap();
    let (request, _firmware) = responder.join().unwrap();
    assert_eq!(request, [0xBE, 0x00, 0x02, 0x04, 0x01, 0xEF]);
    assert_eq!(value, 0xF0);
}

#[test]
fn interrupt_enable_goes_out_on_channel_one() {
    let (session, mut firmware) = raw();

    session.enable_interrupt("INT0_vect").unwrap();
    session.disable_interrupt("TIMER1_OVF_vect").unwrap();

    let mut frames = [0u8; 12];
    firmware.read_exact(&mut frames).unwrap();
    assert_eq!(
        frames,
        [0xBE, 0x01, 0x02, 0x01, 0x01, 0xEF, 0xBE, 0x01, 0x02, 0x14, 0x00, 0xEF]
    );
}

#[test]
fn registers_roundtrip_through_emulator() {
    let (session, _emulator) = emulated();

    session.write_register("DDRB", 0xF0).unwrap();
    session.write_register("TCNT1", 0xBEEF).unwrap();

    assert_eq!(session.read_register("DDRB").unwrap(), 0xF0);
    assert_eq!(session.read_register("TCNT1").unwrap(), 0xBEEF);
    assert_eq!(session.read_register("PORTB").unwrap(), 0x00);
}

#[test]
fn alias_reads_and_writes_the_same_register() {
    let (session, _emulator) = emulated();

    session.write_register("LED_PORT", 0x20).unwrap();
    assert_eq!(session.read_register("PORTB").unwrap(), 0x20);

    session.define_alias("LED_DDR", "DDRB").unwrap();
    session.write_register("DDRB", 0x0F).unwrap();
    assert_eq!(session.read_register("LED_DDR").unwrap(), 0x0F);

    assert!(session.undefine("LED_DDR"));
    assert!(matches!(
        session.read_register("LED_DDR"),
        Err(SessionError::UnknownName(_))
    ));
}

#[test]
fn alias_and_target_send_identical_frames() {
    let (session, mut firmware) = raw();

    session.write_register("LED_PORT", 0x20).unwrap();
    session.write_register("PORTB", 0x20).unwrap();
    let mut writes = [0u8; 14];
    firmware.read_exact(&mut writes).unwrap();
    assert_eq!(writes[..7], [0xBE, 0x00, 0x03, 0x05, 0xF1, 0x20, 0xEF]);
    assert_eq!(writes[..7], writes[7..]);

    let responder = thread::spawn(move || {
        let mut requests = Vec::new();
        for _ in 0..2 {
            let mut request = [0u8; 6];
            firmware.read_exact(&mut request).unwrap();
            firmware.write_all(&[0xBE, 0x00, 0x01, 0x20, 0xEF]).unwrap();
            requests.push(request);
        }
        (requests, firmware)
    });

    assert_eq!(session.read_register("LED_PORT").unwrap(), 0x20);
    assert_eq!(session.read_register("PORTB").unwrap(), 0x20);
    let (requests, _firmware) = responder.join().unwrap();
    assert_eq!(requests[0], [0xBE, 0x00, 0x02, 0x05, 0x01, 0xEF]);
    assert_eq!(requests[0], requests[1]);
}

#[test]
fn bit_helpers_modify_in_place() {
    let (session, _emulator) = emulated();
    session.write_register("PORTB", 0b0000_0001).unwrap();

    session.set_bit("PORTB", 5).unwrap();
    assert_eq!(session.read_register("PORTB").unwrap(), 0b0010_0001);
    assert!(session.bit_is_set("PORTB", 5).unwrap());

    session.clear_bit("PORTB", 0).unwrap();
    assert!(session.bit_is_clear("PORTB", 0).unwrap());

    let next = session.update_register("PORTB", |value| value ^ 0xFF).unwrap();
    assert_eq!(next, 0b1101_1111);

    assert!(matches!(
        session.set_bit("PORTB", 8),
        Err(SessionError::InvalidBit { bit: 8, width: 8, .. })
    ));
    assert!(matches!(
        session.update_register("PORTB", |_| 0x1FF),
        Err(SessionError::ValueOutOfRange { .. })
    ));
}

#[test]
fn register_handle_tracks_its_name() {
    let (session, _emulator) = emulated();
    let timer = session.register("TCNT1").unwrap();

    timer.set(0x1234).unwrap();
    assert_eq!(timer.get().unwrap(), 0x1234);
    assert_eq!(timer.name(), "TCNT1");

    assert!(matches!(
        session.register("DDB5"),
        Err(SessionError::NotARegister(_))
    ));
}

#[test]
fn symbolic_get_and_set() {
    let (session, _emulator) = emulated();

    session.set("DDRB", 0xAA).unwrap();
    assert_eq!(session.get("DDRB").unwrap(), Value::Register(0xAA));
    assert_eq!(session.get("DDB5").unwrap(), Value::Constant(Some(5)));
    assert_eq!(
        session.get("__AVR_ATmega32U4__").unwrap(),
        Value::Constant(None)
    );

    assert!(matches!(
        session.set("DDB5", 1),
        Err(SessionError::ConstantReadOnly(_))
    ));
    assert!(matches!(
        session.get("INT0_vect"),
        Err(SessionError::VectorWriteOnly(_))
    ));
    assert!(matches!(
        session.set("INT0_vect", 1),
        Err(SessionError::NotARegister(_))
    ));
    assert!(matches!(
        session.get("NOPE"),
        Err(SessionError::UnknownName(_))
    ));
}

#[test]
fn constants_and_existence_checks() {
    let (session, _emulator) = emulated();

    assert_eq!(session.read_constant("DDB5").unwrap(), Some(5));
    session.define_constant("BLINK_MS", Some(250)).unwrap();
    assert_eq!(session.read_constant("BLINK_MS").unwrap(), Some(250));

    assert!(session.defined("BLINK_MS"));
    assert!(session.defined("LED_PORT"));
    assert!(!session.defined("INT0_vect"));
    assert!(session.is_vector("INT0_vect"));
    assert!(session.is_register("TCNT1"));
    assert!(session.is_constant("DDB5"));

    assert!(matches!(
        session.define_constant("DDRB", Some(1)),
        Err(SessionError::DuplicateName(_))
    ));
    assert!(matches!(
        session.read_constant("DDRB"),
        Err(SessionError::NotAConstant(_))
    ));
}

#[test]
fn wide_value_rejected_for_byte_register() {
    let (session, _emulator) = emulated();
    let err = session.write_register("DDRB", 0x100).unwrap_err();
    assert!(matches!(
        err,
        SessionError::ValueOutOfRange { value: 0x100, max: 0xFF, .. }
    ));
}

#[test]
fn int0_dispatches_once_without_blocking_later_frames() {
    let (session, emulator) = emulated();
    let (seen_tx, seen_rx) = mpsc::channel();
    let seen_tx = Mutex::new(seen_tx);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    session
        .on_interrupt("INT0_vect", move || {
            let _ = seen_tx.lock().unwrap().send(());
            let _ = release_rx.lock().unwrap().recv();
        })
        .unwrap();
    // Frames are handled in order, so this read lands after the enable.
    session.read_register("DDRB").unwrap();
    assert!(emulator.interrupt_enabled(1));

    assert!(emulator.trigger_interrupt(1).unwrap());
    seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    // The handler is still parked; register traffic keeps flowing.
    session.write_register("PORTB", 0x5A).unwrap();
    assert_eq!(session.read_register("PORTB").unwrap(), 0x5A);

    release_tx.send(()).unwrap();
    assert!(seen_rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn cli_suppresses_and_sei_restores_delivery() {
    let (session, emulator) = emulated();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    session
        .on_interrupt("TIMER1_OVF_vect", move || {
            let _ = tx.lock().unwrap().send(());
        })
        .unwrap();
    session.read_register("DDRB").unwrap();

    session.cli();
    assert!(!session.interrupts_enabled());
    emulator.trigger_interrupt(20).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    session.sei();
    emulator.trigger_interrupt(20).unwrap();
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
}

#[test]
fn removing_handler_disables_vector_on_firmware() {
    let (session, emulator) = emulated();
    session.on_interrupt("INT0_vect", || {}).unwrap();
    session.read_register("DDRB").unwrap();
    assert!(emulator.interrupt_enabled(1));

    let previous = session.set_interrupt_handler("INT0_vect", None).unwrap();
    assert!(previous.is_some());
    session.read_register("DDRB").unwrap();
    assert!(!emulator.interrupt_enabled(1));

    assert!(matches!(
        session.enable_interrupt("DDRB"),
        Err(SessionError::NotAVector(_))
    ));
}

#[test]
fn failed_enable_leaves_no_handler_behind() {
    let (session, _firmware) = raw();
    session.close().unwrap();

    let err = session.on_interrupt("INT0_vect", || {}).unwrap_err();
    assert!(matches!(err, SessionError::Mux(MuxError::TransportClosed)));
    assert!(!session.has_interrupt_handler("INT0_vect").unwrap());
}

#[test]
fn failed_disable_keeps_the_installed_handler() {
    let (session, mut firmware) = raw();
    session.on_interrupt("INT0_vect", || {}).unwrap();
    let mut enable = [0u8; 6];
    firmware.read_exact(&mut enable).unwrap();
    assert_eq!(enable, [0xBE, 0x01, 0x02, 0x01, 0x01, 0xEF]);
    session.close().unwrap();

    assert!(session.set_interrupt_handler("INT0_vect", None).is_err());
    assert!(session.has_interrupt_handler("INT0_vect").unwrap());
    assert!(!session.has_interrupt_handler("TIMER1_OVF_vect").unwrap());
}

#[test]
fn unanswered_read_times_out() {
    let (session, _firmware) = raw();
    let err = session.read_register("DDRB").unwrap_err();
    assert!(matches!(err, SessionError::RegisterTimeout { ref name, .. } if name == "DDRB"));
}

#[test]
fn stale_reply_is_discarded_before_next_read() {
    let (session, mut firmware) = raw();
    assert!(matches!(
        session.read_register("DDRB"),
        Err(SessionError::RegisterTimeout { .. })
    ));

    // The late answer to the timed-out read.
    let mut request = [0u8; 6];
    firmware.read_exact(&mut request).unwrap();
    firmware.write_all(&[0xBE, 0x00, 0x01, 0x11, 0xEF]).unwrap();
    for _ in 0..100 {
        if session.mux().pending(0) == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(session.mux().pending(0), 1);

    let responder = thread::spawn(move || {
        let mut request = [0u8; 6];
        firmware.read_exact(&mut request).unwrap();
        firmware.write_all(&[0xBE, 0x00, 0x01, 0x22, 0xEF]).unwrap();
        firmware
    });
    assert_eq!(session.read_register("DDRB").unwrap(), 0x22);
    let _firmware = responder.join().unwrap();
}

#[test]
fn concurrent_register_users_get_their_own_replies() {
    let (session, _emulator) = emulated();
    let names = ["DDRB", "PORTB", "EIMSK", "TCNT1"];

    let workers: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let session = Arc::clone(&session);
            let name = name.to_string();
            thread::spawn(move || {
                for n in 0..25u16 {
                    let value = ((i as u16) << 4) | (n & 0x0F);
                    session.write_register(&name, value).unwrap();
                    assert_eq!(session.read_register(&name).unwrap(), value);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn close_fails_later_operations() {
    let (session, _emulator) = emulated();
    session.close().unwrap();
    session.close().unwrap();

    assert!(matches!(
        session.read_register("DDRB"),
        Err(SessionError::Mux(MuxError::TransportClosed))
    ));
    assert!(matches!(
        session.write_register("DDRB", 1),
        Err(SessionError::Mux(MuxError::TransportClosed))
    ));
}

#[test]
fn garbage_from_firmware_desyncs_session() {
    let (session, mut firmware) = raw();
    firmware.write_all(&[0x42; 600]).unwrap();

    let err = session.read_register("DDRB").unwrap_err();
    assert!(matches!(
        err,
        SessionError::Mux(MuxError::Desync { .. })
    ));
    assert!(matches!(
        session.close(),
        Err(SessionError::Mux(MuxError::Desync { .. }))
    ));
}
