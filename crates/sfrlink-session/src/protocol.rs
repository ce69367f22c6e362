//! Payload layouts for the register and interrupt channels.
//!
//! Register requests are `[address, token]` for reads and
//! `[address, token, value...]` for writes, with 8-bit values as one byte and
//! 16-bit values as two little-endian bytes. A read is answered with the value
//! alone; writes are never answered. Interrupt control is `[index, flag]`
//! host to firmware, and an interrupt is reported as `[index]`.

use crate::error::{Result, SessionError};
use crate::map::{AddressSpace, RegisterDescriptor, Width};

pub const READ_IO8: u8 = 0x01;
pub const READ_IO16: u8 = 0x02;
pub const READ_MEM8: u8 = 0x03;
pub const READ_MEM16: u8 = 0x04;
pub const WRITE_IO8: u8 = 0xF1;
pub const WRITE_IO16: u8 = 0xF2;
pub const WRITE_MEM8: u8 = 0xF3;
pub const WRITE_MEM16: u8 = 0xF4;

pub const INT_ENABLE: u8 = 0x01;
pub const INT_DISABLE: u8 = 0x00;

pub fn read_token(width: Width, space: AddressSpace) -> u8 {
    match (space, width) {
        (AddressSpace::Io, Width::Bits8) => READ_IO8,
        (AddressSpace::Io, Width::Bits16) => READ_IO16,
        (AddressSpace::Mem, Width::Bits8) => READ_MEM8,
        (AddressSpace::Mem, Width::Bits16) => READ_MEM16,
    }
}

pub fn write_token(width: Width, space: AddressSpace) -> u8 {
    match (space, width) {
        (AddressSpace::Io, Width::Bits8) => WRITE_IO8,
        (AddressSpace::Io, Width::Bits16) => WRITE_IO16,
        (AddressSpace::Mem, Width::Bits8) => WRITE_MEM8,
        (AddressSpace::Mem, Width::Bits16) => WRITE_MEM16,
    }
}

pub fn encode_read(register: &RegisterDescriptor) -> [u8; 2] {
    [
        register.wire_address(),
        read_token(register.width, register.space),
    ]
}

/// Build a write request, rejecting values wider than the register.
pub fn encode_write(register: &RegisterDescriptor, value: u16) -> Result<Vec<u8>> {
    check_value(register, u32::from(value))?;
    let mut payload = Vec::with_capacity(2 + register.width.byte_len());
    payload.push(register.wire_address());
    payload.push(write_token(register.width, register.space));
    payload.extend_from_slice(&value.to_le_bytes()[..register.width.byte_len()]);
    Ok(payload)
}

pub fn check_value(register: &RegisterDescriptor, value: u32) -> Result<()> {
    let max = register.width.max_value();
    if value > u32::from(max) {
        return Err(SessionError::ValueOutOfRange {
            name: register.name.clone(),
            value,
            max,
        });
    }
    Ok(())
}

/// Decode a read reply by its length.
pub fn decode_reply(payload: &[u8]) -> Result<u16> {
    match *payload {
        [value] => Ok(u16::from(value)),
        [low, high] => Ok(u16::from_le_bytes([low, high])),
        _ => Err(SessionError::InvalidReply {
            len: payload.len(),
        }),
    }
}

pub fn encode_interrupt_control(index: u8, enable: bool) -> [u8; 2] {
    [index, if enable { INT_ENABLE } else { INT_DISABLE }]
}

/// Vector index carried by an interrupt notification.
pub fn decode_interrupt(payload: &[u8]) -> Option<u8> {
    match *payload {
        [index] => Some(index),
        _ => None,
    }
}

/// A register request as the firmware sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRequest {
    Read {
        address: u8,
        width: Width,
        space: AddressSpace,
    },
    Write {
        address: u8,
        width: Width,
        space: AddressSpace,
        value: u16,
    },
}

/// Parse a register-channel request. Returns `None` for unknown tokens or a
/// value length that does not match the token.
pub fn decode_request(payload: &[u8]) -> Option<RegisterRequest> {
    let (&address, rest) = payload.split_first()?;
    let (&token, value) = rest.split_first()?;

    let (width, space, is_write) = match token {
        READ_IO8 => (Width::Bits8, AddressSpace::Io, false),
        READ_IO16 => (Width::Bits16, AddressSpace::Io, false),
        READ_MEM8 => (Width::Bits8, AddressSpace::Mem, false),
        READ_MEM16 => (Width::Bits16, AddressSpace::Mem, false),
        WRITE_IO8 => (Width::Bits8, AddressSpace::Io, true),
        WRITE_IO16 => (Width::Bits16, AddressSpace::Io, true),
        WRITE_MEM8 => (Width::Bits8, AddressSpace::Mem, true),
        WRITE_MEM16 => (Width::Bits16, AddressSpace::Mem, true),
        _ => return None,
    };

    if !is_write {
        return value.is_empty().then_some(RegisterRequest::Read {
            address,
            width,
            space,
        });
    }

    let value = match (width, value) {
        (Width::Bits8, [byte]) => u16::from(*byte),
        (Width::Bits16, [low, high]) => u16::from_le_bytes([*low, *high]),
        _ => return None,
    };
    Some(RegisterRequest::Write {
        address,
        width,
        space,
        value,
    })
}

/// Interrupt control as the firmware sees it: `(index, enable)`.
pub fn decode_interrupt_control(payload: &[u8]) -> Option<(u8, bool)> {
    match *payload {
        [index, INT_ENABLE] => Some((index, true)),
        [index, INT_DISABLE] => Some((index, false)),
        _ => None,
    }
}
