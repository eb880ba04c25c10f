//! Memory-mapped testbench I/O device.
//!
//! Three word registers, addressed relative to wherever the device is mapped:
//! a character console, a hex-word console, and an exit register whose write
//! stops the simulation with the written value as exit code. The device is
//! write-only; all reads fault.

use mica_core::bus::{Bus, BusError};
use std::io::{self, Write};

/// Byte offset of the print-character register (low byte goes to stdout).
const PRINT_CHAR: u32 = 0x0;
/// Byte offset of the print-word register (eight hex digits plus newline).
const PRINT_U32: u32 = 0x4;
/// Byte offset of the exit register.
const EXIT: u32 = 0x8;

/// Size in bytes of the device's register window.
pub const SIZE: u32 = 12;

pub struct TbIo;

impl Bus for TbIo {
    fn read8(&mut self, _address: u32) -> Option<u8> {
        None
    }

    fn read16(&mut self, _address: u32) -> Option<u16> {
        None
    }

    fn read32(&mut self, _address: u32) -> Option<u32> {
        None
    }

    fn write8(&mut self, address: u32, value: u8) -> Result<(), BusError> {
        match address {
            PRINT_CHAR => {
                print_char(value);
                Ok(())
            }
            _ => Err(BusError::Fault),
        }
    }

    fn write16(&mut self, _address: u32, _value: u16) -> Result<(), BusError> {
        Err(BusError::Fault)
    }

    fn write32(&mut self, address: u32, value: u32) -> Result<(), BusError> {
        match address {
            PRINT_CHAR => {
                print_char(value as u8);
                Ok(())
            }
            PRINT_U32 => {
                println!("{:08x}", value);
                Ok(())
            }
            EXIT => Err(BusError::Halt(value as i32)),
            _ => Err(BusError::Fault),
        }
    }
}

fn print_char(byte: u8) {
    let mut stdout = io::stdout();
    stdout.write_all(&[byte]).ok();
    stdout.flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_register_halts_with_written_code() {
        assert_eq!(Err(BusError::Halt(42)), TbIo.write32(EXIT, 42));
        assert_eq!(Err(BusError::Halt(-1)), TbIo.write32(EXIT, 0xffff_ffff));
    }

    #[test]
    fn test_reads_and_stray_writes_fault() {
        assert_eq!(None, TbIo.read8(PRINT_CHAR));
        assert_eq!(None, TbIo.read32(EXIT));
        assert_eq!(Err(BusError::Fault), TbIo.write32(SIZE, 0));
        assert_eq!(Err(BusError::Fault), TbIo.write16(PRINT_CHAR, 0));
        assert_eq!(Err(BusError::Fault), TbIo.write8(EXIT, 1));
    }
}
