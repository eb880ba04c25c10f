//! Functional simulator core for a single RV32 hart.
//!
//! The crate provides a bit-accurate interpreter for the 32-bit base integer
//! ISA plus the M, A and C extensions, the Zba/Zbb/Zbc/Zbs/Zbkb
//! bit-manipulation sets, the Zcmp push/pop sequences, and two custom
//! bit-field-extract instructions. Machine-mode traps are modeled; everything
//! below M-mode exists only as far as the `mstatus.MPP` field can name it.
//!
//! The core drives a [`bus::Bus`] for everything outside its own flat RAM
//! region and exposes a single [`core::Core::step`] operation that fetches,
//! decodes, executes and commits one instruction.

#[macro_use]
extern crate static_assertions;

use std::fmt;

pub mod bus;
pub mod core;
pub mod instruction;
pub mod registers;
pub mod system_bus;

#[cfg(test)]
pub(crate) mod testing;

/// List of all privilege levels encodable in two bits.
///
/// Only M-mode and U-mode are supported execution modes, but `mstatus.MPP` is
/// a freely writable field, so an `mret` can land the hart on any of the four
/// encodings, including Supervisor and the reserved level. CSR permission
/// checks simply compare against whatever level is current.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrivilegeLevel {
    /// User/application (abbreviated `U`) is the lowest privilege level.
    User = 0,
    /// Supervisor (abbreviated `S`). Not a supported execution mode; reachable
    /// only as an `MPP` encoding.
    Supervisor = 1,
    /// Privilege level `0b10` is reserved in the base ISA.
    Reserved = 2,
    /// Machine (abbreviated `M`) is the highest privilege level and the mode
    /// the hart resets into.
    Machine = 3,
}

impl PrivilegeLevel {
    /// Convert a 2-bit value into a [`PrivilegeLevel`].
    /// Panics if the value doesn't fit in 2 bits (`0..=3`).
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Reserved,
            3 => Self::Machine,
            _ => panic!("out of range u2 used"),
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Supervisor => "S",
            PrivilegeLevel::Reserved => "2",
            PrivilegeLevel::Machine => "M",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_level_ordering() {
        assert!(PrivilegeLevel::User < PrivilegeLevel::Supervisor);
        assert!(PrivilegeLevel::Supervisor < PrivilegeLevel::Reserved);
        assert!(PrivilegeLevel::Reserved < PrivilegeLevel::Machine);
    }

    #[test]
    fn test_privilege_level_round_trip() {
        for value in 0..4u8 {
            assert_eq!(value as usize, PrivilegeLevel::from_u2(value) as usize);
        }
    }
}
