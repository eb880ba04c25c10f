//! The memory interface consumed by the hart.

use thiserror::Error;

/// Interface to everything addressable outside the hart's own flat RAM.
///
/// Loads return `None` to signal a bus error; stores report success or one of
/// the [`BusError`] conditions. Addresses are 32-bit physical byte addresses.
/// Halfword and word accesses are assumed naturally aligned by the caller:
/// the hart raises alignment exceptions before an access reaches the bus.
///
/// Accesses may have device side effects, hence `&mut self` on the load
/// operations as well.
pub trait Bus {
    fn read8(&mut self, address: u32) -> Option<u8>;
    fn read16(&mut self, address: u32) -> Option<u16>;
    fn read32(&mut self, address: u32) -> Option<u32>;
    fn write8(&mut self, address: u32, value: u8) -> Result<(), BusError>;
    fn write16(&mut self, address: u32, value: u16) -> Result<(), BusError>;
    fn write32(&mut self, address: u32, value: u32) -> Result<(), BusError>;
}

/// Conditions a store can report back to the hart.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum BusError {
    /// The bus could not complete the access. The executing instruction takes
    /// a store access fault exception.
    #[error("bus access fault")]
    Fault,
    /// A device requested that the simulation stop, with the given exit code.
    ///
    /// The hart does not interpret this; [`Core::step`](crate::core::Core::step)
    /// unwinds with a [`Halt`] and the interrupted instruction is not
    /// committed. The driver loop is expected to catch it.
    #[error("halt requested with exit code {0}")]
    Halt(i32),
}

/// Host-halt condition surfaced out of [`Core::step`](crate::core::Core::step).
///
/// Raised by a memory-mapped device write (see [`BusError::Halt`]); the only
/// way a step terminates other than running to completion.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("halt requested with exit code {exit_code}")]
pub struct Halt {
    /// Exit code the guest passed to the halt register.
    pub exit_code: i32,
}
