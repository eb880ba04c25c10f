//! Crossbar composing memory-mapped devices into a single [`Bus`].

use crate::bus::{Bus, BusError};
use rangemap::RangeInclusiveMap;
use thiserror::Error;

/// Crossbar providing a single interface for the entire 32-bit physical
/// address space, delegating accesses to attached devices by address range.
///
/// Devices see addresses relative to the base of their mapped region, so the
/// same device model can be mapped at any base address.
///
/// Accesses to vacant regions fail (loads return `None`, stores report
/// [`BusError::Fault`]), as do accesses that start inside a region but would
/// cross its end.
#[derive(Default)]
pub struct SystemBus {
    /// Map of physical address range to `(device_index, region_base)`, where
    /// `device_index` is the position in `devices` of the device to which the
    /// range is mapped, and `region_base` is subtracted from the physical
    /// address to form the device-relative address.
    regions: RangeInclusiveMap<u32, (usize, u32)>,
    devices: Vec<Box<dyn Bus>>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `device` to the region `[base, base + size)`.
    ///
    /// Fails if the region is empty, extends beyond the 32-bit address space,
    /// or overlaps a previously attached region.
    pub fn attach(
        &mut self,
        base: u32,
        size: u32,
        device: Box<dyn Bus>,
    ) -> Result<(), MappingError> {
        if size == 0 {
            return Err(MappingError::EmptyRegion);
        }
        let end = base
            .checked_add(size - 1)
            .ok_or(MappingError::OutOfAddressSpace)?;
        if self.regions.overlaps(&(base..=end)) {
            return Err(MappingError::OverlappingRegions);
        }
        let index = self.devices.len();
        self.devices.push(device);
        self.regions.insert(base..=end, (index, base));
        Ok(())
    }

    /// Resolves an access of `size` bytes at `address` to a device index and
    /// device-relative address. `None` if the address is vacant or the access
    /// crosses the end of its region.
    fn resolve(&self, address: u32, size: u32) -> Option<(usize, u32)> {
        let (range, &(index, region_base)) = self.regions.get_key_value(&address)?;
        if u64::from(size) - 1 > u64::from(range.end() - address) {
            return None;
        }
        Some((index, address - region_base))
    }
}

impl Bus for SystemBus {
    fn read8(&mut self, address: u32) -> Option<u8> {
        let (index, offset) = self.resolve(address, 1)?;
        self.devices[index].read8(offset)
    }

    fn read16(&mut self, address: u32) -> Option<u16> {
        let (index, offset) = self.resolve(address, 2)?;
        self.devices[index].read16(offset)
    }

    fn read32(&mut self, address: u32) -> Option<u32> {
        let (index, offset) = self.resolve(address, 4)?;
        self.devices[index].read32(offset)
    }

    fn write8(&mut self, address: u32, value: u8) -> Result<(), BusError> {
        match self.resolve(address, 1) {
            Some((index, offset)) => self.devices[index].write8(offset, value),
            None => Err(BusError::Fault),
        }
    }

    fn write16(&mut self, address: u32, value: u16) -> Result<(), BusError> {
        match self.resolve(address, 2) {
            Some((index, offset)) => self.devices[index].write16(offset, value),
            None => Err(BusError::Fault),
        }
    }

    fn write32(&mut self, address: u32, value: u32) -> Result<(), BusError> {
        match self.resolve(address, 4) {
            Some((index, offset)) => self.devices[index].write32(offset, value),
            None => Err(BusError::Fault),
        }
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MappingError {
    /// The region overlaps with a previously attached region.
    #[error("memory region overlaps with previously mapped memory region")]
    OverlappingRegions,
    /// The region is zero-sized.
    #[error("memory region is empty")]
    EmptyRegion,
    /// The region does not fit in the 32-bit address space.
    #[error("memory region extends beyond the 32-bit address space")]
    OutOfAddressSpace,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Word-sized scratch device recording the last write, to observe
    /// delegation and device-relative addressing.
    struct Scratch {
        last: Option<(u32, u32)>,
    }

    impl Scratch {
        fn new() -> Self {
            Self { last: None }
        }
    }

    impl Bus for Scratch {
        fn read8(&mut self, address: u32) -> Option<u8> {
            Some(address as u8)
        }
        fn read16(&mut self, address: u32) -> Option<u16> {
            Some(address as u16)
        }
        fn read32(&mut self, address: u32) -> Option<u32> {
            Some(address)
        }
        fn write8(&mut self, address: u32, value: u8) -> Result<(), BusError> {
            self.last = Some((address, value.into()));
            Ok(())
        }
        fn write16(&mut self, address: u32, value: u16) -> Result<(), BusError> {
            self.last = Some((address, value.into()));
            Ok(())
        }
        fn write32(&mut self, address: u32, value: u32) -> Result<(), BusError> {
            self.last = Some((address, value));
            Ok(())
        }
    }

    #[test]
    fn test_delegates_with_region_relative_address() {
        let mut bus = SystemBus::new();
        bus.attach(0x8000_0000, 12, Box::new(Scratch::new())).unwrap();
        assert_eq!(Some(8), bus.read32(0x8000_0008));
        assert_eq!(Ok(()), bus.write32(0x8000_0004, 0x1234));
        assert_eq!(None, bus.read32(0x7fff_fffc));
        assert_eq!(Err(BusError::Fault), bus.write8(0x8000_000c, 1));
    }

    #[test]
    fn test_access_may_not_cross_region_end() {
        let mut bus = SystemBus::new();
        bus.attach(0x1000, 6, Box::new(Scratch::new())).unwrap();
        assert_eq!(Some(4), bus.read16(0x1004));
        assert_eq!(None, bus.read32(0x1004));
        assert_eq!(Err(BusError::Fault), bus.write32(0x1004, 0));
    }

    #[test]
    fn test_rejects_overlapping_regions() {
        let mut bus = SystemBus::new();
        bus.attach(0x0, 0x1000, Box::new(Scratch::new())).unwrap();
        assert_eq!(
            Err(MappingError::OverlappingRegions),
            bus.attach(0x0800, 0x1000, Box::new(Scratch::new()))
        );
        assert_eq!(
            Err(MappingError::EmptyRegion),
            bus.attach(0x8000, 0, Box::new(Scratch::new()))
        );
        assert_eq!(
            Err(MappingError::OutOfAddressSpace),
            bus.attach(0xffff_fffc, 8, Box::new(Scratch::new()))
        );
    }
}
