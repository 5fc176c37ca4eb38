use tracing::trace;

use crate::error::MemoryError;
use crate::region::{Region, RegionMap};

/// Processor defined segment register number.
pub type SReg = u32;

/// Known values of segment registers over address ranges.
#[derive(Clone, Debug, Default)]
pub struct SRegMap {
    ranges: RegionMap<SReg, u64>,
}

impl SRegMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_range(
        &mut self,
        start: u64,
        end: u64,
        sreg: SReg,
        value: u64,
    ) -> Result<(), MemoryError> {
        trace!(start, end, sreg, value, "add_sreg_range");
        self.ranges.insert(sreg, start, end, value)
    }

    /// Value of `sreg` at a single address.
    pub fn set(
        &mut self,
        address: u64,
        sreg: SReg,
        value: u64,
    ) -> Result<(), MemoryError> {
        let end = address.checked_add(1).ok_or(MemoryError::AddressOverflow {
            start: address,
            size: 1,
        })?;
        self.add_range(address, end, sreg, value)
    }

    /// Value of `sreg` from `address` until the end of the range known at
    /// `from`, or at `address` only if nothing is known there.
    pub fn set_from(
        &mut self,
        address: u64,
        sreg: SReg,
        value: u64,
        from: u64,
    ) -> Result<(), MemoryError> {
        match self.ranges.find(&sreg, from) {
            Some(range) if range.end > address => {
                let end = range.end;
                self.add_range(address, end, sreg, value)
            }
            _ => self.set(address, sreg, value),
        }
    }

    pub fn get(&self, address: u64, sreg: SReg) -> Option<u64> {
        self.ranges.find(&sreg, address).map(|range| range.value)
    }

    pub fn get_or(&self, address: u64, sreg: SReg, default: u64) -> u64 {
        self.get(address, sreg).unwrap_or(default)
    }

    pub fn ranges(&self, sreg: SReg) -> &[Region<u64>] {
        self.ranges.regions(&sreg)
    }

    pub fn sregs(&self) -> impl Iterator<Item = SReg> + '_ {
        self.ranges.keys().copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DS: SReg = 3;
    const CS: SReg = 1;

    #[test]
    fn ranges_and_points() {
        let mut sregs = SRegMap::new();
        sregs.add_range(0x1000, 0x2000, DS, 0x10).unwrap();
        sregs.set(0x1800, DS, 0x20).unwrap();
        assert_eq!(sregs.get(0x1000, DS), Some(0x10));
        assert_eq!(sregs.get(0x1800, DS), Some(0x20));
        assert_eq!(sregs.get(0x1801, DS), Some(0x10));
        assert_eq!(sregs.get(0x1000, CS), None);
        assert_eq!(sregs.get_or(0x3000, DS, 0xFF), 0xFF);
    }

    #[test]
    fn set_from_extends_to_source_range() {
        let mut sregs = SRegMap::new();
        sregs.add_range(0x1000, 0x2000, CS, 0).unwrap();
        sregs.set_from(0x1400, CS, 7, 0x1000).unwrap();
        assert_eq!(sregs.get(0x1FFF, CS), Some(7));
        assert_eq!(sregs.get(0x13FF, CS), Some(0));
        // nothing known at the source, a single address is set
        sregs.set_from(0x5000, CS, 9, 0x4000).unwrap();
        assert_eq!(sregs.get(0x5000, CS), Some(9));
        assert_eq!(sregs.get(0x5001, CS), None);
    }
}
