use std::ops::Range;

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::types::Str;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct SegmentPermission: u8 {
        const R = 1 << 0;
        const W = 1 << 1;
        const X = 1 << 2;
        /// Not backed by file bytes, reads as zero
        const BSS = 1 << 3;
    }

    /// What the analysis found inside the segment.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct SegmentKind: u8 {
        const HASDATA = 1 << 0;
        const HASCODE = 1 << 1;
    }
}

impl SegmentPermission {
    pub fn can_read(&self) -> bool {
        self.contains(Self::R)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Self::W)
    }

    pub fn can_execute(&self) -> bool {
        self.contains(Self::X)
    }

    pub fn is_bss(&self) -> bool {
        self.contains(Self::BSS)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize,
)]
#[repr(u8)]
pub enum SegmentBitness {
    S8Bits = 8,
    S16Bits = 16,
    S32Bits = 32,
    S64Bits = 64,
}

impl SegmentBitness {
    pub fn from_raw(value: u32) -> Option<Self> {
        Self::try_from_primitive(value.try_into().ok()?).ok()
    }

    pub fn bits(self) -> u8 {
        self.into()
    }

    /// Digits used to print an address of this width.
    pub fn hex_width(self) -> usize {
        usize::from(self.bits() / 4)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Segment {
    pub name: Str,
    pub address: Range<u64>,
    /// Bytes of the file backing the start of the segment, if any
    pub offset: Option<Range<u64>>,
    pub kind: SegmentKind,
    pub perm: SegmentPermission,
    pub bitness: SegmentBitness,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.address.end - self.address.start
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }

    pub fn contains(&self, address: u64) -> bool {
        self.address.contains(&address)
    }

    pub fn is_executable(&self) -> bool {
        self.perm.can_execute()
    }

    pub fn has_code(&self) -> bool {
        self.kind.contains(SegmentKind::HASCODE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bitness() {
        assert_eq!(SegmentBitness::from_raw(32), Some(SegmentBitness::S32Bits));
        assert_eq!(SegmentBitness::from_raw(12), None);
        assert_eq!(SegmentBitness::from_raw(0x120), None);
        assert_eq!(SegmentBitness::S64Bits.hex_width(), 16);
    }

    #[test]
    fn permissions() {
        let perm = SegmentPermission::R | SegmentPermission::X;
        assert!(perm.can_read() && perm.can_execute());
        assert!(!perm.can_write() && !perm.is_bss());
    }
}
