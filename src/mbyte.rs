use bitflags::bitflags;
use serde::Serialize;

pub mod flag;

use flag::byte::*;
use flag::byte_type::*;
use flag::code::*;
use flag::common::*;
use flag::data::*;
use flag::special::*;

bitflags! {
    /// Flags that survive every change of the byte discriminant.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct CommonFlags: u32 {
        const NAME = BF_NAME;
        const COMMENT = BF_COMMENT;
        const REFSTO = BF_REFSTO;
        const REFSFROM = BF_REFSFROM;
        const SEGMENT = BF_SEGMENT;
        const IMPORT = BF_IMPORT;
        const EXPORT = BF_EXPORT;
        const FUNCTION = BF_FUNCTION;
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct DataFlags: u32 {
        const TYPE = BF_TYPE;
        const FILL = BF_FILL;
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct CodeFlags: u32 {
        const CALL = BF_CALL;
        const JUMP = BF_JUMP;
        const FLOW = BF_FLOW;
        const JUMPDST = BF_JUMPDST;
        const DFLOW = BF_DFLOW;
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct ItemFlags: u32 {
        const WEAK = BF_WEAK;
        const START = BF_START;
        const END = BF_END;
        const CONT = BF_CONT;
    }
}

/// Typed view of the discriminant with the flags of its region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ByteType {
    Unknown,
    Data(DataFlags),
    Code(CodeFlags),
}

/// Per-byte word of the flag store.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MByte(u32);

impl MByte {
    pub const UNMAPPED: Self = Self(0);

    /// Wrap a raw word, refusing the one discriminant value that does not
    /// exist.
    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw & BF_TYPE_MASK != BF_TYPE_MASK).then_some(Self(raw))
    }

    pub(crate) const fn from_raw_unchecked(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u32 {
        self.0
    }

    pub fn byte(self) -> Option<u8> {
        // the mask keeps the value in range
        self.has_byte().then_some((self.0 & BF_MBYTE) as u8)
    }

    pub fn has_byte(self) -> bool {
        self.0 & BF_BYTE != 0
    }

    pub fn byte_type(self) -> ByteType {
        match self.0 & BF_TYPE_MASK {
            BF_CODE => ByteType::Code(CodeFlags::from_bits_truncate(self.0)),
            BF_DATA => ByteType::Data(DataFlags::from_bits_truncate(self.0)),
            _ => ByteType::Unknown,
        }
    }

    pub fn is_code(self) -> bool {
        self.0 & BF_TYPE_MASK == BF_CODE
    }

    pub fn is_data(self) -> bool {
        self.0 & BF_TYPE_MASK == BF_DATA
    }

    pub fn is_unknown(self) -> bool {
        self.0 & BF_TYPE_MASK == BF_UNKNOWN
    }

    pub fn common(self) -> CommonFlags {
        CommonFlags::from_bits_truncate(self.0)
    }

    pub fn item(self) -> ItemFlags {
        ItemFlags::from_bits_truncate(self.0)
    }

    /// All bits of `mask` are set.
    pub fn has(self, mask: u32) -> bool {
        self.0 & mask == mask
    }

    pub fn has_name(self) -> bool {
        self.has(BF_NAME)
    }

    pub fn has_comment(self) -> bool {
        self.has(BF_COMMENT)
    }

    pub fn has_refs_to(self) -> bool {
        self.has(BF_REFSTO)
    }

    pub fn has_refs_from(self) -> bool {
        self.has(BF_REFSFROM)
    }

    pub fn is_segment(self) -> bool {
        self.has(BF_SEGMENT)
    }

    pub fn is_import(self) -> bool {
        self.has(BF_IMPORT)
    }

    pub fn is_export(self) -> bool {
        self.has(BF_EXPORT)
    }

    pub fn is_function(self) -> bool {
        self.has(BF_FUNCTION)
    }

    pub fn is_weak(self) -> bool {
        self.has(BF_WEAK)
    }

    pub fn is_start(self) -> bool {
        self.has(BF_START)
    }

    pub fn is_end(self) -> bool {
        self.has(BF_END)
    }

    pub fn is_cont(self) -> bool {
        self.has(BF_CONT)
    }

    /// Start of a typed data item.
    pub fn has_type(self) -> bool {
        self.is_data() && self.has(BF_TYPE)
    }
}

impl std::fmt::Debug for MByte {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MByte")
            .field("raw", &format_args!("{:#010X}", self.0))
            .field("byte", &self.byte())
            .field("type", &self.byte_type())
            .field("common", &self.common())
            .field("item", &self.item())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn masks_do_not_overlap() {
        let masks = [
            BF_MBYTE | BF_BYTE,
            BF_COMMON_MASK,
            BF_DATA_MASK,
            BF_CODE_MASK,
            BF_TYPE_MASK,
            BF_WEAK,
            BF_ITEM_MASK,
        ];
        for (i, a) in masks.iter().enumerate() {
            for b in &masks[i + 1..] {
                assert_eq!(a & b, 0, "{a:#x} overlaps {b:#x}");
            }
        }
        assert_eq!(CommonFlags::all().bits(), BF_COMMON_MASK);
        assert_eq!(DataFlags::all().bits(), BF_DATA_MASK);
        assert_eq!(CodeFlags::all().bits(), BF_CODE_MASK);
    }

    #[test]
    fn typed_view() {
        let word = MByte::from_raw(BF_CODE | BF_CALL | BF_NAME | BF_BYTE | 0xE8)
            .unwrap();
        assert_eq!(word.byte(), Some(0xE8));
        assert_eq!(word.byte_type(), ByteType::Code(CodeFlags::CALL));
        assert_eq!(word.common(), CommonFlags::NAME);
        assert!(word.is_code() && !word.is_data() && !word.is_unknown());
    }

    #[test]
    fn value_without_presence_bit() {
        let word = MByte::from_raw(0x90).unwrap();
        assert_eq!(word.byte(), None);
        assert!(word.is_unknown());
    }

    #[test]
    fn invalid_discriminant() {
        assert!(MByte::from_raw(BF_TYPE_MASK).is_none());
    }
}
