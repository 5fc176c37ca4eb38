/// Raw layout of the 32-bit per-byte word.
/// Low 8 bits contain the value of the byte in the loaded image, the next bit
/// is set if that value is present.
pub mod byte {
    /// Mask for the byte value
    pub const BF_MBYTE: u32 = 0x0000_00FF;
    /// Byte has value ?
    pub const BF_BYTE: u32 = 0x0000_0100;
}

/// Information kept across every transition between unknown, data and code.
pub mod common {
    /// Mask of common bits
    pub const BF_COMMON_MASK: u32 = 0x0001_FE00;
    /// Has name ?
    pub const BF_NAME: u32 = 1 << 9;
    /// Has comment ?
    pub const BF_COMMENT: u32 = 1 << 10;
    /// Referenced by other items
    pub const BF_REFSTO: u32 = 1 << 11;
    /// References other items
    pub const BF_REFSFROM: u32 = 1 << 12;
    /// First byte of a segment
    pub const BF_SEGMENT: u32 = 1 << 13;
    pub const BF_IMPORT: u32 = 1 << 14;
    pub const BF_EXPORT: u32 = 1 << 15;
    /// Function entry
    pub const BF_FUNCTION: u32 = 1 << 16;
}

/// Flags only meaningful while the discriminant is DATA.
pub mod data {
    pub const BF_DATA_MASK: u32 = 0x0006_0000;
    /// Has a type in the database
    pub const BF_TYPE: u32 = 1 << 17;
    /// Filler/padding
    pub const BF_FILL: u32 = 1 << 18;
}

/// Flags only meaningful while the discriminant is CODE.
pub mod code {
    pub const BF_CODE_MASK: u32 = 0x00F8_0000;
    pub const BF_CALL: u32 = 1 << 19;
    pub const BF_JUMP: u32 = 1 << 20;
    /// Exec flow continues to the next instruction
    pub const BF_FLOW: u32 = 1 << 21;
    /// Target of a jump
    pub const BF_JUMPDST: u32 = 1 << 22;
    /// Delay slot flow
    pub const BF_DFLOW: u32 = 1 << 23;
}

/// Two bit discriminant, exactly one value per word.
pub mod byte_type {
    pub const BF_TYPE_MASK: u32 = 0x0C00_0000;
    pub const BF_UNKNOWN: u32 = 0;
    pub const BF_DATA: u32 = 1 << 26;
    pub const BF_CODE: u32 = 2 << 26;
}

/// Item boundaries and weak marker.
pub mod special {
    /// Item can be replaced by a stronger analysis result
    pub const BF_WEAK: u32 = 1 << 28;
    pub const BF_START: u32 = 1 << 29;
    pub const BF_END: u32 = 1 << 30;
    pub const BF_CONT: u32 = 1 << 31;
    pub const BF_ITEM_MASK: u32 = BF_START | BF_END | BF_CONT;
}

/// Bits that survive a discriminant change: byte value, presence and common
pub const BF_MMASK: u32 =
    byte::BF_MBYTE | byte::BF_BYTE | common::BF_COMMON_MASK;
