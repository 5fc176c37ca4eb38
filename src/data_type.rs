use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, ensure, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
)]
#[repr(u8)]
pub enum Primitive {
    Char = 1,
    WChar,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// NUL terminated narrow string
    Str,
    /// NUL terminated UTF-16LE string
    WStr,
}

impl Primitive {
    const ALL: [Self; 12] = [
        Self::Char,
        Self::WChar,
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::Str,
        Self::WStr,
    ];

    pub fn from_raw(value: u8) -> Option<Self> {
        Self::try_from_primitive(value).ok()
    }

    /// Size of one element, the character unit for strings.
    pub fn size(self) -> usize {
        match self {
            Self::Char | Self::I8 | Self::U8 | Self::Str => 1,
            Self::WChar | Self::I16 | Self::U16 | Self::WStr => 2,
            Self::I32 | Self::U32 => 4,
            Self::I64 | Self::U64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::WChar => "wchar",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::Str => "str",
            Self::WStr => "wstr",
        }
    }

    /// Length is found by scanning for the terminator.
    pub fn is_string(self) -> bool {
        matches!(self, Self::Str | Self::WStr)
    }

    pub fn is_char(self) -> bool {
        matches!(self, Self::Char | Self::WChar)
    }

    /// Unsigned integer able to hold an address or integer of `size`
    /// bytes.
    pub fn int_from_bytes(size: usize) -> Option<Self> {
        match size {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            8 => Some(Self::U64),
            _ => None,
        }
    }
}

/// Type applied to a data item, `n > 0` makes it an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct DataType {
    pub primitive: Primitive,
    pub n: usize,
}

impl DataType {
    pub fn new(primitive: Primitive) -> Self {
        Self { primitive, n: 0 }
    }

    pub fn array(primitive: Primitive, n: usize) -> Self {
        Self { primitive, n }
    }

    pub fn is_array(&self) -> bool {
        self.n > 0
    }

    /// Character data shown as text: strings and arrays of characters.
    pub fn is_text(&self) -> bool {
        self.primitive.is_string() || (self.is_array() && self.primitive.is_char())
    }

    /// Size of the item. `None` for strings, whose size depends on the
    /// bytes they are applied to, and for arrays too large to address.
    pub fn fixed_size(&self) -> Option<usize> {
        if self.primitive.is_string() {
            return None;
        }
        self.n.max(1).checked_mul(self.primitive.size())
    }
}

impl From<Primitive> for DataType {
    fn from(primitive: Primitive) -> Self {
        Self::new(primitive)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.n {
            0 => write!(f, "{}", self.primitive.name()),
            n => write!(f, "{}[{n}]", self.primitive.name()),
        }
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    /// Parse `name` or `name[n]`.
    fn from_str(value: &str) -> Result<Self> {
        let (name, n) = match value.split_once('[') {
            Some((name, rest)) => {
                let count = rest
                    .strip_suffix(']')
                    .ok_or_else(|| anyhow!("Missing `]` in type `{value}`"))?;
                let n: usize = count.trim().parse()?;
                ensure!(n > 0, "Empty array type `{value}`");
                (name.trim(), n)
            }
            None => (value.trim(), 0),
        };
        let primitive = Primitive::ALL
            .into_iter()
            .find(|primitive| primitive.name() == name)
            .ok_or_else(|| anyhow!("Unknown type `{name}`"))?;
        ensure!(
            n == 0 || !primitive.is_string(),
            "Arrays of `{name}` are not supported"
        );
        Ok(Self { primitive, n })
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("u32", DataType::new(Primitive::U32), Some(4))]
    #[case("char[12]", DataType::array(Primitive::Char, 12), Some(12))]
    #[case("wchar[3]", DataType::array(Primitive::WChar, 3), Some(6))]
    #[case("str", DataType::new(Primitive::Str), None)]
    #[case(
        "u64[4611686018427387904]",
        DataType::array(Primitive::U64, 1 << 62),
        None
    )]
    fn parse(
        #[case] name: &str,
        #[case] expected: DataType,
        #[case] size: Option<usize>,
    ) {
        let parsed: DataType = name.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.fixed_size(), size);
        assert_eq!(parsed.to_string(), name);
    }

    #[rstest]
    #[case("float")]
    #[case("u8[0]")]
    #[case("u8[4")]
    #[case("str[2]")]
    fn parse_invalid(#[case] name: &str) {
        assert!(name.parse::<DataType>().is_err());
    }

    #[test]
    fn text_types() {
        assert!(DataType::new(Primitive::WStr).is_text());
        assert!(DataType::array(Primitive::Char, 4).is_text());
        assert!(!DataType::new(Primitive::Char).is_text());
        assert!(!DataType::array(Primitive::U8, 4).is_text());
    }
}
