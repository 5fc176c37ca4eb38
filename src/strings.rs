use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::address_space::AddressSpace;
use crate::data_type::{DataType, Primitive};

/// One character may not exceed this share of the string.
const CHARS_FREQ: f64 = 0.7;
const ENTROPY_THRESHOLD: f64 = 3.5;
const MIN_UNIQUE: usize = 2;
/// Without any space, longer strings are treated as noise.
const MAX_WORD: usize = 10;

const FORMATS: [&str; 27] = [
    "%c", "%d", "%e", "%E", "%f", "%g", "%G", "%hi", "%hu", "%i", "%l", "%ld",
    "%li", "%lf", "%Lf", "%lu", "%lli", "%lld", "%llu", "%o", "%p", "%s",
    "%u", "%x", "%X", "%n", "%%",
];

/// Text found at an address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StringResult {
    /// `str`/`wstr` if terminated, `char[n]`/`wchar[n]` otherwise
    pub kind: DataType,
    pub value: String,
    /// Bytes covered, terminator included
    pub total_size: usize,
    pub terminated: bool,
}

fn is_ascii(c: u16) -> bool {
    c != 0x0B && ((0x09..=0x0D).contains(&c) || (0x20..=0x7E).contains(&c))
}

fn entropy(s: &str) -> f64 {
    let mut frequency = [0usize; 256];
    for byte in s.bytes() {
        frequency[usize::from(byte)] += 1;
    }
    let len = s.len() as f64;
    frequency
        .iter()
        .filter(|count| **count > 0)
        .map(|count| {
            let prob = *count as f64 / len;
            -prob * prob.log2()
        })
        .sum()
}

/// Repetitive or structureless text.
pub fn is_gibberish(s: &str) -> bool {
    let unique: HashSet<u8> = s.bytes().collect();
    if unique.len() <= MIN_UNIQUE {
        return true;
    }
    let len = s.len() as f64;
    let dominated = unique.iter().any(|c| {
        s.bytes().filter(|b| b == c).count() as f64 / len > CHARS_FREQ
    });
    if dominated || entropy(s) < ENTROPY_THRESHOLD {
        return true;
    }
    !s.contains(' ') && s.len() > MAX_WORD
}

pub fn validate_string(s: &str, min_length: usize) -> bool {
    let Some(first) = s.chars().next() else {
        return false;
    };
    let delimited = |close: char| s.len() > 2 && s.ends_with(close);
    match first {
        '\'' => delimited('\''),
        '"' => delimited('"'),
        '<' => delimited('>'),
        '(' => delimited(')'),
        '[' => delimited(']'),
        '{' => delimited('}'),
        '%' => FORMATS.contains(&s),
        _ if s.len() >= min_length => true,
        _ => !is_gibberish(s),
    }
}

/// Collect printable units of `unit` bytes from `address` up to the end of
/// `end`, returning the text and the last unit read.
fn collect(
    space: &AddressSpace,
    address: u64,
    end: u64,
    unit: Primitive,
) -> (String, Option<u16>) {
    let step = unit.size() as u64;
    let mut value = String::new();
    let mut last = None;
    let mut current = address;
    while current < end {
        let read = match unit {
            Primitive::WChar => space.get_u16(current),
            _ => space.get_u8(current).map(u16::from),
        };
        let Some(c) = read else {
            break;
        };
        last = Some(c);
        if !is_ascii(c) {
            break;
        }
        // ascii units always fit a byte
        value.push(char::from(c as u8));
        current += step;
    }
    (value, last)
}

/// Detect a narrow or UTF-16LE string at `address`, the second byte being
/// zero selects the wide flavor.
pub fn classify(
    space: &AddressSpace,
    address: u64,
    min_length: usize,
) -> Option<StringResult> {
    let segment = space.find_segment(address)?;
    let end = segment.address.end;
    if end - address < 2 {
        return None;
    }
    let b1 = space.get_mbyte(address)?.byte()?;
    let b2 = space.get_mbyte(address + 1)?.byte()?;

    let (unit, string) = if is_ascii(b1.into()) && b2 == 0 {
        (Primitive::WChar, Primitive::WStr)
    } else {
        (Primitive::Char, Primitive::Str)
    };
    let (value, last) = collect(space, address, end, unit);
    if !validate_string(&value, min_length) {
        return None;
    }
    let terminated = last == Some(0);
    let chars = value.len();
    let kind = if terminated {
        DataType::new(string)
    } else {
        DataType::array(unit, chars)
    };
    let total_size = (chars + usize::from(terminated)) * unit.size();
    Some(StringResult {
        kind,
        value,
        total_size,
        terminated,
    })
}

/// Scan every segment backed by bytes for strings.
pub fn find_strings(
    space: &AddressSpace,
    min_length: usize,
) -> Vec<(u64, StringResult)> {
    let mut found = Vec::new();
    for segment in space.segments() {
        if segment.perm.is_bss() {
            continue;
        }
        let mut address = segment.address.start;
        while address < segment.address.end {
            match classify(space, address, min_length) {
                Some(string) => {
                    let size = string.total_size.max(1) as u64;
                    found.push((address, string));
                    address += size;
                }
                None => address += 1,
            }
        }
        debug!(segment = %segment.name, total = found.len(), "strings scanned");
    }
    found
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::segment::{SegmentBitness, SegmentPermission};

    fn space(bytes: &[u8]) -> AddressSpace {
        let mut space = AddressSpace::new(bytes.to_vec());
        space.map_file(0, 0x1000, 0x1000 + bytes.len() as u64).unwrap();
        space
            .add_segment_n(
                ".rodata",
                0x1000,
                bytes.len() as u64,
                SegmentPermission::R,
                SegmentBitness::S32Bits,
            )
            .unwrap();
        space
    }

    #[rstest]
    #[case("Hello world", true)]
    #[case("The quick brown fox", false)]
    #[case("aaaaaaaa", true)]
    #[case("abababab", true)]
    #[case("xK9qLmZ2vR7tW", true)]
    #[case("Quick brown fox", false)]
    fn gibberish(#[case] s: &str, #[case] expected: bool) {
        assert_eq!(is_gibberish(s), expected);
    }

    #[rstest]
    #[case("%s", true)]
    #[case("%q", false)]
    #[case("<init>", true)]
    #[case("(x", false)]
    #[case("abc", false)]
    #[case("abcd", true)]
    #[case("", false)]
    fn validation(#[case] s: &str, #[case] expected: bool) {
        assert_eq!(validate_string(s, 4), expected);
    }

    #[test]
    fn narrow_terminated() {
        let space = space(b"Hello\0\x01");
        let string = classify(&space, 0x1000, 4).unwrap();
        assert_eq!(string.value, "Hello");
        assert_eq!(string.kind, DataType::new(Primitive::Str));
        assert_eq!(string.total_size, 6);
        assert!(string.terminated);
    }

    #[test]
    fn narrow_unterminated() {
        let space = space(b"Hello\xFF");
        let string = classify(&space, 0x1000, 4).unwrap();
        assert_eq!(string.kind, DataType::array(Primitive::Char, 5));
        assert_eq!(string.total_size, 5);
        assert!(!string.terminated);
    }

    #[test]
    fn wide() {
        let space = space(b"H\0e\0l\0l\0o\0\0\0");
        let string = classify(&space, 0x1000, 4).unwrap();
        assert_eq!(string.value, "Hello");
        assert_eq!(string.kind, DataType::new(Primitive::WStr));
        assert_eq!(string.total_size, 12);
    }

    #[test]
    fn rejected() {
        let space = space(b"\x01\x02\x03\x04");
        assert_eq!(classify(&space, 0x1000, 4), None);
        // single byte left in the segment
        assert_eq!(classify(&space, 0x1003, 4), None);
        assert_eq!(classify(&space, 0x2000, 4), None);
    }

    #[test]
    fn scan() {
        let space = space(b"\x01Hello\0\x02World!\0");
        let found: Vec<_> = find_strings(&space, 4)
            .into_iter()
            .map(|(address, string)| (address, string.value))
            .collect();
        assert_eq!(
            found,
            [(0x1001, "Hello".to_string()), (0x1008, "World!".to_string())]
        );
    }
}
