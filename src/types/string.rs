use std::borrow::Borrow;
use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::Serialize;

/// Bytes stored inline before the string spills to the heap.
pub const SHORT_CAPACITY: usize = 3 * std::mem::size_of::<usize>() - 2;

/// Top bit of the length word, set while the string lives on the heap.
const LONG_BIT: usize = 1 << (usize::BITS - 1);

#[derive(Clone)]
enum Repr {
    Short([u8; SHORT_CAPACITY + 1]),
    /// Content followed by the terminating NUL, `buf.len() == len + 1`.
    Long(Vec<u8>),
}

/// Byte string with small inline storage, always NUL terminated.
#[derive(Clone)]
pub struct Str {
    length: usize,
    repr: Repr,
}

impl Str {
    pub const fn new() -> Self {
        Self {
            length: 0,
            repr: Repr::Short([0; SHORT_CAPACITY + 1]),
        }
    }

    pub fn create(value: &str) -> Self {
        Self::from_bytes(value.as_bytes())
    }

    /// Build from the first `n` bytes of `data`, clipped to its length.
    pub fn create_n(data: &[u8], n: usize) -> Self {
        Self::from_bytes(&data[..n.min(data.len())])
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let mut string = Self::new();
        string.append_n(data);
        string
    }

    pub fn len(&self) -> usize {
        self.length & !LONG_BIT
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the content is stored inline.
    pub fn is_small(&self) -> bool {
        self.length & LONG_BIT == 0
    }

    pub fn capacity(&self) -> usize {
        match &self.repr {
            Repr::Short(_) => SHORT_CAPACITY,
            Repr::Long(buf) => buf.capacity() - 1,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.len();
        &self.as_bytes_with_nul()[..len]
    }

    pub fn as_bytes_with_nul(&self) -> &[u8] {
        let len = self.len();
        match &self.repr {
            Repr::Short(arr) => &arr[..=len],
            Repr::Long(buf) => &buf[..=len],
        }
    }

    pub fn to_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    pub fn at(&self, idx: usize) -> Option<u8> {
        self.as_bytes().get(idx).copied()
    }

    fn set_len(&mut self, len: usize) {
        self.length = len | (self.length & LONG_BIT);
    }

    /// Make room for at least `capacity` content bytes, moving the string
    /// to the heap when the inline buffer is too small.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity <= self.capacity() {
            return;
        }
        let len = self.len();
        let empty = Repr::Short([0; SHORT_CAPACITY + 1]);
        let repr = std::mem::replace(&mut self.repr, empty);
        self.repr = match repr {
            Repr::Short(arr) => {
                let mut buf = Vec::with_capacity(capacity + 1);
                buf.extend_from_slice(&arr[..=len]);
                Repr::Long(buf)
            }
            Repr::Long(mut buf) => {
                buf.reserve_exact(capacity + 1 - buf.len());
                Repr::Long(buf)
            }
        };
        self.length = len | LONG_BIT;
    }

    pub fn append_n(&mut self, data: &[u8]) {
        let len = self.len();
        let new_len = len + data.len();
        self.reserve(new_len);
        match &mut self.repr {
            Repr::Short(arr) => {
                arr[len..new_len].copy_from_slice(data);
                arr[new_len] = 0;
            }
            Repr::Long(buf) => {
                buf.truncate(len);
                buf.extend_from_slice(data);
                buf.push(0);
            }
        }
        self.set_len(new_len);
    }

    pub fn append(&mut self, other: &Str) {
        self.append_n(other.as_bytes());
    }

    pub fn append_str(&mut self, value: &str) {
        self.append_n(value.as_bytes());
    }

    pub fn push(&mut self, byte: u8) {
        self.append_n(&[byte]);
    }

    /// Truncate, or extend with NUL bytes, to exactly `len` bytes.
    pub fn resize(&mut self, len: usize) {
        let current = self.len();
        if len > current {
            self.append_n(&vec![0; len - current]);
            return;
        }
        match &mut self.repr {
            Repr::Short(arr) => arr[len] = 0,
            Repr::Long(buf) => {
                buf.truncate(len);
                buf.push(0);
            }
        }
        self.set_len(len);
    }

    /// Drop the content, keeping any heap allocation.
    pub fn clear(&mut self) {
        self.resize(0);
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.as_bytes().starts_with(prefix)
    }

    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.as_bytes().ends_with(suffix)
    }

    pub fn index_of(&self, byte: u8) -> Option<usize> {
        self.as_bytes().iter().position(|b| *b == byte)
    }

    pub fn last_index_of(&self, byte: u8) -> Option<usize> {
        self.as_bytes().iter().rposition(|b| *b == byte)
    }

    /// FNV-1a of the content bytes.
    pub fn fnv_hash(&self) -> u64 {
        super::fnv1a(self.as_bytes())
    }
}

impl Default for Str {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Str {}

impl PartialEq<str> for Str {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for Str {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialOrd for Str {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Str {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

// hashes exactly like `[u8]` so `Borrow<[u8]>` lookups agree
impl Hash for Str {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state)
    }
}

impl Borrow<[u8]> for Str {
    fn borrow(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<&str> for Str {
    fn from(value: &str) -> Self {
        Self::create(value)
    }
}

impl From<String> for Str {
    fn from(value: String) -> Self {
        Self::create(&value)
    }
}

impl Display for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl Debug for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl Serialize for Str {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_to_long_transition() {
        let short = Str::create_n(&[b'a'; 64], SHORT_CAPACITY);
        assert!(short.is_small());
        assert_eq!(short.len(), SHORT_CAPACITY);

        let mut long = short.clone();
        long.push(b'b');
        assert!(!long.is_small());
        assert_eq!(long.len(), SHORT_CAPACITY + 1);
        assert!(long.ends_with(b"ab"));
        assert_eq!(long.as_bytes_with_nul().last(), Some(&0));
    }

    #[test]
    fn always_nul_terminated() {
        let mut string = Str::create("sub_401000");
        assert_eq!(string.as_bytes_with_nul(), b"sub_401000\0");
        string.resize(3);
        assert_eq!(string.as_bytes_with_nul(), b"sub\0");
        string.resize(5);
        assert_eq!(string.as_bytes_with_nul(), b"sub\0\0\0");
        string.clear();
        assert_eq!(string.as_bytes_with_nul(), b"\0");
    }

    #[test]
    fn clear_keeps_heap_storage() {
        let mut string =
            Str::create("a fairly long string that lives on the heap");
        let capacity = string.capacity();
        string.clear();
        assert!(string.is_empty());
        assert!(!string.is_small());
        assert_eq!(string.capacity(), capacity);
    }

    #[test]
    fn search() {
        let string = Str::create("loc_00401000");
        assert!(string.starts_with(b"loc_"));
        assert!(!string.starts_with(b"sub_"));
        assert_eq!(string.index_of(b'0'), Some(4));
        assert_eq!(string.last_index_of(b'1'), Some(8));
        assert_eq!(string.index_of(b'x'), None);
        assert_eq!(string.at(3), Some(b'_'));
        assert_eq!(string.at(100), None);
    }

    #[test]
    fn hash_matches_fnv1a() {
        let string = Str::create("main");
        assert_eq!(string.fnv_hash(), crate::types::fnv1a(b"main"));
        // FNV-1a of the empty input is the offset basis
        assert_eq!(Str::new().fnv_hash(), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn equality_ignores_storage() {
        let mut a = Str::new();
        a.reserve(100);
        a.append_str("x");
        assert_eq!(a, Str::create("x"));
        assert_eq!(a, "x");
    }
}
