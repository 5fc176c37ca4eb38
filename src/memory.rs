use std::ops::Range;

use tracing::trace;

use crate::mbyte::flag::byte::*;
use crate::mbyte::flag::byte_type::*;
use crate::mbyte::flag::code::BF_CODE_MASK;
use crate::mbyte::flag::data::BF_DATA_MASK;
use crate::mbyte::flag::special::*;
use crate::mbyte::flag::BF_MMASK;
use crate::mbyte::MByte;
use crate::types::Vect;

/// Position of a byte inside the flag store, in address order.
pub type MIndex = usize;

/// One flag word per mapped byte.
///
/// Every mutation goes through the discriminant policy: a mask carrying a
/// different discriminant clears the word down to its byte value and
/// common flags before being applied, region flags must belong to the
/// resulting discriminant and unknown bytes carry no item markers. Masks
/// breaking those rules are rejected and leave the word untouched.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    words: Vect<MByte>,
    dirty: Option<Range<MIndex>>,
    layout: u64,
}

/// Compute the word resulting from setting `mask` on `raw`.
fn apply_set(raw: u32, mask: u32) -> Option<u32> {
    if mask & (BF_MBYTE | BF_BYTE) != 0 {
        return None;
    }
    let tag = mask & BF_TYPE_MASK;
    if tag == BF_TYPE_MASK {
        return None;
    }
    let mut raw = raw;
    if tag != BF_UNKNOWN && tag != raw & BF_TYPE_MASK {
        raw &= BF_MMASK;
        raw |= tag;
    }
    let allowed = match raw & BF_TYPE_MASK {
        BF_DATA => BF_DATA_MASK,
        BF_CODE => BF_CODE_MASK,
        _ => 0,
    };
    if mask & (BF_DATA_MASK | BF_CODE_MASK) & !allowed != 0 {
        return None;
    }
    if raw & BF_TYPE_MASK == BF_UNKNOWN && mask & (BF_ITEM_MASK | BF_WEAK) != 0
    {
        return None;
    }
    let raw = raw | mask;
    if raw & BF_START != 0 && raw & BF_CONT != 0 {
        return None;
    }
    Some(raw)
}

/// Compute the word resulting from clearing `mask` on `raw`.
fn apply_unset(raw: u32, mask: u32) -> Option<u32> {
    if mask & (BF_MBYTE | BF_BYTE) != 0 {
        return None;
    }
    // removing the current discriminant turns the byte unknown
    if mask & raw & BF_TYPE_MASK != 0 {
        return Some(raw & BF_MMASK & !mask);
    }
    Some(raw & !(mask & !BF_TYPE_MASK))
}

impl Memory {
    pub fn new(len: usize) -> Self {
        let mut words = Vect::with_capacity(len);
        words.resize(len, MByte::UNMAPPED);
        Self {
            words,
            dirty: None,
            layout: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MByte> + '_ {
        self.words.iter().copied()
    }

    /// Changes every time words are inserted, shifting the indices above.
    pub fn layout(&self) -> u64 {
        self.layout
    }

    /// Insert `count` empty words at `idx`.
    pub(crate) fn insert_words(&mut self, idx: MIndex, count: usize) {
        self.words.insert_n(idx, vec![MByte::UNMAPPED; count]);
        self.layout += 1;
        self.dirty = None;
    }

    fn mark_dirty(&mut self, range: Range<MIndex>) {
        self.dirty = Some(match self.dirty.take() {
            Some(dirty) => {
                dirty.start.min(range.start)..dirty.end.max(range.end)
            }
            None => range,
        });
    }

    /// Range modified since the last call.
    pub fn take_dirty(&mut self) -> Option<Range<MIndex>> {
        self.dirty.take()
    }

    pub fn dirty(&self) -> Option<&Range<MIndex>> {
        self.dirty.as_ref()
    }

    /// Record `[idx, idx + len)` as modified without changing any word,
    /// used when information attached to those bytes changes elsewhere.
    pub fn touch(&mut self, idx: MIndex, len: usize) -> bool {
        match self.range(idx, len) {
            Some(range) => {
                self.mark_dirty(range);
                true
            }
            None => false,
        }
    }

    fn rejected(idx: MIndex, mask: u32) -> bool {
        trace!(idx, mask, "flag mask rejected");
        #[cfg(feature = "restrictive")]
        debug_assert!(false, "flag mask {mask:#010X} rejected at {idx}");
        false
    }

    fn write(&mut self, idx: MIndex, raw: u32) {
        if self.words[idx].as_raw() != raw {
            self.words[idx] = MByte::from_raw_unchecked(raw);
            self.mark_dirty(idx..idx + 1);
        }
    }

    pub fn get(&self, idx: MIndex) -> Option<MByte> {
        self.words.get(idx).copied()
    }

    pub fn get_byte(&self, idx: MIndex) -> Option<u8> {
        self.get(idx)?.byte()
    }

    /// Store the byte value, marking it present.
    pub fn set_byte(&mut self, idx: MIndex, value: u8) -> bool {
        let Some(word) = self.get(idx) else {
            return false;
        };
        let raw = (word.as_raw() & !BF_MBYTE) | BF_BYTE | u32::from(value);
        self.write(idx, raw);
        true
    }

    pub fn set(&mut self, idx: MIndex, mask: u32) -> bool {
        let Some(word) = self.get(idx) else {
            return false;
        };
        match apply_set(word.as_raw(), mask) {
            Some(raw) => {
                self.write(idx, raw);
                true
            }
            None => Self::rejected(idx, mask),
        }
    }

    pub fn unset(&mut self, idx: MIndex, mask: u32) -> bool {
        let Some(word) = self.get(idx) else {
            return false;
        };
        match apply_unset(word.as_raw(), mask) {
            Some(raw) => {
                self.write(idx, raw);
                true
            }
            None => Self::rejected(idx, mask),
        }
    }

    pub fn set_flag(&mut self, idx: MIndex, mask: u32, value: bool) -> bool {
        if value {
            self.set(idx, mask)
        } else {
            self.unset(idx, mask)
        }
    }

    /// Zero the whole word, byte value included.
    pub fn clear(&mut self, idx: MIndex) -> bool {
        if idx >= self.len() {
            return false;
        }
        self.write(idx, 0);
        true
    }

    pub fn is_code(&self, idx: MIndex) -> bool {
        self.get(idx).is_some_and(MByte::is_code)
    }

    pub fn is_data(&self, idx: MIndex) -> bool {
        self.get(idx).is_some_and(MByte::is_data)
    }

    pub fn is_unknown(&self, idx: MIndex) -> bool {
        self.get(idx).is_some_and(MByte::is_unknown)
    }

    pub fn has_flag(&self, idx: MIndex, mask: u32) -> bool {
        self.get(idx).is_some_and(|word| word.has(mask))
    }

    /// Any of the common flags is set.
    pub fn has_common(&self, idx: MIndex) -> bool {
        self.get(idx).is_some_and(|word| !word.common().is_empty())
    }

    fn range(&self, idx: MIndex, len: usize) -> Option<Range<MIndex>> {
        let end = idx.checked_add(len)?;
        (len > 0 && end <= self.len()).then_some(idx..end)
    }

    /// Turn the bytes of items that cross the borders of `range` from the
    /// outside into unknown bytes.
    fn detach_edges(&mut self, range: &Range<MIndex>) {
        if let Some(start) = self.item_start(range.start) {
            if start < range.start {
                self.make_unknown(start..range.start);
            }
        }
        let last = range.end - 1;
        if self.item_start(last).is_none() || self.words[last].is_end() {
            return;
        }
        let mut end = range.end;
        while let Some(word) = self.get(end) {
            if word.is_start() {
                break;
            }
            if word.is_cont() || word.is_end() {
                end += 1;
            }
            if !word.is_cont() {
                break;
            }
        }
        self.make_unknown(range.end..end);
    }

    fn make_unknown(&mut self, range: Range<MIndex>) {
        for idx in range {
            let raw = self.words[idx].as_raw() & BF_MMASK;
            self.write(idx, raw);
        }
    }

    /// Mark `[idx, idx + len)` as a single item: one START, CONT bytes and
    /// one END, or START|END for a single byte. `mask` must resolve to data
    /// or code for every byte; nothing is written if any byte rejects it.
    pub fn set_n(&mut self, idx: MIndex, len: usize, mask: u32) -> bool {
        let Some(range) = self.range(idx, len) else {
            return false;
        };
        let mask = mask & !BF_ITEM_MASK;
        let mut words = Vec::with_capacity(len);
        let current = &self.words.as_slice()[range.clone()];
        for (i, word) in current.iter().enumerate() {
            let marker = match i {
                0 if len == 1 => BF_START | BF_END,
                0 => BF_START,
                i if i == len - 1 => BF_END,
                _ => BF_CONT,
            };
            let raw = word.as_raw() & !BF_ITEM_MASK;
            match apply_set(raw, mask | marker) {
                Some(raw) => words.push(raw),
                None => return Self::rejected(idx + i, mask | marker),
            }
        }
        self.detach_edges(&range);
        for (i, raw) in words.into_iter().enumerate() {
            self.write(idx + i, raw);
        }
        true
    }

    /// Turn `[idx, idx + len)` into unknown bytes, keeping byte values and
    /// common flags. Items crossing the borders lose their outer part too.
    pub fn unset_n(&mut self, idx: MIndex, len: usize) -> bool {
        let Some(range) = self.range(idx, len) else {
            return false;
        };
        self.detach_edges(&range);
        self.make_unknown(range);
        true
    }

    /// Like [Memory::unset_n] but first grows the range to whole items,
    /// returning the range that was undefined.
    pub fn undefine(
        &mut self,
        idx: MIndex,
        len: usize,
    ) -> Option<Range<MIndex>> {
        let range = self.range(idx, len)?;
        let start = self.item_start(range.start).unwrap_or(range.start);
        let end = self
            .item_end(range.end - 1)
            .map_or(range.end, |end| end + 1);
        self.make_unknown(start..end);
        Some(start..end)
    }

    /// Index of the START owning `idx`, `None` if the byte is not part of
    /// an item.
    pub fn item_start(&self, idx: MIndex) -> Option<MIndex> {
        let mut current = idx;
        loop {
            let word = self.get(current)?;
            if word.is_start() {
                return Some(current);
            }
            // an END behind `idx` closes another item
            let inside = word.is_cont() || (current == idx && word.is_end());
            if !inside {
                return None;
            }
            current = current.checked_sub(1)?;
        }
    }

    /// Index of the END of the item containing `idx`, `None` if the item
    /// is not closed by an END right after its CONT run.
    pub fn item_end(&self, idx: MIndex) -> Option<MIndex> {
        let start = self.item_start(idx)?;
        if self.words[start].is_end() {
            return Some(start);
        }
        let mut current = start + 1;
        loop {
            let word = self.get(current)?;
            if word.is_start() {
                return None;
            }
            if word.is_end() {
                return Some(current);
            }
            if !word.is_cont() {
                return None;
            }
            current += 1;
        }
    }

    pub fn item_len(&self, idx: MIndex) -> Option<usize> {
        let start = self.item_start(idx)?;
        let end = self.item_end(start)?;
        Some(end - start + 1)
    }

    /// First item START after `idx`.
    pub fn next_item(&self, idx: MIndex) -> Option<MIndex> {
        let from = idx.checked_add(1)?;
        (from..self.len()).find(|i| self.words[*i].is_start())
    }

    /// Every byte of `[idx, idx + len)` is mapped and satisfies `pred`.
    pub fn range_is(
        &self,
        idx: MIndex,
        len: usize,
        pred: impl Fn(MByte) -> bool,
    ) -> bool {
        self.range(idx, len).is_some_and(|range| {
            self.words.as_slice()[range].iter().all(|word| pred(*word))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mbyte::flag::code::*;
    use crate::mbyte::flag::common::*;
    use crate::mbyte::flag::data::*;
    use crate::mbyte::{ByteType, CodeFlags, DataFlags};

    fn loaded(bytes: &[u8]) -> Memory {
        let mut memory = Memory::new(bytes.len());
        for (idx, byte) in bytes.iter().enumerate() {
            assert!(memory.set_byte(idx, *byte));
        }
        memory.take_dirty();
        memory
    }

    #[test]
    fn unmapped_index_fails_everything() {
        let mut memory = Memory::new(4);
        assert!(!memory.set(4, BF_DATA));
        assert!(!memory.unset(4, BF_NAME));
        assert!(!memory.clear(4));
        assert!(!memory.is_unknown(4));
        assert!(!memory.has_common(4));
        assert_eq!(memory.get_byte(4), None);
        // mapped but without a value
        assert_eq!(memory.get_byte(0), None);
        assert!(memory.is_unknown(0));
    }

    #[test]
    fn common_flags_are_orthogonal() {
        let mut memory = loaded(&[0x90]);
        assert!(memory.set(0, BF_NAME));
        assert!(memory.set(0, BF_CODE));
        assert!(memory.set(0, BF_COMMENT));
        assert!(memory.has_flag(0, BF_NAME | BF_COMMENT));
        assert!(memory.unset(0, BF_NAME));
        assert!(!memory.has_flag(0, BF_NAME));
        assert!(memory.has_flag(0, BF_COMMENT));
        assert!(memory.is_code(0));
        assert_eq!(memory.get_byte(0), Some(0x90));
    }

    #[test]
    fn discriminant_change_clears_regions() {
        let mut memory = loaded(&[0xE8]);
        assert!(memory.set(0, BF_CODE | BF_CALL | BF_FUNCTION));
        assert!(memory.set(0, BF_DATA | BF_TYPE));
        let word = memory.get(0).unwrap();
        assert_eq!(word.byte_type(), ByteType::Data(DataFlags::TYPE));
        assert!(word.is_function());
        assert_eq!(word.byte(), Some(0xE8));
    }

    #[test]
    fn rejected_masks() {
        let mut memory = loaded(&[0, 0]);
        assert!(!memory.set(0, BF_DATA | BF_CODE));
        assert!(!memory.set(0, BF_CALL));
        assert!(!memory.set(0, BF_START));
        assert!(!memory.set(0, BF_BYTE));
        assert!(memory.set(1, BF_DATA));
        assert!(!memory.set(1, BF_JUMP));
        assert!(memory.get(0).unwrap().is_unknown());
        assert!(memory.get(1).unwrap().is_data());
    }

    #[test]
    fn unset_discriminant_keeps_common() {
        let mut memory = loaded(&[0x55]);
        memory.set(0, BF_CODE | BF_FLOW | BF_NAME);
        memory.set(0, BF_START | BF_END);
        assert!(memory.unset(0, BF_CODE));
        let word = memory.get(0).unwrap();
        assert!(word.is_unknown());
        assert!(word.has_name());
        assert!(word.item().is_empty());
        assert_eq!(word.byte(), Some(0x55));
        // unsetting a discriminant that is not the current one is a no-op
        memory.set(0, BF_DATA);
        assert!(memory.unset(0, BF_CODE));
        assert!(memory.is_data(0));
    }

    #[test]
    fn clear_zeroes_word() {
        let mut memory = loaded(&[0x12]);
        memory.set(0, BF_DATA | BF_NAME);
        assert!(memory.clear(0));
        assert_eq!(memory.get(0).unwrap().as_raw(), 0);
    }

    #[test]
    fn item_markers() {
        let mut memory = loaded(&[0; 8]);
        assert!(memory.set_n(1, 4, BF_CODE));
        assert!(memory.set_n(5, 1, BF_DATA));
        let items: Vec<_> = memory.iter().map(|w| w.item().bits()).collect();
        assert_eq!(
            items,
            [0, BF_START, BF_CONT, BF_CONT, BF_END, BF_START | BF_END, 0, 0]
        );
        assert_eq!(memory.item_start(3), Some(1));
        assert_eq!(memory.item_len(3), Some(4));
        assert_eq!(memory.item_start(0), None);
        assert_eq!(memory.next_item(1), Some(5));
        assert_eq!(memory.next_item(5), None);
        assert!(memory.range_is(1, 4, MByte::is_code));
        assert!(!memory.range_is(1, 5, MByte::is_code));
    }

    #[test]
    fn set_n_detaches_overlapped_items() {
        let mut memory = loaded(&[0; 8]);
        memory.set_n(0, 4, BF_DATA);
        memory.set_n(4, 4, BF_DATA);
        // straddles both items
        assert!(memory.set_n(2, 4, BF_CODE | BF_FLOW));
        assert!(memory.is_unknown(0) && memory.is_unknown(1));
        assert!(memory.is_unknown(6) && memory.is_unknown(7));
        assert_eq!(memory.item_start(5), Some(2));
        assert_eq!(
            memory.get(3).unwrap().byte_type(),
            ByteType::Code(CodeFlags::FLOW)
        );
    }

    #[test]
    fn unclosed_start_owns_no_later_item() {
        let mut memory = loaded(&[0; 12]);
        assert!(memory.set(0, BF_CODE | BF_START));
        assert!(memory.set_n(10, 2, BF_DATA));
        assert_eq!(memory.item_end(0), None);
        assert_eq!(memory.item_len(0), None);
        assert_eq!(memory.item_start(11), Some(10));
        assert_eq!(memory.item_len(10), Some(2));
        assert!(memory.unset_n(0, 1));
        assert!(memory.is_data(10) && memory.is_data(11));
        assert_eq!(memory.undefine(0, 1), Some(0..1));
        assert!(memory.is_data(10));
    }

    #[test]
    fn end_closes_backward_walk() {
        let mut memory = loaded(&[0; 4]);
        assert!(memory.set_n(0, 2, BF_DATA));
        // a CONT right after an END belongs to no item
        assert!(memory.set(2, BF_DATA | BF_CONT));
        assert_eq!(memory.item_start(2), None);
        assert_eq!(memory.item_end(1), Some(1));
        assert!(memory.unset_n(2, 1));
        assert!(memory.is_data(0) && memory.is_data(1));
    }

    #[test]
    fn set_n_rejection_writes_nothing() {
        let mut memory = loaded(&[0; 4]);
        assert!(!memory.set_n(0, 4, BF_TYPE));
        assert!(!memory.set_n(2, 4, BF_DATA));
        assert!(memory.iter().all(MByte::is_unknown));
        assert_eq!(memory.take_dirty(), None);
    }

    #[test]
    fn undefine_grows_to_items() {
        let mut memory = loaded(&[0; 6]);
        memory.set_n(0, 3, BF_DATA | BF_TYPE);
        memory.set_n(3, 3, BF_CODE);
        assert_eq!(memory.undefine(2, 2), Some(0..6));
        assert!(memory.iter().all(MByte::is_unknown));
        assert!(memory.iter().all(|w| w.item().is_empty()));
    }

    #[test]
    fn dirty_range() {
        let mut memory = loaded(&[0; 16]);
        memory.set(3, BF_DATA);
        memory.set(9, BF_CODE);
        assert_eq!(memory.take_dirty(), Some(3..10));
        assert_eq!(memory.take_dirty(), None);
        // writing an identical word is not a change
        memory.set(3, BF_DATA);
        assert_eq!(memory.dirty(), None);
    }

    #[test]
    fn insert_words_changes_layout() {
        let mut memory = loaded(&[1, 2]);
        let layout = memory.layout();
        memory.insert_words(1, 3);
        assert_ne!(memory.layout(), layout);
        assert_eq!(memory.len(), 5);
        assert_eq!(memory.get_byte(4), Some(2));
        assert_eq!(memory.get_byte(1), None);
    }
}
