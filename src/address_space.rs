use std::cmp::Ordering;
use std::ops::Range;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::MemoryError;
use crate::mbyte::flag::common::BF_SEGMENT;
use crate::mbyte::MByte;
use crate::memory::{MIndex, Memory};
use crate::segment::{Segment, SegmentBitness, SegmentKind, SegmentPermission};
use crate::types::{Str, Vect};

/// Contiguous run of valid addresses and the flag store index of its first
/// byte.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub address: Range<u64>,
    pub index: MIndex,
}

impl Mapping {
    pub fn len(&self) -> usize {
        // mappings are only created if their size fits an usize
        (self.address.end - self.address.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty()
    }

    fn contains_index(&self, idx: MIndex) -> bool {
        (self.index..self.index + self.len()).contains(&idx)
    }
}

/// Addresses whose bytes come from the loaded file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileMapping {
    pub address: Range<u64>,
    pub offset: u64,
}

impl FileMapping {
    fn offset_range(&self) -> Range<u64> {
        self.offset..self.offset + (self.address.end - self.address.start)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub start: u64,
    pub end: u64,
    pub size: usize,
}

/// Logical addresses, file offsets and flag store indices of one binary.
#[derive(Clone, Debug, Default)]
pub struct AddressSpace {
    file: Vec<u8>,
    mappings: Vect<Mapping>,
    file_mappings: Vect<FileMapping>,
    segments: Vect<Segment>,
    memory: Memory,
}

fn empty_check(start: u64, end: u64) -> Result<(), MemoryError> {
    if start >= end {
        return Err(MemoryError::EmptyRange { start, end });
    }
    Ok(())
}

fn end_from_size(start: u64, size: u64) -> Result<u64, MemoryError> {
    start
        .checked_add(size)
        .ok_or(MemoryError::AddressOverflow { start, size })
}

/// Binary search over half-open ranges sorted by address, `Ok` if one of
/// them contains `address`, `Err` with the position of the next one.
fn range_idx_by_address<T>(
    items: &[T],
    address: u64,
    range: impl Fn(&T) -> &Range<u64>,
) -> Result<usize, usize> {
    items.binary_search_by(|item| {
        let range = range(item);
        if range.end <= address {
            Ordering::Less
        } else if range.start > address {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

fn overlaps<T>(
    items: &[T],
    address: &Range<u64>,
    range: impl Fn(&T) -> &Range<u64> + Copy,
) -> bool {
    match range_idx_by_address(items, address.start, range) {
        Ok(_) => true,
        Err(next) => items
            .get(next)
            .is_some_and(|item| range(item).start < address.end),
    }
}

macro_rules! number_getters {
    ($($le:ident $be:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $le(&self, address: u64) -> Option<$ty> {
                self.read_array(address).map(<$ty>::from_le_bytes)
            }

            pub fn $be(&self, address: u64) -> Option<$ty> {
                self.read_array(address).map(<$ty>::from_be_bytes)
            }
        )*
    };
}

impl AddressSpace {
    pub fn new(file: Vec<u8>) -> Self {
        Self {
            file,
            ..Self::default()
        }
    }

    pub fn file(&self) -> &[u8] {
        &self.file
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn file_mappings(&self) -> &[FileMapping] {
        &self.file_mappings
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn memory_info(&self) -> MemoryInfo {
        match (self.mappings.first(), self.mappings.last()) {
            (Some(first), Some(last)) => MemoryInfo {
                start: first.address.start,
                end: last.address.end,
                size: self.memory.len(),
            },
            _ => MemoryInfo::default(),
        }
    }

    fn mapping_idx_by_address(&self, address: u64) -> Result<usize, usize> {
        range_idx_by_address(&self.mappings, address, |m| &m.address)
    }

    fn segment_idx_by_address(&self, address: u64) -> Result<usize, usize> {
        range_idx_by_address(&self.segments, address, |s| &s.address)
    }

    /// Insert a mapping that does not overlap any other, shifting the
    /// flag store indices of the mappings above it.
    fn insert_mapping(
        &mut self,
        address: Range<u64>,
    ) -> Result<(), MemoryError> {
        let len = usize::try_from(address.end - address.start).map_err(|_| {
            MemoryError::AddressOverflow {
                start: address.start,
                size: address.end - address.start,
            }
        })?;
        let Err(pos) = self.mapping_idx_by_address(address.start) else {
            return Err(MemoryError::Overlap {
                start: address.start,
                end: address.end,
                what: "mapping",
            });
        };
        let index = pos.checked_sub(1).map_or(0, |prev| {
            self.mappings[prev].index + self.mappings[prev].len()
        });
        debug!(
            start = address.start,
            end = address.end,
            index,
            "new mapping"
        );
        self.memory.insert_words(index, len);
        for mapping in self.mappings.iter_mut().skip(pos) {
            mapping.index += len;
        }
        self.mappings.insert(pos, Mapping { address, index });

        // merge with touching neighbours, their indices are already adjacent
        self.merge_with_next(pos);
        if let Some(prev) = pos.checked_sub(1) {
            self.merge_with_next(prev);
        }
        Ok(())
    }

    fn merge_with_next(&mut self, pos: usize) {
        let touching = match (self.mappings.get(pos), self.mappings.get(pos + 1))
        {
            (Some(current), Some(next)) => {
                current.address.end == next.address.start
            }
            _ => false,
        };
        if touching {
            if let Some(next) = self.mappings.remove(pos + 1) {
                self.mappings[pos].address.end = next.address.end;
            }
        }
    }

    /// Map every address of `range` not mapped yet.
    fn ensure_mapped(
        &mut self,
        range: Range<u64>,
    ) -> Result<(), MemoryError> {
        let mut cursor = range.start;
        while cursor < range.end {
            match self.mapping_idx_by_address(cursor) {
                Ok(idx) => cursor = self.mappings[idx].address.end,
                Err(next) => {
                    let gap_end = self
                        .mappings
                        .get(next)
                        .map_or(range.end, |m| m.address.start.min(range.end));
                    self.insert_mapping(cursor..gap_end)?;
                    cursor = gap_end;
                }
            }
        }
        Ok(())
    }

    /// Declare `[start, end)` valid, zero filled. Fails if any part of it
    /// is already mapped.
    pub fn map(&mut self, start: u64, end: u64) -> Result<(), MemoryError> {
        trace!(start, end, "map");
        empty_check(start, end)?;
        if overlaps(&self.mappings, &(start..end), |m| &m.address) {
            return Err(MemoryError::Overlap {
                start,
                end,
                what: "mapping",
            });
        }
        self.insert_mapping(start..end)
    }

    pub fn map_n(&mut self, base: u64, size: u64) -> Result<(), MemoryError> {
        self.map(base, end_from_size(base, size)?)
    }

    /// Map `[start, end)` and copy the file bytes starting at `offset`
    /// into it. Only `min(end - start, file size - offset)` bytes are
    /// bound to the file, the rest stays zero filled. Returns the number of
    /// bytes bound.
    pub fn map_file(
        &mut self,
        offset: u64,
        start: u64,
        end: u64,
    ) -> Result<u64, MemoryError> {
        trace!(offset, start, end, "map_file");
        empty_check(start, end)?;
        let file_size = self.file.len() as u64;
        if offset >= file_size {
            return Err(MemoryError::OffsetOutOfFile { offset, file_size });
        }
        let bound = (end - start).min(file_size - offset);
        let address = start..start + bound;
        if overlaps(&self.file_mappings, &address, |m| &m.address) {
            return Err(MemoryError::Overlap {
                start,
                end,
                what: "file mapping",
            });
        }
        self.ensure_mapped(start..end)?;

        // the whole range is now inside a single merged mapping
        let Some(first) = self.address_to_index(start) else {
            unreachable!("range was just mapped");
        };
        let data = &self.file[offset as usize..(offset + bound) as usize];
        for (i, byte) in data.iter().enumerate() {
            self.memory.set_byte(first + i, *byte);
        }

        let pos = match range_idx_by_address(&self.file_mappings, start, |m| {
            &m.address
        }) {
            Ok(pos) | Err(pos) => pos,
        };
        self.file_mappings.insert(pos, FileMapping { address, offset });
        debug!(offset, start, bound, "file bytes mapped");
        Ok(bound)
    }

    /// Register a segment, mapping whatever part of it is not mapped yet.
    pub fn add_segment(
        &mut self,
        name: &str,
        start: u64,
        end: u64,
        perm: SegmentPermission,
        bitness: SegmentBitness,
    ) -> Result<(), MemoryError> {
        trace!(name, start, end, "add_segment");
        empty_check(start, end)?;
        if overlaps(&self.segments, &(start..end), |s| &s.address) {
            return Err(MemoryError::Overlap {
                start,
                end,
                what: "segment",
            });
        }
        self.ensure_mapped(start..end)?;

        let offset = self.file_backing(start..end);
        let kind = if perm.can_execute() {
            SegmentKind::HASCODE
        } else if perm.is_bss() {
            SegmentKind::empty()
        } else {
            SegmentKind::HASDATA
        };
        let Err(pos) = self.segment_idx_by_address(start) else {
            unreachable!("overlap already checked");
        };
        self.segments.insert(
            pos,
            Segment {
                name: Str::create(name),
                address: start..end,
                offset,
                kind,
                perm,
                bitness,
            },
        );
        if let Some(idx) = self.address_to_index(start) {
            self.memory.set(idx, BF_SEGMENT);
        }
        debug!(name, start, end, ?perm, "segment added");
        Ok(())
    }

    pub fn add_segment_n(
        &mut self,
        name: &str,
        base: u64,
        size: u64,
        perm: SegmentPermission,
        bitness: SegmentBitness,
    ) -> Result<(), MemoryError> {
        let end = end_from_size(base, size)?;
        self.add_segment(name, base, end, perm, bitness)
    }

    /// File offsets of the bytes backing the start of `address`.
    fn file_backing(&self, address: Range<u64>) -> Option<Range<u64>> {
        let idx = range_idx_by_address(&self.file_mappings, address.start, |m| {
            &m.address
        })
        .ok()?;
        let mapping = &self.file_mappings[idx];
        let delta = address.start - mapping.address.start;
        let len = mapping.address.end.min(address.end) - address.start;
        let start = mapping.offset + delta;
        Some(start..start + len)
    }

    pub fn find_segment(&self, address: u64) -> Option<&Segment> {
        let idx = self.segment_idx_by_address(address).ok()?;
        Some(&self.segments[idx])
    }

    /// Add `kind` to the segment containing `address`.
    pub fn refine_segment_kind(
        &mut self,
        address: u64,
        kind: SegmentKind,
    ) -> bool {
        let Ok(idx) = self.segment_idx_by_address(address) else {
            return false;
        };
        let segment = &mut self.segments[idx];
        if !segment.kind.contains(kind) {
            debug!(name = %segment.name, ?kind, "segment kind refined");
            segment.kind |= kind;
        }
        true
    }

    pub fn is_address(&self, address: u64) -> bool {
        self.mapping_idx_by_address(address).is_ok()
    }

    pub fn address_to_index(&self, address: u64) -> Option<MIndex> {
        let mapping = &self.mappings[self.mapping_idx_by_address(address).ok()?];
        // the delta is below the mapping length, that fits an usize
        Some(mapping.index + (address - mapping.address.start) as usize)
    }

    pub fn index_to_address(&self, idx: MIndex) -> Option<u64> {
        let pos = self
            .mappings
            .partition_point(|m| m.index + m.len() <= idx);
        let mapping = self.mappings.get(pos)?;
        mapping
            .contains_index(idx)
            .then(|| mapping.address.start + (idx - mapping.index) as u64)
    }

    pub fn address_to_offset(&self, address: u64) -> Option<u64> {
        let idx = range_idx_by_address(&self.file_mappings, address, |m| {
            &m.address
        })
        .ok()?;
        let mapping = &self.file_mappings[idx];
        Some(mapping.offset + (address - mapping.address.start))
    }

    pub fn offset_to_address(&self, offset: u64) -> Option<u64> {
        self.file_mappings
            .iter()
            .find(|m| m.offset_range().contains(&offset))
            .map(|m| m.address.start + (offset - m.offset))
    }

    pub fn index_to_offset(&self, idx: MIndex) -> Option<u64> {
        self.address_to_offset(self.index_to_address(idx)?)
    }

    pub fn get_mbyte(&self, address: u64) -> Option<MByte> {
        self.memory.get(self.address_to_index(address)?)
    }

    /// Flag store index of `address` and the number of bytes readable
    /// from it before the end of its mapping or segment.
    fn readable(&self, address: u64) -> Option<(MIndex, usize)> {
        let mapping = &self.mappings[self.mapping_idx_by_address(address).ok()?];
        let mut end = mapping.address.end;
        if let Some(segment) = self.find_segment(address) {
            end = end.min(segment.address.end);
        }
        let idx = mapping.index + (address - mapping.address.start) as usize;
        Some((idx, (end - address) as usize))
    }

    fn byte_at(&self, idx: MIndex) -> u8 {
        self.memory.get_byte(idx).unwrap_or(0)
    }

    /// Copy up to `buf.len()` bytes, stopping at the end of the mapping or
    /// segment containing `address`. Unbacked bytes read as zero.
    pub fn read(&self, address: u64, buf: &mut [u8]) -> usize {
        let Some((idx, available)) = self.readable(address) else {
            return 0;
        };
        let len = buf.len().min(available);
        for (i, byte) in buf[..len].iter_mut().enumerate() {
            *byte = self.byte_at(idx + i);
        }
        len
    }

    pub fn read_array<const N: usize>(&self, address: u64) -> Option<[u8; N]> {
        let mut buf = [0; N];
        (self.read(address, &mut buf) == N).then_some(buf)
    }

    pub fn get_u8(&self, address: u64) -> Option<u8> {
        self.read_array::<1>(address).map(|[byte]| byte)
    }

    pub fn get_i8(&self, address: u64) -> Option<i8> {
        self.read_array(address).map(i8::from_le_bytes)
    }

    number_getters! {
        get_u16 get_u16_be: u16,
        get_u32 get_u32_be: u32,
        get_u64 get_u64_be: u64,
        get_i16 get_i16_be: i16,
        get_i32 get_i32_be: i32,
        get_i64 get_i64_be: i64,
    }

    pub fn get_bool(&self, address: u64) -> Option<bool> {
        self.get_u8(address).map(|byte| byte != 0)
    }

    pub fn get_char(&self, address: u64) -> Option<char> {
        self.get_u8(address).map(char::from)
    }

    /// Unsigned LEB128 value and its encoded length.
    pub fn get_uleb128(&self, address: u64) -> Option<(u64, usize)> {
        let mut value = 0u64;
        let mut shift = 0;
        // 64 bits need at most 10 groups of 7
        for i in 0..10 {
            let byte = self.get_u8(address.checked_add(i)?)?;
            value |= u64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Some((value, i as usize + 1));
            }
        }
        None
    }

    /// Signed LEB128 value and its encoded length.
    pub fn get_sleb128(&self, address: u64) -> Option<(i64, usize)> {
        let mut value = 0u64;
        let mut shift = 0;
        for i in 0..10 {
            let byte = self.get_u8(address.checked_add(i)?)?;
            value |= u64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= u64::MAX << shift;
                }
                return Some((value as i64, i as usize + 1));
            }
        }
        None
    }

    fn narrow_bytes(&self, address: u64, max: Option<usize>) -> Option<Str> {
        let (idx, available) = self.readable(address)?;
        let len = max.map_or(available, |max| max.min(available));
        let bytes: Vec<u8> = (idx..idx + len)
            .map(|i| self.byte_at(i))
            .take_while(|byte| *byte != 0)
            .collect();
        Some(Str::from_bytes(&bytes))
    }

    fn wide_units(&self, address: u64, max: Option<usize>) -> Option<String> {
        let (idx, available) = self.readable(address)?;
        let units = available / 2;
        let len = max.map_or(units, |max| max.min(units));
        let units: Vec<u16> = (0..len)
            .map(|i| {
                let at = idx + i * 2;
                u16::from_le_bytes([self.byte_at(at), self.byte_at(at + 1)])
            })
            .take_while(|unit| *unit != 0)
            .collect();
        Some(String::from_utf16_lossy(&units))
    }

    /// Bytes up to the first NUL or the end of the mapping.
    pub fn get_strz(&self, address: u64) -> Option<Str> {
        self.narrow_bytes(address, None)
    }

    /// At most `n` bytes, stopping early at a NUL.
    pub fn get_str(&self, address: u64, n: usize) -> Option<Str> {
        self.narrow_bytes(address, Some(n))
    }

    /// UTF-16LE units up to the first NUL unit or the end of the mapping.
    pub fn get_wstrz(&self, address: u64) -> Option<String> {
        self.wide_units(address, None)
    }

    /// At most `n` UTF-16LE units, stopping early at a NUL unit.
    pub fn get_wstr(&self, address: u64, n: usize) -> Option<String> {
        self.wide_units(address, Some(n))
    }
}
