use std::ops::Range;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use tracing::debug;

use crate::address_space::AddressSpace;
use crate::data_type::{DataType, Primitive};
use crate::database::Database;
use crate::mbyte::flag::data::BF_FILL;
use crate::mbyte::MByte;
use crate::memory::{MIndex, Memory};
use crate::segment::Segment;
use crate::types::{Str, Vect};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize,
)]
#[repr(u8)]
pub enum ListingItemKind {
    HexDump = 1,
    Instruction,
    /// Label of a jump destination
    Jump,
    Segment,
    Function,
    Type,
    Array,
    /// Run of padding bytes
    Fill,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize,
)]
#[repr(u8)]
pub enum SymbolKind {
    Segment = 1,
    Function,
    Type,
    String,
    Array,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize,
)]
#[repr(u8)]
pub enum ThemeKind {
    Default = 0,
    Segment,
    Function,
    String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub address: u64,
    pub index: MIndex,
    pub kind: SymbolKind,
    pub theme: ThemeKind,
    pub value: Str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListingItem {
    pub kind: ListingItemKind,
    pub index: MIndex,
    /// First index after the bytes shown by this item
    pub end: MIndex,
    pub address: u64,
    pub data_type: Option<DataType>,
    pub symbol: Option<Symbol>,
}

/// Ordered view of the segments: one or more items per code or data item
/// and hex dump rows for unknown bytes.
///
/// Symbols, imports and exports are positions into the item list, filled
/// while the items are produced.
#[derive(Clone, Debug)]
pub struct Listing {
    hex_row: usize,
    items: Vect<ListingItem>,
    symbols: Vect<usize>,
    imports: Vect<usize>,
    exports: Vect<usize>,
    /// Memory layout and segment count the items were built from
    built: Option<(u64, usize)>,
}

impl Default for Listing {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Flag store indices covered by a segment.
struct Span<'a> {
    segment: &'a Segment,
    range: Range<MIndex>,
}

impl Span<'_> {
    fn address(&self, idx: MIndex) -> u64 {
        self.segment.address.start + (idx - self.range.start) as u64
    }
}

fn spans(space: &AddressSpace) -> Vec<Span<'_>> {
    space
        .segments()
        .iter()
        .filter_map(|segment| {
            let start = space.address_to_index(segment.address.start)?;
            // segments are mapped as a whole, their size fits an usize
            let range = start..start + segment.len() as usize;
            Some(Span { segment, range })
        })
        .collect()
}

fn span_of<'s, 'a>(
    spans: &'s [Span<'a>],
    idx: MIndex,
) -> Option<&'s Span<'a>> {
    let pos = spans.partition_point(|span| span.range.end <= idx);
    spans.get(pos).filter(|span| span.range.contains(&idx))
}

/// Bytes shown by the item starting at `idx`: the START, its CONT bytes and
/// the END following them. Anything else is shown one byte at a time.
fn run_len(memory: &Memory, idx: MIndex, limit: MIndex) -> usize {
    match memory.get(idx) {
        Some(word) if word.is_start() && !word.is_end() => {}
        _ => return 1,
    }
    let mut end = idx + 1;
    while end < limit && memory.get(end).is_some_and(MByte::is_cont) {
        end += 1;
    }
    if end < limit && memory.get(end).is_some_and(MByte::is_end) {
        end += 1;
    }
    end - idx
}

/// A full walk of `span` produces items at `idx`.
fn is_visited(
    memory: &Memory,
    span: &Span,
    idx: MIndex,
    hex_row: usize,
) -> bool {
    let start = span.range.start;
    if idx == start {
        return true;
    }
    let (Some(word), Some(prev)) = (memory.get(idx), memory.get(idx - 1))
    else {
        return false;
    };
    if word.is_unknown() {
        return !prev.is_unknown() || (idx - start) % hex_row == 0;
    }
    if word.is_start() || !(word.is_cont() || word.is_end()) {
        return true;
    }
    // covered by a multi byte item starting before
    let mut current = idx - 1;
    loop {
        let Some(word) = memory.get(current) else {
            return true;
        };
        if word.is_start() {
            return word.is_end();
        }
        if !word.is_cont() || current == start {
            return true;
        }
        current -= 1;
    }
}

/// Replace the positions pointing into `old` with `fresh`, relative to
/// `old.start`, shifting the ones after it.
fn splice_positions(
    list: &mut Vect<usize>,
    old: &Range<usize>,
    new_len: usize,
    fresh: Vec<usize>,
) {
    let first = list.partition_point(|pos| *pos < old.start);
    let last = list.partition_point(|pos| *pos < old.end);
    list.remove_n(first, last - first);
    for pos in list.iter_mut().skip(first) {
        *pos = *pos - old.len() + new_len;
    }
    list.insert_n(first, fresh.into_iter().map(|pos| old.start + pos));
}

struct Builder<'a> {
    space: &'a AddressSpace,
    database: &'a Database,
    hex_row: usize,
    items: Vec<ListingItem>,
    symbols: Vec<usize>,
    imports: Vec<usize>,
    exports: Vec<usize>,
}

impl<'a> Builder<'a> {
    fn new(
        space: &'a AddressSpace,
        database: &'a Database,
        hex_row: usize,
    ) -> Self {
        Self {
            space,
            database,
            hex_row,
            items: Vec::new(),
            symbols: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Produce the items of `span` from `from` until `until`, which must
    /// both be positions a full walk stops at.
    fn walk(&mut self, span: &Span, from: MIndex, until: MIndex) {
        if from == span.range.start {
            self.push_segment(span);
        }
        let mut idx = from;
        while idx < span.range.end && idx < until {
            idx = self.step(span, idx);
        }
    }

    fn push(
        &mut self,
        kind: ListingItemKind,
        span: &Span,
        range: Range<MIndex>,
        data_type: Option<DataType>,
    ) {
        self.items.push(ListingItem {
            kind,
            index: range.start,
            end: range.end,
            address: span.address(range.start),
            data_type,
            symbol: None,
        });
    }

    fn push_symbol(
        &mut self,
        kind: ListingItemKind,
        span: &Span,
        range: Range<MIndex>,
        data_type: Option<DataType>,
        symbol: Symbol,
        word: MByte,
    ) {
        let pos = self.items.len();
        self.push(kind, span, range, data_type);
        self.items[pos].symbol = Some(symbol);
        self.symbols.push(pos);
        if word.is_import() {
            self.imports.push(pos);
        } else if word.is_export() {
            self.exports.push(pos);
        }
    }

    fn push_segment(&mut self, span: &Span) {
        let idx = span.range.start;
        let symbol = Symbol {
            address: span.segment.address.start,
            index: idx,
            kind: SymbolKind::Segment,
            theme: ThemeKind::Segment,
            value: span.segment.name.clone(),
        };
        let pos = self.items.len();
        self.push(ListingItemKind::Segment, span, idx..span.range.end, None);
        self.items[pos].symbol = Some(symbol);
        self.symbols.push(pos);
    }

    fn step(&mut self, span: &Span, idx: MIndex) -> MIndex {
        let space = self.space;
        let memory = space.memory();
        let Some(word) = memory.get(idx) else {
            return span.range.end;
        };
        if word.is_unknown() {
            let mut end = idx + 1;
            while end < span.range.end
                && memory.is_unknown(end)
                && (end - span.range.start) % self.hex_row != 0
            {
                end += 1;
            }
            self.push(ListingItemKind::HexDump, span, idx..end, None);
            return end;
        }

        let end = idx + run_len(memory, idx, span.range.end);
        let address = span.address(idx);
        if word.is_code() {
            if word.is_function() {
                let symbol = Symbol {
                    address,
                    index: idx,
                    kind: SymbolKind::Function,
                    theme: ThemeKind::Function,
                    value: self.database.display_name(address, word),
                };
                let kind = ListingItemKind::Function;
                self.push_symbol(kind, span, idx..end, None, symbol, word);
            } else if word.has_refs_to() {
                self.push(ListingItemKind::Jump, span, idx..end, None);
            }
            self.push(ListingItemKind::Instruction, span, idx..end, None);
            return end;
        }

        let data_type = word
            .has_type()
            .then(|| self.database.get_type(address))
            .flatten();
        match data_type {
            Some(data_type) => {
                let kind = if data_type.is_array() {
                    ListingItemKind::Array
                } else {
                    ListingItemKind::Type
                };
                let symbol = self.type_symbol(address, idx, data_type, word);
                self.push_symbol(
                    kind,
                    span,
                    idx..end,
                    Some(data_type),
                    symbol,
                    word,
                );
            }
            None if word.has(BF_FILL) => {
                self.push(ListingItemKind::Fill, span, idx..end, None)
            }
            None => self.push(ListingItemKind::HexDump, span, idx..end, None),
        }
        end
    }

    fn type_symbol(
        &self,
        address: u64,
        idx: MIndex,
        data_type: DataType,
        word: MByte,
    ) -> Symbol {
        let text = data_type.is_text().then(|| {
            let space = self.space;
            match (data_type.primitive, data_type.n) {
                (Primitive::Str, _) => {
                    space.get_strz(address).map(|s| s.to_string())
                }
                (Primitive::WStr, _) => space.get_wstrz(address),
                (Primitive::WChar, n) => space.get_wstr(address, n),
                (_, n) => space.get_str(address, n).map(|s| s.to_string()),
            }
        });
        match text.flatten() {
            Some(text) => Symbol {
                address,
                index: idx,
                kind: SymbolKind::String,
                theme: ThemeKind::String,
                value: Str::from(format!("\"{text}\"")),
            },
            None => Symbol {
                address,
                index: idx,
                kind: if data_type.is_array() {
                    SymbolKind::Array
                } else {
                    SymbolKind::Type
                },
                theme: ThemeKind::Default,
                value: self.database.display_name(address, word),
            },
        }
    }
}

impl Listing {
    pub fn new(hex_row: usize) -> Self {
        Self {
            hex_row: hex_row.max(1),
            items: Vect::new(),
            symbols: Vect::new(),
            imports: Vect::new(),
            exports: Vect::new(),
            built: None,
        }
    }

    pub fn hex_row(&self) -> usize {
        self.hex_row
    }

    /// The items do not reflect the current memory layout or segments.
    pub fn is_stale(&self, space: &AddressSpace) -> bool {
        self.built != Some(Self::stamp(space))
    }

    fn stamp(space: &AddressSpace) -> (u64, usize) {
        (space.memory().layout(), space.segments().len())
    }

    /// Bring the items up to date with the flag store, given the range of
    /// indices modified since the last update.
    pub fn update(
        &mut self,
        space: &AddressSpace,
        database: &Database,
        dirty: Option<Range<MIndex>>,
    ) {
        if self.is_stale(space) {
            self.build(space, database);
            return;
        }
        if let Some(dirty) = dirty.filter(|dirty| !dirty.is_empty()) {
            self.rebuild(space, database, dirty);
        }
    }

    /// Rebuild every item.
    pub fn build(&mut self, space: &AddressSpace, database: &Database) {
        let mut builder = Builder::new(space, database, self.hex_row);
        for span in &spans(space) {
            builder.walk(span, span.range.start, span.range.end);
        }
        self.items = builder.items.into();
        self.symbols = builder.symbols.into();
        self.imports = builder.imports.into();
        self.exports = builder.exports.into();
        self.built = Some(Self::stamp(space));
        debug!(
            items = self.items.len(),
            symbols = self.symbols.len(),
            "listing built"
        );
    }

    /// Rebuild the items around `dirty`, between the closest positions
    /// both the previous and the current walk stop at.
    fn rebuild(
        &mut self,
        space: &AddressSpace,
        database: &Database,
        dirty: Range<MIndex>,
    ) {
        let spans = spans(space);
        let memory = space.memory();
        let hex_row = self.hex_row;
        let visited = |idx: MIndex| {
            span_of(&spans, idx)
                .is_some_and(|span| is_visited(memory, span, idx, hex_row))
        };

        let mut candidate = dirty.start;
        let start = loop {
            let pos =
                self.items.partition_point(|item| item.index <= candidate);
            let Some(item) = pos.checked_sub(1).map(|pos| &self.items[pos])
            else {
                match self.items.first() {
                    Some(item) => break item.index,
                    None => return,
                }
            };
            if visited(item.index) {
                break item.index;
            }
            match item.index.checked_sub(1) {
                Some(prev) => candidate = prev,
                None => break item.index,
            }
        };
        let first_after =
            self.items.partition_point(|item| item.index < dirty.end);
        let end = self.items[first_after..]
            .iter()
            .map(|item| item.index)
            .find(|idx| visited(*idx));

        let lo = self.items.partition_point(|item| item.index < start);
        let hi = match end {
            Some(end) => self.items.partition_point(|item| item.index < end),
            None => self.items.len(),
        };
        let until = end.unwrap_or(MIndex::MAX);

        let mut builder = Builder::new(space, database, self.hex_row);
        for span in spans
            .iter()
            .filter(|span| span.range.end > start && span.range.start < until)
        {
            builder.walk(span, start.max(span.range.start), until);
        }

        let old = lo..hi;
        let new_len = builder.items.len();
        self.items.remove_n(lo, hi - lo);
        self.items.insert_n(lo, builder.items);
        splice_positions(&mut self.symbols, &old, new_len, builder.symbols);
        splice_positions(&mut self.imports, &old, new_len, builder.imports);
        splice_positions(&mut self.exports, &old, new_len, builder.exports);
        debug!(
            start,
            end = until,
            removed = old.len(),
            added = new_len,
            "listing updated"
        );
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ListingItem] {
        &self.items
    }

    pub fn get(&self, idx: usize) -> Option<&ListingItem> {
        self.items.get(idx)
    }

    /// Position of the first item at `address`.
    pub fn get_index(&self, address: u64) -> Option<usize> {
        let pos = self.items.partition_point(|item| item.address < address);
        self.items
            .get(pos)
            .is_some_and(|item| item.address == address)
            .then_some(pos)
    }

    fn symbol_at(&self, list: &[usize], idx: usize) -> Option<&Symbol> {
        self.items.get(*list.get(idx)?)?.symbol.as_ref()
    }

    pub fn get_symbol(&self, idx: usize) -> Option<&Symbol> {
        self.symbol_at(&self.symbols, idx)
    }

    pub fn get_import(&self, idx: usize) -> Option<&Symbol> {
        self.symbol_at(&self.imports, idx)
    }

    pub fn get_export(&self, idx: usize) -> Option<&Symbol> {
        self.symbol_at(&self.exports, idx)
    }

    pub fn symbols_len(&self) -> usize {
        self.symbols.len()
    }

    pub fn imports_len(&self) -> usize {
        self.imports.len()
    }

    pub fn exports_len(&self) -> usize {
        self.exports.len()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        (0..self.symbols_len()).filter_map(|idx| self.get_symbol(idx))
    }
}
