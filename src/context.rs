use bitflags::bitflags;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::address_space::AddressSpace;
use crate::config::Config;
use crate::data_type::{DataType, Primitive};
use crate::database::{Database, Ref, RefType};
use crate::error::MemoryError;
use crate::listing::Listing;
use crate::mbyte::flag::byte_type::*;
use crate::mbyte::flag::code::BF_JUMPDST;
use crate::mbyte::flag::common::*;
use crate::mbyte::flag::data::BF_TYPE;
use crate::mbyte::flag::special::BF_WEAK;
use crate::mbyte::{CodeFlags, MByte};
use crate::memory::{MIndex, Memory};
use crate::segment::{Segment, SegmentBitness, SegmentKind, SegmentPermission};
use crate::signature::SignatureRegistry;
use crate::sreg::SRegMap;
use crate::strings::{self, StringResult};
use crate::types::{Map, Str, Vect};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NameFlags: u8 {
        /// Add a `_N` suffix if the name is taken
        const FORCE = 1 << 0;
        const IMPORT = 1 << 1;
        /// Do not record a problem on failure
        const NOWARN = 1 << 2;
    }
}

/// Something the analysis could not make sense of.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub address: u64,
    pub message: String,
}

/// Everything known about one loaded binary.
#[derive(Clone, Debug)]
pub struct Context {
    config: Config,
    space: AddressSpace,
    database: Database,
    listing: Listing,
    sregs: SRegMap,
    signatures: SignatureRegistry,
    problems: Vect<Problem>,
    pending: Vect<u64>,
    /// Membership of `pending`
    queued: Map<u64, ()>,
    entry_points: Vect<u64>,
}

impl Context {
    pub fn new(file: Vec<u8>, config: Config) -> Self {
        Self {
            space: AddressSpace::new(file),
            database: Database::with_capacity(config.map_capacity),
            listing: Listing::new(config.hex_row),
            sregs: SRegMap::new(),
            signatures: SignatureRegistry::new(),
            problems: Vect::new(),
            pending: Vect::new(),
            queued: Map::new(),
            entry_points: Vect::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn memory(&self) -> &Memory {
        self.space.memory()
    }

    /// Direct access to the flag store, changes are picked up by the next
    /// listing update.
    pub fn memory_mut(&mut self) -> &mut Memory {
        self.space.memory_mut()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn sregs(&self) -> &SRegMap {
        &self.sregs
    }

    pub fn sregs_mut(&mut self) -> &mut SRegMap {
        &mut self.sregs
    }

    pub fn signatures(&self) -> &SignatureRegistry {
        &self.signatures
    }

    pub fn signatures_mut(&mut self) -> &mut SignatureRegistry {
        &mut self.signatures
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Addresses waiting to be decoded.
    pub fn pending(&self) -> &[u64] {
        &self.pending
    }

    pub fn take_pending(&mut self) -> Vect<u64> {
        self.queued.clear();
        std::mem::take(&mut self.pending)
    }

    pub fn entry_points(&self) -> &[u64] {
        &self.entry_points
    }

    pub fn map_file(
        &mut self,
        offset: u64,
        start: u64,
        end: u64,
    ) -> Result<u64, MemoryError> {
        self.space.map_file(offset, start, end)
    }

    pub fn add_segment(
        &mut self,
        name: &str,
        start: u64,
        end: u64,
        perm: SegmentPermission,
        bitness: SegmentBitness,
    ) -> Result<(), MemoryError> {
        self.space.add_segment(name, start, end, perm, bitness)
    }

    pub fn add_problem(&mut self, address: u64, message: impl Into<String>) {
        let message = message.into();
        warn!(address = format_args!("{address:#x}"), "{message}");
        self.problems.push(Problem { address, message });
    }

    /// Flag store index of an address inside a segment.
    fn locate(&self, address: u64) -> Option<(MIndex, &Segment)> {
        let segment = self.space.find_segment(address)?;
        Some((self.space.address_to_index(address)?, segment))
    }

    fn word(&self, address: u64) -> Option<MByte> {
        let (idx, _) = self.locate(address)?;
        self.space.memory().get(idx)
    }

    fn enqueue(&mut self, address: u64) {
        if self.queued.insert(address, ()).is_none() {
            trace!(address, "enqueue");
            self.pending.push(address);
        }
    }

    /// Index of `[address, address + len)` if the whole range lies in one
    /// segment.
    fn item_range(&mut self, address: u64, len: usize) -> Option<MIndex> {
        let Some((idx, segment)) = self.locate(address) else {
            self.add_problem(address, "Address outside of any segment");
            return None;
        };
        let fits = address
            .checked_add(len as u64)
            .is_some_and(|end| end <= segment.address.end);
        if len == 0 || !fits {
            self.add_problem(
                address,
                format!("Item of {len} bytes does not fit its segment"),
            );
            return None;
        }
        Some(idx)
    }

    /// Mark an instruction of `len` bytes, replacing whatever items were
    /// there.
    pub fn set_code(
        &mut self,
        address: u64,
        len: usize,
        flags: CodeFlags,
    ) -> bool {
        trace!(address, len, ?flags, "set_code");
        let Some(idx) = self.item_range(address, len) else {
            return false;
        };
        let jumped = self
            .database
            .refs_to_type(address, RefType::Jump)
            .next()
            .is_some();
        let mut mask = flags.bits();
        if jumped {
            mask |= BF_JUMPDST;
        }
        let memory = self.space.memory_mut();
        memory.unset_n(idx, len);
        if !memory.set_n(idx, len, BF_CODE) {
            return false;
        }
        if mask != 0 {
            memory.set(idx, mask);
        }
        if self.queued.remove(&address).is_some() {
            self.pending.retain(|pending| *pending != address);
        }
        self.space.refine_segment_kind(address, SegmentKind::HASCODE);
        true
    }

    /// Apply a type to the data at `address`, replacing overlapped items.
    pub fn set_type(
        &mut self,
        address: u64,
        data_type: DataType,
        weak: bool,
    ) -> bool {
        trace!(address, %data_type, weak, "set_type");
        if self.locate(address).is_none() {
            warn!(address, "set_type: invalid address");
            return false;
        }
        let len = match data_type.primitive {
            Primitive::Str => {
                self.space.get_strz(address).map(|s| s.len() + 1)
            }
            Primitive::WStr => self
                .space
                .get_wstrz(address)
                .map(|s| (s.encode_utf16().count() + 1) * 2),
            _ => match data_type.fixed_size() {
                Some(len) => Some(len),
                None => {
                    self.add_problem(
                        address,
                        format!("Type {data_type} does not fit its segment"),
                    );
                    return false;
                }
            },
        };
        let Some(len) = len else {
            self.add_problem(address, "String not found");
            return false;
        };
        let Some(idx) = self.item_range(address, len) else {
            return false;
        };

        let memory = self.space.memory_mut();
        memory.unset_n(idx, len);
        let weak = if weak { BF_WEAK } else { 0 };
        if !memory.set_n(idx, len, BF_DATA | weak) {
            return false;
        }
        memory.set(idx, BF_TYPE);
        // the words may be unchanged while the type is not
        memory.touch(idx, len);
        self.database.set_type(address, data_type);
        true
    }

    pub fn get_type(&self, address: u64) -> Option<DataType> {
        self.word(address)?
            .has_type()
            .then(|| self.database.get_type(address))
            .flatten()
    }

    pub fn set_function(&mut self, address: u64) -> bool {
        trace!(address, "set_function");
        let located = self
            .locate(address)
            .map(|(idx, segment)| (idx, segment.is_executable()));
        match located {
            Some((idx, true)) => {
                let memory = self.space.memory_mut();
                memory.set(idx, BF_FUNCTION);
                if !memory.is_code(idx) {
                    self.enqueue(address);
                }
                true
            }
            _ => {
                self.add_problem(address, "Invalid function location");
                false
            }
        }
    }

    /// Exported entry point named `name`.
    pub fn set_entry(&mut self, address: u64, name: &str) -> bool {
        trace!(address, name, "set_entry");
        let Some((idx, segment)) = self.locate(address) else {
            self.add_problem(address, "Invalid entry location");
            return false;
        };
        let executable = segment.is_executable();
        self.space.memory_mut().set(idx, BF_EXPORT);
        if executable {
            self.set_function(address);
        }
        self.set_name(address, name, NameFlags::empty());
        self.entry_points.push(address);
        true
    }

    pub fn add_ref(&mut self, from: u64, to: u64, kind: RefType) {
        trace!(from, to, ?kind, "add_ref");
        let Some((from_idx, _)) = self.locate(from) else {
            let message = format!("Invalid FROM {} reference", kind.name());
            self.add_problem(from, message);
            return;
        };
        let Some((to_idx, to_segment)) = self.locate(to) else {
            let message = format!("Invalid TO {} reference", kind.name());
            self.add_problem(to, message);
            return;
        };
        let executable = to_segment.is_executable();

        self.database.add_ref(from, to, kind);
        let memory = self.space.memory_mut();
        memory.set(from_idx, BF_REFSFROM);
        memory.set(to_idx, BF_REFSTO);
        match kind {
            RefType::Read | RefType::Write | RefType::Address => return,
            RefType::Jump => {
                // only meaningful once the target is decoded
                if memory.is_code(to_idx) {
                    memory.set(to_idx, BF_JUMPDST);
                }
            }
            RefType::Call => {
                memory.set(to_idx, BF_FUNCTION);
            }
        }
        let decoded = memory.is_code(to_idx);
        if !executable {
            let message = format!(
                "{} reference from {from:#x} to non executable segment",
                kind.name()
            );
            self.add_problem(to, message);
        } else if !decoded {
            self.enqueue(to);
        }
    }

    pub fn refs_from(&self, address: u64) -> &[Ref] {
        match self.word(address) {
            Some(word) if word.has_refs_from() => {
                self.database.refs_from(address)
            }
            _ => &[],
        }
    }

    pub fn refs_to(&self, address: u64) -> &[Ref] {
        match self.word(address) {
            Some(word) if word.has_refs_to() => self.database.refs_to(address),
            _ => &[],
        }
    }

    /// Name `address`, an empty name removes the current one.
    pub fn set_name(
        &mut self,
        address: u64,
        name: &str,
        flags: NameFlags,
    ) -> bool {
        trace!(address, name, ?flags, "set_name");
        let nowarn = flags.contains(NameFlags::NOWARN);
        let Some((idx, _)) = self.locate(address) else {
            if !nowarn {
                let message = "Cannot set name, address out of bounds";
                self.add_problem(address, message);
            }
            return false;
        };

        let mut name = name.to_owned();
        if !name.is_empty() {
            if self.space.memory().has_flag(idx, BF_NAME) {
                if !nowarn {
                    let message = format!(
                        "Name already set @ {address:x} (trying to set '{name}')"
                    );
                    self.add_problem(address, message);
                }
                return false;
            }
            if self.database.get_address(&name).is_some() {
                if !flags.contains(NameFlags::FORCE) {
                    if !nowarn {
                        let message = format!("Name '{name}' already exists");
                        self.add_problem(address, message);
                    }
                    return false;
                }
                let base = name.clone();
                let mut n = 0;
                while self.database.get_address(&name).is_some() {
                    n += 1;
                    name = format!("{base}_{n}");
                }
            }
        }

        let memory = self.space.memory_mut();
        memory.set_flag(idx, BF_NAME, !name.is_empty());
        memory.set_flag(idx, BF_IMPORT, flags.contains(NameFlags::IMPORT));
        memory.touch(idx, 1);
        self.database.set_name(address, &name);
        debug!(address, name, "name set");
        true
    }

    /// Stored name, or one derived from what is at `address`.
    pub fn get_name(&self, address: u64) -> Option<Str> {
        let Some(word) = self.word(address) else {
            warn!(address, "get_name: invalid address");
            return None;
        };
        Some(self.database.display_name(address, word))
    }

    pub fn get_address(&self, name: &str) -> Option<u64> {
        self.database.get_address(name)
    }

    pub fn set_comment(&mut self, address: u64, comment: &str) -> bool {
        trace!(address, comment, "set_comment");
        let Some((idx, _)) = self.locate(address) else {
            return false;
        };
        self.database.set_comment(address, comment);
        self.space
            .memory_mut()
            .set_flag(idx, BF_COMMENT, !comment.is_empty());
        true
    }

    pub fn get_comment(&self, address: u64) -> Option<&Str> {
        self.word(address)?
            .has_comment()
            .then(|| self.database.get_comment(address))
            .flatten()
    }

    pub fn classify_string(&self, address: u64) -> Option<StringResult> {
        strings::classify(&self.space, address, self.config.min_string)
    }

    /// Listing updated with every change made since the last call.
    pub fn listing(&mut self) -> &Listing {
        let dirty = self.space.memory_mut().take_dirty();
        self.listing.update(&self.space, &self.database, dirty);
        &self.listing
    }
}

/// Handle to a context owned by a [Workspace].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ContextId(usize);

/// Owns the open contexts, one of them being the current one.
#[derive(Debug, Default)]
pub struct Workspace {
    contexts: Vect<Option<Context>>,
    current: Option<ContextId>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `context` and make it the current one.
    pub fn add(&mut self, context: Context) -> ContextId {
        let id = ContextId(self.contexts.len());
        self.contexts.push(Some(context));
        self.current = Some(id);
        id
    }

    pub fn get(&self, id: ContextId) -> Option<&Context> {
        self.contexts.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut Context> {
        self.contexts.get_mut(id.0)?.as_mut()
    }

    pub fn select(&mut self, id: ContextId) -> bool {
        let found = self.get(id).is_some();
        if found {
            self.current = Some(id);
        }
        found
    }

    pub fn current_id(&self) -> Option<ContextId> {
        self.current
    }

    pub fn current(&self) -> Option<&Context> {
        self.get(self.current?)
    }

    pub fn current_mut(&mut self) -> Option<&mut Context> {
        self.get_mut(self.current?)
    }

    /// Drop a context, leaving no current one if it was selected.
    pub fn remove(&mut self, id: ContextId) -> Option<Context> {
        let context = self.contexts.get_mut(id.0)?.take();
        if self.current == Some(id) {
            self.current = None;
        }
        context
    }

    pub fn len(&self) -> usize {
        self.contexts.iter().filter(|context| context.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
