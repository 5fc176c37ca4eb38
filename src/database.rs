use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::data_type::DataType;
use crate::mbyte::MByte;
use crate::types::{Map, Str, Vect};

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
pub enum RefType {
    Read = 1,
    Write,
    /// Address taken
    Address,
    Jump,
    Call,
}

impl RefType {
    pub fn from_raw(value: u8) -> Option<Self> {
        Self::try_from_primitive(value).ok()
    }

    /// Transfers execution to the target.
    pub fn is_code(self) -> bool {
        matches!(self, Self::Jump | Self::Call)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Address => "address",
            Self::Jump => "jump",
            Self::Call => "call",
        }
    }
}

/// One side of a reference, the other side is the key it is stored under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Ref {
    pub address: u64,
    pub kind: RefType,
}

/// Information attached to addresses: names, comments, types and
/// references. The flag store tells which addresses have an entry here.
#[derive(Clone, Debug, Default)]
pub struct Database {
    names: Map<u64, Str>,
    addresses: Map<Str, u64>,
    comments: Map<u64, Str>,
    types: Map<u64, DataType>,
    refs_from: Map<u64, Vect<Ref>>,
    refs_to: Map<u64, Vect<Ref>>,
}

fn push_unique(refs: &mut Map<u64, Vect<Ref>>, key: u64, item: Ref) -> bool {
    match refs.get_mut(&key) {
        Some(list) if list.contains(&item) => false,
        Some(list) => {
            list.push(item);
            true
        }
        None => {
            refs.insert(key, [item].into_iter().collect());
            true
        }
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            names: Map::with_capacity(capacity),
            addresses: Map::with_capacity(capacity),
            comments: Map::with_capacity(capacity),
            types: Map::with_capacity(capacity),
            refs_from: Map::with_capacity(capacity),
            refs_to: Map::with_capacity(capacity),
        }
    }

    /// Bind `name` to `address`, an empty name removes the binding.
    /// Returns the previous name.
    pub fn set_name(&mut self, address: u64, name: &str) -> Option<Str> {
        let previous = self.names.remove(&address);
        if let Some(previous) = &previous {
            self.addresses.remove(previous.as_bytes());
        }
        if !name.is_empty() {
            self.names.insert(address, Str::create(name));
            self.addresses.insert(Str::create(name), address);
        }
        previous
    }

    pub fn get_name(&self, address: u64) -> Option<&Str> {
        self.names.get(&address)
    }

    pub fn get_address(&self, name: &str) -> Option<u64> {
        self.addresses.get(name.as_bytes()).copied()
    }

    /// Name shown for `address`: the stored one if `word` has a name,
    /// otherwise one derived from the type, function or location.
    pub fn display_name(&self, address: u64, word: MByte) -> Str {
        let stored = word.has_name().then(|| self.get_name(address));
        if let Some(name) = stored.flatten() {
            return name.clone();
        }
        let prefix = if word.has_type() {
            self.get_type(address)
                .map_or("loc", |data_type| data_type.primitive.name())
        } else if word.is_function() {
            "sub"
        } else {
            "loc"
        };
        Str::from(format!("{prefix}_{address:X}"))
    }

    pub fn names(&self) -> impl Iterator<Item = (u64, &Str)> {
        self.names.iter().map(|(address, name)| (*address, name))
    }

    /// Attach `comment` to `address`, an empty comment removes it.
    pub fn set_comment(&mut self, address: u64, comment: &str) {
        if comment.is_empty() {
            self.comments.remove(&address);
        } else {
            self.comments.insert(address, Str::create(comment));
        }
    }

    pub fn get_comment(&self, address: u64) -> Option<&Str> {
        self.comments.get(&address)
    }

    pub fn set_type(&mut self, address: u64, data_type: DataType) {
        self.types.insert(address, data_type);
    }

    pub fn get_type(&self, address: u64) -> Option<DataType> {
        self.types.get(&address).copied()
    }

    pub fn remove_type(&mut self, address: u64) -> Option<DataType> {
        self.types.remove(&address)
    }

    /// Record a reference in both directions, `false` if it was already
    /// known.
    pub fn add_ref(&mut self, from: u64, to: u64, kind: RefType) -> bool {
        let added = push_unique(
            &mut self.refs_from,
            from,
            Ref { address: to, kind },
        );
        push_unique(&mut self.refs_to, to, Ref { address: from, kind });
        added
    }

    pub fn refs_from(&self, address: u64) -> &[Ref] {
        self.refs_from
            .get(&address)
            .map(|refs| refs.as_slice())
            .unwrap_or(&[])
    }

    pub fn refs_to(&self, address: u64) -> &[Ref] {
        self.refs_to
            .get(&address)
            .map(|refs| refs.as_slice())
            .unwrap_or(&[])
    }

    pub fn refs_from_type(
        &self,
        address: u64,
        kind: RefType,
    ) -> impl Iterator<Item = &Ref> {
        self.refs_from(address).iter().filter(move |r| r.kind == kind)
    }

    pub fn refs_to_type(
        &self,
        address: u64,
        kind: RefType,
    ) -> impl Iterator<Item = &Ref> {
        self.refs_to(address).iter().filter(move |r| r.kind == kind)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_type::Primitive;

    #[test]
    fn names_both_ways() {
        let mut db = Database::new();
        assert_eq!(db.set_name(0x1000, "start"), None);
        assert_eq!(db.get_address("start"), Some(0x1000));
        assert_eq!(db.set_name(0x1000, "main").unwrap(), "start");
        assert_eq!(db.get_address("start"), None);
        assert_eq!(db.get_name(0x1000).unwrap(), "main");
        db.set_name(0x1000, "");
        assert_eq!(db.get_name(0x1000), None);
        assert_eq!(db.get_address("main"), None);
    }

    #[test]
    fn display_names() {
        use crate::mbyte::flag::byte_type::*;
        use crate::mbyte::flag::common::*;
        use crate::mbyte::flag::data::BF_TYPE;

        let mut db = Database::new();
        db.set_name(0x401000, "main");
        db.set_type(0x402000, DataType::new(Primitive::U32));
        let word = |raw| MByte::from_raw(raw).unwrap();
        assert_eq!(db.display_name(0x401000, word(BF_CODE | BF_NAME)), "main");
        // stored names are ignored without the flag
        assert_eq!(
            db.display_name(0x401000, word(BF_CODE | BF_FUNCTION)),
            "sub_401000"
        );
        assert_eq!(
            db.display_name(0x402000, word(BF_DATA | BF_TYPE)),
            "u32_402000"
        );
        assert_eq!(db.display_name(0x403000, word(BF_UNKNOWN)), "loc_403000");
    }

    #[test]
    fn refs_are_unique() {
        let mut db = Database::new();
        assert!(db.add_ref(0x1000, 0x2000, RefType::Call));
        assert!(!db.add_ref(0x1000, 0x2000, RefType::Call));
        assert!(db.add_ref(0x1000, 0x2000, RefType::Read));
        assert!(db.add_ref(0x1010, 0x2000, RefType::Jump));
        assert_eq!(db.refs_from(0x1000).len(), 2);
        assert_eq!(db.refs_to(0x2000).len(), 3);
        assert_eq!(
            db.refs_to_type(0x2000, RefType::Jump).collect::<Vec<_>>(),
            [&Ref {
                address: 0x1010,
                kind: RefType::Jump
            }]
        );
        assert!(db.refs_from(0x3000).is_empty());
    }

    #[test]
    fn comments_and_types() {
        let mut db = Database::with_capacity(16);
        db.set_comment(0x10, "entry");
        assert_eq!(db.get_comment(0x10).unwrap(), "entry");
        db.set_comment(0x10, "");
        assert!(db.get_comment(0x10).is_none());
        db.set_type(0x20, DataType::new(Primitive::U32));
        assert_eq!(db.get_type(0x20), Some(DataType::new(Primitive::U32)));
        assert_eq!(db.remove_type(0x20), Some(DataType::new(Primitive::U32)));
        assert_eq!(db.get_type(0x20), None);
    }
}
