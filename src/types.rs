//! Generic containers shared by the address space, the analysis database and
//! the listing.

pub mod map;
pub mod string;
pub mod vect;

pub use map::{FnvBuildHasher, Map};
pub use string::Str;
pub use vect::Vect;

/// FNV-1a over a byte slice, the default hash for [Map] and [Str].
pub fn fnv1a(data: &[u8]) -> u64 {
    let mut hasher = map::FnvHasher::default();
    std::hash::Hasher::write(&mut hasher, data);
    std::hash::Hasher::finish(&hasher)
}
