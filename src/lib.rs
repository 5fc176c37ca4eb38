#![forbid(unsafe_code)]
pub mod address_space;
pub mod config;
pub mod context;
pub mod data_type;
pub mod database;
pub mod error;
pub mod listing;
pub mod loader;
pub mod logging;
pub mod mbyte;
pub mod memory;
pub mod region;
pub mod segment;
pub mod signature;
pub mod sreg;
pub mod strings;
pub mod types;

pub use address_space::AddressSpace;
pub use context::{Context, Workspace};
pub use listing::Listing;
pub use mbyte::MByte;
pub use memory::{MIndex, Memory};
