use thiserror::Error;

/// Malformed requests against the address space.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("empty address range {start:#x}..{end:#x}")]
    EmptyRange { start: u64, end: u64 },
    #[error("range {start:#x}..{end:#x} partially overlaps {what}")]
    Overlap {
        start: u64,
        end: u64,
        what: &'static str,
    },
    #[error("address range starting at {start:#x} with size {size:#x} overflows")]
    AddressOverflow { start: u64, size: u64 },
    #[error("file offset {offset:#x} is outside the file (size {file_size:#x})")]
    OffsetOutOfFile { offset: u64, file_size: u64 },
}

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("unable to parse signature file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("signature `{0}` already registered")]
    Duplicated(String),
    #[error("unknown signature `{0}`")]
    Unknown(String),
    #[error(transparent)]
    Range(#[from] MemoryError),
}
