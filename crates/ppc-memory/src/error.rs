use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors returned by the physical memory model.
///
/// None of these are guest-visible faults; they indicate a misconfigured machine
/// (an address nothing backs, or a target table that contradicts itself).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("physical access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: u64, len: usize, size: u64 },

    #[error("no memory target backs physical address 0x{addr:x}")]
    NoTarget { addr: u64 },

    #[error(
        "memory target `{name}` overlaps `{existing}` at priority {priority} (existing priority {existing_priority})"
    )]
    OverlappingTarget {
        name: String,
        existing: String,
        priority: u32,
        existing_priority: u32,
    },

    #[error("invalid memory target `{name}`: {reason}")]
    InvalidTarget { name: String, reason: &'static str },

    #[error("invalid page size {page_size}")]
    InvalidPageSize { page_size: usize },
}
