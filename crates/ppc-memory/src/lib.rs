//! Physical memory for the e500 simulator.
//!
//! Memory is a flat real-address space (36 bits on e500v2) tiled by named
//! [`MemoryTarget`]s. Storage is sparse: 4KiB pages are only allocated once they
//! are written, so a full 64GiB DDR window costs nothing until the guest touches it.
//!
//! All accessors take `&self` so a single [`PhysicalMemory`] can be shared between
//! the cores of a machine behind an `Arc`.

mod error;
mod phys;
mod target;

pub use error::{MemoryError, Result};
pub use phys::SparseMemory;
pub use target::{MemoryTarget, PhysicalMemory, TargetConfig, TargetKind};

use serde::{Deserialize, Serialize};

/// Byte order of a single access.
///
/// PowerPC is big-endian by default; a page with the `E` WIMGE attribute set is
/// accessed little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl Endian {
    /// Endianness selected by a page's WIMGE attributes (`E` is bit 0).
    #[inline]
    pub const fn from_wimge(wimge: u8) -> Self {
        if wimge & 1 != 0 {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    #[inline]
    pub const fn is_big(self) -> bool {
        matches!(self, Endian::Big)
    }
}

/// Real-address memory as seen by a core.
///
/// Only [`Memory::read_into`] and [`Memory::write_from`] are required; the typed
/// accessors are built on top of them.
pub trait Memory: Send + Sync {
    fn read_into(&self, ra: u64, dst: &mut [u8]) -> Result<()>;

    fn write_from(&self, ra: u64, src: &[u8]) -> Result<()>;

    fn read_buffer(&self, ra: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(ra, &mut buf)?;
        Ok(buf)
    }

    fn read_u8(&self, ra: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(ra, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, ra: u64, endian: Endian) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(ra, &mut buf)?;
        Ok(match endian {
            Endian::Big => u16::from_be_bytes(buf),
            Endian::Little => u16::from_le_bytes(buf),
        })
    }

    fn read_u32(&self, ra: u64, endian: Endian) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(ra, &mut buf)?;
        Ok(match endian {
            Endian::Big => u32::from_be_bytes(buf),
            Endian::Little => u32::from_le_bytes(buf),
        })
    }

    fn read_u64(&self, ra: u64, endian: Endian) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_into(ra, &mut buf)?;
        Ok(match endian {
            Endian::Big => u64::from_be_bytes(buf),
            Endian::Little => u64::from_le_bytes(buf),
        })
    }

    fn write_u8(&self, ra: u64, value: u8) -> Result<()> {
        self.write_from(ra, &[value])
    }

    fn write_u16(&self, ra: u64, value: u16, endian: Endian) -> Result<()> {
        match endian {
            Endian::Big => self.write_from(ra, &value.to_be_bytes()),
            Endian::Little => self.write_from(ra, &value.to_le_bytes()),
        }
    }

    fn write_u32(&self, ra: u64, value: u32, endian: Endian) -> Result<()> {
        match endian {
            Endian::Big => self.write_from(ra, &value.to_be_bytes()),
            Endian::Little => self.write_from(ra, &value.to_le_bytes()),
        }
    }

    fn write_u64(&self, ra: u64, value: u64, endian: Endian) -> Result<()> {
        match endian {
            Endian::Big => self.write_from(ra, &value.to_be_bytes()),
            Endian::Little => self.write_from(ra, &value.to_le_bytes()),
        }
    }
}

impl<T: Memory + ?Sized> Memory for std::sync::Arc<T> {
    #[inline]
    fn read_into(&self, ra: u64, dst: &mut [u8]) -> Result<()> {
        <T as Memory>::read_into(&**self, ra, dst)
    }

    #[inline]
    fn write_from(&self, ra: u64, src: &[u8]) -> Result<()> {
        <T as Memory>::write_from(&**self, ra, src)
    }
}
