use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Memory, MemoryError, Result, SparseMemory};

const TARGET_ALIGN: u64 = 0x1000;

/// Which kind of device window a target models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Ddr,
    /// Configuration, control and status register block.
    Ccsr,
    /// Integrated flash controller window.
    Ifc,
}

/// Description of one memory target, as found in a machine config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub kind: TargetKind,
    pub base: u64,
    pub size: u64,
    /// Higher priority targets shadow lower priority ones where they overlap.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, kind: TargetKind, base: u64, size: u64, priority: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            base,
            size,
            priority,
        }
    }
}

/// A registered, backed target.
#[derive(Debug)]
pub struct MemoryTarget {
    name: String,
    kind: TargetKind,
    base: u64,
    /// Exclusive.
    end: u64,
    priority: u32,
    storage: RwLock<SparseMemory>,
}

impl MemoryTarget {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.end - self.base
    }

    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    #[inline]
    fn contains(&self, ra: u64) -> bool {
        ra >= self.base && ra < self.end
    }

    #[inline]
    fn overlaps(&self, base: u64, end: u64) -> bool {
        base < self.end && self.base < end
    }

    pub fn allocated_pages(&self) -> usize {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .allocated_pages()
    }

    fn config(&self) -> TargetConfig {
        TargetConfig::new(self.name.clone(), self.kind, self.base, self.size(), self.priority)
    }
}

/// The machine's real address space: a priority-ordered set of targets.
#[derive(Debug)]
pub struct PhysicalMemory {
    addr_bits: u32,
    /// Sorted by descending priority.
    targets: RwLock<Vec<Arc<MemoryTarget>>>,
}

impl PhysicalMemory {
    /// Address space with a single `ddr0` target spanning all of it at priority 0.
    pub fn new(addr_bits: u32) -> Result<Self> {
        let mem = Self::empty(addr_bits);
        let size = mem.limit();
        mem.register_target(TargetConfig::new("ddr0", TargetKind::Ddr, 0, size, 0))?;
        Ok(mem)
    }

    /// Address space with nothing mapped.
    pub fn empty(addr_bits: u32) -> Self {
        Self {
            addr_bits: addr_bits.clamp(1, 64),
            targets: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn addr_bits(&self) -> u32 {
        self.addr_bits
    }

    /// One past the highest real address.
    #[inline]
    fn limit(&self) -> u64 {
        if self.addr_bits >= 64 {
            u64::MAX
        } else {
            1u64 << self.addr_bits
        }
    }

    /// Registers a new target.
    ///
    /// The size is rounded up to 4KiB. A target overlapping an existing one must have
    /// a strictly higher priority.
    pub fn register_target(&self, config: TargetConfig) -> Result<()> {
        let invalid = |reason| MemoryError::InvalidTarget {
            name: config.name.clone(),
            reason,
        };
        if config.size == 0 {
            return Err(invalid("size is zero"));
        }
        if config.base % TARGET_ALIGN != 0 {
            return Err(invalid("base is not 4KiB aligned"));
        }
        let size = config
            .size
            .checked_add(TARGET_ALIGN - 1)
            .map(|s| s & !(TARGET_ALIGN - 1))
            .ok_or_else(|| invalid("size overflows"))?;
        let end = config
            .base
            .checked_add(size)
            .ok_or_else(|| invalid("end overflows"))?;
        if end > self.limit() {
            return Err(invalid("target extends past the physical address width"));
        }

        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = targets
            .iter()
            .find(|t| t.overlaps(config.base, end) && config.priority <= t.priority)
        {
            return Err(MemoryError::OverlappingTarget {
                name: config.name,
                existing: existing.name.clone(),
                priority: config.priority,
                existing_priority: existing.priority,
            });
        }

        debug!(
            name = %config.name,
            base = format_args!("{:#x}", config.base),
            size = format_args!("{size:#x}"),
            priority = config.priority,
            "registered memory target"
        );
        let target = Arc::new(MemoryTarget {
            storage: RwLock::new(SparseMemory::new(size)?),
            name: config.name,
            kind: config.kind,
            base: config.base,
            end,
            priority: config.priority,
        });
        let pos = targets
            .iter()
            .position(|t| t.priority < target.priority)
            .unwrap_or(targets.len());
        targets.insert(pos, target);
        Ok(())
    }

    /// The highest-priority target backing `ra`.
    pub fn target_for(&self, ra: u64) -> Option<Arc<MemoryTarget>> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.contains(ra))
            .cloned()
    }

    pub fn targets(&self) -> Vec<TargetConfig> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.config())
            .collect()
    }

    /// Splits `[ra, ra + len)` into pieces that each lie on a single 4KiB page. Targets
    /// are page aligned, so every piece is backed by exactly one target.
    fn for_each_page(
        &self,
        ra: u64,
        len: usize,
        mut f: impl FnMut(&MemoryTarget, u64, std::ops::Range<usize>) -> Result<()>,
    ) -> Result<()> {
        let mut done = 0usize;
        while done < len {
            let cur = ra
                .checked_add(done as u64)
                .ok_or(MemoryError::NoTarget { addr: ra })?;
            let page_left = (TARGET_ALIGN - (cur & (TARGET_ALIGN - 1))) as usize;
            let take = page_left.min(len - done);
            let target = self
                .target_for(cur)
                .ok_or(MemoryError::NoTarget { addr: cur })?;
            f(&target, cur - target.base, done..done + take)?;
            done += take;
        }
        Ok(())
    }
}

impl Memory for PhysicalMemory {
    fn read_into(&self, ra: u64, dst: &mut [u8]) -> Result<()> {
        let len = dst.len();
        self.for_each_page(ra, len, |target, offset, range| {
            target
                .storage
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .read_into(offset, &mut dst[range])
        })
    }

    fn write_from(&self, ra: u64, src: &[u8]) -> Result<()> {
        self.for_each_page(ra, src.len(), |target, offset, range| {
            target
                .storage
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .write_from(offset, &src[range])
        })
    }
}
