//! e500v2 (Book E) MMU: effective → real translation through software TLBs.
//!
//! The MMU holds two TLB arrays:
//! - TLB0, a set-associative array of fixed 4KiB pages (128 sets × 4 ways by default)
//! - TLB1, a fully associative CAM of variable-size pages (16 entries by default)
//!
//! Translations resolved from the arrays are memoized in a small LRU translation
//! cache. Any TLB mutation drops the whole cache.
//!
//! There is no hardware table walk on Book E: a miss is reported back to the caller
//! as an [`MmuFault`], which the core turns into an ITLB/DTLB error interrupt.

pub mod mas;
mod tlb;
mod xlate_cache;

use std::fmt::Write as _;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

pub use mas::MasRegisters;
pub use tlb::{tsize_to_page_size, TlbEntry, PAGE_SIZE_4K};

use mas::{place, MAS0_ESEL, MAS0_NV, MAS0_TLBSEL, MAS1_V};
use tlb::TlbArray;
use xlate_cache::{CachedTranslation, TranslationCache};


/// Type of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

impl AccessType {
    /// Permission triple requested by this access (`r = 4, w = 2, x = 1`).
    #[inline]
    pub const fn rwx(self) -> u8 {
        match self {
            AccessType::Read => 4,
            AccessType::Write => 2,
            AccessType::Execute => 1,
        }
    }

    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, AccessType::Write)
    }

    #[inline]
    pub fn is_execute(self) -> bool {
        matches!(self, AccessType::Execute)
    }
}

/// Interrupt class a translation fault maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    Itlb,
    DtlbLoad,
    DtlbStore,
    Isi,
    DsiRead,
    DsiWrite,
}

/// A translation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MmuFault {
    /// No valid entry matched for any of the candidate PIDs.
    #[error("TLB miss ({class:?}) at ea=0x{ea:x}")]
    Miss { class: FaultClass, ea: u64 },
    /// An entry matched but does not grant the requested permission.
    #[error("protection violation ({class:?}) at ea=0x{ea:x}")]
    ProtectionViolation { class: FaultClass, ea: u64 },
}

impl MmuFault {
    fn miss(access: AccessType, ea: u64) -> Self {
        let class = match access {
            AccessType::Execute => FaultClass::Itlb,
            AccessType::Write => FaultClass::DtlbStore,
            AccessType::Read => FaultClass::DtlbLoad,
        };
        MmuFault::Miss { class, ea }
    }

    fn protection(access: AccessType, ea: u64) -> Self {
        let class = match access {
            AccessType::Execute => FaultClass::Isi,
            AccessType::Write => FaultClass::DsiWrite,
            AccessType::Read => FaultClass::DsiRead,
        };
        MmuFault::ProtectionViolation { class, ea }
    }

    #[inline]
    pub fn class(&self) -> FaultClass {
        match *self {
            MmuFault::Miss { class, .. } | MmuFault::ProtectionViolation { class, .. } => class,
        }
    }

    #[inline]
    pub fn ea(&self) -> u64 {
        match *self {
            MmuFault::Miss { ea, .. } | MmuFault::ProtectionViolation { ea, .. } => ea,
        }
    }
}

/// A successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub ra: u64,
    pub wimge: u8,
    pub page_size: u64,
}

impl Translation {
    /// Real page number of the translated address.
    #[inline]
    pub fn real_page(&self) -> u64 {
        self.ra >> tlb::PAGE_SHIFT
    }

    /// `E` attribute: the page is accessed little-endian.
    #[inline]
    pub fn little_endian(&self) -> bool {
        self.wimge & mas::WIMGE_E != 0
    }
}

/// TLB array geometry, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmuGeometry {
    pub tlb0_sets: usize,
    pub tlb0_ways: usize,
    pub tlb1_entries: usize,
    pub xlate_cache_entries: usize,
}

impl Default for MmuGeometry {
    fn default() -> Self {
        Self {
            tlb0_sets: 128,
            tlb0_ways: 4,
            tlb1_entries: 16,
            xlate_cache_entries: 128,
        }
    }
}

/// Process IDs are 8 bits on this core; PID SPR bits above that never take part in matching.
pub const PID_MASK: u32 = 0xff;

/// MAS0[ESEL] is four bits wide, so no array may have more ways than that addresses.
const MAX_ESEL_WAYS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("{field} must be a non-zero power of two (got {value})")]
    NotPowerOfTwo { field: &'static str, value: usize },
    #[error("{field} must be at most {max} (got {value})")]
    TooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },
    #[error("translation cache must hold at least one entry")]
    EmptyTranslationCache,
}

impl MmuGeometry {
    pub fn validate(&self) -> Result<(), GeometryError> {
        for (field, value) in [
            ("tlb0_sets", self.tlb0_sets),
            ("tlb0_ways", self.tlb0_ways),
            ("tlb1_entries", self.tlb1_entries),
        ] {
            if !value.is_power_of_two() {
                return Err(GeometryError::NotPowerOfTwo { field, value });
            }
        }
        for (field, value) in [("tlb0_ways", self.tlb0_ways), ("tlb1_entries", self.tlb1_entries)] {
            if value > MAX_ESEL_WAYS {
                return Err(GeometryError::TooLarge {
                    field,
                    value,
                    max: MAX_ESEL_WAYS,
                });
            }
        }
        if self.xlate_cache_entries == 0 {
            return Err(GeometryError::EmptyTranslationCache);
        }
        Ok(())
    }
}

/// TLB array selector (MAS0[TLBSEL]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TlbSelect {
    Tlb0,
    Tlb1,
}

impl TlbSelect {
    #[inline]
    pub fn from_bit(bit: usize) -> Self {
        if bit & 1 == 0 {
            TlbSelect::Tlb0
        } else {
            TlbSelect::Tlb1
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            TlbSelect::Tlb0 => 0,
            TlbSelect::Tlb1 => 1,
        }
    }
}

/// Scope of an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateKind {
    /// Every entry whose page covers `ea`, regardless of TID/TS. Protected CAM entries
    /// are kept.
    Entry { ea: u64 },
    /// The whole array.
    Array,
    /// The whole array except entries with IPROT set.
    ArrayExceptProtected,
}

/// Decode of a `tlbivax` effective address: bit 3 selects the array, bit 2 requests
/// invalidate-all. Invalidate-all on TLB1 spares IPROT entries.
pub fn decode_tlbivax(ea: u64) -> (TlbSelect, InvalidateKind) {
    let tlb = TlbSelect::from_bit(((ea >> 3) & 1) as usize);
    let inv_all = (ea >> 2) & 1 != 0;
    let kind = match (inv_all, tlb) {
        (true, TlbSelect::Tlb1) => InvalidateKind::ArrayExceptProtected,
        (true, TlbSelect::Tlb0) => InvalidateKind::Array,
        (false, _) => InvalidateKind::Entry { ea: ea & !0xfff },
    };
    (tlb, kind)
}

/// Location and contents of one valid TLB entry, as returned by [`Mmu::valid_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TlbSlot {
    pub tlb: TlbSelect,
    pub set: usize,
    pub way: usize,
    pub entry: TlbEntry,
}

/// Optional MMU statistics.
///
/// When the `stats` feature is disabled, this type contains no fields and
/// [`Mmu::stats`] will always return `None`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MmuStats {
    /// Translations answered by the translation cache.
    #[cfg(feature = "stats")]
    pub cache_hits: u64,
    /// Translations that had to scan the TLB arrays.
    #[cfg(feature = "stats")]
    pub array_walks: u64,
    /// Misses and protection violations.
    #[cfg(feature = "stats")]
    pub faults: u64,
    /// TLB mutations (each one drops the translation cache).
    #[cfg(feature = "stats")]
    pub cache_flushes: u64,
}

impl MmuStats {
    #[inline]
    pub fn cache_hits(&self) -> u64 {
        #[cfg(feature = "stats")]
        {
            self.cache_hits
        }
        #[cfg(not(feature = "stats"))]
        {
            0
        }
    }

    #[inline]
    pub fn array_walks(&self) -> u64 {
        #[cfg(feature = "stats")]
        {
            self.array_walks
        }
        #[cfg(not(feature = "stats"))]
        {
            0
        }
    }

    #[inline]
    pub fn faults(&self) -> u64 {
        #[cfg(feature = "stats")]
        {
            self.faults
        }
        #[cfg(not(feature = "stats"))]
        {
            0
        }
    }

    #[inline]
    pub fn cache_flushes(&self) -> u64 {
        #[cfg(feature = "stats")]
        {
            self.cache_flushes
        }
        #[cfg(not(feature = "stats"))]
        {
            0
        }
    }
}

/// Book E MMU with two TLB arrays and a translation cache.
#[derive(Debug)]
pub struct Mmu {
    geometry: MmuGeometry,
    tlbs: [TlbArray; 2],
    cache: TranslationCache,
    #[cfg(feature = "stats")]
    stats: MmuStats,
}

impl Default for Mmu {
    fn default() -> Self {
        Self::build(MmuGeometry::default())
    }
}

impl Mmu {
    /// Builds an MMU with the given geometry and the power-on default entry installed.
    pub fn new(geometry: MmuGeometry) -> Result<Self, GeometryError> {
        geometry.validate()?;
        Ok(Self::build(geometry))
    }

    fn build(geometry: MmuGeometry) -> Self {
        let capacity = NonZeroUsize::new(geometry.xlate_cache_entries).unwrap_or(NonZeroUsize::MIN);
        let mut mmu = Self {
            geometry,
            tlbs: [
                TlbArray::new(geometry.tlb0_sets, geometry.tlb0_ways, Some(PAGE_SIZE_4K)),
                TlbArray::new(1, geometry.tlb1_entries, None),
            ],
            cache: TranslationCache::new(capacity),
            #[cfg(feature = "stats")]
            stats: MmuStats::default(),
        };
        mmu.install_default_entry();
        mmu
    }

    #[inline]
    pub fn geometry(&self) -> MmuGeometry {
        self.geometry
    }

    /// Returns current MMU statistics when the `stats` feature is enabled.
    #[inline]
    pub fn stats(&self) -> Option<MmuStats> {
        #[cfg(feature = "stats")]
        {
            Some(self.stats)
        }

        #[cfg(not(feature = "stats"))]
        {
            None
        }
    }

    /// Clears both arrays and reinstalls the power-on default entry.
    pub fn reset(&mut self) {
        for array in &mut self.tlbs {
            array.clear();
        }
        self.install_default_entry();
    }

    /// Installs the boot entry in TLB1 entry 0: the 4KiB page at `0xffff_f000`,
    /// identity mapped, supervisor RWX, cache inhibited and protected from invalidation.
    pub fn install_default_entry(&mut self) {
        let mas = MasRegisters {
            mas1: MAS1_V | mas::MAS1_IPROT | place(1, mas::MAS1_TSIZE),
            mas2: 0xffff_f000 | u32::from(mas::WIMGE_I),
            mas3: 0xffff_f000 | u32::from(mas::PERM_SR | mas::PERM_SW | mas::PERM_SX),
            ..MasRegisters::default()
        };
        *self.tlbs[1].entry_mut(0, 0) = TlbEntry::from_mas(&mas, false, None);
        self.flush_translation_cache();
    }

    /// Translates `ea`, trying each PID in `pids` in order. Only the low 8 bits of
    /// each PID are compared.
    ///
    /// For each PID the translation cache is probed first, then the arrays. An entry
    /// that matches but lacks the requested permission ends the search with a
    /// protection violation even if a later PID would have matched.
    pub fn translate(
        &mut self,
        ea: u64,
        access: AccessType,
        pids: &[u32],
        privileged: bool,
        address_space: bool,
    ) -> Result<Translation, MmuFault> {
        let ea = ea & 0xffff_ffff;
        let user = !privileged;
        let rwx = access.rwx();

        let required = rwx << (3 * u8::from(user));
        for pid in pids.iter().map(|&pid| pid & PID_MASK) {
            if let Some(hit) = self.cache.lookup(user, rwx, address_space, pid, ea) {
                #[cfg(feature = "stats")]
                {
                    self.stats.cache_hits += 1;
                }
                return Ok(Translation {
                    ra: hit.ra_base | (ea & (hit.page_size - 1)),
                    wimge: hit.wimge,
                    page_size: hit.page_size,
                });
            }

            #[cfg(feature = "stats")]
            {
                self.stats.array_walks += 1;
            }
            let Some(entry) = self.find(ea, pid, address_space).copied() else {
                continue;
            };
            if entry.permission & required != required {
                #[cfg(feature = "stats")]
                {
                    self.stats.faults += 1;
                }
                trace!(ea = format_args!("{ea:#x}"), pid, ?access, "tlb protection violation");
                return Err(MmuFault::protection(access, ea));
            }
            self.cache.insert(
                user,
                rwx,
                address_space,
                pid,
                ea,
                CachedTranslation {
                    ra_base: entry.ra,
                    wimge: entry.wimge,
                    page_size: entry.page_size,
                },
            );
            return Ok(Translation {
                ra: entry.translate(ea),
                wimge: entry.wimge,
                page_size: entry.page_size,
            });
        }

        #[cfg(feature = "stats")]
        {
            self.stats.faults += 1;
        }
        Err(MmuFault::miss(access, ea))
    }

    /// First valid entry matching `(ea, pid, as)`, scanning TLB0 then TLB1.
    fn find(&self, ea: u64, pid: u32, address_space: bool) -> Option<&TlbEntry> {
        self.tlbs
            .iter()
            .find_map(|array| array.lookup(ea, pid, address_space).map(|(_, _, e)| e))
    }

    /// `(array, set, way)` addressed by MAS0 (and MAS2[EPN] for the set-associative
    /// array). Out-of-range selectors wrap.
    fn selector(&self, mas: &MasRegisters) -> (TlbSelect, usize, usize) {
        let tlb = TlbSelect::from_bit(mas.tlbsel());
        let array = &self.tlbs[tlb.index()];
        let set = if array.sets() == 1 {
            0
        } else {
            (mas.epn() as usize) & (array.sets() - 1)
        };
        (tlb, set, mas.esel() & (array.ways() - 1))
    }

    /// `tlbwe`: writes the entry described by the MAS registers.
    pub fn write_entry(&mut self, mas: &MasRegisters, mas7_update: bool) {
        let (tlb, set, way) = self.selector(mas);
        let array = &mut self.tlbs[tlb.index()];
        let entry = TlbEntry::from_mas(mas, mas7_update, array.fixed_page_size());
        debug!(
            ?tlb,
            set,
            way,
            valid = entry.valid,
            tid = entry.tid,
            ea = format_args!("{:#x}", entry.ea),
            ra = format_args!("{:#x}", entry.ra),
            page_size = format_args!("{:#x}", entry.page_size),
            "tlbwe"
        );
        *array.entry_mut(set, way) = entry;
        self.flush_translation_cache();
    }

    /// `tlbre`: reads the addressed entry back into MAS1/2/3 (and MAS7). MAS0[NV] reads 0.
    pub fn read_entry(&self, mas: &mut MasRegisters, mas7_update: bool) {
        let (tlb, set, way) = self.selector(mas);
        self.tlbs[tlb.index()].entry(set, way).to_mas(mas, mas7_update);
        mas.mas0 &= !MAS0_NV;
    }

    /// `tlbsx`: searches for a valid entry mapping `ea` with TID = MAS6[SPID0] and
    /// TS = MAS6[SAS]. On a hit MAS0..MAS3 describe the entry and MAS1[V] is set; on
    /// a miss only MAS1[V] is cleared.
    pub fn search(&self, ea: u64, mas: &mut MasRegisters, mas7_update: bool) -> bool {
        let ea = ea & 0xffff_ffff;
        let (pid, address_space) = (mas.spid(), mas.sas());
        for (index, array) in self.tlbs.iter().enumerate() {
            if let Some((_, way, entry)) = array.lookup(ea, pid, address_space) {
                entry.to_mas(mas, mas7_update);
                mas.mas0 = place(index as u32, MAS0_TLBSEL) | place(way as u32, MAS0_ESEL);
                return true;
            }
        }
        mas.mas1 &= !MAS1_V;
        false
    }

    /// Invalidates entries of one array. Returns how many valid entries were dropped.
    pub fn invalidate(&mut self, tlb: TlbSelect, kind: InvalidateKind) -> usize {
        let protects = tlb == TlbSelect::Tlb1;
        let mut dropped = 0;
        for entry in self.tlbs[tlb.index()].iter_mut() {
            if !entry.valid {
                continue;
            }
            let hit = match kind {
                InvalidateKind::Array => true,
                InvalidateKind::ArrayExceptProtected => !entry.iprot,
                InvalidateKind::Entry { ea } => entry.covers(ea & 0xffff_ffff) && !(protects && entry.iprot),
            };
            if hit {
                entry.valid = false;
                dropped += 1;
            }
        }
        debug!(?tlb, ?kind, dropped, "tlb invalidate");
        self.flush_translation_cache();
        dropped
    }

    /// `tlbivax`: invalidation addressed by an effective address (see [`decode_tlbivax`]).
    pub fn tlbivax(&mut self, ea: u64) -> usize {
        let (tlb, kind) = decode_tlbivax(ea);
        self.invalidate(tlb, kind)
    }

    pub fn entry(&self, tlb: TlbSelect, set: usize, way: usize) -> Option<&TlbEntry> {
        let array = &self.tlbs[tlb.index()];
        (set < array.sets() && way < array.ways()).then(|| array.entry(set, way))
    }

    pub fn valid_entries(&self) -> Vec<TlbSlot> {
        let mut out = Vec::new();
        for (index, array) in self.tlbs.iter().enumerate() {
            for (set, way, entry) in array.iter() {
                if entry.valid {
                    out.push(TlbSlot {
                        tlb: TlbSelect::from_bit(index),
                        set,
                        way,
                        entry: *entry,
                    });
                }
            }
        }
        out
    }

    /// Text listing of every valid entry.
    pub fn dump_tlbs(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>4} {:>4} {:>4} {:>8} {:>9} {:>4} {:>3} {:>5} {:>6} {:>11} {:>5}",
            "tlb", "set", "way", "epn", "rpn", "tid", "ts", "wimge", "permis", "page_size", "iprot"
        );
        for slot in self.valid_entries() {
            let e = &slot.entry;
            let _ = writeln!(
                out,
                "{:>4} {:>4} {:>4} {:>8x} {:>9x} {:>4x} {:>3} {:>5x} {:>6x} {:>11x} {:>5}",
                slot.tlb.index(),
                slot.set,
                slot.way,
                e.epn,
                e.rpn,
                e.tid,
                u8::from(e.ts),
                e.wimge,
                e.permis(),
                e.page_size,
                u8::from(e.iprot)
            );
        }
        out
    }

    #[inline]
    pub fn flush_translation_cache(&mut self) {
        self.cache.clear();
        #[cfg(feature = "stats")]
        {
            self.stats.cache_flushes += 1;
        }
    }

    /// Number of live translation cache entries.
    #[inline]
    pub fn cached_translations(&self) -> usize {
        self.cache.len()
    }
}
