//! Per-core instruction decode cache used by the interpretive loop.

use crate::decoder::DecodedInstruction;

pub const DEFAULT_DECODE_CACHE_ENTRIES: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct DecodeCacheEntry {
    pc: u64,
    ra: u64,
    big_endian: bool,
    insn: DecodedInstruction,
}

/// Direct-mapped cache of decoded instructions keyed by `(pc, real address, byte order)`.
///
/// An entry is only returned for the exact real address it was decoded from, so a
/// changed `pc → ra` mapping misses instead of reusing a stale decode. Stores into
/// instruction memory are not tracked; guests announce them with `icbi`, which
/// drops the page through [`DecodeCache::invalidate_page`].
#[derive(Debug)]
pub struct DecodeCache {
    entries: Box<[Option<DecodeCacheEntry>]>,
    #[cfg(any(test, debug_assertions))]
    hits: u64,
    #[cfg(any(test, debug_assertions))]
    misses: u64,
}

impl Default for DecodeCache {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_CACHE_ENTRIES)
    }
}

impl DecodeCache {
    /// `capacity` is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            entries: vec![None; capacity].into_boxed_slice(),
            #[cfg(any(test, debug_assertions))]
            hits: 0,
            #[cfg(any(test, debug_assertions))]
            misses: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    fn index(&self, pc: u64) -> usize {
        let mut x = (pc >> 2).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        x ^= x >> 33;
        x as usize & (self.entries.len() - 1)
    }

    #[inline]
    pub fn get(&mut self, pc: u64, ra: u64, big_endian: bool) -> Option<DecodedInstruction> {
        let idx = self.index(pc);
        match &self.entries[idx] {
            Some(e) if e.pc == pc && e.ra == ra && e.big_endian == big_endian => {
                #[cfg(any(test, debug_assertions))]
                {
                    self.hits += 1;
                }
                Some(e.insn)
            }
            _ => {
                #[cfg(any(test, debug_assertions))]
                {
                    self.misses += 1;
                }
                None
            }
        }
    }

    #[inline]
    pub fn insert(&mut self, pc: u64, ra: u64, big_endian: bool, insn: DecodedInstruction) {
        let idx = self.index(pc);
        self.entries[idx] = Some(DecodeCacheEntry {
            pc,
            ra,
            big_endian,
            insn,
        });
    }

    pub fn flush(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }

    /// Drops every entry decoded from real page `page` (4 KiB page number).
    pub fn invalidate_page(&mut self, page: u64) {
        for slot in self.entries.iter_mut() {
            if slot.is_some_and(|e| e.ra >> 12 == page) {
                *slot = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(any(test, debug_assertions))]
    pub fn stats(&self) -> DecodeCacheStats {
        DecodeCacheStats {
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(any(test, debug_assertions))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeCacheStats {
    pub hits: u64,
    pub misses: u64,
}
