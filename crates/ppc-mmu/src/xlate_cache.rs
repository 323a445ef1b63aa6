use std::num::NonZeroUsize;

use lru::LruCache;

/// Page sizes probed by the translation cache, smallest first.
pub(crate) const PROBE_PAGE_SIZES: [u64; 11] = [
    0x1000,
    0x4000,
    0x1_0000,
    0x4_0000,
    0x10_0000,
    0x40_0000,
    0x100_0000,
    0x400_0000,
    0x1000_0000,
    0x4000_0000,
    0x1_0000_0000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CachedTranslation {
    pub(crate) ra_base: u64,
    pub(crate) wimge: u8,
    pub(crate) page_size: u64,
}

/// Virtual tag: `pr | rwx | as | pid | page-masked EA`.
#[inline]
pub(crate) fn tag(user: bool, rwx: u8, address_space: bool, pid: u32, ea: u64, page_size: u64) -> u64 {
    (u64::from(user) << 44)
        | (u64::from(rwx & 7) << 41)
        | (u64::from(address_space) << 40)
        | (u64::from(pid & 0xff) << 32)
        | (ea & 0xffff_ffff & !(page_size - 1))
}

/// LRU cache of recently resolved translations, keyed by virtual tag.
#[derive(Debug)]
pub(crate) struct TranslationCache {
    entries: LruCache<u64, CachedTranslation>,
}

impl TranslationCache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Probes every supported page size. A tag only hits if it was inserted for the
    /// same page size, so a 4K probe never aliases the tag of a larger page.
    pub(crate) fn lookup(&mut self, user: bool, rwx: u8, address_space: bool, pid: u32, ea: u64) -> Option<CachedTranslation> {
        for &page_size in PROBE_PAGE_SIZES.iter() {
            let key = tag(user, rwx, address_space, pid, ea, page_size);
            if let Some(hit) = self.entries.get(&key) {
                if hit.page_size == page_size {
                    return Some(*hit);
                }
            }
        }
        None
    }

    pub(crate) fn insert(&mut self, user: bool, rwx: u8, address_space: bool, pid: u32, ea: u64, value: CachedTranslation) {
        // Pages above 4G (or below 4K) cannot be represented in a 32-bit tag; skip caching.
        if !PROBE_PAGE_SIZES.contains(&value.page_size) {
            return;
        }
        let key = tag(user, rwx, address_space, pid, ea, value.page_size);
        self.entries.put(key, value);
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
