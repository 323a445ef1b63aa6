use rustc_hash::FxHashMap;

use crate::{MemoryError, Result};

fn check_range(size: u64, addr: u64, len: usize) -> Result<()> {
    let end = addr
        .checked_add(len as u64)
        .ok_or(MemoryError::OutOfRange { addr, len, size })?;
    if end > size {
        return Err(MemoryError::OutOfRange { addr, len, size });
    }
    Ok(())
}

/// Sparse memory backed by lazily-allocated fixed-size pages.
///
/// Pages that were never written read back as zero. Addresses are offsets from the
/// start of the owning target, not real addresses.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    page_size: usize,
    pages: FxHashMap<u64, Box<[u8]>>,
}

impl SparseMemory {
    pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024;

    pub fn new(size: u64) -> Result<Self> {
        Self::with_page_size(size, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(size: u64, page_size: usize) -> Result<Self> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(MemoryError::InvalidPageSize { page_size });
        }
        Ok(Self {
            size,
            page_size,
            pages: FxHashMap::default(),
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of pages that have been materialized by writes.
    #[inline]
    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    fn split(&self, offset: u64) -> (u64, usize) {
        let page_size = self.page_size as u64;
        let page = offset / page_size;
        (page, (offset - page * page_size) as usize)
    }

    pub fn read_into(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        check_range(self.size, offset, dst.len())?;
        let mut remaining = dst;
        let mut cur = offset;

        while !remaining.is_empty() {
            let (page, page_off) = self.split(cur);
            let take = (self.page_size - page_off).min(remaining.len());

            match self.pages.get(&page) {
                Some(data) => remaining[..take].copy_from_slice(&data[page_off..page_off + take]),
                None => remaining[..take].fill(0),
            }

            cur += take as u64;
            remaining = &mut remaining[take..];
        }

        Ok(())
    }

    pub fn write_from(&mut self, offset: u64, src: &[u8]) -> Result<()> {
        check_range(self.size, offset, src.len())?;
        let page_size = self.page_size;
        let mut remaining = src;
        let mut cur = offset;

        while !remaining.is_empty() {
            let (page, page_off) = self.split(cur);
            let take = (page_size - page_off).min(remaining.len());

            let data = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; page_size].into_boxed_slice());
            data[page_off..page_off + take].copy_from_slice(&remaining[..take]);

            cur += take as u64;
            remaining = &remaining[take..];
        }

        Ok(())
    }
}
