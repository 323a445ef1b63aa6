//! Context-keyed cache of decoded basic blocks for the threaded execution mode.
//!
//! Blocks live in a slot arena addressed by generational [`BlockId`]s. A block is
//! found by its full [`BlockKey`]; a second index maps real page numbers to the
//! blocks starting on them so a page can be dropped in one call. Blocks in use
//! (non-zero refcount) are never freed: invalidating one either fails
//! ([`BlockCache::invalidate`]) or retires it until its last holder releases it
//! ([`BlockCache::invalidate_page`], [`BlockCache::flush`]).

use std::ops::Deref;

use ppc_memory::Memory;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::decoder::{DecodedInstruction, Decoder};
use crate::exception::FatalError;

pub const DEFAULT_BLOCK_CAPACITY: usize = 4096;
pub const DEFAULT_BLOCK_MAX_INSTRS: usize = 128;

const PAGE_SHIFT: u32 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
/// Decoded instructions are moved into the block in batches of this many.
const STAGING: usize = 16;

/// Everything that can change how the bytes at `ip` decode and execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub ip: u64,
    /// Real page number (4 KiB) holding `ip`.
    pub physical_page: u64,
    pub msr: u32,
    pub pids: [u32; 3],
    pub big_endian: bool,
}

impl BlockKey {
    #[inline]
    pub fn real_address(&self) -> u64 {
        (self.physical_page << PAGE_SHIFT) | (self.ip & (PAGE_SIZE - 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Stopped at the length bound, a page boundary or an undecodable word.
    Split,
    /// Last instruction transfers control or changes the execution context.
    ControlTransfer,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub key: BlockKey,
    pub instrs: Vec<DecodedInstruction>,
    pub end: BlockEnd,
    /// Static target of a direct branch ending the block; equals `not_taken` otherwise.
    pub taken: u64,
    /// Address following the last instruction.
    pub not_taken: u64,
    pub refcount: u32,
    pub hit_count: u64,
    pub last_used: u64,
}

impl BasicBlock {
    #[inline]
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Effective address of instruction `n`.
    #[inline]
    pub fn address_of(&self, n: usize) -> u64 {
        (self.key.ip + 4 * n as u64) & 0xffff_ffff
    }
}

/// Generational handle; stale handles resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    block: Option<BasicBlock>,
    /// Unlinked from the indices; freed once the refcount drops to zero.
    retired: bool,
}

#[derive(Debug)]
pub struct BlockCache {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: FxHashMap<BlockKey, BlockId>,
    pages: FxHashMap<u64, Vec<BlockId>>,
    capacity: usize,
    max_instrs: usize,
    clock: u64,
    decoded: u64,
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_MAX_INSTRS)
    }
}

impl BlockCache {
    pub fn new(capacity: usize, max_instrs: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: FxHashMap::default(),
            pages: FxHashMap::default(),
            capacity: capacity.max(1),
            max_instrs: max_instrs.clamp(1, (PAGE_SIZE / 4) as usize),
            clock: 0,
            decoded: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached (indexed) blocks. Retired blocks still held by a caller are not counted.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.by_key.contains_key(key)
    }

    #[inline]
    pub fn lookup(&self, key: &BlockKey) -> Option<BlockId> {
        self.by_key.get(key).copied()
    }

    /// Number of blocks decoded since construction.
    #[inline]
    pub fn blocks_decoded(&self) -> u64 {
        self.decoded
    }

    pub fn page_block_count(&self, page: u64) -> usize {
        self.pages.get(&page).map_or(0, Vec::len)
    }

    /// Physical pages with at least one cached block.
    pub fn indexed_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn get(&self, id: BlockId) -> Option<&BasicBlock> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.block.as_ref())
    }

    fn get_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.block.as_mut())
    }

    /// Returns the block for `key`, decoding it from `memory` on a miss. The block's
    /// refcount is raised; pair every call with [`BlockCache::release`].
    pub fn translate(
        &mut self,
        key: BlockKey,
        memory: &dyn Memory,
        decoder: &dyn Decoder,
    ) -> Result<BlockId, FatalError> {
        self.clock += 1;
        let now = self.clock;
        let id = match self.by_key.get(&key) {
            Some(&id) => id,
            None => {
                let block = self.decode_block(key, memory, decoder)?;
                self.insert(block)
            }
        };
        self.acquire(id, now);
        if self.by_key.len() > self.capacity {
            self.reclaim();
        }
        Ok(id)
    }

    fn acquire(&mut self, id: BlockId, now: u64) {
        if let Some(block) = self.get_mut(id) {
            block.refcount += 1;
            block.hit_count += 1;
            block.last_used = now;
        }
    }

    /// [`BlockCache::translate`] with the release tied to the returned guard.
    pub fn lease(
        &mut self,
        key: BlockKey,
        memory: &dyn Memory,
        decoder: &dyn Decoder,
    ) -> Result<BlockLease<'_>, FatalError> {
        let id = self.translate(key, memory, decoder)?;
        Ok(BlockLease { cache: self, id })
    }

    /// Drops one reference taken by [`BlockCache::translate`].
    pub fn release(&mut self, id: BlockId) {
        let Some(slot) = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
        else {
            return;
        };
        let Some(block) = slot.block.as_mut() else {
            return;
        };
        block.refcount = block.refcount.saturating_sub(1);
        if block.refcount == 0 && slot.retired {
            self.free_slot(id.index);
        }
    }

    fn insert(&mut self, block: BasicBlock) -> BlockId {
        let key = block.key;
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.block = Some(block);
        slot.retired = false;
        let id = BlockId {
            index,
            generation: slot.generation,
        };
        self.by_key.insert(key, id);
        self.pages.entry(key.physical_page).or_default().push(id);
        id
    }

    fn free_slot(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.block = None;
        slot.retired = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    /// Removes the block from both indices. Returns its key if it was indexed.
    fn unlink(&mut self, id: BlockId) -> Option<BlockKey> {
        let key = self.get(id)?.key;
        if self.by_key.get(&key) != Some(&id) {
            return None;
        }
        self.by_key.remove(&key);
        if let Some(list) = self.pages.get_mut(&key.physical_page) {
            list.retain(|&b| b != id);
        }
        Some(key)
    }

    /// Frees an unused block. Fails (returns `false`) while the block is held or if
    /// `id` is stale.
    pub fn invalidate(&mut self, id: BlockId) -> bool {
        let page = match self.get(id) {
            Some(b) if b.refcount == 0 => b.key.physical_page,
            _ => return false,
        };
        if self.unlink(id).is_none() {
            return false;
        }
        if self.pages.get(&page).is_some_and(Vec::is_empty) {
            self.pages.remove(&page);
        }
        self.free_slot(id.index);
        true
    }

    /// Drops every block starting on real page `page`. Blocks still in use are
    /// retired and freed on their last release. Returns how many were dropped.
    pub fn invalidate_page(&mut self, page: u64) -> usize {
        let Some(ids) = self.pages.remove(&page) else {
            return 0;
        };
        let mut dropped = 0;
        for id in ids {
            if let Some(key) = self.get(id).map(|b| b.key) {
                self.by_key.remove(&key);
                self.retire_or_free(id);
                dropped += 1;
            }
        }
        trace!(page = format_args!("{page:#x}"), dropped, "block cache page invalidated");
        dropped
    }

    /// Drops every block.
    pub fn flush(&mut self) {
        let ids: Vec<BlockId> = self.by_key.drain().map(|(_, id)| id).collect();
        self.pages.clear();
        for id in ids {
            self.retire_or_free(id);
        }
    }

    fn retire_or_free(&mut self, id: BlockId) {
        let in_use = self.get(id).is_some_and(|b| b.refcount > 0);
        if in_use {
            self.slots[id.index as usize].retired = true;
        } else {
            self.free_slot(id.index);
        }
    }

    /// Evicts unused blocks whose `last_used` is below the mean, oldest first,
    /// until the cache is back within capacity. Returns the evicted keys.
    pub fn reclaim(&mut self) -> Vec<BlockKey> {
        let mut evicted = Vec::new();
        if self.by_key.len() <= self.capacity {
            return evicted;
        }
        let total: u128 = self
            .by_key
            .values()
            .filter_map(|&id| self.get(id))
            .map(|b| u128::from(b.last_used))
            .sum();
        let mean = total / self.by_key.len() as u128;

        let mut candidates: Vec<(u64, BlockId)> = self
            .by_key
            .values()
            .filter_map(|&id| self.get(id).map(|b| (b, id)))
            .filter(|(b, _)| b.refcount == 0 && u128::from(b.last_used) < mean)
            .map(|(b, id)| (b.last_used, id))
            .collect();
        candidates.sort_unstable_by_key(|&(last_used, _)| last_used);

        for (_, id) in candidates {
            if self.by_key.len() <= self.capacity {
                break;
            }
            if let Some(key) = self.unlink(id) {
                self.free_slot(id.index);
                evicted.push(key);
            }
        }
        self.pages.retain(|_, list| !list.is_empty());
        trace!(evicted = evicted.len(), len = self.by_key.len(), "block cache reclaim");
        evicted
    }

    fn decode_block(
        &mut self,
        key: BlockKey,
        memory: &dyn Memory,
        decoder: &dyn Decoder,
    ) -> Result<BasicBlock, FatalError> {
        let page_left = ((PAGE_SIZE - (key.ip & (PAGE_SIZE - 1))) / 4) as usize;
        let count = page_left.min(self.max_instrs);
        let mut bytes = vec![0u8; count * 4];
        memory.read_into(key.real_address(), &mut bytes)?;

        let mut instrs = Vec::with_capacity(count);
        let mut staging: Vec<DecodedInstruction> = Vec::with_capacity(STAGING);
        let mut end = BlockEnd::Split;
        let mut taken = None;
        for (n, word) in bytes.chunks_exact(4).enumerate() {
            let word: [u8; 4] = [word[0], word[1], word[2], word[3]];
            let raw = if key.big_endian {
                u32::from_be_bytes(word)
            } else {
                u32::from_le_bytes(word)
            };
            let pc = (key.ip + 4 * n as u64) & 0xffff_ffff;
            let insn = match decoder.decode(raw, pc) {
                Ok(insn) => insn,
                Err(_) if n == 0 => return Err(FatalError::UnknownInstruction { raw, pc }),
                // Split before the bad word; executing it reports the error at its own pc.
                Err(_) => break,
            };
            staging.push(insn);
            if staging.len() == STAGING {
                instrs.append(&mut staging);
            }
            if insn.ends_block() {
                end = BlockEnd::ControlTransfer;
                taken = insn.branch_target(pc);
                break;
            }
        }
        instrs.append(&mut staging);

        let not_taken = (key.ip + 4 * instrs.len() as u64) & 0xffff_ffff;
        self.decoded += 1;
        trace!(
            ip = format_args!("{:#x}", key.ip),
            len = instrs.len(),
            ?end,
            "decoded block"
        );
        Ok(BasicBlock {
            key,
            instrs,
            end,
            taken: taken.unwrap_or(not_taken),
            not_taken,
            refcount: 0,
            hit_count: 0,
            last_used: 0,
        })
    }
}

/// A held reference to a cached block, released on drop.
pub struct BlockLease<'a> {
    cache: &'a mut BlockCache,
    id: BlockId,
}

impl BlockLease<'_> {
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }
}

impl Deref for BlockLease<'_> {
    type Target = BasicBlock;

    fn deref(&self) -> &BasicBlock {
        match self.cache.get(self.id) {
            Some(block) => block,
            // A held block cannot be freed.
            None => unreachable!("leased block {:?} was freed", self.id),
        }
    }
}

impl Drop for BlockLease<'_> {
    fn drop(&mut self) {
        self.cache.release(self.id);
    }
}
