use std::sync::Arc;

use ppc_memory::Endian;

use super::{Cpu, ADDR_MASK};
use crate::block_cache::{BlockCache, BlockId, BlockKey};
use crate::exception::FatalError;
use crate::runner::RunExit;

const PAGE_SHIFT: u32 = 12;

impl Cpu {
    /// Threaded execution: whole cached blocks, translated once at their first
    /// instruction.
    pub(super) fn run_blocks(&mut self, budget: u64) -> Result<Option<RunExit>, FatalError> {
        let mut done = 0;
        while done < budget {
            let (executed, exit) = self.run_block(budget - done)?;
            if exit.is_some() {
                return Ok(exit);
            }
            done += executed.max(1);
        }
        Ok(None)
    }

    /// Executes at most `budget` instructions of the block at `PC`. Returns how many
    /// steps were taken.
    fn run_block(&mut self, budget: u64) -> Result<(u64, Option<RunExit>), FatalError> {
        let pc = self.core.state.pc;
        let t = match self.core.translate_fetch(pc) {
            Ok(t) => t,
            Err(fault) => return Ok((1, self.dispatch(fault.into())?)),
        };
        let key = BlockKey {
            ip: pc,
            physical_page: t.ra >> PAGE_SHIFT,
            msr: self.core.state.msr,
            pids: self.core.state.pids(),
            big_endian: Endian::from_wimge(t.wimge).is_big(),
        };
        let memory = Arc::clone(self.core.memory()?);
        let id = self.block_cache.translate(key, memory.as_ref(), &self.decoder)?;
        let result = self.walk_block(id, budget);
        self.block_cache.release(id);
        result
    }

    fn walk_block(&mut self, id: BlockId, budget: u64) -> Result<(u64, Option<RunExit>), FatalError> {
        let mut n = 0usize;
        while (n as u64) < budget {
            let Some((insn, ea)) = instruction_at(&self.block_cache, id, n) else {
                break;
            };
            // Anything that moved PC off the block's straight line ends the walk.
            if self.core.state.pc != ea {
                break;
            }
            n += 1;
            if let Err(fault) = self.execute_checked(ea, &insn) {
                if let Some(exit) = self.dispatch(fault)? {
                    return Ok((n as u64, Some(exit)));
                }
                break;
            }
            if self.core.state.pc != (ea + 4) & ADDR_MASK {
                break;
            }
        }
        Ok((n as u64, None))
    }
}

fn instruction_at(
    cache: &BlockCache,
    id: BlockId,
    n: usize,
) -> Option<(crate::decoder::DecodedInstruction, u64)> {
    let block = cache.get(id)?;
    block.instrs.get(n).map(|&insn| (insn, block.address_of(n)))
}
