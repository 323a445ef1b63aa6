//! Opcode handlers, one plain function per instruction, and the dispatch table
//! mapping decoded opcodes to them.

mod alu;
mod branch;
mod mem;
mod system;

use crate::core::CpuCore;
use crate::decoder::{DecodedInstruction, OpFlags, Opcode};
use crate::exception::{Cause, FatalError, PpcException, SimFault};

#[cfg(test)]
mod tests;

pub type HandlerResult = Result<(), SimFault>;

/// Executes one decoded instruction against the core. `state.nip` already holds
/// `pc + 4`; branches overwrite it.
pub type Handler = fn(&mut CpuCore, &DecodedInstruction) -> HandlerResult;

/// Dense opcode-id indexed handler table.
#[derive(Clone)]
pub struct HandlerTable {
    table: Box<[Option<Handler>]>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("registered", &self.registered())
            .finish()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerTable {
    /// Table with every implemented e500v2 instruction registered.
    pub fn new() -> Self {
        let mut table = Self::empty();
        for list in [alu::HANDLERS, branch::HANDLERS, mem::HANDLERS, system::HANDLERS] {
            for &(opcode, handler) in list {
                table.register(opcode, handler);
            }
        }
        table
    }

    pub fn empty() -> Self {
        Self {
            table: vec![None; Opcode::COUNT].into_boxed_slice(),
        }
    }

    pub fn register(&mut self, opcode: Opcode, handler: Handler) {
        self.table[opcode.id() as usize] = Some(handler);
    }

    pub fn unregister(&mut self, opcode: Opcode) {
        self.table[opcode.id() as usize] = None;
    }

    #[inline]
    pub fn get(&self, opcode: Opcode) -> Option<Handler> {
        self.table.get(opcode.id() as usize).copied().flatten()
    }

    /// Handler for `insn`, or [`FatalError::UnimplementedOpcode`].
    #[inline]
    pub fn lookup(&self, insn: &DecodedInstruction, pc: u64) -> Result<Handler, FatalError> {
        self.get(insn.opcode).ok_or(FatalError::UnimplementedOpcode {
            name: insn.opcode.mnemonic(),
            raw: insn.raw,
            pc,
        })
    }

    /// Runs `insn` through its handler. Supervisor-only opcodes executed with
    /// `MSR[PR]` set raise a privileged-instruction program exception instead.
    #[inline]
    pub fn execute(&self, core: &mut CpuCore, insn: &DecodedInstruction) -> HandlerResult {
        let handler = self.lookup(insn, core.state.pc)?;
        if insn.info().flags.contains(OpFlags::PRIV) && core.state.user_mode() {
            return Err(PpcException::program(Cause::PRIVILEGED).into());
        }
        handler(core, insn)
    }

    pub fn registered(&self) -> usize {
        self.table.iter().filter(|h| h.is_some()).count()
    }
}

/// Invalid instruction form.
#[inline]
pub(crate) fn illegal() -> SimFault {
    PpcException::program(Cause::ILLEGAL).into()
}
