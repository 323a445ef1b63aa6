//! The fetch/decode/dispatch loop of one core.

mod threaded;

use std::sync::Arc;

use ppc_memory::{Endian, Memory};
use ppc_mmu::{AccessType, GeometryError, MmuFault, Mmu, Translation};
use tracing::{debug, trace};

use crate::block_cache::BlockCache;
use crate::breakpoints::BreakpointManager;
use crate::config::{CpuConfig, ExecMode};
use crate::core::{CpuCore, SyncRequest};
use crate::coverage::Coverage;
use crate::debug::{external_debug_mode, iac_events};
use crate::decode_cache::DecodeCache;
use crate::decoder::{DecodedInstruction, Decoder, InstructionSource, PpcDecoder};
use crate::exception::{ExceptionKind, FatalError, PpcException, SimFault};
use crate::handlers::HandlerTable;
use crate::interrupts::{self, Delivery};
use crate::reservation::ReservationTable;
use crate::runner::{RunExit, RunMode, RunModeCell};
use crate::state::{CpuState, RegisterId};
use crate::timer;

const ADDR_MASK: u64 = 0xffff_ffff;

/// One simulated e500v2 core with its private caches and debug facilities.
#[derive(Debug)]
pub struct Cpu {
    core: CpuCore,
    config: CpuConfig,
    decoder: PpcDecoder,
    handlers: HandlerTable,
    decode_cache: DecodeCache,
    block_cache: BlockCache,
    breakpoints: BreakpointManager,
    coverage: Coverage,
    mode: Arc<RunModeCell>,
    /// Set when a debug halt stops the core so the halting instruction can run once
    /// on resume.
    iac_resume: Option<u64>,
    retired_run: u64,
    retired_total: u64,
}

impl Cpu {
    pub fn new(config: CpuConfig, reservations: Arc<ReservationTable>) -> Result<Self, GeometryError> {
        let mmu = Mmu::new(config.mmu)?;
        Ok(Self {
            core: CpuCore::new(config.cpu_id, mmu, reservations),
            decoder: PpcDecoder::new(),
            handlers: HandlerTable::new(),
            decode_cache: DecodeCache::new(config.decode_cache_entries),
            block_cache: BlockCache::new(config.block_cache_capacity, config.block_max_instrs),
            breakpoints: BreakpointManager::new(),
            coverage: Coverage::new(config.coverage),
            mode: Arc::new(RunModeCell::default()),
            iac_resume: None,
            retired_run: 0,
            retired_total: 0,
            config,
        })
    }

    // ---- Accessors ----

    #[inline]
    pub fn cpu_id(&self) -> u32 {
        self.core.cpu_id()
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn core(&self) -> &CpuCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut CpuCore {
        &mut self.core
    }

    #[inline]
    pub fn state(&self) -> &CpuState {
        &self.core.state
    }

    #[inline]
    pub fn state_mut(&mut self) -> &mut CpuState {
        &mut self.core.state
    }

    pub fn mmu(&self) -> &Mmu {
        &self.core.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.core.mmu
    }

    pub fn decoder(&self) -> &PpcDecoder {
        &self.decoder
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    pub fn breakpoints(&self) -> &BreakpointManager {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut BreakpointManager {
        &mut self.breakpoints
    }

    pub fn coverage(&self) -> &Coverage {
        &self.coverage
    }

    pub fn coverage_mut(&mut self) -> &mut Coverage {
        &mut self.coverage
    }

    pub fn decode_cache(&self) -> &DecodeCache {
        &self.decode_cache
    }

    pub fn block_cache(&self) -> &BlockCache {
        &self.block_cache
    }

    pub fn set_exec_mode(&mut self, mode: ExecMode) {
        self.config.exec_mode = mode;
    }

    /// Drops every decoded instruction and block, e.g. after code was written behind
    /// the core's back.
    pub fn flush_code_caches(&mut self) {
        self.decode_cache.flush();
        self.block_cache.flush();
    }

    pub fn mode_cell(&self) -> Arc<RunModeCell> {
        Arc::clone(&self.mode)
    }

    #[inline]
    pub fn run_mode(&self) -> RunMode {
        self.mode.get()
    }

    /// Instructions retired since the last `run()` or `step()` began.
    #[inline]
    pub fn instructions_retired(&self) -> u64 {
        self.retired_run
    }

    #[inline]
    pub fn total_instructions_retired(&self) -> u64 {
        self.retired_total
    }

    pub fn register_memory(&mut self, memory: Arc<dyn Memory>) {
        self.core.register_memory(memory);
    }

    // ---- Introspection ----

    pub fn get_reg(&self, name: &str) -> Result<u64, FatalError> {
        let id = RegisterId::parse(name).ok_or_else(|| FatalError::InvalidRegister(name.to_string()))?;
        Ok(self.core.state.get(id))
    }

    pub fn set_reg(&mut self, name: &str, value: u64) -> Result<(), FatalError> {
        let id = RegisterId::parse(name).ok_or_else(|| FatalError::InvalidRegister(name.to_string()))?;
        self.core.state.set(id, value);
        if matches!(id, RegisterId::Msr | RegisterId::Spr(_)) {
            // MSR[IS/PR] and the PIDs feed fetch translation.
            self.decode_cache.flush();
        }
        Ok(())
    }

    pub fn dump_state(&self, all_sprs: bool) -> String {
        self.core.state.dump(self.cpu_id(), all_sprs)
    }

    pub fn dump_tlbs(&self) -> String {
        self.core.mmu.dump_tlbs()
    }

    /// Translates `ea` in the current context. `exec` selects instruction-side
    /// translation, otherwise `write` picks store over load intent.
    pub fn translate(&mut self, ea: u64, write: bool, exec: bool) -> Result<Translation, MmuFault> {
        if exec {
            self.core.translate_fetch(ea)
        } else if write {
            self.core.translate_data(ea, AccessType::Write)
        } else {
            self.core.translate_data(ea, AccessType::Read)
        }
    }

    // ---- Effective-address memory access ----

    pub fn read8(&mut self, ea: u64) -> Result<u8, SimFault> {
        self.core.load_u8(ea)
    }

    pub fn read16(&mut self, ea: u64) -> Result<u16, SimFault> {
        self.core.load_u16(ea)
    }

    pub fn read32(&mut self, ea: u64) -> Result<u32, SimFault> {
        self.core.load_u32(ea)
    }

    pub fn read64(&mut self, ea: u64) -> Result<u64, SimFault> {
        self.core.load(ea, 8, false)
    }

    pub fn write8(&mut self, ea: u64, value: u8) -> Result<(), SimFault> {
        self.core.store_u8(ea, value)
    }

    pub fn write16(&mut self, ea: u64, value: u16) -> Result<(), SimFault> {
        self.core.store_u16(ea, value)
    }

    pub fn write32(&mut self, ea: u64, value: u32) -> Result<(), SimFault> {
        self.core.store_u32(ea, value)
    }

    pub fn write64(&mut self, ea: u64, value: u64) -> Result<(), SimFault> {
        self.core.store(ea, 8, value, false)
    }

    pub fn read_buffer(&mut self, ea: u64, len: usize) -> Result<Vec<u8>, SimFault> {
        let mut buf = vec![0u8; len];
        self.core.read_bytes(ea, &mut buf)?;
        Ok(buf)
    }

    // ---- Execution ----

    /// Resets the per-run instruction counter. Called when a `run()` starts.
    pub fn begin_run(&mut self) {
        self.retired_run = 0;
    }

    /// Executes up to `batch_instrs` instructions in the configured mode, then
    /// delivers any pending timer interrupt. `Some` means the run must end.
    pub fn run_batch(&mut self) -> Result<Option<RunExit>, FatalError> {
        let mut budget = self.config.batch_instrs.max(1);
        if self.at_last_breakpoint() {
            budget -= 1;
            if let Some(exit) = self.step_past_breakpoint()? {
                return Ok(Some(exit));
            }
        }
        let exit = match self.config.exec_mode {
            ExecMode::Interpretive => self.interpret(budget)?,
            ExecMode::Threaded => self.run_blocks(budget)?,
        };
        if exit.is_some() {
            return Ok(exit);
        }
        self.deliver_pending_timer()?;
        Ok(None)
    }

    /// Executes `n` instructions on the calling thread. Every taken exception counts
    /// as the step of the instruction that raised it. Always interpretive.
    pub fn step(&mut self, n: u64) -> Result<RunExit, FatalError> {
        self.mode.try_activate(RunMode::Stepping)?;
        self.retired_run = 0;
        let result = self.step_inner(n);
        let mode = match result {
            Ok(RunExit::Halted) | Ok(RunExit::DebugHalt { .. }) | Err(_) => RunMode::Halted,
            Ok(_) => RunMode::Stopped,
        };
        self.mode.set(mode);
        result
    }

    fn step_inner(&mut self, n: u64) -> Result<RunExit, FatalError> {
        let mut remaining = n;
        if remaining > 0 && self.at_last_breakpoint() {
            remaining -= 1;
            if let Some(exit) = self.step_past_breakpoint()? {
                return Ok(exit);
            }
            self.deliver_pending_timer()?;
        }
        for _ in 0..remaining {
            if self.mode.get() == RunMode::Halted {
                return Ok(RunExit::Halted);
            }
            if let Err(fault) = self.execute_one() {
                if let Some(exit) = self.dispatch(fault)? {
                    return Ok(exit);
                }
            }
            self.deliver_pending_timer()?;
        }
        Ok(RunExit::Stopped)
    }

    /// Decodes one instruction and executes it at the current `PC` with `NIP = PC`,
    /// so anything but a taken branch leaves `PC` where it was.
    pub fn run_instr<'a>(&mut self, source: impl Into<InstructionSource<'a>>) -> Result<(), FatalError> {
        let pc = self.core.state.pc;
        let insn = self.decoder.disassemble(source.into(), pc)?;
        self.core.state.nip = pc;
        if let Err(fault) = self.execute_decoded(pc, &insn) {
            // Breakpoints and debug events are fetch-side; only exceptions or fatals get here.
            self.dispatch(fault)?;
        }
        Ok(())
    }

    fn interpret(&mut self, budget: u64) -> Result<Option<RunExit>, FatalError> {
        for _ in 0..budget {
            if let Err(fault) = self.execute_one() {
                if let Some(exit) = self.dispatch(fault)? {
                    return Ok(Some(exit));
                }
            }
        }
        Ok(None)
    }

    /// Fetch, breakpoint and debug checks, then execution of the instruction at `PC`.
    fn execute_one(&mut self) -> Result<(), SimFault> {
        let pc = self.core.state.pc;
        self.core.state.nip = (pc + 4) & ADDR_MASK;
        let insn = self.fetch(pc)?;
        self.execute_checked(pc, &insn)
    }

    fn fetch(&mut self, pc: u64) -> Result<DecodedInstruction, SimFault> {
        let t = self.core.translate_fetch(pc)?;
        let endian = Endian::from_wimge(t.wimge);
        if let Some(insn) = self.decode_cache.get(pc, t.ra, endian.is_big()) {
            return Ok(insn);
        }
        let raw = self.core.memory()?.read_u32(t.ra, endian)?;
        let insn = self
            .decoder
            .decode(raw, pc)
            .map_err(|_| FatalError::UnknownInstruction { raw, pc })?;
        self.decode_cache.insert(pc, t.ra, endian.is_big(), insn);
        Ok(insn)
    }

    /// Breakpoint and instruction address compare checks for an already fetched
    /// instruction, then its execution.
    fn execute_checked(&mut self, pc: u64, insn: &DecodedInstruction) -> Result<(), SimFault> {
        self.core.state.nip = (pc + 4) & ADDR_MASK;
        if self.breakpoints.check_pc(pc) {
            debug!(cpu = self.cpu_id(), pc = format_args!("{pc:#010x}"), "breakpoint hit");
            return Err(SimFault::Breakpoint { ea: pc });
        }
        let resuming = self.iac_resume.take() == Some(pc);
        if !resuming && self.debug_event_taken(pc)? {
            return Ok(());
        }
        self.execute_decoded(pc, insn)
    }

    /// Raises the debug exception for any IAC event at `pc`. Returns true if the
    /// interrupt was taken, in which case the instruction does not execute.
    fn debug_event_taken(&mut self, pc: u64) -> Result<bool, SimFault> {
        let events = iac_events(&self.core.state, pc);
        if events.is_empty() {
            return Ok(false);
        }
        if external_debug_mode(&self.core.state) {
            return Err(SimFault::DebugHalt { ea: pc });
        }
        let exc = PpcException::new(ExceptionKind::Debug, events, pc);
        let delivery = interrupts::deliver(&mut self.core.state, &exc)?;
        Ok(matches!(delivery, Delivery::Taken { .. }))
    }

    fn execute_decoded(&mut self, pc: u64, insn: &DecodedInstruction) -> Result<(), SimFault> {
        trace!(
            target: "ppc::trace",
            cpu = self.core.cpu_id(),
            pc = format_args!("{pc:#010x}"),
            raw = format_args!("{:08x}", insn.raw),
            insn = %insn.disassemble_at(pc),
        );
        self.coverage.record(insn.opcode);
        let result = self.handlers.execute(&mut self.core, insn);
        self.apply_sync();
        result?;
        self.core.state.pc = self.core.state.nip;
        self.retired_run += 1;
        self.retired_total += 1;
        timer::advance(&mut self.core.state, 1);
        Ok(())
    }

    /// Acts on synchronization requested by the last handler. Returns true if
    /// anything was invalidated.
    fn apply_sync(&mut self) -> bool {
        let sync = std::mem::take(&mut self.core.sync);
        if sync.is_empty() {
            return false;
        }
        if sync.contains(SyncRequest::CONTEXT) {
            self.decode_cache.flush();
        }
        if sync.contains(SyncRequest::ICACHE) {
            for page in std::mem::take(&mut self.core.invalidated_pages) {
                self.decode_cache.invalidate_page(page);
                self.block_cache.invalidate_page(page);
            }
        }
        true
    }

    /// Turns a fault into its architectural effect. `Some` ends the run.
    fn dispatch(&mut self, fault: SimFault) -> Result<Option<RunExit>, FatalError> {
        match fault {
            SimFault::Exception(exc) => {
                interrupts::deliver(&mut self.core.state, &exc)?;
                Ok(None)
            }
            SimFault::Breakpoint { ea } => Ok(Some(RunExit::Breakpoint { ea })),
            SimFault::DebugHalt { ea } => {
                self.iac_resume = Some(ea);
                Ok(Some(RunExit::DebugHalt { ea }))
            }
            SimFault::Fatal(e) => Err(e),
        }
    }

    fn deliver_pending_timer(&mut self) -> Result<(), FatalError> {
        if let Some(exc) = timer::pending_interrupt(&self.core.state) {
            interrupts::deliver(&mut self.core.state, &exc)?;
        }
        Ok(())
    }

    /// True if `PC` sits on the breakpoint that ended the previous run. A stale
    /// record (the PC was moved since) is dropped.
    fn at_last_breakpoint(&mut self) -> bool {
        match self.breakpoints.last_breakpoint() {
            Some(ea) if ea == self.core.state.pc => true,
            Some(_) => {
                self.breakpoints.clear_last_breakpoint();
                false
            }
            None => false,
        }
    }

    /// Executes the breakpointed instruction once with breakpoint checks off.
    fn step_past_breakpoint(&mut self) -> Result<Option<RunExit>, FatalError> {
        let was_enabled = self.breakpoints.is_enabled();
        self.breakpoints.disable();
        let result = self.execute_one();
        if was_enabled {
            self.breakpoints.enable();
        }
        self.breakpoints.clear_last_breakpoint();
        match result {
            Ok(()) => Ok(None),
            Err(fault) => self.dispatch(fault),
        }
    }
}
