//! Composition root for a multi-core e500v2 system.
//!
//! A [`Machine`] owns one [`PhysicalMemory`], one [`ReservationTable`] and
//! `cpu_count` cores, each wrapped in a [`CpuHandle`] so it can run on its own
//! thread. Cores are addressed individually by index or in groups by [`CpuMask`].
#![forbid(unsafe_code)]

mod config;
mod error;

pub use config::{MachineConfig, MAX_CPUS};
pub use error::{MachineError, Result};
pub use ppc_cpu_core::{Cpu, CpuHandle, FatalError, RunExit, RunMode};

use std::sync::Arc;

use ppc_cpu_core::ReservationTable;
use ppc_memory::{Memory, PhysicalMemory};
use ppc_mmu::Translation;
use tracing::{debug, info, warn};

/// Bit `n` selects core `n`.
pub type CpuMask = u64;

pub const ALL_CPUS: CpuMask = u64::MAX;

/// How one core's run ended, as collected by [`Machine::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreExit {
    pub cpu: u32,
    pub exit: RunExit,
}

#[derive(Debug)]
pub struct Machine {
    config: MachineConfig,
    memory: Arc<PhysicalMemory>,
    reservations: Arc<ReservationTable>,
    cpus: Vec<CpuHandle>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(PhysicalMemory::new(config.phys_addr_bits)?);
        for target in &config.memory_targets {
            memory.register_target(target.clone())?;
        }
        let reservations = Arc::new(ReservationTable::new(config.cpu.cache_line_size));

        let mut cpus = Vec::with_capacity(config.cpu_count as usize);
        for id in 0..config.cpu_count {
            let mut cpu = Cpu::new(config.cpu.clone().with_id(id), Arc::clone(&reservations))?;
            cpu.register_memory(Arc::clone(&memory) as Arc<dyn Memory>);
            cpus.push(CpuHandle::new(cpu));
        }

        info!(
            cpus = config.cpu_count,
            phys_addr_bits = config.phys_addr_bits,
            targets = config.memory_targets.len() + 1,
            exec_mode = ?config.cpu.exec_mode,
            "machine created"
        );
        Ok(Self {
            config,
            memory,
            reservations,
            cpus,
        })
    }

    #[inline]
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    #[inline]
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, n: u32) -> Result<&CpuHandle> {
        self.cpus.get(n as usize).ok_or(MachineError::NoSuchCpu(n))
    }

    pub fn cpu_mut(&mut self, n: u32) -> Result<&mut CpuHandle> {
        self.cpus.get_mut(n as usize).ok_or(MachineError::NoSuchCpu(n))
    }

    pub fn memory(&self) -> &Arc<PhysicalMemory> {
        &self.memory
    }

    pub fn reservations(&self) -> &Arc<ReservationTable> {
        &self.reservations
    }

    /// Mask with a bit for every core of this machine.
    pub fn all_cpus(&self) -> CpuMask {
        mask_for(self.cpus.len())
    }

    fn selected(&self, mask: CpuMask) -> impl Iterator<Item = usize> + '_ {
        (0..self.cpus.len()).filter(move |&n| mask & (1 << n) != 0)
    }

    // ---- Lifecycle ----

    /// Copies `bytes` into physical memory at `ra`, cancels reservations on the lines
    /// it overwrites and drops every core's decoded code so the new image is fetched
    /// fresh.
    pub fn load_image(&self, ra: u64, bytes: &[u8]) -> Result<()> {
        self.reservations
            .store(ra, bytes.len() as u64, || self.memory.write_from(ra, bytes))?;
        for cpu in &self.cpus {
            cpu.with_cpu(Cpu::flush_code_caches);
        }
        debug!(ra = format_args!("{ra:#x}"), len = bytes.len(), "image loaded");
        Ok(())
    }

    /// Starts every selected core on its own thread. Cores that are already running
    /// are left alone.
    pub fn run(&mut self, mask: CpuMask) -> Result<()> {
        let selected: Vec<usize> = self.selected(mask).collect();
        for n in selected {
            match self.cpus[n].run() {
                Ok(()) => {}
                Err(FatalError::AlreadyRunning) => {
                    warn!(cpu = n, "run requested for a core that is already running");
                }
                Err(source) => {
                    return Err(MachineError::Cpu {
                        cpu: n as u32,
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Steps one core synchronously on the calling thread.
    pub fn step(&self, n: u32, count: u64) -> Result<RunExit> {
        self.cpu(n)?
            .step(count)
            .map_err(|source| MachineError::Cpu { cpu: n, source })
    }

    pub fn stop(&self, mask: CpuMask) {
        for n in self.selected(mask) {
            self.cpus[n].stop();
        }
    }

    pub fn halt(&self, mask: CpuMask) {
        for n in self.selected(mask) {
            self.cpus[n].halt();
        }
    }

    pub fn run_modes(&self) -> Vec<RunMode> {
        self.cpus.iter().map(CpuHandle::run_mode).collect()
    }

    /// Whether no selected core thread is still executing.
    pub fn is_idle(&self, mask: CpuMask) -> bool {
        self.selected(mask).all(|n| self.cpus[n].is_finished())
    }

    /// Waits for every selected core. All of them are joined before any fatal
    /// error is reported.
    pub fn join(&mut self, mask: CpuMask) -> Result<Vec<CoreExit>> {
        let selected: Vec<usize> = self.selected(mask).collect();
        let mut exits = Vec::with_capacity(selected.len());
        let mut failures = Vec::new();
        for n in selected {
            let cpu = n as u32;
            match self.cpus[n].join() {
                Ok(exit) => exits.push(CoreExit { cpu, exit }),
                Err(e) => failures.push((cpu, e)),
            }
        }
        if failures.is_empty() {
            Ok(exits)
        } else {
            Err(MachineError::CoresFailed(failures))
        }
    }

    // ---- Introspection ----

    pub fn get_reg(&self, n: u32, name: &str) -> Result<u64> {
        self.cpu(n)?
            .lock()
            .get_reg(name)
            .map_err(|source| MachineError::Cpu { cpu: n, source })
    }

    pub fn dump_state(&self, n: u32, all_sprs: bool) -> Result<String> {
        Ok(self.cpu(n)?.lock().dump_state(all_sprs))
    }

    /// Translates `ea` in core `n`'s current context. `Ok(None)` is a translation
    /// miss or protection fault.
    pub fn translate(&self, n: u32, ea: u64, write: bool, exec: bool) -> Result<Option<Translation>> {
        Ok(self.cpu(n)?.lock().translate(ea, write, exec).ok())
    }
}

fn mask_for(count: usize) -> CpuMask {
    if count >= 64 {
        ALL_CPUS
    } else {
        (1u64 << count) - 1
    }
}
