#![allow(dead_code)]

use std::sync::Arc;

use ppc_cpu_core::regs::spr;
use ppc_cpu_core::{Cpu, CpuConfig, Decoder, PpcDecoder, ReservationTable};
use ppc_memory::{Endian, Memory, PhysicalMemory};
use ppc_mmu::mas::{MAS0_TLBSEL, MAS1_IPROT, MAS1_V};
use ppc_mmu::MasRegisters;

pub const CODE: u64 = 0x1000;

/// TLB1 entry 1: EA 0..16 MiB identity mapped, every permission.
pub fn flat_mapping() -> MasRegisters {
    MasRegisters {
        mas0: MAS0_TLBSEL | (1 << 16),
        mas1: MAS1_V | MAS1_IPROT | (7 << 8),
        mas2: 0,
        mas3: 0x3f,
        ..Default::default()
    }
}

pub fn memory() -> Arc<PhysicalMemory> {
    Arc::new(PhysicalMemory::new(36).unwrap())
}

pub fn boot(
    config: CpuConfig,
    memory: &Arc<PhysicalMemory>,
    reservations: &Arc<ReservationTable>,
) -> Cpu {
    let mut cpu = Cpu::new(config, Arc::clone(reservations)).unwrap();
    cpu.register_memory(Arc::clone(memory) as Arc<dyn Memory>);
    cpu.mmu_mut().write_entry(&flat_mapping(), false);
    let state = cpu.state_mut();
    state.pc = CODE;
    state.set_spr32(spr::IVPR, 0x0001);
    cpu
}

/// Assembles `program` into physical memory at `at`, big-endian.
pub fn load(memory: &PhysicalMemory, at: u64, program: &[&str]) {
    let decoder = PpcDecoder::new();
    for (n, text) in program.iter().enumerate() {
        let pc = at + 4 * n as u64;
        let insn = decoder
            .assemble(text, pc)
            .unwrap_or_else(|e| panic!("{text}: {e}"));
        memory.write_u32(pc, insn.raw, Endian::Big).unwrap();
    }
}
