//! e500v2 (PowerPC Book E) multi-core simulator.
//!
//! The workspace crates, re-exported under one roof:
//!
//! - [`memory`]: the sparse, target-mapped real address space.
//! - [`mmu`]: the two-level TLB and translation engine.
//! - [`cpu`]: decoder, handlers, exception dispatch and the execution loop.
//! - [`machine`]: the composition root that wires cores, memory and reservations.
#![forbid(unsafe_code)]

pub use ppc_cpu_core as cpu;
pub use ppc_machine as machine;
pub use ppc_memory as memory;
pub use ppc_mmu as mmu;

pub use ppc_machine::{CoreExit, CpuMask, Machine, MachineConfig, MachineError, ALL_CPUS};
