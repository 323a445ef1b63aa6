#![forbid(unsafe_code)]

//! Architectural state, decoder, opcode handlers and the execution loop of an
//! e500v2 (PowerPC Book E) core.
//!
//! [`Cpu`] is one core: it owns a [`CpuCore`] (registers, MMU, memory handle and
//! the reservation link) plus the per-core decode cache, basic-block cache,
//! breakpoints and coverage counters. [`CpuHandle`] runs a `Cpu` on its own thread.
//! Cores of one machine share physical memory and a [`ReservationTable`].

mod core;

pub mod block_cache;
pub mod breakpoints;
pub mod config;
pub mod coverage;
pub mod debug;
pub mod decode_cache;
pub mod decoder;
pub mod exception;
pub mod exec;
pub mod handlers;
pub mod interrupts;
pub mod regs;
pub mod reservation;
pub mod runner;
pub mod state;
pub mod timer;

pub use crate::core::{CpuCore, SyncRequest};
pub use block_cache::{BasicBlock, BlockCache, BlockEnd, BlockId, BlockKey, BlockLease};
pub use breakpoints::{Breakpoint, BreakpointManager};
pub use config::{CpuConfig, ExecMode};
pub use coverage::{Coverage, CoverageReport};
pub use decode_cache::DecodeCache;
pub use decoder::{DecodeError, DecodedInstruction, Decoder, InstructionSource, Opcode, PpcDecoder};
pub use exception::{Cause, ExceptionKind, FatalError, PpcException, SimFault};
pub use exec::Cpu;
pub use handlers::{Handler, HandlerResult, HandlerTable};
pub use interrupts::{deliver, Delivery};
pub use reservation::{LocalReservation, ReservationTable};
pub use runner::{CpuHandle, RunExit, RunMode, RunModeCell};
pub use state::{CpuState, RegisterId, RESET_PC};
