use bitflags::bitflags;
use thiserror::Error;

use ppc_memory::MemoryError;
use ppc_mmu::{FaultClass, MmuFault};

use crate::decoder::DecodeError;

/// Hardware exception classes. The classic set is numbered IVOR number + 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionKind {
    CriticalInput = 0x01,
    MachineCheck = 0x02,
    DataStorage = 0x03,
    InstructionStorage = 0x04,
    ExternalInput = 0x05,
    Alignment = 0x06,
    Program = 0x07,
    FpUnavailable = 0x08,
    SystemCall = 0x09,
    Decrementer = 0x0b,
    FixedInterval = 0x0c,
    Watchdog = 0x0d,
    DataTlb = 0x0e,
    InstructionTlb = 0x0f,
    Debug = 0x10,
    SpeUnavailable = 0x21,
    EmbeddedFpData = 0x22,
    EmbeddedFpRound = 0x23,
    PerformanceMonitor = 0x24,
    Doorbell = 0x25,
    DoorbellCritical = 0x26,
}

impl ExceptionKind {
    #[inline]
    pub fn number(self) -> u8 {
        self as u8
    }

    /// IVOR register index this class vectors through.
    pub fn ivor(self) -> u16 {
        match self {
            ExceptionKind::CriticalInput => 0,
            ExceptionKind::MachineCheck => 1,
            ExceptionKind::DataStorage => 2,
            ExceptionKind::InstructionStorage => 3,
            ExceptionKind::ExternalInput => 4,
            ExceptionKind::Alignment => 5,
            ExceptionKind::Program => 6,
            ExceptionKind::FpUnavailable => 7,
            ExceptionKind::SystemCall => 8,
            ExceptionKind::Decrementer => 10,
            ExceptionKind::FixedInterval => 11,
            ExceptionKind::Watchdog => 12,
            ExceptionKind::DataTlb => 13,
            ExceptionKind::InstructionTlb => 14,
            ExceptionKind::Debug => 15,
            ExceptionKind::SpeUnavailable => 32,
            ExceptionKind::EmbeddedFpData => 33,
            ExceptionKind::EmbeddedFpRound => 34,
            ExceptionKind::PerformanceMonitor => 35,
            ExceptionKind::Doorbell => 36,
            ExceptionKind::DoorbellCritical => 37,
        }
    }
}

bitflags! {
    /// Subtype bitmask carried with an exception. Which bits are meaningful depends on
    /// the exception class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Cause: u64 {
        const STORE          = 1 << 0;
        const DCACHE_LOCK    = 1 << 1;
        const ICACHE_LOCK    = 1 << 2;
        const BYTE_ORDER     = 1 << 3;
        const SPE            = 1 << 4;
        const ILLEGAL        = 1 << 5;
        const PRIVILEGED     = 1 << 6;
        const TRAP           = 1 << 7;
        const UNIMPLEMENTED  = 1 << 8;

        const DBG_TRAP       = 1 << 16;
        const DBG_IAC1       = 1 << 17;
        const DBG_IAC2       = 1 << 18;
        const DBG_DAC1R      = 1 << 19;
        const DBG_DAC1W      = 1 << 20;
        const DBG_DAC2R      = 1 << 21;
        const DBG_DAC2W      = 1 << 22;
        const DBG_ICMP       = 1 << 23;
        const DBG_BRT        = 1 << 24;
        const DBG_RET        = 1 << 25;
        const DBG_IRPT       = 1 << 26;
        const DBG_UDE        = 1 << 27;

        const MC_MCP         = 1 << 32;
        const MC_ICPERR      = 1 << 33;
        const MC_DCP_PERR    = 1 << 34;
        const MC_DCPERR      = 1 << 35;
        const MC_BUS_IAERR   = 1 << 36;
        const MC_BUS_RAERR   = 1 << 37;
        const MC_BUS_WAERR   = 1 << 38;
        const MC_BUS_IBERR   = 1 << 39;
        const MC_BUS_RBERR   = 1 << 40;
        const MC_BUS_WBERR   = 1 << 41;
        const MC_BUS_IPERR   = 1 << 42;
        const MC_BUS_RPERR   = 1 << 43;
    }
}

/// A guest-visible exception condition: `(kind, subtype, faulting ea)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpcException {
    pub kind: ExceptionKind,
    pub cause: Cause,
    pub ea: u64,
}

impl PpcException {
    pub const fn new(kind: ExceptionKind, cause: Cause, ea: u64) -> Self {
        Self { kind, cause, ea }
    }

    pub const fn program(cause: Cause) -> Self {
        Self::new(ExceptionKind::Program, cause, 0)
    }

    pub const fn alignment(ea: u64, store: bool) -> Self {
        let cause = if store { Cause::STORE } else { Cause::empty() };
        Self::new(ExceptionKind::Alignment, cause, ea)
    }
}

impl From<MmuFault> for PpcException {
    fn from(fault: MmuFault) -> Self {
        let ea = fault.ea();
        let (kind, cause) = match fault.class() {
            FaultClass::Itlb => (ExceptionKind::InstructionTlb, Cause::empty()),
            FaultClass::DtlbLoad => (ExceptionKind::DataTlb, Cause::empty()),
            FaultClass::DtlbStore => (ExceptionKind::DataTlb, Cause::STORE),
            FaultClass::Isi => (ExceptionKind::InstructionStorage, Cause::empty()),
            FaultClass::DsiRead => (ExceptionKind::DataStorage, Cause::empty()),
            FaultClass::DsiWrite => (ExceptionKind::DataStorage, Cause::STORE),
        };
        PpcException::new(kind, cause, ea)
    }
}

/// Host-side conditions that end execution of a core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalError {
    #[error("no memory module registered")]
    NoMemory,
    #[error("invalid register `{0}`")]
    InvalidRegister(String),
    #[error("unimplemented opcode `{name}` (0x{raw:08x}) at pc=0x{pc:08x}")]
    UnimplementedOpcode { name: &'static str, raw: u32, pc: u64 },
    #[error("unknown instruction 0x{raw:08x} at pc=0x{pc:08x}")]
    UnknownInstruction { raw: u32, pc: u64 },
    #[error("checkstop: machine check with MSR[ME]=0 at pc=0x{pc:08x}")]
    Checkstop { pc: u64 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("core is already running")]
    AlreadyRunning,
    #[error("core thread panicked")]
    ThreadPanicked,
    #[error("failed to spawn core thread: {0}")]
    ThreadSpawn(String),
}

/// Error type of every handler and translation step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimFault {
    #[error("exception {:?} ({:?}) ea=0x{:x}", .0.kind, .0.cause, .0.ea)]
    Exception(PpcException),
    #[error("breakpoint at 0x{ea:08x}")]
    Breakpoint { ea: u64 },
    #[error("external debug halt at 0x{ea:08x}")]
    DebugHalt { ea: u64 },
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl From<PpcException> for SimFault {
    #[inline]
    fn from(exc: PpcException) -> Self {
        SimFault::Exception(exc)
    }
}

impl From<MmuFault> for SimFault {
    #[inline]
    fn from(fault: MmuFault) -> Self {
        SimFault::Exception(fault.into())
    }
}

impl From<MemoryError> for SimFault {
    #[inline]
    fn from(err: MemoryError) -> Self {
        SimFault::Fatal(FatalError::Memory(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmu_faults_map_onto_exception_classes() {
        let miss = MmuFault::Miss {
            class: FaultClass::DtlbStore,
            ea: 0x1000,
        };
        let exc = PpcException::from(miss);
        assert_eq!(exc.kind, ExceptionKind::DataTlb);
        assert_eq!(exc.cause, Cause::STORE);
        assert_eq!(exc.ea, 0x1000);

        let isi = MmuFault::ProtectionViolation {
            class: FaultClass::Isi,
            ea: 0x2000,
        };
        assert_eq!(PpcException::from(isi).kind, ExceptionKind::InstructionStorage);
    }

    #[test]
    fn ivor_numbers() {
        assert_eq!(ExceptionKind::DataTlb.ivor(), 13);
        assert_eq!(ExceptionKind::DataTlb.number(), 0x0e);
        assert_eq!(ExceptionKind::Debug.ivor(), 15);
        assert_eq!(ExceptionKind::EmbeddedFpRound.ivor(), 34);
    }
}
