use ppc_cpu_core::FatalError;
use ppc_memory::MemoryError;
use ppc_mmu::GeometryError;
use thiserror::Error;

pub type Result<T, E = MachineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("invalid machine config: {0}")]
    InvalidConfig(String),
    #[error("failed to parse machine config")]
    ParseConfig(#[from] serde_json::Error),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("no cpu {0}")]
    NoSuchCpu(u32),
    #[error("cpu{cpu}: {source}")]
    Cpu {
        cpu: u32,
        #[source]
        source: FatalError,
    },
    /// Every core that ended a run with a fatal error, in core order.
    #[error("{} core(s) stopped on fatal errors", .0.len())]
    CoresFailed(Vec<(u32, FatalError)>),
}
