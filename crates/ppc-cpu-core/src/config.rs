use ppc_mmu::MmuGeometry;
use serde::{Deserialize, Serialize};

use crate::block_cache::{DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_MAX_INSTRS};
use crate::decode_cache::DEFAULT_DECODE_CACHE_ENTRIES;
use crate::reservation::DEFAULT_LINE_SIZE;

/// How [`crate::Cpu`] walks the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Fetch, translate and dispatch one instruction at a time.
    #[default]
    Interpretive,
    /// Execute whole cached basic blocks.
    Threaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub cpu_id: u32,
    pub name: String,
    pub mmu: MmuGeometry,
    pub decode_cache_entries: usize,
    pub block_cache_capacity: usize,
    pub block_max_instrs: usize,
    /// Instructions run between checks of the run mode and pending interrupts.
    pub batch_instrs: u64,
    pub exec_mode: ExecMode,
    pub cache_line_size: u64,
    pub coverage: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            cpu_id: 0,
            name: "e500v2".to_string(),
            mmu: MmuGeometry::default(),
            decode_cache_entries: DEFAULT_DECODE_CACHE_ENTRIES,
            block_cache_capacity: DEFAULT_BLOCK_CAPACITY,
            block_max_instrs: DEFAULT_BLOCK_MAX_INSTRS,
            batch_instrs: 100,
            exec_mode: ExecMode::Interpretive,
            cache_line_size: DEFAULT_LINE_SIZE,
            coverage: false,
        }
    }
}

impl CpuConfig {
    pub fn with_id(mut self, cpu_id: u32) -> Self {
        self.cpu_id = cpu_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: CpuConfig =
            serde_json::from_str(r#"{ "exec_mode": "threaded", "mmu": { "tlb1_entries": 8 } }"#).unwrap();
        assert_eq!(cfg.exec_mode, ExecMode::Threaded);
        assert_eq!(cfg.mmu.tlb1_entries, 8);
        assert_eq!(cfg.mmu.tlb0_sets, 128);
        assert_eq!(cfg.batch_instrs, 100);
        assert_eq!(cfg.cache_line_size, 32);
    }
}
