use std::collections::BTreeMap;

use serde::Serialize;

use crate::decoder::Opcode;

/// Per-core executed-instruction histogram.
#[derive(Debug, Clone)]
pub struct Coverage {
    enabled: bool,
    counts: Box<[u64]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub total: u64,
    /// Mnemonic → hit count, only for executed opcodes.
    pub opcodes: BTreeMap<&'static str, u64>,
}

impl Default for Coverage {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Coverage {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            counts: vec![0; Opcode::COUNT].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[inline]
    pub fn record(&mut self, opcode: Opcode) {
        if self.enabled {
            self.counts[opcode.id() as usize] += 1;
        }
    }

    pub fn count(&self, opcode: Opcode) -> u64 {
        self.counts[opcode.id() as usize]
    }

    pub fn clear(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    pub fn report(&self) -> CoverageReport {
        let opcodes: BTreeMap<_, _> = Opcode::all()
            .filter(|&op| self.count(op) > 0)
            .map(|op| (op.mnemonic(), self.count(op)))
            .collect();
        CoverageReport {
            total: opcodes.values().sum(),
            opcodes,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.report())
    }
}
