use ppc_cpu_core::CpuConfig;
use ppc_memory::TargetConfig;
use serde::{Deserialize, Serialize};

use crate::error::{MachineError, Result};

/// Highest core count a [`crate::CpuMask`] can address.
pub const MAX_CPUS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub cpu_count: u32,
    /// Width of the real address space. e500v2 has 36 physical address bits.
    pub phys_addr_bits: u32,
    /// Template for every core; `cpu_id` is overwritten per core.
    pub cpu: CpuConfig,
    /// Targets registered on top of the default `ddr0` that spans the whole space.
    pub memory_targets: Vec<TargetConfig>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpu_count: 2,
            phys_addr_bits: 36,
            cpu: CpuConfig::default(),
            memory_targets: Vec::new(),
        }
    }
}

impl MachineConfig {
    /// Parses and validates a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MachineError::InvalidConfig(msg));
        if self.cpu_count == 0 || self.cpu_count > MAX_CPUS {
            return invalid(format!("cpu_count must be 1..={MAX_CPUS}, got {}", self.cpu_count));
        }
        if !(32..=64).contains(&self.phys_addr_bits) {
            return invalid(format!(
                "phys_addr_bits must be 32..=64, got {}",
                self.phys_addr_bits
            ));
        }
        if self.cpu.batch_instrs == 0 {
            return invalid("cpu.batch_instrs must be non-zero".to_string());
        }
        if !self.cpu.cache_line_size.is_power_of_two() || self.cpu.cache_line_size < 4 {
            return invalid(format!(
                "cpu.cache_line_size must be a power of two >= 4, got {}",
                self.cpu.cache_line_size
            ));
        }
        self.cpu.mmu.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_the_default() {
        assert_eq!(MachineConfig::from_json_str("{}").unwrap(), MachineConfig::default());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = MachineConfig::from_json_str(
            r#"{
                "cpu_count": 4,
                "cpu": { "exec_mode": "threaded", "batch_instrs": 500 },
                "memory_targets": [
                    { "name": "ccsr", "kind": "ccsr", "base": 4276092928, "size": 1048576, "priority": 2 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.cpu_count, 4);
        assert_eq!(config.phys_addr_bits, 36);
        assert_eq!(config.cpu.batch_instrs, 500);
        assert_eq!(config.cpu.exec_mode, ppc_cpu_core::ExecMode::Threaded);
        assert_eq!(config.cpu.cache_line_size, 32);
        assert_eq!(config.memory_targets[0].name, "ccsr");
        assert_eq!(config.memory_targets[0].priority, 2);
    }

    #[test]
    fn rejects_bad_values() {
        for json in [
            r#"{ "cpu_count": 0 }"#,
            r#"{ "cpu_count": 65 }"#,
            r#"{ "phys_addr_bits": 20 }"#,
            r#"{ "cpu": { "batch_instrs": 0 } }"#,
            r#"{ "cpu": { "cache_line_size": 24 } }"#,
        ] {
            assert!(
                matches!(MachineConfig::from_json_str(json), Err(MachineError::InvalidConfig(_))),
                "{json}"
            );
        }
        assert!(matches!(
            MachineConfig::from_json_str("{ not json"),
            Err(MachineError::ParseConfig(_))
        ));
    }

    #[test]
    fn json_round_trip() {
        let config = MachineConfig {
            cpu_count: 1,
            ..MachineConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(MachineConfig::from_json_str(&json).unwrap(), config);
    }
}
