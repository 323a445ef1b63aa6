use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: u64,
    pub ea: u64,
    pub hits: u64,
}

/// Software breakpoints of one core.
///
/// `last_breakpoint` remembers the address most recently trapped so that resuming
/// can execute exactly that instruction once with checks disabled.
#[derive(Debug)]
pub struct BreakpointManager {
    breakpoints: BTreeMap<u64, Breakpoint>,
    next_id: u64,
    enabled: bool,
    last: Option<u64>,
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            next_id: 0,
            enabled: true,
            last: None,
        }
    }

    /// Adds a breakpoint and returns its id. Re-adding an address keeps its id.
    pub fn add(&mut self, ea: u64) -> u64 {
        let ea = ea & 0xffff_ffff;
        if let Some(bp) = self.breakpoints.get(&ea) {
            return bp.id;
        }
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.breakpoints.insert(ea, Breakpoint { id, ea, hits: 0 });
        id
    }

    pub fn delete(&mut self, ea: u64) -> bool {
        self.breakpoints.remove(&(ea & 0xffff_ffff)).is_some()
    }

    pub fn delete_by_id(&mut self, id: u64) -> bool {
        let Some(ea) = self
            .breakpoints
            .values()
            .find(|bp| bp.id == id)
            .map(|bp| bp.ea)
        else {
            return false;
        };
        self.breakpoints.remove(&ea);
        true
    }

    /// Removes every breakpoint and restarts id numbering.
    pub fn delete_all(&mut self) {
        self.breakpoints.clear();
        self.next_id = 0;
        self.last = None;
    }

    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().copied().collect()
    }

    pub fn get(&self, ea: u64) -> Option<&Breakpoint> {
        self.breakpoints.get(&(ea & 0xffff_ffff))
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_breakpoint(&self) -> Option<u64> {
        self.last
    }

    pub fn clear_last_breakpoint(&mut self) {
        self.last = None;
    }

    /// Returns true if fetching `pc` hits an enabled breakpoint, counting the hit.
    pub fn check_pc(&mut self, pc: u64) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(bp) = self.breakpoints.get_mut(&(pc & 0xffff_ffff)) else {
            return false;
        };
        bp.hits += 1;
        self.last = Some(bp.ea);
        true
    }
}
