//! Instruction address compare debug events.

use crate::exception::Cause;
use crate::regs::{dbcr1, spr, Dbcr0, Msr};
use crate::state::CpuState;

/// Tri-state qualifier encoded in a two-bit DBCR1 field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    DontCare,
    RequireClear,
    RequireSet,
}

impl Qualifier {
    fn decode(dbcr1: u32, mask: u32) -> Self {
        match (dbcr1 & mask) >> mask.trailing_zeros() {
            2 => Qualifier::RequireClear,
            3 => Qualifier::RequireSet,
            _ => Qualifier::DontCare,
        }
    }

    fn matches(self, bit: bool) -> bool {
        match self {
            Qualifier::DontCare => true,
            Qualifier::RequireClear => !bit,
            Qualifier::RequireSet => bit,
        }
    }
}

struct Comparator {
    enable: Dbcr0,
    addr: u16,
    user: u32,
    space: u32,
    event: Cause,
}

const COMPARATORS: [Comparator; 2] = [
    Comparator {
        enable: Dbcr0::IAC1,
        addr: spr::IAC1,
        user: dbcr1::IAC1US,
        space: dbcr1::IAC1ER,
        event: Cause::DBG_IAC1,
    },
    Comparator {
        enable: Dbcr0::IAC2,
        addr: spr::IAC2,
        user: dbcr1::IAC2US,
        space: dbcr1::IAC2ER,
        event: Cause::DBG_IAC2,
    },
];

/// Instruction address compare events that fire for an instruction at `pc`.
///
/// The privilege qualifier compares against `MSR[PR]` and the address-space qualifier
/// against `MSR[IS]`.
pub fn iac_events(state: &CpuState, pc: u64) -> Cause {
    let dbcr0 = Dbcr0::from_bits_retain(state.spr32(spr::DBCR0));
    if !dbcr0.intersects(Dbcr0::IAC1 | Dbcr0::IAC2) {
        return Cause::empty();
    }
    let dbcr1 = state.spr32(spr::DBCR1);
    let msr = state.msr();

    COMPARATORS
        .iter()
        .filter(|c| dbcr0.contains(c.enable))
        .filter(|c| state.spr[c.addr as usize] & 0xffff_fffc == pc & 0xffff_fffc)
        .filter(|c| Qualifier::decode(dbcr1, c.user).matches(msr.contains(Msr::PR)))
        .filter(|c| Qualifier::decode(dbcr1, c.space).matches(msr.contains(Msr::IS)))
        .fold(Cause::empty(), |acc, c| acc | c.event)
}

/// External debug mode: events halt the core instead of interrupting it.
#[inline]
pub fn external_debug_mode(state: &CpuState) -> bool {
    Dbcr0::from_bits_retain(state.spr32(spr::DBCR0)).contains(Dbcr0::EDM)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(pc: u64) -> CpuState {
        let mut s = CpuState::new(0);
        s.set_spr32(spr::DBCR0, (Dbcr0::IDM | Dbcr0::IAC1).bits());
        s.spr[spr::IAC1 as usize] = pc;
        s
    }

    #[test]
    fn fires_only_on_matching_address() {
        let s = armed(0x1000);
        assert_eq!(iac_events(&s, 0x1000), Cause::DBG_IAC1);
        assert_eq!(iac_events(&s, 0x1004), Cause::empty());
    }

    #[test]
    fn disabled_comparator_never_fires() {
        let mut s = armed(0x1000);
        s.set_spr32(spr::DBCR0, Dbcr0::IDM.bits());
        assert_eq!(iac_events(&s, 0x1000), Cause::empty());
    }

    #[test]
    fn privilege_qualifier_is_tri_state() {
        let mut s = armed(0x1000);
        // Supervisor-only.
        s.set_spr32(spr::DBCR1, 0x8000_0000);
        assert_eq!(iac_events(&s, 0x1000), Cause::DBG_IAC1);
        s.msr = Msr::PR.bits();
        assert_eq!(iac_events(&s, 0x1000), Cause::empty());
        // User-only.
        s.set_spr32(spr::DBCR1, 0xc000_0000);
        assert_eq!(iac_events(&s, 0x1000), Cause::DBG_IAC1);
        // Don't care.
        s.set_spr32(spr::DBCR1, 0x4000_0000);
        assert_eq!(iac_events(&s, 0x1000), Cause::DBG_IAC1);
    }

    #[test]
    fn address_space_qualifier_on_second_comparator() {
        let mut s = CpuState::new(0);
        s.set_spr32(spr::DBCR0, Dbcr0::IAC2.bits());
        s.spr[spr::IAC2 as usize] = 0x2000;
        s.set_spr32(spr::DBCR1, 0x0300_0000);
        assert_eq!(iac_events(&s, 0x2000), Cause::empty());
        s.msr = Msr::IS.bits();
        assert_eq!(iac_events(&s, 0x2000), Cause::DBG_IAC2);
    }
}
