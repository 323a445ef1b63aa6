//! Time base and decrementer, advanced by retired instructions.

use crate::exception::{Cause, ExceptionKind, PpcException};
use crate::regs::{hid0, spr, Msr, Tcr, Tsr};
use crate::state::CpuState;

#[inline]
pub fn time_base(state: &CpuState) -> u64 {
    (u64::from(state.spr32(spr::TBU_R)) << 32) | u64::from(state.spr32(spr::TBL_R))
}

pub fn set_time_base(state: &mut CpuState, tb: u64) {
    state.set_spr32(spr::TBL_R, tb as u32);
    state.set_spr32(spr::TBU_R, (tb >> 32) as u32);
}

/// Advances TB and DEC by `ticks` while `HID0[TBEN]` is set. DEC stops at zero
/// unless `TCR[ARE]` reloads it from DECAR; reaching zero sets `TSR[DIS]`.
pub fn advance(state: &mut CpuState, ticks: u64) {
    if state.spr32(spr::HID0) & hid0::TBEN == 0 || ticks == 0 {
        return;
    }
    let tb = time_base(state).wrapping_add(ticks);
    set_time_base(state, tb);

    let dec = u64::from(state.spr32(spr::DEC));
    if dec == 0 {
        return;
    }
    if ticks < dec {
        state.set_spr32(spr::DEC, (dec - ticks) as u32);
        return;
    }
    let tsr = state.spr32(spr::TSR) | Tsr::DIS.bits();
    state.set_spr32(spr::TSR, tsr);
    let tcr = Tcr::from_bits_retain(state.spr32(spr::TCR));
    let reload = if tcr.contains(Tcr::ARE) {
        state.spr32(spr::DECAR)
    } else {
        0
    };
    state.set_spr32(spr::DEC, reload);
}

/// Decrementer interrupt that is both pending and enabled.
pub fn pending_interrupt(state: &CpuState) -> Option<PpcException> {
    let tsr = Tsr::from_bits_retain(state.spr32(spr::TSR));
    let tcr = Tcr::from_bits_retain(state.spr32(spr::TCR));
    let enabled = state.msr().contains(Msr::EE);
    (tsr.contains(Tsr::DIS) && tcr.contains(Tcr::DIE) && enabled)
        .then(|| PpcException::new(ExceptionKind::Decrementer, Cause::empty(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_state() -> CpuState {
        let mut s = CpuState::new(0);
        s.set_spr32(spr::HID0, hid0::TBEN);
        s
    }

    #[test]
    fn time_base_only_runs_when_enabled() {
        let mut s = CpuState::new(0);
        advance(&mut s, 10);
        assert_eq!(time_base(&s), 0);

        let mut s = enabled_state();
        set_time_base(&mut s, 0xffff_ffff);
        advance(&mut s, 1);
        assert_eq!(s.spr32(spr::TBU_R), 1);
        assert_eq!(s.spr32(spr::TBL_R), 0);
    }

    #[test]
    fn decrementer_expiry_sets_dis_and_reloads() {
        let mut s = enabled_state();
        s.set_spr32(spr::DEC, 2);
        s.set_spr32(spr::DECAR, 50);
        s.set_spr32(spr::TCR, (Tcr::ARE | Tcr::DIE).bits());

        advance(&mut s, 1);
        assert_eq!(s.spr32(spr::DEC), 1);
        assert_eq!(pending_interrupt(&s), None);

        advance(&mut s, 1);
        assert_eq!(s.spr32(spr::DEC), 50);
        assert!(Tsr::from_bits_retain(s.spr32(spr::TSR)).contains(Tsr::DIS));
        // MSR[EE] still clear.
        assert_eq!(pending_interrupt(&s), None);

        s.msr |= Msr::EE.bits();
        assert_eq!(
            pending_interrupt(&s).map(|e| e.kind),
            Some(ExceptionKind::Decrementer)
        );
    }

    #[test]
    fn decrementer_without_auto_reload_stops_at_zero() {
        let mut s = enabled_state();
        s.set_spr32(spr::DEC, 1);
        advance(&mut s, 5);
        assert_eq!(s.spr32(spr::DEC), 0);
        let before = s.spr32(spr::TSR);
        s.set_spr32(spr::TSR, 0);
        advance(&mut s, 5);
        assert_eq!(s.spr32(spr::TSR), 0, "no second expiry from zero (was {before:#x})");
    }
}
