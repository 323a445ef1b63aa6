//! Exception dispatch: register save, status recording, MSR update and vectoring.
//!
//! Dispatch does not prioritize exceptions against each other. The fetch loop raises at
//! most one exception per instruction in a fixed order (instruction translation,
//! breakpoints, debug events, then whatever the handler raises).

use tracing::{debug, warn};

use crate::exception::{Cause, ExceptionKind, FatalError, PpcException};
use crate::regs::{spefscr, spr, Dbcr0, Dbsr, Esr, Mcsr, Msr, Tcr, Tsr};
use crate::state::CpuState;

/// Outcome of handing an exception to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Registers were saved and `PC` now holds `vector`.
    Taken { vector: u64 },
    /// The exception is not currently pending (its enable is clear) or is not modelled.
    Ignored,
}

/// Save/restore register pair used by an exception class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveClass {
    Base,
    Critical,
    MachineCheck,
}

impl SaveClass {
    fn registers(self) -> (u16, u16) {
        match self {
            SaveClass::Base => (spr::SRR0, spr::SRR1),
            SaveClass::Critical => (spr::CSRR0, spr::CSRR1),
            SaveClass::MachineCheck => (spr::MCSRR0, spr::MCSRR1),
        }
    }
}

/// Vector for `kind`: `(IVPR & 0xffff) << 16 | (IVORn & 0xfff) << 4`.
pub fn vector_for(state: &CpuState, kind: ExceptionKind) -> u64 {
    let ivor = spr::ivor(kind.ivor()).map_or(0, |n| state.spr32(n));
    let ivpr = state.spr32(spr::IVPR);
    u64::from(((ivpr & 0xffff) << 16) | ((ivor & 0xfff) << 4))
}

fn esr_bits(cause: Cause) -> u32 {
    const MAP: &[(Cause, Esr)] = &[
        (Cause::STORE, Esr::ST),
        (Cause::DCACHE_LOCK, Esr::DLK),
        (Cause::ICACHE_LOCK, Esr::ILK),
        (Cause::BYTE_ORDER, Esr::BO),
        (Cause::SPE, Esr::SPV),
        (Cause::ILLEGAL, Esr::PIL),
        (Cause::PRIVILEGED, Esr::PPR),
        (Cause::TRAP, Esr::PTR),
        (Cause::UNIMPLEMENTED, Esr::PUO),
    ];
    MAP.iter()
        .filter(|(c, _)| cause.contains(*c))
        .fold(0, |acc, (_, e)| acc | e.bits())
}

fn mcsr_bits(cause: Cause) -> u32 {
    const MAP: &[(Cause, Mcsr)] = &[
        (Cause::MC_MCP, Mcsr::MCP),
        (Cause::MC_ICPERR, Mcsr::ICPERR),
        (Cause::MC_DCP_PERR, Mcsr::DCP_PERR),
        (Cause::MC_DCPERR, Mcsr::DCPERR),
        (Cause::MC_BUS_IAERR, Mcsr::BUS_IAERR),
        (Cause::MC_BUS_RAERR, Mcsr::BUS_RAERR),
        (Cause::MC_BUS_WAERR, Mcsr::BUS_WAERR),
        (Cause::MC_BUS_IBERR, Mcsr::BUS_IBERR),
        (Cause::MC_BUS_RBERR, Mcsr::BUS_RBERR),
        (Cause::MC_BUS_WBERR, Mcsr::BUS_WBERR),
        (Cause::MC_BUS_IPERR, Mcsr::BUS_IPERR),
        (Cause::MC_BUS_RPERR, Mcsr::BUS_RPERR),
    ];
    MAP.iter()
        .filter(|(c, _)| cause.contains(*c))
        .fold(0, |acc, (_, m)| acc | m.bits())
}

fn dbsr_bits(cause: Cause) -> u32 {
    const MAP: &[(Cause, Dbsr)] = &[
        (Cause::DBG_TRAP, Dbsr::TIE),
        (Cause::DBG_IAC1, Dbsr::IAC1),
        (Cause::DBG_IAC2, Dbsr::IAC2),
        (Cause::DBG_DAC1R, Dbsr::DAC1R),
        (Cause::DBG_DAC1W, Dbsr::DAC1W),
        (Cause::DBG_DAC2R, Dbsr::DAC2R),
        (Cause::DBG_DAC2W, Dbsr::DAC2W),
        (Cause::DBG_ICMP, Dbsr::IC),
        (Cause::DBG_BRT, Dbsr::BT),
        (Cause::DBG_RET, Dbsr::RET),
        (Cause::DBG_IRPT, Dbsr::IRPT),
        (Cause::DBG_UDE, Dbsr::UDE),
    ];
    MAP.iter()
        .filter(|(c, _)| cause.contains(*c))
        .fold(0, |acc, (_, d)| acc | d.bits())
}

fn embedded_fp_data_pending(fscr: u32) -> bool {
    use spefscr::*;
    (fscr & FINVE != 0 && fscr & (FINVH | FINV) != 0)
        || (fscr & FDBZE != 0 && fscr & (FDBZH | FDBZ) != 0)
        || (fscr & FUNFE != 0 && fscr & (FUNFH | FUNF) != 0)
        || (fscr & FOVFE != 0 && fscr & (FOVFH | FOVF) != 0)
}

fn embedded_fp_round_pending(fscr: u32) -> bool {
    use spefscr::*;
    (fscr & FINXE != 0 && fscr & (FGH | FXH | FG | FX) != 0) || matches!(fscr & FRMC, 2 | 3)
}

/// Delivers `exc` at the current `PC`.
///
/// A machine check while `MSR[ME]` is clear is a checkstop and the only fatal outcome.
pub fn deliver(state: &mut CpuState, exc: &PpcException) -> Result<Delivery, FatalError> {
    let msr = state.msr();
    let mut save_pc = state.pc;
    let mut extra_clear = Msr::empty();

    let class = match exc.kind {
        ExceptionKind::CriticalInput => {
            if !msr.contains(Msr::CE) {
                return Ok(ignored(exc, "MSR[CE] clear"));
            }
            extra_clear = Msr::CE;
            SaveClass::Critical
        }
        ExceptionKind::MachineCheck => {
            if !msr.contains(Msr::ME) {
                return Err(FatalError::Checkstop { pc: state.pc });
            }
            state.set_spr32(spr::MCAR, exc.ea as u32);
            let mcsr = state.spr32(spr::MCSR) | mcsr_bits(exc.cause);
            state.set_spr32(spr::MCSR, mcsr);
            extra_clear = Msr::ME;
            SaveClass::MachineCheck
        }
        ExceptionKind::DataStorage | ExceptionKind::Alignment | ExceptionKind::DataTlb => {
            state.set_spr32(spr::DEAR, exc.ea as u32);
            state.set_spr32(spr::ESR, esr_bits(exc.cause));
            SaveClass::Base
        }
        ExceptionKind::InstructionStorage | ExceptionKind::Program => {
            state.set_spr32(spr::ESR, esr_bits(exc.cause));
            SaveClass::Base
        }
        ExceptionKind::InstructionTlb | ExceptionKind::SystemCall => SaveClass::Base,
        ExceptionKind::ExternalInput => {
            if !msr.contains(Msr::EE) {
                return Ok(ignored(exc, "MSR[EE] clear"));
            }
            SaveClass::Base
        }
        ExceptionKind::Decrementer => {
            let pending = Tsr::from_bits_retain(state.spr32(spr::TSR)).contains(Tsr::DIS)
                && Tcr::from_bits_retain(state.spr32(spr::TCR)).contains(Tcr::DIE)
                && msr.contains(Msr::EE);
            if !pending {
                return Ok(ignored(exc, "decrementer not pending"));
            }
            SaveClass::Base
        }
        ExceptionKind::FixedInterval => {
            let pending = Tsr::from_bits_retain(state.spr32(spr::TSR)).contains(Tsr::FIS)
                && Tcr::from_bits_retain(state.spr32(spr::TCR)).contains(Tcr::FIE)
                && msr.contains(Msr::EE);
            if !pending {
                return Ok(ignored(exc, "fixed interval timer not pending"));
            }
            SaveClass::Base
        }
        ExceptionKind::Watchdog => {
            let pending = Tsr::from_bits_retain(state.spr32(spr::TSR)).contains(Tsr::WIS)
                && Tcr::from_bits_retain(state.spr32(spr::TCR)).contains(Tcr::WIE)
                && msr.contains(Msr::CE);
            if !pending {
                return Ok(ignored(exc, "watchdog not pending"));
            }
            extra_clear = Msr::CE;
            SaveClass::Critical
        }
        ExceptionKind::Debug => {
            let dbsr = dbsr_bits(exc.cause);
            let dbcr0 = Dbcr0::from_bits_retain(state.spr32(spr::DBCR0));
            if !dbcr0.contains(Dbcr0::IDM) {
                return Ok(ignored(exc, "DBCR0[IDM] clear"));
            }
            if !msr.contains(Msr::DE) {
                // Recorded as an imprecise event; delivered once software sets MSR[DE].
                let value = state.spr32(spr::DBSR) | dbsr | Dbsr::IDE.bits();
                state.set_spr32(spr::DBSR, value);
                return Ok(ignored(exc, "MSR[DE] clear"));
            }
            state.set_spr32(spr::DBSR, state.spr32(spr::DBSR) | dbsr);
            if exc
                .cause
                .intersects(Cause::DBG_ICMP | Cause::DBG_RET | Cause::DBG_UDE)
            {
                save_pc = state.pc.wrapping_add(4) & 0xffff_ffff;
            }
            extra_clear = Msr::DE;
            SaveClass::Critical
        }
        ExceptionKind::SpeUnavailable => {
            state.set_spr32(spr::ESR, Esr::SPV.bits());
            SaveClass::Base
        }
        ExceptionKind::EmbeddedFpData => {
            if !embedded_fp_data_pending(state.spr32(spr::SPEFSCR)) {
                return Ok(ignored(exc, "no enabled SPEFSCR data exception"));
            }
            state.set_spr32(spr::ESR, Esr::SPV.bits());
            SaveClass::Base
        }
        ExceptionKind::EmbeddedFpRound => {
            if !embedded_fp_round_pending(state.spr32(spr::SPEFSCR)) {
                return Ok(ignored(exc, "no enabled SPEFSCR round exception"));
            }
            state.set_spr32(spr::ESR, Esr::SPV.bits());
            SaveClass::Base
        }
        ExceptionKind::FpUnavailable => {
            return Ok(ignored(exc, "no classic FPU on e500v2"));
        }
        ExceptionKind::PerformanceMonitor
        | ExceptionKind::Doorbell
        | ExceptionKind::DoorbellCritical => {
            warn!(kind = ?exc.kind, pc = format_args!("{:#x}", state.pc), "exception class not modelled");
            return Ok(Delivery::Ignored);
        }
    };

    let (srr0, srr1) = class.registers();
    state.spr[srr0 as usize] = save_pc;
    state.spr[srr1 as usize] = u64::from(state.msr);
    state.msr &= !(Msr::INTERRUPT_CLEAR | extra_clear).bits();

    let vector = vector_for(state, exc.kind);
    debug!(
        kind = ?exc.kind,
        cause = ?exc.cause,
        pc = format_args!("{:#x}", state.pc),
        ea = format_args!("{:#x}", exc.ea),
        vector = format_args!("{vector:#x}"),
        "exception taken"
    );
    state.pc = vector;
    state.nip = vector;
    Ok(Delivery::Taken { vector })
}

fn ignored(exc: &PpcException, reason: &'static str) -> Delivery {
    match exc.kind {
        // Timer conditions are re-evaluated every batch.
        ExceptionKind::Decrementer | ExceptionKind::FixedInterval | ExceptionKind::Watchdog => {
            tracing::trace!(kind = ?exc.kind, reason, "exception ignored");
        }
        _ => warn!(kind = ?exc.kind, reason, "exception ignored"),
    }
    Delivery::Ignored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CpuState {
        let mut s = CpuState::new(0);
        s.set_spr32(spr::IVPR, 0x0001);
        for n in 0..16 {
            s.set_spr32(spr::IVOR0 + n, 0x10 * u32::from(n + 1));
        }
        for n in 0..4 {
            s.set_spr32(spr::IVOR32 + n, 0x200 + 0x10 * u32::from(n));
        }
        s.pc = 0x4000;
        s
    }

    #[test]
    fn data_tlb_miss_saves_dear_and_vectors_through_ivor13() {
        let mut s = state();
        s.msr = (Msr::PR | Msr::EE | Msr::DS | Msr::ME).bits();
        let exc = PpcException::new(ExceptionKind::DataTlb, Cause::STORE, 0xdead_0000);
        let d = deliver(&mut s, &exc).unwrap();

        let expected = (0x1 << 16) | (0xe0 << 4);
        assert_eq!(d, Delivery::Taken { vector: expected });
        assert_eq!(s.pc, expected);
        assert_eq!(s.spr32(spr::DEAR), 0xdead_0000);
        assert_eq!(s.spr32(spr::ESR), Esr::ST.bits());
        assert_eq!(s.spr[spr::SRR0 as usize], 0x4000);
        assert_eq!(
            s.spr32(spr::SRR1),
            (Msr::PR | Msr::EE | Msr::DS | Msr::ME).bits()
        );
        assert_eq!(s.msr, Msr::ME.bits());
    }

    #[test]
    fn gated_interrupts_are_dropped_without_side_effects() {
        let mut s = state();
        let exc = PpcException::new(ExceptionKind::ExternalInput, Cause::empty(), 0);
        assert_eq!(deliver(&mut s, &exc).unwrap(), Delivery::Ignored);
        assert_eq!(s.pc, 0x4000);
        assert_eq!(s.spr[spr::SRR0 as usize], 0);

        let crit = PpcException::new(ExceptionKind::CriticalInput, Cause::empty(), 0);
        assert_eq!(deliver(&mut s, &crit).unwrap(), Delivery::Ignored);

        let fpu = PpcException::new(ExceptionKind::FpUnavailable, Cause::empty(), 0);
        assert_eq!(deliver(&mut s, &fpu).unwrap(), Delivery::Ignored);
    }

    #[test]
    fn machine_check_without_me_is_a_checkstop() {
        let mut s = state();
        let exc = PpcException::new(ExceptionKind::MachineCheck, Cause::MC_MCP, 0x10);
        assert_eq!(
            deliver(&mut s, &exc),
            Err(FatalError::Checkstop { pc: 0x4000 })
        );

        s.msr = Msr::ME.bits();
        let exc = PpcException::new(
            ExceptionKind::MachineCheck,
            Cause::MC_MCP | Cause::MC_BUS_RAERR,
            0x10,
        );
        assert!(matches!(deliver(&mut s, &exc), Ok(Delivery::Taken { .. })));
        assert_eq!(s.spr32(spr::MCSR), (Mcsr::MCP | Mcsr::BUS_RAERR).bits());
        assert_eq!(s.spr32(spr::MCAR), 0x10);
        assert_eq!(s.spr[spr::MCSRR0 as usize], 0x4000);
        assert_eq!(s.msr & Msr::ME.bits(), 0);
    }

    #[test]
    fn critical_class_uses_csrr_and_clears_ce() {
        let mut s = state();
        s.msr = (Msr::CE | Msr::EE).bits();
        let exc = PpcException::new(ExceptionKind::CriticalInput, Cause::empty(), 0);
        assert!(matches!(deliver(&mut s, &exc), Ok(Delivery::Taken { .. })));
        assert_eq!(s.spr[spr::CSRR0 as usize], 0x4000);
        assert_eq!(s.msr, 0);
        assert_eq!(s.spr[spr::SRR0 as usize], 0);
    }

    #[test]
    fn decrementer_requires_status_enable_and_ee() {
        let mut s = state();
        s.msr = Msr::EE.bits();
        s.set_spr32(spr::TCR, Tcr::DIE.bits());
        let exc = PpcException::new(ExceptionKind::Decrementer, Cause::empty(), 0);
        assert_eq!(deliver(&mut s, &exc).unwrap(), Delivery::Ignored);

        s.set_spr32(spr::TSR, Tsr::DIS.bits());
        let d = deliver(&mut s, &exc).unwrap();
        assert_eq!(d, Delivery::Taken { vector: (1 << 16) | (0xb0 << 4) });
    }

    #[test]
    fn debug_events_record_dbsr_and_adjust_save_address() {
        let mut s = state();
        s.msr = Msr::DE.bits();
        let exc = PpcException::new(ExceptionKind::Debug, Cause::DBG_IAC1, 0x4000);
        assert_eq!(deliver(&mut s, &exc).unwrap(), Delivery::Ignored, "IDM clear");

        s.set_spr32(spr::DBCR0, Dbcr0::IDM.bits());
        assert!(matches!(deliver(&mut s, &exc), Ok(Delivery::Taken { .. })));
        assert_eq!(s.spr32(spr::DBSR), Dbsr::IAC1.bits());
        assert_eq!(s.spr[spr::CSRR0 as usize], 0x4000);
        assert_eq!(s.msr & Msr::DE.bits(), 0);

        let mut s2 = state();
        s2.msr = Msr::DE.bits();
        s2.set_spr32(spr::DBCR0, Dbcr0::IDM.bits());
        let icmp = PpcException::new(ExceptionKind::Debug, Cause::DBG_ICMP, 0x4000);
        assert!(matches!(deliver(&mut s2, &icmp), Ok(Delivery::Taken { .. })));
        assert_eq!(s2.spr[spr::CSRR0 as usize], 0x4004);
        assert_eq!(s2.spr32(spr::DBSR), Dbsr::IC.bits());
    }

    #[test]
    fn debug_with_de_clear_is_recorded_as_imprecise() {
        let mut s = state();
        s.set_spr32(spr::DBCR0, Dbcr0::IDM.bits());
        let exc = PpcException::new(ExceptionKind::Debug, Cause::DBG_TRAP, 0);
        assert_eq!(deliver(&mut s, &exc).unwrap(), Delivery::Ignored);
        assert_eq!(s.spr32(spr::DBSR), (Dbsr::IDE | Dbsr::TIE).bits());
        assert_eq!(s.pc, 0x4000);
    }

    #[test]
    fn embedded_fp_exceptions_need_enabled_status() {
        let mut s = state();
        let data = PpcException::new(ExceptionKind::EmbeddedFpData, Cause::empty(), 0);
        assert_eq!(deliver(&mut s, &data).unwrap(), Delivery::Ignored);

        s.set_spr32(spr::SPEFSCR, spefscr::FDBZE | spefscr::FDBZ);
        assert!(matches!(deliver(&mut s, &data), Ok(Delivery::Taken { .. })));
        assert_eq!(s.spr32(spr::ESR), Esr::SPV.bits());

        let mut s = state();
        s.set_spr32(spr::SPEFSCR, 2);
        let round = PpcException::new(ExceptionKind::EmbeddedFpRound, Cause::empty(), 0);
        let d = deliver(&mut s, &round).unwrap();
        assert_eq!(d, Delivery::Taken { vector: (1 << 16) | (0x220 << 4) });
    }

    #[test]
    fn program_exception_status_bits() {
        let mut s = state();
        let exc = PpcException::program(Cause::PRIVILEGED);
        deliver(&mut s, &exc).unwrap();
        assert_eq!(s.spr32(spr::ESR), Esr::PPR.bits());
        assert_eq!(s.pc, (1 << 16) | (0x70 << 4));
    }
}
