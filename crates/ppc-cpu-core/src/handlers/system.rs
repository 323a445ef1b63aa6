//! Supervisor, SPR, MMU-management, synchronization and trap instructions.

use ppc_mmu::{AccessType, InvalidateKind, MasRegisters, TlbSelect, PID_MASK};
use tracing::{debug, trace};

use super::{illegal, Handler, HandlerResult};
use crate::core::{CpuCore, SyncRequest};
use crate::decoder::{DecodedInstruction as Insn, Opcode};
use crate::exception::{Cause, ExceptionKind, PpcException};
use crate::regs::{mmucsr0, spr, Dbcr0, Msr};

pub(super) const HANDLERS: &[(Opcode, Handler)] = &[
    (Opcode::Illegal, illegal_insn),
    (Opcode::Sc, sc),
    (Opcode::Rfi, rfi),
    (Opcode::Rfci, rfci),
    (Opcode::Rfmci, rfmci),
    (Opcode::Isync, isync),
    (Opcode::Msync, no_op),
    (Opcode::Mbar, no_op),
    (Opcode::Tlbsync, no_op),
    (Opcode::Mfspr, mfspr),
    (Opcode::Mtspr, mtspr),
    (Opcode::Mfmsr, mfmsr),
    (Opcode::Mtmsr, mtmsr),
    (Opcode::Wrtee, wrtee),
    (Opcode::Wrteei, wrteei),
    (Opcode::Mfcr, mfcr),
    (Opcode::Mtcrf, mtcrf),
    (Opcode::Tw, tw),
    (Opcode::Twi, twi),
    (Opcode::Tlbwe, tlbwe),
    (Opcode::Tlbre, tlbre),
    (Opcode::Tlbsx, tlbsx),
    (Opcode::Tlbivax, tlbivax),
    (Opcode::Icbi, icbi),
];

fn illegal_insn(_core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    Err(illegal())
}

fn no_op(_core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    Ok(())
}

fn sc(core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    // SRR0 must point past the `sc`.
    core.state.pc = (core.state.pc + 4) & 0xffff_ffff;
    core.request_sync(SyncRequest::CONTEXT);
    Err(PpcException::new(ExceptionKind::SystemCall, Cause::empty(), 0).into())
}

fn return_from(core: &mut CpuCore, save0: u16, save1: u16) -> HandlerResult {
    core.state.msr = core.state.spr32(save1);
    core.state.nip = u64::from(core.state.spr32(save0) & !3);
    core.request_sync(SyncRequest::CONTEXT);
    Ok(())
}

fn rfi(core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    return_from(core, spr::SRR0, spr::SRR1)
}

fn rfci(core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    return_from(core, spr::CSRR0, spr::CSRR1)
}

fn rfmci(core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    return_from(core, spr::MCSRR0, spr::MCSRR1)
}

fn isync(core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    core.request_sync(SyncRequest::CONTEXT);
    Ok(())
}

// ---- SPR access ----

/// Validates an SPR number for `mfspr`/`mtspr`: unknown numbers are illegal,
/// supervisor numbers need `MSR[PR]=0`.
fn check_spr(core: &CpuCore, n: u16) -> HandlerResult {
    if !spr::exists(n) {
        return Err(illegal());
    }
    if spr::is_privileged(n) && core.state.user_mode() {
        return Err(PpcException::program(Cause::PRIVILEGED).into());
    }
    Ok(())
}

fn mfspr(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let n = i.spr();
    check_spr(core, n)?;
    let source = match n {
        spr::SPRG4R..=spr::SPRG7R => n - spr::SPRG4R + spr::SPRG4,
        spr::TBL_W => spr::TBL_R,
        spr::TBU_W => spr::TBU_R,
        _ => n,
    };
    let v = core.state.spr32(source);
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn mtspr(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let n = i.spr();
    check_spr(core, n)?;
    let v = core.state.gpr32(i.rs());
    match n {
        spr::TBL_R | spr::TBU_R | spr::SPRG4R..=spr::SPRG7R => return Err(illegal()),
        spr::PIR | spr::PVR | spr::SVR | spr::TLB0CFG | spr::TLB1CFG | spr::MMUCFG => {
            trace!(spr = n, "write to read-only SPR ignored");
        }
        spr::TBL_W => core.state.set_spr32(spr::TBL_R, v),
        spr::TBU_W => core.state.set_spr32(spr::TBU_R, v),
        spr::DBSR | spr::TSR => {
            let cleared = core.state.spr32(n) & !v;
            core.state.set_spr32(n, cleared);
        }
        spr::MMUCSR0 => {
            if v & mmucsr0::TLB0_FI != 0 {
                core.mmu.invalidate(TlbSelect::Tlb0, InvalidateKind::Array);
            }
            if v & mmucsr0::TLB1_FI != 0 {
                core.mmu.invalidate(TlbSelect::Tlb1, InvalidateKind::ArrayExceptProtected);
            }
            // Flash invalidates complete immediately, so the bits read back as zero.
            core.state.set_spr32(n, 0);
            core.request_sync(SyncRequest::CONTEXT);
        }
        spr::PID0 | spr::PID1 | spr::PID2 => {
            core.state.set_spr32(n, v & PID_MASK);
            core.request_sync(SyncRequest::CONTEXT);
        }
        _ => core.state.set_spr32(n, v),
    }
    Ok(())
}

fn mfmsr(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let v = core.state.msr;
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn mtmsr(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    core.state.msr = core.state.gpr32(i.rs());
    core.request_sync(SyncRequest::CONTEXT);
    Ok(())
}

fn set_ee(core: &mut CpuCore, enabled: bool) {
    let mut msr = core.state.msr();
    msr.set(Msr::EE, enabled);
    core.state.msr = msr.bits();
}

fn wrtee(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let enabled = core.state.gpr32(i.rs()) & Msr::EE.bits() != 0;
    set_ee(core, enabled);
    Ok(())
}

fn wrteei(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    set_ee(core, i.e());
    Ok(())
}

fn mfcr(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let v = core.state.cr;
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn mtcrf(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let v = core.state.gpr32(i.rs());
    let crm = i.crm();
    let mut mask = 0u32;
    for field in 0..8 {
        if crm & (0x80 >> field) != 0 {
            mask |= 0xf000_0000 >> (field * 4);
        }
    }
    core.state.cr = (core.state.cr & !mask) | (v & mask);
    Ok(())
}

// ---- Traps ----

fn trap_if(core: &mut CpuCore, to: u32, a: u32, b: u32) -> HandlerResult {
    let (sa, sb) = (a as i32, b as i32);
    let hit = (to & 0x10 != 0 && sa < sb)
        || (to & 0x08 != 0 && sa > sb)
        || (to & 0x04 != 0 && a == b)
        || (to & 0x02 != 0 && a < b)
        || (to & 0x01 != 0 && a > b);
    if !hit {
        return Ok(());
    }
    let dbcr0 = Dbcr0::from_bits_retain(core.state.spr32(spr::DBCR0));
    let exc = if dbcr0.contains(Dbcr0::TRAP) {
        PpcException::new(ExceptionKind::Debug, Cause::DBG_TRAP, core.state.pc)
    } else {
        PpcException::program(Cause::TRAP)
    };
    Err(exc.into())
}

fn tw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (a, b) = (core.state.gpr32(i.ra()), core.state.gpr32(i.rb()));
    trap_if(core, i.to(), a, b)
}

fn twi(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    trap_if(core, i.to(), a, i.simm() as u32)
}

// ---- TLB management ----

fn mas_from_sprs(core: &CpuCore) -> MasRegisters {
    let s = &core.state;
    MasRegisters {
        mas0: s.spr32(spr::MAS0),
        mas1: s.spr32(spr::MAS1),
        mas2: s.spr32(spr::MAS2),
        mas3: s.spr32(spr::MAS3),
        mas6: s.spr32(spr::MAS6),
        mas7: s.spr32(spr::MAS7),
    }
}

fn mas_to_sprs(core: &mut CpuCore, mas: &MasRegisters) {
    let s = &mut core.state;
    s.set_spr32(spr::MAS0, mas.mas0);
    s.set_spr32(spr::MAS1, mas.mas1);
    s.set_spr32(spr::MAS2, mas.mas2);
    s.set_spr32(spr::MAS3, mas.mas3);
    s.set_spr32(spr::MAS7, mas.mas7);
}

fn tlbwe(core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    let mas = mas_from_sprs(core);
    let mas7_update = core.mas7_update();
    core.mmu.write_entry(&mas, mas7_update);
    core.request_sync(SyncRequest::CONTEXT);
    Ok(())
}

fn tlbre(core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    let mut mas = mas_from_sprs(core);
    let mas7_update = core.mas7_update();
    core.mmu.read_entry(&mut mas, mas7_update);
    mas_to_sprs(core, &mas);
    Ok(())
}

fn tlbsx(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let ea = core.state.gpr_or_zero(i.ra()).wrapping_add(core.state.gpr32(i.rb()));
    let mut mas = mas_from_sprs(core);
    let mas7_update = core.mas7_update();
    let hit = core.mmu.search(u64::from(ea), &mut mas, mas7_update);
    debug!(cpu = core.cpu_id(), ea = format_args!("{ea:#x}"), hit, "tlbsx");
    mas_to_sprs(core, &mas);
    Ok(())
}

fn tlbivax(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let ea = core.state.gpr_or_zero(i.ra()).wrapping_add(core.state.gpr32(i.rb()));
    core.mmu.tlbivax(u64::from(ea));
    core.request_sync(SyncRequest::CONTEXT);
    Ok(())
}

fn icbi(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let ea = core.state.gpr_or_zero(i.ra()).wrapping_add(core.state.gpr32(i.rb()));
    let t = core.translate_data(u64::from(ea), AccessType::Read)?;
    core.invalidated_pages.push(t.ra >> 12);
    core.request_sync(SyncRequest::ICACHE);
    Ok(())
}
