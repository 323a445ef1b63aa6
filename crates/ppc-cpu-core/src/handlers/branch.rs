use super::{Handler, HandlerResult};
use crate::core::CpuCore;
use crate::decoder::{DecodedInstruction as Insn, Opcode};
use crate::regs::spr;

pub(super) const HANDLERS: &[(Opcode, Handler)] = &[
    (Opcode::B, b),
    (Opcode::Bc, bc),
    (Opcode::Bclr, bclr),
    (Opcode::Bcctr, bcctr),
];

const ADDR_MASK: u64 = 0xffff_ffff;

#[inline]
fn link(core: &mut CpuCore, i: &Insn) {
    if i.lk() {
        let ret = (core.state.pc + 4) & ADDR_MASK;
        core.state.set_spr32(spr::LR, ret as u32);
    }
}

/// Evaluates the BO/BI condition, decrementing CTR first when BO asks for it.
fn condition_holds(core: &mut CpuCore, i: &Insn, may_decrement: bool) -> bool {
    let bo = i.bo();
    let ctr_ok = if bo & 0x04 != 0 {
        true
    } else if may_decrement {
        let ctr = core.state.spr32(spr::CTR).wrapping_sub(1);
        core.state.set_spr32(spr::CTR, ctr);
        (ctr != 0) != (bo & 0x02 != 0)
    } else {
        // bcctr with the decrement bit clear is an invalid form; treat CTR as satisfied.
        true
    };
    let cond_ok = bo & 0x10 != 0 || core.state.cr_bit(i.bi()) == (bo & 0x08 != 0);
    ctr_ok && cond_ok
}

fn b(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let base = if i.aa() { 0 } else { core.state.pc };
    let target = base.wrapping_add(i.li() as i64 as u64) & ADDR_MASK;
    link(core, i);
    core.state.nip = target;
    Ok(())
}

fn bc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let taken = condition_holds(core, i, true);
    let base = if i.aa() { 0 } else { core.state.pc };
    let target = base.wrapping_add(i.bd() as i64 as u64) & ADDR_MASK;
    link(core, i);
    if taken {
        core.state.nip = target;
    }
    Ok(())
}

fn bclr(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let taken = condition_holds(core, i, true);
    // Read LR before `link` overwrites it.
    let target = u64::from(core.state.spr32(spr::LR) & !3);
    link(core, i);
    if taken {
        core.state.nip = target;
    }
    Ok(())
}

fn bcctr(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let taken = condition_holds(core, i, false);
    let target = u64::from(core.state.spr32(spr::CTR) & !3);
    link(core, i);
    if taken {
        core.state.nip = target;
    }
    Ok(())
}
