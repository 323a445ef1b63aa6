//! Loads, stores, load-reserve/store-conditional and data cache block operations.

use super::{illegal, Handler, HandlerResult};
use crate::core::CpuCore;
use crate::decoder::{DecodedInstruction as Insn, Opcode};
use crate::exception::PpcException;
use crate::regs::{cr, xer};

pub(super) const HANDLERS: &[(Opcode, Handler)] = &[
    (Opcode::Lbz, lbz),
    (Opcode::Lbzu, lbzu),
    (Opcode::Lbzx, lbzx),
    (Opcode::Lbzux, lbzux),
    (Opcode::Lhz, lhz),
    (Opcode::Lhzu, lhzu),
    (Opcode::Lhzx, lhzx),
    (Opcode::Lhzux, lhzux),
    (Opcode::Lha, lha),
    (Opcode::Lhau, lhau),
    (Opcode::Lhax, lhax),
    (Opcode::Lhaux, lhaux),
    (Opcode::Lwz, lwz),
    (Opcode::Lwzu, lwzu),
    (Opcode::Lwzx, lwzx),
    (Opcode::Lwzux, lwzux),
    (Opcode::Lhbrx, lhbrx),
    (Opcode::Lwbrx, lwbrx),
    (Opcode::Stb, stb),
    (Opcode::Stbu, stbu),
    (Opcode::Stbx, stbx),
    (Opcode::Stbux, stbux),
    (Opcode::Sth, sth),
    (Opcode::Sthu, sthu),
    (Opcode::Sthx, sthx),
    (Opcode::Sthux, sthux),
    (Opcode::Stw, stw),
    (Opcode::Stwu, stwu),
    (Opcode::Stwx, stwx),
    (Opcode::Stwux, stwux),
    (Opcode::Sthbrx, sthbrx),
    (Opcode::Stwbrx, stwbrx),
    (Opcode::Lmw, lmw),
    (Opcode::Stmw, stmw),
    (Opcode::Lwarx, lwarx),
    (Opcode::StwcxRc, stwcx),
    (Opcode::Dcbz, dcbz),
    (Opcode::Dcbi, cache_hint),
    (Opcode::Dcbf, cache_hint),
    (Opcode::Dcbst, cache_hint),
    (Opcode::Dcbt, cache_hint),
    (Opcode::Dcbtst, cache_hint),
];

/// Data cache block size used by `dcbz`.
const CACHE_LINE: u64 = 32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Addr {
    /// `(rA|0) + d`
    Disp,
    /// `(rA|0) + rB`
    Indexed,
}

#[inline]
fn effective_address(core: &CpuCore, i: &Insn, addr: Addr) -> u64 {
    let base = core.state.gpr_or_zero(i.ra());
    let offset = match addr {
        Addr::Disp => i.simm() as u32,
        Addr::Indexed => core.state.gpr32(i.rb()),
    };
    u64::from(base.wrapping_add(offset))
}

#[derive(Clone, Copy)]
struct Load {
    size: usize,
    signed: bool,
    reverse: bool,
}

const BYTE: Load = Load { size: 1, signed: false, reverse: false };
const HALF: Load = Load { size: 2, signed: false, reverse: false };
const HALF_ALG: Load = Load { size: 2, signed: true, reverse: false };
const WORD: Load = Load { size: 4, signed: false, reverse: false };
const HALF_REV: Load = Load { size: 2, signed: false, reverse: true };
const WORD_REV: Load = Load { size: 4, signed: false, reverse: true };

fn load(core: &mut CpuCore, i: &Insn, addr: Addr, kind: Load, update: bool) -> HandlerResult {
    if update && (i.ra() == 0 || i.ra() == i.rt()) {
        return Err(illegal());
    }
    let ea = effective_address(core, i, addr);
    let raw = core.load(ea, kind.size, kind.reverse)?;
    let value = if kind.signed && kind.size == 2 {
        raw as u16 as i16 as i32 as u32
    } else {
        raw as u32
    };
    core.state.set_gpr32(i.rt(), value);
    if update {
        core.state.set_gpr32(i.ra(), ea as u32);
    }
    Ok(())
}

fn store(core: &mut CpuCore, i: &Insn, addr: Addr, size: usize, reverse: bool, update: bool) -> HandlerResult {
    if update && i.ra() == 0 {
        return Err(illegal());
    }
    let ea = effective_address(core, i, addr);
    let value = u64::from(core.state.gpr32(i.rs()));
    core.store(ea, size, value, reverse)?;
    if update {
        core.state.set_gpr32(i.ra(), ea as u32);
    }
    Ok(())
}

fn lbz(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, BYTE, false)
}

fn lbzu(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, BYTE, true)
}

fn lbzx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, BYTE, false)
}

fn lbzux(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, BYTE, true)
}

fn lhz(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, HALF, false)
}

fn lhzu(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, HALF, true)
}

fn lhzx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, HALF, false)
}

fn lhzux(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, HALF, true)
}

fn lha(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, HALF_ALG, false)
}

fn lhau(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, HALF_ALG, true)
}

fn lhax(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, HALF_ALG, false)
}

fn lhaux(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, HALF_ALG, true)
}

fn lwz(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, WORD, false)
}

fn lwzu(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Disp, WORD, true)
}

fn lwzx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, WORD, false)
}

fn lwzux(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, WORD, true)
}

fn lhbrx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, HALF_REV, false)
}

fn lwbrx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    load(c, i, Addr::Indexed, WORD_REV, false)
}

fn stb(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Disp, 1, false, false)
}

fn stbu(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Disp, 1, false, true)
}

fn stbx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 1, false, false)
}

fn stbux(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 1, false, true)
}

fn sth(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Disp, 2, false, false)
}

fn sthu(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Disp, 2, false, true)
}

fn sthx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 2, false, false)
}

fn sthux(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 2, false, true)
}

fn stw(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Disp, 4, false, false)
}

fn stwu(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Disp, 4, false, true)
}

fn stwx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 4, false, false)
}

fn stwux(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 4, false, true)
}

fn sthbrx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 2, true, false)
}

fn stwbrx(c: &mut CpuCore, i: &Insn) -> HandlerResult {
    store(c, i, Addr::Indexed, 4, true, false)
}

fn lmw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    if i.ra() != 0 && i.ra() >= i.rt() {
        return Err(illegal());
    }
    let mut ea = effective_address(core, i, Addr::Disp);
    if ea & 3 != 0 {
        return Err(PpcException::alignment(ea, false).into());
    }
    for r in i.rt()..32 {
        let v = core.load_u32(ea)?;
        core.state.set_gpr32(r, v);
        ea = (ea + 4) & 0xffff_ffff;
    }
    Ok(())
}

fn stmw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let mut ea = effective_address(core, i, Addr::Disp);
    if ea & 3 != 0 {
        return Err(PpcException::alignment(ea, true).into());
    }
    for r in i.rs()..32 {
        let v = core.state.gpr32(r);
        core.store_u32(ea, v)?;
        ea = (ea + 4) & 0xffff_ffff;
    }
    Ok(())
}

fn lwarx(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let ea = effective_address(core, i, Addr::Indexed);
    if ea & 3 != 0 {
        return Err(PpcException::alignment(ea, false).into());
    }
    // Claim the line before reading it so a racing store either lands first or
    // cancels the claim.
    core.set_reservation(ea, 4)?;
    let v = core.load_u32(ea)?;
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn stwcx(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let ea = effective_address(core, i, Addr::Indexed);
    if ea & 3 != 0 {
        return Err(PpcException::alignment(ea, true).into());
    }
    let v = core.state.gpr32(i.rs());
    let ok = core.store_conditional(ea, 4, u64::from(v))?;
    let so = core.state.xer() & xer::SO != 0;
    let field = if ok { cr::EQ } else { 0 } | if so { cr::SO } else { 0 };
    core.state.set_cr_field(0, field);
    Ok(())
}

fn dcbz(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let ea = effective_address(core, i, Addr::Indexed) & !(CACHE_LINE - 1);
    core.write_bytes(ea, &[0u8; CACHE_LINE as usize])
}

/// Data cache is not modelled; `dcbi`'s privilege check happens at dispatch.
fn cache_hint(_core: &mut CpuCore, _i: &Insn) -> HandlerResult {
    Ok(())
}
