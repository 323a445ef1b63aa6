//! Integer arithmetic, logical, rotate, compare and CR-logical instructions.

use super::{Handler, HandlerResult};
use crate::core::CpuCore;
use crate::decoder::{DecodedInstruction as Insn, Opcode};

pub(super) const HANDLERS: &[(Opcode, Handler)] = &[
    (Opcode::Addi, addi),
    (Opcode::Addis, addis),
    (Opcode::Addic, addic),
    (Opcode::AddicRc, addic_rc),
    (Opcode::Subfic, subfic),
    (Opcode::Mulli, mulli),
    (Opcode::Add, add),
    (Opcode::Addc, addc),
    (Opcode::Adde, adde),
    (Opcode::Addze, addze),
    (Opcode::Addme, addme),
    (Opcode::Subf, subf),
    (Opcode::Subfc, subfc),
    (Opcode::Subfe, subfe),
    (Opcode::Subfze, subfze),
    (Opcode::Subfme, subfme),
    (Opcode::Neg, neg),
    (Opcode::Mullw, mullw),
    (Opcode::Mulhw, mulhw),
    (Opcode::Mulhwu, mulhwu),
    (Opcode::Divw, divw),
    (Opcode::Divwu, divwu),
    (Opcode::And, and),
    (Opcode::Andc, andc),
    (Opcode::Or, or),
    (Opcode::Orc, orc),
    (Opcode::Xor, xor),
    (Opcode::Nand, nand),
    (Opcode::Nor, nor),
    (Opcode::Eqv, eqv),
    (Opcode::Ori, ori),
    (Opcode::Oris, oris),
    (Opcode::Xori, xori),
    (Opcode::Xoris, xoris),
    (Opcode::AndiRc, andi_rc),
    (Opcode::AndisRc, andis_rc),
    (Opcode::Slw, slw),
    (Opcode::Srw, srw),
    (Opcode::Sraw, sraw),
    (Opcode::Srawi, srawi),
    (Opcode::Cntlzw, cntlzw),
    (Opcode::Extsb, extsb),
    (Opcode::Extsh, extsh),
    (Opcode::Rlwinm, rlwinm),
    (Opcode::Rlwnm, rlwnm),
    (Opcode::Rlwimi, rlwimi),
    (Opcode::Cmp, cmp),
    (Opcode::Cmpi, cmpi),
    (Opcode::Cmpl, cmpl),
    (Opcode::Cmpli, cmpli),
    (Opcode::Crand, crand),
    (Opcode::Crandc, crandc),
    (Opcode::Creqv, creqv),
    (Opcode::Crnand, crnand),
    (Opcode::Crnor, crnor),
    (Opcode::Cror, cror),
    (Opcode::Crorc, crorc),
    (Opcode::Crxor, crxor),
    (Opcode::Mcrf, mcrf),
];

/// `a + b + carry_in` with the carry out of bit 0 and signed overflow.
#[inline]
pub(crate) fn add_with_flags(a: u32, b: u32, carry_in: bool) -> (u32, bool, bool) {
    let (partial, c1) = a.overflowing_add(b);
    let (sum, c2) = partial.overflowing_add(u32::from(carry_in));
    let (signed, o1) = (a as i32).overflowing_add(b as i32);
    let (_, o2) = signed.overflowing_add(i32::from(carry_in));
    (sum, c1 | c2, o1 != o2)
}

/// 32-bit mask with ones from IBM bit `mb` through `me`, wrapping when `mb > me`.
#[inline]
pub(crate) fn rotate_mask(mb: u32, me: u32) -> u32 {
    let begin = u32::MAX >> mb;
    let end = u32::MAX << (31 - me);
    if mb <= me {
        begin & end
    } else {
        begin | end
    }
}

// ---- XO-form arithmetic ----

/// Writes `rt`, then applies the `OE` and `Rc` updates.
fn finish_xo(core: &mut CpuCore, i: &Insn, result: u32, ov: bool) {
    core.state.set_gpr32(i.rt(), result);
    if i.oe() {
        core.state.set_overflow(ov);
    }
    if i.rc() {
        core.state.record_cr0(result);
    }
}

fn carrying(core: &mut CpuCore, i: &Insn, a: u32, b: u32, cin: bool, set_ca: bool) -> HandlerResult {
    let (result, ca, ov) = add_with_flags(a, b, cin);
    if set_ca {
        core.state.set_carry(ca);
    }
    finish_xo(core, i, result, ov);
    Ok(())
}

fn add(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (a, b) = (core.state.gpr32(i.ra()), core.state.gpr32(i.rb()));
    carrying(core, i, a, b, false, false)
}

fn addc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (a, b) = (core.state.gpr32(i.ra()), core.state.gpr32(i.rb()));
    carrying(core, i, a, b, false, true)
}

fn adde(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (a, b) = (core.state.gpr32(i.ra()), core.state.gpr32(i.rb()));
    let ca = core.state.carry();
    carrying(core, i, a, b, ca, true)
}

fn addze(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    let ca = core.state.carry();
    carrying(core, i, a, 0, ca, true)
}

fn addme(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    let ca = core.state.carry();
    carrying(core, i, a, u32::MAX, ca, true)
}

fn subf(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (a, b) = (core.state.gpr32(i.ra()), core.state.gpr32(i.rb()));
    carrying(core, i, !a, b, true, false)
}

fn subfc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (a, b) = (core.state.gpr32(i.ra()), core.state.gpr32(i.rb()));
    carrying(core, i, !a, b, true, true)
}

fn subfe(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (a, b) = (core.state.gpr32(i.ra()), core.state.gpr32(i.rb()));
    let ca = core.state.carry();
    carrying(core, i, !a, b, ca, true)
}

fn subfze(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    let ca = core.state.carry();
    carrying(core, i, !a, 0, ca, true)
}

fn subfme(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    let ca = core.state.carry();
    carrying(core, i, !a, u32::MAX, ca, true)
}

fn neg(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    carrying(core, i, !a, 0, true, false)
}

fn mullw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra()) as i32 as i64;
    let b = core.state.gpr32(i.rb()) as i32 as i64;
    let product = a * b;
    finish_xo(core, i, product as u32, product != product as i32 as i64);
    Ok(())
}

fn mulhw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra()) as i32 as i64;
    let b = core.state.gpr32(i.rb()) as i32 as i64;
    finish_xo(core, i, ((a * b) >> 32) as u32, false);
    Ok(())
}

fn mulhwu(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = u64::from(core.state.gpr32(i.ra()));
    let b = u64::from(core.state.gpr32(i.rb()));
    finish_xo(core, i, ((a * b) >> 32) as u32, false);
    Ok(())
}

fn divw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra()) as i32;
    let b = core.state.gpr32(i.rb()) as i32;
    // Undefined quotients (divide by zero, MIN / -1) read back as zero.
    let (q, ov) = match a.checked_div(b) {
        Some(q) => (q as u32, false),
        None => (0, true),
    };
    finish_xo(core, i, q, ov);
    Ok(())
}

fn divwu(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    let b = core.state.gpr32(i.rb());
    let (q, ov) = match a.checked_div(b) {
        Some(q) => (q, false),
        None => (0, true),
    };
    finish_xo(core, i, q, ov);
    Ok(())
}

// ---- D-form arithmetic ----

fn addi(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let v = core.state.gpr_or_zero(i.ra()).wrapping_add(i.simm() as u32);
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn addis(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let v = core.state.gpr_or_zero(i.ra()).wrapping_add((i.simm() as u32) << 16);
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn addic(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (v, ca, _) = add_with_flags(core.state.gpr32(i.ra()), i.simm() as u32, false);
    core.state.set_carry(ca);
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn addic_rc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    addic(core, i)?;
    let v = core.state.gpr32(i.rt());
    core.state.record_cr0(v);
    Ok(())
}

fn subfic(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let (v, ca, _) = add_with_flags(!core.state.gpr32(i.ra()), i.simm() as u32, true);
    core.state.set_carry(ca);
    core.state.set_gpr32(i.rt(), v);
    Ok(())
}

fn mulli(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let v = (core.state.gpr32(i.ra()) as i32).wrapping_mul(i.simm());
    core.state.set_gpr32(i.rt(), v as u32);
    Ok(())
}

// ---- Logical ----

/// `ra = f(rs, rb)` with the optional CR0 update.
fn logical(core: &mut CpuCore, i: &Insn, f: impl Fn(u32, u32) -> u32) -> HandlerResult {
    let v = f(core.state.gpr32(i.rs()), core.state.gpr32(i.rb()));
    core.state.set_gpr32(i.ra(), v);
    if i.rc() {
        core.state.record_cr0(v);
    }
    Ok(())
}

fn and(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| s & b)
}

fn andc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| s & !b)
}

fn or(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| s | b)
}

fn orc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| s | !b)
}

fn xor(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| s ^ b)
}

fn nand(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| !(s & b))
}

fn nor(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| !(s | b))
}

fn eqv(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| !(s ^ b))
}

fn logical_imm(core: &mut CpuCore, i: &Insn, record: bool, f: impl Fn(u32, u32) -> u32) -> HandlerResult {
    let v = f(core.state.gpr32(i.rs()), i.uimm());
    core.state.set_gpr32(i.ra(), v);
    if record {
        core.state.record_cr0(v);
    }
    Ok(())
}

fn ori(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical_imm(core, i, false, |s, u| s | u)
}

fn oris(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical_imm(core, i, false, |s, u| s | (u << 16))
}

fn xori(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical_imm(core, i, false, |s, u| s ^ u)
}

fn xoris(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical_imm(core, i, false, |s, u| s ^ (u << 16))
}

fn andi_rc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical_imm(core, i, true, |s, u| s & u)
}

fn andis_rc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical_imm(core, i, true, |s, u| s & (u << 16))
}

fn unary(core: &mut CpuCore, i: &Insn, f: impl Fn(u32) -> u32) -> HandlerResult {
    let v = f(core.state.gpr32(i.rs()));
    core.state.set_gpr32(i.ra(), v);
    if i.rc() {
        core.state.record_cr0(v);
    }
    Ok(())
}

fn cntlzw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    unary(core, i, u32::leading_zeros)
}

fn extsb(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    unary(core, i, |s| s as u8 as i8 as i32 as u32)
}

fn extsh(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    unary(core, i, |s| s as u16 as i16 as i32 as u32)
}

// ---- Shifts and rotates ----

fn slw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| {
        let n = b & 0x3f;
        if n > 31 {
            0
        } else {
            s << n
        }
    })
}

fn srw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    logical(core, i, |s, b| {
        let n = b & 0x3f;
        if n > 31 {
            0
        } else {
            s >> n
        }
    })
}

/// Arithmetic right shift; `CA` is set when a negative value shifts out one bits.
fn shift_right_algebraic(core: &mut CpuCore, i: &Insn, n: u32) -> HandlerResult {
    let s = core.state.gpr32(i.rs()) as i32;
    let (v, ca) = if n > 31 {
        (if s < 0 { u32::MAX } else { 0 }, s < 0)
    } else {
        let lost = (s as u32) & ((1u32 << n).wrapping_sub(1));
        ((s >> n) as u32, s < 0 && lost != 0)
    };
    core.state.set_carry(ca);
    core.state.set_gpr32(i.ra(), v);
    if i.rc() {
        core.state.record_cr0(v);
    }
    Ok(())
}

fn sraw(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let n = core.state.gpr32(i.rb()) & 0x3f;
    shift_right_algebraic(core, i, n)
}

fn srawi(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    shift_right_algebraic(core, i, i.sh())
}

fn rotate(core: &mut CpuCore, i: &Insn, n: u32, insert: bool) -> HandlerResult {
    let rotated = core.state.gpr32(i.rs()).rotate_left(n & 31);
    let mask = rotate_mask(i.mb(), i.me());
    let v = if insert {
        (rotated & mask) | (core.state.gpr32(i.ra()) & !mask)
    } else {
        rotated & mask
    };
    core.state.set_gpr32(i.ra(), v);
    if i.rc() {
        core.state.record_cr0(v);
    }
    Ok(())
}

fn rlwinm(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    rotate(core, i, i.sh(), false)
}

fn rlwnm(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let n = core.state.gpr32(i.rb());
    rotate(core, i, n, false)
}

fn rlwimi(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    rotate(core, i, i.sh(), true)
}

// ---- Compares ----

fn cmp(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra()) as i32;
    let b = core.state.gpr32(i.rb()) as i32;
    core.state.record_compare(i.crfd(), a.cmp(&b));
    Ok(())
}

fn cmpi(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra()) as i32;
    core.state.record_compare(i.crfd(), a.cmp(&i.simm()));
    Ok(())
}

fn cmpl(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    let b = core.state.gpr32(i.rb());
    core.state.record_compare(i.crfd(), a.cmp(&b));
    Ok(())
}

fn cmpli(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let a = core.state.gpr32(i.ra());
    core.state.record_compare(i.crfd(), a.cmp(&i.uimm()));
    Ok(())
}

// ---- Condition register logical ----

fn cr_logical(core: &mut CpuCore, i: &Insn, f: impl Fn(bool, bool) -> bool) -> HandlerResult {
    let v = f(core.state.cr_bit(i.ra()), core.state.cr_bit(i.rb()));
    core.state.set_cr_bit(i.rt(), v);
    Ok(())
}

fn crand(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| a & b)
}

fn crandc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| a & !b)
}

fn creqv(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| a == b)
}

fn crnand(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| !(a & b))
}

fn crnor(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| !(a | b))
}

fn cror(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| a | b)
}

fn crorc(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| a | !b)
}

fn crxor(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    cr_logical(core, i, |a, b| a != b)
}

fn mcrf(core: &mut CpuCore, i: &Insn) -> HandlerResult {
    let v = core.state.cr_field(i.crfs());
    core.state.set_cr_field(i.crfd(), v);
    Ok(())
}

