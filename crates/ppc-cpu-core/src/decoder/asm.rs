//! Single-instruction text assembler.
//!
//! Accepts the base mnemonics of the opcode table with their `.`, `o`, `l` and `a`
//! suffixes, plus the common simplified mnemonics. Branch targets are absolute
//! addresses; relative displacements are computed against the assembly `pc`.

use super::opcodes::{Form, OpFlags, Opcode};
use super::DecodeError;
use crate::regs::spr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Reg(u32),
    Cr(u32),
    Imm(i64),
    Mem { disp: i64, base: u32 },
    Name(String),
}

#[derive(Debug, Clone, Copy, Default)]
struct Suffix {
    rc: bool,
    oe: bool,
    lk: bool,
    aa: bool,
}

fn parse_number(text: &str) -> Option<i64> {
    let (neg, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = body.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = body.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if neg { -value } else { value })
}

fn parse_reg(text: &str) -> Option<u32> {
    let text = text.strip_prefix('%').unwrap_or(text);
    text.strip_prefix('r')
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|&n| n < 32)
}

fn parse_operand(text: &str) -> Option<Operand> {
    let text = text.trim();
    if let Some(open) = text.find('(') {
        let inner = text[open + 1..].strip_suffix(')')?;
        let base = parse_reg(inner.trim()).or_else(|| {
            parse_number(inner.trim())
                .filter(|n| (0..32).contains(n))
                .map(|n| n as u32)
        })?;
        let disp_text = text[..open].trim();
        let disp = if disp_text.is_empty() {
            0
        } else {
            parse_number(disp_text)?
        };
        return Some(Operand::Mem { disp, base });
    }
    if let Some(n) = parse_reg(text) {
        return Some(Operand::Reg(n));
    }
    if let Some(n) = text
        .strip_prefix("cr")
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|&n| n < 8)
    {
        return Some(Operand::Cr(n));
    }
    if let Some(n) = parse_number(text) {
        return Some(Operand::Imm(n));
    }
    let is_name = !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_name.then(|| Operand::Name(text.to_string()))
}

struct Operands<'a> {
    mnemonic: &'a str,
    ops: Vec<Operand>,
}

impl Operands<'_> {
    fn expect(&self, n: usize) -> Result<(), DecodeError> {
        if self.ops.len() == n {
            Ok(())
        } else {
            Err(DecodeError::OperandCount {
                mnemonic: self.mnemonic.to_string(),
                expected: n,
                got: self.ops.len(),
            })
        }
    }

    fn bad(&self, i: usize) -> DecodeError {
        DecodeError::BadOperand {
            mnemonic: self.mnemonic.to_string(),
            operand: format!("{:?}", self.ops.get(i)),
        }
    }

    fn range(&self, value: i64) -> DecodeError {
        DecodeError::OutOfRange {
            mnemonic: self.mnemonic.to_string(),
            value,
        }
    }

    fn reg(&self, i: usize) -> Result<u32, DecodeError> {
        match self.ops.get(i) {
            Some(Operand::Reg(n)) => Ok(*n),
            Some(Operand::Imm(n)) if (0..32).contains(n) => Ok(*n as u32),
            _ => Err(self.bad(i)),
        }
    }

    fn imm(&self, i: usize) -> Result<i64, DecodeError> {
        match self.ops.get(i) {
            Some(Operand::Imm(n)) => Ok(*n),
            _ => Err(self.bad(i)),
        }
    }

    /// Unsigned field of `bits` width (register-like operands accepted).
    fn field(&self, i: usize, bits: u32) -> Result<u32, DecodeError> {
        let value = match self.ops.get(i) {
            Some(Operand::Imm(n)) => *n,
            Some(Operand::Reg(n)) | Some(Operand::Cr(n)) => i64::from(*n),
            _ => return Err(self.bad(i)),
        };
        if (0..(1i64 << bits)).contains(&value) {
            Ok(value as u32)
        } else {
            Err(self.range(value))
        }
    }

    fn crf(&self, i: usize) -> Result<u32, DecodeError> {
        match self.ops.get(i) {
            Some(Operand::Cr(n)) => Ok(*n),
            Some(Operand::Imm(n)) if (0..8).contains(n) => Ok(*n as u32),
            _ => Err(self.bad(i)),
        }
    }

    fn simm(&self, i: usize) -> Result<u32, DecodeError> {
        let v = self.imm(i)?;
        if (-0x8000..=0xffff).contains(&v) {
            Ok(v as u32 & 0xffff)
        } else {
            Err(self.range(v))
        }
    }

    fn uimm(&self, i: usize) -> Result<u32, DecodeError> {
        let v = self.imm(i)?;
        if (0..=0xffff).contains(&v) {
            Ok(v as u32)
        } else {
            Err(self.range(v))
        }
    }

    fn mem(&self, i: usize) -> Result<(u32, u32), DecodeError> {
        match self.ops.get(i) {
            Some(Operand::Mem { disp, base }) if (-0x8000..=0x7fff).contains(disp) => {
                Ok((*disp as u32 & 0xffff, *base))
            }
            Some(Operand::Mem { disp, .. }) => Err(self.range(*disp)),
            _ => Err(self.bad(i)),
        }
    }

    fn spr(&self, i: usize) -> Result<u32, DecodeError> {
        let n = match self.ops.get(i) {
            Some(Operand::Imm(n)) if (0..1024).contains(n) => *n as u16,
            Some(Operand::Name(name)) => spr::by_name(name).ok_or_else(|| self.bad(i))?,
            _ => return Err(self.bad(i)),
        };
        let n = u32::from(n);
        Ok(((n & 31) << 16) | ((n >> 5) << 11))
    }

    /// Branch displacement field for an absolute `target`, `bits` wide including the
    /// two implied zero bits.
    fn target(&self, i: usize, pc: u64, aa: bool, bits: u32) -> Result<u32, DecodeError> {
        let target = self.imm(i)?;
        let disp = if aa {
            target
        } else {
            let pc = (pc & 0xffff_ffff) as i64;
            let mut d = (target & 0xffff_ffff) - pc;
            // Wrap within the 32-bit effective address space.
            if d > 0x7fff_ffff {
                d -= 1 << 32;
            } else if d < -0x8000_0000 {
                d += 1 << 32;
            }
            d
        };
        let half = 1i64 << (bits - 1);
        if disp & 3 != 0 || disp < -half || disp >= half {
            return Err(self.range(target));
        }
        Ok(disp as u32 & (((1u64 << bits) - 1) as u32) & !3)
    }
}

fn resolve(mnemonic: &str) -> Option<(Opcode, Suffix)> {
    if let Some(op) = Opcode::by_mnemonic(mnemonic) {
        return Some((op, Suffix::default()));
    }
    let mut sfx = Suffix::default();
    let mut base = mnemonic;
    if let Some(b) = base.strip_suffix('.') {
        base = b;
        sfx.rc = true;
    }
    let accepts = |op: Opcode, sfx: &Suffix| {
        let flags = op.info().flags;
        (!sfx.rc || flags.contains(OpFlags::RC))
            && (!sfx.oe || flags.contains(OpFlags::OE))
            && (!sfx.lk || flags.contains(OpFlags::LK))
            && (!sfx.aa || flags.contains(OpFlags::AA))
    };
    if let Some(op) = Opcode::by_mnemonic(base) {
        return accepts(op, &sfx).then_some((op, sfx));
    }
    if let Some(b) = base.strip_suffix('o') {
        let sfx = Suffix { oe: true, ..sfx };
        if let Some(op) = Opcode::by_mnemonic(b).filter(|&op| accepts(op, &sfx)) {
            return Some((op, sfx));
        }
    }
    let mut branch = base;
    let mut bsfx = sfx;
    if let Some(b) = branch.strip_suffix('a') {
        branch = b;
        bsfx.aa = true;
    }
    if let Some(b) = branch.strip_suffix('l') {
        branch = b;
        bsfx.lk = true;
    }
    Opcode::by_mnemonic(branch)
        .filter(|&op| (bsfx.aa || bsfx.lk) && accepts(op, &bsfx))
        .map(|op| (op, bsfx))
}

const CONDITIONS: &[(&str, u32, u32)] = &[
    // (suffix, BO, CR bit within the field)
    ("lt", 12, 0),
    ("gt", 12, 1),
    ("eq", 12, 2),
    ("so", 12, 3),
    ("ge", 4, 0),
    ("nl", 4, 0),
    ("le", 4, 1),
    ("ng", 4, 1),
    ("ne", 4, 2),
    ("ns", 4, 3),
];

/// Rewrites a simplified mnemonic into its base form, or returns `None`.
fn expand(mnemonic: &str, ops: &[Operand]) -> Option<(String, Vec<Operand>)> {
    use Operand::{Imm, Reg};

    let (name, dot) = match mnemonic.strip_suffix('.') {
        Some(n) => (n, "."),
        None => (mnemonic, ""),
    };
    let with_dot = |base: &str| format!("{base}{dot}");
    let r = |i: usize| ops.get(i).cloned();

    let expanded = match (name, ops.len()) {
        ("nop", 0) if dot.is_empty() => ("ori".into(), vec![Reg(0), Reg(0), Imm(0)]),
        ("li", 2) => ("addi".into(), vec![r(0)?, Reg(0), r(1)?]),
        ("lis", 2) => ("addis".into(), vec![r(0)?, Reg(0), r(1)?]),
        ("subi", 3) => match r(2)? {
            Imm(v) => ("addi".into(), vec![r(0)?, r(1)?, Imm(-v)]),
            _ => return None,
        },
        ("mr", 2) => (with_dot("or"), vec![r(0)?, r(1)?, r(1)?]),
        ("not", 2) => (with_dot("nor"), vec![r(0)?, r(1)?, r(1)?]),
        ("sub", 3) => (with_dot("subf"), vec![r(0)?, r(2)?, r(1)?]),
        ("slwi", 3) => match r(2)? {
            Imm(n @ 0..=31) => (with_dot("rlwinm"), vec![r(0)?, r(1)?, Imm(n), Imm(0), Imm(31 - n)]),
            _ => return None,
        },
        ("srwi", 3) => match r(2)? {
            Imm(n @ 0..=31) => (
                with_dot("rlwinm"),
                vec![r(0)?, r(1)?, Imm((32 - n) & 31), Imm(n), Imm(31)],
            ),
            _ => return None,
        },
        ("clrlwi", 3) => (with_dot("rlwinm"), vec![r(0)?, r(1)?, Imm(0), r(2)?, Imm(31)]),
        ("rotlwi", 3) => (with_dot("rlwinm"), vec![r(0)?, r(1)?, r(2)?, Imm(0), Imm(31)]),
        ("blr", 0) => ("bclr".into(), vec![Imm(20), Imm(0)]),
        ("blrl", 0) => ("bclrl".into(), vec![Imm(20), Imm(0)]),
        ("bctr", 0) => ("bcctr".into(), vec![Imm(20), Imm(0)]),
        ("bctrl", 0) => ("bcctrl".into(), vec![Imm(20), Imm(0)]),
        ("bdnz", 1) => ("bc".into(), vec![Imm(16), Imm(0), r(0)?]),
        ("bdz", 1) => ("bc".into(), vec![Imm(18), Imm(0), r(0)?]),
        ("bdnzlr", 0) => ("bclr".into(), vec![Imm(16), Imm(0)]),
        ("mflr", 1) => ("mfspr".into(), vec![r(0)?, Imm(i64::from(spr::LR))]),
        ("mtlr", 1) => ("mtspr".into(), vec![Imm(i64::from(spr::LR)), r(0)?]),
        ("mfctr", 1) => ("mfspr".into(), vec![r(0)?, Imm(i64::from(spr::CTR))]),
        ("mtctr", 1) => ("mtspr".into(), vec![Imm(i64::from(spr::CTR)), r(0)?]),
        ("mfxer", 1) => ("mfspr".into(), vec![r(0)?, Imm(i64::from(spr::XER))]),
        ("mtxer", 1) => ("mtspr".into(), vec![Imm(i64::from(spr::XER)), r(0)?]),
        ("mtcr", 1) => ("mtcrf".into(), vec![Imm(0xff), r(0)?]),
        ("cmpw" | "cmplw" | "cmpwi" | "cmplwi", 2 | 3) => {
            let base = match name {
                "cmpw" => "cmp",
                "cmplw" => "cmpl",
                "cmpwi" => "cmpi",
                _ => "cmpli",
            };
            let (crf, rest) = if ops.len() == 3 {
                (r(0)?, &ops[1..])
            } else {
                (Operand::Cr(0), ops)
            };
            (base.into(), vec![crf, Imm(0), rest[0].clone(), rest[1].clone()])
        }
        ("trap", 0) => ("tw".into(), vec![Imm(31), Reg(0), Reg(0)]),
        ("crclr", 1) => ("crxor".into(), vec![r(0)?, r(0)?, r(0)?]),
        ("crset", 1) => ("creqv".into(), vec![r(0)?, r(0)?, r(0)?]),
        ("crmove", 2) => ("cror".into(), vec![r(0)?, r(1)?, r(1)?]),
        ("crnot", 2) => ("crnor".into(), vec![r(0)?, r(1)?, r(1)?]),
        ("sync", 0) => ("msync".into(), vec![]),
        _ => return expand_conditional(mnemonic, ops),
    };
    Some(expanded)
}

/// `b<cond>[lr|ctr][l] [crN,] [target]`
fn expand_conditional(mnemonic: &str, ops: &[Operand]) -> Option<(String, Vec<Operand>)> {
    let rest = mnemonic.strip_prefix('b')?;
    let &(cond, bo, bit) = CONDITIONS.iter().find(|(c, _, _)| rest.starts_with(c))?;
    let tail = &rest[cond.len()..];
    let (base, link) = match tail {
        "" => ("bc", ""),
        "l" => ("bc", "l"),
        "lr" => ("bclr", ""),
        "lrl" => ("bclr", "l"),
        "ctr" => ("bcctr", ""),
        "ctrl" => ("bcctr", "l"),
        _ => return None,
    };
    let (crf, rest_ops) = match ops.first() {
        Some(Operand::Cr(n)) => (*n, &ops[1..]),
        _ => (0, ops),
    };
    let mut out = vec![Operand::Imm(i64::from(bo)), Operand::Imm(i64::from(crf * 4 + bit))];
    match (base, rest_ops) {
        ("bc", [target]) => out.push(target.clone()),
        ("bclr" | "bcctr", []) => {}
        _ => return None,
    }
    Some((format!("{base}{link}"), out))
}

/// Assembles one instruction at `pc` into its 32-bit encoding.
pub(super) fn assemble(text: &str, pc: u64) -> Result<u32, DecodeError> {
    let text = text.trim().to_ascii_lowercase();
    let (mnemonic, rest) = match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim()),
        None => (text.as_str(), ""),
    };
    let mut ops = Vec::new();
    if !rest.is_empty() {
        for part in rest.split(',') {
            let op = parse_operand(part).ok_or_else(|| DecodeError::BadOperand {
                mnemonic: mnemonic.to_string(),
                operand: part.trim().to_string(),
            })?;
            ops.push(op);
        }
    }

    let (mnemonic, ops) = if resolve(mnemonic).is_some() {
        (mnemonic.to_string(), ops)
    } else {
        expand(mnemonic, &ops).unwrap_or((mnemonic.to_string(), ops))
    };
    let (opcode, sfx) =
        resolve(&mnemonic).ok_or_else(|| DecodeError::UnknownMnemonic(mnemonic.clone()))?;
    encode(opcode, sfx, &Operands { mnemonic: &mnemonic, ops }, pc)
}

fn encode(opcode: Opcode, sfx: Suffix, o: &Operands<'_>, pc: u64) -> Result<u32, DecodeError> {
    let info = opcode.info();
    let base = info.encoding.base();
    let rc = u32::from(sfx.rc);
    let lk = u32::from(sfx.lk);
    let aa = u32::from(sfx.aa) << 1;
    let oe = u32::from(sfx.oe) << 10;

    let raw = match info.form {
        Form::Illegal => {
            o.expect(0)?;
            0
        }
        Form::DArith => {
            o.expect(3)?;
            base | o.reg(0)? << 21 | o.reg(1)? << 16 | o.simm(2)?
        }
        Form::DLogical => {
            o.expect(3)?;
            base | o.reg(1)? << 21 | o.reg(0)? << 16 | o.uimm(2)?
        }
        Form::DMem => {
            o.expect(2)?;
            let (disp, ra) = o.mem(1)?;
            base | o.reg(0)? << 21 | ra << 16 | disp
        }
        Form::DCmp | Form::DCmpl => {
            o.expect(4)?;
            let imm = if info.form == Form::DCmp { o.simm(3)? } else { o.uimm(3)? };
            base | o.crf(0)? << 23 | o.field(1, 1)? << 21 | o.reg(2)? << 16 | imm
        }
        Form::DTrap => {
            o.expect(3)?;
            base | o.field(0, 5)? << 21 | o.reg(1)? << 16 | o.simm(2)?
        }
        Form::I => {
            o.expect(1)?;
            base | o.target(0, pc, sfx.aa, 26)? | aa | lk
        }
        Form::B => {
            o.expect(3)?;
            base | o.field(0, 5)? << 21 | o.field(1, 5)? << 16 | o.target(2, pc, sfx.aa, 16)? | aa | lk
        }
        Form::Sc => {
            o.expect(0)?;
            base | 2
        }
        Form::XlBranch => {
            o.expect(2)?;
            base | o.field(0, 5)? << 21 | o.field(1, 5)? << 16 | lk
        }
        Form::XlCr => {
            o.expect(3)?;
            base | o.field(0, 5)? << 21 | o.field(1, 5)? << 16 | o.field(2, 5)? << 11
        }
        Form::XlCrf => {
            o.expect(2)?;
            base | o.crf(0)? << 23 | o.crf(1)? << 18
        }
        Form::XlNone | Form::XNone => {
            o.expect(0)?;
            base
        }
        Form::M => {
            o.expect(5)?;
            base | o.reg(1)? << 21
                | o.reg(0)? << 16
                | o.field(2, 5)? << 11
                | o.field(3, 5)? << 6
                | o.field(4, 5)? << 1
                | rc
        }
        Form::MReg => {
            o.expect(5)?;
            base | o.reg(1)? << 21
                | o.reg(0)? << 16
                | o.reg(2)? << 11
                | o.field(3, 5)? << 6
                | o.field(4, 5)? << 1
                | rc
        }
        Form::XLogical => {
            o.expect(3)?;
            base | o.reg(1)? << 21 | o.reg(0)? << 16 | o.reg(2)? << 11 | rc
        }
        Form::XUnary => {
            o.expect(2)?;
            base | o.reg(1)? << 21 | o.reg(0)? << 16 | rc
        }
        Form::XShImm => {
            o.expect(3)?;
            base | o.reg(1)? << 21 | o.reg(0)? << 16 | o.field(2, 5)? << 11 | rc
        }
        Form::Xo => {
            o.expect(3)?;
            base | o.reg(0)? << 21 | o.reg(1)? << 16 | o.reg(2)? << 11 | oe | rc
        }
        Form::XoUnary => {
            o.expect(2)?;
            base | o.reg(0)? << 21 | o.reg(1)? << 16 | oe | rc
        }
        Form::XCmp => {
            o.expect(4)?;
            base | o.crf(0)? << 23 | o.field(1, 1)? << 21 | o.reg(2)? << 16 | o.reg(3)? << 11
        }
        Form::XMem => {
            o.expect(3)?;
            let record = u32::from(opcode == Opcode::StwcxRc);
            base | o.reg(0)? << 21 | o.reg(1)? << 16 | o.reg(2)? << 11 | record
        }
        Form::XTrap => {
            o.expect(3)?;
            base | o.field(0, 5)? << 21 | o.reg(1)? << 16 | o.reg(2)? << 11
        }
        Form::XCache => {
            o.expect(2)?;
            base | o.reg(0)? << 16 | o.reg(1)? << 11
        }
        Form::Mfspr => {
            o.expect(2)?;
            base | o.reg(0)? << 21 | o.spr(1)?
        }
        Form::Mtspr => {
            o.expect(2)?;
            base | o.reg(1)? << 21 | o.spr(0)?
        }
        Form::XRt | Form::XRs => {
            o.expect(1)?;
            base | o.reg(0)? << 21
        }
        Form::Mtcrf => {
            o.expect(2)?;
            base | o.field(0, 8)? << 12 | o.reg(1)? << 21
        }
        Form::Wrteei => {
            o.expect(1)?;
            base | o.field(0, 1)? << 15
        }
    };
    Ok(raw)
}
