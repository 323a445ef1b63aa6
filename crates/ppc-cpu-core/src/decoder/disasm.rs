use std::fmt;

use super::{DecodedInstruction, Form, OpFlags};
use crate::regs::spr;

impl DecodedInstruction {
    /// Mnemonic including the `o`, `.`, `l` and `a` suffixes the word encodes.
    pub fn full_mnemonic(&self) -> String {
        let info = self.info();
        let mut m = String::from(info.mnemonic);
        if info.flags.contains(OpFlags::LK) {
            if self.lk() {
                m.push('l');
            }
            if info.flags.contains(OpFlags::AA) && self.aa() {
                m.push('a');
            }
        }
        if self.oe() {
            m.push('o');
        }
        if info.flags.contains(OpFlags::RC) && self.rc() {
            m.push('.');
        }
        m
    }

    /// Disassembly with branch targets resolved against `pc`.
    pub fn disassemble_at(&self, pc: u64) -> String {
        Disasm { insn: self, pc: Some(pc) }.to_string()
    }
}

struct Disasm<'a> {
    insn: &'a DecodedInstruction,
    pc: Option<u64>,
}

impl Disasm<'_> {
    fn target(&self, f: &mut fmt::Formatter<'_>, disp: i32) -> fmt::Result {
        let i = self.insn;
        match (i.aa(), self.pc) {
            (true, _) => write!(f, "0x{:x}", disp as u32),
            (false, Some(pc)) => write!(f, "0x{:x}", pc.wrapping_add(disp as i64 as u64) & 0xffff_ffff),
            (false, None) if disp < 0 => write!(f, ".-0x{:x}", -(disp as i64)),
            (false, None) => write!(f, ".+0x{disp:x}"),
        }
    }
}

fn spr_operand(n: u16) -> String {
    match spr::name(n) {
        Some(name) => name.to_string(),
        None => n.to_string(),
    }
}

impl fmt::Display for Disasm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let i = self.insn;
        let m = i.full_mnemonic();
        match i.info().form {
            Form::DArith => write!(f, "{m} r{}, r{}, {}", i.rt(), i.ra(), i.simm()),
            Form::DLogical => write!(f, "{m} r{}, r{}, 0x{:x}", i.ra(), i.rs(), i.uimm()),
            Form::DMem => write!(f, "{m} r{}, {}(r{})", i.rt(), i.simm(), i.ra()),
            Form::DCmp => write!(f, "{m} cr{}, {}, r{}, {}", i.crfd(), (i.raw >> 21) & 1, i.ra(), i.simm()),
            Form::DCmpl => write!(f, "{m} cr{}, {}, r{}, 0x{:x}", i.crfd(), (i.raw >> 21) & 1, i.ra(), i.uimm()),
            Form::DTrap => write!(f, "{m} {}, r{}, {}", i.to(), i.ra(), i.simm()),
            Form::I => {
                write!(f, "{m} ")?;
                self.target(f, i.li())
            }
            Form::B => {
                write!(f, "{m} {}, {}, ", i.bo(), i.bi())?;
                self.target(f, i.bd())
            }
            Form::XlBranch => write!(f, "{m} {}, {}", i.bo(), i.bi()),
            Form::XlCr => write!(f, "{m} {}, {}, {}", i.rt(), i.ra(), i.rb()),
            Form::XlCrf => write!(f, "{m} cr{}, cr{}", i.crfd(), i.crfs()),
            Form::M => write!(f, "{m} r{}, r{}, {}, {}, {}", i.ra(), i.rs(), i.sh(), i.mb(), i.me()),
            Form::MReg => write!(f, "{m} r{}, r{}, r{}, {}, {}", i.ra(), i.rs(), i.rb(), i.mb(), i.me()),
            Form::XLogical => write!(f, "{m} r{}, r{}, r{}", i.ra(), i.rs(), i.rb()),
            Form::XUnary => write!(f, "{m} r{}, r{}", i.ra(), i.rs()),
            Form::XShImm => write!(f, "{m} r{}, r{}, {}", i.ra(), i.rs(), i.sh()),
            Form::Xo | Form::XMem => write!(f, "{m} r{}, r{}, r{}", i.rt(), i.ra(), i.rb()),
            Form::XoUnary => write!(f, "{m} r{}, r{}", i.rt(), i.ra()),
            Form::XCmp => write!(f, "{m} cr{}, {}, r{}, r{}", i.crfd(), (i.raw >> 21) & 1, i.ra(), i.rb()),
            Form::XTrap => write!(f, "{m} {}, r{}, r{}", i.to(), i.ra(), i.rb()),
            Form::XCache => write!(f, "{m} r{}, r{}", i.ra(), i.rb()),
            Form::Mfspr => write!(f, "{m} r{}, {}", i.rt(), spr_operand(i.spr())),
            Form::Mtspr => write!(f, "{m} {}, r{}", spr_operand(i.spr()), i.rs()),
            Form::XRt => write!(f, "{m} r{}", i.rt()),
            Form::XRs => write!(f, "{m} r{}", i.rs()),
            Form::Mtcrf => write!(f, "{m} 0x{:02x}, r{}", i.crm(), i.rs()),
            Form::Wrteei => write!(f, "{m} {}", u8::from(i.e())),
            Form::Sc | Form::XlNone | Form::XNone | Form::Illegal => f.write_str(&m),
        }
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Disasm { insn: self, pc: None }.fmt(f)
    }
}
