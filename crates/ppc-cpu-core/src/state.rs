use std::fmt::Write as _;

use crate::regs::{cr, spr, xer, Msr, PVR_E500V2};

/// Reset value of `PC`/`NIP`: the last word of the boot page.
pub const RESET_PC: u64 = 0xffff_fffc;

/// Identifies one architected register for the introspection API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId {
    Gpr(u8),
    Spr(u16),
    Cr,
    Msr,
    Pc,
    Nip,
    /// SPE accumulator.
    Acc,
}

impl RegisterId {
    /// Parses a register name (`r3`, `gpr3`, `msr`, `pc`, `srr0`, `ivor13`, `spr272`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "cr" => return Some(RegisterId::Cr),
            "msr" => return Some(RegisterId::Msr),
            "pc" | "iar" => return Some(RegisterId::Pc),
            "nip" => return Some(RegisterId::Nip),
            "acc" => return Some(RegisterId::Acc),
            _ => {}
        }
        let gpr = name
            .strip_prefix("gpr")
            .or_else(|| name.strip_prefix('r'))
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|&n| n < 32);
        if let Some(n) = gpr {
            return Some(RegisterId::Gpr(n));
        }
        if let Some(n) = name.strip_prefix("spr").and_then(|n| n.parse::<u16>().ok()) {
            return (n < 1024).then_some(RegisterId::Spr(n));
        }
        spr::by_name(&name).map(RegisterId::Spr)
    }
}

/// Architected register state of one core.
///
/// GPRs are 64 bits wide because the SPE unit uses the upper halves; the integer
/// instructions only touch the low word.
#[derive(Clone)]
pub struct CpuState {
    pub gpr: [u64; 32],
    pub spr: Box<[u64; 1024]>,
    pub cr: u32,
    pub msr: u32,
    pub pc: u64,
    pub nip: u64,
    pub acc: u64,
}

impl std::fmt::Debug for CpuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuState")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("msr", &format_args!("{:#x}", self.msr))
            .field("cr", &format_args!("{:#x}", self.cr))
            .finish_non_exhaustive()
    }
}

impl CpuState {
    pub fn new(cpu_id: u32) -> Self {
        let mut state = Self {
            gpr: [0; 32],
            spr: Box::new([0; 1024]),
            cr: 0,
            msr: 0,
            pc: RESET_PC,
            nip: RESET_PC,
            acc: 0,
        };
        state.spr[spr::PIR as usize] = u64::from(cpu_id);
        state.spr[spr::PVR as usize] = u64::from(PVR_E500V2);
        state
    }

    #[inline]
    pub fn gpr32(&self, n: u32) -> u32 {
        self.gpr[n as usize & 31] as u32
    }

    /// `(rA|0)`: register value, or zero for `r0`.
    #[inline]
    pub fn gpr_or_zero(&self, n: u32) -> u32 {
        if n == 0 {
            0
        } else {
            self.gpr32(n)
        }
    }

    /// Writes the low word, leaving the SPE upper half untouched.
    #[inline]
    pub fn set_gpr32(&mut self, n: u32, value: u32) {
        let slot = &mut self.gpr[n as usize & 31];
        *slot = (*slot & 0xffff_ffff_0000_0000) | u64::from(value);
    }

    #[inline]
    pub fn spr32(&self, n: u16) -> u32 {
        self.spr[n as usize & 1023] as u32
    }

    #[inline]
    pub fn set_spr32(&mut self, n: u16, value: u32) {
        self.spr[n as usize & 1023] = u64::from(value);
    }

    #[inline]
    pub fn msr(&self) -> Msr {
        Msr::from_bits_retain(self.msr)
    }

    #[inline]
    pub fn user_mode(&self) -> bool {
        self.msr().contains(Msr::PR)
    }

    #[inline]
    pub fn xer(&self) -> u32 {
        self.spr32(spr::XER)
    }

    #[inline]
    pub fn carry(&self) -> bool {
        self.xer() & xer::CA != 0
    }

    pub fn set_carry(&mut self, ca: bool) {
        let value = if ca { self.xer() | xer::CA } else { self.xer() & !xer::CA };
        self.set_spr32(spr::XER, value);
    }

    /// Sets `XER[OV]` and accumulates it into `XER[SO]`.
    pub fn set_overflow(&mut self, ov: bool) {
        let value = if ov {
            self.xer() | xer::OV | xer::SO
        } else {
            self.xer() & !xer::OV
        };
        self.set_spr32(spr::XER, value);
    }

    /// `PID0..PID2`, in the order translation tries them.
    #[inline]
    pub fn pids(&self) -> [u32; 3] {
        [
            self.spr32(spr::PID0),
            self.spr32(spr::PID1),
            self.spr32(spr::PID2),
        ]
    }

    /// 4-bit CR field `n` (0 is the most significant).
    #[inline]
    pub fn cr_field(&self, n: u32) -> u32 {
        (self.cr >> ((7 - (n & 7)) * 4)) & 0xf
    }

    #[inline]
    pub fn set_cr_field(&mut self, n: u32, value: u32) {
        let shift = (7 - (n & 7)) * 4;
        self.cr = (self.cr & !(0xf << shift)) | ((value & 0xf) << shift);
    }

    /// CR bit in IBM numbering (bit 0 is the most significant).
    #[inline]
    pub fn cr_bit(&self, bit: u32) -> bool {
        self.cr & (0x8000_0000 >> (bit & 31)) != 0
    }

    #[inline]
    pub fn set_cr_bit(&mut self, bit: u32, value: bool) {
        let mask = 0x8000_0000 >> (bit & 31);
        if value {
            self.cr |= mask;
        } else {
            self.cr &= !mask;
        }
    }

    /// Signed compare into CR field `n`, copying `XER[SO]`.
    pub fn record_compare(&mut self, n: u32, ordering: std::cmp::Ordering) {
        let mut field = match ordering {
            std::cmp::Ordering::Less => cr::LT,
            std::cmp::Ordering::Greater => cr::GT,
            std::cmp::Ordering::Equal => cr::EQ,
        };
        if self.xer() & xer::SO != 0 {
            field |= cr::SO;
        }
        self.set_cr_field(n, field);
    }

    /// The `Rc=1` update of CR0 from a result.
    #[inline]
    pub fn record_cr0(&mut self, result: u32) {
        self.record_compare(0, (result as i32).cmp(&0));
    }

    pub fn get(&self, id: RegisterId) -> u64 {
        match id {
            RegisterId::Gpr(n) => self.gpr[n as usize & 31],
            RegisterId::Spr(n) => self.spr[n as usize & 1023],
            RegisterId::Cr => u64::from(self.cr),
            RegisterId::Msr => u64::from(self.msr),
            RegisterId::Pc => self.pc,
            RegisterId::Nip => self.nip,
            RegisterId::Acc => self.acc,
        }
    }

    pub fn set(&mut self, id: RegisterId, value: u64) {
        match id {
            RegisterId::Gpr(n) => self.gpr[n as usize & 31] = value,
            RegisterId::Spr(n) => self.spr[n as usize & 1023] = value,
            RegisterId::Cr => self.cr = value as u32,
            RegisterId::Msr => self.msr = value as u32,
            RegisterId::Pc => self.pc = value & 0xffff_ffff,
            RegisterId::Nip => self.nip = value & 0xffff_ffff,
            RegisterId::Acc => self.acc = value,
        }
    }

    /// Human-readable register dump. `all_sprs` also lists unnamed non-zero SPRs.
    pub fn dump(&self, cpu_id: u32, all_sprs: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "cpu{cpu_id}");
        let _ = writeln!(
            out,
            "msr={:08x} cr={:08x} iar={:08x} nip={:08x}",
            self.msr, self.cr, self.pc, self.nip
        );
        for row in 0..8 {
            let _ = write!(out, "r{:<2}", row * 4);
            for col in 0..4 {
                let _ = write!(out, " {:016x}", self.gpr[row * 4 + col]);
            }
            out.push('\n');
        }
        for &(name, num) in spr::NAMES {
            if name == "pid" {
                continue;
            }
            let _ = writeln!(out, "{name:>8}={:016x}", self.spr[num as usize]);
        }
        for n in (spr::IVOR0..=spr::IVOR15).chain(spr::IVOR32..=spr::IVOR35) {
            if let Some(name) = spr::name(n) {
                let _ = writeln!(out, "{name:>8}={:016x}", self.spr[n as usize]);
            }
        }
        if all_sprs {
            for (n, &value) in self.spr.iter().enumerate() {
                if value != 0 && spr::name(n as u16).is_none() {
                    let _ = writeln!(out, "  spr{n:<4}={value:016x}");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_parse() {
        assert_eq!(RegisterId::parse("r3"), Some(RegisterId::Gpr(3)));
        assert_eq!(RegisterId::parse("GPR31"), Some(RegisterId::Gpr(31)));
        assert_eq!(RegisterId::parse("r32"), None);
        assert_eq!(RegisterId::parse("iar"), Some(RegisterId::Pc));
        assert_eq!(RegisterId::parse("lr"), Some(RegisterId::Spr(spr::LR)));
        assert_eq!(RegisterId::parse("ivor13"), Some(RegisterId::Spr(413)));
        assert_eq!(RegisterId::parse("spr1008"), Some(RegisterId::Spr(spr::HID0)));
        assert_eq!(RegisterId::parse("spr1024"), None);
        assert_eq!(RegisterId::parse("bogus"), None);
    }

    #[test]
    fn low_word_writes_keep_upper_half() {
        let mut s = CpuState::new(0);
        s.gpr[5] = 0x1111_2222_3333_4444;
        s.set_gpr32(5, 0xdead_beef);
        assert_eq!(s.gpr[5], 0x1111_2222_dead_beef);
        assert_eq!(s.gpr32(5), 0xdead_beef);
        assert_eq!(s.gpr_or_zero(0), 0);
    }

    #[test]
    fn cr_fields_and_bits() {
        let mut s = CpuState::new(0);
        s.set_cr_field(0, cr::EQ);
        assert_eq!(s.cr, 0x2000_0000);
        assert!(s.cr_bit(2));
        s.set_cr_bit(31, true);
        assert_eq!(s.cr_field(7), 1);
        s.set_overflow(true);
        s.record_compare(1, std::cmp::Ordering::Less);
        assert_eq!(s.cr_field(1), cr::LT | cr::SO);
        s.set_overflow(false);
        assert_eq!(s.xer() & xer::SO, xer::SO, "summary overflow is sticky");
    }

    #[test]
    fn reset_state() {
        let s = CpuState::new(1);
        assert_eq!(s.pc, RESET_PC);
        assert_eq!(s.spr32(spr::PIR), 1);
        assert_eq!(s.spr32(spr::PVR), PVR_E500V2);
        assert!(s.dump(1, false).starts_with("cpu1\n"));
    }
}
