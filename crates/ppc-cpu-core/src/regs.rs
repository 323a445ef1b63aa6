//! Architected register numbers and bit fields.

use bitflags::bitflags;

/// Special purpose register numbers.
pub mod spr {
    pub const XER: u16 = 1;
    pub const LR: u16 = 8;
    pub const CTR: u16 = 9;
    pub const DEC: u16 = 22;
    pub const SRR0: u16 = 26;
    pub const SRR1: u16 = 27;
    pub const PID0: u16 = 48;
    pub const DECAR: u16 = 54;
    pub const CSRR0: u16 = 58;
    pub const CSRR1: u16 = 59;
    pub const DEAR: u16 = 61;
    pub const ESR: u16 = 62;
    pub const IVPR: u16 = 63;
    pub const USPRG0: u16 = 256;
    pub const SPRG4R: u16 = 260;
    pub const SPRG5R: u16 = 261;
    pub const SPRG6R: u16 = 262;
    pub const SPRG7R: u16 = 263;
    pub const TBL_R: u16 = 268;
    pub const TBU_R: u16 = 269;
    pub const SPRG0: u16 = 272;
    pub const SPRG1: u16 = 273;
    pub const SPRG2: u16 = 274;
    pub const SPRG3: u16 = 275;
    pub const SPRG4: u16 = 276;
    pub const SPRG5: u16 = 277;
    pub const SPRG6: u16 = 278;
    pub const SPRG7: u16 = 279;
    pub const TBL_W: u16 = 284;
    pub const TBU_W: u16 = 285;
    pub const PIR: u16 = 286;
    pub const PVR: u16 = 287;
    pub const DBSR: u16 = 304;
    pub const DBCR0: u16 = 308;
    pub const DBCR1: u16 = 309;
    pub const DBCR2: u16 = 310;
    pub const IAC1: u16 = 312;
    pub const IAC2: u16 = 313;
    pub const DAC1: u16 = 316;
    pub const DAC2: u16 = 317;
    pub const TSR: u16 = 336;
    pub const TCR: u16 = 340;
    pub const IVOR0: u16 = 400;
    pub const IVOR15: u16 = 415;
    pub const SPEFSCR: u16 = 512;
    pub const BBEAR: u16 = 513;
    pub const BBTAR: u16 = 514;
    pub const L1CFG0: u16 = 515;
    pub const L1CFG1: u16 = 516;
    pub const IVOR32: u16 = 528;
    pub const IVOR35: u16 = 531;
    pub const MCSRR0: u16 = 570;
    pub const MCSRR1: u16 = 571;
    pub const MCSR: u16 = 572;
    pub const MCAR: u16 = 573;
    pub const DSRR0: u16 = 574;
    pub const DSRR1: u16 = 575;
    pub const MAS0: u16 = 624;
    pub const MAS1: u16 = 625;
    pub const MAS2: u16 = 626;
    pub const MAS3: u16 = 627;
    pub const MAS4: u16 = 628;
    pub const MAS6: u16 = 630;
    pub const PID1: u16 = 633;
    pub const PID2: u16 = 634;
    pub const TLB0CFG: u16 = 688;
    pub const TLB1CFG: u16 = 689;
    pub const MAS7: u16 = 944;
    pub const HID0: u16 = 1008;
    pub const HID1: u16 = 1009;
    pub const L1CSR0: u16 = 1010;
    pub const L1CSR1: u16 = 1011;
    pub const MMUCSR0: u16 = 1012;
    pub const BUCSR: u16 = 1013;
    pub const MMUCFG: u16 = 1015;
    pub const SVR: u16 = 1023;

    /// IVORn register for `n` in 0..=15 or 32..=35.
    pub const fn ivor(n: u16) -> Option<u16> {
        match n {
            0..=15 => Some(IVOR0 + n),
            32..=35 => Some(IVOR32 + (n - 32)),
            _ => None,
        }
    }

    /// Book E: SPR numbers with bit 4 set are supervisor-only.
    #[inline]
    pub const fn is_privileged(n: u16) -> bool {
        n & 0x10 != 0
    }

    /// SPRs that exist on e500v2, by name.
    pub const NAMES: &[(&str, u16)] = &[
        ("xer", XER),
        ("lr", LR),
        ("ctr", CTR),
        ("dec", DEC),
        ("srr0", SRR0),
        ("srr1", SRR1),
        ("pid0", PID0),
        ("pid", PID0),
        ("decar", DECAR),
        ("csrr0", CSRR0),
        ("csrr1", CSRR1),
        ("dear", DEAR),
        ("esr", ESR),
        ("ivpr", IVPR),
        ("usprg0", USPRG0),
        ("tbl", TBL_R),
        ("tbu", TBU_R),
        ("sprg0", SPRG0),
        ("sprg1", SPRG1),
        ("sprg2", SPRG2),
        ("sprg3", SPRG3),
        ("sprg4", SPRG4),
        ("sprg5", SPRG5),
        ("sprg6", SPRG6),
        ("sprg7", SPRG7),
        ("pir", PIR),
        ("pvr", PVR),
        ("dbsr", DBSR),
        ("dbcr0", DBCR0),
        ("dbcr1", DBCR1),
        ("dbcr2", DBCR2),
        ("iac1", IAC1),
        ("iac2", IAC2),
        ("dac1", DAC1),
        ("dac2", DAC2),
        ("tsr", TSR),
        ("tcr", TCR),
        ("spefscr", SPEFSCR),
        ("bbear", BBEAR),
        ("bbtar", BBTAR),
        ("l1cfg0", L1CFG0),
        ("l1cfg1", L1CFG1),
        ("mcsrr0", MCSRR0),
        ("mcsrr1", MCSRR1),
        ("mcsr", MCSR),
        ("mcar", MCAR),
        ("dsrr0", DSRR0),
        ("dsrr1", DSRR1),
        ("mas0", MAS0),
        ("mas1", MAS1),
        ("mas2", MAS2),
        ("mas3", MAS3),
        ("mas4", MAS4),
        ("mas6", MAS6),
        ("mas7", MAS7),
        ("pid1", PID1),
        ("pid2", PID2),
        ("tlb0cfg", TLB0CFG),
        ("tlb1cfg", TLB1CFG),
        ("hid0", HID0),
        ("hid1", HID1),
        ("l1csr0", L1CSR0),
        ("l1csr1", L1CSR1),
        ("mmucsr0", MMUCSR0),
        ("bucsr", BUCSR),
        ("mmucfg", MMUCFG),
        ("svr", SVR),
    ];

    pub fn by_name(name: &str) -> Option<u16> {
        if let Some(n) = name.strip_prefix("ivor") {
            return n.parse().ok().and_then(ivor);
        }
        NAMES.iter().find(|(n, _)| *n == name).map(|&(_, num)| num)
    }

    pub fn name(num: u16) -> Option<&'static str> {
        if let Some(n) = (IVOR0..=IVOR15).contains(&num).then(|| num - IVOR0) {
            return Some(IVOR_NAMES[n as usize]);
        }
        if let Some(n) = (IVOR32..=IVOR35).contains(&num).then(|| num - IVOR32) {
            return Some(IVOR_NAMES[16 + n as usize]);
        }
        NAMES.iter().find(|&&(_, n)| n == num).map(|&(name, _)| name)
    }

    const IVOR_NAMES: [&str; 20] = [
        "ivor0", "ivor1", "ivor2", "ivor3", "ivor4", "ivor5", "ivor6", "ivor7", "ivor8", "ivor9",
        "ivor10", "ivor11", "ivor12", "ivor13", "ivor14", "ivor15", "ivor32", "ivor33", "ivor34",
        "ivor35",
    ];

    /// Whether `num` names a register that exists on this core.
    pub fn exists(num: u16) -> bool {
        name(num).is_some() || matches!(num, SPRG4R..=SPRG7R | TBL_W | TBU_W)
    }
}

bitflags! {
    /// Machine state register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Msr: u32 {
        const SPE = 0x0200_0000;
        const WE  = 0x0004_0000;
        const CE  = 0x0002_0000;
        const EE  = 0x0000_8000;
        const PR  = 0x0000_4000;
        const FP  = 0x0000_2000;
        const ME  = 0x0000_1000;
        const FE0 = 0x0000_0800;
        const DE  = 0x0000_0200;
        const FE1 = 0x0000_0100;
        const IS  = 0x0000_0020;
        const DS  = 0x0000_0010;
    }
}

impl Msr {
    /// Cleared on entry to every interrupt.
    pub const INTERRUPT_CLEAR: Msr = Msr::SPE
        .union(Msr::WE)
        .union(Msr::EE)
        .union(Msr::PR)
        .union(Msr::FP)
        .union(Msr::FE0)
        .union(Msr::FE1)
        .union(Msr::IS)
        .union(Msr::DS);
}

bitflags! {
    /// Exception syndrome register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Esr: u32 {
        const PIL = 0x0800_0000;
        const PPR = 0x0400_0000;
        const PTR = 0x0200_0000;
        const FP  = 0x0100_0000;
        const ST  = 0x0080_0000;
        const DLK = 0x0020_0000;
        const ILK = 0x0010_0000;
        const AP  = 0x0008_0000;
        const PUO = 0x0004_0000;
        const BO  = 0x0002_0000;
        const SPV = 0x0000_0080;
    }
}

bitflags! {
    /// Machine check syndrome register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Mcsr: u32 {
        const MCP       = 0x8000_0000;
        const ICPERR    = 0x4000_0000;
        const DCP_PERR  = 0x2000_0000;
        const DCPERR    = 0x1000_0000;
        const BUS_IAERR = 0x0000_0080;
        const BUS_RAERR = 0x0000_0040;
        const BUS_WAERR = 0x0000_0020;
        const BUS_IBERR = 0x0000_0010;
        const BUS_RBERR = 0x0000_0008;
        const BUS_WBERR = 0x0000_0004;
        const BUS_IPERR = 0x0000_0002;
        const BUS_RPERR = 0x0000_0001;
    }
}

bitflags! {
    /// Debug control register 0.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Dbcr0: u32 {
        const EDM   = 0x8000_0000;
        const IDM   = 0x4000_0000;
        const RST   = 0x3000_0000;
        const ICMP  = 0x0800_0000;
        const BRT   = 0x0400_0000;
        const IRPT  = 0x0200_0000;
        const TRAP  = 0x0100_0000;
        const IAC1  = 0x0080_0000;
        const IAC2  = 0x0040_0000;
        const DAC1R = 0x0008_0000;
        const DAC1W = 0x0004_0000;
        const DAC2R = 0x0002_0000;
        const DAC2W = 0x0001_0000;
        const RET   = 0x0000_8000;
    }
}

/// DBCR1 instruction address compare qualifiers (two-bit fields).
pub mod dbcr1 {
    pub const IAC1US: u32 = 0xc000_0000;
    pub const IAC1ER: u32 = 0x3000_0000;
    pub const IAC2US: u32 = 0x0c00_0000;
    pub const IAC2ER: u32 = 0x0300_0000;
}

bitflags! {
    /// Debug status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Dbsr: u32 {
        const IDE   = 0x8000_0000;
        const UDE   = 0x4000_0000;
        const MRR   = 0x3000_0000;
        const IC    = 0x0800_0000;
        const BT    = 0x0400_0000;
        const IRPT  = 0x0200_0000;
        const TIE   = 0x0100_0000;
        const IAC1  = 0x0080_0000;
        const IAC2  = 0x0040_0000;
        const DAC1R = 0x0008_0000;
        const DAC1W = 0x0004_0000;
        const DAC2R = 0x0002_0000;
        const DAC2W = 0x0001_0000;
        const RET   = 0x0000_8000;
    }
}

bitflags! {
    /// Timer control register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Tcr: u32 {
        const WIE = 0x0800_0000;
        const DIE = 0x0400_0000;
        const FIE = 0x0080_0000;
        const ARE = 0x0040_0000;
    }
}

bitflags! {
    /// Timer status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Tsr: u32 {
        const ENW = 0x8000_0000;
        const WIS = 0x4000_0000;
        const DIS = 0x0800_0000;
        const FIS = 0x0400_0000;
    }
}

/// Signal processing / embedded FP status and control register.
pub mod spefscr {
    pub const FGH: u32 = 0x2000_0000;
    pub const FXH: u32 = 0x1000_0000;
    pub const FINVH: u32 = 0x0800_0000;
    pub const FDBZH: u32 = 0x0400_0000;
    pub const FUNFH: u32 = 0x0200_0000;
    pub const FOVFH: u32 = 0x0100_0000;
    pub const FG: u32 = 0x0000_2000;
    pub const FX: u32 = 0x0000_1000;
    pub const FINV: u32 = 0x0000_0800;
    pub const FDBZ: u32 = 0x0000_0400;
    pub const FUNF: u32 = 0x0000_0200;
    pub const FOVF: u32 = 0x0000_0100;
    pub const FINXE: u32 = 0x0000_0040;
    pub const FINVE: u32 = 0x0000_0020;
    pub const FDBZE: u32 = 0x0000_0010;
    pub const FUNFE: u32 = 0x0000_0008;
    pub const FOVFE: u32 = 0x0000_0004;
    pub const FRMC: u32 = 0x0000_0003;
}

pub mod xer {
    pub const SO: u32 = 0x8000_0000;
    pub const OV: u32 = 0x4000_0000;
    pub const CA: u32 = 0x2000_0000;
}

pub mod hid0 {
    pub const TBEN: u32 = 0x0000_4000;
    pub const EN_MAS7_UPDATE: u32 = 0x0000_0080;
}

pub mod mmucsr0 {
    pub const TLB0_FI: u32 = 0x0000_0004;
    pub const TLB1_FI: u32 = 0x0000_0002;
}

/// Condition register field bits (within one 4-bit field).
pub mod cr {
    pub const LT: u32 = 0x8;
    pub const GT: u32 = 0x4;
    pub const EQ: u32 = 0x2;
    pub const SO: u32 = 0x1;
}

/// e500v2 core version.
pub const PVR_E500V2: u32 = 0x8021_0030;
