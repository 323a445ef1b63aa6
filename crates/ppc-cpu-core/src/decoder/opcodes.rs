use bitflags::bitflags;

/// Operand layout of an instruction, shared by the decoder, disassembler and assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    /// `rt, ra, simm`
    DArith,
    /// `ra, rs, uimm`
    DLogical,
    /// `rt, d(ra)`
    DMem,
    /// `crf, l, ra, simm`
    DCmp,
    /// `crf, l, ra, uimm`
    DCmpl,
    /// `to, ra, simm`
    DTrap,
    /// `target`
    I,
    /// `bo, bi, target`
    B,
    Sc,
    /// `bo, bi`
    XlBranch,
    /// `bt, ba, bb`
    XlCr,
    /// `crfd, crfs`
    XlCrf,
    XlNone,
    /// `ra, rs, sh, mb, me`
    M,
    /// `ra, rs, rb, mb, me`
    MReg,
    /// `ra, rs, rb`
    XLogical,
    /// `ra, rs`
    XUnary,
    /// `ra, rs, sh`
    XShImm,
    /// `rt, ra, rb`
    Xo,
    /// `rt, ra`
    XoUnary,
    /// `crf, l, ra, rb`
    XCmp,
    /// `rt, ra, rb`
    XMem,
    /// `to, ra, rb`
    XTrap,
    /// `ra, rb`
    XCache,
    XNone,
    /// `rt, spr`
    Mfspr,
    /// `spr, rs`
    Mtspr,
    /// `rt`
    XRt,
    /// `rs`
    XRs,
    /// `crm, rs`
    Mtcrf,
    /// `e`
    Wrteei,
    Illegal,
}

/// Where the opcode lives in the encoding space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Primary(u32),
    /// Primary 19, 10-bit extended opcode.
    Op19(u32),
    /// Primary 31, 10-bit extended opcode.
    Op31(u32),
    /// Primary 31, 9-bit extended opcode with an `OE` bit.
    Op31Xo(u32),
}

impl Encoding {
    pub fn base(self) -> u32 {
        match self {
            Encoding::Primary(p) => p << 26,
            Encoding::Op19(xo) => (19 << 26) | (xo << 1),
            Encoding::Op31(xo) | Encoding::Op31Xo(xo) => (31 << 26) | (xo << 1),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpFlags: u8 {
        /// Has a record (`.`) form.
        const RC     = 1 << 0;
        /// Has an overflow-enable (`o`) form.
        const OE     = 1 << 1;
        const BRANCH = 1 << 2;
        /// Link (`l`) suffix.
        const LK     = 1 << 3;
        /// Absolute (`a`) suffix.
        const AA     = 1 << 4;
        /// Alters translation context or instruction stream; ends a basic block.
        const CONTEXT = 1 << 5;
        const PRIV   = 1 << 6;
    }
}

#[derive(Debug)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub form: Form,
    pub encoding: Encoding,
    pub flags: OpFlags,
}

macro_rules! opcodes {
    ($($variant:ident => $mnemonic:literal, $form:ident, $enc:expr, $flags:expr;)*) => {
        /// Instruction kinds. The discriminant is the opcode id used to index the
        /// handler table.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum Opcode {
            $($variant,)*
        }

        pub(crate) const OPCODES: &[OpcodeInfo] = &[
            $(OpcodeInfo {
                opcode: Opcode::$variant,
                mnemonic: $mnemonic,
                form: Form::$form,
                encoding: $enc,
                flags: $flags,
            },)*
        ];
    };
}

const NONE: OpFlags = OpFlags::empty();
const RC: OpFlags = OpFlags::RC;
const RC_OE: OpFlags = OpFlags::RC.union(OpFlags::OE);
const BR: OpFlags = OpFlags::BRANCH;
const BR_LK: OpFlags = OpFlags::BRANCH.union(OpFlags::LK);
const BR_LK_AA: OpFlags = BR_LK.union(OpFlags::AA);
const PRIV: OpFlags = OpFlags::PRIV;
const CTX: OpFlags = OpFlags::CONTEXT;
const PRIV_CTX: OpFlags = OpFlags::PRIV.union(OpFlags::CONTEXT);
const RFI: OpFlags = OpFlags::BRANCH.union(OpFlags::PRIV);

use Encoding::{Op19, Op31, Op31Xo, Primary};

opcodes! {
    Illegal  => "illegal", Illegal, Primary(0), NONE;
    Twi      => "twi",     DTrap,    Primary(3),  NONE;
    Mulli    => "mulli",   DArith,   Primary(7),  NONE;
    Subfic   => "subfic",  DArith,   Primary(8),  NONE;
    Cmpli    => "cmpli",   DCmpl,    Primary(10), NONE;
    Cmpi     => "cmpi",    DCmp,     Primary(11), NONE;
    Addic    => "addic",   DArith,   Primary(12), NONE;
    AddicRc  => "addic.",  DArith,   Primary(13), NONE;
    Addi     => "addi",    DArith,   Primary(14), NONE;
    Addis    => "addis",   DArith,   Primary(15), NONE;
    Bc       => "bc",      B,        Primary(16), BR_LK_AA;
    Sc       => "sc",      Sc,       Primary(17), BR;
    B        => "b",       I,        Primary(18), BR_LK_AA;
    Mcrf     => "mcrf",    XlCrf,    Op19(0),     NONE;
    Bclr     => "bclr",    XlBranch, Op19(16),    BR_LK;
    Crnor    => "crnor",   XlCr,     Op19(33),    NONE;
    Rfmci    => "rfmci",   XlNone,   Op19(38),    RFI;
    Rfi      => "rfi",     XlNone,   Op19(50),    RFI;
    Rfci     => "rfci",    XlNone,   Op19(51),    RFI;
    Crandc   => "crandc",  XlCr,     Op19(129),   NONE;
    Isync    => "isync",   XlNone,   Op19(150),   CTX;
    Crxor    => "crxor",   XlCr,     Op19(193),   NONE;
    Crnand   => "crnand",  XlCr,     Op19(225),   NONE;
    Crand    => "crand",   XlCr,     Op19(257),   NONE;
    Creqv    => "creqv",   XlCr,     Op19(289),   NONE;
    Crorc    => "crorc",   XlCr,     Op19(417),   NONE;
    Cror     => "cror",    XlCr,     Op19(449),   NONE;
    Bcctr    => "bcctr",   XlBranch, Op19(528),   BR_LK;
    Rlwimi   => "rlwimi",  M,        Primary(20), RC;
    Rlwinm   => "rlwinm",  M,        Primary(21), RC;
    Rlwnm    => "rlwnm",   MReg,     Primary(23), RC;
    Ori      => "ori",     DLogical, Primary(24), NONE;
    Oris     => "oris",    DLogical, Primary(25), NONE;
    Xori     => "xori",    DLogical, Primary(26), NONE;
    Xoris    => "xoris",   DLogical, Primary(27), NONE;
    AndiRc   => "andi.",   DLogical, Primary(28), NONE;
    AndisRc  => "andis.",  DLogical, Primary(29), NONE;
    Cmp      => "cmp",     XCmp,     Op31(0),     NONE;
    Tw       => "tw",      XTrap,    Op31(4),     NONE;
    Mfcr     => "mfcr",    XRt,      Op31(19),    NONE;
    Lwarx    => "lwarx",   XMem,     Op31(20),    NONE;
    Lwzx     => "lwzx",    XMem,     Op31(23),    NONE;
    Slw      => "slw",     XLogical, Op31(24),    RC;
    Cntlzw   => "cntlzw",  XUnary,   Op31(26),    RC;
    And      => "and",     XLogical, Op31(28),    RC;
    Cmpl     => "cmpl",    XCmp,     Op31(32),    NONE;
    Dcbst    => "dcbst",   XCache,   Op31(54),    NONE;
    Lwzux    => "lwzux",   XMem,     Op31(55),    NONE;
    Andc     => "andc",    XLogical, Op31(60),    RC;
    Mfmsr    => "mfmsr",   XRt,      Op31(83),    PRIV;
    Dcbf     => "dcbf",    XCache,   Op31(86),    NONE;
    Lbzx     => "lbzx",    XMem,     Op31(87),    NONE;
    Lbzux    => "lbzux",   XMem,     Op31(119),   NONE;
    Nor      => "nor",     XLogical, Op31(124),   RC;
    Wrtee    => "wrtee",   XRs,      Op31(131),   PRIV;
    Mtcrf    => "mtcrf",   Mtcrf,    Op31(144),   NONE;
    Mtmsr    => "mtmsr",   XRs,      Op31(146),   PRIV_CTX;
    StwcxRc  => "stwcx.",  XMem,     Op31(150),   NONE;
    Stwx     => "stwx",    XMem,     Op31(151),   NONE;
    Wrteei   => "wrteei",  Wrteei,   Op31(163),   PRIV;
    Stwux    => "stwux",   XMem,     Op31(183),   NONE;
    Stbx     => "stbx",    XMem,     Op31(215),   NONE;
    Dcbtst   => "dcbtst",  XCache,   Op31(246),   NONE;
    Stbux    => "stbux",   XMem,     Op31(247),   NONE;
    Dcbt     => "dcbt",    XCache,   Op31(278),   NONE;
    Lhzx     => "lhzx",    XMem,     Op31(279),   NONE;
    Eqv      => "eqv",     XLogical, Op31(284),   RC;
    Lhzux    => "lhzux",   XMem,     Op31(311),   NONE;
    Xor      => "xor",     XLogical, Op31(316),   RC;
    Mfspr    => "mfspr",   Mfspr,    Op31(339),   NONE;
    Lhax     => "lhax",    XMem,     Op31(343),   NONE;
    Lhaux    => "lhaux",   XMem,     Op31(375),   NONE;
    Sthx     => "sthx",    XMem,     Op31(407),   NONE;
    Orc      => "orc",     XLogical, Op31(412),   RC;
    Sthux    => "sthux",   XMem,     Op31(439),   NONE;
    Or       => "or",      XLogical, Op31(444),   RC;
    Mtspr    => "mtspr",   Mtspr,    Op31(467),   CTX;
    Dcbi     => "dcbi",    XCache,   Op31(470),   PRIV;
    Nand     => "nand",    XLogical, Op31(476),   RC;
    Lwbrx    => "lwbrx",   XMem,     Op31(534),   NONE;
    Srw      => "srw",     XLogical, Op31(536),   RC;
    Tlbsync  => "tlbsync", XNone,    Op31(566),   PRIV;
    Msync    => "msync",   XNone,    Op31(598),   NONE;
    Stwbrx   => "stwbrx",  XMem,     Op31(662),   NONE;
    Tlbivax  => "tlbivax", XCache,   Op31(786),   PRIV_CTX;
    Lhbrx    => "lhbrx",   XMem,     Op31(790),   NONE;
    Sraw     => "sraw",    XLogical, Op31(792),   RC;
    Srawi    => "srawi",   XShImm,   Op31(824),   RC;
    Mbar     => "mbar",    XNone,    Op31(854),   NONE;
    Tlbsx    => "tlbsx",   XCache,   Op31(914),   PRIV;
    Sthbrx   => "sthbrx",  XMem,     Op31(918),   NONE;
    Extsh    => "extsh",   XUnary,   Op31(922),   RC;
    Tlbre    => "tlbre",   XNone,    Op31(946),   PRIV;
    Extsb    => "extsb",   XUnary,   Op31(954),   RC;
    Tlbwe    => "tlbwe",   XNone,    Op31(978),   PRIV_CTX;
    Icbi     => "icbi",    XCache,   Op31(982),   CTX;
    Dcbz     => "dcbz",    XCache,   Op31(1014),  NONE;
    Subfc    => "subfc",   Xo,       Op31Xo(8),   RC_OE;
    Addc     => "addc",    Xo,       Op31Xo(10),  RC_OE;
    Mulhwu   => "mulhwu",  Xo,       Op31Xo(11),  RC;
    Subf     => "subf",    Xo,       Op31Xo(40),  RC_OE;
    Mulhw    => "mulhw",   Xo,       Op31Xo(75),  RC;
    Neg      => "neg",     XoUnary,  Op31Xo(104), RC_OE;
    Subfe    => "subfe",   Xo,       Op31Xo(136), RC_OE;
    Adde     => "adde",    Xo,       Op31Xo(138), RC_OE;
    Subfze   => "subfze",  XoUnary,  Op31Xo(200), RC_OE;
    Addze    => "addze",   XoUnary,  Op31Xo(202), RC_OE;
    Subfme   => "subfme",  XoUnary,  Op31Xo(232), RC_OE;
    Addme    => "addme",   XoUnary,  Op31Xo(234), RC_OE;
    Mullw    => "mullw",   Xo,       Op31Xo(235), RC_OE;
    Add      => "add",     Xo,       Op31Xo(266), RC_OE;
    Divwu    => "divwu",   Xo,       Op31Xo(459), RC_OE;
    Divw     => "divw",    Xo,       Op31Xo(491), RC_OE;
    Lwz      => "lwz",     DMem,     Primary(32), NONE;
    Lwzu     => "lwzu",    DMem,     Primary(33), NONE;
    Lbz      => "lbz",     DMem,     Primary(34), NONE;
    Lbzu     => "lbzu",    DMem,     Primary(35), NONE;
    Stw      => "stw",     DMem,     Primary(36), NONE;
    Stwu     => "stwu",    DMem,     Primary(37), NONE;
    Stb      => "stb",     DMem,     Primary(38), NONE;
    Stbu     => "stbu",    DMem,     Primary(39), NONE;
    Lhz      => "lhz",     DMem,     Primary(40), NONE;
    Lhzu     => "lhzu",    DMem,     Primary(41), NONE;
    Lha      => "lha",     DMem,     Primary(42), NONE;
    Lhau     => "lhau",    DMem,     Primary(43), NONE;
    Sth      => "sth",     DMem,     Primary(44), NONE;
    Sthu     => "sthu",    DMem,     Primary(45), NONE;
    Lmw      => "lmw",     DMem,     Primary(46), NONE;
    Stmw     => "stmw",    DMem,     Primary(47), NONE;
}

impl Opcode {
    pub const COUNT: usize = OPCODES.len();

    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Opcode> {
        OPCODES.get(id as usize).map(|info| info.opcode)
    }

    #[inline]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODES[self as usize]
    }

    #[inline]
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub fn by_mnemonic(mnemonic: &str) -> Option<Opcode> {
        OPCODES
            .iter()
            .find(|info| info.mnemonic == mnemonic)
            .map(|info| info.opcode)
    }

    pub fn all() -> impl Iterator<Item = Opcode> {
        OPCODES.iter().map(|info| info.opcode)
    }
}
