//! MMU assist (MAS) register layout.
//!
//! The MAS registers are the only software interface to TLB entries on e500:
//! `tlbwe` writes the entry described by MAS0..MAS3/MAS7, `tlbre` and `tlbsx` fill
//! them back in.

pub const MAS0_TLBSEL: u32 = 0x1000_0000;
pub const MAS0_ESEL: u32 = 0x000f_0000;
pub const MAS0_NV: u32 = 0x0000_0001;

pub const MAS1_V: u32 = 0x8000_0000;
pub const MAS1_IPROT: u32 = 0x4000_0000;
pub const MAS1_TID: u32 = 0x00ff_0000;
pub const MAS1_TS: u32 = 0x0000_1000;
pub const MAS1_TSIZE: u32 = 0x0000_0f00;

pub const MAS2_EPN: u32 = 0xffff_f000;
pub const MAS2_X01: u32 = 0x0000_0060;
pub const MAS2_WIMGE: u32 = 0x0000_001f;

pub const MAS3_RPN: u32 = 0xffff_f000;
pub const MAS3_U03: u32 = 0x0000_03c0;
pub const MAS3_PERMIS: u32 = 0x0000_003f;

pub const MAS6_SPID0: u32 = 0x00ff_0000;
pub const MAS6_SAS: u32 = 0x0000_0001;

pub const MAS7_RPN: u32 = 0x0000_000f;

/// MAS3 permission bits.
pub const PERM_UX: u8 = 0x20;
pub const PERM_SX: u8 = 0x10;
pub const PERM_UW: u8 = 0x08;
pub const PERM_SW: u8 = 0x04;
pub const PERM_UR: u8 = 0x02;
pub const PERM_SR: u8 = 0x01;

/// WIMGE attribute bits.
pub const WIMGE_W: u8 = 0x10;
pub const WIMGE_I: u8 = 0x08;
pub const WIMGE_M: u8 = 0x04;
pub const WIMGE_G: u8 = 0x02;
pub const WIMGE_E: u8 = 0x01;

#[inline]
pub(crate) const fn field(value: u32, mask: u32) -> u32 {
    (value & mask) >> mask.trailing_zeros()
}

#[inline]
pub(crate) const fn place(value: u32, mask: u32) -> u32 {
    (value << mask.trailing_zeros()) & mask
}

/// A snapshot of the MAS registers involved in TLB management instructions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MasRegisters {
    pub mas0: u32,
    pub mas1: u32,
    pub mas2: u32,
    pub mas3: u32,
    pub mas6: u32,
    pub mas7: u32,
}

impl MasRegisters {
    #[inline]
    pub fn tlbsel(&self) -> usize {
        field(self.mas0, MAS0_TLBSEL) as usize
    }

    #[inline]
    pub fn esel(&self) -> usize {
        field(self.mas0, MAS0_ESEL) as usize
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.mas1 & MAS1_V != 0
    }

    #[inline]
    pub fn iprot(&self) -> bool {
        self.mas1 & MAS1_IPROT != 0
    }

    #[inline]
    pub fn tid(&self) -> u32 {
        field(self.mas1, MAS1_TID)
    }

    #[inline]
    pub fn ts(&self) -> bool {
        self.mas1 & MAS1_TS != 0
    }

    #[inline]
    pub fn tsize(&self) -> u8 {
        field(self.mas1, MAS1_TSIZE) as u8
    }

    /// Effective page number (EA >> 12).
    #[inline]
    pub fn epn(&self) -> u64 {
        u64::from(field(self.mas2, MAS2_EPN))
    }

    #[inline]
    pub fn x01(&self) -> u8 {
        field(self.mas2, MAS2_X01) as u8
    }

    #[inline]
    pub fn wimge(&self) -> u8 {
        field(self.mas2, MAS2_WIMGE) as u8
    }

    /// Real page number (RA >> 12), including the MAS7 extension when enabled.
    #[inline]
    pub fn rpn(&self, mas7_update: bool) -> u64 {
        let low = u64::from(field(self.mas3, MAS3_RPN));
        if mas7_update {
            low | (u64::from(self.mas7 & MAS7_RPN) << 20)
        } else {
            low
        }
    }

    #[inline]
    pub fn u03(&self) -> u8 {
        field(self.mas3, MAS3_U03) as u8
    }

    #[inline]
    pub fn permis(&self) -> u8 {
        (self.mas3 & MAS3_PERMIS) as u8
    }

    #[inline]
    pub fn spid(&self) -> u32 {
        field(self.mas6, MAS6_SPID0)
    }

    #[inline]
    pub fn sas(&self) -> bool {
        self.mas6 & MAS6_SAS != 0
    }
}

/// Converts MAS3 `{UX,SX,UW,SW,UR,SR}` bits into the internal layout where the
/// supervisor `{r,w,x}` triple is bits 2..0 and the user triple bits 5..3, so a
/// request is checked as `rwx << (3 * user)`.
#[inline]
pub(crate) const fn permis_to_internal(p: u8) -> u8 {
    (p & 0x01) << 2 | (p & 0x02) << 4 | (p & 0x04) >> 1 | (p & 0x08) << 1 | (p & 0x10) >> 4 | (p & 0x20) >> 2
}

#[inline]
pub(crate) const fn internal_to_permis(i: u8) -> u8 {
    (i & 0x04) >> 2 | (i & 0x20) >> 4 | (i & 0x02) << 1 | (i & 0x10) >> 1 | (i & 0x01) << 4 | (i & 0x08) << 2
}
