use serde::Serialize;

use crate::mas::{
    internal_to_permis, permis_to_internal, place, MasRegisters, MAS1_IPROT, MAS1_TID, MAS1_TS,
    MAS1_TSIZE, MAS1_V, MAS2_EPN, MAS2_WIMGE, MAS2_X01, MAS3_PERMIS, MAS3_RPN, MAS3_U03, MAS7_RPN,
};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE_4K: u64 = 1 << PAGE_SHIFT;

/// `TSIZE` encodes a page of `4^tsize` KiB.
#[inline]
pub const fn tsize_to_page_size(tsize: u8) -> u64 {
    1u64 << (10 + 2 * (tsize as u32 & 0xf))
}

/// One TLB entry, in decoded form.
///
/// `epn`/`rpn` hold the page numbers exactly as written through the MAS registers so
/// they read back unchanged; `ea`/`ra` are those numbers aligned down to the entry's
/// page size and are what translation compares against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TlbEntry {
    pub tid: u32,
    pub epn: u64,
    pub rpn: u64,
    pub ea: u64,
    pub ra: u64,
    pub page_size: u64,
    pub wimge: u8,
    pub x01: u8,
    pub u03: u8,
    /// Internal layout: `{ur,uw,ux,sr,sw,sx}` from bit 5 down to bit 0.
    pub permission: u8,
    pub ts: bool,
    pub tsize: u8,
    pub iprot: bool,
    pub valid: bool,
}

impl TlbEntry {
    /// Decodes the entry described by `mas`. `fixed_page_size` forces the page size of
    /// arrays that only support one (TLB0); TSIZE is still stored for read-back.
    pub(crate) fn from_mas(mas: &MasRegisters, mas7_update: bool, fixed_page_size: Option<u64>) -> Self {
        let tsize = mas.tsize();
        let page_size = fixed_page_size.unwrap_or_else(|| tsize_to_page_size(tsize));
        let epn = mas.epn();
        let rpn = mas.rpn(mas7_update);
        let mask = !(page_size - 1);
        Self {
            tid: mas.tid(),
            epn,
            rpn,
            ea: (epn << PAGE_SHIFT) & mask,
            ra: (rpn << PAGE_SHIFT) & mask,
            page_size,
            wimge: mas.wimge(),
            x01: mas.x01(),
            u03: mas.u03(),
            permission: permis_to_internal(mas.permis()),
            ts: mas.ts(),
            tsize,
            iprot: mas.iprot(),
            valid: mas.valid(),
        }
    }

    /// Fills MAS1/2/3/7 from this entry. MAS0 is left to the caller.
    pub(crate) fn to_mas(&self, mas: &mut MasRegisters, mas7_update: bool) {
        let mut mas1 = place(self.tid, MAS1_TID) | place(u32::from(self.tsize), MAS1_TSIZE);
        if self.valid {
            mas1 |= MAS1_V;
        }
        if self.iprot {
            mas1 |= MAS1_IPROT;
        }
        if self.ts {
            mas1 |= MAS1_TS;
        }
        mas.mas1 = mas1;
        mas.mas2 = place(self.epn as u32, MAS2_EPN)
            | place(u32::from(self.x01), MAS2_X01)
            | place(u32::from(self.wimge), MAS2_WIMGE);
        mas.mas3 = place(self.rpn as u32, MAS3_RPN)
            | place(u32::from(self.u03), MAS3_U03)
            | (u32::from(internal_to_permis(self.permission)) & MAS3_PERMIS);
        if mas7_update {
            mas.mas7 = ((self.rpn >> 20) as u32) & MAS7_RPN;
        }
    }

    /// MAS3 form of the permission bits.
    #[inline]
    pub fn permis(&self) -> u8 {
        internal_to_permis(self.permission)
    }

    #[inline]
    pub(crate) fn covers(&self, ea: u64) -> bool {
        (ea & !(self.page_size - 1)) == self.ea
    }

    #[inline]
    pub(crate) fn matches(&self, ea: u64, pid: u32, address_space: bool) -> bool {
        self.valid && self.ts == address_space && self.tid == pid && self.covers(ea)
    }

    #[inline]
    pub(crate) fn translate(&self, ea: u64) -> u64 {
        self.ra | (ea & (self.page_size - 1))
    }
}

/// A set-associative TLB array. A fully associative CAM is the `sets == 1` case.
#[derive(Debug, Clone)]
pub(crate) struct TlbArray {
    sets: usize,
    ways: usize,
    /// Page size of every entry in the array, for fixed-size arrays.
    fixed_page_size: Option<u64>,
    entries: Vec<TlbEntry>,
}

impl TlbArray {
    pub(crate) fn new(sets: usize, ways: usize, fixed_page_size: Option<u64>) -> Self {
        Self {
            sets,
            ways,
            fixed_page_size,
            entries: vec![TlbEntry::default(); sets * ways],
        }
    }

    #[inline]
    pub(crate) fn sets(&self) -> usize {
        self.sets
    }

    #[inline]
    pub(crate) fn ways(&self) -> usize {
        self.ways
    }

    #[inline]
    pub(crate) fn fixed_page_size(&self) -> Option<u64> {
        self.fixed_page_size
    }

    /// Set holding entries for `ea`; always 0 for a CAM.
    #[inline]
    pub(crate) fn set_index(&self, ea: u64) -> usize {
        ((ea >> PAGE_SHIFT) as usize) & (self.sets - 1)
    }

    #[inline]
    pub(crate) fn entry(&self, set: usize, way: usize) -> &TlbEntry {
        &self.entries[set * self.ways + way]
    }

    #[inline]
    pub(crate) fn entry_mut(&mut self, set: usize, way: usize) -> &mut TlbEntry {
        &mut self.entries[set * self.ways + way]
    }

    /// Finds the first matching entry in set-then-way order.
    pub(crate) fn lookup(&self, ea: u64, pid: u32, address_space: bool) -> Option<(usize, usize, &TlbEntry)> {
        let sets = if self.sets == 1 {
            0..1
        } else {
            let set = self.set_index(ea);
            set..set + 1
        };
        for set in sets {
            for way in 0..self.ways {
                let entry = self.entry(set, way);
                if entry.matches(ea, pid, address_space) {
                    return Some((set, way, entry));
                }
            }
        }
        None
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, usize, &TlbEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(move |(i, e)| (i / self.ways, i % self.ways, e))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut TlbEntry> + '_ {
        self.entries.iter_mut()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.fill(TlbEntry::default());
    }
}
