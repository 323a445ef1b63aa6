use std::sync::Arc;

use bitflags::bitflags;
use ppc_memory::{Endian, Memory};
use ppc_mmu::{AccessType, MmuFault, Mmu, Translation};

use crate::exception::{FatalError, SimFault};
use crate::regs::{hid0, spr, Msr};
use crate::reservation::{LocalReservation, ReservationTable};
use crate::state::CpuState;

bitflags! {
    /// Work the execution loop must do after a handler returns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SyncRequest: u8 {
        /// Context synchronization: drop the decode cache.
        const CONTEXT = 1 << 0;
        /// Instruction cache block invalidate; pages are listed in `invalidated_pages`.
        const ICACHE  = 1 << 1;
    }
}

/// Everything an opcode handler may touch: registers, the MMU, memory and the
/// reservation machinery.
pub struct CpuCore {
    pub state: CpuState,
    pub mmu: Mmu,
    cpu_id: u32,
    memory: Option<Arc<dyn Memory>>,
    pub(crate) reservations: Arc<ReservationTable>,
    reservation: LocalReservation,
    pub(crate) sync: SyncRequest,
    pub(crate) invalidated_pages: Vec<u64>,
}

impl std::fmt::Debug for CpuCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuCore")
            .field("cpu_id", &self.cpu_id)
            .field("state", &self.state)
            .field("has_memory", &self.memory.is_some())
            .field("reservation", &self.reservation)
            .finish_non_exhaustive()
    }
}

impl CpuCore {
    pub fn new(cpu_id: u32, mmu: Mmu, reservations: Arc<ReservationTable>) -> Self {
        let mut state = CpuState::new(cpu_id);
        let geometry = mmu.geometry();
        // TLBnCFG: associativity in bits 0..7, entry count in the low 12 bits.
        state.set_spr32(
            spr::TLB0CFG,
            ((geometry.tlb0_ways as u32) << 24) | (geometry.tlb0_sets * geometry.tlb0_ways) as u32,
        );
        state.set_spr32(
            spr::TLB1CFG,
            ((geometry.tlb1_entries as u32) << 24) | geometry.tlb1_entries as u32,
        );
        Self {
            state,
            mmu,
            cpu_id,
            memory: None,
            reservations,
            reservation: LocalReservation::default(),
            sync: SyncRequest::empty(),
            invalidated_pages: Vec::new(),
        }
    }

    #[inline]
    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }

    pub fn register_memory(&mut self, memory: Arc<dyn Memory>) {
        self.memory = Some(memory);
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    pub fn memory(&self) -> Result<&Arc<dyn Memory>, FatalError> {
        self.memory.as_ref().ok_or(FatalError::NoMemory)
    }

    pub fn reservations(&self) -> &Arc<ReservationTable> {
        &self.reservations
    }

    pub fn local_reservation(&self) -> LocalReservation {
        self.reservation
    }

    /// `HID0[EN_MAS7_UPDATE]`: MAS7 carries the upper real address bits.
    #[inline]
    pub fn mas7_update(&self) -> bool {
        self.state.spr32(spr::HID0) & hid0::EN_MAS7_UPDATE != 0
    }

    pub(crate) fn request_sync(&mut self, request: SyncRequest) {
        self.sync |= request;
    }

    /// Instruction-side translation (`MSR[IS]`, PID0..2).
    pub fn translate_fetch(&mut self, ea: u64) -> Result<Translation, MmuFault> {
        let msr = self.state.msr();
        let pids = self.state.pids();
        self.mmu.translate(
            ea,
            AccessType::Execute,
            &pids,
            !msr.contains(Msr::PR),
            msr.contains(Msr::IS),
        )
    }

    /// Data-side translation (`MSR[DS]`, PID0..2).
    pub fn translate_data(&mut self, ea: u64, access: AccessType) -> Result<Translation, MmuFault> {
        let msr = self.state.msr();
        let pids = self.state.pids();
        self.mmu.translate(
            ea,
            access,
            &pids,
            !msr.contains(Msr::PR),
            msr.contains(Msr::DS),
        )
    }

    /// Translates every page `[ea, ea+len)` touches before any access is made, so a
    /// fault on a later page leaves memory untouched.
    fn translate_span(
        &mut self,
        ea: u64,
        len: usize,
        access: AccessType,
    ) -> Result<(Endian, Vec<(u64, usize)>), SimFault> {
        let mut chunks = Vec::with_capacity(2);
        let mut endian = Endian::Big;
        let mut done = 0usize;
        while done < len {
            let cur = ea.wrapping_add(done as u64) & 0xffff_ffff;
            let t = self.translate_data(cur, access)?;
            if done == 0 {
                endian = Endian::from_wimge(t.wimge);
            }
            let page_left = (t.page_size - (cur & (t.page_size - 1))) as usize;
            let n = page_left.min(len - done);
            chunks.push((t.ra, n));
            done += n;
        }
        Ok((endian, chunks))
    }

    /// Reads `buf.len()` bytes at `ea` in address order; returns the first page's
    /// byte order.
    pub fn read_bytes(&mut self, ea: u64, buf: &mut [u8]) -> Result<Endian, SimFault> {
        let (endian, chunks) = self.translate_span(ea, buf.len(), AccessType::Read)?;
        let memory = self.memory()?;
        let mut off = 0;
        for (ra, n) in chunks {
            memory.read_into(ra, &mut buf[off..off + n])?;
            off += n;
        }
        Ok(endian)
    }

    /// Writes `buf` at `ea` in address order, cancelling reservations on the lines
    /// it touches.
    pub fn write_bytes(&mut self, ea: u64, buf: &[u8]) -> Result<(), SimFault> {
        let (_, chunks) = self.translate_span(ea, buf.len(), AccessType::Write)?;
        self.write_chunks(&chunks, buf)
    }

    fn write_chunks(&mut self, chunks: &[(u64, usize)], buf: &[u8]) -> Result<(), SimFault> {
        let memory = self.memory()?;
        let mut off = 0;
        for &(ra, n) in chunks {
            let bytes = &buf[off..off + n];
            self.reservations
                .store(ra, n as u64, || memory.write_from(ra, bytes))?;
            off += n;
        }
        Ok(())
    }

    /// Loads a `size`-byte value (1..=8) in the page's byte order, reversed if
    /// `reverse` is set (`lwbrx` and friends).
    pub fn load(&mut self, ea: u64, size: usize, reverse: bool) -> Result<u64, SimFault> {
        let mut buf = [0u8; 8];
        let endian = self.read_bytes(ea, &mut buf[..size])?;
        let big = endian.is_big() != reverse;
        let bytes = &buf[..size];
        Ok(if big {
            bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
        } else {
            bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
        })
    }

    pub fn store(&mut self, ea: u64, size: usize, value: u64, reverse: bool) -> Result<(), SimFault> {
        let (endian, chunks) = self.translate_span(ea, size, AccessType::Write)?;
        let buf = encode(value, size, endian.is_big() != reverse);
        self.write_chunks(&chunks, &buf[..size])
    }

    #[inline]
    pub fn load_u8(&mut self, ea: u64) -> Result<u8, SimFault> {
        Ok(self.load(ea, 1, false)? as u8)
    }

    #[inline]
    pub fn load_u16(&mut self, ea: u64) -> Result<u16, SimFault> {
        Ok(self.load(ea, 2, false)? as u16)
    }

    #[inline]
    pub fn load_u32(&mut self, ea: u64) -> Result<u32, SimFault> {
        Ok(self.load(ea, 4, false)? as u32)
    }

    #[inline]
    pub fn store_u8(&mut self, ea: u64, value: u8) -> Result<(), SimFault> {
        self.store(ea, 1, u64::from(value), false)
    }

    #[inline]
    pub fn store_u16(&mut self, ea: u64, value: u16) -> Result<(), SimFault> {
        self.store(ea, 2, u64::from(value), false)
    }

    #[inline]
    pub fn store_u32(&mut self, ea: u64, value: u32) -> Result<(), SimFault> {
        self.store(ea, 4, u64::from(value), false)
    }

    // ---- Reservations ----

    /// Reserves `[ea, ea+size)`: records the real address locally and claims its cache
    /// line in the shared table.
    pub fn set_reservation(&mut self, ea: u64, size: u32) -> Result<(), SimFault> {
        let t = self.translate_data(ea & 0xffff_ffff, AccessType::Write)?;
        self.reservation = LocalReservation {
            ra: t.ra,
            size,
            valid: true,
        };
        self.reservations.reserve(t.ra, self.cpu_id);
        Ok(())
    }

    /// True iff this core still holds the line and reserved exactly `(ea, size)`.
    /// The reservation is gone afterwards either way.
    pub fn check_reservation(&mut self, ea: u64, size: u32) -> Result<bool, SimFault> {
        let t = self.translate_data(ea & 0xffff_ffff, AccessType::Write)?;
        let held = self.reservations.check_and_release(t.ra, self.cpu_id);
        let exact = self.reservation.matches(t.ra, size);
        if self.reservation.valid && !held {
            self.reservations.release(self.reservation.ra, self.cpu_id);
        }
        self.reservation.clear();
        Ok(held && exact)
    }

    /// `check_reservation` followed, on success, by a store of the naturally aligned
    /// `size`-byte `value` at `ea`. The check and the write happen under the
    /// reservation table lock.
    pub fn store_conditional(&mut self, ea: u64, size: u32, value: u64) -> Result<bool, SimFault> {
        let t = self.translate_data(ea & 0xffff_ffff, AccessType::Write)?;
        let buf = encode(value, size as usize, Endian::from_wimge(t.wimge).is_big());
        let bytes = &buf[..size as usize];
        let stored = if self.reservation.matches(t.ra, size) {
            let memory = self.memory()?;
            self.reservations
                .store_conditional(t.ra, self.cpu_id, || memory.write_from(t.ra, bytes))
                .transpose()?
                .is_some()
        } else {
            self.reservations.check_and_release(t.ra, self.cpu_id);
            false
        };
        if self.reservation.valid && !stored {
            self.reservations.release(self.reservation.ra, self.cpu_id);
        }
        self.reservation.clear();
        Ok(stored)
    }

    pub fn clear_reservation(&mut self, ea: u64) -> Result<(), SimFault> {
        let t = self.translate_data(ea & 0xffff_ffff, AccessType::Write)?;
        self.reservations.release(t.ra, self.cpu_id);
        if self.reservation.valid
            && self.reservations.line_of(self.reservation.ra) == self.reservations.line_of(t.ra)
        {
            self.reservation.clear();
        }
        Ok(())
    }
}

/// `value`'s low `size` bytes in memory order.
fn encode(value: u64, size: usize, big: bool) -> [u8; 8] {
    let mut buf = [0u8; 8];
    for (i, slot) in buf[..size].iter_mut().enumerate() {
        let shift = if big { (size - 1 - i) * 8 } else { i * 8 };
        *slot = (value >> shift) as u8;
    }
    buf
}
