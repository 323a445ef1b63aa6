use std::sync::Arc;

use ppc_memory::PhysicalMemory;
use ppc_mmu::mas::{self, MasRegisters};
use ppc_mmu::{AccessType, Mmu, MmuGeometry};

use super::alu::{add_with_flags, rotate_mask};
use super::*;
use crate::core::SyncRequest;
use crate::decoder::{Decoder, PpcDecoder};
use crate::exception::ExceptionKind;
use crate::regs::{cr, mmucsr0, spr, xer, Dbcr0, Msr};
use crate::reservation::ReservationTable;

const PC: u64 = 0x1000;
const DATA: u64 = 0x4000;

struct Harness {
    core: CpuCore,
    table: HandlerTable,
    decoder: PpcDecoder,
}

impl Harness {
    fn new() -> Self {
        let mmu = Mmu::new(MmuGeometry::default()).unwrap();
        let mut core = CpuCore::new(0, mmu, Arc::new(ReservationTable::new(32)));
        core.register_memory(Arc::new(PhysicalMemory::new(36).unwrap()));
        // TLB1 entry 0: EA 0..16 MiB identity mapped, every permission.
        core.mmu.write_entry(
            &MasRegisters {
                mas0: mas::MAS0_TLBSEL,
                mas1: mas::MAS1_V | mas::MAS1_IPROT | (7 << 8),
                mas3: 0x3f,
                ..Default::default()
            },
            false,
        );
        core.state.pc = PC;
        Self {
            core,
            table: HandlerTable::new(),
            decoder: PpcDecoder::new(),
        }
    }

    fn exec(&mut self, text: &str) -> HandlerResult {
        let insn = self
            .decoder
            .assemble(text, self.core.state.pc)
            .unwrap_or_else(|e| panic!("{text}: {e}"));
        self.run(&insn)
    }

    fn exec_raw(&mut self, raw: u32) -> HandlerResult {
        let insn = self.decoder.decode(raw, self.core.state.pc).unwrap();
        self.run(&insn)
    }

    fn run(&mut self, insn: &DecodedInstruction) -> HandlerResult {
        self.core.sync = SyncRequest::empty();
        self.core.state.nip = (self.core.state.pc + 4) & 0xffff_ffff;
        self.table.execute(&mut self.core, insn)
    }

    fn r(&self, n: u32) -> u32 {
        self.core.state.gpr32(n)
    }

    fn set_r(&mut self, n: u32, v: u32) {
        self.core.state.set_gpr32(n, v);
    }

    fn user_mode(&mut self) {
        self.core.state.msr |= Msr::PR.bits();
    }
}

fn program(cause: Cause) -> HandlerResult {
    Err(PpcException::program(cause).into())
}

// ---- Integer ----

#[test]
fn add_with_flags_reports_carry_and_overflow() {
    assert_eq!(add_with_flags(0xffff_ffff, 1, false), (0, true, false));
    assert_eq!(add_with_flags(0x7fff_ffff, 1, false), (0x8000_0000, false, true));
    assert_eq!(add_with_flags(1, 1, true), (3, false, false));
    assert_eq!(add_with_flags(0x8000_0000, 0x8000_0000, false), (0, true, true));
}

#[test]
fn rotate_mask_wraps_when_mb_exceeds_me() {
    assert_eq!(rotate_mask(0, 31), 0xffff_ffff);
    assert_eq!(rotate_mask(24, 31), 0x0000_00ff);
    assert_eq!(rotate_mask(28, 3), 0xf000_000f);
    assert_eq!(rotate_mask(5, 5), 0x0400_0000);
}

#[test]
fn addo_record_sets_overflow_and_summary() {
    let mut h = Harness::new();
    h.set_r(3, 0x7fff_ffff);
    h.set_r(4, 1);
    h.exec("addo. r5, r3, r4").unwrap();
    assert_eq!(h.r(5), 0x8000_0000);
    assert_eq!(h.core.state.xer() & (xer::OV | xer::SO), xer::OV | xer::SO);
    assert_eq!(h.core.state.cr_field(0), cr::LT | cr::SO);

    // OV clears on the next non-overflowing `o` form, SO stays.
    h.exec("addo r6, r4, r4").unwrap();
    assert_eq!(h.r(6), 2);
    assert_eq!(h.core.state.xer() & (xer::OV | xer::SO), xer::SO);
}

#[test]
fn subfc_carry_means_no_borrow() {
    let mut h = Harness::new();
    h.set_r(3, 3);
    h.set_r(4, 5);
    h.exec("subfc r5, r3, r4").unwrap();
    assert_eq!(h.r(5), 2);
    assert!(h.core.state.carry());

    h.exec("subfc r5, r4, r3").unwrap();
    assert_eq!(h.r(5), 0xffff_fffe);
    assert!(!h.core.state.carry());
}

#[test]
fn divide_by_zero_yields_zero_and_overflow() {
    let mut h = Harness::new();
    h.set_r(3, 100);
    h.set_r(4, 0);
    h.set_r(5, 0xdead_beef);
    h.exec("divwo r5, r3, r4").unwrap();
    assert_eq!(h.r(5), 0);
    assert_ne!(h.core.state.xer() & xer::OV, 0);

    h.set_r(3, 0x8000_0000);
    h.set_r(4, 0xffff_ffff);
    h.exec("divw r6, r3, r4").unwrap();
    assert_eq!(h.r(6), 0);

    h.set_r(3, (-21i32) as u32);
    h.set_r(4, 4);
    h.exec("divw r7, r3, r4").unwrap();
    assert_eq!(h.r(7) as i32, -5);
}

#[test]
fn srawi_sets_carry_only_for_negative_inexact_shifts() {
    let mut h = Harness::new();
    h.set_r(3, (-5i32) as u32);
    h.exec("srawi r4, r3, 1").unwrap();
    assert_eq!(h.r(4) as i32, -3);
    assert!(h.core.state.carry());

    h.set_r(3, (-4i32) as u32);
    h.exec("srawi r4, r3, 1").unwrap();
    assert_eq!(h.r(4) as i32, -2);
    assert!(!h.core.state.carry());

    h.set_r(3, 5);
    h.exec("srawi r4, r3, 1").unwrap();
    assert_eq!(h.r(4), 2);
    assert!(!h.core.state.carry());
}

#[test]
fn rlwinm_extracts_a_byte() {
    let mut h = Harness::new();
    h.set_r(3, 0x1234_5678);
    h.exec("rlwinm r4, r3, 8, 24, 31").unwrap();
    assert_eq!(h.r(4), 0x12);
    h.exec("slwi r5, r3, 4").unwrap();
    assert_eq!(h.r(5), 0x2345_6780);
}

#[test]
fn signed_and_unsigned_compares_disagree_on_negative_values() {
    let mut h = Harness::new();
    h.set_r(3, 0xffff_ffff);
    h.set_r(4, 1);
    h.exec("cmpw r3, r4").unwrap();
    h.exec("cmplw cr7, r3, r4").unwrap();
    assert_eq!(h.core.state.cr_field(0), cr::LT);
    assert_eq!(h.core.state.cr_field(7), cr::GT);
    h.exec("cmpwi cr3, r4, 1").unwrap();
    assert_eq!(h.core.state.cr_field(3), cr::EQ);
}

#[test]
fn mtcrf_replaces_selected_fields() {
    let mut h = Harness::new();
    h.core.state.cr = 0x1234_5678;
    h.set_r(3, 0xffff_ffff);
    h.exec("mtcrf 0x81, r3").unwrap();
    assert_eq!(h.core.state.cr, 0xf234_567f);
    h.exec("mfcr r4").unwrap();
    assert_eq!(h.r(4), 0xf234_567f);
}

// ---- Branches ----

#[test]
fn bdnz_decrements_ctr_and_falls_through_at_zero() {
    let mut h = Harness::new();
    h.core.state.set_spr32(spr::CTR, 2);
    h.exec("bdnz 0x2000").unwrap();
    assert_eq!(h.core.state.nip, 0x2000);
    assert_eq!(h.core.state.spr32(spr::CTR), 1);

    h.exec("bdnz 0x2000").unwrap();
    assert_eq!(h.core.state.nip, PC + 4);
    assert_eq!(h.core.state.spr32(spr::CTR), 0);
}

#[test]
fn bl_links_and_blr_returns() {
    let mut h = Harness::new();
    h.exec("bl 0x3000").unwrap();
    assert_eq!(h.core.state.nip, 0x3000);
    assert_eq!(h.core.state.spr32(spr::LR), (PC + 4) as u32);

    h.core.state.pc = 0x3000;
    h.exec("blr").unwrap();
    assert_eq!(h.core.state.nip, PC + 4);
}

#[test]
fn conditional_branch_tests_cr_bit() {
    let mut h = Harness::new();
    h.core.state.set_cr_field(0, cr::EQ);
    h.exec("beq 0x1100").unwrap();
    assert_eq!(h.core.state.nip, 0x1100);
    h.exec("bne 0x1100").unwrap();
    assert_eq!(h.core.state.nip, PC + 4);
}

#[test]
fn bctrl_jumps_to_ctr_and_links() {
    let mut h = Harness::new();
    h.core.state.set_spr32(spr::CTR, 0x5003);
    h.exec("bctrl").unwrap();
    assert_eq!(h.core.state.nip, 0x5000);
    assert_eq!(h.core.state.spr32(spr::LR), (PC + 4) as u32);
}

// ---- Loads and stores ----

#[test]
fn stores_are_big_endian_and_loads_zero_or_sign_extend() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32);
    h.set_r(3, 0x8899_aabb);
    h.exec("stw r3, 0(r1)").unwrap();
    h.exec("lbz r4, 0(r1)").unwrap();
    assert_eq!(h.r(4), 0x88);
    h.exec("lhz r5, 2(r1)").unwrap();
    assert_eq!(h.r(5), 0xaabb);
    h.exec("lha r6, 2(r1)").unwrap();
    assert_eq!(h.r(6), 0xffff_aabb);
}

#[test]
fn byte_reversed_forms_swap() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32);
    h.set_r(2, 8);
    h.set_r(3, 0x1122_3344);
    h.exec("stwbrx r3, r1, r2").unwrap();
    assert_eq!(h.core.load_u32(DATA + 8), Ok(0x4433_2211));
    h.exec("lwbrx r4, r1, r2").unwrap();
    assert_eq!(h.r(4), 0x1122_3344);
    h.exec("lhbrx r5, r1, r2").unwrap();
    assert_eq!(h.r(5), 0x3344);
}

#[test]
fn update_forms_write_back_and_reject_bad_registers() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32 + 0x100);
    h.set_r(3, 7);
    h.exec("stwu r3, -16(r1)").unwrap();
    assert_eq!(h.r(1), DATA as u32 + 0xf0);
    h.exec("lwzu r4, 0(r1)").unwrap();
    assert_eq!(h.r(4), 7);

    assert_eq!(h.exec("lwzu r1, 4(r1)"), program(Cause::ILLEGAL));
    assert_eq!(h.exec("lwzu r4, 4(r0)"), program(Cause::ILLEGAL));
    assert_eq!(h.exec("stwu r3, 4(r0)"), program(Cause::ILLEGAL));
    assert_eq!(h.r(1), DATA as u32 + 0xf0);
}

#[test]
fn load_store_multiple() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32);
    for r in 29..32 {
        h.set_r(r, r * 0x100);
    }
    h.exec("stmw r29, 0(r1)").unwrap();
    for r in 29..32 {
        h.set_r(r, 0);
    }
    h.exec("lmw r29, 0(r1)").unwrap();
    assert_eq!((h.r(29), h.r(30), h.r(31)), (0x1d00, 0x1e00, 0x1f00));

    // rA inside the loaded range.
    assert_eq!(h.exec("lmw r1, 0(r31)"), program(Cause::ILLEGAL));

    h.set_r(1, DATA as u32 + 2);
    let err = h.exec("stmw r30, 0(r1)").unwrap_err();
    assert_eq!(err, PpcException::alignment(DATA + 2, true).into());
}

#[test]
fn stwcx_succeeds_once_per_reservation() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32);
    h.core.store_u32(DATA, 41).unwrap();

    h.exec("lwarx r3, 0, r1").unwrap();
    assert_eq!(h.r(3), 41);
    h.exec("addi r3, r3, 1").unwrap();
    h.exec("stwcx. r3, 0, r1").unwrap();
    assert_eq!(h.core.state.cr_field(0), cr::EQ);
    assert_eq!(h.core.load_u32(DATA), Ok(42));

    // The reservation was consumed.
    h.set_r(3, 99);
    h.exec("stwcx. r3, 0, r1").unwrap();
    assert_eq!(h.core.state.cr_field(0), 0);
    assert_eq!(h.core.load_u32(DATA), Ok(42));
}

#[test]
fn stwcx_copies_summary_overflow() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32);
    h.core.state.set_spr32(spr::XER, xer::SO);
    h.exec("lwarx r3, 0, r1").unwrap();
    h.exec("stwcx. r3, 0, r1").unwrap();
    assert_eq!(h.core.state.cr_field(0), cr::EQ | cr::SO);
}

#[test]
fn plain_store_to_the_line_makes_stwcx_fail() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32);
    h.exec("lwarx r3, 0, r1").unwrap();
    assert_eq!(h.core.reservations.owner(DATA), Some(0));
    h.core.store_u16(DATA + 0x1e, 7).unwrap();
    assert_eq!(h.core.reservations.owner(DATA), None);

    h.set_r(3, 99);
    h.exec("stwcx. r3, 0, r1").unwrap();
    assert_eq!(h.core.state.cr_field(0), 0);
    assert_eq!(h.core.load_u32(DATA), Ok(0));
    assert!(h.core.reservations.is_empty());
}

#[test]
fn misaligned_lwarx_is_an_alignment_exception() {
    let mut h = Harness::new();
    h.set_r(1, DATA as u32 + 1);
    let err = h.exec("lwarx r3, 0, r1").unwrap_err();
    match err {
        SimFault::Exception(exc) => {
            assert_eq!(exc.kind, ExceptionKind::Alignment);
            assert_eq!(exc.ea, DATA + 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn dcbz_clears_the_whole_line() {
    let mut h = Harness::new();
    h.write_pattern();
    h.set_r(1, DATA as u32);
    h.set_r(2, 0x25);
    h.exec("dcbz r1, r2").unwrap();
    let mut line = [0xffu8; 32];
    h.core.read_bytes(DATA + 0x20, &mut line).unwrap();
    assert_eq!(line, [0u8; 32]);
    assert_eq!(h.core.load_u8(DATA + 0x1f), Ok(0xa5));
    assert_eq!(h.core.load_u8(DATA + 0x40), Ok(0xa5));
}

impl Harness {
    fn write_pattern(&mut self) {
        self.core.write_bytes(DATA, &[0xa5; 0x80]).unwrap();
    }
}

#[test]
fn unmapped_store_reports_a_data_storage_fault() {
    let mut h = Harness::new();
    h.set_r(1, 0x4000_0000);
    let err = h.exec("stw r3, 0(r1)").unwrap_err();
    match err {
        SimFault::Exception(exc) => {
            assert_eq!(exc.kind, ExceptionKind::DataTlb);
            assert_eq!(exc.ea, 0x4000_0000);
            assert!(exc.cause.contains(Cause::STORE));
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ---- Supervisor and SPRs ----

#[test]
fn privileged_opcodes_trap_in_user_mode() {
    let mut h = Harness::new();
    h.user_mode();
    assert_eq!(h.exec("mfmsr r3"), program(Cause::PRIVILEGED));
    assert_eq!(h.exec("tlbwe"), program(Cause::PRIVILEGED));
    assert_eq!(h.exec("wrteei 1"), program(Cause::PRIVILEGED));
    // User-level SPRs stay accessible.
    h.set_r(3, 0x1234);
    h.exec("mtlr r3").unwrap();
    h.exec("mflr r4").unwrap();
    assert_eq!(h.r(4), 0x1234);
}

#[test]
fn spr_privilege_is_checked_per_register() {
    let mut h = Harness::new();
    h.core.state.set_spr32(spr::SPRG4, 0xcafe);
    h.user_mode();
    h.exec(&format!("mfspr r3, {}", spr::SPRG4R)).unwrap();
    assert_eq!(h.r(3), 0xcafe);
    assert_eq!(
        h.exec(&format!("mfspr r3, {}", spr::SPRG4)),
        program(Cause::PRIVILEGED)
    );
    assert_eq!(
        h.exec(&format!("mtspr {}, r3", spr::SPRG4R)),
        program(Cause::ILLEGAL)
    );
}

#[test]
fn unknown_spr_is_illegal() {
    let mut h = Harness::new();
    // mfspr r3, 5
    assert_eq!(h.exec_raw(0x7c65_02a6), program(Cause::ILLEGAL));
}

#[test]
fn status_registers_are_write_one_to_clear() {
    let mut h = Harness::new();
    h.core.state.set_spr32(spr::DBSR, 0x0f00_0000);
    h.set_r(3, 0x0100_0000);
    h.exec(&format!("mtspr {}, r3", spr::DBSR)).unwrap();
    assert_eq!(h.core.state.spr32(spr::DBSR), 0x0e00_0000);
}

#[test]
fn pid_writes_keep_eight_bits() {
    let mut h = Harness::new();
    h.set_r(3, 0x1234);
    for n in [spr::PID0, spr::PID1, spr::PID2] {
        h.exec(&format!("mtspr {n}, r3")).unwrap();
        assert_eq!(h.core.state.spr32(n), 0x34);
    }
    assert!(h.core.sync.contains(SyncRequest::CONTEXT));
}

#[test]
fn read_only_spr_writes_are_ignored() {
    let mut h = Harness::new();
    let pvr = h.core.state.spr32(spr::PVR);
    h.set_r(3, 0x1111_1111);
    h.exec(&format!("mtspr {}, r3", spr::PVR)).unwrap();
    assert_eq!(h.core.state.spr32(spr::PVR), pvr);
}

#[test]
fn mmucsr0_flash_invalidates_tlb0_only() {
    let mut h = Harness::new();
    // TLB0, way 0: EA 0x2000_0000 → RA 0x0030_0000.
    let tlb0 = MasRegisters {
        mas0: 0,
        mas1: mas::MAS1_V | (1 << 8),
        mas2: 0x2000_0000,
        mas3: 0x0030_0000 | 0x3f,
        ..Default::default()
    };
    h.core.mmu.write_entry(&tlb0, false);
    assert_eq!(h.core.mmu.valid_entries().len(), 2);

    h.set_r(3, mmucsr0::TLB0_FI);
    h.exec(&format!("mtspr {}, r3", spr::MMUCSR0)).unwrap();
    assert_eq!(h.core.mmu.valid_entries().len(), 1);
    assert_eq!(h.core.state.spr32(spr::MMUCSR0), 0);
    assert!(h.core.sync.contains(SyncRequest::CONTEXT));
    assert!(h.core.translate_data(0x2000_0000, AccessType::Read).is_err());
}

#[test]
fn pid_write_requests_context_sync() {
    let mut h = Harness::new();
    h.set_r(3, 5);
    h.exec(&format!("mtspr {}, r3", spr::PID0)).unwrap();
    assert_eq!(h.core.state.pids()[0], 5);
    assert!(h.core.sync.contains(SyncRequest::CONTEXT));
}

#[test]
fn rfi_restores_msr_and_resumes_at_srr0() {
    let mut h = Harness::new();
    let user = (Msr::PR | Msr::EE).bits();
    h.core.state.set_spr32(spr::SRR0, 0x2003);
    h.core.state.set_spr32(spr::SRR1, user);
    h.exec("rfi").unwrap();
    assert_eq!(h.core.state.msr, user);
    assert_eq!(h.core.state.nip, 0x2000);
    assert!(h.core.sync.contains(SyncRequest::CONTEXT));
}

#[test]
fn rfci_uses_the_critical_save_registers() {
    let mut h = Harness::new();
    h.core.state.set_spr32(spr::CSRR0, 0x3000);
    h.core.state.set_spr32(spr::CSRR1, Msr::ME.bits());
    h.core.state.set_spr32(spr::SRR0, 0x9999);
    h.exec("rfci").unwrap();
    assert_eq!(h.core.state.nip, 0x3000);
    assert_eq!(h.core.state.msr, Msr::ME.bits());
}

#[test]
fn sc_points_srr0_past_itself() {
    let mut h = Harness::new();
    let err = h.exec("sc").unwrap_err();
    assert_eq!(
        err,
        PpcException::new(ExceptionKind::SystemCall, Cause::empty(), 0).into()
    );
    assert_eq!(h.core.state.pc, PC + 4);
}

#[test]
fn wrteei_toggles_external_enable() {
    let mut h = Harness::new();
    h.exec("wrteei 1").unwrap();
    assert!(h.core.state.msr().contains(Msr::EE));
    h.exec("wrteei 0").unwrap();
    assert!(!h.core.state.msr().contains(Msr::EE));
}

#[test]
fn trap_becomes_debug_event_when_enabled() {
    let mut h = Harness::new();
    h.set_r(3, 4);
    h.exec("tw 4, r3, r4").unwrap();
    assert_eq!(h.exec("tw 4, r3, r3"), program(Cause::TRAP));

    h.core.state.set_spr32(spr::DBCR0, Dbcr0::TRAP.bits());
    let err = h.exec("trap").unwrap_err();
    assert_eq!(
        err,
        PpcException::new(ExceptionKind::Debug, Cause::DBG_TRAP, PC).into()
    );
}

// ---- TLB management ----

fn program_tlb1(h: &mut Harness, esel: u32, epn: u32, rpn: u32) {
    let s = &mut h.core.state;
    s.set_spr32(spr::MAS0, mas::MAS0_TLBSEL | (esel << 16));
    s.set_spr32(spr::MAS1, mas::MAS1_V | (1 << 8));
    s.set_spr32(spr::MAS2, epn);
    s.set_spr32(spr::MAS3, rpn | 0x3f);
    s.set_spr32(spr::MAS7, 0);
}

#[test]
fn tlbwe_then_translate() {
    let mut h = Harness::new();
    program_tlb1(&mut h, 2, 0x8000_0000, 0x0020_0000);
    h.exec("tlbwe").unwrap();
    assert!(h.core.sync.contains(SyncRequest::CONTEXT));
    let t = h.core.translate_data(0x8000_0010, AccessType::Write).unwrap();
    assert_eq!(t.ra, 0x0020_0010);
    assert_eq!(t.page_size, 4096);
}

#[test]
fn tlbre_reads_back_the_selected_entry() {
    let mut h = Harness::new();
    program_tlb1(&mut h, 3, 0x9000_0000, 0x0040_0000);
    h.exec("tlbwe").unwrap();
    for n in [spr::MAS1, spr::MAS2, spr::MAS3] {
        h.core.state.set_spr32(n, 0);
    }
    h.core.state.set_spr32(spr::MAS0, mas::MAS0_TLBSEL | (3 << 16));
    h.exec("tlbre").unwrap();
    assert_ne!(h.core.state.spr32(spr::MAS1) & mas::MAS1_V, 0);
    assert_eq!(h.core.state.spr32(spr::MAS2) & mas::MAS2_EPN, 0x9000_0000);
    assert_eq!(h.core.state.spr32(spr::MAS3) & mas::MAS3_RPN, 0x0040_0000);
}

#[test]
fn tlbsx_hit_fills_mas_and_miss_clears_valid() {
    let mut h = Harness::new();
    program_tlb1(&mut h, 4, 0xa000_0000, 0x0050_0000);
    h.exec("tlbwe").unwrap();
    h.core.state.set_spr32(spr::MAS6, 0);

    h.set_r(3, 0xa000_0100);
    h.exec("tlbsx 0, r3").unwrap();
    let mas0 = h.core.state.spr32(spr::MAS0);
    assert_eq!(mas0 & mas::MAS0_TLBSEL, mas::MAS0_TLBSEL);
    assert_eq!((mas0 & mas::MAS0_ESEL) >> 16, 4);
    assert_eq!(h.core.state.spr32(spr::MAS3) & mas::MAS3_RPN, 0x0050_0000);

    h.set_r(3, 0x7000_0000);
    h.exec("tlbsx 0, r3").unwrap();
    assert_eq!(h.core.state.spr32(spr::MAS1) & mas::MAS1_V, 0);
}

#[test]
fn tlbivax_keeps_protected_entries() {
    let mut h = Harness::new();
    program_tlb1(&mut h, 5, 0xb000_0000, 0x0060_0000);
    h.exec("tlbwe").unwrap();
    assert_eq!(h.core.mmu.valid_entries().len(), 2);

    // TLB1 invalidate-all: bit 0x8 selects TLB1, bit 0x4 the whole array.
    h.set_r(3, 0x0c);
    h.exec("tlbivax 0, r3").unwrap();
    assert_eq!(h.core.mmu.valid_entries().len(), 1);
    assert!(h.core.translate_data(0x100, AccessType::Read).is_ok());
}

#[test]
fn icbi_queues_the_physical_page() {
    let mut h = Harness::new();
    h.set_r(3, 0x0012_3456);
    h.exec("icbi 0, r3").unwrap();
    assert!(h.core.sync.contains(SyncRequest::ICACHE));
    assert_eq!(h.core.invalidated_pages, vec![0x123]);
}

// ---- Table ----

#[test]
fn missing_handler_is_fatal() {
    let mut h = Harness::new();
    h.table.unregister(Opcode::Add);
    let err = h.exec("add r3, r4, r5").unwrap_err();
    assert!(matches!(
        err,
        SimFault::Fatal(FatalError::UnimplementedOpcode { name: "add", pc: PC, .. })
    ));
    assert!(HandlerTable::empty().registered() == 0);
    assert!(HandlerTable::new().registered() > 100);
}
