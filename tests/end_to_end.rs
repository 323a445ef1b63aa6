use ppcsim::cpu::{Decoder, PpcDecoder, RunExit, RESET_PC};
use ppcsim::{Machine, MachineConfig};

const BOOT_PAGE: u64 = 0xffff_f000;
const CR0_EQ: u64 = 1 << 29;

/// Two-core machine whose reset vector branches to `program` at the start of the
/// boot page.
fn boot(program: &[&str]) -> Machine {
    let m = Machine::new(MachineConfig::default()).unwrap();
    let decoder = PpcDecoder::new();
    let mut image = Vec::new();
    for (n, text) in program.iter().enumerate() {
        let insn = decoder.assemble(text, BOOT_PAGE + 4 * n as u64).unwrap();
        image.extend_from_slice(&insn.raw.to_be_bytes());
    }
    m.load_image(BOOT_PAGE, &image).unwrap();
    let reset = decoder.assemble("b 0xfffff000", RESET_PC).unwrap();
    m.load_image(RESET_PC, &reset.raw.to_be_bytes()).unwrap();
    m
}

fn set_reg(m: &Machine, cpu: u32, name: &str, value: u64) {
    m.cpu(cpu)
        .unwrap()
        .with_cpu(|c| c.set_reg(name, value))
        .unwrap();
}

#[test]
fn add_immediate_then_add() {
    let m = boot(&["addi r3, r0, 0x10", "add r4, r3, r3"]);
    assert_eq!(m.step(0, 3).unwrap(), RunExit::Stopped);
    assert_eq!(m.get_reg(0, "r3").unwrap(), 0x10);
    assert_eq!(m.get_reg(0, "r4").unwrap(), 0x20);
    assert_eq!(m.get_reg(0, "pc").unwrap(), BOOT_PAGE + 8);
}

#[test]
fn load_without_mapping_takes_a_data_tlb_miss() {
    let m = boot(&["lwz r6, 0(r7)"]);
    set_reg(&m, 0, "r7", 0x0010_0000);
    set_reg(&m, 0, "ivpr", 0xffff);
    set_reg(&m, 0, "ivor13", 0xf10);

    m.step(0, 2).unwrap();
    assert_eq!(m.get_reg(0, "dear").unwrap(), 0x0010_0000);
    assert_eq!(m.get_reg(0, "srr0").unwrap(), BOOT_PAGE);
    assert_eq!(m.get_reg(0, "pc").unwrap(), 0xffff_f100);
    assert_eq!(m.get_reg(0, "r6").unwrap(), 0);
}

const RESERVED: u64 = BOOT_PAGE + 0x800;

fn reserve_then_store() -> Machine {
    let m = boot(&["lwarx r3, 0, r4", "stwcx. r5, 0, r4"]);
    set_reg(&m, 0, "r4", RESERVED);
    set_reg(&m, 0, "r5", 0x5a5a);
    // Branch from the reset vector, then the lwarx.
    m.step(0, 2).unwrap();
    m
}

#[test]
fn store_conditional_succeeds_on_its_own_reservation() {
    let m = reserve_then_store();
    m.step(0, 1).unwrap();
    assert_ne!(m.get_reg(0, "cr").unwrap() & CR0_EQ, 0);
    let stored = m.cpu(0).unwrap().with_cpu(|c| c.read32(RESERVED)).unwrap();
    assert_eq!(stored, 0x5a5a);
}

#[test]
fn store_conditional_fails_after_another_core_reserves_the_line() {
    let m = reserve_then_store();
    m.cpu(1)
        .unwrap()
        .with_cpu(|c| c.core_mut().set_reservation(RESERVED + 8, 4))
        .unwrap();
    m.step(0, 1).unwrap();
    assert_eq!(m.get_reg(0, "cr").unwrap() & CR0_EQ, 0);
    let stored = m.cpu(0).unwrap().with_cpu(|c| c.read32(RESERVED)).unwrap();
    assert_eq!(stored, 0);
}
