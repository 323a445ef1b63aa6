use super::*;

fn asm(text: &str) -> u32 {
    PpcDecoder::new()
        .assemble(text, 0x1000)
        .unwrap_or_else(|e| panic!("{text}: {e}"))
        .raw
}

#[test]
fn decodes_known_words() {
    let d = PpcDecoder::new();
    let cases: &[(u32, Opcode)] = &[
        (0x3860_0010, Opcode::Addi),   // li r3, 0x10
        (0x7c83_1a14, Opcode::Add),    // add r4, r3, r3
        (0x7c60_2028, Opcode::Lwarx),  // lwarx r3, 0, r4
        (0x7ca0_212d, Opcode::StwcxRc), // stwcx. r5, 0, r4
        (0x4e80_0020, Opcode::Bclr),   // blr
        (0x4400_0002, Opcode::Sc),
        (0x4c00_0064, Opcode::Rfi),
        (0x7c00_07a4, Opcode::Tlbwe),
        (0x6000_0000, Opcode::Ori),    // nop
        (0x0000_0000, Opcode::Illegal),
    ];
    for &(raw, opcode) in cases {
        assert_eq!(d.decode(raw, 0).unwrap().opcode, opcode, "{raw:#010x}");
    }
    assert_eq!(
        d.decode(0xffff_ffff, 0),
        Err(DecodeError::Unknown { raw: 0xffff_ffff })
    );
}

#[test]
fn xo_forms_decode_with_and_without_oe() {
    let d = PpcDecoder::new();
    let addo = d.decode(0x7c83_1e15, 0).unwrap();
    assert_eq!(addo.opcode, Opcode::Add);
    assert!(addo.oe());
    assert!(addo.rc());
    assert_eq!(addo.full_mnemonic(), "addo.");
}

#[test]
fn assembles_base_and_simplified_mnemonics() {
    assert_eq!(asm("addi r3, r0, 0x10"), 0x3860_0010);
    assert_eq!(asm("li r3, 16"), 0x3860_0010);
    assert_eq!(asm("add r4, r3, r3"), 0x7c83_1a14);
    assert_eq!(asm("lwarx r3, 0, r4"), 0x7c60_2028);
    assert_eq!(asm("stwcx. r5, 0, r4"), 0x7ca0_212d);
    assert_eq!(asm("blr"), 0x4e80_0020);
    assert_eq!(asm("nop"), 0x6000_0000);
    assert_eq!(asm("mr r3, r4"), 0x7c83_2378);
    assert_eq!(asm("mr. r3, r4"), 0x7c83_2379);
    assert_eq!(asm("lwz r3, 8(r4)"), 0x8064_0008);
    assert_eq!(asm("stwu r1, -16(r1)"), 0x9421_fff0);
    assert_eq!(asm("mflr r0"), 0x7c08_02a6);
    assert_eq!(asm("mtctr r9"), 0x7d29_03a6);
    assert_eq!(asm("mtspr srr0, r3"), 0x7c7a_03a6);
    assert_eq!(asm("cmpwi r3, 0"), 0x2c03_0000);
    assert_eq!(asm("cmplw cr7, r3, r4"), 0x7f83_2040);
    assert_eq!(asm("slwi r3, r4, 2"), 0x5483_103a);
    assert_eq!(asm("sc"), 0x4400_0002);
    assert_eq!(asm("illegal"), 0);
}

#[test]
fn branch_targets_are_absolute() {
    // At pc 0x1000.
    assert_eq!(asm("b 0x1010"), 0x4800_0010);
    assert_eq!(asm("bl 0xff0"), 0x4bff_fff1);
    assert_eq!(asm("ba 0x100"), 0x4800_0102);
    assert_eq!(asm("beq 0x1008"), 0x4182_0008);
    assert_eq!(asm("bne cr1, 0x1000"), 0x4086_0000);
    assert_eq!(asm("bdnz 0xffc"), 0x4200_fffc);
    assert_eq!(asm("bctrl"), 0x4e80_0421);

    let d = PpcDecoder::new();
    let b = d.assemble("b 0x1010", 0x1000).unwrap();
    assert!(b.is_control_transfer());
    assert_eq!(b.branch_target(0x1000), Some(0x1010));
    assert_eq!(b.disassemble_at(0x1000), "b 0x1010");
    assert_eq!(b.to_string(), "b .+0x10");
}

#[test]
fn assembler_rejects_bad_input() {
    let d = PpcDecoder::new();
    assert!(matches!(
        d.assemble("frobnicate r1", 0),
        Err(DecodeError::UnknownMnemonic(_))
    ));
    assert!(matches!(
        d.assemble("addi r3, r0", 0),
        Err(DecodeError::OperandCount { expected: 3, got: 2, .. })
    ));
    assert!(matches!(
        d.assemble("addi r3, r0, 0x10000", 0),
        Err(DecodeError::OutOfRange { .. })
    ));
    assert!(matches!(d.assemble("ori. r3, r3, 1", 0), Err(_)));
    assert!(matches!(d.assemble("b 0x1002", 0), Err(DecodeError::OutOfRange { .. })));
}

#[test]
fn disassembly_renders_operands() {
    let d = PpcDecoder::new();
    let cases = [
        (0x3860_0010, "addi r3, r0, 16"),
        (0x8064_0008, "lwz r3, 8(r4)"),
        (0x7c7a_03a6, "mtspr srr0, r3"),
        (0x7c83_2379, "or. r3, r4, r4"),
        (0x4400_0002, "sc"),
    ];
    for (raw, text) in cases {
        assert_eq!(d.decode(raw, 0).unwrap().to_string(), text);
    }
}

#[test]
fn assembled_text_decodes_to_the_same_opcode() {
    let d = PpcDecoder::new();
    for text in [
        "rlwinm r3, r4, 2, 0, 29",
        "srawi. r5, r6, 3",
        "subfe r1, r2, r3",
        "neg r4, r5",
        "cntlzw r3, r3",
        "tlbsx r0, r4",
        "tlbivax r0, r4",
        "icbi r0, r3",
        "wrteei 1",
        "mtcrf 0x80, r3",
        "crxor 6, 6, 6",
        "mcrf cr1, cr0",
        "twi 31, r0, 0",
        "lmw r29, -12(r1)",
        "rfci",
        "rfmci",
    ] {
        let insn = d.assemble(text, 0).unwrap();
        let redecoded = d.decode(insn.raw, 0).unwrap();
        assert_eq!(insn, redecoded, "{text}");
        assert_eq!(insn.to_string().split(' ').next(), text.split(' ').next(), "{text}");
    }
}
