use ppc_memory::{Endian, Memory, PhysicalMemory, TargetConfig, TargetKind};
use proptest::prelude::*;

const WINDOW: u64 = 0x4000;
const BASE: u64 = 0x8000_0000;

#[derive(Debug, Clone)]
enum Op {
    Write8(u64, u8),
    Write32(u64, u32, bool),
    Write64(u64, u64, bool),
    Bytes(u64, Vec<u8>),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WINDOW, any::<u8>()).prop_map(|(a, v)| Op::Write8(a, v)),
        (0..WINDOW - 4, any::<u32>(), any::<bool>()).prop_map(|(a, v, be)| Op::Write32(a, v, be)),
        (0..WINDOW - 8, any::<u64>(), any::<bool>()).prop_map(|(a, v, be)| Op::Write64(a, v, be)),
        (0..WINDOW - 64, proptest::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(a, v)| Op::Bytes(a, v)),
    ]
}

fn endian(be: bool) -> Endian {
    if be {
        Endian::Big
    } else {
        Endian::Little
    }
}

proptest! {
    #[test]
    fn physical_memory_matches_a_flat_byte_model(ops in proptest::collection::vec(op(), 1..64)) {
        let mem = PhysicalMemory::new(36).unwrap();
        // A second target straddling the middle of the window exercises the
        // per-page target split.
        mem.register_target(TargetConfig::new("sram", TargetKind::Ddr, BASE + 0x1000, 0x2000, 5)).unwrap();
        let mut model = vec![0u8; WINDOW as usize];

        for op in ops {
            match op {
                Op::Write8(a, v) => {
                    mem.write_u8(BASE + a, v).unwrap();
                    model[a as usize] = v;
                }
                Op::Write32(a, v, be) => {
                    mem.write_u32(BASE + a, v, endian(be)).unwrap();
                    let bytes = if be { v.to_be_bytes() } else { v.to_le_bytes() };
                    model[a as usize..a as usize + 4].copy_from_slice(&bytes);
                }
                Op::Write64(a, v, be) => {
                    mem.write_u64(BASE + a, v, endian(be)).unwrap();
                    let bytes = if be { v.to_be_bytes() } else { v.to_le_bytes() };
                    model[a as usize..a as usize + 8].copy_from_slice(&bytes);
                }
                Op::Bytes(a, v) => {
                    mem.write_from(BASE + a, &v).unwrap();
                    model[a as usize..a as usize + v.len()].copy_from_slice(&v);
                }
            }
        }

        prop_assert_eq!(mem.read_buffer(BASE, WINDOW as usize).unwrap(), model);
    }
}
