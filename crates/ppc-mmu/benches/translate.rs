#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
#[cfg(not(target_arch = "wasm32"))]
use ppc_mmu::mas::{MAS0_TLBSEL, MAS1_TSIZE, MAS1_V, PERM_SR, PERM_SW, PERM_SX};
#[cfg(not(target_arch = "wasm32"))]
use ppc_mmu::{AccessType, MasRegisters, Mmu};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("PPC_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            // Keep PR runtime low.
            .warm_up_time(Duration::from_millis(200))
            .measurement_time(Duration::from_secs(1))
            .sample_size(10)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(30)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn setup_mmu() -> Mmu {
    let mut mmu = Mmu::default();
    let perms = u32::from(PERM_SR | PERM_SW | PERM_SX);
    // 256MiB CAM mapping at 0 plus 64 TLB0 pages at 0x1000_0000.
    mmu.write_entry(
        &MasRegisters {
            mas0: MAS0_TLBSEL | (1 << 16),
            mas1: MAS1_V | ((9 << 8) & MAS1_TSIZE),
            mas2: 0,
            mas3: perms,
            ..MasRegisters::default()
        },
        false,
    );
    for page in 0..64u32 {
        let ea = 0x1000_0000 + page * 0x1000;
        mmu.write_entry(
            &MasRegisters {
                mas0: (page & 3) << 16,
                mas1: MAS1_V | (1 << 8),
                mas2: ea,
                mas3: ea | perms,
                ..MasRegisters::default()
            },
            false,
        );
    }
    mmu
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_translate(c: &mut Criterion) {
    let mut group = c.benchmark_group("mmu_translate");
    group.throughput(Throughput::Elements(1));

    group.bench_function("cached_hit", |b| {
        let mut mmu = setup_mmu();
        b.iter(|| {
            black_box(
                mmu.translate(black_box(0x0012_3456), AccessType::Read, &[0, 0, 0], true, false)
                    .ok(),
            )
        })
    });

    group.bench_function("tlb0_sweep", |b| {
        let mut mmu = setup_mmu();
        let mut page = 0u64;
        b.iter(|| {
            page = (page + 1) & 63;
            let ea = 0x1000_0000 + page * 0x1000;
            // Force an array scan on every iteration.
            mmu.flush_translation_cache();
            black_box(mmu.translate(black_box(ea), AccessType::Execute, &[0], true, false).ok())
        })
    });

    group.bench_function("miss_three_pids", |b| {
        let mut mmu = setup_mmu();
        b.iter(|| {
            black_box(
                mmu.translate(black_box(0x8000_0000), AccessType::Write, &[1, 2, 3], true, false)
                    .err(),
            )
        })
    });

    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_translate
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
