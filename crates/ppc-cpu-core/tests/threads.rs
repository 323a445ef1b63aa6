mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{boot, load, memory, CODE};
use ppc_cpu_core::{CpuConfig, CpuHandle, ExecMode, FatalError, ReservationTable, RunExit, RunMode};
use ppc_memory::{Endian, Memory};

const COUNTER: u64 = 0x4000;

#[test]
fn run_until_stopped() {
    let mem = memory();
    let reservations = Arc::new(ReservationTable::default());
    load(&mem, CODE, &["addi r3, r3, 1", "b 0x1000"]);
    let mut handle = CpuHandle::new(boot(CpuConfig::default(), &mem, &reservations));

    handle.run().unwrap();
    assert_eq!(handle.run(), Err(FatalError::AlreadyRunning));
    assert!(matches!(handle.step(1), Err(FatalError::AlreadyRunning)));
    thread::sleep(Duration::from_millis(20));
    handle.stop();
    assert_eq!(handle.join(), Ok(RunExit::Stopped));
    assert_eq!(handle.run_mode(), RunMode::Stopped);

    let (pc, r3, retired) = handle.with_cpu(|cpu| {
        (cpu.state().pc, cpu.state().gpr32(3), cpu.instructions_retired())
    });
    assert!(pc == CODE || pc == CODE + 4);
    assert!(r3 > 0);
    assert!(retired >= u64::from(r3));

    // Stepping works again once the thread has stopped.
    assert_eq!(handle.step(2), Ok(RunExit::Stopped));
}

#[test]
fn halt_is_reported_as_halted() {
    let mem = memory();
    let reservations = Arc::new(ReservationTable::default());
    load(&mem, CODE, &["b 0x1000"]);
    let mut handle = CpuHandle::new(boot(CpuConfig::default(), &mem, &reservations));
    handle.run().unwrap();
    handle.halt();
    assert_eq!(handle.join(), Ok(RunExit::Halted));
    assert_eq!(handle.run_mode(), RunMode::Halted);
}

#[test]
fn restart_waits_for_the_stopping_thread() {
    let mem = memory();
    let reservations = Arc::new(ReservationTable::default());
    load(&mem, CODE, &["b 0x1000"]);
    // One batch outlasts the sleep below, so the stop is still pending at restart.
    let config = CpuConfig {
        batch_instrs: 50_000_000,
        ..CpuConfig::default()
    };
    let mut handle = CpuHandle::new(boot(config, &mem, &reservations));

    handle.run().unwrap();
    thread::sleep(Duration::from_millis(50));
    handle.stop();
    match handle.run() {
        Err(FatalError::AlreadyRunning) => {
            // The old thread must not pick up a fresh Running mode.
            assert_eq!(handle.run_mode(), RunMode::Stopped);
            assert_eq!(handle.join(), Ok(RunExit::Stopped));
            handle.run().unwrap();
        }
        // The batch happened to finish before the restart.
        Ok(()) => {}
        Err(e) => panic!("unexpected error {e}"),
    }
    assert_eq!(handle.run_mode(), RunMode::Running);
    handle.stop();
    assert_eq!(handle.join(), Ok(RunExit::Stopped));
    assert_eq!(handle.run_mode(), RunMode::Stopped);
}

fn atomic_increment_loop(iterations: u32) -> Vec<String> {
    vec![
        format!("li r4, {iterations}"),
        "mtctr r4".into(),
        format!("li r5, {COUNTER:#x}"),
        "lwarx r3, 0, r5".into(),
        "addi r3, r3, 1".into(),
        "stwcx. r3, 0, r5".into(),
        format!("bne {:#x}", CODE + 0xc),
        format!("bdnz {:#x}", CODE + 0xc),
        format!("b {:#x}", CODE + 0x20),
    ]
}

fn contended_increment(mode: ExecMode) {
    const ITERATIONS: u32 = 2000;
    let mem = memory();
    let reservations = Arc::new(ReservationTable::default());
    let program = atomic_increment_loop(ITERATIONS);
    let text: Vec<&str> = program.iter().map(String::as_str).collect();
    load(&mem, CODE, &text);

    let mut handles: Vec<CpuHandle> = (0..2)
        .map(|id| {
            let config = CpuConfig {
                exec_mode: mode,
                batch_instrs: 37,
                ..CpuConfig::default().with_id(id)
            };
            let mut cpu = boot(config, &mem, &reservations);
            cpu.breakpoints_mut().add(CODE + 0x20);
            CpuHandle::new(cpu)
        })
        .collect();
    for handle in &mut handles {
        handle.run().unwrap();
    }
    for handle in &mut handles {
        assert_eq!(handle.join(), Ok(RunExit::Breakpoint { ea: CODE + 0x20 }));
    }
    assert_eq!(mem.read_u32(COUNTER, Endian::Big).unwrap(), 2 * ITERATIONS);
}

#[test]
fn two_cores_increment_atomically_interpretive() {
    contended_increment(ExecMode::Interpretive);
}

#[test]
fn two_cores_increment_atomically_threaded() {
    contended_increment(ExecMode::Threaded);
}
