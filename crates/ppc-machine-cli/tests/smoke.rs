#![cfg(not(target_arch = "wasm32"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use ppc_cpu_core::{Decoder, PpcDecoder};

fn resolve_cli_exe() -> PathBuf {
    if let Some(exe) = option_env!("CARGO_BIN_EXE_ppc-machine") {
        return PathBuf::from(exe);
    }
    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| repo_root.join("target"));
    let exe_name = format!("ppc-machine{}", std::env::consts::EXE_SUFFIX);
    let debug_exe = target_dir.join("debug").join(&exe_name);
    if debug_exe.exists() {
        debug_exe
    } else {
        target_dir.join("release").join(&exe_name)
    }
}

/// A 4KiB boot page: a counting loop at its start and a branch to it in the reset
/// slot at its end.
fn write_boot_page(path: &Path) {
    const BASE: u64 = 0xffff_f000;
    let decoder = PpcDecoder::new();
    let asm = |text: &str, pc: u64| decoder.assemble(text, pc).unwrap().raw.to_be_bytes();
    let mut page = vec![0u8; 4096];
    page[0..4].copy_from_slice(&asm("addi r3, r3, 1", BASE));
    page[4..8].copy_from_slice(&asm("b 0xfffff000", BASE + 4));
    page[0xffc..].copy_from_slice(&asm("b 0xfffff000", BASE + 0xffc));
    std::fs::write(path, page).unwrap();
}

fn run(args: &[&str]) -> Output {
    Command::new(resolve_cli_exe())
        .args(args)
        .output()
        .expect("failed to run ppc-machine CLI")
}

#[test]
fn steps_a_boot_image_and_dumps_registers() {
    let tmp = tempfile::tempdir().unwrap();
    let image = tmp.path().join("boot.bin");
    write_boot_page(&image);

    let output = run(&[
        "--image",
        image.to_str().unwrap(),
        "--cpus",
        "1",
        "--steps",
        "11",
        "--dump",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "stdout:\n{stdout}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.starts_with("cpu0"), "{stdout}");
    assert!(stdout.contains("iar=fffff000"), "{stdout}");
    // r0..r3 share the first row; five loop iterations ran.
    assert!(stdout.contains("0000000000000005\n"), "{stdout}");
}

#[test]
fn rejects_an_invalid_config() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("machine.json");
    std::fs::write(&config, r#"{"cpu_count": 0}"#).unwrap();

    let output = run(&["--config", config.to_str().unwrap(), "--steps", "1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cpu_count"));
}

#[test]
fn requires_a_stop_condition() {
    let output = run(&[]);
    assert!(!output.status.success());
}
