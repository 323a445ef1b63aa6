#![forbid(unsafe_code)]

// Native-only runner. The wasm32 stub keeps `--workspace` builds for wasm targets compiling.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::{bail, Context, Result};
    use clap::{ArgGroup, Parser};
    use ppc_cpu_core::ExecMode;
    use ppc_machine::{Machine, MachineConfig, MachineError, RunExit};
    use tracing::{info, warn};
    use tracing_subscriber::EnvFilter;

    /// How often the controlling thread checks whether every core has finished.
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    #[derive(Debug, Parser)]
    #[command(
        about = "Native runner for ppc_machine::Machine",
        group(
            ArgGroup::new("stop")
                .required(true)
                .args(["steps", "max_ms"])
        )
    )]
    pub struct Args {
        /// Machine configuration (JSON). Missing fields take their defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the number of cores.
        #[arg(long)]
        cpus: Option<u32>,

        /// Raw binary image copied into physical memory before the run.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Real address the image is loaded at.
        #[arg(long, value_parser = parse_u64, default_value = "0xfffff000")]
        load_addr: u64,

        /// Initial PC of every core. Defaults to the reset vector.
        #[arg(long, value_parser = parse_u64)]
        entry: Option<u64>,

        /// Execute through the basic-block cache.
        #[arg(long)]
        threaded: bool,

        /// Step each core N instructions on the calling thread.
        #[arg(long)]
        steps: Option<u64>,

        /// Run every core on its own thread for at most N milliseconds.
        #[arg(long)]
        max_ms: Option<u64>,

        /// Print each core's registers on exit.
        #[arg(long)]
        dump: bool,

        /// Print each core's TLBs on exit.
        #[arg(long)]
        dump_tlbs: bool,
    }

    fn parse_u64(s: &str) -> Result<u64, String> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
            None => s.replace('_', "").parse(),
        };
        parsed.map_err(|e| format!("invalid address `{s}`: {e}"))
    }

    fn load_config(args: &Args) -> Result<MachineConfig> {
        let mut config = match &args.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?;
                MachineConfig::from_json_str(&json)
                    .with_context(|| format!("invalid config: {}", path.display()))?
            }
            None => MachineConfig::default(),
        };
        if let Some(cpus) = args.cpus {
            config.cpu_count = cpus;
        }
        if args.threaded {
            config.cpu.exec_mode = ExecMode::Threaded;
        }
        Ok(config)
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with_writer(std::io::stderr)
            .init();

        let args = Args::parse();
        let mut machine = Machine::new(load_config(&args)?).context("failed to create machine")?;

        if let Some(path) = &args.image {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read image: {}", path.display()))?;
            machine
                .load_image(args.load_addr, &bytes)
                .with_context(|| format!("failed to load image at {:#x}", args.load_addr))?;
            info!(image = %path.display(), load_addr = format_args!("{:#x}", args.load_addr), "image loaded");
        }
        if let Some(entry) = args.entry {
            for n in 0..machine.cpu_count() as u32 {
                machine.cpu(n)?.with_cpu(|cpu| cpu.set_reg("pc", entry))?;
            }
        }

        let start = Instant::now();
        let result = match (args.steps, args.max_ms) {
            (Some(steps), _) => step_all(&machine, steps),
            (None, Some(max_ms)) => run_for(&mut machine, Duration::from_millis(max_ms)),
            (None, None) => bail!("one of --steps/--max-ms is required"),
        };
        let elapsed = start.elapsed();

        for n in 0..machine.cpu_count() as u32 {
            let retired = machine.cpu(n)?.with_cpu(|cpu| cpu.total_instructions_retired());
            info!(cpu = n, retired, elapsed_ms = elapsed.as_millis() as u64, "core summary");
            if args.dump {
                print!("{}", machine.dump_state(n, false)?);
            }
            if args.dump_tlbs {
                print!("{}", machine.cpu(n)?.with_cpu(|cpu| cpu.dump_tlbs()));
            }
        }

        for (cpu, exit) in result? {
            match exit {
                RunExit::Stopped | RunExit::Halted => {}
                RunExit::Breakpoint { ea } => eprintln!("cpu{cpu}: breakpoint at {ea:#x}"),
                RunExit::DebugHalt { ea } => eprintln!("cpu{cpu}: debug halt at {ea:#x}"),
            }
        }
        Ok(())
    }

    fn step_all(machine: &Machine, steps: u64) -> Result<Vec<(u32, RunExit)>> {
        (0..machine.cpu_count() as u32)
            .map(|n| Ok((n, machine.step(n, steps)?)))
            .collect()
    }

    fn run_for(machine: &mut Machine, limit: Duration) -> Result<Vec<(u32, RunExit)>> {
        let all = machine.all_cpus();
        let start = Instant::now();
        machine.run(all)?;
        while start.elapsed() < limit && !machine.is_idle(all) {
            thread::sleep(POLL_INTERVAL);
        }
        machine.stop(all);
        match machine.join(all) {
            Ok(exits) => Ok(exits.into_iter().map(|e| (e.cpu, e.exit)).collect()),
            Err(MachineError::CoresFailed(failures)) => {
                for (cpu, e) in &failures {
                    warn!(cpu, error = %e, "core failed");
                }
                bail!("{} core(s) stopped on a fatal error", failures.len())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
