//! Run-mode state machine and the per-core execution thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::exception::FatalError;
use crate::exec::Cpu;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunMode {
    Halted = 0,
    Stopped = 1,
    Running = 2,
    Stepping = 3,
}

impl RunMode {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunMode::Stopped,
            2 => RunMode::Running,
            3 => RunMode::Stepping,
            _ => RunMode::Halted,
        }
    }

    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, RunMode::Running | RunMode::Stepping)
    }
}

/// Run mode shared between the controlling thread and the core thread.
///
/// Stores are `Release` and loads `Acquire`; the execution loop only looks at the
/// mode between batches, so a `stop()` takes effect within one batch.
#[derive(Debug)]
pub struct RunModeCell(AtomicU8);

impl Default for RunModeCell {
    fn default() -> Self {
        Self::new(RunMode::Halted)
    }
}

impl RunModeCell {
    pub fn new(mode: RunMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    #[inline]
    pub fn get(&self) -> RunMode {
        RunMode::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, mode: RunMode) {
        self.0.store(mode as u8, Ordering::Release);
    }

    /// Moves an idle core to `mode`. Fails if the core is already running or stepping.
    pub fn try_activate(&self, mode: RunMode) -> Result<(), FatalError> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if RunMode::from_u8(current).is_active() {
                return Err(FatalError::AlreadyRunning);
            }
            match self
                .0
                .compare_exchange_weak(current, mode as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Why a run or step ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// `stop()` was observed, or a step count ran out.
    Stopped,
    /// `halt()` was observed.
    Halted,
    /// Fetch hit a software breakpoint; the instruction did not execute.
    Breakpoint { ea: u64 },
    /// An instruction address compare fired with `DBCR0[EDM]` set.
    DebugHalt { ea: u64 },
}

#[derive(Debug)]
struct Shared {
    mode: Arc<RunModeCell>,
    cpu: Mutex<Cpu>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Cpu> {
        match self.cpu.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Owns a core and, while it runs, the OS thread executing it.
#[derive(Debug)]
pub struct CpuHandle {
    shared: Arc<Shared>,
    cpu_id: u32,
    thread: Option<JoinHandle<Result<RunExit, FatalError>>>,
    last_exit: Option<Result<RunExit, FatalError>>,
}

impl CpuHandle {
    pub fn new(cpu: Cpu) -> Self {
        let cpu_id = cpu.cpu_id();
        let mode = cpu.mode_cell();
        Self {
            shared: Arc::new(Shared {
                mode,
                cpu: Mutex::new(cpu),
            }),
            cpu_id,
            thread: None,
            last_exit: None,
        }
    }

    #[inline]
    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }

    #[inline]
    pub fn run_mode(&self) -> RunMode {
        self.shared.mode.get()
    }

    /// Locks the core. While the core thread runs this waits for the current batch
    /// to finish.
    pub fn lock(&self) -> MutexGuard<'_, Cpu> {
        self.shared.lock()
    }

    pub fn with_cpu<R>(&self, f: impl FnOnce(&mut Cpu) -> R) -> R {
        f(&mut self.lock())
    }

    /// Starts the core on its own thread and returns immediately.
    ///
    /// Fails with `AlreadyRunning` while a previous thread has not yet exited, even if
    /// it has been asked to stop. The mode is only raised once that thread is joined.
    pub fn run(&mut self) -> Result<(), FatalError> {
        if !self.is_finished() {
            return Err(FatalError::AlreadyRunning);
        }
        if let Some(prev) = self.thread.take() {
            self.last_exit = Some(join_thread(prev));
        }
        self.shared.mode.try_activate(RunMode::Running)?;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("cpu{}", self.cpu_id))
            .spawn(move || run_loop(&shared));
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.mode.set(RunMode::Stopped);
                Err(FatalError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Runs `n` instructions on the calling thread.
    pub fn step(&self, n: u64) -> Result<RunExit, FatalError> {
        if self.run_mode().is_active() {
            return Err(FatalError::AlreadyRunning);
        }
        self.lock().step(n)
    }

    /// Requests a stop; observed at the next batch boundary.
    pub fn stop(&self) {
        self.shared.mode.set(RunMode::Stopped);
    }

    /// Requests a halt; observed at the next batch boundary.
    pub fn halt(&self) {
        self.shared.mode.set(RunMode::Halted);
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the core thread and returns how its last run ended. A core that
    /// was never started reports its current mode.
    pub fn join(&mut self) -> Result<RunExit, FatalError> {
        if let Some(handle) = self.thread.take() {
            return join_thread(handle);
        }
        match self.last_exit.take() {
            Some(exit) => exit,
            None if self.run_mode() == RunMode::Halted => Ok(RunExit::Halted),
            None => Ok(RunExit::Stopped),
        }
    }
}

impl Drop for CpuHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.shared.mode.set(RunMode::Stopped);
            let _ = handle.join();
        }
    }
}

fn join_thread(handle: JoinHandle<Result<RunExit, FatalError>>) -> Result<RunExit, FatalError> {
    handle.join().unwrap_or(Err(FatalError::ThreadPanicked))
}

fn run_loop(shared: &Shared) -> Result<RunExit, FatalError> {
    let start = Instant::now();
    let cpu_id = {
        let mut cpu = shared.lock();
        cpu.begin_run();
        cpu.cpu_id()
    };
    debug!(cpu = cpu_id, "core thread started");

    let result = loop {
        let mut cpu = shared.lock();
        // Checked under the core lock so a stop issued while waiting for it is seen.
        match shared.mode.get() {
            RunMode::Running => {}
            RunMode::Halted => break Ok(RunExit::Halted),
            RunMode::Stopped | RunMode::Stepping => break Ok(RunExit::Stopped),
        }
        match cpu.run_batch() {
            Ok(None) => {}
            Ok(Some(exit)) => {
                let mode = match exit {
                    RunExit::Halted | RunExit::DebugHalt { .. } => RunMode::Halted,
                    _ => RunMode::Stopped,
                };
                shared.mode.set(mode);
                break Ok(exit);
            }
            Err(e) => {
                error!(cpu = cpu_id, pc = format_args!("{:#010x}", cpu.state().pc), error = %e, "core stopped on fatal error");
                shared.mode.set(RunMode::Halted);
                break Err(e);
            }
        }
    };

    let retired = shared.lock().instructions_retired();
    let secs = start.elapsed().as_secs_f64();
    let kips = if secs > 0.0 { retired as f64 / secs / 1000.0 } else { 0.0 };
    info!(cpu = cpu_id, retired, kips = format_args!("{kips:.1}"), exit = ?result, "run finished");
    result
}
