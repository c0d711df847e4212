//! External process launch and supervision.
//!
//! Each mode runs one external tool. The child shares the terminal and is
//! stopped with SIGINT when the operator presses Ctrl+C.

use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::modes::Mode;
use crate::plans::{self, CommandPlan, PlanContext, PlanError};
use crate::settings::ModeSettings;

/// How long a child gets to exit after SIGINT before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Errors that can occur when launching or supervising a process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("'{program}' not found. Is it installed and on your PATH?")]
    NotFound { program: String },

    #[error("Failed to start '{program}': {source}")]
    Spawn { program: String, source: io::Error },

    #[error("Cannot build command line: {0}")]
    Plan(#[from] PlanError),

    #[error("I/O error while supervising process: {0}")]
    Io(#[from] io::Error),
}

/// Shared Ctrl+C flag.
///
/// Clones observe the same flag. The installed handler only sets it; prompts
/// and the supervision loop poll it.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Route Ctrl+C to this flag.
    ///
    /// This should be called once at program startup.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = self.flag.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
            eprintln!("\nReceived Ctrl+C, stopping...");
        })
    }
}

/// Observed state of a launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code, `None` when terminated by a signal.
    Exited(Option<i32>),
}

/// A launched process under supervision.
pub trait ProcessHandle {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking status check.
    fn poll(&mut self) -> Result<ProcessState, LaunchError>;

    /// Ask the process to stop and wait for it, killing it after
    /// [`SHUTDOWN_GRACE`].
    fn interrupt(&mut self) -> Result<ProcessState, LaunchError>;

    /// True when nothing was actually started (dry run).
    fn simulated(&self) -> bool {
        false
    }
}

/// Starts the external tool for a mode.
pub trait Launcher {
    fn launch(&mut self, mode: Mode, params: &ModeSettings) -> Result<Box<dyn ProcessHandle>, LaunchError>;
}

/// Launcher that spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    ctx: PlanContext,
    dry_run: bool,
}

impl ProcessLauncher {
    pub fn new(ctx: PlanContext) -> Self {
        Self { ctx, dry_run: false }
    }

    /// Print the command line instead of running it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, mode: Mode, params: &ModeSettings) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let plan = plans::build(mode, params, self.ctx)?;
        println!("$ {}", plan);
        if self.dry_run {
            return Ok(Box::new(DryRun));
        }
        let child = ChildProcess::spawn(&plan)?;
        log::debug!("Spawned {}", plan.program);
        Ok(Box::new(child))
    }
}

/// Represents a running child process.
///
/// The child shares the terminal: stdin, stdout and stderr are inherited so
/// the tool's own prompts and keyboard controls keep working.
pub struct ChildProcess {
    child: Child,
    program: String,
}

impl ChildProcess {
    pub fn spawn(plan: &CommandPlan) -> Result<Self, LaunchError> {
        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .envs(plan.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LaunchError::NotFound {
                    program: plan.program.clone(),
                }
            } else {
                LaunchError::Spawn {
                    program: plan.program.clone(),
                    source: e,
                }
            }
        })?;

        Ok(ChildProcess {
            child,
            program: plan.program.clone(),
        })
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn poll(&mut self) -> Result<ProcessState, LaunchError> {
        Ok(match self.child.try_wait()? {
            Some(status) => ProcessState::Exited(status.code()),
            None => ProcessState::Running,
        })
    }

    /// Sends SIGINT and waits up to [`SHUTDOWN_GRACE`] before killing.
    fn interrupt(&mut self) -> Result<ProcessState, LaunchError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(ProcessState::Exited(status.code()));
        }

        #[cfg(unix)]
        {
            // SAFETY: plain signal delivery to our own child's pid.
            unsafe {
                libc::kill(self.child.id() as i32, libc::SIGINT);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        let start = Instant::now();
        loop {
            match self.child.try_wait()? {
                Some(status) => return Ok(ProcessState::Exited(status.code())),
                None => {
                    if start.elapsed() > SHUTDOWN_GRACE {
                        log::warn!("{} did not stop after SIGINT, killing it", self.program);
                        let _ = self.child.kill();
                        let status = self.child.wait()?;
                        return Ok(ProcessState::Exited(status.code()));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.interrupt();
        }
    }
}

/// Handle for a command that was only printed.
#[derive(Debug)]
pub struct DryRun;

impl ProcessHandle for DryRun {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn poll(&mut self) -> Result<ProcessState, LaunchError> {
        Ok(ProcessState::Exited(Some(0)))
    }

    fn interrupt(&mut self) -> Result<ProcessState, LaunchError> {
        Ok(ProcessState::Exited(Some(0)))
    }

    fn simulated(&self) -> bool {
        true
    }
}
