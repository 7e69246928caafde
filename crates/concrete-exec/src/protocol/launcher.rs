//! Starting workers.

use super::client::{WorkerReader, WorkerWriter};
use super::server::{serve, ServeExit};
use crate::execution::ExecutionContext;
use crate::result::{ExecError, ExecResult};
use crate::runtime::ProgramCatalog;
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffer size of in-process worker pipes
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Something that can start a worker and hand back its channel
#[async_trait]
pub trait WorkerLauncher: Send + Sync + fmt::Debug {
    /// Start a fresh worker
    async fn launch(&self) -> ExecResult<WorkerChannel>;
}

/// A started worker: its channel and the thing to kill when it misbehaves
pub struct WorkerChannel {
    /// Replies from the worker
    pub reader: WorkerReader,
    /// Commands to the worker
    pub writer: WorkerWriter,
    /// Handle used to kill the worker
    pub process: WorkerProcess,
}

impl fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("process", &self.process)
            .finish()
    }
}

/// What runs behind a worker channel
#[derive(Debug)]
pub enum WorkerProcess {
    /// Separate operating-system process
    Child(Child),
    /// Task in this process; no crash isolation
    Task(JoinHandle<ExecResult<ServeExit>>),
}

impl WorkerProcess {
    /// Operating-system process id, when there is one
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Child(child) => child.id(),
            Self::Task(_) => None,
        }
    }

    /// Whether the worker has already exited
    pub fn has_exited(&mut self) -> bool {
        match self {
            Self::Child(child) => !matches!(child.try_wait(), Ok(None)),
            Self::Task(task) => task.is_finished(),
        }
    }

    /// Wait up to `grace` for the worker to exit on its own
    pub async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        match self {
            Self::Child(child) => tokio::time::timeout(grace, child.wait()).await.is_ok(),
            Self::Task(task) => tokio::time::timeout(grace, task).await.is_ok(),
        }
    }

    /// Terminate the worker
    pub async fn kill(&mut self) {
        match self {
            Self::Child(child) => {
                if let Err(err) = child.kill().await {
                    debug!(error = %err, "worker process already gone");
                }
            }
            Self::Task(task) => task.abort(),
        }
    }
}

/// Starts the worker binary as a child process speaking the protocol over
/// its standard input and output
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessLauncher {
    /// Launcher for the worker executable at `program`
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Add a command-line argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for the worker
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Path of the worker executable
    #[must_use]
    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> ExecResult<WorkerChannel> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ExecError::process_death(format!("cannot start worker {}: {err}", self.program.display()))
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill worker without pipes");
            }
            return Err(ExecError::process_death("worker started without stdio pipes"));
        };
        info!(pid = child.id(), program = %self.program.display(), "worker process started");
        Ok(WorkerChannel {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: WorkerProcess::Child(child),
        })
    }
}

/// Runs the worker as a task of the current runtime.
///
/// Shares the address space with the caller, so it offers no crash
/// isolation; used for tests and embedding.
#[derive(Clone)]
pub struct InProcessLauncher {
    catalog: Arc<ProgramCatalog>,
    max_frame_bytes: usize,
    interrupt_grace: Duration,
}

impl fmt::Debug for InProcessLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessLauncher")
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("interrupt_grace", &self.interrupt_grace)
            .finish()
    }
}

impl InProcessLauncher {
    /// Launcher whose workers load classes from `catalog`
    #[must_use]
    pub fn new(catalog: Arc<ProgramCatalog>, max_frame_bytes: usize) -> Self {
        Self {
            catalog,
            max_frame_bytes,
            interrupt_grace: crate::execution::DEFAULT_INTERRUPT_GRACE,
        }
    }

    /// Set the watchdog grace period of launched workers
    #[must_use]
    pub const fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self) -> ExecResult<WorkerChannel> {
        let (client_side, worker_side) = tokio::io::duplex(DUPLEX_BUFFER);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let (client_read, client_write) = tokio::io::split(client_side);
        let context =
            ExecutionContext::new(Arc::clone(&self.catalog)).with_interrupt_grace(self.interrupt_grace);
        let task = tokio::spawn(serve(worker_read, worker_write, context, self.max_frame_bytes));
        debug!("in-process worker started");
        Ok(WorkerChannel {
            reader: Box::new(client_read),
            writer: Box::new(client_write),
            process: WorkerProcess::Task(task),
        })
    }
}
