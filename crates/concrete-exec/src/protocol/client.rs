//! Client end of a worker channel.

use super::codec;
use super::message::{decode_payload, encode_payload, Command, Reply, Request, RequestId, Response};
use crate::config::InstrumentationSpec;
use crate::coverage::ClassCoverage;
use crate::model::{ClassId, ConcreteExecutionData, ConcreteExecutionResult, FieldRef, Model};
use crate::result::{ExecError, ExecResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Boxed read half of a worker channel
pub type WorkerReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a worker channel
pub type WorkerWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Pending = HashMap<RequestId, oneshot::Sender<ExecResult<Reply>>>;

/// Pending requests plus whether the reader is still running. Both live
/// under one lock so a request is never registered after the reader has
/// drained the table.
#[derive(Debug, Default)]
struct PendingTable {
    requests: Pending,
    closed: bool,
}

/// Correlation-id keyed request/response channel to one worker.
///
/// A background task reads responses and completes the matching pending
/// request. When the worker's output ends, every pending request fails
/// with [`ExecError::ProcessDeath`].
pub struct WorkerClient {
    writer: Mutex<WorkerWriter>,
    pending: Arc<Mutex<PendingTable>>,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    max_frame_bytes: usize,
    reader_task: JoinHandle<()>,
}

impl std::fmt::Debug for WorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerClient")
            .field("alive", &self.is_alive())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}

impl WorkerClient {
    /// Start the response reader over a connected channel
    #[must_use]
    pub fn new(reader: WorkerReader, writer: WorkerWriter, max_frame_bytes: usize) -> Self {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader_task = tokio::spawn(read_responses(
            reader,
            Arc::clone(&pending),
            Arc::clone(&alive),
            max_frame_bytes,
        ));
        Self {
            writer: Mutex::new(writer),
            pending,
            alive,
            next_id: AtomicU64::new(1),
            max_frame_bytes,
            reader_task,
        }
    }

    /// Whether the worker's output is still open
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Send a command and wait at most `deadline` for its reply
    pub async fn call(&self, command: Command, deadline: Duration) -> ExecResult<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.pending.lock().await;
            if table.closed {
                return Err(ExecError::process_death("worker channel is closed"));
            }
            table.requests.insert(id, tx);
        }
        trace!(id, command = name, "sending request");

        let request = Request { id, command };
        let sent = {
            let mut writer = self.writer.lock().await;
            codec::send(&mut **writer, &request, self.max_frame_bytes).await
        };
        if let Err(err) = sent {
            self.pending.lock().await.requests.remove(&id);
            return Err(match err {
                ExecError::Io(io) => ExecError::process_death(format!("cannot write to worker: {io}")),
                other => other,
            });
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(reply)) => reply?.into_result(),
            Ok(Err(_)) => Err(ExecError::process_death("worker dropped the request")),
            Err(_) => {
                self.pending.lock().await.requests.remove(&id);
                warn!(id, command = name, deadline_ms = deadline.as_millis() as u64, "worker did not answer in time");
                Err(ExecError::process_death(format!(
                    "no reply to {name} within {} ms",
                    deadline.as_millis()
                )))
            }
        }
    }

    /// Extend the worker class path
    pub async fn add_paths(&self, entries: &[String], deadline: Duration) -> ExecResult<usize> {
        let command = Command::AddPaths {
            entries: entries.to_vec(),
        };
        match self.call(command, deadline).await? {
            Reply::PathsAdded { count } => Ok(count),
            other => Err(unexpected("addPaths", &other)),
        }
    }

    /// Load every user class in the worker
    pub async fn warmup(&self, deadline: Duration) -> ExecResult<usize> {
        match self.call(Command::Warmup, deadline).await? {
            Reply::WarmedUp { classes } => Ok(classes),
            other => Err(unexpected("warmup", &other)),
        }
    }

    /// Ship instrumentation settings
    pub async fn set_instrumentation(&self, spec: &InstrumentationSpec, deadline: Duration) -> ExecResult<()> {
        let command = Command::SetInstrumentation {
            payload: spec.to_payload()?,
        };
        match self.call(command, deadline).await? {
            Reply::InstrumentationSet => Ok(()),
            other => Err(unexpected("setInstrumentation", &other)),
        }
    }

    /// Run one executable in the worker
    pub async fn invoke(
        &self,
        class: &ClassId,
        signature: &str,
        data: &ConcreteExecutionData,
        deadline: Duration,
    ) -> ExecResult<ConcreteExecutionResult> {
        let command = Command::Invoke {
            class: class.clone(),
            signature: signature.to_string(),
            payload: encode_payload(data)?,
        };
        match self.call(command, deadline).await? {
            Reply::Invoked { payload } => decode_payload(&payload),
            other => Err(unexpected("invoke", &other)),
        }
    }

    /// Coverage accumulated for a class
    pub async fn collect_coverage(&self, class: &ClassId, deadline: Duration) -> ExecResult<ClassCoverage> {
        let command = Command::CollectCoverage { class: class.clone() };
        match self.call(command, deadline).await? {
            Reply::Coverage { payload } => decode_payload(&payload),
            other => Err(unexpected("collectCoverage", &other)),
        }
    }

    /// Model of a static field
    pub async fn compute_static_field(&self, field: &FieldRef, deadline: Duration) -> ExecResult<Model> {
        let command = Command::ComputeStaticField {
            payload: encode_payload(field)?,
        };
        match self.call(command, deadline).await? {
            Reply::StaticField { payload } => decode_payload(&payload),
            other => Err(unexpected("computeStaticField", &other)),
        }
    }

    /// Ask the worker to exit
    pub async fn stop_process(&self, deadline: Duration) -> ExecResult<()> {
        match self.call(Command::StopProcess, deadline).await? {
            Reply::Stopping => Ok(()),
            other => Err(unexpected("stopProcess", &other)),
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn unexpected(command: &str, reply: &Reply) -> ExecError {
    ExecError::protocol(format!("unexpected reply to {command}: {reply:?}"))
}

async fn read_responses(
    mut reader: WorkerReader,
    pending: Arc<Mutex<PendingTable>>,
    alive: Arc<AtomicBool>,
    max_frame_bytes: usize,
) {
    let reason = loop {
        match codec::recv::<_, Response>(&mut *reader, max_frame_bytes).await {
            Ok(Some(response)) => {
                let waiter = pending.lock().await.requests.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        // the caller may have given up already
                        let _ = tx.send(Ok(response.reply));
                    }
                    None => debug!(id = response.id, "reply for a request nobody waits for"),
                }
            }
            Ok(None) => break "worker closed its output".to_string(),
            Err(err) => break format!("worker channel failed: {err}"),
        }
    };

    let mut table = pending.lock().await;
    table.closed = true;
    alive.store(false, Ordering::Release);
    let orphaned = table.requests.len();
    for (_, tx) in table.requests.drain() {
        let _ = tx.send(Err(ExecError::process_death(reason.clone())));
    }
    debug!(orphaned, reason = %reason, "worker reader stopped");
}
