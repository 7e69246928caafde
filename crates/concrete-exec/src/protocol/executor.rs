//! Client-side handle on one restartable worker.

use super::client::WorkerClient;
use super::launcher::{WorkerChannel, WorkerLauncher, WorkerProcess};
use crate::config::{ExecutorConfig, InstrumentationSpec};
use crate::coverage::ClassCoverage;
use crate::model::{ClassId, ConcreteExecutionData, ConcreteExecutionResult, FieldRef, Model};
use crate::result::{ExecError, ExecResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug)]
struct LiveWorker {
    client: WorkerClient,
    process: WorkerProcess,
}

impl LiveWorker {
    fn is_alive(&mut self) -> bool {
        self.client.is_alive() && !self.process.has_exited()
    }
}

/// One worker slot.
///
/// The worker is started lazily and replaced transparently on the next
/// request after it dies: the class path and instrumentation are replayed
/// to the fresh process. Requests are strictly serialized.
#[derive(Debug)]
pub struct ConcreteExecutor {
    id: Uuid,
    launcher: Arc<dyn WorkerLauncher>,
    config: ExecutorConfig,
    paths: Vec<String>,
    instrumentation: InstrumentationSpec,
    worker: Mutex<Option<LiveWorker>>,
    stopped: AtomicBool,
}

impl ConcreteExecutor {
    /// Executor for workers with the given class path and instrumentation
    #[must_use]
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        config: ExecutorConfig,
        paths: Vec<String>,
        instrumentation: InstrumentationSpec,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            launcher,
            config,
            paths,
            instrumentation,
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Executor identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Class path replayed to every worker
    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Instrumentation replayed to every worker
    #[must_use]
    pub const fn instrumentation(&self) -> &InstrumentationSpec {
        &self.instrumentation
    }

    /// Whether this executor serves the given configuration
    #[must_use]
    pub fn serves(&self, paths: &[String], instrumentation: &InstrumentationSpec) -> bool {
        self.paths == paths && &self.instrumentation == instrumentation
    }

    /// Whether [`ConcreteExecutor::stop`] has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Whether a worker is running and answering
    pub async fn is_alive(&self) -> bool {
        self.worker.lock().await.as_mut().is_some_and(LiveWorker::is_alive)
    }

    fn control_deadline(&self) -> Duration {
        self.config.client_deadline(self.config.default_timeout_ms)
    }

    /// Start a worker unless a live one exists, replaying `addPaths` then
    /// `setInstrumentation`
    pub async fn restart_if_needed(&self) -> ExecResult<()> {
        let mut slot = self.worker.lock().await;
        self.ensure_worker(&mut slot).await.map(|_| ())
    }

    async fn ensure_worker<'s>(&self, slot: &'s mut Option<LiveWorker>) -> ExecResult<&'s LiveWorker> {
        if self.is_stopped() {
            return Err(ExecError::config(format!("executor {} is stopped", self.id)));
        }
        if slot.as_mut().is_some_and(|worker| !worker.is_alive()) {
            warn!(executor = %self.id, "worker died, restarting");
            if let Some(mut dead) = slot.take() {
                dead.process.kill().await;
            }
        }
        if slot.is_none() {
            let worker = self.spawn().await?;
            *slot = Some(worker);
        }
        slot.as_ref()
            .ok_or_else(|| ExecError::process_death("worker slot empty after restart"))
    }

    async fn spawn(&self) -> ExecResult<LiveWorker> {
        let WorkerChannel {
            reader,
            writer,
            process,
        } = self.launcher.launch().await?;
        let mut worker = LiveWorker {
            client: WorkerClient::new(reader, writer, self.config.max_frame_bytes),
            process,
        };
        let deadline = self.control_deadline();
        let replayed = async {
            worker.client.add_paths(&self.paths, deadline).await?;
            worker
                .client
                .set_instrumentation(&self.instrumentation, deadline)
                .await
        }
        .await;
        if let Err(err) = replayed {
            worker.process.kill().await;
            return Err(err);
        }
        info!(executor = %self.id, pid = worker.process.id(), "worker ready");
        Ok(worker)
    }

    /// Discard the worker after a fatal error
    async fn bury(&self, slot: &mut Option<LiveWorker>, reason: &ExecError) {
        if let Some(mut worker) = slot.take() {
            warn!(executor = %self.id, error = %reason, "discarding worker");
            worker.process.kill().await;
        }
    }

    /// Load every user class in the worker
    pub async fn warmup(&self) -> ExecResult<usize> {
        let mut slot = self.worker.lock().await;
        let deadline = self.control_deadline();
        let outcome = self.ensure_worker(&mut slot).await?.client.warmup(deadline).await;
        if let Err(err) = &outcome {
            if err.is_fatal() {
                self.bury(&mut slot, err).await;
            }
        }
        outcome
    }

    /// Run one executable in the worker.
    ///
    /// A worker that dies or stops answering yields a
    /// `ProcessDeath` result and is replaced on the next call.
    #[instrument(skip_all, fields(executor = %self.id, class = %class, signature))]
    pub async fn execute(
        &self,
        class: &ClassId,
        signature: &str,
        data: &ConcreteExecutionData,
    ) -> ExecResult<ConcreteExecutionResult> {
        let mut slot = self.worker.lock().await;
        let deadline = self.config.client_deadline(data.timeout_ms);
        let outcome = self
            .ensure_worker(&mut slot)
            .await?
            .client
            .invoke(class, signature, data, deadline)
            .await;
        match outcome {
            Ok(result) => {
                debug!(failure = ?result.result.failure_kind(), "invocation returned");
                Ok(result)
            }
            Err(err) if err.is_fatal() => {
                self.bury(&mut slot, &err).await;
                Ok(ConcreteExecutionResult::process_death(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Coverage accumulated for a class in the current worker
    pub async fn collect_coverage(&self, class: &ClassId) -> ExecResult<ClassCoverage> {
        let mut slot = self.worker.lock().await;
        let deadline = self.control_deadline();
        let outcome = self
            .ensure_worker(&mut slot)
            .await?
            .client
            .collect_coverage(class, deadline)
            .await;
        if let Err(err) = &outcome {
            if err.is_fatal() {
                self.bury(&mut slot, err).await;
            }
        }
        outcome
    }

    /// Model of a static field in the current worker
    pub async fn compute_static_field(&self, field: &FieldRef) -> ExecResult<Model> {
        let mut slot = self.worker.lock().await;
        let deadline = self.control_deadline();
        let outcome = self
            .ensure_worker(&mut slot)
            .await?
            .client
            .compute_static_field(field, deadline)
            .await;
        if let Err(err) = &outcome {
            if err.is_fatal() {
                self.bury(&mut slot, err).await;
            }
        }
        outcome
    }

    /// Ask the worker to exit, then kill it if it lingers past the grace
    /// period. The executor refuses further requests.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut slot = self.worker.lock().await;
        let Some(mut worker) = slot.take() else {
            return;
        };
        let grace = self.config.stop_grace();
        if let Err(err) = worker.client.stop_process(grace).await {
            debug!(executor = %self.id, error = %err, "stop request not acknowledged");
        }
        if !worker.process.wait_for_exit(grace).await {
            warn!(executor = %self.id, "worker ignored stop request, killing");
            worker.process.kill().await;
        }
        info!(executor = %self.id, "executor stopped");
    }
}
