//! Bounded set of executors keyed by class path and instrumentation.

use super::executor::ConcreteExecutor;
use super::launcher::WorkerLauncher;
use crate::config::{ExecutorConfig, InstrumentationSpec};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Reuses executors whose configuration matches and stops the least
/// recently used one when the pool is full.
#[derive(Debug)]
pub struct ConcreteExecutorPool {
    launcher: Arc<dyn WorkerLauncher>,
    config: ExecutorConfig,
    /// Most recently used last
    executors: Mutex<Vec<Arc<ConcreteExecutor>>>,
}

impl ConcreteExecutorPool {
    /// Empty pool launching workers through `launcher`
    #[must_use]
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: ExecutorConfig) -> Self {
        Self {
            launcher,
            config,
            executors: Mutex::new(Vec::new()),
        }
    }

    /// Number of executors currently held
    pub async fn len(&self) -> usize {
        self.executors.lock().await.len()
    }

    /// Whether the pool holds no executor
    pub async fn is_empty(&self) -> bool {
        self.executors.lock().await.is_empty()
    }

    /// Executor for the given configuration, created on demand
    pub async fn acquire(&self, paths: &[String], instrumentation: &InstrumentationSpec) -> Arc<ConcreteExecutor> {
        let mut executors = self.executors.lock().await;
        executors.retain(|executor| !executor.is_stopped());

        if let Some(index) = executors
            .iter()
            .position(|executor| executor.serves(paths, instrumentation))
        {
            let executor = executors.remove(index);
            executors.push(Arc::clone(&executor));
            debug!(executor = %executor.id(), "reusing executor");
            return executor;
        }

        let capacity = self.config.pool_size.max(1);
        while executors.len() >= capacity {
            let evicted = executors.remove(0);
            info!(executor = %evicted.id(), "evicting least recently used executor");
            evicted.stop().await;
        }

        let executor = Arc::new(ConcreteExecutor::new(
            Arc::clone(&self.launcher),
            self.config.clone(),
            paths.to_vec(),
            instrumentation.clone(),
        ));
        info!(executor = %executor.id(), paths = ?paths, "created executor");
        executors.push(Arc::clone(&executor));
        executor
    }

    /// Stop every executor and empty the pool
    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.executors.lock().await.drain(..).collect();
        for executor in drained {
            executor.stop().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::protocol::InProcessLauncher;

    fn pool(size: usize) -> ConcreteExecutorPool {
        let config = ExecutorConfig::new().with_pool_size(size).with_stop_grace_ms(500);
        let launcher = InProcessLauncher::new(Arc::new(fixtures::catalog()), config.max_frame_bytes);
        ConcreteExecutorPool::new(Arc::new(launcher), config)
    }

    fn paths(entry: &str) -> Vec<String> {
        vec![entry.to_string()]
    }

    #[tokio::test]
    async fn test_matching_configuration_is_reused() {
        let pool = pool(2);
        let spec = InstrumentationSpec::default();
        let first = pool.acquire(&paths(fixtures::ENTRY), &spec).await;
        let again = pool.acquire(&paths(fixtures::ENTRY), &spec).await;
        assert_eq!(first.id(), again.id());

        let deeper = InstrumentationSpec::new().with_max_depth(2);
        let other = pool.acquire(&paths(fixtures::ENTRY), &deeper).await;
        assert_ne!(first.id(), other.id());
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let pool = pool(2);
        let spec = InstrumentationSpec::default();
        let a = pool.acquire(&paths("a"), &spec).await;
        let b = pool.acquire(&paths("b"), &spec).await;
        // touch `a` so `b` becomes the eviction candidate
        pool.acquire(&paths("a"), &spec).await;
        pool.acquire(&paths("c"), &spec).await;

        assert_eq!(pool.len().await, 2);
        assert!(b.is_stopped());
        assert!(!a.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_executor_is_replaced() {
        let pool = pool(2);
        let spec = InstrumentationSpec::default();
        let first = pool.acquire(&paths(fixtures::ENTRY), &spec).await;
        first.warmup().await.unwrap();
        first.stop().await;

        let second = pool.acquire(&paths(fixtures::ENTRY), &spec).await;
        assert_ne!(first.id(), second.id());
        assert_eq!(pool.len().await, 1);

        pool.stop_all().await;
        assert!(pool.is_empty().await);
        assert!(second.is_stopped());
    }
}
