//! Running blocking handler methods off the dispatch path.
//!
//! - [`Executor`]: accepts blocking tasks; owned by the embedder
//! - [`WorkerPool`]: bounded pool of OS threads fed by a bounded queue
//! - [`ExecutionAdapter`]: runs a method inline or on the executor, by mode
//! - [`ExecutingOperationHandler`]: applies the adapter to each method of a handler

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use nexusrpc_core::{HandlerError, HandlerErrorType, OperationInfo, Payload};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::config::WorkerPoolConfig;
use crate::context::{
    CancelOperationContext, FetchOperationInfoContext, FetchOperationResultContext,
    StartOperationContext,
};
use crate::error::{ConfigurationError, DispatchError, ExecutorError};
use crate::operation::{
    ExecutionMode, ExecutionModes, HandlerMethod, OperationHandler, StartOperationResult,
};

/// A unit of blocking work.
pub type BlockingTask = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Executor trait
// ---------------------------------------------------------------------------

/// Runs blocking tasks on threads other than the dispatch path.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    /// Queues `task`, waiting for queue capacity if necessary.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::Closed` if the executor no longer accepts work.
    async fn execute(&self, task: BlockingTask) -> Result<(), ExecutorError>;
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed set of worker threads draining a bounded task queue.
///
/// A panicking task is logged and does not take its worker thread down.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<BlockingTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns the worker threads. Must be called outside of worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn start(config: &WorkerPoolConfig) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<BlockingTask>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let threads = config.threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = Arc::clone(&rx);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{i}", config.thread_name))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }
        tracing::debug!(threads, queue_capacity = config.queue_capacity, "worker pool started");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Closes the queue and waits for queued tasks to finish.
    pub async fn stop(&self) {
        self.tx.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                let _ = worker.join();
            }
        })
        .await;
        if let Err(err) = joined {
            tracing::warn!(error = %err, "worker pool shutdown did not complete");
        }
        tracing::debug!("worker pool stopped");
    }
}

fn worker_loop(rx: &Mutex<mpsc::Receiver<BlockingTask>>) {
    loop {
        // The guard is released before the task runs.
        let task = rx.lock().blocking_recv();
        let Some(task) = task else { break };
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("blocking task panicked");
        }
    }
}

#[async_trait]
impl Executor for WorkerPool {
    async fn execute(&self, task: BlockingTask) -> Result<(), ExecutorError> {
        let tx = self.tx.lock().clone().ok_or(ExecutorError::Closed)?;
        tx.send(task).await.map_err(|_| ExecutorError::Closed)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.lock().len())
            .field("running", &self.tx.lock().is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ExecutionAdapter
// ---------------------------------------------------------------------------

/// Runs handler calls according to their [`ExecutionMode`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionAdapter {
    executor: Option<Arc<dyn Executor>>,
}

impl ExecutionAdapter {
    #[must_use]
    pub fn new(executor: Option<Arc<dyn Executor>>) -> Self {
        Self { executor }
    }

    #[must_use]
    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }

    /// Awaits `call` inline, or for a blocking call, drives it to completion on
    /// an executor thread while the caller awaits the outcome.
    ///
    /// A blocking call runs outside any tokio runtime context, so it may build
    /// and drive a runtime of its own.
    ///
    /// # Errors
    ///
    /// Returns the call's own error; `ConfigurationError::NoExecutor` for a
    /// blocking call without an executor; a `HandlerError` if the executor is
    /// closed or the call panics.
    pub async fn run<T, F>(&self, mode: ExecutionMode, call: F) -> Result<T, DispatchError>
    where
        F: Future<Output = Result<T, DispatchError>> + Send + 'static,
        T: Send + 'static,
    {
        match mode {
            ExecutionMode::NonBlocking => call.await,
            ExecutionMode::Blocking => {
                let executor = self.executor.as_ref().ok_or(ConfigurationError::NoExecutor)?;
                let (tx, rx) = oneshot::channel();
                executor
                    .execute(Box::new(move || {
                        let _ = tx.send(futures::executor::block_on(call));
                    }))
                    .await?;

                rx.await.map_err(|_| {
                    DispatchError::from(HandlerError::new(
                        "Blocking operation method panicked.",
                        HandlerErrorType::Internal,
                    ))
                })?
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutingOperationHandler
// ---------------------------------------------------------------------------

/// Routes each method of a handler through an [`ExecutionAdapter`] according
/// to the handler's [`ExecutionModes`].
pub struct ExecutingOperationHandler {
    service: String,
    operation: String,
    inner: Arc<dyn OperationHandler>,
    modes: ExecutionModes,
    adapter: ExecutionAdapter,
}

impl ExecutingOperationHandler {
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        inner: Arc<dyn OperationHandler>,
        adapter: ExecutionAdapter,
    ) -> Self {
        let modes = inner.execution_modes();
        Self {
            service: service.into(),
            operation: operation.into(),
            inner,
            modes,
            adapter,
        }
    }

    async fn run<T, F>(&self, method: HandlerMethod, call: F) -> Result<T, DispatchError>
    where
        F: Future<Output = Result<T, DispatchError>> + Send + 'static,
        T: Send + 'static,
    {
        let mode = self.modes.get(method);
        if mode == ExecutionMode::Blocking && !self.adapter.has_executor() {
            return Err(ConfigurationError::BlockingWithoutExecutor {
                service: self.service.clone(),
                operation: self.operation.clone(),
                method,
            }
            .into());
        }
        self.adapter.run(mode, call).await
    }
}

#[async_trait]
impl OperationHandler for ExecutingOperationHandler {
    async fn start(
        &self,
        ctx: &StartOperationContext,
        input: Payload,
    ) -> Result<StartOperationResult, DispatchError> {
        let (inner, ctx) = (Arc::clone(&self.inner), ctx.clone());
        self.run(HandlerMethod::Start, async move { inner.start(&ctx, input).await })
            .await
    }

    async fn cancel(&self, ctx: &CancelOperationContext, token: &str) -> Result<(), DispatchError> {
        let (inner, ctx, token) = (Arc::clone(&self.inner), ctx.clone(), token.to_string());
        self.run(HandlerMethod::Cancel, async move { inner.cancel(&ctx, &token).await })
            .await
    }

    async fn fetch_info(
        &self,
        ctx: &FetchOperationInfoContext,
        token: &str,
    ) -> Result<OperationInfo, DispatchError> {
        let (inner, ctx, token) = (Arc::clone(&self.inner), ctx.clone(), token.to_string());
        self.run(HandlerMethod::FetchInfo, async move {
            inner.fetch_info(&ctx, &token).await
        })
        .await
    }

    async fn fetch_result(
        &self,
        ctx: &FetchOperationResultContext,
        token: &str,
    ) -> Result<Payload, DispatchError> {
        let (inner, ctx, token) = (Arc::clone(&self.inner), ctx.clone(), token.to_string());
        self.run(HandlerMethod::FetchResult, async move {
            inner.fetch_result(&ctx, &token).await
        })
        .await
    }

    // Blocking methods are already placed on the executor here.
    fn execution_modes(&self) -> ExecutionModes {
        ExecutionModes::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
