//! Import manager.
//!
//! Every registered pipeline is a (source, batch reader, importers) triple.
//! Its read loop runs on the reader pool and hands each batch to the importer
//! pool, which calls every importer on the batch and updates the stats.
//!
//! ```text
//! import() ─► reader pool: read loop ─► importer pool: import task ─► Importer ─► Pool
//!                  ▲                                                     │
//!   start gate ────┘                                 ConcurrencyStats ◄──┘
//! ```
//!
//! Lifecycle: `start` runs before-hooks, opens the connection pool and the
//! start gate; `wait` drains every pipeline and calls `stop`; `stop` closes
//! the pool and runs after-hooks exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use graphload_client::{Options, Pool, SharedSessionFactory, UseGraph};
use graphload_core::{BarrierGuard, ConfigError, CountingBarrier, LoaderConfig, ManagerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::hooks::{Hooks, run_hooks};
use crate::importer::Importer;
use crate::source::{Batch, BatchRecordReader, Source};
use crate::stats::{ConcurrencyStats, Stats};
use crate::task_pool::{TaskPool, TaskPoolError};

/// Concurrency, stats and hook settings of a [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub graph_name: String,
    pub reader_concurrency: usize,
    pub importer_concurrency: usize,
    /// Zero disables periodic stats logging.
    pub stats_interval: Duration,
    pub hooks: Hooks,
}

impl ManagerOptions {
    /// Defaults for `graph_name`; stats are logged every ten seconds.
    pub fn new(graph_name: impl Into<String>) -> Self {
        Self {
            graph_name: graph_name.into(),
            reader_concurrency: graphload_core::config::DEFAULT_READER_CONCURRENCY,
            importer_concurrency: graphload_core::config::DEFAULT_IMPORTER_CONCURRENCY,
            stats_interval: graphload_core::config::DEFAULT_STATS_INTERVAL,
            hooks: Hooks::default(),
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            graph_name: config.graph_name().to_string(),
            reader_concurrency: config.reader_concurrency()?,
            importer_concurrency: config.importer_concurrency()?,
            stats_interval: config.stats_interval()?,
            hooks: Hooks::from_config(&config.hooks)?,
        })
    }

    pub fn with_reader_concurrency(mut self, n: usize) -> Self {
        self.reader_concurrency = n;
        self
    }

    pub fn with_importer_concurrency(mut self, n: usize) -> Self {
        self.importer_concurrency = n;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// State shared between the manager and its tasks.
struct Shared {
    graph: String,
    stats: ConcurrencyStats,
    readers: TaskPool,
    importers: TaskPool,
    /// One unit per registered read loop.
    readers_active: Arc<CountingBarrier>,
    /// One unit per batch handed to the importer pool.
    imports_active: Arc<CountingBarrier>,
    start_gate: watch::Sender<bool>,
    stop: watch::Sender<bool>,
}

struct Pipeline {
    name: String,
    source: Box<dyn Source>,
    reader: Box<dyn BatchRecordReader>,
    importers: Arc<[Arc<dyn Importer>]>,
    /// Import tasks of this pipeline still running.
    pending: Arc<CountingBarrier>,
}

/// Runs registered pipelines against one connection pool and owns the
/// import lifecycle.
pub struct Manager {
    options: ManagerOptions,
    pool: Arc<Pool>,
    shared: Arc<Shared>,
    started: AtomicBool,
    stopped: AtomicBool,
    stats_shutdown: watch::Sender<bool>,
    stats_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Create an idle manager; nothing runs until [`start`](Manager::start).
    pub fn new(pool: Arc<Pool>, options: ManagerOptions) -> Self {
        let (start_gate, _) = watch::channel(false);
        let (stop, _) = watch::channel(false);
        let (stats_shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            graph: options.graph_name.clone(),
            stats: ConcurrencyStats::new(),
            readers: TaskPool::new("reader", options.reader_concurrency),
            importers: TaskPool::new("importer", options.importer_concurrency),
            readers_active: CountingBarrier::shared("readers"),
            imports_active: CountingBarrier::shared("imports"),
            start_gate,
            stop,
        });
        Self {
            options,
            pool,
            shared,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stats_shutdown,
            stats_task: std::sync::Mutex::new(None),
        }
    }

    /// Build the connection pool and the manager from `graphload.toml`.
    /// Pool clients select the configured graph after every connect.
    pub fn from_config(
        config: &LoaderConfig,
        session_factory: SharedSessionFactory,
    ) -> ManagerResult<Self> {
        let options = ManagerOptions::from_config(&config.manager)?;
        let mut pool_options = Options::from_config(&config.client, session_factory)?;
        if !options.graph_name.is_empty() {
            pool_options =
                pool_options.with_client_init(Arc::new(UseGraph::new(options.graph_name.clone())));
        }
        Ok(Self::new(Arc::new(Pool::new(pool_options)), options))
    }

    /// The connection pool import statements run on.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Graph this manager imports into; empty when none was configured.
    pub fn graph_name(&self) -> &str {
        &self.options.graph_name
    }

    /// Register a pipeline.
    ///
    /// The pipeline waits for [`start`](Manager::start) and its importers'
    /// barriers, then for a free reader slot; any number of pipelines may be
    /// registered. Opening the source or reading its size fails the call, as
    /// does registering after [`stop`](Manager::stop).
    pub async fn import(
        &self,
        mut source: Box<dyn Source>,
        reader: Box<dyn BatchRecordReader>,
        importers: Vec<Arc<dyn Importer>>,
    ) -> ManagerResult<()> {
        let name = source.name();
        if importers.is_empty() {
            debug!(graph = %self.shared.graph, source = %name, "no importers, skipping source");
            return Ok(());
        }
        if self.stopped.load(Ordering::SeqCst) || self.shared.readers.is_released() {
            return Err(TaskPoolError::Released(self.shared.readers.name().to_string()).into());
        }

        source.open().await.map_err(|cause| self.source_error(&name, "open", cause))?;
        let size = match source.size().await {
            Ok(size) => size,
            Err(cause) => {
                close_source(&self.shared.graph, &name, source.as_mut()).await;
                return Err(self.source_error(&name, "read the size of", cause));
            }
        };
        self.shared.stats.add_total_bytes(size);

        self.shared.readers_active.add(1);
        for importer in &importers {
            importer.add(1);
        }
        let pipeline = Pipeline {
            name,
            source,
            reader,
            importers: importers.into(),
            pending: CountingBarrier::shared("pipeline-imports"),
        };
        debug!(graph = %self.shared.graph, source = %pipeline.name, size, "pipeline registered");
        tokio::spawn(read_loop(Arc::clone(&self.shared), pipeline));
        Ok(())
    }

    fn source_error(&self, name: &str, action: &'static str, cause: anyhow::Error) -> ManagerError {
        ManagerError::Source {
            graph: self.shared.graph.clone(),
            source_name: name.to_string(),
            action,
            cause,
        }
    }

    /// Run before-hooks, open the pool and let registered pipelines proceed.
    pub async fn start(&self) -> ManagerResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ManagerError::AlreadyStarted);
        }
        info!(graph = %self.shared.graph, "starting import");

        run_hooks(&self.pool, &self.shared.graph, "before", &self.options.hooks.before).await?;
        self.shared.stats.init();
        self.pool.open().await?;
        self.shared.start_gate.send_replace(true);

        if !self.options.stats_interval.is_zero() {
            let handle = tokio::spawn(stats_loop(
                Arc::clone(&self.shared),
                self.options.stats_interval,
                self.stats_shutdown.subscribe(),
            ));
            *self.stats_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        Ok(())
    }

    /// Wait for every pipeline to drain, then [`stop`](Manager::stop).
    pub async fn wait(&self) -> ManagerResult<()> {
        self.drain().await;
        self.stop().await
    }

    async fn drain(&self) {
        self.shared.readers_active.wait().await;
        self.shared.imports_active.wait().await;
    }

    /// Stop reading, drain in-flight batches, close the pool and run
    /// after-hooks. Only the first call does anything.
    pub async fn stop(&self) -> ManagerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.stop.send_replace(true);
        self.drain().await;
        self.shared.readers.release();
        self.shared.importers.release();

        self.stats_shutdown.send_replace(true);
        let stats_task = self
            .stats_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = stats_task {
            if let Err(e) = handle.await {
                warn!(graph = %self.shared.graph, error = %e, "stats loop panicked");
            }
        }

        let stats = self.stats();
        info!(graph = %self.shared.graph, failed = stats.is_failed(), "final stats: {stats}");
        self.pool.close().await;

        if self.started.load(Ordering::SeqCst) {
            run_hooks(&self.pool, &self.shared.graph, "after", &self.options.hooks.after).await?;
        }
        info!(graph = %self.shared.graph, "import stopped");
        Ok(())
    }

    /// Snapshot of the aggregate progress counters.
    pub fn stats(&self) -> Stats {
        self.shared.stats.stats()
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("options", &self.options)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Resolves once the flag is set or its sender is gone.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}

async fn close_source(graph: &str, name: &str, source: &mut dyn Source) {
    if let Err(e) = source.close().await {
        warn!(graph, source = name, error = %e, "failed to close source");
    }
}

async fn read_loop(shared: Arc<Shared>, pipeline: Pipeline) {
    let _reading = BarrierGuard::adopt(Arc::clone(&shared.readers_active));
    let Pipeline {
        name,
        mut source,
        mut reader,
        importers,
        pending,
    } = pipeline;
    let mut stop = shared.stop.subscribe();
    let mut start_gate = shared.start_gate.subscribe();

    let ready = async {
        signalled(&mut start_gate).await;
        for importer in importers.iter() {
            importer.wait().await;
        }
        shared.readers.acquire().await
    };
    // Held until the pipeline finished; bounds concurrent read loops.
    let slot = tokio::select! {
        biased;
        _ = signalled(&mut stop) => None,
        slot = ready => match slot {
            Ok(slot) => Some(slot),
            Err(e) => {
                warn!(graph = %shared.graph, source = %name, error = %e, "no reader slot, skipping source");
                None
            }
        },
    };

    if slot.is_some() {
        debug!(graph = %shared.graph, source = %name, "reading source");
        loop {
            let next = tokio::select! {
                biased;
                _ = signalled(&mut stop) => break,
                next = reader.read_batch(source.as_mut()) => next,
            };
            match next {
                Ok(Some(batch)) => {
                    if !submit_batch(&shared, &name, &importers, &pending, batch).await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(graph = %shared.graph, source = %name, "source drained");
                    break;
                }
                Err(e) => {
                    error!(graph = %shared.graph, source = %name, error = %e, "read failed, dropping rest of source");
                    break;
                }
            }
        }
    }

    close_source(&shared.graph, &name, source.as_mut()).await;
    pending.wait().await;
    for importer in importers.iter() {
        importer.done();
    }
}

/// Hand one batch to the importer pool, waiting for a free slot.
/// Returns `false` if the pool no longer accepts work.
async fn submit_batch(
    shared: &Arc<Shared>,
    source: &str,
    importers: &Arc<[Arc<dyn Importer>]>,
    pending: &Arc<CountingBarrier>,
    batch: Batch,
) -> bool {
    let slot = match shared.importers.acquire().await {
        Ok(slot) => slot,
        Err(e) => {
            error!(graph = %shared.graph, source, error = %e, "batch dropped");
            shared.stats.failed(batch.bytes, batch.len() as u64);
            return false;
        }
    };
    let guards = (shared.imports_active.enter(), pending.enter());
    let task = import_batch(
        Arc::clone(shared),
        source.to_string(),
        Arc::clone(importers),
        batch,
    );
    slot.spawn(async move {
        let _guards = guards;
        task.await;
    });
    true
}

async fn import_batch(
    shared: Arc<Shared>,
    source: String,
    importers: Arc<[Arc<dyn Importer>]>,
    batch: Batch,
) {
    let records = batch.len() as u64;
    if batch.is_empty() {
        shared.stats.succeeded(batch.bytes, 0);
        return;
    }

    let mut failed = false;
    for importer in importers.iter() {
        match importer.import(&batch.records).await {
            Ok(result) => {
                shared
                    .stats
                    .request_succeeded(records, result.latency, result.resp_time);
            }
            Err(e) => {
                let e = e.with_graph(shared.graph.as_str()).with_source(source.as_str());
                error!(
                    graph = %shared.graph,
                    source = %source,
                    statement = e.statement.as_deref().unwrap_or_default(),
                    error = %e.cause,
                    "import failed"
                );
                shared.stats.request_failed(records);
                failed = true;
            }
        }
    }

    if failed {
        shared.stats.failed(batch.bytes, records);
    } else {
        shared.stats.succeeded(batch.bytes, records);
    }
}

async fn stats_loop(shared: Arc<Shared>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    debug!(graph = %shared.graph, interval_ms = interval.as_millis() as u64, "stats loop started");
    loop {
        tokio::select! {
            _ = signalled(&mut shutdown) => break,
            _ = tokio::time::sleep(interval) => {
                info!(graph = %shared.graph, "{}", shared.stats.stats());
            }
        }
    }
}
