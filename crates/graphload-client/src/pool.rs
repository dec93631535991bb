//! Connection pool.
//!
//! `addresses × concurrency_per_address` workers each own one long-lived
//! [`Client`] and pull requests off a shared bounded queue.
//!
//! ```text
//! execute(stmt) ──► bounded queue ──► worker[addr, i] ──► Client::execute
//!       ▲                                   │
//!       └──────────── oneshot reply ◄───────┘
//! ```
//!
//! Workers reconnect with exponential backoff when a connect or execute fails,
//! and exit when the pool-wide shutdown signal fires.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use graphload_core::{Address, BarrierGuard, CountingBarrier};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::client::Client;
use crate::error::{PoolError, PoolResult};
use crate::options::{ClientOptions, Options};
use crate::session::Response;

/// Outcome of one queued statement.
pub type ExecuteResult = PoolResult<Box<dyn Response>>;

struct ExecuteRequest {
    statement: String,
    reply: oneshot::Sender<ExecuteResult>,
}

type SharedQueue = Arc<Mutex<mpsc::Receiver<ExecuteRequest>>>;

/// Bounded request queue served by long-lived per-address workers.
pub struct Pool {
    options: Options,
    queue_tx: mpsc::Sender<ExecuteRequest>,
    queue_rx: SharedQueue,
    closed: RwLock<bool>,
    opened: AtomicBool,
    inflight: Arc<CountingBarrier>,
    shutdown: watch::Sender<bool>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Allocate the request queue. No network I/O happens until [`Pool::open`].
    pub fn new(options: Options) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(options.queue_size.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            options,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            closed: RwLock::new(false),
            opened: AtomicBool::new(false),
            inflight: CountingBarrier::shared("pool-inflight"),
            shutdown,
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Options the pool was built with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Server addresses, in configuration order.
    pub fn addresses(&self) -> &[Address] {
        &self.options.addresses
    }

    /// Whether [`Pool::close`] has begun.
    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate every address with a trial connection, then start the workers.
    pub async fn open(&self) -> PoolResult<()> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        if self.options.addresses.is_empty() {
            return Err(PoolError::NoAddresses);
        }
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyOpen);
        }

        for address in &self.options.addresses {
            if let Err(e) = self.trial_connect(address).await {
                self.opened.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(PoolError::Closed);
        }
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for address in &self.options.addresses {
            for _ in 0..self.options.concurrency_per_address {
                let worker = Worker {
                    id: workers.len(),
                    address: address.clone(),
                    options: self.options.clone(),
                    queue: Arc::clone(&self.queue_rx),
                    shutdown: self.shutdown.subscribe(),
                };
                workers.push(tokio::spawn(worker.run()));
            }
        }

        info!(
            addresses = self.options.addresses.len(),
            workers = workers.len(),
            queue_size = self.options.queue_size,
            "connection pool opened"
        );
        Ok(())
    }

    async fn trial_connect(&self, address: &Address) -> PoolResult<()> {
        let mut client = Client::new(
            address.clone(),
            &self.options.session_factory,
            self.options.client.clone(),
        );
        client.open().await?;
        if let Err(e) = client.close().await {
            warn!(address = %address, error = %e, "failed to close trial connection");
        }
        debug!(address = %address, "address validated");
        Ok(())
    }

    /// Queue a statement and wait for its result. Blocks while the queue is full.
    pub async fn execute(&self, statement: &str) -> ExecuteResult {
        let reply = {
            let _guard = self.admit()?;
            let (tx, rx) = oneshot::channel();
            self.queue_tx
                .send(ExecuteRequest {
                    statement: statement.to_string(),
                    reply: tx,
                })
                .await
                .map_err(|_| PoolError::Closed)?;
            rx
        };
        reply.await.map_err(|_| PoolError::Closed)?
    }

    /// Queue a statement without waiting. Returns `None` if the queue is full
    /// or the pool is closed.
    pub fn execute_chan(&self, statement: &str) -> Option<PendingResult> {
        let _guard = self.admit().ok()?;
        let (tx, rx) = oneshot::channel();
        match self.queue_tx.try_send(ExecuteRequest {
            statement: statement.to_string(),
            reply: tx,
        }) {
            Ok(()) => Some(PendingResult { rx }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("request queue full, rejecting statement");
                None
            }
            Err(mpsc::error::TrySendError::Closed(_)) => None,
        }
    }

    /// Registers an in-flight submission unless shutdown has begun.
    fn admit(&self) -> PoolResult<BarrierGuard> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(PoolError::Closed);
        }
        Ok(self.inflight.enter())
    }

    /// Open a client outside the pool against the first address.
    pub async fn get_client(&self) -> PoolResult<Client> {
        self.get_client_with(self.options.client.clone()).await
    }

    /// Like [`Pool::get_client`], with client options other than the pool's.
    pub async fn get_client_with(&self, options: ClientOptions) -> PoolResult<Client> {
        let address = self
            .options
            .addresses
            .first()
            .ok_or(PoolError::NoAddresses)?
            .clone();
        let mut client = Client::new(address, &self.options.session_factory, options);
        client.open().await?;
        Ok(client)
    }

    /// Drain and stop. Idempotent.
    ///
    /// Submissions that already began are allowed to reach the queue, workers
    /// finish the request in hand, and anything still queued afterwards
    /// resolves to [`PoolError::Closed`].
    pub async fn close(&self) {
        {
            let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return;
            }
            *closed = true;
        }

        // Without workers a blocked `execute` can only be released by closing
        // the queue. `open` spawns workers only while `closed` is unset, so
        // none can appear after this check.
        let has_workers = !self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        if has_workers {
            self.inflight.wait().await;
        }
        self.shutdown.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "pool worker panicked");
            }
        }

        let mut queue = self.queue_rx.lock().await;
        queue.close();
        let mut abandoned = 0usize;
        while let Ok(req) = queue.try_recv() {
            let _ = req.reply.send(Err(PoolError::Closed));
            abandoned += 1;
        }
        info!(abandoned, "connection pool closed");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .field("inflight", &self.inflight.count())
            .finish_non_exhaustive()
    }
}

/// Result slot of a statement queued with [`Pool::execute_chan`].
#[derive(Debug)]
pub struct PendingResult {
    rx: oneshot::Receiver<ExecuteResult>,
}

impl PendingResult {
    /// Wait for the worker's reply; [`PoolError::Closed`] if the pool dropped it.
    pub async fn wait(self) -> ExecuteResult {
        self.rx.await.map_err(|_| PoolError::Closed)?
    }
}

struct Worker {
    id: usize,
    address: Address,
    options: Options,
    queue: SharedQueue,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(mut client) = self.connect().await {
            if !self.serve(&mut client).await {
                break;
            }
        }
        debug!(worker = self.id, address = %self.address, "pool worker stopped");
    }

    /// Retry opening a client until it succeeds or shutdown fires.
    async fn connect(&mut self) -> Option<Client> {
        let mut backoff = Backoff::new(self.options.reconnect_backoff);
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            let mut client = Client::new(
                self.address.clone(),
                &self.options.session_factory,
                self.options.client.clone(),
            );
            let opened = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => return None,
                res = client.open() => res,
            };
            match opened {
                Ok(()) => {
                    debug!(
                        worker = self.id,
                        address = %self.address,
                        attempts = backoff.attempts() + 1,
                        "pool worker connected"
                    );
                    return Some(client);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        worker = self.id,
                        address = %self.address,
                        error = %e,
                        attempts = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "pool worker failed to connect, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_signalled(&mut self.shutdown) => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Serve requests on `client`. Returns `true` if the worker should
    /// reconnect, `false` on shutdown.
    async fn serve(&mut self, client: &mut Client) -> bool {
        let queue = Arc::clone(&self.queue);
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut self.shutdown) => None,
                req = async { queue.lock().await.recv().await } => req,
            };
            let Some(req) = next else {
                self.disconnect(client).await;
                return false;
            };

            let result = client.execute(&req.statement).await;
            let failed = match &result {
                Err(e) => Some(e.to_string()),
                Ok(_) => None,
            };
            // The caller may have stopped waiting.
            let _ = req.reply.send(result);

            if let Some(error) = failed {
                warn!(worker = self.id, address = %self.address, error = %error, "execute failed, reconnecting");
                self.disconnect(client).await;
                return true;
            }
        }
    }

    async fn disconnect(&self, client: &mut Client) {
        if let Err(e) = client.close().await {
            debug!(worker = self.id, address = %self.address, error = %e, "close failed");
        }
    }
}

async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the pool is gone; treat it as shutdown.
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::mock::{MockResponse, MockServer};
    use crate::options::ClientInit;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn options(server: &MockServer, addresses: usize, concurrency: usize) -> Options {
        let addresses = (0..addresses)
            .map(|i| Address::new(format!("graphd-{i}"), 9669))
            .collect();
        Options::new(addresses, server.factory())
            .with_concurrency_per_address(concurrency)
            .with_retry(0)
            .with_reconnect_backoff(BackoffPolicy::with_initial_interval(Duration::ZERO))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn open_then_close_executes_nothing() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 2, 3));

        pool.open().await.unwrap();
        pool.close().await;

        assert_eq!(server.executes(), 0);
        assert!(server.opens() >= 2, "each address gets a trial connection");
        assert_eq!(server.opens(), server.closes());
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn open_requires_addresses() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 0, 1));
        assert!(matches!(pool.open().await, Err(PoolError::NoAddresses)));
    }

    #[tokio::test]
    async fn open_twice_is_rejected() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 1, 1));
        pool.open().await.unwrap();
        assert!(matches!(pool.open().await, Err(PoolError::AlreadyOpen)));
        pool.close().await;
    }

    #[tokio::test]
    async fn open_surfaces_connect_errors_and_can_be_retried() {
        let server = MockServer::new();
        server.set_fail_open(true);
        let pool = Pool::new(options(&server, 1, 1));

        let err = pool.open().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { .. }));

        server.set_fail_open(false);
        pool.open().await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn open_after_close_fails() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 1, 1));
        pool.close().await;
        assert!(matches!(pool.open().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn execute_round_trips_through_workers() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 2, 2));
        pool.open().await.unwrap();

        for i in 0..10 {
            let resp = pool.execute(&format!("INSERT VERTEX v{i}")).await.unwrap();
            assert!(resp.is_succeed());
        }
        let pending = pool.execute_chan("INSERT VERTEX last").unwrap();
        assert!(pending.wait().await.unwrap().is_succeed());

        pool.close().await;
        assert_eq!(server.executes(), 11);
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 1, 1));
        pool.open().await.unwrap();
        pool.close().await;

        assert!(matches!(pool.execute("RETURN 1").await, Err(PoolError::Closed)));
        assert!(pool.execute_chan("RETURN 1").is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 1, 2));
        pool.open().await.unwrap();
        pool.close().await;
        pool.close().await;
        assert_eq!(server.opens(), server.closes());
    }

    #[tokio::test]
    async fn full_queue_rejects_execute_chan() {
        let server = MockServer::gated();
        let pool = Arc::new(Pool::new(options(&server, 1, 1).with_queue_size(1)));
        pool.open().await.unwrap();

        let in_service = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.execute("first").await })
        };
        wait_until(|| server.statements().len() == 1).await;

        let queued = pool.execute_chan("second").expect("one slot is free");
        assert!(pool.execute_chan("third").is_none());

        server.release(2);
        assert!(in_service.await.unwrap().unwrap().is_succeed());
        assert!(queued.wait().await.unwrap().is_succeed());
        pool.close().await;
    }

    #[tokio::test]
    async fn worker_reconnects_after_execute_error() {
        let server = MockServer::with_responder(|call, _| {
            if call == 0 {
                Err(anyhow::anyhow!("connection reset"))
            } else {
                Ok(MockResponse::success())
            }
        });
        let pool = Pool::new(options(&server, 1, 1));
        pool.open().await.unwrap();

        let err = pool.execute("first").await.unwrap_err();
        assert!(matches!(err, PoolError::Execute { .. }));

        let resp = pool.execute("second").await.unwrap();
        assert!(resp.is_succeed());
        // Trial connection, first worker session, reconnected session.
        assert_eq!(server.opens(), 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn worker_retries_connect_until_server_is_back() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 1, 1));
        pool.open().await.unwrap();
        // The worker has not run yet on this single-threaded runtime.
        server.fail_next_opens(3);

        let resp = pool.execute("RETURN 1").await.unwrap();
        assert!(resp.is_succeed());
        assert_eq!(server.opens(), 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn close_resolves_queued_requests() {
        let server = MockServer::gated();
        let pool = Arc::new(Pool::new(options(&server, 1, 1).with_queue_size(4)));
        pool.open().await.unwrap();

        let in_service = pool.execute_chan("first").unwrap();
        wait_until(|| server.statements().len() == 1).await;
        let queued = pool.execute_chan("second").unwrap();

        let closing = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.close().await })
        };
        wait_until(|| pool.is_closed()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.release(1);

        closing.await.unwrap();
        assert!(in_service.wait().await.unwrap().is_succeed());
        assert!(matches!(queued.wait().await, Err(PoolError::Closed)));
    }

    /// Client init that blocks until the test hands out a permit.
    struct HeldInit(Arc<Semaphore>);

    #[async_trait::async_trait]
    impl ClientInit for HeldInit {
        async fn init(&self, _client: &mut Client) -> anyhow::Result<()> {
            self.0.acquire().await?.forget();
            Ok(())
        }
    }

    #[tokio::test]
    async fn close_during_open_releases_blocked_execute() {
        let server = MockServer::new();
        let gate = Arc::new(Semaphore::new(0));
        let pool = Arc::new(Pool::new(
            options(&server, 1, 1)
                .with_queue_size(1)
                .with_client_init(Arc::new(HeldInit(Arc::clone(&gate)))),
        ));

        let opening = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.open().await })
        };
        // The trial connection is stuck in its init hook.
        wait_until(|| server.opens() == 1).await;

        let queued = pool.execute_chan("first").expect("queue has room");
        let blocked = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.execute("second").await })
        };
        wait_until(|| pool.inflight.count() == 1).await;

        tokio::time::timeout(Duration::from_secs(5), pool.close())
            .await
            .expect("close must not wait on a queue nobody drains");

        assert!(matches!(blocked.await.unwrap(), Err(PoolError::Closed)));
        assert!(matches!(queued.wait().await, Err(PoolError::Closed)));

        gate.add_permits(1);
        assert!(matches!(opening.await.unwrap(), Err(PoolError::Closed)));
        assert_eq!(server.executes(), 0);
    }

    #[tokio::test]
    async fn get_client_uses_first_address() {
        let server = MockServer::new();
        let pool = Pool::new(options(&server, 3, 1));
        let mut client = pool.get_client().await.unwrap();
        assert_eq!(client.address(), &Address::new("graphd-0", 9669));
        assert!(client.execute("SHOW HOSTS").await.unwrap().is_succeed());
        client.close().await.unwrap();
    }
}
