//! In-memory sessions for tests.
//!
//! A [`MockServer`] hands out sessions that record every call and answer
//! statements through a caller-supplied responder.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use graphload_core::Address;
use tokio::sync::Semaphore;

use crate::session::{Credentials, Response, Session, SharedSessionFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub succeed: bool,
    pub error: Option<String>,
    pub permanent: bool,
    pub retry_more: bool,
    pub latency: Duration,
    pub resp_time: Duration,
}

impl MockResponse {
    pub fn success() -> Self {
        Self {
            succeed: true,
            error: None,
            permanent: false,
            retry_more: false,
            latency: Duration::from_millis(1),
            resp_time: Duration::from_millis(2),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeed: false,
            error: Some(error.into()),
            ..Self::success()
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        Self {
            permanent: true,
            ..Self::failure(error)
        }
    }

    pub fn retry_more(error: impl Into<String>) -> Self {
        Self {
            retry_more: true,
            ..Self::failure(error)
        }
    }
}

impl Response for MockResponse {
    fn is_succeed(&self) -> bool {
        self.succeed
    }

    fn latency(&self) -> Duration {
        self.latency
    }

    fn resp_time(&self) -> Duration {
        self.resp_time
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }

    fn is_permanent_error(&self) -> bool {
        self.permanent
    }

    fn is_retry_more_error(&self) -> bool {
        self.retry_more
    }
}

type Responder = dyn Fn(usize, &str) -> anyhow::Result<MockResponse> + Send + Sync;

fn always_succeed(_call: usize, _statement: &str) -> anyhow::Result<MockResponse> {
    Ok(MockResponse::success())
}

struct Inner {
    opens: AtomicUsize,
    closes: AtomicUsize,
    executes: AtomicUsize,
    fail_open: AtomicBool,
    fail_next_opens: AtomicUsize,
    statements: Mutex<Vec<String>>,
    responder: Box<Responder>,
    gate: Option<Semaphore>,
}

/// Shared state behind every session a mock factory creates.
#[derive(Clone)]
pub struct MockServer {
    inner: Arc<Inner>,
}

impl MockServer {
    /// Every statement succeeds.
    pub fn new() -> Self {
        Self::build(Box::new(always_succeed), None)
    }

    /// `responder(call, statement)` answers each execute; `call` counts from 0
    /// across all sessions.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(usize, &str) -> anyhow::Result<MockResponse> + Send + Sync + 'static,
    {
        Self::build(Box::new(responder), None)
    }

    /// Executes block until [`MockServer::release`] hands out permits.
    pub fn gated() -> Self {
        Self::build(Box::new(always_succeed), Some(Semaphore::new(0)))
    }

    fn build(responder: Box<Responder>, gate: Option<Semaphore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                executes: AtomicUsize::new(0),
                fail_open: AtomicBool::new(false),
                fail_next_opens: AtomicUsize::new(0),
                statements: Mutex::new(Vec::new()),
                responder,
                gate,
            }),
        }
    }

    pub fn factory(&self) -> SharedSessionFactory {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |address: &Address| -> Box<dyn Session> {
            Box::new(MockSession {
                address: address.clone(),
                inner: Arc::clone(&inner),
                open: false,
            })
        })
    }

    /// Make every subsequent open fail until reset.
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.inner.fail_next_opens.store(n, Ordering::SeqCst);
    }

    /// Let `n` gated executes proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(n);
        }
    }

    /// Successful opens.
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Executes that reached the responder.
    pub fn executes(&self) -> usize {
        self.inner.executes.load(Ordering::SeqCst)
    }

    /// Statements received so far, including ones still waiting on the gate.
    pub fn statements(&self) -> Vec<String> {
        self.inner
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("opens", &self.opens())
            .field("closes", &self.closes())
            .field("executes", &self.executes())
            .finish_non_exhaustive()
    }
}

struct MockSession {
    address: Address,
    inner: Arc<Inner>,
    open: bool,
}

#[async_trait]
impl Session for MockSession {
    async fn open(&mut self, _credentials: &Credentials) -> anyhow::Result<()> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused: {}", self.address);
        }
        let failed_once = self
            .inner
            .fail_next_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed_once {
            anyhow::bail!("connection refused: {}", self.address);
        }
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> anyhow::Result<Box<dyn Response>> {
        if !self.open {
            anyhow::bail!("session to {} is not open", self.address);
        }
        self.inner
            .statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(statement.to_string());
        if let Some(gate) = &self.inner.gate {
            gate.acquire().await?.forget();
        }
        let call = self.inner.executes.fetch_add(1, Ordering::SeqCst);
        let resp = (self.inner.responder)(call, statement)?;
        Ok(Box::new(resp))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if self.open {
            self.open = false;
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
