//! Pool and client options.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use graphload_core::{Address, ClientConfig, ConfigError};

use crate::backoff::BackoffPolicy;
use crate::client::Client;
use crate::session::{Credentials, SharedSessionFactory};

/// Hook run once on every newly opened [`Client`] before it serves requests.
#[async_trait]
pub trait ClientInit: Send + Sync {
    async fn init(&self, client: &mut Client) -> anyhow::Result<()>;
}

/// Selects the working graph with `USE <graph>` after every connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseGraph(pub String);

impl UseGraph {
    pub fn new(graph: impl Into<String>) -> Self {
        Self(graph.into())
    }

    pub fn statement(&self) -> String {
        format!("USE `{}`", self.0)
    }
}

#[async_trait]
impl ClientInit for UseGraph {
    async fn init(&self, client: &mut Client) -> anyhow::Result<()> {
        let statement = self.statement();
        let resp = client.execute(&statement).await?;
        if !resp.is_succeed() {
            anyhow::bail!(
                "{statement} failed: {}",
                resp.error().unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }
}

/// Per-client behaviour: credentials, retry budget, init hook.
#[derive(Clone)]
pub struct ClientOptions {
    pub credentials: Credentials,
    /// Retries after the first attempt.
    pub retry: u32,
    pub retry_backoff: BackoffPolicy,
    pub client_init: Option<Arc<dyn ClientInit>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            credentials: Credentials::new("root", ""),
            retry: graphload_core::config::DEFAULT_RETRY,
            retry_backoff: BackoffPolicy::with_initial_interval(
                graphload_core::config::DEFAULT_RETRY_INITIAL_INTERVAL,
            ),
            client_init: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("credentials", &self.credentials)
            .field("retry", &self.retry)
            .field("retry_backoff", &self.retry_backoff)
            .field("client_init", &self.client_init.is_some())
            .finish()
    }
}

/// Connection pool options. Immutable once handed to a [`Pool`](crate::Pool).
#[derive(Clone)]
pub struct Options {
    pub addresses: Vec<Address>,
    pub client: ClientOptions,
    pub reconnect_backoff: BackoffPolicy,
    pub concurrency_per_address: usize,
    pub queue_size: usize,
    pub session_factory: SharedSessionFactory,
}

impl Options {
    pub fn new(addresses: Vec<Address>, session_factory: SharedSessionFactory) -> Self {
        Self {
            addresses,
            client: ClientOptions::default(),
            reconnect_backoff: BackoffPolicy::with_initial_interval(
                graphload_core::config::DEFAULT_RECONNECT_INITIAL_INTERVAL,
            ),
            concurrency_per_address: graphload_core::config::DEFAULT_CONCURRENCY_PER_ADDRESS,
            queue_size: graphload_core::config::DEFAULT_QUEUE_SIZE,
            session_factory,
        }
    }

    /// Build options from the `[client]` section of `graphload.toml`.
    pub fn from_config(
        config: &ClientConfig,
        session_factory: SharedSessionFactory,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.addresses()?, session_factory)
            .with_credentials(Credentials::new(config.user(), config.password()))
            .with_retry(config.retry())
            .with_retry_backoff(BackoffPolicy::with_initial_interval(
                config.retry_initial_interval()?,
            ))
            .with_reconnect_backoff(BackoffPolicy::with_initial_interval(
                config.reconnect_initial_interval()?,
            ))
            .with_concurrency_per_address(config.concurrency_per_address()?)
            .with_queue_size(config.queue_size()?))
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.client.credentials = credentials;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.client.retry = retry;
        self
    }

    pub fn with_retry_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.client.retry_backoff = policy;
        self
    }

    pub fn with_reconnect_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.reconnect_backoff = policy;
        self
    }

    pub fn with_concurrency_per_address(mut self, concurrency: usize) -> Self {
        self.concurrency_per_address = concurrency;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_client_init(mut self, init: Arc<dyn ClientInit>) -> Self {
        self.client.client_init = Some(init);
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("addresses", &self.addresses)
            .field("client", &self.client)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("concurrency_per_address", &self.concurrency_per_address)
            .field("queue_size", &self.queue_size)
            .finish_non_exhaustive()
    }
}
