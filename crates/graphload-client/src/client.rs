//! A single session plus the retry policy around it.

use std::fmt;

use graphload_core::Address;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::error::{PoolError, PoolResult};
use crate::options::ClientOptions;
use crate::session::{Response, Session, SharedSessionFactory};

/// One connection to one address. `execute` takes `&mut self`, so a client
/// never runs two statements at once.
pub struct Client {
    address: Address,
    session: Box<dyn Session>,
    options: ClientOptions,
}

impl Client {
    pub fn new(address: Address, factory: &SharedSessionFactory, options: ClientOptions) -> Self {
        let session = factory.new_session(&address);
        Self {
            address,
            session,
            options,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Connect, authenticate and run the init hook. A failed init closes the
    /// session again before returning.
    pub async fn open(&mut self) -> PoolResult<()> {
        self.session
            .open(&self.options.credentials)
            .await
            .map_err(|source| PoolError::Connect {
                address: self.address.clone(),
                source,
            })?;
        debug!(address = %self.address, "session opened");

        if let Some(init) = self.options.client_init.clone() {
            if let Err(source) = init.init(self).await {
                if let Err(e) = self.session.close().await {
                    debug!(address = %self.address, error = %e, "close after failed init");
                }
                return Err(PoolError::Init {
                    address: self.address.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Execute one statement with bounded retries.
    ///
    /// Permanent errors return at once. Retry-more errors back off and retry
    /// without spending the budget. Transport errors and other failed
    /// responses spend one unit each; when the budget runs out the last error
    /// or response is returned.
    pub async fn execute(&mut self, statement: &str) -> PoolResult<Box<dyn Response>> {
        let mut backoff = Backoff::new(self.options.retry_backoff);
        let mut budget = self.options.retry;

        loop {
            match self.session.execute(statement).await {
                Err(source) => {
                    if budget == 0 {
                        return Err(PoolError::Execute {
                            address: self.address.clone(),
                            source,
                        });
                    }
                    budget -= 1;
                    warn!(address = %self.address, error = %source, remaining = budget, "execute failed, retrying");
                }
                Ok(resp) => {
                    if resp.is_succeed() || resp.is_permanent_error() {
                        return Ok(resp);
                    }
                    if resp.is_retry_more_error() {
                        debug!(address = %self.address, error = ?resp.error(), "server busy, retrying");
                    } else {
                        if budget == 0 {
                            return Ok(resp);
                        }
                        budget -= 1;
                        warn!(address = %self.address, error = ?resp.error(), remaining = budget, "statement failed, retrying");
                    }
                }
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    pub async fn close(&mut self) -> PoolResult<()> {
        self.session
            .close()
            .await
            .map_err(|source| PoolError::Disconnect {
                address: self.address.clone(),
                source,
            })?;
        debug!(address = %self.address, "session closed");
        Ok(())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
