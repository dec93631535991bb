//! Connection pool error types.

use graphload_core::{Address, AddressError};
use thiserror::Error;

/// Errors produced by clients and the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no addresses configured")]
    NoAddresses,

    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("connection pool is closed")]
    Closed,

    #[error("connection pool is already open")]
    AlreadyOpen,

    #[error("connect to {address} failed: {source}")]
    Connect {
        address: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("client init on {address} failed: {source}")]
    Init {
        address: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("execute on {address} failed: {source}")]
    Execute {
        address: Address,
        #[source]
        source: anyhow::Error,
    },

    #[error("disconnect from {address} failed: {source}")]
    Disconnect {
        address: Address,
        #[source]
        source: anyhow::Error,
    },
}

pub type PoolResult<T> = Result<T, PoolError>;
