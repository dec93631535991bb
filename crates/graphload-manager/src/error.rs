//! Manager error types.

use graphload_client::PoolError;
use graphload_core::ConfigError;
use thiserror::Error;

use crate::task_pool::TaskPoolError;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("graph {graph}: failed to {action} source {source_name}: {cause}")]
    Source {
        graph: String,
        source_name: String,
        action: &'static str,
        #[source]
        cause: anyhow::Error,
    },

    #[error("graph {graph}: hook statement {statement:?} failed: {cause}")]
    Hook {
        graph: String,
        statement: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("manager already started")]
    AlreadyStarted,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    TaskPool(#[from] TaskPoolError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
