//! graphload-manager: orchestrates bulk imports over a connection pool.
//!
//! A [`Manager`] drives any number of pipelines. Each one reads batches of
//! records from a [`Source`] through a [`BatchRecordReader`] and feeds them to
//! a set of [`Importer`]s. Read loops and import tasks run on two bounded
//! [`TaskPool`]s; progress is tracked in [`ConcurrencyStats`].

pub mod error;
pub mod hooks;
pub mod importer;
pub mod manager;
pub mod source;
pub mod stats;
pub mod task_pool;

pub use error::{ManagerError, ManagerResult};
pub use hooks::{Hook, Hooks};
pub use importer::{ImportError, ImportResult, Importer, StatementImporter};
pub use manager::{Manager, ManagerOptions};
pub use source::{Batch, BatchRecordReader, Record, Source, StatementBuilder};
pub use stats::{ConcurrencyStats, Stats};
pub use task_pool::{Slot, TaskPool, TaskPoolError};
