//! graphload-client: connection pool for graph database sessions.
//!
//! The pool runs a fixed set of workers per server address. Each worker
//! owns one [`Client`] (a [`Session`] plus retry policy) and serves requests
//! from a bounded queue.
//!
//! # Architecture
//!
//! ```text
//! Pool
//!   ├── bounded request queue (mpsc)
//!   ├── worker × (addresses × concurrency_per_address)
//!   │   ├── connect: Client::open with reconnect backoff
//!   │   └── serve: Client::execute (retry / retry-more / permanent)
//!   └── shutdown (watch) + in-flight barrier for graceful close
//! ```
//!
//! The wire protocol is out of scope: callers supply a [`SessionFactory`].

pub mod backoff;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod options;
pub mod pool;
pub mod session;

pub use backoff::{Backoff, BackoffPolicy, backoff_delay};
pub use client::Client;
pub use error::{PoolError, PoolResult};
pub use options::{ClientInit, ClientOptions, Options, UseGraph};
pub use pool::{ExecuteResult, PendingResult, Pool};
pub use session::{Credentials, Response, Session, SessionFactory, SharedSessionFactory};
