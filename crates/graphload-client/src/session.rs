//! Transport-facing traits.
//!
//! The pool never speaks a wire protocol itself. A transport layer supplies a
//! [`SessionFactory`] that produces one [`Session`] per physical connection;
//! each protocol version is a separate factory implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graphload_core::Address;

/// User name and password presented when a session opens.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One physical connection to one server address.
///
/// Methods take `&mut self`: a session serves exactly one request at a time.
#[async_trait]
pub trait Session: Send {
    /// Connect and authenticate.
    async fn open(&mut self, credentials: &Credentials) -> anyhow::Result<()>;

    /// Execute one statement. `Err` means the transport failed; a statement
    /// the server rejected comes back as an unsuccessful [`Response`].
    async fn execute(&mut self, statement: &str) -> anyhow::Result<Box<dyn Response>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Server reply to one executed statement.
pub trait Response: Send + Sync + fmt::Debug {
    fn is_succeed(&self) -> bool;

    /// Server-side execution latency.
    fn latency(&self) -> Duration;

    /// Round-trip time observed by the client.
    fn resp_time(&self) -> Duration;

    /// Server error message, if the statement failed.
    fn error(&self) -> Option<String>;

    /// Retrying cannot change the outcome (syntax or semantic errors).
    fn is_permanent_error(&self) -> bool;

    /// Transient capacity condition (e.g. write buffer full); retry without
    /// spending the retry budget.
    fn is_retry_more_error(&self) -> bool;
}

/// Produces sessions for a given address.
pub trait SessionFactory: Send + Sync {
    fn new_session(&self, address: &Address) -> Box<dyn Session>;
}

impl<F> SessionFactory for F
where
    F: Fn(&Address) -> Box<dyn Session> + Send + Sync,
{
    fn new_session(&self, address: &Address) -> Box<dyn Session> {
        self(address)
    }
}

/// Shared handle to a session factory.
pub type SharedSessionFactory = Arc<dyn SessionFactory>;
