//! `host:port` endpoint addresses of database servers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing an [`Address`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address {0:?} is missing a port")]
    MissingPort(String),

    #[error("address {0:?} has an empty host")]
    EmptyHost(String),

    #[error("address {0:?} has too many colons, wrap IPv6 hosts in brackets")]
    TooManyColons(String),

    #[error("address {address:?} has an invalid port {port:?}")]
    InvalidPort { address: String, port: String },
}

/// One database server endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` string. IPv6 hosts must be bracketed (`[::1]:9669`).
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;

        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(inner) => inner,
            None if host.contains(':') => return Err(AddressError::TooManyColons(s.to_string())),
            None => host,
        };

        if host.is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }

        let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
            address: s.to_string(),
            port: port.to_string(),
        })?;

        Ok(Self::new(host, port))
    }

    /// Parse every entry of a list, failing on the first invalid one.
    pub fn parse_list<I, S>(items: I) -> Result<Vec<Self>, AddressError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        items.into_iter().map(|s| Self::parse(s.as_ref())).collect()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
