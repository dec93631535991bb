//! graphload-core: types shared by every graphload crate.
//!
//! - [`config`]: the `graphload.toml` model and its validation
//! - [`address`]: `host:port` endpoints
//! - [`barrier`]: named async counting barriers
//! - [`duration`]: duration strings used in configuration

pub mod address;
pub mod barrier;
pub mod config;
pub mod duration;

pub use address::{Address, AddressError};
pub use barrier::{BarrierGuard, CountingBarrier};
pub use config::{
    ClientConfig, ClientVersion, ConfigError, HookConfig, HooksConfig, LoaderConfig,
    ManagerConfig,
};
pub use duration::parse_duration;
