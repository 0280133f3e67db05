//! Configuration loading for the Business Central connector.
//!
//! Uses figment to layer built-in defaults, an optional YAML file and
//! `BCCONNECT_`-prefixed environment variables.

pub mod schema;

pub use schema::{Config, ENV_PREFIX, LogConfig, LogFormat, StoreConfig};
