//! Configuration types and loading for the dispatcher workspace.
//!
//! Holds the stream and dispatcher settings shared by the core library and the service
//! binaries, plus the layered loader that reads them from `configuration/` files and
//! `APP_`-prefixed environment variables.

pub mod environment;
mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config, load_config_from_dir};
