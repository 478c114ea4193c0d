//! Configuration library for patchfleet.
//!
//! Values come from a TOML file, the process environment and an optional
//! `.env` file, in increasing order of precedence. The loader maps them onto
//! the core crate's orchestrator, SSH and Ansible settings and reports
//! non-fatal problems as [`ConfigWarnings`].
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, RemoteConfig, StoreConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
