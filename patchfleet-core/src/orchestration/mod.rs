//! Rollout orchestration: phase admission, per-host dispatch, post-reboot
//! polling and the stale phase-1 sweep.

pub mod admission;
pub mod build;
pub mod config;
pub mod datastore;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod retry;
pub mod sweeper;

pub use admission::*;
pub use build::*;
pub use config::*;
pub use dispatcher::*;
pub use engine::*;
pub use events::*;
pub use retry::*;
pub use sweeper::*;
