//! Synchronization engine for the workspace archive.
//!
//! Each configured credential gets its own team task: a backfill pass that
//! walks the platform's history into the store, a live merger that applies
//! real-time events as they arrive, and periodic passes after that. The
//! [`Supervisor`](supervisor::Supervisor) owns those tasks.

pub mod api;
pub mod backfill;
pub mod config;
pub mod convert;
pub mod error;
pub mod http;
pub mod live;
pub mod pagination;
pub mod rate_limit;
pub mod rtm;
pub mod store;
pub mod supervisor;
pub mod watermark;
pub mod work_queue;

#[cfg(test)]
mod testing;

pub use backfill::{Backfill, BackfillStats};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use store::Store;
pub use supervisor::{ClientFactory, SlackClients, Supervisor, TeamExit};
