//! `skyshard_server`
//!
//! Server-side systems:
//! - Replication registry of static world entities
//! - Per-peer sync script gated on client acknowledgements
//! - Incremental, cancellable spawn streams
//! - Component update dispatch with authority checks
//!
//! Execution model:
//! - One thread, one `LocalSet`
//! - The main loop owns peer sessions; spawn streams are local tasks sharing
//!   the `ServerContext`

pub mod context;
pub mod dispatch;
pub mod ops;
pub mod replication;
pub mod server;
pub mod spawner;
pub mod sync;

pub use context::ServerContext;
pub use server::GameServer;
