//! # Driftsync Server
//!
//! The live synchronization server over the Driftsync engine.
//!
//! Devices upload change batches, download catch-up backlogs, and hold
//! live connections over which the server pushes changes committed by
//! sibling devices. Fan-out is fire-and-continue: an upload succeeds
//! the moment its batch is persisted, and delivery to other devices
//! happens after the response, never blocking it.
//!
//! [`SyncServer`] is the embeddable facade; [`SyncHandler`] exposes
//! the per-interaction entry points a transport layer would mount.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod catchup;
mod config;
mod error;
mod fanout;
mod handler;
mod server;

pub use catchup::CatchupDelivery;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use fanout::ConnectionDirectory;
pub use handler::{ServerContext, SyncHandler};
pub use server::SyncServer;

/// Initializes the global tracing subscriber from `RUST_LOG`.
///
/// Call once at process start; embedding applications that install
/// their own subscriber should skip this.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,driftsync_server=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
