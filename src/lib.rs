//! Android RIL client library: a Parcel codec and a non-blocking framed
//! connection engine.
//!
//! This crate does not interpret RIL request/response opcodes, does not
//! speak TLS, and does not manage failover across multiple endpoints or
//! share a connection across processes — it is the wire-level plumbing
//! those concerns sit on top of.

pub mod cancellable;
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod logger;
pub mod parcel;
pub mod version;

pub use cancellable::Cancellable;
pub use client::Client;
pub use connection::{Connection, ConnectionFlags};
pub use error::{Error, Result};
pub use parcel::Parcel;

/// Install `env_logger` (reading `RUST_LOG`) for a test run, so the `trace!`/
/// `debug!`/`warn!` calls scattered through the fill and dispatch paths are
/// visible when a test is run with logging turned on. Safe to call from
/// multiple tests: a logger already installed by an earlier test is left in
/// place.
#[cfg(test)]
pub(crate) fn init_test_logging() {
	let _ = env_logger::try_init();
}
