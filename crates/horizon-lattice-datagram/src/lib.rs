//! Concurrent datagram server engine for Horizon Lattice.
//!
//! This crate provides a protocol-agnostic UDP server core. It binds a socket,
//! reads datagrams on a single reader thread, dispatches them to a bounded
//! pool of request workers and writes replies from a separate bounded pool of
//! response workers, with backpressure and a graceful, bounded shutdown.
//!
//! - **Capabilities**: [`Binder`], [`RequestHandler`], [`ResponseHandler`]
//! - **Server**: [`DatagramServer`] with a `Created → Running → Stopped` lifecycle
//! - **Observers**: [`Signal`]s for start, stop and steady-state errors
//!
//! # Echo Example
//!
//! ```no_run
//! use horizon_lattice_datagram::{
//!     DatagramServer, ServerConfig, StdBinder, VerbatimWriter, process_fn,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("udp4", ":0")
//!         .binder(StdBinder)
//!         .request_handler(process_fn(|request| {
//!             Ok(Some(request.reply(request.data.clone())))
//!         }))
//!         .response_handler(VerbatimWriter);
//!
//!     let server = DatagramServer::new("echo", config)?;
//!     server.on_error().connect(|err| eprintln!("echo: {err}"));
//!     server.start()?;
//!     println!("listening on {:?}", server.addr());
//!
//!     // ... later
//!     server.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! # Backpressure
//!
//! Both work queues are bounded ([`PoolConfig`]). When request workers fall
//! behind, the reader blocks and further datagrams wait in the kernel receive
//! buffer, where the kernel may eventually drop them. When response workers
//! fall behind, request workers block before handing over their reply.
//!
//! # Logging
//!
//! The crate emits `tracing` events under the targets listed in [`targets`].
//! Install a subscriber in your application to see them.

mod cancel;
mod config;
mod datagram;
mod error;
mod handler;
mod pipeline;
mod server;
pub mod signal;
mod state;
mod stats;

pub use config::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_WORKERS, DEFAULT_RESPONSE_WORKERS, MAX_DATAGRAM_SIZE,
    NetworkFamily, PoolConfig, ServerConfig,
};
pub use datagram::{RawDatagram, Request, Response};
pub use error::{DatagramError, HandlerError, Result};
pub use handler::{
    Binder, ProcessFn, RequestHandler, ResponseHandler, SocketWriter, StdBinder, VerbatimWriter,
    normalize_address, process_fn,
};
pub use server::DatagramServer;
pub use signal::{ConnectionId, Signal};
pub use state::ServerState;
pub use stats::StatsSnapshot;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Lifecycle events: start, stop, grace period expiry.
    pub const SERVER: &str = "horizon_lattice_datagram::server";
    /// The reader thread.
    pub const READER: &str = "horizon_lattice_datagram::reader";
    /// Request and response workers.
    pub const WORKER: &str = "horizon_lattice_datagram::worker";
    /// Signal emission.
    pub const SIGNAL: &str = "horizon_lattice_datagram::signal";
}
