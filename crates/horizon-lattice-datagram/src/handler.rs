//! Capability contracts implemented by users of the server.
//!
//! The server is protocol-agnostic. Everything protocol-specific lives behind
//! three independent traits:
//!
//! - [`Binder`]: produces the bound socket during `start`
//! - [`RequestHandler`]: turns a received datagram into zero or one response
//! - [`ResponseHandler`]: writes a response back to the socket
//!
//! Each trait can be implemented by a struct or, for the common cases, by a
//! plain closure.
//!
//! # Example
//!
//! ```ignore
//! use horizon_lattice_datagram::{process_fn, ServerConfig, StdBinder, VerbatimWriter};
//!
//! let config = ServerConfig::new("udp4", "127.0.0.1:0")
//!     .binder(StdBinder)
//!     .request_handler(process_fn(|request| {
//!         if request.data.is_empty() {
//!             return Err("empty datagram".into());
//!         }
//!         Ok(Some(request.reply(request.data.clone())))
//!     }))
//!     .response_handler(VerbatimWriter);
//! ```

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::config::NetworkFamily;
use crate::datagram::{RawDatagram, Request, Response};
use crate::error::HandlerError;

/// Produces a bound, ready-to-use datagram socket.
///
/// Called exactly once per `start` attempt, on the thread calling `start`.
pub trait Binder: Send + Sync + 'static {
    /// Bind a socket for `network` at `address`.
    fn bind(&self, network: NetworkFamily, address: &str) -> io::Result<UdpSocket>;
}

impl<F> Binder for F
where
    F: Fn(NetworkFamily, &str) -> io::Result<UdpSocket> + Send + Sync + 'static,
{
    fn bind(&self, network: NetworkFamily, address: &str) -> io::Result<UdpSocket> {
        self(network, address)
    }
}

/// Interprets datagrams and decides what to reply.
///
/// Both methods run on request worker threads and may run concurrently for
/// different datagrams. An `Err` drops the datagram without a reply; it never
/// affects other datagrams.
pub trait RequestHandler: Send + Sync + 'static {
    /// Turn a raw datagram into a request.
    ///
    /// The default implementation passes the payload through unchanged.
    fn read(&self, datagram: RawDatagram) -> Result<Request, HandlerError> {
        Ok(Request::from(datagram))
    }

    /// Process a request, optionally producing a response.
    fn process(&self, request: Request) -> Result<Option<Response>, HandlerError>;
}

/// A [`RequestHandler`] built from a process closure. See [`process_fn`].
#[derive(Clone)]
pub struct ProcessFn<F> {
    f: F,
}

/// Build a [`RequestHandler`] whose `process` step is the given closure.
pub fn process_fn<F>(f: F) -> ProcessFn<F>
where
    F: Fn(Request) -> Result<Option<Response>, HandlerError> + Send + Sync + 'static,
{
    ProcessFn { f }
}

impl<F> RequestHandler for ProcessFn<F>
where
    F: Fn(Request) -> Result<Option<Response>, HandlerError> + Send + Sync + 'static,
{
    fn process(&self, request: Request) -> Result<Option<Response>, HandlerError> {
        (self.f)(request)
    }
}

/// Write-only view of the server socket handed to [`ResponseHandler`]s.
///
/// Reads are reserved for the server's reader thread.
#[derive(Debug, Clone, Copy)]
pub struct SocketWriter<'a> {
    socket: &'a UdpSocket,
}

impl<'a> SocketWriter<'a> {
    pub(crate) fn new(socket: &'a UdpSocket) -> Self {
        Self { socket }
    }

    /// Send `buf` to `target`, returning the number of bytes written.
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target)
    }

    /// The local address of the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The write timeout the server applied from
    /// [`PoolConfig::write_timeout`](crate::PoolConfig::write_timeout).
    pub fn write_timeout(&self) -> io::Result<Option<Duration>> {
        self.socket.write_timeout()
    }
}

/// Writes responses to the socket.
///
/// Runs on response worker threads; several writes may be in progress on the
/// same socket at once.
pub trait ResponseHandler: Send + Sync + 'static {
    /// Write `response`, returning the number of bytes sent.
    fn write(&self, response: &Response, socket: &SocketWriter<'_>) -> io::Result<usize>;
}

impl<F> ResponseHandler for F
where
    F: Fn(&Response, &SocketWriter<'_>) -> io::Result<usize> + Send + Sync + 'static,
{
    fn write(&self, response: &Response, socket: &SocketWriter<'_>) -> io::Result<usize> {
        self(response, socket)
    }
}

/// Binds with [`std::net::UdpSocket::bind`], honoring the network family.
///
/// The address is normalized first: an empty host binds the unspecified
/// address of the family and a missing port means port 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdBinder;

impl Binder for StdBinder {
    fn bind(&self, network: NetworkFamily, address: &str) -> io::Result<UdpSocket> {
        let normalized = normalize_address(network, address);
        let mut last_err = None;

        for addr in normalized.to_socket_addrs()? {
            if !network.accepts(&addr) {
                continue;
            }
            match UdpSocket::bind(addr) {
                Ok(socket) => return Ok(socket),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network} address for '{address}'"),
            )
        }))
    }
}

/// Writes the response payload unchanged to its destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbatimWriter;

impl ResponseHandler for VerbatimWriter {
    fn write(&self, response: &Response, socket: &SocketWriter<'_>) -> io::Result<usize> {
        socket.send_to(&response.data, response.destination)
    }
}

/// Expand a `host:port` bind address into something `ToSocketAddrs` accepts.
///
/// `":0"`, `""`, `"localhost"` and `"[::1]"` become `"0.0.0.0:0"` (or
/// `"[::]:0"` for udp6), `"0.0.0.0:0"`, `"localhost:0"` and `"[::1]:0"`.
pub fn normalize_address(network: NetworkFamily, address: &str) -> String {
    let unspecified = match network {
        NetworkFamily::Udp6 => "[::]",
        NetworkFamily::Udp | NetworkFamily::Udp4 => "0.0.0.0",
    };
    let address = address.trim();

    if address.is_empty() {
        return format!("{unspecified}:0");
    }
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<std::net::IpAddr>() {
        return SocketAddr::new(ip, 0).to_string();
    }
    if address.starts_with('[') && address.ends_with(']') {
        return format!("{address}:0");
    }

    match address.rsplit_once(':') {
        Some((host, port)) => {
            let host = if host.is_empty() { unspecified } else { host };
            let port = if port.is_empty() { "0" } else { port };
            format!("{host}:{port}")
        }
        None => format!("{address}:0"),
    }
}
