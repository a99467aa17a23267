//! Configuration types for the datagram server.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DatagramError, Result};
use crate::handler::{Binder, RequestHandler, ResponseHandler};

/// Default number of request workers.
pub const DEFAULT_REQUEST_WORKERS: usize = 4;
/// Default number of response workers.
pub const DEFAULT_RESPONSE_WORKERS: usize = 4;
/// Default capacity of each work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
/// Largest possible UDP payload.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// The socket family a server binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkFamily {
    /// IPv4 or IPv6, whichever the address resolves to first.
    #[default]
    Udp,
    /// IPv4 only.
    Udp4,
    /// IPv6 only.
    Udp6,
}

impl NetworkFamily {
    /// The canonical name of the family.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Udp4 => "udp4",
            Self::Udp6 => "udp6",
        }
    }

    /// Whether `addr` belongs to this family.
    pub fn accepts(&self, addr: &std::net::SocketAddr) -> bool {
        match self {
            Self::Udp => true,
            Self::Udp4 => addr.is_ipv4(),
            Self::Udp6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for NetworkFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkFamily {
    type Err = DatagramError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "udp" => Ok(Self::Udp),
            "udp4" => Ok(Self::Udp4),
            "udp6" => Ok(Self::Udp6),
            other => Err(DatagramError::invalid_config(
                "network",
                format!("unknown network family '{other}', expected udp, udp4 or udp6"),
            )),
        }
    }
}

impl From<NetworkFamily> for String {
    fn from(family: NetworkFamily) -> Self {
        family.as_str().to_string()
    }
}

/// Sizing and timing policy for the reader and worker pools.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of threads running the request handler.
    pub request_workers: usize,
    /// Number of threads running the response handler.
    pub response_workers: usize,
    /// Capacity of the reader → request worker queue.
    pub request_queue_capacity: usize,
    /// Capacity of the request worker → response worker queue.
    pub response_queue_capacity: usize,
    /// How long `stop` lets in-flight work finish before abandoning it.
    pub grace_period: Duration,
    /// How often blocked threads wake up to check for shutdown.
    pub poll_interval: Duration,
    /// Receive buffer size in bytes. Longer datagrams are truncated.
    pub recv_buffer_size: usize,
    /// Consecutive read failures after which the reader gives up.
    pub max_consecutive_read_errors: usize,
    /// Socket write timeout. `None` means writes may block indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            request_workers: DEFAULT_REQUEST_WORKERS,
            response_workers: DEFAULT_RESPONSE_WORKERS,
            request_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            response_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            grace_period: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            max_consecutive_read_errors: 16,
            write_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of request workers.
    pub fn request_workers(mut self, count: usize) -> Self {
        self.request_workers = count;
        self
    }

    /// Set the number of response workers.
    pub fn response_workers(mut self, count: usize) -> Self {
        self.response_workers = count;
        self
    }

    /// Set the request queue capacity.
    pub fn request_queue_capacity(mut self, capacity: usize) -> Self {
        self.request_queue_capacity = capacity;
        self
    }

    /// Set the response queue capacity.
    pub fn response_queue_capacity(mut self, capacity: usize) -> Self {
        self.response_queue_capacity = capacity;
        self
    }

    /// Set the shutdown grace period.
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Set the shutdown poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Set the consecutive read error limit.
    pub fn max_consecutive_read_errors(mut self, limit: usize) -> Self {
        self.max_consecutive_read_errors = limit;
        self
    }

    /// Set the socket write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("request_workers", self.request_workers),
            ("response_workers", self.response_workers),
            ("request_queue_capacity", self.request_queue_capacity),
            ("response_queue_capacity", self.response_queue_capacity),
            ("recv_buffer_size", self.recv_buffer_size),
            ("max_consecutive_read_errors", self.max_consecutive_read_errors),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(DatagramError::invalid_config(field, "must be greater than zero"));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(DatagramError::invalid_config(
                "poll_interval",
                "must be greater than zero",
            ));
        }
        // A zero timeout is rejected by the socket itself at start time.
        if self.write_timeout.is_some_and(|t| t.is_zero()) {
            return Err(DatagramError::invalid_config(
                "write_timeout",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`DatagramServer`](crate::DatagramServer).
///
/// # Example
///
/// ```ignore
/// let config = ServerConfig::new("udp4", ":0")
///     .binder(StdBinder)
///     .request_handler(process_fn(|req| Ok(Some(req.reply("GOT IT")))))
///     .response_handler(VerbatimWriter)
///     .pool(PoolConfig::new().request_workers(8));
/// ```
#[derive(Clone)]
pub struct ServerConfig {
    /// Network family name: `udp`, `udp4` or `udp6`.
    pub network: String,
    /// Address to bind, `host:port`. Port 0 or no port means OS-assigned.
    pub bind_address: String,
    /// Produces the bound socket.
    pub binder: Option<Arc<dyn Binder>>,
    /// Turns datagrams into responses.
    pub request_handler: Option<Arc<dyn RequestHandler>>,
    /// Writes responses to the socket.
    pub response_handler: Option<Arc<dyn ResponseHandler>>,
    /// Worker pool policy.
    pub pool: PoolConfig,
}

impl ServerConfig {
    /// Create a configuration with no capabilities set.
    pub fn new(network: impl Into<String>, bind_address: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            bind_address: bind_address.into(),
            binder: None,
            request_handler: None,
            response_handler: None,
            pool: PoolConfig::default(),
        }
    }

    /// Set the binder.
    pub fn binder(mut self, binder: impl Binder) -> Self {
        self.binder = Some(Arc::new(binder));
        self
    }

    /// Set the request handler.
    pub fn request_handler(mut self, handler: impl RequestHandler) -> Self {
        self.request_handler = Some(Arc::new(handler));
        self
    }

    /// Set the response handler.
    pub fn response_handler(mut self, handler: impl ResponseHandler) -> Self {
        self.response_handler = Some(Arc::new(handler));
        self
    }

    /// Set the pool policy.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validate the configuration and unwrap its capabilities.
    pub(crate) fn resolve(self) -> Result<ResolvedConfig> {
        let network = self.network.parse::<NetworkFamily>()?;
        let binder = self
            .binder
            .ok_or_else(|| DatagramError::invalid_config("binder", "no binder configured"))?;
        let request_handler = self.request_handler.ok_or_else(|| {
            DatagramError::invalid_config("request_handler", "no request handler configured")
        })?;
        let response_handler = self.response_handler.ok_or_else(|| {
            DatagramError::invalid_config("response_handler", "no response handler configured")
        })?;
        self.pool.validate()?;

        Ok(ResolvedConfig {
            network,
            bind_address: self.bind_address,
            binder,
            request_handler,
            response_handler,
            pool: self.pool,
        })
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("network", &self.network)
            .field("bind_address", &self.bind_address)
            .field("binder", &self.binder.is_some())
            .field("request_handler", &self.request_handler.is_some())
            .field("response_handler", &self.response_handler.is_some())
            .field("pool", &self.pool)
            .finish()
    }
}

/// A configuration that passed validation.
#[derive(Clone)]
pub(crate) struct ResolvedConfig {
    pub network: NetworkFamily,
    pub bind_address: String,
    pub binder: Arc<dyn Binder>,
    pub request_handler: Arc<dyn RequestHandler>,
    pub response_handler: Arc<dyn ResponseHandler>,
    pub pool: PoolConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parsing() {
        assert_eq!("udp".parse::<NetworkFamily>().unwrap(), NetworkFamily::Udp);
        assert_eq!("udp4".parse::<NetworkFamily>().unwrap(), NetworkFamily::Udp4);
        assert_eq!("udp6".parse::<NetworkFamily>().unwrap(), NetworkFamily::Udp6);

        let err = "tcp".parse::<NetworkFamily>().unwrap_err();
        assert!(matches!(
            err,
            DatagramError::InvalidConfig {
                field: "network",
                ..
            }
        ));
    }

    #[test]
    fn test_family_accepts() {
        let v4: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();
        let v6: std::net::SocketAddr = "[::1]:1".parse().unwrap();

        assert!(NetworkFamily::Udp.accepts(&v4));
        assert!(NetworkFamily::Udp.accepts(&v6));
        assert!(NetworkFamily::Udp4.accepts(&v4));
        assert!(!NetworkFamily::Udp4.accepts(&v6));
        assert!(NetworkFamily::Udp6.accepts(&v6));
        assert!(!NetworkFamily::Udp6.accepts(&v4));
    }

    #[test]
    fn test_pool_builder() {
        let pool = PoolConfig::new()
            .request_workers(2)
            .response_workers(3)
            .request_queue_capacity(8)
            .response_queue_capacity(16)
            .grace_period(Duration::from_millis(250))
            .poll_interval(Duration::from_millis(20))
            .write_timeout(Duration::from_secs(1));

        assert_eq!(pool.request_workers, 2);
        assert_eq!(pool.response_workers, 3);
        assert_eq!(pool.request_queue_capacity, 8);
        assert_eq!(pool.response_queue_capacity, 16);
        assert_eq!(pool.grace_period, Duration::from_millis(250));
        assert_eq!(pool.poll_interval, Duration::from_millis(20));
        assert_eq!(pool.write_timeout, Some(Duration::from_secs(1)));
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_pool_rejects_zero() {
        let err = PoolConfig::new().request_workers(0).validate().unwrap_err();
        assert!(matches!(
            err,
            DatagramError::InvalidConfig {
                field: "request_workers",
                ..
            }
        ));

        let err = PoolConfig::new()
            .response_queue_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            DatagramError::InvalidConfig {
                field: "response_queue_capacity",
                ..
            }
        ));

        let err = PoolConfig::new()
            .poll_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            DatagramError::InvalidConfig {
                field: "poll_interval",
                ..
            }
        ));
    }
}
