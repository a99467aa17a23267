//! The datagram server lifecycle controller.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

use crate::cancel::{CancellationToken, ThreadLatch};
use crate::config::{NetworkFamily, PoolConfig, ResolvedConfig, ServerConfig};
use crate::error::{DatagramError, Result};
use crate::pipeline::{Pipeline, PipelineContext, ServerSignals};
use crate::signal::Signal;
use crate::state::ServerState;
use crate::stats::{ServerStats, StatsSnapshot};
use crate::targets;

/// A running pipeline and the tokens that shut it down.
struct Running {
    ctx: Arc<PipelineContext>,
    pipeline: Pipeline,
}

/// A concurrent datagram server.
///
/// The server binds one socket, reads datagrams on a single reader thread,
/// processes them on a bounded pool of request workers and writes replies on
/// a bounded pool of response workers. Protocol behavior comes entirely from
/// the [`Binder`](crate::Binder), [`RequestHandler`](crate::RequestHandler)
/// and [`ResponseHandler`](crate::ResponseHandler) in its configuration.
///
/// # Lifecycle
///
/// `new` → [`start`](Self::start) → [`stop`](Self::stop). A stopped server
/// cannot be started again.
///
/// # Signals
///
/// - [`on_started`](Self::on_started): Emitted with the bound address after `start`
/// - [`on_stopped`](Self::on_stopped): Emitted once `stop` has joined every thread
/// - [`on_error`](Self::on_error): Emitted for every steady-state error
///   (handler failures, write failures, read failures)
///
/// # Example
///
/// ```ignore
/// let config = ServerConfig::new("udp4", ":0")
///     .binder(StdBinder)
///     .request_handler(process_fn(|req| Ok(Some(req.reply("GOT IT")))))
///     .response_handler(VerbatimWriter);
///
/// let server = DatagramServer::new("echo", config)?;
/// server.on_error().connect(|err| eprintln!("{err}"));
/// server.start()?;
/// println!("listening on {}", server.addr().unwrap());
/// // ...
/// server.stop()?;
/// ```
pub struct DatagramServer {
    name: Arc<str>,
    config: ResolvedConfig,
    state: Mutex<ServerState>,
    // Held for the whole of `start` and `stop` so they never interleave.
    control: Mutex<Option<Running>>,
    local_addr: OnceLock<SocketAddr>,
    // Set by the reader when it gives up; turns `Running` into `Failed`.
    reader_failed: Arc<AtomicBool>,
    latch: Arc<ThreadLatch>,
    stats: Arc<ServerStats>,
    signals: Arc<ServerSignals>,
}

impl DatagramServer {
    /// Validate `config` and create an inert server.
    ///
    /// No socket is bound and no thread is spawned until [`start`](Self::start).
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DatagramError::invalid_config("name", "must not be empty"));
        }
        let config = config.resolve()?;

        tracing::debug!(
            target: targets::SERVER,
            server = %name,
            network = %config.network,
            address = %config.bind_address,
            "server created"
        );

        Ok(Self {
            name: name.into(),
            config,
            state: Mutex::new(ServerState::Created),
            control: Mutex::new(None),
            local_addr: OnceLock::new(),
            reader_failed: Arc::new(AtomicBool::new(false)),
            latch: Arc::new(ThreadLatch::new()),
            stats: Arc::new(ServerStats::default()),
            signals: Arc::new(ServerSignals::default()),
        })
    }

    /// The server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured network family.
    pub fn network(&self) -> NetworkFamily {
        self.config.network
    }

    /// The configured bind address.
    pub fn bind_address(&self) -> &str {
        &self.config.bind_address
    }

    /// The pool policy.
    pub fn pool(&self) -> &PoolConfig {
        &self.config.pool
    }

    /// Get the current lifecycle state.
    ///
    /// A running server whose reader gave up reports [`ServerState::Failed`].
    pub fn state(&self) -> ServerState {
        match *self.state.lock() {
            ServerState::Running if self.reader_failed.load(Ordering::Acquire) => {
                ServerState::Failed
            }
            state => state,
        }
    }

    /// Check if the server is running.
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// The bound local address.
    ///
    /// `None` until `start` succeeds; afterwards the address stays available,
    /// even once the server is stopped.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of reader and worker threads that have not exited yet.
    pub fn active_threads(&self) -> usize {
        self.latch.live()
    }

    /// A snapshot of the pipeline counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal emitted with the bound address once the server is running.
    pub fn on_started(&self) -> &Signal<SocketAddr> {
        &self.signals.started
    }

    /// Signal emitted after the server has stopped.
    pub fn on_stopped(&self) -> &Signal<()> {
        &self.signals.stopped
    }

    /// Signal emitted for each steady-state error.
    ///
    /// Slots run on the pipeline thread that hit the error.
    pub fn on_error(&self) -> &Signal<DatagramError> {
        &self.signals.error
    }

    /// Bind the socket and start the reader and worker pools.
    ///
    /// On a bind failure the server stays in [`ServerState::Created`] and
    /// `start` may be called again.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control.lock();
        if self.state() != ServerState::Created {
            return Err(DatagramError::AlreadyStarted);
        }

        let socket = self.bind()?;
        let local_addr = socket.local_addr().map_err(|source| self.bind_error(source))?;

        let ctx = Arc::new(PipelineContext {
            name: Arc::clone(&self.name),
            socket: Arc::new(socket),
            config: self.config.clone(),
            cancel: CancellationToken::new(),
            abandon: CancellationToken::new(),
            reader_failed: Arc::clone(&self.reader_failed),
            stats: Arc::clone(&self.stats),
            signals: Arc::clone(&self.signals),
        });
        let pipeline = Pipeline::spawn(&ctx, &self.latch).map_err(DatagramError::Spawn)?;

        // The address is published only once nothing can fail anymore.
        let _ = self.local_addr.set(local_addr);
        *self.state.lock() = ServerState::Running;
        *control = Some(Running { ctx, pipeline });
        drop(control);

        tracing::info!(
            target: targets::SERVER,
            server = %self.name,
            %local_addr,
            request_workers = self.config.pool.request_workers,
            response_workers = self.config.pool.response_workers,
            "server started"
        );
        self.signals.started.emit(local_addr);
        Ok(())
    }

    /// Invoke the binder and prepare the socket for the pipeline.
    fn bind(&self) -> Result<UdpSocket> {
        let pool = &self.config.pool;
        let socket = self
            .config
            .binder
            .bind(self.config.network, &self.config.bind_address)
            .map_err(|source| self.bind_error(source))?;

        // The reader relies on blocking reads that time out once per poll
        // interval to notice shutdown.
        socket
            .set_nonblocking(false)
            .and_then(|()| socket.set_read_timeout(Some(pool.poll_interval)))
            .and_then(|()| socket.set_write_timeout(pool.write_timeout))
            .map_err(|source| self.bind_error(source))?;
        Ok(socket)
    }

    fn bind_error(&self, source: std::io::Error) -> DatagramError {
        DatagramError::Bind {
            address: self.config.bind_address.clone(),
            source,
        }
    }

    /// Shut the server down and wait for every thread to exit.
    ///
    /// Valid while [`Running`](ServerState::Running) or
    /// [`Failed`](ServerState::Failed).
    ///
    /// The reader stops at once. Work already queued gets the configured
    /// grace period to finish; whatever is left after that is abandoned and
    /// counted in [`StatsSnapshot::abandoned`]. A handler call that is already
    /// running is always allowed to return.
    pub fn stop(&self) -> Result<()> {
        let mut control = self.control.lock();
        let Some(Running { ctx, pipeline }) = control.take() else {
            return Err(DatagramError::NotRunning);
        };

        tracing::info!(target: targets::SERVER, server = %self.name, "stopping server");
        ctx.cancel.cancel();

        let deadline = Instant::now() + self.config.pool.grace_period;
        if !self.latch.wait_until(deadline) {
            tracing::warn!(
                target: targets::SERVER,
                server = %self.name,
                live_threads = self.latch.live(),
                "grace period elapsed, abandoning in-flight work"
            );
            ctx.abandon.cancel();
        }

        let abandoned = pipeline.join();
        if abandoned > 0 {
            ServerStats::add(&self.stats.abandoned, abandoned as u64);
        }

        *self.state.lock() = ServerState::Stopped;
        drop(control);

        tracing::info!(
            target: targets::SERVER,
            server = %self.name,
            stats = ?self.stats.snapshot(),
            "server stopped"
        );
        self.signals.stopped.emit(());
        Ok(())
    }
}

impl Drop for DatagramServer {
    fn drop(&mut self) {
        // Don't block in drop - just request shutdown
        if let Some(running) = self.control.get_mut().take() {
            running.ctx.cancel.cancel();
            running.ctx.abandon.cancel();
        }
    }
}

impl std::fmt::Debug for DatagramServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramServer")
            .field("name", &self.name)
            .field("network", &self.config.network)
            .field("bind_address", &self.config.bind_address)
            .field("state", &self.state())
            .field("local_addr", &self.addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{StdBinder, VerbatimWriter, process_fn};
    use std::time::Duration;

    fn config() -> ServerConfig {
        ServerConfig::new("udp4", "127.0.0.1:0")
            .binder(StdBinder)
            .request_handler(process_fn(|req| Ok(Some(req.reply(req.data.clone())))))
            .response_handler(VerbatimWriter)
            .pool(
                PoolConfig::new()
                    .request_workers(2)
                    .response_workers(2)
                    .poll_interval(Duration::from_millis(20)),
            )
    }

    #[test]
    fn test_rejects_empty_name() {
        let err = DatagramServer::new("  ", config()).unwrap_err();
        assert!(matches!(err, DatagramError::InvalidConfig { field: "name", .. }));
    }

    #[test]
    fn test_new_is_inert() {
        let server = DatagramServer::new("inert", config()).unwrap();
        assert_eq!(server.state(), ServerState::Created);
        assert!(server.addr().is_none());
        assert_eq!(server.active_threads(), 0);
        assert_eq!(server.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_thread_count_while_running() {
        let server = DatagramServer::new("threads", config()).unwrap();
        server.start().unwrap();

        // Two request workers, two response workers and the reader.
        assert_eq!(server.active_threads(), 5);

        server.stop().unwrap();
        assert_eq!(server.active_threads(), 0);
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_drop_running_server_releases_threads() {
        let server = DatagramServer::new("dropped", config()).unwrap();
        server.start().unwrap();
        let latch = Arc::clone(&server.latch);

        drop(server);
        assert!(latch.wait_until(Instant::now() + Duration::from_secs(2)));
    }

    #[test]
    fn test_debug_output() {
        let server = DatagramServer::new("debug", config()).unwrap();
        let output = format!("{server:?}");
        assert!(output.contains("debug"));
        assert!(output.contains("Created"));
    }
}
