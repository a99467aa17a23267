//! The reader thread and the two worker pools.
//!
//! ```text
//! socket ─▶ reader ─▶ [request queue] ─▶ request workers ─▶ [response queue] ─▶ response workers ─▶ socket
//! ```
//!
//! Both queues are bounded; a full queue blocks its producer. Every blocking
//! point wakes up once per poll interval to look at the shutdown tokens:
//!
//! - `cancel` stops the reader. The pools keep draining what was already
//!   queued and exit once their input queue is disconnected and empty.
//! - `abandon` stops everything. Workers quit without dequeuing further work.

use std::any::Any;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};

use crate::cancel::{CancellationToken, ThreadLatch};
use crate::config::ResolvedConfig;
use crate::datagram::{RawDatagram, Response};
use crate::error::{DatagramError, HandlerError};
use crate::handler::SocketWriter;
use crate::signal::Signal;
use crate::stats::ServerStats;
use crate::targets;

/// Signals a server exposes to observers.
#[derive(Debug, Default)]
pub(crate) struct ServerSignals {
    pub started: Signal<SocketAddr>,
    pub stopped: Signal<()>,
    pub error: Signal<DatagramError>,
}

/// Everything the pipeline threads share.
pub(crate) struct PipelineContext {
    pub name: Arc<str>,
    pub socket: Arc<UdpSocket>,
    pub config: ResolvedConfig,
    pub cancel: CancellationToken,
    pub abandon: CancellationToken,
    pub reader_failed: Arc<AtomicBool>,
    pub stats: Arc<ServerStats>,
    pub signals: Arc<ServerSignals>,
}

impl PipelineContext {
    fn poll_interval(&self) -> Duration {
        self.config.pool.poll_interval
    }

    /// Report a steady-state error out of band.
    ///
    /// A panicking error slot is logged and swallowed so it cannot take the
    /// pipeline thread down with it.
    fn report(&self, err: DatagramError) {
        match &err {
            DatagramError::ReaderFailed { .. } => tracing::error!(
                target: targets::READER,
                server = %self.name,
                error = %err,
                "reader stopped producing work"
            ),
            _ => tracing::warn!(
                target: targets::WORKER,
                server = %self.name,
                error = %err,
                "pipeline error"
            ),
        }
        let emitted = panic::catch_unwind(AssertUnwindSafe(|| self.signals.error.emit(err)));
        if let Err(payload) = emitted {
            tracing::error!(
                target: targets::SIGNAL,
                server = %self.name,
                panic = %panic_message(payload.as_ref()),
                "error slot panicked"
            );
        }
    }
}

/// Handles to a running pipeline.
pub(crate) struct Pipeline {
    handles: Vec<JoinHandle<()>>,
    // Kept only to count what is left in the queues after shutdown.
    pending_requests: Receiver<RawDatagram>,
    pending_responses: Receiver<Response>,
}

impl Pipeline {
    /// Create the queues and spawn the pools and the reader.
    ///
    /// If any thread fails to spawn, the threads already running are shut
    /// down and joined before the error is returned.
    pub fn spawn(ctx: &Arc<PipelineContext>, latch: &Arc<ThreadLatch>) -> io::Result<Self> {
        let pool = &ctx.config.pool;
        let (request_tx, request_rx) = bounded::<RawDatagram>(pool.request_queue_capacity);
        let (response_tx, response_rx) = bounded::<Response>(pool.response_queue_capacity);

        let mut pipeline = Pipeline {
            handles: Vec::with_capacity(pool.request_workers + pool.response_workers + 1),
            pending_requests: request_rx.clone(),
            pending_responses: response_rx.clone(),
        };

        let spawned = (|| -> io::Result<()> {
            for i in 0..pool.response_workers {
                let ctx = Arc::clone(ctx);
                let responses = response_rx.clone();
                pipeline.handles.push(spawn_thread(
                    format!("{}-response-{i}", ctx.name),
                    latch,
                    move || response_worker(&ctx, responses),
                )?);
            }
            for i in 0..pool.request_workers {
                let ctx = Arc::clone(ctx);
                let requests = request_rx.clone();
                let responses = response_tx.clone();
                pipeline.handles.push(spawn_thread(
                    format!("{}-request-{i}", ctx.name),
                    latch,
                    move || request_worker(&ctx, requests, responses),
                )?);
            }
            let reader_ctx = Arc::clone(ctx);
            pipeline.handles.push(spawn_thread(
                format!("{}-reader", ctx.name),
                latch,
                move || reader(&reader_ctx, request_tx),
            )?);
            Ok(())
        })();

        // Only the workers may hold senders, so the queues disconnect once
        // their producers exit.
        drop(response_tx);

        match spawned {
            Ok(()) => Ok(pipeline),
            Err(e) => {
                ctx.cancel.cancel();
                ctx.abandon.cancel();
                pipeline.join();
                Err(e)
            }
        }
    }

    /// Join every thread and return how many queued items were left behind.
    pub fn join(self) -> usize {
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                tracing::error!(
                    target: targets::SERVER,
                    thread = %name,
                    "pipeline thread panicked"
                );
            }
        }
        self.pending_requests.len() + self.pending_responses.len()
    }
}

fn spawn_thread<F>(name: String, latch: &Arc<ThreadLatch>, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let guard = latch.enter();
    thread::Builder::new().name(name).spawn(move || {
        let _guard = guard;
        f();
    })
}

/// Push `item` onto a bounded queue, waiting while it is full.
///
/// Gives up when `stop` is cancelled or the consumers are gone; the item is
/// dropped in that case.
fn enqueue<T>(tx: &Sender<T>, mut item: T, stop: &CancellationToken, poll: Duration) -> bool {
    loop {
        match tx.send_timeout(item, poll) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.is_cancelled() {
                    return false;
                }
                item = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Whether a read error is just the poll timeout expiring.
fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The single reader. Owns every read on the socket.
fn reader(ctx: &PipelineContext, requests: Sender<RawDatagram>) {
    tracing::debug!(target: targets::READER, server = %ctx.name, "reader started");

    let pool = &ctx.config.pool;
    let mut buffer = vec![0u8; pool.recv_buffer_size];
    let mut consecutive_errors = 0usize;

    while !ctx.cancel.is_cancelled() {
        match ctx.socket.recv_from(&mut buffer) {
            Ok((n, source)) => {
                consecutive_errors = 0;
                ServerStats::bump(&ctx.stats.datagrams_received);
                tracing::trace!(
                    target: targets::READER,
                    server = %ctx.name,
                    %source,
                    bytes = n,
                    "datagram received"
                );

                let datagram = RawDatagram::new(buffer[..n].to_vec(), source);
                if !enqueue(&requests, datagram, &ctx.cancel, ctx.poll_interval()) {
                    ServerStats::bump(&ctx.stats.abandoned);
                    break;
                }
            }
            Err(e) if is_poll_timeout(&e) => continue,
            Err(_) if ctx.cancel.is_cancelled() => break,
            Err(e) => {
                consecutive_errors += 1;
                ServerStats::bump(&ctx.stats.read_errors);
                ctx.report(DatagramError::Read(e));

                if consecutive_errors >= pool.max_consecutive_read_errors {
                    ctx.reader_failed.store(true, Ordering::Release);
                    ctx.report(DatagramError::ReaderFailed {
                        errors: consecutive_errors,
                    });
                    break;
                }
            }
        }
    }

    tracing::debug!(target: targets::READER, server = %ctx.name, "reader exited");
}

fn request_worker(ctx: &PipelineContext, requests: Receiver<RawDatagram>, responses: Sender<Response>) {
    tracing::debug!(target: targets::WORKER, server = %ctx.name, "request worker started");

    while !ctx.abandon.is_cancelled() {
        match requests.recv_timeout(ctx.poll_interval()) {
            Ok(datagram) => {
                let Some(response) = handle_datagram(ctx, datagram) else {
                    continue;
                };
                if enqueue(&responses, response, &ctx.abandon, ctx.poll_interval()) {
                    ServerStats::bump(&ctx.stats.responses_queued);
                } else {
                    ServerStats::bump(&ctx.stats.abandoned);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!(target: targets::WORKER, server = %ctx.name, "request worker exited");
}

/// Run the request handler on one datagram, isolating errors and panics.
fn handle_datagram(ctx: &PipelineContext, datagram: RawDatagram) -> Option<Response> {
    let source_addr = datagram.source;
    let handler = &ctx.config.request_handler;

    let outcome = panic::catch_unwind(AssertUnwindSafe(
        || -> Result<Option<Response>, HandlerError> {
            let request = handler.read(datagram)?;
            handler.process(request)
        },
    ));

    match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            ServerStats::bump(&ctx.stats.requests_failed);
            ctx.report(DatagramError::Handler {
                source_addr,
                message: e.to_string(),
            });
            None
        }
        Err(payload) => {
            ServerStats::bump(&ctx.stats.requests_failed);
            ctx.report(DatagramError::HandlerPanicked {
                source_addr,
                message: panic_message(payload.as_ref()),
            });
            None
        }
    }
}

fn response_worker(ctx: &PipelineContext, responses: Receiver<Response>) {
    tracing::debug!(target: targets::WORKER, server = %ctx.name, "response worker started");

    let writer = SocketWriter::new(&ctx.socket);
    while !ctx.abandon.is_cancelled() {
        match responses.recv_timeout(ctx.poll_interval()) {
            Ok(response) => write_response(ctx, &writer, &response),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!(target: targets::WORKER, server = %ctx.name, "response worker exited");
}

fn write_response(ctx: &PipelineContext, writer: &SocketWriter<'_>, response: &Response) {
    let handler = &ctx.config.response_handler;
    let result = panic::catch_unwind(AssertUnwindSafe(|| handler.write(response, writer)))
        .unwrap_or_else(|payload| Err(io::Error::other(panic_message(payload.as_ref()))));

    match result {
        Ok(n) => {
            ServerStats::bump(&ctx.stats.responses_written);
            tracing::trace!(
                target: targets::WORKER,
                server = %ctx.name,
                destination = %response.destination,
                bytes = n,
                "response written"
            );
        }
        Err(e) => {
            let err = DatagramError::from_write(response.destination, e);
            if err.is_timeout() {
                ServerStats::bump(&ctx.stats.write_timeouts);
            } else {
                ServerStats::bump(&ctx.stats.write_failures);
            }
            ctx.report(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_gives_up_when_stopped() {
        let (tx, rx) = bounded::<u32>(1);
        let stop = CancellationToken::new();

        assert!(enqueue(&tx, 1, &stop, Duration::from_millis(5)));

        stop.cancel();
        assert!(!enqueue(&tx, 2, &stop, Duration::from_millis(5)));
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn test_enqueue_waits_for_room() {
        let (tx, rx) = bounded::<u32>(1);
        let stop = CancellationToken::new();
        tx.send(1).unwrap();

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let first = rx.recv().unwrap();
            let second = rx.recv().unwrap();
            (first, second)
        });

        assert!(enqueue(&tx, 2, &stop, Duration::from_millis(5)));
        assert_eq!(consumer.join().unwrap(), (1, 2));
    }

    #[test]
    fn test_enqueue_disconnected() {
        let (tx, rx) = bounded::<u32>(1);
        drop(rx);
        assert!(!enqueue(&tx, 1, &CancellationToken::new(), Duration::from_millis(5)));
    }

    #[test]
    fn test_poll_timeout_kinds() {
        assert!(is_poll_timeout(&io::ErrorKind::WouldBlock.into()));
        assert!(is_poll_timeout(&io::ErrorKind::TimedOut.into()));
        assert!(!is_poll_timeout(&io::ErrorKind::ConnectionReset.into()));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
