//! Lifecycle state of a datagram server.

/// State of a [`DatagramServer`](crate::DatagramServer).
///
/// Transitions only move forward: `Created` → `Running` → `Stopped`, with
/// `Running` → `Failed` → `Stopped` when the reader gives up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ServerState {
    /// Constructed and validated; no socket or threads yet.
    #[default]
    Created,
    /// Socket bound, reader and worker pools live.
    Running,
    /// The reader gave up after repeated read errors and the pools have
    /// drained. Nothing is served; call `stop` to release the socket.
    Failed,
    /// Shut down. Not restartable.
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Created => write!(f, "Created"),
            ServerState::Running => write!(f, "Running"),
            ServerState::Failed => write!(f, "Failed"),
            ServerState::Stopped => write!(f, "Stopped"),
        }
    }
}
