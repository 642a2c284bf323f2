//! Error types for starting and stopping the async logger.

use ringproxy_rs::ChannelError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while installing or shutting down an [`AsyncLogger`](crate::AsyncLogger).
#[derive(Debug, Error)]
pub enum LogError {
    /// The queue could not be built.
    #[error("failed to create log queue: {0}")]
    Channel(#[from] ChannelError),

    /// The worker thread could not be started.
    #[error("failed to spawn log worker: {0}")]
    Spawn(#[source] io::Error),

    /// Another logger is already installed for the `log` facade.
    #[error("a global logger is already set")]
    AlreadySet(#[from] log::SetLoggerError),

    /// The worker did not finish draining within the shutdown timeout.
    #[error("log worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// The worker thread panicked (usually inside the appender).
    #[error("log worker panicked")]
    WorkerPanicked,
}
