//! Configuration for the async logger.

use log::LevelFilter;
use ringproxy_rs::{GiveUp, WaitStrategy, Yielding};
use std::time::Duration;

/// What a logging thread does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for the worker to make room (spin, then yield).
    #[default]
    Block,
    /// Drop the record and count it.
    Discard,
}

impl WaitStrategy for OverflowPolicy {
    #[inline]
    fn idle(&self, counter: u32) -> Result<u32, GiveUp> {
        match self {
            Self::Block => Yielding::default().idle(counter),
            Self::Discard => Err(GiveUp),
        }
    }
}

/// Settings for an [`AsyncLogger`](crate::AsyncLogger).
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Worker thread name suffix (`ringproxy-log-<name>`).
    ///
    /// Default: "default"
    pub name: String,

    /// Queue slots, rounded up to a power of two.
    ///
    /// Default: 4096
    pub queue_size: usize,

    /// Events appended per `consume` round.
    ///
    /// Default: 4096
    pub batch_limit: usize,

    /// Records above this level are discarded on the logging thread.
    ///
    /// Default: `Info`
    pub max_level: LevelFilter,

    /// Sleep between polls once the worker's backoff is exhausted.
    ///
    /// Default: 1ms
    pub idle_sleep: Duration,

    /// Default: `Block`
    pub overflow: OverflowPolicy,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            queue_size: 4096,
            batch_limit: 4096,
            max_level: LevelFilter::Info,
            idle_sleep: Duration::from_millis(1),
            overflow: OverflowPolicy::Block,
        }
    }
}
