//! The `log::Log` front end and the appender worker thread.

use crate::appender::Appender;
use crate::config::{LoggerConfig, OverflowPolicy};
use crate::error::LogError;
use crate::event::{appender_interface, LogEvent};
use log::{LevelFilter, Log, Metadata, Record};
use ringproxy_rs::{Backoff, Config, Mpsc, MpscChannel, Producer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Crates whose records are never enqueued, so the channel's diagnostics
/// cannot feed back into the channel.
const OWN_CRATES: [&str; 2] = ["ringproxy_rs", "ringproxy_log"];

fn is_own_target(target: &str) -> bool {
    OWN_CRATES.iter().any(|krate| {
        target
            .strip_prefix(*krate)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

/// State shared by the logger, its handle and the worker.
#[derive(Debug)]
struct Control {
    running: AtomicBool,
    dropped: AtomicU64,
    append_errors: AtomicU64,
}

/// Counters reported by [`LoggerHandle::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Events handed to the appender successfully.
    pub processed: u64,
    /// Records discarded on the logging side (queue full under
    /// [`OverflowPolicy::Discard`], or encoding failure).
    pub dropped: u64,
    /// Appender calls that returned an error, flush included.
    pub append_errors: u64,
}

/// A `log::Log` implementation that formats nothing on the calling thread.
///
/// `log` copies the record into a [`LogEvent`] and proxies it as one
/// `append` call to a dedicated worker thread, which runs the [`Appender`].
pub struct AsyncLogger {
    producer: Producer<Arc<str>, Mpsc, OverflowPolicy>,
    max_level: LevelFilter,
    control: Arc<Control>,
}

impl AsyncLogger {
    pub fn builder<A: Appender>(appender: A) -> AsyncLoggerBuilder<A> {
        AsyncLoggerBuilder {
            appender,
            config: LoggerConfig::default(),
        }
    }

    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }
}

impl Log for AsyncLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level && !is_own_target(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) || !self.control.running.load(Ordering::Acquire) {
            return;
        }
        if LogEvent::from_record(record).send(&self.producer).is_err() {
            self.control.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    // The worker drains continuously; it flushes the appender on shutdown.
    fn flush(&self) {}
}

impl std::fmt::Debug for AsyncLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLogger")
            .field("max_level", &self.max_level)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

/// Owns the worker thread. Dropping it stops the worker without waiting.
#[derive(Debug)]
pub struct LoggerHandle {
    control: Arc<Control>,
    worker: Option<JoinHandle<u64>>,
}

impl LoggerHandle {
    /// Records dropped so far.
    pub fn dropped(&self) -> u64 {
        self.control.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting records, lets the worker drain the queue and flush
    /// the appender, and waits up to `timeout` for it to finish.
    ///
    /// On timeout the worker is left running detached.
    pub fn shutdown(mut self, timeout: Duration) -> Result<WorkerStats, LogError> {
        let Some(worker) = self.worker.take() else {
            return Err(LogError::WorkerPanicked);
        };
        self.signal_stop(&worker);

        let deadline = Instant::now() + timeout;
        while !worker.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                return Err(LogError::ShutdownTimeout(timeout));
            }
            thread::sleep((deadline - now).min(Duration::from_millis(1)));
        }

        let processed = worker.join().map_err(|_| LogError::WorkerPanicked)?;
        Ok(WorkerStats {
            processed,
            dropped: self.control.dropped.load(Ordering::Relaxed),
            append_errors: self.control.append_errors.load(Ordering::Relaxed),
        })
    }

    fn signal_stop(&self, worker: &JoinHandle<u64>) {
        self.control.running.store(false, Ordering::Release);
        worker.thread().unpark();
    }
}

impl Drop for LoggerHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.signal_stop(&worker);
        }
    }
}

/// Builder returned by [`AsyncLogger::builder`].
#[derive(Debug)]
pub struct AsyncLoggerBuilder<A> {
    appender: A,
    config: LoggerConfig,
}

impl<A: Appender> AsyncLoggerBuilder<A> {
    pub fn config(mut self, config: LoggerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.config.queue_size = queue_size;
        self
    }

    pub fn batch_limit(mut self, batch_limit: usize) -> Self {
        self.config.batch_limit = batch_limit.max(1);
        self
    }

    pub fn max_level(mut self, max_level: LevelFilter) -> Self {
        self.config.max_level = max_level;
        self
    }

    pub fn idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.config.idle_sleep = idle_sleep;
        self
    }

    pub fn overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.config.overflow = overflow;
        self
    }

    /// Creates the queue and starts the worker thread.
    pub fn build(self) -> Result<(AsyncLogger, LoggerHandle), LogError> {
        let Self { appender, config } = self;
        let channel = MpscChannel::<Arc<str>, OverflowPolicy>::new(
            Config::new(config.queue_size, false),
            appender_interface(),
            config.overflow,
        )?;
        let producer = channel.register()?;
        let control = Arc::new(Control {
            running: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
            append_errors: AtomicU64::new(0),
        });

        let worker = Worker {
            channel,
            appender,
            control: Arc::clone(&control),
            batch_limit: config.batch_limit.max(1),
            idle_sleep: config.idle_sleep,
            processed: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("ringproxy-log-{}", config.name))
            .spawn(move || worker.run())
            .map_err(LogError::Spawn)?;

        let logger = AsyncLogger {
            producer,
            max_level: config.max_level,
            control: Arc::clone(&control),
        };
        Ok((
            logger,
            LoggerHandle {
                control,
                worker: Some(handle),
            },
        ))
    }

    /// Builds the logger and installs it as the global `log` logger.
    pub fn init(self) -> Result<LoggerHandle, LogError> {
        let (logger, handle) = self.build()?;
        let max_level = logger.max_level;
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(max_level);
        Ok(handle)
    }
}

struct Worker<A> {
    channel: MpscChannel<Arc<str>, OverflowPolicy>,
    appender: A,
    control: Arc<Control>,
    batch_limit: usize,
    idle_sleep: Duration,
    processed: u64,
}

impl<A: Appender> Worker<A> {
    fn run(mut self) -> u64 {
        let mut backoff = Backoff::new();
        loop {
            // Read before polling: an empty poll after the stop signal means
            // everything logged before the signal has been appended.
            let running = self.control.running.load(Ordering::Acquire);
            if self.poll() > 0 {
                backoff.reset();
                continue;
            }
            if !running {
                break;
            }
            if backoff.is_completed() {
                thread::park_timeout(self.idle_sleep);
            } else {
                backoff.snooze();
            }
        }

        if self.appender.flush().is_err() {
            self.control.append_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.processed
    }

    /// Appends one batch. Returns the number of slots handled, failed
    /// appends included.
    fn poll(&mut self) -> usize {
        let appender = &mut self.appender;
        let result = self.channel.consume_with(self.batch_limit, |mut call| {
            appender.append(&LogEvent::receive(&mut call))
        });
        match result {
            Ok(appended) => {
                self.processed += appended as u64;
                appended
            }
            Err(err) => {
                self.processed += err.processed as u64;
                self.control.append_errors.fetch_add(1, Ordering::Relaxed);
                err.processed + 1
            }
        }
    }
}
