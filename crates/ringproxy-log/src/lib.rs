//! Asynchronous logging for the [`log`] facade on ringproxy-rs channels
//!
//! Logging threads copy each record into a [`LogEvent`] and proxy it as a
//! single `append` call over a lock-free multi-producer channel. A dedicated
//! worker thread decodes the calls and hands them to an [`Appender`], so
//! formatting and I/O never run on the caller's thread.
//!
//! # Features
//!
//! - **Overflow policy**: block until the worker makes room, or discard and count
//! - **Isolated appender failures**: errors are counted, the worker keeps going
//! - **Graceful shutdown**: drain, flush, and report [`WorkerStats`]
//!
//! # Example
//!
//! ```no_run
//! use ringproxy_log::{AsyncLogger, WriterAppender};
//! use std::time::Duration;
//!
//! let handle = AsyncLogger::builder(WriterAppender::stderr())
//!     .name("app")
//!     .max_level(log::LevelFilter::Debug)
//!     .init()
//!     .unwrap();
//!
//! log::info!("service started");
//!
//! let stats = handle.shutdown(Duration::from_secs(1)).unwrap();
//! assert_eq!(stats.processed, 1);
//! ```

mod appender;
mod config;
mod error;
mod event;
mod logger;

pub use appender::{Appender, WriterAppender};
pub use config::{LoggerConfig, OverflowPolicy};
pub use error::LogError;
pub use event::LogEvent;
pub use logger::{AsyncLogger, AsyncLoggerBuilder, LoggerHandle, WorkerStats};
