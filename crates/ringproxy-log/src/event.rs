//! The record that crosses from logging threads to the appender thread.

use log::{Level, Record};
use ringproxy_rs::{CallError, CallReader, Interface, Mpsc, Producer, WaitStrategy};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Call type id of `append`, the only proxied method.
pub(crate) const APPEND: u32 = 1;

/// The proxied appender interface: `append(level, line, timestamp,
/// target, message, module_path, file)`.
pub(crate) fn appender_interface() -> Interface {
    Interface::builder("Appender")
        .method("append", |m| {
            m.primitive::<u8>()
                .primitive::<u32>()
                .primitive::<u64>()
                .reference()
                .reference()
                .reference()
                .reference()
        })
        .build()
        .unwrap_or_else(|_| unreachable!("interface declares one method"))
}

/// An owned, immutable log record.
///
/// `log::Record` borrows from the call site, so everything is copied out
/// before the record crosses threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: Level,
    pub target: Arc<str>,
    pub message: Arc<str>,
    pub module_path: Option<Arc<str>>,
    pub file: Option<Arc<str>>,
    pub line: Option<u32>,
    /// Wall-clock time the record was logged.
    pub timestamp: SystemTime,
}

impl LogEvent {
    pub fn from_record(record: &Record<'_>) -> Self {
        Self {
            level: record.level(),
            target: Arc::from(record.target()),
            message: Arc::from(record.args().to_string()),
            module_path: record.module_path().map(Arc::from),
            file: record.file().map(Arc::from),
            line: record.line(),
            timestamp: SystemTime::now(),
        }
    }

    /// Encodes this event as one `append` call.
    pub(crate) fn send<W: WaitStrategy>(
        self,
        producer: &Producer<Arc<str>, Mpsc, W>,
    ) -> Result<(), CallError> {
        let nanos = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        let mut call = producer.begin_call_shared(APPEND)?;
        call.write(self.level as u8)
            // Lines start at 1, so 0 stands for "unknown".
            .write(self.line.unwrap_or(0))
            .write(nanos)
            .write_ref(self.target)
            .write_ref(self.message)
            .write_opt_ref(self.module_path)
            .write_opt_ref(self.file);
        call.commit();
        Ok(())
    }

    /// Decodes an `append` call.
    pub(crate) fn receive(call: &mut CallReader<'_, Arc<str>>) -> Self {
        let level = match call.read::<u8>() {
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        };
        let line = Some(call.read::<u32>()).filter(|&line| line != 0);
        let timestamp = UNIX_EPOCH + Duration::from_nanos(call.read::<u64>());
        let empty = || Arc::<str>::from("");
        Self {
            level,
            line,
            timestamp,
            target: call.read_ref().unwrap_or_else(empty),
            message: call.read_ref().unwrap_or_else(empty),
            module_path: call.read_ref(),
            file: call.read_ref(),
        }
    }
}
