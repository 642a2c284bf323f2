//! Appenders: where the worker thread delivers events.

use crate::event::LogEvent;
use std::io::{self, Write};
use std::time::UNIX_EPOCH;

/// Destination for log events, called only on the worker thread.
pub trait Appender: Send + 'static {
    fn append(&mut self, event: &LogEvent) -> io::Result<()>;

    /// Called after the worker drained the queue on shutdown.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<F> Appender for F
where
    F: FnMut(&LogEvent) -> io::Result<()> + Send + 'static,
{
    fn append(&mut self, event: &LogEvent) -> io::Result<()> {
        self(event)
    }
}

/// Formats events as lines on any `Write`:
///
/// ```text
/// 1700000000.123456 WARN  [app::db] slow query: 250ms (src/db.rs:42)
/// ```
#[derive(Debug)]
pub struct WriterAppender<W> {
    writer: W,
}

impl<W: Write + Send + 'static> WriterAppender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterAppender<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send + 'static> Appender for WriterAppender<W> {
    fn append(&mut self, event: &LogEvent) -> io::Result<()> {
        let since_epoch = event.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
        write!(
            self.writer,
            "{}.{:06} {:<5} [{}] {}",
            since_epoch.as_secs(),
            since_epoch.subsec_micros(),
            event.level,
            event.target,
            event.message
        )?;
        match (&event.file, event.line) {
            (Some(file), Some(line)) => writeln!(self.writer, " ({file}:{line})"),
            (Some(file), None) => writeln!(self.writer, " ({file})"),
            _ => writeln!(self.writer),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn event(file: Option<&str>, line: Option<u32>) -> LogEvent {
        LogEvent {
            level: Level::Warn,
            target: Arc::from("app::db"),
            message: Arc::from("slow query: 250ms"),
            module_path: None,
            file: file.map(Arc::from),
            line,
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_micros(1_700_000_000_123_456),
        }
    }

    #[test]
    fn test_line_format() {
        let mut appender = WriterAppender::new(Vec::new());
        appender.append(&event(Some("src/db.rs"), Some(42))).unwrap();
        appender.append(&event(None, None)).unwrap();
        let out = String::from_utf8(appender.into_inner()).unwrap();
        assert_eq!(
            out,
            "1700000000.123456 WARN  [app::db] slow query: 250ms (src/db.rs:42)\n\
             1700000000.123456 WARN  [app::db] slow query: 250ms\n"
        );
    }
}
