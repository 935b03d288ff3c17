//! LogWriter — an `io::Write` sink that tees output into app logs.
//!
//! Provisioner and deploy output arrives as byte streams; the writer
//! buffers partial lines and appends complete ones to the application's
//! log ring with a fixed source label.

use std::io;

use berth_core::LogEntry;
use berth_store::Collections;

pub struct LogWriter {
    store: Collections,
    app: String,
    source: String,
    partial: Vec<u8>,
}

impl LogWriter {
    pub fn new(
        store: Collections,
        app: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            app: app.into(),
            source: source.into(),
            partial: Vec::new(),
        }
    }

    fn append(&self, lines: Vec<String>) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let entries: Vec<LogEntry> = lines
            .into_iter()
            .map(|line| LogEntry::now(&self.source, line))
            .collect();
        self.store
            .append_logs(&self.app, &entries)
            .map_err(io::Error::other)
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.partial.extend_from_slice(buf);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            lines.push(text);
        }
        self.append(lines)?;
        Ok(buf.len())
    }

    /// Flushes any buffered partial line as an entry of its own.
    fn flush(&mut self) -> io::Result<()> {
        if self.partial.is_empty() {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        self.append(vec![line])
    }
}
