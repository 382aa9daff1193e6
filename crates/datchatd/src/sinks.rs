//! Broker-side chat sinks.
//!
//! Every room line and presence change the broker produces is reported to a
//! [`SinkSet`]. Two sinks ship with the daemon: [`TracingSink`] writes to
//! the tracing subscriber, [`FileLogSink`] keeps the on-disk chat and event
//! logs.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use datchat_core::{ChatSink, PresenceRecord};

/// Timestamp embedded in log file names.
const FILE_STAMP_FORMAT: &str = "%y-%m-%d_%H.%M.%S";

/// Timestamp prefixed to each event log line.
const EVENT_STAMP_FORMAT: &str = "%m/%d/%y %H:%M:%S";

// ============================================================================
// Sink Set
// ============================================================================

/// Fan-out over any number of sinks.
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn ChatSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ChatSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn ChatSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ChatSink for SinkSet {
    fn on_chat_line(&self, line: &str) {
        for sink in &self.sinks {
            sink.on_chat_line(line);
        }
    }

    fn on_presence_changed(&self, record: &PresenceRecord) {
        for sink in &self.sinks {
            sink.on_presence_changed(record);
        }
    }

    fn on_connection_lost(&self) {
        for sink in &self.sinks {
            sink.on_connection_lost();
        }
    }

    fn on_server_event(&self, line: &str) {
        for sink in &self.sinks {
            sink.on_server_event(line);
        }
    }
}

// ============================================================================
// Tracing Sink
// ============================================================================

/// Reports chat activity through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ChatSink for TracingSink {
    fn on_chat_line(&self, line: &str) {
        info!(target: "datchat::chat", "{line}");
    }

    fn on_presence_changed(&self, record: &PresenceRecord) {
        debug!(
            username = %record.username,
            host = %record.remote_host,
            status = %record.status,
            "Presence changed"
        );
    }

    fn on_server_event(&self, line: &str) {
        info!(target: "datchat::event", "{line}");
    }
}

// ============================================================================
// File Log Sink
// ============================================================================

/// Appends room lines and server events to two files in a log directory.
///
/// Files are named after the broker start time:
/// `yy-MM-dd_HH.mm.ss-dat-chat.log` and `yy-MM-dd_HH.mm.ss-dat-event.log`.
/// Write failures are logged and otherwise ignored.
pub struct FileLogSink {
    chat_path: PathBuf,
    event_path: PathBuf,
    chat: Mutex<File>,
    events: Mutex<File>,
}

impl FileLogSink {
    /// Creates the directory if needed and opens both files for append.
    pub fn create(dir: impl AsRef<Path>) -> io::Result<Self> {
        Self::create_at(dir, Local::now())
    }

    fn create_at(dir: impl AsRef<Path>, started: DateTime<Local>) -> io::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let stamp = started.format(FILE_STAMP_FORMAT);
        let chat_path = dir.join(format!("{stamp}-dat-chat.log"));
        let event_path = dir.join(format!("{stamp}-dat-event.log"));

        let open = |path: &Path| OpenOptions::new().create(true).append(true).open(path);
        let chat = open(&chat_path)?;
        let events = open(&event_path)?;

        debug!(
            chat = %chat_path.display(),
            events = %event_path.display(),
            "Opened log files"
        );

        Ok(Self {
            chat_path,
            event_path,
            chat: Mutex::new(chat),
            events: Mutex::new(events),
        })
    }

    pub fn chat_path(&self) -> &Path {
        &self.chat_path
    }

    pub fn event_path(&self) -> &Path {
        &self.event_path
    }

    fn append(file: &Mutex<File>, path: &Path, line: &str) {
        let result = match file.lock() {
            Ok(mut f) => writeln!(f, "{line}").and_then(|()| f.flush()),
            Err(_) => Err(io::Error::new(io::ErrorKind::Other, "log file lock poisoned")),
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write log line");
        }
    }
}

impl ChatSink for FileLogSink {
    fn on_chat_line(&self, line: &str) {
        Self::append(&self.chat, &self.chat_path, line);
    }

    fn on_server_event(&self, line: &str) {
        let stamped = format!("{}  {line}", Local::now().format(EVENT_STAMP_FORMAT));
        Self::append(&self.events, &self.event_path, &stamped);
    }
}
