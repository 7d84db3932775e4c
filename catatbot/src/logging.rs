use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{Log, Metadata, Record};
use tokio::sync::broadcast;

/// How many formatted lines `GET /logs` can look back on.
const LOG_HISTORY_LINES: usize = 1000;

/// Shared sink for formatted log lines: a ring buffer for the accumulated
/// view, a broadcast channel for live viewers, and an append-only file.
pub struct LogSink {
    lines: Mutex<VecDeque<String>>,
    tx: broadcast::Sender<String>,
    file: Mutex<Option<File>>,
}

impl LogSink {
    fn new(file: Option<File>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            lines: Mutex::new(VecDeque::new()),
            tx,
            file: Mutex::new(file),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == LOG_HISTORY_LINES {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }
        if let Ok(mut file) = self.file.lock() {
            if let Some(file) = file.as_mut() {
                let _ = writeln!(file, "{}", line);
            }
        }
        // No receivers is fine, the stream page may simply not be open.
        let _ = self.tx.send(line);
    }
}

/// `log::Log` implementation that keeps the usual pretty terminal output
/// and tees every accepted record into the shared sink.
struct TeeLogger {
    inner: pretty_env_logger::env_logger::Logger,
    sink: Arc<LogSink>,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        let line = format!(
            "{} {:<5} {} > {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.target(),
            record.args()
        );
        self.sink.push(line);
    }

    fn flush(&self) {
        self.inner.flush()
    }
}

/// Install the tee logger and return the sink handle the HTTP layer serves.
///
/// Filtering follows RUST_LOG, defaulting to `info`.
pub fn init(log_dir: &Path) -> Arc<LogSink> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("catatbot.log"))
        .ok();
    let sink = Arc::new(LogSink::new(file));

    let mut builder = pretty_env_logger::formatted_builder();
    builder.parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    let inner = builder.build();
    let max_level = inner.filter();

    let logger = TeeLogger {
        inner,
        sink: sink.clone(),
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }
    sink
}
