//! Structured hypervisor log service.
//!
//! A fixed-size, heap-free circular buffer of log entries. Each entry
//! carries a severity, a subsystem tag, and a fixed-length message, so the
//! service never allocates — it is safe to call from the ISR path.
//!
//! ```ignore
//! log_service::log_init();
//! log_service::klog(LogLevel::Info, "sched", "first dispatch");
//! let n = log_service::log_count();
//! ```

use spin::Mutex;

use crate::sync::once_lock::GlobalState;

const LOG_BUFFER_CAPACITY: usize = 256;
const LOG_MESSAGE_MAX_LEN: usize = 96;
const LOG_SUBSYSTEM_MAX_LEN: usize = 12;

/// Severity levels for hypervisor log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

/// A single structured log entry, stored inline (no allocation).
#[derive(Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    subsystem_buf: [u8; LOG_SUBSYSTEM_MAX_LEN],
    subsystem_len: u8,
    message_buf: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            level: LogLevel::Debug,
            subsystem_buf: [0u8; LOG_SUBSYSTEM_MAX_LEN],
            subsystem_len: 0,
            message_buf: [0u8; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    pub fn subsystem(&self) -> &str {
        let len = self.subsystem_len as usize;
        core::str::from_utf8(&self.subsystem_buf[..len]).unwrap_or("")
    }

    pub fn message(&self) -> &str {
        let len = self.message_len as usize;
        core::str::from_utf8(&self.message_buf[..len]).unwrap_or("")
    }
}

struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    head: usize,
    count: usize,
}

impl LogBuffer {
    fn new() -> Self {
        const EMPTY: LogEntry = LogEntry::empty();
        Self {
            entries: [EMPTY; LOG_BUFFER_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if self.count < LOG_BUFFER_CAPACITY {
            self.count += 1;
        }
    }

    fn len(&self) -> usize {
        self.count
    }

    fn tail(&self) -> usize {
        if self.count < LOG_BUFFER_CAPACITY {
            0
        } else {
            self.head
        }
    }

    fn get(&self, i: usize) -> Option<&LogEntry> {
        if i >= self.count {
            return None;
        }
        Some(&self.entries[(self.tail() + i) % LOG_BUFFER_CAPACITY])
    }
}

struct LogService {
    buffer: LogBuffer,
}

impl LogService {
    fn new() -> Self {
        Self {
            buffer: LogBuffer::new(),
        }
    }

    fn log(&mut self, level: LogLevel, subsystem: &str, message: &str) {
        let mut subsystem_buf = [0u8; LOG_SUBSYSTEM_MAX_LEN];
        let sub_len = subsystem.len().min(LOG_SUBSYSTEM_MAX_LEN);
        subsystem_buf[..sub_len].copy_from_slice(&subsystem.as_bytes()[..sub_len]);

        let mut message_buf = [0u8; LOG_MESSAGE_MAX_LEN];
        let msg_len = message.len().min(LOG_MESSAGE_MAX_LEN);
        message_buf[..msg_len].copy_from_slice(&message.as_bytes()[..msg_len]);

        self.buffer.push(LogEntry {
            level,
            subsystem_buf,
            subsystem_len: sub_len as u8,
            message_buf,
            message_len: msg_len as u8,
        });
    }
}

static LOG_SERVICE: GlobalState<Mutex<LogService>> = GlobalState::new();

/// Bridges the `log` facade onto the fixed-size structured buffer above, so
/// code that only knows `log::info!`/`log::warn!` (e.g. a borrowed driver)
/// lands in the same place as `hvlog!`. `klog`/`hvlog!` remain the direct
/// path for the hypervisor's own hot code, since they skip the facade's
/// dynamic dispatch.
struct ServiceLogger;

impl log::Log for ServiceLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let level = match record.level() {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        };
        klog(level, record.target(), &crate::hvlog_format!("{}", record.args()));
    }

    fn flush(&self) {}
}

static LOGGER: ServiceLogger = ServiceLogger;

/// Initialize the log service and install it as the `log` facade's global
/// logger. Safe to call more than once; later calls are silently ignored.
pub fn log_init() {
    let _ = LOG_SERVICE.init(Mutex::new(LogService::new()));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
}

/// Record a structured log entry. Dropped silently if the service has not
/// been initialized yet.
pub fn klog(level: LogLevel, subsystem: &str, message: &str) {
    LOG_SERVICE.with(|lock| lock.lock().log(level, subsystem, message));
}

/// Visit every buffered entry, oldest first.
pub fn log_drain<F: FnMut(&LogEntry)>(mut f: F) -> Option<usize> {
    LOG_SERVICE.with(|lock| {
        let service = lock.lock();
        let n = service.buffer.len();
        for i in 0..n {
            if let Some(entry) = service.buffer.get(i) {
                f(entry);
            }
        }
        n
    })
}

/// Number of entries currently buffered.
pub fn log_count() -> Option<usize> {
    LOG_SERVICE.with(|lock| lock.lock().buffer.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_buffer_wraps_and_counts() {
        log_init();
        for i in 0..(LOG_BUFFER_CAPACITY + 10) {
            klog(LogLevel::Info, "test", if i % 2 == 0 { "even" } else { "odd" });
        }
        assert_eq!(log_count(), Some(LOG_BUFFER_CAPACITY));
    }
}
