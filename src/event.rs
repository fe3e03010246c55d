use serde::Serialize;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

/// Cause chains longer than this are cut off while walking `source()`.
const MAX_CAUSE_WALK: usize = 16;

/// Severity scale persisted as a numeric code plus its name.
///
/// The codes follow the classic appender convention (TRACE=5000 up to
/// ERROR=40000) so existing dashboards keyed on the `level` column keep
/// working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn code(self) -> i32 {
        match self {
            Severity::Trace => 5_000,
            Severity::Debug => 10_000,
            Severity::Info => 20_000,
            Severity::Warn => 30_000,
            Severity::Error => 40_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call-site provenance attached to an event when the emitter knows it.
#[derive(Debug, Clone, Serialize)]
pub struct CallerFrame {
    /// Module path of the call site.
    pub module: String,
    /// Source file of the call site.
    pub file: String,
    pub line: u32,
}

/// One link of an error cause chain: a type name, its message, the
/// captured stack frames and an optional deeper cause.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub class_name: String,
    pub message: String,
    pub frames: Vec<String>,
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorInfo {
            class_name: class_name.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    pub fn with_frames(mut self, frames: Vec<String>) -> Self {
        self.frames = frames;
        self
    }

    pub fn caused_by(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Build a chain from any `std::error::Error` by walking `source()`.
    ///
    /// The type name is taken from the leading identifier of the error's
    /// `Debug` rendering, which for the common derived representations is
    /// the variant or struct name.
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        Self::walk(err, 0)
    }

    fn walk(err: &(dyn Error + 'static), depth: usize) -> Self {
        let mut info = ErrorInfo::new(error_kind(err), err.to_string());
        if depth + 1 < MAX_CAUSE_WALK {
            if let Some(cause) = err.source() {
                info.cause = Some(Box::new(Self::walk(cause, depth + 1)));
            }
        }
        info
    }

    /// Fill `frames` from the runtime backtrace when capture is enabled
    /// (`RUST_BACKTRACE=1`). A disabled backtrace leaves frames empty.
    pub fn capture_backtrace(&mut self) {
        if !self.frames.is_empty() {
            return;
        }
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            self.frames = format!("{}", backtrace)
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect();
        }
    }
}

/// A structured log event as handed to the sink by a producer thread.
///
/// Immutable once created; the pipeline transforms it into a row and
/// drops it, so there is no state to share back with the producer.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    /// Event time as epoch milliseconds.
    pub timestamp_ms: i64,
    pub severity: Severity,
    /// Logger/category name; for `tracing` events this is the target.
    pub category: String,
    /// Name of the producing thread, empty when unnamed. Provenance for
    /// callers constructing or inspecting events; the persisted row does
    /// not carry it, and admission no longer keys on it (the writer's
    /// own events are excluded by its worker-context flag instead).
    pub thread: String,
    pub message: Option<String>,
    pub error: Option<ErrorInfo>,
    pub caller: Option<CallerFrame>,
}

impl LogEvent {
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        LogEvent {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            severity,
            category: category.into(),
            thread: std::thread::current().name().unwrap_or_default().to_string(),
            message: Some(message.into()),
            error: None,
            caller: None,
        }
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_caller(mut self, caller: CallerFrame) -> Self {
        self.caller = Some(caller);
        self
    }
}

fn error_kind(err: &(dyn Error + 'static)) -> String {
    let debug = format!("{:?}", err);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "inner failure")
        }
    }

    impl Error for Inner {}

    #[derive(Debug)]
    struct Outer(Inner);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer failure")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_severity_codes_and_names() {
        assert_eq!(Severity::Error.code(), 40_000);
        assert_eq!(Severity::Warn.code(), 30_000);
        assert_eq!(Severity::Info.code(), 20_000);
        assert_eq!(Severity::Debug.code(), 10_000);
        assert_eq!(Severity::Trace.code(), 5_000);
        assert_eq!(Severity::Error.as_str(), "ERROR");
        assert_eq!(Severity::from_tracing(&tracing::Level::WARN), Severity::Warn);
    }

    #[test]
    fn test_severity_orders_by_importance() {
        assert!(Severity::Error > Severity::Warn);
        assert!(Severity::Trace < Severity::Debug);
    }

    #[test]
    fn test_from_error_walks_sources() {
        let chain = ErrorInfo::from_error(&Outer(Inner));
        assert_eq!(chain.class_name, "Outer");
        assert_eq!(chain.message, "outer failure");
        let cause = chain.cause.as_deref().unwrap();
        assert_eq!(cause.class_name, "Inner");
        assert_eq!(cause.message, "inner failure");
        assert!(cause.cause.is_none());
    }

    #[test]
    fn test_from_error_uses_io_error_variant_name() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let info = ErrorInfo::from_error(&err);
        assert!(!info.class_name.is_empty());
        assert_eq!(info.message, "disk on fire");
    }

    #[test]
    fn test_event_constructor_fills_thread_and_time() {
        let event = LogEvent::new(Severity::Error, "app::auth", "denied");
        assert!(event.timestamp_ms > 0);
        assert_eq!(
            event.thread,
            std::thread::current().name().unwrap_or_default(),
        );
        assert_eq!(event.message.as_deref(), Some("denied"));
        assert!(event.error.is_none());
        assert!(event.caller.is_none());
    }
}
