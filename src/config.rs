use std::time::Duration;
use thiserror::Error;
use tracing::Level;

/// Default capacity of the event queue.
pub const DEFAULT_MAX_QUEUE: usize = 10_000;
/// Default wraparound bound of the rolling sequence number.
pub const DEFAULT_MAX_MESSAGES_PER_DAY: u32 = 1_000;
/// Default deadline for a single store I/O call.
pub const DEFAULT_IO_DEADLINE: Duration = Duration::from_secs(30);

/// Tunables for one sink pipeline.
///
/// `service` is the only required value; everything else has defaults
/// matching the sizes this sink has historically run with.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Logical service name written into every row.
    pub service: String,
    /// Maximum number of buffered events before pushes start dropping.
    pub max_queue: usize,
    /// Upper bound of the rolling `messageNum` sequence.
    pub max_messages_per_day: u32,
    /// Deadline applied to each connection acquire and batch write.
    pub io_deadline: Duration,
    /// Most verbose level admitted into the pipeline. Defaults to
    /// `ERROR`: this is an error sink first.
    pub max_level: Level,
    /// Overrides the environment-derived build version when set.
    pub build_version: Option<String>,
    /// Also echo events to stdout via a `fmt` layer in `init_db_sink`.
    pub enable_stdout: bool,
}

impl SinkConfig {
    pub fn new(service: impl Into<String>) -> Self {
        SinkConfig {
            service: service.into(),
            max_queue: DEFAULT_MAX_QUEUE,
            max_messages_per_day: DEFAULT_MAX_MESSAGES_PER_DAY,
            io_deadline: DEFAULT_IO_DEADLINE,
            max_level: Level::ERROR,
            build_version: None,
            enable_stdout: true,
        }
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn with_max_messages_per_day(mut self, max: u32) -> Self {
        self.max_messages_per_day = max;
        self
    }

    pub fn with_io_deadline(mut self, deadline: Duration) -> Self {
        self.io_deadline = deadline;
        self
    }

    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    pub fn with_build_version(mut self, version: impl Into<String>) -> Self {
        self.build_version = Some(version.into());
        self
    }

    pub fn with_stdout(mut self, enable: bool) -> Self {
        self.enable_stdout = enable;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::MissingService);
        }
        Ok(())
    }
}

/// Fatal startup problems. Nothing is spawned and no event is accepted
/// when any of these is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("service identifier is not configured")]
    MissingService,

    #[error("destination table name is not configured")]
    MissingTable,

    #[error("table name {0:?} may only contain ascii alphanumerics, '_' and '.'")]
    InvalidTable(String),
}

/// Destination table names are spliced into SQL text, so they are held
/// to a strict identifier charset instead of being parameterized.
pub(crate) fn validate_table(table: &str) -> Result<(), ConfigError> {
    if table.trim().is_empty() {
        return Err(ConfigError::MissingTable);
    }
    let valid = table
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid {
        return Err(ConfigError::InvalidTable(table.to_string()));
    }
    Ok(())
}
