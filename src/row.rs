use crate::event::{ErrorInfo, LogEvent};
use crate::identity::HostIdentity;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI32, Ordering};

/// Maximum persisted message length, in characters.
pub const MAX_MESSAGE_LEN: usize = 255;
/// Maximum persisted message-key length, in characters.
pub const MAX_MESSAGE_KEY_LEN: usize = 100;
/// Maximum persisted stack-trace length, in characters.
pub const MAX_ERROR_LEN: usize = 10_000;

/// A key must end strictly after this index, so keys are at least five
/// characters unless the message itself is shorter.
const MIN_KEY_INDEX: usize = 4;

/// Delimiters that may end a message key, evaluated in this exact order
/// against the truncated message.
const KEY_DELIMITERS: [&str; 7] = [". ", "=", ": ", "-", "\n", "\t", "**"];

/// Cause chains render at most this many levels.
const MAX_CAUSE_DEPTH: usize = 5;
/// Frames rendered for an error that has a further cause.
const FRAME_LIMIT: usize = 2;
/// Frames rendered for the last error of a chain.
const LEAF_FRAME_LIMIT: usize = 12;

const UNKNOWN: &str = "unknown";

/// One row of the destination table, in column order.
///
/// Rows are create-once: the writer builds them from drained events and
/// hands them to the store without ever mutating them afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    /// Calendar date of the event as YYYYMMDD, host-local time.
    pub day_id: i32,
    /// Day of week, Sunday=1 through Saturday=7. An opaque ordinal kept
    /// for grouping; not an ISO weekday.
    pub day_key: i32,
    pub service: String,
    pub level: i32,
    pub level_name: String,
    pub category: String,
    /// Module path of the call site, `"unknown"` when unavailable.
    pub class_name: String,
    /// Source file of the call site, `"unknown"` when unavailable.
    pub method: String,
    pub line_number: i32,
    pub message_key: Option<String>,
    pub message: Option<String>,
    /// Formatted error chain, empty when the event carried none.
    pub error: String,
    pub build_version: String,
    pub machine: String,
    pub machine_ip: String,
    pub message_num: i32,
    pub timestamp: DateTime<Utc>,
    /// Raw epoch milliseconds of the event.
    pub last_modified: i64,
}

/// Rolling sequence number shared by every row the process writes.
///
/// Produces values in `[1, max]`, wrapping back to 1 past the maximum.
/// Despite being sized by `max_messages_per_day`, the counter is never
/// reset at a day boundary; it cycles continuously for the lifetime of
/// the process.
#[derive(Debug)]
pub struct MessageCounter {
    max: i32,
    last: AtomicI32,
}

impl MessageCounter {
    pub fn new(max_messages_per_day: u32) -> Self {
        let max = max_messages_per_day.clamp(1, i32::MAX as u32) as i32;
        MessageCounter {
            max,
            last: AtomicI32::new(0),
        }
    }

    pub fn next(&self) -> i32 {
        let prev = self
            .last
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n % self.max + 1)
            })
            .unwrap_or(0);
        prev % self.max + 1
    }
}

/// Derives persisted rows from raw events.
///
/// Stateless apart from the injected [`MessageCounter`]; everything else
/// is a pure function of the event plus the startup identity facts.
#[derive(Debug)]
pub struct RowBuilder {
    service: String,
    identity: HostIdentity,
    counter: MessageCounter,
}

impl RowBuilder {
    pub fn new(service: impl Into<String>, identity: HostIdentity, counter: MessageCounter) -> Self {
        RowBuilder {
            service: service.into(),
            identity,
            counter,
        }
    }

    pub fn build(&self, event: &LogEvent) -> LogRow {
        let timestamp = Utc
            .timestamp_millis_opt(event.timestamp_ms)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);
        let date = timestamp.with_timezone(&Local).date_naive();

        let message = event
            .message
            .as_deref()
            .map(|m| truncate_chars(m, MAX_MESSAGE_LEN).to_string());
        let key = event.message.as_deref().map(|m| message_key(m).to_string());

        let (class_name, method, line_number) = match &event.caller {
            Some(frame) => (
                non_empty_or(&frame.module, UNKNOWN),
                non_empty_or(&frame.file, UNKNOWN),
                frame.line as i32,
            ),
            None => (UNKNOWN.to_string(), UNKNOWN.to_string(), 0),
        };

        let error = event
            .error
            .as_ref()
            .map(format_error_chain)
            .unwrap_or_default();

        LogRow {
            day_id: day_id(date),
            day_key: day_key(date),
            service: self.service.clone(),
            level: event.severity.code(),
            level_name: event.severity.as_str().to_string(),
            category: event.category.clone(),
            class_name,
            method,
            line_number,
            message_key: key,
            message,
            error,
            build_version: self.identity.build_version.clone(),
            machine: self.identity.machine.clone(),
            machine_ip: self.identity.machine_ip.clone(),
            message_num: self.counter.next(),
            timestamp,
            last_modified: event.timestamp_ms,
        }
    }
}

/// Calendar date as a YYYYMMDD integer.
pub fn day_id(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

/// Day of week with Sunday=1 through Saturday=7.
pub fn day_key(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32 + 1
}

/// First `max_chars` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    match s.char_indices().nth(max_chars) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

fn cap_chars(s: &mut String, max_chars: usize) {
    if s.len() <= max_chars {
        return;
    }
    if let Some((index, _)) = s.char_indices().nth(max_chars) {
        s.truncate(index);
    }
}

/// Deduplication key for a message: the shortest prefix ending just
/// before the earliest qualifying delimiter.
///
/// The message is first cut to [`MAX_MESSAGE_KEY_LEN`] characters. Each
/// delimiter of [`KEY_DELIMITERS`] is then located in that truncated
/// text; an occurrence qualifies when its character position is above
/// [`MIN_KEY_INDEX`] and before the best cut found so far. When nothing
/// qualifies the whole truncated message is the key.
pub fn message_key(message: &str) -> &str {
    let truncated = truncate_chars(message, MAX_MESSAGE_KEY_LEN);
    let mut end = truncated.len();
    for delimiter in KEY_DELIMITERS {
        if let Some(index) = truncated.find(delimiter) {
            // The minimum-length guard counts characters; `index` is a
            // byte offset and overshoots on multi-byte prefixes.
            if index < end && truncated[..index].chars().count() > MIN_KEY_INDEX {
                end = index;
            }
        }
    }
    &truncated[..end]
}

/// Renders an error chain the way the destination table expects it:
/// `Class: message` headers, tab-indented frames with per-level limits,
/// `Caused by:` prefixes, and a hard cap of [`MAX_ERROR_LEN`] characters
/// over the whole rendering.
pub fn format_error_chain(info: &ErrorInfo) -> String {
    let mut out = String::new();
    append_cause(&mut out, info, 1);
    cap_chars(&mut out, MAX_ERROR_LEN);
    out
}

fn append_cause(out: &mut String, info: &ErrorInfo, level: usize) {
    if level >= MAX_CAUSE_DEPTH {
        return;
    }
    if level > 1 {
        out.push_str("Caused by: ");
    }
    out.push_str(&info.class_name);
    out.push_str(": ");
    out.push_str(&info.message);
    out.push('\n');

    let limit = if info.cause.is_none() {
        LEAF_FRAME_LIMIT
    } else {
        FRAME_LIMIT
    };
    for (index, frame) in info.frames.iter().enumerate() {
        if index >= limit {
            out.push_str("\t... ");
            out.push_str(&(info.frames.len() - index).to_string());
            out.push_str(" lines omitted \n");
            break;
        }
        out.push('\t');
        out.push_str(frame);
        out.push('\n');
    }

    if let Some(cause) = &info.cause {
        append_cause(out, cause, level + 1);
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
