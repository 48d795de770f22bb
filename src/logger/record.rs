//! Log levels and line formatting.
//!
//! A serialised record is a single line:
//! `YYYY-MM-DD HH:MM:SS.mmm [LVL] [tid: ]location: message\n`
//! with a local wall-clock timestamp at millisecond resolution. The thread
//! id is a lower-case 8-hex-digit hash, present only when configured.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Severity of a log record, totally ordered.
///
/// `MaskAll` is not a level messages are logged at; as a filter threshold it
/// disables a sink entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Anything and everything you might want to know about a running block
    /// of code.
    Verbose = 0,
    /// Internal system events that aren't necessarily observable from the
    /// outside.
    Debug = 1,
    /// The lifeblood of operational intelligence - things happen.
    Information = 2,
    /// Service is degraded or endangered.
    Warning = 3,
    /// Functionality is unavailable, invariants are broken or data is lost.
    Error = 4,
    /// If you have a pager, it goes off when one of these occurs.
    Fatal = 5,
    /// Filter threshold that admits nothing.
    MaskAll = 6,
}

impl LogLevel {
    /// Three-letter label used in serialised lines.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Verbose => "VRB",
            Self::Debug => "DBG",
            Self::Information => "INF",
            Self::Warning => "WRN",
            Self::Error => "ERR",
            Self::Fatal => "FAT",
            Self::MaskAll => "UNK",
        }
    }

    /// Interpret a configured numeric level; out-of-range values clamp.
    pub fn from_number(n: i64) -> Self {
        match n {
            i64::MIN..=0 => Self::Verbose,
            1 => Self::Debug,
            2 => Self::Information,
            3 => Self::Warning,
            4 => Self::Error,
            5 => Self::Fatal,
            _ => Self::MaskAll,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 32-bit hash of the current thread's id.
///
/// Deliberately truncated; it only has to tell threads apart within one log
/// file.
pub fn thread_id_hash() -> u32 {
    let mut hasher = std::hash::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

/// Build the `location: ` prefix of a record.
///
/// A function path that already carries a `::` separator identifies itself;
/// a bare function name is prefixed with the file stem instead.
pub fn location_prefix(file: Option<&str>, func: Option<&str>) -> String {
    let (Some(file), Some(func)) = (file, func) else {
        return String::new();
    };

    if func.contains("::") {
        // a qualified trait-impl path is one `<Type as Trait>` segment;
        // truncating it would drop the type name
        if func.starts_with('<') {
            return format!("{func}: ");
        }
        // keep the tail of the module path, the crate prefix is noise
        let mut parts: Vec<&str> = func.rsplit("::").take(2).collect();
        parts.reverse();
        format!("{}: ", parts.join("::"))
    } else {
        let stem = Path::new(file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{stem}.{func}: ")
    }
}

/// Format a complete record line, including the trailing newline.
pub fn format_record(
    level: LogLevel,
    message: &str,
    location: &str,
    thread_id: Option<u32>,
) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match thread_id {
        Some(tid) => format!("{timestamp} [{}] {tid:08x}: {location}{message}\n", level.label()),
        None => format!("{timestamp} [{}] {location}{message}\n", level.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_totally_ordered() {
        assert!(LogLevel::Verbose < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Information);
        assert!(LogLevel::Information < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Fatal);
        assert!(LogLevel::Fatal < LogLevel::MaskAll);
    }

    #[test]
    fn numeric_levels_clamp() {
        assert_eq!(LogLevel::from_number(-5), LogLevel::Verbose);
        assert_eq!(LogLevel::from_number(2), LogLevel::Information);
        assert_eq!(LogLevel::from_number(99), LogLevel::MaskAll);
    }

    #[test]
    fn qualified_function_is_used_verbatim() {
        let prefix = location_prefix(Some("src/supervisor/mod.rs"), Some("warden::supervisor::run"));
        assert_eq!(prefix, "supervisor::run: ");
    }

    #[test]
    fn trait_impl_path_keeps_the_type_name() {
        let prefix = location_prefix(
            Some("src/mailer.rs"),
            Some("<warden::mailer::SmtpMailer as warden::mailer::MailTransport>::send"),
        );
        assert_eq!(
            prefix,
            "<warden::mailer::SmtpMailer as warden::mailer::MailTransport>::send: "
        );
    }

    #[test]
    fn bare_function_gets_file_stem() {
        assert_eq!(location_prefix(Some("src/utils.rs"), Some("helper")), "utils.helper: ");
    }

    #[test]
    fn missing_location_is_empty() {
        assert_eq!(location_prefix(None, Some("f")), "");
        assert_eq!(location_prefix(Some("x.rs"), None), "");
    }

    #[test]
    fn record_format_shape() {
        let line = format_record(LogLevel::Warning, "message text", "place: ", None);
        assert!(line.ends_with("[WRN] place: message text\n"), "{line}");
        // timestamp: date, space, time with milliseconds
        let ts = &line[..23];
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[10], b' ');
        assert_eq!(ts.as_bytes()[19], b'.');
    }

    #[test]
    fn thread_id_is_eight_hex_digits() {
        let line = format_record(LogLevel::Information, "m", "", Some(0xab));
        assert!(line.contains("[INF] 000000ab: m"), "{line}");
    }

    #[test]
    fn thread_hash_is_stable_within_thread() {
        assert_eq!(thread_id_hash(), thread_id_hash());
    }
}
