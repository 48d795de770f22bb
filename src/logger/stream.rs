//! Scoped log-line builder and the logging macros.
//!
//! A [`LoggerStream`] buffers text and emits exactly one record when
//! dropped. The drop is a no-op when no logger is installed, which makes
//! the macros safe to use at any point of the process lifetime, including
//! teardown.

use std::fmt;

use crate::logger::{LogLevel, Logger};

/// Buffering guard that logs its content on drop.
pub struct LoggerStream {
    level: LogLevel,
    file: Option<&'static str>,
    func: Option<&'static str>,
    buffer: String,
}

impl LoggerStream {
    /// A stream without location information.
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            file: None,
            func: None,
            buffer: String::new(),
        }
    }

    /// A stream that records its call site.
    pub fn with_location(level: LogLevel, file: &'static str, func: &'static str) -> Self {
        Self {
            level,
            file: Some(file),
            func: Some(func),
            buffer: String::new(),
        }
    }
}

impl fmt::Write for LoggerStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buffer.push_str(s);
        Ok(())
    }
}

impl Drop for LoggerStream {
    fn drop(&mut self) {
        if let Some(logger) = Logger::current() {
            logger.log(self.level, &self.buffer, self.file, self.func);
        }
    }
}

/// Full path of the enclosing function, without a trailing `::f`.
#[macro_export]
macro_rules! function_path {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        name.strip_suffix("::f").unwrap_or(name)
    }};
}

/// Emit one record at an explicit level, capturing the call site.
#[macro_export]
macro_rules! log_message {
    ($level:expr, $($arg:tt)+) => {{
        let mut stream =
            $crate::logger::LoggerStream::with_location($level, file!(), $crate::function_path!());
        let _ = ::std::fmt::Write::write_fmt(&mut stream, format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_verbose {
    ($($arg:tt)+) => { $crate::log_message!($crate::logger::LogLevel::Verbose, $($arg)+) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::log_message!($crate::logger::LogLevel::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::log_message!($crate::logger::LogLevel::Information, $($arg)+) };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)+) => { $crate::log_message!($crate::logger::LogLevel::Warning, $($arg)+) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::log_message!($crate::logger::LogLevel::Error, $($arg)+) };
}

#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)+) => { $crate::log_message!($crate::logger::LogLevel::Fatal, $($arg)+) };
}
