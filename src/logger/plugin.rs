//! Plugin interface for additional log sinks.

use crate::logger::LogLevel;

/// An additional destination for formatted log lines.
///
/// Plugins are registered before the logger starts and owned by it; the
/// plugin list is read-only afterwards. `log` runs on the caller thread
/// under the logger lock and must stay cheap; `flush` runs on the writer
/// thread without the logger lock. Neither may call back into the logger.
pub trait LogPlugin: Send + Sync {
    /// Threshold below which this plugin never sees a line. `MaskAll`
    /// disables the plugin.
    fn min_level(&self) -> LogLevel;

    /// Accept one formatted line. Called only for `level >= min_level()`.
    fn log(&self, level: LogLevel, line: &str);

    /// Deliver accumulated lines when the plugin's own thresholds say so.
    ///
    /// `force` makes partial batches go out (shutdown-time semantics);
    /// `still_running` is false once the logger is stopping, which bounds
    /// any waiting the plugin does.
    fn flush(&self, still_running: bool, force: bool);
}
