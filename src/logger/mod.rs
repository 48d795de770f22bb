//! Thread-safe asynchronous logger.
//!
//! Callers format and enqueue on their own thread; a single background
//! writer drains the queue, appends to the log file, rotates it and drives
//! the plugins. The one mutex guards console atomicity, the file queue and
//! plugin fan-out, and is never held across I/O.
//!
//! Lifecycle: **Uninitialised → Configured → Running → Stopped**. `log` is
//! a no-op unless Running, so the macros are safe before startup and after
//! shutdown.

mod email;
mod plugin;
mod record;
mod rotation;
mod stream;

pub use email::EmailLogPlugin;
pub use plugin::LogPlugin;
pub use record::{LogLevel, format_record, location_prefix, thread_id_hash};
pub use stream::LoggerStream;

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ConfigStore;
use crate::constants::{DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_OLD_FILES, DEFAULT_MAX_WRITE_DELAY_MS};
use crate::utils::SyncEvent;

const STATE_UNINITIALIZED: u8 = 0;
const STATE_CONFIGURED: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_STOPPED: u8 = 3;

static CURRENT: Mutex<Option<Arc<Logger>>> = Mutex::new(None);

/// The logger. Construct, [`configure`](Self::configure), register plugins,
/// wrap in an [`Arc`] and [`start`](Self::start); callers then log through
/// the macros or [`log`](Self::log) directly.
pub struct Logger {
    min_console_level: LogLevel,
    min_file_level: LogLevel,
    file_path: Option<PathBuf>,
    log_thread_id: bool,
    max_file_size: u64,
    max_write_delay: Duration,
    max_old_files: usize,
    plugins: Vec<Box<dyn LogPlugin>>,

    state: AtomicU8,
    mute: AtomicBool,
    /// min over console, file and plugin thresholds; the cheapest possible
    /// top-level filter, computed once at start.
    min_any_level: AtomicU8,
    queue: Mutex<Vec<String>>,
    trigger: SyncEvent,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub fn new() -> Self {
        Self {
            min_console_level: LogLevel::Verbose,
            min_file_level: LogLevel::Verbose,
            file_path: None,
            log_thread_id: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_write_delay: Duration::from_millis(DEFAULT_MAX_WRITE_DELAY_MS),
            max_old_files: DEFAULT_MAX_OLD_FILES,
            plugins: Vec::new(),
            state: AtomicU8::new(STATE_UNINITIALIZED),
            mute: AtomicBool::new(false),
            min_any_level: AtomicU8::new(LogLevel::Verbose as u8),
            queue: Mutex::new(Vec::new()),
            trigger: SyncEvent::new(false, true),
            writer: Mutex::new(None),
        }
    }

    /// The shared instance used for destructor-time logging. Latest set
    /// wins; `None` is tolerated and simply drops records.
    pub fn current() -> Option<Arc<Logger>> {
        CURRENT.lock().clone()
    }

    /// Install (or clear) the shared instance.
    pub fn set_current(logger: Option<Arc<Logger>>) {
        *CURRENT.lock() = logger;
    }

    /// Read configuration from `section`. An empty `filePath` disables file
    /// output; otherwise the path is made absolute and its directory is
    /// created.
    pub fn configure(&mut self, cfg: &ConfigStore, section: &str) {
        self.min_console_level =
            LogLevel::from_number(cfg.get_number(section, "minConsoleLevel", 0i64));
        self.min_file_level = LogLevel::from_number(cfg.get_number(section, "minFileLevel", 0i64));

        let file_path = cfg.get_string(section, "filePath", "");
        if file_path.is_empty() {
            self.min_file_level = LogLevel::MaskAll;
            self.file_path = None;
        } else {
            let absolute = std::path::absolute(&file_path).unwrap_or_else(|_| file_path.into());
            if let Some(parent) = absolute.parent() {
                let _ = fs::create_dir_all(parent);
            }
            self.file_path = Some(absolute);
        }

        self.max_file_size = cfg.get_number(section, "maxFileSize", DEFAULT_MAX_FILE_SIZE);
        self.max_old_files = cfg.get_number(section, "maxOldFiles", DEFAULT_MAX_OLD_FILES);
        self.max_write_delay = Duration::from_millis(
            cfg.get_number(section, "maxWriteDelay", DEFAULT_MAX_WRITE_DELAY_MS),
        );
        self.log_thread_id = cfg.get_bool(section, "logThreadId", false);

        self.state.store(STATE_CONFIGURED, Ordering::Release);
    }

    /// Insert `postfix` before the file extension, so several instances can
    /// share a log directory. Only meaningful before `start`.
    pub fn set_filename_postfix(&mut self, postfix: &str) {
        if let Some(path) = &self.file_path {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let extension = path
                .extension()
                .map(|s| format!(".{}", s.to_string_lossy()))
                .unwrap_or_default();
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            self.file_path = Some(parent.join(format!("{stem}{postfix}{extension}")));
        }
    }

    /// Register an additional sink. Plugins cannot be added after `start`;
    /// requiring `&mut self` makes that a compile-time property.
    pub fn register_plugin(&mut self, plugin: Box<dyn LogPlugin>) {
        self.plugins.push(plugin);
    }

    /// Whether file output is enabled, and where it goes.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Spawn the background writer and begin accepting records.
    pub fn start(self: &Arc<Self>) {
        if self.is_running() {
            return;
        }

        let min_any = self
            .plugins
            .iter()
            .map(|p| p.min_level())
            .chain([self.min_console_level, self.min_file_level])
            .min()
            .unwrap_or(LogLevel::Verbose);
        self.min_any_level.store(min_any as u8, Ordering::Release);

        self.state.store(STATE_RUNNING, Ordering::Release);

        let logger = Arc::clone(self);
        *self.writer.lock() = Some(
            std::thread::Builder::new()
                .name("log-writer".into())
                .spawn(move || logger.writer_loop())
                .expect("failed to spawn log writer thread"),
        );

        self.log(
            LogLevel::Debug,
            &format!(
                "minConsoleLevel={}, minFileLevel={}, filePath={}, maxFileSize={}, maxOldFiles={}, maxWriteDelay={}, logThreadId={}, plugins={}",
                self.min_console_level,
                self.min_file_level,
                self.file_path.as_deref().unwrap_or(Path::new("")).display(),
                self.max_file_size,
                self.max_old_files,
                self.max_write_delay.as_millis(),
                self.log_thread_id,
                self.plugins.len(),
            ),
            Some(file!()),
            Some(crate::function_path!()),
        );
    }

    /// Suppress (or re-enable) all output.
    pub fn mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Release);
    }

    /// Log one record. Infallible and non-blocking apart from a brief
    /// mutex hold; never performs I/O on the caller thread.
    pub fn log(&self, level: LogLevel, message: &str, file: Option<&str>, func: Option<&str>) {
        if self.mute.load(Ordering::Acquire) || !self.is_running() {
            return;
        }
        if (level as u8) < self.min_any_level.load(Ordering::Acquire) {
            return;
        }

        let location = location_prefix(file, func);
        let thread_id = self.log_thread_id.then(thread_id_hash);
        let line = format_record(level, message, &location, thread_id);

        let mut queue = self.queue.lock();

        if level >= self.min_console_level {
            print!("{line}");
        }

        for plugin in &self.plugins {
            if level >= plugin.min_level() {
                plugin.log(level, &line);
            }
        }

        if level >= self.min_file_level {
            queue.push(line);
        }
    }

    /// Convenience for callers that already hold `format_args!`.
    pub fn msg(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        self.log(level, &args.to_string(), None, None);
    }

    /// Drain the queue to the file, rotate if needed, and give each plugin
    /// a flush opportunity. `force` pushes partial plugin batches out.
    pub fn flush(&self, force: bool) {
        let drained = std::mem::take(&mut *self.queue.lock());

        if !drained.is_empty()
            && let Some(path) = self.file_path.clone()
        {
            self.write_lines(&path, &drained);
        }

        let still_running = self.is_running();
        for plugin in &self.plugins {
            plugin.flush(still_running, force);
        }
    }

    fn write_lines(&self, path: &Path, lines: &[String]) {
        let file = OpenOptions::new().create(true).append(true).open(path);
        let mut file = match file {
            Ok(f) => f,
            Err(e) => {
                // never log from the flush path, that way lies recursion
                eprintln!("unable to write log file {}: {e}", path.display());
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                return;
            }
        };

        for line in lines {
            if let Err(e) = file.write_all(line.as_bytes()) {
                eprintln!("log write to {} failed: {e}", path.display());
                return;
            }
        }

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        drop(file);

        if self.max_file_size > 0
            && size > self.max_file_size
            && let Err(e) = rotation::rotate(path, self.max_old_files)
        {
            eprintln!("log rotation of {} failed: {e}", path.display());
        }
    }

    fn writer_loop(self: Arc<Self>) {
        while self.is_running() {
            if self.trigger.wait_timeout(self.max_write_delay) && self.is_running() {
                // the trigger is only set at shutdown; pace an unexpected
                // wake instead of busy-looping on it
                std::thread::sleep(self.max_write_delay);
            }
            self.flush(false);
        }
    }

    /// Stop the writer and perform the final forced flush. Idempotent.
    pub fn shutdown(&self) {
        if !self.is_running() {
            return;
        }

        self.log(
            LogLevel::Debug,
            "shutting down",
            Some(file!()),
            Some(crate::function_path!()),
        );

        self.state.store(STATE_STOPPED, Ordering::Release);
        self.trigger.set();
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.join();
        }

        // only a forced flush makes batching plugins emit partial batches
        self.flush(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct CountingPlugin {
        min_level: LogLevel,
        seen: AtomicUsize,
        flushes: AtomicUsize,
    }

    impl CountingPlugin {
        fn new(min_level: LogLevel) -> Self {
            Self {
                min_level,
                seen: AtomicUsize::new(0),
                flushes: AtomicUsize::new(0),
            }
        }
    }

    impl LogPlugin for CountingPlugin {
        fn min_level(&self) -> LogLevel {
            self.min_level
        }

        fn log(&self, _level: LogLevel, _line: &str) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }

        fn flush(&self, _still_running: bool, _force: bool) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn configured_logger(dir: &Path) -> Logger {
        let cfg = ConfigStore::from_value(json!({
            "log": {
                "minConsoleLevel": 6,
                "minFileLevel": 2,
                "filePath": dir.join("test.log").to_str().unwrap(),
                "maxWriteDelay": 50
            }
        }));
        let mut logger = Logger::new();
        logger.configure(&cfg, "log");
        logger
    }

    #[test]
    fn log_is_a_noop_until_started() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(configured_logger(dir.path()));
        logger.log(LogLevel::Error, "dropped", None, None);
        logger.flush(true);
        assert!(!dir.path().join("test.log").exists());
    }

    #[test]
    fn mute_suppresses_every_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = Arc::new(CountingPlugin::new(LogLevel::Information));
        let mut logger = configured_logger(dir.path());
        logger.register_plugin(Box::new(SharedPlugin(Arc::clone(&plugin))));
        let logger = Arc::new(logger);
        logger.start();

        logger.mute(true);
        logger.log(LogLevel::Error, "muted", None, None);
        logger.flush(true);

        assert_eq!(plugin.seen.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("test.log").exists());

        logger.mute(false);
        logger.log(LogLevel::Error, "audible", None, None);
        logger.shutdown();
        assert_eq!(plugin.seen.load(Ordering::SeqCst), 1);
    }

    struct SharedPlugin(Arc<CountingPlugin>);

    impl LogPlugin for SharedPlugin {
        fn min_level(&self) -> LogLevel {
            self.0.min_level()
        }

        fn log(&self, level: LogLevel, line: &str) {
            self.0.log(level, line);
        }

        fn flush(&self, still_running: bool, force: bool) {
            self.0.flush(still_running, force);
        }
    }

    #[test]
    fn each_record_reaches_each_sink_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = Arc::new(CountingPlugin::new(LogLevel::Warning));
        let mut logger = configured_logger(dir.path());
        logger.register_plugin(Box::new(SharedPlugin(Arc::clone(&plugin))));
        let logger = Arc::new(logger);
        logger.start();

        logger.log(LogLevel::Warning, "record-alpha", None, None);
        logger.log(LogLevel::Information, "record-beta", None, None);
        logger.flush(false);
        logger.flush(false);
        logger.shutdown();

        // the Information record stays below the plugin threshold
        assert_eq!(plugin.seen.load(Ordering::SeqCst), 1);

        let content = fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert_eq!(content.matches("record-alpha").count(), 1);
        assert_eq!(content.matches("record-beta").count(), 1);
    }

    #[test]
    fn plugin_threshold_lowers_the_top_level_filter() {
        // file and console masked, but the plugin keeps records flowing
        let plugin = Arc::new(CountingPlugin::new(LogLevel::Information));
        let cfg = ConfigStore::from_value(json!({
            "log": { "minConsoleLevel": 6, "minFileLevel": 6 }
        }));
        let mut logger = Logger::new();
        logger.configure(&cfg, "log");
        logger.register_plugin(Box::new(SharedPlugin(Arc::clone(&plugin))));
        let logger = Arc::new(logger);
        logger.start();

        logger.log(LogLevel::Information, "for the plugin only", None, None);
        logger.shutdown();
        assert_eq!(plugin.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(configured_logger(dir.path()));
        logger.start();
        logger.log(LogLevel::Information, "before stop", None, None);
        logger.shutdown();
        logger.shutdown();
        logger.log(LogLevel::Information, "after stop", None, None);
        logger.flush(true);

        let content = fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert!(content.contains("before stop"));
        assert!(!content.contains("after stop"));
    }

    #[test]
    fn filename_postfix_lands_before_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = configured_logger(dir.path());
        logger.set_filename_postfix("-2");
        assert_eq!(
            logger.file_path().unwrap().file_name().unwrap(),
            "test-2.log"
        );
    }
}
