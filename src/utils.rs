//! Shared utility functions and small synchronization primitives.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Milliseconds elapsed on the monotonic clock since the first call.
///
/// Used for every deadline in the crate (heartbeat expiry, kill time,
/// email batch age) so wall-clock adjustments cannot move them.
pub fn steady_time_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    Instant::now().duration_since(start).as_millis() as u64
}

/// Replace non-printable bytes with spaces and return the result as a string.
///
/// Applied to junk heartbeat datagrams before they are logged, so a binary
/// payload cannot corrupt the log file.
pub fn sanitize_printable(data: &[u8]) -> String {
    data.iter()
        .map(|&b| {
            if (0x20..0x7f).contains(&b) {
                b as char
            } else {
                ' '
            }
        })
        .collect()
}

/// Look up `name` in the directories of the `PATH` environment variable.
///
/// Returns the first existing regular file, or `None` when the search
/// exhausts the path.
pub fn search_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Keep only lowercased ASCII alphanumerics from `input`.
///
/// Used to turn arbitrary paths into names acceptable to every namespace the
/// shutdown handshake may live in.
pub fn lowercase_alnum(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A waitable event in the style of the classic OS primitive.
///
/// Auto-reset events release one waiter per `set` and clear themselves on a
/// successful wait; manual-reset events stay signalled until `reset`. Both
/// the logger trigger and the supervisor loop trigger are auto-reset.
pub struct SyncEvent {
    signaled: Mutex<bool>,
    cv: Condvar,
    auto_reset: bool,
}

impl SyncEvent {
    pub fn new(initial_state: bool, auto_reset: bool) -> Self {
        Self {
            signaled: Mutex::new(initial_state),
            cv: Condvar::new(),
            auto_reset,
        }
    }

    /// Signal the event. Returns true if it was previously unsignalled.
    pub fn set(&self) -> bool {
        let mut signaled = self.signaled.lock();
        let was_signaled = *signaled;
        *signaled = true;
        if self.auto_reset {
            self.cv.notify_one();
        } else {
            self.cv.notify_all();
        }
        !was_signaled
    }

    /// Clear the event. Returns true if it was signalled.
    pub fn reset(&self) -> bool {
        let mut signaled = self.signaled.lock();
        let was_signaled = *signaled;
        *signaled = false;
        was_signaled
    }

    /// Wait until the event is signalled.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cv.wait(&mut signaled);
        }
        if self.auto_reset {
            *signaled = false;
        }
    }

    /// Wait until the event is signalled or the timeout elapses.
    ///
    /// Returns true when the event was signalled, false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cv.wait_until(&mut signaled, deadline).timed_out() {
                return false;
            }
        }
        if self.auto_reset {
            *signaled = false;
        }
        true
    }
}

/// File stem of a path, or the whole file name when there is no extension.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
