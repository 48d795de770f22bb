//! Graceful-shutdown handshake.
//!
//! The child learns the handshake artifact's name through the
//! `SHUTDOWN_EVENT` environment variable. On Windows it is a named
//! manual-reset event the child can wait on; elsewhere it is a sentinel
//! file path the child can watch, and signalling additionally delivers
//! SIGTERM. Either way the handshake is advisory: a child that ignores it
//! is force-killed once the grace window runs out.

use std::path::Path;

use crate::utils::{lowercase_alnum, steady_time_ms};
use crate::{log_debug, log_error};

#[cfg(unix)]
use std::path::PathBuf;

/// Per-service-run shutdown handshake artifact.
pub struct ShutdownHandshake {
    env_value: String,
    #[cfg(unix)]
    sentinel: PathBuf,
    #[cfg(windows)]
    handle: windows_sys::Win32::Foundation::HANDLE,
}

// the raw event handle is only ever passed to thread-safe Win32 calls
#[cfg(windows)]
unsafe impl Send for ShutdownHandshake {}
#[cfg(windows)]
unsafe impl Sync for ShutdownHandshake {}

impl ShutdownHandshake {
    /// Derive the artifact name from the working directory and the current
    /// uptime, then create the artifact in a reset state.
    pub fn new(work_dir: &Path) -> crate::Result<Self> {
        let absolute =
            std::path::absolute(work_dir).unwrap_or_else(|_| work_dir.to_path_buf());
        let token = lowercase_alnum(&format!("{}{}", absolute.display(), steady_time_ms()));
        Self::create(&token)
    }

    #[cfg(unix)]
    fn create(token: &str) -> crate::Result<Self> {
        let sentinel = std::env::temp_dir().join(format!("warden-shutdown.{token}"));
        // a stale file from a crashed run would read as an instant signal
        let _ = std::fs::remove_file(&sentinel);

        log_debug!("shutdown sentinel: {}", sentinel.display());
        Ok(Self {
            env_value: sentinel.display().to_string(),
            sentinel,
        })
    }

    #[cfg(windows)]
    fn create(token: &str) -> crate::Result<Self> {
        use windows_sys::Win32::System::Threading::CreateEventA;

        let name = format!("Global\\Warden.{token}\0");
        // manual-reset, initially unsignalled
        let handle = unsafe { CreateEventA(std::ptr::null(), 1, 0, name.as_ptr()) };
        if handle.is_null() {
            return Err(crate::error::Error::Service(format!(
                "CreateEvent failed for {}, error code: {}",
                name.trim_end_matches('\0'),
                std::io::Error::last_os_error()
            )));
        }

        let env_value = name.trim_end_matches('\0').to_string();
        log_debug!("shutdown event: {env_value}");
        Ok(Self { env_value, handle })
    }

    /// The value exported to the child as `SHUTDOWN_EVENT`.
    pub fn env_value(&self) -> &str {
        &self.env_value
    }

    /// Tell a cooperating child to exit.
    #[cfg(unix)]
    pub fn signal(&self, child_pid: Option<u32>) {
        if let Err(e) = std::fs::write(&self.sentinel, b"") {
            log_error!("failed to create shutdown sentinel {}: {e}", self.sentinel.display());
        }

        if let Some(pid) = child_pid {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log_error!("failed to send SIGTERM to process {pid}: {e}");
            }
        }
    }

    /// Tell a cooperating child to exit.
    #[cfg(windows)]
    pub fn signal(&self, _child_pid: Option<u32>) {
        use windows_sys::Win32::System::Threading::SetEvent;

        if unsafe { SetEvent(self.handle) } == 0 {
            log_error!(
                "failed to signal shutdown event: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    /// Return the artifact to the unsignalled state for the next
    /// generation.
    pub fn reset(&self) {
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&self.sentinel);
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::System::Threading::ResetEvent;
            unsafe {
                ResetEvent(self.handle);
            }
        }
    }
}

impl Drop for ShutdownHandshake {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&self.sentinel);
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::Foundation::CloseHandle;
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_per_creation() {
        let dir = tempfile::tempdir().unwrap();
        let a = ShutdownHandshake::new(dir.path()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ShutdownHandshake::new(dir.path()).unwrap();
        assert_ne!(a.env_value(), b.env_value());
    }

    #[test]
    fn signal_creates_and_reset_removes_the_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let handshake = ShutdownHandshake::new(dir.path()).unwrap();
        let sentinel = PathBuf::from(handshake.env_value());

        assert!(!sentinel.exists());
        handshake.signal(None);
        assert!(sentinel.exists());
        handshake.reset();
        assert!(!sentinel.exists());
    }

    #[test]
    fn drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let handshake = ShutdownHandshake::new(dir.path()).unwrap();
        handshake.signal(None);
        let sentinel = PathBuf::from(handshake.env_value());
        drop(handshake);
        assert!(!sentinel.exists());
    }

    #[test]
    fn token_is_env_safe() {
        let dir = tempfile::tempdir().unwrap();
        let handshake = ShutdownHandshake::new(dir.path()).unwrap();
        assert!(!handshake.env_value().contains(' '));
        assert!(!handshake.env_value().contains('\0'));
    }
}
