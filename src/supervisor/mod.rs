//! Child-process supervision.
//!
//! One child per generation: spawn, monitor liveness through the UDP
//! heartbeat, signal the shutdown handshake when asked (or when the child
//! goes quiet), force-kill at the grace deadline, and restart after the
//! configured delay. The monitor loop owns the child handle and the
//! heartbeat socket exclusively; the service-control thread only flips
//! `running`, sets the kill deadline and pokes the loop trigger.

mod heartbeat;
pub mod service;
mod shutdown;

pub use heartbeat::HeartbeatServer;
pub use shutdown::ShutdownHandshake;

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ConfigStore;
use crate::constants::{
    DEFAULT_RESTART_DELAY_MS, DEFAULT_SHUTDOWN_TIME_MS, ENV_SHUTDOWN_EVENT, ENV_WATCHDOG_PORT,
    ENV_WATCHDOG_SECRET, IDLE_POLL_MS, KILL_SETTLE_MS, MONITOR_POLL_MS, POST_SPAWN_WAIT_MS,
    SECTION_SUPERVISOR,
};
use crate::error::Error;
use crate::logger::LogLevel;
use crate::utils::{SyncEvent, file_stem, search_path, steady_time_ms};
use crate::{log_debug, log_error, log_info, log_message, log_warning};

/// The service supervisor.
pub struct Supervisor {
    section: String,
    service_name: String,
    exe_file: PathBuf,
    exe_dir: PathBuf,
    working_directory: PathBuf,

    // immutable after configure
    target_executable: String,
    argv: Vec<String>,
    watchdog_timeout_ms: i64,
    shutdown_time_ms: u64,
    restart_delay_ms: u64,
    load_order_group: String,
    auto_start: bool,

    running: AtomicBool,
    kill_time: AtomicU64,
    child_pid: AtomicU32,
    exit_code: AtomicI32,
    loop_trigger: SyncEvent,
    handshake: Mutex<Option<Arc<ShutdownHandshake>>>,
}

impl Supervisor {
    /// Resolve the executable's own paths and the working directory, and
    /// change into it so relative log paths work from the start.
    pub fn new(cfg: &ConfigStore) -> Self {
        let exe_file = std::env::current_exe().unwrap_or_default();
        let exe_dir = exe_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let service_name = file_stem(&exe_file);

        let work_dir = cfg.get_string(SECTION_SUPERVISOR, "workDir", "");
        let working_directory = std::path::absolute(exe_dir.join(&work_dir))
            .unwrap_or_else(|_| exe_dir.join(&work_dir));

        let supervisor = Self {
            section: SECTION_SUPERVISOR.to_string(),
            service_name,
            exe_file,
            exe_dir,
            working_directory,
            target_executable: String::new(),
            argv: Vec::new(),
            watchdog_timeout_ms: -1,
            shutdown_time_ms: DEFAULT_SHUTDOWN_TIME_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            load_order_group: String::new(),
            auto_start: false,
            running: AtomicBool::new(false),
            kill_time: AtomicU64::new(0),
            child_pid: AtomicU32::new(0),
            exit_code: AtomicI32::new(0),
            loop_trigger: SyncEvent::new(false, true),
            handshake: Mutex::new(None),
        };
        supervisor.cd_to_working_dir();
        supervisor
    }

    /// Read the child command line and the supervision policy.
    pub fn configure(&mut self, cfg: &ConfigStore) {
        log_info!(
            "warden {}, supervising as service '{}'",
            env!("CARGO_PKG_VERSION"),
            self.service_name
        );
        log_debug!("exeFile={}", self.exe_file.display());
        log_debug!("exeDir={}", self.exe_dir.display());
        log_debug!("workDir={}", self.working_directory.display());

        let use_path = cfg.get_bool(&self.section, "usePath", false);
        log_debug!("usePath={use_path}");

        let mut argv = cfg.get_string_vector(&self.section, "args", &[]);
        for (i, arg) in argv.iter().enumerate() {
            log_info!("arg #{i}: {arg}");
        }

        if let Some(first) = argv.first_mut() {
            if use_path {
                match search_path(first) {
                    Some(found) => *first = found.display().to_string(),
                    None => log_error!("target executable {first} not found in path"),
                }
            }
            self.target_executable = first.clone();
            log_debug!("using target executable {}", self.target_executable);
        }
        self.argv = argv;

        self.watchdog_timeout_ms = cfg.get_number(&self.section, "watchdogTimeout", -1i64);
        self.shutdown_time_ms =
            cfg.get_number(&self.section, "shutdownTime", DEFAULT_SHUTDOWN_TIME_MS);
        self.restart_delay_ms =
            cfg.get_number(&self.section, "restartDelay", DEFAULT_RESTART_DELAY_MS);
        self.load_order_group = cfg.get_string(&self.section, "loadOrderGroup", "");
        self.auto_start = cfg.get_bool(&self.section, "autoStart", false);
    }

    /// Service name (the executable stem).
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The supervisor's own executable.
    pub fn exe_file(&self) -> &Path {
        &self.exe_file
    }

    /// Load-order group requested for service installation.
    pub fn load_order_group(&self) -> &str {
        &self.load_order_group
    }

    /// Whether the installed service should start with the machine.
    pub fn auto_start(&self) -> bool {
        self.auto_start
    }

    /// Exit code recorded in the service status.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Mark the service as running. Called by the dispatcher just before
    /// [`run`](Self::run).
    pub fn start_running(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Service-control Stop/Shutdown path: stop the loop, tell the child,
    /// arm the kill deadline.
    pub fn request_stop(&self) {
        log_debug!("stopping service");
        self.running.store(false, Ordering::Release);
        self.cd_to_working_dir();
        self.initiate_process_shutdown();
        self.loop_trigger.set();
    }

    fn cd_to_working_dir(&self) {
        // originate from the working dir, or at least from our own dir
        if std::env::set_current_dir(&self.exe_dir).is_err() && !self.exe_dir.as_os_str().is_empty()
        {
            log_error!(
                "failed to change directory to the supervisor's folder: {}",
                self.exe_dir.display()
            );
            return;
        }
        if std::env::set_current_dir(&self.working_directory).is_err() {
            log_error!(
                "failed to change directory to the working folder: {}",
                self.working_directory.display()
            );
        }
    }

    /// Signal the handshake and arm the grace deadline. The child has
    /// `shutdownTime` to exit before the monitor loop force-kills it.
    pub fn initiate_process_shutdown(&self) {
        log_info!(
            "signalling the process and setting timeout to now + {} ms",
            self.shutdown_time_ms
        );

        let handshake = self.handshake.lock().clone();
        if let Some(handshake) = handshake {
            let pid = self.child_pid.load(Ordering::Acquire);
            handshake.signal((pid != 0).then_some(pid));
        }

        self.kill_time
            .store(steady_time_ms() + self.shutdown_time_ms, Ordering::Release);
    }

    /// The supervision loop. Returns when `running` goes false and the
    /// current generation has been wound down.
    pub fn run(&self) {
        if self.target_executable.is_empty() || self.working_directory.as_os_str().is_empty() {
            log_error!("parameters missing, check configuration");
            while self.is_running() {
                self.loop_trigger
                    .wait_timeout(Duration::from_millis(IDLE_POLL_MS));
            }
            return;
        }

        self.cd_to_working_dir();
        log_info!("watchdogTimeout={}", self.watchdog_timeout_ms);

        while self.is_running() {
            self.run_generation();

            if self.is_running() {
                log_debug!("waiting {} ms before restarting", self.restart_delay_ms);
                self.loop_trigger
                    .wait_timeout(Duration::from_millis(self.restart_delay_ms));
            }
        }
    }

    /// One spawn-to-exit lifetime of the child.
    fn run_generation(&self) {
        self.kill_time.store(0, Ordering::Release);

        let heartbeat = if self.watchdog_timeout_ms > 0 {
            match HeartbeatServer::start() {
                Ok(server) => Some(server),
                Err(e) => {
                    // supervise without liveness checks for this generation
                    log_error!("{e}");
                    None
                }
            }
        } else {
            None
        };

        let handshake = match ShutdownHandshake::new(&self.working_directory) {
            Ok(handshake) => {
                handshake.reset();
                Some(Arc::new(handshake))
            }
            Err(e) => {
                log_error!("{e}");
                None
            }
        };
        *self.handshake.lock() = handshake.clone();

        log_info!("starting {}", self.target_executable);

        let mut command = Command::new(&self.target_executable);
        command
            .args(&self.argv[1..])
            .current_dir(&self.working_directory);
        if let Some(server) = &heartbeat {
            command
                .env(ENV_WATCHDOG_PORT, server.port().to_string())
                .env(ENV_WATCHDOG_SECRET, server.secret());
        }
        if let Some(handshake) = &handshake {
            command.env(ENV_SHUTDOWN_EVENT, handshake.env_value());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                log_warning!(
                    "{}",
                    Error::ChildSpawn {
                        target: self.target_executable.clone(),
                        source: e,
                    }
                );
                return;
            }
        };
        self.child_pid.store(child.id(), Ordering::Release);

        self.loop_trigger
            .wait_timeout(Duration::from_millis(POST_SPAWN_WAIT_MS));

        let exit_code = match self.monitor_child(&mut child, heartbeat.as_ref()) {
            ChildOutcome::Exited(code) => code,
            ChildOutcome::Deadline => {
                log_warning!("forcibly terminating child process");
                let _ = child.kill();
                std::thread::sleep(Duration::from_millis(KILL_SETTLE_MS));
                let _ = child.wait();
                None
            }
        };
        self.child_pid.store(0, Ordering::Release);

        log_message!(
            if self.is_running() {
                LogLevel::Warning
            } else {
                LogLevel::Information
            },
            "{} died, exit code {}",
            self.target_executable,
            exit_code.map_or_else(|| "unknown".to_string(), |code| code.to_string())
        );
    }

    /// Poll the child and the heartbeat until the child exits or the kill
    /// deadline passes.
    fn monitor_child(&self, child: &mut Child, heartbeat: Option<&HeartbeatServer>) -> ChildOutcome {
        let watchdog_timeout = self.watchdog_timeout_ms.max(0) as u64;
        let mut next_ping = steady_time_ms() + watchdog_timeout;

        loop {
            self.loop_trigger
                .wait_timeout(Duration::from_millis(MONITOR_POLL_MS));

            match child.try_wait() {
                // a signal-terminated child has no code; it reads as unknown
                Ok(Some(status)) => return ChildOutcome::Exited(status.code()),
                Ok(None) => {}
                Err(e) => log_warning!("failed to query child exit status: {e}"),
            }

            let now = steady_time_ms();

            if let Some(server) = heartbeat
                && self.kill_time.load(Ordering::Acquire) == 0
            {
                if server.drain_pings() > 0 {
                    next_ping = now + watchdog_timeout;
                }

                if now > next_ping {
                    log_warning!(
                        "child process stopped sending valid UDP ping packets, restarting it"
                    );
                    self.initiate_process_shutdown();
                }
            }

            let kill_time = self.kill_time.load(Ordering::Acquire);
            if kill_time != 0 && now >= kill_time {
                return ChildOutcome::Deadline;
            }
        }
    }
}

/// How a generation's monitor loop ended.
enum ChildOutcome {
    /// The child exited on its own (code absent when it died to a signal).
    Exited(Option<i32>),
    /// The grace window ran out with the child still alive.
    Deadline,
}
