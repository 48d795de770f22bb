//! Email log sink.
//!
//! Accumulates formatted lines and delivers them as one message when the
//! batch is big enough, old enough, or a forced flush demands it. Delivery
//! runs on short-lived worker threads so the logger's writer never blocks
//! on SMTP; the workers are tracked and joined once the logger stops.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ConfigStore;
use crate::constants::{
    DEFAULT_EMAIL_MAX_DELAY_SECS, DEFAULT_EMAIL_MAX_LOGS, DEFAULT_EMAIL_TIMEOUT_ON_SHUTDOWN_MS,
    SMTP_LOG_MARKER,
};
use crate::crypto::CryptoHelper;
use crate::log_debug;
use crate::logger::{LogLevel, LogPlugin, Logger};
use crate::mailer::{MailTransport, SmtpMailer};
use crate::utils::steady_time_ms;

/// One batch of lines plus the time the first of them arrived.
#[derive(Default)]
struct Batch {
    lines: Vec<String>,
    epoch_ms: u64,
}

/// Logger plugin that emails batches of log lines.
pub struct EmailLogPlugin {
    min_level: LogLevel,
    recipients: Vec<String>,
    subject: String,
    max_delay: Duration,
    max_logs: usize,
    timeout_on_shutdown: Duration,
    transport: Arc<dyn MailTransport>,
    batch: Mutex<Batch>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EmailLogPlugin {
    /// Build and register a plugin for every object under `parent_section`.
    ///
    /// Sections that are disabled or incomplete are skipped with a log
    /// line, matching the forgiving-configuration style of the rest of the
    /// crate.
    pub fn configure_all(
        cfg: &ConfigStore,
        crypto: &CryptoHelper,
        logger: &mut Logger,
        parent_section: &str,
    ) {
        for name in cfg.get_keys(parent_section, true, false, false) {
            let section = format!("{parent_section}.{name}");
            if let Some(plugin) = Self::from_config(cfg, crypto, &section) {
                logger.register_plugin(Box::new(plugin));
            }
        }
    }

    /// Read one plugin's configuration. Returns `None` when the section is
    /// disabled or not fully configured.
    pub fn from_config(
        cfg: &ConfigStore,
        crypto: &CryptoHelper,
        section: &str,
    ) -> Option<Self> {
        let min_level = LogLevel::from_number(cfg.get_number(section, "minLogLevel", 0i64));
        let recipients = cfg.get_string_vector(section, "recipients", &[]);
        let email_section = cfg.get_string(section, "emailSection", "");

        if email_section.is_empty() || recipients.is_empty() || min_level >= LogLevel::MaskAll {
            log_debug!("section={section}: disabled or not fully configured");
            return None;
        }

        let mut subject = cfg.get_string(section, "subject", "");
        if subject.is_empty() {
            subject = default_subject();
        }

        let max_delay = Duration::from_secs(cfg.get_number(
            section,
            "maxDelay",
            DEFAULT_EMAIL_MAX_DELAY_SECS,
        ));
        let max_logs = cfg.get_number(section, "maxLogs", DEFAULT_EMAIL_MAX_LOGS);
        let timeout_on_shutdown = Duration::from_millis(cfg.get_number(
            section,
            "timeoutOnShutdown",
            DEFAULT_EMAIL_TIMEOUT_ON_SHUTDOWN_MS,
        ));

        let transport = Arc::new(SmtpMailer::configure(cfg, crypto, &email_section));

        log_debug!(
            "section={section}: minLogLevel={min_level}, emailSection={email_section}, recipients={}, subject={subject}, maxDelay={} s, maxLogs={max_logs}, timeoutOnShutdown={} ms",
            recipients.join(", "),
            max_delay.as_secs(),
            timeout_on_shutdown.as_millis()
        );

        Some(Self::with_transport(
            min_level,
            recipients,
            subject,
            max_delay,
            max_logs,
            timeout_on_shutdown,
            transport,
        ))
    }

    /// Assemble a plugin around an arbitrary transport. The seam the tests
    /// use to observe delivery without a network.
    pub fn with_transport(
        min_level: LogLevel,
        recipients: Vec<String>,
        subject: String,
        max_delay: Duration,
        max_logs: usize,
        timeout_on_shutdown: Duration,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            min_level,
            recipients,
            subject,
            max_delay,
            max_logs,
            timeout_on_shutdown,
            transport,
            batch: Mutex::new(Batch::default()),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }

    fn deliver_async(&self, body: String) {
        let transport = Arc::clone(&self.transport);
        let subject = self.subject.clone();
        let recipients = self.recipients.clone();

        let worker = std::thread::Builder::new()
            .name("email-flush".into())
            .spawn(move || transport.send(&subject, &body, &recipients, None));

        match worker {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|w| !w.is_finished());
                workers.push(handle);
            }
            Err(e) => eprintln!("failed to spawn email worker: {e}"),
        }
    }
}

impl LogPlugin for EmailLogPlugin {
    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn log(&self, level: LogLevel, line: &str) {
        if level < self.min_level {
            return;
        }

        // lines born in the SMTP module must not trigger more SMTP traffic
        if line.contains(SMTP_LOG_MARKER) {
            return;
        }

        let mut batch = self.batch.lock();
        if batch.lines.is_empty() {
            batch.epoch_ms = steady_time_ms();
        }
        batch.lines.push(line.to_string());
    }

    fn flush(&self, still_running: bool, force: bool) {
        if !still_running {
            // shutdown: nothing may outlive the logger
            self.join_workers();
        }

        let lines = {
            let mut batch = self.batch.lock();
            if batch.lines.is_empty() {
                return;
            }

            let age = Duration::from_millis(steady_time_ms().saturating_sub(batch.epoch_ms));
            if !force && batch.lines.len() < self.max_logs && age < self.max_delay {
                return;
            }

            std::mem::take(&mut *batch).lines
        };

        let body = lines.concat();

        if still_running {
            self.deliver_async(body);
        } else {
            // the shortened timeout keeps service stop responsive
            self.transport.send(
                &self.subject,
                &body,
                &self.recipients,
                Some(self.timeout_on_shutdown),
            );
        }
    }
}

/// `<executable> @ <hostname>`, the portable default subject.
fn default_subject() -> String {
    let executable = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "warden".to_string());
    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
    format!("{executable} @ {hostname}")
}
