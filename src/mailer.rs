//! SMTP delivery collaborator.
//!
//! The email log plugin only consumes the [`MailTransport`] seam; the
//! lettre-backed [`SmtpMailer`] is the production implementation. Delivery
//! problems are logged and swallowed here - mail must never take the
//! process down, and the caller has nothing useful to do with the failure.

use std::time::Duration;

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::ConfigStore;
use crate::constants::DEFAULT_SMTP_TIMEOUT_MS;
use crate::crypto::CryptoHelper;
use crate::{log_error, log_info, log_verbose};

/// Something that can deliver a plain-text message to a recipient list.
///
/// `timeout` overrides the transport's configured timeout; the shutdown
/// path uses it to bound how long a final delivery may take.
pub trait MailTransport: Send + Sync {
    fn send(&self, subject: &str, body: &str, recipients: &[String], timeout: Option<Duration>);
}

/// SMTP transport configured from an `email.*` style section.
pub struct SmtpMailer {
    server_url: String,
    source_address: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl SmtpMailer {
    /// Read transport settings from `section`. The password may be stored
    /// encrypted; see [`CryptoHelper::get_possibly_encrypted`].
    pub fn configure(cfg: &ConfigStore, crypto: &CryptoHelper, section: &str) -> Self {
        log_verbose!("reading configuration from section: {section}");

        let server_url = cfg.get_string(section, "smtpServerUrl", "");
        let source_address = cfg.get_string(section, "defaultSourceAddress", "");

        if server_url.is_empty() || source_address.is_empty() {
            log_error!("smtpServerUrl not configured in section: {section}");
        }

        let username = cfg.get_string(section, "username", "");
        let password = crypto.get_possibly_encrypted(cfg, section, "password", "");
        let timeout = Duration::from_millis(cfg.get_number(
            section,
            "timeout",
            DEFAULT_SMTP_TIMEOUT_MS,
        ));

        log_verbose!(
            "smtpServer={server_url}, defaultSourceAddress={source_address}, username={username}, password={}, timeout={} ms",
            if password.is_empty() { "<none>" } else { "<non-empty>" },
            timeout.as_millis()
        );

        Self {
            server_url,
            source_address,
            username,
            password,
            timeout,
        }
    }

    fn is_configured(&self) -> bool {
        !self.server_url.is_empty() && !self.source_address.is_empty()
    }

    fn build_message(&self, subject: &str, body: &str, recipients: &[String]) -> Option<Message> {
        let from = match self.source_address.parse::<Mailbox>() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                log_error!("invalid source address {}: {e}", self.source_address);
                return None;
            }
        };

        let mut builder = Message::builder()
            .from(from)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in recipients {
            match recipient.parse::<Mailbox>() {
                Ok(mailbox) => builder = builder.to(mailbox),
                Err(e) => {
                    log_error!("invalid recipient address {recipient}: {e}");
                    return None;
                }
            }
        }

        match builder.body(body.to_string()) {
            Ok(message) => Some(message),
            Err(e) => {
                log_error!("failed to build email message: {e}");
                None
            }
        }
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, subject: &str, body: &str, recipients: &[String], timeout: Option<Duration>) {
        let to_string = recipients.join(", ");
        log_info!("sending email to {to_string}");

        if !self.is_configured() {
            log_error!("smtp transport not configured, dropping email to {to_string}");
            return;
        }

        let Some(message) = self.build_message(subject, body, recipients) else {
            return;
        };

        let transport = match SmtpTransport::from_url(&self.server_url) {
            Ok(builder) => {
                let mut builder = builder.timeout(Some(timeout.unwrap_or(self.timeout)));
                if !self.username.is_empty() {
                    builder = builder
                        .credentials(Credentials::new(self.username.clone(), self.password.clone()));
                }
                builder.build()
            }
            Err(e) => {
                log_error!("invalid SMTP server url {}: {e}", self.server_url);
                return;
            }
        };

        match transport.send(&message) {
            Ok(_) => log_info!("email sent successfully to {to_string}"),
            Err(e) => log_error!("email delivery to {to_string} failed: {e}"),
        }
    }
}

/// Mirrors the shape of the trait-impl log call sites so tests can observe
/// the exact function path the compiler generates for them.
#[cfg(test)]
pub(crate) trait LocationProbe {
    fn trait_location() -> &'static str;
}

#[cfg(test)]
impl LocationProbe for SmtpMailer {
    fn trait_location() -> &'static str {
        crate::function_path!()
    }
}

#[cfg(test)]
impl SmtpMailer {
    /// Same, for the inherent-impl call sites.
    pub(crate) fn inherent_location() -> &'static str {
        crate::function_path!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SMTP_LOG_MARKER;
    use crate::logger::location_prefix;
    use serde_json::json;

    #[test]
    fn unconfigured_mailer_drops_mail_quietly() {
        let cfg = ConfigStore::from_value(json!({ "email": {} }));
        let crypto = CryptoHelper::new();
        let mailer = SmtpMailer::configure(&cfg, &crypto, "email");
        assert!(!mailer.is_configured());
        // must not panic or block
        mailer.send("subject", "body", &["ops@example.com".into()], None);
    }

    #[test]
    fn configuration_is_read_from_section() {
        let cfg = ConfigStore::from_value(json!({
            "email": {
                "smtp": {
                    "smtpServerUrl": "smtp://mail.example.com:587",
                    "defaultSourceAddress": "warden@example.com",
                    "username": "warden",
                    "password": "plain-password",
                    "timeout": 5000
                }
            }
        }));
        let crypto = CryptoHelper::new();
        let mailer = SmtpMailer::configure(&cfg, &crypto, "email.smtp");
        assert!(mailer.is_configured());
        assert_eq!(mailer.timeout, Duration::from_millis(5000));
        assert_eq!(mailer.password, "plain-password");
    }

    #[test]
    fn every_mailer_log_line_carries_the_suppression_marker() {
        // the email plugin recognises its own feedback by this marker, so
        // both impl shapes the log sites live in must surface it
        let inherent = location_prefix(Some(file!()), Some(SmtpMailer::inherent_location()));
        assert!(inherent.contains(SMTP_LOG_MARKER), "{inherent}");

        let via_trait = location_prefix(Some(file!()), Some(SmtpMailer::trait_location()));
        assert!(via_trait.contains(SMTP_LOG_MARKER), "{via_trait}");
    }

    #[test]
    fn message_builder_validates_addresses() {
        let cfg = ConfigStore::from_value(json!({
            "email": {
                "smtpServerUrl": "smtp://localhost",
                "defaultSourceAddress": "warden@example.com"
            }
        }));
        let crypto = CryptoHelper::new();
        let mailer = SmtpMailer::configure(&cfg, &crypto, "email");

        assert!(
            mailer
                .build_message("s", "b", &["valid@example.com".into()])
                .is_some()
        );
        assert!(mailer.build_message("s", "b", &["not an address".into()]).is_none());
    }
}
