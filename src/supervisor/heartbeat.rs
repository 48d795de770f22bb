//! UDP liveness listener.
//!
//! One listener exists per child generation: it binds an ephemeral port on
//! loopback, carries a fresh random secret, and both are handed to the
//! child through the environment. A ping is a single datagram whose payload
//! is exactly the secret bytes; anything else is junk and gets logged.

use std::net::UdpSocket;

use rand::Rng;
use rand::distr::Alphanumeric;
use subtle::ConstantTimeEq;

use crate::constants::{HEARTBEAT_RECV_BUFFER, HEARTBEAT_SECRET_LEN};
use crate::error::{Error, Result};
use crate::utils::sanitize_printable;
use crate::{log_error, log_info, log_verbose, log_warning};

/// Heartbeat server for a single child generation.
pub struct HeartbeatServer {
    socket: UdpSocket,
    port: u16,
    secret: String,
}

impl HeartbeatServer {
    /// Bind a non-blocking UDP socket on `127.0.0.1` and generate the
    /// secret for this generation.
    ///
    /// # Errors
    ///
    /// [`Error::HeartbeatSetup`] when the socket cannot be created, bound
    /// or switched to non-blocking mode. The caller disables the heartbeat
    /// for the generation and keeps supervising.
    pub fn start() -> Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", 0))
            .map_err(|e| Error::HeartbeatSetup(format!("bind failed: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::HeartbeatSetup(format!("set_nonblocking failed: {e}")))?;
        let port = socket
            .local_addr()
            .map_err(|e| Error::HeartbeatSetup(format!("local_addr failed: {e}")))?
            .port();

        let secret: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(HEARTBEAT_SECRET_LEN)
            .map(char::from)
            .collect();

        log_info!("listening on 127.0.0.1:{port} (UDP)");

        Ok(Self {
            socket,
            port,
            secret,
        })
    }

    /// The port the child must ping.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The shared secret, valid for this generation only.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Drain all pending datagrams and return how many were valid pings.
    ///
    /// Junk datagrams are logged at Warning with non-printable bytes
    /// replaced by spaces; they never count as liveness.
    pub fn drain_pings(&self) -> usize {
        let mut valid = 0;
        let mut buffer = [0u8; HEARTBEAT_RECV_BUFFER];

        loop {
            match self.socket.recv_from(&mut buffer) {
                Ok((received, _)) => {
                    let payload = &buffer[..received];
                    if bool::from(payload.ct_eq(self.secret.as_bytes())) {
                        log_verbose!("received watchdog ping");
                        valid += 1;
                    } else {
                        log_warning!(
                            "received invalid ping data: {}",
                            sanitize_printable(payload)
                        );
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log_error!("recvfrom failed: {e}");
                    break;
                }
            }
        }

        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn drain_until(server: &HeartbeatServer, expected: usize) -> usize {
        // loopback delivery is fast but not instantaneous
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut total = 0;
        while total < expected && Instant::now() < deadline {
            total += server.drain_pings();
            std::thread::sleep(Duration::from_millis(5));
        }
        total
    }

    #[test]
    fn valid_pings_are_counted() {
        let server = HeartbeatServer::start().unwrap();
        let sender = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let target = ("127.0.0.1", server.port());

        sender.send_to(server.secret().as_bytes(), target).unwrap();
        sender.send_to(server.secret().as_bytes(), target).unwrap();

        assert_eq!(drain_until(&server, 2), 2);
    }

    #[test]
    fn junk_datagrams_are_not_pings() {
        let server = HeartbeatServer::start().unwrap();
        let sender = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let target = ("127.0.0.1", server.port());

        sender.send_to(b"not the secret", target).unwrap();
        sender.send_to(&[0u8, 1, 2, 250], target).unwrap();
        // a truncated secret must not pass either
        sender
            .send_to(&server.secret().as_bytes()[..HEARTBEAT_SECRET_LEN - 1], target)
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(server.drain_pings(), 0);
    }

    #[test]
    fn empty_queue_drains_to_zero() {
        let server = HeartbeatServer::start().unwrap();
        assert_eq!(server.drain_pings(), 0);
    }

    #[test]
    fn each_generation_gets_its_own_secret_and_port() {
        let a = HeartbeatServer::start().unwrap();
        let b = HeartbeatServer::start().unwrap();
        assert_ne!(a.secret(), b.secret());
        assert_ne!(a.port(), b.port());
        assert_eq!(a.secret().len(), HEARTBEAT_SECRET_LEN);
    }
}
