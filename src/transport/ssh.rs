use super::{CommandOutput, EngineBridge, RemoteSession, SshAuth, SshEndpoint, SshTransport};
use crate::constants::limits::{IO_CHUNK_BYTES, MAX_CAPTURE_BYTES};
use crate::constants::network::{KEEPALIVE_INTERVAL_SECS, POLL_INTERVAL_MS};
use crate::errors::ToolError;
use crate::services::context::Interrupt;
use crate::services::logger::Logger;
use base64::Engine as _;
use ssh2::{HashType, Session};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

/// libssh2-backed transport. Host keys are not pinned; the observed
/// fingerprint is logged at debug level only.
#[derive(Clone)]
pub struct Ssh2Transport {
    logger: Logger,
}

impl Ssh2Transport {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("ssh"),
        }
    }

    fn dial(&self, endpoint: &SshEndpoint, budget: Duration) -> Result<TcpStream, ToolError> {
        let address = endpoint.address();
        let candidates = address.to_socket_addrs().map_err(|err| {
            ToolError::ssh_unreachable(format!("cannot resolve {}: {}", endpoint.host, err))
        })?;
        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, budget) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_error = Some(err),
            }
        }
        let reason = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no addresses".to_string());
        Err(ToolError::ssh_unreachable(format!(
            "failed to connect to {}: {}",
            address, reason
        )))
    }
}

impl SshTransport for Ssh2Transport {
    fn connect(
        &self,
        endpoint: &SshEndpoint,
        auth: &SshAuth,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn RemoteSession>, ToolError> {
        interrupt.check()?;
        let budget = interrupt.bound(timeout);
        if budget.is_zero() {
            return Err(ToolError::timeout("no time left to dial SSH"));
        }
        let tcp = self.dial(endpoint, budget)?;
        tcp.set_read_timeout(Some(budget)).ok();
        tcp.set_write_timeout(Some(budget)).ok();

        let mut session =
            Session::new().map_err(|_| ToolError::internal("failed to create SSH session"))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(budget.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().map_err(|err| {
            ToolError::ssh_unreachable(format!(
                "SSH handshake with {} failed: {}",
                endpoint.address(),
                err.message()
            ))
        })?;

        if let Some(fingerprint) = fingerprint_sha256(&session) {
            self.logger.debug(
                "host key observed",
                Some(&serde_json::json!({
                    "endpoint": endpoint.address(),
                    "fingerprint": fingerprint,
                })),
            );
        }
        interrupt.check()?;

        authenticate(&session, &endpoint.username, auth)?;
        if !session.authenticated() {
            return Err(ToolError::authentication_failed(format!(
                "{} authentication was not accepted",
                auth.method()
            )));
        }
        session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
        session.set_timeout(0);

        Ok(Box::new(Ssh2Session {
            session: Some(session),
            logger: self.logger.clone(),
        }))
    }
}

fn authenticate(session: &Session, username: &str, auth: &SshAuth) -> Result<(), ToolError> {
    let outcome = match auth {
        SshAuth::PrivateKeyFile { path, passphrase } => {
            session.userauth_pubkey_file(username, None, Path::new(path), passphrase.as_deref())
        }
        SshAuth::PrivateKeyMemory { pem, passphrase } => {
            session.userauth_pubkey_memory(username, None, pem, passphrase.as_deref())
        }
        SshAuth::Password(password) => session.userauth_password(username, password),
    };
    outcome.map_err(|err| {
        ToolError::authentication_failed(format!(
            "{} authentication rejected: {}",
            auth.method(),
            err.message()
        ))
    })
}

fn fingerprint_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

pub(crate) fn map_ssh_error(err: ssh2::Error, stage: &str) -> ToolError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        ErrorKind::TimedOut => ToolError::timeout(format!("SSH {} timed out", stage)),
        _ => ToolError::internal(format!("SSH {} failed: {}", stage, io_err)),
    }
}

pub struct Ssh2Session {
    session: Option<Session>,
    logger: Logger,
}

impl Ssh2Session {
    fn session(&self) -> Result<&Session, ToolError> {
        self.session
            .as_ref()
            .ok_or_else(|| ToolError::internal("SSH session already closed"))
    }

    fn run(
        session: &Session,
        command: &str,
        budget: Duration,
        interrupt: &Interrupt,
    ) -> Result<CommandOutput, ToolError> {
        let mut channel = session
            .channel_session()
            .map_err(|err| map_ssh_error(err, "channel open"))?;
        channel
            .exec(command)
            .map_err(|err| map_ssh_error(err, "exec"))?;
        let mut stderr_stream = channel.stderr();
        let mut stdout = Capture::default();
        let mut stderr = Capture::default();
        let mut buf = vec![0u8; IO_CHUNK_BYTES];
        let started = Instant::now();

        session.set_blocking(false);
        let streamed = loop {
            if let Err(err) = interrupt.check() {
                break Err(err);
            }
            let mut progressed = pump(&mut channel, &mut buf, &mut stdout, "stdout")?;
            progressed |= pump(&mut stderr_stream, &mut buf, &mut stderr, "stderr")?;
            if channel.eof() {
                break Ok(());
            }
            if started.elapsed() >= budget {
                break Err(ToolError::timeout(format!(
                    "command did not finish within {} ms",
                    budget.as_millis()
                )));
            }
            if !progressed {
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
        };
        session.set_blocking(true);

        if let Err(err) = streamed {
            let _ = channel.close();
            return Err(err);
        }

        let mut rest = Vec::new();
        if channel.read_to_end(&mut rest).is_ok() {
            stdout.push(&rest);
        }
        rest.clear();
        if stderr_stream.read_to_end(&mut rest).is_ok() {
            stderr.push(&rest);
        }
        let _ = channel.wait_close();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandOutput {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code,
        })
    }
}

impl RemoteSession for Ssh2Session {
    fn exec(
        &mut self,
        command: &str,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<CommandOutput, ToolError> {
        interrupt.check()?;
        let session = self.session()?;
        let result = Self::run(session, command, interrupt.bound(timeout), interrupt);
        if result.is_err() {
            session.set_blocking(true);
        }
        result
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "closing", None);
        }
    }

    fn into_engine_bridge(self: Box<Self>) -> Result<EngineBridge, ToolError> {
        let mut this = self;
        let session = this
            .session
            .take()
            .ok_or_else(|| ToolError::internal("SSH session already closed"))?;
        EngineBridge::start(session, this.logger.clone())
    }
}

impl Drop for Ssh2Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn push(&mut self, chunk: &[u8]) {
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str("\n[output truncated]");
        }
        text
    }
}

fn pump<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    capture: &mut Capture,
    label: &str,
) -> Result<bool, ToolError> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            capture.push(&buf[..n]);
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(err) => Err(ToolError::internal(format!(
            "SSH {} read failed: {}",
            label, err
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_truncates_at_limit() {
        let mut capture = Capture::default();
        capture.push(&vec![b'a'; MAX_CAPTURE_BYTES - 1]);
        capture.push(b"bcd");
        assert!(capture.truncated);
        let text = capture.into_string();
        assert!(text.ends_with("[output truncated]"));
        assert!(text.starts_with("aaa"));
    }

    #[test]
    fn unresolvable_host_is_unreachable() {
        let transport = Ssh2Transport::new(Logger::new("test"));
        let endpoint = SshEndpoint {
            host: "host.invalid".to_string(),
            port: 22,
            username: "root".to_string(),
        };
        let err = transport
            .connect(
                &endpoint,
                &SshAuth::Password("x".to_string()),
                Duration::from_millis(200),
                &Interrupt::none(),
            )
            .err()
            .unwrap();
        assert_eq!(err.code, "SSH_UNREACHABLE");
    }
}
