use crate::constants::limits::IO_CHUNK_BYTES;
use crate::constants::network::{
    ENGINE_CHANNEL_OPEN_TIMEOUT_MS, ENGINE_DIAL_COMMAND, LOOPBACK, POLL_INTERVAL_MS,
};
use crate::errors::ToolError;
use crate::services::logger::Logger;
use ssh2::{Channel, Session};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Loopback listener whose connections are forwarded to the remote engine
/// socket through `docker system dial-stdio`, one SSH channel per connection.
/// Dropping the bridge stops the worker and disconnects the session.
pub struct EngineBridge {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EngineBridge {
    pub fn start(session: Session, logger: Logger) -> Result<Self, ToolError> {
        let listener = TcpListener::bind((LOOPBACK, 0))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let logger = logger.child("bridge");
        let worker = std::thread::Builder::new()
            .name("hostctl-engine-bridge".to_string())
            .spawn(move || forward(session, listener, flag, logger))?;
        Ok(Self {
            local_addr,
            stop,
            worker: Some(worker),
        })
    }

    /// A bridge with no worker behind it, for engines that are reached some
    /// other way.
    pub fn detached(local_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            stop: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn docker_url(&self) -> String {
        format!("tcp://{}", self.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for EngineBridge {
    fn drop(&mut self) {
        // The worker sees the flag on its next poll and disconnects the
        // session itself; dropping the handle detaches it.
        self.stop.store(true, Ordering::SeqCst);
        self.worker.take();
    }
}

struct Link {
    stream: TcpStream,
    channel: Channel,
    to_remote: Vec<u8>,
    to_local: Vec<u8>,
    local_eof: bool,
    remote_eof: bool,
    sent_eof: bool,
}

impl Link {
    fn open(session: &Session, stream: TcpStream) -> Result<Self, ToolError> {
        stream.set_nonblocking(true)?;
        session.set_blocking(true);
        session.set_timeout(ENGINE_CHANNEL_OPEN_TIMEOUT_MS);
        let opened = session.channel_session().and_then(|mut channel| {
            channel.exec(ENGINE_DIAL_COMMAND)?;
            Ok(channel)
        });
        session.set_timeout(0);
        session.set_blocking(false);
        let channel = opened.map_err(|err| {
            ToolError::engine_unavailable(format!("engine dial failed: {}", err.message()))
        })?;
        Ok(Self {
            stream,
            channel,
            to_remote: Vec::new(),
            to_local: Vec::new(),
            local_eof: false,
            remote_eof: false,
            sent_eof: false,
        })
    }

    /// Moves whatever bytes are ready in either direction. Returns whether
    /// anything happened.
    fn step(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut progressed = false;

        if !self.local_eof && self.to_remote.len() < IO_CHUNK_BYTES {
            match self.stream.read(buf) {
                Ok(0) => {
                    self.local_eof = true;
                    progressed = true;
                }
                Ok(n) => {
                    self.to_remote.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
        }
        if !self.to_remote.is_empty() {
            match self.channel.write(&self.to_remote) {
                Ok(n) => {
                    self.to_remote.drain(..n);
                    progressed |= n > 0;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
        }
        if self.local_eof && self.to_remote.is_empty() && !self.sent_eof {
            match self.channel.send_eof() {
                Ok(()) => {
                    self.sent_eof = true;
                    progressed = true;
                }
                Err(err) => {
                    let err: io::Error = err.into();
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err);
                    }
                }
            }
        }

        if !self.remote_eof && self.to_local.len() < IO_CHUNK_BYTES {
            match self.channel.read(buf) {
                Ok(0) => {
                    if self.channel.eof() {
                        self.remote_eof = true;
                        progressed = true;
                    }
                }
                Ok(n) => {
                    self.to_local.extend_from_slice(&buf[..n]);
                    progressed = true;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
        }
        if !self.to_local.is_empty() {
            match self.stream.write(&self.to_local) {
                Ok(n) => {
                    self.to_local.drain(..n);
                    progressed |= n > 0;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err),
            }
        }
        Ok(progressed)
    }

    fn finished(&self) -> bool {
        self.remote_eof && self.to_local.is_empty()
    }

    fn shutdown(mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        let _ = self.channel.close();
    }
}

fn forward(session: Session, listener: TcpListener, stop: Arc<AtomicBool>, logger: Logger) {
    session.set_blocking(false);
    let mut links: Vec<Link> = Vec::new();
    let mut buf = vec![0u8; IO_CHUNK_BYTES];

    while !stop.load(Ordering::SeqCst) {
        let mut progressed = false;

        match listener.accept() {
            Ok((stream, _)) => {
                progressed = true;
                match Link::open(&session, stream) {
                    Ok(link) => links.push(link),
                    Err(err) => logger.warn(&err.message, None),
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => {
                logger.error("engine bridge listener failed", Some(&serde_json::json!({
                    "error": err.to_string(),
                })));
                break;
            }
        }

        let mut index = 0;
        while index < links.len() {
            let outcome = links[index].step(&mut buf);
            match outcome {
                Ok(moved) => {
                    progressed |= moved;
                    if links[index].finished() {
                        links.swap_remove(index).shutdown();
                        continue;
                    }
                }
                Err(err) => {
                    logger.debug(
                        "engine link closed",
                        Some(&serde_json::json!({"error": err.to_string()})),
                    );
                    links.swap_remove(index).shutdown();
                    continue;
                }
            }
            index += 1;
        }

        if !progressed {
            std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }

    for link in links {
        link.shutdown();
    }
    session.set_blocking(true);
    let _ = session.disconnect(None, "engine bridge closed", None);
}
