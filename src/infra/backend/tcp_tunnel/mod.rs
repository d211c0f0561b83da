//! TCP-tunnel backend: frames are length-prefixed on a stream socket so two
//! stack instances in different processes (or containers) can share a
//! simulated bus without CAN hardware.
//!
//! Wire format per frame: a 4-byte network-order length — always
//! [`WIRE_FRAME_LEN`] — followed by the frame encoding (identifier, DLC,
//! payload, extended flag). A receiver seeing any other length treats the
//! stream as corrupted and closes.
//!
//! Server mode binds the configured address with backlog 1 and adopts the
//! first peer that connects; later connections are ignored for the life of
//! the context. Client mode starts a non-blocking connect at `init` and
//! completes it on the first `send` or `receive` via a write-readiness poll.
use crate::error::BackendError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::traits::can_backend::CanBackend;
use log::{debug, trace, warn};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

mod sys;

/// Environment variable naming the peer/bind host.
pub const ENV_HOST: &str = "ARTIE_CAN_MOCK_HOST";
/// Environment variable naming the TCP port.
pub const ENV_PORT: &str = "ARTIE_CAN_MOCK_PORT";
/// Environment variable selecting server mode when set to `true`.
pub const ENV_SERVER: &str = "ARTIE_CAN_MOCK_SERVER";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5555;

/// Size of the fixed frame encoding on the wire.
pub const WIRE_FRAME_LEN: usize = 14;
/// Length prefix plus frame encoding.
pub const WIRE_MSG_LEN: usize = 4 + WIRE_FRAME_LEN;

//==================================================================================CONFIG

/// TCP tunnel endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Peer host (client mode) or bind host (server mode).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// True to listen and adopt the first peer, false to connect out.
    pub server: bool,
}

impl TunnelConfig {
    /// Explicit configuration. Overrides anything in the environment.
    pub fn new(host: impl Into<String>, port: u16, server: bool) -> Self {
        Self {
            host: host.into(),
            port,
            server,
        }
    }

    /// Configuration from `ARTIE_CAN_MOCK_HOST` / `_PORT` / `_SERVER`,
    /// defaulting to a client of `localhost:5555`.
    pub fn from_env() -> Self {
        let host = std::env::var(ENV_HOST).unwrap_or_else(|_| DEFAULT_HOST.into());
        let port = std::env::var(ENV_PORT)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let server = std::env::var(ENV_SERVER)
            .map(|raw| raw.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { host, port, server }
    }
}

//==================================================================================WIRE

fn encode_message(frame: &CanFrame) -> [u8; WIRE_MSG_LEN] {
    let mut buf = [0u8; WIRE_MSG_LEN];
    buf[..4].copy_from_slice(&(WIRE_FRAME_LEN as u32).to_be_bytes());
    buf[4..8].copy_from_slice(&frame.id.0.to_be_bytes());
    buf[8] = frame.dlc;
    buf[9..17].copy_from_slice(&frame.data);
    buf[17] = u8::from(frame.extended);
    buf
}

fn decode_frame(buf: &[u8]) -> CanFrame {
    let mut id = [0u8; 4];
    id.copy_from_slice(&buf[..4]);
    let mut data = [0u8; 8];
    data.copy_from_slice(&buf[5..13]);
    CanFrame {
        id: CanId(u32::from_be_bytes(id)),
        dlc: buf[4],
        data,
        extended: buf[13] != 0,
    }
}

//==================================================================================BACKEND

/// TCP tunnel transport. One socket pair per backend instance.
#[derive(Debug)]
pub struct TcpTunnelBackend {
    config: TunnelConfig,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    /// Client connect still in flight; resolved by a write-readiness poll.
    connect_pending: bool,
    /// Partially received message, preserved across timed-out receives so
    /// the stream never desynchronizes.
    rx_buf: [u8; WIRE_MSG_LEN],
    rx_fill: usize,
    open: bool,
}

impl TcpTunnelBackend {
    /// Backend with explicit configuration.
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            listener: None,
            stream: None,
            connect_pending: false,
            rx_buf: [0; WIRE_MSG_LEN],
            rx_fill: 0,
            open: false,
        }
    }

    /// Backend configured from the environment.
    pub fn from_env() -> Self {
        Self::new(TunnelConfig::from_env())
    }

    fn resolve(&self) -> Result<SocketAddr, BackendError> {
        let mut addrs = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|_| BackendError::NoRoute)?;
        // Prefer IPv4; fall back to whatever the resolver offers.
        let first = addrs.next().ok_or(BackendError::NoRoute)?;
        if first.is_ipv4() {
            return Ok(first);
        }
        Ok(addrs.find(SocketAddr::is_ipv4).unwrap_or(first))
    }

    /// Drop the socket and mark the backend unusable.
    fn fail(&mut self) -> BackendError {
        self.stream = None;
        self.listener = None;
        self.open = false;
        BackendError::TransportFault
    }

    /// Make sure a connected stream exists, waiting at most `timeout_ms`.
    /// Returns `Ok(false)` when the peer is not there yet (transient).
    fn ensure_connected(&mut self, timeout_ms: u32) -> Result<bool, BackendError> {
        if self.stream.is_some() && !self.connect_pending {
            return Ok(true);
        }

        if let Some(listener) = &self.listener {
            // Server: adopt the first peer once it shows up.
            if !sys::wait_readable(listener, timeout_ms)? {
                return Ok(false);
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("tcp tunnel: accepted peer {peer}");
                    stream
                        .set_nonblocking(true)
                        .map_err(|_| BackendError::TransportFault)?;
                    self.stream = Some(stream);
                    Ok(true)
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
                Err(_) => Err(self.fail()),
            }
        } else if self.connect_pending {
            // Client: the non-blocking connect completes when the socket
            // polls writable with no pending socket error.
            let stream = self.stream.as_ref().ok_or(BackendError::NotOpen)?;
            if !sys::wait_writable(stream, timeout_ms)? {
                return Ok(false);
            }
            match sys::take_socket_error(stream) {
                Ok(()) => {
                    debug!(
                        "tcp tunnel: connected to {}:{}",
                        self.config.host, self.config.port
                    );
                    self.connect_pending = false;
                    Ok(true)
                }
                Err(err) => {
                    self.stream = None;
                    self.open = false;
                    Err(err)
                }
            }
        } else {
            Err(BackendError::NotOpen)
        }
    }

    fn write_message(&mut self, message: &[u8; WIRE_MSG_LEN]) -> Result<(), BackendError> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(BackendError::NotOpen),
        };

        let mut written = 0;
        while written < message.len() {
            match stream.write(&message[written..]) {
                Ok(0) => return Err(self.fail()),
                Ok(n) => written += n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if written == 0 {
                        // Nothing went out: plain backpressure, retryable.
                        return Err(BackendError::Backpressure);
                    }
                    // Mid-message stall: wait briefly for the send buffer to
                    // drain rather than leave the peer a torn frame.
                    if !sys::wait_writable(stream, SHORT_WRITE_GRACE_MS)? {
                        warn!("tcp tunnel: short write, closing stream");
                        return Err(self.fail());
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => return Err(self.fail()),
            }
        }
        Ok(())
    }
}

/// Grace period for draining a partially written message (ms).
const SHORT_WRITE_GRACE_MS: u32 = 10;

impl CanBackend for TcpTunnelBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        if self.open {
            return Err(BackendError::AlreadyOpen);
        }
        let addr = self.resolve()?;

        if self.config.server {
            let listener = sys::listen_backlog_one(addr)?;
            debug!("tcp tunnel: listening on {addr}");
            self.listener = Some(listener);
        } else {
            let (stream, pending) = sys::connect_nonblocking(addr)?;
            debug!(
                "tcp tunnel: connecting to {addr} ({})",
                if pending { "in flight" } else { "done" }
            );
            self.stream = Some(stream);
            self.connect_pending = pending;
        }

        self.rx_fill = 0;
        self.open = true;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }
        if !self.ensure_connected(0)? {
            return Err(BackendError::Backpressure);
        }
        let message = encode_message(frame);
        self.write_message(&message)?;
        trace!("tcp tunnel: sent frame id={:#010x}", frame.id.0);
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<CanFrame, BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));

        fn remaining(deadline: Instant) -> u32 {
            deadline
                .saturating_duration_since(Instant::now())
                .as_millis()
                .min(u128::from(u32::MAX)) as u32
        }

        if !self.ensure_connected(timeout_ms)? {
            return Err(BackendError::Timeout);
        }

        loop {
            if self.rx_fill == WIRE_MSG_LEN {
                let mut prefix = [0u8; 4];
                prefix.copy_from_slice(&self.rx_buf[..4]);
                if u32::from_be_bytes(prefix) as usize != WIRE_FRAME_LEN {
                    warn!("tcp tunnel: bad length prefix, stream corrupted");
                    return Err(self.fail());
                }
                let frame = decode_frame(&self.rx_buf[4..]);
                self.rx_fill = 0;
                trace!("tcp tunnel: received frame id={:#010x}", frame.id.0);
                return Ok(frame);
            }

            let fill = self.rx_fill;
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(BackendError::NotOpen),
            };
            if !sys::wait_readable(stream, remaining(deadline))? {
                return Err(BackendError::Timeout);
            }

            match stream.read(&mut self.rx_buf[fill..]) {
                Ok(0) => {
                    debug!("tcp tunnel: peer closed the stream");
                    return Err(self.fail());
                }
                Ok(n) => self.rx_fill += n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => return Err(self.fail()),
            }
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.stream = None;
        self.listener = None;
        self.connect_pending = false;
        self.rx_fill = 0;
        self.open = false;
        Ok(())
    }
}
