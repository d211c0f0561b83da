//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (byte-stuffing codec,
//! transport backends, protocol validation).
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised by the byte-stuffing codec.
pub enum StuffingError {
    /// The caller's output buffer cannot hold the encoded form.
    #[error("Output buffer too small")]
    BufferTooSmall,
    /// A `0x00` count byte, a truncated run, or a missing terminator.
    #[error("Invalid stuffing sequence")]
    InvalidStuffing,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Transport-level errors reported by backends.
pub enum BackendError {
    /// The backend was never opened, or has been closed.
    #[error("Backend not open")]
    NotOpen,
    /// `init` was called twice without an intervening `close`.
    #[error("Backend already open")]
    AlreadyOpen,
    /// The transport cannot accept more frames right now. Transient.
    #[error("Transport backpressure")]
    Backpressure,
    /// No frame arrived within the caller's timeout.
    #[error("Receive timed out")]
    Timeout,
    /// The receive queue holds no frame (local-queue backend only).
    #[error("Receive queue empty")]
    Empty,
    /// The configured peer cannot be reached.
    #[error("No route to peer")]
    NoRoute,
    /// The configured listen address could not be bound.
    #[error("Bind failed")]
    BindFailed,
    /// The backend configuration is unusable for this factory path.
    #[error("Invalid backend configuration")]
    InvalidConfig,
    /// The transport is gone (closed socket, bus fault). The owning context
    /// is unusable afterwards.
    #[error("Fatal transport fault")]
    TransportFault,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors surfaced by the four protocol layers and the core context.
pub enum ProtocolError {
    /// Address out of range, forbidden broadcast, payload too large, unknown
    /// backend kind.
    #[error("Invalid argument")]
    InvalidArgument,
    /// An ingress CRC did not match the received payload.
    #[error("CRC mismatch")]
    CrcMismatch,
    /// A frame was structurally malformed for its protocol (short header,
    /// bad parity, reserved field values).
    #[error("Malformed frame")]
    InvalidFrame,
    /// A frame carried an unexpected kind for the exchange in progress.
    #[error("Frame does not match the requested protocol exchange")]
    ProtocolMismatch,
    /// A receive or acknowledgement wait expired.
    #[error("Operation timed out")]
    Timeout,
    /// The RPC peer explicitly refused the call.
    #[error("Peer refused the call: code {code:#04x}")]
    NackReceived {
        /// The errno-style wire byte from the NACK frame, carried opaquely.
        code: u8,
    },
    /// The fixed-capacity reassembly pool has no free slot.
    #[error("Too many concurrent reassembly streams")]
    TooManyStreams,
    /// Byte-stuffing failure while encoding or decoding a payload.
    #[error(transparent)]
    Stuffing(#[from] StuffingError),
    /// Error propagated from the transport backend.
    #[error("Transport error: {0}")]
    Backend(#[from] BackendError),
}

impl ProtocolError {
    /// Map a backend receive error onto the protocol taxonomy: expiry becomes
    /// [`ProtocolError::Timeout`], everything else stays a transport error.
    pub(crate) fn from_recv(err: BackendError) -> Self {
        match err {
            BackendError::Timeout | BackendError::Empty => ProtocolError::Timeout,
            other => ProtocolError::Backend(other),
        }
    }
}
