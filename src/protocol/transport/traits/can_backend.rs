//! Minimal abstraction over a CAN transport. Allows the stack to plug into
//! various implementations (kernel CAN socket, SPI controller chip,
//! in-process queue, TCP tunnel) without touching protocol code.
use crate::error::BackendError;
use crate::protocol::transport::can_frame::CanFrame;

/// Contract to move frames on and off a CAN transport.
///
/// Implementations are single-threaded and poll-driven: `send` never blocks
/// indefinitely (backpressure is reported, not queued) and `receive` suspends
/// in at most one OS readiness primitive bounded by the caller's timeout.
pub trait CanBackend {
    /// Prepare the transport. Idempotent only after a `close` in between;
    /// a second `init` on an open backend fails with
    /// [`BackendError::AlreadyOpen`].
    fn init(&mut self) -> Result<(), BackendError>;

    /// Hand one frame to the transport.
    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError>;

    /// Return the next frame. `timeout_ms == 0` means non-blocking. The full
    /// 29-bit identifier and the extended flag are reported as seen on the
    /// wire; filtering is the dispatcher's concern.
    fn receive(&mut self, timeout_ms: u32) -> Result<CanFrame, BackendError>;

    /// Release transport resources. Idempotent; subsequent operations fail
    /// with [`BackendError::NotOpen`].
    fn close(&mut self) -> Result<(), BackendError>;
}
