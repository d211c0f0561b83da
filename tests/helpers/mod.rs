//! Test doubles to simulate the bus during integration tests.
use artie_can::error::BackendError;
use artie_can::protocol::transport::can_frame::CanFrame;
use artie_can::protocol::transport::traits::can_backend::CanBackend;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// In-memory point-to-point bus reproducing the `CanBackend` behavior.
pub struct PipeBackend {
    tx: Sender<CanFrame>,
    rx: Receiver<CanFrame>,
    open: bool,
}

impl PipeBackend {
    /// Construct a pair of cross-wired endpoints (node A ↔ node B).
    pub fn create_pair() -> (Self, Self) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();

        let a = Self {
            tx: a_tx,
            rx: a_rx,
            open: false,
        };
        let b = Self {
            tx: b_tx,
            rx: b_rx,
            open: false,
        };
        (a, b)
    }
}

impl CanBackend for PipeBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        if self.open {
            return Err(BackendError::AlreadyOpen);
        }
        self.open = true;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }
        self.tx
            .send(*frame)
            .map_err(|_| BackendError::TransportFault)
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<CanFrame, BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }
        if timeout_ms == 0 {
            return match self.rx.try_recv() {
                Ok(frame) => Ok(frame),
                Err(TryRecvError::Empty) => Err(BackendError::Timeout),
                Err(TryRecvError::Disconnected) => Err(BackendError::TransportFault),
            };
        }
        match self.rx.recv_timeout(Duration::from_millis(u64::from(timeout_ms))) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(BackendError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::TransportFault),
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.open = false;
        Ok(())
    }
}
