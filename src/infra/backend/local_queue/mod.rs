//! In-process queue backend: a bounded FIFO ring of frames for deterministic
//! same-process tests. No networking, no timing.
//!
//! The same queue mediates `send` and `receive`, so a context using this
//! backend reads back its own frames. Loopback tests account for that.
use crate::error::BackendError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::traits::can_backend::CanBackend;

/// Ring capacity in frames. A design constant, not a tunable.
pub const QUEUE_CAPACITY: usize = 32;

const EMPTY_FRAME: CanFrame = CanFrame {
    id: CanId(0),
    dlc: 0,
    data: [0; 8],
    extended: false,
};

/// Bounded frame ring with FIFO semantics.
#[derive(Debug)]
pub struct LocalQueueBackend {
    queue: [CanFrame; QUEUE_CAPACITY],
    head: usize,
    tail: usize,
    count: usize,
    open: bool,
}

impl LocalQueueBackend {
    /// A closed, empty queue. Call [`CanBackend::init`] before use.
    pub const fn new() -> Self {
        Self {
            queue: [EMPTY_FRAME; QUEUE_CAPACITY],
            head: 0,
            tail: 0,
            count: 0,
            open: false,
        }
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no frame is queued.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for LocalQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CanBackend for LocalQueueBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        if self.open {
            return Err(BackendError::AlreadyOpen);
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.open = true;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }
        if self.count >= QUEUE_CAPACITY {
            return Err(BackendError::Backpressure);
        }
        self.queue[self.tail] = *frame;
        self.tail = (self.tail + 1) % QUEUE_CAPACITY;
        self.count += 1;
        Ok(())
    }

    fn receive(&mut self, _timeout_ms: u32) -> Result<CanFrame, BackendError> {
        // Timeouts are ignored: this backend exists for deterministic unit
        // tests and never waits.
        if !self.open {
            return Err(BackendError::NotOpen);
        }
        if self.count == 0 {
            return Err(BackendError::Empty);
        }
        let frame = self.queue[self.head];
        self.head = (self.head + 1) % QUEUE_CAPACITY;
        self.count -= 1;
        Ok(frame)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.open = false;
        Ok(())
    }
}
