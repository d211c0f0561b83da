//! Test doubles shared by the in-module unit tests.
use crate::error::BackendError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::can_backend::CanBackend;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Shared state of a [`ScriptedBackend`].
#[derive(Debug, Default)]
pub struct ScriptedState {
    /// Every frame the context sent, in order.
    pub sent: Vec<CanFrame>,
    /// Frames the next `receive` calls will yield.
    pub incoming: VecDeque<CanFrame>,
}

/// Backend test double: records sent frames and replays scripted incoming
/// frames. The state handle stays with the test for inspection.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    state: Rc<RefCell<ScriptedState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the context to receive.
    pub fn push_incoming(&self, frame: CanFrame) {
        self.state.borrow_mut().incoming.push_back(frame);
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<CanFrame> {
        self.state.borrow().sent.clone()
    }
}

impl CanBackend for ScriptedBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError> {
        self.state.borrow_mut().sent.push(*frame);
        Ok(())
    }

    fn receive(&mut self, _timeout_ms: u32) -> Result<CanFrame, BackendError> {
        self.state
            .borrow_mut()
            .incoming
            .pop_front()
            .ok_or(BackendError::Timeout)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}
