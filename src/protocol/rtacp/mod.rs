//! Real Time Artie CAN Protocol (RTACP): unicast and broadcast short
//! messages with optional acknowledgement, for traffic with strict delivery
//! deadlines.
//!
//! Identifier layout (29 bits, msb first):
//! - bits 28-26: protocol class (`000`)
//! - bit 25: frame kind (0 = ACK, 1 = MSG)
//! - bits 24-23: priority
//! - bits 21-16: sender address
//! - bits 15-10: target address
//! - bits 9-0: all ones
//!
//! The payload travels verbatim (no stuffing, no CRC — the CAN native CRC
//! covers eight bytes fine); loss detection is the ACK timeout.
use crate::core::CanContext;
use crate::error::ProtocolError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{CanId, Priority, ProtocolClass};
use crate::protocol::transport::traits::can_backend::CanBackend;
use crate::protocol::transport::{
    BROADCAST_ADDRESS, MAX_DATA_SIZE, MAX_NODE_ADDRESS, RTACP_ACK_TIMEOUT_MS,
};
use log::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// RTACP frame kind, bit 25 of the identifier.
pub enum RtacpKind {
    /// Acknowledgement echoing a received payload.
    Ack,
    /// Application message.
    Msg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A real-time message as handed to or received from the bus.
pub struct RtacpMessage {
    /// Arbitration priority.
    pub priority: Priority,
    /// Sending node.
    pub sender: u8,
    /// Receiving node, or [`BROADCAST_ADDRESS`].
    pub target: u8,
    /// MSG or ACK.
    pub kind: RtacpKind,
    /// Payload bytes; only the first `data_len` are meaningful.
    pub data: [u8; MAX_DATA_SIZE],
    /// Valid payload length (0 to 8).
    pub data_len: u8,
}

impl RtacpMessage {
    /// A MSG frame carrying `payload`. Validates the six-bit addresses and
    /// the eight-byte payload bound.
    pub fn new(
        priority: Priority,
        sender: u8,
        target: u8,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        if sender > MAX_NODE_ADDRESS
            || target > MAX_NODE_ADDRESS
            || payload.len() > MAX_DATA_SIZE
        {
            return Err(ProtocolError::InvalidArgument);
        }
        let mut data = [0u8; MAX_DATA_SIZE];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            priority,
            sender,
            target,
            kind: RtacpKind::Msg,
            data,
            data_len: payload.len() as u8,
        })
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.data_len).min(MAX_DATA_SIZE)]
    }

    fn pack_id(&self) -> CanId {
        let kind = match self.kind {
            RtacpKind::Ack => 0u32,
            RtacpKind::Msg => 1,
        };
        CanId(
            (u32::from(ProtocolClass::Rtacp.bits()) << 26)
                | (kind << 25)
                | (u32::from(self.priority.bits()) << 23)
                | (u32::from(self.sender & MAX_NODE_ADDRESS) << 16)
                | (u32::from(self.target & MAX_NODE_ADDRESS) << 10)
                | 0x3FF,
        )
    }

    fn to_frame(&self) -> CanFrame {
        CanFrame::extended(self.pack_id(), self.payload())
    }

    fn from_frame(frame: &CanFrame) -> Result<Self, ProtocolError> {
        if usize::from(frame.dlc) > MAX_DATA_SIZE {
            return Err(ProtocolError::InvalidFrame);
        }
        let id = frame.id.0;
        Ok(Self {
            kind: if id & (1 << 25) != 0 {
                RtacpKind::Msg
            } else {
                RtacpKind::Ack
            },
            priority: Priority::from_bits(((id >> 23) & 0x03) as u8),
            sender: ((id >> 16) & 0x3F) as u8,
            target: ((id >> 10) & 0x3F) as u8,
            data: frame.data,
            data_len: frame.dlc,
        })
    }
}

impl<B: CanBackend> CanContext<B> {
    /// Send a real-time message.
    ///
    /// For a targeted MSG with `wait_ack` set, waits for the matching
    /// acknowledgement: an ACK frame whose sender is our target, whose target
    /// is this node, and whose payload echoes ours. Non-matching traffic
    /// re-arms the 1 ms window; a quiet bus fails the send with
    /// [`ProtocolError::Timeout`] and retry policy stays with the caller.
    /// `wait_ack` is silently ignored for broadcast and for ACK frames.
    pub fn rtacp_send(&mut self, msg: &RtacpMessage, wait_ack: bool) -> Result<(), ProtocolError> {
        if usize::from(msg.data_len) > MAX_DATA_SIZE
            || msg.sender > MAX_NODE_ADDRESS
            || msg.target > MAX_NODE_ADDRESS
        {
            return Err(ProtocolError::InvalidArgument);
        }
        self.send_frame(&msg.to_frame())?;

        if !(wait_ack && msg.kind == RtacpKind::Msg && msg.target != BROADCAST_ADDRESS) {
            return Ok(());
        }

        loop {
            let ack = self.rtacp_receive(RTACP_ACK_TIMEOUT_MS)?;
            if ack.kind == RtacpKind::Ack
                && ack.sender == msg.target
                && ack.target == self.node_address()
                && ack.payload() == msg.payload()
            {
                return Ok(());
            }
            // Anything else is unrelated bus traffic; keep waiting.
        }
    }

    /// Receive the next real-time message, draining frames of other
    /// protocols. A MSG targeted at this node is acknowledged automatically
    /// (same priority, payload echoed, addresses swapped); ACKs are never
    /// acknowledged, and broadcast MSGs are delivered without one.
    pub fn rtacp_receive(&mut self, timeout_ms: u32) -> Result<RtacpMessage, ProtocolError> {
        loop {
            let frame = self.next_frame(timeout_ms)?;
            if frame.id.protocol() != Some(ProtocolClass::Rtacp) {
                continue;
            }
            let msg = RtacpMessage::from_frame(&frame)?;

            if msg.kind == RtacpKind::Msg && msg.target == self.node_address() {
                let ack = RtacpMessage {
                    kind: RtacpKind::Ack,
                    priority: msg.priority,
                    sender: self.node_address(),
                    target: msg.sender,
                    data: msg.data,
                    data_len: msg.data_len,
                };
                if let Err(err) = self.send_frame(&ack.to_frame()) {
                    // The message still gets delivered; the peer's ACK wait
                    // will expire and it can resend.
                    warn!("rtacp: ack transmission failed: {err:?}");
                }
            }
            return Ok(msg);
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
