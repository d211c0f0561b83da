//! Block Write Artie CAN Protocol (BWACP): large one-way block transfers
//! announced by a READY frame, streamed in DATA frames, and repaired with
//! REPEAT requests.
//!
//! Identifier layout (29 bits, msb first):
//! - bits 28-26: protocol class (`101`)
//! - bits 25-22: frame kind (1 = REPEAT, 3 = READY, 7 = DATA)
//! - bits 21-20: priority
//! - bits 19-14: sender address
//! - bits 13-8: target address
//! - bits 7-2: class mask (multicast target `0x3F` selects receiver classes)
//! - bit 1: READY interrupt flag / REPEAT repeat-all flag / DATA repeat marker
//! - bit 0: DATA parity bit (toggles per frame from 0); 1 for READY, 0 for REPEAT
//!
//! READY carries CRC24(address ‖ stuffed payload), the 32-bit
//! application-defined address, and at most one leading stuffed byte. CRC
//! verification on the reassembled block is the receiver's responsibility;
//! [`BlockAssembler`] implements it.
use crate::core::CanContext;
use crate::error::ProtocolError;
use crate::infra::codec::crc::Crc24;
use crate::infra::codec::stuffing::{stuff, unstuff, StreamStatus, StreamTracker, MAX_STUFFED_PAYLOAD};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{CanId, Priority, ProtocolClass};
use crate::protocol::transport::traits::can_backend::CanBackend;
use crate::protocol::transport::{MAX_DATA_SIZE, MAX_NODE_ADDRESS};
use log::{trace, warn};

/// Receiver classes selected by the class mask under multicast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverClass {
    /// Single-board computers.
    Sbc = 0,
    /// Microcontrollers.
    Mcu = 1,
    /// Sensor nodes.
    Sensor = 2,
    /// Motor controllers.
    Motor = 3,
    /// Reserved.
    Reserved4 = 4,
    /// Reserved.
    Reserved5 = 5,
}

impl ReceiverClass {
    /// The class-mask bit selecting this receiver class.
    pub fn mask_bit(self) -> u8 {
        1 << (self as u8)
    }
}

const KIND_REPEAT: u8 = 1;
const KIND_READY: u8 = 3;
const KIND_DATA: u8 = 7;

/// Bytes of the READY frame taken by the CRC24 and the address.
const READY_OVERHEAD: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A decoded BWACP frame as surfaced by [`CanContext::bwacp_receive`].
pub enum BwacpMessage {
    /// Announcement of a block transfer.
    Ready {
        /// Sending node.
        sender: u8,
        /// Target node or the multicast address.
        target: u8,
        /// Receiver classes under multicast.
        class_mask: u8,
        /// Arbitration priority.
        priority: Priority,
        /// Abort any transfer in progress and restart with this one.
        interrupt: bool,
        /// CRC24 over (address ‖ stuffed payload).
        crc24: u32,
        /// Application-defined 32-bit address.
        address: u32,
        /// The leading stuffed byte, when the block has payload.
        initial: Option<u8>,
    },
    /// Stuffed-stream continuation.
    Data {
        /// Sending node.
        sender: u8,
        /// Target node or the multicast address.
        target: u8,
        /// Receiver classes under multicast.
        class_mask: u8,
        /// Arbitration priority.
        priority: Priority,
        /// Frame is a retransmission.
        repeat: bool,
        /// Alternates per frame, starting at 0; catches single lost frames.
        parity: bool,
        /// Stuffed payload bytes.
        data: [u8; MAX_DATA_SIZE],
        /// Valid byte count.
        len: u8,
    },
    /// Retransmission request from the receiver.
    Repeat {
        /// Requesting node.
        sender: u8,
        /// The block sender being asked to retransmit.
        target: u8,
        /// Arbitration priority.
        priority: Priority,
        /// True to resend the whole sequence, false for the last frame.
        repeat_all: bool,
    },
}

impl BwacpMessage {
    /// Stuffed payload bytes of a DATA frame; empty for other kinds.
    pub fn data_payload(&self) -> &[u8] {
        match self {
            Self::Data { data, len, .. } => &data[..usize::from(*len).min(MAX_DATA_SIZE)],
            _ => &[],
        }
    }
}

//==================================================================================ID_CODEC

#[allow(clippy::too_many_arguments)]
fn pack_id(
    kind: u8,
    priority: Priority,
    sender: u8,
    target: u8,
    class_mask: u8,
    bit1: bool,
    bit0: bool,
) -> CanId {
    CanId(
        (u32::from(ProtocolClass::Bwacp.bits()) << 26)
            | (u32::from(kind & 0x0F) << 22)
            | (u32::from(priority.bits()) << 20)
            | (u32::from(sender & MAX_NODE_ADDRESS) << 14)
            | (u32::from(target & MAX_NODE_ADDRESS) << 8)
            | (u32::from(class_mask & 0x3F) << 2)
            | (u32::from(bit1) << 1)
            | u32::from(bit0),
    )
}

//==================================================================================CONTEXT_API

impl<B: CanBackend> CanContext<B> {
    /// Announce a block write: READY frame with CRC24 and address, then DATA
    /// frames carrying the rest of the stuffed payload.
    ///
    /// Multicast is `target == 0x3F` with `class_mask` selecting receiver
    /// classes. `interrupt` tells receivers to abandon any transfer already
    /// in progress.
    pub fn bwacp_send_ready(
        &mut self,
        target: u8,
        class_mask: u8,
        priority: Priority,
        address: u32,
        payload: &[u8],
        interrupt: bool,
    ) -> Result<(), ProtocolError> {
        if target > MAX_NODE_ADDRESS || payload.len() > MAX_STUFFED_PAYLOAD {
            return Err(ProtocolError::InvalidArgument);
        }

        let mut stuffed = [0u8; MAX_STUFFED_PAYLOAD];
        let stuffed_len = if payload.is_empty() {
            0
        } else {
            stuff(payload, &mut stuffed)?
        };
        let stuffed = &stuffed[..stuffed_len];

        let crc24 = Crc24::new()
            .update(&address.to_be_bytes())
            .update(stuffed)
            .finish();

        let mut first = [0u8; MAX_DATA_SIZE];
        first[0] = (crc24 >> 16) as u8;
        first[1] = (crc24 >> 8) as u8;
        first[2] = crc24 as u8;
        first[3..READY_OVERHEAD].copy_from_slice(&address.to_be_bytes());
        let dlc = if stuffed.is_empty() {
            READY_OVERHEAD
        } else {
            first[READY_OVERHEAD] = stuffed[0];
            READY_OVERHEAD + 1
        };

        let id = pack_id(
            KIND_READY,
            priority,
            self.node_address(),
            target,
            class_mask,
            interrupt,
            true,
        );
        self.send_frame(&CanFrame {
            id,
            dlc: dlc as u8,
            data: first,
            extended: true,
        })?;

        if stuffed.len() > 1 {
            self.bwacp_send_data(target, class_mask, priority, &stuffed[1..])?;
        }
        Ok(())
    }

    /// Stream already-stuffed continuation bytes as DATA frames, toggling
    /// the parity bit per frame starting from 0.
    pub fn bwacp_send_data(
        &mut self,
        target: u8,
        class_mask: u8,
        priority: Priority,
        stuffed: &[u8],
    ) -> Result<(), ProtocolError> {
        if target > MAX_NODE_ADDRESS {
            return Err(ProtocolError::InvalidArgument);
        }
        let mut parity = false;
        for chunk in stuffed.chunks(MAX_DATA_SIZE) {
            let id = pack_id(
                KIND_DATA,
                priority,
                self.node_address(),
                target,
                class_mask,
                false,
                parity,
            );
            self.send_frame(&CanFrame::extended(id, chunk))?;
            parity = !parity;
        }
        Ok(())
    }

    /// Ask a block sender for a retransmission: the whole sequence
    /// (`repeat_all`) or just the last frame.
    pub fn bwacp_send_repeat(
        &mut self,
        target: u8,
        priority: Priority,
        repeat_all: bool,
    ) -> Result<(), ProtocolError> {
        if target > MAX_NODE_ADDRESS {
            return Err(ProtocolError::InvalidArgument);
        }
        let id = pack_id(
            KIND_REPEAT,
            priority,
            self.node_address(),
            target,
            0,
            repeat_all,
            false,
        );
        self.send_frame(&CanFrame::extended(id, &[]))
    }

    /// Receive the next BWACP frame, decoded. Block reassembly and CRC
    /// verification stay with the caller; feed the decoded frames to a
    /// [`BlockAssembler`].
    pub fn bwacp_receive(&mut self, timeout_ms: u32) -> Result<BwacpMessage, ProtocolError> {
        loop {
            let frame = self.next_frame(timeout_ms)?;
            if frame.id.protocol() != Some(ProtocolClass::Bwacp) {
                continue;
            }
            let raw = frame.id.0;
            let kind = ((raw >> 22) & 0x0F) as u8;
            let priority = Priority::from_bits(((raw >> 20) & 0x03) as u8);
            let sender = ((raw >> 14) & 0x3F) as u8;
            let target = ((raw >> 8) & 0x3F) as u8;
            let class_mask = ((raw >> 2) & 0x3F) as u8;
            let bit1 = raw & 0x02 != 0;
            let bit0 = raw & 0x01 != 0;

            match kind {
                KIND_REPEAT => {
                    return Ok(BwacpMessage::Repeat {
                        sender,
                        target,
                        priority,
                        repeat_all: bit1,
                    })
                }
                KIND_READY => {
                    if usize::from(frame.dlc) < READY_OVERHEAD {
                        return Err(ProtocolError::InvalidFrame);
                    }
                    let crc24 = (u32::from(frame.data[0]) << 16)
                        | (u32::from(frame.data[1]) << 8)
                        | u32::from(frame.data[2]);
                    let mut address = [0u8; 4];
                    address.copy_from_slice(&frame.data[3..READY_OVERHEAD]);
                    return Ok(BwacpMessage::Ready {
                        sender,
                        target,
                        class_mask,
                        priority,
                        interrupt: bit1,
                        crc24,
                        address: u32::from_be_bytes(address),
                        initial: (usize::from(frame.dlc) > READY_OVERHEAD)
                            .then(|| frame.data[READY_OVERHEAD]),
                    });
                }
                KIND_DATA => {
                    return Ok(BwacpMessage::Data {
                        sender,
                        target,
                        class_mask,
                        priority,
                        repeat: bit1,
                        parity: bit0,
                        data: frame.data,
                        len: frame.dlc,
                    })
                }
                other => {
                    trace!("bwacp: dropping frame with unknown kind {other}");
                }
            }
        }
    }
}

//==================================================================================BLOCK_ASSEMBLER

/// A delivered block: the application address and the unstuffed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockWrite {
    /// Node the block came from.
    pub sender: u8,
    /// Application-defined 32-bit address from the READY frame.
    pub address: u32,
    payload: [u8; MAX_STUFFED_PAYLOAD],
    payload_len: usize,
}

impl BlockWrite {
    /// The unstuffed block bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }
}

/// Progress report from [`BlockAssembler::process`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockProgress {
    /// Frame did not belong to the active transfer and was dropped.
    Ignored,
    /// Frame consumed; the block is still incomplete.
    InProgress,
    /// The peer asked for a retransmission (this side is the block sender).
    RepeatRequested {
        /// Whole sequence vs. last frame.
        repeat_all: bool,
    },
    /// The stuffed stream closed and the CRC24 checked out.
    Complete(BlockWrite),
}

/// Receive-side state machine for one block transfer at a time.
///
/// IDLE until a READY starts a transfer; DATA frames append under
/// parity-toggle checking; a READY with the interrupt flag restarts; the
/// transfer completes when the stuffed stream closes and CRC24 over
/// (address ‖ stuffed payload) matches the READY announcement.
///
/// A parity mismatch reports [`ProtocolError::InvalidFrame`] and keeps the
/// transfer open so the caller can send a last-frame REPEAT and resume; a
/// CRC failure reports [`ProtocolError::CrcMismatch`] and resets to IDLE so
/// the caller can request the whole block again.
#[derive(Clone, Copy)]
pub struct BlockAssembler {
    active: bool,
    sender: u8,
    address: u32,
    crc24: u32,
    expected_parity: bool,
    tracker: StreamTracker,
    buf: [u8; MAX_STUFFED_PAYLOAD],
    fill: usize,
}

impl core::fmt::Debug for BlockAssembler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockAssembler")
            .field("active", &self.active)
            .field("sender", &self.sender)
            .field("fill", &self.fill)
            .finish()
    }
}

impl BlockAssembler {
    /// An idle assembler.
    pub const fn new() -> Self {
        Self {
            active: false,
            sender: 0,
            address: 0,
            crc24: 0,
            expected_parity: false,
            tracker: StreamTracker::new(),
            buf: [0; MAX_STUFFED_PAYLOAD],
            fill: 0,
        }
    }

    /// True while a transfer is in progress.
    pub fn in_progress(&self) -> bool {
        self.active
    }

    fn reset(&mut self) {
        self.active = false;
        self.tracker = StreamTracker::new();
        self.fill = 0;
        self.expected_parity = false;
    }

    fn push(&mut self, bytes: &[u8]) -> Result<bool, ProtocolError> {
        if self.fill + bytes.len() > MAX_STUFFED_PAYLOAD {
            self.reset();
            return Err(ProtocolError::InvalidFrame);
        }
        let status = match self.tracker.feed(bytes) {
            Ok(status) => status,
            Err(err) => {
                self.reset();
                return Err(err.into());
            }
        };
        let consumed = match status {
            StreamStatus::Continue => bytes.len(),
            StreamStatus::Complete { consumed } => consumed,
        };
        self.buf[self.fill..self.fill + consumed].copy_from_slice(&bytes[..consumed]);
        self.fill += consumed;
        Ok(matches!(status, StreamStatus::Complete { .. }))
    }

    fn finish(&mut self) -> Result<BlockProgress, ProtocolError> {
        let stuffed = &self.buf[..self.fill];
        let computed = Crc24::new()
            .update(&self.address.to_be_bytes())
            .update(stuffed)
            .finish();
        if computed != self.crc24 {
            warn!(
                "bwacp: crc mismatch on block from {:#04x} at {:#010x}",
                self.sender, self.address
            );
            self.reset();
            return Err(ProtocolError::CrcMismatch);
        }

        let mut block = BlockWrite {
            sender: self.sender,
            address: self.address,
            payload: [0; MAX_STUFFED_PAYLOAD],
            payload_len: 0,
        };
        let result = if stuffed.is_empty() {
            Ok(0)
        } else {
            unstuff(stuffed, &mut block.payload)
        };
        match result {
            Ok(len) => {
                block.payload_len = len;
                self.reset();
                Ok(BlockProgress::Complete(block))
            }
            Err(err) => {
                self.reset();
                Err(err.into())
            }
        }
    }

    /// Drive the state machine with one decoded BWACP frame.
    pub fn process(&mut self, message: &BwacpMessage) -> Result<BlockProgress, ProtocolError> {
        match message {
            BwacpMessage::Ready {
                sender,
                interrupt,
                crc24,
                address,
                initial,
                ..
            } => {
                if self.active && !interrupt {
                    // Overlapping announcement; the active transfer wins.
                    return Ok(BlockProgress::Ignored);
                }
                self.reset();
                self.active = true;
                self.sender = *sender;
                self.address = *address;
                self.crc24 = *crc24;

                match initial {
                    None => self.finish(),
                    Some(byte) => {
                        if self.push(&[*byte])? {
                            self.finish()
                        } else {
                            Ok(BlockProgress::InProgress)
                        }
                    }
                }
            }
            BwacpMessage::Data { sender, parity, .. } => {
                if !self.active || *sender != self.sender {
                    return Ok(BlockProgress::Ignored);
                }
                if *parity != self.expected_parity {
                    // One frame went missing; the transfer stays open so a
                    // last-frame REPEAT can fill the gap.
                    return Err(ProtocolError::InvalidFrame);
                }
                self.expected_parity = !self.expected_parity;
                if self.push(message.data_payload())? {
                    self.finish()
                } else {
                    Ok(BlockProgress::InProgress)
                }
            }
            BwacpMessage::Repeat { repeat_all, .. } => Ok(BlockProgress::RepeatRequested {
                repeat_all: *repeat_all,
            }),
        }
    }
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new()
    }
}
