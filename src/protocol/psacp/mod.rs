//! Pub/Sub Artie CAN Protocol (PSACP): topic-addressed one-to-many messages
//! at two protocol-priority tiers. The high tier competes with RTACP for the
//! bus; the low tier yields to block writes.
//!
//! Identifier layout (29 bits, msb first):
//! - bits 28-26: protocol class (`100` high tier, `110` low tier)
//! - bits 25-22: frame kind (1 = PUB, 3 = DATA)
//! - bits 21-20: priority
//! - bits 19-14: sender address
//! - bits 13-6: topic
//! - bits 5-0: all ones
//!
//! A PUB frame opens with a CRC16 over the stuffed payload, then stuffed
//! bytes; DATA frames continue the stuffed stream. Topic filtering is the
//! caller's concern — this layer keeps no subscription registry.
use crate::core::CanContext;
use crate::error::ProtocolError;
use crate::infra::codec::crc::crc16;
use crate::infra::codec::stuffing::{stuff, unstuff, StreamStatus, StreamTracker, MAX_STUFFED_PAYLOAD};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{CanId, Priority, ProtocolClass};
use crate::protocol::transport::traits::can_backend::CanBackend;
use crate::protocol::transport::{MAX_DATA_SIZE, MAX_NODE_ADDRESS, MAX_PUBSUB_PAYLOAD};
use log::{trace, warn};

/// Topic addressing every subscriber.
pub const TOPIC_BROADCAST: u8 = 0x00;
/// First normal topic value.
pub const TOPIC_MIN: u8 = 0x0B;
/// Last normal topic value.
pub const TOPIC_MAX: u8 = 0xF4;

/// Reassembly slots for interleaved publications.
const STREAM_SLOTS: usize = 4;

/// Bytes of the PUB frame taken by the CRC16.
const PUB_OVERHEAD: usize = 2;

const KIND_PUB: u8 = 1;
const KIND_DATA: u8 = 3;

/// True for the broadcast topic and the normal range; everything else is
/// reserved.
pub fn topic_is_valid(topic: u8) -> bool {
    topic == TOPIC_BROADCAST || (TOPIC_MIN..=TOPIC_MAX).contains(&topic)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A received publication with its reassembled, unstuffed payload.
pub struct PsacpMessage {
    /// Topic byte, opaque to this layer.
    pub topic: u8,
    /// Arbitration priority within the tier.
    pub priority: Priority,
    /// Publishing node.
    pub sender: u8,
    /// True when carried on the high-priority protocol tier.
    pub high_priority: bool,
    payload: [u8; MAX_PUBSUB_PAYLOAD],
    payload_len: usize,
}

impl PsacpMessage {
    /// The unstuffed payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }
}

//==================================================================================ID_CODEC

#[derive(Clone, Copy, Debug)]
struct PsacpHead {
    high_priority: bool,
    kind: u8,
    priority: Priority,
    sender: u8,
    topic: u8,
}

fn pack_id(high_priority: bool, kind: u8, priority: Priority, sender: u8, topic: u8) -> CanId {
    let class = if high_priority {
        ProtocolClass::PsacpHigh
    } else {
        ProtocolClass::PsacpLow
    };
    CanId(
        (u32::from(class.bits()) << 26)
            | (u32::from(kind & 0x0F) << 22)
            | (u32::from(priority.bits()) << 20)
            | (u32::from(sender & MAX_NODE_ADDRESS) << 14)
            | (u32::from(topic) << 6)
            | 0x3F,
    )
}

fn parse_head(id: CanId, class: ProtocolClass) -> PsacpHead {
    let raw = id.0;
    PsacpHead {
        high_priority: class == ProtocolClass::PsacpHigh,
        kind: ((raw >> 22) & 0x0F) as u8,
        priority: Priority::from_bits(((raw >> 20) & 0x03) as u8),
        sender: ((raw >> 14) & 0x3F) as u8,
        topic: ((raw >> 6) & 0xFF) as u8,
    }
}

//==================================================================================STREAMS

/// One in-flight publication being reassembled.
#[derive(Clone, Copy)]
struct PubStream {
    active: bool,
    high_priority: bool,
    sender: u8,
    topic: u8,
    priority: Priority,
    crc: u16,
    tracker: StreamTracker,
    buf: [u8; MAX_STUFFED_PAYLOAD],
    fill: usize,
}

impl PubStream {
    const fn idle() -> Self {
        Self {
            active: false,
            high_priority: false,
            sender: 0,
            topic: 0,
            priority: Priority::Low,
            crc: 0,
            tracker: StreamTracker::new(),
            buf: [0; MAX_STUFFED_PAYLOAD],
            fill: 0,
        }
    }

    fn matches(&self, head: &PsacpHead) -> bool {
        self.active
            && self.high_priority == head.high_priority
            && self.sender == head.sender
            && self.topic == head.topic
    }

    fn push(&mut self, bytes: &[u8]) -> Result<bool, ProtocolError> {
        if self.fill + bytes.len() > MAX_STUFFED_PAYLOAD {
            return Err(ProtocolError::InvalidFrame);
        }
        let status = self.tracker.feed(bytes)?;
        let consumed = match status {
            StreamStatus::Continue => bytes.len(),
            StreamStatus::Complete { consumed } => consumed,
        };
        self.buf[self.fill..self.fill + consumed].copy_from_slice(&bytes[..consumed]);
        self.fill += consumed;
        Ok(matches!(status, StreamStatus::Complete { .. }))
    }

    fn finish(&self) -> Result<PsacpMessage, ProtocolError> {
        let stuffed = &self.buf[..self.fill];
        let computed = crc16(stuffed);
        if computed != self.crc {
            warn!(
                "psacp: crc mismatch on topic {:#04x} from {:#04x}",
                self.topic, self.sender
            );
            return Err(ProtocolError::CrcMismatch);
        }

        let mut message = PsacpMessage {
            topic: self.topic,
            priority: self.priority,
            sender: self.sender,
            high_priority: self.high_priority,
            payload: [0; MAX_PUBSUB_PAYLOAD],
            payload_len: 0,
        };
        if !stuffed.is_empty() {
            message.payload_len = unstuff(stuffed, &mut message.payload)?;
        }
        Ok(message)
    }
}

/// Fixed pool of reassembly slots, keyed by (tier, sender, topic).
pub(crate) struct PubStreams {
    slots: [PubStream; STREAM_SLOTS],
}

impl core::fmt::Debug for PubStreams {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let active = self.slots.iter().filter(|slot| slot.active).count();
        f.debug_struct("PubStreams").field("active", &active).finish()
    }
}

impl PubStreams {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [PubStream::idle(); STREAM_SLOTS],
        }
    }

    fn begin(
        &mut self,
        head: PsacpHead,
        crc: u16,
        initial: &[u8],
    ) -> Result<Option<PsacpMessage>, ProtocolError> {
        let mut stream = PubStream {
            active: true,
            high_priority: head.high_priority,
            sender: head.sender,
            topic: head.topic,
            priority: head.priority,
            crc,
            ..PubStream::idle()
        };

        let complete = initial.is_empty() || stream.push(initial)?;
        if complete {
            return stream.finish().map(Some);
        }

        // A fresh PUB supersedes the previous stream for the same key.
        let reuse = self.slots.iter().position(|slot| slot.matches(&head));
        let free = reuse.or_else(|| self.slots.iter().position(|slot| !slot.active));
        match free {
            Some(index) => {
                self.slots[index] = stream;
                Ok(None)
            }
            None => Err(ProtocolError::TooManyStreams),
        }
    }

    fn append(
        &mut self,
        head: PsacpHead,
        bytes: &[u8],
    ) -> Result<Option<PsacpMessage>, ProtocolError> {
        let Some(index) = self.slots.iter().position(|slot| slot.matches(&head)) else {
            trace!(
                "psacp: continuation without a stream, topic {:#04x}",
                head.topic
            );
            return Ok(None);
        };

        let slot = &mut self.slots[index];
        match slot.push(bytes) {
            Ok(true) => {
                let result = slot.finish();
                slot.active = false;
                result.map(Some)
            }
            Ok(false) => Ok(None),
            Err(err) => {
                slot.active = false;
                Err(err)
            }
        }
    }
}

//==================================================================================CONTEXT_API

impl<B: CanBackend> CanContext<B> {
    /// Publish `payload` on `topic`, choosing the protocol tier with
    /// `high_priority`. Emits one PUB frame (CRC16 then stuffed bytes) and as
    /// many DATA frames as the stuffed stream needs.
    pub fn psacp_publish(
        &mut self,
        topic: u8,
        priority: Priority,
        high_priority: bool,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        if !topic_is_valid(topic) || payload.len() > MAX_PUBSUB_PAYLOAD {
            return Err(ProtocolError::InvalidArgument);
        }

        let mut stuffed = [0u8; MAX_STUFFED_PAYLOAD];
        let stuffed_len = if payload.is_empty() {
            0
        } else {
            stuff(payload, &mut stuffed)?
        };
        let stuffed = &stuffed[..stuffed_len];
        let crc = crc16(stuffed);

        let mut first = [0u8; MAX_DATA_SIZE];
        first[..PUB_OVERHEAD].copy_from_slice(&crc.to_be_bytes());
        let first_chunk = stuffed.len().min(MAX_DATA_SIZE - PUB_OVERHEAD);
        first[PUB_OVERHEAD..PUB_OVERHEAD + first_chunk].copy_from_slice(&stuffed[..first_chunk]);

        let sender = self.node_address();
        let pub_id = pack_id(high_priority, KIND_PUB, priority, sender, topic);
        self.send_frame(&CanFrame {
            id: pub_id,
            dlc: (PUB_OVERHEAD + first_chunk) as u8,
            data: first,
            extended: true,
        })?;

        let data_id = pack_id(high_priority, KIND_DATA, priority, sender, topic);
        for chunk in stuffed[first_chunk..].chunks(MAX_DATA_SIZE) {
            self.send_frame(&CanFrame::extended(data_id, chunk))?;
        }
        Ok(())
    }

    /// Receive the next publication from either tier, reassembling its
    /// stuffed stream across DATA frames and verifying the CRC.
    pub fn psacp_receive(&mut self, timeout_ms: u32) -> Result<PsacpMessage, ProtocolError> {
        loop {
            let frame = self.next_frame(timeout_ms)?;
            let class = match frame.id.protocol() {
                Some(class @ (ProtocolClass::PsacpHigh | ProtocolClass::PsacpLow)) => class,
                _ => continue,
            };
            let head = parse_head(frame.id, class);
            if !topic_is_valid(head.topic) {
                trace!("psacp: dropping frame with reserved topic {:#04x}", head.topic);
                continue;
            }

            match head.kind {
                KIND_PUB => {
                    if usize::from(frame.dlc) < PUB_OVERHEAD {
                        return Err(ProtocolError::InvalidFrame);
                    }
                    let crc = u16::from_be_bytes([frame.data[0], frame.data[1]]);
                    let initial = &frame.payload()[PUB_OVERHEAD..];
                    if let Some(message) = self.pub_streams.begin(head, crc, initial)? {
                        return Ok(message);
                    }
                }
                KIND_DATA => {
                    if let Some(message) = self.pub_streams.append(head, frame.payload())? {
                        return Ok(message);
                    }
                }
                other => {
                    trace!("psacp: dropping frame with unknown kind {other}");
                }
            }
        }
    }
}
