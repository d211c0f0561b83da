//! Remote Procedure Call Artie CAN Protocol (RPCACP): synchronous and
//! asynchronous calls with explicit ACK/NACK and an eight-bit nonce
//! correlating every frame of one exchange.
//!
//! Identifier layout (29 bits, msb first):
//! - bits 28-26: protocol class (`010`)
//! - bits 25-22: frame kind
//! - bits 21-20: priority
//! - bits 19-14: sender address
//! - bits 13-8: target address
//! - bits 7-0: nonce
//!
//! StartRPC/StartReturn frames open with a header byte (bit 7 = synchronous,
//! bits 6-0 = procedure id) and a CRC16 over (header ‖ stuffed payload);
//! continuation frames carry pure stuffed payload. Broadcast targets are
//! forbidden: RPC is unicast only.
use crate::core::CanContext;
use crate::error::ProtocolError;
use crate::infra::codec::crc::Crc16;
use crate::infra::codec::stuffing::{stuff, unstuff, StreamStatus, StreamTracker, MAX_STUFFED_PAYLOAD};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::{CanId, Priority, ProtocolClass};
use crate::protocol::transport::traits::can_backend::CanBackend;
use crate::protocol::transport::{
    BROADCAST_ADDRESS, MAX_DATA_SIZE, MAX_NODE_ADDRESS, MAX_RPC_PAYLOAD, RPC_RESPONSE_TIMEOUT_MS,
};
use log::{trace, warn};
#[cfg(target_has_atomic = "8")]
use core::sync::atomic::{AtomicU8, Ordering};

/// Errno-style codes carried on the NACK wire byte.
pub mod nack_code {
    /// Operation not permitted.
    pub const PERM: u8 = 0x01;
    /// Argument list too long.
    pub const E2BIG: u8 = 0x07;
    /// Procedure not executable.
    pub const NOEXEC: u8 = 0x08;
    /// Resource temporarily unavailable; retry later.
    pub const AGAIN: u8 = 0x0B;
    /// Invalid argument.
    pub const INVAL: u8 = 0x16;
    /// Operation already in progress.
    pub const ALREADY: u8 = 0x72;
}

/// Highest procedure id (seven bits).
pub const MAX_PROCEDURE_ID: u8 = 0x7F;

/// Reassembly slots for interleaved exchanges.
const STREAM_SLOTS: usize = 4;

/// Bytes of the first frame taken by the header and CRC16.
const START_OVERHEAD: usize = 3;

//==================================================================================NONCE

#[cfg(target_has_atomic = "8")]
static NONCE_STATE: AtomicU8 = AtomicU8::new(1);

#[cfg(not(target_has_atomic = "8"))]
// Warning: this branch is only safe when the caller guarantees exclusive
// access (single-thread execution or interrupts disabled while calling). On
// MCUs without atomics, wrap RPC calls in a critical section if multiple
// contexts can emit concurrently.
static mut NONCE_STATE: u8 = 1;

/// Linear-congruential step over the eight-bit state, skipping zero (the
/// zero nonce is reserved to mean "unused"). The sequence only needs to be
/// collision-resistant across concurrent exchanges from one sender;
/// cryptographic quality is not a goal.
fn nonce_step(state: u8) -> u8 {
    match state.wrapping_mul(75).wrapping_add(74) {
        0 => 1,
        next => next,
    }
}

fn next_nonce() -> u8 {
    #[cfg(target_has_atomic = "8")]
    {
        let prev = NONCE_STATE
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |state| {
                Some(nonce_step(state))
            })
            .unwrap_or_else(|state| state);
        nonce_step(prev)
    }

    #[cfg(not(target_has_atomic = "8"))]
    unsafe {
        NONCE_STATE = nonce_step(NONCE_STATE);
        NONCE_STATE
    }
}

//==================================================================================TYPES

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// RPCACP frame kind, identifier bits 25-22.
pub enum RpcacpKind {
    /// The peer accepted the request.
    Ack,
    /// The peer refused; the frame carries one errno-style code byte.
    Nack,
    /// First frame of a request.
    StartRpc,
    /// First frame of a response.
    StartReturn,
    /// Request continuation (pure stuffed payload).
    TxData,
    /// Response continuation (pure stuffed payload).
    RxData,
}

impl RpcacpKind {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Ack),
            1 => Some(Self::Nack),
            2 => Some(Self::StartRpc),
            3 => Some(Self::StartReturn),
            4 => Some(Self::TxData),
            5 => Some(Self::RxData),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Ack => 0,
            Self::Nack => 1,
            Self::StartRpc => 2,
            Self::StartReturn => 3,
            Self::TxData => 4,
            Self::RxData => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Fixed-capacity RPC payload returned without exposing internal buffers.
pub struct RpcPayload {
    data: [u8; MAX_RPC_PAYLOAD],
    len: usize,
}

impl RpcPayload {
    /// The valid payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Valid payload length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A decoded RPCACP message as surfaced by [`CanContext::rpc_receive`].
pub enum RpcacpMessage {
    /// A peer's request to run a procedure on this node.
    Request {
        /// Calling node.
        sender: u8,
        /// Called node.
        target: u8,
        /// Arbitration priority of the exchange.
        priority: Priority,
        /// Exchange correlator; echo it in the ACK/NACK and the response.
        nonce: u8,
        /// True when the caller blocks on a return value.
        synchronous: bool,
        /// Procedure to invoke (0-127).
        procedure_id: u8,
        /// Unstuffed argument bytes.
        payload: RpcPayload,
    },
    /// A return value for a call this node made earlier.
    Response {
        /// Responding node.
        sender: u8,
        /// Original caller.
        target: u8,
        /// Arbitration priority of the exchange.
        priority: Priority,
        /// Correlator from the matching request.
        nonce: u8,
        /// Procedure that produced the value.
        procedure_id: u8,
        /// Unstuffed return bytes.
        payload: RpcPayload,
    },
    /// The peer accepted a request.
    Ack {
        /// Acknowledging node.
        sender: u8,
        /// Correlator from the request.
        nonce: u8,
    },
    /// The peer refused a request.
    Nack {
        /// Refusing node.
        sender: u8,
        /// Correlator from the request.
        nonce: u8,
        /// Errno-style wire code, carried opaquely.
        code: u8,
    },
}

//==================================================================================ID_CODEC

#[derive(Clone, Copy, Debug)]
struct RpcHead {
    kind: RpcacpKind,
    priority: Priority,
    sender: u8,
    target: u8,
    nonce: u8,
}

fn pack_id(kind: RpcacpKind, priority: Priority, sender: u8, target: u8, nonce: u8) -> CanId {
    CanId(
        (u32::from(ProtocolClass::Rpcacp.bits()) << 26)
            | (u32::from(kind.bits()) << 22)
            | (u32::from(priority.bits()) << 20)
            | (u32::from(sender & MAX_NODE_ADDRESS) << 14)
            | (u32::from(target & MAX_NODE_ADDRESS) << 8)
            | u32::from(nonce),
    )
}

fn parse_head(id: CanId) -> Option<RpcHead> {
    let raw = id.0;
    Some(RpcHead {
        kind: RpcacpKind::from_bits(((raw >> 22) & 0x0F) as u8)?,
        priority: Priority::from_bits(((raw >> 20) & 0x03) as u8),
        sender: ((raw >> 14) & 0x3F) as u8,
        target: ((raw >> 8) & 0x3F) as u8,
        nonce: (raw & 0xFF) as u8,
    })
}

//==================================================================================STREAMS

/// One in-flight multi-frame exchange.
#[derive(Clone, Copy)]
struct RpcStream {
    active: bool,
    sender: u8,
    target: u8,
    priority: Priority,
    nonce: u8,
    origin: RpcacpKind,
    header: u8,
    crc: u16,
    tracker: StreamTracker,
    buf: [u8; MAX_STUFFED_PAYLOAD],
    fill: usize,
}

impl RpcStream {
    const fn idle() -> Self {
        Self {
            active: false,
            sender: 0,
            target: 0,
            priority: Priority::Low,
            nonce: 0,
            origin: RpcacpKind::StartRpc,
            header: 0,
            crc: 0,
            tracker: StreamTracker::new(),
            buf: [0; MAX_STUFFED_PAYLOAD],
            fill: 0,
        }
    }

    fn matches(&self, head: &RpcHead, cont: RpcacpKind) -> bool {
        let expected_cont = match self.origin {
            RpcacpKind::StartRpc => RpcacpKind::TxData,
            _ => RpcacpKind::RxData,
        };
        self.active && cont == expected_cont && self.sender == head.sender && self.nonce == head.nonce
    }

    /// Buffer stuffed bytes, reporting whether the stream just closed.
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

    /// Verify the CRC over (header ‖ stuffed payload), unstuff, and build the
    /// outgoing message.
    fn finish(&self) -> Result<RpcacpMessage, ProtocolError> {
        let stuffed = &self.buf[..self.fill];
        let computed = Crc16::new().update(&[self.header]).update(stuffed).finish();
        if computed != self.crc {
            warn!(
                "rpcacp: crc mismatch on nonce {:#04x} (expected {:#06x}, computed {computed:#06x})",
                self.nonce, self.crc
            );
            return Err(ProtocolError::CrcMismatch);
        }

        let mut payload = RpcPayload {
            data: [0; MAX_RPC_PAYLOAD],
            len: 0,
        };
        if !stuffed.is_empty() {
            payload.len = unstuff(stuffed, &mut payload.data)?;
        }

        let synchronous = self.header & 0x80 != 0;
        let procedure_id = self.header & MAX_PROCEDURE_ID;
        Ok(match self.origin {
            RpcacpKind::StartRpc => RpcacpMessage::Request {
                sender: self.sender,
                target: self.target,
                priority: self.priority,
                nonce: self.nonce,
                synchronous,
                procedure_id,
                payload,
            },
            _ => RpcacpMessage::Response {
                sender: self.sender,
                target: self.target,
                priority: self.priority,
                nonce: self.nonce,
                procedure_id,
                payload,
            },
        })
    }
}

/// Fixed pool of reassembly slots, keyed by (sender, nonce).
pub(crate) struct RpcStreams {
    slots: [RpcStream; STREAM_SLOTS],
}

impl core::fmt::Debug for RpcStreams {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let active = self.slots.iter().filter(|slot| slot.active).count();
        f.debug_struct("RpcStreams").field("active", &active).finish()
    }
}

impl RpcStreams {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [RpcStream::idle(); STREAM_SLOTS],
        }
    }

    /// Open a stream for a Start frame. Returns the completed message when
    /// the first frame already closes the stuffed stream (the common
    /// single-frame exchange) without occupying a slot.
    fn begin(
        &mut self,
        head: RpcHead,
        header: u8,
        crc: u16,
        initial: &[u8],
    ) -> Result<Option<RpcacpMessage>, ProtocolError> {
        let mut stream = RpcStream {
            active: true,
            sender: head.sender,
            target: head.target,
            priority: head.priority,
            nonce: head.nonce,
            origin: head.kind,
            header,
            crc,
            ..RpcStream::idle()
        };

        // An empty first frame means an empty payload: nothing was stuffed.
        let complete = initial.is_empty() || stream.push(initial)?;
        if complete {
            return stream.finish().map(Some);
        }

        // A retried Start supersedes the previous stream for the same key.
        let reuse = self
            .slots
            .iter()
            .position(|slot| slot.active && slot.sender == head.sender && slot.nonce == head.nonce);
        let free = reuse.or_else(|| self.slots.iter().position(|slot| !slot.active));
        match free {
            Some(index) => {
                self.slots[index] = stream;
                Ok(None)
            }
            None => Err(ProtocolError::TooManyStreams),
        }
    }

    /// Feed a continuation frame into its stream, if any is waiting.
    fn append(
        &mut self,
        head: RpcHead,
        bytes: &[u8],
    ) -> Result<Option<RpcacpMessage>, ProtocolError> {
        let Some(index) = self.slots.iter().position(|slot| slot.matches(&head, head.kind))
        else {
            trace!("rpcacp: continuation without a stream, nonce {:#04x}", head.nonce);
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
    /// Issue an RPC to `target` and wait up to 30 ms for the peer's ACK or
    /// NACK. Returns the exchange nonce for correlating
    /// [`rpc_wait_response`](Self::rpc_wait_response).
    ///
    /// Broadcast targets are rejected: every RPC has exactly one callee.
    pub fn rpc_call(
        &mut self,
        target: u8,
        priority: Priority,
        synchronous: bool,
        procedure_id: u8,
        payload: &[u8],
    ) -> Result<u8, ProtocolError> {
        if target == BROADCAST_ADDRESS || target > MAX_NODE_ADDRESS {
            return Err(ProtocolError::InvalidArgument);
        }
        let nonce = next_nonce();
        let header = (u8::from(synchronous) << 7) | (procedure_id & MAX_PROCEDURE_ID);
        self.rpc_send_exchange(RpcacpKind::StartRpc, target, priority, header, nonce, payload)?;

        // Drain until the peer settles this nonce.
        loop {
            let frame = self.next_frame(RPC_RESPONSE_TIMEOUT_MS)?;
            if frame.id.protocol() != Some(ProtocolClass::Rpcacp) {
                continue;
            }
            let Some(head) = parse_head(frame.id) else {
                continue;
            };
            if head.nonce != nonce || head.sender != target || head.target != self.node_address() {
                continue;
            }
            return match head.kind {
                RpcacpKind::Ack => Ok(nonce),
                RpcacpKind::Nack => {
                    if frame.dlc < 1 {
                        return Err(ProtocolError::InvalidFrame);
                    }
                    Err(ProtocolError::NackReceived {
                        code: frame.data[0],
                    })
                }
                _ => Err(ProtocolError::ProtocolMismatch),
            };
        }
    }

    /// Wait for the StartReturn matching `nonce` and hand back its unstuffed
    /// payload. Frames of other exchanges are consumed and dropped.
    pub fn rpc_wait_response(
        &mut self,
        nonce: u8,
        timeout_ms: u32,
    ) -> Result<RpcPayload, ProtocolError> {
        loop {
            if let RpcacpMessage::Response {
                nonce: got,
                payload,
                ..
            } = self.rpc_receive(timeout_ms)?
            {
                if got == nonce {
                    return Ok(payload);
                }
            }
        }
    }

    /// Receive the next RPCACP message, reassembling multi-frame requests
    /// and responses across continuation frames.
    pub fn rpc_receive(&mut self, timeout_ms: u32) -> Result<RpcacpMessage, ProtocolError> {
        loop {
            let frame = self.next_frame(timeout_ms)?;
            if frame.id.protocol() != Some(ProtocolClass::Rpcacp) {
                continue;
            }
            let Some(head) = parse_head(frame.id) else {
                trace!("rpcacp: dropping frame with reserved kind bits");
                continue;
            };

            match head.kind {
                RpcacpKind::Ack => {
                    return Ok(RpcacpMessage::Ack {
                        sender: head.sender,
                        nonce: head.nonce,
                    })
                }
                RpcacpKind::Nack => {
                    if frame.dlc < 1 {
                        return Err(ProtocolError::InvalidFrame);
                    }
                    return Ok(RpcacpMessage::Nack {
                        sender: head.sender,
                        nonce: head.nonce,
                        code: frame.data[0],
                    });
                }
                RpcacpKind::StartRpc | RpcacpKind::StartReturn => {
                    if usize::from(frame.dlc) < START_OVERHEAD {
                        return Err(ProtocolError::InvalidFrame);
                    }
                    let header = frame.data[0];
                    let crc = u16::from_be_bytes([frame.data[1], frame.data[2]]);
                    let initial = &frame.payload()[START_OVERHEAD..];
                    if let Some(message) = self.rpc_streams.begin(head, header, crc, initial)? {
                        return Ok(message);
                    }
                }
                RpcacpKind::TxData | RpcacpKind::RxData => {
                    if let Some(message) = self.rpc_streams.append(head, frame.payload())? {
                        return Ok(message);
                    }
                }
            }
        }
    }

    /// Send the return value of a procedure back to `target`, echoing the
    /// request's `nonce`. Symmetric to [`rpc_call`](Self::rpc_call), using
    /// StartReturn and RxData frames.
    pub fn rpc_respond(
        &mut self,
        target: u8,
        priority: Priority,
        procedure_id: u8,
        nonce: u8,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        if target == BROADCAST_ADDRESS || target > MAX_NODE_ADDRESS {
            return Err(ProtocolError::InvalidArgument);
        }
        // Bit 7 is always set on a return header.
        let header = 0x80 | (procedure_id & MAX_PROCEDURE_ID);
        self.rpc_send_exchange(RpcacpKind::StartReturn, target, priority, header, nonce, payload)
    }

    /// Accept a request: zero-payload ACK echoing its nonce.
    pub fn rpc_send_ack(
        &mut self,
        target: u8,
        priority: Priority,
        nonce: u8,
    ) -> Result<(), ProtocolError> {
        let id = pack_id(RpcacpKind::Ack, priority, self.node_address(), target, nonce);
        self.send_frame(&CanFrame::extended(id, &[]))
    }

    /// Refuse a request: one-byte NACK carrying an errno-style code.
    pub fn rpc_send_nack(
        &mut self,
        target: u8,
        priority: Priority,
        nonce: u8,
        code: u8,
    ) -> Result<(), ProtocolError> {
        let id = pack_id(RpcacpKind::Nack, priority, self.node_address(), target, nonce);
        self.send_frame(&CanFrame::extended(id, &[code]))
    }

    /// Stuff, checksum, and emit one exchange: a Start frame carrying
    /// (header, CRC16, leading stuffed bytes) then continuation frames with
    /// the rest.
    fn rpc_send_exchange(
        &mut self,
        start_kind: RpcacpKind,
        target: u8,
        priority: Priority,
        header: u8,
        nonce: u8,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        if payload.len() > MAX_RPC_PAYLOAD {
            return Err(ProtocolError::InvalidArgument);
        }

        let mut stuffed = [0u8; MAX_STUFFED_PAYLOAD];
        let stuffed_len = if payload.is_empty() {
            0
        } else {
            stuff(payload, &mut stuffed)?
        };
        let stuffed = &stuffed[..stuffed_len];
        let crc = Crc16::new().update(&[header]).update(stuffed).finish();

        let mut first = [0u8; MAX_DATA_SIZE];
        first[0] = header;
        first[1..3].copy_from_slice(&crc.to_be_bytes());
        let first_chunk = stuffed.len().min(MAX_DATA_SIZE - START_OVERHEAD);
        first[START_OVERHEAD..START_OVERHEAD + first_chunk]
            .copy_from_slice(&stuffed[..first_chunk]);

        let sender = self.node_address();
        let start_id = pack_id(start_kind, priority, sender, target, nonce);
        self.send_frame(&CanFrame {
            id: start_id,
            dlc: (START_OVERHEAD + first_chunk) as u8,
            data: first,
            extended: true,
        })?;

        let cont_kind = match start_kind {
            RpcacpKind::StartRpc => RpcacpKind::TxData,
            _ => RpcacpKind::RxData,
        };
        let cont_id = pack_id(cont_kind, priority, sender, target, nonce);
        for chunk in stuffed[first_chunk..].chunks(MAX_DATA_SIZE) {
            self.send_frame(&CanFrame::extended(cont_id, chunk))?;
        }
        Ok(())
    }
}
