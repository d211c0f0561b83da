//! Artie CAN transport layer: frame representation, 29-bit identifier
//! management, and the backend abstraction trait.
//!
//! ## Addressing constants
//!
//! Node addresses are six bits. Two values are reserved: `0x00` addresses
//! every node (broadcast) and `0x3F` is the class-multicast target used by
//! the block-write protocol together with a class mask.

pub mod can_frame;
pub mod can_id;
pub mod traits;

/// Payload capacity of a single CAN frame (classic CAN DLC ceiling).
pub const MAX_DATA_SIZE: usize = 8;

/// Highest valid node address (six bits).
pub const MAX_NODE_ADDRESS: u8 = 0x3F;

/// Reserved address targeting every node on the bus.
pub const BROADCAST_ADDRESS: u8 = 0x00;

/// Reserved address selecting receiver classes via the BWACP class mask.
pub const MULTICAST_ADDRESS: u8 = 0x3F;

/// Largest RPC payload before stuffing.
pub const MAX_RPC_PAYLOAD: usize = 1024;

/// Largest pub/sub payload before stuffing.
pub const MAX_PUBSUB_PAYLOAD: usize = 2048;

/// Window granted to the peer for a real-time acknowledgement (ms).
///
/// RTACP targets sub-150 µs delivery, so a peer that has not acknowledged
/// within a millisecond is treated as having missed the frame. Retransmission
/// policy is the caller's.
pub const RTACP_ACK_TIMEOUT_MS: u32 = 1;

/// Wait for an RPC ACK/NACK after the request frames have been sent (ms).
pub const RPC_RESPONSE_TIMEOUT_MS: u32 = 30;
