//! `artie-can` library: the Artie CAN protocol stack. Four protocols share a
//! single Controller Area Network bus and multiplex it into a real-time
//! messaging primitive (RTACP), an RPC mechanism (RPCACP), a pub/sub fabric
//! (PSACP), and a block-transfer facility (BWACP). The crate exposes the
//! infrastructure modules (codecs, backends), the protocol logic, and the
//! core context tying a node address to a transport.
//!
//! The protocol core is `no_std` and allocation-free so the same code runs on
//! a bare-metal microcontroller and on a Linux single-board computer; the
//! TCP-tunnel and SocketCAN backends require the `std` feature (on by
//! default).
#![cfg_attr(not(feature = "std"), no_std)]
//==================================================================================
/// Core context: node address, backend selection, protocol dispatch.
pub mod core;
/// Domain and transport errors (byte stuffing, backend faults, protocol
/// validation, and related issues).
pub mod error;
/// Infrastructure: CRC and byte-stuffing codecs, transport backends.
pub mod infra;
/// Artie CAN protocol implementation: frame transport, RTACP, RPCACP, PSACP,
/// and BWACP.
pub mod protocol;

#[cfg(test)]
pub(crate) mod testutil;
//==================================================================================
