//! Transport backends implementing
//! [`CanBackend`](crate::protocol::transport::traits::can_backend::CanBackend).
//!
//! Each backend owns its state; two contexts in one process own two
//! independent transports (two queues, two sockets).
pub mod local_queue;
#[cfg(feature = "mcp2515")]
pub mod mcp2515;
#[cfg(all(feature = "std", target_os = "linux"))]
pub mod socketcan;
#[cfg(feature = "std")]
pub mod tcp_tunnel;
