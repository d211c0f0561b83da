//! Abstraction traits used by the transport layer.
pub mod can_backend;
