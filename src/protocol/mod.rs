//! High-level components of the Artie CAN stack: the frame transport layer
//! and the four overlaid protocols.
pub mod bwacp;
pub mod psacp;
pub mod rpcacp;
pub mod rtacp;
pub mod transport;
