//! Core context: ties one node address to one transport backend and provides
//! the frame-level plumbing the four protocol layers build on.
use crate::error::{BackendError, ProtocolError};
use crate::infra::backend::local_queue::LocalQueueBackend;
#[cfg(all(feature = "std", target_os = "linux"))]
use crate::infra::backend::socketcan::SocketCanBackend;
#[cfg(feature = "std")]
use crate::infra::backend::tcp_tunnel::{TcpTunnelBackend, TunnelConfig};
use crate::protocol::psacp::PubStreams;
use crate::protocol::rpcacp::RpcStreams;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::ProtocolClass;
use crate::protocol::transport::traits::can_backend::CanBackend;
use crate::protocol::transport::MAX_NODE_ADDRESS;
use log::trace;

/// Protocol class of a frame, from the top three identifier bits. `None` for
/// the reserved patterns; such frames are dropped at ingress.
pub fn get_protocol(frame: &CanFrame) -> Option<ProtocolClass> {
    frame.id.protocol()
}

//==================================================================================BACKEND_KIND

/// Built-in backend selection for [`CanContext::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Bounded in-process frame ring for same-process tests.
    LocalQueue,
    /// Length-prefixed frame transport over TCP.
    #[cfg(feature = "std")]
    TcpTunnel(TunnelConfig),
    /// Kernel raw CAN socket on the compile-time interface.
    #[cfg(all(feature = "std", target_os = "linux"))]
    SocketCan,
    /// External CAN controller over SPI. Cannot be built from a kind tag —
    /// the caller owns the SPI peripheral — so this is constructed through
    /// [`CanContext::init_custom`] and rejected here.
    SpiController,
}

/// Variant-enum dispatch over the built-in backends.
#[derive(Debug)]
pub enum Backend {
    /// See [`LocalQueueBackend`].
    LocalQueue(LocalQueueBackend),
    /// See [`TcpTunnelBackend`].
    #[cfg(feature = "std")]
    TcpTunnel(TcpTunnelBackend),
    /// See [`SocketCanBackend`].
    #[cfg(all(feature = "std", target_os = "linux"))]
    SocketCan(SocketCanBackend),
}

impl CanBackend for Backend {
    fn init(&mut self) -> Result<(), BackendError> {
        match self {
            Self::LocalQueue(backend) => backend.init(),
            #[cfg(feature = "std")]
            Self::TcpTunnel(backend) => backend.init(),
            #[cfg(all(feature = "std", target_os = "linux"))]
            Self::SocketCan(backend) => backend.init(),
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError> {
        match self {
            Self::LocalQueue(backend) => backend.send(frame),
            #[cfg(feature = "std")]
            Self::TcpTunnel(backend) => backend.send(frame),
            #[cfg(all(feature = "std", target_os = "linux"))]
            Self::SocketCan(backend) => backend.send(frame),
        }
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<CanFrame, BackendError> {
        match self {
            Self::LocalQueue(backend) => backend.receive(timeout_ms),
            #[cfg(feature = "std")]
            Self::TcpTunnel(backend) => backend.receive(timeout_ms),
            #[cfg(all(feature = "std", target_os = "linux"))]
            Self::SocketCan(backend) => backend.receive(timeout_ms),
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        match self {
            Self::LocalQueue(backend) => backend.close(),
            #[cfg(feature = "std")]
            Self::TcpTunnel(backend) => backend.close(),
            #[cfg(all(feature = "std", target_os = "linux"))]
            Self::SocketCan(backend) => backend.close(),
        }
    }
}

//==================================================================================CONTEXT

/// One node's handle on the bus: the node address, the owned backend, and the
/// fixed-capacity reassembly state of the multi-frame protocols.
///
/// A context lives for the duration of the owning task and is released with
/// an explicit [`close`](Self::close). After a fatal transport fault or a
/// close, every operation fails with `NotOpen`.
#[derive(Debug)]
pub struct CanContext<B: CanBackend = Backend> {
    node_address: u8,
    backend: B,
    open: bool,
    pub(crate) rpc_streams: RpcStreams,
    pub(crate) pub_streams: PubStreams,
}

impl CanContext<Backend> {
    /// Build a context over one of the built-in backends.
    pub fn init(node_address: u8, kind: BackendKind) -> Result<Self, ProtocolError> {
        let backend = match kind {
            BackendKind::LocalQueue => Backend::LocalQueue(LocalQueueBackend::new()),
            #[cfg(feature = "std")]
            BackendKind::TcpTunnel(config) => Backend::TcpTunnel(TcpTunnelBackend::new(config)),
            #[cfg(all(feature = "std", target_os = "linux"))]
            BackendKind::SocketCan => Backend::SocketCan(SocketCanBackend::new()),
            BackendKind::SpiController => return Err(ProtocolError::InvalidArgument),
        };
        Self::init_custom(node_address, backend)
    }
}

impl<B: CanBackend> CanContext<B> {
    /// Build a context over a caller-provided backend (dependency injection
    /// for simulators, parsers, and the SPI controller).
    pub fn init_custom(node_address: u8, mut backend: B) -> Result<Self, ProtocolError> {
        if node_address > MAX_NODE_ADDRESS {
            return Err(ProtocolError::InvalidArgument);
        }
        backend.init()?;
        Ok(Self {
            node_address,
            backend,
            open: true,
            rpc_streams: RpcStreams::new(),
            pub_streams: PubStreams::new(),
        })
    }

    /// This node's six-bit address.
    pub fn node_address(&self) -> u8 {
        self.node_address
    }

    /// True until `close` or a fatal transport fault.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Release backend resources. Idempotent.
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        if self.open {
            self.open = false;
            self.backend.close()?;
        }
        Ok(())
    }

    /// Hand one frame to the backend, tracking fatal faults.
    pub(crate) fn send_frame(&mut self, frame: &CanFrame) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::Backend(BackendError::NotOpen));
        }
        match self.backend.send(frame) {
            Ok(()) => Ok(()),
            Err(BackendError::TransportFault) => {
                self.open = false;
                Err(ProtocolError::Backend(BackendError::TransportFault))
            }
            Err(other) => Err(ProtocolError::Backend(other)),
        }
    }

    /// Next well-formed extended frame from the backend. Base-id frames and
    /// reserved protocol patterns are dropped here, at ingress.
    pub(crate) fn next_frame(&mut self, timeout_ms: u32) -> Result<CanFrame, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::Backend(BackendError::NotOpen));
        }
        loop {
            let frame = match self.backend.receive(timeout_ms) {
                Ok(frame) => frame,
                Err(BackendError::TransportFault) => {
                    self.open = false;
                    return Err(ProtocolError::Backend(BackendError::TransportFault));
                }
                Err(err) => return Err(ProtocolError::from_recv(err)),
            };
            if !frame.extended {
                trace!("dropping base-id frame {:#05x}", frame.id.0);
                continue;
            }
            if frame.id.protocol().is_none() {
                trace!("dropping frame with reserved protocol bits {:#010x}", frame.id.0);
                continue;
            }
            return Ok(frame);
        }
    }
}

#[cfg(test)]
#[path = "core_tests.rs"]
mod tests;
