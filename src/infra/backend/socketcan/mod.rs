//! Native CAN-socket backend: adapts the kernel's raw CAN interface
//! (`PF_CAN`/`SOCK_RAW`) to the backend contract.
//!
//! The interface name is a compile-time constant; deployments with several
//! CAN buses run one context per interface binary.
use crate::error::BackendError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::traits::can_backend::CanBackend;
use log::{debug, trace};
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// CAN network interface the backend binds to.
pub const CAN_INTERFACE: &str = "can0";

/// Raw CAN socket wrapper. One socket per backend instance.
#[derive(Debug)]
pub struct SocketCanBackend {
    fd: Option<OwnedFd>,
}

impl SocketCanBackend {
    /// A closed backend bound to [`CAN_INTERFACE`] once initialized.
    pub const fn new() -> Self {
        Self { fd: None }
    }

    fn raw_fd(&self) -> Result<RawFd, BackendError> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(BackendError::NotOpen)
    }
}

impl Default for SocketCanBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn wait_readable(fd: RawFd, timeout_ms: u32) -> Result<bool, BackendError> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout = timeout_ms.min(i32::MAX as u32) as libc::c_int;
    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout) };
        if rc < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(BackendError::TransportFault);
        }
        return Ok(rc > 0);
    }
}

impl CanBackend for SocketCanBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        if self.fd.is_some() {
            return Err(BackendError::AlreadyOpen);
        }

        let fd = unsafe { libc::socket(libc::PF_CAN, libc::SOCK_RAW, libc::CAN_RAW) };
        if fd < 0 {
            return Err(BackendError::TransportFault);
        }
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        let name = CString::new(CAN_INTERFACE).map_err(|_| BackendError::InvalidConfig)?;
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(BackendError::NoRoute);
        }

        let mut addr: libc::sockaddr_can = unsafe { std::mem::zeroed() };
        addr.can_family = libc::AF_CAN as libc::sa_family_t;
        addr.can_ifindex = ifindex as libc::c_int;

        let rc = unsafe {
            libc::bind(
                owned.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_can>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(BackendError::BindFailed);
        }

        debug!("socketcan: bound to {CAN_INTERFACE}");
        self.fd = Some(owned);
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError> {
        let fd = self.raw_fd()?;

        let mut raw: libc::can_frame = unsafe { std::mem::zeroed() };
        raw.can_id = if frame.extended {
            frame.id.0 | libc::CAN_EFF_FLAG
        } else {
            frame.id.0 & libc::CAN_SFF_MASK
        };
        raw.can_dlc = frame.dlc;
        raw.data[..frame.payload().len()].copy_from_slice(frame.payload());

        let size = std::mem::size_of::<libc::can_frame>();
        let written =
            unsafe { libc::write(fd, &raw as *const _ as *const libc::c_void, size) };
        if written < 0 {
            return match io::Error::last_os_error().raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::ENOBUFS) => Err(BackendError::Backpressure),
                _ => Err(BackendError::TransportFault),
            };
        }
        if written as usize != size {
            return Err(BackendError::TransportFault);
        }
        trace!("socketcan: sent frame id={:#010x}", frame.id.0);
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<CanFrame, BackendError> {
        let fd = self.raw_fd()?;

        if !wait_readable(fd, timeout_ms)? {
            return Err(BackendError::Timeout);
        }

        let mut raw: libc::can_frame = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::can_frame>();
        let nread = unsafe { libc::read(fd, &mut raw as *mut _ as *mut libc::c_void, size) };
        if nread as usize != size {
            // The kernel hands out whole frames; anything else is fatal.
            self.fd = None;
            return Err(BackendError::TransportFault);
        }

        let extended = raw.can_id & libc::CAN_EFF_FLAG != 0;
        let id = if extended {
            raw.can_id & libc::CAN_EFF_MASK
        } else {
            raw.can_id & libc::CAN_SFF_MASK
        };

        let mut frame = CanFrame {
            id: CanId(id),
            dlc: raw.can_dlc.min(8),
            data: [0; 8],
            extended,
        };
        let dlc = usize::from(frame.dlc);
        frame.data[..dlc].copy_from_slice(&raw.data[..dlc]);
        trace!("socketcan: received frame id={:#010x}", frame.id.0);
        Ok(frame)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.fd = None;
        Ok(())
    }
}
