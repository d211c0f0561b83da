//! In-memory representation of an Artie CAN frame: the atomic unit crossing
//! the backend boundary.
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::MAX_DATA_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Raw CAN frame as exchanged with a backend.
pub struct CanFrame {
    /// Full 29-bit CAN identifier stored inside a `u32`.
    pub id: CanId,
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub dlc: u8,
    /// Payload buffer. Only the first `dlc` bytes are meaningful.
    pub data: [u8; MAX_DATA_SIZE],
    /// True for an extended (29-bit) frame. Base frames are carried through
    /// the backend boundary but ignored by the protocol dispatcher.
    pub extended: bool,
}

impl CanFrame {
    /// Build an extended frame around `payload`. At most eight bytes are
    /// taken; every Artie protocol packs its frames within that bound.
    pub fn extended(id: CanId, payload: &[u8]) -> Self {
        let mut data = [0u8; MAX_DATA_SIZE];
        let dlc = payload.len().min(MAX_DATA_SIZE);
        data[..dlc].copy_from_slice(&payload[..dlc]);
        Self {
            id,
            dlc: dlc as u8,
            data,
            extended: true,
        }
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc).min(MAX_DATA_SIZE)]
    }
}

//==================================================================================EMBEDDED_CAN
#[cfg(feature = "embedded-can-compat")]
mod embedded_can_compat {
    use super::CanFrame;
    use crate::protocol::transport::can_id::CanId;
    use embedded_can::{ExtendedId, Frame, Id, StandardId};

    /// Interop with `embedded-can` HAL drivers. Remote frames have no
    /// equivalent in the Artie stack and construct as data-less frames.
    impl Frame for CanFrame {
        fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
            if data.len() > super::MAX_DATA_SIZE {
                return None;
            }
            let frame = match id.into() {
                Id::Extended(ext) => CanFrame::extended(CanId(ext.as_raw()), data),
                Id::Standard(std) => CanFrame {
                    extended: false,
                    ..CanFrame::extended(CanId(u32::from(std.as_raw())), data)
                },
            };
            Some(frame)
        }

        fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
            if dlc > super::MAX_DATA_SIZE {
                return None;
            }
            Self::new(id, &[])
        }

        fn is_extended(&self) -> bool {
            self.extended
        }

        fn is_remote_frame(&self) -> bool {
            false
        }

        fn id(&self) -> Id {
            if self.extended {
                ExtendedId::new(self.id.0).map_or(
                    Id::Standard(StandardId::ZERO),
                    Id::Extended,
                )
            } else {
                StandardId::new(self.id.0 as u16).map_or(
                    Id::Standard(StandardId::ZERO),
                    Id::Standard,
                )
            }
        }

        fn dlc(&self) -> usize {
            usize::from(self.dlc)
        }

        fn data(&self) -> &[u8] {
            self.payload()
        }
    }
}
