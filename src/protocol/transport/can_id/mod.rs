//! Shared pieces of the 29-bit extended CAN identifiers used by the Artie
//! protocols: the raw identifier wrapper, the protocol class carried in the
//! top three bits, and the two-bit arbitration priority.
//!
//! Field packing below the protocol class differs per protocol and lives
//! with each protocol module.

//==================================================================================CAN_ID
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Encapsulates an extended CAN identifier (29 bits) stored in a `u32`.
pub struct CanId(pub u32);

impl CanId {
    /// Protocol class from the top three identifier bits, or `None` for the
    /// reserved patterns (`001`, `011`, `111`).
    pub fn protocol(&self) -> Option<ProtocolClass> {
        ProtocolClass::from_bits(((self.0 >> 26) & 0x07) as u8)
    }
}

//==================================================================================PROTOCOL_CLASS
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The overlaid protocol a frame belongs to, encoded in identifier bits
/// 28–26. The ordering doubles as bus arbitration precedence: RTACP beats
/// RPCACP beats high-tier pub/sub beats block writes beats low-tier pub/sub.
pub enum ProtocolClass {
    /// Real Time Artie CAN Protocol (`000`).
    Rtacp,
    /// Remote Procedure Call Artie CAN Protocol (`010`).
    Rpcacp,
    /// Pub/sub, high-priority tier (`100`).
    PsacpHigh,
    /// Block Write Artie CAN Protocol (`101`).
    Bwacp,
    /// Pub/sub, low-priority tier (`110`).
    PsacpLow,
}

impl ProtocolClass {
    /// Decode the three protocol bits. Reserved patterns yield `None`.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b000 => Some(Self::Rtacp),
            0b010 => Some(Self::Rpcacp),
            0b100 => Some(Self::PsacpHigh),
            0b101 => Some(Self::Bwacp),
            0b110 => Some(Self::PsacpLow),
            _ => None,
        }
    }

    /// The three identifier bits for this class.
    pub fn bits(self) -> u8 {
        match self {
            Self::Rtacp => 0b000,
            Self::Rpcacp => 0b010,
            Self::PsacpHigh => 0b100,
            Self::Bwacp => 0b101,
            Self::PsacpLow => 0b110,
        }
    }
}

//==================================================================================PRIORITY
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Two-bit arbitration priority. Lower bit patterns win CAN arbitration;
/// the stack only guarantees correct placement in the identifier.
pub enum Priority {
    /// `00` — wins arbitration against every other priority.
    High,
    /// `01`
    MedHigh,
    /// `10`
    MedLow,
    /// `11` — yields to everything else.
    Low,
}

impl Priority {
    /// Decode two priority bits (extra bits are masked off).
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0b00 => Self::High,
            0b01 => Self::MedHigh,
            0b10 => Self::MedLow,
            _ => Self::Low,
        }
    }

    /// The two identifier bits for this priority.
    pub fn bits(self) -> u8 {
        match self {
            Self::High => 0b00,
            Self::MedHigh => 0b01,
            Self::MedLow => 0b10,
            Self::Low => 0b11,
        }
    }
}
