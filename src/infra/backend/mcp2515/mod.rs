//! MCP2515 SPI CAN-controller backend for bare-metal systems without a
//! kernel CAN layer.
//!
//! Drives the controller's instruction set over an
//! [`embedded_hal::spi::SpiDevice`]: reset into configuration mode, bit
//! timing setup, TXB0 for transmission and RXB0 for reception. Receive is
//! polled against the status instruction with a caller-bounded delay loop;
//! wiring the INT pin to a scheduler is the integrator's concern.
use crate::error::BackendError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::traits::can_backend::CanBackend;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Operation, SpiDevice};
use log::{debug, trace};

//==================================================================================INSTRUCTIONS

const INSTR_RESET: u8 = 0xC0;
const INSTR_READ: u8 = 0x03;
const INSTR_WRITE: u8 = 0x02;
const INSTR_READ_STATUS: u8 = 0xA0;
/// Load starting at TXB0SIDH.
const INSTR_LOAD_TX0: u8 = 0x40;
/// Request-to-send for TXB0.
const INSTR_RTS_TX0: u8 = 0x81;
/// Read starting at RXB0SIDH; clears RX0IF when CS is raised.
const INSTR_READ_RX0: u8 = 0x90;

//==================================================================================REGISTERS

const REG_CANSTAT: u8 = 0x0E;
const REG_CANCTRL: u8 = 0x0F;
const REG_CNF3: u8 = 0x28;
const REG_CNF2: u8 = 0x29;
const REG_CNF1: u8 = 0x2A;
const REG_TXB0CTRL: u8 = 0x30;
const REG_RXB0CTRL: u8 = 0x60;

/// REQOP field: configuration mode (also the post-reset state).
const MODE_CONFIG: u8 = 0x80;
/// REQOP field: normal operation.
const MODE_NORMAL: u8 = 0x00;
/// Mode bits within CANSTAT/CANCTRL.
const MODE_MASK: u8 = 0xE0;

/// TXB0CTRL TXREQ: transmission pending.
const TXREQ: u8 = 0x08;
/// RXB0CTRL RXM bits: accept every frame, filters off.
const RXM_ANY: u8 = 0x60;
/// READ STATUS bit: RXB0 holds a frame.
const STATUS_RX0IF: u8 = 0x01;

/// Bit timing for a 16 MHz oscillator at 250 kbit/s (compile-time default,
/// like the interface constant of the socket backend).
const CNF1_VALUE: u8 = 0x41;
const CNF2_VALUE: u8 = 0xF1;
const CNF3_VALUE: u8 = 0x85;

/// Poll period while waiting for reception (µs).
const RX_POLL_PERIOD_US: u32 = 100;
/// Settle time after a reset pulse (µs).
const RESET_SETTLE_US: u32 = 10_000;

/// SIDL EXIDE bit: the loaded identifier is extended.
const EXIDE: u8 = 0x08;

//==================================================================================ID_CODEC

/// Pack a frame id into the four SIDH/SIDL/EID8/EID0 buffer registers.
fn id_to_regs(id: u32, extended: bool) -> [u8; 4] {
    if extended {
        [
            (id >> 21) as u8,
            (((id >> 18) & 0x07) as u8) << 5 | EXIDE | ((id >> 16) & 0x03) as u8,
            (id >> 8) as u8,
            id as u8,
        ]
    } else {
        [(id >> 3) as u8, ((id & 0x07) as u8) << 5, 0, 0]
    }
}

/// Unpack SIDH/SIDL/EID8/EID0 into an id and the extended flag.
fn regs_to_id(regs: &[u8]) -> (u32, bool) {
    let extended = regs[1] & EXIDE != 0;
    if extended {
        let id = (u32::from(regs[0]) << 21)
            | (u32::from(regs[1] >> 5) << 18)
            | (u32::from(regs[1] & 0x03) << 16)
            | (u32::from(regs[2]) << 8)
            | u32::from(regs[3]);
        (id, true)
    } else {
        let id = (u32::from(regs[0]) << 3) | u32::from(regs[1] >> 5);
        (id, false)
    }
}

//==================================================================================BACKEND

/// MCP2515 transport over an owned SPI device and delay provider.
#[derive(Debug)]
pub struct Mcp2515Backend<SPI, D> {
    spi: SPI,
    delay: D,
    open: bool,
}

impl<SPI: SpiDevice, D: DelayNs> Mcp2515Backend<SPI, D> {
    /// A closed backend around the controller's SPI device.
    pub fn new(spi: SPI, delay: D) -> Self {
        Self {
            spi,
            delay,
            open: false,
        }
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), BackendError> {
        self.spi
            .write(&[INSTR_WRITE, register, value])
            .map_err(|_| BackendError::TransportFault)
    }

    fn read_register(&mut self, register: u8) -> Result<u8, BackendError> {
        let mut value = [0u8; 1];
        self.spi
            .transaction(&mut [
                Operation::Write(&[INSTR_READ, register]),
                Operation::Read(&mut value),
            ])
            .map_err(|_| BackendError::TransportFault)?;
        Ok(value[0])
    }

    fn read_status(&mut self) -> Result<u8, BackendError> {
        let mut value = [0u8; 1];
        self.spi
            .transaction(&mut [
                Operation::Write(&[INSTR_READ_STATUS]),
                Operation::Read(&mut value),
            ])
            .map_err(|_| BackendError::TransportFault)?;
        Ok(value[0])
    }

    fn set_mode(&mut self, mode: u8) -> Result<(), BackendError> {
        self.write_register(REG_CANCTRL, mode)?;
        if self.read_register(REG_CANSTAT)? & MODE_MASK != mode {
            return Err(BackendError::TransportFault);
        }
        Ok(())
    }
}

impl<SPI: SpiDevice, D: DelayNs> CanBackend for Mcp2515Backend<SPI, D> {
    fn init(&mut self) -> Result<(), BackendError> {
        if self.open {
            return Err(BackendError::AlreadyOpen);
        }

        self.spi
            .write(&[INSTR_RESET])
            .map_err(|_| BackendError::TransportFault)?;
        self.delay.delay_us(RESET_SETTLE_US);

        // Reset leaves the chip in configuration mode; confirm before
        // touching the bit-timing registers.
        if self.read_register(REG_CANSTAT)? & MODE_MASK != MODE_CONFIG {
            return Err(BackendError::TransportFault);
        }
        self.write_register(REG_CNF1, CNF1_VALUE)?;
        self.write_register(REG_CNF2, CNF2_VALUE)?;
        self.write_register(REG_CNF3, CNF3_VALUE)?;
        self.write_register(REG_RXB0CTRL, RXM_ANY)?;
        self.set_mode(MODE_NORMAL)?;

        debug!("mcp2515: controller up, normal mode");
        self.open = true;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }
        if self.read_register(REG_TXB0CTRL)? & TXREQ != 0 {
            // Previous transmission still pending in TXB0.
            return Err(BackendError::Backpressure);
        }

        let mut buffer = [0u8; 13];
        buffer[..4].copy_from_slice(&id_to_regs(frame.id.0, frame.extended));
        buffer[4] = frame.dlc & 0x0F;
        buffer[5..5 + frame.payload().len()].copy_from_slice(frame.payload());

        self.spi
            .transaction(&mut [
                Operation::Write(&[INSTR_LOAD_TX0]),
                Operation::Write(&buffer),
            ])
            .map_err(|_| BackendError::TransportFault)?;
        self.spi
            .write(&[INSTR_RTS_TX0])
            .map_err(|_| BackendError::TransportFault)?;
        trace!("mcp2515: queued frame id={:#010x}", frame.id.0);
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<CanFrame, BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }

        let mut polls_left = timeout_ms.saturating_mul(1000) / RX_POLL_PERIOD_US;
        loop {
            if self.read_status()? & STATUS_RX0IF != 0 {
                break;
            }
            if polls_left == 0 {
                return Err(BackendError::Timeout);
            }
            polls_left -= 1;
            self.delay.delay_us(RX_POLL_PERIOD_US);
        }

        let mut buffer = [0u8; 13];
        self.spi
            .transaction(&mut [
                Operation::Write(&[INSTR_READ_RX0]),
                Operation::Read(&mut buffer),
            ])
            .map_err(|_| BackendError::TransportFault)?;

        let (id, extended) = regs_to_id(&buffer[..4]);
        let dlc = (buffer[4] & 0x0F).min(8);
        let mut frame = CanFrame {
            id: CanId(id),
            dlc,
            data: [0; 8],
            extended,
        };
        frame.data[..usize::from(dlc)].copy_from_slice(&buffer[5..5 + usize::from(dlc)]);
        trace!("mcp2515: received frame id={:#010x}", frame.id.0);
        Ok(frame)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.open {
            // Best effort: park the controller in configuration mode.
            let _ = self.set_mode(MODE_CONFIG);
            self.open = false;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
