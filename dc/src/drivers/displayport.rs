//! DisplayPort AUX side channel
//!
//! Provides the pieces of DisplayPort the display core depends on:
//! - DPCD register map (link config, MST control, payload table)
//! - Link rate codes and their symbol clocks
//! - `AuxTransport`, the byte-oriented DPCD/I2C transport seam
//!
//! Retry and timing policy of the transport is the transport's business; the
//! core only looks at success and byte count.

use alloc::vec::Vec;

/// DPCD register addresses
pub mod dpcd {
    pub const DPCD_REV: u32 = 0x00000;
    pub const MAX_LINK_RATE: u32 = 0x00001;
    pub const MAX_LANE_COUNT: u32 = 0x00002;
    pub const DOWN_STREAM_PORT_COUNT: u32 = 0x00007;
    pub const MSTM_CAP: u32 = 0x00021;

    pub const LINK_BW_SET: u32 = 0x00100;
    pub const LANE_COUNT_SET: u32 = 0x00101;

    pub const MSTM_CTRL: u32 = 0x00111;
    pub const PAYLOAD_ALLOCATE_SET: u32 = 0x001C0;
    pub const PAYLOAD_ALLOCATE_START_TIME_SLOT: u32 = 0x001C1;
    pub const PAYLOAD_ALLOCATE_TIME_SLOT_COUNT: u32 = 0x001C2;

    pub const SINK_COUNT: u32 = 0x00200;
    pub const PAYLOAD_TABLE_UPDATE_STATUS: u32 = 0x002C0;

    pub const SIDEBAND_MSG_DOWN_REQ_BASE: u32 = 0x01000;

    /// MSTM_CTRL bits
    pub const MST_EN: u8 = 1 << 0;
    pub const UP_REQ_EN: u8 = 1 << 1;
    pub const UPSTREAM_IS_SRC: u8 = 1 << 2;

    /// PAYLOAD_TABLE_UPDATE_STATUS bits
    pub const PAYLOAD_TABLE_UPDATED: u8 = 1 << 0;
    pub const PAYLOAD_ACT_HANDLED: u8 = 1 << 1;
}

/// Link rates
pub mod link_rate {
    pub const RBR: u8 = 0x06;   // 1.62 Gbps
    pub const HBR: u8 = 0x0A;   // 2.7 Gbps
    pub const HBR2: u8 = 0x14;  // 5.4 Gbps
    pub const HBR3: u8 = 0x1E;  // 8.1 Gbps

    /// Link rate codes are multiples of this reference
    pub const REF_FREQ_KHZ: u32 = 27000;
}

/// Sideband message request identifiers
pub mod sideband {
    pub const ALLOCATE_PAYLOAD: u8 = 0x11;
}

/// AUX transaction failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxError {
    /// Sink NAKed or did not reply
    NoReply,
    /// Sink kept deferring past the transport's retry budget
    Defer,
    /// Fewer bytes than requested made it across
    ShortTransfer,
    /// Link is not there (unplugged, powered down)
    NotConnected,
}

/// One leg of an I2C-over-AUX transaction.
#[derive(Debug, Clone)]
pub struct I2cPayload {
    pub write: bool,
    pub address: u8,
    pub data: Vec<u8>,
}

/// Ordered I2C transaction (write offset, then read, etc).
#[derive(Debug, Clone, Default)]
pub struct I2cCommand {
    pub payloads: Vec<I2cPayload>,
    pub speed_khz: u32,
}

/// DPCD / I2C transport of one link.
pub trait AuxTransport: Send {
    /// Read `data.len()` bytes at `address`, returns bytes read.
    fn read_dpcd(&mut self, address: u32, data: &mut [u8]) -> Result<usize, AuxError>;

    /// Write `data` at `address`, returns bytes written.
    fn write_dpcd(&mut self, address: u32, data: &[u8]) -> Result<usize, AuxError>;

    /// Run an I2C-over-AUX command, filling read payloads in place.
    fn submit_i2c(&mut self, cmd: &mut I2cCommand) -> Result<(), AuxError>;

    /// Busy-wait used between status polls.
    fn delay_us(&mut self, us: u32) {
        for _ in 0..us.saturating_mul(100) {
            core::hint::spin_loop();
        }
    }
}

/// Read a single DPCD byte.
pub fn read_dpcd_byte(aux: &mut dyn AuxTransport, address: u32) -> Result<u8, AuxError> {
    let mut data = [0u8; 1];
    match aux.read_dpcd(address, &mut data)? {
        1 => Ok(data[0]),
        _ => Err(AuxError::ShortTransfer),
    }
}

/// Write a buffer and insist the whole thing landed.
pub fn write_dpcd_all(aux: &mut dyn AuxTransport, address: u32, data: &[u8]) -> Result<(), AuxError> {
    if aux.write_dpcd(address, data)? != data.len() {
        return Err(AuxError::ShortTransfer);
    }
    Ok(())
}

/// Convert link rate code to kHz (symbol clock per lane)
pub fn link_rate_to_khz(rate: u8) -> u32 {
    match rate {
        link_rate::RBR => 162000,
        link_rate::HBR => 270000,
        link_rate::HBR2 => 540000,
        link_rate::HBR3 => 810000,
        _ => rate as u32 * link_rate::REF_FREQ_KHZ,
    }
}

/// Payload bandwidth carried by one MST time slot (PBN units).
///
/// Returns 0 for rate codes MST cannot run at.
pub fn pbn_per_slot(rate: u8, lane_count: u8) -> u32 {
    let per_lane = match rate {
        link_rate::RBR => 3,
        link_rate::HBR => 5,
        link_rate::HBR2 => 10,
        link_rate::HBR3 => 15,
        _ => 0,
    };
    per_lane * lane_count as u32
}

/// Data bandwidth of a link after 8b/10b coding, in kbps.
pub fn link_bandwidth_kbps(rate: u8, lane_count: u8) -> u64 {
    // 10 bits per symbol on the wire, 8 of them data
    link_rate_to_khz(rate) as u64 * 8 * lane_count as u64
}
