//! Device wire format
//!
//! Records are four bytes `[x, y, 0, 0]`. Datagrams start with a two-byte
//! little-endian header `(step mod 2^15) << 1 | delaying`. Stream frames start
//! with a four-byte little-endian record count.

use crate::error::DeviceError;
use spikestream_storage::Step;

/// Acknowledgment byte returned by a stream output device
pub const ACK: u8 = 0x06;

/// Request byte sent to a stream input device
pub const ENQ: u8 = 0x05;

/// Size of one record
pub const RECORD_SIZE: usize = 4;

/// Size of the datagram header
pub const DATAGRAM_HEADER_SIZE: usize = 2;

/// Size of the stream frame header
pub const FRAME_HEADER_SIZE: usize = 4;

/// Modulus of the step counter carried in datagram headers
pub const STEP_COUNTER_MODULUS: u32 = 1 << 15;

/// Decoded datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Sender step modulo 2^15
    pub step_counter: u16,
    /// Whether the sender is delaying to stay in sync
    pub delaying: bool,
}

impl DatagramHeader {
    /// Header for `step`
    pub fn new(step: Step, delaying: bool) -> Self {
        Self {
            step_counter: (step % STEP_COUNTER_MODULUS) as u16,
            delaying,
        }
    }

    /// Encode as two little-endian bytes
    pub fn to_bytes(self) -> [u8; 2] {
        ((self.step_counter << 1) | self.delaying as u16).to_le_bytes()
    }

    /// Decode two little-endian bytes
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        let word = u16::from_le_bytes(bytes);
        Self {
            step_counter: word >> 1,
            delaying: word & 1 == 1,
        }
    }
}

/// Check that every coordinate fits the one-byte wire fields
pub fn validate_coordinates(coords: &[(u32, u32)]) -> Result<(), DeviceError> {
    match coords.iter().find(|&&(x, y)| x > 255 || y > 255) {
        Some(&(x, y)) => Err(DeviceError::CoordinateOutOfRange { x, y }),
        None => Ok(()),
    }
}

fn push_records(out: &mut Vec<u8>, coords: &[(u32, u32)]) {
    for &(x, y) in coords {
        out.extend_from_slice(&[x as u8, y as u8, 0, 0]);
    }
}

/// Encode a synchronized datagram
pub fn encode_datagram(step: Step, delaying: bool, coords: &[(u32, u32)]) -> Result<Vec<u8>, DeviceError> {
    validate_coordinates(coords)?;
    let mut out = Vec::with_capacity(DATAGRAM_HEADER_SIZE + coords.len() * RECORD_SIZE);
    out.extend_from_slice(&DatagramHeader::new(step, delaying).to_bytes());
    push_records(&mut out, coords);
    Ok(out)
}

/// Decode a synchronized datagram
pub fn decode_datagram(data: &[u8]) -> Result<(DatagramHeader, Vec<(u8, u8)>), DeviceError> {
    if data.len() < DATAGRAM_HEADER_SIZE {
        return Err(DeviceError::malformed(format!("datagram of {} bytes", data.len())));
    }
    let header = DatagramHeader::from_bytes([data[0], data[1]]);
    let records = decode_records(&data[DATAGRAM_HEADER_SIZE..])?;
    Ok((header, records))
}

/// Encode a stream frame: count then records
pub fn encode_frame(coords: &[(u32, u32)]) -> Result<Vec<u8>, DeviceError> {
    validate_coordinates(coords)?;
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + coords.len() * RECORD_SIZE);
    out.extend_from_slice(&(coords.len() as u32).to_le_bytes());
    push_records(&mut out, coords);
    Ok(out)
}

/// Decode a run of records
pub fn decode_records(data: &[u8]) -> Result<Vec<(u8, u8)>, DeviceError> {
    if data.len() % RECORD_SIZE != 0 {
        return Err(DeviceError::malformed(format!(
            "{} bytes is not a whole number of records",
            data.len()
        )));
    }
    Ok(data.chunks_exact(RECORD_SIZE).map(|r| (r[0], r[1])).collect())
}
