//! VWGT (weight snapshot) format implementation
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "VWGT" | version u32 | created_ns u64 | count u64 | crc32 u32
//! count × (from u32 | to u32 | weight i8)
//! ```
//!
//! The checksum covers the record section only.

use crate::{
    error::{Result, StorageError},
    magic,
    schemas::{calculate_checksum, current_timestamp, validate_checksum, validate_magic, WeightRecord},
    NeuronId, STORAGE_VERSION,
};

use std::{fs, path::Path};

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 4;

/// Size of one encoded weight record in bytes
pub const RECORD_SIZE: usize = 4 + 4 + 1;

/// VWGT format header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSnapshotHeader {
    /// Magic number "VWGT"
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Creation time (nanoseconds since epoch)
    pub created_ns: u64,
    /// Number of records
    pub count: u64,
    /// CRC32 of the record section
    pub checksum: u32,
}

impl WeightSnapshotHeader {
    /// Validate this header
    pub fn validate(&self) -> Result<()> {
        validate_magic(&self.magic, magic::VWGT)?;

        if self.version != STORAGE_VERSION {
            return Err(StorageError::UnsupportedVersion {
                version: self.version,
                supported: STORAGE_VERSION,
            });
        }

        Ok(())
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.created_ns.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
    }

    fn read_from(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StorageError::invalid_format(format!(
                "snapshot header needs {} bytes, found {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        validate_magic(data, magic::VWGT)?;

        let header = Self {
            magic: magic::VWGT,
            version: u32::from_le_bytes(le_array(&data[4..8])),
            created_ns: u64::from_le_bytes(le_array(&data[8..16])),
            count: u64::from_le_bytes(le_array(&data[16..24])),
            checksum: u32::from_le_bytes(le_array(&data[24..28])),
        };
        header.validate()?;
        Ok(header)
    }
}

/// A set of persisted weights with its header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSnapshot {
    /// Snapshot header
    pub header: WeightSnapshotHeader,
    /// Weight records in encoding order
    pub records: Vec<WeightRecord>,
}

impl WeightSnapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(records: Vec<WeightRecord>) -> Self {
        let body = encode_records(&records);
        Self {
            header: WeightSnapshotHeader {
                magic: magic::VWGT,
                version: STORAGE_VERSION,
                created_ns: current_timestamp(),
                count: records.len() as u64,
                checksum: calculate_checksum(&body),
            },
            records,
        }
    }

    /// Encode to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = encode_records(&self.records);
        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        self.header.write_to(&mut out);
        out.extend_from_slice(&body);
        out
    }

    /// Decode from bytes, verifying header and checksum
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = WeightSnapshotHeader::read_from(data)?;
        let body = &data[HEADER_SIZE..];

        let expected_len = usize::try_from(header.count)
            .ok()
            .and_then(|count| count.checked_mul(RECORD_SIZE))
            .ok_or_else(|| StorageError::invalid_format("snapshot record count overflows"))?;
        if body.len() != expected_len {
            return Err(StorageError::invalid_format(format!(
                "snapshot declares {} records ({} bytes) but carries {} bytes",
                header.count,
                expected_len,
                body.len()
            )));
        }
        validate_checksum(body, header.checksum)?;

        let records = body
            .chunks_exact(RECORD_SIZE)
            .map(|chunk| WeightRecord {
                from: NeuronId::new(u32::from_le_bytes(le_array(&chunk[0..4]))),
                to: NeuronId::new(u32::from_le_bytes(le_array(&chunk[4..8]))),
                weight: chunk[8] as i8,
            })
            .collect();

        Ok(Self { header, records })
    }

    /// Write the snapshot to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_bytes())?;
        log::debug!(
            "Wrote {} weights to {}",
            self.records.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Read a snapshot from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }
}

fn encode_records(records: &[WeightRecord]) -> Vec<u8> {
    let mut body = Vec::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        body.extend_from_slice(&record.from.raw().to_le_bytes());
        body.extend_from_slice(&record.to.raw().to_le_bytes());
        body.push(record.weight as u8);
    }
    body
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<WeightRecord> {
        vec![
            WeightRecord { from: NeuronId::new(11), to: NeuronId::new(21), weight: 127 },
            WeightRecord { from: NeuronId::new(12), to: NeuronId::new(21), weight: -64 },
        ]
    }

    #[test]
    fn test_snapshot_layout() {
        let snapshot = WeightSnapshot::new(records());
        let bytes = snapshot.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * RECORD_SIZE);
        assert_eq!(&bytes[0..4], b"VWGT");
        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 4], &11u32.to_le_bytes());
        assert_eq!(bytes[HEADER_SIZE + 8], 127);
        assert_eq!(bytes[HEADER_SIZE + RECORD_SIZE + 8] as i8, -64);
    }

    #[test]
    fn test_snapshot_decode() {
        let snapshot = WeightSnapshot::new(records());
        let decoded = WeightSnapshot::from_bytes(&snapshot.to_bytes()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_corrupted_record_detected() {
        let mut bytes = WeightSnapshot::new(records()).to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            WeightSnapshot::from_bytes(&bytes),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let bytes = WeightSnapshot::new(records()).to_bytes();
        assert!(matches!(
            WeightSnapshot::from_bytes(&bytes[..bytes.len() - 3]),
            Err(StorageError::InvalidFormat { .. })
        ));
        assert!(WeightSnapshot::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut bytes = WeightSnapshot::new(records()).to_bytes();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            WeightSnapshot::from_bytes(&bytes),
            Err(StorageError::UnsupportedVersion { version: 99, .. })
        ));
    }
}
