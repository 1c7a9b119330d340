//! Defines the physical binary layout of buslog files.
//!
//! # Layout
//! The file is a sequence of container records in ascending, gap-free
//! container-sequence order, followed by a fixed-size footer.
//!
//! File: `[Record 0] [Record 1] ... [Record n-1] [Footer]`
//!
//! ## Record Anatomy
//! `[ ContainerHeader (44 bytes) ] [ Compressed Payload ]`
//!
//! A file without a valid footer is unfinished: the writer stopped on a fatal
//! error before `close()` could complete.

use crate::error::{BuslogError, Result};

/// Magic bytes opening every container record: "LOBJ".
pub const RECORD_MAGIC: [u8; 4] = *b"LOBJ";

/// Object type tag of a log container record.
pub const LOG_CONTAINER_TYPE: u16 = 10;

/// Magic bytes opening the footer: "BLOG".
pub const FOOTER_MAGIC: [u8; 4] = *b"BLOG";

/// Current footer version.
pub const FORMAT_VERSION: u16 = 1;

/// Magic(4) + Type(2) + Meta(1) + Reserved(1) + Sequence(8) + EventCount(4)
/// + FirstTs(8) + LastTs(8) + Uncompressed(4) + Compressed(4) = 44
pub const RECORD_HEADER_SIZE: usize = 44;

/// Magic(4) + Version(2) + Flags(2) + Containers(8) + Events(8) + Bytes(8)
/// + FirstTs(8) + LastTs(8) + Reserved(12) + Checksum(4) = 64
pub const FOOTER_SIZE: usize = 64;

/// Per-record flags, stored in the meta byte of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaByte(u8);

impl MetaByte {
    const COMPRESSION_MASK: u8 = 0b0000_1110; // Bits 1-3

    /// Creates a new MetaByte.
    pub fn new(compression_id: u8) -> Self {
        Self((compression_id & 0x07) << 1)
    }

    /// Decodes the byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the compression algorithm ID (0-7).
    pub fn compression_method(&self) -> u8 {
        (self.0 & Self::COMPRESSION_MASK) >> 1
    }

    /// Returns the raw byte representation.
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// Fixed-size header in front of each compressed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Compressor id and reserved flag bits.
    pub meta: MetaByte,
    /// Position of the container in the file.
    pub container_sequence: u64,
    /// Number of events framed in the container.
    pub event_count: u32,
    /// Timestamp of the first event.
    pub first_timestamp: u64,
    /// Timestamp of the last event.
    pub last_timestamp: u64,
    /// Payload size before compression.
    pub uncompressed_size: u32,
    /// Payload size on disk.
    pub compressed_size: u32,
}

impl ContainerHeader {
    /// Serializes to a fixed-size byte array (Little Endian).
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&RECORD_MAGIC);
        buf[4..6].copy_from_slice(&LOG_CONTAINER_TYPE.to_le_bytes());
        buf[6] = self.meta.as_u8();
        buf[8..16].copy_from_slice(&self.container_sequence.to_le_bytes());
        buf[16..20].copy_from_slice(&self.event_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.first_timestamp.to_le_bytes());
        buf[28..36].copy_from_slice(&self.last_timestamp.to_le_bytes());
        buf[36..40].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        buf[40..44].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf
    }

    /// Deserializes from the front of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes
            .get(..RECORD_HEADER_SIZE)
            .ok_or_else(|| BuslogError::Format("Buffer too small for container header".into()))?;
        if bytes[0..4] != RECORD_MAGIC {
            return Err(BuslogError::Format("Invalid record magic".into()));
        }
        let object_type = u16::from_le_bytes([bytes[4], bytes[5]]);
        if object_type != LOG_CONTAINER_TYPE {
            return Err(BuslogError::Format(format!(
                "Unknown object type: {object_type}"
            )));
        }

        Ok(Self {
            meta: MetaByte::from_byte(bytes[6]),
            container_sequence: read_u64(bytes, 8),
            event_count: read_u32(bytes, 16),
            first_timestamp: read_u64(bytes, 20),
            last_timestamp: read_u64(bytes, 28),
            uncompressed_size: read_u32(bytes, 36),
            compressed_size: read_u32(bytes, 40),
        })
    }

    /// Total record length on disk.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + u64::from(self.compressed_size)
    }
}

/// Running totals over the containers of a file.
///
/// The writer keeps these up to date and persists them in the footer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    /// Number of container records.
    pub container_count: u64,
    /// Number of events across all containers.
    pub event_count: u64,
    /// Sum of the uncompressed container sizes.
    pub uncompressed_bytes: u64,
    /// Timestamp of the first event in file order (0 when empty).
    pub first_timestamp: u64,
    /// Timestamp of the last event in file order (0 when empty).
    pub last_timestamp: u64,
}

impl FileStats {
    /// Accounts for one more container appended to the file.
    pub fn record(&mut self, header: &ContainerHeader) {
        if self.event_count == 0 && header.event_count > 0 {
            self.first_timestamp = header.first_timestamp;
        }
        if header.event_count > 0 {
            self.last_timestamp = header.last_timestamp;
        }
        self.container_count += 1;
        self.event_count += u64::from(header.event_count);
        self.uncompressed_bytes += u64::from(header.uncompressed_size);
    }
}

/// The footer located at the very end of a finished file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFooter {
    /// Format version.
    pub version: u16,
    /// Footer flags, see [`FileFooter::TRUNCATED`].
    pub flags: u16,
    /// Totals over all records.
    pub stats: FileStats,
    /// CRC32 over the preceding footer bytes.
    pub checksum: u32,
}

impl FileFooter {
    /// Set when the file was closed with `abort()` and work was discarded.
    pub const TRUNCATED: u16 = 0b0000_0001;

    /// Creates a footer for the given totals.
    pub fn new(stats: FileStats, truncated: bool) -> Self {
        let flags = if truncated { Self::TRUNCATED } else { 0 };
        let mut footer = Self {
            version: FORMAT_VERSION,
            flags,
            stats,
            checksum: 0,
        };
        footer.checksum = crc32fast::hash(&footer.to_bytes()[..FOOTER_SIZE - 4]);
        footer
    }

    /// Returns true if the writer discarded work before finishing.
    pub fn is_truncated(&self) -> bool {
        self.flags & Self::TRUNCATED != 0
    }

    /// Serializes the footer to bytes.
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..4].copy_from_slice(&FOOTER_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.stats.container_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.stats.event_count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.stats.uncompressed_bytes.to_le_bytes());
        buf[32..40].copy_from_slice(&self.stats.first_timestamp.to_le_bytes());
        buf[40..48].copy_from_slice(&self.stats.last_timestamp.to_le_bytes());
        buf[60..64].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parses and verifies a footer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FOOTER_SIZE {
            return Err(BuslogError::Format(format!(
                "Footer must be {FOOTER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0..4] != FOOTER_MAGIC {
            return Err(BuslogError::Format("Invalid footer magic".into()));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(BuslogError::Format(format!("Unsupported version: {version}")));
        }

        let checksum = read_u32(bytes, 60);
        let actual = crc32fast::hash(&bytes[..FOOTER_SIZE - 4]);
        if checksum != actual {
            return Err(BuslogError::Format(format!(
                "Footer checksum mismatch: expected {checksum:#010x}, got {actual:#010x}"
            )));
        }

        Ok(Self {
            version,
            flags: u16::from_le_bytes([bytes[6], bytes[7]]),
            stats: FileStats {
                container_count: read_u64(bytes, 8),
                event_count: read_u64(bytes, 16),
                uncompressed_bytes: read_u64(bytes, 24),
                first_timestamp: read_u64(bytes, 32),
                last_timestamp: read_u64(bytes, 40),
            },
            checksum,
        })
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap_or([0; 8]))
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap_or([0; 4]))
}
