//! Containers: the unit of batching, compression and writing.
//!
//! A [`Container`] is filled by the builder and sealed once. After sealing it
//! moves to a compression worker, which turns it into a
//! [`CompressedContainer`] that moves on to the ordered writer.

use crate::error::{BuslogError, Result};
use crate::event::Event;
use crate::format::{ContainerHeader, MetaByte};

/// A batch of framed events.
#[derive(Debug, Default)]
pub struct Container {
    sequence: u64,
    raw: Vec<u8>,
    event_count: u32,
    first_timestamp: u64,
    last_timestamp: u64,
}

impl Container {
    /// Opens an empty container that will carry `sequence` once sealed.
    pub fn with_capacity(sequence: u64, capacity: usize) -> Self {
        Self {
            sequence,
            raw: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Appends a framed event.
    pub fn push(&mut self, event: &Event) {
        if self.event_count == 0 {
            self.first_timestamp = event.timestamp();
        }
        self.last_timestamp = event.timestamp();
        self.event_count += 1;
        event.encode_into(&mut self.raw);
    }

    /// Container sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Framed event bytes.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Number of framed bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True if no event has been pushed.
    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    /// Number of events in the container.
    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    /// Timestamp of the first event.
    pub fn first_timestamp(&self) -> u64 {
        self.first_timestamp
    }

    /// Timestamp of the last event.
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    /// Consumes the container and returns the framed bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

/// The compressed form of one sealed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedContainer {
    header: ContainerHeader,
    data: Vec<u8>,
}

impl CompressedContainer {
    /// Wraps the output of a compressor for the container described by the
    /// remaining arguments.
    ///
    /// # Errors
    /// Returns `BuslogError::Compression` if either size overflows the
    /// 32-bit fields of the record header.
    pub fn new(
        sequence: u64,
        event_count: u32,
        timestamps: (u64, u64),
        uncompressed_size: usize,
        compression_id: u8,
        data: Vec<u8>,
    ) -> Result<Self> {
        let uncompressed_size = u32::try_from(uncompressed_size).map_err(|_| {
            BuslogError::Compression(format!(
                "container {sequence} holds {uncompressed_size} bytes, more than a record can describe"
            ))
        })?;
        let compressed_size = u32::try_from(data.len()).map_err(|_| {
            BuslogError::Compression(format!(
                "container {sequence} compressed to {} bytes, more than a record can describe",
                data.len()
            ))
        })?;

        Ok(Self {
            header: ContainerHeader {
                meta: MetaByte::new(compression_id),
                container_sequence: sequence,
                event_count,
                first_timestamp: timestamps.0,
                last_timestamp: timestamps.1,
                uncompressed_size,
                compressed_size,
            },
            data,
        })
    }

    /// Container sequence number.
    pub fn sequence(&self) -> u64 {
        self.header.container_sequence
    }

    /// Record header describing this container.
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Compressed payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
