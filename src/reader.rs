//! The read-side engine.
//!
//! Maps a log file into memory, validates its record sequence and footer, and
//! reconstructs the events in file order.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::compression::CompressorRegistry;
use crate::error::{BuslogError, Result};
use crate::event::{self, Event};
use crate::format::{
    ContainerHeader, FOOTER_MAGIC, FOOTER_SIZE, FileFooter, FileStats, RECORD_HEADER_SIZE,
};

#[derive(Debug)]
enum DataSource {
    Mmap(Mmap),
    Memory(Vec<u8>),
    Empty,
}

impl DataSource {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mmap(mmap) => mmap,
            Self::Memory(bytes) => bytes,
            Self::Empty => &[],
        }
    }
}

/// A validated, read-only view of a log file.
#[derive(Debug)]
pub struct LogReader {
    source: DataSource,
    headers: Vec<(u64, ContainerHeader)>,
    footer: Option<FileFooter>,
    registry: CompressorRegistry,
}

/// One container record inside a [`LogReader`].
#[derive(Debug, Clone, Copy)]
pub struct ContainerRecord<'a> {
    reader: &'a LogReader,
    offset: u64,
    header: ContainerHeader,
}

impl LogReader {
    /// Opens and validates a log file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_registry(path, CompressorRegistry::new())
    }

    /// Opens a file whose containers may use custom compressors.
    pub fn open_with_registry<P: AsRef<Path>>(
        path: P,
        registry: CompressorRegistry,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let source = if file_size == 0 {
            DataSource::Empty
        } else {
            // Safety: the file must not be modified while mapped. Log files are
            // only read after the writer has closed them.
            #[allow(unsafe_code)]
            let mmap = unsafe { Mmap::map(&file)? };
            DataSource::Mmap(mmap)
        };
        Self::from_source(source, registry)
    }

    /// Validates an in-memory copy of a log file.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_registry(bytes, CompressorRegistry::new())
    }

    /// Validates an in-memory copy that may use custom compressors.
    pub fn from_bytes_with_registry(bytes: Vec<u8>, registry: CompressorRegistry) -> Result<Self> {
        Self::from_source(DataSource::Memory(bytes), registry)
    }

    fn from_source(source: DataSource, registry: CompressorRegistry) -> Result<Self> {
        let (headers, footer) = scan(source.bytes())?;
        Ok(Self {
            source,
            headers,
            footer,
            registry,
        })
    }

    /// The footer, or `None` for an unfinished file.
    pub fn footer(&self) -> Option<&FileFooter> {
        self.footer.as_ref()
    }

    /// True if the file was closed cleanly: it has a footer without the
    /// truncated flag.
    pub fn is_complete(&self) -> bool {
        self.footer.is_some_and(|f| !f.is_truncated())
    }

    /// True if the file was closed with `abort()`.
    pub fn is_truncated(&self) -> bool {
        self.footer.is_some_and(|f| f.is_truncated())
    }

    /// Size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.source.bytes().len() as u64
    }

    /// Number of container records.
    pub fn container_count(&self) -> usize {
        self.headers.len()
    }

    /// Totals recomputed from the record headers.
    pub fn stats(&self) -> FileStats {
        let mut stats = FileStats::default();
        for (_, header) in &self.headers {
            stats.record(header);
        }
        stats
    }

    /// The container records in file order.
    pub fn containers(&self) -> impl Iterator<Item = ContainerRecord<'_>> {
        self.headers.iter().map(move |(offset, header)| ContainerRecord {
            reader: self,
            offset: *offset,
            header: *header,
        })
    }

    /// Decompresses every container and returns all events in file order.
    pub fn events(&self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for container in self.containers() {
            events.extend(container.events()?);
        }
        Ok(events)
    }
}

impl<'a> ContainerRecord<'a> {
    /// Absolute offset of the record header.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The record header.
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// The compressed payload as stored on disk.
    pub fn raw_payload(&self) -> &'a [u8] {
        let start = self.offset as usize + RECORD_HEADER_SIZE;
        let end = start + self.header.compressed_size as usize;
        &self.reader.source.bytes()[start..end]
    }

    /// Decompresses the payload.
    pub fn read_payload(&self) -> Result<Cow<'a, [u8]>> {
        let algo_id = self.header.meta.compression_method();
        let payload = self.reader.registry.get(algo_id)?.decompress(self.raw_payload())?;
        if payload.len() != self.header.uncompressed_size as usize {
            return Err(BuslogError::Format(format!(
                "container {} decompressed to {} bytes, header says {}",
                self.header.container_sequence,
                payload.len(),
                self.header.uncompressed_size
            )));
        }
        Ok(payload)
    }

    /// Decodes the events framed in this container.
    pub fn events(&self) -> Result<Vec<Event>> {
        let payload = self.read_payload()?;
        let events = event::decode_events(&payload)?;
        if events.len() != self.header.event_count as usize {
            return Err(BuslogError::Format(format!(
                "container {} holds {} events, header says {}",
                self.header.container_sequence,
                events.len(),
                self.header.event_count
            )));
        }
        Ok(events)
    }
}

/// Walks the records from the start of the file and validates the layout.
fn scan(bytes: &[u8]) -> Result<(Vec<(u64, ContainerHeader)>, Option<FileFooter>)> {
    let mut headers: Vec<(u64, ContainerHeader)> = Vec::new();
    let mut footer = None;
    let mut pos = 0usize;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() == FOOTER_SIZE && rest[..4] == FOOTER_MAGIC {
            footer = Some(FileFooter::from_bytes(rest)?);
            break;
        }

        let header = ContainerHeader::from_bytes(rest)
            .map_err(|e| BuslogError::Format(format!("bad record at offset {pos}: {e}")))?;
        if let Some((_, prev)) = headers.last() {
            let expected = prev.container_sequence.checked_add(1).ok_or_else(|| {
                BuslogError::Format(format!(
                    "container sequence overflows after {} at offset {pos}",
                    prev.container_sequence
                ))
            })?;
            if header.container_sequence != expected {
                return Err(BuslogError::Format(format!(
                    "container sequence jumps from {} to {} at offset {pos}",
                    prev.container_sequence, header.container_sequence
                )));
            }
        }

        let record_len = header.record_len() as usize;
        if rest.len() < record_len {
            return Err(BuslogError::Format(format!(
                "record {} at offset {pos} is truncated",
                header.container_sequence
            )));
        }
        headers.push((pos as u64, header));
        pos += record_len;
    }

    if let Some(first) = headers.first()
        && first.1.container_sequence != 0
    {
        return Err(BuslogError::Format(format!(
            "first container has sequence {}, expected 0",
            first.1.container_sequence
        )));
    }

    if let Some(footer) = &footer {
        let mut stats = FileStats::default();
        for (_, header) in &headers {
            stats.record(header);
        }
        if stats != footer.stats {
            return Err(BuslogError::Format(format!(
                "footer totals {:?} do not match the records {:?}",
                footer.stats, stats
            )));
        }
    }

    Ok((headers, footer))
}
