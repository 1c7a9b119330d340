// src/inspector.rs

//! Tools for inspecting the physical structure of buslog files.
//! Useful for checking container sizing and compression ratios.

use std::path::Path;

use serde::Serialize;

use crate::compression::CompressorRegistry;
use crate::error::Result;
use crate::reader::{ContainerRecord, LogReader};

/// A structural report of a log file.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// Total size of the file on disk.
    pub file_size: u64,
    /// Whether the file ends with a valid, non-truncated footer.
    pub complete: bool,
    /// Whether the footer carries the truncated flag.
    pub truncated: bool,
    /// Footer version, if a footer is present.
    pub format_version: Option<u16>,
    /// Number of events across all containers.
    pub event_count: u64,
    /// One entry per container record, in file order.
    pub containers: Vec<ContainerInfo>,
}

/// Metadata for a single container record.
#[derive(Debug, Serialize)]
pub struct ContainerInfo {
    /// Container sequence number.
    pub sequence: u64,
    /// Absolute offset of the record header.
    pub offset: u64,
    /// Number of framed events.
    pub event_count: u32,
    /// Timestamp of the first event.
    pub first_timestamp: u64,
    /// Timestamp of the last event.
    pub last_timestamp: u64,
    /// Payload size before compression.
    pub uncompressed_size: u32,
    /// Payload size on disk.
    pub compressed_size: u32,
    /// Compression algorithm used.
    pub compression_algo: String,
    /// compressed / uncompressed (1.0 for empty containers).
    pub ratio: f64,
}

/// The buslog Inspector tool.
#[derive(Debug)]
pub struct LogInspector;

impl LogInspector {
    /// Analyzes a file and returns a structural report.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<DebugReport> {
        Ok(Self::report(&LogReader::open(path)?))
    }

    /// Analyzes a file whose containers may use custom compressors.
    pub fn inspect_with_registry<P: AsRef<Path>>(
        path: P,
        registry: CompressorRegistry,
    ) -> Result<DebugReport> {
        Ok(Self::report(&LogReader::open_with_registry(path, registry)?))
    }

    /// Analyzes an in-memory copy of a log file.
    pub fn inspect_bytes(bytes: Vec<u8>) -> Result<DebugReport> {
        Ok(Self::report(&LogReader::from_bytes(bytes)?))
    }

    fn report(reader: &LogReader) -> DebugReport {
        let containers: Vec<ContainerInfo> = reader
            .containers()
            .map(Self::inspect_container)
            .collect();
        DebugReport {
            file_size: reader.file_size(),
            complete: reader.is_complete(),
            truncated: reader.is_truncated(),
            format_version: reader.footer().map(|f| f.version),
            event_count: containers.iter().map(|c| u64::from(c.event_count)).sum(),
            containers,
        }
    }

    fn inspect_container(record: ContainerRecord<'_>) -> ContainerInfo {
        let header = record.header();
        let ratio = if header.uncompressed_size == 0 {
            1.0
        } else {
            f64::from(header.compressed_size) / f64::from(header.uncompressed_size)
        };

        ContainerInfo {
            sequence: header.container_sequence,
            offset: record.offset(),
            event_count: header.event_count,
            first_timestamp: header.first_timestamp,
            last_timestamp: header.last_timestamp,
            uncompressed_size: header.uncompressed_size,
            compressed_size: header.compressed_size,
            compression_algo: CompressorRegistry::name_of(header.meta.compression_method()),
            ratio,
        }
    }
}

impl std::fmt::Display for DebugReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== BUSLOG INSPECTOR REPORT ===")?;
        writeln!(f, "File Size:      {}", self.file_size)?;
        let state = match (self.complete, self.truncated) {
            (true, _) => "complete",
            (false, true) => "truncated",
            (false, false) => "unfinished (no footer)",
        };
        writeln!(f, "State:          {state}")?;
        writeln!(f, "Containers:     {}", self.containers.len())?;
        writeln!(f, "Events:         {}", self.event_count)?;
        writeln!(f, "\n[CONTAINERS]")?;

        for (i, c) in self.containers.iter().enumerate() {
            let connector = if i + 1 == self.containers.len() {
                "└── "
            } else {
                "├── "
            };
            writeln!(
                f,
                "{}#{} @{} | Events: {} | ts {}..{} | {}b -> {}b ({:.2}) | Algo: {}",
                connector,
                c.sequence,
                c.offset,
                c.event_count,
                c.first_timestamp,
                c.last_timestamp,
                c.uncompressed_size,
                c.compressed_size,
                c.ratio,
                c.compression_algo
            )?;
        }
        Ok(())
    }
}
