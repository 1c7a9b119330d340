//! # buslog
//!
//! A concurrent, order-preserving writer for container-structured bus-trace
//! log files.
//!
//! ## Overview
//!
//! Bus loggers record CAN, LIN or Ethernet frames at a high, bursty rate. Writing
//! every frame synchronously ties producer latency to disk and compressor speed.
//! buslog decouples the two: producers hand events to a bounded queue and
//! return, while a background pipeline packs the events into containers,
//! compresses the containers in parallel and appends them to the file in
//! exactly the order the events were submitted.
//!
//! ### Key Features
//!
//! *   **Parallel Compression:** Sealed containers are compressed on a
//!     dedicated Rayon pool, one long-lived worker per thread.
//! *   **Strict Ordering:** The ordered writer resequences completed containers,
//!     so the bytes on disk do not depend on the number of workers.
//! *   **Back-pressure:** The event queue and an in-flight byte window bound the
//!     memory held by the pipeline; producers block instead of allocating.
//! *   **Fail-fast:** The first I/O or codec failure stops the whole pipeline
//!     and is reported to every later caller.
//!
//! ## Architecture
//!
//! ```text
//! producers ─▶ [BoundedChannel] ─▶ ContainerBuilder ─▶ [work queue]
//!                                                          │
//!      file ◀── OrderedWriter ◀── CompressionPool ◀────────┘
//! ```
//!
//! ### File Format
//!
//! ```text
//! [Record 0] [Record 1] ... [Record n-1] [Footer]
//! ```
//!
//! Each record is a fixed 44-byte header followed by the compressed
//! container. The 64-byte footer carries the totals and a CRC32. A file
//! without a footer was not closed cleanly. See [`format`] for the details.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use buslog::{LogFile, LogReader, OpenMode};
//!
//! let file = LogFile::builder()
//!     .log_container_size(64 * 1024)
//!     .compression_threads(4)
//!     .open("trace.blog", OpenMode::Truncate)?;
//!
//! for ts in 0..10_000u64 {
//!     file.write(ts, ts.to_le_bytes().to_vec())?;
//! }
//! let summary = file.close()?;
//! println!("{} containers", summary.stats.container_count);
//!
//! let reader = LogReader::open("trace.blog")?;
//! assert_eq!(reader.events()?.len(), 10_000);
//! # Ok::<(), buslog::BuslogError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** `unsafe` is used only to memory-map files in the
//!   [`reader`] module.
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`BuslogError`] type.
//! * **Robust Shutdown:** Poisoned locks are recovered and blocked producers are
//!   woken on failure.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod compression;
pub mod config;
pub mod error;
pub mod event;
pub mod file;
pub mod format;
pub mod inspector;
pub mod reader;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod builder;
#[doc(hidden)]
pub mod channel;
#[doc(hidden)]
pub mod container;
#[doc(hidden)]
pub mod context;
#[doc(hidden)]
pub mod io;
#[doc(hidden)]
pub mod pool;
#[doc(hidden)]
pub mod varint;

// --- RE-EXPORTS ---

#[cfg(feature = "lz4_flex")]
pub use compression::Lz4Compressor;
pub use compression::{Compressor, CompressorRegistry, NoCompression};

pub use config::{LogFileBuilder, WriterConfig};
pub use error::{BuslogError, Result};
pub use event::Event;
pub use file::{FileSummary, LogFile, OpenMode};
pub use format::{FileFooter, FileStats};
pub use inspector::LogInspector;
pub use reader::LogReader;

/// Constants used throughout the library.
pub mod constants {
    /// Default capacity of the producer hand-off queue, in events.
    pub const DEFAULT_QUEUE_SIZE: usize = 1024;

    /// Default byte threshold at which a container is sealed (128 KiB).
    pub const DEFAULT_LOG_CONTAINER_SIZE: u32 = 0x20000;

    /// Default in-flight window, in containers.
    pub const WINDOW_CONTAINERS: u64 = 4;
}
