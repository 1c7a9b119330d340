//! Writer configuration.
//!
//! All knobs are collected in one immutable [`WriterConfig`], validated as a
//! whole before the pipeline starts. Use [`LogFileBuilder`] (via
//! [`LogFile::builder`](crate::LogFile::builder)) to assemble one.

use std::path::Path;
use std::sync::Arc;

use crate::compression::{self, Compressor, MAX_COMPRESSOR_ID, NoCompression};
use crate::constants::{DEFAULT_LOG_CONTAINER_SIZE, DEFAULT_QUEUE_SIZE, WINDOW_CONTAINERS};
use crate::error::{BuslogError, Result};
use crate::file::{LogFile, OpenMode};

/// Validated settings of one log file pipeline.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    queue_size: usize,
    log_container_size: u32,
    compression_threads: usize,
    uncompressed_buffer_size: u64,
    compressor: Arc<dyn Compressor>,
}

impl WriterConfig {
    /// Capacity of the producer hand-off queue, in events.
    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Byte threshold at which a container is sealed.
    pub fn log_container_size(&self) -> u32 {
        self.log_container_size
    }

    /// Number of compression workers.
    pub fn compression_threads(&self) -> usize {
        self.compression_threads
    }

    /// Budget of uncompressed bytes between sealing and writing.
    pub fn uncompressed_buffer_size(&self) -> u64 {
        self.uncompressed_buffer_size
    }

    /// Codec applied to every container.
    pub fn compressor(&self) -> &Arc<dyn Compressor> {
        &self.compressor
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        let log_container_size = DEFAULT_LOG_CONTAINER_SIZE;
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            log_container_size,
            compression_threads: default_compression_threads(),
            uncompressed_buffer_size: u64::from(log_container_size) * WINDOW_CONTAINERS,
            compressor: compression::default_compressor(),
        }
    }
}

/// Number of compression workers used when none is configured.
pub fn default_compression_threads() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Fluent builder for [`WriterConfig`] and [`LogFile`].
///
/// ```rust
/// use buslog::LogFile;
///
/// let config = LogFile::builder()
///     .queue_size(4096)
///     .log_container_size(64 * 1024)
///     .compression_threads(2)
///     .config()?;
/// assert_eq!(config.uncompressed_buffer_size(), 4 * 64 * 1024);
/// # Ok::<(), buslog::BuslogError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LogFileBuilder {
    queue_size: usize,
    log_container_size: u32,
    compression_threads: usize,
    uncompressed_buffer_size: Option<u64>,
    compressor: Arc<dyn Compressor>,
}

impl Default for LogFileBuilder {
    fn default() -> Self {
        let defaults = WriterConfig::default();
        Self {
            queue_size: defaults.queue_size,
            log_container_size: defaults.log_container_size,
            compression_threads: defaults.compression_threads,
            uncompressed_buffer_size: None,
            compressor: defaults.compressor,
        }
    }
}

impl LogFileBuilder {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity of the producer hand-off queue (must be > 0).
    pub fn queue_size(mut self, events: usize) -> Self {
        self.queue_size = events;
        self
    }

    /// Byte threshold at which a container is sealed (must be > 0).
    pub fn log_container_size(mut self, bytes: u32) -> Self {
        self.log_container_size = bytes;
        self
    }

    /// Number of compression workers (must be > 0).
    pub fn compression_threads(mut self, threads: usize) -> Self {
        self.compression_threads = threads;
        self
    }

    /// Budget of uncompressed bytes in flight between sealing and writing.
    ///
    /// Values below the container size are raised to it. Defaults to four
    /// containers.
    pub fn uncompressed_buffer_size(mut self, bytes: u64) -> Self {
        self.uncompressed_buffer_size = Some(bytes);
        self
    }

    /// Toggles between the default compressor and no compression.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compressor = if enabled {
            compression::default_compressor()
        } else {
            Arc::new(NoCompression)
        };
        self
    }

    /// Uses a custom compressor.
    pub fn compressor<C: Compressor + 'static>(mut self, compressor: C) -> Self {
        self.compressor = Arc::new(compressor);
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// Returns `BuslogError::Config` naming the first invalid option.
    pub fn config(self) -> Result<WriterConfig> {
        if self.queue_size == 0 {
            return Err(BuslogError::Config("queue_size must be greater than 0".into()));
        }
        if self.log_container_size == 0 {
            return Err(BuslogError::Config(
                "log_container_size must be greater than 0".into(),
            ));
        }
        if self.compression_threads == 0 {
            return Err(BuslogError::Config(
                "compression_threads must be greater than 0".into(),
            ));
        }
        if self.compressor.id() > MAX_COMPRESSOR_ID {
            return Err(BuslogError::Config(format!(
                "compressor id {} exceeds the maximum of {MAX_COMPRESSOR_ID}",
                self.compressor.id()
            )));
        }

        let container = u64::from(self.log_container_size);
        let uncompressed_buffer_size = self
            .uncompressed_buffer_size
            .unwrap_or(container * WINDOW_CONTAINERS)
            .max(container);

        Ok(WriterConfig {
            queue_size: self.queue_size,
            log_container_size: self.log_container_size,
            compression_threads: self.compression_threads,
            uncompressed_buffer_size,
            compressor: self.compressor,
        })
    }

    /// Validates the settings and opens the file.
    pub fn open<P: AsRef<Path>>(self, path: P, mode: OpenMode) -> Result<LogFile> {
        LogFile::open_with_config(path, mode, self.config()?)
    }
}
