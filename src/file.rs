//! The log file lifecycle: open, write, flush, close.
//!
//! [`LogFile`] wires the pipeline together:
//!
//! ```text
//! producers ─write()─▶ [event queue] ─▶ builder ─▶ [work queue] ─▶ workers ×N
//!                                                                     │
//!                                       file ◀── ordered writer ◀─────┘
//! ```
//!
//! Every stage runs on its own thread; `write()` only blocks while the event
//! queue is full.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{info, warn};

use crate::builder::ContainerBuilder;
use crate::config::{LogFileBuilder, WriterConfig};
use crate::context::{Command, PipelineContext};
use crate::error::{BuslogError, Result};
use crate::event::Event;
use crate::format::{FOOTER_SIZE, FileFooter, FileStats};
use crate::io::OrderedWriter;
use crate::pool::CompressionPool;

/// How [`LogFile::open`] treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Create the file, discarding any previous contents.
    #[default]
    Truncate,
    /// Continue a finished file: its footer is replaced on close and the
    /// container and event sequences carry on. A missing or empty file is
    /// created.
    Append,
}

/// What `close()` or `abort()` left on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSummary {
    /// Totals written to the footer.
    pub stats: FileStats,
    /// Final size of the file in bytes.
    pub file_size: u64,
    /// True if the file was aborted and pending work was discarded.
    pub truncated: bool,
}

/// An open, writable log file.
///
/// `LogFile` is `Sync`: share it by reference (or in an `Arc`) between
/// producer threads.
///
/// ```rust,no_run
/// use buslog::{LogFile, OpenMode};
///
/// let file = LogFile::open("trace.blog", OpenMode::Truncate)?;
/// file.write(1_000, vec![0x12, 0x34])?;
/// let summary = file.close()?;
/// assert_eq!(summary.stats.event_count, 1);
/// # Ok::<(), buslog::BuslogError>(())
/// ```
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    ctx: Arc<PipelineContext>,
    submit: Mutex<SubmitState>,
    handles: Mutex<Option<PipelineHandles>>,
}

#[derive(Debug)]
struct SubmitState {
    next_sequence: u64,
    closed: bool,
}

#[derive(Debug)]
struct PipelineHandles {
    builder: JoinHandle<u64>,
    writer: JoinHandle<OrderedWriter<File>>,
    pool: CompressionPool,
}

impl LogFile {
    /// Returns a builder to configure the pipeline before opening.
    pub fn builder() -> LogFileBuilder {
        LogFileBuilder::new()
    }

    /// Opens `path` with the default configuration.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        Self::open_with_config(path, mode, WriterConfig::default())
    }

    /// Opens `path` and starts the builder, worker and writer threads.
    ///
    /// # Errors
    /// `BuslogError::Io` if the file cannot be created or opened, or a
    /// thread cannot be spawned; `BuslogError::Format` if `Append` finds a
    /// file that is unfinished or was aborted.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        config: WriterConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (file, stats) = match mode {
            OpenMode::Truncate => (File::create(&path)?, FileStats::default()),
            OpenMode::Append => open_for_append(&path)?,
        };

        let ctx = Arc::new(PipelineContext::new(
            config.queue_size(),
            config.compression_threads(),
            config.uncompressed_buffer_size(),
            stats.container_count,
        )?);

        let handles = spawn_pipeline(&ctx, &config, file, stats).inspect_err(|_| {
            ctx.shutdown();
        })?;

        info!(
            path = %path.display(),
            ?mode,
            queue_size = config.queue_size(),
            log_container_size = config.log_container_size(),
            compression_threads = config.compression_threads(),
            compressor = config.compressor().id(),
            "log file opened"
        );

        Ok(Self {
            path,
            ctx,
            submit: Mutex::new(SubmitState {
                next_sequence: stats.event_count,
                closed: false,
            }),
            handles: Mutex::new(Some(handles)),
        })
    }

    fn lock_submit(&self) -> MutexGuard<'_, SubmitState> {
        self.submit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submits one event and returns its sequence number.
    ///
    /// Blocks while the event queue is full. Sequence numbers are assigned in
    /// the order producers enter the queue, so the file preserves exactly
    /// that order.
    ///
    /// # Errors
    /// `BuslogError::Closed` after `close()`/`abort()`, or the pipeline's
    /// fatal error once one occurred.
    pub fn write(&self, timestamp: u64, payload: impl Into<Vec<u8>>) -> Result<u64> {
        let mut submit = self.lock_submit();
        if submit.closed {
            return Err(BuslogError::Closed);
        }
        if let Some(err) = self.ctx.failure() {
            return Err(err);
        }

        let sequence = submit.next_sequence;
        let event = Event::new(sequence, timestamp, payload.into());
        self.ctx
            .events
            .push(Command::Event(event))
            .map_err(|_| self.ctx.failure_or_closed())?;
        submit.next_sequence += 1;
        Ok(sequence)
    }

    /// Serializes `value` with bincode and submits it as the event payload.
    ///
    /// # Errors
    /// `BuslogError::Serialization` if encoding fails, otherwise as
    /// [`LogFile::write`].
    pub fn write_serialized<T: Serialize>(&self, timestamp: u64, value: &T) -> Result<u64> {
        let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| BuslogError::Serialization(e.to_string()))?;
        self.write(timestamp, payload)
    }

    /// Seals the open container and waits until every container sealed so
    /// far has been written and flushed to the OS.
    ///
    /// # Errors
    /// `BuslogError::Closed` after `close()`, or the pipeline's fatal error.
    pub fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        {
            let submit = self.lock_submit();
            if submit.closed {
                return Err(BuslogError::Closed);
            }
            self.ctx
                .events
                .push(Command::Flush(reply_tx))
                .map_err(|_| self.ctx.failure_or_closed())?;
        }

        let target = reply_rx.recv().map_err(|_| self.ctx.failure_or_closed())?;
        self.ctx.progress.request(target);
        self.ctx.progress.wait_flushed(target, &self.ctx)
    }

    /// Number of events submitted so far, including earlier appended runs.
    pub fn events_submitted(&self) -> u64 {
        self.lock_submit().next_sequence
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains the pipeline, writes the footer and closes the file.
    ///
    /// # Errors
    /// The first fatal error the pipeline hit, even if it happened long
    /// before this call; `BuslogError::DrainIncomplete` if containers were
    /// lost; `BuslogError::Closed` on a second call.
    pub fn close(&self) -> Result<FileSummary> {
        let handles = self.take_handles()?;
        self.ctx.events.close();

        let (sealed, mut writer) = join_pipeline(handles)?;

        if let Some(err) = self.ctx.failure() {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "could not flush records written before the failure");
            }
            return Err(err);
        }

        let (file, stats) = writer.finish(sealed)?;
        let summary = finalize(file, stats, false)?;
        info!(
            path = %self.path.display(),
            containers = summary.stats.container_count,
            events = summary.stats.event_count,
            bytes = summary.file_size,
            "log file closed"
        );
        Ok(summary)
    }

    /// Stops the pipeline without draining it.
    ///
    /// Queued events and containers not yet written are discarded. The footer
    /// is flagged as truncated so the file is never mistaken for a clean
    /// close.
    ///
    /// # Errors
    /// The pipeline's fatal error if one occurred before the abort (no footer
    /// is written then), or `BuslogError::Closed` on a second call.
    pub fn abort(&self) -> Result<FileSummary> {
        self.ctx.shutdown();
        let handles = self.take_handles()?;

        let (_, writer) = join_pipeline(handles)?;
        if let Some(err) = self.ctx.failure() {
            return Err(err);
        }

        let (file, stats) = writer.finish_truncated()?;
        let summary = finalize(file, stats, true)?;
        warn!(
            path = %self.path.display(),
            containers = summary.stats.container_count,
            "log file aborted, pending events discarded"
        );
        Ok(summary)
    }

    fn take_handles(&self) -> Result<PipelineHandles> {
        {
            let mut submit = self.lock_submit();
            if submit.closed {
                return Err(BuslogError::Closed);
            }
            submit.closed = true;
        }
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BuslogError::Closed)
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        let open = self
            .handles
            .get_mut()
            .map(|handles| handles.is_some())
            .unwrap_or(false);
        if open && let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close log file on drop");
        }
    }
}

fn spawn_pipeline(
    ctx: &Arc<PipelineContext>,
    config: &WriterConfig,
    file: File,
    stats: FileStats,
) -> Result<PipelineHandles> {
    let (completion_tx, completion_rx) = mpsc::sync_channel(config.compression_threads());
    let pool = CompressionPool::spawn(
        config.compression_threads(),
        Arc::clone(config.compressor()),
        Arc::clone(ctx),
        completion_tx,
    )?;

    let writer = OrderedWriter::resume(file, stats);
    let writer_ctx = Arc::clone(ctx);
    let writer = thread::Builder::new()
        .name("buslog-writer".into())
        .spawn(move || writer.drive(&writer_ctx, completion_rx))?;

    let builder = ContainerBuilder::new(config.log_container_size(), stats.container_count);
    let builder_ctx = Arc::clone(ctx);
    let builder = thread::Builder::new()
        .name("buslog-builder".into())
        .spawn(move || builder.run(&builder_ctx))?;

    Ok(PipelineHandles {
        builder,
        writer,
        pool,
    })
}

/// Joins the builder and writer threads in pipeline order.
///
/// The builder closes the work queue when it exits, which lets the workers
/// exit, which disconnects the writer.
fn join_pipeline(handles: PipelineHandles) -> Result<(u64, OrderedWriter<File>)> {
    let sealed = handles
        .builder
        .join()
        .map_err(|_| BuslogError::Internal("container builder thread panicked".into()))?;
    let writer = handles
        .writer
        .join()
        .map_err(|_| BuslogError::Internal("writer thread panicked".into()))?;
    drop(handles.pool);
    Ok((sealed, writer))
}

fn finalize(file: File, stats: FileStats, truncated: bool) -> Result<FileSummary> {
    file.sync_all()?;
    let file_size = file.metadata()?.len();
    Ok(FileSummary {
        stats,
        file_size,
        truncated,
    })
}

/// Opens a finished file for appending and strips its footer.
fn open_for_append(path: &Path) -> Result<(File, FileStats)> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok((file, FileStats::default()));
    }
    if len < FOOTER_SIZE as u64 {
        return Err(BuslogError::Format(format!(
            "{} is too small to hold a footer",
            path.display()
        )));
    }

    let footer_start = len - FOOTER_SIZE as u64;
    let mut bytes = [0u8; FOOTER_SIZE];
    file.seek(SeekFrom::Start(footer_start))?;
    file.read_exact(&mut bytes)?;
    let footer = FileFooter::from_bytes(&bytes).map_err(|e| {
        BuslogError::Format(format!("{} is not a finished log file: {e}", path.display()))
    })?;
    if footer.is_truncated() {
        return Err(BuslogError::Format(format!(
            "{} was aborted and cannot be appended to",
            path.display()
        )));
    }

    file.set_len(footer_start)?;
    file.seek(SeekFrom::Start(footer_start))?;
    Ok((file, footer.stats))
}
