//! The order-restoring sequential writer.
//!
//! Compression workers complete containers in any order. The
//! [`OrderedWriter`] parks early arrivals in a resequencing buffer keyed by
//! container sequence number and appends a container to the output only when
//! every container before it has been written. It is the single owner of the
//! output stream; no other thread writes to the file.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::sync::mpsc::{Receiver, TryRecvError};

use tracing::{debug, error};

use crate::container::CompressedContainer;
use crate::context::PipelineContext;
use crate::error::{BuslogError, Result};
use crate::format::{FileFooter, FileStats};
use crate::pool::Completion;

/// Capacity of the buffered output stream.
pub const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Resequencing writer over any byte sink.
#[derive(Debug)]
pub struct OrderedWriter<W: Write> {
    writer: BufWriter<W>,
    next_expected: u64,
    pending: BTreeMap<u64, CompressedContainer>,
    stats: FileStats,
    dirty: bool,
}

impl<W: Write> OrderedWriter<W> {
    /// Creates a writer for a fresh, empty output.
    pub fn new(inner: W) -> Self {
        Self::resume(inner, FileStats::default())
    }

    /// Creates a writer continuing a file that already holds the containers
    /// described by `stats`, with the stream positioned at its end.
    pub fn resume(inner: W, stats: FileStats) -> Self {
        Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, inner),
            next_expected: stats.container_count,
            pending: BTreeMap::new(),
            stats,
            dirty: false,
        }
    }

    /// Accepts one completed container.
    ///
    /// Writes it if it is the next expected one, together with every
    /// contiguous successor already parked; otherwise parks it. Returns the
    /// uncompressed bytes written by this call.
    ///
    /// # Errors
    /// `BuslogError::Internal` for a sequence number that was already written
    /// or is already parked; `BuslogError::Io` if the stream fails.
    pub fn accept(&mut self, container: CompressedContainer) -> Result<u64> {
        let sequence = container.sequence();
        if sequence < self.next_expected {
            return Err(BuslogError::Internal(format!(
                "container {sequence} arrived after {} were written",
                self.next_expected
            )));
        }
        if sequence > self.next_expected {
            if self.pending.contains_key(&sequence) {
                return Err(BuslogError::Internal(format!(
                    "container {sequence} completed twice"
                )));
            }
            self.pending.insert(sequence, container);
            return Ok(0);
        }

        let mut written = self.write_record(&container)?;
        while let Some(ready) = self.pending.remove(&self.next_expected) {
            written += self.write_record(&ready)?;
        }
        Ok(written)
    }

    fn write_record(&mut self, container: &CompressedContainer) -> Result<u64> {
        let header = container.header();
        self.writer.write_all(&header.to_bytes())?;
        self.writer.write_all(container.data())?;

        self.stats.record(header);
        self.next_expected += 1;
        self.dirty = true;
        Ok(u64::from(header.uncompressed_size))
    }

    /// Sequence number the writer is waiting for.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of containers parked out of order.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Totals over the containers written so far.
    pub fn stats(&self) -> &FileStats {
        &self.stats
    }

    /// Flushes buffered records to the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.writer.flush()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Verifies the drained state and writes the footer.
    ///
    /// `sealed` is the number of containers the builder produced, as an
    /// absolute sequence bound.
    ///
    /// # Errors
    /// `BuslogError::DrainIncomplete` if containers are still parked or were
    /// never written.
    pub fn finish(self, sealed: u64) -> Result<(W, FileStats)> {
        if !self.pending.is_empty() || self.next_expected != sealed {
            return Err(BuslogError::DrainIncomplete {
                written: self.next_expected,
                sealed,
                pending: self.pending.len(),
            });
        }
        self.write_footer(false)
    }

    /// Writes a footer flagged as truncated, dropping anything still parked.
    pub fn finish_truncated(mut self) -> Result<(W, FileStats)> {
        let dropped = std::mem::take(&mut self.pending).len();
        if dropped > 0 {
            debug!(dropped, "discarding parked containers");
        }
        self.write_footer(true)
    }

    fn write_footer(mut self, truncated: bool) -> Result<(W, FileStats)> {
        let footer = FileFooter::new(self.stats, truncated);
        self.writer.write_all(&footer.to_bytes())?;
        let inner = self
            .writer
            .into_inner()
            .map_err(|e| BuslogError::from(e.into_error()))?;
        Ok((inner, self.stats))
    }

    /// Consumes completions until every worker has hung up or the pipeline
    /// stops. Returns the writer for finishing.
    ///
    /// The stream is flushed whenever the completion queue runs dry and when a
    /// `flush()` caller waits for containers that were just written.
    pub fn drive(mut self, ctx: &PipelineContext, completions: Receiver<Completion>) -> Self {
        loop {
            let completion = match completions.try_recv() {
                Ok(c) => c,
                Err(TryRecvError::Empty) => {
                    if let Err(e) = self.publish(ctx) {
                        ctx.signal_error(e);
                        break;
                    }
                    match completions.recv() {
                        Ok(c) => c,
                        Err(_) => break,
                    }
                }
                Err(TryRecvError::Disconnected) => break,
            };

            if ctx.should_abort() {
                break;
            }

            match completion {
                Completion::Done(container) => match self.accept(container) {
                    Ok(bytes) => {
                        ctx.window.release(bytes);
                        if ctx.progress.wants_flush(self.next_expected)
                            && let Err(e) = self.publish(ctx)
                        {
                            ctx.signal_error(e);
                            break;
                        }
                    }
                    Err(e) => {
                        ctx.signal_error(e);
                        break;
                    }
                },
                Completion::Failed { sequence, error } => {
                    error!(sequence, error = %error, "container compression failed");
                    ctx.signal_error(error);
                    break;
                }
            }
        }

        if !ctx.should_abort()
            && let Err(e) = self.publish(ctx)
        {
            ctx.signal_error(e);
        }
        self
    }

    fn publish(&mut self, ctx: &PipelineContext) -> Result<()> {
        self.flush()?;
        ctx.progress.publish(self.next_expected);
        Ok(())
    }
}
