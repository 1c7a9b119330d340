//! The parallel compression stage.
//!
//! A dedicated Rayon pool runs one long-lived worker loop per thread. Each
//! loop takes sealed containers from the shared work queue, compresses them
//! and hands the result to the ordered writer. Workers finish in any order;
//! the writer restores the container order.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use crate::compression::Compressor;
use crate::container::{CompressedContainer, Container};
use crate::context::PipelineContext;
use crate::error::{BuslogError, Result};

/// Outcome of compressing one container, keyed by its sequence number.
#[derive(Debug)]
pub enum Completion {
    /// The container is ready to be written.
    Done(CompressedContainer),
    /// Compression failed; fatal for the file.
    Failed {
        /// Sequence number of the container that could not be compressed.
        sequence: u64,
        /// The codec error.
        error: BuslogError,
    },
}

/// Fixed-size pool of compression workers.
///
/// The threads exit once the work queue is closed and drained. Dropping the
/// pool after that releases them.
#[derive(Debug)]
pub struct CompressionPool {
    // Held only to keep the worker threads alive.
    _pool: rayon::ThreadPool,
}

impl CompressionPool {
    /// Starts `threads` workers reading from `ctx.work` and sending results
    /// to `completions`.
    ///
    /// # Errors
    /// Returns `BuslogError::Config` for zero threads and `BuslogError::Io`
    /// if the threads cannot be created.
    pub fn spawn(
        threads: usize,
        compressor: Arc<dyn Compressor>,
        ctx: Arc<PipelineContext>,
        completions: SyncSender<Completion>,
    ) -> Result<Self> {
        if threads == 0 {
            return Err(BuslogError::Config(
                "compression pool needs at least one thread".into(),
            ));
        }

        let panic_ctx = Arc::clone(&ctx);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("buslog-compress-{i}"))
            .panic_handler(move |_| {
                panic_ctx.signal_error(BuslogError::Internal(
                    "compression worker panicked".into(),
                ));
            })
            .build()
            .map_err(|e| {
                BuslogError::Io(Arc::new(std::io::Error::other(format!(
                    "failed to build compression pool: {e}"
                ))))
            })?;

        for _ in 0..threads {
            let ctx = Arc::clone(&ctx);
            let compressor = Arc::clone(&compressor);
            let completions = completions.clone();
            pool.spawn(move || worker_loop(&ctx, compressor.as_ref(), &completions));
        }

        Ok(Self { _pool: pool })
    }
}

fn worker_loop(
    ctx: &PipelineContext,
    compressor: &dyn Compressor,
    completions: &SyncSender<Completion>,
) {
    while let Some(container) = ctx.work.pop() {
        if ctx.should_abort() {
            break;
        }
        // The writer hung up: it has stopped on a fatal error.
        if completions.send(compress_container(container, compressor)).is_err() {
            break;
        }
    }
}

/// Compresses one sealed container.
///
/// Failures are reported as [`Completion::Failed`] so the writer can stop the
/// file at exactly this sequence number.
pub fn compress_container(container: Container, compressor: &dyn Compressor) -> Completion {
    let sequence = container.sequence();
    let event_count = container.event_count();
    let timestamps = (container.first_timestamp(), container.last_timestamp());
    let uncompressed_size = container.len();

    // `None` means the compressor passed the input through unchanged.
    let compressed = compressor
        .compress(container.raw_bytes())
        .map(|cow| match cow {
            Cow::Owned(bytes) => Some(bytes),
            Cow::Borrowed(_) => None,
        });

    let result = compressed.and_then(|bytes| {
        let data = bytes.unwrap_or_else(|| container.into_raw());
        CompressedContainer::new(
            sequence,
            event_count,
            timestamps,
            uncompressed_size,
            compressor.id(),
            data,
        )
    });

    match result {
        Ok(done) => Completion::Done(done),
        Err(error) => Completion::Failed { sequence, error },
    }
}
