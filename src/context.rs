//! State shared by every thread of one open log file.
//!
//! The context owns both hand-off queues, the in-flight byte window, the
//! flush progress published by the writer, and the first fatal error. Any
//! thread that hits a fatal error records it here; recording it shuts the
//! whole pipeline down and wakes every waiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::channel::BoundedChannel;
use crate::container::Container;
use crate::error::{BuslogError, Result};
use crate::event::Event;

/// Items travelling from producers to the container builder.
#[derive(Debug)]
pub enum Command {
    /// Append an event to the open container.
    Event(Event),
    /// Seal the open container and reply with the number of containers
    /// sealed so far (an absolute sequence bound).
    Flush(SyncSender<u64>),
}

/// Context shared among the producer, builder, worker and writer threads.
#[derive(Debug)]
pub struct PipelineContext {
    /// Producer to builder queue.
    pub events: BoundedChannel<Command>,
    /// Builder to compression worker queue.
    pub work: BoundedChannel<Container>,
    /// Uncompressed bytes sealed but not yet written.
    pub window: InFlightWindow,
    /// Containers known to be flushed to the OS.
    pub progress: WriteProgress,
    abort_flag: AtomicBool,
    error_capture: Mutex<Option<BuslogError>>,
}

impl PipelineContext {
    /// Creates the context for a pipeline with the given queue sizes.
    pub fn new(
        queue_size: usize,
        work_queue_size: usize,
        window_bytes: u64,
        flushed: u64,
    ) -> Result<Self> {
        Ok(Self {
            events: BoundedChannel::new(queue_size)?,
            work: BoundedChannel::new(work_queue_size)?,
            window: InFlightWindow::new(window_bytes),
            progress: WriteProgress::new(flushed),
            abort_flag: AtomicBool::new(false),
            error_capture: Mutex::new(None),
        })
    }

    /// Records a fatal error (first one wins) and shuts the pipeline down.
    pub fn signal_error(&self, err: BuslogError) {
        {
            let mut guard = self.error_capture.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                error!(error = %err, "log pipeline failed");
                *guard = Some(err);
            }
        }
        self.shutdown();
    }

    /// Stops the pipeline: queued work is discarded and all waiters wake up.
    pub fn shutdown(&self) {
        self.abort_flag.store(true, Ordering::SeqCst);
        self.events.discard();
        self.work.discard();
        self.window.close();
        self.progress.wake();
    }

    /// True once the pipeline was shut down by an error or an abort.
    pub fn should_abort(&self) -> bool {
        self.abort_flag.load(Ordering::Relaxed)
    }

    /// The first fatal error, if any.
    pub fn failure(&self) -> Option<BuslogError> {
        self.error_capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The recorded failure, or `Closed` when the pipeline stopped without one.
    pub fn failure_or_closed(&self) -> BuslogError {
        self.failure().unwrap_or(BuslogError::Closed)
    }
}

/// Byte budget for containers between sealing and writing.
///
/// The builder acquires a container's uncompressed size before handing it to
/// the workers and the writer releases it once the container is on disk. A
/// container is always admitted when nothing is in flight, so one container
/// larger than the whole budget still makes progress.
#[derive(Debug)]
pub struct InFlightWindow {
    state: Mutex<WindowState>,
    released: Condvar,
    limit: u64,
}

#[derive(Debug, Default)]
struct WindowState {
    in_flight: u64,
    closed: bool,
}

impl InFlightWindow {
    /// Creates a window of `limit` bytes.
    pub fn new(limit: u64) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            released: Condvar::new(),
            limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves `bytes`, blocking while the budget is exhausted.
    ///
    /// Returns false if the window was closed.
    pub fn acquire(&self, bytes: u64) -> bool {
        let mut state = self.lock();
        while !state.closed && state.in_flight > 0 && state.in_flight + bytes > self.limit {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return false;
        }
        state.in_flight += bytes;
        true
    }

    /// Returns `bytes` to the budget.
    pub fn release(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(bytes);
        drop(state);
        self.released.notify_all();
    }

    /// Wakes every waiter; later acquisitions fail.
    pub fn close(&self) {
        self.lock().closed = true;
        self.released.notify_all();
    }
}

/// Flush progress published by the writer thread.
#[derive(Debug)]
pub struct WriteProgress {
    state: Mutex<ProgressState>,
    changed: Condvar,
}

#[derive(Debug)]
struct ProgressState {
    /// Containers below this sequence are flushed to the OS.
    flushed: u64,
    /// Highest sequence bound a caller is waiting for.
    requested: u64,
}

impl WriteProgress {
    fn new(flushed: u64) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                flushed,
                requested: flushed,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks the writer to flush as soon as `target` containers are written.
    pub fn request(&self, target: u64) {
        let mut state = self.lock();
        state.requested = state.requested.max(target);
    }

    /// True if a caller waits for a bound that `written` now satisfies.
    pub fn wants_flush(&self, written: u64) -> bool {
        let state = self.lock();
        state.requested > state.flushed && written >= state.requested
    }

    /// Publishes that every container below `flushed` reached the OS.
    pub fn publish(&self, flushed: u64) {
        let mut state = self.lock();
        if flushed > state.flushed {
            state.flushed = flushed;
            drop(state);
            self.changed.notify_all();
        }
    }

    /// Blocks until `target` containers are flushed.
    ///
    /// # Errors
    /// Returns the pipeline failure (or `Closed`) if the pipeline stops first.
    pub fn wait_flushed(&self, target: u64, ctx: &PipelineContext) -> Result<()> {
        let mut state = self.lock();
        while state.flushed < target {
            if ctx.should_abort() {
                return Err(ctx.failure_or_closed());
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    fn wake(&self) {
        let _guard = self.lock();
        self.changed.notify_all();
    }
}
