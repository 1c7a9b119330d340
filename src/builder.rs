//! Packs events into size-bounded containers.
//!
//! [`ContainerBuilder`] is a plain state machine; [`ContainerBuilder::run`]
//! drives it from the event queue on the dedicated builder thread.

use tracing::debug;

use crate::container::Container;
use crate::context::{Command, PipelineContext};
use crate::event::Event;

/// Accumulates framed events and seals them into containers.
#[derive(Debug)]
pub struct ContainerBuilder {
    threshold: usize,
    next_sequence: u64,
    open: Container,
}

impl ContainerBuilder {
    /// Creates a builder sealing at `threshold` bytes. The first sealed
    /// container gets `first_sequence`.
    pub fn new(threshold: u32, first_sequence: u64) -> Self {
        let threshold = threshold as usize;
        Self {
            threshold,
            next_sequence: first_sequence,
            open: Container::with_capacity(first_sequence, threshold),
        }
    }

    /// Appends an event; returns the sealed container when the threshold is
    /// reached.
    ///
    /// An event larger than the threshold is never split: it lands in one
    /// container that ends up over the threshold.
    pub fn append(&mut self, event: &Event) -> Option<Container> {
        self.open.push(event);
        if self.open.len() >= self.threshold {
            self.seal()
        } else {
            None
        }
    }

    /// Seals the open container regardless of its size.
    ///
    /// Returns `None` when it holds no event.
    pub fn seal(&mut self) -> Option<Container> {
        if self.open.is_empty() {
            return None;
        }
        self.next_sequence += 1;
        let fresh = Container::with_capacity(self.next_sequence, self.threshold);
        Some(std::mem::replace(&mut self.open, fresh))
    }

    /// Number of containers sealed so far, as an absolute sequence bound.
    pub fn sealed_count(&self) -> u64 {
        self.next_sequence
    }

    /// Framed bytes waiting in the open container.
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    /// Consumes commands until the event queue is closed and drained.
    ///
    /// The final partial container is sealed on a clean end of input. Returns
    /// the number of sealed containers.
    pub fn run(mut self, ctx: &PipelineContext) -> u64 {
        while let Some(command) = ctx.events.pop() {
            match command {
                Command::Event(event) => {
                    if let Some(container) = self.append(&event)
                        && !submit(ctx, container)
                    {
                        break;
                    }
                }
                Command::Flush(reply) => {
                    if let Some(container) = self.seal()
                        && !submit(ctx, container)
                    {
                        break;
                    }
                    // The caller may have given up waiting.
                    let _ = reply.send(self.sealed_count());
                }
            }
        }

        if !ctx.should_abort()
            && let Some(container) = self.seal()
        {
            submit(ctx, container);
        }
        ctx.work.close();

        debug!(sealed = self.next_sequence, "container builder finished");
        self.next_sequence
    }
}

/// Hands a sealed container to the compression workers.
///
/// Returns false once the pipeline has been shut down.
fn submit(ctx: &PipelineContext, container: Container) -> bool {
    if !ctx.window.acquire(container.len() as u64) {
        return false;
    }
    debug!(
        sequence = container.sequence(),
        events = container.event_count(),
        bytes = container.len(),
        "container sealed"
    );
    ctx.work.push(container).is_ok()
}
