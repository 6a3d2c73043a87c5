//! Deferred, queued mutations (§4.8, §5).
//!
//! [`CommandBuffer`] lets code without `&mut World` access (a system mid
//! dispatch, a listener reacting to an event) queue work to run later,
//! against a real `&mut World`. The queue itself is an
//! [`amity::flip_queue::FlipQueue`] — the same double-buffered MPSC queue
//! the teacher crate's `action::channel::ActionChannel` uses — so pushing
//! never needs to synchronize with draining.

use amity::flip_queue::FlipQueue;
use tracing::trace;

use crate::entity::EntityRef;
use crate::world::World;

/// A unit of deferred work: given the entity it was queued against,
/// mutates the world.
///
/// Implemented for plain closures as well as named command types; the
/// latter is how [`PooledCommand`] commands get their `release` hook
/// invoked once execution and event dispatch are both done.
pub trait Command: 'static {
    fn execute(&mut self, world: &mut World, entity: EntityRef);
}

impl<F> Command for F
where
    F: FnMut(&mut World, EntityRef) + 'static,
{
    fn execute(&mut self, world: &mut World, entity: EntityRef) {
        self(world, entity)
    }
}

/// A [`Command`] that is returned to a pool after it runs instead of being
/// dropped, so repeated applications of the same command type can reuse
/// one allocation.
///
/// `World::modify` executes a `PooledCommand` through `&mut C` (it is not
/// consumed by `execute`) and dispatches the post-execution event *by
/// reference*, so `release` — which does consume `self` — can still run
/// afterwards without fighting the borrow checker over the same value.
pub trait PooledCommand: Command + Sized {
    /// Returns `self` to whatever pool constructed it. Called by the
    /// world after `execute` and the resulting event dispatch, never by
    /// application code directly.
    fn release(self);
}

type Queued = Box<dyn FnOnce(&mut World) + 'static>;

/// FIFO queue of deferred commands, one per [`crate::world::World`].
pub struct CommandBuffer {
    queue: FlipQueue<Queued>,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        CommandBuffer::new()
    }
}

impl CommandBuffer {
    pub fn new() -> Self {
        CommandBuffer {
            queue: FlipQueue::new(),
        }
    }

    /// Queues `command` to run against `entity` the next time the buffer
    /// is drained.
    pub fn push<C: Command>(&mut self, entity: EntityRef, mut command: C) {
        trace!(pending = self.pending_len() + 1, "command queued");
        self.queue.push(Box::new(move |world: &mut World| {
            world.modify(entity, &mut command);
        }));
    }

    /// Like [`CommandBuffer::push`], but returns `command` to its pool via
    /// [`PooledCommand::release`] once it has run.
    pub fn push_pooled<C: PooledCommand>(&mut self, entity: EntityRef, mut command: C) {
        trace!(pending = self.pending_len() + 1, "pooled command queued");
        self.queue.push(Box::new(move |world: &mut World| {
            world.modify(entity, &mut command);
            command.release();
        }));
    }

    /// Number of commands currently queued but not yet drained.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Runs every queued command against `world`, in FIFO order. Commands
    /// pushed by a command running during this same drain are included —
    /// the buffer is drained until empty, not just the snapshot taken at
    /// the start.
    pub fn drain(&mut self, world: &mut World) {
        loop {
            let batch: Vec<Queued> = self.queue.drain().collect();
            if batch.is_empty() {
                break;
            }
            for command in batch {
                command(world);
            }
        }
    }
}
