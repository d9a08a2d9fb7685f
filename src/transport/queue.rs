use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::{Semaphore, TryAcquireError};

use crate::core::{Error, Priority, Result};
use crate::protocol::Command;

const TIERS: usize = 3;

/// Anything that can wait in the dispatch queue
pub trait Prioritized {
    fn priority(&self) -> Priority;
}

impl Prioritized for Command {
    fn priority(&self) -> Priority {
        Command::priority(self)
    }
}

/// Bounded outbound queue with one FIFO per priority, drained `High` first
///
/// Free capacity is tracked by a semaphore so that producers may suspend on
/// a full queue. Closing the semaphore wakes every suspended producer with
/// an error.
#[derive(Debug)]
pub struct DispatchQueue<T = Command> {
    tiers: Mutex<[VecDeque<T>; TIERS]>,
    slots: Semaphore,
    capacity: usize,
}

impl<T: Prioritized> DispatchQueue<T> {
    /// Creates an empty queue holding at most `capacity` commands
    pub fn new(capacity: usize) -> Self {
        DispatchQueue {
            tiers: Mutex::new(Default::default()),
            slots: Semaphore::new(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds an item behind every queued item of the same priority
    ///
    /// On a full queue, suspends until a slot frees when `block` is set,
    /// else fails with `QueueCapacityExceeded`.
    pub async fn enqueue(&self, item: T, block: bool) -> Result<()> {
        let permit = if block {
            self.slots
                .acquire()
                .await
                .map_err(|_| Error::transport_closed("queue no longer accepts commands"))?
        } else {
            self.slots.try_acquire().map_err(|e| match e {
                TryAcquireError::NoPermits => Error::QueueCapacityExceeded(self.capacity),
                TryAcquireError::Closed => {
                    Error::transport_closed("queue no longer accepts commands")
                }
            })?
        };
        // the slot is handed back by pop()
        permit.forget();

        // close() takes the same lock, so nothing lands behind a closed queue
        let mut tiers = self.lock();
        if self.slots.is_closed() {
            return Err(Error::transport_closed("queue no longer accepts commands"));
        }
        tiers[item.priority().index()].push_back(item);
        Ok(())
    }

    /// Removes the oldest item of the highest non-empty priority
    pub fn pop(&self) -> Option<T> {
        let item = self.lock().iter_mut().find_map(VecDeque::pop_front);
        if item.is_some() && !self.slots.is_closed() {
            self.slots.add_permits(1);
        }
        item
    }

    pub fn len(&self) -> usize {
        self.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued commands at one priority
    pub fn len_of(&self, priority: Priority) -> usize {
        self.lock()[priority.index()].len()
    }

    /// Stops accepting commands; those already queued stay poppable
    pub fn close(&self) {
        let _tiers = self.lock();
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Stops accepting commands and discards the queued ones, returning how many
    pub fn clear(&self) -> usize {
        let mut tiers = self.lock();
        self.slots.close();
        let dropped = tiers.iter().map(VecDeque::len).sum();
        tiers.iter_mut().for_each(VecDeque::clear);
        dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, [VecDeque<T>; TIERS]> {
        // a panic while holding the lock cannot leave the tiers inconsistent
        self.tiers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
