//! Small containers used by servers and the pool

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// FIFO of open connections waiting to be reused
#[derive(Debug)]
pub struct IdleQueue<C> {
    conns: VecDeque<C>,
}

impl<C> IdleQueue<C> {
    pub fn new() -> Self {
        Self {
            conns: VecDeque::new(),
        }
    }

    pub fn push(&mut self, conn: C) {
        self.conns.push_back(conn);
    }

    /// Take the connection that has been idle the longest
    pub fn pop(&mut self) -> Option<C> {
        self.conns.pop_front()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl<C> Default for IdleQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only collection visited in rotating order
///
/// Every call to [`RoundRobin::sweep`] visits all items once, starting one
/// position after where the previous sweep started. The cursor is atomic so
/// concurrent sweeps only share a single increment.
#[derive(Debug)]
pub struct RoundRobin<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> RoundRobin<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in insertion order, ignoring the rotation
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// One full cycle over all items, advancing the rotation by one
    pub fn sweep(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.items.len();
        let start = if len == 0 {
            0
        } else {
            self.cursor.fetch_add(1, Ordering::Relaxed) % len
        };

        (0..len).map(move |i| &self.items[(start + i) % len])
    }
}

impl<T> Default for RoundRobin<T> {
    fn default() -> Self {
        Self::new()
    }
}
