//! Blocking FIFO that serializes codec events onto the pipeline run loop.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    aborted: bool,
}

/// A blocking queue of units of work.
///
/// Codec callback threads push events; the run loop pops and executes them
/// one at a time. Urgent events (errors, stop requests) are pushed at the
/// front so they cut ahead of any backlog of buffer events.
pub struct EventQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                aborted: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append `item` and wake one waiter. No-op once the queue is aborted.
    pub fn push(&self, item: T) {
        self.push_inner(item, false);
    }

    /// Prepend `item` so it is popped ahead of pending work.
    pub fn push_front(&self, item: T) {
        self.push_inner(item, true);
    }

    fn push_inner(&self, item: T, front: bool) {
        {
            let mut inner = self.inner.lock();
            if inner.aborted {
                return;
            }
            if front {
                inner.items.push_front(item);
            } else {
                inner.items.push_back(item);
            }
        }
        self.available.notify_one();
    }

    /// Block until an item is available and return it.
    pub fn pop(&self) -> T {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return item;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Drop all pending items and refuse future pushes.
    ///
    /// Must not be called while another thread is blocked in [`pop`]; the
    /// run loop only aborts its own queue after it has exited.
    ///
    /// [`pop`]: EventQueue::pop
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        inner.items.clear();
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn pops_in_push_order() {
        let q = EventQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
        assert_eq!(q.pop(), 3);
    }

    #[test]
    fn front_push_jumps_the_backlog() {
        let q = EventQueue::new();
        q.push(1);
        q.push(2);
        q.push_front(99);
        assert_eq!(q.pop(), 99);
        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
    }

    #[test]
    fn abort_drops_pending_and_refuses_pushes() {
        let q = EventQueue::new();
        q.push(1);
        q.abort();
        q.push(2);
        q.push_front(3);

        let inner = q.inner.lock();
        assert!(inner.aborted);
        assert!(inner.items.is_empty());
    }

    #[test]
    fn pop_blocks_until_an_item_arrives() {
        let q = Arc::new(EventQueue::new());
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                q.push(7);
            })
        };
        assert_eq!(q.pop(), 7);
        producer.join().unwrap();
    }
}
