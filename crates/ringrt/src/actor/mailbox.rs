//! FIFO mailbox for component-runtime message passing.
//!
//! Each process owns two independent mailboxes: one for ordinary messages,
//! one for breakpoint control messages (`bp_set`, `bp_step`, ...). Both are
//! the same generic FIFO type; keeping them as two separate instances is
//! what gives the two queues their independent delivery orders.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

/// A thread-safe FIFO mailbox.
///
/// Messages are appended to the back (`push`) and removed from the front
/// (`pop`/`pop_blocking`), ensuring strict FIFO delivery order. `peek`
/// supports the breakpoint discipline, which must inspect the head of the
/// ordinary queue without dequeuing it.
pub struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Mailbox {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Append a message to the back of the mailbox (FIFO enqueue).
    pub fn push(&self, msg: T) {
        let mut q = self.queue.lock();
        q.push_back(msg);
        self.not_empty.notify_one();
    }

    /// Remove and return the front message (FIFO dequeue), or `None` if
    /// the mailbox is currently empty.
    pub fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Block until a message is available, then dequeue it.
    pub fn pop_blocking(&self) -> T {
        let mut q = self.queue.lock();
        loop {
            if let Some(m) = q.pop_front() {
                return m;
            }
            self.not_empty.wait(&mut q);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<T: Clone> Mailbox<T> {
    /// Non-destructively inspect the head of the queue.
    pub fn peek(&self) -> Option<T> {
        self.queue.lock().front().cloned()
    }
}

impl<T> Mailbox<T> {
    /// Non-destructively inspect the head of the queue through a closure,
    /// without requiring `T: Clone`.
    pub fn peek_with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let q = self.queue.lock();
        f(q.front())
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_fifo() {
        let mb: Mailbox<i32> = Mailbox::new();
        mb.push(1);
        mb.push(2);
        mb.push(3);
        assert_eq!(mb.pop(), Some(1));
        assert_eq!(mb.pop(), Some(2));
        assert_eq!(mb.pop(), Some(3));
        assert_eq!(mb.pop(), None);
    }

    #[test]
    fn peek_does_not_dequeue() {
        let mb: Mailbox<i32> = Mailbox::new();
        mb.push(42);
        assert_eq!(mb.peek(), Some(42));
        assert_eq!(mb.peek(), Some(42));
        assert_eq!(mb.pop(), Some(42));
        assert_eq!(mb.peek(), None);
    }

    #[test]
    fn len_and_is_empty() {
        let mb: Mailbox<i32> = Mailbox::new();
        assert!(mb.is_empty());
        mb.push(1);
        mb.push(2);
        assert_eq!(mb.len(), 2);
        assert!(!mb.is_empty());
    }

    #[test]
    fn pop_blocking_wakes_on_push() {
        use std::sync::Arc;
        use std::time::Duration;

        let mb: Arc<Mailbox<i32>> = Arc::new(Mailbox::new());
        let mb2 = Arc::clone(&mb);
        let handle = std::thread::spawn(move || mb2.pop_blocking());

        std::thread::sleep(Duration::from_millis(20));
        mb.push(7);

        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn concurrent_push_preserves_count() {
        use std::sync::Arc;

        let mb: Arc<Mailbox<u64>> = Arc::new(Mailbox::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let mb = Arc::clone(&mb);
                std::thread::spawn(move || {
                    for i in 0..50u64 {
                        mb.push(t * 50 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(mb.len(), 400);
    }
}
