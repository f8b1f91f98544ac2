//! The run queue of pending machine clones.

use crate::error::ErrorKind;
use crate::mach::Mach;

/// Queue of machines awaiting their turn. LIFO, so later clones are handled
/// before earlier ones and the search tree is explored depth-first.
pub(crate) trait Queue {
    fn enqueue(&mut self, m: Mach) -> Result<(), ErrorKind>;
    fn dequeue(&mut self) -> Option<Mach>;
    fn len(&self) -> usize;
    /// The most recently enqueued machine, if any.
    fn peek(&self) -> Option<&Mach>;
}

/// Bounded LIFO queue; capacity is fixed at build time.
pub(crate) struct RunQueue {
    q: Vec<Mach>,
    cap: usize,
}

impl RunQueue {
    pub(crate) fn new(cap: usize) -> Self {
        RunQueue {
            q: Vec::with_capacity(cap),
            cap,
        }
    }
}

impl Queue for RunQueue {
    fn enqueue(&mut self, m: Mach) -> Result<(), ErrorKind> {
        if self.q.len() >= self.cap {
            return Err(ErrorKind::QueueFull);
        }
        self.q.push(m);
        Ok(())
    }

    fn dequeue(&mut self) -> Option<Mach> {
        self.q.pop()
    }

    fn len(&self) -> usize {
        self.q.len()
    }

    fn peek(&self) -> Option<&Mach> {
        self.q.last()
    }
}

/// Stand-in installed when no handler is configured: machines cannot
/// multiply without somewhere for results to go.
pub(crate) struct NoQueue;

impl Queue for NoQueue {
    fn enqueue(&mut self, _m: Mach) -> Result<(), ErrorKind> {
        Err(ErrorKind::NoQueue)
    }

    fn dequeue(&mut self) -> Option<Mach> {
        None
    }

    fn len(&self) -> usize {
        0
    }

    fn peek(&self) -> Option<&Mach> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_order() {
        let mut q = RunQueue::new(3);
        for id in 1..=3 {
            let mut m = Mach::blank();
            m.set_test_id(id);
            q.enqueue(m).unwrap();
        }
        assert_eq!(q.peek().unwrap().id(), 3);
        assert_eq!(q.dequeue().unwrap().id(), 3);
        assert_eq!(q.dequeue().unwrap().id(), 2);
        assert_eq!(q.dequeue().unwrap().id(), 1);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut q = RunQueue::new(1);
        q.enqueue(Mach::blank()).unwrap();
        assert_eq!(q.enqueue(Mach::blank()).unwrap_err(), ErrorKind::QueueFull);
    }

    #[test]
    fn no_queue_always_fails() {
        let mut q = NoQueue;
        assert_eq!(q.enqueue(Mach::blank()).unwrap_err(), ErrorKind::NoQueue);
        assert!(q.dequeue().is_none());
    }
}
