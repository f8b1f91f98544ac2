//! The capability bundle shared by a machine and all of its clones.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::alloc::{MachAlloc, PagePool};
use crate::error::ErrorKind;
use crate::handler::Handler;
use crate::mach::{Mach, Region};
use crate::page::Page;
use crate::queue::Queue;

/// Everything a running machine shares with its clones: the run queue, the
/// result handler, both allocator pools, and the declared I/O regions. The
/// driver touches these strictly one machine at a time, so interior
/// mutability is enough; a multi-threaded driver would need real locks
/// here.
pub(crate) struct Context {
    pub(crate) queue: RefCell<Box<dyn Queue>>,
    pub(crate) handler: Option<RefCell<Box<dyn Handler>>>,
    machs: RefCell<Box<dyn MachAlloc>>,
    pages: RefCell<PagePool>,
    pub(crate) outputs: Vec<Region>,
    pub(crate) inputs: Vec<Region>,
    next_id: Cell<u32>,
}

impl Context {
    pub(crate) fn new(
        queue: Box<dyn Queue>,
        handler: Option<Box<dyn Handler>>,
        machs: Box<dyn MachAlloc>,
        pages: PagePool,
        outputs: Vec<Region>,
        inputs: Vec<Region>,
    ) -> Rc<Self> {
        Rc::new(Context {
            queue: RefCell::new(queue),
            handler: handler.map(RefCell::new),
            machs: RefCell::new(machs),
            pages: RefCell::new(pages),
            outputs,
            inputs,
            next_id: Cell::new(1),
        })
    }

    /// Hands out the next machine id; the initial machine takes 1.
    pub(crate) fn take_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub(crate) fn alloc_mach(&self) -> Result<Mach, ErrorKind> {
        self.machs.borrow_mut().allocate()
    }

    pub(crate) fn alloc_page(&self) -> Rc<Page> {
        self.pages.borrow_mut().allocate()
    }

    /// Returns a dead machine's resources to the pools: page references
    /// first, then the cleared shell.
    pub(crate) fn release_mach(&self, mut m: Mach) {
        for pg in m.drain_pages() {
            self.pages.borrow_mut().release(pg);
        }
        m.clear();
        self.machs.borrow_mut().release(m);
    }

    pub(crate) fn enqueue(&self, m: Mach) -> Result<(), ErrorKind> {
        self.queue.borrow_mut().enqueue(m)
    }

    pub(crate) fn dequeue(&self) -> Option<Mach> {
        self.queue.borrow_mut().dequeue()
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Looks at the most recently enqueued machine, for observers.
    pub(crate) fn peek_queued<R>(&self, f: impl FnOnce(&Mach) -> R) -> Option<R> {
        self.queue.borrow().peek().map(f)
    }
}
