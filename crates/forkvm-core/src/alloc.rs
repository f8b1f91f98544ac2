//! Pooled allocation of machines and pages.
//!
//! Both pools are simple free lists that amortize clone cost across a run.
//! Released pages may still be referenced by other machines until the last
//! sharer drops them, so zeroing is deferred to reuse time: `allocate` only
//! hands out a pooled page once it is the sole owner again.

use std::rc::Rc;

use tracing::trace;

use crate::error::ErrorKind;
use crate::mach::Mach;
use crate::page::Page;

/// Allocator for machine shells, composable so a clone cap can wrap any
/// underlying pool.
pub(crate) trait MachAlloc {
    fn allocate(&mut self) -> Result<Mach, ErrorKind>;
    fn release(&mut self, m: Mach);
}

pub(crate) struct MachPool {
    free: Vec<Mach>,
}

impl MachPool {
    pub(crate) fn new(cap: usize) -> Self {
        MachPool {
            free: Vec::with_capacity(cap),
        }
    }
}

impl MachAlloc for MachPool {
    fn allocate(&mut self) -> Result<Mach, ErrorKind> {
        Ok(self.free.pop().unwrap_or_else(Mach::blank))
    }

    fn release(&mut self, m: Mach) {
        debug_assert!(m.is_cleared());
        self.free.push(m);
    }
}

/// Wraps a machine allocator with a lifetime clone cap.
pub(crate) struct CappedMachAlloc<A> {
    copies: u32,
    limit: u32,
    inner: A,
}

impl<A: MachAlloc> CappedMachAlloc<A> {
    pub(crate) fn new(limit: u32, inner: A) -> Self {
        CappedMachAlloc {
            copies: 0,
            limit,
            inner,
        }
    }
}

impl<A: MachAlloc> MachAlloc for CappedMachAlloc<A> {
    fn allocate(&mut self) -> Result<Mach, ErrorKind> {
        if self.copies >= self.limit {
            trace!(limit = self.limit, "machine copy cap reached");
            return Err(ErrorKind::MaxCopies { limit: self.limit });
        }
        self.copies += 1;
        self.inner.allocate()
    }

    fn release(&mut self, m: Mach) {
        self.inner.release(m);
    }
}

/// Free list of pages. Pages come out zeroed with a share count of one.
pub(crate) struct PagePool {
    free: Vec<Rc<Page>>,
}

impl PagePool {
    pub(crate) fn new(cap: usize) -> Self {
        PagePool {
            free: Vec::with_capacity(cap),
        }
    }

    pub(crate) fn allocate(&mut self) -> Rc<Page> {
        while let Some(mut pg) = self.free.pop() {
            // A pooled page is reusable only once every sharer has dropped
            // it; otherwise this slot's reference just goes away.
            if let Some(p) = Rc::get_mut(&mut pg) {
                p.zero();
                return pg;
            }
        }
        Rc::new(Page::new())
    }

    pub(crate) fn release(&mut self, pg: Rc<Page>) {
        self.free.push(pg);
    }
}
