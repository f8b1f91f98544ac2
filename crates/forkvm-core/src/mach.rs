//! Machine state: registers, paged memory, and the two stacks.
//!
//! Memory is a sparse sequence of 64-byte pages addressed by 32-bit byte
//! addresses; words are big-endian and need not be aligned. Clones share
//! pages by reference count and split them on write, so a fork costs one
//! shallow page-list copy.
//!
//! The parameter stack grows up from PBP, the control stack grows down from
//! CBP; both pointers address the current top *word*. Empty stacks park
//! their pointer one word outside the region (`PBP - 4` and `CBP + 4`,
//! wrapping), which keeps push and pop symmetric; the public accessors
//! canonicalize the sentinels back to the base pointers.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::rc::Rc;

use byteorder::{BigEndian, ByteOrder};

use crate::context::Context;
use crate::error::{ErrorKind, MachError};
use crate::page::{Page, PAGE_SIZE};

pub(crate) const PARAM: &str = "param";
pub(crate) const CONTROL: &str = "control";

/// A half-open `[start, end)` byte interval declared as an input or output
/// window, optionally named by a length-prefixed string in program memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u32,
    pub end: u32,
    pub(crate) name_addr: Option<u32>,
}

impl Region {
    pub(crate) fn new(start: u32, end: u32) -> Self {
        Region {
            start,
            end,
            name_addr: None,
        }
    }

    /// Number of whole words the region covers.
    pub fn words(&self) -> u32 {
        self.end.saturating_sub(self.start) / 4
    }
}

/// A stack machine, owned exclusively by whoever last dequeued it.
pub struct Mach {
    pub(crate) ctx: Option<Rc<Context>>,
    pub(crate) id: u32,
    pub(crate) ip: u32,
    pub(crate) pbp: u32,
    pub(crate) psp: u32,
    pub(crate) cbp: u32,
    pub(crate) csp: u32,
    pub(crate) err: Option<ErrorKind>,
    pub(crate) op_count: u32,
    pub(crate) op_limit: u32,
    pub(crate) pages: Vec<Option<Rc<Page>>>,
}

impl Mach {
    /// An empty shell, as held by the machine pool.
    pub(crate) fn blank() -> Self {
        Mach {
            ctx: None,
            id: 0,
            ip: 0,
            pbp: 0,
            psp: 0,
            cbp: 0,
            csp: 0,
            err: None,
            op_count: 0,
            op_limit: 0,
            pages: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        debug_assert!(self.pages.is_empty(), "pages must be drained first");
        self.ctx = None;
        self.err = None;
        self.id = 0;
    }

    pub(crate) fn is_cleared(&self) -> bool {
        self.ctx.is_none() && self.pages.is_empty()
    }

    pub(crate) fn drain_pages(&mut self) -> impl Iterator<Item = Rc<Page>> + '_ {
        self.pages.drain(..).flatten()
    }

    /// Copies this machine into `child`: registers, limits, the shared
    /// context, and the page list (bumping every page's share count).
    pub(crate) fn clone_into(&self, child: &mut Mach, ctx: &Rc<Context>) {
        child.ctx = Some(Rc::clone(ctx));
        child.id = ctx.take_id();
        child.ip = self.ip;
        child.pbp = self.pbp;
        child.psp = self.psp;
        child.cbp = self.cbp;
        child.csp = self.csp;
        child.err = None;
        child.op_count = self.op_count;
        child.op_limit = self.op_limit;
        child.pages.clear();
        child.pages.extend(self.pages.iter().cloned());
    }

    #[cfg(test)]
    pub(crate) fn set_test_id(&mut self, id: u32) {
        self.id = id;
    }

    // ---- registers ----

    /// A small identity assigned at build/clone time, for logs and tracers.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The current instruction pointer.
    pub fn ip(&self) -> u32 {
        self.ip
    }

    /// The parameter stack base pointer.
    pub fn pbp(&self) -> u32 {
        self.pbp
    }

    /// The parameter stack pointer; reads as PBP while the stack is empty.
    pub fn psp(&self) -> u32 {
        if self.psp > self.cbp {
            self.pbp
        } else {
            self.psp
        }
    }

    /// The control stack base pointer.
    pub fn cbp(&self) -> u32 {
        self.cbp
    }

    /// The control stack pointer; reads as CBP while the stack is empty.
    pub fn csp(&self) -> u32 {
        if self.csp > self.cbp {
            self.cbp
        } else {
            self.csp
        }
    }

    /// Operations executed by this machine so far.
    pub fn op_count(&self) -> u32 {
        self.op_count
    }

    /// The halt code, if the machine halted normally.
    pub fn halt_code(&self) -> Option<u32> {
        match self.err {
            Some(ErrorKind::Halt(code)) => Some(code),
            _ => None,
        }
    }

    /// The machine's error, canonicalized: halt code 0 is no error, other
    /// halts are a stable `HALT(n)` identity, and everything else is
    /// wrapped with the instruction pointer it occurred at.
    pub fn err(&self) -> Option<MachError> {
        match &self.err {
            None | Some(ErrorKind::Halt(0)) => None,
            Some(ErrorKind::Halt(code)) => Some(MachError::Halt(*code)),
            Some(kind) => Some(MachError::At {
                addr: self.ip,
                kind: kind.clone(),
            }),
        }
    }

    pub(crate) fn err_result(&self) -> Result<(), MachError> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ---- memory ----

    fn split_addr(addr: u32) -> (usize, usize) {
        ((addr >> 6) as usize, (addr & 0x3f) as usize)
    }

    /// Reads one byte; unallocated pages read as zero without allocating.
    pub(crate) fn fetch_byte(&self, addr: u32) -> u8 {
        let (i, j) = Self::split_addr(addr);
        match self.pages.get(i) {
            Some(Some(pg)) => pg.data()[j],
            _ => 0,
        }
    }

    pub(crate) fn store_byte(&mut self, addr: u32, val: u8) {
        let (i, j) = Self::split_addr(addr);
        self.page_mut(i).data_mut()[j] = val;
    }

    /// Reads a big-endian word; straddling a page boundary reads across
    /// two consecutive pages.
    pub(crate) fn fetch_word(&self, addr: u32) -> u32 {
        let (i, j) = Self::split_addr(addr);
        if j + 4 <= PAGE_SIZE {
            match self.pages.get(i) {
                Some(Some(pg)) => BigEndian::read_u32(&pg.data()[j..j + 4]),
                _ => 0,
            }
        } else {
            let mut word = [0u8; 4];
            for (k, b) in word.iter_mut().enumerate() {
                *b = self.fetch_byte(addr.wrapping_add(k as u32));
            }
            u32::from_be_bytes(word)
        }
    }

    pub(crate) fn store_word(&mut self, addr: u32, val: u32) {
        let (i, j) = Self::split_addr(addr);
        if j + 4 <= PAGE_SIZE {
            BigEndian::write_u32(&mut self.page_mut(i).data_mut()[j..j + 4], val);
        } else {
            for (k, b) in val.to_be_bytes().iter().enumerate() {
                self.store_byte(addr.wrapping_add(k as u32), *b);
            }
        }
    }

    pub(crate) fn store_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (k, &b) in bytes.iter().enumerate() {
            self.store_byte(addr.wrapping_add(k as u32), b);
        }
    }

    /// A writable view of page `i`, allocating or splitting as needed so
    /// the result is exclusively owned.
    fn page_mut(&mut self, i: usize) -> &mut Page {
        enum Need {
            Install,
            Split,
            Ready,
        }
        if self.pages.len() <= i {
            self.pages.resize(i + 1, None);
        }
        let need = match &self.pages[i] {
            None => Need::Install,
            Some(pg) if Rc::strong_count(pg) > 1 => Need::Split,
            Some(_) => Need::Ready,
        };
        match need {
            Need::Install => {
                let pg = self.fresh_page();
                self.pages[i] = Some(pg);
            }
            Need::Split => {
                let mut fresh = self.fresh_page();
                let src = self.pages[i].as_ref().expect("split source page");
                Rc::get_mut(&mut fresh)
                    .expect("fresh page is unshared")
                    .copy_from(src);
                // Replacing the slot drops the old reference, which is the
                // share-count decrement.
                self.pages[i] = Some(fresh);
            }
            Need::Ready => {}
        }
        Rc::get_mut(self.pages[i].as_mut().expect("page installed"))
            .expect("page exclusively owned")
    }

    fn fresh_page(&self) -> Rc<Page> {
        match &self.ctx {
            Some(ctx) => ctx.alloc_page(),
            None => Rc::new(Page::new()),
        }
    }

    /// Observational bulk copy starting at `addr`; fills `buf` up to the
    /// end of the allocated address space, substituting zeroes for holes.
    /// Never allocates pages or touches share counts.
    pub fn copy_out(&self, addr: u32, buf: &mut [u8]) -> usize {
        let end = self.pages.len() as u64 * PAGE_SIZE as u64;
        let avail = end.saturating_sub(u64::from(addr));
        let n = (buf.len() as u64).min(avail) as usize;
        for (k, b) in buf[..n].iter_mut().enumerate() {
            *b = self.fetch_byte(addr.wrapping_add(k as u32));
        }
        n
    }

    /// Calls `f` with each allocated page's base address and bytes, in
    /// ascending address order.
    pub fn each_page(&self, mut f: impl FnMut(u32, &[u8; PAGE_SIZE])) {
        for (i, slot) in self.pages.iter().enumerate() {
            if let Some(pg) = slot {
                f((i * PAGE_SIZE) as u32, pg.data());
            }
        }
    }

    /// Writes the whole address space as one contiguous stream, with
    /// zeroed blocks standing in for unallocated pages. Returns the byte
    /// count written.
    pub fn write_all<W: io::Write>(&self, w: &mut W) -> io::Result<u64> {
        let zero = [0u8; PAGE_SIZE];
        let mut n = 0u64;
        for slot in &self.pages {
            match slot {
                Some(pg) => w.write_all(pg.data())?,
                None => w.write_all(&zero)?,
            }
            n += PAGE_SIZE as u64;
        }
        Ok(n)
    }

    // ---- stacks ----

    pub(crate) fn p_push(&mut self, val: u32) -> Result<(), ErrorKind> {
        let slot = self.psp.wrapping_add(4);
        let limit = if self.csp > self.cbp {
            self.cbp
        } else {
            self.csp
        };
        if slot.wrapping_add(4) > limit {
            return Err(ErrorKind::overflow(PARAM));
        }
        self.store_word(slot, val);
        self.psp = slot;
        Ok(())
    }

    pub(crate) fn p_pop(&mut self) -> Result<u32, ErrorKind> {
        if self.psp > self.cbp {
            return Err(ErrorKind::underflow(PARAM));
        }
        let val = self.fetch_word(self.psp);
        self.psp = self.psp.wrapping_sub(4);
        Ok(val)
    }

    /// Address of the word `off` entries below the parameter stack top.
    pub(crate) fn p_addr(&self, off: u32) -> Result<u32, ErrorKind> {
        if self.psp > self.cbp {
            return Err(ErrorKind::underflow(PARAM));
        }
        let addr = self.psp.wrapping_sub(off.wrapping_mul(4));
        if addr < self.pbp || addr > self.psp {
            return Err(ErrorKind::underflow(PARAM));
        }
        Ok(addr)
    }

    pub(crate) fn c_push(&mut self, val: u32) -> Result<(), ErrorKind> {
        let slot = self.csp.wrapping_sub(4);
        let floor = if self.psp > self.cbp {
            self.pbp
        } else {
            self.psp
        };
        if slot < floor.wrapping_add(4) || slot < self.pbp {
            return Err(ErrorKind::overflow(CONTROL));
        }
        self.store_word(slot, val);
        self.csp = slot;
        Ok(())
    }

    pub(crate) fn c_pop(&mut self) -> Result<u32, ErrorKind> {
        if self.csp > self.cbp {
            return Err(ErrorKind::underflow(CONTROL));
        }
        let val = self.fetch_word(self.csp);
        self.csp = self.csp.wrapping_add(4);
        Ok(val)
    }

    fn fetch_ps(&self) -> Vec<u32> {
        let mut out = Vec::new();
        if self.psp <= self.cbp {
            let mut addr = self.pbp;
            loop {
                out.push(self.fetch_word(addr));
                if addr == self.psp {
                    break;
                }
                addr = addr.wrapping_add(4);
            }
        }
        out
    }

    fn fetch_cs(&self) -> Vec<u32> {
        let mut out = Vec::new();
        if self.csp <= self.cbp {
            let mut addr = self.cbp;
            loop {
                out.push(self.fetch_word(addr));
                if addr == self.csp {
                    break;
                }
                addr = addr.wrapping_sub(4);
            }
        }
        out
    }

    /// The current parameter and control stack contents, each listed from
    /// base toward the current pointer.
    pub fn stacks(&self) -> (Vec<u32>, Vec<u32>) {
        (self.fetch_ps(), self.fetch_cs())
    }

    // ---- results ----

    /// The output regions declared by the program.
    pub fn outputs(&self) -> Vec<Region> {
        match &self.ctx {
            Some(ctx) => ctx.outputs.clone(),
            None => Vec::new(),
        }
    }

    /// Resolves a region's name from the length-prefixed string it points
    /// at in program memory.
    pub fn region_name(&self, rg: &Region) -> Option<String> {
        let addr = rg.name_addr?;
        let len = self.fetch_word(addr);
        if len == 0 || len > 0xff {
            return None;
        }
        let mut bytes = vec![0u8; len as usize];
        if self.copy_out(addr.wrapping_add(4), &mut bytes) != bytes.len() {
            return None;
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The result regions: declared outputs, plus — once the machine has
    /// halted with code 0 — any `(from, to)` pairs left on the control
    /// stack.
    fn result_regions(&self) -> Result<Vec<Region>, MachError> {
        let done = match &self.err {
            None => false,
            Some(ErrorKind::Halt(0)) => true,
            Some(_) => {
                return Err(self.err().expect("error kind present"));
            }
        };
        let mut regions = self.outputs();
        if done {
            let cs = self.fetch_cs();
            if !cs.is_empty() {
                if cs.len() % 2 != 0 {
                    return Err(MachError::InvalidControlStack(cs.len()));
                }
                for pair in cs.chunks(2) {
                    regions.push(Region::new(pair[0], pair[1]));
                }
            }
        }
        Ok(regions)
    }

    fn fetch_region(&self, rg: &Region) -> Vec<u32> {
        let mut out = Vec::with_capacity(rg.words() as usize);
        let mut addr = rg.start;
        while addr < rg.end {
            out.push(self.fetch_word(addr));
            addr = addr.wrapping_add(4);
        }
        out
    }

    /// One word sequence per result region, in declaration order with any
    /// control-stack pairs appended. Fails with the machine's own error if
    /// it finished abnormally.
    pub fn values(&self) -> Result<Vec<Vec<u32>>, MachError> {
        let regions = self.result_regions()?;
        Ok(regions.iter().map(|rg| self.fetch_region(rg)).collect())
    }

    /// Like [`values`](Mach::values), keyed by region name; anonymous
    /// regions are keyed `unnamed_output_N` in appearance order.
    pub fn named_values(&self) -> Result<BTreeMap<String, Vec<u32>>, MachError> {
        let regions = self.result_regions()?;
        let mut out = BTreeMap::new();
        let mut unnamed = 0usize;
        for rg in &regions {
            let name = self.region_name(rg).unwrap_or_else(|| {
                let name = format!("unnamed_output_{unnamed}");
                unnamed += 1;
                name
            });
            out.insert(name, self.fetch_region(rg));
        }
        Ok(out)
    }

    /// Writes `values` into the input region named `name`. Inputs are
    /// poked after build, before the machine runs.
    pub fn set_input(&mut self, name: &str, values: &[u32]) -> Result<(), MachError> {
        let inputs = match &self.ctx {
            Some(ctx) => ctx.inputs.clone(),
            None => Vec::new(),
        };
        for rg in &inputs {
            if self.region_name(rg).as_deref() == Some(name) {
                let cap = rg.words() as usize;
                if values.len() > cap {
                    return Err(MachError::InputTooLarge {
                        name: name.to_owned(),
                        got: values.len(),
                        cap,
                    });
                }
                for (k, &v) in values.iter().enumerate() {
                    self.store_word(rg.start.wrapping_add(4 * k as u32), v);
                }
                return Ok(());
            }
        }
        Err(MachError::NoSuchInput(name.to_owned()))
    }
}

#[cfg(test)]
impl Mach {
    /// A context-free machine with an empty stack region, for unit tests.
    pub(crate) fn test_mach(stack_size: u32) -> Mach {
        let mut m = Mach::blank();
        m.id = 1;
        m.pbp = 0;
        m.psp = 0u32.wrapping_sub(4);
        m.cbp = stack_size - 4;
        m.csp = stack_size;
        m.ip = stack_size;
        m
    }
}

impl fmt::Display for Mach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mach#{}", self.id)?;
        match &self.err {
            Some(ErrorKind::Halt(code)) => write!(f, " HALT:{code}")?,
            Some(kind) => write!(f, " ERR:{kind}")?,
            None => {}
        }
        write!(
            f,
            " @{:#06x} {:#06x}:{:#06x} {:#06x}:{:#06x}",
            self.ip,
            self.pbp,
            self.psp(),
            self.cbp,
            self.csp()
        )
    }
}
