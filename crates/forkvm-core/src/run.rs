//! The execution driver: run, single-step, and traced runs.

use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{ErrorKind, MachError};
use crate::mach::Mach;
use crate::tracer::Tracer;

impl Mach {
    /// Decodes and executes one operation, bumping the op count and
    /// enforcing the per-machine limit.
    pub(crate) fn step_inner(&mut self) {
        match self.decode_at(self.ip) {
            Ok(d) => {
                self.ip = d.next;
                if let Err(e) = self.exec(d.code, d.imm()) {
                    self.err = Some(e);
                    return;
                }
            }
            Err(e) => {
                self.err = Some(e);
                return;
            }
        }
        self.op_count += 1;
        if self.op_limit > 0 && self.op_count > self.op_limit {
            self.err = Some(ErrorKind::OpLimit);
        }
    }

    /// Executes exactly one operation; a no-op once the machine has
    /// finished. Returns the machine's canonicalized error state.
    pub fn step(&mut self) -> Result<(), MachError> {
        if self.err.is_none() {
            self.step_inner();
        }
        self.err_result()
    }

    /// Hands the finished machine to the handler; without one, the
    /// machine's own outcome is the result.
    fn finish_current(&mut self) -> Result<(), MachError> {
        let ctx = match &self.ctx {
            Some(c) => Rc::clone(c),
            None => return self.err_result(),
        };
        match &ctx.handler {
            Some(h) => h.borrow_mut().handle(self),
            None => self.err_result(),
        }
    }

    fn take_next(&mut self) -> Option<Mach> {
        self.ctx.as_ref()?.dequeue()
    }

    fn queue_len(&self) -> usize {
        self.ctx.as_ref().map(|c| c.queue_len()).unwrap_or(0)
    }

    /// Releases a dead machine's pages and shell back to the pools.
    fn release(mut dead: Mach) {
        if let Some(ctx) = dead.ctx.take() {
            ctx.release_mach(dead);
        }
    }

    /// Runs until the machine finishes, then drains the run queue LIFO,
    /// handling each finished machine in turn. A handler error cancels
    /// the remaining queue and becomes the return value. On return, this
    /// machine is the last one handled.
    pub fn run(&mut self) -> Result<(), MachError> {
        loop {
            while self.err.is_none() {
                self.step_inner();
            }
            debug!(machine = self.id, state = %self, "machine finished");
            self.finish_current()?;
            match self.take_next() {
                Some(next) => {
                    trace!(machine = next.id(), "resuming queued machine");
                    let dead = mem::replace(self, next);
                    Self::release(dead);
                }
                None => return Ok(()),
            }
        }
    }

    /// [`run`](Mach::run) with tracer callbacks around every machine and
    /// operation. Enqueues are reported to the tracer by watching the run
    /// queue grow across a step.
    pub fn trace(&mut self, tracer: &mut dyn Tracer) -> Result<(), MachError> {
        tracer.begin(self);
        loop {
            while self.err.is_none() {
                let op = match self.decode_at(self.ip) {
                    Ok(d) => d.op(),
                    Err(e) => {
                        self.err = Some(e);
                        break;
                    }
                };
                tracer.before(self, self.ip, op);
                let qlen = self.queue_len();
                self.step_inner();
                if self.queue_len() > qlen {
                    if let Some(ctx) = self.ctx.clone() {
                        ctx.peek_queued(|child| tracer.queue(self, child));
                    }
                }
                if self.err.is_some() {
                    break;
                }
                tracer.after(self, self.ip, op);
            }
            tracer.end(self);
            let res = self.finish_current();
            tracer.handle(self, res.as_ref().err());
            res?;
            match self.take_next() {
                Some(next) => {
                    let dead = mem::replace(self, next);
                    Self::release(dead);
                    tracer.begin(self);
                }
                None => return Ok(()),
            }
        }
    }
}
