//! Observation hooks around machine execution.
//!
//! Tracers are observational only; they see shared references and must not
//! mutate machine state. The driver routes every hook itself (including
//! `queue`, observed as run-queue growth across a step), so tracers do not
//! wrap the handler or queue the way the capability bundle composes them.

use std::collections::HashMap;

use crate::error::MachError;
use crate::mach::Mach;
use crate::ops::Op;

/// Callbacks around a traced run.
///
/// `begin`/`end` bracket each machine, `before`/`after` bracket each
/// operation, `queue` fires when a machine clones itself, and `handle`
/// reports what the handler said about a finished machine. `context` lets
/// chained tracers expose identity and counters to one another.
pub trait Tracer {
    /// Contextual lookup for composed tracers; return `None` for keys this
    /// tracer does not define.
    fn context(&self, m: &Mach, key: &str) -> Option<String> {
        let _ = (m, key);
        None
    }

    fn begin(&mut self, m: &Mach);
    fn before(&mut self, m: &Mach, ip: u32, op: Op);
    fn after(&mut self, m: &Mach, ip: u32, op: Op);
    fn queue(&mut self, m: &Mach, child: &Mach);
    fn end(&mut self, m: &Mach);
    fn handle(&mut self, m: &Mach, err: Option<&MachError>);
}

/// Fans every callback out to a list of tracers; `context` answers with
/// the first tracer that defines the key.
#[derive(Default)]
pub struct ChainTracer {
    tracers: Vec<Box<dyn Tracer>>,
}

impl ChainTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, t: impl Tracer + 'static) -> Self {
        self.tracers.push(Box::new(t));
        self
    }
}

impl Tracer for ChainTracer {
    fn context(&self, m: &Mach, key: &str) -> Option<String> {
        self.tracers.iter().find_map(|t| t.context(m, key))
    }

    fn begin(&mut self, m: &Mach) {
        for t in &mut self.tracers {
            t.begin(m);
        }
    }

    fn before(&mut self, m: &Mach, ip: u32, op: Op) {
        for t in &mut self.tracers {
            t.before(m, ip, op);
        }
    }

    fn after(&mut self, m: &Mach, ip: u32, op: Op) {
        for t in &mut self.tracers {
            t.after(m, ip, op);
        }
    }

    fn queue(&mut self, m: &Mach, child: &Mach) {
        for t in &mut self.tracers {
            t.queue(m, child);
        }
    }

    fn end(&mut self, m: &Mach) {
        for t in &mut self.tracers {
            t.end(m);
        }
    }

    fn handle(&mut self, m: &Mach, err: Option<&MachError>) {
        for t in &mut self.tracers {
            t.handle(m, err);
        }
    }
}

/// Tracks per-machine operation counts and exposes the `"id"` and
/// `"count"` context keys.
#[derive(Default)]
pub struct CountTracer {
    counts: HashMap<u32, u64>,
}

impl CountTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, m: &Mach) -> u64 {
        self.counts.get(&m.id()).copied().unwrap_or(0)
    }
}

impl Tracer for CountTracer {
    fn context(&self, m: &Mach, key: &str) -> Option<String> {
        match key {
            "id" => Some(m.id().to_string()),
            "count" => Some(self.count(m).to_string()),
            _ => None,
        }
    }

    fn begin(&mut self, _m: &Mach) {}

    fn before(&mut self, m: &Mach, _ip: u32, _op: Op) {
        *self.counts.entry(m.id()).or_default() += 1;
    }

    fn after(&mut self, _m: &Mach, _ip: u32, _op: Op) {}

    fn queue(&mut self, _m: &Mach, _child: &Mach) {}

    fn end(&mut self, _m: &Mach) {}

    fn handle(&mut self, _m: &Mach, _err: Option<&MachError>) {}
}

/// Writes one line per event through a logging function.
pub struct LogTracer<F: FnMut(&str)> {
    log: F,
}

impl<F: FnMut(&str)> LogTracer<F> {
    pub fn new(log: F) -> Self {
        LogTracer { log }
    }
}

impl LogTracer<fn(&str)> {
    /// A log tracer emitting `tracing` debug events.
    pub fn to_tracing() -> Self {
        LogTracer::new(|line: &str| tracing::debug!(target: "forkvm::trace", "{line}"))
    }
}

impl<F: FnMut(&str)> Tracer for LogTracer<F> {
    fn begin(&mut self, m: &Mach) {
        (self.log)(&format!(
            "{m} === Begin pbp={:#06x} cbp={:#06x}",
            m.pbp(),
            m.cbp()
        ));
    }

    fn before(&mut self, m: &Mach, ip: u32, op: Op) {
        let (ps, cs) = m.stacks();
        (self.log)(&format!("{m} >>> {op} @{ip:#06x} ps={ps:?} cs={cs:?}"));
    }

    fn after(&mut self, m: &Mach, ip: u32, op: Op) {
        let (ps, cs) = m.stacks();
        (self.log)(&format!("{m} ... {op} @{ip:#06x} ps={ps:?} cs={cs:?}"));
    }

    fn queue(&mut self, m: &Mach, child: &Mach) {
        (self.log)(&format!("{m} +++ Copy child={}", child.id()));
    }

    fn end(&mut self, m: &Mach) {
        match m.err() {
            Some(err) => (self.log)(&format!("{m} === End err={err}")),
            None => match m.named_values() {
                Ok(values) => (self.log)(&format!("{m} === End values={values:?}")),
                Err(err) => (self.log)(&format!("{m} === End values_err={err}")),
            },
        }
    }

    fn handle(&mut self, m: &Mach, err: Option<&MachError>) {
        match err {
            Some(err) => (self.log)(&format!("{m} !!! Handle err={err}")),
            None => (self.log)(&format!("{m} === Handle")),
        }
    }
}
