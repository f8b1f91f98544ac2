//! forkvm: a byte-coded stack machine that clones itself to explore a
//! search tree.
//!
//! This crate re-exports the interpreter core ([`forkvm_core`]) and the
//! assembler ([`forkvm_asm`]), and adds the collect-everything run helper
//! the CLI is built on.

pub use forkvm_asm::{assemble, assemble_text, parse_text, AsmError, Token};
pub use forkvm_core::{
    op_name, resolve_op, BuildError, ChainTracer, CountTracer, ErrorKind, Handler, ImmKind,
    LogTracer, Mach, MachError, Op, Region, Tracer, PAGE_SIZE,
};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;

/// The outcome of one result machine from a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunResult {
    /// The machine's id (1 is the initial machine).
    pub machine: u32,
    /// The canonicalized error, if the machine did not halt cleanly.
    pub error: Option<String>,
    /// Named output values for machines that halted with code 0.
    pub values: BTreeMap<String, Vec<u32>>,
}

/// Runs an image to completion, collecting one [`RunResult`] per machine.
///
/// Unlike a bare [`Mach::run`], machine failures are recorded rather than
/// cancelling the run, so the whole search tree is always explored.
pub fn run_collect(
    image: &[u8],
    inputs: &[(String, Vec<u32>)],
) -> Result<Vec<RunResult>, BuildError> {
    let results: Rc<RefCell<Vec<RunResult>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&results);
    let mut m = Mach::with_handler(image, move |m: &mut Mach| {
        let (error, values) = match m.err() {
            None => (None, m.named_values().unwrap_or_default()),
            Some(err) => (Some(err.to_string()), BTreeMap::new()),
        };
        sink.borrow_mut().push(RunResult {
            machine: m.id(),
            error,
            values,
        });
        Ok(())
    })?;
    for (name, values) in inputs {
        if let Err(err) = m.set_input(name, values) {
            tracing::warn!(input = name.as_str(), %err, "input ignored");
        }
    }
    let _ = m.run();
    Ok(results.take())
}
