//! Table test harness for machine programs.
//!
//! A [`TestCase`] assembles a program, pokes named inputs, runs it (with a
//! collecting handler when multiple results are expected), and asserts on
//! the run error and the named values of every result machine. On a
//! mismatch the case re-runs under a logging tracer to stderr before
//! panicking, so a failing test leaves a full execution trace behind.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use forkvm_core::{LogTracer, Mach, MachError};

use crate::{assemble, Token};

type Values = BTreeMap<String, Vec<u32>>;

enum Prog {
    Tokens(Vec<Token>),
    Raw(Vec<u8>),
}

/// One table entry: a program plus expectations.
pub struct TestCase {
    name: String,
    prog: Prog,
    inputs: Vec<(String, Vec<u32>)>,
    allow_halts: Vec<u32>,
    expect_err: Option<String>,
    results: Vec<Values>,
    expect_results: bool,
}

impl TestCase {
    /// A case over assembler tokens.
    pub fn new(name: &str, prog: Vec<Token>) -> Self {
        TestCase {
            name: name.to_owned(),
            prog: Prog::Tokens(prog),
            inputs: Vec::new(),
            allow_halts: Vec::new(),
            expect_err: None,
            results: Vec::new(),
            expect_results: false,
        }
    }

    /// A case over a raw image, bypassing the assembler.
    pub fn raw(name: &str, image: Vec<u8>) -> Self {
        TestCase {
            name: name.to_owned(),
            prog: Prog::Raw(image),
            inputs: Vec::new(),
            allow_halts: Vec::new(),
            expect_err: None,
            results: Vec::new(),
            expect_results: false,
        }
    }

    /// Pokes `values` into the named input region before running.
    pub fn input(mut self, name: &str, values: &[u32]) -> Self {
        self.inputs.push((name.to_owned(), values.to_vec()));
        self
    }

    /// Nonzero halt codes that are expected from pruned machines; they are
    /// swallowed instead of failing the run.
    pub fn allow_halts(mut self, codes: &[u32]) -> Self {
        self.allow_halts.extend_from_slice(codes);
        self
    }

    /// The run must fail with this error message (the cause, without the
    /// `@ip` prefix).
    pub fn expect_err(mut self, msg: &str) -> Self {
        self.expect_err = Some(msg.to_owned());
        self
    }

    /// Appends the expected named values of the next result machine, in
    /// handling order.
    pub fn expect_result(mut self, values: &[(&str, &[u32])]) -> Self {
        let mut map = Values::new();
        for (name, vals) in values {
            map.insert((*name).to_owned(), vals.to_vec());
        }
        self.results.push(map);
        self.expect_results = true;
        self
    }

    fn image(&self) -> Vec<u8> {
        match &self.prog {
            Prog::Tokens(toks) => match assemble(toks) {
                Ok(img) => img,
                Err(err) => panic!("{}: assemble failed: {err}", self.name),
            },
            Prog::Raw(img) => img.clone(),
        }
    }

    fn handled(&self) -> bool {
        self.expect_results || !self.allow_halts.is_empty()
    }

    fn build(&self, img: &[u8], sink: Rc<RefCell<Vec<Values>>>) -> Mach {
        let built = if self.handled() {
            let allow = self.allow_halts.clone();
            Mach::with_handler(img, move |m: &mut Mach| match m.err() {
                None => {
                    let values = m.named_values()?;
                    sink.borrow_mut().push(values);
                    Ok(())
                }
                Some(MachError::Halt(code)) if allow.contains(&code) => Ok(()),
                Some(err) => Err(err),
            })
        } else {
            Mach::new(img)
        };
        let mut m = match built {
            Ok(m) => m,
            Err(err) => panic!("{}: build failed: {err}", self.name),
        };
        for (name, values) in &self.inputs {
            if let Err(err) = m.set_input(name, values) {
                panic!("{}: set_input({name:?}) failed: {err}", self.name);
            }
        }
        m
    }

    fn check(
        &self,
        outcome: &Result<(), MachError>,
        collected: &[Values],
        last: &Mach,
    ) -> Result<(), String> {
        match (&self.expect_err, outcome) {
            (None, Err(err)) => return Err(format!("unexpected run error: {err}")),
            (Some(want), Ok(())) => {
                return Err(format!("expected run error {want:?}, got success"))
            }
            (Some(want), Err(err)) => {
                if err.cause() != *want {
                    return Err(format!(
                        "expected run error {want:?}, got {:?} ({err})",
                        err.cause()
                    ));
                }
            }
            (None, Ok(())) => {}
        }
        if self.expect_results {
            if collected != self.results {
                return Err(format!(
                    "expected results {:?}, got {:?}",
                    self.results, collected
                ));
            }
        } else if self.expect_err.is_none() {
            // Single-machine success case: it must have halted cleanly.
            if last.halt_code() != Some(0) {
                return Err(format!("expected halt 0, got {:?}", last.err()));
            }
        }
        Ok(())
    }

    /// Runs the case, panicking with context on any mismatch.
    pub fn run(self) {
        let img = self.image();
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut m = self.build(&img, Rc::clone(&sink));
        let outcome = m.run();
        let collected = sink.borrow().clone();
        if let Err(msg) = self.check(&outcome, &collected, &m) {
            eprintln!("==== {} failed; tracing ====", self.name);
            let sink = Rc::new(RefCell::new(Vec::new()));
            let mut m = self.build(&img, sink);
            let mut tracer = LogTracer::new(|line: &str| eprintln!("{line}"));
            let _ = m.trace(&mut tracer);
            panic!("{}: {msg}", self.name);
        }
    }
}

/// A batch of cases run in order.
pub struct TestCases(pub Vec<TestCase>);

impl TestCases {
    pub fn run(self) {
        for tc in self.0 {
            tc.run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toks;

    #[test]
    fn single_success_case() {
        TestCase::new("sum", toks![2, "push", 3, "push", "add", 5, "push", "eq", 1, "hz", "halt"])
            .run();
    }

    #[test]
    fn expected_error_case() {
        TestCase::new("bad sum", toks![3, "push", 3, "push", "add", 5, "push", "eq", 1, "hz", "halt"])
            .expect_err("HALT(1)")
            .run();
    }

    #[test]
    #[should_panic(expected = "expected run error")]
    fn mismatched_expectation_panics() {
        TestCase::new("not an error", toks!["halt"])
            .expect_err("HALT(7)")
            .run();
    }

    #[test]
    fn multi_result_case() {
        TestCase::new(
            "fork results",
            toks![
                ":child", "fork",
                "mark", 1, "push", "mark",
                "halt",
                "child:",
                "mark", 2, "push", "mark",
                "halt",
            ],
        )
        .expect_result(&[("unnamed_output_0", &[1])])
        .expect_result(&[("unnamed_output_0", &[2])])
        .run();
    }
}
