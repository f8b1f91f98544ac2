//! Building machines from program images.
//!
//! An image is a varcode option prefix terminated by the `end` option,
//! followed by the program text, which is loaded into memory starting at
//! `stack_size`. Options configure the stack region, the run queue, the
//! execution limits, and the declared I/O regions.

use tracing::debug;

use crate::alloc::{CappedMachAlloc, MachAlloc, MachPool, PagePool};
use crate::context::Context;
use crate::error::BuildError;
use crate::handler::Handler;
use crate::mach::{Mach, Region};
use crate::queue::{NoQueue, Queue, RunQueue};
use crate::varcode;

/// Option codes recognized in the image prefix.
pub mod optcode {
    /// Ends the option prefix; the next byte begins the program text. Must
    /// not carry an argument.
    pub const END: u8 = 0x00;
    /// Size in bytes of the combined stack region; word-multiple, at most
    /// 0xffff.
    pub const STACK_SIZE: u8 = 0x01;
    /// Capacity of the run queue when a handler is configured.
    pub const QUEUE_SIZE: u8 = 0x02;
    /// Per-machine operation limit; absent or zero means unlimited.
    pub const MAX_OPS: u8 = 0x03;
    /// Lifetime clone cap across all descendants; absent or zero means
    /// unlimited.
    pub const MAX_COPIES: u8 = 0x04;
    /// Initial instruction pointer instead of the program base.
    pub const ENTRY: u8 = 0x05;
    /// One endpoint of an output region; must appear in start/end pairs.
    pub const OUTPUT: u8 = 0x06;
    /// One endpoint of an input region; must appear in start/end pairs.
    pub const INPUT: u8 = 0x07;
    /// Address of a length-prefixed string naming the region declared
    /// immediately before.
    pub const NAME: u8 = 0x08;
    /// Reserved; only version 0 is accepted.
    pub const VERSION: u8 = 0x7f;
}

/// Stack region size used when no `stackSize` option is present.
pub const DEFAULT_STACK_SIZE: u32 = 0x40;
/// Run queue capacity used when no `queueSize` option is present.
pub const DEFAULT_QUEUE_SIZE: u32 = 10;

const PAGES_PER_MACHINE_GUESS: u32 = 4;

struct MachBuilder<'a> {
    buf: &'a [u8],
    pos: usize,
    stack_size: u32,
    queue_size: u32,
    max_ops: u32,
    max_copies: u32,
    entry: Option<u32>,
    outputs: Vec<Region>,
    inputs: Vec<Region>,
    named_last: Option<(bool, usize)>,
}

impl<'a> MachBuilder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        MachBuilder {
            buf,
            pos: 0,
            stack_size: DEFAULT_STACK_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
            max_ops: 0,
            max_copies: 0,
            entry: None,
            outputs: Vec::new(),
            inputs: Vec::new(),
            named_last: None,
        }
    }

    fn read_opt(&mut self) -> Result<varcode::Record, BuildError> {
        let rec = varcode::decode(&self.buf[self.pos..]).ok_or(BuildError::TruncatedOptions)?;
        self.pos += rec.len;
        Ok(rec)
    }

    fn read_pair_end(&mut self, what: &'static str, code: u8) -> Result<u32, BuildError> {
        let rec = self.read_opt()?;
        if rec.code != code || !rec.have {
            return Err(BuildError::UnpairedRegion {
                what,
                code: rec.code,
            });
        }
        Ok(rec.arg)
    }

    fn parse(&mut self) -> Result<(), BuildError> {
        use optcode::*;
        loop {
            let rec = self.read_opt()?;
            match (rec.code, rec.have) {
                (END, false) => return Ok(()),

                (VERSION, false) => {}
                (VERSION, true) => {
                    if rec.arg != 0 {
                        return Err(BuildError::UnsupportedVersion(rec.arg));
                    }
                }

                (STACK_SIZE, true) => {
                    if rec.arg == 0 || rec.arg > 0xffff {
                        return Err(BuildError::InvalidStackSize(rec.arg));
                    }
                    if rec.arg % 4 != 0 {
                        return Err(BuildError::UnalignedStackSize(rec.arg));
                    }
                    self.stack_size = rec.arg;
                }
                (STACK_SIZE, false) => return Err(BuildError::MissingArgument("stackSize")),

                (QUEUE_SIZE, true) => self.queue_size = rec.arg,
                (QUEUE_SIZE, false) => return Err(BuildError::MissingArgument("queueSize")),

                (MAX_OPS, have) => self.max_ops = if have { rec.arg } else { 0 },
                (MAX_COPIES, have) => self.max_copies = if have { rec.arg } else { 0 },

                (ENTRY, true) => self.entry = Some(rec.arg),
                (ENTRY, false) => return Err(BuildError::MissingArgument("entry")),

                (OUTPUT, true) => {
                    let end = self.read_pair_end("output", OUTPUT)?;
                    self.outputs.push(Region::new(rec.arg, end));
                    self.named_last = Some((false, self.outputs.len() - 1));
                }
                (OUTPUT, false) => return Err(BuildError::MissingArgument("output")),

                (INPUT, true) => {
                    let end = self.read_pair_end("input", INPUT)?;
                    self.inputs.push(Region::new(rec.arg, end));
                    self.named_last = Some((true, self.inputs.len() - 1));
                }
                (INPUT, false) => return Err(BuildError::MissingArgument("input")),

                (NAME, true) => match self.named_last.take() {
                    Some((true, i)) => self.inputs[i].name_addr = Some(rec.arg),
                    Some((false, i)) => self.outputs[i].name_addr = Some(rec.arg),
                    None => return Err(BuildError::DanglingName),
                },
                (NAME, false) => return Err(BuildError::MissingArgument("name")),

                (code, have) => {
                    return Err(BuildError::InvalidOption {
                        code,
                        have,
                        arg: rec.arg,
                    })
                }
            }
        }
    }
}

fn build(prog: &[u8], handler: Option<Box<dyn Handler>>) -> Result<Mach, BuildError> {
    let mut b = MachBuilder::new(prog);
    b.parse()?;
    debug!(
        stack_size = b.stack_size,
        queue_size = b.queue_size,
        max_ops = b.max_ops,
        max_copies = b.max_copies,
        outputs = b.outputs.len(),
        inputs = b.inputs.len(),
        "machine options parsed"
    );

    let (queue, machs): (Box<dyn Queue>, Box<dyn MachAlloc>) = if handler.is_some() {
        let pool = MachPool::new(b.queue_size as usize);
        let machs: Box<dyn MachAlloc> = if b.max_copies > 0 {
            Box::new(CappedMachAlloc::new(b.max_copies, pool))
        } else {
            Box::new(pool)
        };
        (Box::new(RunQueue::new(b.queue_size as usize)), machs)
    } else {
        (Box::new(NoQueue), Box::new(MachPool::new(0)))
    };
    let pages = PagePool::new((b.queue_size * PAGES_PER_MACHINE_GUESS) as usize);
    let ctx = Context::new(queue, handler, machs, pages, b.outputs, b.inputs);

    let mut m = Mach::blank();
    m.id = ctx.take_id();
    m.ctx = Some(ctx);
    m.pbp = 0;
    m.psp = 0u32.wrapping_sub(4);
    m.cbp = b.stack_size - 4;
    m.csp = b.stack_size;
    m.ip = b.entry.unwrap_or(b.stack_size);
    m.op_limit = b.max_ops;
    m.store_bytes(b.stack_size, &prog[b.pos..]);
    Ok(m)
}

impl Mach {
    /// Builds a machine from a program image, without a handler: fork and
    /// branch will fail, and [`run`](Mach::run) returns this machine's own
    /// outcome.
    pub fn new(prog: &[u8]) -> Result<Mach, BuildError> {
        build(prog, None)
    }

    /// Builds a machine with a result handler. A run queue is set up so
    /// the machine may multiply; the handler sees every machine once it
    /// has finished.
    pub fn with_handler(prog: &[u8], handler: impl Handler + 'static) -> Result<Mach, BuildError> {
        build(prog, Some(Box::new(handler)))
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> std::rc::Rc<Context> {
    Context::new(
        Box::new(NoQueue),
        None,
        Box::new(MachPool::new(0)),
        PagePool::new(0),
        Vec::new(),
        Vec::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(entries: &[(u8, Option<u32>)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &(code, arg) in entries {
            varcode::encode_into(&mut buf, arg.unwrap_or(0), code, arg.is_some());
        }
        buf
    }

    #[test]
    fn defaults_apply_with_a_bare_end_marker() {
        let m = Mach::new(&[optcode::END]).unwrap();
        assert_eq!(m.pbp(), 0);
        assert_eq!(m.psp(), 0);
        assert_eq!(m.cbp(), DEFAULT_STACK_SIZE - 4);
        assert_eq!(m.csp(), DEFAULT_STACK_SIZE - 4);
        assert_eq!(m.ip(), DEFAULT_STACK_SIZE);
    }

    #[test]
    fn program_bytes_load_after_the_stack() {
        let mut img = opts(&[(optcode::STACK_SIZE, Some(0x80)), (optcode::END, None)]);
        img.extend_from_slice(&[0xaa, 0xbb]);
        let m = Mach::new(&img).unwrap();
        assert_eq!(m.ip(), 0x80);
        let mut buf = [0u8; 2];
        m.copy_out(0x80, &mut buf);
        assert_eq!(buf, [0xaa, 0xbb]);
    }

    #[test]
    fn entry_option_overrides_initial_ip() {
        let img = opts(&[(optcode::ENTRY, Some(0x100)), (optcode::END, None)]);
        let m = Mach::new(&img).unwrap();
        assert_eq!(m.ip(), 0x100);
    }

    #[test]
    fn bad_stack_sizes_are_rejected() {
        for (arg, want) in [
            (0u32, BuildError::InvalidStackSize(0)),
            (0x1_0000, BuildError::InvalidStackSize(0x1_0000)),
            (0x42, BuildError::UnalignedStackSize(0x42)),
        ] {
            let img = opts(&[(optcode::STACK_SIZE, Some(arg)), (optcode::END, None)]);
            assert_eq!(Mach::new(&img).unwrap_err(), want);
        }
    }

    #[test]
    fn nonzero_version_is_rejected() {
        let img = opts(&[(optcode::VERSION, Some(1)), (optcode::END, None)]);
        assert_eq!(
            Mach::new(&img).unwrap_err(),
            BuildError::UnsupportedVersion(1)
        );
        let img = opts(&[(optcode::VERSION, Some(0)), (optcode::END, None)]);
        assert!(Mach::new(&img).is_ok());
        let img = opts(&[(optcode::VERSION, None), (optcode::END, None)]);
        assert!(Mach::new(&img).is_ok());
    }

    #[test]
    fn output_options_must_pair() {
        let img = opts(&[(optcode::OUTPUT, Some(0x50)), (optcode::END, None)]);
        assert_eq!(
            Mach::new(&img).unwrap_err(),
            BuildError::UnpairedRegion {
                what: "output",
                code: optcode::END,
            }
        );
        let img = opts(&[
            (optcode::OUTPUT, Some(0x50)),
            (optcode::OUTPUT, Some(0x58)),
            (optcode::END, None),
        ]);
        let m = Mach::new(&img).unwrap();
        assert_eq!(m.outputs(), vec![Region::new(0x50, 0x58)]);
    }

    #[test]
    fn unknown_options_are_rejected() {
        let img = opts(&[(0x20, Some(1)), (optcode::END, None)]);
        assert_eq!(
            Mach::new(&img).unwrap_err(),
            BuildError::InvalidOption {
                code: 0x20,
                have: true,
                arg: 1,
            }
        );
    }

    #[test]
    fn truncated_options_are_rejected() {
        assert_eq!(Mach::new(&[]).unwrap_err(), BuildError::TruncatedOptions);
        assert_eq!(
            Mach::new(&[0x81]).unwrap_err(),
            BuildError::TruncatedOptions
        );
    }

    #[test]
    fn name_needs_a_region() {
        let img = opts(&[(optcode::NAME, Some(0x90)), (optcode::END, None)]);
        assert_eq!(Mach::new(&img).unwrap_err(), BuildError::DanglingName);
    }
}
