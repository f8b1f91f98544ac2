//! A byte-coded stack virtual machine that multiplies.
//!
//! Programs run on a small two-stack word machine with paged, copy-on-write
//! memory. The distinguishing feature is *machine multiplication*: a running
//! machine may clone itself (`fork`, `branch`) to explore alternative
//! continuations, and the driver feeds every finished machine to a
//! user-supplied [`Handler`], draining the run queue depth-first. Each
//! resulting machine represents one candidate solution; declared output
//! regions (plus any `(from, to)` pairs left on the control stack at a
//! clean halt) carry its result values.
//!
//! ```
//! use forkvm_core::{resolve_op, Mach};
//!
//! // 2 push, 3 push, add, 5 push, eq, 1 hz, halt
//! let mut img = vec![0x00]; // end of options
//! for (name, imm) in [
//!     ("push", Some(2)),
//!     ("push", Some(3)),
//!     ("add", None),
//!     ("push", Some(5)),
//!     ("eq", None),
//!     ("hz", Some(1)),
//!     ("halt", None),
//! ] {
//!     resolve_op(name, imm.unwrap_or(0), imm.is_some())
//!         .unwrap()
//!         .encode_into(&mut img);
//! }
//! let mut m = Mach::new(&img).unwrap();
//! m.run().unwrap();
//! assert_eq!(m.halt_code(), Some(0));
//! ```

mod alloc;
mod build;
mod context;
mod error;
mod handler;
mod mach;
mod ops;
mod page;
mod queue;
mod run;
mod tracer;
pub mod varcode;

pub use build::{optcode, DEFAULT_QUEUE_SIZE, DEFAULT_STACK_SIZE};
pub use error::{BuildError, ErrorKind, MachError};
pub use handler::Handler;
pub use mach::{Mach, Region};
pub use ops::{op_name, resolve_op, ImmKind, Op, OpResolveError};
pub use page::PAGE_SIZE;
pub use tracer::{ChainTracer, CountTracer, LogTracer, Tracer};
