//! Error types for machine construction and execution.

use thiserror::Error;

/// The underlying cause of a failed (or halted) machine.
///
/// A machine stores at most one of these in its error slot; once set, the
/// step loop refuses to run further. Halting is modeled as the `Halt` kind
/// so that the driver can treat "finished" uniformly; halt code 0 is
/// canonicalized away by [`crate::Mach::err`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The crash op (code 0) was executed, usually by running into
    /// zero-initialized or data memory.
    #[error("crashed")]
    Crashed,

    /// A code point with no defined operation was decoded.
    #[error("invalid op UNDEFINED<{code:#04x}>")]
    InvalidOp { code: u8 },

    /// An operation that requires an immediate was decoded without one.
    #[error("missing required immediate for {name}")]
    ImmediateRequired { name: &'static str },

    /// More than five argument bytes without a terminating code byte.
    #[error("varcode argument too long")]
    VarcodeTooLong,

    /// A computed instruction pointer landed inside the stack region.
    #[error("segfault")]
    Segfault,

    /// Parameter or control stack over/underflow.
    #[error("{stack} stack {dir}flow")]
    StackRange {
        stack: &'static str,
        dir: &'static str,
    },

    /// Division or modulus by zero.
    #[error("divide by zero")]
    DivideByZero,

    /// A fork-family op found the run queue at capacity.
    #[error("run queue full")]
    QueueFull,

    /// A fork-family op ran on a machine built without a handler.
    #[error("no run queue")]
    NoQueue,

    /// The lifetime clone cap was reached.
    #[error("max copies({limit}) exceeded")]
    MaxCopies { limit: u32 },

    /// The per-machine operation limit was exceeded.
    #[error("op count limit exceeded")]
    OpLimit,

    /// Normal halt with the given code; 0 is success.
    #[error("HALT({0})")]
    Halt(u32),
}

impl ErrorKind {
    pub(crate) fn overflow(stack: &'static str) -> Self {
        ErrorKind::StackRange { stack, dir: "over" }
    }

    pub(crate) fn underflow(stack: &'static str) -> Self {
        ErrorKind::StackRange {
            stack,
            dir: "under",
        }
    }
}

/// An error surfaced by a machine to its caller.
///
/// Execution failures carry the instruction pointer they occurred at;
/// nonzero halts are a stable identity without position, so handlers can
/// match them by equality.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachError {
    /// Normal halt with a nonzero code.
    #[error("HALT({0})")]
    Halt(u32),

    /// An execution failure at the given instruction pointer.
    #[error("@{addr:#06x}: {kind}")]
    At { addr: u32, kind: ErrorKind },

    /// Leftover control-stack words at halt did not form `(from, to)`
    /// pairs.
    #[error("invalid control stack length {0}")]
    InvalidControlStack(usize),

    /// `set_input` was given a name no input region carries.
    #[error("no input region named {0:?}")]
    NoSuchInput(String),

    /// `set_input` was given more words than its region holds.
    #[error("{got} values exceed input region {name:?} of {cap} words")]
    InputTooLarge { name: String, got: usize, cap: usize },
}

impl MachError {
    /// The cause without positional wrapping, for callers that match on
    /// message text.
    pub fn cause(&self) -> String {
        match self {
            MachError::At { kind, .. } => kind.to_string(),
            other => other.to_string(),
        }
    }
}

/// Build-time failures while parsing the option prefix of an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The image ended inside the option prefix.
    #[error("truncated options")]
    TruncatedOptions,

    /// A nonzero version argument; the version option is reserved.
    #[error("unsupported machine version {0}")]
    UnsupportedVersion(u32),

    /// Stack size of zero or above 0xffff.
    #[error("invalid stack size {0:#x}")]
    InvalidStackSize(u32),

    /// Stack size that is not a multiple of the 32-bit word size.
    #[error("invalid stack size {0:#04x}, not a word-multiple")]
    UnalignedStackSize(u32),

    /// An `output` or `input` option without its closing pair.
    #[error("unpaired {what} option, got code={code:#04x} instead")]
    UnpairedRegion { what: &'static str, code: u8 },

    /// A `name` option with no region declared before it.
    #[error("name option with no preceding region")]
    DanglingName,

    /// An option that requires an argument appeared without one.
    #[error("option {0} requires an argument")]
    MissingArgument(&'static str),

    /// An unrecognized option code.
    #[error("invalid option code={code:#04x} have={have} arg={arg:#x}")]
    InvalidOption { code: u8, have: bool, arg: u32 },
}
