//! Assembler and test tooling for forkvm programs.
//!
//! The assembler turns a stream of generic tokens into a byte-encoded
//! machine image: operation names, optionally preceded by an immediate
//! argument; `"label:"` definitions; `":label"` references (a number
//! immediately before a reference is added to the referenced address); and
//! dot-directives for sections, allocation, named I/O regions, and machine
//! options.
//!
//! ```
//! use forkvm_asm::{assemble, toks};
//!
//! let img = assemble(&toks![
//!     2, "push", 3, "push", "add",
//!     5, "push", "eq",
//!     1, "hz", "halt",
//! ])
//! .unwrap();
//! let mut m = forkvm_core::Mach::new(&img).unwrap();
//! m.run().unwrap();
//! assert_eq!(m.halt_code(), Some(0));
//! ```

mod asm;
pub mod harness;
mod text;

pub use asm::{assemble, AsmError};
pub use text::{assemble_text, parse_text};

/// One input token for [`assemble`]: an integer or a word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Int(i64),
    Str(String),
}

impl From<i64> for Token {
    fn from(v: i64) -> Self {
        Token::Int(v)
    }
}

impl From<i32> for Token {
    fn from(v: i32) -> Self {
        Token::Int(v.into())
    }
}

impl From<u32> for Token {
    fn from(v: u32) -> Self {
        Token::Int(v.into())
    }
}

impl From<usize> for Token {
    fn from(v: usize) -> Self {
        Token::Int(v as i64)
    }
}

impl From<&str> for Token {
    fn from(v: &str) -> Self {
        Token::Str(v.to_owned())
    }
}

impl From<String> for Token {
    fn from(v: String) -> Self {
        Token::Str(v)
    }
}

/// Builds a `Vec<Token>` from mixed integer and string literals.
#[macro_export]
macro_rules! toks {
    ($($tok:expr),* $(,)?) => {
        vec![$($crate::Token::from($tok)),*]
    };
}
