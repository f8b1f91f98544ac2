//! Text surface for the assembler.
//!
//! The file format is the token stream written out: whitespace- or
//! comma-separated words and integers, with `#` and `//` comments. Decimal,
//! hex (`0x`), and negative integers are accepted.

use crate::asm::{assemble, AsmError};
use crate::Token;

/// Parses assembly text into the token stream [`assemble`] takes.
pub fn parse_text(src: &str) -> Result<Vec<Token>, AsmError> {
    let mut toks = Vec::new();
    for line in src.lines() {
        let line = match line.find('#') {
            Some(i) => &line[..i],
            None => line,
        };
        let line = match line.find("//") {
            Some(i) => &line[..i],
            None => line,
        };
        for word in line.split([' ', '\t', ',']) {
            let word = word.trim();
            if word.is_empty() {
                continue;
            }
            toks.push(parse_word(word)?);
        }
    }
    Ok(toks)
}

fn parse_word(word: &str) -> Result<Token, AsmError> {
    let first = word.chars().next().unwrap_or(' ');
    if first.is_ascii_digit() || first == '-' {
        let (digits, neg) = match word.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (word, false),
        };
        let value = if let Some(hex) = digits.strip_prefix("0x") {
            i64::from_str_radix(hex, 16)
        } else {
            digits.parse::<i64>()
        }
        .map_err(|_| AsmError::InvalidNumber(word.to_owned()))?;
        return Ok(Token::Int(if neg { -value } else { value }));
    }
    Ok(Token::Str(word.to_owned()))
}

/// Assembles a text program into a machine image.
pub fn assemble_text(src: &str) -> Result<Vec<u8>, AsmError> {
    let toks = parse_text(src)?;
    assemble(&toks)
}
