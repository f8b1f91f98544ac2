//! Token-stream assembler.
//!
//! Scanning builds a flat list of program items (ops, data words,
//! allocations, name strings) plus the collected machine options; encoding
//! then lays the items out at their final addresses. Because a varcode
//! record's length depends on its argument, and jump offsets depend on
//! record lengths, layout iterates to a fixed point: record sizes only ever
//! grow, and a final encode pads short arguments with leading zero digits
//! so committed offsets stay valid.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tracing::debug;

use forkvm_core::{optcode, resolve_op, varcode, ImmKind, Op, OpResolveError};

use crate::Token;

const DEFAULT_STACK_SIZE: u32 = forkvm_core::DEFAULT_STACK_SIZE;

/// Assembly failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("undefined labels: {0:?}")]
    UndefinedLabels(Vec<String>),

    #[error("label {0:?} already defined")]
    DuplicateLabel(String),

    #[error("duplicate .entry {0:?}")]
    DuplicateEntry(String),

    #[error(transparent)]
    Op(#[from] OpResolveError),

    #[error("{op} does not accept ref {label:?}")]
    RefNotAllowed { op: String, label: String },

    #[error("invalid directive .{0}")]
    InvalidDirective(String),

    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),

    #[error("unexpected end of input, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("invalid .{directive} {value}, must be {req}")]
    InvalidDirectiveArg {
        directive: &'static str,
        value: i64,
        req: &'static str,
    },

    #[error("invalid number {0:?}")]
    InvalidNumber(String),

    #[error("layout failed to converge")]
    LayoutDiverged,
}

/// Assembles a token stream into a machine image.
pub fn assemble(tokens: &[Token]) -> Result<Vec<u8>, AsmError> {
    let mut sc = Scanner::new(tokens);
    sc.scan()?;
    sc.finish_pending()?;
    let enc = Encoder::new(sc);
    enc.encode()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Text,
    Data,
}

#[derive(Debug, Clone)]
struct Ref {
    label: String,
    off: i64,
}

#[derive(Debug, Clone)]
enum Item {
    Op { op: Op, reff: Option<Ref> },
    Data(u32),
    Alloc(u32),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionKind {
    In,
    Out,
}

#[derive(Debug, Clone)]
struct RegionDecl {
    kind: RegionKind,
    start: String,
    end: String,
    name: String,
}

struct Scanner<'a> {
    toks: &'a [Token],
    i: usize,
    state: Section,

    items: Vec<Item>,
    labels: HashMap<String, usize>,
    regions: Vec<RegionDecl>,

    stack_size: u32,
    queue_size: Option<u32>,
    max_ops: Option<u32>,
    max_copies: Option<u32>,
    entry: Option<String>,

    pend_in: Option<String>,
    pend_out: Option<String>,
}

impl<'a> Scanner<'a> {
    fn new(toks: &'a [Token]) -> Self {
        Scanner {
            toks,
            i: 0,
            state: Section::Text,
            items: Vec::new(),
            labels: HashMap::new(),
            regions: Vec::new(),
            stack_size: DEFAULT_STACK_SIZE,
            queue_size: None,
            max_ops: None,
            max_copies: None,
            entry: None,
            pend_in: None,
            pend_out: None,
        }
    }

    fn scan(&mut self) -> Result<(), AsmError> {
        while self.i < self.toks.len() {
            let tok = self.toks[self.i].clone();
            match self.state {
                Section::Text => self.handle_text(&tok)?,
                Section::Data => self.handle_data(&tok)?,
            }
            self.i += 1;
        }
        Ok(())
    }

    // ---- token plumbing ----

    fn expect(&mut self, what: &'static str) -> Result<Token, AsmError> {
        self.i += 1;
        self.toks
            .get(self.i)
            .cloned()
            .ok_or(AsmError::UnexpectedEnd(what))
    }

    fn expect_int(&mut self, what: &'static str) -> Result<i64, AsmError> {
        match self.expect(what)? {
            Token::Int(n) => Ok(n),
            Token::Str(s) => Err(AsmError::UnexpectedToken(s)),
        }
    }

    fn expect_str(&mut self, what: &'static str) -> Result<String, AsmError> {
        match self.expect(what)? {
            Token::Str(s) => Ok(s),
            Token::Int(n) => Err(AsmError::UnexpectedToken(n.to_string())),
        }
    }

    /// Consumes a `"name:"` token, defining the label at the current
    /// position, and returns the bare name.
    fn expect_label(&mut self, what: &'static str) -> Result<String, AsmError> {
        let s = self.expect_str(what)?;
        match s.strip_suffix(':') {
            Some(name) if !name.is_empty() => {
                let name = name.to_owned();
                self.define_label(&name)?;
                Ok(name)
            }
            _ => Err(AsmError::UnexpectedToken(s)),
        }
    }

    // ---- text section ----

    fn handle_text(&mut self, tok: &Token) -> Result<(), AsmError> {
        match tok {
            Token::Str(s) if s.len() > 1 && s.starts_with('.') => self.handle_directive(&s[1..]),
            Token::Str(s) if s.len() > 1 && s.ends_with(':') => {
                self.define_label(&s[..s.len() - 1].to_owned())
            }
            Token::Str(s) if s.len() > 1 && s.starts_with(':') => {
                let label = s[1..].to_owned();
                self.handle_ref(label, 0)
            }
            Token::Str(s) => {
                let op = resolve_op(s, 0, false)?;
                self.items.push(Item::Op { op, reff: None });
                Ok(())
            }
            Token::Int(n) => self.handle_imm(*n),
        }
    }

    /// An integer in the text section is the immediate of the following
    /// op, or an address offset when a `":label"` reference follows.
    fn handle_imm(&mut self, n: i64) -> Result<(), AsmError> {
        let s = self.expect_str("\":ref\" or an op name")?;
        if s.len() > 1 && s.starts_with(':') {
            return self.handle_ref(s[1..].to_owned(), n);
        }
        let op = resolve_op(&s, int_arg(n)?, true)?;
        self.items.push(Item::Op { op, reff: None });
        Ok(())
    }

    fn handle_ref(&mut self, label: String, off: i64) -> Result<(), AsmError> {
        let name = self.expect_str("an op name")?;
        let op = resolve_op(&name, 0, true)?;
        if !op.accepts_ref() {
            return Err(AsmError::RefNotAllowed {
                op: name,
                label,
            });
        }
        self.items.push(Item::Op {
            op,
            reff: Some(Ref { label, off }),
        });
        Ok(())
    }

    // ---- data section ----

    fn handle_data(&mut self, tok: &Token) -> Result<(), AsmError> {
        match tok {
            Token::Str(s) if s.len() > 1 && s.starts_with('.') => self.handle_directive(&s[1..]),
            Token::Str(s) if s.len() > 1 && s.ends_with(':') => {
                self.define_label(&s[..s.len() - 1].to_owned())
            }
            Token::Str(s) => Err(AsmError::UnexpectedToken(s.clone())),
            Token::Int(n) => {
                let word = int_arg(*n)?;
                self.items.push(Item::Data(word));
                Ok(())
            }
        }
    }

    // ---- directives ----

    fn handle_directive(&mut self, name: &str) -> Result<(), AsmError> {
        match name {
            "text" => {
                self.state = Section::Text;
                self.finish_pending()
            }
            "data" => {
                self.state = Section::Data;
                Ok(())
            }
            "entry" => self.handle_entry(),
            "stackSize" => {
                let n = self.expect_int(".stackSize int")?;
                if !(1..=0xffff).contains(&n) {
                    return Err(AsmError::InvalidDirectiveArg {
                        directive: "stackSize",
                        value: n,
                        req: "in (0x0000, 0xffff]",
                    });
                }
                self.stack_size = n as u32;
                Ok(())
            }
            "queueSize" => {
                let n = self.nonnegative("queueSize")?;
                self.queue_size = Some(n);
                Ok(())
            }
            "maxOps" => {
                let n = self.nonnegative("maxOps")?;
                self.max_ops = Some(n);
                Ok(())
            }
            "maxCopies" => {
                let n = self.nonnegative("maxCopies")?;
                self.max_copies = Some(n);
                Ok(())
            }
            "alloc" if self.state == Section::Data => {
                let n = self.expect_int(".alloc int")?;
                if n < 1 {
                    return Err(AsmError::InvalidDirectiveArg {
                        directive: "alloc",
                        value: n,
                        req: "positive",
                    });
                }
                self.items.push(Item::Alloc(n as u32));
                Ok(())
            }
            "in" if self.state == Section::Data => {
                let name = self.expect_label(".in \"label:\"")?;
                self.pend_in = Some(name);
                Ok(())
            }
            "out" if self.state == Section::Data => {
                let name = self.expect_label(".out \"label:\"")?;
                self.pend_out = Some(name);
                Ok(())
            }
            other => Err(AsmError::InvalidDirective(other.to_owned())),
        }
    }

    fn nonnegative(&mut self, directive: &'static str) -> Result<u32, AsmError> {
        let n = self.expect_int("int")?;
        if n < 0 {
            return Err(AsmError::InvalidDirectiveArg {
                directive,
                value: n,
                req: "non-negative",
            });
        }
        int_arg(n)
    }

    fn handle_entry(&mut self) -> Result<(), AsmError> {
        let name = self.expect_label(".entry \"label:\"")?;
        if let Some(prev) = &self.entry {
            return Err(AsmError::DuplicateEntry(prev.clone()));
        }
        self.entry = Some(name);
        self.state = Section::Text;
        Ok(())
    }

    // ---- labels and pending regions ----

    fn define_label(&mut self, name: &str) -> Result<(), AsmError> {
        self.finish_pending()?;
        if self.labels.contains_key(name) {
            return Err(AsmError::DuplicateLabel(name.to_owned()));
        }
        self.labels.insert(name.to_owned(), self.items.len());
        Ok(())
    }

    /// Flushes a pending `.in`/`.out` declaration: the region runs from
    /// its label to here, and its name string is placed here in the image.
    fn finish_pending(&mut self) -> Result<(), AsmError> {
        if let Some(name) = self.pend_in.take() {
            self.finish_region(RegionKind::In, name)?;
        }
        if let Some(name) = self.pend_out.take() {
            self.finish_region(RegionKind::Out, name)?;
        }
        Ok(())
    }

    fn finish_region(&mut self, kind: RegionKind, name: String) -> Result<(), AsmError> {
        let end_label = format!(".{name}.end");
        let name_label = format!(".{name}.name");
        if self.labels.contains_key(&end_label) {
            return Err(AsmError::DuplicateLabel(end_label));
        }
        self.labels.insert(end_label.clone(), self.items.len());
        self.labels.insert(name_label.clone(), self.items.len());
        self.items.push(Item::Str(name.clone()));
        self.regions.push(RegionDecl {
            kind,
            start: name,
            end: end_label,
            name: name_label,
        });
        Ok(())
    }
}

/// Wraps an i64 token into the u32 argument space, allowing negative
/// values their two's-complement encoding.
fn int_arg(n: i64) -> Result<u32, AsmError> {
    if n >= i64::from(i32::MIN) && n <= i64::from(u32::MAX) {
        Ok(n as u32)
    } else {
        Err(AsmError::InvalidNumber(n.to_string()))
    }
}

struct Encoder<'a> {
    sc: Scanner<'a>,
    base: u32,
}

impl<'a> Encoder<'a> {
    fn new(sc: Scanner<'a>) -> Self {
        let base = sc.stack_size;
        Encoder { sc, base }
    }

    fn check_labels(&self) -> Result<(), AsmError> {
        let mut undefined: Vec<String> = Vec::new();
        let mut check = |label: &String| {
            if !self.sc.labels.contains_key(label) && !undefined.contains(label) {
                undefined.push(label.clone());
            }
        };
        for item in &self.sc.items {
            if let Item::Op {
                reff: Some(reff), ..
            } = item
            {
                check(&reff.label);
            }
        }
        if let Some(entry) = &self.sc.entry {
            check(entry);
        }
        for rg in &self.sc.regions {
            check(&rg.start);
            check(&rg.end);
            check(&rg.name);
        }
        if undefined.is_empty() {
            Ok(())
        } else {
            undefined.sort();
            Err(AsmError::UndefinedLabels(undefined))
        }
    }

    fn encode(self) -> Result<Vec<u8>, AsmError> {
        self.check_labels()?;

        let items = &self.sc.items;
        let mut sizes: Vec<usize> = items
            .iter()
            .map(|item| match item {
                Item::Op { op, reff: None } => op.needed_size(),
                Item::Op { reff: Some(_), .. } => varcode::encoded_len(0, true),
                Item::Data(_) => 4,
                Item::Alloc(n) => 4 * *n as usize,
                Item::Str(s) => 4 + s.len(),
            })
            .collect();
        let mut args: Vec<u32> = items
            .iter()
            .map(|item| match item {
                Item::Op { op, .. } => op.arg,
                _ => 0,
            })
            .collect();

        // Iterate ref arguments to a fixed point. Sizes never shrink, so
        // growth of one record can only push later targets further out;
        // a bounded number of passes settles every offset.
        let mut offsets = Vec::new();
        let mut settled = false;
        for _pass in 0..32 {
            offsets = prefix_offsets(&sizes);
            let mut changed = false;
            for (i, item) in items.iter().enumerate() {
                let (op, reff) = match item {
                    Item::Op {
                        op,
                        reff: Some(reff),
                    } => (op, reff),
                    _ => continue,
                };
                let target =
                    i64::from(self.base) + self.label_offset(&reff.label, &offsets) + reff.off;
                let arg = match op.imm_kind() {
                    ImmKind::Offset => {
                        let site_end =
                            i64::from(self.base) + offsets[i] as i64 + sizes[i] as i64;
                        (target - site_end) as u32
                    }
                    _ => target as u32,
                };
                args[i] = arg;
                let need = varcode::encoded_len(arg, true);
                if need > sizes[i] {
                    sizes[i] = need;
                    changed = true;
                }
            }
            if !changed {
                settled = true;
                break;
            }
        }
        if !settled {
            return Err(AsmError::LayoutDiverged);
        }

        let mut out = Vec::new();
        self.emit_options(&mut out, &offsets);
        for (i, item) in items.iter().enumerate() {
            match item {
                Item::Op { op, reff } => {
                    let have = op.have || reff.is_some();
                    varcode::encode_padded(&mut out, args[i], op.code, have, sizes[i].saturating_sub(1));
                }
                Item::Data(word) => {
                    let mut buf = [0u8; 4];
                    BigEndian::write_u32(&mut buf, *word);
                    out.extend_from_slice(&buf);
                }
                Item::Alloc(n) => {
                    out.resize(out.len() + 4 * *n as usize, 0);
                }
                Item::Str(s) => {
                    let mut buf = [0u8; 4];
                    BigEndian::write_u32(&mut buf, s.len() as u32);
                    out.extend_from_slice(&buf);
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        debug!(
            bytes = out.len(),
            items = items.len(),
            base = self.base,
            "assembled program"
        );
        Ok(out)
    }

    fn label_offset(&self, label: &str, offsets: &[usize]) -> i64 {
        let idx = self.sc.labels[label];
        offsets[idx] as i64
    }

    fn label_addr(&self, label: &str, offsets: &[usize]) -> u32 {
        (i64::from(self.base) + self.label_offset(label, offsets)) as u32
    }

    fn emit_options(&self, out: &mut Vec<u8>, offsets: &[usize]) {
        varcode::encode_into(out, 0, optcode::VERSION, false);
        varcode::encode_into(out, self.sc.stack_size, optcode::STACK_SIZE, true);
        if let Some(n) = self.sc.queue_size {
            varcode::encode_into(out, n, optcode::QUEUE_SIZE, true);
        }
        if let Some(n) = self.sc.max_ops {
            varcode::encode_into(out, n, optcode::MAX_OPS, true);
        }
        if let Some(n) = self.sc.max_copies {
            varcode::encode_into(out, n, optcode::MAX_COPIES, true);
        }
        if let Some(entry) = &self.sc.entry {
            varcode::encode_into(out, self.label_addr(entry, offsets), optcode::ENTRY, true);
        }
        for rg in &self.sc.regions {
            let code = match rg.kind {
                RegionKind::In => optcode::INPUT,
                RegionKind::Out => optcode::OUTPUT,
            };
            varcode::encode_into(out, self.label_addr(&rg.start, offsets), code, true);
            varcode::encode_into(out, self.label_addr(&rg.end, offsets), code, true);
            varcode::encode_into(out, self.label_addr(&rg.name, offsets), optcode::NAME, true);
        }
        varcode::encode_into(out, 0, optcode::END, false);
    }
}

fn prefix_offsets(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len() + 1);
    let mut at = 0;
    for &sz in sizes {
        offsets.push(at);
        at += sz;
    }
    offsets.push(at);
    offsets
}
