//! The operation table and interpreter dispatch.
//!
//! 128 code points. Code 0 is `crash` so that running into zeroed memory
//! fails loudly; code 0x7f is `halt`. Each defined code carries a name and
//! an immediate kind; for `value` immediates the immediate substitutes for
//! popping the top of the parameter stack, for `address` immediates it
//! substitutes the popped address, and for `offset` immediates (control
//! flow) it is a signed displacement from the committed instruction
//! pointer.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::mach::Mach;
use crate::varcode;

pub(crate) const CRASH: u8 = 0x00;
pub(crate) const NOP: u8 = 0x01;
pub(crate) const PUSH: u8 = 0x02;
pub(crate) const POP: u8 = 0x03;
pub(crate) const DUP: u8 = 0x04;
pub(crate) const SWAP: u8 = 0x05;
pub(crate) const FETCH: u8 = 0x08;
pub(crate) const STORE: u8 = 0x09;
pub(crate) const STORETO: u8 = 0x0a;
pub(crate) const ADD: u8 = 0x10;
pub(crate) const SUB: u8 = 0x11;
pub(crate) const MUL: u8 = 0x12;
pub(crate) const DIV: u8 = 0x13;
pub(crate) const MOD: u8 = 0x14;
pub(crate) const DIVMOD: u8 = 0x15;
pub(crate) const NEG: u8 = 0x16;
pub(crate) const LT: u8 = 0x18;
pub(crate) const LTE: u8 = 0x19;
pub(crate) const GT: u8 = 0x1a;
pub(crate) const GTE: u8 = 0x1b;
pub(crate) const EQ: u8 = 0x1c;
pub(crate) const NEQ: u8 = 0x1d;
pub(crate) const NOT: u8 = 0x20;
pub(crate) const AND: u8 = 0x21;
pub(crate) const OR: u8 = 0x22;
pub(crate) const CPUSH: u8 = 0x28;
pub(crate) const CPOP: u8 = 0x29;
pub(crate) const P2C: u8 = 0x2a;
pub(crate) const C2P: u8 = 0x2b;
pub(crate) const MARK: u8 = 0x2c;
pub(crate) const JUMP: u8 = 0x30;
pub(crate) const JNZ: u8 = 0x31;
pub(crate) const JZ: u8 = 0x32;
pub(crate) const CALL: u8 = 0x33;
pub(crate) const RET: u8 = 0x34;
pub(crate) const FORK: u8 = 0x40;
pub(crate) const FNZ: u8 = 0x41;
pub(crate) const FZ: u8 = 0x42;
pub(crate) const BRANCH: u8 = 0x50;
pub(crate) const BNZ: u8 = 0x51;
pub(crate) const BZ: u8 = 0x52;
pub(crate) const BITNOT: u8 = 0x58;
pub(crate) const BITAND: u8 = 0x59;
pub(crate) const BITOR: u8 = 0x5a;
pub(crate) const BITXOR: u8 = 0x5b;
pub(crate) const SHIFTL: u8 = 0x5c;
pub(crate) const SHIFTR: u8 = 0x5d;
pub(crate) const BITEST: u8 = 0x60;
pub(crate) const BITSET: u8 = 0x61;
pub(crate) const BITOST: u8 = 0x62;
pub(crate) const BITSETA: u8 = 0x63;
pub(crate) const BITOSTA: u8 = 0x64;
pub(crate) const HNZ: u8 = 0x7d;
pub(crate) const HZ: u8 = 0x7e;
pub(crate) const HALT: u8 = 0x7f;

/// How an operation interprets its immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    /// No immediate accepted.
    None,
    /// Stands in for popping the top of the parameter stack.
    Value,
    /// A memory address, immediate or popped.
    Addr,
    /// A signed displacement from the committed IP, immediate or popped.
    Offset,
}

/// Static metadata for one code point.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpDef {
    pub(crate) name: &'static str,
    pub(crate) imm: ImmKind,
    pub(crate) required: bool,
}

const fn just(name: &'static str) -> OpDef {
    OpDef {
        name,
        imm: ImmKind::None,
        required: false,
    }
}

const fn val(name: &'static str) -> OpDef {
    OpDef {
        name,
        imm: ImmKind::Value,
        required: false,
    }
}

const fn req(name: &'static str) -> OpDef {
    OpDef {
        name,
        imm: ImmKind::Value,
        required: true,
    }
}

const fn addr(name: &'static str) -> OpDef {
    OpDef {
        name,
        imm: ImmKind::Addr,
        required: false,
    }
}

const fn off(name: &'static str) -> OpDef {
    OpDef {
        name,
        imm: ImmKind::Offset,
        required: false,
    }
}

const NO: OpDef = just("");

#[rustfmt::skip]
pub(crate) static OPS: [OpDef; 128] = [
    // 0x00
    just("crash"), just("nop"), req("push"), val("pop"),
    val("dup"), val("swap"), NO, NO,
    // 0x08
    addr("fetch"), val("store"), addr("storeTo"), NO, NO, NO, NO, NO,
    // 0x10
    val("add"), val("sub"), val("mul"), val("div"),
    val("mod"), val("divmod"), just("neg"), NO,
    // 0x18
    val("lt"), val("lte"), val("gt"), val("gte"),
    val("eq"), val("neq"), NO, NO,
    // 0x20
    just("not"), just("and"), just("or"), NO, NO, NO, NO, NO,
    // 0x28
    req("cpush"), val("cpop"), val("p2c"), val("c2p"),
    just("mark"), NO, NO, NO,
    // 0x30
    off("jump"), off("jnz"), off("jz"), addr("call"),
    just("ret"), NO, NO, NO,
    // 0x38
    NO, NO, NO, NO, NO, NO, NO, NO,
    // 0x40
    off("fork"), off("fnz"), off("fz"), NO, NO, NO, NO, NO,
    // 0x48
    NO, NO, NO, NO, NO, NO, NO, NO,
    // 0x50
    off("branch"), off("bnz"), off("bz"), NO, NO, NO, NO, NO,
    // 0x58
    just("bitnot"), val("bitand"), val("bitor"), val("bitxor"),
    val("shiftl"), val("shiftr"), NO, NO,
    // 0x60
    addr("bitest"), addr("bitset"), addr("bitost"),
    addr("bitseta"), addr("bitosta"), NO, NO, NO,
    // 0x68
    NO, NO, NO, NO, NO, NO, NO, NO,
    // 0x70
    NO, NO, NO, NO, NO, NO, NO, NO,
    // 0x78
    NO, NO, NO, NO, NO, val("hnz"), val("hz"), val("halt"),
];

pub(crate) fn def(code: u8) -> &'static OpDef {
    &OPS[(code & 0x7f) as usize]
}

/// The name of a code point, if it is defined.
pub fn op_name(code: u8) -> Option<&'static str> {
    let d = def(code);
    (!d.name.is_empty()).then_some(d.name)
}

/// A decoded (or to-be-encoded) operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Op {
    pub code: u8,
    pub arg: u32,
    pub have: bool,
}

impl Op {
    /// The operation's name, or `"UNDEFINED<0xNN>"` rendered via
    /// [`fmt::Display`] for unknown codes.
    pub fn name(&self) -> &'static str {
        def(self.code).name
    }

    /// The immediate kind of this operation's code point.
    pub fn imm_kind(&self) -> ImmKind {
        def(self.code).imm
    }

    /// Whether the argument may be resolved from a label reference.
    pub fn accepts_ref(&self) -> bool {
        matches!(
            self.imm_kind(),
            ImmKind::Value | ImmKind::Addr | ImmKind::Offset
        )
    }

    /// Appends the varcode encoding of this op, returning bytes written.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> usize {
        varcode::encode_into(out, self.arg, self.code, self.have)
    }

    /// Bytes the encoding will take.
    pub fn needed_size(&self) -> usize {
        varcode::encoded_len(self.arg, self.have)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = def(self.code);
        if d.name.is_empty() {
            return write!(f, "UNDEFINED<{:#04x}>", self.code);
        }
        if !self.have {
            return f.write_str(d.name);
        }
        match d.imm {
            ImmKind::Value => write!(f, "{} {}", self.arg, d.name),
            ImmKind::Addr => write!(f, "@{:#06x} {}", self.arg, d.name),
            ImmKind::Offset => write!(f, "{:+#x} {}", self.arg as i32, d.name),
            ImmKind::None => write!(f, "{} {}", self.arg, d.name),
        }
    }
}

/// Failure to resolve a symbolic operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpResolveError {
    #[error("no such operation {0:?}")]
    NoSuchOp(String),
    #[error("operation {0} does not accept an argument")]
    NoArg(&'static str),
}

/// Builds an [`Op`] from its symbolic name and argument.
pub fn resolve_op(name: &str, arg: u32, have: bool) -> Result<Op, OpResolveError> {
    for (code, d) in OPS.iter().enumerate() {
        if !d.name.is_empty() && d.name == name {
            if have && d.imm == ImmKind::None {
                return Err(OpResolveError::NoArg(d.name));
            }
            return Ok(Op {
                code: code as u8,
                arg,
                have,
            });
        }
    }
    Err(OpResolveError::NoSuchOp(name.to_owned()))
}

/// One decoded instruction plus the address just past it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Decoded {
    pub(crate) next: u32,
    pub(crate) code: u8,
    pub(crate) arg: u32,
    pub(crate) have: bool,
}

impl Decoded {
    pub(crate) fn imm(&self) -> Option<u32> {
        self.have.then_some(self.arg)
    }

    pub(crate) fn op(&self) -> Op {
        Op {
            code: self.code,
            arg: self.arg,
            have: self.have,
        }
    }
}

impl Mach {
    /// Decodes the varcode record at `addr` out of paged memory, checking
    /// the code point and its immediate policy.
    pub(crate) fn decode_at(&self, addr: u32) -> Result<Decoded, ErrorKind> {
        let mut arg = 0u32;
        let mut end = addr;
        for k in 0..varcode::MAX_LEN {
            let b = self.fetch_byte(end);
            end = end.wrapping_add(1);
            if b & 0x80 == 0 {
                let code = b & 0x7f;
                let have = k > 0;
                let d = def(code);
                if d.name.is_empty() {
                    return Err(ErrorKind::InvalidOp { code });
                }
                if d.required && !have {
                    return Err(ErrorKind::ImmediateRequired { name: d.name });
                }
                return Ok(Decoded {
                    next: end,
                    code,
                    arg,
                    have,
                });
            }
            if k + 1 == varcode::MAX_LEN {
                break;
            }
            arg = arg << 7 | u32::from(b & 0x7f);
        }
        Err(ErrorKind::VarcodeTooLong)
    }

    // ---- operand helpers ----

    fn operand(&mut self, imm: Option<u32>) -> Result<u32, ErrorKind> {
        match imm {
            Some(v) => Ok(v),
            None => self.p_pop(),
        }
    }

    fn offset(&mut self, imm: Option<u32>) -> Result<i32, ErrorKind> {
        Ok(self.operand(imm)? as i32)
    }

    /// Validates a computed instruction pointer against the stack region.
    fn check_ip(&self, target: u32) -> Result<u32, ErrorKind> {
        if target >= self.pbp && target < self.cbp.wrapping_add(4) {
            return Err(ErrorKind::Segfault);
        }
        Ok(target)
    }

    fn checked_target(&self, off: i32) -> Result<u32, ErrorKind> {
        self.check_ip(self.ip.wrapping_add_signed(off))
    }

    fn binop(&mut self, imm: Option<u32>, f: fn(u32, u32) -> u32) -> Result<(), ErrorKind> {
        let b = self.operand(imm)?;
        let a = self.p_pop()?;
        self.p_push(f(a, b))
    }

    /// Resolves a bit-vector operand pair to the word address holding the
    /// bit and its mask.
    fn bit_loc(&mut self, imm: Option<u32>) -> Result<(u32, u32), ErrorKind> {
        let base = self.operand(imm)?;
        let bit = self.p_pop()?;
        let addr = base.wrapping_add(4 * (bit >> 5));
        Ok((addr, 1 << (bit & 31)))
    }

    /// Clones this machine and enqueues the clone. With `to_child` the
    /// clone resumes at the target and this machine falls through;
    /// otherwise the clone falls through and this machine takes the
    /// target.
    fn multiply(&mut self, target: u32, to_child: bool) -> Result<(), ErrorKind> {
        let ctx = match &self.ctx {
            Some(c) => Rc::clone(c),
            None => return Err(ErrorKind::NoQueue),
        };
        let mut child = ctx.alloc_mach()?;
        self.clone_into(&mut child, &ctx);
        if to_child {
            child.ip = target;
        }
        ctx.enqueue(child)?;
        if !to_child {
            self.ip = target;
        }
        Ok(())
    }

    // ---- dispatch ----

    /// Executes one already-decoded operation against this machine.
    pub(crate) fn exec(&mut self, code: u8, imm: Option<u32>) -> Result<(), ErrorKind> {
        match code {
            CRASH => Err(ErrorKind::Crashed),
            NOP => Ok(()),

            PUSH => {
                let v = self.operand(imm)?;
                self.p_push(v)
            }
            POP => {
                for _ in 0..imm.unwrap_or(1) {
                    self.p_pop()?;
                }
                Ok(())
            }
            DUP => {
                let addr = self.p_addr(imm.unwrap_or(0))?;
                let v = self.fetch_word(addr);
                self.p_push(v)
            }
            SWAP => {
                let a = self.p_addr(0)?;
                let b = self.p_addr(imm.unwrap_or(1))?;
                let (va, vb) = (self.fetch_word(a), self.fetch_word(b));
                self.store_word(a, vb);
                self.store_word(b, va);
                Ok(())
            }

            FETCH => {
                let addr = self.operand(imm)?;
                let v = self.fetch_word(addr);
                self.p_push(v)
            }
            STORE => {
                let v = self.operand(imm)?;
                let addr = self.p_pop()?;
                self.store_word(addr, v);
                Ok(())
            }
            STORETO => {
                let addr = self.operand(imm)?;
                let v = self.p_pop()?;
                self.store_word(addr, v);
                Ok(())
            }

            ADD => self.binop(imm, u32::wrapping_add),
            SUB => self.binop(imm, u32::wrapping_sub),
            MUL => self.binop(imm, u32::wrapping_mul),
            DIV => {
                let b = self.operand(imm)?;
                if b == 0 {
                    return Err(ErrorKind::DivideByZero);
                }
                let a = self.p_pop()?;
                self.p_push(a / b)
            }
            MOD => {
                let b = self.operand(imm)?;
                if b == 0 {
                    return Err(ErrorKind::DivideByZero);
                }
                let a = self.p_pop()?;
                self.p_push(a % b)
            }
            DIVMOD => {
                let b = self.operand(imm)?;
                if b == 0 {
                    return Err(ErrorKind::DivideByZero);
                }
                let a = self.p_pop()?;
                self.p_push(a / b)?;
                self.p_push(a % b)
            }
            NEG => {
                let v = self.p_pop()?;
                self.p_push(v.wrapping_neg())
            }

            LT => self.binop(imm, |a, b| ((a as i32) < (b as i32)) as u32),
            LTE => self.binop(imm, |a, b| ((a as i32) <= (b as i32)) as u32),
            GT => self.binop(imm, |a, b| ((a as i32) > (b as i32)) as u32),
            GTE => self.binop(imm, |a, b| ((a as i32) >= (b as i32)) as u32),
            EQ => self.binop(imm, |a, b| (a == b) as u32),
            NEQ => self.binop(imm, |a, b| (a != b) as u32),

            NOT => {
                let v = self.p_pop()?;
                self.p_push((v == 0) as u32)
            }
            AND => {
                let b = self.p_pop()?;
                let a = self.p_pop()?;
                self.p_push((a != 0 && b != 0) as u32)
            }
            OR => {
                let b = self.p_pop()?;
                let a = self.p_pop()?;
                self.p_push((a != 0 || b != 0) as u32)
            }

            CPUSH => {
                let v = self.operand(imm)?;
                self.c_push(v)
            }
            CPOP => {
                let v = match imm {
                    Some(v) => v,
                    None => self.c_pop()?,
                };
                self.p_push(v)
            }
            P2C => {
                for _ in 0..imm.unwrap_or(1) {
                    let v = self.p_pop()?;
                    self.c_push(v)?;
                }
                Ok(())
            }
            C2P => {
                for _ in 0..imm.unwrap_or(1) {
                    let v = self.c_pop()?;
                    self.p_push(v)?;
                }
                Ok(())
            }
            MARK => {
                let slot = if self.psp > self.cbp {
                    self.pbp
                } else {
                    self.psp.wrapping_add(4)
                };
                self.c_push(slot)
            }

            JUMP => {
                let o = self.offset(imm)?;
                self.ip = self.checked_target(o)?;
                Ok(())
            }
            JNZ => {
                let o = self.offset(imm)?;
                if self.p_pop()? != 0 {
                    self.ip = self.checked_target(o)?;
                }
                Ok(())
            }
            JZ => {
                let o = self.offset(imm)?;
                if self.p_pop()? == 0 {
                    self.ip = self.checked_target(o)?;
                }
                Ok(())
            }
            CALL => {
                let addr = self.operand(imm)?;
                let target = self.check_ip(addr)?;
                self.c_push(self.ip)?;
                self.ip = target;
                Ok(())
            }
            RET => {
                let addr = self.c_pop()?;
                self.ip = self.check_ip(addr)?;
                Ok(())
            }

            FORK => {
                let o = self.offset(imm)?;
                let target = self.checked_target(o)?;
                self.multiply(target, true)
            }
            FNZ => {
                let o = self.offset(imm)?;
                if self.p_pop()? != 0 {
                    let target = self.checked_target(o)?;
                    self.multiply(target, true)
                } else {
                    Ok(())
                }
            }
            FZ => {
                let o = self.offset(imm)?;
                if self.p_pop()? == 0 {
                    let target = self.checked_target(o)?;
                    self.multiply(target, true)
                } else {
                    Ok(())
                }
            }
            BRANCH => {
                let o = self.offset(imm)?;
                let target = self.checked_target(o)?;
                self.multiply(target, false)
            }
            BNZ => {
                let o = self.offset(imm)?;
                if self.p_pop()? != 0 {
                    let target = self.checked_target(o)?;
                    self.multiply(target, false)
                } else {
                    Ok(())
                }
            }
            BZ => {
                let o = self.offset(imm)?;
                if self.p_pop()? == 0 {
                    let target = self.checked_target(o)?;
                    self.multiply(target, false)
                } else {
                    Ok(())
                }
            }

            BITNOT => {
                let v = self.p_pop()?;
                self.p_push(!v)
            }
            BITAND => self.binop(imm, |a, b| a & b),
            BITOR => self.binop(imm, |a, b| a | b),
            BITXOR => self.binop(imm, |a, b| a ^ b),
            SHIFTL => self.binop(imm, |a, n| if n >= 32 { 0 } else { a << n }),
            SHIFTR => self.binop(imm, |a, n| if n >= 32 { 0 } else { a >> n }),

            BITEST => {
                let (addr, mask) = self.bit_loc(imm)?;
                let set = self.fetch_word(addr) & mask != 0;
                self.p_push(set as u32)
            }
            BITSET => {
                let (addr, mask) = self.bit_loc(imm)?;
                let w = self.fetch_word(addr);
                self.store_word(addr, w | mask);
                Ok(())
            }
            BITOST => {
                let (addr, mask) = self.bit_loc(imm)?;
                let w = self.fetch_word(addr);
                self.store_word(addr, w & !mask);
                Ok(())
            }
            BITSETA => {
                let (addr, mask) = self.bit_loc(imm)?;
                let w = self.fetch_word(addr);
                let changed = w & mask == 0;
                self.store_word(addr, w | mask);
                self.p_push(changed as u32)
            }
            BITOSTA => {
                let (addr, mask) = self.bit_loc(imm)?;
                let w = self.fetch_word(addr);
                let changed = w & mask != 0;
                self.store_word(addr, w & !mask);
                self.p_push(changed as u32)
            }

            HNZ => {
                let halt = imm.unwrap_or(0);
                if self.p_pop()? != 0 {
                    return Err(ErrorKind::Halt(halt));
                }
                Ok(())
            }
            HZ => {
                let halt = imm.unwrap_or(0);
                if self.p_pop()? == 0 {
                    return Err(ErrorKind::Halt(halt));
                }
                Ok(())
            }
            HALT => Err(ErrorKind::Halt(imm.unwrap_or(0))),

            other => Err(ErrorKind::InvalidOp { code: other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mach() -> Mach {
        Mach::test_mach(0x40)
    }

    #[test]
    fn table_agrees_with_names() {
        assert_eq!(op_name(CRASH), Some("crash"));
        assert_eq!(op_name(HALT), Some("halt"));
        assert_eq!(op_name(FORK), Some("fork"));
        assert_eq!(op_name(0x70), None);
        assert_eq!(resolve_op("jump", 4, true).unwrap().code, JUMP);
        assert!(matches!(
            resolve_op("nonesuch", 0, false),
            Err(OpResolveError::NoSuchOp(_))
        ));
        assert!(matches!(
            resolve_op("nop", 1, true),
            Err(OpResolveError::NoArg("nop"))
        ));
    }

    #[test]
    fn decode_rejects_undefined_codes() {
        let mut m = mach();
        m.store_bytes(0x40, &[0x70]);
        assert_eq!(
            m.decode_at(0x40).unwrap_err(),
            ErrorKind::InvalidOp { code: 0x70 }
        );
    }

    #[test]
    fn decode_requires_push_immediate() {
        let mut m = mach();
        m.store_bytes(0x40, &[PUSH]);
        assert_eq!(
            m.decode_at(0x40).unwrap_err(),
            ErrorKind::ImmediateRequired { name: "push" }
        );
        m.store_bytes(0x50, &[0x80 | 3, PUSH]);
        let d = m.decode_at(0x50).unwrap();
        assert_eq!((d.code, d.arg, d.have, d.next), (PUSH, 3, true, 0x52));
    }

    #[test]
    fn decode_rejects_overlong_arguments() {
        let mut m = mach();
        m.store_bytes(0x40, &[0x81, 0x81, 0x81, 0x81, 0x81, 0x81, 0x01]);
        assert_eq!(m.decode_at(0x40).unwrap_err(), ErrorKind::VarcodeTooLong);
    }

    #[test]
    fn data_cells_decode_as_crash() {
        // The assembler stores raw data words as crash records with an
        // argument; executing one must fail loudly.
        let mut m = mach();
        let mut buf = Vec::new();
        varcode::encode_into(&mut buf, 1234, CRASH, true);
        m.store_bytes(0x40, &buf);
        let d = m.decode_at(0x40).unwrap();
        assert_eq!((d.code, d.arg, d.have), (CRASH, 1234, true));
        assert_eq!(m.exec(d.code, d.imm()).unwrap_err(), ErrorKind::Crashed);
    }

    #[test]
    fn arithmetic_and_compare() {
        let mut m = mach();
        m.exec(PUSH, Some(3)).unwrap();
        m.exec(PUSH, Some(3)).unwrap();
        m.exec(ADD, None).unwrap();
        m.exec(EQ, Some(6)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 1);

        m.exec(PUSH, Some(10)).unwrap();
        m.exec(DIVMOD, Some(3)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 1, "remainder on top");
        assert_eq!(m.p_pop().unwrap(), 3);

        m.exec(PUSH, Some(5)).unwrap();
        assert_eq!(m.exec(DIV, Some(0)).unwrap_err(), ErrorKind::DivideByZero);
    }

    #[test]
    fn signed_comparisons() {
        let mut m = mach();
        m.exec(PUSH, Some(u32::MAX)).unwrap(); // -1 as i32
        m.exec(LT, Some(1)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 1, "-1 < 1 under signed compare");
        m.exec(PUSH, Some(u32::MAX)).unwrap();
        m.exec(GT, Some(1)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 0);
    }

    #[test]
    fn shifts_saturate_at_32() {
        let mut m = mach();
        m.exec(PUSH, Some(0xdead)).unwrap();
        m.exec(SHIFTL, Some(16)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 0xdead_0000);
        m.exec(PUSH, Some(1)).unwrap();
        m.exec(SHIFTL, Some(32)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 0);
        m.exec(PUSH, Some(0xffff_ffff)).unwrap();
        m.exec(SHIFTR, Some(33)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 0);
    }

    #[test]
    fn stack_shuffles() {
        let mut m = mach();
        for v in [1, 2, 3] {
            m.exec(PUSH, Some(v)).unwrap();
        }
        m.exec(DUP, None).unwrap();
        assert_eq!(m.stacks().0, vec![1, 2, 3, 3]);
        m.exec(POP, None).unwrap();
        m.exec(SWAP, None).unwrap();
        assert_eq!(m.stacks().0, vec![1, 3, 2]);
        m.exec(DUP, Some(2)).unwrap();
        assert_eq!(m.stacks().0, vec![1, 3, 2, 1]);
        m.exec(POP, Some(4)).unwrap();
        assert!(m.stacks().0.is_empty());
        assert_eq!(
            m.exec(POP, None).unwrap_err(),
            ErrorKind::underflow(crate::mach::PARAM)
        );
    }

    #[test]
    fn control_stack_traffic() {
        let mut m = mach();
        for v in [10, 20, 30] {
            m.exec(PUSH, Some(v)).unwrap();
        }
        m.exec(P2C, Some(3)).unwrap();
        assert!(m.stacks().0.is_empty());
        assert_eq!(m.stacks().1, vec![30, 20, 10]);
        m.exec(C2P, Some(2)).unwrap();
        assert_eq!(m.stacks().0, vec![10, 20]);
        m.exec(CPOP, None).unwrap();
        assert_eq!(m.stacks().0, vec![10, 20, 30]);
        m.exec(CPUSH, Some(7)).unwrap();
        assert_eq!(m.stacks().1, vec![7]);
    }

    #[test]
    fn mark_records_the_next_slot() {
        let mut m = mach();
        m.exec(MARK, None).unwrap();
        m.exec(PUSH, Some(11)).unwrap();
        m.exec(PUSH, Some(22)).unwrap();
        m.exec(MARK, None).unwrap();
        assert_eq!(m.stacks().1, vec![0, 8]);
    }

    #[test]
    fn jumps_respect_the_stack_region() {
        let mut m = mach();
        m.ip = 0x42;
        assert_eq!(
            m.exec(JUMP, Some((-0x10i32) as u32)).unwrap_err(),
            ErrorKind::Segfault
        );
        m.ip = 0x42;
        m.exec(JUMP, Some(0x10)).unwrap();
        assert_eq!(m.ip, 0x52);
    }

    #[test]
    fn call_and_ret_use_the_control_stack() {
        let mut m = mach();
        m.ip = 0x48;
        m.exec(CALL, Some(0x80)).unwrap();
        assert_eq!(m.ip, 0x80);
        assert_eq!(m.stacks().1, vec![0x48]);
        m.exec(RET, None).unwrap();
        assert_eq!(m.ip, 0x48);
        assert!(m.stacks().1.is_empty());
    }

    #[test]
    fn fork_without_a_queue_fails() {
        let mut m = mach();
        m.ip = 0x48;
        assert_eq!(m.exec(FORK, Some(8)).unwrap_err(), ErrorKind::NoQueue);
    }

    #[test]
    fn halts() {
        let mut m = mach();
        assert_eq!(m.exec(HALT, None).unwrap_err(), ErrorKind::Halt(0));
        assert_eq!(m.exec(HALT, Some(3)).unwrap_err(), ErrorKind::Halt(3));
        m.exec(PUSH, Some(0)).unwrap();
        assert_eq!(m.exec(HZ, Some(1)).unwrap_err(), ErrorKind::Halt(1));
        m.exec(PUSH, Some(0)).unwrap();
        m.exec(HNZ, Some(1)).unwrap();
        m.exec(PUSH, Some(5)).unwrap();
        assert_eq!(m.exec(HNZ, Some(2)).unwrap_err(), ErrorKind::Halt(2));
    }

    #[test]
    fn bit_vector_ops() {
        let mut m = mach();
        let vec_addr = 0x100;
        for bit in [40u32, 99] {
            m.exec(PUSH, Some(bit)).unwrap();
            m.exec(BITSET, Some(vec_addr)).unwrap();
        }
        for (bit, want) in [(39u32, 0u32), (40, 1), (41, 0), (98, 0), (99, 1)] {
            m.exec(PUSH, Some(bit)).unwrap();
            m.exec(BITEST, Some(vec_addr)).unwrap();
            assert_eq!(m.p_pop().unwrap(), want, "bit {bit}");
        }
        m.exec(PUSH, Some(99)).unwrap();
        m.exec(BITOST, Some(vec_addr)).unwrap();
        m.exec(PUSH, Some(99)).unwrap();
        m.exec(BITEST, Some(vec_addr)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 0);

        // Atomic variants report whether they changed anything.
        m.exec(PUSH, Some(43)).unwrap();
        m.exec(BITSETA, Some(vec_addr)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 1);
        m.exec(PUSH, Some(43)).unwrap();
        m.exec(BITSETA, Some(vec_addr)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 0);
        m.exec(PUSH, Some(43)).unwrap();
        m.exec(BITOSTA, Some(vec_addr)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 1);
        m.exec(PUSH, Some(43)).unwrap();
        m.exec(BITOSTA, Some(vec_addr)).unwrap();
        assert_eq!(m.p_pop().unwrap(), 0);
    }
}
