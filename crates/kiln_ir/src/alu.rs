//! ALU operators and their bit-vector semantics.

use kiln_common::BitVector;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The fixed set of operators an ALU node can compute.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum AluOp {
    /// Bitwise NOT.
    Inv,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Bitwise NAND.
    Nand,
    /// Bitwise NOR.
    Nor,
    /// Bitwise XNOR.
    Xnor,
    /// AND reduction to one bit.
    AndR,
    /// OR reduction to one bit.
    OrR,
    /// XOR reduction to one bit.
    XorR,
    /// Logical shift left.
    Sll,
    /// Logical shift right.
    Srl,
    /// Arithmetic shift right.
    Sra,
    /// Rotate left.
    Rotl,
    /// Rotate right.
    Rotr,
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Two's complement negation.
    Neg,
    /// Truncating multiplication.
    Mul,
    /// Unsigned division.
    Div,
    /// Unsigned remainder.
    Mod,
    /// Signed division, truncating toward zero.
    SDiv,
    /// Signed remainder, taking the sign of the dividend.
    SMod,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Unsigned less-than.
    Lt,
    /// Unsigned greater-than.
    Gt,
    /// Unsigned less-or-equal.
    Le,
    /// Unsigned greater-or-equal.
    Ge,
    /// Signed less-than.
    SLt,
    /// Signed greater-than.
    SGt,
    /// Signed less-or-equal.
    SLe,
    /// Signed greater-or-equal.
    SGe,
}

impl AluOp {
    /// Returns the number of operands the operator takes.
    pub fn arity(self) -> usize {
        match self {
            AluOp::Inv | AluOp::AndR | AluOp::OrR | AluOp::XorR | AluOp::Neg => 1,
            _ => 2,
        }
    }

    /// Returns true for shifts and rotates, whose amount operand may have any width.
    pub fn is_shift(self) -> bool {
        matches!(
            self,
            AluOp::Sll | AluOp::Srl | AluOp::Sra | AluOp::Rotl | AluOp::Rotr
        )
    }

    /// Returns true if swapping the operands does not change the result.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            AluOp::And
                | AluOp::Or
                | AluOp::Xor
                | AluOp::Nand
                | AluOp::Nor
                | AluOp::Xnor
                | AluOp::Add
                | AluOp::Mul
                | AluOp::Eq
                | AluOp::Ne
        )
    }

    /// Returns true if the operator produces a single bit regardless of operand width.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            AluOp::AndR
                | AluOp::OrR
                | AluOp::XorR
                | AluOp::Eq
                | AluOp::Ne
                | AluOp::Lt
                | AluOp::Gt
                | AluOp::Le
                | AluOp::Ge
                | AluOp::SLt
                | AluOp::SGt
                | AluOp::SLe
                | AluOp::SGe
        )
    }

    /// Returns true for operators that can fail with a zero divisor.
    pub fn is_division(self) -> bool {
        matches!(self, AluOp::Div | AluOp::Mod | AluOp::SDiv | AluOp::SMod)
    }

    /// Returns the result width for an operand of width `operand_width`.
    pub fn result_width(self, operand_width: u32) -> u32 {
        if self.is_boolean() {
            1
        } else {
            operand_width
        }
    }

    /// Returns the lowercase mnemonic used in dumps.
    pub fn name(self) -> &'static str {
        match self {
            AluOp::Inv => "inv",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
            AluOp::Nand => "nand",
            AluOp::Nor => "nor",
            AluOp::Xnor => "xnor",
            AluOp::AndR => "andr",
            AluOp::OrR => "orr",
            AluOp::XorR => "xorr",
            AluOp::Sll => "sll",
            AluOp::Srl => "srl",
            AluOp::Sra => "sra",
            AluOp::Rotl => "rotl",
            AluOp::Rotr => "rotr",
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Neg => "neg",
            AluOp::Mul => "mul",
            AluOp::Div => "div",
            AluOp::Mod => "mod",
            AluOp::SDiv => "sdiv",
            AluOp::SMod => "smod",
            AluOp::Eq => "eq",
            AluOp::Ne => "ne",
            AluOp::Lt => "lt",
            AluOp::Gt => "gt",
            AluOp::Le => "le",
            AluOp::Ge => "ge",
            AluOp::SLt => "slt",
            AluOp::SGt => "sgt",
            AluOp::SLe => "sle",
            AluOp::SGe => "sge",
        }
    }

    /// Computes the operator over already-evaluated operands.
    ///
    /// Returns `None` when a division or remainder has a zero divisor.
    /// `b` is ignored by unary operators.
    ///
    /// # Panics
    ///
    /// Panics if a binary operator is given no second operand, or if
    /// non-shift operands differ in width.
    pub fn apply(self, a: &BitVector, b: Option<&BitVector>) -> Option<BitVector> {
        let rhs = move || match b {
            Some(b) => b,
            None => panic!("{} requires two operands", self.name()),
        };
        let bool_result = BitVector::from_bool;
        let value = match self {
            AluOp::Inv => !a,
            AluOp::And => a & rhs(),
            AluOp::Or => a | rhs(),
            AluOp::Xor => a ^ rhs(),
            AluOp::Nand => !&(a & rhs()),
            AluOp::Nor => !&(a | rhs()),
            AluOp::Xnor => !&(a ^ rhs()),
            AluOp::AndR => bool_result(a.reduce_and()),
            AluOp::OrR => bool_result(a.reduce_or()),
            AluOp::XorR => bool_result(a.reduce_xor()),
            AluOp::Sll => a.shl(shift_amount(rhs())),
            AluOp::Srl => a.shr(shift_amount(rhs())),
            AluOp::Sra => a.ashr(shift_amount(rhs())),
            AluOp::Rotl => a.rotl(rotate_amount(rhs(), a.width())),
            AluOp::Rotr => a.rotr(rotate_amount(rhs(), a.width())),
            AluOp::Add => a.add(rhs()),
            AluOp::Sub => a.sub(rhs()),
            AluOp::Neg => a.neg(),
            AluOp::Mul => a.mul(rhs()),
            AluOp::Div => a.checked_udivrem(rhs())?.0,
            AluOp::Mod => a.checked_udivrem(rhs())?.1,
            AluOp::SDiv => a.checked_sdivrem(rhs())?.0,
            AluOp::SMod => a.checked_sdivrem(rhs())?.1,
            AluOp::Eq => bool_result(a == rhs()),
            AluOp::Ne => bool_result(a != rhs()),
            AluOp::Lt => bool_result(a.cmp_unsigned(rhs()) == Ordering::Less),
            AluOp::Gt => bool_result(a.cmp_unsigned(rhs()) == Ordering::Greater),
            AluOp::Le => bool_result(a.cmp_unsigned(rhs()) != Ordering::Greater),
            AluOp::Ge => bool_result(a.cmp_unsigned(rhs()) != Ordering::Less),
            AluOp::SLt => bool_result(a.cmp_signed(rhs()) == Ordering::Less),
            AluOp::SGt => bool_result(a.cmp_signed(rhs()) == Ordering::Greater),
            AluOp::SLe => bool_result(a.cmp_signed(rhs()) != Ordering::Greater),
            AluOp::SGe => bool_result(a.cmp_signed(rhs()) != Ordering::Less),
        };
        Some(value)
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shift amounts saturate: anything past `u64::MAX` shifts everything out.
fn shift_amount(amount: &BitVector) -> u64 {
    amount.to_u64().unwrap_or(u64::MAX)
}

/// Rotate amounts are reduced modulo the rotated width.
fn rotate_amount(amount: &BitVector, width: u32) -> u64 {
    if width == 0 {
        return 0;
    }
    match amount.to_u64() {
        Some(v) => v % width as u64,
        None => {
            let w = BitVector::from_u64(width as u64, amount.width());
            amount
                .checked_udivrem(&w)
                .and_then(|(_, r)| r.to_u64())
                .unwrap_or(0)
        }
    }
}
