//! 32-bit instruction words
//!
//! ```text
//!  31      24 23      16 15       8 7        0
//! +----------+----------+----------+----------+
//! |    C     |    B     |    A     |  opcode  |   ABC
//! |         Bx          |    A     |  opcode  |   ABx / AsBx
//! +----------+----------+----------+----------+
//! ```

use std::fmt;

use super::opcode::OpCode;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(u32);

impl Instruction {
    #[inline]
    pub const fn abc(op: OpCode, a: u8, b: u8, c: u8) -> Self {
        Self(op as u32 | (a as u32) << 8 | (b as u32) << 16 | (c as u32) << 24)
    }

    #[inline]
    pub const fn abx(op: OpCode, a: u8, bx: u16) -> Self {
        Self(op as u32 | (a as u32) << 8 | (bx as u32) << 16)
    }

    #[inline]
    pub const fn asbx(op: OpCode, a: u8, sbx: i16) -> Self {
        Self::abx(op, a, sbx as u16)
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn opcode(self) -> Result<OpCode, u8> {
        OpCode::try_from(self.0 as u8)
    }

    #[inline]
    pub const fn a(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub const fn b(self) -> u8 {
        (self.0 >> 16) as u8
    }

    #[inline]
    pub const fn c(self) -> u8 {
        (self.0 >> 24) as u8
    }

    #[inline]
    pub const fn bx(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub const fn sbx(self) -> i16 {
        self.bx() as i16
    }

    /// Same instruction with a new sBx, used to patch jumps
    #[inline]
    pub const fn with_sbx(self, sbx: i16) -> Self {
        Self((self.0 & 0xffff) | (sbx as u16 as u32) << 16)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Ok(op) => write!(f, "{} {} {} {}", op, self.a(), self.b(), self.c()),
            Err(byte) => write!(f, "<bad opcode {byte}>"),
        }
    }
}

/// Split a double into the two literal words that follow an `_L` instruction
#[inline]
pub fn literal_words(value: f64) -> [u32; 2] {
    let bits = value.to_bits();
    [bits as u32, (bits >> 32) as u32]
}

#[inline]
pub fn literal_from_words(low: u32, high: u32) -> f64 {
    f64::from_bits(u64::from(low) | u64::from(high) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abc_fields() {
        let i = Instruction::abc(OpCode::Add, 1, 2, 255);
        assert_eq!(i.opcode(), Ok(OpCode::Add));
        assert_eq!((i.a(), i.b(), i.c()), (1, 2, 255));
    }

    #[test]
    fn signed_offsets() {
        let i = Instruction::asbx(OpCode::JumpIfFalse, 7, -32768);
        assert_eq!(i.a(), 7);
        assert_eq!(i.sbx(), -32768);
        let patched = i.with_sbx(32767);
        assert_eq!(patched.sbx(), 32767);
        assert_eq!(patched.a(), 7);
        assert_eq!(patched.opcode(), Ok(OpCode::JumpIfFalse));
    }

    #[test]
    fn literal_words_are_low_first() {
        let value = 1.0e300_f64;
        let [low, high] = literal_words(value);
        assert_eq!(low, value.to_bits() as u32);
        assert_eq!(literal_from_words(low, high).to_bits(), value.to_bits());
    }
}
