//! Bytecode chunk - instruction words with constants and line info

use std::collections::HashMap;

use super::instruction::{literal_words, Instruction};
use super::opcode::OpCode;
use crate::value::Value;

/// A chunk of bytecode
///
/// Holds the instruction words of one function, its constant pool and
/// run-length encoded line numbers.
#[derive(Clone, Default)]
pub struct Chunk {
    /// Instruction and extension words
    code: Vec<u32>,

    /// Constant pool
    constants: Vec<Value>,

    /// Constant bit pattern to pool index, for deduplication
    dedup: HashMap<u64, u16>,

    /// Each entry is (line, count) meaning `count` words at this line
    lines: Vec<(u32, u32)>,
}

impl Chunk {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of words in the chunk
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[must_use]
    pub fn code(&self) -> &[u32] {
        &self.code
    }

    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[must_use]
    pub fn get_constant(&self, index: u16) -> Option<Value> {
        self.constants.get(index as usize).copied()
    }

    #[inline]
    #[must_use]
    pub fn instruction(&self, offset: usize) -> Option<Instruction> {
        self.code.get(offset).map(|w| Instruction::from_bits(*w))
    }

    #[inline]
    #[must_use]
    pub fn word(&self, offset: usize) -> Option<u32> {
        self.code.get(offset).copied()
    }

    /// Append an instruction, returning its offset
    pub fn write(&mut self, instruction: Instruction, line: u32) -> usize {
        self.write_word(instruction.bits(), line)
    }

    /// Append a raw extension word
    pub fn write_word(&mut self, word: u32, line: u32) -> usize {
        let offset = self.code.len();
        self.code.push(word);
        self.add_line(line);
        offset
    }

    /// Append the two literal words of an `_L` instruction
    pub fn write_literal(&mut self, value: f64, line: u32) {
        for word in literal_words(value) {
            self.write_word(word, line);
        }
    }

    pub fn patch(&mut self, offset: usize, instruction: Instruction) {
        self.code[offset] = instruction.bits();
    }

    /// Add a constant to the pool and return its index
    ///
    /// Constants with identical bit patterns share one slot. Returns `None`
    /// when the pool already holds 65536 entries.
    pub fn add_constant(&mut self, value: Value) -> Option<u16> {
        if let Some(index) = self.dedup.get(&value.to_bits()) {
            return Some(*index);
        }
        let index = u16::try_from(self.constants.len()).ok()?;
        self.constants.push(value);
        self.dedup.insert(value.to_bits(), index);
        Some(index)
    }

    fn add_line(&mut self, line: u32) {
        if let Some(last) = self.lines.last_mut() {
            if last.0 == line {
                last.1 += 1;
                return;
            }
        }
        self.lines.push((line, 1));
    }

    /// Line number for a word offset
    #[must_use]
    pub fn get_line(&self, offset: usize) -> u32 {
        let mut current = 0;
        for (line, count) in &self.lines {
            current += *count as usize;
            if offset < current {
                return *line;
            }
        }
        self.lines.last().map_or(0, |(line, _)| *line)
    }

    /// Raw run-length line table
    #[must_use]
    pub fn lines(&self) -> &[(u32, u32)] {
        &self.lines
    }

    /// Rebuild a chunk from its serialized parts
    #[must_use]
    pub fn from_parts(code: Vec<u32>, constants: Vec<Value>, lines: Vec<(u32, u32)>) -> Self {
        let dedup = constants
            .iter()
            .enumerate()
            .map(|(i, v)| (v.to_bits(), i as u16))
            .collect();
        Self {
            code,
            constants,
            dedup,
            lines,
        }
    }

    /// Offset the next written word will have
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Offset of the instruction following the one at `offset`
    #[must_use]
    pub fn next_offset(&self, offset: usize) -> usize {
        let extra = self
            .instruction(offset)
            .and_then(|i| i.opcode().ok())
            .map_or(0, OpCode::extra_words);
        offset + 1 + extra
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("code_len", &self.code.len())
            .field("constants_len", &self.constants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated_by_bits() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::number(42.0)).unwrap();
        let b = chunk.add_constant(Value::number(42.0)).unwrap();
        let c = chunk.add_constant(Value::number(-0.0)).unwrap();
        let d = chunk.add_constant(Value::number(0.0)).unwrap();
        assert_eq!(a, b);
        assert_ne!(c, d);
        assert_eq!(chunk.constants().len(), 3);
    }

    #[test]
    fn pool_overflow_returns_none() {
        let mut chunk = Chunk::new();
        for i in 0..=u16::MAX {
            assert!(chunk.add_constant(Value::number(f64::from(i))).is_some());
        }
        assert_eq!(chunk.add_constant(Value::number(-1.0)), None);
        // Existing constants are still found
        assert_eq!(chunk.add_constant(Value::number(7.0)), Some(7));
    }

    #[test]
    fn lines_are_run_length_encoded() {
        let mut chunk = Chunk::new();
        chunk.write(Instruction::abc(OpCode::LoadNull, 1, 0, 0), 1);
        chunk.write(Instruction::abc(OpCode::AddL, 1, 1, 0), 2);
        chunk.write_literal(1.5, 2);
        chunk.write(Instruction::abc(OpCode::Return, 1, 0, 0), 3);

        assert_eq!(chunk.lines(), &[(1, 1), (2, 3), (3, 1)]);
        assert_eq!(chunk.get_line(0), 1);
        assert_eq!(chunk.get_line(3), 2);
        assert_eq!(chunk.get_line(4), 3);
        assert_eq!(chunk.next_offset(1), 4);
    }
}
