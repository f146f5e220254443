//! Bytecode for the Zym register machine
//!
//! This module provides:
//! - `OpCode`: The instruction set
//! - `Instruction`: 32-bit instruction words (ABC / ABx / AsBx)
//! - `Chunk`: Instruction words plus constants and line info
//! - Disassembler utilities for debugging
//! - A binary format for compiled functions

mod chunk;
mod debug;
mod instruction;
mod opcode;
pub mod serialize;

pub use chunk::Chunk;
pub use debug::{
    decode, decode_function, disassemble, disassemble_function, DecodedFunction,
    DecodedInstruction,
};
pub use instruction::{literal_from_words, literal_words, Instruction};
pub use opcode::{Format, OpCode};
pub use serialize::{read_function, write_function, SerializeError};
