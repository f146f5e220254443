//! Bytecode disassembler for debugging

use std::fmt::Write;

use serde::Serialize;

use super::chunk::Chunk;
use super::instruction::literal_from_words;
use super::opcode::{Format, OpCode};
use crate::gc::Heap;
use crate::object::{Obj, ObjRef};
use crate::vm::format_value;

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub line: u32,
    pub op: &'static str,
    pub operands: Vec<i32>,
    /// Literal operand of an `_L` instruction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub literal: Option<f64>,
    /// Rendered constant or jump target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A function and everything nested in its constant pool
#[derive(Debug, Clone, Serialize)]
pub struct DecodedFunction {
    pub name: String,
    pub arity: u8,
    pub registers: u16,
    pub upvalues: usize,
    pub code: Vec<DecodedInstruction>,
    pub constants: Vec<String>,
    pub functions: Vec<DecodedFunction>,
}

/// Decode every instruction of a chunk
pub fn decode(chunk: &Chunk, heap: &Heap) -> Vec<DecodedInstruction> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < chunk.len() {
        out.push(decode_at(chunk, heap, offset));
        offset = chunk.next_offset(offset);
    }
    out
}

fn decode_at(chunk: &Chunk, heap: &Heap, offset: usize) -> DecodedInstruction {
    let line = chunk.get_line(offset);
    let Some(instruction) = chunk.instruction(offset) else {
        return DecodedInstruction {
            offset,
            line,
            op: "<eof>",
            operands: Vec::new(),
            literal: None,
            note: None,
        };
    };
    let op = match instruction.opcode() {
        Ok(op) => op,
        Err(byte) => {
            return DecodedInstruction {
                offset,
                line,
                op: "<unknown>",
                operands: vec![i32::from(byte)],
                literal: None,
                note: None,
            }
        }
    };

    let a = i32::from(instruction.a());
    let (operands, mut note) = match op.format() {
        Format::Abc => (
            vec![a, i32::from(instruction.b()), i32::from(instruction.c())],
            None,
        ),
        Format::Abx => (vec![a, i32::from(instruction.bx())], None),
        Format::AsBx => (vec![a, i32::from(instruction.sbx())], None),
    };

    let constant = |index: u16| {
        chunk
            .get_constant(index)
            .map_or_else(|| "<bad constant>".to_string(), |v| format_value(heap, v))
    };

    match op {
        OpCode::LoadK | OpCode::Closure | OpCode::NewStruct => {
            note = Some(constant(instruction.bx()));
        }
        OpCode::GetField | OpCode::RefField => note = Some(constant(u16::from(instruction.c()))),
        OpCode::SetField => note = Some(constant(u16::from(instruction.b()))),
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue => {
            let target = offset as i64 + 1 + i64::from(instruction.sbx());
            note = Some(format!("-> {target}"));
        }
        OpCode::GetFieldIdx | OpCode::SetFieldIdx => {
            if let Some(word) = chunk.word(offset + 1) {
                note = Some(constant(word as u16));
            }
        }
        _ => {}
    }

    let literal = if op.extra_words() == 2 {
        match (chunk.word(offset + 1), chunk.word(offset + 2)) {
            (Some(low), Some(high)) => Some(literal_from_words(low, high)),
            _ => None,
        }
    } else {
        None
    };

    DecodedInstruction {
        offset,
        line,
        op: op.name(),
        operands,
        literal,
        note,
    }
}

/// Disassemble a chunk to a string
pub fn disassemble(chunk: &Chunk, heap: &Heap) -> String {
    let mut output = String::new();
    let mut previous_line = None;
    for decoded in decode(chunk, heap) {
        let _ = write!(output, "{:04} ", decoded.offset);
        if previous_line == Some(decoded.line) {
            output.push_str("   | ");
        } else {
            let _ = write!(output, "{:4} ", decoded.line);
        }
        previous_line = Some(decoded.line);

        let _ = write!(output, "{:<16}", decoded.op);
        let operands: Vec<String> = decoded.operands.iter().map(ToString::to_string).collect();
        output.push_str(&operands.join(" "));
        if let Some(literal) = decoded.literal {
            let _ = write!(output, " #{literal}");
        }
        if let Some(note) = &decoded.note {
            let _ = write!(output, "    ; {note}");
        }
        output.push('\n');
    }
    output
}

fn function_name(heap: &Heap, function: ObjRef) -> String {
    heap.as_function(function)
        .and_then(|f| f.name)
        .and_then(|n| heap.as_str(n))
        .unwrap_or("<script>")
        .to_string()
}

/// Disassemble a function and, recursively, every function in its constants
pub fn disassemble_function(heap: &Heap, function: ObjRef) -> String {
    let mut output = String::new();
    let Some(f) = heap.as_function(function) else {
        return output;
    };
    let _ = writeln!(
        output,
        "== {} (arity {}, {} registers, {} upvalues) ==",
        function_name(heap, function),
        f.arity,
        f.max_registers,
        f.upvalues.len()
    );
    output.push_str(&disassemble(&f.chunk, heap));
    for constant in f.chunk.constants() {
        if let Some(r) = constant.as_object() {
            if matches!(heap.get(r), Obj::Function(_)) {
                output.push('\n');
                output.push_str(&disassemble_function(heap, r));
            }
        }
    }
    output
}

/// Structured form of [`disassemble_function`], for JSON output
pub fn decode_function(heap: &Heap, function: ObjRef) -> Option<DecodedFunction> {
    let f = heap.as_function(function)?;
    let mut functions = Vec::new();
    for constant in f.chunk.constants() {
        if let Some(r) = constant.as_object() {
            if let Some(nested) = decode_function(heap, r) {
                functions.push(nested);
            }
        }
    }
    Some(DecodedFunction {
        name: function_name(heap, function),
        arity: f.arity,
        registers: f.max_registers,
        upvalues: f.upvalues.len(),
        code: decode(&f.chunk, heap),
        constants: f
            .chunk
            .constants()
            .iter()
            .map(|v| format_value(heap, *v))
            .collect(),
        functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;
    use crate::config::GcConfig;
    use crate::value::Value;

    #[test]
    fn renders_constants_and_jumps() {
        let mut heap = Heap::new(GcConfig::default());
        let name = heap.insert_string("greeting");
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Value::object(name)).unwrap();
        chunk.write(Instruction::abx(OpCode::LoadK, 1, k), 1);
        chunk.write(Instruction::asbx(OpCode::Jump, 0, 3), 1);
        chunk.write(Instruction::abc(OpCode::MulL, 1, 1, 0), 2);
        chunk.write_literal(2.5, 2);
        chunk.write(Instruction::abc(OpCode::Return, 1, 0, 0), 3);

        let decoded = decode(&chunk, &heap);
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0].note.as_deref(), Some("greeting"));
        assert_eq!(decoded[1].note.as_deref(), Some("-> 5"));
        assert_eq!(decoded[2].literal, Some(2.5));
        assert_eq!(decoded[3].offset, 5);

        let text = disassemble(&chunk, &heap);
        assert!(text.contains("LOADK"));
        assert!(text.contains("MUL_L"));
        assert!(text.contains("#2.5"));
    }
}
