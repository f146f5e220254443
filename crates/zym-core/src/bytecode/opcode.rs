//! Register-machine instruction set
//!
//! Notation: `R[x]` is register `x` of the current frame, `K[x]` constant `x`,
//! `U[x]` upvalue `x` of the running closure, `G[x]` global slot `x`.

/// Operand layout of an instruction word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `op | A | B | C`
    Abc,
    /// `op | A | Bx` with an unsigned 16-bit Bx
    Abx,
    /// `op | A | sBx` with a signed 16-bit sBx
    AsBx,
}

macro_rules! opcodes {
    ($(
        $(#[$doc:meta])*
        $name:ident = $value:literal, $text:literal, $format:ident, $extra:literal;
    )*) => {
        /// Bytecode operation codes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $( $(#[$doc])* $name = $value, )*
        }

        impl OpCode {
            /// Every opcode, in discriminant order
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name),*];

            /// Human-readable mnemonic
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( OpCode::$name => $text, )*
                }
            }

            #[must_use]
            pub const fn format(self) -> Format {
                match self {
                    $( OpCode::$name => Format::$format, )*
                }
            }

            /// Words that follow the instruction word (literal or schema extensions)
            #[must_use]
            pub const fn extra_words(self) -> usize {
                match self {
                    $( OpCode::$name => $extra, )*
                }
            }
        }

        impl TryFrom<u8> for OpCode {
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(OpCode::$name), )*
                    _ => Err(value),
                }
            }
        }
    };
}

opcodes! {
    /// R[A] = R[B]
    Move = 0, "MOVE", Abc, 0;
    /// R[A] = K[Bx]
    LoadK = 1, "LOADK", Abx, 0;
    /// R[A] = sBx as a number
    LoadI = 2, "LOADI", AsBx, 0;
    LoadNull = 3, "LOADNULL", Abc, 0;
    LoadTrue = 4, "LOADTRUE", Abc, 0;
    LoadFalse = 5, "LOADFALSE", Abc, 0;

    /// R[A] = G[Bx]
    GetGlobal = 6, "GETGLOBAL", Abx, 0;
    /// G[Bx] = R[A]
    SetGlobal = 7, "SETGLOBAL", Abx, 0;
    /// Define G[Bx] = R[A]
    DefineGlobal = 8, "DEFGLOBAL", Abx, 0;

    /// R[A] = U[B]
    GetUpval = 9, "GETUPVAL", Abc, 0;
    /// U[B] = R[A]
    SetUpval = 10, "SETUPVAL", Abc, 0;
    /// Close every open upvalue at or above R[A]
    CloseUpvals = 11, "CLOSE_UPVALS", Abc, 0;
    /// R[A] = closure over the function K[Bx]
    Closure = 12, "CLOSURE", Abx, 0;

    /// R[A] = R[B] + R[C]
    Add = 13, "ADD", Abc, 0;
    Sub = 14, "SUB", Abc, 0;
    Mul = 15, "MUL", Abc, 0;
    Div = 16, "DIV", Abc, 0;
    Mod = 17, "MOD", Abc, 0;
    /// R[A] = R[A] + sBx
    AddI = 18, "ADD_I", AsBx, 0;
    SubI = 19, "SUB_I", AsBx, 0;
    MulI = 20, "MUL_I", AsBx, 0;
    DivI = 21, "DIV_I", AsBx, 0;
    ModI = 22, "MOD_I", AsBx, 0;
    /// R[A] = R[B] + literal, literal in the next two words
    AddL = 23, "ADD_L", Abc, 2;
    SubL = 24, "SUB_L", Abc, 2;
    MulL = 25, "MUL_L", Abc, 2;
    DivL = 26, "DIV_L", Abc, 2;
    ModL = 27, "MOD_L", Abc, 2;

    /// R[A] = R[B] == R[C]
    Eq = 28, "EQ", Abc, 0;
    Ne = 29, "NE", Abc, 0;
    Lt = 30, "LT", Abc, 0;
    Le = 31, "LE", Abc, 0;
    Gt = 32, "GT", Abc, 0;
    Ge = 33, "GE", Abc, 0;
    /// R[A] = R[A] == sBx
    EqI = 34, "EQ_I", AsBx, 0;
    NeI = 35, "NE_I", AsBx, 0;
    LtI = 36, "LT_I", AsBx, 0;
    LeI = 37, "LE_I", AsBx, 0;
    GtI = 38, "GT_I", AsBx, 0;
    GeI = 39, "GE_I", AsBx, 0;
    /// R[A] = R[B] == literal
    EqL = 40, "EQ_L", Abc, 2;
    NeL = 41, "NE_L", Abc, 2;
    LtL = 42, "LT_L", Abc, 2;
    LeL = 43, "LE_L", Abc, 2;
    GtL = 44, "GT_L", Abc, 2;
    GeL = 45, "GE_L", Abc, 2;

    BAnd = 46, "BAND", Abc, 0;
    BOr = 47, "BOR", Abc, 0;
    BXor = 48, "BXOR", Abc, 0;
    Shl = 49, "SHL", Abc, 0;
    Shr = 50, "SHR", Abc, 0;

    /// R[A] = -R[B]
    Neg = 51, "NEG", Abc, 0;
    /// R[A] = !R[B]
    Not = 52, "NOT", Abc, 0;
    /// R[A] = ~R[B]
    BNot = 53, "BNOT", Abc, 0;

    /// ip += sBx
    Jump = 54, "JUMP", AsBx, 0;
    /// if !R[A] then ip += sBx
    JumpIfFalse = 55, "JUMP_IF_FALSE", AsBx, 0;
    JumpIfTrue = 56, "JUMP_IF_TRUE", AsBx, 0;

    /// R[A] = R[A](R[A+1] .. R[A+B])
    Call = 57, "CALL", Abc, 0;
    /// Reuse the current frame for R[A](..); falls through to the next
    /// instruction when the callee is not a closure
    TailCall = 58, "TAIL_CALL", Abc, 0;
    /// Like `TailCall`, but only when the callee captures nothing; otherwise
    /// a normal call
    SmartTailCall = 59, "SMART_TAIL_CALL", Abc, 0;
    /// return R[A]
    Return = 60, "RETURN", Abc, 0;
    ReturnNull = 61, "RETURN_NULL", Abc, 0;

    /// R[A] = [] with capacity Bx
    NewList = 62, "NEWLIST", Abx, 0;
    /// R[A].push(R[B])
    ListAppend = 63, "LIST_APPEND", Abc, 0;
    /// R[A] = {}
    NewMap = 64, "NEWMAP", Abc, 0;
    /// R[A] = R[B][R[C]]
    GetIndex = 65, "GETINDEX", Abc, 0;
    /// R[A][R[B]] = R[C]
    SetIndex = 66, "SETINDEX", Abc, 0;
    /// R[A] = R[B].K[C]
    GetField = 67, "GETFIELD", Abc, 0;
    /// R[A].K[B] = R[C]
    SetField = 68, "SETFIELD", Abc, 0;
    /// R[A] = R[B].fields[C] when R[B] has the schema named by the next word
    GetFieldIdx = 69, "GETFIELD_IDX", Abc, 1;
    /// R[A].fields[B] = R[C], schema in the next word
    SetFieldIdx = 70, "SETFIELD_IDX", Abc, 1;
    /// R[A] = instance of schema K[Bx] with fields R[A+1] ..
    NewStruct = 71, "NEWSTRUCT", Abx, 0;

    /// R[A] = ref to register B
    RefLocal = 72, "REF_LOCAL", Abc, 0;
    /// R[A] = ref to U[B]
    RefUpval = 73, "REF_UPVAL", Abc, 0;
    /// R[A] = ref to G[Bx]
    RefGlobal = 74, "REF_GLOBAL", Abx, 0;
    /// R[A] = ref to R[B][R[C]]
    RefIndex = 75, "REF_INDEX", Abc, 0;
    /// R[A] = ref to R[B].K[C]
    RefField = 76, "REF_FIELD", Abc, 0;
    /// R[A] = *R[B], one level
    Deref = 77, "DEREF", Abc, 0;
    /// Store R[B] at the end of the chain starting at R[A]
    SetDeref = 78, "SET_DEREF", Abc, 0;

    /// R[A] = shallow copy of R[B]
    CloneValue = 79, "CLONE_VALUE", Abc, 0;
    /// R[A] = deep copy of R[B]
    DeepClone = 80, "DEEP_CLONE", Abc, 0;
    /// R[A] = dispatcher over R[B] .. R[B+C-1]
    MakeDispatcher = 81, "MAKE_DISPATCHER", Abc, 0;

    Nop = 82, "NOP", Abc, 0;
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i, "{op} has wrong discriminant");
            assert_eq!(OpCode::try_from(i as u8), Ok(*op));
        }
        assert!(OpCode::try_from(OpCode::ALL.len() as u8).is_err());
    }

    #[test]
    fn literal_variants_carry_two_words() {
        for op in OpCode::ALL {
            if op.name().ends_with("_L") {
                assert_eq!(op.extra_words(), 2, "{op}");
            }
        }
        assert_eq!(OpCode::GetFieldIdx.extra_words(), 1);
        assert_eq!(OpCode::Add.extra_words(), 0);
    }
}
