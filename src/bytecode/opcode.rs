// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// The encoding format of an instruction, which determines how the
/// bits above the opcode field are to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpMode {
    /// Three operands `A`, `B`, `C` plus the single-bit flag `k`.
    ABC,
    /// Operand `A` plus a wide unsigned operand `Bx`.
    ABx,
    /// Operand `A` plus a wide signed operand `sBx`.
    AsBx,
    /// A single extra-wide operand `Ax`.
    Ax,
    /// A single wide signed jump offset `sJ`.
    SJ,
}

/// The opcode repertoire of the register machine.  Discriminants are
/// the concrete opcode values stored in the low bits of each
/// instruction word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Moves and loads
    MOVE = 0,
    LOADI,
    LOADF,
    LOADK,
    LOADKX,
    LOADFALSE,
    LFALSESKIP,
    LOADTRUE,
    LOADNIL,
    // Upvalues
    GETUPVAL,
    SETUPVAL,
    // Table access
    GETTABUP,
    GETTABLE,
    GETI,
    GETFIELD,
    SETTABUP,
    SETTABLE,
    SETI,
    SETFIELD,
    NEWTABLE,
    SELF,
    // Arithmetic and bitwise, immediate / constant forms
    ADDI,
    ADDK,
    SUBK,
    MULK,
    MODK,
    POWK,
    DIVK,
    IDIVK,
    BANDK,
    BORK,
    BXORK,
    SHRI,
    SHLI,
    // Arithmetic and bitwise, register forms
    ADD,
    SUB,
    MUL,
    MOD,
    POW,
    DIV,
    IDIV,
    BAND,
    BOR,
    BXOR,
    SHL,
    SHR,
    // Metamethod dispatch tails
    MMBIN,
    MMBINI,
    MMBINK,
    // Unary operations
    UNM,
    BNOT,
    NOT,
    LEN,
    CONCAT,
    // Scoping
    CLOSE,
    TBC,
    // Unconditional jump
    JMP,
    // Conditional tests (each paired with a following JMP)
    EQ,
    LT,
    LE,
    EQK,
    EQI,
    LTI,
    LEI,
    GTI,
    GEI,
    TEST,
    TESTSET,
    // Calls and returns
    CALL,
    TAILCALL,
    RETURN,
    RETURN0,
    RETURN1,
    // Loops
    FORLOOP,
    FORPREP,
    TFORPREP,
    TFORCALL,
    TFORLOOP,
    // Miscellaneous
    SETLIST,
    CLOSURE,
    VARARG,
    VARARGPREP,
    NOP,
    EXTRAARG,
}

use OpCode::*;

/// All opcodes in discriminant order, used for byte decoding.
const OPCODES: &[OpCode] = &[
    MOVE, LOADI, LOADF, LOADK, LOADKX, LOADFALSE, LFALSESKIP, LOADTRUE,
    LOADNIL, GETUPVAL, SETUPVAL, GETTABUP, GETTABLE, GETI, GETFIELD, SETTABUP,
    SETTABLE, SETI, SETFIELD, NEWTABLE, SELF, ADDI, ADDK, SUBK, MULK, MODK,
    POWK, DIVK, IDIVK, BANDK, BORK, BXORK, SHRI, SHLI, ADD, SUB, MUL, MOD,
    POW, DIV, IDIV, BAND, BOR, BXOR, SHL, SHR, MMBIN, MMBINI, MMBINK, UNM,
    BNOT, NOT, LEN, CONCAT, CLOSE, TBC, JMP, EQ, LT, LE, EQK, EQI, LTI, LEI,
    GTI, GEI, TEST, TESTSET, CALL, TAILCALL, RETURN, RETURN0, RETURN1,
    FORLOOP, FORPREP, TFORPREP, TFORCALL, TFORLOOP, SETLIST, CLOSURE, VARARG,
    VARARGPREP, NOP, EXTRAARG,
];

/// The number of distinct opcodes.
pub const NUM_OPCODES: usize = OPCODES.len();

impl OpCode {
    /// Decode an opcode from its concrete byte value, returning
    /// `None` for values outside the repertoire.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        OPCODES.get(byte as usize).copied()
    }

    /// Determine the encoding format used by this opcode.
    pub fn mode(&self) -> OpMode {
        match self {
            LOADK | LOADKX | CLOSURE => OpMode::ABx,
            FORLOOP | FORPREP | TFORPREP | TFORLOOP => OpMode::ABx,
            LOADI | LOADF => OpMode::AsBx,
            EXTRAARG => OpMode::Ax,
            JMP => OpMode::SJ,
            _ => OpMode::ABC,
        }
    }
}
