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
use std::fmt;
use super::opcode::{OpCode, OpMode};

// ============================================================================
// Field layout
// ============================================================================

/// Bias applied to the signed `sBx` operand.
pub const OFFSET_SBX: i32 = 65535;
/// Bias applied to the signed jump offset `sJ`.
pub const OFFSET_SJ: i32 = 16777215;
/// Bias applied to the signed byte operand `sC`.
pub const OFFSET_SC: i32 = 127;
/// Bias applied to the wide signed immediate `sB` carried by the
/// immediate-comparison tests.
pub const OFFSET_SB: i32 = 32767;

/// A single 32-bit instruction word.  The low seven bits hold the
/// opcode; the remaining bits are interpreted according to the
/// opcode's `OpMode`:
///
/// ```txt
///  31      24 23      16 15 14       7 6     0
/// +----------+----------+--+----------+-------+
/// |    C     |    B     |k |    A     |  op   |  (ABC)
/// +----------+----------+--+----------+-------+
/// |         Bx / sBx       |    A     |  op   |  (ABx / AsBx)
/// +------------------------+----------+-------+
/// |            Ax / sJ                |  op   |  (Ax / sJ)
/// +-----------------------------------+-------+
/// ```
///
/// The immediate-comparison tests (`EQI`, `LTI`, `LEI`, `GTI`, `GEI`)
/// leave `C` unused and instead read a wide 16-bit signed immediate
/// `sB` spanning the `B` and `C` fields, so that comparands in the
/// full state-encoding range fit in a single word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    // ========================================================================
    // Constructors
    // ========================================================================

    /// Construct an `ABC`-format instruction.
    pub fn abc(op: OpCode, a: u8, b: u8, c: u8, k: bool) -> Self {
        let w = (op as u32)
            | ((a as u32) << 7)
            | ((k as u32) << 15)
            | ((b as u32) << 16)
            | ((c as u32) << 24);
        Instruction(w)
    }

    /// Construct an `ABx`-format instruction.  The operand must fit
    /// in seventeen bits.
    pub fn abx(op: OpCode, a: u8, bx: u32) -> Self {
        assert!(bx < (1 << 17));
        Instruction((op as u32) | ((a as u32) << 7) | (bx << 15))
    }

    /// Construct an `AsBx`-format instruction from a signed operand.
    pub fn asbx(op: OpCode, a: u8, sbx: i32) -> Self {
        Self::abx(op, a, (sbx + OFFSET_SBX) as u32)
    }

    /// Construct an `Ax`-format instruction.
    pub fn ax_op(op: OpCode, ax: u32) -> Self {
        assert!(ax < (1 << 25));
        Instruction((op as u32) | (ax << 7))
    }

    /// Construct an `sJ`-format instruction from a signed jump
    /// offset.
    pub fn sj_op(op: OpCode, sj: i32) -> Self {
        Self::ax_op(op, (sj + OFFSET_SJ) as u32)
    }

    /// Construct an immediate-comparison test carrying a wide 16-bit
    /// signed immediate in place of `B` and `C`.
    pub fn absk(op: OpCode, a: u8, sb: i32, k: bool) -> Self {
        let b = (sb + OFFSET_SB) as u32;
        assert!(b < (1 << 16));
        Instruction((op as u32) | ((a as u32) << 7) | ((k as u32) << 15) | (b << 16))
    }

    // ========================================================================
    // Field accessors
    // ========================================================================

    /// Extract the opcode of this instruction.  This panics on a
    /// malformed word, since instruction streams are only ever
    /// constructed from valid opcodes.
    pub fn opcode(&self) -> OpCode {
        OpCode::from_byte((self.0 & 0x7F) as u8).expect("invalid opcode")
    }

    pub fn a(&self) -> u8 {
        ((self.0 >> 7) & 0xFF) as u8
    }

    pub fn k(&self) -> bool {
        (self.0 >> 15) & 1 == 1
    }

    pub fn b(&self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }

    pub fn c(&self) -> u8 {
        ((self.0 >> 24) & 0xFF) as u8
    }

    /// The signed byte operand held in `C`.
    pub fn sc(&self) -> i32 {
        self.c() as i32 - OFFSET_SC
    }

    /// The wide signed immediate spanning `B` and `C`.
    pub fn sb(&self) -> i32 {
        ((self.0 >> 16) & 0xFFFF) as i32 - OFFSET_SB
    }

    pub fn bx(&self) -> u32 {
        self.0 >> 15
    }

    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    pub fn ax(&self) -> u32 {
        self.0 >> 7
    }

    pub fn sj(&self) -> i32 {
        self.ax() as i32 - OFFSET_SJ
    }

    // ========================================================================
    // Field updates (used when patching emitted code)
    // ========================================================================

    /// Replace the signed jump offset of an `sJ`-format instruction.
    pub fn set_sj(&mut self, sj: i32) {
        let ax = (sj + OFFSET_SJ) as u32;
        assert!(ax < (1 << 25));
        self.0 = (self.0 & 0x7F) | (ax << 7);
    }

    /// Replace the wide operand of an `ABx`-format instruction.
    pub fn set_bx(&mut self, bx: u32) {
        assert!(bx < (1 << 17));
        self.0 = (self.0 & 0x7FFF) | (bx << 15);
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Determine whether or not this instruction always ends a basic
    /// block.  Observe that `TFORCALL` does not, since it must remain
    /// adjacent to its paired `TFORLOOP`.
    pub fn is_block_terminator(&self) -> bool {
        self.opcode().is_block_terminator()
    }

    /// Determine whether or not this instruction transfers control
    /// via a PC-relative offset.
    pub fn is_jump(&self) -> bool {
        self.opcode().is_jump()
    }

    /// Determine whether or not this instruction is a conditional
    /// test.  Such instructions conditionally skip the instruction
    /// which follows them (in well-formed code, always a `JMP`).
    pub fn is_conditional_test(&self) -> bool {
        self.opcode().is_conditional_test()
    }

    /// Determine whether or not this instruction leaves the enclosing
    /// function.
    pub fn is_return(&self) -> bool {
        self.opcode().is_return()
    }

    /// Compute the absolute target of a PC-relative control transfer,
    /// where `pc` is the position of this instruction.  Offsets have
    /// per-opcode semantics: `JMP` is relative to the following
    /// instruction; the loop instructions jump backwards by `Bx`;
    /// `FORPREP` skips the loop entirely (one past its `Bx` target);
    /// `TFORPREP` jumps forward by `Bx`.  Returns `None` for
    /// instructions which carry no target.
    pub fn jump_target(&self, pc: usize) -> Option<i64> {
        let pc = pc as i64;
        match self.opcode() {
            OpCode::JMP => Some(pc + 1 + self.sj() as i64),
            OpCode::FORLOOP | OpCode::TFORLOOP => Some(pc + 1 - self.bx() as i64),
            OpCode::FORPREP => Some(pc + 1 + self.bx() as i64 + 1),
            OpCode::TFORPREP => Some(pc + 1 + self.bx() as i64),
            _ => None,
        }
    }
}

impl OpCode {
    pub fn is_block_terminator(&self) -> bool {
        match self {
            OpCode::TFORCALL => false,
            OpCode::FORLOOP | OpCode::FORPREP | OpCode::TFORPREP | OpCode::TFORLOOP => true,
            _ => self.is_jump() || self.is_conditional_test() || self.is_return(),
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            OpCode::JMP
                | OpCode::FORLOOP
                | OpCode::FORPREP
                | OpCode::TFORPREP
                | OpCode::TFORLOOP
        )
    }

    pub fn is_conditional_test(&self) -> bool {
        matches!(
            self,
            OpCode::EQ
                | OpCode::LT
                | OpCode::LE
                | OpCode::EQK
                | OpCode::EQI
                | OpCode::LTI
                | OpCode::LEI
                | OpCode::GTI
                | OpCode::GEI
                | OpCode::TEST
                | OpCode::TESTSET
        )
    }

    pub fn is_return(&self) -> bool {
        matches!(
            self,
            OpCode::RETURN | OpCode::RETURN0 | OpCode::RETURN1 | OpCode::TAILCALL
        )
    }

    /// The subset of conditional tests which compare a register
    /// against the wide `sB` immediate.
    pub fn is_immediate_test(&self) -> bool {
        matches!(
            self,
            OpCode::EQI | OpCode::LTI | OpCode::LEI | OpCode::GTI | OpCode::GEI
        )
    }
}

// ============================================================================
// Formatting
// ============================================================================

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = self.opcode();
        let name = format!("{:?}", op).to_lowercase();
        match op.mode() {
            OpMode::ABC if op.is_immediate_test() => {
                write!(f, "{} {} {} {}", name, self.a(), self.sb(), self.k() as u8)
            }
            OpMode::ABC => {
                write!(f, "{} {} {} {}", name, self.a(), self.b(), self.c())?;
                if self.k() {
                    write!(f, " k")?;
                }
                Ok(())
            }
            OpMode::ABx => write!(f, "{} {} {}", name, self.a(), self.bx()),
            OpMode::AsBx => write!(f, "{} {} {}", name, self.a(), self.sbx()),
            OpMode::Ax => write!(f, "{} {}", name, self.ax()),
            OpMode::SJ => write!(f, "{} {}", name, self.sj()),
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
