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
use super::{Instruction, OpCode};

/// Initial capacity of the instruction buffer.
const INITIAL_CODE_CAPACITY: usize = 64;

/// Mechanism for constructing an instruction stream in which branch
/// targets may not be known at the point a branch is emitted.  For
/// example, the dispatch ladder emits one `JMP` per basic block
/// before any block body exists:
///
/// ```txt
///    eqi  s, 0, k     ;; state == 0?
///    jmp  ???         ;; target patched once block 0 is placed
///    eqi  s, 1, k
///    jmp  ???
///    ...
/// ```
///
/// A `CodeBuilder` hands back the position of every emitted
/// instruction, allowing such placeholders to be patched in place
/// once their targets are known.  Positions are stable: instructions
/// are only ever appended.
pub struct CodeBuilder {
    /// The (partially patched) instruction stream.
    insns: Vec<Instruction>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self { insns: Vec::with_capacity(INITIAL_CODE_CAPACITY) }
    }

    /// Determine the number of instructions currently emitted.  This
    /// is also the position the next emitted instruction will get.
    pub fn pc(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Emit a single instruction, returning its position within the
    /// stream under construction.
    pub fn emit(&mut self, insn: Instruction) -> usize {
        let pc = self.insns.len();
        self.insns.push(insn);
        pc
    }

    /// Emit an unconditional jump to a known position within the
    /// stream (typically backwards, to a dispatcher).
    pub fn emit_jmp_to(&mut self, target: usize) -> usize {
        let offset = target as i32 - self.pc() as i32 - 1;
        self.emit(Instruction::sj_op(OpCode::JMP, offset))
    }

    /// Emit an unconditional jump whose target is not yet known.  The
    /// returned position must later be passed to `patch_jmp`.
    pub fn emit_jmp_placeholder(&mut self) -> usize {
        self.emit(Instruction::sj_op(OpCode::JMP, 0))
    }

    /// Patch a previously emitted jump so that it transfers control
    /// to `target`.
    pub fn patch_jmp(&mut self, at: usize, target: usize) {
        let offset = target as i32 - at as i32 - 1;
        self.insns[at].set_sj(offset);
    }

    /// Read back an instruction which has already been emitted.
    pub fn get(&self, at: usize) -> Instruction {
        self.insns[at]
    }

    /// Surrender the completed instruction stream.
    pub fn into_code(self) -> Vec<Instruction> {
        self.insns
    }
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
