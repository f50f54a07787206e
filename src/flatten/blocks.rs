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
use crate::bytecode::{Instruction, OpCode};
use super::FlattenError;

/// A maximal straight-line run of instructions within the original
/// stream, identified by the half-open interval `[start_pc, end_pc)`,
/// together with its successors as discovered by exit analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    /// Position of the first instruction in this block.
    pub start_pc: usize,
    /// Position of the first instruction _not_ in this block.
    pub end_pc: usize,
    /// The state value which routes the dispatcher to this block.
    /// Initially the block index; permuted by shuffling.
    pub state_id: usize,
    /// Block reached by an unconditional transfer from the last
    /// instruction, where applicable.
    pub original_target: Option<usize>,
    /// Block reached by falling off the last instruction (or by a
    /// conditional test failing).
    pub fall_through: Option<usize>,
    /// Block reached when a terminating conditional test succeeds.
    pub cond_target: Option<usize>,
    /// Whether this is the function entry block.
    pub is_entry: bool,
    /// Whether this block leaves the function.
    pub is_exit: bool,
}

impl BasicBlock {
    fn new(index: usize, start_pc: usize, end_pc: usize) -> Self {
        Self {
            start_pc,
            end_pc,
            state_id: index,
            original_target: None,
            fall_through: None,
            cond_target: None,
            is_entry: start_pc == 0,
            is_exit: false,
        }
    }

    /// The number of instructions in this block.
    pub fn len(&self) -> usize {
        self.end_pc - self.start_pc
    }
}

/// Decompose an instruction stream into basic blocks.  This proceeds
/// in three passes: first every _leader_ (block entry point) is
/// marked; then the stream is partitioned at leader boundaries; and
/// finally every block's exits are analysed.  Leaders are: the first
/// instruction; every jump target; the instruction following any
/// conditional jump; the instruction two past a conditional test
/// (i.e. past its paired `JMP`); and the instruction following a
/// return.
pub fn decompose(code: &[Instruction]) -> Result<Vec<BasicBlock>, FlattenError> {
    let n = code.len();
    if n == 0 {
        return Err(FlattenError::EmptyCode);
    }
    // First pass: identify leaders.
    let mut is_leader = vec![false; n];
    is_leader[0] = true;
    for pc in 0..n {
        let insn = code[pc];
        let op = insn.opcode();
        if op.is_jump() {
            let target = insn.jump_target(pc).unwrap();
            if target < 0 || target >= n as i64 {
                return Err(FlattenError::MalformedJumpTarget { pc, target });
            }
            is_leader[target as usize] = true;
            // A conditional jump also continues into the next
            // instruction.
            if pc + 1 < n && op != OpCode::JMP {
                is_leader[pc + 1] = true;
            }
        }
        if op.is_conditional_test() && pc + 2 < n {
            // The test's paired JMP sits at pc+1; the skip path
            // resumes past it.
            is_leader[pc + 2] = true;
        }
        if op.is_return() && pc + 1 < n {
            is_leader[pc + 1] = true;
        }
    }
    // Second pass: partition at leader boundaries.
    let mut blocks: Vec<BasicBlock> = Vec::new();
    let mut block_start = 0;
    for pc in 1..=n {
        if pc == n || is_leader[pc] {
            blocks.push(BasicBlock::new(blocks.len(), block_start, pc));
            block_start = pc;
        }
    }
    // Third pass: exit analysis.
    for i in 0..blocks.len() {
        let last_pc = blocks[i].end_pc - 1;
        let end_pc = blocks[i].end_pc;
        let insn = code[last_pc];
        let op = insn.opcode();
        if op.is_return() {
            blocks[i].is_exit = true;
        }
        if op.is_jump() {
            let target = insn.jump_target(last_pc).unwrap() as usize;
            let target_block = find_block_starting_at(&blocks, target);
            if target_block.is_none() {
                return Err(FlattenError::MissingBlockBoundary { pc: last_pc });
            }
            blocks[i].original_target = target_block;
            if op != OpCode::JMP {
                blocks[i].fall_through = find_block_starting_at(&blocks, end_pc);
            }
        }
        if op.is_conditional_test() {
            // Success skips the paired JMP; failure executes it.
            blocks[i].cond_target = find_block_starting_at(&blocks, last_pc + 2);
            blocks[i].fall_through = find_block_starting_at(&blocks, end_pc);
        }
        if !op.is_block_terminator() && end_pc < n {
            blocks[i].fall_through = find_block_starting_at(&blocks, end_pc);
        }
    }
    Ok(blocks)
}

/// Determine which block (if any) begins at a given position.  Blocks
/// are maintained in `start_pc` order, so binary search applies.
pub fn find_block_starting_at(blocks: &[BasicBlock], pc: usize) -> Option<usize> {
    blocks.binary_search_by_key(&pc, |b| b.start_pc).ok()
}
