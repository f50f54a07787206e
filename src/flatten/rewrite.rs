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
use super::{find_block_starting_at, flags, bogus, Ctx, FlattenError};

/// The seam between the branch rewriter and the two dispatcher
/// shapes.  A shape knows how many instructions one of its state
/// setters occupies and how to emit a full transition (setters plus
/// the jump back to dispatch) for a given successor block.
pub(crate) trait DispatchShape {
    /// Number of state-setter instructions preceding the dispatch
    /// jump in one transition.
    fn setter_width(&self) -> i32;

    /// Emit the state setters and dispatch jump routing control into
    /// `target`.
    fn emit_transition(&self, ctx: &mut Ctx, target: usize);
}

/// Emit the rewritten body of block `i` under the given dispatcher
/// shape, returning the position the dispatch ladder must route to.
/// Every control transfer the block originally performed becomes a
/// state update plus a jump back to dispatch; returns are copied
/// verbatim.
pub(crate) fn emit_block_body<S: DispatchShape>(
    ctx: &mut Ctx,
    i: usize,
    shape: &S,
) -> Result<usize, FlattenError> {
    let block = ctx.blocks[i].clone();
    let last_pc = block.end_pc - 1;
    let last = ctx.original[last_pc];
    let last_op = last.opcode();
    // A conditional branch ends with the pair [test, JMP].
    let has_cond_test = last_op == OpCode::JMP
        && last_pc > block.start_pc
        && ctx.original[last_pc - 1].is_conditional_test();
    // A loop tail needs its back-edge stub placed before the body
    // start, so the rewritten loop instruction has somewhere to land.
    let mut loop_stub_pc = 0;
    if matches!(last_op, OpCode::FORLOOP | OpCode::TFORLOOP) {
        let target = block
            .original_target
            .ok_or(FlattenError::MissingSuccessor { block: i })?;
        loop_stub_pc = ctx.code.pc();
        shape.emit_transition(ctx, target);
    }
    let body_start = ctx.code.pc();
    // Determine how much of the block is copied verbatim.
    let copy_end = if has_cond_test {
        last_pc - 1
    } else if matches!(
        last_op,
        OpCode::JMP | OpCode::FORLOOP | OpCode::TFORLOOP | OpCode::FORPREP | OpCode::TFORPREP
    ) {
        block.end_pc - 1
    } else {
        block.end_pc
    };
    // Optional no-op padding.  Padding only ever lands at the body
    // start, where it cannot split a paired instruction sequence.
    if ctx.flags & flags::RANDOM_NOP != 0 {
        let n = ctx.nop_rng.next() % 3;
        for _ in 0..n {
            let nop = bogus::nop_instruction(&mut ctx.nop_rng);
            ctx.code.emit(nop);
        }
    }
    for pc in block.start_pc..copy_end {
        ctx.code.emit(ctx.original[pc]);
    }
    if block.is_exit {
        // Exit block: the terminating return travels verbatim and no
        // state transition follows.
        for pc in copy_end..block.end_pc {
            ctx.code.emit(ctx.original[pc]);
        }
    } else if matches!(last_op, OpCode::FORLOOP | OpCode::TFORLOOP) {
        let fall = block
            .fall_through
            .ok_or(FlattenError::MissingSuccessor { block: i })?;
        // The back-edge is re-pointed at the stub; the loop-exit path
        // falls through into the state setters below.
        let mut loop_inst = last;
        let bx = ctx.code.pc() as i32 + 1 - loop_stub_pc as i32;
        loop_inst.set_bx(bx as u32);
        ctx.code.emit(loop_inst);
        shape.emit_transition(ctx, fall);
    } else if matches!(last_op, OpCode::FORPREP | OpCode::TFORPREP) {
        let target = block
            .original_target
            .ok_or(FlattenError::MissingSuccessor { block: i })?;
        let fall = block
            .fall_through
            .ok_or(FlattenError::MissingSuccessor { block: i })?;
        // The prep's skip path is re-pointed at the second transition
        // just below; its fall-through path enters the loop.
        let mut prep = last;
        let bx = if last_op == OpCode::FORPREP {
            shape.setter_width()
        } else {
            shape.setter_width() + 1
        };
        prep.set_bx(bx as u32);
        ctx.code.emit(prep);
        shape.emit_transition(ctx, fall);
        shape.emit_transition(ctx, target);
    } else if has_cond_test {
        // The test keeps its exact sense: on success it fires the
        // following jump, which now hops over the success setters
        // into the failure setters.
        ctx.code.emit(ctx.original[last_pc - 1]);
        let skip = shape.setter_width() + 1;
        ctx.code.emit(Instruction::sj_op(OpCode::JMP, skip));
        let then_block = find_block_starting_at(&ctx.blocks, last_pc + 1)
            .or(block.fall_through)
            .ok_or(FlattenError::MissingSuccessor { block: i })?;
        let else_block = block
            .original_target
            .ok_or(FlattenError::MissingSuccessor { block: i })?;
        shape.emit_transition(ctx, then_block);
        shape.emit_transition(ctx, else_block);
    } else {
        // Straight-line block: a single successor, via either an
        // unconditional jump or plain fall-through.
        if let Some(next) = block.original_target.or(block.fall_through) {
            shape.emit_transition(ctx, next);
        }
    }
    Ok(body_start)
}
