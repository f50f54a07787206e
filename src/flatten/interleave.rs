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
use crate::bytecode::{Instruction, OpCode, OFFSET_SC};
use super::{Ctx, Lcg};

/// How many fake functions are woven into the dispatcher.
pub(crate) const NUM_FAKE_FUNCTIONS: usize = 3;
/// Blocks per fake function.
const FAKE_FUNC_BLOCKS: usize = 4;
/// Instructions per fake block.
const FAKE_BLOCK_INSTS: usize = 5;
/// Selector values sit this far above the real state space.
const FAKE_ID_BASE: usize = 100;

/// The shapes a fake function can imitate.
#[derive(Clone, Copy, Debug)]
enum FakeShape {
    Calculator,
    StringOp,
    TableOp,
    Loop,
}

impl FakeShape {
    fn of(func_id: usize) -> Self {
        match func_id % 4 {
            0 => FakeShape::Calculator,
            1 => FakeShape::StringOp,
            2 => FakeShape::TableOp,
            _ => FakeShape::Loop,
        }
    }
}

/// Emit the dispatch-ladder entry for one fake function: a selector
/// comparison on the function-ID register plus a placeholder jump.
/// The returned jump position is patched once the fake blocks exist.
/// During legitimate execution the selector register never holds a
/// fake ID, so the comparison never fires.
pub(crate) fn emit_fake_entry(ctx: &mut Ctx, func_id: usize) -> usize {
    let mut selector = ctx.enc_fake(func_id + FAKE_ID_BASE);
    // The selector register holds zero for the real function, so an
    // encoding that lands on zero must be displaced.
    if selector == 0 {
        selector = FAKE_ID_BASE as i32;
    }
    let func_id_reg = ctx.func_id_reg;
    ctx.code.emit(Instruction::absk(OpCode::EQI, func_id_reg, selector, true));
    ctx.code.emit_jmp_placeholder()
}

/// Emit the block chain of one fake function and patch its ladder
/// entry.  Each block simulates the function's shape for a few
/// instructions, then routes onward: intermediate blocks chain to the
/// next fake block, while the final block sets the state register to
/// some real block's state so that control would rejoin real code.
pub(crate) fn emit_fake_blocks(ctx: &mut Ctx, func_id: usize, rng: &mut Lcg, entry_jmp: usize) {
    let first_block_pc = ctx.code.pc();
    ctx.code.patch_jmp(entry_jmp, first_block_pc);
    let shape = FakeShape::of(func_id);
    for b in 0..FAKE_FUNC_BLOCKS {
        emit_fake_block(ctx, shape, b, rng);
        let next_state = if b < FAKE_FUNC_BLOCKS - 1 {
            (func_id + FAKE_ID_BASE) * 10 + b + 1
        } else {
            rng.next() as usize % ctx.blocks.len()
        };
        let next_state = ctx.enc_state(next_state);
        let state_reg = ctx.state_reg;
        ctx.emit_load(state_reg, next_state);
        let disp = ctx.dispatcher_pc;
        ctx.code.emit_jmp_to(disp);
    }
}

/// Emit the body of one fake block in the requested shape.  All
/// writes land in the opaque scratch registers.
fn emit_fake_block(ctx: &mut Ctx, shape: FakeShape, block_idx: usize, rng: &mut Lcg) {
    let r = ctx.opaque_reg1;
    for i in 0..FAKE_BLOCK_INSTS {
        let draw = rng.next();
        let insn = match shape {
            FakeShape::Calculator => {
                let val = (draw % 200) as i32 - 100;
                match i % 4 {
                    0 => Instruction::asbx(OpCode::LOADI, r, val),
                    1 => Instruction::abc(OpCode::ADDI, r + 1, r, ((val % 50) + OFFSET_SC) as u8, false),
                    2 => Instruction::abc(OpCode::MUL, r, r, r + 1, false),
                    _ => Instruction::abc(OpCode::MMBIN, r, r + 1, 14, false),
                }
            }
            FakeShape::StringOp => match i % 3 {
                0 => Instruction::abc(OpCode::MOVE, r + (i as u8 % 2), r, 0, false),
                1 => Instruction::abc(OpCode::LEN, r, r + 1, 0, false),
                _ => Instruction::asbx(OpCode::LOADI, r, (draw % 100) as i32),
            },
            FakeShape::TableOp => match i % 3 {
                0 => Instruction::asbx(OpCode::LOADI, r, (draw % 50) as i32),
                1 => Instruction::abc(OpCode::MOVE, r + 1, r, 0, false),
                _ => Instruction::abc(OpCode::ADD, r, r, r + 1, false),
            },
            FakeShape::Loop => match i % 4 {
                0 => Instruction::asbx(OpCode::LOADI, r, block_idx as i32),
                1 => Instruction::abc(OpCode::ADDI, r, r, (1 + OFFSET_SC) as u8, false),
                2 => Instruction::abc(OpCode::MMBIN, r, r, 6, false),
                _ => Instruction::abc(OpCode::MOVE, r + 1, r, 0, false),
            },
        };
        ctx.code.emit(insn);
    }
}
