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

/// How many bogus blocks accompany each real block.
pub(crate) const BOGUS_BLOCK_RATIO: usize = 2;
/// Bounds on the number of instructions in one bogus block.
const BOGUS_BLOCK_MIN_INSTS: u32 = 3;
const BOGUS_BLOCK_MAX_INSTS: u32 = 8;

/// Generate a single plausible-looking instruction.  Destination
/// registers stay strictly below the state register, so a bogus run
/// can never alias the machinery that routes real execution.
pub(crate) fn bogus_instruction(state_reg: u8, rng: &mut Lcg) -> Instruction {
    let max_reg = state_reg.max(1) as u32;
    let inst_type = rng.next() % 4;
    let reg = (rng.next() % max_reg) as u8;
    let value = (rng.next() % 1000) as i32 - 500;
    match inst_type {
        0 => Instruction::asbx(OpCode::LOADI, reg, value),
        1 => Instruction::abc(OpCode::ADDI, reg, reg, ((value % 100) + OFFSET_SC) as u8, false),
        2 => {
            let src = (rng.next() % max_reg) as u8;
            Instruction::abc(OpCode::MOVE, reg, src, 0, false)
        }
        _ => Instruction::asbx(OpCode::LOADI, reg, (rng.next() % 2000) as i32),
    }
}

/// Generate a `NOP` whose operand fields carry arbitrary junk, so
/// padding does not stand out as a fixed bit pattern.
pub(crate) fn nop_instruction(rng: &mut Lcg) -> Instruction {
    let a = ((rng.next() >> 16) % 256) as u8;
    let b = ((rng.next() >> 16) % 256) as u8;
    let c = ((rng.next() >> 16) % 256) as u8;
    Instruction::abc(OpCode::NOP, a, b, c, false)
}

/// Emit one bogus block: a short random run followed by a state set
/// and a jump back to the dispatcher, so that even if the block were
/// ever reached control would return to dispatch rather than fall off
/// its end.
pub(crate) fn emit_bogus_block(ctx: &mut Ctx, bogus_state: usize, rng: &mut Lcg) {
    let num_insts =
        BOGUS_BLOCK_MIN_INSTS + rng.next() % (BOGUS_BLOCK_MAX_INSTS - BOGUS_BLOCK_MIN_INSTS + 1);
    for _ in 0..num_insts {
        let insn = bogus_instruction(ctx.state_reg, rng);
        ctx.code.emit(insn);
    }
    // Route onward to a nearby state.
    let next_state = ctx.enc_state(bogus_state + 1 + (rng.next() as usize % 3));
    let state_reg = ctx.state_reg;
    ctx.emit_load(state_reg, next_state);
    let disp = ctx.dispatcher_pc;
    ctx.code.emit_jmp_to(disp);
}
