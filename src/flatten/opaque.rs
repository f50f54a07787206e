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

/// The two predicate families.  Either way the emitted test's `k` bit
/// agrees with the statically known outcome, so the jump following a
/// predicate is always taken and anything between that jump and its
/// target is unreachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Predicate {
    AlwaysTrue,
    AlwaysFalse,
}

const NUM_TRUE_VARIANTS: u32 = 4;
const NUM_FALSE_VARIANTS: u32 = 3;

/// Emit an opaque predicate: a short computation over the two scratch
/// registers followed by a conditional test whose direction is fixed
/// but appears data-dependent.  Returns the number of instructions
/// emitted.
pub(crate) fn emit_predicate(ctx: &mut Ctx, kind: Predicate, rng: &mut Lcg) -> usize {
    let start = ctx.code.pc();
    match kind {
        Predicate::AlwaysTrue => emit_always_true(ctx, rng),
        Predicate::AlwaysFalse => emit_always_false(ctx, rng),
    }
    ctx.code.pc() - start
}

fn emit_always_true(ctx: &mut Ctx, rng: &mut Lcg) {
    let r1 = ctx.opaque_reg1;
    let r2 = ctx.opaque_reg2;
    let variant = rng.next() % NUM_TRUE_VARIANTS;
    let value = (rng.next() % 1000) as i32 - 500;
    match variant {
        0 => {
            // x*x >= 0: a square is never negative.
            ctx.emit_load(r1, value);
            ctx.code.emit(Instruction::abc(OpCode::MUL, r2, r1, r1, false));
            ctx.code.emit(Instruction::absk(OpCode::GEI, r2, 0, true));
        }
        1 => {
            // x + 0 == x.
            ctx.emit_load(r1, value);
            ctx.code.emit(Instruction::abc(OpCode::ADDI, r2, r1, OFFSET_SC as u8, false));
            ctx.code.emit(Instruction::abc(OpCode::EQ, r2, r1, 0, true));
        }
        2 => {
            // 2x - x == x.
            ctx.emit_load(r1, value);
            ctx.code.emit(Instruction::abc(OpCode::SHLI, r2, r1, (1 + OFFSET_SC) as u8, false));
            ctx.code.emit(Instruction::abc(OpCode::SUB, r2, r2, r1, false));
            ctx.code.emit(Instruction::abc(OpCode::EQ, r2, r1, 0, true));
        }
        _ => {
            // x - x == 0.
            ctx.emit_load(r1, value);
            ctx.code.emit(Instruction::abc(OpCode::SUB, r2, r1, r1, false));
            ctx.code.emit(Instruction::absk(OpCode::EQI, r2, 0, true));
        }
    }
}

fn emit_always_false(ctx: &mut Ctx, rng: &mut Lcg) {
    let r1 = ctx.opaque_reg1;
    let r2 = ctx.opaque_reg2;
    let variant = rng.next() % NUM_FALSE_VARIANTS;
    let value = (rng.next() % 1000) as i32 - 500;
    match variant {
        0 => {
            // x*x < 0: never.
            ctx.emit_load(r1, value);
            ctx.code.emit(Instruction::abc(OpCode::MUL, r2, r1, r1, false));
            ctx.code.emit(Instruction::absk(OpCode::LTI, r2, 0, false));
        }
        1 => {
            // x - x != 0: never.
            ctx.emit_load(r1, value);
            ctx.code.emit(Instruction::abc(OpCode::SUB, r2, r1, r1, false));
            ctx.code.emit(Instruction::absk(OpCode::EQI, r2, 0, true));
        }
        _ => {
            // x + 1 == x: never.
            ctx.emit_load(r1, value);
            ctx.code.emit(Instruction::abc(OpCode::ADDI, r2, r1, (1 + OFFSET_SC) as u8, false));
            ctx.code.emit(Instruction::abc(OpCode::EQ, r2, r1, 0, false));
        }
    }
}
