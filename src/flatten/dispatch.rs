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
use log::debug;
use crate::bytecode::{Instruction, OpCode};
use super::rewrite::{emit_block_body, DispatchShape};
use super::{bogus, flags, interleave, opaque, Ctx, FlattenError, Lcg};

/// A predicate is interleaved after this many consecutive ladder
/// entries.
const OPAQUE_INTERVAL: usize = 3;
/// Length of the unreachable tail following each predicate.
const DEAD_TAIL_INSTS: usize = 3;

/// The flat dispatch shape: one state register, transitions of the
/// form `LOADI state; JMP dispatcher`.
struct Flat {
    dispatcher_pc: usize,
}

impl DispatchShape for Flat {
    fn setter_width(&self) -> i32 {
        1
    }

    fn emit_transition(&self, ctx: &mut Ctx, target: usize) {
        let state = ctx.enc_state(ctx.blocks[target].state_id);
        let state_reg = ctx.state_reg;
        ctx.emit_load(state_reg, state);
        ctx.code.emit_jmp_to(self.dispatcher_pc);
    }
}

/// Assemble the flat dispatcher: prologue, dispatch ladder (with the
/// optional bogus, opaque-predicate and fake-function hardening
/// woven in), default trailer, block bodies and the final fixup of
/// every ladder jump.
pub(crate) fn generate(ctx: &mut Ctx) -> Result<(), FlattenError> {
    let num_blocks = ctx.blocks.len();
    if num_blocks == 0 {
        return Ok(());
    }
    // Prologue: route dispatch to the entry block.
    let entry_state = ctx
        .blocks
        .iter()
        .find(|b| b.is_entry)
        .map(|b| b.state_id)
        .unwrap_or(0);
    let init = ctx.enc_state(entry_state);
    let state_reg = ctx.state_reg;
    ctx.emit_load(state_reg, init);
    if ctx.flags & flags::FUNC_INTERLEAVE != 0 {
        ctx.num_fake_funcs = interleave::NUM_FAKE_FUNCTIONS;
        let func_id_reg = ctx.func_id_reg;
        ctx.emit_load(func_id_reg, 0);
    }
    ctx.dispatcher_pc = ctx.code.pc();
    debug!("dispatcher at pc {}", ctx.dispatcher_pc);
    // Dispatch ladder: real blocks, with an opaque predicate every
    // few entries.
    let mut opaque_rng = Lcg::new(ctx.seed ^ 0xDEADBEEF);
    let mut opaque_counter = 0;
    let mut ladder_jmps = Vec::with_capacity(num_blocks);
    for i in 0..num_blocks {
        if ctx.flags & flags::OPAQUE_PREDICATES != 0 && opaque_counter >= OPAQUE_INTERVAL {
            opaque_counter = 0;
            opaque::emit_predicate(ctx, opaque::Predicate::AlwaysTrue, &mut opaque_rng);
            // The predicate holds, so this jump always fires; the
            // tail below it can never run.
            ctx.code.emit(Instruction::sj_op(OpCode::JMP, DEAD_TAIL_INSTS as i32));
            for _ in 0..DEAD_TAIL_INSTS {
                let dead = bogus::bogus_instruction(ctx.state_reg, &mut opaque_rng);
                ctx.code.emit(dead);
            }
        }
        opaque_counter += 1;
        let state = ctx.enc_state(ctx.blocks[i].state_id);
        ctx.code.emit(Instruction::absk(OpCode::EQI, state_reg, state, true));
        ladder_jmps.push(ctx.code.emit_jmp_placeholder());
    }
    // Dispatch ladder: bogus blocks.
    let num_bogus = if ctx.flags & flags::BOGUS_BLOCKS != 0 {
        num_blocks * bogus::BOGUS_BLOCK_RATIO
    } else {
        0
    };
    let mut bogus_jmps = Vec::with_capacity(num_bogus);
    for b in 0..num_bogus {
        let state = ctx.enc_state(num_blocks + b);
        ctx.code.emit(Instruction::absk(OpCode::EQI, state_reg, state, true));
        bogus_jmps.push(ctx.code.emit_jmp_placeholder());
    }
    // Dispatch ladder: fake-function selectors.
    let mut fake_jmps = Vec::with_capacity(ctx.num_fake_funcs);
    for func_id in 0..ctx.num_fake_funcs {
        fake_jmps.push(interleave::emit_fake_entry(ctx, func_id));
    }
    // Default trailer: no match loops back to the dispatcher.
    let disp = ctx.dispatcher_pc;
    ctx.code.emit_jmp_to(disp);
    // Real block bodies.
    let shape = Flat { dispatcher_pc: ctx.dispatcher_pc };
    for i in 0..num_blocks {
        let start = emit_block_body(ctx, i, &shape)?;
        ctx.code.patch_jmp(ladder_jmps[i], start);
    }
    // Bogus block bodies.
    if num_bogus > 0 {
        let mut bogus_rng = Lcg::new(ctx.seed);
        for b in 0..num_bogus {
            let start = ctx.code.pc();
            bogus::emit_bogus_block(ctx, num_blocks + b, &mut bogus_rng);
            ctx.code.patch_jmp(bogus_jmps[b], start);
        }
    }
    // Fake-function bodies.
    if ctx.num_fake_funcs > 0 {
        let mut fake_rng = Lcg::new(ctx.seed ^ 0xFEEDFACE);
        for func_id in 0..ctx.num_fake_funcs {
            interleave::emit_fake_blocks(ctx, func_id, &mut fake_rng, fake_jmps[func_id]);
        }
    }
    debug!("emitted {} instructions", ctx.code.pc());
    Ok(())
}
