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
use super::{Ctx, FlattenError};

/// Maximum number of basic blocks per group.
const GROUP_SIZE: usize = 4;

/// The two-level dispatch shape.  Transitions update both registers
/// and return to the outer dispatcher, which selects a group whose
/// inner dispatcher selects the block.
struct Nested {
    outer_dispatcher_pc: usize,
    group_starts: Vec<usize>,
}

impl Nested {
    /// Which group a block belongs to.
    fn group_of(&self, block_idx: usize) -> usize {
        for g in 0..self.group_starts.len() - 1 {
            if block_idx >= self.group_starts[g] && block_idx < self.group_starts[g + 1] {
                return g;
            }
        }
        0
    }
}

impl DispatchShape for Nested {
    fn setter_width(&self) -> i32 {
        2
    }

    fn emit_transition(&self, ctx: &mut Ctx, target: usize) {
        let group = ctx.enc_state(self.group_of(target));
        let inner = ctx.enc_inner(ctx.blocks[target].state_id);
        let outer_reg = ctx.outer_state_reg;
        let state_reg = ctx.state_reg;
        ctx.emit_load(outer_reg, group);
        ctx.emit_load(state_reg, inner);
        ctx.code.emit_jmp_to(self.outer_dispatcher_pc);
    }
}

/// Partition `num_blocks` into contiguous groups of at most
/// `GROUP_SIZE`, always forming at least two groups.  Returns the
/// group start indices with a trailing end marker.
fn partition_groups(num_blocks: usize) -> Vec<usize> {
    let mut num_groups = (num_blocks + GROUP_SIZE - 1) / GROUP_SIZE;
    if num_groups < 2 {
        num_groups = 2;
    }
    let per_group = (num_blocks + num_groups - 1) / num_groups;
    let mut starts = Vec::with_capacity(num_groups + 1);
    for g in 0..num_groups {
        starts.push((g * per_group).min(num_blocks));
    }
    starts.push(num_blocks);
    starts
}

/// Assemble the two-level dispatcher: prologue, outer group ladder,
/// one inner ladder per group (whose default falls out to the outer
/// check, so a stale inner state cannot wedge), then the block
/// bodies.
pub(crate) fn generate(ctx: &mut Ctx) -> Result<(), FlattenError> {
    let num_blocks = ctx.blocks.len();
    if num_blocks == 0 {
        return Ok(());
    }
    ctx.group_starts = partition_groups(num_blocks);
    let num_groups = ctx.group_starts.len() - 1;
    debug!("{} blocks across {} groups", num_blocks, num_groups);
    let shape = Nested {
        outer_dispatcher_pc: 0, // filled in below
        group_starts: ctx.group_starts.clone(),
    };
    // Prologue: both registers route to the entry block.
    let entry_block = ctx.blocks.iter().position(|b| b.is_entry).unwrap_or(0);
    let entry_group = ctx.enc_state(shape.group_of(entry_block));
    let entry_inner = ctx.enc_inner(ctx.blocks[entry_block].state_id);
    let outer_reg = ctx.outer_state_reg;
    let state_reg = ctx.state_reg;
    ctx.emit_load(outer_reg, entry_group);
    ctx.emit_load(state_reg, entry_inner);
    // Outer dispatcher: select a group.
    let outer_pc = ctx.code.pc();
    ctx.dispatcher_pc = outer_pc;
    let shape = Nested { outer_dispatcher_pc: outer_pc, ..shape };
    debug!("outer dispatcher at pc {}", outer_pc);
    let mut group_jmps = Vec::with_capacity(num_groups);
    for g in 0..num_groups {
        let selector = ctx.enc_state(g);
        ctx.code.emit(Instruction::absk(OpCode::EQI, outer_reg, selector, true));
        group_jmps.push(ctx.code.emit_jmp_placeholder());
    }
    ctx.code.emit_jmp_to(outer_pc);
    // Inner dispatchers: select a block within the group.
    let mut block_jmps = vec![0; num_blocks];
    for g in 0..num_groups {
        let inner_pc = ctx.code.pc();
        ctx.code.patch_jmp(group_jmps[g], inner_pc);
        for i in ctx.group_starts[g]..ctx.group_starts[g + 1] {
            let selector = ctx.enc_inner(ctx.blocks[i].state_id);
            ctx.code.emit(Instruction::absk(OpCode::EQI, state_reg, selector, true));
            block_jmps[i] = ctx.code.emit_jmp_placeholder();
        }
        // A stale inner state falls back out to the outer check.
        ctx.code.emit_jmp_to(outer_pc);
    }
    // Block bodies.
    for i in 0..num_blocks {
        let start = emit_block_body(ctx, i, &shape)?;
        ctx.code.patch_jmp(block_jmps[i], start);
    }
    debug!("emitted {} instructions", ctx.code.pc());
    Ok(())
}
