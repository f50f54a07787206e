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
use log::{debug, warn};
use crate::bytecode::{CodeBuilder, Instruction, OpCode, Proto};
use crate::vm::{self, VmCodeStore};

mod blocks;
mod bogus;
mod dispatch;
mod interleave;
mod metadata;
mod nested;
mod opaque;
mod rewrite;
mod state;

pub use blocks::*;
pub use metadata::*;
pub use state::*;

/// Obfuscation flag bits.  All bits compose independently, though the
/// CFF-layer bits only take effect when `CFF` itself is set.
pub mod flags {
    /// Enable control-flow flattening.
    pub const CFF: u32 = 1 << 0;
    /// Permute the state IDs of non-entry blocks.
    pub const BLOCK_SHUFFLE: u32 = 1 << 1;
    /// Emit two unreachable bogus blocks per real block.
    pub const BOGUS_BLOCKS: u32 = 1 << 2;
    /// Apply the state-encoding bijection to every state value.
    pub const STATE_ENCODE: u32 = 1 << 3;
    /// Use the two-level dispatcher instead of the flat one.
    pub const NESTED_DISPATCHER: u32 = 1 << 4;
    /// Interleave opaque predicates into the dispatch ladder.
    pub const OPAQUE_PREDICATES: u32 = 1 << 5;
    /// Add fake-function blocks keyed on an unused selector register.
    pub const FUNC_INTERLEAVE: u32 = 1 << 6;
    /// Apply the VM protection pass after flattening.
    pub const VM_PROTECT: u32 = 1 << 7;
    /// Reserved.
    pub const BINARY_DISPATCHER: u32 = 1 << 8;
    /// Inject no-op padding at block boundaries.
    pub const RANDOM_NOP: u32 = 1 << 9;
    /// String-constant encryption; handled outside this engine.
    pub const STR_ENCRYPT: u32 = 1 << 10;

    /// The bits recorded on a prototype by the flattening pass
    /// itself.
    pub(crate) const CFF_LAYER: u32 = CFF
        | BLOCK_SHUFFLE
        | BOGUS_BLOCKS
        | STATE_ENCODE
        | NESTED_DISPATCHER
        | OPAQUE_PREDICATES
        | FUNC_INTERLEAVE
        | RANDOM_NOP;
}

/// Functions shorter than this many instructions are left untouched.
const MIN_CODE_SIZE: usize = 4;

// ============================================================================
// Errors
// ============================================================================

/// An error arising while flattening a prototype.  Structural
/// problems with the input (which make the function simply not worth
/// flattening) are reported separately, via a quiet decline.
pub enum FlattenError {
    /// The instruction stream was empty.
    EmptyCode,
    /// A PC-relative transfer points outside the instruction stream.
    MalformedJumpTarget { pc: usize, target: i64 },
    /// A transfer target does not coincide with any block boundary.
    MissingBlockBoundary { pc: usize },
    /// A successor required during emission was never discovered by
    /// exit analysis.
    MissingSuccessor { block: usize },
    /// The prototype's validation tag does not match.
    InvalidPrototypeMagic(u32),
}

impl fmt::Debug for FlattenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlattenError::EmptyCode => write!(f, "instruction stream too small"),
            FlattenError::MalformedJumpTarget { pc, target } => {
                write!(f, "malformed input: jump at pc {} targets {}", pc, target)
            }
            FlattenError::MissingBlockBoundary { pc } => {
                write!(f, "malformed input: transfer at pc {} hits no block boundary", pc)
            }
            FlattenError::MissingSuccessor { block } => {
                write!(f, "block {} has no successor to transition to", block)
            }
            FlattenError::InvalidPrototypeMagic(m) => {
                write!(f, "invalid prototype magic ({:#x})", m)
            }
        }
    }
}

impl fmt::Display for FlattenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Just reuse debug formatting.
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for FlattenError {}

// ============================================================================
// Transform context
// ============================================================================

/// Everything a single transform needs: the original prototype, its
/// block decomposition, the output buffer and the reserved registers.
/// Lives only for the duration of one `flatten` call.
pub(crate) struct Ctx<'a> {
    /// The original (untouched) instruction stream.
    pub original: &'a [Instruction],
    /// The block decomposition of `original`.
    pub blocks: Vec<BasicBlock>,
    /// The output buffer.
    pub code: CodeBuilder,
    /// Requested obfuscation flags.
    pub flags: u32,
    /// Current seed; advanced by shuffling.
    pub seed: u32,
    /// The (inner) state register.
    pub state_reg: u8,
    /// The outer state register (nested dispatch only).
    pub outer_state_reg: u8,
    /// Scratch registers for opaque predicates.
    pub opaque_reg1: u8,
    pub opaque_reg2: u8,
    /// The function-ID register (fake-function interleaving only).
    pub func_id_reg: u8,
    /// Position of the (flat or outer) dispatcher.
    pub dispatcher_pc: usize,
    /// Group partition for nested dispatch: `num_groups + 1` start
    /// indices.
    pub group_starts: Vec<usize>,
    /// Number of fake functions emitted.
    pub num_fake_funcs: usize,
    /// Generator driving no-op padding.
    pub nop_rng: Lcg,
}

impl<'a> Ctx<'a> {
    fn new(f: &'a Proto, blocks: Vec<BasicBlock>, fl: u32, seed: u32) -> Self {
        let base = f.max_stacksize;
        Self {
            original: &f.code,
            blocks,
            code: CodeBuilder::new(),
            flags: fl,
            seed,
            state_reg: base,
            outer_state_reg: base + 1,
            opaque_reg1: base + 2,
            opaque_reg2: base + 3,
            func_id_reg: base + 4,
            dispatcher_pc: 0,
            group_starts: Vec::new(),
            num_fake_funcs: 0,
            nop_rng: Lcg::new(seed ^ 0x4E4F5021),
        }
    }

    /// Encode a state value for the flat dispatcher (and for outer
    /// group selectors).
    pub fn enc_state(&self, state: usize) -> i32 {
        if self.flags & flags::STATE_ENCODE != 0 {
            encode_state(state as i32, self.seed)
        } else {
            state as i32
        }
    }

    /// Encode an inner state value.  The inner seed derivation
    /// differs from the outer one so the two state spaces cannot be
    /// conflated.
    pub fn enc_inner(&self, state: usize) -> i32 {
        if self.flags & flags::STATE_ENCODE != 0 {
            encode_state(state as i32, self.seed ^ 0x12345678)
        } else {
            state as i32
        }
    }

    /// Encode a fake-function selector value.
    pub fn enc_fake(&self, id: usize) -> i32 {
        if self.flags & flags::STATE_ENCODE != 0 {
            encode_state(id as i32, self.seed ^ 0xABCDEF00)
        } else {
            id as i32
        }
    }

    /// Emit `LOADI reg, value`.
    pub fn emit_load(&mut self, reg: u8, value: i32) -> usize {
        self.code.emit(Instruction::asbx(OpCode::LOADI, reg, value))
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Flatten a single prototype in place.  On success the prototype's
/// instruction stream is replaced by the dispatcher form, its stack
/// size raised to cover the reserved registers and its metadata
/// fields stamped; the returned `Metadata` describes the applied
/// transform.  Functions too small to be worth flattening (and inputs
/// whose structure cannot be decomposed) are declined quietly with
/// `Ok(None)`.
///
/// The `store` receives the out-of-band code table when the
/// `VM_PROTECT` flag is also set.
pub fn flatten(
    store: &mut VmCodeStore,
    f: &mut Proto,
    fl: u32,
    seed: u32,
) -> Result<Option<Metadata>, FlattenError> {
    if fl & flags::CFF == 0 {
        // Not flattening; VM protection may still apply on its own.
        if fl & flags::VM_PROTECT != 0 {
            vm::vm_protect(store, f, seed ^ 0xFEDCBA98);
        }
        return Ok(None);
    }
    if f.sizecode() < MIN_CODE_SIZE {
        debug!("function too small ({} instructions), skipping", f.sizecode());
        return Ok(None);
    }
    let blocks = match decompose(&f.code) {
        Ok(bs) => bs,
        Err(e) => {
            // Structurally unsuitable input: decline rather than
            // fail.
            warn!("declining to flatten: {}", e);
            return Ok(None);
        }
    };
    if blocks.len() < 2 {
        debug!("too few basic blocks ({}), skipping", blocks.len());
        return Ok(None);
    }
    debug!("flattening {} instructions across {} blocks", f.sizecode(), blocks.len());
    let mut ctx = Ctx::new(f, blocks, fl, seed);
    if fl & flags::BLOCK_SHUFFLE != 0 {
        shuffle_states(&mut ctx.blocks, &mut ctx.seed);
    }
    if fl & flags::NESTED_DISPATCHER != 0 {
        nested::generate(&mut ctx)?;
    } else {
        dispatch::generate(&mut ctx)?;
    }
    // Transfer the new stream into the prototype.
    let state_reg = ctx.state_reg;
    let outer_state_reg = ctx.outer_state_reg;
    let opaque_reg2 = ctx.opaque_reg2;
    let func_id_reg = ctx.func_id_reg;
    let Ctx { blocks, code, seed: final_seed, .. } = ctx;
    let num_blocks = blocks.len();
    f.code = code.into_code();
    // Raise the stack to cover every reserved register in use.
    let mut top_reg = state_reg;
    if fl & flags::NESTED_DISPATCHER != 0 {
        top_reg = top_reg.max(outer_state_reg);
    }
    if fl & flags::OPAQUE_PREDICATES != 0 {
        top_reg = top_reg.max(opaque_reg2);
    }
    if fl & flags::FUNC_INTERLEAVE != 0 {
        top_reg = top_reg.max(func_id_reg);
    }
    if top_reg >= f.max_stacksize {
        f.max_stacksize = top_reg + 1;
    }
    // Stamp the prototype.
    f.mode |= fl & flags::CFF_LAYER;
    f.magic = CFF_MAGIC;
    f.extra = ((num_blocks as u64) << 32) | final_seed as u64;
    debug!("flattened into {} instructions", f.sizecode());
    let metadata = Metadata { state_reg: state_reg as u32, seed: final_seed, blocks };
    if fl & flags::VM_PROTECT != 0 {
        vm::vm_protect(store, f, seed ^ 0xFEDCBA98);
    }
    Ok(Some(metadata))
}

/// Remove the flattening mark from a prototype.  Without metadata the
/// validation tag is checked and the mode bit cleared; full reversal
/// of the instruction stream is not reconstructible from the stored
/// per-block positions, so a supplied metadata blob currently earns
/// the same treatment.
pub fn unflatten(f: &mut Proto, metadata: Option<&Metadata>) -> Result<(), FlattenError> {
    if f.mode & flags::CFF == 0 {
        return Ok(());
    }
    if metadata.is_none() && f.magic != CFF_MAGIC {
        return Err(FlattenError::InvalidPrototypeMagic(f.magic));
    }
    f.mode &= !flags::CFF;
    Ok(())
}

/// Flatten every prototype in a closure tree.  Each prototype draws
/// its own seed from a generator over the root seed, so siblings do
/// not share dispatch patterns.
pub fn flatten_tree(
    store: &mut VmCodeStore,
    f: &mut Proto,
    fl: u32,
    seed: u32,
) -> Result<(), FlattenError> {
    let mut rng = Lcg::new(seed);
    flatten_tree_inner(store, f, fl, &mut rng)
}

fn flatten_tree_inner(
    store: &mut VmCodeStore,
    f: &mut Proto,
    fl: u32,
    rng: &mut Lcg,
) -> Result<(), FlattenError> {
    let seed = rng.next();
    flatten(store, f, fl, seed)?;
    for p in &mut f.protos {
        flatten_tree_inner(store, p, fl, rng)?;
    }
    Ok(())
}
