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
use super::BasicBlock;

/// Size of the integer range over which states are encoded.
pub const STATE_RANGE: i32 = 30000;
/// Multiplier of the encoding transform.  Prime and coprime to
/// `STATE_RANGE`, so the transform permutes the range.
const STATE_PRIME: i32 = 7919;

// ============================================================================
// Random number generation
// ============================================================================

/// A linear congruential generator.  The multiplier and increment are
/// part of the engine's contract: for a given seed, a transform must
/// produce identical output across implementations, so these exact
/// constants are load-bearing.
#[derive(Clone, Copy, Debug)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Advance the generator and return its new state.
    pub fn next(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1664525).wrapping_add(1013904223);
        self.state
    }

    /// The current generator state (usable as a derived seed).
    pub fn state(&self) -> u32 {
        self.state
    }
}

// ============================================================================
// State encoding
// ============================================================================

/// Encode a state value under a given seed.  The transform is
/// `(state * P + O) mod R` with `O = seed mod R`; since `P` is
/// coprime to `R` this is a bijection on `[0, R)`.  The result is
/// always non-negative.
pub fn encode_state(state: i32, seed: u32) -> i32 {
    let offset = (seed % STATE_RANGE as u32) as i32;
    let mut encoded = ((state * STATE_PRIME) % STATE_RANGE + offset) % STATE_RANGE;
    if encoded < 0 {
        encoded += STATE_RANGE;
    }
    encoded
}

/// Materialise the inverse of `encode_state` as a lookup table, such
/// that `table[encode_state(s, seed) as usize] == s` for every `s` in
/// `[0, STATE_RANGE)`.  Decoding goes through this table rather than
/// an algebraic inverse.
pub fn decode_table(seed: u32) -> Vec<i32> {
    let mut table = vec![0; STATE_RANGE as usize];
    for s in 0..STATE_RANGE {
        table[encode_state(s, seed) as usize] = s;
    }
    table
}

// ============================================================================
// State shuffling
// ============================================================================

/// Permute the `block index -> state id` mapping so that execution
/// order becomes unrelated to source order.  The entry block's state
/// stays at index 0; a Fisher-Yates pass runs over the remaining
/// indices.  Does nothing for fewer than three blocks.  The seed is
/// advanced in place, so downstream encoding sees the post-shuffle
/// generator state.
pub fn shuffle_states(blocks: &mut [BasicBlock], seed: &mut u32) {
    if blocks.len() <= 2 {
        return;
    }
    let mut rng = Lcg::new(*seed);
    for i in (2..blocks.len()).rev() {
        let j = 1 + (rng.next() as usize % i);
        let tmp = blocks[i].state_id;
        blocks[i].state_id = blocks[j].state_id;
        blocks[j].state_id = tmp;
    }
    *seed = rng.state();
}
