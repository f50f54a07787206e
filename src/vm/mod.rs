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
use crate::bytecode::{Proto, NUM_OPCODES};
use crate::flatten::{flags, Lcg};

mod code;

pub use code::*;

/// Functions shorter than this many instructions are not worth
/// protecting.
const MIN_CODE_SIZE: usize = 4;

/// Generate the injective opcode remap for a given seed: a
/// seed-derived shuffle of the VM opcode space (excluding `HALT`),
/// truncated to one target per bytecode opcode.  Returns the forward
/// map.
fn opcode_remap(seed: u32) -> Vec<u8> {
    let mut space: Vec<u8> = (0..VM_OP_COUNT as u32 - 1).map(|i| i as u8).collect();
    let mut rng = Lcg::new(seed ^ 0xDEADBEEF);
    for i in (1..space.len()).rev() {
        let j = rng.next() as usize % (i + 1);
        space.swap(i, j);
    }
    space.truncate(NUM_OPCODES);
    space
}

/// Apply VM protection to a prototype: re-encode its instruction
/// stream into the remapped VM opcode space, encrypt each word by
/// position, append an encrypted `HALT` and register the result as an
/// out-of-band table back-linked from the prototype.  The executable
/// body is left untouched.  Too-small functions are declined quietly.
pub fn vm_protect(store: &mut VmCodeStore, f: &mut Proto, seed: u32) {
    if f.sizecode() < MIN_CODE_SIZE {
        debug!("function too small ({} instructions), skipping", f.sizecode());
        return;
    }
    // Derive the key from two generator draws.
    let mut rng = Lcg::new(seed);
    let key = ((rng.next() as u64) << 32) | rng.next() as u64;
    let forward = opcode_remap(seed);
    let mut reverse_map = vec![-1i32; VM_OP_COUNT];
    for (lua_op, vm_op) in forward.iter().enumerate() {
        reverse_map[*vm_op as usize] = lua_op as i32;
    }
    // Convert and encrypt the stream.
    let mut vm_code = Vec::with_capacity(f.sizecode() + 1);
    for (pc, insn) in f.code.iter().enumerate() {
        let vm_op = forward[insn.opcode() as usize];
        let vm_inst = VmInstruction::from_instruction(*insn, vm_op);
        vm_code.push(encrypt(vm_inst, key, pc));
    }
    let halt = VmInstruction::new(VM_OP_HALT, 0, 0, 0, 0);
    vm_code.push(encrypt(halt, key, f.sizecode()));
    debug!("protected {} instructions (key {:#018x})", f.sizecode(), key);
    // Register the table and stamp the prototype.
    let table = VmCodeTable { code: vm_code, key, reverse_map, seed };
    let handle = store.register(table);
    f.vm_code = Some(handle);
    f.mode |= flags::VM_PROTECT;
    f.extra = (f.extra & 0xFFFF_FFFF_0000_0000) | (key & 0xFFFF_FFFF);
}
