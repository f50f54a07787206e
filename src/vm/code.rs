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
use crate::bytecode::{Instruction, OpMode, Proto};

/// Size of the VM opcode space.
pub const VM_OP_COUNT: usize = 256;
/// The VM terminator opcode, excluded from the remap so it can never
/// collide with a remapped instruction.
pub const VM_OP_HALT: u8 = 0xFF;

// ============================================================================
// VM instructions
// ============================================================================

/// A 64-bit VM instruction word:
///
/// ```txt
///  63     56 55     48 47        32 31        16 15      8 7      0
/// +---------+---------+------------+------------+---------+--------+
/// | reserved|  flags  |     c      |     b      |    a    |   op   |
/// +---------+---------+------------+------------+---------+--------+
/// ```
///
/// Operands wider than their destination field are truncated: the VM
/// form is a side-table encoding, not the executable body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmInstruction(pub u64);

impl VmInstruction {
    pub fn new(op: u8, a: u8, b: u16, c: u16, flags: u8) -> Self {
        let w = (op as u64)
            | ((a as u64) << 8)
            | ((b as u64) << 16)
            | ((c as u64) << 32)
            | ((flags as u64) << 48);
        VmInstruction(w)
    }

    /// Re-encode a bytecode instruction into the VM form under a
    /// given opcode remap.  Operand extraction follows the source
    /// opcode's format.
    pub fn from_instruction(insn: Instruction, vm_op: u8) -> Self {
        let op = insn.opcode();
        match op.mode() {
            OpMode::ABC => Self::new(
                vm_op,
                insn.a(),
                insn.b() as u16,
                insn.c() as u16,
                insn.k() as u8,
            ),
            OpMode::ABx => Self::new(vm_op, insn.a(), insn.bx() as u16, 0, 0),
            OpMode::AsBx => Self::new(vm_op, insn.a(), insn.sbx() as u16, 0, 0),
            OpMode::Ax => Self::new(vm_op, insn.ax() as u8, 0, 0, 0),
            OpMode::SJ => Self::new(vm_op, insn.sj() as u8, 0, 0, 0),
        }
    }

    pub fn op(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn a(&self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    pub fn b(&self) -> u16 {
        ((self.0 >> 16) & 0xFFFF) as u16
    }

    pub fn c(&self) -> u16 {
        ((self.0 >> 32) & 0xFFFF) as u16
    }

    pub fn flags(&self) -> u8 {
        ((self.0 >> 48) & 0xFF) as u8
    }
}

// ============================================================================
// Per-position encryption
// ============================================================================

/// Encrypt one VM instruction for storage at position `pc`.  Three
/// reversible steps: whiten with the key, rotate by the position,
/// then whiten with a position-derived key variant.
pub fn encrypt(inst: VmInstruction, key: u64, pc: usize) -> VmInstruction {
    let mut e = inst.0 ^ key;
    e = e.rotate_left((pc % 64) as u32);
    e ^= key ^ (pc as u64).wrapping_mul(0x9E3779B97F4A7C15);
    VmInstruction(e)
}

/// Invert `encrypt` for the instruction stored at position `pc`.
pub fn decrypt(inst: VmInstruction, key: u64, pc: usize) -> VmInstruction {
    let mut d = inst.0;
    d ^= key ^ (pc as u64).wrapping_mul(0x9E3779B97F4A7C15);
    d = d.rotate_right((pc % 64) as u32);
    d ^= key;
    VmInstruction(d)
}

// ============================================================================
// Code tables
// ============================================================================

/// The out-of-band record produced by protecting one prototype: its
/// encrypted VM instructions, the encryption key, the reverse opcode
/// map and the seed the protection ran under.
pub struct VmCodeTable {
    /// Encrypted VM instructions, terminated by an encrypted `HALT`.
    pub code: Vec<VmInstruction>,
    /// The 64-bit encryption key.
    pub key: u64,
    /// Maps each VM opcode back to the bytecode opcode it encodes, or
    /// -1 where no mapping exists.
    pub reverse_map: Vec<i32>,
    /// The seed the protection pass ran under.
    pub seed: u32,
}

/// The process-wide collection of VM code tables.  Registration is
/// append-only; the handle a registration returns is back-linked from
/// the prototype and stays valid for the life of the store.
pub struct VmCodeStore {
    tables: Vec<VmCodeTable>,
}

impl VmCodeStore {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Register a freshly built table, returning its handle.
    pub fn register(&mut self, table: VmCodeTable) -> usize {
        self.tables.push(table);
        self.tables.len() - 1
    }

    /// Look a table up by handle.
    pub fn get(&self, handle: usize) -> Option<&VmCodeTable> {
        self.tables.get(handle)
    }

    /// Find the table belonging to a prototype.  The prototype's
    /// back-link is authoritative; failing that, a linear scan
    /// matches the key fragment stamped into the prototype's `extra`
    /// field against each table.
    pub fn find(&self, f: &Proto) -> Option<&VmCodeTable> {
        if let Some(handle) = f.vm_code {
            return self.get(handle);
        }
        self.tables.iter().find(|t| {
            (t.key & 0xFFFF_FFFF) == (f.extra & 0xFFFF_FFFF)
                && t.code.len() == f.sizecode() + 1
        })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drop every registered table.  Handles held by prototypes
    /// become dangling and must not be used afterwards.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

impl Default for VmCodeStore {
    fn default() -> Self {
        Self::new()
    }
}
