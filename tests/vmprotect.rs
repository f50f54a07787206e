use luaobf::bytecode::{OpCode, Proto};
use luaobf::flatten::{flags, flatten, Lcg};
use luaobf::vm::{decrypt, encrypt, vm_protect, VmCodeStore, VmInstruction, VM_OP_HALT};

mod util;
use util::*;

/// A twenty-instruction straight-line function.
fn long_proto() -> Proto {
    let mut code = Vec::new();
    for i in 0..19 {
        code.push(loadi((i % 4) as u8, i as i32));
    }
    code.push(ret0());
    Proto::from_code(code, 4)
}

#[test]
fn test_vm_01() {
    // Encryption round-trips for arbitrary words, keys and positions.
    let mut rng = Lcg::new(1);
    for pc in 0..200 {
        let word = VmInstruction(((rng.next() as u64) << 32) | rng.next() as u64);
        let key = ((rng.next() as u64) << 32) | rng.next() as u64;
        assert_eq!(decrypt(encrypt(word, key, pc), key, pc), word);
    }
}

#[test]
fn test_vm_02() {
    // Rotation by zero (pc divisible by 64) must still round-trip.
    let word = VmInstruction(0x0123456789ABCDEF);
    for pc in [0, 64, 128] {
        assert_eq!(decrypt(encrypt(word, 0xFEED, pc), 0xFEED, pc), word);
    }
}

#[test]
fn test_vm_03() {
    // Protecting a function registers a table, back-links it and
    // stamps the prototype; decrypting an entry recovers the remapped
    // opcode of the original instruction.
    let mut p = long_proto();
    let mut store = VmCodeStore::new();
    vm_protect(&mut store, &mut p, 0x1234);
    assert_eq!(store.len(), 1);
    assert!(p.mode & flags::VM_PROTECT != 0);
    let table = store.find(&p).expect("table not found");
    // One entry per instruction, plus the halt terminator.
    assert_eq!(table.code.len(), 21);
    assert_eq!(p.extra as u32 as u64, table.key & 0xFFFF_FFFF);
    // Entry five decodes back to LOADI through the reverse map.
    let vm_inst = decrypt(table.code[5], table.key, 5);
    assert_eq!(table.reverse_map[vm_inst.op() as usize], OpCode::LOADI as i32);
    // The terminator decodes to HALT.
    let halt = decrypt(table.code[20], table.key, 20);
    assert_eq!(halt.op(), VM_OP_HALT);
}

#[test]
fn test_vm_04() {
    // The opcode remap is injective: no two opcodes share a VM slot,
    // and HALT is never allocated.
    let mut p = long_proto();
    let mut store = VmCodeStore::new();
    vm_protect(&mut store, &mut p, 0xABCD);
    let table = store.find(&p).unwrap();
    let mapped: Vec<_> = table
        .reverse_map
        .iter()
        .enumerate()
        .filter(|(_, lua_op)| **lua_op >= 0)
        .collect();
    assert_eq!(mapped.len(), luaobf::bytecode::NUM_OPCODES);
    assert!(table.reverse_map[VM_OP_HALT as usize] < 0);
}

#[test]
fn test_vm_05() {
    // Lookup falls back to a table scan when the back-link is gone.
    let mut p = long_proto();
    let mut store = VmCodeStore::new();
    vm_protect(&mut store, &mut p, 0x77);
    p.vm_code = None;
    assert!(store.find(&p).is_some());
}

#[test]
fn test_vm_06() {
    // The executable body is untouched: protection is out-of-band.
    let mut p = long_proto();
    let original = p.code.clone();
    let mut store = VmCodeStore::new();
    vm_protect(&mut store, &mut p, 0x31337);
    assert_eq!(p.code, original);
    assert_eq!(run(&p, &[]), Vec::<i64>::new());
}

#[test]
fn test_vm_07() {
    // Too-small functions are declined quietly.
    let mut p = Proto::from_code(vec![loadi(0, 1), ret0()], 2);
    let mut store = VmCodeStore::new();
    vm_protect(&mut store, &mut p, 5);
    assert!(store.is_empty());
    assert_eq!(p.mode, 0);
}

#[test]
fn test_vm_08() {
    // VM protection composes with flattening via the flag bit, and
    // the flattened body still runs.
    let mut p = cascade_proto();
    let mut store = VmCodeStore::new();
    flatten(&mut store, &mut p, flags::CFF | flags::VM_PROTECT, 88).unwrap().unwrap();
    assert_eq!(store.len(), 1);
    assert!(p.mode & flags::CFF != 0);
    assert!(p.mode & flags::VM_PROTECT != 0);
    let table = store.find(&p).unwrap();
    assert_eq!(table.code.len(), p.sizecode() + 1);
    assert_eq!(run(&p, &[2]), vec![21]);
}

#[test]
fn test_vm_09() {
    // Protection without flattening, through the flatten entry point.
    let mut p = long_proto();
    let mut store = VmCodeStore::new();
    let md = flatten(&mut store, &mut p, flags::VM_PROTECT, 3).unwrap();
    assert!(md.is_none());
    assert_eq!(store.len(), 1);
    assert!(p.mode & flags::CFF == 0);
}
