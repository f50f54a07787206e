use luaobf::bytecode::Proto;
use luaobf::flatten::{decompose, flags, flatten, CFF_MAGIC};
use luaobf::vm::VmCodeStore;

mod util;
use util::*;

#[test]
fn test_flatten_01() {
    // A two-instruction function is one exit block, and too small to
    // be worth touching.
    let mut p = Proto::from_code(vec![movr(1, 0), ret0()], 2);
    let blocks = decompose(&p.code).unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_exit);
    let mut store = VmCodeStore::new();
    let md = flatten(&mut store, &mut p, flags::CFF, 1).unwrap();
    assert!(md.is_none());
    assert_eq!(p.sizecode(), 2);
    assert_eq!(run(&p, &[5]), Vec::<i64>::new());
}

#[test]
fn test_flatten_02() {
    // A single-block function is declined even when long enough.
    let mut p = Proto::from_code(vec![loadi(0, 1), loadi(1, 2), add(2, 0, 1), ret1(2)], 3);
    let mut store = VmCodeStore::new();
    let md = flatten(&mut store, &mut p, flags::CFF, 1).unwrap();
    assert!(md.is_none());
    assert_eq!(p.mode, 0);
}

#[test]
fn test_flatten_03() {
    // If/then/else keeps its meaning through the dispatcher.
    let code = vec![
        loadi(0, 1),
        eqi(0, 1, false),
        jmp(2),
        loadi(1, 10),
        jmp(1),
        loadi(1, 20),
        ret1(1),
    ];
    let mut p = Proto::from_code(code, 2);
    assert_eq!(run(&p, &[]), vec![10]);
    let mut store = VmCodeStore::new();
    let md = flatten(&mut store, &mut p, flags::CFF, 3).unwrap().unwrap();
    assert_eq!(md.blocks.len(), 4);
    assert_eq!(run(&p, &[]), vec![10]);
}

#[test]
fn test_flatten_04() {
    // A numeric for-loop executes its body exactly three times.
    let code = vec![
        loadi(0, 1),
        loadi(1, 3),
        loadi(2, 1),
        forprep(0, 1),
        addi(4, 4, 1),
        forloop(0, 2),
        ret1(4),
    ];
    let mut p = Proto::from_code(code, 5);
    assert_eq!(run(&p, &[]), vec![3]);
    let mut store = VmCodeStore::new();
    flatten(&mut store, &mut p, flags::CFF, 9).unwrap().unwrap();
    assert_eq!(run(&p, &[]), vec![3]);
}

#[test]
fn test_flatten_05() {
    // The cascade agrees with the original on every interesting
    // input, under the bare dispatcher.
    check_flattened(flags::CFF, 17);
}

#[test]
fn test_flatten_06() {
    // ...and with shuffled blocks.
    check_flattened(flags::CFF | flags::BLOCK_SHUFFLE, 17);
}

#[test]
fn test_flatten_07() {
    // ...and with encoded states.
    check_flattened(flags::CFF | flags::STATE_ENCODE, 17);
}

#[test]
fn test_flatten_08() {
    // ...and with no-op padding.
    check_flattened(flags::CFF | flags::RANDOM_NOP, 17);
}

#[test]
fn test_flatten_09() {
    // Metadata fields are stamped on success.
    let mut p = cascade_proto();
    let mut store = VmCodeStore::new();
    let md = flatten(&mut store, &mut p, flags::CFF | flags::BLOCK_SHUFFLE, 5)
        .unwrap()
        .unwrap();
    assert_eq!(p.mode, flags::CFF | flags::BLOCK_SHUFFLE);
    assert_eq!(p.magic, CFF_MAGIC);
    assert_eq!(p.extra >> 32, md.blocks.len() as u64);
    assert_eq!(p.extra as u32, md.seed);
    // The state register sits where the original stack ended.
    assert_eq!(md.state_reg, 2);
    assert_eq!(p.max_stacksize, 3);
}

#[test]
fn test_flatten_10() {
    // The transform is a pure function of (input, flags, seed).
    let mut a = cascade_proto();
    let mut b = cascade_proto();
    let fl = flags::CFF | flags::BLOCK_SHUFFLE | flags::STATE_ENCODE | flags::BOGUS_BLOCKS;
    let mut store = VmCodeStore::new();
    flatten(&mut store, &mut a, fl, 1234).unwrap();
    flatten(&mut store, &mut b, fl, 1234).unwrap();
    assert_eq!(a.code, b.code);
    // A different seed produces a different stream.
    let mut c = cascade_proto();
    flatten(&mut store, &mut c, fl, 1235).unwrap();
    assert_ne!(a.code, c.code);
}

#[test]
fn test_flatten_11() {
    // Flattened output is itself a valid instruction stream: it
    // re-decomposes into a (much larger) block partition.
    let mut p = cascade_proto();
    let original_blocks = decompose(&p.code).unwrap().len();
    let mut store = VmCodeStore::new();
    flatten(&mut store, &mut p, flags::CFF, 77).unwrap().unwrap();
    let blocks = decompose(&p.code).unwrap();
    assert!(blocks.len() > original_blocks);
    let mut pos = 0;
    for b in &blocks {
        assert_eq!(b.start_pc, pos);
        pos = b.end_pc;
    }
    assert_eq!(pos, p.sizecode());
}

#[test]
fn test_flatten_12() {
    // The loop-and-branch program survives flattening across a spread
    // of inputs.
    for n in -3..15 {
        let mut p = sum_proto();
        let mut store = VmCodeStore::new();
        flatten(&mut store, &mut p, flags::CFF, n as u32).unwrap().unwrap();
        assert_eq!(run(&p, &[n]), vec![sum_expected(n)], "input {}", n);
    }
}

fn check_flattened(fl: u32, seed: u32) {
    let mut p = cascade_proto();
    let mut store = VmCodeStore::new();
    flatten(&mut store, &mut p, fl, seed).unwrap().unwrap();
    for input in 0..5 {
        assert_eq!(run(&p, &[input]), run(&cascade_proto(), &[input]), "input {}", input);
    }
}
