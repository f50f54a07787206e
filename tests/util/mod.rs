// Shared helpers; not every test binary uses every one.
#![allow(dead_code)]

use luaobf::bytecode::{Instruction, OpCode, Proto, OFFSET_SC};

use OpCode::*;

/// Upper bound on interpreted steps, so a mis-flattened dispatcher
/// loops visibly instead of forever.
const STEP_LIMIT: usize = 1_000_000;

// ============================================================================
// Reference interpreter
// ============================================================================

/// Execute a prototype over integer registers and return its results.
/// Supports the opcode subset the tests exercise (loads, moves,
/// arithmetic, comparisons, jumps, numeric for-loops and returns);
/// anything else panics.  `args` seed the low registers.
pub fn run(proto: &Proto, args: &[i64]) -> Vec<i64> {
    let code = &proto.code;
    let mut regs = vec![0i64; proto.max_stacksize as usize + 8];
    regs[..args.len()].copy_from_slice(args);
    let mut pc = 0;
    for _ in 0..STEP_LIMIT {
        let insn = code[pc];
        // Post-increment convention: relative transfers below adjust
        // the already-advanced pc.
        pc += 1;
        let a = insn.a() as usize;
        match insn.opcode() {
            MOVE => regs[a] = regs[insn.b() as usize],
            LOADI => regs[a] = insn.sbx() as i64,
            ADD => {
                regs[a] = regs[insn.b() as usize] + regs[insn.c() as usize];
                pc += mmbin_skip(code, pc);
            }
            SUB => {
                regs[a] = regs[insn.b() as usize] - regs[insn.c() as usize];
                pc += mmbin_skip(code, pc);
            }
            MUL => {
                regs[a] = regs[insn.b() as usize] * regs[insn.c() as usize];
                pc += mmbin_skip(code, pc);
            }
            ADDI => {
                regs[a] = regs[insn.b() as usize] + insn.sc() as i64;
                pc += mmbin_skip(code, pc);
            }
            SHLI => {
                regs[a] = regs[insn.b() as usize] << insn.sc() as i64;
                pc += mmbin_skip(code, pc);
            }
            JMP => pc = (pc as i64 + insn.sj() as i64) as usize,
            EQ => cond_skip(&mut pc, regs[a] == regs[insn.b() as usize], insn.k()),
            LT => cond_skip(&mut pc, regs[a] < regs[insn.b() as usize], insn.k()),
            LE => cond_skip(&mut pc, regs[a] <= regs[insn.b() as usize], insn.k()),
            EQI => cond_skip(&mut pc, regs[a] == insn.sb() as i64, insn.k()),
            LTI => cond_skip(&mut pc, regs[a] < insn.sb() as i64, insn.k()),
            LEI => cond_skip(&mut pc, regs[a] <= insn.sb() as i64, insn.k()),
            GTI => cond_skip(&mut pc, regs[a] > insn.sb() as i64, insn.k()),
            GEI => cond_skip(&mut pc, regs[a] >= insn.sb() as i64, insn.k()),
            TEST => cond_skip(&mut pc, regs[a] != 0, insn.k()),
            FORPREP => {
                let init = regs[a];
                let limit = regs[a + 1];
                let step = regs[a + 2];
                assert!(step != 0, "zero for-loop step");
                let skip = if step > 0 { init > limit } else { init < limit };
                if skip {
                    pc += insn.bx() as usize + 1;
                } else {
                    regs[a + 3] = init;
                }
            }
            FORLOOP => {
                let step = regs[a + 2];
                let next = regs[a] + step;
                let limit = regs[a + 1];
                let again = if step > 0 { next <= limit } else { next >= limit };
                if again {
                    regs[a] = next;
                    regs[a + 3] = next;
                    pc -= insn.bx() as usize;
                }
            }
            RETURN0 => return vec![],
            RETURN1 => return vec![regs[a]],
            RETURN => {
                let b = insn.b() as usize;
                assert!(b > 0, "variadic return unsupported");
                return regs[a..a + b - 1].to_vec();
            }
            NOP => {}
            VARARGPREP => {}
            op => panic!("unsupported opcode {:?} at pc {}", op, pc - 1),
        }
    }
    panic!("step limit exceeded (runaway dispatcher?)");
}

/// Conditional-test semantics: when the outcome disagrees with `k`,
/// the following instruction is skipped.
fn cond_skip(pc: &mut usize, cond: bool, k: bool) {
    if cond != k {
        *pc += 1;
    }
}

/// Arithmetic fast path: a trailing metamethod dispatch is skipped
/// when the operation succeeded.
fn mmbin_skip(code: &[Instruction], pc: usize) -> usize {
    if pc < code.len() && matches!(code[pc].opcode(), MMBIN | MMBINI | MMBINK) {
        1
    } else {
        0
    }
}

// ============================================================================
// Program construction
// ============================================================================

pub fn loadi(a: u8, v: i32) -> Instruction {
    Instruction::asbx(LOADI, a, v)
}

pub fn movr(a: u8, b: u8) -> Instruction {
    Instruction::abc(MOVE, a, b, 0, false)
}

pub fn add(a: u8, b: u8, c: u8) -> Instruction {
    Instruction::abc(ADD, a, b, c, false)
}

pub fn addi(a: u8, b: u8, imm: i32) -> Instruction {
    Instruction::abc(ADDI, a, b, (imm + OFFSET_SC) as u8, false)
}

pub fn jmp(offset: i32) -> Instruction {
    Instruction::sj_op(JMP, offset)
}

pub fn eqi(a: u8, imm: i32, k: bool) -> Instruction {
    Instruction::absk(EQI, a, imm, k)
}

pub fn lti(a: u8, imm: i32, k: bool) -> Instruction {
    Instruction::absk(LTI, a, imm, k)
}

pub fn forprep(a: u8, bx: u32) -> Instruction {
    Instruction::abx(FORPREP, a, bx)
}

pub fn forloop(a: u8, bx: u32) -> Instruction {
    Instruction::abx(FORLOOP, a, bx)
}

pub fn ret0() -> Instruction {
    Instruction::abc(RETURN0, 0, 0, 0, false)
}

pub fn ret1(a: u8) -> Instruction {
    Instruction::abc(RETURN1, a, 0, 0, false)
}

// ============================================================================
// Reference programs
// ============================================================================

/// An if/else-if cascade over the first argument, merging into a
/// shared increment.  Eight basic blocks.
pub fn cascade_proto() -> Proto {
    let code = vec![
        eqi(0, 1, false),
        jmp(2), // -> 4
        loadi(1, 10),
        jmp(9), // -> 13
        eqi(0, 2, false),
        jmp(2), // -> 8
        loadi(1, 20),
        jmp(5), // -> 13
        eqi(0, 3, false),
        jmp(2), // -> 12
        loadi(1, 30),
        jmp(1), // -> 13
        loadi(1, 40),
        addi(1, 1, 1),
        ret1(1),
    ];
    let mut p = Proto::from_code(code, 2);
    p.num_params = 1;
    p
}

/// Sum 1..n (n = first argument) with a post-loop branch: small sums
/// earn +100, larger ones +1.
pub fn sum_proto() -> Proto {
    let code = vec![
        loadi(1, 1),    // init
        movr(2, 0),     // limit = arg
        loadi(3, 1),    // step
        loadi(5, 0),    // acc
        forprep(1, 1),  // skip -> 7
        add(5, 5, 4),   // acc += control
        forloop(1, 2),  // back -> 5
        lti(5, 10, false),
        jmp(2), // -> 11
        addi(5, 5, 100),
        jmp(1), // -> 12
        addi(5, 5, 1),
        ret1(5),
    ];
    let mut p = Proto::from_code(code, 6);
    p.num_params = 1;
    p
}

/// The expected result of `sum_proto` for a given argument.
pub fn sum_expected(n: i64) -> i64 {
    let s: i64 = if n >= 1 { n * (n + 1) / 2 } else { 0 };
    if s < 10 {
        s + 100
    } else {
        s + 1
    }
}
