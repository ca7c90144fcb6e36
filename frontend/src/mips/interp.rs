//! Reference interpreter. Defines the ground truth the recompiler is
//! compared against, one function per supported opcode.

use tracing::trace;

use crate::mips::cpu::{R3051, ARITHMETIC_OVERFLOW};
use crate::mips::insn::{
    Opcode, FUNCT_ADD, FUNCT_ADDU, FUNCT_SUBU, OP_ADDIU, OP_LW, OP_REGIMM, OP_SPECIAL, OP_SW,
    REGIMM_BLTZAL,
};

/// How an instruction left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Retired,
    /// The instruction raised a guest exception; the PC already points
    /// at the exception vector.
    Exception,
}

/// Signed-overflow predicate for `x + y = result`.
#[inline]
fn overflow_add(x: u32, y: u32, result: u32) -> u32 {
    (!(x ^ y) & (x ^ result)) >> 31
}

/// Pending-load discipline for a new delayed write: an older pending
/// value destined for a *different* register commits now; a pending
/// value for the same register is discarded and replaced.
fn write_register_delayed(cpu: &mut R3051, r: u32, value: u32) {
    if cpu.load_delay_slot {
        let pending_register = cpu.load_delay_register;
        let pending_value = cpu.load_delay_value;
        if pending_register != r {
            cpu.write_register(pending_register, pending_value);
        }
        cpu.load_delay_slot = false;
    }
    cpu.load_delay_slot_next = true;
    cpu.load_delay_register = r;
    cpu.load_delay_value = value;
}

/// `rd = rs + rt`, modulo 2^32, no trap.
pub fn addu(cpu: &mut R3051, op: Opcode) {
    let s = cpu.read_register(op.rs());
    let t = cpu.read_register(op.rt());
    cpu.write_register(op.rd(), s.wrapping_add(t));
}

/// `rd = rs - rt`, modulo 2^32, no trap.
pub fn subu(cpu: &mut R3051, op: Opcode) {
    let s = cpu.read_register(op.rs());
    let t = cpu.read_register(op.rt());
    cpu.write_register(op.rd(), s.wrapping_sub(t));
}

/// `rt = rs + signext(imm)`, no trap.
pub fn addiu(cpu: &mut R3051, op: Opcode) {
    let s = cpu.read_register(op.rs());
    cpu.write_register(op.rt(), s.wrapping_add(op.imm_ext()));
}

/// `rd = rs + rt` with signed-overflow trap; `rd` is not written on
/// overflow.
pub fn add(cpu: &mut R3051, op: Opcode) -> Outcome {
    let s = cpu.read_register(op.rs());
    let t = cpu.read_register(op.rt());
    let result = s.wrapping_add(t);
    if overflow_add(s, t, result) != 0 {
        cpu.enter_exception(ARITHMETIC_OVERFLOW);
        return Outcome::Exception;
    }
    cpu.write_register(op.rd(), result);
    Outcome::Retired
}

/// `mem[rs + signext(imm)] = rt`.
pub fn sw(cpu: &mut R3051, op: Opcode) -> Outcome {
    let base = cpu.read_register(op.rs());
    let value = cpu.read_register(op.rt());
    let vaddr = base.wrapping_add(op.imm_ext());
    let store = cpu.store_word;
    if store(cpu, vaddr, value) {
        Outcome::Retired
    } else {
        Outcome::Exception
    }
}

/// `rt = mem[rs + signext(imm)]`, visible one instruction later via
/// the load-delay slot. On fault the delay state resets.
pub fn lw(cpu: &mut R3051, op: Opcode) -> Outcome {
    let base = cpu.read_register(op.rs());
    let vaddr = base.wrapping_add(op.imm_ext());
    let load = cpu.load_word;
    match load(cpu, vaddr) {
        Some(value) => {
            write_register_delayed(cpu, op.rt(), value);
            Outcome::Retired
        }
        None => {
            cpu.load_delay_register = 0;
            cpu.load_delay_slot = false;
            cpu.load_delay_slot_next = false;
            Outcome::Exception
        }
    }
}

/// Branch on less-than-zero and link: `r31 = pc + 8` unconditionally;
/// the branch-delay slot is armed when `rs` is signed-negative.
pub fn bltzal(cpu: &mut R3051, op: Opcode) {
    cpu.write_register(31, cpu.pc.wrapping_add(8));
    if (cpu.read_register(op.rs()) as i32) < 0 {
        cpu.branch_delay_slot_next = true;
        cpu.branch_target = cpu.pc.wrapping_add(4).wrapping_add(op.imm_ext() << 2);
    }
}

/// Two-level opcode dispatch. Unsupported opcodes retire as no-ops.
pub fn execute(cpu: &mut R3051, word: u32) -> Outcome {
    let op = Opcode(word);
    match op.op() {
        OP_SPECIAL => match op.funct() {
            FUNCT_ADD => add(cpu, op),
            FUNCT_ADDU => {
                addu(cpu, op);
                Outcome::Retired
            }
            FUNCT_SUBU => {
                subu(cpu, op);
                Outcome::Retired
            }
            _ => unknown(word),
        },
        OP_REGIMM => match op.rt() {
            REGIMM_BLTZAL => {
                bltzal(cpu, op);
                Outcome::Retired
            }
            _ => unknown(word),
        },
        OP_ADDIU => {
            addiu(cpu, op);
            Outcome::Retired
        }
        OP_SW => sw(cpu, op),
        OP_LW => lw(cpu, op),
        _ => unknown(word),
    }
}

fn unknown(word: u32) -> Outcome {
    trace!(word = format_args!("{word:08x}"), "unsupported opcode, retiring as no-op");
    Outcome::Retired
}

/// Execute one instruction and retire it: commit a pending load after
/// its slot instruction, advance the PC, apply an armed branch after
/// its delay slot, rotate both delay-flag pairs.
pub fn step(cpu: &mut R3051, word: u32) -> Outcome {
    let in_branch_slot = cpu.branch_delay_slot;

    if execute(cpu, word) == Outcome::Exception {
        return Outcome::Exception;
    }

    // The pending load armed before this instruction becomes visible
    // now that the slot instruction has retired. A load issued *by*
    // this instruction cleared the flag and re-armed the pair.
    if cpu.load_delay_slot {
        let r = cpu.load_delay_register;
        let v = cpu.load_delay_value;
        cpu.write_register(r, v);
        cpu.load_delay_slot = false;
    }
    cpu.load_delay_slot = cpu.load_delay_slot_next;
    cpu.load_delay_slot_next = false;

    cpu.pc = cpu.pc.wrapping_add(4);
    if in_branch_slot {
        cpu.pc = cpu.branch_target;
        cpu.branch_delay_slot = false;
    }
    cpu.branch_delay_slot = cpu.branch_delay_slot_next;
    cpu.branch_delay_slot_next = false;

    Outcome::Retired
}

/// Whether a word is a branch, i.e. arms a delay slot when executed.
fn is_branch(word: u32) -> bool {
    let op = Opcode(word);
    op.op() == OP_REGIMM && op.rt() == REGIMM_BLTZAL
}

/// Interpret a straight-line block with the same boundary rule the
/// recompiler uses: stop after the delay slot of a branch (taken or
/// not), or at the first exception.
pub fn run(cpu: &mut R3051, words: &[u32]) -> Outcome {
    let mut in_delay_slot = false;
    for &word in words {
        if step(cpu, word) == Outcome::Exception {
            return Outcome::Exception;
        }
        if in_delay_slot {
            break;
        }
        in_delay_slot = is_branch(word);
    }
    Outcome::Retired
}
