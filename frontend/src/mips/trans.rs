//! Per-opcode recompilation: MIPS guest instructions to x86-64 host
//! code.
//!
//! Three emission strategies coexist. Helper calls marshal `(cpu,
//! arg)` into `(RDI, RSI)` and `CALL` an interpreter routine; the
//! absolute variant reads and writes single guest registers through
//! 64-bit moffs forms; the production inline bodies materialize the
//! register-file base once in `RDX` and touch each register at
//! `[RDX + 4*reg]`.

use mipsrec_backend::{Emitter, Reg};
use tracing::trace;

use crate::mips::address_of;
use crate::mips::cpu::{R3051, ARITHMETIC_OVERFLOW};
use crate::mips::helpers;
use crate::mips::insn::{
    Opcode, FUNCT_ADD, FUNCT_ADDU, FUNCT_SUBU, OP_ADDIU, OP_LW, OP_REGIMM, OP_SPECIAL, OP_SW,
    REGIMM_BLTZAL,
};

/// Bytes per guest register in the register file.
const GPR_SIZE: u32 = 4;

/// Stack slot holding the in-flight load-delay value.
pub const LOAD_DELAY_VALUE_OFFSET: i8 = -4;
/// Stack slot holding the branch decision. Initialized to 1 by the
/// block prologue; branch emitters only ever clear it.
pub const BRANCH_DECISION_OFFSET: i8 = -8;

/// Displacement of guest register `r` from the register-file base.
#[inline]
fn gpr_disp(r: u32) -> i8 {
    (r * GPR_SIZE) as i8
}

/// Emit-time mirror of the guest pipeline: the block PC, the pending
/// branch, and the load-delay pair the generated code will produce.
/// Distinct from [`R3051`] — this tracks what the emitted code will
/// do, not runtime values.
#[derive(Debug, Clone)]
pub struct RecompilerState {
    pub pc: u32,
    pub branch_delay_slot: bool,
    pub branch_delay_slot_next: bool,
    pub branch_target: u32,
    pub load_delay_slot: bool,
    pub load_delay_slot_next: bool,
    pub load_delay_register: u32,
}

impl RecompilerState {
    pub fn new(pc: u32) -> Self {
        Self {
            pc,
            branch_delay_slot: false,
            branch_delay_slot_next: false,
            branch_target: 0,
            load_delay_slot: false,
            load_delay_slot_next: false,
            load_delay_register: 0,
        }
    }

    /// Seed from live guest state, so a block may begin inside the
    /// load-delay slot of a load run before it.
    pub fn from_cpu(cpu: &R3051) -> Self {
        let mut state = Self::new(cpu.pc);
        state.load_delay_slot = cpu.load_delay_slot;
        state.load_delay_slot_next = cpu.load_delay_slot_next;
        state.load_delay_register = cpu.load_delay_register;
        state
    }
}

/// Strategy A: marshal `(cpu, arg)` into `(RDI, RSI)` and call a
/// helper or interpreter routine at an absolute host address.
pub fn call_interpreter(em: &mut Emitter, function: usize, cpu: &R3051, arg: u32) {
    em.mov_r64_imm64(Reg::Rdi, address_of(cpu) as u64);
    em.mov_r32_imm32(Reg::Rsi, arg);
    em.call(function);
}

/// Commit the stack-held load-delay value to guest register `r`.
pub(crate) fn write_guest_register_from_stack(em: &mut Emitter, cpu: &R3051, r: u32, slot: i8) {
    em.mov_r32_disp8(Reg::Rax, Reg::Rbp, slot);
    em.mov_r64_imm64(Reg::Rcx, cpu.register_address(0) as u64);
    em.mov_disp8_r32(Reg::Rcx, gpr_disp(r), Reg::Rax);
}

/// `SetLoadDelayValue(cpu, [rbp + slot])`.
pub(crate) fn call_set_load_delay_value(em: &mut Emitter, cpu: &R3051, slot: i8) {
    em.mov_r64_imm64(Reg::Rdi, address_of(cpu) as u64);
    em.mov_r32_disp8(Reg::Rsi, Reg::Rbp, slot);
    em.call(helpers::set_load_delay_value as usize);
}

/// Early block exit: unwind the frame and return to the driver.
/// `MOV RSP, RBP` covers the frame reserve, so no explicit `ADD`.
fn emit_block_exit(em: &mut Emitter) {
    em.mov_r64_r64(Reg::Rsp, Reg::Rbp);
    em.pop_r64(Reg::Rbp);
    em.ret();
}

/// `rd = rs + rt` (no trap), inlined against the register file.
fn emit_addu(em: &mut Emitter, cpu: &R3051, op: Opcode) {
    em.mov_r64_imm64(Reg::Rdx, cpu.register_address(0) as u64);
    em.mov_r32_disp8(Reg::Rax, Reg::Rdx, gpr_disp(op.rs()));
    em.mov_r32_disp8(Reg::Rcx, Reg::Rdx, gpr_disp(op.rt()));
    em.add_r32_r32(Reg::Rax, Reg::Rcx);
    em.mov_disp8_r32(Reg::Rdx, gpr_disp(op.rd()), Reg::Rax);
}

/// `rd = rs - rt` (no trap).
fn emit_subu(em: &mut Emitter, cpu: &R3051, op: Opcode) {
    em.mov_r64_imm64(Reg::Rdx, cpu.register_address(0) as u64);
    em.mov_r32_disp8(Reg::Rax, Reg::Rdx, gpr_disp(op.rs()));
    em.mov_r32_disp8(Reg::Rcx, Reg::Rdx, gpr_disp(op.rt()));
    em.sub_r32_r32(Reg::Rax, Reg::Rcx);
    em.mov_disp8_r32(Reg::Rdx, gpr_disp(op.rd()), Reg::Rax);
}

/// `rt = rs + signext(imm)` (no trap).
fn emit_addiu(em: &mut Emitter, cpu: &R3051, op: Opcode) {
    em.mov_r64_imm64(Reg::Rdx, cpu.register_address(0) as u64);
    em.mov_r32_disp8(Reg::Rax, Reg::Rdx, gpr_disp(op.rs()));
    em.add_r32_imm32(Reg::Rax, op.imm_ext());
    em.mov_disp8_r32(Reg::Rdx, gpr_disp(op.rt()), Reg::Rax);
}

/// `rd = rs + rt` variant that reaches each register through a 64-bit
/// absolute address instead of a shared base register.
pub fn emit_addu_abs(em: &mut Emitter, cpu: &R3051, op: Opcode) {
    em.mov_eax_abs(cpu.register_address(op.rs()));
    em.mov_r32_r32(Reg::Rcx, Reg::Rax);
    em.mov_eax_abs(cpu.register_address(op.rt()));
    em.add_r32_r32(Reg::Rax, Reg::Rcx);
    em.mov_abs_eax(cpu.register_address(op.rd()));
}

/// `rd = rs + rt` with the signed-overflow trap. The overflow path
/// reports the instruction's guest PC, enters the exception and
/// leaves the block without writing `rd`.
fn emit_add(state: &RecompilerState, em: &mut Emitter, cpu: &R3051, op: Opcode) {
    let mut no_overflow = em.new_label();
    em.mov_r64_imm64(Reg::Rdx, cpu.register_address(0) as u64);
    em.mov_r32_disp8(Reg::Rax, Reg::Rdx, gpr_disp(op.rs()));
    em.mov_r32_disp8(Reg::Rcx, Reg::Rdx, gpr_disp(op.rt()));
    em.add_r32_r32(Reg::Rax, Reg::Rcx);
    em.jno(&no_overflow);
    call_interpreter(em, helpers::write_pc as usize, cpu, state.pc);
    call_interpreter(em, helpers::enter_exception as usize, cpu, ARITHMETIC_OVERFLOW);
    emit_block_exit(em);
    em.bind(&mut no_overflow);
    em.mov_disp8_r32(Reg::Rdx, gpr_disp(op.rd()), Reg::Rax);
}

/// `mem[rs + signext(imm)] = rt`. The guest PC is written first so a
/// fault reports the right instruction; a `false` return from the bus
/// exits the block.
fn emit_sw(state: &RecompilerState, em: &mut Emitter, cpu: &R3051, op: Opcode) {
    let mut resume = em.new_label();
    call_interpreter(em, helpers::write_pc as usize, cpu, state.pc);
    em.mov_r64_imm64(Reg::Rdi, address_of(cpu) as u64);
    em.mov_r64_imm64(Reg::Rdx, cpu.register_address(0) as u64);
    em.mov_r32_disp8(Reg::Rsi, Reg::Rdx, gpr_disp(op.rs()));
    em.add_r32_imm32(Reg::Rsi, op.imm_ext());
    em.mov_r32_disp8(Reg::Rdx, Reg::Rdx, gpr_disp(op.rt()));
    em.call(helpers::store_word as usize);
    em.test_al_imm8(1);
    em.jne(&resume);
    emit_block_exit(em);
    em.bind(&mut resume);
}

/// `rt = mem[rs + signext(imm)]` through the load-delay slot. The
/// loaded value lands in the `[RBP-4]` stack slot; the commit to `rt`
/// is emitted by the block loop one instruction later. On fault the
/// architectural delay state is reset before leaving the block.
fn emit_lw(state: &mut RecompilerState, em: &mut Emitter, cpu: &R3051, op: Opcode) {
    let mut resume = em.new_label();
    let rt = op.rt();

    // A pending load from a previous instruction commits now, unless
    // this load replaces it.
    if state.load_delay_slot {
        let pending = state.load_delay_register;
        if rt != pending {
            write_guest_register_from_stack(em, cpu, pending, LOAD_DELAY_VALUE_OFFSET);
        }
        state.load_delay_slot = false;
    }

    call_interpreter(em, helpers::write_pc as usize, cpu, state.pc);
    em.mov_r64_imm64(Reg::Rdi, address_of(cpu) as u64);
    em.mov_r64_imm64(Reg::Rsi, cpu.register_address(0) as u64);
    em.mov_r32_disp8(Reg::Rsi, Reg::Rsi, gpr_disp(op.rs()));
    em.add_r32_imm32(Reg::Rsi, op.imm_ext());
    em.lea_r64_disp8(Reg::Rdx, Reg::Rbp, LOAD_DELAY_VALUE_OFFSET);
    em.call(helpers::load_word as usize);
    em.test_al_imm8(1);
    em.jne(&resume);
    call_set_load_delay_value(em, cpu, LOAD_DELAY_VALUE_OFFSET);
    call_interpreter(em, helpers::set_load_delay_register as usize, cpu, 0);
    call_interpreter(em, helpers::set_load_delay_slot_next as usize, cpu, 0);
    call_interpreter(em, helpers::set_load_delay_slot as usize, cpu, 0);
    emit_block_exit(em);
    em.bind(&mut resume);

    state.load_delay_slot_next = true;
    state.load_delay_register = rt;
}

/// Branch on less-than-zero and link. The link register is written
/// unconditionally; the branch decision slot `[RBP-8]` stays 1 when
/// `rs` is negative and is cleared otherwise. The block epilogue
/// resolves the final PC from the slot.
fn emit_bltzal(state: &mut RecompilerState, em: &mut Emitter, cpu: &R3051, op: Opcode) {
    let offset = op.imm_ext() << 2;

    em.mov_r64_imm64(Reg::Rdx, cpu.register_address(0) as u64);

    // r31 = pc + 8, taken or not.
    em.mov_r32_imm32(Reg::Rax, state.pc.wrapping_add(8));
    em.mov_disp8_r32(Reg::Rdx, gpr_disp(31), Reg::Rax);

    em.mov_r32_disp8(Reg::Rax, Reg::Rdx, gpr_disp(op.rs()));
    em.cmp_r32_imm8(Reg::Rax, 0);

    let mut keep = em.new_label();
    em.js(&keep);
    em.mov_r32_imm32(Reg::Rax, 0);
    em.mov_disp8_r32(Reg::Rbp, BRANCH_DECISION_OFFSET, Reg::Rax);
    em.bind(&mut keep);

    state.branch_delay_slot_next = true;
    state.branch_target = state.pc.wrapping_add(4).wrapping_add(offset);
}

/// Two-level dispatch on `op`, `funct` and the regimm `rt` group.
/// Unsupported opcodes emit nothing.
pub fn emit(state: &mut RecompilerState, em: &mut Emitter, cpu: &R3051, word: u32) {
    let op = Opcode(word);
    match op.op() {
        OP_SPECIAL => match op.funct() {
            FUNCT_ADD => emit_add(state, em, cpu, op),
            FUNCT_ADDU => emit_addu(em, cpu, op),
            FUNCT_SUBU => emit_subu(em, cpu, op),
            _ => unsupported(word),
        },
        OP_REGIMM => match op.rt() {
            REGIMM_BLTZAL => emit_bltzal(state, em, cpu, op),
            _ => unsupported(word),
        },
        OP_ADDIU => emit_addiu(em, cpu, op),
        OP_SW => emit_sw(state, em, cpu, op),
        OP_LW => emit_lw(state, em, cpu, op),
        _ => unsupported(word),
    }
}

fn unsupported(word: u32) {
    trace!(word = format_args!("{word:08x}"), "unsupported opcode, emitting nothing");
}
