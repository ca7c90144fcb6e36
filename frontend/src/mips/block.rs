//! Block assembly: prologue and epilogue conventions plus the
//! per-instruction translate loop with delay-slot bookkeeping.

use mipsrec_backend::{EmitError, Emitter, Reg};
use thiserror::Error;

use crate::mips::cpu::R3051;
use crate::mips::helpers;
use crate::mips::trans::{self, RecompilerState, BRANCH_DECISION_OFFSET, LOAD_DELAY_VALUE_OFFSET};

/// Bytes reserved below `RBP` for the load-delay value slot and the
/// branch decision slot. A 16-byte multiple, so `RSP` stays 16-byte
/// aligned at every emitted `CALL`.
pub const FRAME_RESERVE: u8 = 0x10;

#[derive(Debug, Error)]
pub enum TranslateError {
    /// The opcode sequence ends with a branch whose delay slot
    /// instruction is missing; the driver must include it.
    #[error("block ends with an armed branch but no delay slot instruction")]
    OpenBranchDelay,
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Block prologue: establish the `RBP` frame, mark the branch
/// decision taken, and spill the guest's in-flight load-delay value
/// into its stack slot.
fn emit_prologue(em: &mut Emitter, cpu: &R3051) {
    em.push_r64(Reg::Rbp);
    em.mov_r64_r64(Reg::Rbp, Reg::Rsp);
    em.sub_r64_imm8(Reg::Rsp, FRAME_RESERVE);

    em.mov_r32_imm32(Reg::Rax, 1);
    em.mov_disp8_r32(Reg::Rbp, BRANCH_DECISION_OFFSET, Reg::Rax);

    em.mov_r32_imm32(Reg::Rax, cpu.load_delay_value);
    em.mov_disp8_r32(Reg::Rbp, LOAD_DELAY_VALUE_OFFSET, Reg::Rax);
}

/// Block epilogue: resolve the final guest PC, write the load-delay
/// quadruple back to the guest, and tear down the frame.
fn emit_epilogue(em: &mut Emitter, cpu: &R3051, state: &RecompilerState) {
    if state.branch_delay_slot {
        let mut not_taken = em.new_label();
        let mut done = em.new_label();
        em.mov_r32_disp8(Reg::Rax, Reg::Rbp, BRANCH_DECISION_OFFSET);
        em.cmp_r32_imm8(Reg::Rax, 1);
        em.jne(&not_taken);
        trans::call_interpreter(em, helpers::write_pc as usize, cpu, state.branch_target);
        em.jmp(&done);
        em.bind(&mut not_taken);
        trans::call_interpreter(em, helpers::write_pc as usize, cpu, state.pc);
        em.bind(&mut done);
    } else {
        trans::call_interpreter(em, helpers::write_pc as usize, cpu, state.pc);
    }

    trans::call_set_load_delay_value(em, cpu, LOAD_DELAY_VALUE_OFFSET);
    trans::call_interpreter(
        em,
        helpers::set_load_delay_register as usize,
        cpu,
        state.load_delay_register,
    );
    trans::call_interpreter(
        em,
        helpers::set_load_delay_slot_next as usize,
        cpu,
        state.load_delay_slot_next as u32,
    );
    trans::call_interpreter(
        em,
        helpers::set_load_delay_slot as usize,
        cpu,
        state.load_delay_slot as u32,
    );

    em.add_r64_imm8(Reg::Rsp, FRAME_RESERVE);
    em.mov_r64_r64(Reg::Rsp, Reg::Rbp);
    em.pop_r64(Reg::Rbp);
    em.ret();
}

/// Translate a block of guest instructions into the emitter.
///
/// Emission stops after the delay slot of a branch; trailing opcodes
/// are ignored. A pending load commits at the following instruction,
/// and the block always leaves the guest PC and load-delay state
/// consistent on return. Returns the number of guest instructions
/// consumed.
pub fn translate_block(
    em: &mut Emitter,
    cpu: &mut R3051,
    state: &mut RecompilerState,
    words: &[u32],
) -> Result<usize, TranslateError> {
    emit_prologue(em, cpu);

    let mut consumed = 0;
    for &word in words {
        trans::emit(state, em, cpu, word);
        consumed += 1;
        state.pc = state.pc.wrapping_add(4);

        // The instruction in the load-delay slot has been emitted;
        // its retirement makes the pending value visible.
        if state.load_delay_slot {
            trans::write_guest_register_from_stack(
                em,
                cpu,
                state.load_delay_register,
                LOAD_DELAY_VALUE_OFFSET,
            );
        }
        state.load_delay_slot = state.load_delay_slot_next;
        state.load_delay_slot_next = false;

        // The delay slot of a branch ends the block.
        if state.branch_delay_slot {
            break;
        }
        state.branch_delay_slot = state.branch_delay_slot_next;
        state.branch_delay_slot_next = false;
    }

    if state.branch_delay_slot_next {
        return Err(TranslateError::OpenBranchDelay);
    }

    emit_epilogue(em, cpu, state);
    em.finish()?;
    Ok(consumed)
}
