//! Helper entry points reachable from emitted code.
//!
//! Every function here is `extern "C"` (System V AMD64) and is called
//! by generated blocks through an absolute address captured at
//! emission time. The `cpu` argument is the raw address of the guest
//! state the block was emitted against; the recompiler guarantees it
//! is live for as long as the block can run, so the functions are
//! callable from safe Rust as well (the interpreter shims double as
//! the strategy-A fallback bodies).
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use crate::mips::cpu::R3051;
use crate::mips::insn::Opcode;
use crate::mips::interp;

/// Set the guest program counter.
pub extern "C" fn write_pc(cpu: *mut R3051, pc: u32) {
    let cpu = unsafe { &mut *cpu };
    cpu.pc = pc;
}

/// Raise a guest exception (EPC from the current PC).
pub extern "C" fn enter_exception(cpu: *mut R3051, code: u32) {
    let cpu = unsafe { &mut *cpu };
    cpu.enter_exception(code);
}

/// Store a word through the guest bus. Nonzero `AL` on success.
pub extern "C" fn store_word(cpu: *mut R3051, vaddr: u32, value: u32) -> bool {
    let cpu = unsafe { &mut *cpu };
    let store = cpu.store_word;
    store(cpu, vaddr, value)
}

/// Load a word through the guest bus. `out` is written only on
/// success; nonzero `AL` on success.
pub extern "C" fn load_word(cpu: *mut R3051, vaddr: u32, out: *mut u32) -> bool {
    let cpu = unsafe { &mut *cpu };
    let load = cpu.load_word;
    match load(cpu, vaddr) {
        Some(value) => {
            unsafe { out.write(value) };
            true
        }
        None => false,
    }
}

pub extern "C" fn set_load_delay_value(cpu: *mut R3051, value: u32) {
    let cpu = unsafe { &mut *cpu };
    cpu.load_delay_value = value;
}

pub extern "C" fn set_load_delay_register(cpu: *mut R3051, r: u32) {
    let cpu = unsafe { &mut *cpu };
    cpu.load_delay_register = r;
}

pub extern "C" fn set_load_delay_slot(cpu: *mut R3051, v: u32) {
    let cpu = unsafe { &mut *cpu };
    cpu.load_delay_slot = v != 0;
}

pub extern "C" fn set_load_delay_slot_next(cpu: *mut R3051, v: u32) {
    let cpu = unsafe { &mut *cpu };
    cpu.load_delay_slot_next = v != 0;
}

// -- Strategy-A interpreter shims ------------------------------------

pub extern "C" fn interpret_addu(cpu: *mut R3051, word: u32) {
    let cpu = unsafe { &mut *cpu };
    interp::addu(cpu, Opcode(word));
}

pub extern "C" fn interpret_subu(cpu: *mut R3051, word: u32) {
    let cpu = unsafe { &mut *cpu };
    interp::subu(cpu, Opcode(word));
}

pub extern "C" fn interpret_addiu(cpu: *mut R3051, word: u32) {
    let cpu = unsafe { &mut *cpu };
    interp::addiu(cpu, Opcode(word));
}

pub extern "C" fn interpret_add(cpu: *mut R3051, word: u32) {
    let cpu = unsafe { &mut *cpu };
    interp::add(cpu, Opcode(word));
}

pub extern "C" fn interpret_sw(cpu: *mut R3051, word: u32) {
    let cpu = unsafe { &mut *cpu };
    interp::sw(cpu, Opcode(word));
}

pub extern "C" fn interpret_lw(cpu: *mut R3051, word: u32) {
    let cpu = unsafe { &mut *cpu };
    interp::lw(cpu, Opcode(word));
}

pub extern "C" fn interpret_bltzal(cpu: *mut R3051, word: u32) {
    let cpu = unsafe { &mut *cpu };
    interp::bltzal(cpu, Opcode(word));
}
