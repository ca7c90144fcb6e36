//! End-to-end block scenarios: emit real host code, execute it, check
//! the guest state it leaves behind.

use std::cell::{Cell, RefCell};

use mipsrec_backend::{CodeBuffer, Emitter, Reg};
use mipsrec_exec::{run_block, run_program, ExecError, ExecStats, ExitReason};
use mipsrec_frontend::mips::cpu::{BOOT_EXCEPTION_VECTOR, CAUSE, EPC};
use mipsrec_frontend::mips::{
    helpers, interp, translate_block, trans, Opcode, R3051, RecompilerState, TranslateError,
};

const NOP: u32 = 0x00000000;

// -- S1: ADDU/SUBU, production strategy ------------------------------

#[test]
fn s1_addu_subu() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(1, 100);
    cpu.write_register(2, 72);
    cpu.write_register(4, 99);
    cpu.write_register(5, 77);

    run_block(&mut cpu, &[0x00221821, 0x00853023]).unwrap();

    assert_eq!(cpu.read_register(3), 172);
    assert_eq!(cpu.read_register(6), 22);
}

// -- S1 again through the two alternative strategies -----------------

#[test]
fn s1_via_interpreter_calls() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(1, 100);
    cpu.write_register(2, 72);
    cpu.write_register(4, 99);
    cpu.write_register(5, 77);

    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut em = Emitter::new(&mut buf);
    em.push_r64(Reg::Rbp);
    em.mov_r64_r64(Reg::Rbp, Reg::Rsp);
    trans::call_interpreter(&mut em, helpers::interpret_addu as usize, &cpu, 0x00221821);
    trans::call_interpreter(&mut em, helpers::interpret_subu as usize, &cpu, 0x00853023);
    em.mov_r64_r64(Reg::Rsp, Reg::Rbp);
    em.pop_r64(Reg::Rbp);
    em.ret();
    em.finish().unwrap();

    buf.protect().unwrap();
    unsafe { buf.call() };

    assert_eq!(cpu.read_register(3), 172);
    assert_eq!(cpu.read_register(6), 22);
}

#[test]
fn s1_via_absolute_addressing() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(1, 100);
    cpu.write_register(2, 72);

    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut em = Emitter::new(&mut buf);
    trans::emit_addu_abs(&mut em, &cpu, Opcode(0x00221821));
    em.ret();
    em.finish().unwrap();

    buf.protect().unwrap();
    unsafe { buf.call() };

    assert_eq!(cpu.read_register(3), 172);
}

// -- S2: ADDIU -------------------------------------------------------

#[test]
fn s2_addiu() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(10, 8900);

    run_block(&mut cpu, &[0x254B07D0]).unwrap();

    assert_eq!(cpu.read_register(11), 10900);
}

// -- S3: ADD overflow ------------------------------------------------

#[test]
fn s3_add_overflow() {
    let mut cpu = Box::new(R3051::new());
    cpu.pc = 0xBADC_0FFE;
    cpu.write_register(1, 0x4000_0000);
    cpu.write_register(2, 0x4000_0000);

    run_block(&mut cpu, &[0x00221820]).unwrap();

    assert_eq!(cpu.read_register(3), 0, "rd not written on overflow");
    assert_eq!(cpu.cop0.read_register(EPC), 0xBADC_0FFE);
    assert_eq!(cpu.cop0.read_register(CAUSE) & 0x7C, 12 << 2);
    assert_eq!(cpu.pc, BOOT_EXCEPTION_VECTOR);
}

#[test]
fn add_overflow_skips_rest_of_block() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(1, 0x4000_0000);
    cpu.write_register(2, 0x4000_0000);
    cpu.write_register(10, 5);

    // ADD r3, r1, r2 (overflows); ADDIU r11, r10, 2000
    run_block(&mut cpu, &[0x00221820, 0x254B07D0]).unwrap();

    assert_eq!(cpu.read_register(11), 0);
    assert_eq!(cpu.pc, BOOT_EXCEPTION_VECTOR);
}

// -- S4: SW ----------------------------------------------------------

thread_local! {
    static STORES: RefCell<Vec<(u32, u32)>> = const { RefCell::new(Vec::new()) };
}

fn store_recording(_cpu: &mut R3051, vaddr: u32, value: u32) -> bool {
    STORES.with(|s| s.borrow_mut().push((vaddr, value)));
    true
}

fn store_faulting(_cpu: &mut R3051, _vaddr: u32, _value: u32) -> bool {
    false
}

#[test]
fn s4_sw() {
    STORES.with(|s| s.borrow_mut().clear());

    let mut cpu = Box::new(R3051::new());
    cpu.store_word = store_recording;
    cpu.write_register(1, 0x20);
    cpu.write_register(2, 0x70);

    run_block(&mut cpu, &[0xAC220040]).unwrap();

    STORES.with(|s| assert_eq!(s.borrow().as_slice(), &[(0x60, 0x70)]));
}

#[test]
fn sw_fault_exits_block() {
    let mut cpu = Box::new(R3051::new());
    cpu.store_word = store_faulting;
    cpu.write_register(10, 5);
    let pc = cpu.pc;

    // SW r2, 64(r1) (faults); ADDIU r11, r10, 2000
    run_block(&mut cpu, &[0xAC220040, 0x254B07D0]).unwrap();

    assert_eq!(cpu.read_register(11), 0, "insn after fault must not run");
    assert_eq!(cpu.pc, pc, "faulting instruction's pc reported");
}

// -- S5: LW and the load-delay slot ----------------------------------

fn load_patterned(_cpu: &mut R3051, vaddr: u32) -> Option<u32> {
    Some(vaddr ^ 0x5A5A_0000)
}

fn load_faulting(_cpu: &mut R3051, _vaddr: u32) -> Option<u32> {
    None
}

#[test]
fn s5_lw_delay() {
    let mut cpu = Box::new(R3051::new());
    cpu.load_word = load_patterned;
    cpu.write_register(1, 0x20);
    cpu.write_register(2, 0x70);

    // LW r1, 64(r2); NOP
    run_block(&mut cpu, &[0x8C410040, NOP]).unwrap();

    assert_eq!(cpu.read_register(1), 0xB0 ^ 0x5A5A_0000);
    assert!(!cpu.load_delay_slot);
    assert!(!cpu.load_delay_slot_next);
}

#[test]
fn lw_value_invisible_to_slot_instruction() {
    let mut cpu = Box::new(R3051::new());
    cpu.load_word = load_patterned;
    cpu.write_register(1, 0x1111);
    cpu.write_register(2, 0x20);

    // LW r1, 64(r2); ADDU r3, r1, r0 — the ADDU reads the old r1.
    run_block(&mut cpu, &[0x8C410040, 0x00201821]).unwrap();

    assert_eq!(cpu.read_register(3), 0x1111);
    assert_eq!(cpu.read_register(1), 0x60 ^ 0x5A5A_0000);
}

#[test]
fn lw_same_register_discards_pending() {
    let mut cpu = Box::new(R3051::new());
    cpu.load_word = load_patterned;
    cpu.write_register(2, 0x20);

    // LW r1, 64(r2); LW r1, 68(r2); NOP
    run_block(&mut cpu, &[0x8C410040, 0x8C410044, NOP]).unwrap();

    assert_eq!(cpu.read_register(1), 0x64 ^ 0x5A5A_0000);
}

#[test]
fn lw_fault_exits_and_resets_delay_state() {
    let mut cpu = Box::new(R3051::new());
    cpu.load_word = load_faulting;
    cpu.write_register(2, 0x20);
    cpu.write_register(10, 5);
    let pc = cpu.pc;

    // LW r1, 64(r2) (faults); ADDIU r11, r10, 2000
    run_block(&mut cpu, &[0x8C410040, 0x254B07D0]).unwrap();

    assert_eq!(cpu.read_register(11), 0);
    assert_eq!(cpu.read_register(1), 0);
    assert_eq!(cpu.pc, pc);
    assert!(!cpu.load_delay_slot);
    assert!(!cpu.load_delay_slot_next);
    assert_eq!(cpu.load_delay_register, 0);
}

#[test]
fn block_may_begin_inside_load_delay_slot() {
    // First block ends with the load still pending; the second block
    // commits it at its first instruction.
    let mut cpu = Box::new(R3051::new());
    cpu.load_word = load_patterned;
    cpu.write_register(1, 0x1111);
    cpu.write_register(2, 0x20);

    run_block(&mut cpu, &[0x8C410040]).unwrap();
    assert!(cpu.load_delay_slot);
    assert_eq!(cpu.read_register(1), 0x1111, "still pending between blocks");

    // ADDU r3, r1, r0 in the slot, then the commit.
    run_block(&mut cpu, &[0x00201821]).unwrap();
    assert_eq!(cpu.read_register(3), 0x1111);
    assert_eq!(cpu.read_register(1), 0x60 ^ 0x5A5A_0000);
    assert!(!cpu.load_delay_slot);
}

// -- S6: BLTZAL ------------------------------------------------------

#[test]
fn s6_bltzal_not_taken() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(8, 1);
    let pc = cpu.pc;

    run_block(&mut cpu, &[0x0510001E, NOP]).unwrap();

    assert_eq!(cpu.read_register(31), pc.wrapping_add(8));
    assert_eq!(cpu.pc, pc.wrapping_add(8));
}

#[test]
fn bltzal_taken() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(8, 0x8000_0000);
    cpu.write_register(10, 40);
    let pc = cpu.pc;

    // BLTZAL r8, 0x1E; ADDIU r11, r10, 2000 in the delay slot.
    run_block(&mut cpu, &[0x0510001E, 0x254B07D0]).unwrap();

    assert_eq!(cpu.read_register(31), pc.wrapping_add(8));
    assert_eq!(cpu.read_register(11), 2040, "delay slot executed");
    assert_eq!(cpu.pc, pc.wrapping_add(4).wrapping_add(0x1E << 2));
}

#[test]
fn branch_ends_block_even_when_not_taken() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(8, 1);
    cpu.write_register(10, 5);
    let pc = cpu.pc;

    // The ADDIU after the delay slot belongs to the next block.
    run_block(&mut cpu, &[0x0510001E, NOP, 0x254B07D0]).unwrap();

    assert_eq!(cpu.read_register(11), 0);
    assert_eq!(cpu.pc, pc.wrapping_add(8));
}

#[test]
fn branch_without_delay_slot_is_refused() {
    let mut cpu = Box::new(R3051::new());
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut em = Emitter::new(&mut buf);
    let mut state = RecompilerState::from_cpu(&cpu);

    let result = translate_block(&mut em, &mut cpu, &mut state, &[0x0510001E]);
    assert!(matches!(result, Err(TranslateError::OpenBranchDelay)));
}

// -- Stack alignment -------------------------------------------------

thread_local! {
    static RSP_MOD_16: Cell<u64> = const { Cell::new(u64::MAX) };
}

extern "C" fn record_rsp(rsp: u64) {
    RSP_MOD_16.with(|c| c.set(rsp % 16));
}

#[test]
fn rsp_aligned_at_emitted_call() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let mut em = Emitter::new(&mut buf);

    // The block frame: entry pushes the return address (rsp ≡ 8),
    // push rbp and the 16-byte reserve keep call sites at ≡ 0.
    em.push_r64(Reg::Rbp);
    em.mov_r64_r64(Reg::Rbp, Reg::Rsp);
    em.sub_r64_imm8(Reg::Rsp, 0x10);
    em.mov_r64_r64(Reg::Rdi, Reg::Rsp);
    em.call(record_rsp as usize);
    em.add_r64_imm8(Reg::Rsp, 0x10);
    em.mov_r64_r64(Reg::Rsp, Reg::Rbp);
    em.pop_r64(Reg::Rbp);
    em.ret();
    em.finish().unwrap();

    buf.protect().unwrap();
    unsafe { buf.call() };

    assert_eq!(RSP_MOD_16.with(|c| c.get()), 0);
}

// -- Interpreter/recompiler agreement across an entire program -------

#[test]
fn run_program_follows_branches() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(8, 0x8000_0000);
    cpu.write_register(12, 30);
    let base = cpu.pc;

    let program = [
        0x05100002, // BLTZAL r8, +2  -> target = base + 12
        NOP,        // delay slot
        0x254B0457, // ADDIU r11, r10, 1111 (skipped by the branch)
        0x258D0007, // ADDIU r13, r12, 7
    ];

    let mut stats = ExecStats::default();
    let exit = run_program(&mut cpu, base, &program, 16, &mut stats).unwrap();

    assert_eq!(exit, ExitReason::LeftProgram(base.wrapping_add(16)));
    assert_eq!(cpu.read_register(31), base.wrapping_add(8));
    assert_eq!(cpu.read_register(11), 0, "branched over");
    assert_eq!(cpu.read_register(13), 37);
    assert_eq!(stats.blocks, 2);
    assert_eq!(stats.guest_insns, 3);
}

#[test]
fn run_program_honors_block_limit() {
    let mut cpu = Box::new(R3051::new());
    cpu.write_register(8, 0x8000_0000);
    let base = cpu.pc;

    // BLTZAL r8, -1 branches back to itself forever.
    let program = [0x0510FFFF, NOP];

    let mut stats = ExecStats::default();
    let exit = run_program(&mut cpu, base, &program, 5, &mut stats).unwrap();

    assert_eq!(exit, ExitReason::BlockLimit);
    assert_eq!(stats.blocks, 5);
}

#[test]
fn program_and_interpreter_agree() {
    let program = [
        0x254B07D0, // ADDIU r11, r10, 2000
        0x016C1821, // ADDU r3, r11, r12
        0x0510001E, // BLTZAL r8, 0x1E (not taken)
        0x00601020, // ADD r2, r3, r0 (delay slot)
    ];

    let mut jit_cpu = Box::new(R3051::new());
    let mut interp_cpu = Box::new(R3051::new());
    for cpu in [&mut jit_cpu, &mut interp_cpu] {
        cpu.write_register(10, 1);
        cpu.write_register(12, 9);
        cpu.write_register(8, 7);
    }
    let base = jit_cpu.pc;

    let mut stats = ExecStats::default();
    run_program(&mut jit_cpu, base, &program, 16, &mut stats).unwrap();
    interp::run(&mut interp_cpu, &program);

    assert_eq!(jit_cpu.registers, interp_cpu.registers);
    assert_eq!(jit_cpu.pc, interp_cpu.pc);
}

// -- Error plumbing --------------------------------------------------

#[test]
fn translate_error_surfaces_through_exec() {
    fn expect_translate_error(result: Result<mipsrec_exec::BlockInfo, ExecError>) {
        match result {
            Err(ExecError::Translate(TranslateError::OpenBranchDelay)) => {}
            other => panic!("expected OpenBranchDelay, got {other:?}"),
        }
    }

    let mut cpu = Box::new(R3051::new());
    expect_translate_error(run_block(&mut cpu, &[0x0510001E]));
}
