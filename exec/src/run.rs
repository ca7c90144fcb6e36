use tracing::debug;

use mipsrec_backend::{CodeBuffer, Emitter};
use mipsrec_frontend::mips::{translate_block, R3051, RecompilerState};

use crate::{ExecError, ExecStats};

/// Worst-case host bytes for one guest instruction (an `LW` with its
/// fault path and far helper calls is the widest).
const HOST_BYTES_PER_INSN: usize = 256;
/// Prologue, epilogue and slack.
const BLOCK_OVERHEAD: usize = 512;

fn block_buffer_size(guest_insns: usize) -> usize {
    BLOCK_OVERHEAD + guest_insns * HOST_BYTES_PER_INSN
}

/// Sizes of a translated and executed block.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub guest_insns: usize,
    pub host_bytes: usize,
}

/// Why [`run_program`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The guest PC left the program window (this includes exception
    /// entry at the boot vector).
    LeftProgram(u32),
    /// The block limit was reached.
    BlockLimit,
}

/// Translate one block against the live guest state and execute it.
///
/// Translation and execution are back-to-back on purpose: emitted
/// code bakes in absolute guest addresses and the current load-delay
/// value, so a block is only valid against the state it was emitted
/// for. There is deliberately no block cache.
pub fn run_block(cpu: &mut R3051, words: &[u32]) -> Result<BlockInfo, ExecError> {
    let mut buf = CodeBuffer::new(block_buffer_size(words.len()))?;
    let mut em = Emitter::new(&mut buf);
    let mut state = RecompilerState::from_cpu(cpu);
    let pc = state.pc;

    let guest_insns = translate_block(&mut em, cpu, &mut state, words)?;
    let host_bytes = buf.position();
    debug!(
        pc = format_args!("{pc:08x}"),
        guest_insns, host_bytes, "translated block"
    );

    buf.protect()?;
    // SAFETY: the buffer holds one complete block emitted above, and
    // `cpu` is borrowed for the duration of the call.
    unsafe { buf.call() };

    Ok(BlockInfo {
        guest_insns,
        host_bytes,
    })
}

/// Drive a guest program: fetch the opcode window at the current PC,
/// run a block, loop at the PC the block left behind.
pub fn run_program(
    cpu: &mut R3051,
    base_pc: u32,
    words: &[u32],
    max_blocks: u64,
    stats: &mut ExecStats,
) -> Result<ExitReason, ExecError> {
    loop {
        if stats.blocks >= max_blocks {
            return Ok(ExitReason::BlockLimit);
        }

        let pc = cpu.pc;
        let offset = pc.wrapping_sub(base_pc);
        if offset % 4 != 0 || (offset / 4) as usize >= words.len() {
            return Ok(ExitReason::LeftProgram(pc));
        }

        let info = run_block(cpu, &words[(offset / 4) as usize..])?;
        stats.blocks += 1;
        stats.guest_insns += info.guest_insns as u64;
        stats.host_bytes += info.host_bytes as u64;
    }
}
