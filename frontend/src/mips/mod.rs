pub mod block;
pub mod cpu;
pub mod helpers;
pub mod insn;
pub mod interp;
pub mod trans;

pub use block::{translate_block, TranslateError};
pub use cpu::{Cop0, R3051, ARITHMETIC_OVERFLOW};
pub use insn::Opcode;
pub use trans::RecompilerState;

/// Host address of a value, for baking into emitted code.
///
/// The referent must stay at this address for as long as any code
/// buffer holding the address may run.
#[inline]
pub fn address_of<T>(value: &T) -> usize {
    value as *const T as usize
}
