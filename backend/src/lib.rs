//! Host code generation backend: executable code buffer, labels and
//! the x86-64 instruction emitter.

pub mod code_buffer;
pub mod label;
pub mod x86_64;

pub use code_buffer::CodeBuffer;
pub use label::{CallSite, Label};
pub use x86_64::emitter::{EmitError, Emitter};
pub use x86_64::regs::Reg;
