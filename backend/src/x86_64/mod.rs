pub mod emitter;
pub mod regs;

pub use emitter::{EmitError, Emitter};
pub use regs::Reg;
