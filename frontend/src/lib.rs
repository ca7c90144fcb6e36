//! MIPS R3051 guest frontend: architectural state, the reference
//! interpreter, and the per-opcode recompiler.

pub mod mips;
