//! Execution driver: translate a block, flip the buffer executable,
//! transfer control, repeat at the new PC.

pub mod run;

use std::fmt;
use std::io;

use thiserror::Error;

use mipsrec_frontend::mips::TranslateError;

pub use run::{run_block, run_program, BlockInfo, ExitReason};

#[derive(Debug, Error)]
pub enum ExecError {
    /// Code buffer allocation or protection failed. Fatal.
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

/// Counters for the translate/execute cycle.
#[derive(Debug, Default, Clone)]
pub struct ExecStats {
    pub blocks: u64,
    pub guest_insns: u64,
    pub host_bytes: u64,
}

impl fmt::Display for ExecStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "blocks translated: {}", self.blocks)?;
        writeln!(f, "guest insns:       {}", self.guest_insns)?;
        write!(f, "host bytes:        {}", self.host_bytes)
    }
}
