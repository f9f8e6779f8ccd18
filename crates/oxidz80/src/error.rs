use thiserror::Error;

use crate::decode::Table;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    /// Byte with no behavior in its table. Soft: execution continues after it.
    #[error("unknown opcode {opcode:#04X} in {table} table at {address:#06X}")]
    UnknownOpcode { table: Table, opcode: u8, address: u16 },
    #[error("invalid interrupt mode {0} (expected 0, 1 or 2)")]
    InvalidInterruptMode(u8),
    #[error("unknown register name {0:?}")]
    UnknownRegister(String),
}
