//! Zilog Z80 core.
//!
//! Documented and undocumented instructions, exact flags (X3/X5 and the
//! MEMPTR leak included) and T-state accounting per memory, port and
//! internal cycle, all charged through the host [`Bus`](oxide_core::Bus).
//!
//! ```no_run
//! use oxide_core::{Cpu, FlatBus};
//! use oxidz80::Z80;
//!
//! let mut bus = FlatBus::new();
//! bus.load(0x0000, &[0x3E, 0x42]).unwrap(); // LD A,0x42
//! let mut cpu = Z80::new(bus);
//! cpu.step();
//! assert_eq!(cpu.registers().a(), 0x42);
//! assert_eq!(cpu.bus().t_states, 7);
//! ```

mod alu;
pub mod bits;
mod config;
mod cpu;
pub mod decode;
mod error;
mod execute;
pub mod flags;
mod registers;

pub use config::CpuConfig;
pub use cpu::{DiagnosticSink, Z80};
pub use decode::Table;
pub use error::CpuError;
pub use flags::Flags;
pub use registers::{Register, Registers};
