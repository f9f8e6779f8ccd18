use std::fs;
use std::path::Path;
use thiserror::Error;

// ============================================================================
//  CONTRACTS (TRAITS)
// ============================================================================

/// Representa cualquier dispositivo capaz de ejecutar instrucciones (CPU).
///
/// The CPU owns its host; every memory, port and timing access happens
/// through the host's [`Bus`] from inside `step()`.
pub trait Cpu {
    /// Reinicio en frío (Power On)
    fn reset(&mut self);

    /// Ejecuta una instrucción completa (prefijos incluidos).
    fn step(&mut self);

    /// Debugging: Obtener el Program Counter actual
    fn pc(&self) -> u16;

    /// Maskable interrupt. Returns whether the CPU accepted it.
    fn request_maskable_interrupt(&mut self) -> bool;

    /// Non-maskable interrupt, always accepted.
    fn request_non_maskable_interrupt(&mut self);
}

/// Contrato UNIFICADO para el Bus (Memoria + I/O + reloj).
///
/// Callbacks run synchronously from inside `Cpu::step` and must not call
/// back into the CPU.
pub trait Bus {
    // --- Métodos Obligatorios (Memoria) ---
    fn read_memory(&mut self, address: u16) -> u8;
    fn write_memory(&mut self, address: u16, value: u8);

    // --- Métodos de I/O (Puertos) ---
    // The low byte of `address` is the port number; some instructions put
    // A or B in the high byte.
    fn read_port(&mut self, _address: u16) -> u8 {
        0xFF
    } // Bus flotante devuelve FF
    fn write_port(&mut self, _address: u16, _value: u8) {} // Escritura al vacío

    /// T-states consumed by the operation in progress. Pure counter.
    fn add_t_states(&mut self, count: u32);

    // --- Helpers Automáticos (Default Impls) ---

    // Lectura 16-bit Little Endian, sin coste de reloj (para hosts y tests)
    fn read_word_le(&mut self, address: u16) -> u16 {
        let lo = self.read_memory(address) as u16;
        let hi = self.read_memory(address.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }
}

// ============================================================================
//  FLAT BUS (HOST DE REFERENCIA)
// ============================================================================

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("program image is empty")]
    Empty,
    #[error("image of {len} bytes at {address:#06X} runs past the end of memory")]
    TooLarge { address: u16, len: usize },
}

/// 64K de RAM plana, un latch de puertos y el contador de T-states.
pub struct FlatBus {
    pub memory: Vec<u8>,
    pub t_states: u64,
    /// Value returned by every port read.
    pub port_input: u8,
    /// Every port write, in order: (address, value).
    pub port_writes: Vec<(u16, u8)>,
}

impl FlatBus {
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x10000],
            t_states: 0,
            port_input: 0xFF,
            port_writes: Vec::new(),
        }
    }

    /// Copies `bytes` into memory starting at `address`.
    pub fn load(&mut self, address: u16, bytes: &[u8]) -> Result<(), LoadError> {
        let start = address as usize;
        let end = start + bytes.len();
        if end > self.memory.len() {
            return Err(LoadError::TooLarge { address, len: bytes.len() });
        }
        self.memory[start..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, path: P, address: u16) -> Result<(), LoadError> {
        let data = fs::read(path)?;
        if data.is_empty() {
            return Err(LoadError::Empty);
        }
        self.load(address, &data)
    }
}

impl Default for FlatBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for FlatBus {
    fn read_memory(&mut self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    fn write_memory(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }

    fn read_port(&mut self, _address: u16) -> u8 {
        self.port_input
    }

    fn write_port(&mut self, address: u16, value: u8) {
        self.port_writes.push((address, value));
    }

    fn add_t_states(&mut self, count: u32) {
        self.t_states += count as u64;
    }
}
