use oxide_core::{Bus, Cpu};

use crate::bits::{dec16, displace, hi, inc16, lo, word};
use crate::config::CpuConfig;
use crate::decode::{Index, Op, Table};
use crate::error::CpuError;
use crate::flags::Flags;
use crate::registers::Registers;

/// Receives every soft error reported by `step()`.
pub type DiagnosticSink = Box<dyn FnMut(&CpuError)>;

// ============================================================================
//  Z80 CORE STRUCTURE
// ============================================================================

/// Zilog Z80 core. Owns its host bus; every memory, port and timing access
/// goes through it.
pub struct Z80<B: Bus> {
    pub(crate) regs: Registers,
    pub(crate) bus: B,
    config: CpuConfig,
    sink: Option<DiagnosticSink>,
}

impl<B: Bus> Z80<B> {
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, CpuConfig::default())
    }

    pub fn with_config(bus: B, config: CpuConfig) -> Self {
        Self {
            regs: Registers::default(),
            bus,
            config,
            sink: None,
        }
    }

    // --- Estado / Host ---

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// Replaces the whole register file, e.g. from a saved snapshot.
    pub fn restore(&mut self, registers: Registers) {
        self.regs = registers;
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    /// Typed view of F.
    pub fn flags(&self) -> Flags {
        Flags::from_bits_retain(self.regs.f())
    }

    /// Checked IM write, for hosts restoring state.
    pub fn set_interrupt_mode(&mut self, mode: u8) -> Result<(), CpuError> {
        if mode > 2 {
            return Err(CpuError::InvalidInterruptMode(mode));
        }
        self.regs.im = mode;
        Ok(())
    }

    pub fn set_diagnostic_sink(&mut self, sink: DiagnosticSink) {
        self.sink = Some(sink);
    }

    pub fn clear_diagnostic_sink(&mut self) {
        self.sink = None;
    }

    // --- Helpers de Bus ---

    #[inline(always)]
    pub(crate) fn tick(&mut self, t_states: u32) {
        self.bus.add_t_states(t_states);
    }

    /// M1 cycle: 4 T-states, PC++ and one refresh.
    #[inline(always)]
    fn fetch_opcode(&mut self) -> u8 {
        self.tick(4);
        let opcode = self.bus.read_memory(self.regs.pc);
        self.regs.pc = inc16(self.regs.pc);
        self.regs.bump_r();
        opcode
    }

    #[inline(always)]
    pub(crate) fn read_byte(&mut self, address: u16) -> u8 {
        self.tick(3);
        self.bus.read_memory(address)
    }

    #[inline(always)]
    pub(crate) fn write_byte(&mut self, address: u16, value: u8) {
        self.tick(3);
        self.bus.write_memory(address, value);
    }

    /// Operand byte at PC.
    #[inline(always)]
    pub(crate) fn read_imm(&mut self) -> u8 {
        let value = self.read_byte(self.regs.pc);
        self.regs.pc = inc16(self.regs.pc);
        value
    }

    pub(crate) fn read_imm_word(&mut self) -> u16 {
        let low = self.read_imm();
        let high = self.read_imm();
        word(high, low)
    }

    pub(crate) fn read_port(&mut self, address: u16) -> u8 {
        self.tick(1);
        let value = self.bus.read_port(address);
        self.tick(3);
        value
    }

    pub(crate) fn write_port(&mut self, address: u16, value: u8) {
        self.tick(1);
        self.bus.write_port(address, value);
        self.tick(3);
    }

    // --- Helpers de Stack ---

    pub(crate) fn push_word(&mut self, value: u16) {
        self.regs.sp = dec16(self.regs.sp);
        self.write_byte(self.regs.sp, hi(value));
        self.regs.sp = dec16(self.regs.sp);
        self.write_byte(self.regs.sp, lo(value));
    }

    pub(crate) fn pop_word(&mut self) -> u16 {
        let low = self.read_byte(self.regs.sp);
        self.regs.sp = inc16(self.regs.sp);
        let high = self.read_byte(self.regs.sp);
        self.regs.sp = inc16(self.regs.sp);
        word(high, low)
    }

    // ========================================================================
    //  STEP
    // ========================================================================

    /// Runs one complete instruction, prefixes included. An opcode with no
    /// behavior is reported (sink and log) and comes back as `Err`; the
    /// machine state is the same as after `step()`.
    pub fn try_step(&mut self) -> Result<(), CpuError> {
        self.regs.ei_latch = false;

        let mut table = Table::Base;
        loop {
            let opcode = self.fetch_opcode();
            match table.lookup(opcode) {
                Op::Prefix(next) => table = next,
                Op::IndexedBits(index) => {
                    self.execute_indexed_bits(index);
                    return Ok(());
                }
                Op::Unknown => {
                    let error = CpuError::UnknownOpcode {
                        table,
                        opcode,
                        address: dec16(self.regs.pc),
                    };
                    self.report(&error);
                    return Err(error);
                }
                op => {
                    self.execute(op);
                    return Ok(());
                }
            }
        }
    }

    /// DD CB d op / FD CB d op. The opcode byte is read as data: no refresh.
    fn execute_indexed_bits(&mut self, index: Index) {
        let displacement = self.read_imm();
        let (base, table) = match index {
            Index::Ix => (self.regs.ix, Table::DdCb),
            Index::Iy => (self.regs.iy, Table::FdCb),
        };
        self.regs.memptr = displace(base, displacement);
        let opcode = self.read_imm();
        self.tick(2);
        self.execute(table.lookup(opcode));
    }

    fn report(&mut self, error: &CpuError) {
        log::debug!("{error}");
        if let Some(sink) = self.sink.as_mut() {
            sink(error);
        }
    }

    // ========================================================================
    //  INTERRUPT SYSTEM
    // ========================================================================

    /// Maskable interrupt. Refused (returns `false`) while IFF1 is clear,
    /// and directly after EI when the config asks for it.
    pub fn request_maskable_interrupt(&mut self) -> bool {
        if !self.regs.iff1 {
            return false;
        }
        if self.config.defer_interrupt_after_ei && self.regs.ei_latch {
            return false;
        }
        let mode = self.regs.im;
        if mode > 2 {
            panic!("invalid interrupt mode {mode}: register file corrupted");
        }

        self.acknowledge();
        self.regs.iff2 = false;
        self.regs.pc = if mode == 2 {
            let pointer = word(self.regs.i, self.config.im2_vector_low_byte);
            let low = self.read_byte(pointer);
            let high = self.read_byte(inc16(pointer));
            word(high, low)
        } else {
            0x0038
        };
        self.regs.memptr = self.regs.pc;
        log::trace!("IRQ accepted (IM {mode}) -> {:#06X}", self.regs.pc);
        true
    }

    /// Non-maskable interrupt. IFF2 keeps the old IFF1 for RETN.
    pub fn request_non_maskable_interrupt(&mut self) {
        self.acknowledge();
        self.regs.pc = 0x0066;
        self.regs.memptr = self.regs.pc;
        log::trace!("NMI accepted");
    }

    /// Shared part of both acknowledges; clears IFF1 only.
    fn acknowledge(&mut self) {
        if self.regs.halted {
            self.regs.pc = inc16(self.regs.pc);
            self.regs.halted = false;
        }
        self.tick(7);
        self.regs.bump_r();
        self.regs.iff1 = false;
        self.push_word(self.regs.pc);
    }
}

// ============================================================================
//  CPU TRAIT
// ============================================================================

impl<B: Bus> Cpu for Z80<B> {
    /// Power-on: every register zero. The host's T-state total is untouched.
    fn reset(&mut self) {
        self.regs = Registers::default();
    }

    fn step(&mut self) {
        // Soft errors were already reported; execution goes on.
        let _ = self.try_step();
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn request_maskable_interrupt(&mut self) -> bool {
        Z80::request_maskable_interrupt(self)
    }

    fn request_non_maskable_interrupt(&mut self) {
        Z80::request_non_maskable_interrupt(self)
    }
}
