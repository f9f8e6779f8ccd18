use oxide_core::Bus;

use crate::alu::{block_io_flags, memptr_after_write};
use crate::bits::{dec16, dec8, displace, hi, inc16, inc8, lo, word};
use crate::cpu::Z80;
use crate::decode::{Block, BlockKind, Cond, Index, Mem, Op, Operand, Reg16, Reg8, Target};
use crate::flags::{C, H, N, P, S, V, X3, X5, Z, HALF_CARRY_SUB};
use crate::registers::Registers;

// ============================================================================
//  OPERAND ACCESS
// ============================================================================

impl Registers {
    pub(crate) fn reg8(&self, register: Reg8) -> u8 {
        match register {
            Reg8::B => self.b(),
            Reg8::C => self.c(),
            Reg8::D => self.d(),
            Reg8::E => self.e(),
            Reg8::H => self.h(),
            Reg8::L => self.l(),
            Reg8::A => self.a(),
            Reg8::Ixh => self.ixh(),
            Reg8::Ixl => self.ixl(),
            Reg8::Iyh => self.iyh(),
            Reg8::Iyl => self.iyl(),
        }
    }

    pub(crate) fn set_reg8(&mut self, register: Reg8, value: u8) {
        match register {
            Reg8::B => self.set_b(value),
            Reg8::C => self.set_c(value),
            Reg8::D => self.set_d(value),
            Reg8::E => self.set_e(value),
            Reg8::H => self.set_h(value),
            Reg8::L => self.set_l(value),
            Reg8::A => self.set_a(value),
            Reg8::Ixh => self.set_ixh(value),
            Reg8::Ixl => self.set_ixl(value),
            Reg8::Iyh => self.set_iyh(value),
            Reg8::Iyl => self.set_iyl(value),
        }
    }

    pub(crate) fn reg16(&self, register: Reg16) -> u16 {
        match register {
            Reg16::Bc => self.bc,
            Reg16::De => self.de,
            Reg16::Hl => self.hl,
            Reg16::Sp => self.sp,
            Reg16::Af => self.af,
            Reg16::Ix => self.ix,
            Reg16::Iy => self.iy,
        }
    }

    pub(crate) fn set_reg16(&mut self, register: Reg16, value: u16) {
        match register {
            Reg16::Bc => self.bc = value,
            Reg16::De => self.de = value,
            Reg16::Hl => self.hl = value,
            Reg16::Sp => self.sp = value,
            Reg16::Af => self.af = value,
            Reg16::Ix => self.ix = value,
            Reg16::Iy => self.iy = value,
        }
    }

    pub(crate) fn condition(&self, cond: Cond) -> bool {
        let f = self.f();
        match cond {
            Cond::Nz => f & Z == 0,
            Cond::Z => f & Z != 0,
            Cond::Nc => f & C == 0,
            Cond::C => f & C != 0,
            Cond::Po => f & P == 0,
            Cond::Pe => f & P != 0,
            Cond::P => f & S == 0,
            Cond::M => f & S != 0,
        }
    }

    fn index(&self, index: Index) -> u16 {
        match index {
            Index::Ix => self.ix,
            Index::Iy => self.iy,
        }
    }
}

/// `None` always holds.
fn holds(regs: &Registers, cond: Option<Cond>) -> bool {
    cond.is_none_or(|c| regs.condition(c))
}

#[inline(always)]
fn advance(value: u16, decrement: bool) -> u16 {
    if decrement { dec16(value) } else { inc16(value) }
}

// ============================================================================
//  OPCODE EXECUTION
// ============================================================================

impl<B: Bus> Z80<B> {
    /// Address of a memory operand. `(IX+d)` reads the displacement, spends
    /// 5 T-states and latches the address in MEMPTR.
    fn operand_address(&mut self, mem: Mem) -> u16 {
        match mem {
            Mem::Hl => self.regs.hl,
            Mem::Indexed(index) => {
                let displacement = self.read_imm();
                self.tick(5);
                let address = displace(self.regs.index(index), displacement);
                self.regs.memptr = address;
                address
            }
        }
    }

    fn operand_value(&mut self, operand: Operand) -> u8 {
        match operand {
            Operand::Reg(r) => self.regs.reg8(r),
            Operand::Imm => self.read_imm(),
            Operand::Mem(mem) => {
                let address = self.operand_address(mem);
                self.read_byte(address)
            }
        }
    }

    /// JR e: taken costs 5 extra, not taken skips the offset unread.
    fn jump_relative(&mut self, taken: bool) {
        if taken {
            let offset = self.read_byte(self.regs.pc);
            self.tick(5);
            self.regs.pc = inc16(displace(self.regs.pc, offset));
            self.regs.memptr = self.regs.pc;
        } else {
            self.tick(3);
            self.regs.pc = inc16(self.regs.pc);
        }
    }

    /// Read, one internal T-state, write back.
    fn modify_memory(&mut self, address: u16, f: impl FnOnce(&mut Registers, u8) -> u8) -> u8 {
        let value = self.read_byte(address);
        self.tick(1);
        let result = f(&mut self.regs, value);
        self.write_byte(address, result);
        result
    }

    pub(crate) fn execute(&mut self, op: Op) {
        match op {
            Op::Nop => {}
            // Resolved by the fetch loop before we get here.
            Op::Prefix(_) | Op::IndexedBits(_) | Op::Unknown => {}

            // --- 8-bit Loads ---
            Op::Ld(dst, src) => {
                let value = self.regs.reg8(src);
                self.regs.set_reg8(dst, value);
            }
            Op::LdImm(r) => {
                let value = self.read_imm();
                self.regs.set_reg8(r, value);
            }
            Op::LdFromMem(r, mem) => {
                let address = self.operand_address(mem);
                let value = self.read_byte(address);
                self.regs.set_reg8(r, value);
            }
            Op::LdToMem(mem, r) => {
                let address = self.operand_address(mem);
                let value = self.regs.reg8(r);
                self.write_byte(address, value);
            }
            Op::LdMemImm(Mem::Hl) => {
                let value = self.read_imm();
                self.write_byte(self.regs.hl, value);
            }
            Op::LdMemImm(Mem::Indexed(index)) => {
                // d comes before n; only 2 extra T-states here.
                let displacement = self.read_imm();
                let value = self.read_imm();
                self.tick(2);
                let address = displace(self.regs.index(index), displacement);
                self.regs.memptr = address;
                self.write_byte(address, value);
            }
            Op::LdAFromPair(pair) => {
                let address = self.regs.reg16(pair);
                self.regs.memptr = inc16(address);
                let value = self.read_byte(address);
                self.regs.set_a(value);
            }
            Op::LdPairFromA(pair) => {
                let address = self.regs.reg16(pair);
                let a = self.regs.a();
                self.regs.memptr = memptr_after_write(a, address);
                self.write_byte(address, a);
            }
            Op::LdAFromAbs => {
                let address = self.read_imm_word();
                self.regs.memptr = inc16(address);
                let value = self.read_byte(address);
                self.regs.set_a(value);
            }
            Op::LdAbsFromA => {
                let address = self.read_imm_word();
                let a = self.regs.a();
                self.regs.memptr = memptr_after_write(a, address);
                self.write_byte(address, a);
            }
            Op::LdAI => {
                self.tick(1);
                self.regs.set_a(self.regs.i);
                self.regs.set_ld_a_ir_flags();
            }
            Op::LdAR => {
                self.tick(1);
                self.regs.set_a(self.regs.r_combined());
                self.regs.set_ld_a_ir_flags();
            }
            Op::LdIA => {
                self.tick(1);
                self.regs.i = self.regs.a();
            }
            Op::LdRA => {
                self.tick(1);
                self.regs.set_r_combined(self.regs.a());
            }

            // --- 16-bit Loads ---
            Op::LdWideImm(rr) => {
                let value = self.read_imm_word();
                self.regs.set_reg16(rr, value);
            }
            Op::LdWideFromAbs(rr) => {
                let address = self.read_imm_word();
                let low = self.read_byte(address);
                self.regs.memptr = inc16(address);
                let high = self.read_byte(self.regs.memptr);
                self.regs.set_reg16(rr, word(high, low));
            }
            Op::LdAbsFromWide(rr) => {
                let address = self.read_imm_word();
                let value = self.regs.reg16(rr);
                self.write_byte(address, lo(value));
                self.regs.memptr = inc16(address);
                self.write_byte(self.regs.memptr, hi(value));
            }
            Op::LdSp(rr) => {
                self.tick(2);
                self.regs.sp = self.regs.reg16(rr);
            }
            Op::Push(rr) => {
                self.tick(1);
                let value = self.regs.reg16(rr);
                self.push_word(value);
            }
            Op::Pop(rr) => {
                let value = self.pop_word();
                self.regs.set_reg16(rr, value);
            }

            // --- Exchanges ---
            Op::ExAf => self.regs.exchange_af(),
            Op::Exx => self.regs.exchange_all(),
            Op::ExDeHl => std::mem::swap(&mut self.regs.de, &mut self.regs.hl),
            Op::ExSp(rr) => {
                let sp = self.regs.sp;
                let low = self.read_byte(sp);
                let high = self.read_byte(inc16(sp));
                self.tick(1);
                let value = self.regs.reg16(rr);
                self.write_byte(inc16(sp), hi(value));
                self.write_byte(sp, lo(value));
                self.tick(2);
                let swapped = word(high, low);
                self.regs.memptr = swapped;
                self.regs.set_reg16(rr, swapped);
            }

            // --- ALU 8-bit ---
            Op::Alu(alu, operand) => {
                let value = self.operand_value(operand);
                self.regs.alu(alu, value);
            }
            Op::Inc(r) => {
                let value = self.regs.inc8(self.regs.reg8(r));
                self.regs.set_reg8(r, value);
            }
            Op::Dec(r) => {
                let value = self.regs.dec8(self.regs.reg8(r));
                self.regs.set_reg8(r, value);
            }
            Op::IncMem(mem) => {
                let address = self.operand_address(mem);
                self.modify_memory(address, |regs, value| regs.inc8(value));
            }
            Op::DecMem(mem) => {
                let address = self.operand_address(mem);
                self.modify_memory(address, |regs, value| regs.dec8(value));
            }
            Op::Daa => self.regs.daa(),
            Op::Cpl => self.regs.cpl(),
            Op::Neg => self.regs.neg(),
            Op::Scf => self.regs.scf(),
            Op::Ccf => self.regs.ccf(),

            // --- ALU 16-bit ---
            Op::AddWide(dst, src) => {
                self.tick(7);
                let (lhs, rhs) = (self.regs.reg16(dst), self.regs.reg16(src));
                let result = self.regs.add_wide(lhs, rhs);
                self.regs.set_reg16(dst, result);
            }
            Op::AdcHl(rr) => {
                self.tick(7);
                self.regs.adc_hl(self.regs.reg16(rr));
            }
            Op::SbcHl(rr) => {
                self.tick(7);
                self.regs.sbc_hl(self.regs.reg16(rr));
            }
            Op::IncWide(rr) => {
                self.tick(2);
                self.regs.set_reg16(rr, inc16(self.regs.reg16(rr)));
            }
            Op::DecWide(rr) => {
                self.tick(2);
                self.regs.set_reg16(rr, dec16(self.regs.reg16(rr)));
            }

            // --- Rotaciones ---
            Op::Rlca => self.regs.rlca(),
            Op::Rrca => self.regs.rrca(),
            Op::Rla => self.regs.rla(),
            Op::Rra => self.regs.rra(),
            Op::Rld | Op::Rrd => {
                let hl = self.regs.hl;
                let value = self.read_byte(hl);
                self.tick(4);
                let written = if op == Op::Rld { self.regs.rld(value) } else { self.regs.rrd(value) };
                self.write_byte(hl, written);
                self.regs.memptr = inc16(hl);
            }

            // --- CB ---
            Op::Shift(shift, Target::Reg(r)) => {
                let value = self.regs.shift(shift, self.regs.reg8(r));
                self.regs.set_reg8(r, value);
            }
            Op::Shift(shift, Target::AtHl) => {
                self.modify_memory(self.regs.hl, |regs, value| regs.shift(shift, value));
            }
            Op::Bit(bit, Target::Reg(r)) => {
                let value = self.regs.reg8(r);
                self.regs.bit(bit, value, value);
            }
            Op::Bit(bit, Target::AtHl) => {
                let value = self.read_byte(self.regs.hl);
                self.tick(1);
                self.regs.bit(bit, value, hi(self.regs.memptr));
            }
            Op::Res(bit, Target::Reg(r)) => {
                let value = self.regs.reg8(r) & !(1 << bit);
                self.regs.set_reg8(r, value);
            }
            Op::Res(bit, Target::AtHl) => {
                self.modify_memory(self.regs.hl, |_, value| value & !(1 << bit));
            }
            Op::Set(bit, Target::Reg(r)) => {
                let value = self.regs.reg8(r) | (1 << bit);
                self.regs.set_reg8(r, value);
            }
            Op::Set(bit, Target::AtHl) => {
                self.modify_memory(self.regs.hl, |_, value| value | (1 << bit));
            }

            // --- DDCB / FDCB (address already in MEMPTR) ---
            Op::IndexedShift(shift, copy) => {
                let result = self.modify_memory(self.regs.memptr, |regs, value| regs.shift(shift, value));
                if let Some(r) = copy {
                    self.regs.set_reg8(r, result);
                }
            }
            Op::IndexedBit(bit) => {
                let value = self.read_byte(self.regs.memptr);
                self.tick(1);
                self.regs.bit(bit, value, hi(self.regs.memptr));
            }
            Op::IndexedRes(bit, copy) => {
                let result = self.modify_memory(self.regs.memptr, |_, value| value & !(1 << bit));
                if let Some(r) = copy {
                    self.regs.set_reg8(r, result);
                }
            }
            Op::IndexedSet(bit, copy) => {
                let result = self.modify_memory(self.regs.memptr, |_, value| value | (1 << bit));
                if let Some(r) = copy {
                    self.regs.set_reg8(r, result);
                }
            }

            // --- Saltos / Llamadas ---
            Op::Jp(cond) => {
                // Both address bytes are read and latched even if not taken.
                let target = self.read_imm_word();
                self.regs.memptr = target;
                if holds(&self.regs, cond) {
                    self.regs.pc = target;
                }
            }
            Op::JpWide(rr) => self.regs.pc = self.regs.reg16(rr),
            Op::Jr(cond) => {
                let taken = holds(&self.regs, cond);
                self.jump_relative(taken);
            }
            Op::Djnz => {
                self.tick(1);
                let b = dec8(self.regs.b());
                self.regs.set_b(b);
                self.jump_relative(b != 0);
            }
            Op::Call(cond) => {
                let target = self.read_imm_word();
                self.regs.memptr = target;
                if holds(&self.regs, cond) {
                    self.tick(1);
                    self.push_word(self.regs.pc);
                    self.regs.pc = target;
                }
            }
            Op::Ret(None) => {
                self.regs.pc = self.pop_word();
                self.regs.memptr = self.regs.pc;
            }
            Op::Ret(Some(cond)) => {
                self.tick(1);
                if self.regs.condition(cond) {
                    self.regs.pc = self.pop_word();
                    self.regs.memptr = self.regs.pc;
                }
            }
            Op::Retn => {
                self.regs.iff1 = self.regs.iff2;
                self.regs.pc = self.pop_word();
                self.regs.memptr = self.regs.pc;
            }
            Op::Rst(target) => {
                self.tick(1);
                self.push_word(self.regs.pc);
                self.regs.pc = target as u16;
                self.regs.memptr = self.regs.pc;
            }

            // --- Control de CPU ---
            Op::Halt => {
                // PC vuelve al HALT: cada step() lo re-ejecuta hasta una IRQ.
                if !self.regs.halted {
                    log::trace!("HALT at {:#06X}", dec16(self.regs.pc));
                }
                self.regs.halted = true;
                self.regs.pc = dec16(self.regs.pc);
            }
            Op::Di => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            Op::Ei => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.regs.ei_latch = true;
            }
            Op::Im(mode) => self.regs.im = mode,

            // --- I/O ---
            Op::InAImm => {
                let port = word(self.regs.a(), self.read_imm());
                let value = self.read_port(port);
                self.regs.set_a(value);
                self.regs.memptr = inc16(port);
            }
            Op::OutImmA => {
                let a = self.regs.a();
                let port = word(a, self.read_imm());
                self.regs.memptr = memptr_after_write(a, port);
                self.write_port(port, a);
            }
            Op::InC(r) => {
                let bc = self.regs.bc;
                self.regs.memptr = inc16(bc);
                let value = self.read_port(bc);
                if let Some(r) = r {
                    self.regs.set_reg8(r, value);
                }
                self.regs.set_in_flags(value);
            }
            Op::OutC(r) => {
                let bc = self.regs.bc;
                let value = r.map_or(0, |r| self.regs.reg8(r));
                self.write_port(bc, value);
                self.regs.memptr = inc16(bc);
            }

            Op::Block(block) => self.execute_block(block),
        }
    }

    // ========================================================================
    //  BLOCK TRANSFER / SEARCH / I-O
    // ========================================================================

    fn execute_block(&mut self, block: Block) {
        let Block { kind, decrement, repeat } = block;
        match kind {
            BlockKind::Ld => self.block_ld(decrement, repeat),
            BlockKind::Cp => self.block_cp(decrement, repeat),
            BlockKind::In => self.block_in(decrement, repeat),
            BlockKind::Out => self.block_out(decrement, repeat),
        }
    }

    /// Rewinds PC onto the ED prefix so the instruction runs again.
    fn repeat_block(&mut self) {
        self.tick(5);
        self.regs.pc = self.regs.pc.wrapping_sub(2);
    }

    fn block_ld(&mut self, decrement: bool, repeat: bool) {
        let value = self.read_byte(self.regs.hl);
        self.write_byte(self.regs.de, value);
        self.tick(2);
        self.regs.bc = dec16(self.regs.bc);
        let n = value.wrapping_add(self.regs.a());
        let f = (self.regs.f() & (C | Z | S))
            | (if self.regs.bc != 0 { V } else { 0 })
            | (n & X3)
            | (if n & 0x02 != 0 { X5 } else { 0 });
        self.regs.set_f(f);
        if repeat && self.regs.bc != 0 {
            self.repeat_block();
            self.regs.memptr = inc16(self.regs.pc);
        }
        self.regs.hl = advance(self.regs.hl, decrement);
        self.regs.de = advance(self.regs.de, decrement);
    }

    fn block_cp(&mut self, decrement: bool, repeat: bool) {
        let value = self.read_byte(self.regs.hl);
        let a = self.regs.a();
        let mut diff = a.wrapping_sub(value);
        let lookup = (((a & 0x08) >> 3) | ((value & 0x08) >> 2) | ((diff & 0x08) >> 1)) as usize;
        self.tick(5);
        self.regs.bc = dec16(self.regs.bc);
        let mut f = (self.regs.f() & C)
            | (if self.regs.bc != 0 { V } else { 0 })
            | N
            | HALF_CARRY_SUB[lookup]
            | (if diff == 0 { Z } else { 0 })
            | (diff & S);
        if f & H != 0 {
            diff = dec8(diff);
        }
        f |= (diff & X3) | (if diff & 0x02 != 0 { X5 } else { 0 });
        self.regs.set_f(f);
        if repeat && f & (V | Z) == V {
            self.repeat_block();
            self.regs.memptr = inc16(self.regs.pc);
        } else {
            self.regs.memptr = advance(self.regs.memptr, decrement);
        }
        self.regs.hl = advance(self.regs.hl, decrement);
    }

    fn block_in(&mut self, decrement: bool, repeat: bool) {
        self.tick(1);
        let value = self.read_port(self.regs.bc);
        self.write_byte(self.regs.hl, value);
        self.regs.memptr = advance(self.regs.bc, decrement);
        let b = dec8(self.regs.b());
        self.regs.set_b(b);
        let c = self.regs.c().wrapping_add(value);
        let other = if decrement { dec8(c) } else { inc8(c) };
        self.regs.set_f(block_io_flags(value, other, b));
        if repeat && b != 0 {
            self.repeat_block();
        }
        self.regs.hl = advance(self.regs.hl, decrement);
    }

    fn block_out(&mut self, decrement: bool, repeat: bool) {
        self.tick(1);
        let value = self.read_byte(self.regs.hl);
        let b = dec8(self.regs.b());
        self.regs.set_b(b);
        self.regs.memptr = advance(self.regs.bc, decrement);
        self.write_port(self.regs.bc, value);
        self.regs.hl = advance(self.regs.hl, decrement);
        let other = value.wrapping_add(self.regs.l());
        self.regs.set_f(block_io_flags(value, other, b));
        if repeat && b != 0 {
            self.repeat_block();
        }
    }
}
