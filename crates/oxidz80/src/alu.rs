use crate::bits::{inc16, word};
use crate::decode::{AluOp, ShiftOp};
use crate::flags::*;
use crate::registers::Registers;

// ============================================================================
//  8-BIT ARITHMETIC
// ============================================================================

impl Registers {
    pub(crate) fn alu(&mut self, op: AluOp, value: u8) {
        let carry = self.f() & C;
        match op {
            AluOp::Add => self.add_a(value, 0),
            AluOp::Adc => self.add_a(value, carry),
            AluOp::Sub => self.sub_a(value, 0),
            AluOp::Sbc => self.sub_a(value, carry),
            AluOp::And => self.and_a(value),
            AluOp::Xor => self.xor_a(value),
            AluOp::Or => self.or_a(value),
            AluOp::Cp => self.cp_a(value),
        }
    }

    pub(crate) fn add_a(&mut self, value: u8, carry: u8) {
        let a = self.a();
        let result = a as u16 + value as u16 + carry as u16;
        let lookup = lookup_index(a, value, result);
        let a = result as u8;
        self.set_a(a);
        self.set_f(
            (if result & 0x100 != 0 { C } else { 0 })
                | HALF_CARRY_ADD[lookup & 0x07]
                | OVERFLOW_ADD[lookup >> 4]
                | SZ53[a as usize],
        );
    }

    pub(crate) fn sub_a(&mut self, value: u8, carry: u8) {
        let a = self.a();
        let result = (a as u16).wrapping_sub(value as u16).wrapping_sub(carry as u16);
        let lookup = lookup_index(a, value, result);
        let a = result as u8;
        self.set_a(a);
        self.set_f(
            (if result & 0x100 != 0 { C } else { 0 })
                | N
                | HALF_CARRY_SUB[lookup & 0x07]
                | OVERFLOW_SUB[lookup >> 4]
                | SZ53[a as usize],
        );
    }

    /// Like SUB, but A is kept and X3/X5 come from the operand.
    pub(crate) fn cp_a(&mut self, value: u8) {
        let a = self.a();
        let diff = (a as u16).wrapping_sub(value as u16);
        let lookup = lookup_index(a, value, diff);
        let mut f = N;
        if diff & 0x100 != 0 {
            f |= C;
        }
        if diff == 0 {
            f |= Z;
        }
        f |= HALF_CARRY_SUB[lookup & 0x07];
        f |= OVERFLOW_SUB[lookup >> 4];
        f |= value & (X3 | X5);
        f |= diff as u8 & S;
        self.set_f(f);
    }

    pub(crate) fn and_a(&mut self, value: u8) {
        let a = self.a() & value;
        self.set_a(a);
        self.set_f(SZ53P[a as usize] | H);
    }

    pub(crate) fn xor_a(&mut self, value: u8) {
        let a = self.a() ^ value;
        self.set_a(a);
        self.set_f(SZ53P[a as usize]);
    }

    pub(crate) fn or_a(&mut self, value: u8) {
        let a = self.a() | value;
        self.set_a(a);
        self.set_f(SZ53P[a as usize]);
    }

    pub(crate) fn inc8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.set_f(
            (self.f() & C)
                | (if result == 0x80 { V } else { 0 })
                | (if result & 0x0F == 0 { H } else { 0 })
                | SZ53[result as usize],
        );
        result
    }

    pub(crate) fn dec8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.set_f(
            (self.f() & C)
                | (if result == 0x7F { V } else { 0 })
                | (if value & 0x0F == 0 { H } else { 0 })
                | N
                | SZ53[result as usize],
        );
        result
    }

    /// NEG: A = 0 - A.
    pub(crate) fn neg(&mut self) {
        let value = self.a();
        self.set_a(0);
        self.sub_a(value, 0);
    }

    pub(crate) fn daa(&mut self) {
        let a = self.a();
        let f = self.f();
        let mut adjust = 0;
        let mut carry = f & C;
        if f & H != 0 || a & 0x0F > 9 {
            adjust = 0x06;
        }
        if carry != 0 || a > 0x99 {
            adjust |= 0x60;
        }
        if a > 0x99 {
            carry = C;
        }
        if f & N != 0 {
            self.sub_a(adjust, 0);
        } else {
            self.add_a(adjust, 0);
        }
        let a = self.a();
        self.set_f((self.f() & !(C | P)) | carry | PARITY[a as usize]);
    }

    pub(crate) fn cpl(&mut self) {
        let a = !self.a();
        self.set_a(a);
        self.set_f((self.f() & (C | P | Z | S)) | (a & (X3 | X5)) | N | H);
    }

    pub(crate) fn scf(&mut self) {
        self.set_f((self.f() & (P | Z | S)) | C | (self.a() & (X3 | X5)));
    }

    pub(crate) fn ccf(&mut self) {
        let f = self.f();
        let carry = if f & C != 0 { H } else { C };
        self.set_f((f & (P | Z | S)) | carry | (self.a() & (X3 | X5)));
    }
}

// ============================================================================
//  16-BIT ARITHMETIC
// ============================================================================

impl Registers {
    /// ADD rr,rr. Returns the sum; S, Z and V are untouched.
    pub(crate) fn add_wide(&mut self, dst: u16, value: u16) -> u16 {
        let result = dst as u32 + value as u32;
        let lookup = lookup_index16(dst, value, result, 0x0800);
        self.memptr = inc16(dst);
        self.set_f(
            (self.f() & (V | Z | S))
                | (if result & 0x10000 != 0 { C } else { 0 })
                | ((result >> 8) as u8 & (X3 | X5))
                | HALF_CARRY_ADD[lookup],
        );
        result as u16
    }

    pub(crate) fn adc_hl(&mut self, value: u16) {
        let hl = self.hl;
        let result = hl as u32 + value as u32 + (self.f() & C) as u32;
        let lookup = lookup_index16(hl, value, result, 0x8800);
        self.memptr = inc16(hl);
        self.hl = result as u16;
        self.set_f(
            (if result & 0x10000 != 0 { C } else { 0 })
                | OVERFLOW_ADD[lookup >> 4]
                | ((result >> 8) as u8 & (X3 | X5 | S))
                | HALF_CARRY_ADD[lookup & 0x07]
                | (if self.hl == 0 { Z } else { 0 }),
        );
    }

    pub(crate) fn sbc_hl(&mut self, value: u16) {
        let hl = self.hl;
        let result = (hl as u32)
            .wrapping_sub(value as u32)
            .wrapping_sub((self.f() & C) as u32);
        let lookup = lookup_index16(hl, value, result, 0x8800);
        self.memptr = inc16(hl);
        self.hl = result as u16;
        self.set_f(
            (if result & 0x10000 != 0 { C } else { 0 })
                | N
                | OVERFLOW_SUB[lookup >> 4]
                | ((result >> 8) as u8 & (X3 | X5 | S))
                | HALF_CARRY_SUB[lookup & 0x07]
                | (if self.hl == 0 { Z } else { 0 }),
        );
    }
}

// ============================================================================
//  ROTATES, SHIFTS & BITS
// ============================================================================

impl Registers {
    // RLCA/RRCA/RLA/RRA keep S, Z and P.
    fn set_rotate_a_flags(&mut self, old: u8, carry_bit: u8) {
        let a = self.a();
        let carry = if old & carry_bit != 0 { C } else { 0 };
        self.set_f((self.f() & (P | Z | S)) | (a & (X3 | X5)) | carry);
    }

    pub(crate) fn rlca(&mut self) {
        let old = self.a();
        self.set_a(old.rotate_left(1));
        self.set_rotate_a_flags(old, 0x80);
    }

    pub(crate) fn rrca(&mut self) {
        let old = self.a();
        self.set_a(old.rotate_right(1));
        self.set_rotate_a_flags(old, 0x01);
    }

    pub(crate) fn rla(&mut self) {
        let old = self.a();
        self.set_a((old << 1) | (self.f() & C));
        self.set_rotate_a_flags(old, 0x80);
    }

    pub(crate) fn rra(&mut self) {
        let old = self.a();
        self.set_a((old >> 1) | ((self.f() & C) << 7));
        self.set_rotate_a_flags(old, 0x01);
    }

    /// CB-table rotate or shift. Returns the new value.
    pub(crate) fn shift(&mut self, op: ShiftOp, value: u8) -> u8 {
        let carry_in = self.f() & C;
        let (result, carry_bit) = match op {
            ShiftOp::Rlc => (value.rotate_left(1), 0x80),
            ShiftOp::Rrc => (value.rotate_right(1), 0x01),
            ShiftOp::Rl => ((value << 1) | carry_in, 0x80),
            ShiftOp::Rr => ((value >> 1) | (carry_in << 7), 0x01),
            ShiftOp::Sla => (value << 1, 0x80),
            ShiftOp::Sra => ((value & 0x80) | (value >> 1), 0x01),
            ShiftOp::Sll => ((value << 1) | 0x01, 0x80),
            ShiftOp::Srl => (value >> 1, 0x01),
        };
        let carry = if value & carry_bit != 0 { C } else { 0 };
        self.set_f(carry | SZ53P[result as usize]);
        result
    }

    /// BIT n. X3/X5 come from `hidden`: the value itself for registers,
    /// the high byte of MEMPTR for memory operands.
    pub(crate) fn bit(&mut self, bit: u8, value: u8, hidden: u8) {
        let mask = 1u8 << bit;
        let mut f = (self.f() & C) | H | (hidden & (X3 | X5));
        if value & mask == 0 {
            f |= P | Z;
        }
        if mask == 0x80 && value & 0x80 != 0 {
            f |= S;
        }
        self.set_f(f);
    }

    /// RLD: returns the byte to write back to (HL).
    pub(crate) fn rld(&mut self, memory: u8) -> u8 {
        let a = self.a();
        let written = (memory << 4) | (a & 0x0F);
        let a = (a & 0xF0) | (memory >> 4);
        self.set_a(a);
        self.set_f((self.f() & C) | SZ53P[a as usize]);
        written
    }

    /// RRD: returns the byte to write back to (HL).
    pub(crate) fn rrd(&mut self, memory: u8) -> u8 {
        let a = self.a();
        let written = (a << 4) | (memory >> 4);
        let a = (a & 0xF0) | (memory & 0x0F);
        self.set_a(a);
        self.set_f((self.f() & C) | SZ53P[a as usize]);
        written
    }

    /// Flags for LD A,I and LD A,R. P/V reflects IFF2.
    pub(crate) fn set_ld_a_ir_flags(&mut self) {
        let a = self.a();
        let iff2 = if self.iff2 { V } else { 0 };
        self.set_f((self.f() & C) | SZ53[a as usize] | iff2);
    }

    /// Flags for IN r,(C) and IN (C).
    pub(crate) fn set_in_flags(&mut self, value: u8) {
        self.set_f((self.f() & C) | SZ53P[value as usize]);
    }
}

/// Shared flag rule of INI/IND/OUTI/OUTD and their repeating forms.
/// `other` is the byte transferred plus C (+/-1) or plus L.
pub(crate) fn block_io_flags(value: u8, other: u8, b: u8) -> u8 {
    (if value & 0x80 != 0 { N } else { 0 })
        | (if other < value { H | C } else { 0 })
        | PARITY[((other & 0x07) ^ b) as usize]
        | SZ53[b as usize]
}

/// MEMPTR after OUT (n),A and LD (nn),A style writes: A in the high byte,
/// low byte of the address plus one.
pub(crate) fn memptr_after_write(a: u8, address: u16) -> u16 {
    word(a, inc16(address) as u8)
}
