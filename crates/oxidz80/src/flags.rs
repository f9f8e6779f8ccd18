// ============================================================================
//  FLAGS & LOOKUP TABLES
// ============================================================================

pub const C: u8 = 0x01; // Carry
pub const N: u8 = 0x02; // Subtract
pub const P: u8 = 0x04; // Parity/Overflow
pub const V: u8 = P; // Same physical bit as P
pub const X3: u8 = 0x08; // Undocumented, copy of bit 3
pub const H: u8 = 0x10; // Half Carry
pub const X5: u8 = 0x20; // Undocumented, copy of bit 5
pub const Z: u8 = 0x40; // Zero
pub const S: u8 = 0x80; // Sign

bitflags::bitflags! {
    /// Typed view of the F register, for inspection and tests.
    ///
    /// The ALU works on raw `u8` values; `Flags::P` and `Flags::V` name the
    /// same bit.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        const C = 0x01;
        const N = 0x02;
        const P = 0x04;
        const V = 0x04;
        const X3 = 0x08;
        const H = 0x10;
        const X5 = 0x20;
        const Z = 0x40;
        const S = 0x80;
    }
}

/// S, Z, X5 and X3 of the value.
pub static SZ53: [u8; 256] = build_sz53();
/// P set when the value has even parity.
pub static PARITY: [u8; 256] = build_parity();
/// `SZ53 | PARITY`.
pub static SZ53P: [u8; 256] = build_sz53p();

// Indexed by bits 3 (or 7 for overflow) of the operand, the value and the
// result, packed as `result:value:a`. See `lookup_index`.
pub static HALF_CARRY_ADD: [u8; 8] = [0, H, H, H, 0, 0, 0, H];
pub static HALF_CARRY_SUB: [u8; 8] = [0, 0, H, 0, H, 0, H, H];
pub static OVERFLOW_ADD: [u8; 8] = [0, 0, 0, V, V, 0, 0, 0];
pub static OVERFLOW_SUB: [u8; 8] = [0, V, 0, 0, 0, 0, V, 0];

/// Interleaves bits 3 and 7 of `a`, `value` and `result` so that
/// `index & 0x07` selects a half-carry entry and `index >> 4` an overflow
/// entry.
#[inline(always)]
pub fn lookup_index(a: u8, value: u8, result: u16) -> usize {
    ((((a & 0x88) >> 3) | ((value & 0x88) >> 2) | ((result as u8 & 0x88) >> 1)) & 0xFF) as usize
}

/// Same interleave on bits 11 and 15, for 16-bit ADC/SBC. ADD only uses bit 11.
#[inline(always)]
pub fn lookup_index16(dst: u16, value: u16, result: u32, mask: u16) -> usize {
    let m = mask as u32;
    ((((dst as u32 & m) >> 11) | ((value as u32 & m) >> 10) | ((result & m) >> 9)) & 0xFF) as usize
}

const fn build_sz53() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8) & (X3 | X5 | S);
        i += 1;
    }
    table[0] |= Z;
    table
}

const fn build_parity() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = if (i as u8).count_ones() % 2 == 0 { P } else { 0 };
        i += 1;
    }
    table
}

const fn build_sz53p() -> [u8; 256] {
    let sz53 = build_sz53();
    let parity = build_parity();
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = sz53[i] | parity[i];
        i += 1;
    }
    table
}
