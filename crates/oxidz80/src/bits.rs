//! Byte/word composition and wrapping arithmetic.

#[inline(always)]
pub fn hi(value: u16) -> u8 {
    (value >> 8) as u8
}

#[inline(always)]
pub fn lo(value: u16) -> u8 {
    value as u8
}

#[inline(always)]
pub fn word(high: u8, low: u8) -> u16 {
    ((high as u16) << 8) | low as u16
}

/// Replaces the high byte of `value`, leaving the low byte alone.
#[inline(always)]
pub fn set_hi(value: u16, high: u8) -> u16 {
    word(high, lo(value))
}

/// Replaces the low byte of `value`, leaving the high byte alone.
#[inline(always)]
pub fn set_lo(value: u16, low: u8) -> u16 {
    word(hi(value), low)
}

#[inline(always)]
pub fn add8(a: u8, b: u8) -> u8 {
    a.wrapping_add(b)
}

#[inline(always)]
pub fn sub8(a: u8, b: u8) -> u8 {
    a.wrapping_sub(b)
}

#[inline(always)]
pub fn inc8(value: u8) -> u8 {
    add8(value, 1)
}

#[inline(always)]
pub fn dec8(value: u8) -> u8 {
    sub8(value, 1)
}

#[inline(always)]
pub fn add16(a: u16, b: u16) -> u16 {
    a.wrapping_add(b)
}

#[inline(always)]
pub fn sub16(a: u16, b: u16) -> u16 {
    a.wrapping_sub(b)
}

#[inline(always)]
pub fn inc16(value: u16) -> u16 {
    add16(value, 1)
}

#[inline(always)]
pub fn dec16(value: u16) -> u16 {
    sub16(value, 1)
}

/// `base` plus a sign-extended displacement byte.
#[inline(always)]
pub fn displace(base: u16, displacement: u8) -> u16 {
    base.wrapping_add(displacement as i8 as u16)
}
