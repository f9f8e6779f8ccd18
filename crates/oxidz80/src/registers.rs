use std::fmt;
use std::str::FromStr;

use crate::bits::{hi, lo, set_hi, set_lo};
use crate::error::CpuError;

// ============================================================================
//  REGISTER FILE
// ============================================================================

/// Complete register file, visible and internal.
///
/// Pairs are stored as 16-bit values; the 8-bit registers are views over
/// one half of a pair, so writing `A` always shows up in `AF` and back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Registers {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,

    // Shadow set
    pub af_prime: u16,
    pub bc_prime: u16,
    pub de_prime: u16,
    pub hl_prime: u16,

    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,

    /// Internal address latch (WZ). Leaks into X3/X5 of some results.
    pub memptr: u16,
    pub i: u8,
    /// Refresh counter, low 7 bits only.
    pub r: u8,
    /// Bit 7 of R, untouched by the refresh counter.
    pub r7: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8, // 0, 1, 2
    pub halted: bool,
    /// Set by EI, cleared when the next instruction starts. Only consulted
    /// with `CpuConfig::defer_interrupt_after_ei`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub ei_latch: bool,
}

macro_rules! half_registers {
    ($($pair:ident: $get_hi:ident / $set_hi:ident, $get_lo:ident / $set_lo:ident;)*) => {
        $(
            #[inline(always)] pub fn $get_hi(&self) -> u8 { hi(self.$pair) }
            #[inline(always)] pub fn $get_lo(&self) -> u8 { lo(self.$pair) }
            #[inline(always)] pub fn $set_hi(&mut self, value: u8) { self.$pair = set_hi(self.$pair, value); }
            #[inline(always)] pub fn $set_lo(&mut self, value: u8) { self.$pair = set_lo(self.$pair, value); }
        )*
    };
}

impl Registers {
    half_registers! {
        af: a / set_a, f / set_f;
        bc: b / set_b, c / set_c;
        de: d / set_d, e / set_e;
        hl: h / set_h, l / set_l;
        ix: ixh / set_ixh, ixl / set_ixl;
        iy: iyh / set_iyh, iyl / set_iyl;
    }

    /// R as software sees it: refresh counter plus the stored bit 7.
    pub fn r_combined(&self) -> u8 {
        (self.r & 0x7F) | (self.r7 & 0x80)
    }

    pub fn set_r_combined(&mut self, value: u8) {
        self.r = value & 0x7F;
        self.r7 = value & 0x80;
    }

    /// Advances the 7-bit refresh counter; bit 7 is untouched.
    #[inline(always)]
    pub fn bump_r(&mut self) {
        self.r = self.r.wrapping_add(1) & 0x7F;
    }

    /// EX AF,AF'
    pub fn exchange_af(&mut self) {
        std::mem::swap(&mut self.af, &mut self.af_prime);
    }

    /// EXX
    pub fn exchange_all(&mut self) {
        std::mem::swap(&mut self.bc, &mut self.bc_prime);
        std::mem::swap(&mut self.de, &mut self.de_prime);
        std::mem::swap(&mut self.hl, &mut self.hl_prime);
    }

    /// Reads any register by name. Flags read as 0/1.
    pub fn get(&self, register: Register) -> u16 {
        use Register::*;
        match register {
            A => self.a() as u16,
            F => self.f() as u16,
            B => self.b() as u16,
            C => self.c() as u16,
            D => self.d() as u16,
            E => self.e() as u16,
            H => self.h() as u16,
            L => self.l() as u16,
            Ixh => self.ixh() as u16,
            Ixl => self.ixl() as u16,
            Iyh => self.iyh() as u16,
            Iyl => self.iyl() as u16,
            I => self.i as u16,
            R => self.r_combined() as u16,
            Af => self.af,
            Bc => self.bc,
            De => self.de,
            Hl => self.hl,
            AfPrime => self.af_prime,
            BcPrime => self.bc_prime,
            DePrime => self.de_prime,
            HlPrime => self.hl_prime,
            Ix => self.ix,
            Iy => self.iy,
            Sp => self.sp,
            Pc => self.pc,
            Memptr => self.memptr,
            Iff1 => self.iff1 as u16,
            Iff2 => self.iff2 as u16,
            Im => self.im as u16,
            Halted => self.halted as u16,
        }
    }

    /// Writes any register by name. Byte registers keep the low byte of
    /// `value`. `Im` is stored as-is; see `Z80::set_interrupt_mode` for the
    /// checked version.
    pub fn set(&mut self, register: Register, value: u16) {
        use Register::*;
        let byte = value as u8;
        match register {
            A => self.set_a(byte),
            F => self.set_f(byte),
            B => self.set_b(byte),
            C => self.set_c(byte),
            D => self.set_d(byte),
            E => self.set_e(byte),
            H => self.set_h(byte),
            L => self.set_l(byte),
            Ixh => self.set_ixh(byte),
            Ixl => self.set_ixl(byte),
            Iyh => self.set_iyh(byte),
            Iyl => self.set_iyl(byte),
            I => self.i = byte,
            R => self.set_r_combined(byte),
            Af => self.af = value,
            Bc => self.bc = value,
            De => self.de = value,
            Hl => self.hl = value,
            AfPrime => self.af_prime = value,
            BcPrime => self.bc_prime = value,
            DePrime => self.de_prime = value,
            HlPrime => self.hl_prime = value,
            Ix => self.ix = value,
            Iy => self.iy = value,
            Sp => self.sp = value,
            Pc => self.pc = value,
            Memptr => self.memptr = value,
            Iff1 => self.iff1 = value != 0,
            Iff2 => self.iff2 = value != 0,
            Im => self.im = byte,
            Halted => self.halted = value != 0,
        }
    }
}

// ============================================================================
//  REGISTER NAMES
// ============================================================================

/// Every field and half-register of [`Registers`], by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    A, F, B, C, D, E, H, L,
    Ixh, Ixl, Iyh, Iyl,
    I, R,
    Af, Bc, De, Hl,
    AfPrime, BcPrime, DePrime, HlPrime,
    Ix, Iy, Sp, Pc,
    Memptr, Iff1, Iff2, Im, Halted,
}

impl Register {
    pub const ALL: [Register; 31] = [
        Register::A, Register::F, Register::B, Register::C, Register::D, Register::E,
        Register::H, Register::L, Register::Ixh, Register::Ixl, Register::Iyh, Register::Iyl,
        Register::I, Register::R, Register::Af, Register::Bc, Register::De, Register::Hl,
        Register::AfPrime, Register::BcPrime, Register::DePrime, Register::HlPrime,
        Register::Ix, Register::Iy, Register::Sp, Register::Pc, Register::Memptr,
        Register::Iff1, Register::Iff2, Register::Im, Register::Halted,
    ];

    /// Assembly-language name, with an apostrophe for the shadow pairs.
    pub fn name(self) -> &'static str {
        use Register::*;
        match self {
            A => "a", F => "f", B => "b", C => "c", D => "d", E => "e", H => "h", L => "l",
            Ixh => "ixh", Ixl => "ixl", Iyh => "iyh", Iyl => "iyl",
            I => "i", R => "r",
            Af => "af", Bc => "bc", De => "de", Hl => "hl",
            AfPrime => "af'", BcPrime => "bc'", DePrime => "de'", HlPrime => "hl'",
            Ix => "ix", Iy => "iy", Sp => "sp", Pc => "pc",
            Memptr => "memptr", Iff1 => "iff1", Iff2 => "iff2", Im => "im", Halted => "halted",
        }
    }

    /// Whether the register holds 16 bits.
    pub fn is_word(self) -> bool {
        use Register::*;
        matches!(self, Af | Bc | De | Hl | AfPrime | BcPrime | DePrime | HlPrime | Ix | Iy | Sp | Pc | Memptr)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = CpuError;

    /// Case-insensitive; accepts `hl'` as well as `hlprime`/`hl_prime`, and
    /// `wz` for the address latch.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = match lower.as_str() {
            "wz" => "memptr",
            "afprime" | "af_prime" => "af'",
            "bcprime" | "bc_prime" => "bc'",
            "deprime" | "de_prime" => "de'",
            "hlprime" | "hl_prime" => "hl'",
            other => other,
        };
        Register::ALL
            .iter()
            .copied()
            .find(|r| r.name() == name)
            .ok_or_else(|| CpuError::UnknownRegister(s.to_string()))
    }
}
