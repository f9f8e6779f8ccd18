//! Opcode tables.
//!
//! Each prefix has a 256-entry table from opcode byte to a fully decoded
//! [`Op`], built at compile time. The execution core looks the byte up and
//! runs the entry; prefix entries redirect the next fetch to another table.

use std::fmt;

// ============================================================================
//  OPERAND TYPES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg8 {
    B, C, D, E, H, L, A,
    Ixh, Ixl, Iyh, Iyl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg16 {
    Bc, De, Hl, Sp, Af, Ix, Iy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Index {
    Ix,
    Iy,
}

/// Memory operand: `(HL)` or `(IX+d)` / `(IY+d)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mem {
    Hl,
    Indexed(Index),
}

/// Source operand of an 8-bit ALU instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg8),
    Imm,
    Mem(Mem),
}

/// Target of a CB-prefixed instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Reg(Reg8),
    AtHl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Nz, Z, Nc, C, Po, Pe, P, M,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add, Adc, Sub, Sbc, And, Xor, Or, Cp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftOp {
    Rlc, Rrc, Rl, Rr, Sla, Sra, Sll, Srl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Ld,
    Cp,
    In,
    Out,
}

/// LDI/LDD/LDIR/LDDR and the CP, IN and OUT families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub decrement: bool,
    pub repeat: bool,
}

/// Which table an opcode byte is looked up in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Base,
    Cb,
    Ed,
    Dd,
    Fd,
    DdCb,
    FdCb,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Table::Base => "base",
            Table::Cb => "CB",
            Table::Ed => "ED",
            Table::Dd => "DD",
            Table::Fd => "FD",
            Table::DdCb => "DDCB",
            Table::FdCb => "FDCB",
        })
    }
}

// ============================================================================
//  MICRO-OPERATIONS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Nop,
    /// Fetch the next opcode from another table.
    Prefix(Table),
    /// DD CB / FD CB: displacement, then the opcode from the indexed-bit table.
    IndexedBits(Index),

    // 8-bit loads
    Ld(Reg8, Reg8),
    LdImm(Reg8),
    LdFromMem(Reg8, Mem),
    LdToMem(Mem, Reg8),
    LdMemImm(Mem),
    /// LD A,(BC) / LD A,(DE)
    LdAFromPair(Reg16),
    /// LD (BC),A / LD (DE),A
    LdPairFromA(Reg16),
    LdAFromAbs,
    LdAbsFromA,
    LdAI,
    LdAR,
    LdIA,
    LdRA,

    // 16-bit loads
    LdWideImm(Reg16),
    LdWideFromAbs(Reg16),
    LdAbsFromWide(Reg16),
    LdSp(Reg16),
    Push(Reg16),
    Pop(Reg16),

    // Exchanges
    ExAf,
    Exx,
    ExDeHl,
    ExSp(Reg16),

    // 8-bit arithmetic and logic
    Alu(AluOp, Operand),
    Inc(Reg8),
    Dec(Reg8),
    IncMem(Mem),
    DecMem(Mem),
    Daa,
    Cpl,
    Neg,
    Scf,
    Ccf,

    // 16-bit arithmetic
    AddWide(Reg16, Reg16),
    AdcHl(Reg16),
    SbcHl(Reg16),
    IncWide(Reg16),
    DecWide(Reg16),

    // Rotates on A
    Rlca,
    Rrca,
    Rla,
    Rra,
    Rld,
    Rrd,

    // CB table
    Shift(ShiftOp, Target),
    Bit(u8, Target),
    Res(u8, Target),
    Set(u8, Target),

    // DDCB / FDCB tables; operand is the latched (index+d). The register,
    // when present, also receives the result.
    IndexedShift(ShiftOp, Option<Reg8>),
    IndexedBit(u8),
    IndexedRes(u8, Option<Reg8>),
    IndexedSet(u8, Option<Reg8>),

    // Control flow
    Jp(Option<Cond>),
    JpWide(Reg16),
    Jr(Option<Cond>),
    Djnz,
    Call(Option<Cond>),
    Ret(Option<Cond>),
    /// RETN and RETI: both copy IFF2 into IFF1.
    Retn,
    Rst(u8),

    // CPU control
    Halt,
    Di,
    Ei,
    Im(u8),

    // I/O
    InAImm,
    OutImmA,
    /// IN r,(C); `None` only sets flags.
    InC(Option<Reg8>),
    /// OUT (C),r; `None` writes 0.
    OutC(Option<Reg8>),

    Block(Block),

    /// No assigned behavior.
    Unknown,
}

// ============================================================================
//  TABLES
// ============================================================================

pub static BASE: [Op; 256] = build_base();
pub static CB: [Op; 256] = build_cb();
pub static ED: [Op; 256] = build_ed();
pub static DD: [Op; 256] = build_index(Index::Ix);
pub static FD: [Op; 256] = build_index(Index::Iy);
pub static DDCB: [Op; 256] = build_indexed_bits();
pub static FDCB: [Op; 256] = build_indexed_bits();

impl Table {
    #[inline(always)]
    pub fn lookup(self, opcode: u8) -> Op {
        let table = match self {
            Table::Base => &BASE,
            Table::Cb => &CB,
            Table::Ed => &ED,
            Table::Dd => &DD,
            Table::Fd => &FD,
            Table::DdCb => &DDCB,
            Table::FdCb => &FDCB,
        };
        table[opcode as usize]
    }
}

const fn build_base() -> [Op; 256] {
    let mut table = [Op::Nop; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = base_entry(i as u8);
        i += 1;
    }
    table
}

const fn build_cb() -> [Op; 256] {
    let mut table = [Op::Nop; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = cb_entry(i as u8);
        i += 1;
    }
    table
}

const fn build_ed() -> [Op; 256] {
    let mut table = [Op::Nop; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ed_entry(i as u8);
        i += 1;
    }
    table
}

const fn build_index(index: Index) -> [Op; 256] {
    let mut table = [Op::Nop; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = index_entry(i as u8, index);
        i += 1;
    }
    table
}

const fn build_indexed_bits() -> [Op; 256] {
    let mut table = [Op::Nop; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = indexed_bit_entry(i as u8);
        i += 1;
    }
    table
}

// ============================================================================
//  FIELD DECODING (x = bits 7-6, y = bits 5-3, z = bits 2-0, p = y >> 1)
// ============================================================================

/// Register for a 3-bit field; 6 is the memory operand.
const fn reg8(code: u8) -> Option<Reg8> {
    match code & 7 {
        0 => Some(Reg8::B),
        1 => Some(Reg8::C),
        2 => Some(Reg8::D),
        3 => Some(Reg8::E),
        4 => Some(Reg8::H),
        5 => Some(Reg8::L),
        6 => None,
        _ => Some(Reg8::A),
    }
}

/// BC, DE, HL, SP
const fn pair_sp(p: u8) -> Reg16 {
    match p & 3 {
        0 => Reg16::Bc,
        1 => Reg16::De,
        2 => Reg16::Hl,
        _ => Reg16::Sp,
    }
}

/// BC, DE, HL, AF
const fn pair_af(p: u8) -> Reg16 {
    match p & 3 {
        0 => Reg16::Bc,
        1 => Reg16::De,
        2 => Reg16::Hl,
        _ => Reg16::Af,
    }
}

const fn cond(y: u8) -> Cond {
    match y & 7 {
        0 => Cond::Nz,
        1 => Cond::Z,
        2 => Cond::Nc,
        3 => Cond::C,
        4 => Cond::Po,
        5 => Cond::Pe,
        6 => Cond::P,
        _ => Cond::M,
    }
}

const fn alu_op(y: u8) -> AluOp {
    match y & 7 {
        0 => AluOp::Add,
        1 => AluOp::Adc,
        2 => AluOp::Sub,
        3 => AluOp::Sbc,
        4 => AluOp::And,
        5 => AluOp::Xor,
        6 => AluOp::Or,
        _ => AluOp::Cp,
    }
}

const fn shift_op(y: u8) -> ShiftOp {
    match y & 7 {
        0 => ShiftOp::Rlc,
        1 => ShiftOp::Rrc,
        2 => ShiftOp::Rl,
        3 => ShiftOp::Rr,
        4 => ShiftOp::Sla,
        5 => ShiftOp::Sra,
        6 => ShiftOp::Sll,
        _ => ShiftOp::Srl,
    }
}

const fn target(z: u8) -> Target {
    match reg8(z) {
        Some(r) => Target::Reg(r),
        None => Target::AtHl,
    }
}

// ============================================================================
//  UNPREFIXED
// ============================================================================

const fn base_entry(op: u8) -> Op {
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;
    let q = y & 1;

    match op >> 6 {
        0 => match z {
            0 => match y {
                0 => Op::Nop,
                1 => Op::ExAf,
                2 => Op::Djnz,
                3 => Op::Jr(None),
                _ => Op::Jr(Some(cond(y - 4))),
            },
            1 => {
                if q == 0 {
                    Op::LdWideImm(pair_sp(p))
                } else {
                    Op::AddWide(Reg16::Hl, pair_sp(p))
                }
            }
            2 => match y {
                0 => Op::LdPairFromA(Reg16::Bc),
                1 => Op::LdAFromPair(Reg16::Bc),
                2 => Op::LdPairFromA(Reg16::De),
                3 => Op::LdAFromPair(Reg16::De),
                4 => Op::LdAbsFromWide(Reg16::Hl),
                5 => Op::LdWideFromAbs(Reg16::Hl),
                6 => Op::LdAbsFromA,
                _ => Op::LdAFromAbs,
            },
            3 => {
                if q == 0 {
                    Op::IncWide(pair_sp(p))
                } else {
                    Op::DecWide(pair_sp(p))
                }
            }
            4 => match reg8(y) {
                Some(r) => Op::Inc(r),
                None => Op::IncMem(Mem::Hl),
            },
            5 => match reg8(y) {
                Some(r) => Op::Dec(r),
                None => Op::DecMem(Mem::Hl),
            },
            6 => match reg8(y) {
                Some(r) => Op::LdImm(r),
                None => Op::LdMemImm(Mem::Hl),
            },
            _ => match y {
                0 => Op::Rlca,
                1 => Op::Rrca,
                2 => Op::Rla,
                3 => Op::Rra,
                4 => Op::Daa,
                5 => Op::Cpl,
                6 => Op::Scf,
                _ => Op::Ccf,
            },
        },
        1 => match (reg8(y), reg8(z)) {
            (Some(dst), Some(src)) => Op::Ld(dst, src),
            (Some(dst), None) => Op::LdFromMem(dst, Mem::Hl),
            (None, Some(src)) => Op::LdToMem(Mem::Hl, src),
            (None, None) => Op::Halt,
        },
        2 => match reg8(z) {
            Some(r) => Op::Alu(alu_op(y), Operand::Reg(r)),
            None => Op::Alu(alu_op(y), Operand::Mem(Mem::Hl)),
        },
        _ => match z {
            0 => Op::Ret(Some(cond(y))),
            1 => {
                if q == 0 {
                    Op::Pop(pair_af(p))
                } else {
                    match p {
                        0 => Op::Ret(None),
                        1 => Op::Exx,
                        2 => Op::JpWide(Reg16::Hl),
                        _ => Op::LdSp(Reg16::Hl),
                    }
                }
            }
            2 => Op::Jp(Some(cond(y))),
            3 => match y {
                0 => Op::Jp(None),
                1 => Op::Prefix(Table::Cb),
                2 => Op::OutImmA,
                3 => Op::InAImm,
                4 => Op::ExSp(Reg16::Hl),
                5 => Op::ExDeHl,
                6 => Op::Di,
                _ => Op::Ei,
            },
            4 => Op::Call(Some(cond(y))),
            5 => {
                if q == 0 {
                    Op::Push(pair_af(p))
                } else {
                    match p {
                        0 => Op::Call(None),
                        1 => Op::Prefix(Table::Dd),
                        2 => Op::Prefix(Table::Ed),
                        _ => Op::Prefix(Table::Fd),
                    }
                }
            }
            6 => Op::Alu(alu_op(y), Operand::Imm),
            _ => Op::Rst(y * 8),
        },
    }
}

// ============================================================================
//  CB
// ============================================================================

const fn cb_entry(op: u8) -> Op {
    let y = (op >> 3) & 7;
    let t = target(op & 7);
    match op >> 6 {
        0 => Op::Shift(shift_op(y), t),
        1 => Op::Bit(y, t),
        2 => Op::Res(y, t),
        _ => Op::Set(y, t),
    }
}

// ============================================================================
//  ED
// ============================================================================

const fn ed_entry(op: u8) -> Op {
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;
    let q = y & 1;

    match op {
        0x40..=0x7F => match z {
            0 => Op::InC(reg8(y)),
            1 => Op::OutC(reg8(y)),
            2 => {
                if q == 0 {
                    Op::SbcHl(pair_sp(p))
                } else {
                    Op::AdcHl(pair_sp(p))
                }
            }
            3 => {
                if q == 0 {
                    Op::LdAbsFromWide(pair_sp(p))
                } else {
                    Op::LdWideFromAbs(pair_sp(p))
                }
            }
            4 => Op::Neg,
            5 => Op::Retn,
            6 => match y & 3 {
                0 | 1 => Op::Im(0),
                2 => Op::Im(1),
                _ => Op::Im(2),
            },
            _ => match y {
                0 => Op::LdIA,
                1 => Op::LdRA,
                2 => Op::LdAI,
                3 => Op::LdAR,
                4 => Op::Rrd,
                5 => Op::Rld,
                _ => Op::Unknown,
            },
        },
        0xA0..=0xBF if z <= 3 && y >= 4 => {
            let kind = match z {
                0 => BlockKind::Ld,
                1 => BlockKind::Cp,
                2 => BlockKind::In,
                _ => BlockKind::Out,
            };
            Op::Block(Block { kind, decrement: q == 1, repeat: y >= 6 })
        }
        _ => Op::Unknown,
    }
}

// ============================================================================
//  DD / FD
// ============================================================================

/// H and L become the index halves, `(HL)` becomes `(index+d)` (in which
/// case H and L keep their usual meaning), and HL becomes the index
/// register. Anything that does not touch HL runs as unprefixed.
const fn index_entry(op: u8, index: Index) -> Op {
    let (wide, high, low) = match index {
        Index::Ix => (Reg16::Ix, Reg8::Ixh, Reg8::Ixl),
        Index::Iy => (Reg16::Iy, Reg8::Iyh, Reg8::Iyl),
    };
    let mem = Mem::Indexed(index);

    match op {
        0x09 => Op::AddWide(wide, Reg16::Bc),
        0x19 => Op::AddWide(wide, Reg16::De),
        0x29 => Op::AddWide(wide, wide),
        0x39 => Op::AddWide(wide, Reg16::Sp),
        0x21 => Op::LdWideImm(wide),
        0x22 => Op::LdAbsFromWide(wide),
        0x2A => Op::LdWideFromAbs(wide),
        0x23 => Op::IncWide(wide),
        0x2B => Op::DecWide(wide),
        0x24 => Op::Inc(high),
        0x25 => Op::Dec(high),
        0x26 => Op::LdImm(high),
        0x2C => Op::Inc(low),
        0x2D => Op::Dec(low),
        0x2E => Op::LdImm(low),
        0x34 => Op::IncMem(mem),
        0x35 => Op::DecMem(mem),
        0x36 => Op::LdMemImm(mem),
        0x40..=0x7F if op != 0x76 => {
            let dst = (op >> 3) & 7;
            let src = op & 7;
            // Con (IX+d) los registros H y L son los reales.
            match (reg8(dst), reg8(src)) {
                (Some(r), None) => Op::LdFromMem(r, mem),
                (None, Some(r)) => Op::LdToMem(mem, r),
                _ if dst == 4 || dst == 5 || src == 4 || src == 5 => {
                    Op::Ld(index_half(dst, high, low), index_half(src, high, low))
                }
                _ => base_entry(op),
            }
        }
        0x80..=0xBF => {
            let alu = alu_op((op >> 3) & 7);
            match op & 7 {
                4 => Op::Alu(alu, Operand::Reg(high)),
                5 => Op::Alu(alu, Operand::Reg(low)),
                6 => Op::Alu(alu, Operand::Mem(mem)),
                _ => base_entry(op),
            }
        }
        0xCB => Op::IndexedBits(index),
        0xE1 => Op::Pop(wide),
        0xE3 => Op::ExSp(wide),
        0xE5 => Op::Push(wide),
        0xE9 => Op::JpWide(wide),
        0xF9 => Op::LdSp(wide),
        _ => base_entry(op),
    }
}

/// Register field with H/L replaced by the index halves.
const fn index_half(code: u8, high: Reg8, low: Reg8) -> Reg8 {
    match code & 7 {
        4 => high,
        5 => low,
        _ => match reg8(code) {
            Some(r) => r,
            None => Reg8::A,
        },
    }
}

// ============================================================================
//  DDCB / FDCB
// ============================================================================

/// The register field (other than 6) names a register that also gets the
/// result. BIT ignores it.
const fn indexed_bit_entry(op: u8) -> Op {
    let y = (op >> 3) & 7;
    let copy = reg8(op & 7);
    match op >> 6 {
        0 => Op::IndexedShift(shift_op(y), copy),
        1 => Op::IndexedBit(y),
        2 => Op::IndexedRes(y, copy),
        _ => Op::IndexedSet(y, copy),
    }
}
