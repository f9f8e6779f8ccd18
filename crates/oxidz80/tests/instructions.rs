use std::cell::RefCell;
use std::rc::Rc;

use oxide_core::{Bus, Cpu, FlatBus};
use oxidz80::flags::{C, H, N, P, S, V, X3, X5, Z};
use oxidz80::{CpuConfig, CpuError, Flags, Register, Registers, Table, Z80};

// ============================================================================
//  HELPERS
// ============================================================================

fn machine(program: &[u8]) -> Z80<FlatBus> {
    machine_at(program, 0x0000)
}

fn machine_at(program: &[u8], at: u16) -> Z80<FlatBus> {
    let mut bus = FlatBus::new();
    bus.load(at, program).unwrap();
    let mut cpu = Z80::new(bus);
    cpu.registers_mut().pc = at;
    cpu
}

/// Runs one instruction and returns the T-states it charged.
fn timed_step(cpu: &mut Z80<FlatBus>) -> u64 {
    let before = cpu.bus().t_states;
    cpu.step();
    cpu.bus().t_states - before
}

fn poke(cpu: &mut Z80<FlatBus>, address: u16, bytes: &[u8]) {
    cpu.bus_mut().load(address, bytes).unwrap();
}

fn peek(cpu: &mut Z80<FlatBus>, address: u16) -> u8 {
    cpu.bus_mut().read_memory(address)
}

// ============================================================================
//  BASIC PROPERTIES
// ============================================================================

#[test]
fn ld_a_immediate_costs_seven_t_states() {
    let mut cpu = machine(&[0x3E, 0x42]);
    assert_eq!(timed_step(&mut cpu), 7);
    assert_eq!(cpu.registers().a(), 0x42);
    assert_eq!(cpu.pc(), 2);
    assert_eq!(cpu.registers().r, 1);
}

#[test]
fn xor_a_clears_a_and_sets_zero_and_parity() {
    let mut cpu = machine(&[0xAF]);
    cpu.registers_mut().af = 0x55FF;
    cpu.step();
    assert_eq!(cpu.registers().a(), 0x00);
    assert_eq!(cpu.registers().f(), Z | P);
}

#[test]
fn inc_a_from_0x7f_overflows() {
    let mut cpu = machine(&[0x3C]);
    cpu.registers_mut().af = 0x7F00 | N as u16;
    assert_eq!(timed_step(&mut cpu), 4);
    assert_eq!(cpu.registers().a(), 0x80);
    assert_eq!(cpu.registers().f(), S | H | V);
}

#[test]
fn inc_a_from_0xff_wraps_to_zero() {
    let mut cpu = machine(&[0x3C]);
    cpu.registers_mut().af = 0xFF00;
    cpu.step();
    assert_eq!(cpu.registers().a(), 0x00);
    let flags = cpu.flags();
    assert!(flags.contains(Flags::Z | Flags::H));
    assert!(!flags.contains(Flags::V));
}

#[test]
fn parity_and_overflow_share_a_bit() {
    // ADD A,0x01 with A=0x7F: signed overflow shows up as P.
    let mut cpu = machine(&[0xC6, 0x01, 0xB7]);
    cpu.registers_mut().set_a(0x7F);
    cpu.step();
    assert!(cpu.flags().contains(Flags::P));
    assert!(cpu.flags().contains(Flags::V));
    // OR A on 0x80 (odd parity) clears the same bit.
    cpu.step();
    assert_eq!(cpu.registers().f() & V, 0);
}

#[test]
fn register_copy_round_trip() {
    // B, C, D, E, H, L, A by opcode field.
    let codes: [(u8, Register); 7] = [
        (0, Register::B),
        (1, Register::C),
        (2, Register::D),
        (3, Register::E),
        (4, Register::H),
        (5, Register::L),
        (7, Register::A),
    ];
    for &(src, src_reg) in &codes {
        for &(dst, dst_reg) in &codes {
            // LD src,0xA5 ; LD dst,src
            let program = [0x06 | (src << 3), 0xA5, 0x40 | (dst << 3) | src];
            let mut cpu = machine(&program);
            cpu.registers_mut().af = 0x00D7;
            cpu.registers_mut().bc = 0x0102;
            cpu.step();
            assert_eq!(cpu.registers().get(src_reg), 0xA5);

            let mut expected = cpu.registers().clone();
            expected.set(dst_reg, 0xA5);
            expected.pc += 1;
            expected.r += 1;
            assert_eq!(timed_step(&mut cpu), 4);
            assert_eq!(*cpu.registers(), expected, "LD {dst_reg},{src_reg}");
        }
    }
}

#[test]
fn call_and_ret_round_trip() {
    let mut cpu = machine_at(&[0xCD, 0x34, 0x12], 0x0100);
    poke(&mut cpu, 0x1234, &[0xC9]);
    cpu.registers_mut().sp = 0xFF00;

    assert_eq!(timed_step(&mut cpu), 17);
    assert_eq!(cpu.pc(), 0x1234);
    assert_eq!(cpu.registers().sp, 0xFEFE);
    assert_eq!(peek(&mut cpu, 0xFEFE), 0x03);
    assert_eq!(peek(&mut cpu, 0xFEFF), 0x01);
    assert_eq!(cpu.registers().memptr, 0x1234);

    assert_eq!(timed_step(&mut cpu), 10);
    assert_eq!(cpu.pc(), 0x0103);
    assert_eq!(cpu.registers().sp, 0xFF00);
    assert_eq!(cpu.registers().memptr, 0x0103);
}

#[test]
fn push_pop_and_rst() {
    let mut cpu = machine(&[0xC5, 0xD1, 0xFF]);
    cpu.registers_mut().bc = 0x1234;
    cpu.registers_mut().sp = 0x9000;
    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(timed_step(&mut cpu), 10);
    assert_eq!(cpu.registers().de, 0x1234);
    assert_eq!(cpu.registers().sp, 0x9000);

    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(cpu.pc(), 0x0038);
    assert_eq!(cpu.registers().memptr, 0x0038);
    assert_eq!(cpu.bus_mut().read_word_le(0x8FFE), 0x0003);
}

#[test]
fn exchanges() {
    let mut cpu = machine(&[0x08, 0xD9, 0xEB]);
    let regs = cpu.registers_mut();
    regs.af = 0x1111;
    regs.af_prime = 0x2222;
    regs.bc = 0x3333;
    regs.bc_prime = 0x4444;
    regs.de = 0x5555;
    regs.hl = 0x6666;
    regs.hl_prime = 0x7777;
    cpu.step();
    assert_eq!((cpu.registers().af, cpu.registers().af_prime), (0x2222, 0x1111));
    cpu.step();
    assert_eq!(cpu.registers().bc, 0x4444);
    assert_eq!(cpu.registers().hl, 0x7777);
    assert_eq!(cpu.registers().de_prime, 0x5555);
    cpu.step();
    assert_eq!(cpu.registers().de, 0x7777);
    assert_eq!(cpu.registers().hl, 0x0000);
}

#[test]
fn ex_sp_hl() {
    let mut cpu = machine(&[0xE3]);
    poke(&mut cpu, 0x8000, &[0x34, 0x12]);
    cpu.registers_mut().sp = 0x8000;
    cpu.registers_mut().hl = 0xABCD;
    assert_eq!(timed_step(&mut cpu), 19);
    assert_eq!(cpu.registers().hl, 0x1234);
    assert_eq!(cpu.registers().memptr, 0x1234);
    assert_eq!(peek(&mut cpu, 0x8000), 0xCD);
    assert_eq!(peek(&mut cpu, 0x8001), 0xAB);
}

#[test]
fn fetch_wraps_pc_past_ffff() {
    let mut cpu = machine_at(&[0x3E], 0xFFFF); // LD A,n con el operando en 0x0000
    poke(&mut cpu, 0x0000, &[0x42]);
    assert_eq!(timed_step(&mut cpu), 7);
    assert_eq!(cpu.registers().a(), 0x42);
    assert_eq!(cpu.pc(), 0x0001);
}

#[test]
fn push_wraps_sp_below_zero() {
    let mut cpu = machine_at(&[0xC5, 0xD1], 0x1000); // PUSH BC ; POP DE
    cpu.registers_mut().bc = 0x1234;
    cpu.registers_mut().sp = 0x0001;
    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(cpu.registers().sp, 0xFFFF);
    assert_eq!(peek(&mut cpu, 0x0000), 0x12);
    assert_eq!(peek(&mut cpu, 0xFFFF), 0x34);

    cpu.step();
    assert_eq!(cpu.registers().de, 0x1234);
    assert_eq!(cpu.registers().sp, 0x0001);
}

// ============================================================================
//  CONTROL FLOW
// ============================================================================

#[test]
fn djnz_loops_until_b_is_zero() {
    let mut cpu = machine(&[0x10, 0xFE]); // DJNZ $
    cpu.registers_mut().set_b(2);
    assert_eq!(timed_step(&mut cpu), 13);
    assert_eq!(cpu.pc(), 0);
    assert_eq!(timed_step(&mut cpu), 8);
    assert_eq!(cpu.pc(), 2);
    assert_eq!(cpu.registers().b(), 0);
}

#[test]
fn jr_conditional_timing() {
    let mut cpu = machine(&[0x20, 0x05]); // JR NZ,+5
    cpu.registers_mut().set_f(Z);
    assert_eq!(timed_step(&mut cpu), 7);
    assert_eq!(cpu.pc(), 2);

    let mut cpu = machine(&[0x20, 0x05]);
    assert_eq!(timed_step(&mut cpu), 12);
    assert_eq!(cpu.pc(), 7);
    assert_eq!(cpu.registers().memptr, 7);
}

#[test]
fn conditional_call_and_ret() {
    // CALL NZ,0x2000 not taken: address still latched.
    let mut cpu = machine(&[0xC4, 0x00, 0x20]);
    cpu.registers_mut().set_f(Z);
    assert_eq!(timed_step(&mut cpu), 10);
    assert_eq!(cpu.pc(), 3);
    assert_eq!(cpu.registers().memptr, 0x2000);

    // RET Z
    let mut cpu = machine(&[0xC8]);
    cpu.registers_mut().sp = 0x8000;
    poke(&mut cpu, 0x8000, &[0x00, 0x40]);
    assert_eq!(timed_step(&mut cpu), 5);
    assert_eq!(cpu.pc(), 1);
    cpu.registers_mut().pc = 0;
    cpu.registers_mut().set_f(Z);
    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(cpu.pc(), 0x4000);
}

#[test]
fn jp_latches_target_even_when_not_taken() {
    let mut cpu = machine(&[0xDA, 0x78, 0x56]); // JP C,0x5678
    assert_eq!(timed_step(&mut cpu), 10);
    assert_eq!(cpu.pc(), 3);
    assert_eq!(cpu.registers().memptr, 0x5678);
}

// ============================================================================
//  MEMPTR
// ============================================================================

#[test]
fn memptr_after_accumulator_loads_and_stores() {
    let mut cpu = machine(&[0x02, 0x0A, 0x3A, 0x00, 0x50, 0x32, 0xFF, 0x50]);
    cpu.registers_mut().set_a(0x12);
    cpu.registers_mut().bc = 0x30FF;

    cpu.step(); // LD (BC),A
    assert_eq!(cpu.registers().memptr, 0x1200);
    cpu.step(); // LD A,(BC)
    assert_eq!(cpu.registers().memptr, 0x3100);
    assert_eq!(timed_step(&mut cpu), 13); // LD A,(0x5000)
    assert_eq!(cpu.registers().memptr, 0x5001);
    cpu.registers_mut().set_a(0x77);
    cpu.step(); // LD (0x50FF),A
    assert_eq!(cpu.registers().memptr, 0x7700);
    assert_eq!(peek(&mut cpu, 0x50FF), 0x77);
}

#[test]
fn sixteen_bit_arithmetic_timing_and_memptr() {
    let mut cpu = machine(&[0x09, 0xED, 0x42, 0x03, 0xF9]);
    cpu.registers_mut().hl = 0x1000;
    cpu.registers_mut().bc = 0x0234;
    assert_eq!(timed_step(&mut cpu), 11); // ADD HL,BC
    assert_eq!(cpu.registers().hl, 0x1234);
    assert_eq!(cpu.registers().memptr, 0x1001);

    assert_eq!(timed_step(&mut cpu), 15); // SBC HL,BC
    assert_eq!(cpu.registers().hl, 0x1000);
    assert_eq!(cpu.registers().memptr, 0x1235);
    assert_ne!(cpu.registers().f() & N, 0);

    assert_eq!(timed_step(&mut cpu), 6); // INC BC
    assert_eq!(cpu.registers().bc, 0x0235);
    assert_eq!(timed_step(&mut cpu), 6); // LD SP,HL
    assert_eq!(cpu.registers().sp, 0x1000);
}

#[test]
fn sixteen_bit_loads_through_memory() {
    // LD (0x6000),HL ; LD DE,(0x6000)
    let mut cpu = machine(&[0x22, 0x00, 0x60, 0xED, 0x5B, 0x00, 0x60]);
    cpu.registers_mut().hl = 0xBEEF;
    assert_eq!(timed_step(&mut cpu), 16);
    assert_eq!(cpu.registers().memptr, 0x6001);
    assert_eq!(timed_step(&mut cpu), 20);
    assert_eq!(cpu.registers().de, 0xBEEF);
}

// ============================================================================
//  PREFIXES
// ============================================================================

#[test]
fn prefix_chain_keeps_last_index_prefix() {
    let mut cpu = machine(&[0xDD, 0xDD, 0xFD, 0x21, 0x34, 0x12]);
    assert_eq!(timed_step(&mut cpu), 22);
    assert_eq!(cpu.registers().iy, 0x1234);
    assert_eq!(cpu.registers().ix, 0x0000);
    assert_eq!(cpu.registers().r, 4);
    assert_eq!(cpu.pc(), 6);
}

#[test]
fn long_prefix_run_is_one_step() {
    let mut program = vec![0xDD; 40_000];
    program.push(0x00);
    let mut cpu = machine(&program);
    assert_eq!(timed_step(&mut cpu), 4 * 40_001);
    assert_eq!(cpu.pc(), 40_001);
}

#[test]
fn index_prefix_on_plain_instruction() {
    let mut cpu = machine(&[0xDD, 0x3E, 0x05]);
    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(cpu.registers().a(), 0x05);
}

#[test]
fn indexed_load_with_negative_displacement() {
    let mut cpu = machine(&[0xDD, 0x7E, 0xFE]); // LD A,(IX-2)
    poke(&mut cpu, 0x0FFE, &[0x99]);
    cpu.registers_mut().ix = 0x1000;
    assert_eq!(timed_step(&mut cpu), 19);
    assert_eq!(cpu.registers().a(), 0x99);
    assert_eq!(cpu.registers().memptr, 0x0FFE);
}

#[test]
fn indexed_memory_operand_keeps_real_h_and_l() {
    let mut cpu = machine(&[0xDD, 0x66, 0x01, 0xFD, 0x75, 0x00]); // LD H,(IX+1) ; LD (IY+0),L
    poke(&mut cpu, 0x2001, &[0xAB]);
    cpu.registers_mut().ix = 0x2000;
    cpu.registers_mut().iy = 0x3000;
    cpu.registers_mut().hl = 0x00CD;
    cpu.step();
    assert_eq!(cpu.registers().h(), 0xAB);
    assert_eq!(cpu.registers().ix, 0x2000);
    assert_eq!(timed_step(&mut cpu), 19);
    assert_eq!(peek(&mut cpu, 0x3000), 0xCD);
}

#[test]
fn index_register_halves() {
    // LD IXH,0x12 ; LD IXL,0x34 ; ADD A,IXL ; LD B,IYH
    let mut cpu = machine(&[0xDD, 0x26, 0x12, 0xDD, 0x2E, 0x34, 0xDD, 0x85, 0xFD, 0x44]);
    cpu.registers_mut().iy = 0x5600;
    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(cpu.registers().ix, 0x1234);
    assert_eq!(timed_step(&mut cpu), 8);
    assert_eq!(cpu.registers().a(), 0x34);
    cpu.step();
    assert_eq!(cpu.registers().b(), 0x56);
}

#[test]
fn indexed_read_modify_write() {
    let mut cpu = machine(&[0xDD, 0x34, 0x05, 0xDD, 0x36, 0x02, 0x77]); // INC (IX+5) ; LD (IX+2),0x77
    poke(&mut cpu, 0x3005, &[0x7F]);
    cpu.registers_mut().ix = 0x3000;
    assert_eq!(timed_step(&mut cpu), 23);
    assert_eq!(peek(&mut cpu, 0x3005), 0x80);
    assert_ne!(cpu.registers().f() & V, 0);
    assert_eq!(timed_step(&mut cpu), 19);
    assert_eq!(peek(&mut cpu, 0x3002), 0x77);
    assert_eq!(cpu.registers().memptr, 0x3002);
}

#[test]
fn indexed_bit_takes_x3_x5_from_address() {
    let mut cpu = machine(&[0xDD, 0xCB, 0x10, 0x46]); // BIT 0,(IX+0x10)
    poke(&mut cpu, 0x2810, &[0x01]);
    cpu.registers_mut().ix = 0x2800;
    assert_eq!(timed_step(&mut cpu), 20);
    assert_eq!(cpu.registers().f(), H | X5 | X3);
    // Opcode byte after the displacement is not an M1 fetch.
    assert_eq!(cpu.registers().r, 2);
    assert_eq!(cpu.pc(), 4);
}

#[test]
fn indexed_set_copies_result_into_register() {
    let mut cpu = machine(&[0xFD, 0xCB, 0xFF, 0xC0]); // SET 0,(IY-1),B
    poke(&mut cpu, 0x4000, &[0x80]);
    cpu.registers_mut().iy = 0x4001;
    assert_eq!(timed_step(&mut cpu), 23);
    assert_eq!(peek(&mut cpu, 0x4000), 0x81);
    assert_eq!(cpu.registers().b(), 0x81);
}

#[test]
fn indexed_rotate_in_place() {
    let mut cpu = machine(&[0xDD, 0xCB, 0x00, 0x06]); // RLC (IX+0)
    poke(&mut cpu, 0x5000, &[0x81]);
    cpu.registers_mut().ix = 0x5000;
    assert_eq!(timed_step(&mut cpu), 23);
    assert_eq!(peek(&mut cpu, 0x5000), 0x03);
    assert_ne!(cpu.registers().f() & C, 0);
}

#[test]
fn cb_memory_operand_costs_fifteen() {
    let mut cpu = machine(&[0xCB, 0x06, 0xCB, 0xFE, 0xCB, 0x46]); // RLC (HL) ; SET 7,(HL) ; BIT 0,(HL)
    cpu.registers_mut().hl = 0x4000;
    poke(&mut cpu, 0x4000, &[0x01]);
    assert_eq!(timed_step(&mut cpu), 15);
    assert_eq!(peek(&mut cpu, 0x4000), 0x02);
    assert_eq!(timed_step(&mut cpu), 15);
    assert_eq!(peek(&mut cpu, 0x4000), 0x82);
    assert_eq!(timed_step(&mut cpu), 12);
    assert_ne!(cpu.registers().f() & Z, 0);
}

// ============================================================================
//  ED GROUP
// ============================================================================

#[test]
fn ld_a_i_and_r_report_iff2() {
    let mut cpu = machine(&[0xED, 0x57, 0xED, 0x5F, 0xED, 0x4F]);
    cpu.registers_mut().i = 0x80;
    cpu.registers_mut().iff2 = true;
    cpu.registers_mut().set_r_combined(0x90);
    assert_eq!(timed_step(&mut cpu), 9);
    assert_eq!(cpu.registers().a(), 0x80);
    assert_eq!(cpu.registers().f(), S | V);

    cpu.registers_mut().iff2 = false;
    cpu.step(); // LD A,R: two more refreshes since the snapshot
    assert_eq!(cpu.registers().a(), 0x94);
    assert_eq!(cpu.registers().f() & V, 0);

    cpu.registers_mut().set_a(0xFF);
    assert_eq!(timed_step(&mut cpu), 9); // LD R,A
    assert_eq!(cpu.registers().r, 0x7F);
    assert_eq!(cpu.registers().r7, 0x80);
}

#[test]
fn neg_of_0x80_overflows() {
    let mut cpu = machine(&[0xED, 0x44]);
    cpu.registers_mut().set_a(0x80);
    assert_eq!(timed_step(&mut cpu), 8);
    assert_eq!(cpu.registers().a(), 0x80);
    let f = cpu.registers().f();
    assert_eq!(f & (S | V | N | C), S | V | N | C);
}

#[test]
fn rld_rotates_nibbles_through_memory() {
    let mut cpu = machine(&[0xED, 0x6F]);
    cpu.registers_mut().set_a(0x12);
    cpu.registers_mut().hl = 0x4000;
    poke(&mut cpu, 0x4000, &[0x34]);
    assert_eq!(timed_step(&mut cpu), 18);
    assert_eq!(cpu.registers().a(), 0x13);
    assert_eq!(peek(&mut cpu, 0x4000), 0x42);
    assert_eq!(cpu.registers().memptr, 0x4001);
}

#[test]
fn im_instructions() {
    let mut cpu = machine(&[0xED, 0x5E, 0xED, 0x56, 0xED, 0x46]);
    cpu.step();
    assert_eq!(cpu.registers().im, 2);
    cpu.step();
    assert_eq!(cpu.registers().im, 1);
    cpu.step();
    assert_eq!(cpu.registers().im, 0);
}

#[test]
fn ldir_copies_one_byte_per_step() {
    let mut cpu = machine(&[0xED, 0xB0]);
    poke(&mut cpu, 0x1000, &[1, 2, 3]);
    let regs = cpu.registers_mut();
    regs.hl = 0x1000;
    regs.de = 0x2000;
    regs.bc = 3;

    assert_eq!(timed_step(&mut cpu), 21);
    assert_eq!(cpu.pc(), 0);
    assert_eq!(cpu.registers().memptr, 1);
    assert_ne!(cpu.registers().f() & V, 0);
    assert_eq!(timed_step(&mut cpu), 21);
    assert_eq!(timed_step(&mut cpu), 16);
    assert_eq!(cpu.pc(), 2);

    let regs = cpu.registers();
    assert_eq!((regs.bc, regs.hl, regs.de), (0, 0x1003, 0x2003));
    assert_eq!(regs.f() & V, 0);
    for i in 0..3 {
        assert_eq!(peek(&mut cpu, 0x2000 + i), i as u8 + 1);
    }
}

#[test]
fn lddr_walks_downwards() {
    let mut cpu = machine(&[0xED, 0xB8]);
    poke(&mut cpu, 0x1000, &[0xAA, 0xBB]);
    let regs = cpu.registers_mut();
    regs.hl = 0x1001;
    regs.de = 0x2001;
    regs.bc = 2;
    cpu.step();
    cpu.step();
    assert_eq!(peek(&mut cpu, 0x2000), 0xAA);
    assert_eq!(peek(&mut cpu, 0x2001), 0xBB);
    assert_eq!(cpu.registers().hl, 0x0FFF);
}

#[test]
fn cpir_stops_on_match() {
    let mut cpu = machine(&[0xED, 0xB1]);
    poke(&mut cpu, 0x1000, &[0x11, 0x22, 0x33, 0x44]);
    let regs = cpu.registers_mut();
    regs.hl = 0x1000;
    regs.bc = 5;
    regs.set_a(0x33);

    assert_eq!(timed_step(&mut cpu), 21);
    assert_eq!(timed_step(&mut cpu), 21);
    assert_eq!(timed_step(&mut cpu), 16);
    let regs = cpu.registers();
    assert_eq!(regs.pc, 2);
    assert_eq!(regs.hl, 0x1003);
    assert_eq!(regs.bc, 2);
    assert_ne!(regs.f() & Z, 0);
    assert_ne!(regs.f() & V, 0);
    assert_ne!(regs.f() & N, 0);
}

#[test]
fn cpi_single_step() {
    let mut cpu = machine(&[0xED, 0xA1]);
    poke(&mut cpu, 0x1000, &[0x10]);
    let regs = cpu.registers_mut();
    regs.hl = 0x1000;
    regs.bc = 1;
    regs.set_a(0x10);
    regs.memptr = 0x0100;
    assert_eq!(timed_step(&mut cpu), 16);
    let regs = cpu.registers();
    assert_eq!(regs.f() & (Z | V | N), Z | N);
    assert_eq!(regs.memptr, 0x0101);
}

#[test]
fn ini_reads_port_into_memory() {
    let mut cpu = machine(&[0xED, 0xA2]);
    cpu.bus_mut().port_input = 0x5A;
    cpu.registers_mut().bc = 0x0210;
    cpu.registers_mut().hl = 0x3000;
    assert_eq!(timed_step(&mut cpu), 16);
    assert_eq!(peek(&mut cpu, 0x3000), 0x5A);
    let regs = cpu.registers();
    assert_eq!(regs.b(), 0x01);
    assert_eq!(regs.hl, 0x3001);
    assert_eq!(regs.memptr, 0x0211);
}

#[test]
fn otir_writes_memory_to_port() {
    let mut cpu = machine(&[0xED, 0xB3]);
    poke(&mut cpu, 0x3000, &[0x77, 0x88]);
    cpu.registers_mut().bc = 0x02FE;
    cpu.registers_mut().hl = 0x3000;
    assert_eq!(timed_step(&mut cpu), 21);
    assert_eq!(cpu.registers().memptr, 0x01FF);
    assert_eq!(timed_step(&mut cpu), 16);
    assert_eq!(cpu.bus().port_writes, vec![(0x01FE, 0x77), (0x00FE, 0x88)]);
    assert_ne!(cpu.registers().f() & Z, 0);
    assert_eq!(cpu.pc(), 2);
}

#[test]
fn port_instructions() {
    // IN A,(0xFE) ; OUT (0xFE),A ; OUT (C),0 ; IN (C)
    let mut cpu = machine(&[0xDB, 0xFE, 0xD3, 0xFE, 0xED, 0x71, 0xED, 0x70]);
    cpu.bus_mut().port_input = 0x9C;
    cpu.registers_mut().set_a(0x12);
    cpu.registers_mut().bc = 0x00FE;

    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(cpu.registers().a(), 0x9C);
    assert_eq!(cpu.registers().memptr, 0x12FF);

    assert_eq!(timed_step(&mut cpu), 11);
    assert_eq!(cpu.registers().memptr, 0x9CFF);

    assert_eq!(timed_step(&mut cpu), 12);
    assert_eq!(cpu.registers().memptr, 0x00FF);
    assert_eq!(cpu.bus().port_writes, vec![(0x9CFE, 0x9C), (0x00FE, 0x00)]);

    cpu.bus_mut().port_input = 0x00;
    cpu.registers_mut().set_f(C);
    let a = cpu.registers().a();
    assert_eq!(timed_step(&mut cpu), 12);
    assert_eq!(cpu.registers().f(), C | Z | P);
    assert_eq!(cpu.registers().a(), a);
}

// ============================================================================
//  HALT & INTERRUPTS
// ============================================================================

#[test]
fn halt_spins_on_itself() {
    let mut cpu = machine(&[0x76]);
    assert_eq!(timed_step(&mut cpu), 4);
    assert!(cpu.registers().halted);
    assert_eq!(cpu.pc(), 0);
    assert_eq!(timed_step(&mut cpu), 4);
    assert_eq!(cpu.pc(), 0);
    assert_eq!(cpu.registers().r, 2);
}

#[test]
fn interrupt_wakes_halted_cpu_past_halt() {
    let mut cpu = machine(&[0x76]);
    cpu.registers_mut().sp = 0x8000;
    cpu.registers_mut().iff1 = true;
    cpu.registers_mut().iff2 = true;
    cpu.registers_mut().im = 1;
    cpu.step();

    let before = cpu.bus().t_states;
    assert!(cpu.request_maskable_interrupt());
    assert_eq!(cpu.bus().t_states - before, 13);
    assert!(!cpu.registers().halted);
    assert_eq!(cpu.pc(), 0x0038);
    assert_eq!(cpu.bus_mut().read_word_le(0x7FFE), 0x0001);
    assert!(!cpu.registers().iff1);
    assert!(!cpu.registers().iff2);
}

#[test]
fn maskable_interrupt_refused_while_disabled() {
    let mut cpu = machine(&[]);
    assert!(!cpu.request_maskable_interrupt());
    assert_eq!(cpu.bus().t_states, 0);
    assert_eq!(cpu.pc(), 0);
}

#[test]
fn im2_reads_vector_from_i_page() {
    let mut cpu = machine(&[]);
    poke(&mut cpu, 0x40FF, &[0x00, 0x80]);
    let regs = cpu.registers_mut();
    regs.im = 2;
    regs.i = 0x40;
    regs.iff1 = true;
    regs.iff2 = true;
    regs.sp = 0x8000;
    regs.pc = 0x1234;

    let before = cpu.bus().t_states;
    assert!(cpu.request_maskable_interrupt());
    assert_eq!(cpu.bus().t_states - before, 19);
    let regs = cpu.registers();
    assert_eq!(regs.pc, 0x8000);
    assert!(!regs.iff1 && !regs.iff2);
    assert_eq!(regs.memptr, 0x8000);
    assert_eq!(regs.r, 1);
    assert_eq!(cpu.bus_mut().read_word_le(0x7FFE), 0x1234);
}

#[test]
fn im2_vector_low_byte_is_configurable() {
    let config = CpuConfig { im2_vector_low_byte: 0x10, ..CpuConfig::default() };
    let mut bus = FlatBus::new();
    bus.load(0x4010, &[0x00, 0x90]).unwrap();
    let mut cpu = Z80::with_config(bus, config);
    let regs = cpu.registers_mut();
    regs.im = 2;
    regs.i = 0x40;
    regs.iff1 = true;
    regs.sp = 0x8000;
    assert!(cpu.request_maskable_interrupt());
    assert_eq!(cpu.pc(), 0x9000);
}

#[test]
fn nmi_keeps_iff2_for_retn() {
    let mut cpu = machine_at(&[0xED, 0x45], 0x0066);
    let regs = cpu.registers_mut();
    regs.pc = 0x1000;
    regs.sp = 0x8000;
    regs.iff1 = true;
    regs.iff2 = true;

    cpu.request_non_maskable_interrupt();
    assert_eq!(cpu.pc(), 0x0066);
    assert!(!cpu.registers().iff1);
    assert!(cpu.registers().iff2);

    assert_eq!(timed_step(&mut cpu), 14);
    assert_eq!(cpu.pc(), 0x1000);
    assert!(cpu.registers().iff1);
}

#[test]
fn nmi_wakes_halted_cpu_past_halt() {
    let mut cpu = machine(&[0x76]);
    cpu.registers_mut().sp = 0x8000;
    cpu.step();
    assert!(cpu.registers().halted);

    let before = cpu.bus().t_states;
    cpu.request_non_maskable_interrupt();
    assert_eq!(cpu.bus().t_states - before, 13);
    assert!(!cpu.registers().halted);
    assert_eq!(cpu.pc(), 0x0066);
    assert_eq!(cpu.registers().memptr, 0x0066);
    assert_eq!(cpu.bus_mut().read_word_le(0x7FFE), 0x0001);
}

#[test]
#[should_panic(expected = "invalid interrupt mode")]
fn corrupted_interrupt_mode_is_fatal() {
    let mut cpu = machine(&[]);
    cpu.registers_mut().iff1 = true;
    cpu.registers_mut().im = 3;
    cpu.request_maskable_interrupt();
}

#[test]
fn set_interrupt_mode_is_checked() {
    let mut cpu = machine(&[]);
    assert_eq!(cpu.set_interrupt_mode(3), Err(CpuError::InvalidInterruptMode(3)));
    assert_eq!(cpu.registers().im, 0);
    assert_eq!(cpu.set_interrupt_mode(2), Ok(()));
    assert_eq!(cpu.registers().im, 2);
}

#[test]
fn ei_takes_effect_immediately_by_default() {
    let mut cpu = machine(&[0xFB, 0x00]);
    cpu.registers_mut().sp = 0x8000;
    cpu.step();
    assert!(cpu.request_maskable_interrupt());
}

#[test]
fn ei_delay_when_configured() {
    let config = CpuConfig { defer_interrupt_after_ei: true, ..CpuConfig::default() };
    let mut bus = FlatBus::new();
    bus.load(0, &[0xFB, 0x00]).unwrap();
    let mut cpu = Z80::with_config(bus, config);
    cpu.registers_mut().sp = 0x8000;

    cpu.step(); // EI
    assert!(cpu.registers().iff1);
    assert!(!cpu.request_maskable_interrupt());
    cpu.step(); // NOP
    assert!(cpu.request_maskable_interrupt());
    assert_eq!(cpu.pc(), 0x0038);
}

#[test]
fn ei_delay_survives_snapshot_restore() {
    let config = CpuConfig { defer_interrupt_after_ei: true, ..CpuConfig::default() };
    let mut bus = FlatBus::new();
    bus.load(0, &[0xFB, 0x00]).unwrap();
    let mut cpu = Z80::with_config(bus, config);
    cpu.registers_mut().sp = 0x8000;
    cpu.step(); // EI
    let snapshot = cpu.registers().clone();
    assert!(snapshot.ei_latch);

    let mut other = Z80::with_config(cpu.into_bus(), config);
    assert_eq!(*other.config(), config);
    other.restore(snapshot);
    assert!(!other.request_maskable_interrupt());
    other.step(); // NOP
    assert!(!other.registers().ei_latch);
    assert!(other.request_maskable_interrupt());

    let bus = other.into_bus();
    assert_eq!(bus.t_states, 4 + 4 + 13);
}

// ============================================================================
//  SOFT ERRORS & RESET
// ============================================================================

#[test]
fn unknown_ed_opcode_is_reported_and_skipped() {
    let mut cpu = machine(&[0xED, 0x77, 0x3E, 0x01]);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    cpu.set_diagnostic_sink(Box::new(move |error: &CpuError| sink.borrow_mut().push(error.clone())));

    let before = cpu.registers().clone();
    let error = cpu.try_step().unwrap_err();
    assert_eq!(
        error,
        CpuError::UnknownOpcode { table: Table::Ed, opcode: 0x77, address: 0x0001 }
    );
    assert_eq!(error.to_string(), "unknown opcode 0x77 in ED table at 0x0001");
    assert_eq!(cpu.bus().t_states, 8);

    let mut expected = before;
    expected.pc = 2;
    expected.r = 2;
    assert_eq!(*cpu.registers(), expected);
    assert_eq!(seen.borrow().len(), 1);

    cpu.step();
    assert_eq!(cpu.registers().a(), 0x01);
}

#[test]
fn cleared_sink_no_longer_sees_errors() {
    let mut cpu = machine(&[0xED, 0x77, 0xED, 0x77]);
    let seen = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&seen);
    cpu.set_diagnostic_sink(Box::new(move |_: &CpuError| *sink.borrow_mut() += 1));

    cpu.step();
    assert_eq!(*seen.borrow(), 1);
    cpu.clear_diagnostic_sink();
    assert!(cpu.try_step().is_err());
    assert_eq!(*seen.borrow(), 1);
}

#[test]
fn step_continues_after_unknown_opcode() {
    let mut cpu = machine(&[0xED, 0xFF, 0xED, 0x00, 0x00]);
    cpu.step();
    cpu.step();
    assert_eq!(cpu.pc(), 4);
    assert_eq!(cpu.try_step(), Ok(()));
}

#[test]
fn reset_zeroes_registers_but_not_time() {
    let mut cpu = machine(&[0x3E, 0x42]);
    cpu.step();
    cpu.registers_mut().iff1 = true;
    cpu.registers_mut().sp = 0x1234;
    cpu.reset();
    assert_eq!(*cpu.registers(), Registers::default());
    assert_eq!(cpu.bus().t_states, 7);
}

#[test]
fn refresh_counter_keeps_bit_seven() {
    let mut cpu = machine(&[0x00, 0x00]);
    cpu.registers_mut().set_r_combined(0xFF);
    cpu.step();
    assert_eq!(cpu.registers().r_combined(), 0x80);
    cpu.step();
    assert_eq!(cpu.registers().r_combined(), 0x81);
}

#[test]
fn daa_after_bcd_add() {
    // LD A,0x15 ; ADD A,0x27 ; DAA
    let mut cpu = machine(&[0x3E, 0x15, 0xC6, 0x27, 0x27]);
    cpu.step();
    cpu.step();
    cpu.step();
    assert_eq!(cpu.registers().a(), 0x42);
    assert_eq!(cpu.registers().f() & C, 0);
}

#[test]
fn rotate_accumulator_keeps_sign_zero_parity() {
    let mut cpu = machine(&[0x07, 0x1F]); // RLCA ; RRA
    cpu.registers_mut().af = 0x8100 | (S | Z | P) as u16;
    cpu.step();
    assert_eq!(cpu.registers().a(), 0x03);
    assert_eq!(cpu.registers().f(), S | Z | P | C);
    cpu.step();
    assert_eq!(cpu.registers().a(), 0x81);
    assert_eq!(cpu.registers().f(), S | Z | P | C);
}

#[test]
fn cpl_sets_n_and_h() {
    let mut cpu = machine(&[0x2F]);
    cpu.registers_mut().af = 0x5500;
    cpu.step();
    assert_eq!(cpu.registers().a(), 0xAA);
    assert_eq!(cpu.registers().f(), N | H | X5 | X3);
}
