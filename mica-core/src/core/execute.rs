//! Instruction execution.
//!
//! Decode and execution are fused: the step dispatches on the major opcode
//! (`instr[6:2]`), then on `(funct7, funct3)` where that identifies the
//! operation, and finally walks the `(mask, bits)` chains from
//! [`crate::instruction::enc`] for the bit-manipulation, atomic, system,
//! custom, and compressed encodings. Each handler fills in the [`Outcome`]
//! record; only the Zcmp pop/move sequences write registers directly.

use super::csr::CsrOp;
use super::{Core, Exception, Outcome};
use crate::bus::{Bus, BusError, Halt};
use crate::instruction::{
    bits, c_rs1_l, c_rs1_s, c_rs2_l, c_rs2_s, enc, funct3, funct7, imm_b, imm_c_addi16sp,
    imm_c_addi4spn, imm_c_lsw, imm_c_lui, imm_c_lwsp, imm_c_swsp, imm_cb, imm_ci, imm_cj, imm_i,
    imm_j, imm_s, imm_u, matches, opc, rd, rs1, rs2, shamt, zcmp_reg_mask, zcmp_s_reg,
    zcmp_stack_adj, Encoding,
};
use crate::registers::Specifier;
use crate::PrivilegeLevel;

// Major opcodes (instr[6:2]).
const OPC_LOAD: u32 = 0b00_000;
const OPC_CUSTOM0: u32 = 0b00_010;
const OPC_OP_IMM: u32 = 0b00_100;
const OPC_AUIPC: u32 = 0b00_101;
const OPC_STORE: u32 = 0b01_000;
const OPC_AMO: u32 = 0b01_011;
const OPC_OP: u32 = 0b01_100;
const OPC_LUI: u32 = 0b01_101;
const OPC_BRANCH: u32 = 0b11_000;
const OPC_JALR: u32 = 0b11_001;
const OPC_JAL: u32 = 0b11_011;
const OPC_SYSTEM: u32 = 0b11_100;

const AMO_OPS: [Encoding; 9] = [
    enc::AMOSWAP_W,
    enc::AMOADD_W,
    enc::AMOXOR_W,
    enc::AMOAND_W,
    enc::AMOOR_W,
    enc::AMOMIN_W,
    enc::AMOMAX_W,
    enc::AMOMINU_W,
    enc::AMOMAXU_W,
];

impl<B: Bus> Core<B> {
    pub(crate) fn execute_32(&mut self, instr: u32, out: &mut Outcome) -> Result<(), Halt> {
        out.rd = rd(instr);
        match opc(instr) {
            OPC_OP => self.execute_op(instr, out),
            OPC_OP_IMM => self.execute_op_imm(instr, out),
            OPC_BRANCH => self.execute_branch(instr, out),
            OPC_LOAD => self.execute_load(instr, out),
            OPC_STORE => self.execute_store(instr, out)?,
            OPC_AMO => self.execute_amo(instr, out)?,
            OPC_JAL => {
                let pc = self.regs.pc();
                out.rd_wdata = Some(pc.wrapping_add(4));
                out.pc_wdata = Some(pc.wrapping_add(imm_j(instr)));
            }
            OPC_JALR => {
                let pc = self.regs.pc();
                out.rd_wdata = Some(pc.wrapping_add(4));
                out.pc_wdata = Some(self.regs.x(rs1(instr)).wrapping_add(imm_i(instr)) & !0x1);
            }
            OPC_LUI => out.rd_wdata = Some(imm_u(instr)),
            OPC_AUIPC => out.rd_wdata = Some(self.regs.pc().wrapping_add(imm_u(instr))),
            OPC_SYSTEM => self.execute_system(instr, out),
            OPC_CUSTOM0 => self.execute_custom0(instr, out),
            _ => out.exception = Some(Exception::IllegalInstruction),
        }
        Ok(())
    }

    fn execute_op(&self, instr: u32, out: &mut Outcome) {
        let rs1 = self.regs.x(rs1(instr));
        let rs2 = self.regs.x(rs2(instr));
        let funct3 = funct3(instr);
        let value = match funct7(instr) {
            0b00_00000 => match funct3 {
                0b000 => rs1.wrapping_add(rs2),
                0b001 => rs1 << (rs2 & 0x1f),
                0b010 => ((rs1 as i32) < rs2 as i32) as u32,
                0b011 => (rs1 < rs2) as u32,
                0b100 => rs1 ^ rs2,
                0b101 => rs1 >> (rs2 & 0x1f),
                0b110 => rs1 | rs2,
                _ => rs1 & rs2,
            },
            0b00_00001 => Self::mul_div(funct3, rs1, rs2),
            0b01_00000 => match funct3 {
                0b000 => rs1.wrapping_sub(rs2),
                0b100 => rs1 ^ !rs2,
                0b101 => ((rs1 as i32) >> (rs2 & 0x1f)) as u32,
                0b110 => rs1 | !rs2,
                0b111 => rs1 & !rs2,
                _ => {
                    out.exception = Some(Exception::IllegalInstruction);
                    return;
                }
            },
            _ => {
                if matches(instr, enc::BCLR) {
                    rs1 & !(1 << (rs2 & 0x1f))
                } else if matches(instr, enc::BEXT) {
                    rs1 >> (rs2 & 0x1f) & 0x1
                } else if matches(instr, enc::BINV) {
                    rs1 ^ 1 << (rs2 & 0x1f)
                } else if matches(instr, enc::BSET) {
                    rs1 | 1 << (rs2 & 0x1f)
                } else if matches(instr, enc::SH1ADD) {
                    (rs1 << 1).wrapping_add(rs2)
                } else if matches(instr, enc::SH2ADD) {
                    (rs1 << 2).wrapping_add(rs2)
                } else if matches(instr, enc::SH3ADD) {
                    (rs1 << 3).wrapping_add(rs2)
                } else if matches(instr, enc::MAX) {
                    if (rs1 as i32) > rs2 as i32 {
                        rs1
                    } else {
                        rs2
                    }
                } else if matches(instr, enc::MAXU) {
                    rs1.max(rs2)
                } else if matches(instr, enc::MIN) {
                    if (rs1 as i32) < rs2 as i32 {
                        rs1
                    } else {
                        rs2
                    }
                } else if matches(instr, enc::MINU) {
                    rs1.min(rs2)
                } else if matches(instr, enc::ROR) {
                    rs1.rotate_right(rs2 & 0x1f)
                } else if matches(instr, enc::ROL) {
                    rs1.rotate_left(rs2 & 0x1f)
                } else if matches(instr, enc::PACK) {
                    rs1 & 0xffff | rs2 << 16
                } else if matches(instr, enc::PACKH) {
                    rs1 & 0xff | (rs2 & 0xff) << 8
                } else if matches(instr, enc::CLMUL) {
                    clmul_wide(rs1, rs2) as u32
                } else if matches(instr, enc::CLMULH) {
                    (clmul_wide(rs1, rs2) >> 32) as u32
                } else if matches(instr, enc::CLMULR) {
                    (clmul_wide(rs1, rs2) >> 31) as u32
                } else {
                    out.exception = Some(Exception::IllegalInstruction);
                    return;
                }
            }
        };
        out.rd_wdata = Some(value);
    }

    /// The M extension: 32x32 multiplies through a 64-bit intermediate (with
    /// the operands sign-extended as the variant requires), and the division
    /// results mandated for divide-by-zero and signed overflow.
    fn mul_div(funct3: u32, rs1: u32, rs2: u32) -> u32 {
        if funct3 < 0b100 {
            // mul/mulh/mulhsu/mulhu
            let a = if funct3 == 0b011 {
                u64::from(rs1)
            } else {
                rs1 as i32 as u64
            };
            let b = if funct3 < 0b010 {
                rs2 as i32 as u64
            } else {
                u64::from(rs2)
            };
            let product = a.wrapping_mul(b);
            if funct3 == 0b000 {
                product as u32
            } else {
                (product >> 32) as u32
            }
        } else {
            match funct3 {
                0b100 => {
                    if rs2 == 0 {
                        u32::MAX
                    } else if rs2 == u32::MAX {
                        // Covers the INT_MIN / -1 overflow case as well.
                        rs1.wrapping_neg()
                    } else {
                        ((rs1 as i32) / (rs2 as i32)) as u32
                    }
                }
                0b101 => {
                    if rs2 == 0 {
                        u32::MAX
                    } else {
                        rs1 / rs2
                    }
                }
                0b110 => {
                    if rs2 == 0 {
                        rs1
                    } else if rs2 == u32::MAX {
                        0
                    } else {
                        ((rs1 as i32) % (rs2 as i32)) as u32
                    }
                }
                _ => {
                    if rs2 == 0 {
                        rs1
                    } else {
                        rs1 % rs2
                    }
                }
            }
        }
    }

    fn execute_op_imm(&self, instr: u32, out: &mut Outcome) {
        let rs1 = self.regs.x(rs1(instr));
        let funct3 = funct3(instr);
        let imm = imm_i(instr);
        let value = match funct3 {
            0b000 => rs1.wrapping_add(imm),
            0b010 => ((rs1 as i32) < imm as i32) as u32,
            0b011 => (rs1 < imm) as u32,
            0b100 => rs1 ^ imm,
            0b110 => rs1 | imm,
            0b111 => rs1 & imm,
            // funct3 001/101: the shift-amount and unary encodings.
            _ => {
                let shamt = shamt(instr);
                if funct7(instr) == 0b00_00000 && funct3 == 0b001 {
                    rs1 << shamt
                } else if funct7(instr) == 0b00_00000 && funct3 == 0b101 {
                    rs1 >> shamt
                } else if funct7(instr) == 0b01_00000 && funct3 == 0b101 {
                    ((rs1 as i32) >> shamt) as u32
                } else if matches(instr, enc::BCLRI) {
                    rs1 & !(1 << shamt)
                } else if matches(instr, enc::BINVI) {
                    rs1 ^ 1 << shamt
                } else if matches(instr, enc::BSETI) {
                    rs1 | 1 << shamt
                } else if matches(instr, enc::CLZ) {
                    rs1.leading_zeros()
                } else if matches(instr, enc::CPOP) {
                    rs1.count_ones()
                } else if matches(instr, enc::CTZ) {
                    rs1.trailing_zeros()
                } else if matches(instr, enc::SEXT_B) {
                    rs1 as i8 as i32 as u32
                } else if matches(instr, enc::SEXT_H) {
                    rs1 as i16 as i32 as u32
                } else if matches(instr, enc::ZIP) {
                    zip(rs1)
                } else if matches(instr, enc::UNZIP) {
                    unzip(rs1)
                } else if matches(instr, enc::BEXTI) {
                    rs1 >> shamt & 0x1
                } else if matches(instr, enc::BREV8) {
                    brev8(rs1)
                } else if matches(instr, enc::ORC_B) {
                    orc_b(rs1)
                } else if matches(instr, enc::REV8) {
                    rs1.swap_bytes()
                } else if matches(instr, enc::RORI) {
                    rs1.rotate_right(shamt)
                } else {
                    out.exception = Some(Exception::IllegalInstruction);
                    return;
                }
            }
        };
        out.rd_wdata = Some(value);
    }

    fn execute_branch(&self, instr: u32, out: &mut Outcome) {
        let rs1 = self.regs.x(rs1(instr));
        let rs2 = self.regs.x(rs2(instr));
        let taken = match funct3(instr) {
            0b000 => rs1 == rs2,
            0b001 => rs1 != rs2,
            0b100 => (rs1 as i32) < rs2 as i32,
            0b101 => (rs1 as i32) >= rs2 as i32,
            0b110 => rs1 < rs2,
            0b111 => rs1 >= rs2,
            _ => {
                out.exception = Some(Exception::IllegalInstruction);
                return;
            }
        };
        if taken {
            out.pc_wdata = Some(self.regs.pc().wrapping_add(imm_b(instr)));
        }
    }

    fn execute_load(&mut self, instr: u32, out: &mut Outcome) {
        let funct3 = funct3(instr);
        let address = self.regs.x(rs1(instr)).wrapping_add(imm_i(instr));
        let align_mask = !(u32::MAX << (funct3 & 0x3));
        if funct3 == 0b011 || funct3 > 0b101 {
            out.exception = Some(Exception::IllegalInstruction);
        } else if address & align_mask != 0 {
            out.exception = Some(Exception::LoadAddressMisaligned);
        } else {
            out.rd_wdata = match funct3 {
                0b000 => self.read8(address).map(|b| b as i8 as i32 as u32),
                0b001 => self.read16(address).map(|h| h as i16 as i32 as u32),
                0b010 => self.read32(address),
                0b100 => self.read8(address).map(u32::from),
                _ => self.read16(address).map(u32::from),
            };
            if out.rd_wdata.is_none() {
                out.exception = Some(Exception::LoadFault);
            }
        }
    }

    fn execute_store(&mut self, instr: u32, out: &mut Outcome) -> Result<(), Halt> {
        let funct3 = funct3(instr);
        let address = self.regs.x(rs1(instr)).wrapping_add(imm_s(instr));
        let value = self.regs.x(rs2(instr));
        let align_mask = !(u32::MAX << (funct3 & 0x3));
        if funct3 > 0b010 {
            out.exception = Some(Exception::IllegalInstruction);
        } else if address & align_mask != 0 {
            out.exception = Some(Exception::StoreAddressMisaligned);
        } else {
            let result = match funct3 {
                0b000 => self.write8(address, value as u8),
                0b001 => self.write16(address, value as u16),
                _ => self.write32(address, value),
            };
            if !store_ok(result)? {
                out.exception = Some(Exception::StoreFault);
            }
        }
        Ok(())
    }

    fn execute_amo(&mut self, instr: u32, out: &mut Outcome) -> Result<(), Halt> {
        let address = self.regs.x(rs1(instr));
        let value = self.regs.x(rs2(instr));
        if matches(instr, enc::LR_W) {
            if address & 0x3 != 0 {
                out.exception = Some(Exception::LoadAddressMisaligned);
            } else {
                match self.read32(address) {
                    Some(data) => {
                        out.rd_wdata = Some(data);
                        self.load_reserved = true;
                    }
                    None => out.exception = Some(Exception::LoadFault),
                }
            }
        } else if matches(instr, enc::SC_W) {
            if address & 0x3 != 0 {
                out.exception = Some(Exception::StoreAddressMisaligned);
            } else if self.load_reserved {
                self.load_reserved = false;
                if store_ok(self.write32(address, value))? {
                    out.rd_wdata = Some(0);
                } else {
                    out.exception = Some(Exception::StoreFault);
                }
            } else {
                out.rd_wdata = Some(1);
            }
        } else if AMO_OPS.iter().any(|&pattern| matches(instr, pattern)) {
            if address & 0x3 != 0 {
                out.exception = Some(Exception::StoreAddressMisaligned);
            } else {
                match self.read32(address) {
                    // A failed AMO read reports the single fault class of the
                    // read-modify-write pair: a store fault.
                    None => out.exception = Some(Exception::StoreFault),
                    Some(old) => {
                        let new = match instr >> 27 {
                            0b00001 => value,
                            0b00000 => old.wrapping_add(value),
                            0b00100 => old ^ value,
                            0b01100 => old & value,
                            0b01000 => old | value,
                            0b10000 => {
                                if (old as i32) < value as i32 {
                                    old
                                } else {
                                    value
                                }
                            }
                            0b10100 => {
                                if (old as i32) > value as i32 {
                                    old
                                } else {
                                    value
                                }
                            }
                            0b11000 => old.min(value),
                            _ => old.max(value),
                        };
                        if store_ok(self.write32(address, new))? {
                            out.rd_wdata = Some(old);
                        } else {
                            out.exception = Some(Exception::StoreFault);
                        }
                    }
                }
            }
        } else {
            out.exception = Some(Exception::IllegalInstruction);
        }
        Ok(())
    }

    fn execute_system(&mut self, instr: u32, out: &mut Outcome) {
        let funct3 = funct3(instr);
        let specifier = (instr >> 20) as u16;
        if matches!(funct3, 0b001..=0b011 | 0b101..=0b111) {
            // csrrw/csrrs/csrrc and their immediate forms
            let op = match funct3 & 0b011 {
                0b001 => CsrOp::Write,
                0b010 => CsrOp::Set,
                _ => CsrOp::Clear,
            };
            let src = instr >> 15 & 0x1f;
            // A read happens unless this is a pure write; a write happens
            // unless this is a pure read. Both fail as illegal instructions.
            if op != CsrOp::Write || out.rd != Specifier::X0 {
                match self.csr.read(specifier) {
                    Ok(data) => out.rd_wdata = Some(data),
                    Err(_) => {
                        out.exception = Some(Exception::IllegalInstruction);
                        return;
                    }
                }
            }
            if op == CsrOp::Write || src != 0 {
                let data = if funct3 & 0b100 != 0 {
                    src
                } else {
                    self.regs.x(rs1(instr))
                };
                if self.csr.write(specifier, data, op).is_err() {
                    out.exception = Some(Exception::IllegalInstruction);
                }
            }
        } else if matches(instr, enc::MRET) {
            if self.csr.privilege_level() == PrivilegeLevel::Machine {
                out.pc_wdata = Some(self.csr.trap_mret());
            } else {
                out.exception = Some(Exception::IllegalInstruction);
            }
        } else if matches(instr, enc::ECALL) {
            out.exception = Some(Exception::EnvironmentCall(self.csr.privilege_level()));
        } else if matches(instr, enc::EBREAK) {
            out.exception = Some(Exception::Breakpoint);
        } else {
            out.exception = Some(Exception::IllegalInstruction);
        }
    }

    fn execute_custom0(&self, instr: u32, out: &mut Outcome) {
        let rs1 = self.regs.x(rs1(instr));
        if matches(instr, enc::BEXTM) {
            let size = bits(instr, 28, 26) + 1;
            let rs2 = self.regs.x(rs2(instr));
            out.rd_wdata = Some(rs1 >> (rs2 & 0x1f) & !(u32::MAX << size));
        } else if matches(instr, enc::BEXTMI) {
            let size = bits(instr, 28, 26) + 1;
            out.rd_wdata = Some(rs1 >> shamt(instr) & !(u32::MAX << size));
        } else {
            out.exception = Some(Exception::IllegalInstruction);
        }
    }

    pub(crate) fn execute_16(&mut self, instr: u32, out: &mut Outcome) -> Result<(), Halt> {
        match instr & 0x3 {
            0x0 => self.execute_quadrant0(instr, out),
            0x1 => {
                self.execute_quadrant1(instr, out);
                Ok(())
            }
            _ => self.execute_quadrant2(instr, out),
        }
    }

    fn execute_quadrant0(&mut self, instr: u32, out: &mut Outcome) -> Result<(), Halt> {
        if matches(instr, enc::ILLEGAL16) {
            out.exception = Some(Exception::IllegalInstruction);
        } else if matches(instr, enc::C_ADDI4SPN) {
            out.rd = c_rs2_s(instr);
            out.rd_wdata = Some(
                self.regs
                    .x(Specifier::SP)
                    .wrapping_add(imm_c_addi4spn(instr)),
            );
        } else if matches(instr, enc::C_LW) {
            out.rd = c_rs2_s(instr);
            let address = self.regs.x(c_rs1_s(instr)).wrapping_add(imm_c_lsw(instr));
            out.rd_wdata = self.read32(address);
            if out.rd_wdata.is_none() {
                out.exception = Some(Exception::LoadFault);
            }
        } else if matches(instr, enc::C_SW) {
            let address = self.regs.x(c_rs1_s(instr)).wrapping_add(imm_c_lsw(instr));
            if !store_ok(self.write32(address, self.regs.x(c_rs2_s(instr))))? {
                out.exception = Some(Exception::StoreFault);
            }
        } else {
            out.exception = Some(Exception::IllegalInstruction);
        }
        Ok(())
    }

    fn execute_quadrant1(&mut self, instr: u32, out: &mut Outcome) {
        let pc = self.regs.pc();
        if matches(instr, enc::C_ADDI) {
            out.rd = c_rs1_l(instr);
            out.rd_wdata = Some(self.regs.x(out.rd).wrapping_add(imm_ci(instr)));
        } else if matches(instr, enc::C_JAL) {
            out.pc_wdata = Some(pc.wrapping_add(imm_cj(instr)));
            out.rd = Specifier::RA;
            out.rd_wdata = Some(pc.wrapping_add(2));
        } else if matches(instr, enc::C_LI) {
            out.rd = c_rs1_l(instr);
            out.rd_wdata = Some(imm_ci(instr));
        } else if matches(instr, enc::C_LUI) {
            out.rd = c_rs1_l(instr);
            if out.rd == Specifier::SP {
                // c.addi16sp shares the c.lui encoding, selected by rd = sp.
                out.rd_wdata = Some(
                    self.regs
                        .x(Specifier::SP)
                        .wrapping_add(imm_c_addi16sp(instr)),
                );
            } else {
                out.rd_wdata = Some(imm_c_lui(instr));
            }
        } else if matches(instr, enc::C_SRLI) {
            out.rd = c_rs1_s(instr);
            out.rd_wdata = Some(self.regs.x(out.rd) >> bits(instr, 6, 2));
        } else if matches(instr, enc::C_SRAI) {
            out.rd = c_rs1_s(instr);
            out.rd_wdata = Some(((self.regs.x(out.rd) as i32) >> bits(instr, 6, 2)) as u32);
        } else if matches(instr, enc::C_ANDI) {
            out.rd = c_rs1_s(instr);
            out.rd_wdata = Some(self.regs.x(out.rd) & imm_ci(instr));
        } else if matches(instr, enc::C_SUB) {
            out.rd = c_rs1_s(instr);
            out.rd_wdata = Some(self.regs.x(out.rd).wrapping_sub(self.regs.x(c_rs2_s(instr))));
        } else if matches(instr, enc::C_XOR) {
            out.rd = c_rs1_s(instr);
            out.rd_wdata = Some(self.regs.x(out.rd) ^ self.regs.x(c_rs2_s(instr)));
        } else if matches(instr, enc::C_OR) {
            out.rd = c_rs1_s(instr);
            out.rd_wdata = Some(self.regs.x(out.rd) | self.regs.x(c_rs2_s(instr)));
        } else if matches(instr, enc::C_AND) {
            out.rd = c_rs1_s(instr);
            out.rd_wdata = Some(self.regs.x(out.rd) & self.regs.x(c_rs2_s(instr)));
        } else if matches(instr, enc::C_J) {
            out.pc_wdata = Some(pc.wrapping_add(imm_cj(instr)));
        } else if matches(instr, enc::C_BEQZ) {
            if self.regs.x(c_rs1_s(instr)) == 0 {
                out.pc_wdata = Some(pc.wrapping_add(imm_cb(instr)));
            }
        } else if matches(instr, enc::C_BNEZ) {
            if self.regs.x(c_rs1_s(instr)) != 0 {
                out.pc_wdata = Some(pc.wrapping_add(imm_cb(instr)));
            }
        } else {
            out.exception = Some(Exception::IllegalInstruction);
        }
    }

    fn execute_quadrant2(&mut self, instr: u32, out: &mut Outcome) -> Result<(), Halt> {
        let pc = self.regs.pc();
        if matches(instr, enc::C_SLLI) {
            out.rd = c_rs1_l(instr);
            out.rd_wdata = Some(self.regs.x(out.rd) << bits(instr, 6, 2));
        } else if matches(instr, enc::C_MV) {
            if c_rs2_l(instr) == Specifier::X0 {
                // c.jr
                out.pc_wdata = Some(self.regs.x(c_rs1_l(instr)) & !0x1);
            } else {
                out.rd = c_rs1_l(instr);
                out.rd_wdata = Some(self.regs.x(c_rs2_l(instr)));
            }
        } else if matches(instr, enc::C_ADD) {
            if c_rs2_l(instr) == Specifier::X0 {
                if c_rs1_l(instr) == Specifier::X0 {
                    // c.ebreak
                    out.exception = Some(Exception::Breakpoint);
                } else {
                    // c.jalr
                    out.pc_wdata = Some(self.regs.x(c_rs1_l(instr)) & !0x1);
                    out.rd = Specifier::RA;
                    out.rd_wdata = Some(pc.wrapping_add(2));
                }
            } else {
                out.rd = c_rs1_l(instr);
                out.rd_wdata = Some(
                    self.regs
                        .x(out.rd)
                        .wrapping_add(self.regs.x(c_rs2_l(instr))),
                );
            }
        } else if matches(instr, enc::C_LWSP) {
            out.rd = c_rs1_l(instr);
            let address = self.regs.x(Specifier::SP).wrapping_add(imm_c_lwsp(instr));
            out.rd_wdata = self.read32(address);
            if out.rd_wdata.is_none() {
                out.exception = Some(Exception::LoadFault);
            }
        } else if matches(instr, enc::C_SWSP) {
            let address = self.regs.x(Specifier::SP).wrapping_add(imm_c_swsp(instr));
            if !store_ok(self.write32(address, self.regs.x(c_rs2_l(instr))))? {
                out.exception = Some(Exception::StoreFault);
            }
        } else if matches(instr, enc::CM_PUSH) {
            self.execute_push(instr, out)?;
        } else if matches(instr, enc::CM_POP)
            || matches(instr, enc::CM_POPRET)
            || matches(instr, enc::CM_POPRETZ)
        {
            self.execute_pop(instr, out);
        } else if matches(instr, enc::CM_MVSA01) {
            self.regs
                .set_x(zcmp_s_reg(bits(instr, 9, 7)), self.regs.x(Specifier::A0));
            self.regs
                .set_x(zcmp_s_reg(bits(instr, 4, 2)), self.regs.x(Specifier::A1));
        } else if matches(instr, enc::CM_MVA01S) {
            self.regs
                .set_x(Specifier::A0, self.regs.x(zcmp_s_reg(bits(instr, 9, 7))));
            self.regs
                .set_x(Specifier::A1, self.regs.x(zcmp_s_reg(bits(instr, 4, 2))));
        } else {
            out.exception = Some(Exception::IllegalInstruction);
        }
        Ok(())
    }

    /// `cm.push`: store the register list below sp at descending addresses,
    /// then drop sp by the stack adjustment. sp only moves if every store
    /// succeeds.
    fn execute_push(&mut self, instr: u32, out: &mut Outcome) -> Result<(), Halt> {
        let sp = self.regs.x(Specifier::SP);
        let mask = zcmp_reg_mask(instr);
        let mut address = sp;
        for i in (1u8..32).rev() {
            if mask & 1 << i != 0 {
                address = address.wrapping_sub(4);
                if !store_ok(self.write32(address, self.regs.x(Specifier::from_u5(i))))? {
                    out.exception = Some(Exception::StoreFault);
                    return Ok(());
                }
            }
        }
        out.rd = Specifier::SP;
        out.rd_wdata = Some(sp.wrapping_sub(zcmp_stack_adj(instr)));
        Ok(())
    }

    /// `cm.pop`/`cm.popret`/`cm.popretz`: reload the register list from the
    /// top of the frame, then pop the frame. The return variants redirect to
    /// `ra`, and `cm.popretz` additionally zeroes `a0`. Registers loaded
    /// before a faulting load keep their new values, but sp does not move.
    fn execute_pop(&mut self, instr: u32, out: &mut Outcome) {
        let clear_a0 = matches(instr, enc::CM_POPRETZ);
        let ret = clear_a0 || matches(instr, enc::CM_POPRET);
        let sp = self.regs.x(Specifier::SP);
        let stack_adj = zcmp_stack_adj(instr);
        let mask = zcmp_reg_mask(instr);
        let mut address = sp.wrapping_add(stack_adj);
        for i in (1u8..32).rev() {
            if mask & 1 << i != 0 {
                address = address.wrapping_sub(4);
                match self.read32(address) {
                    Some(data) => self.regs.set_x(Specifier::from_u5(i), data),
                    None => {
                        out.exception = Some(Exception::LoadFault);
                        return;
                    }
                }
            }
        }
        if clear_a0 {
            self.regs.set_x(Specifier::A0, 0);
        }
        if ret {
            out.pc_wdata = Some(self.regs.x(Specifier::RA));
        }
        out.rd = Specifier::SP;
        out.rd_wdata = Some(sp.wrapping_add(stack_adj));
    }
}

/// Collapses a store result to success/failure, letting a device-requested
/// halt pass through to the driver.
fn store_ok(result: Result<(), BusError>) -> Result<bool, Halt> {
    match result {
        Ok(()) => Ok(true),
        Err(BusError::Fault) => Ok(false),
        Err(BusError::Halt(exit_code)) => Err(Halt { exit_code }),
    }
}

/// Carry-less multiply: the full 64-bit XOR-accumulated product.
fn clmul_wide(a: u32, b: u32) -> u64 {
    let mut product = 0;
    for i in 0..32 {
        if b & 1 << i != 0 {
            product ^= u64::from(a) << i;
        }
    }
    product
}

/// Interleave the low and high halfwords: bit `i` moves to the position
/// formed by rotating its 5-bit index left by one.
fn zip(x: u32) -> u32 {
    let mut result = 0;
    for i in 0..32 {
        if x & 1 << i != 0 {
            result |= 1 << ((i >> 4) | (i & 0xf) << 1);
        }
    }
    result
}

/// The inverse of [`zip`]: bit `i` moves to the position formed by rotating
/// its 5-bit index right by one.
fn unzip(x: u32) -> u32 {
    let mut result = 0;
    for i in 0..32 {
        if x & 1 << i != 0 {
            result |= 1 << ((i >> 1) | (i & 1) << 4);
        }
    }
    result
}

/// Reverse the bits within each byte.
fn brev8(x: u32) -> u32 {
    (x & 0x8080_8080) >> 7
        | (x & 0x0101_0101) << 7
        | (x & 0x4040_4040) >> 5
        | (x & 0x0202_0202) << 5
        | (x & 0x2020_2020) >> 3
        | (x & 0x0404_0404) << 3
        | (x & 0x1010_1010) >> 1
        | (x & 0x0808_0808) << 1
}

/// OR-combine within each byte: a byte becomes all-ones if any of its bits is
/// set.
fn orc_b(x: u32) -> u32 {
    let mut result = 0;
    for shift in [0, 8, 16, 24] {
        if x & 0xff << shift != 0 {
            result |= 0xff << shift;
        }
    }
    result
}
