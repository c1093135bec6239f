// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

use super::insn::{DecodedInsn, Mnemonic, Operand};
use super::{EmulCtx, EmulError, Register, SegRegister};
use crate::types::Bytes;

// Shift counts are masked to 5 bits outside of 64-bit mode.
const SHIFT_COUNT_MASK: u32 = 0x1f;

#[inline]
fn read_reg<I: EmulCtx>(mctx: &I, reg: Register, size: Bytes) -> u32 {
    mctx.read_reg(reg) & size.mask()
}

#[inline]
fn write_reg<I: EmulCtx>(mctx: &mut I, reg: Register, data: u32, size: Bytes) {
    mctx.write_reg(
        reg,
        match size {
            Bytes::Zero => return,
            // Writing 8bit or 16bit register will not affect the upper bits.
            Bytes::One | Bytes::Two => {
                let old = mctx.read_reg(reg);
                (data & size.mask()) | (old & !size.mask())
            }
            Bytes::Four => data,
        },
    );
}

fn gpr(op: Operand) -> Result<(Register, Bytes), EmulError> {
    match op {
        Operand::Reg16(reg) => Ok((reg, Bytes::Two)),
        Operand::Reg32(reg) => Ok((reg, Bytes::Four)),
        _ => Err(EmulError::UnsupportedOperandCombination),
    }
}

fn read_operand<I: EmulCtx>(mctx: &I, op: Operand) -> Result<u32, EmulError> {
    match op {
        Operand::Reg16(reg) => Ok(read_reg(mctx, reg, Bytes::Two)),
        Operand::Reg32(reg) => Ok(read_reg(mctx, reg, Bytes::Four)),
        Operand::Seg(seg) => mctx.read_seg(seg).map(u32::from),
        Operand::Cr(cr) => mctx.read_cr(cr),
        Operand::Imm(imm) => Ok(imm.value()),
    }
}

fn write_operand<I: EmulCtx>(mctx: &mut I, op: Operand, data: u32) -> Result<(), EmulError> {
    match op {
        Operand::Reg16(reg) => {
            write_reg(mctx, reg, data, Bytes::Two);
            Ok(())
        }
        Operand::Reg32(reg) => {
            write_reg(mctx, reg, data, Bytes::Four);
            Ok(())
        }
        Operand::Seg(seg) => mctx.write_seg(seg, data as u16),
        Operand::Cr(cr) => mctx.write_cr(cr, data),
        Operand::Imm(_) => Err(EmulError::UnsupportedOperandCombination),
    }
}

// Operand pairs MOV can move between.
fn mov_allowed(dst: Operand, src: Operand) -> bool {
    match (dst, src) {
        (Operand::Reg16(_), Operand::Reg16(_) | Operand::Seg(_)) => true,
        (Operand::Reg32(_), Operand::Reg32(_) | Operand::Seg(_) | Operand::Cr(_)) => true,
        (Operand::Reg16(_) | Operand::Reg32(_), Operand::Imm(imm)) => {
            gpr(dst).is_ok_and(|(_, size)| size == imm.size())
        }
        // Loading CS with MOV raises #UD
        (Operand::Seg(SegRegister::CS), _) => false,
        (Operand::Seg(_), Operand::Reg16(_) | Operand::Reg32(_)) => true,
        (Operand::Cr(_), Operand::Reg32(_)) => true,
        _ => false,
    }
}

impl DecodedInsn {
    /// Applies the instruction to the guest state. All operands are read
    /// before the single write of the destination, so a failure leaves
    /// the guest state untouched. Arithmetic flags are not updated.
    pub fn emulate<I: EmulCtx>(&self, mctx: &mut I) -> Result<(), EmulError> {
        match self.mnemonic {
            Mnemonic::Sub => self.emulate_sub(mctx),
            Mnemonic::Mov => self.emulate_mov(mctx),
            Mnemonic::Shl => self.emulate_shl(mctx),
            Mnemonic::Or => self.emulate_or(mctx),
        }
    }

    fn emulate_sub<I: EmulCtx>(&self, mctx: &mut I) -> Result<(), EmulError> {
        let (dst, size) = gpr(self.dst)?;
        let (src, src_size) = gpr(self.src)?;
        if size != src_size {
            return Err(EmulError::UnsupportedOperandCombination);
        }

        let data = read_reg(mctx, dst, size).wrapping_sub(read_reg(mctx, src, size));
        write_reg(mctx, dst, data & size.mask(), size);
        Ok(())
    }

    fn emulate_mov<I: EmulCtx>(&self, mctx: &mut I) -> Result<(), EmulError> {
        if !mov_allowed(self.dst, self.src) {
            return Err(EmulError::UnsupportedOperandCombination);
        }

        let data = read_operand(mctx, self.src)?;
        write_operand(mctx, self.dst, data)
    }

    fn emulate_shl<I: EmulCtx>(&self, mctx: &mut I) -> Result<(), EmulError> {
        let (dst, size) = gpr(self.dst)?;
        let Operand::Imm(imm) = self.src else {
            return Err(EmulError::UnsupportedOperandCombination);
        };

        let count = imm.value() & SHIFT_COUNT_MASK;
        let data = read_reg(mctx, dst, size).checked_shl(count).unwrap_or(0);
        write_reg(mctx, dst, data & size.mask(), size);
        Ok(())
    }

    fn emulate_or<I: EmulCtx>(&self, mctx: &mut I) -> Result<(), EmulError> {
        let (dst, size) = gpr(self.dst)?;
        let Operand::Imm(imm) = self.src else {
            return Err(EmulError::UnsupportedOperandCombination);
        };

        let data = read_reg(mctx, dst, size) | imm.value();
        write_reg(mctx, dst, data & size.mask(), size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn_decode::{ControlReg, Immediate, Instruction};
    use crate::regs::{CR0Flags, GuestState};

    fn exec(ctx: &mut GuestState, bytes: &[u8]) -> Result<(), EmulError> {
        let decoded = Instruction::new(bytes).decode(&*ctx)?;
        decoded.emulate(ctx)
    }

    #[test]
    fn test_sub_16_keeps_upper_half() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Eax, 0xdead_0005);
        ctx.regs.set(Register::Ecx, 0x0000_0007);
        // SUB AX,CX
        exec(&mut ctx, &[0x2B, 0xC1]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0xdead_fffe);
    }

    #[test]
    fn test_sub_self_clears() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Eax, 0x1234_5678);
        exec(&mut ctx, &[0x2B, 0xC0]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0x1234_0000);
        ctx.regs.set(Register::Eax, 0x1234_5678);
        exec(&mut ctx, &[0x66, 0x2B, 0xC0]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0);
    }

    #[test]
    fn test_mov_reg() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Eax, 0x8765_4321);
        ctx.regs.set(Register::Edi, 0xffff_ffff);
        // MOV DI,AX
        exec(&mut ctx, &[0x8B, 0xF8]).unwrap();
        assert_eq!(ctx.regs.get(Register::Edi), 0xffff_4321);
        // MOV EDI,EAX
        exec(&mut ctx, &[0x66, 0x8B, 0xF8]).unwrap();
        assert_eq!(ctx.regs.get(Register::Edi), 0x8765_4321);
    }

    #[test]
    fn test_mov_segments() {
        let mut ctx = GuestState::default();
        ctx.segs[SegRegister::CS as usize] = 0x0800;
        ctx.regs.set(Register::Eax, 0xffff_ffff);
        // MOV AX,CS
        exec(&mut ctx, &[0x8C, 0xC8]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0xffff_0800);
        // MOV EAX,CS zero-extends the selector
        exec(&mut ctx, &[0x66, 0x8C, 0xC8]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0x0000_0800);
        // MOV DS,AX
        exec(&mut ctx, &[0x8E, 0xD8]).unwrap();
        assert_eq!(ctx.segs[SegRegister::DS as usize], 0x0800);
    }

    #[test]
    fn test_mov_to_cs_rejected() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Eax, 0x10);
        let before = ctx;
        assert_eq!(
            exec(&mut ctx, &[0x8E, 0xC8]),
            Err(EmulError::UnsupportedOperandCombination)
        );
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_mov_control_registers() {
        let mut ctx = GuestState::default();
        ctx.cr0 = CR0Flags::ET;
        // MOV EAX,CR0
        exec(&mut ctx, &[0x0F, 0x20, 0xC0]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), CR0Flags::ET.bits());
        // MOV CR3,EBX
        ctx.regs.set(Register::Ebx, 0x0010_0000);
        exec(&mut ctx, &[0x0F, 0x22, 0xDB]).unwrap();
        assert_eq!(ctx.cr3, 0x0010_0000);
        // MOV CR0,EAX with PE set
        ctx.regs.set(Register::Eax, (CR0Flags::ET | CR0Flags::PE).bits());
        exec(&mut ctx, &[0x0F, 0x22, 0xC0]).unwrap();
        assert!(ctx.cr0.contains(CR0Flags::PE));
    }

    #[test]
    fn test_mov_imm() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Ebx, 0xaaaa_aaaa);
        exec(&mut ctx, &[0xBB, 0x20, 0x00]).unwrap();
        assert_eq!(ctx.regs.get(Register::Ebx), 0xaaaa_0020);
        exec(&mut ctx, &[0x66, 0xBB, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(ctx.regs.get(Register::Ebx), 0x1234_5678);
    }

    #[test]
    fn test_shl() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Eax, 0x0000_1001);
        // SHL EAX,4
        exec(&mut ctx, &[0x66, 0xC1, 0xE0, 0x04]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0x0001_0010);
        // SHL AX,4 drops bits shifted out of the low word
        ctx.regs.set(Register::Eax, 0x0000_f001);
        exec(&mut ctx, &[0xC1, 0xE0, 0x04]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0x0000_0010);
        // SHL AX,16 clears the word
        ctx.regs.set(Register::Eax, 0x1234_5678);
        exec(&mut ctx, &[0xC1, 0xE0, 0x10]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0x1234_0000);
        // Count is masked to 5 bits
        ctx.regs.set(Register::Eax, 1);
        exec(&mut ctx, &[0x66, 0xC1, 0xE0, 0x21]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 2);
    }

    #[test]
    fn test_or_sign_extends() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Eax, 0x1);
        // OR EAX,0x11
        exec(&mut ctx, &[0x66, 0x83, 0xC8, 0x11]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0x11);
        // OR AX,-2
        ctx.regs.set(Register::Eax, 0x5555_0001);
        exec(&mut ctx, &[0x83, 0xC8, 0xFE]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0x5555_ffff);
        // OR EAX,-128
        ctx.regs.set(Register::Eax, 0);
        exec(&mut ctx, &[0x66, 0x83, 0xC8, 0x80]).unwrap();
        assert_eq!(ctx.regs.get(Register::Eax), 0xffff_ff80);
    }

    #[test]
    fn test_unsupported_combinations() {
        let mut ctx = GuestState::default();
        let before = ctx;
        let bad = [
            DecodedInsn::new(
                Mnemonic::Sub,
                Operand::Reg16(Register::Eax),
                Operand::Reg32(Register::Ecx),
            ),
            DecodedInsn::new(
                Mnemonic::Mov,
                Operand::Imm(Immediate::U8(1)),
                Operand::Reg16(Register::Eax),
            ),
            DecodedInsn::new(
                Mnemonic::Mov,
                Operand::Reg16(Register::Eax),
                Operand::Cr(ControlReg::Cr0),
            ),
            DecodedInsn::new(
                Mnemonic::Mov,
                Operand::Cr(ControlReg::Cr0),
                Operand::Seg(SegRegister::DS),
            ),
            DecodedInsn::new(
                Mnemonic::Mov,
                Operand::Reg32(Register::Eax),
                Operand::Imm(Immediate::U16(1)),
            ),
            DecodedInsn::new(
                Mnemonic::Shl,
                Operand::Reg32(Register::Eax),
                Operand::Reg32(Register::Ecx),
            ),
            DecodedInsn::new(
                Mnemonic::Or,
                Operand::Seg(SegRegister::DS),
                Operand::Imm(Immediate::S8(1)),
            ),
        ];
        for insn in bad {
            assert_eq!(
                insn.emulate(&mut ctx),
                Err(EmulError::UnsupportedOperandCombination)
            );
        }
        assert_eq!(ctx, before);
    }
}
