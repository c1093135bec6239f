// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

use super::decode::DecodedInsnCtx;
use super::{EmulCtx, EmulError};
use crate::types::Bytes;
use core::fmt;

/// Architectural upper bound of an x86 instruction. The decoder never
/// looks further than this into the guest code window.
pub const MAX_INSN_SIZE: usize = 15;

static R16_NAMES: [&str; 8] = ["AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI"];
static R32_NAMES: [&str; 8] = ["EAX", "ECX", "EDX", "EBX", "ESP", "EBP", "ESI", "EDI"];
static SREG_NAMES: [&str; 6] = ["ES", "CS", "SS", "DS", "FS", "GS"];

/// A general purpose register, in ModR/M encoding order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Register {
    Eax,
    Ecx,
    Edx,
    Ebx,
    Esp,
    Ebp,
    Esi,
    Edi,
}

impl Register {
    pub const ALL: [Register; 8] = [
        Register::Eax,
        Register::Ecx,
        Register::Edx,
        Register::Ebx,
        Register::Esp,
        Register::Ebp,
        Register::Esi,
        Register::Edi,
    ];
}

/// A segment register, in ModR/M encoding order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegRegister {
    ES,
    CS,
    SS,
    DS,
    FS,
    GS,
}

/// A control register that can be named by MOV to/from CRn outside of
/// 64-bit mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControlReg {
    Cr0 = 0,
    Cr2 = 2,
    Cr3 = 3,
    Cr4 = 4,
}

// Translate a 3-bit register number from the opcode or the ModR/M
// byte to the register it selects.
pub(super) struct RegCode(pub u8);

impl TryFrom<RegCode> for Register {
    type Error = EmulError;

    fn try_from(val: RegCode) -> Result<Register, Self::Error> {
        Register::ALL
            .get(usize::from(val.0))
            .copied()
            .ok_or(EmulError::UnsupportedOperandCombination)
    }
}

impl TryFrom<RegCode> for SegRegister {
    type Error = EmulError;

    fn try_from(val: RegCode) -> Result<SegRegister, Self::Error> {
        match val.0 {
            0 => Ok(SegRegister::ES),
            1 => Ok(SegRegister::CS),
            2 => Ok(SegRegister::SS),
            3 => Ok(SegRegister::DS),
            4 => Ok(SegRegister::FS),
            5 => Ok(SegRegister::GS),
            // Encodings 6 and 7 are reserved
            _ => Err(EmulError::UnsupportedOperandCombination),
        }
    }
}

impl TryFrom<RegCode> for ControlReg {
    type Error = EmulError;

    fn try_from(val: RegCode) -> Result<ControlReg, Self::Error> {
        match val.0 {
            0 => Ok(ControlReg::Cr0),
            2 => Ok(ControlReg::Cr2),
            3 => Ok(ControlReg::Cr3),
            4 => Ok(ControlReg::Cr4),
            // CR1, CR5-CR7 raise #UD
            _ => Err(EmulError::UnsupportedOperandCombination),
        }
    }
}

/// An immediate value in an instruction. Signed variants are sign
/// extended when used as an operand value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Immediate {
    U8(u8),
    U16(u16),
    U32(u32),
    S8(i8),
    S16(i16),
    S32(i32),
}

impl Immediate {
    /// The value of the immediate extended to 32 bits.
    pub fn value(&self) -> u32 {
        match *self {
            Immediate::U8(v) => u32::from(v),
            Immediate::U16(v) => u32::from(v),
            Immediate::U32(v) => v,
            Immediate::S8(v) => i32::from(v) as u32,
            Immediate::S16(v) => i32::from(v) as u32,
            Immediate::S32(v) => v as u32,
        }
    }

    /// Number of instruction bytes the immediate was encoded in.
    pub fn size(&self) -> Bytes {
        match self {
            Immediate::U8(_) | Immediate::S8(_) => Bytes::One,
            Immediate::U16(_) | Immediate::S16(_) => Bytes::Two,
            Immediate::U32(_) | Immediate::S32(_) => Bytes::Four,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Immediate::S8(_) | Immediate::S16(_) | Immediate::S32(_)
        )
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = match self.size() {
            Bytes::One => "byte",
            Bytes::Two => "word",
            _ => "dword",
        };
        match *self {
            Immediate::U8(v) => write!(f, "{width} {v:#x}"),
            Immediate::U16(v) => write!(f, "{width} {v:#x}"),
            Immediate::U32(v) => write!(f, "{width} {v:#x}"),
            Immediate::S8(v) => write_signed(f, width, i32::from(v)),
            Immediate::S16(v) => write_signed(f, width, i32::from(v)),
            Immediate::S32(v) => write_signed(f, width, v),
        }
    }
}

fn write_signed(f: &mut fmt::Formatter<'_>, width: &str, v: i32) -> fmt::Result {
    let sign = if v < 0 { "-" } else { "" };
    write!(f, "signed {width} {sign}{:#x}", v.unsigned_abs())
}

/// An operand slot of a decoded instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operand {
    Reg16(Register),
    Reg32(Register),
    Seg(SegRegister),
    Cr(ControlReg),
    Imm(Immediate),
}

impl Operand {
    /// A general purpose register operand of the given operand size.
    pub fn gpr(reg: Register, size: Bytes) -> Result<Self, EmulError> {
        match size {
            Bytes::Two => Ok(Operand::Reg16(reg)),
            Bytes::Four => Ok(Operand::Reg32(reg)),
            _ => Err(EmulError::UnsupportedOperandCombination),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg16(r) => f.write_str(R16_NAMES[*r as usize]),
            Operand::Reg32(r) => f.write_str(R32_NAMES[*r as usize]),
            Operand::Seg(s) => f.write_str(SREG_NAMES[*s as usize]),
            Operand::Cr(cr) => write!(f, "CR{}", *cr as u8),
            Operand::Imm(imm) => write!(f, "{imm}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mnemonic {
    Sub,
    Mov,
    Shl,
    Or,
}

impl Mnemonic {
    pub fn name(&self) -> &'static str {
        match self {
            Mnemonic::Sub => "SUB",
            Mnemonic::Mov => "MOV",
            Mnemonic::Shl => "SHL",
            Mnemonic::Or => "OR",
        }
    }
}

/// A fully resolved instruction. Destination comes first, also for
/// moves into segment and control registers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodedInsn {
    pub mnemonic: Mnemonic,
    pub dst: Operand,
    pub src: Operand,
}

impl DecodedInsn {
    pub const fn new(mnemonic: Mnemonic, dst: Operand, src: Operand) -> Self {
        Self { mnemonic, dst, src }
    }
}

/// Renders the trace line the VM-exit handler logs for the instruction,
/// e.g. `MOV DS,AX` or `OR EAX,signed byte 0x11`.
impl fmt::Display for DecodedInsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {},{}", self.mnemonic.name(), self.dst, self.src)
    }
}

/// A view of the guest code bytes starting at the trapping instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instruction<'a>(&'a [u8]);

impl<'a> Instruction<'a> {
    /// Wraps the guest code window. Bytes past [`MAX_INSN_SIZE`] are never
    /// part of the instruction and are dropped from the view.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self(bytes.get(..MAX_INSN_SIZE).unwrap_or(bytes))
    }

    /// Decode the instruction with the given EmulCtx.
    ///
    /// # Returns
    ///
    /// A [`DecodedInsnCtx`] if the instruction is supported, or an [`EmulError`] otherwise.
    pub fn decode<I: EmulCtx>(&self, mctx: &I) -> Result<DecodedInsnCtx, EmulError> {
        DecodedInsnCtx::new(self.0, mctx)
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.0
    }
}
