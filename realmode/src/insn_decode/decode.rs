// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

use super::insn::{ControlReg, DecodedInsn, Immediate, Mnemonic, Operand, RegCode};
use super::opcode::{OpCodeDesc, OpCodeFlags, OpEncoding, OperandType};
use super::{EmulError, Register, SegRegister};
use crate::types::Bytes;
use bitflags::bitflags;

/// Represents the raw bytes of an instruction and tracks the number of
/// bytes being processed. Every read is bounded by the end of the slice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InsnBytes<'a> {
    /// Guest code bytes starting at the instruction pointer
    bytes: &'a [u8],
    /// Number of instruction bytes being processed
    nr_processed: usize,
}

impl<'a> InsnBytes<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            nr_processed: 0,
        }
    }

    /// Retrieves a single unprocessed instruction byte.
    ///
    /// # Returns
    ///
    /// An instruction byte if success or [`EmulError::TruncatedInput`]
    /// if the code bytes end before it.
    pub fn peek(&self) -> Result<u8, EmulError> {
        self.bytes
            .get(self.nr_processed)
            .copied()
            .ok_or(EmulError::TruncatedInput)
    }

    /// Increases the count by one after a peeked byte being processed.
    pub fn advance(&mut self) {
        self.nr_processed += 1
    }

    /// Retrieves the number of processed instruction bytes.
    pub fn processed(&self) -> usize {
        self.nr_processed
    }
}

/// The instruction bytes specifically for OpCode decoding
#[derive(Clone, Copy, Debug)]
pub struct OpCodeBytes<'a>(pub InsnBytes<'a>);

// The instruction bytes specifically for prefix decoding
#[derive(Clone, Copy, Debug)]
struct PrefixBytes<'a>(InsnBytes<'a>);
// The instruction bytes specifically for ModR/M decoding
#[derive(Clone, Copy, Debug)]
struct ModRmBytes<'a>(InsnBytes<'a>);
// The instruction bytes specifically for immediate decoding
#[derive(Clone, Copy, Debug)]
struct ImmBytes<'a>(InsnBytes<'a>);
// The instruction bytes specifically after decoding completed
#[derive(Clone, Copy, Debug)]
struct DecodedBytes<'a>(InsnBytes<'a>);

/// This trait provides the guest state the engine decodes against and
/// applies instruction effects to. It is implemented by the VM-exit
/// handler on top of its saved guest registers and VMCS accessors.
///
/// Segment and control register accesses have consequences outside of
/// this engine (descriptor caches, paging), so the implementor decides
/// what a write does. The default implementations refuse them.
pub trait EmulCtx: core::fmt::Debug {
    /// Default operand size of the guest code segment: two bytes for
    /// real-mode and 16-bit code, four bytes if CS.D is set.
    fn code_size(&self) -> Bytes {
        Bytes::Two
    }

    /// Read a 32-bit general purpose register
    fn read_reg(&self, reg: Register) -> u32;

    /// Write a 32-bit general purpose register
    fn write_reg(&mut self, reg: Register, val: u32);

    /// Read a segment selector
    fn read_seg(&self, _seg: SegRegister) -> Result<u16, EmulError> {
        Err(EmulError::UnsupportedOperandCombination)
    }

    /// Load a segment selector
    fn write_seg(&mut self, _seg: SegRegister, _sel: u16) -> Result<(), EmulError> {
        Err(EmulError::UnsupportedOperandCombination)
    }

    /// Read a control register
    fn read_cr(&self, _cr: ControlReg) -> Result<u32, EmulError> {
        Err(EmulError::UnsupportedOperandCombination)
    }

    /// Write a control register
    fn write_cr(&mut self, _cr: ControlReg, _val: u32) -> Result<(), EmulError> {
        Err(EmulError::UnsupportedOperandCombination)
    }
}

// Size override prefixes are the only ones the engine understands, one
// of each kind at most.
const PREFIX_SIZE: usize = 2;

bitflags! {
    /// Legacy prefixes seen in front of the opcode.
    #[derive(Copy, Clone, Debug, Default, PartialEq)]
    pub struct PrefixFlags: u16 {
        const OPSIZE_OVERRIDE       = 1 << 0;
        const ADDRSIZE_OVERRIDE     = 1 << 1;
    }
}

#[derive(Copy, Clone, Default, Debug, PartialEq)]
struct ModRM(u8);

const MOD_INDIRECT: u8 = 0;
const MOD_INDIRECT_DISP8: u8 = 1;
const MOD_INDIRECT_DISP32: u8 = 2;
const MOD_DIRECT: u8 = 3;

impl From<u8> for ModRM {
    fn from(val: u8) -> Self {
        ModRM(val)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Mod {
    Indirect,
    IndirectDisp8,
    IndirectDisp32,
    Direct,
}

impl ModRM {
    fn get_mod(&self) -> Mod {
        match (self.0 >> 6) & 0x3 {
            MOD_INDIRECT => Mod::Indirect,
            MOD_INDIRECT_DISP8 => Mod::IndirectDisp8,
            MOD_INDIRECT_DISP32 => Mod::IndirectDisp32,
            MOD_DIRECT => Mod::Direct,
            _ => unreachable!("Mod has only two bits, so its value is always 0 ~ 3"),
        }
    }

    fn get_reg(&self) -> u8 {
        (self.0 >> 3) & 0x7
    }

    fn get_rm(&self) -> u8 {
        self.0 & 0x7
    }
}

/// Represents the context of a decoded instruction. It holds the decoded
/// instruction, its length and the pieces decoded from the instruction
/// bytes on the way there.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DecodedInsnCtx {
    insn: Option<DecodedInsn>,
    insn_len: usize,

    // Prefix
    prefix: PrefixFlags,

    // Opcode description
    opdesc: Option<OpCodeDesc>,
    opsize: Bytes,
    addrsize: Bytes,

    // Operand slots as they get resolved
    mnemonic: Option<Mnemonic>,
    dst: Option<Operand>,
    src: Option<Operand>,
}

impl DecodedInsnCtx {
    /// Constructs a new `DecodedInsnCtx` by decoding the given
    /// instruction bytes using the provided machine context.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Guest code bytes starting at the instruction.
    /// * `mctx` - A reference to an object implementing the `EmulCtx`
    ///   trait, which supplies the default operand size.
    ///
    ///  # Returns
    ///
    ///  A `DecodedInsnCtx` if decoding is successful or an `EmulError`
    ///  otherwise.
    pub(super) fn new<I: EmulCtx>(bytes: &[u8], mctx: &I) -> Result<Self, EmulError> {
        let mut insn_ctx = Self::default();

        insn_ctx.decode(bytes, mctx).map(|_| insn_ctx)
    }

    /// Retrieves the decoded instruction, if available.
    pub fn insn(&self) -> Option<DecodedInsn> {
        self.insn
    }

    /// Retrieves the length of the decoded instruction in bytes, which is
    /// how far the guest instruction pointer advances past it.
    pub fn size(&self) -> usize {
        self.insn_len
    }

    /// Size override prefixes the instruction carried.
    pub fn prefixes(&self) -> PrefixFlags {
        self.prefix
    }

    /// Operand size selected by the code segment and the prefixes.
    pub fn operand_size(&self) -> Bytes {
        self.opsize
    }

    /// Address size selected by the code segment and the prefixes.
    pub fn address_size(&self) -> Bytes {
        self.addrsize
    }

    /// Applies the effect of the decoded instruction to the guest state.
    ///
    /// # Arguments
    ///
    /// * `mctx` - A mutable reference to an object implementing the
    ///   `EmulCtx` trait to provide the guest state.
    ///
    /// # Returns
    ///
    /// An `Ok(())` if emulation is successful or an `EmulError` otherwise.
    /// On error the guest state is left untouched.
    pub fn emulate<I: EmulCtx>(&self, mctx: &mut I) -> Result<(), EmulError> {
        self.insn
            .ok_or(EmulError::UnsupportedOperandCombination)
            .and_then(|insn| insn.emulate(mctx))
    }

    fn decode<I: EmulCtx>(&mut self, bytes: &[u8], mctx: &I) -> Result<(), EmulError> {
        self.decode_prefixes(bytes, mctx)
            .and_then(|insn| self.decode_opcode(insn))
            .and_then(|insn| self.decode_modrm(insn))
            .and_then(|insn| self.decode_immediate(insn))
            .and_then(|insn| self.complete_decode(insn))
    }

    #[inline]
    fn get_opdesc(&self) -> Result<OpCodeDesc, EmulError> {
        self.opdesc.ok_or(EmulError::UnsupportedOpcode)
    }

    fn decode_op_addr_size(&mut self, code_size: Bytes) {
        self.opsize = if self.prefix.contains(PrefixFlags::OPSIZE_OVERRIDE) {
            code_size.toggled()
        } else {
            code_size
        };
        self.addrsize = if self.prefix.contains(PrefixFlags::ADDRSIZE_OVERRIDE) {
            code_size.toggled()
        } else {
            code_size
        };
    }

    fn decode_prefixes<'a, I: EmulCtx>(
        &mut self,
        bytes: &'a [u8],
        mctx: &I,
    ) -> Result<OpCodeBytes<'a>, EmulError> {
        let mut insn = PrefixBytes(InsnBytes::new(bytes));
        for _ in 0..PREFIX_SIZE {
            match insn.0.peek()? {
                0x66 => self.prefix.insert(PrefixFlags::OPSIZE_OVERRIDE),
                0x67 => self.prefix.insert(PrefixFlags::ADDRSIZE_OVERRIDE),
                _ => break,
            }
            insn.0.advance();
        }

        self.decode_op_addr_size(mctx.code_size());

        Ok(OpCodeBytes(insn.0))
    }

    fn decode_opcode<'a>(&mut self, mut insn: OpCodeBytes<'a>) -> Result<ModRmBytes<'a>, EmulError> {
        let opdesc = OpCodeDesc::decode(&mut insn)?;

        if opdesc.encoding == OpEncoding::Oi {
            // +r forms carry the destination register in the opcode
            self.dst = Some(self.reg_operand(opdesc.dst, opdesc.code & 0x7)?);
            self.mnemonic = Some(opdesc.class.mnemonic(0)?);
        }

        self.opdesc = Some(opdesc);

        Ok(ModRmBytes(insn.0))
    }

    fn decode_modrm<'a>(&mut self, mut insn: ModRmBytes<'a>) -> Result<ImmBytes<'a>, EmulError> {
        let opdesc = self.get_opdesc()?;
        if opdesc.flags.contains(OpCodeFlags::NO_MODRM) {
            return Ok(ImmBytes(insn.0));
        }

        let modrm = ModRM::from(insn.0.peek()?);

        // Memory operands would need guest address translation, only
        // register-direct operands are emulated.
        if modrm.get_mod() != Mod::Direct {
            return Err(EmulError::UnsupportedAddressingMode);
        }

        let reg = modrm.get_reg();
        let rm = modrm.get_rm();

        if opdesc.class.is_group() {
            // The reg field holds the /digit opcode extension
            self.mnemonic = Some(opdesc.class.mnemonic(reg)?);
        } else {
            self.mnemonic = Some(opdesc.class.mnemonic(0)?);
        }

        match opdesc.encoding {
            OpEncoding::Rm => {
                self.dst = Some(self.reg_operand(opdesc.dst, reg)?);
                self.src = Some(self.reg_operand(opdesc.src, rm)?);
            }
            OpEncoding::Mr => {
                self.dst = Some(self.reg_operand(opdesc.dst, rm)?);
                self.src = Some(self.reg_operand(opdesc.src, reg)?);
            }
            OpEncoding::Mi => {
                self.dst = Some(self.reg_operand(opdesc.dst, rm)?);
            }
            OpEncoding::Oi | OpEncoding::None => {
                return Err(EmulError::UnsupportedOperandCombination);
            }
        }

        insn.0.advance();
        Ok(ImmBytes(insn.0))
    }

    fn decode_immediate<'a>(&mut self, mut insn: ImmBytes<'a>) -> Result<DecodedBytes<'a>, EmulError> {
        let opdesc = self.get_opdesc()?;

        // Figure out immediate operand size (if any)
        let imm_bytes = match opdesc.src {
            OperandType::Imm => self.opsize,
            OperandType::Imm8 => Bytes::One,
            _ => return Ok(DecodedBytes(insn.0)),
        };

        let mut buf = [0; 4];

        for v in buf.iter_mut().take(imm_bytes as usize) {
            *v = insn.0.peek()?;
            insn.0.advance();
        }

        let signed = opdesc.flags.contains(OpCodeFlags::SIGNED_IMM);
        let immediate = match (imm_bytes, signed) {
            (Bytes::One, false) => Immediate::U8(buf[0]),
            (Bytes::One, true) => Immediate::S8(i8::from_le_bytes([buf[0]])),
            (Bytes::Two, false) => Immediate::U16(u16::from_le_bytes([buf[0], buf[1]])),
            (Bytes::Two, true) => Immediate::S16(i16::from_le_bytes([buf[0], buf[1]])),
            (Bytes::Four, false) => Immediate::U32(u32::from_le_bytes(buf)),
            (Bytes::Four, true) => Immediate::S32(i32::from_le_bytes(buf)),
            _ => return Err(EmulError::UnsupportedOperandCombination),
        };
        self.src = Some(Operand::Imm(immediate));

        Ok(DecodedBytes(insn.0))
    }

    fn complete_decode(&mut self, insn: DecodedBytes<'_>) -> Result<(), EmulError> {
        let decoded = DecodedInsn::new(
            self.mnemonic.ok_or(EmulError::UnsupportedOpcode)?,
            self.dst.ok_or(EmulError::UnsupportedOperandCombination)?,
            self.src.ok_or(EmulError::UnsupportedOperandCombination)?,
        );
        self.insn_len = insn.0.processed();
        self.insn = Some(decoded);
        Ok(())
    }

    /// Resolves a register number from the opcode or ModR/M byte into an
    /// operand of the declared kind.
    fn reg_operand(&self, ty: OperandType, code: u8) -> Result<Operand, EmulError> {
        let code = RegCode(code);
        match ty {
            OperandType::Gpr => Operand::gpr(Register::try_from(code)?, self.opsize),
            OperandType::Gpr32 => Ok(Operand::Reg32(Register::try_from(code)?)),
            OperandType::Seg => Ok(Operand::Seg(SegRegister::try_from(code)?)),
            OperandType::Cr => Ok(Operand::Cr(ControlReg::try_from(code)?)),
            OperandType::Imm | OperandType::Imm8 | OperandType::None => {
                Err(EmulError::UnsupportedOperandCombination)
            }
        }
    }
}
