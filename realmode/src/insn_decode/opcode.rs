// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

use super::decode::OpCodeBytes;
use super::insn::Mnemonic;
use super::EmulError;
use bitflags::bitflags;

bitflags! {
    /// Attributes of an opcode that steer the later decode stages.
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct OpCodeFlags: u32 {
        // Register number in the low 3 opcode bits, no ModR/M byte
        const NO_MODRM      = 1 << 0;
        // Immediate operand is sign extended
        const SIGNED_IMM    = 1 << 1;
    }
}

/// Classification of the supported opcodes. Group classes do not name
/// an instruction until the ModR/M reg field has been decoded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpCodeClass {
    Sub,
    Mov,
    // 0x83: ALU operation with sign-extended imm8
    Group1,
    // 0xC1: shift/rotate with imm8
    Group2,
    TwoByte,
}

/// Where the two operand slots of an opcode come from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpEncoding {
    // Destination from ModR/M reg, source from ModR/M r/m
    Rm,
    // Destination from ModR/M r/m, source from ModR/M reg
    Mr,
    // Destination from ModR/M r/m, source is an immediate
    Mi,
    // Destination from the low opcode bits, source is an immediate
    Oi,
    None,
}

/// Declared kind of an operand slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OperandType {
    // General purpose register sized by the operand size
    Gpr,
    // 32-bit general purpose register regardless of prefixes
    Gpr32,
    Seg,
    Cr,
    // Immediate sized by the operand size
    Imm,
    Imm8,
    None,
}

/// Descriptor for an opcode, which contains the raw instruction opcode
/// value, its class and the shape of its operands.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpCodeDesc {
    /// The opcode value
    pub code: u8,
    /// The type of the opcode
    pub class: OpCodeClass,
    /// Operand slot sources
    pub encoding: OpEncoding,
    /// Declared destination kind
    pub dst: OperandType,
    /// Declared source kind
    pub src: OperandType,
    pub flags: OpCodeFlags,
}

macro_rules! opcode {
    ($class:expr) => {
        Some(OpCodeDesc {
            code: 0,
            class: $class,
            encoding: OpEncoding::None,
            dst: OperandType::None,
            src: OperandType::None,
            flags: OpCodeFlags::empty(),
        })
    };
    ($code:expr, $class:expr, $encoding:expr, $dst:expr, $src:expr) => {
        Some(OpCodeDesc {
            code: $code,
            class: $class,
            encoding: $encoding,
            dst: $dst,
            src: $src,
            flags: OpCodeFlags::empty(),
        })
    };
    ($code:expr, $class:expr, $encoding:expr, $dst:expr, $src:expr, $flags:expr) => {
        Some(OpCodeDesc {
            code: $code,
            class: $class,
            encoding: $encoding,
            dst: $dst,
            src: $src,
            flags: OpCodeFlags::from_bits_truncate($flags),
        })
    };
}

static ONE_BYTE_TABLE: [Option<OpCodeDesc>; 256] = {
    let mut table: [Option<OpCodeDesc>; 256] = [None; 256];

    table[0x0F] = opcode!(OpCodeClass::TwoByte);
    // SUB r16/32, r/m16/32
    table[0x2B] = opcode!(
        0x2B,
        OpCodeClass::Sub,
        OpEncoding::Rm,
        OperandType::Gpr,
        OperandType::Gpr
    );
    // OR r/m16/32, imm8 is /1
    table[0x83] = opcode!(
        0x83,
        OpCodeClass::Group1,
        OpEncoding::Mi,
        OperandType::Gpr,
        OperandType::Imm8,
        OpCodeFlags::SIGNED_IMM.bits()
    );
    // MOV r16/32, r/m16/32
    table[0x8B] = opcode!(
        0x8B,
        OpCodeClass::Mov,
        OpEncoding::Rm,
        OperandType::Gpr,
        OperandType::Gpr
    );
    // MOV r/m16, Sreg
    table[0x8C] = opcode!(
        0x8C,
        OpCodeClass::Mov,
        OpEncoding::Mr,
        OperandType::Gpr,
        OperandType::Seg
    );
    // MOV Sreg, r/m16
    table[0x8E] = opcode!(
        0x8E,
        OpCodeClass::Mov,
        OpEncoding::Rm,
        OperandType::Seg,
        OperandType::Gpr
    );
    // MOV r16/32, imm16/32 (B8+r)
    let mut code = 0xB8;
    while code <= 0xBF {
        table[code] = opcode!(
            code as u8,
            OpCodeClass::Mov,
            OpEncoding::Oi,
            OperandType::Gpr,
            OperandType::Imm,
            OpCodeFlags::NO_MODRM.bits()
        );
        code += 1;
    }
    // SHL r/m16/32, imm8 is /4
    table[0xC1] = opcode!(
        0xC1,
        OpCodeClass::Group2,
        OpEncoding::Mi,
        OperandType::Gpr,
        OperandType::Imm8
    );

    table
};

static TWO_BYTE_TABLE: [Option<OpCodeDesc>; 256] = {
    let mut table = [None; 256];

    // MOV r32, CR0-CR4
    table[0x20] = opcode!(
        0x20,
        OpCodeClass::Mov,
        OpEncoding::Mr,
        OperandType::Gpr32,
        OperandType::Cr
    );
    // MOV CR0-CR4, r32
    table[0x22] = opcode!(
        0x22,
        OpCodeClass::Mov,
        OpEncoding::Rm,
        OperandType::Cr,
        OperandType::Gpr32
    );

    table
};

static GROUP1_TABLE: [Option<Mnemonic>; 8] = {
    let mut table = [None; 8];

    table[1] = Some(Mnemonic::Or);

    table
};

static GROUP2_TABLE: [Option<Mnemonic>; 8] = {
    let mut table = [None; 8];

    table[4] = Some(Mnemonic::Shl);

    table
};

// Legacy prefixes the prefix scanner leaves for the opcode stage
// to reject.
fn is_legacy_prefix(byte: u8) -> bool {
    matches!(
        byte,
        0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 | 0x66 | 0x67 | 0xF0 | 0xF2 | 0xF3
    )
}

impl OpCodeClass {
    /// Resolves the instruction named by this opcode class.
    ///
    /// # Arguments
    ///
    /// * `digit` - The ModR/M reg field, which selects the instruction
    ///   for group classes and is ignored otherwise.
    ///
    /// # Returns
    ///
    /// The [`Mnemonic`] or [`EmulError::UnsupportedOpcodeExtension`] if
    /// the group has no supported instruction for `digit`.
    pub fn mnemonic(&self, digit: u8) -> Result<Mnemonic, EmulError> {
        let table = match self {
            OpCodeClass::Sub => return Ok(Mnemonic::Sub),
            OpCodeClass::Mov => return Ok(Mnemonic::Mov),
            OpCodeClass::Group1 => &GROUP1_TABLE,
            OpCodeClass::Group2 => &GROUP2_TABLE,
            OpCodeClass::TwoByte => return Err(EmulError::UnsupportedOpcode),
        };
        table
            .get(usize::from(digit))
            .copied()
            .flatten()
            .ok_or(EmulError::UnsupportedOpcodeExtension(digit))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, OpCodeClass::Group1 | OpCodeClass::Group2)
    }
}

impl OpCodeDesc {
    fn one_byte(insn: &mut OpCodeBytes<'_>) -> Result<OpCodeDesc, EmulError> {
        let byte = insn.0.peek()?;
        // Advance the OpCodeBytes as this is a opcode byte
        insn.0.advance();
        ONE_BYTE_TABLE
            .get(usize::from(byte))
            .copied()
            .flatten()
            .ok_or(if is_legacy_prefix(byte) {
                EmulError::UnsupportedPrefix(byte)
            } else {
                EmulError::UnsupportedOpcode
            })
    }

    fn two_byte(insn: &mut OpCodeBytes<'_>) -> Result<OpCodeDesc, EmulError> {
        let byte = insn.0.peek()?;
        // Advance the OpCodeBytes as this is a opcode byte
        insn.0.advance();
        TWO_BYTE_TABLE
            .get(usize::from(byte))
            .copied()
            .flatten()
            .ok_or(EmulError::UnsupportedOpcode)
    }

    /// Decodes an opcode from the given `OpCodeBytes`.
    ///
    /// # Arguments
    ///
    /// * `insn` - A mutable reference to the `OpCodeBytes` representing
    ///   the bytes of the opcode to be decoded.
    ///
    /// # Returns
    ///
    /// The [`OpCodeDesc`] if the opcode is supported or an [`EmulError`]
    /// otherwise.
    pub fn decode(insn: &mut OpCodeBytes<'_>) -> Result<OpCodeDesc, EmulError> {
        let desc = Self::one_byte(insn)?;
        match desc.class {
            OpCodeClass::TwoByte => Self::two_byte(insn),
            _ => Ok(desc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_coded_rows() {
        for code in 0xB8..=0xBFu8 {
            let desc = ONE_BYTE_TABLE[usize::from(code)].unwrap();
            assert_eq!(desc.code, code);
            assert_eq!(desc.encoding, OpEncoding::Oi);
            assert!(desc.flags.contains(OpCodeFlags::NO_MODRM));
        }
    }

    #[test]
    fn test_group1_digits() {
        assert_eq!(OpCodeClass::Group1.mnemonic(1), Ok(Mnemonic::Or));
        for digit in (0..8).filter(|d| *d != 1) {
            assert_eq!(
                OpCodeClass::Group1.mnemonic(digit),
                Err(EmulError::UnsupportedOpcodeExtension(digit))
            );
        }
    }

    #[test]
    fn test_group2_digits() {
        assert_eq!(OpCodeClass::Group2.mnemonic(4), Ok(Mnemonic::Shl));
        for digit in (0..8).filter(|d| *d != 4) {
            assert_eq!(
                OpCodeClass::Group2.mnemonic(digit),
                Err(EmulError::UnsupportedOpcodeExtension(digit))
            );
        }
    }

    #[test]
    fn test_plain_classes_ignore_digit() {
        assert_eq!(OpCodeClass::Mov.mnemonic(5), Ok(Mnemonic::Mov));
        assert_eq!(OpCodeClass::Sub.mnemonic(7), Ok(Mnemonic::Sub));
        assert!(OpCodeClass::Group1.is_group());
        assert!(!OpCodeClass::Mov.is_group());
    }

    #[test]
    fn test_two_byte_table() {
        assert_eq!(TWO_BYTE_TABLE[0x20].unwrap().src, OperandType::Cr);
        assert_eq!(TWO_BYTE_TABLE[0x22].unwrap().dst, OperandType::Cr);
        assert!(TWO_BYTE_TABLE[0x01].is_none());
    }
}
