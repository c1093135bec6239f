// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

use core::fmt;

/// Reasons the engine refuses to decode or emulate a guest instruction.
/// Every failure leaves the guest register state and the instruction
/// pointer exactly as they were passed in. The [`fmt::Display`] trait is
/// implemented so the VM-exit handler can log a readable reason.
///
/// # Examples
///
/// ```rust
/// use realmode::EmulError;
///
/// let error = EmulError::UnsupportedOpcodeExtension(3);
/// assert_eq!(error.to_string(), "unsupported opcode extension /3");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmulError {
    /// A legacy prefix other than operand/address-size override.
    UnsupportedPrefix(u8),
    /// The one- or two-byte opcode is not in the opcode tables.
    UnsupportedOpcode,
    /// A group opcode names a /digit that is not implemented.
    UnsupportedOpcodeExtension(u8),
    /// ModR/M addressing mode other than register-direct.
    UnsupportedAddressingMode,
    /// The resolved operands cannot be rendered or applied.
    UnsupportedOperandCombination,
    /// The instruction runs past the end of the supplied code bytes.
    TruncatedInput,
}

impl fmt::Display for EmulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPrefix(byte) => {
                write!(f, "unsupported instruction prefix {byte:#04x}")
            }
            Self::UnsupportedOpcode => {
                write!(f, "unsupported opcode")
            }
            Self::UnsupportedOpcodeExtension(digit) => {
                write!(f, "unsupported opcode extension /{digit}")
            }
            Self::UnsupportedAddressingMode => {
                write!(f, "unsupported ModR/M addressing mode")
            }
            Self::UnsupportedOperandCombination => {
                write!(f, "unsupported operand combination")
            }
            Self::TruncatedInput => {
                write!(f, "instruction truncated by end of code buffer")
            }
        }
    }
}
