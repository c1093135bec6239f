// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

mod decode;
mod emulate;
mod insn;
mod opcode;

pub use crate::error::EmulError;
pub use decode::{DecodedInsnCtx, EmulCtx, PrefixFlags};
pub use insn::{
    ControlReg, DecodedInsn, Immediate, Instruction, Mnemonic, Operand, Register, SegRegister,
    MAX_INSN_SIZE,
};

/// Decodes the instruction at offset `ip` of the guest code bytes, logs
/// its trace line and applies it to the guest state.
///
/// # Arguments
///
/// * `mctx` - The guest state of the trapping processor.
/// * `code` - Guest code bytes. Decoding never reads past their end.
/// * `ip` - Offset of the instruction within `code`. Advanced past the
///   instruction on success.
///
/// # Returns
///
/// The [`DecodedInsn`] that was applied, or an [`EmulError`]. On error
/// neither `ip` nor the guest state are modified.
pub fn exec_instruction<I: EmulCtx>(
    mctx: &mut I,
    code: &[u8],
    ip: &mut usize,
) -> Result<DecodedInsn, EmulError> {
    match exec_at(mctx, code, *ip) {
        Ok((insn, size)) => {
            *ip += size;
            Ok(insn)
        }
        Err(e) => {
            log::warn!("Cannot emulate guest instruction at {:#06x}: {}", *ip, e);
            Err(e)
        }
    }
}

fn exec_at<I: EmulCtx>(
    mctx: &mut I,
    code: &[u8],
    ip: usize,
) -> Result<(DecodedInsn, usize), EmulError> {
    let bytes = code.get(ip..).ok_or(EmulError::TruncatedInput)?;
    let decoded = Instruction::new(bytes).decode(&*mctx)?;
    let insn = decoded
        .insn()
        .ok_or(EmulError::UnsupportedOperandCombination)?;

    log::info!("{:#06x}: {}", ip, insn);

    decoded.emulate(mctx)?;
    Ok((insn, decoded.size()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::GuestState;

    #[test]
    fn test_exec_advances_ip() {
        let mut ctx = GuestState::default();
        let code = [0x90, 0x66, 0x83, 0xC8, 0x11, 0x90];
        let mut ip = 1;
        let insn = exec_instruction(&mut ctx, &code, &mut ip).unwrap();
        assert_eq!(insn.mnemonic, Mnemonic::Or);
        assert_eq!(ip, 5);
        assert_eq!(ctx.regs.get(Register::Eax), 0x11);
    }

    #[test]
    fn test_exec_failure_is_atomic() {
        let mut ctx = GuestState::default();
        ctx.regs.set(Register::Eax, 0x1234);
        let before = ctx;

        let mut ip = 0;
        assert_eq!(
            exec_instruction(&mut ctx, &[0xFF], &mut ip),
            Err(EmulError::UnsupportedOpcode)
        );
        assert_eq!(ip, 0);

        // ModR/M byte cut off by the end of the buffer
        let mut ip = 1;
        assert_eq!(
            exec_instruction(&mut ctx, &[0x90, 0x2B], &mut ip),
            Err(EmulError::TruncatedInput)
        );
        assert_eq!(ip, 1);

        // Immediate cut off by the end of the buffer
        let mut ip = 0;
        assert_eq!(
            exec_instruction(&mut ctx, &[0x66, 0x83, 0xC8], &mut ip),
            Err(EmulError::TruncatedInput)
        );
        assert_eq!(ip, 0);

        // Memory operand
        assert_eq!(
            exec_instruction(&mut ctx, &[0x8B, 0x06, 0x00, 0x10], &mut ip),
            Err(EmulError::UnsupportedAddressingMode)
        );
        assert_eq!(ip, 0);

        assert_eq!(ctx, before);
    }

    #[test]
    fn test_exec_ip_out_of_bounds() {
        let mut ctx = GuestState::default();
        let mut ip = 3;
        assert_eq!(
            exec_instruction(&mut ctx, &[0x2B, 0xC0], &mut ip),
            Err(EmulError::TruncatedInput)
        );
        assert_eq!(ip, 3);
    }
}
