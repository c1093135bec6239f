// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

//! Guest register file of a trapping processor and a plain [`EmulCtx`]
//! implementation on top of it.

use crate::insn_decode::{ControlReg, EmulCtx, EmulError, Register, SegRegister};
use crate::types::Bytes;
use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CR0Flags: u32 {
        const PE = 1 << 0;  // Protection Enabled
        const MP = 1 << 1;  // Monitor Coprocessor
        const EM = 1 << 2;  // Emulation
        const TS = 1 << 3;  // Task Switched
        const ET = 1 << 4;  // Extension Type
        const NE = 1 << 5;  // Numeric Error
        const WP = 1 << 16; // Write Protect
        const AM = 1 << 18; // Alignment Mask
        const NW = 1 << 29; // Not Writethrough
        const CD = 1 << 30; // Cache Disable
        const PG = 1 << 31; // Paging
    }
}

/// General purpose registers as saved by the VM-exit entry stub, in
/// ModR/M encoding order.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct GuestRegs {
    gprs: [u32; 8],
}

impl GuestRegs {
    pub const fn new(gprs: [u32; 8]) -> Self {
        Self { gprs }
    }

    pub fn get(&self, reg: Register) -> u32 {
        self.gprs[reg as usize]
    }

    pub fn set(&mut self, reg: Register, val: u32) {
        self.gprs[reg as usize] = val;
    }

    /// Reads the register file from the save area layout of the entry
    /// stub. Returns `None` if `buf` is not exactly one save area long.
    pub fn from_saved(buf: &[u8]) -> Option<Self> {
        Self::read_from_bytes(buf).ok()
    }

    /// The register file in save area layout.
    pub fn as_saved(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Guest state of a processor trapped in real mode or 16-bit protected
/// mode.
///
/// Segment loads only update the selector. Descriptor caches stay with
/// the caller, which picks up the new selectors after emulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuestState {
    pub regs: GuestRegs,
    /// Selectors indexed by [`SegRegister`]
    pub segs: [u16; 6],
    pub cr0: CR0Flags,
    pub cr2: u32,
    pub cr3: u32,
    pub cr4: u32,
    /// Default operand size of the code segment
    pub code_size: Bytes,
}

impl Default for GuestState {
    fn default() -> Self {
        Self {
            regs: GuestRegs::default(),
            segs: [0; 6],
            cr0: CR0Flags::empty(),
            cr2: 0,
            cr3: 0,
            cr4: 0,
            code_size: Bytes::Two,
        }
    }
}

impl GuestState {
    fn load_cr0(&mut self, val: u32) {
        let new = CR0Flags::from_bits_retain(val);
        let changed = self.cr0 ^ new;
        if changed.contains(CR0Flags::PE) {
            log::debug!(
                "Guest {} protected mode",
                if new.contains(CR0Flags::PE) {
                    "entering"
                } else {
                    "leaving"
                }
            );
        }
        if changed.contains(CR0Flags::PG) {
            log::debug!(
                "Guest paging {}",
                if new.contains(CR0Flags::PG) {
                    "enabled"
                } else {
                    "disabled"
                }
            );
        }
        self.cr0 = new;
    }
}

impl EmulCtx for GuestState {
    fn code_size(&self) -> Bytes {
        self.code_size
    }

    fn read_reg(&self, reg: Register) -> u32 {
        self.regs.get(reg)
    }

    fn write_reg(&mut self, reg: Register, val: u32) {
        self.regs.set(reg, val);
    }

    fn read_seg(&self, seg: SegRegister) -> Result<u16, EmulError> {
        Ok(self.segs[seg as usize])
    }

    fn write_seg(&mut self, seg: SegRegister, sel: u16) -> Result<(), EmulError> {
        self.segs[seg as usize] = sel;
        Ok(())
    }

    fn read_cr(&self, cr: ControlReg) -> Result<u32, EmulError> {
        Ok(match cr {
            ControlReg::Cr0 => self.cr0.bits(),
            ControlReg::Cr2 => self.cr2,
            ControlReg::Cr3 => self.cr3,
            ControlReg::Cr4 => self.cr4,
        })
    }

    fn write_cr(&mut self, cr: ControlReg, val: u32) -> Result<(), EmulError> {
        match cr {
            ControlReg::Cr0 => self.load_cr0(val),
            ControlReg::Cr2 => self.cr2 = val,
            ControlReg::Cr3 => self.cr3 = val,
            ControlReg::Cr4 => self.cr4 = val,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_area_layout() {
        let mut regs = GuestRegs::default();
        regs.set(Register::Ecx, 0x1122_3344);
        regs.set(Register::Edi, 0xaabb_ccdd);
        let saved = regs.as_saved();
        assert_eq!(saved.len(), 32);
        assert_eq!(&saved[4..8], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&saved[28..32], &[0xdd, 0xcc, 0xbb, 0xaa]);
        assert_eq!(GuestRegs::from_saved(saved), Some(regs));
        assert_eq!(GuestRegs::from_saved(&saved[..31]), None);
    }

    #[test]
    fn test_default_state() {
        let state = GuestState::default();
        assert_eq!(state.code_size(), Bytes::Two);
        assert_eq!(state.read_cr(ControlReg::Cr0), Ok(0));
        for reg in Register::ALL {
            assert_eq!(state.read_reg(reg), 0);
        }
    }

    #[test]
    fn test_cr0_keeps_unknown_bits() {
        let mut state = GuestState::default();
        state.write_cr(ControlReg::Cr0, 0x6000_0011).unwrap();
        assert!(state.cr0.contains(CR0Flags::PE | CR0Flags::ET));
        assert_eq!(state.read_cr(ControlReg::Cr0), Ok(0x6000_0011));
        state.write_cr(ControlReg::Cr0, 0x8000_0101).unwrap();
        assert_eq!(state.read_cr(ControlReg::Cr0), Ok(0x8000_0101));
        assert!(state.cr0.contains(CR0Flags::PG));
    }

    #[test]
    fn test_segment_selectors() {
        let mut state = GuestState::default();
        state.write_seg(SegRegister::SS, 0x0700).unwrap();
        assert_eq!(state.read_seg(SegRegister::SS), Ok(0x0700));
        assert_eq!(state.segs[SegRegister::SS as usize], 0x0700);
        assert_eq!(state.read_seg(SegRegister::GS), Ok(0));
    }
}
