// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

//! Decoder and emulator for the handful of instructions a guest executes
//! in real mode while switching into protected mode, for use on the
//! VM-exit path of a hypervisor.

#![no_std]

#[cfg(feature = "arbitrary")]
extern crate std;

pub mod error;
pub mod insn_decode;
pub mod regs;
pub mod types;

pub use error::EmulError;
pub use insn_decode::{exec_instruction, EmulCtx};
pub use types::Bytes;
