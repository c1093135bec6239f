// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::{fuzz_target, Corpus};
use realmode::insn_decode::MAX_INSN_SIZE;
use realmode::regs::{CR0Flags, GuestRegs, GuestState};
use realmode::{exec_instruction, Bytes};

#[derive(Arbitrary, Debug)]
struct FuzzInput<'a> {
    regs: GuestRegs,
    segs: [u16; 6],
    cr0: u32,
    code32: bool,
    ip: u8,
    code: &'a [u8],
}

fuzz_target!(|input: FuzzInput<'_>| -> Corpus {
    if input.code.len() > 4 * MAX_INSN_SIZE {
        return Corpus::Reject;
    }

    let mut state = GuestState {
        regs: input.regs,
        segs: input.segs,
        cr0: CR0Flags::from_bits_retain(input.cr0),
        code_size: if input.code32 { Bytes::Four } else { Bytes::Two },
        ..Default::default()
    };
    let before = state;
    let start = usize::from(input.ip);
    let mut ip = start;

    match exec_instruction(&mut state, input.code, &mut ip) {
        Ok(_) => {
            assert!(ip > start);
            assert!(ip - start <= MAX_INSN_SIZE);
            assert!(ip <= input.code.len());
        }
        Err(_) => {
            assert_eq!(ip, start);
            assert_eq!(state, before);
        }
    }

    Corpus::Keep
});
