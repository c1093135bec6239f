// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The realmode authors

/// Width of an operand in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Bytes {
    #[default]
    Zero,
    One,
    Two,
    Four = 4,
}

impl Bytes {
    pub fn mask(&self) -> u32 {
        match self {
            Bytes::Zero => 0,
            Bytes::One => (1 << 8) - 1,
            Bytes::Two => (1 << 16) - 1,
            Bytes::Four => u32::MAX,
        }
    }

    /// Operand width in bits.
    pub fn bits(&self) -> u32 {
        *self as u32 * 8
    }

    /// The operand size selected when the operand-size override prefix
    /// flips the default size of the code segment.
    pub fn toggled(&self) -> Bytes {
        match self {
            Bytes::Two => Bytes::Four,
            Bytes::Four => Bytes::Two,
            other => *other,
        }
    }
}
