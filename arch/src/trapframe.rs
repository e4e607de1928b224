// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) vivo

/// Register state pushed on trap entry.
///
/// Layout matches the common interrupt stub: segment bases and general
/// purpose registers pushed by software, then the vector number and error
/// code, then the frame the processor pushes itself.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub gs: u64,
    pub fs: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    /// Vector number pushed by the stub.
    pub int_no: u64,
    /// Error code, zero for vectors without one.
    pub error: u64,
    // Pushed by the processor.
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub userrsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Frame with only the vector number set, for software-raised traps.
    pub fn synthetic(vector: u8) -> Self {
        Self {
            int_no: vector as u64,
            ..Self::default()
        }
    }

    #[inline]
    pub fn vector(&self) -> u8 {
        self.int_no as u8
    }
}
