// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) vivo

//! Interrupt descriptor table and the trap stubs feeding the kernel
//! dispatch entry.

use crate::{TrapDispatch, TrapFrame};
use core::arch::{asm, global_asm};
use core::sync::atomic::{AtomicUsize, Ordering};

const KERNEL_CODE_SELECTOR: u16 = 0x08;
const IDT_ENTRIES: usize = 256;

// One stub per vector. Vectors without a processor error code push a zero
// so every frame has the same shape, then all funnel into trap_common.
global_asm!(
    r#"
    .altmacro
    .macro trap_stub n
    .global trap_stub_\n
trap_stub_\n:
    .if (\n == 8) || ((\n >= 10) && (\n <= 14)) || (\n == 17) || (\n == 21) || (\n == 29) || (\n == 30)
    .else
    push 0
    .endif
    push \n
    jmp trap_common
    .endm

    .set i, 0
    .rept 256
    trap_stub %i
    .set i, i + 1
    .endr

trap_common:
    push rax
    push rcx
    push rdx
    push rbx
    push rsp
    push rbp
    push rsi
    push rdi
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15
    push fs
    push gs
    mov rdi, rsp
    cld
    call trap_entry
    pop gs
    pop fs
    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rdi
    pop rsi
    pop rbp
    add rsp, 8
    pop rbx
    pop rdx
    pop rcx
    pop rax
    add rsp, 16
    iretq

    .macro stub_addr n
    .quad trap_stub_\n
    .endm

    .global trap_stub_table
    .section .rodata
trap_stub_table:
    .set i, 0
    .rept 256
    stub_addr %i
    .set i, i + 1
    .endr
    .text
"#
);

extern "C" {
    static trap_stub_table: [usize; IDT_ENTRIES];
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    flags: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            ist: 0,
            flags: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    fn interrupt_gate(handler: usize) -> Self {
        Self {
            offset_low: handler as u16,
            selector: KERNEL_CODE_SELECTOR,
            ist: 0,
            flags: 0x8E,
            offset_mid: (handler >> 16) as u16,
            offset_high: (handler >> 32) as u32,
            reserved: 0,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry::missing(); IDT_ENTRIES];
static DISPATCH: AtomicUsize = AtomicUsize::new(0);

#[no_mangle]
extern "C" fn trap_entry(frame: &mut TrapFrame) {
    let raw = DISPATCH.load(Ordering::Acquire);
    if raw == 0 {
        return;
    }
    let dispatch: TrapDispatch = unsafe { core::mem::transmute(raw) };
    dispatch(frame);
}

/// Point every IDT vector at its stub and load the table on this core.
pub fn install_trap_table(dispatch: TrapDispatch) {
    DISPATCH.store(dispatch as usize, Ordering::Release);
    unsafe {
        let idt = &mut *core::ptr::addr_of_mut!(IDT);
        for (i, entry) in idt.iter_mut().enumerate() {
            *entry = IdtEntry::interrupt_gate(trap_stub_table[i]);
        }
        let pointer = IdtPointer {
            limit: (core::mem::size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
            base: idt.as_ptr() as u64,
        };
        asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}
