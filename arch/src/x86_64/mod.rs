// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) vivo

//! Bare-metal x86_64 implementation of the architecture surface.

mod idt;
mod switch;

use crate::{TaskTrampoline, TrapDispatch};
use core::arch::asm;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub use idt::install_trap_table;
pub use switch::switch_context;

const APIC_BASE: usize = 0xFEE0_0000;
const APIC_EOI: usize = 0xB0;
const APIC_SVR: usize = 0xF0;
const APIC_ICR1: usize = 0x300;
const APIC_LVT_T: usize = 0x320;
const APIC_DCR: usize = 0x3E0;
const APIC_CCR: usize = 0x390;
const APIC_ICR: usize = 0x380;

const PIT_CH0: u16 = 0x40;
const PIT_CMD: u16 = 0x43;
const PIT_BASE_HZ: u64 = 1_193_182;

const COM1: u16 = 0x3F8;

const EFLAGS_IF: u64 = 1 << 9;

#[inline]
unsafe fn outb(port: u16, value: u8) {
    asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
}

#[inline]
unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    asm!("in al, dx", in("dx") port, out("al") value, options(nomem, nostack, preserves_flags));
    value
}

#[inline]
unsafe fn apic_read(off: usize) -> u32 {
    core::ptr::read_volatile((APIC_BASE + off) as *const u32)
}

#[inline]
unsafe fn apic_write(off: usize, value: u32) {
    core::ptr::write_volatile((APIC_BASE + off) as *mut u32, value);
}

#[inline]
pub fn current_core_id() -> usize {
    // Initial APIC id from CPUID leaf 1.
    let ebx: u32;
    unsafe {
        asm!(
            "mov {tmp:e}, ebx",
            "mov eax, 1",
            "cpuid",
            "xchg {tmp:e}, ebx",
            tmp = out(reg) ebx,
            out("eax") _, out("ecx") _, out("edx") _,
            options(nomem, nostack)
        );
    }
    (ebx >> 24) as usize
}

#[inline]
fn read_rflags() -> u64 {
    let flags: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags
}

pub fn disable_local_irq_save() -> usize {
    let flags = read_rflags();
    unsafe { asm!("cli", options(nomem, nostack)) };
    ((flags & EFLAGS_IF) != 0) as usize
}

pub fn enable_local_irq_restore(old: usize) {
    if old != 0 {
        unsafe { asm!("sti", options(nomem, nostack)) };
    }
}

pub fn disable_local_irq() {
    unsafe { asm!("cli", options(nomem, nostack)) };
}

pub fn enable_local_irq() {
    unsafe { asm!("sti", options(nomem, nostack)) };
}

pub fn local_irq_enabled() -> bool {
    (read_rflags() & EFLAGS_IF) != 0
}

#[inline]
pub fn pause() {
    unsafe { asm!("pause", options(nomem, nostack, preserves_flags)) };
}

#[inline]
pub fn halt() {
    unsafe { asm!("sti; hlt", options(nomem, nostack)) };
}

#[inline]
pub fn cycles() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        asm!("rdtsc", out("eax") lo, out("edx") hi, options(nomem, nostack, preserves_flags));
    }
    ((hi as u64) << 32) | lo as u64
}

static APIC_ENABLED: AtomicBool = AtomicBool::new(false);

fn apic_is_enabled() -> bool {
    APIC_ENABLED.load(Ordering::Relaxed)
}

/// Software-enable the local APIC via the spurious-interrupt vector.
fn apic_enable() {
    unsafe { apic_write(APIC_SVR, 0x100 | 0xFF) };
    APIC_ENABLED.store(true, Ordering::Relaxed);
}

static CPU_FREQ_MHZ: AtomicU64 = AtomicU64::new(0);

/// TSC frequency, calibrated once against the PIT.
pub fn cpu_freq_mhz() -> u64 {
    let cached = CPU_FREQ_MHZ.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let mhz = calibrate_tsc();
    CPU_FREQ_MHZ.store(mhz, Ordering::Relaxed);
    mhz
}

fn calibrate_tsc() -> u64 {
    // Program PIT channel 2 style countdown on channel 0 and measure the
    // TSC delta over ~50ms.
    let ticks = (PIT_BASE_HZ / 20) as u16;
    unsafe {
        outb(PIT_CMD, 0x30);
        outb(PIT_CH0, (ticks & 0xff) as u8);
        outb(PIT_CH0, (ticks >> 8) as u8);
    }
    let start = cycles();
    loop {
        unsafe { outb(PIT_CMD, 0x00) };
        let lo = unsafe { inb(PIT_CH0) } as u16;
        let hi = unsafe { inb(PIT_CH0) } as u16;
        if (hi << 8) | lo == 0 {
            break;
        }
        pause();
    }
    let diff = cycles() - start;
    (diff * 20) / 1_000_000
}

pub fn timer_init(freq_hz: u64, oneshot: bool) {
    apic_enable();
    unsafe {
        if oneshot {
            // APIC timer in one-shot mode, armed on demand.
            apic_write(APIC_DCR, 0xB); // divide by 1
            apic_write(APIC_LVT_T, 123);
            apic_write(APIC_ICR, 0);
        } else {
            // PIT rate generator driving vector 32.
            let divisor = (PIT_BASE_HZ / freq_hz) as u16;
            outb(PIT_CMD, 0x34);
            outb(PIT_CH0, (divisor & 0xff) as u8);
            outb(PIT_CH0, (divisor >> 8) as u8);
        }
    }
}

pub fn timer_set_oneshot(delta_cycles: u64) {
    let ticks = delta_cycles.min(u32::MAX as u64) as u32;
    unsafe {
        apic_write(APIC_LVT_T, 123);
        apic_write(APIC_ICR, ticks.max(1));
    }
}

pub fn timer_disable() {
    unsafe {
        // Mask the LVT entry.
        apic_write(APIC_LVT_T, 1 << 16);
        apic_write(APIC_ICR, 0);
    }
}

pub fn eoi(vector: u8) {
    unsafe {
        // IPIs and the one-shot timer arrive through the local APIC even
        // when the tick itself still comes from the PIT.
        if apic_is_enabled() || vector >= 123 {
            apic_write(APIC_EOI, 0);
        } else {
            // PIC cascade.
            if vector >= 40 {
                outb(0xA0, 0x20);
            }
            outb(0x20, 0x20);
        }
    }
}

pub fn send_ipi(core: usize, vector: u8) {
    unsafe {
        while apic_read(APIC_ICR1) & (1 << 12) != 0 {
            pause();
        }
        apic_write(APIC_ICR1 + 0x10, (core as u32) << 24);
        apic_write(APIC_ICR1, vector as u32);
    }
}

/// Lay out the initial switch frame so the first `switch_context` into the
/// task pops zeroed registers and returns into the trampoline with the
/// argument in `rdi`.
pub fn init_task_stack(stack_top: usize, trampoline: TaskTrampoline, arg: usize) -> usize {
    let mut sp = (stack_top & !0xf) as *mut u64;
    unsafe {
        sp = sp.sub(1);
        sp.write(trampoline as usize as u64); // return address
        // rflags with IF clear: the trampoline re-enables interrupts only
        // after the switch bookkeeping has run.
        sp = sp.sub(1);
        sp.write(0x2);
        // rax, rcx, rdx, rbx, rbp, rsi
        for _ in 0..6 {
            sp = sp.sub(1);
            sp.write(0);
        }
        sp = sp.sub(1);
        sp.write(arg as u64); // rdi
        // r8..r15, fsbase
        for _ in 0..9 {
            sp = sp.sub(1);
            sp.write(0);
        }
    }
    sp as usize
}

pub fn fpu_save(area: *mut u8) {
    unsafe { asm!("fxsave64 [{}]", in(reg) area, options(nostack)) };
}

pub fn fpu_restore(area: *const u8) {
    unsafe { asm!("fxrstor64 [{}]", in(reg) area, options(nostack)) };
}

/// Bring the FPU into a defined state for a task that never used it.
pub fn fpu_init() {
    unsafe { asm!("fninit", options(nomem, nostack)) };
}

/// Clear CR0.TS after a device-not-available fault.
pub fn fpu_trap_clear() {
    unsafe { asm!("clts", options(nomem, nostack)) };
}

pub fn console_write(s: &str) {
    for byte in s.bytes() {
        unsafe {
            while inb(COM1 + 5) & 0x20 == 0 {
                pause();
            }
            outb(COM1, byte);
        }
    }
}
