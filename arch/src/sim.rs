// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) vivo

//! Hosted implementation of the architecture surface.
//!
//! Runs on the build machine: interrupt flags and the core id are
//! thread-local, the cycle counter is a shared monotonic counter, and
//! hardware side effects (one-shot arming, IPIs, context switches) are
//! recorded instead of performed. One OS thread models one core.

use crate::{TaskTrampoline, TrapDispatch, TrapFrame};
use std::{
    cell::Cell,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    sync::Mutex,
};

thread_local! {
    static CORE_ID: Cell<usize> = const { Cell::new(0) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

static CYCLES: AtomicU64 = AtomicU64::new(0);
static CYCLES_PER_READ: AtomicU64 = AtomicU64::new(1_000);
static ONESHOT_ARMS: Mutex<Vec<u64>> = Mutex::new(Vec::new());
static ONESHOT_DISARMS: AtomicU64 = AtomicU64::new(0);
static IPIS: Mutex<Vec<(usize, u8)>> = Mutex::new(Vec::new());
static SWITCHES: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
static DISPATCH: AtomicUsize = AtomicUsize::new(0);

/// Bind the calling thread to a core id. Defaults to core 0.
pub fn set_core_id(id: usize) {
    CORE_ID.with(|c| c.set(id));
}

#[inline]
pub fn current_core_id() -> usize {
    CORE_ID.with(|c| c.get())
}

pub fn disable_local_irq_save() -> usize {
    let old = IRQ_ENABLED.with(|f| f.replace(false));
    old as usize
}

pub fn enable_local_irq_restore(old: usize) {
    IRQ_ENABLED.with(|f| f.set(old != 0));
}

pub fn disable_local_irq() {
    IRQ_ENABLED.with(|f| f.set(false));
}

pub fn enable_local_irq() {
    IRQ_ENABLED.with(|f| f.set(true));
}

pub fn local_irq_enabled() -> bool {
    IRQ_ENABLED.with(|f| f.get())
}

#[inline]
pub fn pause() {
    core::hint::spin_loop();
}

pub fn halt() {
    std::thread::yield_now();
}

/// Monotonic cycle source; every read advances time.
pub fn cycles() -> u64 {
    CYCLES.fetch_add(CYCLES_PER_READ.load(Ordering::Relaxed), Ordering::Relaxed)
}

/// How far a single `cycles` read advances the counter. Large values let
/// a test cross a timer deadline from inside a blocking call.
pub fn set_cycles_per_read(n: u64) {
    CYCLES_PER_READ.store(n, Ordering::Relaxed);
}

/// Advance the cycle counter, as if the core had been busy.
pub fn advance_cycles(n: u64) {
    CYCLES.fetch_add(n, Ordering::Relaxed);
}

pub fn cpu_freq_mhz() -> u64 {
    1_000
}

pub fn timer_init(_freq_hz: u64, _oneshot: bool) {}

pub fn timer_set_oneshot(delta_cycles: u64) {
    ONESHOT_ARMS.lock().unwrap().push(delta_cycles);
}

pub fn timer_disable() {
    ONESHOT_DISARMS.fetch_add(1, Ordering::Relaxed);
}

/// Deadlines armed since the last call.
pub fn take_oneshot_arms() -> Vec<u64> {
    std::mem::take(&mut *ONESHOT_ARMS.lock().unwrap())
}

pub fn oneshot_disarms() -> u64 {
    ONESHOT_DISARMS.load(Ordering::Relaxed)
}

pub fn eoi(_vector: u8) {}

pub fn send_ipi(core: usize, vector: u8) {
    IPIS.lock().unwrap().push((core, vector));
}

/// IPIs sent since the last call.
pub fn take_ipis() -> Vec<(usize, u8)> {
    std::mem::take(&mut *IPIS.lock().unwrap())
}

pub fn install_trap_table(dispatch: TrapDispatch) {
    DISPATCH.store(dispatch as usize, Ordering::SeqCst);
}

/// Deliver a synthetic trap to the installed dispatch entry.
pub fn raise(vector: u8) {
    let raw = DISPATCH.load(Ordering::SeqCst);
    assert!(raw != 0, "trap table not installed");
    let dispatch: TrapDispatch = unsafe { core::mem::transmute(raw) };
    let mut frame = TrapFrame::synthetic(vector);
    dispatch(&mut frame);
}

/// Recorded only; a hosted thread cannot move to another stack.
pub unsafe fn switch_context(old_sp: *mut usize, new_sp: usize) {
    unsafe { old_sp.write(new_sp) };
    SWITCHES.lock().unwrap().push((old_sp as usize, new_sp));
}

pub fn switch_count() -> usize {
    SWITCHES.lock().unwrap().len()
}

pub fn init_task_stack(stack_top: usize, _trampoline: TaskTrampoline, _arg: usize) -> usize {
    stack_top & !0xf
}

pub fn fpu_save(_area: *mut u8) {}

pub fn fpu_restore(_area: *const u8) {}

pub fn fpu_init() {}

pub fn fpu_trap_clear() {}

pub fn console_write(s: &str) {
    eprint!("{s}");
}
