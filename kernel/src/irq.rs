// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Trap and interrupt dispatch.
//!
//! A single 256-entry table maps vectors to handler capabilities. Vectors
//! 0-31 are processor exceptions; everything above is devices and IPIs.
//! Slot mutation is compare-and-swap guarded, so install works from any
//! context without a lock.

use crate::{
    config::MAX_CORES,
    error::{code, Error},
    percore::PerCore,
    scheduler,
    types::CacheAligned,
};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use isle_arch as arch;
pub use isle_arch::TrapFrame;
use log::error;

pub const MAX_VECTORS: usize = 256;

/// PIT tick, IRQ 0 after remap.
pub const TIMER_VECTOR: u8 = 32;
/// Local APIC timer in one-shot mode.
pub const APIC_TIMER_VECTOR: u8 = 123;
/// Cross-core nudge to re-run the scheduler.
pub const WAKEUP_VECTOR: u8 = 121;
/// Cross-core signal delivery.
pub const SIGNAL_VECTOR: u8 = 114;
/// Device-not-available, drives lazy FPU migration.
pub const FPU_VECTOR: u8 = 7;

pub type Handler = fn(&mut TrapFrame);

static HANDLERS: [AtomicUsize; MAX_VECTORS] = [const { AtomicUsize::new(0) }; MAX_VECTORS];

static COUNTERS: PerCore<[AtomicU64; MAX_VECTORS]> =
    PerCore::new([const { CacheAligned::new([const { AtomicU64::new(0) }; MAX_VECTORS]) };
        MAX_CORES]);

static EXCEPTION_NAMES: [&str; 32] = [
    "Division By Zero",
    "Debug",
    "Non Maskable Interrupt",
    "Breakpoint",
    "Into Detected Overflow",
    "Out of Bounds",
    "Invalid Opcode",
    "No Coprocessor",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Bad TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection Fault",
    "Page Fault",
    "Unknown Interrupt",
    "Coprocessor Fault",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point",
    "Virtualization",
    "Control Protection",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Hypervisor Injection",
    "VMM Communication",
    "Security",
    "Reserved",
];

/// Put a handler into a free slot. `EINVAL` for vectors beyond the table,
/// `EBUSY` when the slot is occupied.
pub fn install_handler(vector: u32, handler: Handler) -> Result<(), Error> {
    let slot = HANDLERS.get(vector as usize).ok_or(code::EINVAL)?;
    slot.compare_exchange(0, handler as usize, Ordering::SeqCst, Ordering::SeqCst)
        .map(|_| ())
        .map_err(|_| code::EBUSY)
}

/// Clear a slot. `ENOENT` when nothing was installed.
pub fn uninstall_handler(vector: u32) -> Result<(), Error> {
    let slot = HANDLERS.get(vector as usize).ok_or(code::EINVAL)?;
    if slot.swap(0, Ordering::SeqCst) == 0 {
        return Err(code::ENOENT);
    }
    Ok(())
}

/// Kernel entry for every trap. Counts the vector, runs the installed
/// handler, acknowledges the controller, and preempts when the timer fired
/// or a higher-priority task became ready.
pub fn dispatch(frame: &mut TrapFrame) {
    let vector = frame.vector();
    COUNTERS.current()[vector as usize].fetch_add(1, Ordering::Relaxed);

    let raw = HANDLERS[vector as usize].load(Ordering::SeqCst);
    if raw != 0 {
        let handler: Handler = unsafe { core::mem::transmute(raw) };
        handler(frame);
    } else if (vector as usize) < EXCEPTION_NAMES.len() {
        // An exception with an empty slot means the table was never set
        // up; there is nothing to return to.
        fault_handler(frame);
    } else {
        error!(
            "unhandled interrupt {vector} on core {}",
            arch::current_core_id()
        );
    }

    arch::eoi(vector);

    if vector == TIMER_VECTOR || vector == APIC_TIMER_VECTOR || scheduler::preemption_pending() {
        scheduler::reschedule();
    }
}

/// Default exception handler: dump the frame and stop the core.
fn fault_handler(frame: &mut TrapFrame) -> ! {
    let vector = frame.vector() as usize;
    let name = EXCEPTION_NAMES.get(vector).copied().unwrap_or("Unknown");
    error!(
        "{name} exception ({vector}) on core {}, task {}",
        arch::current_core_id(),
        scheduler::current_task_id()
    );
    error!(
        "rip {:#018x} cs {:#06x} rflags {:#010x} error {:#x}",
        frame.rip, frame.cs, frame.rflags, frame.error
    );
    error!(
        "rax {:#018x} rbx {:#018x} rcx {:#018x} rdx {:#018x}",
        frame.rax, frame.rbx, frame.rcx, frame.rdx
    );
    error!(
        "rsi {:#018x} rdi {:#018x} rbp {:#018x} rsp {:#018x}",
        frame.rsi, frame.rdi, frame.rbp, frame.rsp
    );
    panic!("unrecoverable fault: {name}");
}

fn fpu_fault_handler(_frame: &mut TrapFrame) {
    arch::fpu_trap_clear();
    scheduler::handle_fpu_fault();
}

fn wakeup_handler(_frame: &mut TrapFrame) {
    // The work happens in the dispatch epilogue: the queues were already
    // filled by the sending core.
}

static TRAP_TABLE_INIT: spin::Once<()> = spin::Once::new();

/// Install the fault, FPU, wakeup and signal handlers and hand the
/// dispatch entry to the hardware table. Second and later calls are
/// no-ops.
pub fn init() {
    TRAP_TABLE_INIT.call_once(|| {
        for vector in 0..32u32 {
            if vector == FPU_VECTOR as u32 {
                install_handler(vector, fpu_fault_handler).expect("fresh table");
            } else {
                install_handler(vector, exception_entry).expect("fresh table");
            }
        }
        install_handler(WAKEUP_VECTOR as u32, wakeup_handler).expect("fresh table");
        install_handler(SIGNAL_VECTOR as u32, crate::signal::signal_irq_handler)
            .expect("fresh table");
        arch::install_trap_table(dispatch);
    });
}

fn exception_entry(frame: &mut TrapFrame) {
    fault_handler(frame);
}

/// Per-core hit count of one vector.
pub fn get_irq_counter(core: usize, vector: u32) -> u64 {
    if core >= MAX_CORES || vector as usize >= MAX_VECTORS {
        return 0;
    }
    COUNTERS.of(core)[vector as usize].load(Ordering::Relaxed)
}

/// Zero the calling core's counters.
pub fn reset_irq_counters() {
    for counter in COUNTERS.current().iter() {
        counter.store(0, Ordering::Relaxed);
    }
}

/// Log every vector that fired at least once, per core.
pub fn print_irq_stats() {
    for core in 0..MAX_CORES {
        for vector in 0..MAX_VECTORS {
            let hits = COUNTERS.of(core)[vector].load(Ordering::Relaxed);
            if hits > 0 {
                log::info!("core {core} vector {vector}: {hits}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;
    use isle_arch::sim;

    static PROBE_HITS: AtomicU32 = AtomicU32::new(0);

    fn probe_handler(_frame: &mut TrapFrame) {
        PROBE_HITS.fetch_add(1, Ordering::SeqCst);
    }

    fn other_handler(_frame: &mut TrapFrame) {}

    #[test]
    fn install_is_cas_guarded() {
        assert_eq!(install_handler(200, probe_handler), Ok(()));
        assert_eq!(install_handler(200, other_handler), Err(code::EBUSY));
        assert_eq!(uninstall_handler(200), Ok(()));
        assert_eq!(uninstall_handler(200), Err(code::ENOENT));
        // The slot is free again after uninstall.
        assert_eq!(install_handler(200, other_handler), Ok(()));
        assert_eq!(uninstall_handler(200), Ok(()));
    }

    #[test]
    fn vector_range_is_checked() {
        assert_eq!(install_handler(256, probe_handler), Err(code::EINVAL));
        assert_eq!(uninstall_handler(1000), Err(code::EINVAL));
    }

    #[test]
    fn dispatch_counts_and_runs_the_handler() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        install_handler(201, probe_handler).unwrap();
        let before_hits = PROBE_HITS.load(Ordering::SeqCst);
        let before_count = get_irq_counter(0, 201);
        sim::raise(201);
        sim::raise(201);
        assert_eq!(PROBE_HITS.load(Ordering::SeqCst), before_hits + 2);
        assert_eq!(get_irq_counter(0, 201), before_count + 2);
        uninstall_handler(201).unwrap();
    }

    #[test]
    fn unhandled_device_vector_is_logged_not_fatal() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        let before = get_irq_counter(0, 202);
        let mut frame = TrapFrame::synthetic(202);
        dispatch(&mut frame);
        assert_eq!(get_irq_counter(0, 202), before + 1);
    }
}
