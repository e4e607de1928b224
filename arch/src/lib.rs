// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) vivo

#![cfg_attr(target_os = "none", no_std)]
#![allow(unused)]

mod trapframe;
pub use trapframe::TrapFrame;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_os = "none"))] {
        pub mod x86_64;
        pub use crate::x86_64 as imp;
    } else {
        // Hosted fallback so the kernel crate and its unit tests build
        // on a development machine.
        pub mod sim;
        pub use crate::sim as imp;
    }
}

pub use imp::{
    console_write, cpu_freq_mhz, current_core_id, cycles, disable_local_irq,
    disable_local_irq_save, enable_local_irq, enable_local_irq_restore, eoi, fpu_init,
    fpu_restore, fpu_save, fpu_trap_clear, halt, init_task_stack, install_trap_table,
    local_irq_enabled, pause, send_ipi, switch_context, timer_disable, timer_init,
    timer_set_oneshot,
};

/// Signature of the kernel entry invoked for every trap and interrupt.
pub type TrapDispatch = fn(&mut TrapFrame);

/// First function executed on a freshly created task stack.
pub type TaskTrampoline = extern "C" fn(usize) -> !;
