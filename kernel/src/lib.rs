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

//! Per-core scheduling and synchronization core of the isle kernel.
//!
//! Each core runs its own run queue, timer wheel and idle task; tasks
//! migrate only at spawn time. The crate builds freestanding for the
//! target and hosted for the test suite, where `isle_arch` swaps its
//! x86_64 backend for a recording simulator.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub use isle_arch as arch;
pub use libc;

pub mod config;
pub mod console;
pub mod error;
pub mod irq;
pub mod logger;
pub mod percore;
pub mod scheduler;
pub mod signal;
pub mod sync;
pub mod task;
pub mod timer;
pub mod types;
pub mod ucontext;

use log::info;

/// Boot-time knobs handed over by the loader.
#[derive(Debug, Clone, Copy)]
pub struct BootParams {
    /// Derive ticks from the cycle counter instead of a periodic
    /// interrupt, letting idle cores sleep untimed.
    pub dynamic_ticks: bool,
    /// Cores the loader started. Core 0 calls [`kernel_init`], the
    /// rest call [`core_init`].
    pub cores: u32,
}

impl Default for BootParams {
    fn default() -> Self {
        Self {
            dynamic_ticks: false,
            cores: 1,
        }
    }
}

/// Bring up the kernel on the boot core.
pub fn kernel_init(params: &BootParams) {
    logger::logger_init();
    irq::init();
    timer::init(params.dynamic_ticks);
    scheduler::init_core().expect("boot core idle task");
    info!(
        "isle kernel up, {} core(s), {} ticks",
        params.cores,
        if params.dynamic_ticks { "dynamic" } else { "fixed" }
    );
}

/// Bring up a secondary core. The boot core must have finished
/// [`kernel_init`] first.
pub fn core_init(params: &BootParams) {
    irq::init();
    timer::init(params.dynamic_ticks);
    scheduler::init_core().expect("secondary core idle task");
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    arch::disable_local_irq();
    kprintln!("{}", info);
    loop {
        arch::halt();
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::sync::{Mutex, MutexGuard, Once};

    static SERIAL: Mutex<()> = Mutex::new(());
    static INIT: Once = Once::new();

    /// The kernel's state is process-global, so tests touching it
    /// take this lock to keep the harness from interleaving them.
    pub fn serialize() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One-time bring-up shared by every test: trap table installed,
    /// fixed ticks. Tests flip to dynamic ticks themselves if needed.
    pub fn init_kernel() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
            crate::irq::init();
            crate::timer::init(false);
        });
    }
}
