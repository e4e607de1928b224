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

// FIXME: We should use kconfig to generate this file.
use crate::types::Prio;

pub const MAX_CORES: usize = 8;
pub const MAX_TASKS: usize = 64;
pub const MAX_PRIO: usize = 32;

pub const IDLE_PRIO: Prio = 0;
pub const NORMAL_PRIO: Prio = 8;
pub const HIGH_PRIO: Prio = (MAX_PRIO - 1) as Prio;

/// Scheduler tick rate in Hz.
pub const TIMER_FREQ: u64 = 100;

cfg_if::cfg_if! {
    if #[cfg(debug_assertions)] {
        pub const KERNEL_STACK_SIZE: usize = 16 << 10;
    } else {
        pub const KERNEL_STACK_SIZE: usize = 8 << 10;
    }
}

/// Interrupt stack, always small; traps only push one frame.
pub const IST_STACK_SIZE: usize = 4 << 10;

pub const MAILBOX_SIZE: usize = 32;
pub const SIGNAL_QUEUE_SIZE: usize = 32;

pub const CACHE_LINE: usize = 64;
