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

use crate::{
    config::MAX_CORES,
    types::{CacheAligned, Tid, NO_TASK},
};
use core::sync::atomic::{AtomicU32, Ordering};
use isle_arch as arch;

/// Fixed array of per-core slots, one cache line each.
///
/// A slot is written only by its owning core; reads from other cores are
/// diagnostic. Interior mutability comes from `T` (atomics in practice).
pub struct PerCore<T> {
    slots: [CacheAligned<T>; MAX_CORES],
}

impl<T> PerCore<T> {
    pub const fn new(slots: [CacheAligned<T>; MAX_CORES]) -> Self {
        Self { slots }
    }

    /// Slot of the calling core.
    #[inline]
    pub fn current(&self) -> &T {
        &self.slots[arch::current_core_id() % MAX_CORES]
    }

    #[inline]
    pub fn of(&self, core: usize) -> &T {
        &self.slots[core]
    }
}

static CURRENT_TASK: PerCore<AtomicU32> =
    PerCore::new([const { CacheAligned::new(AtomicU32::new(NO_TASK)) }; MAX_CORES]);

/// Task currently running on the calling core, NO_TASK before the
/// scheduler is up.
#[inline]
pub fn current_task_id() -> Tid {
    CURRENT_TASK.current().load(Ordering::Relaxed)
}

#[inline]
pub fn task_id_on(core: usize) -> Tid {
    CURRENT_TASK.of(core).load(Ordering::Relaxed)
}

#[inline]
pub(crate) fn set_current_task_id(tid: Tid) {
    CURRENT_TASK.current().store(tid, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_cache_line_sized() {
        assert_eq!(core::mem::size_of::<CacheAligned<AtomicU32>>(), 64);
    }

    #[test]
    fn slots_are_core_local() {
        let _serial = crate::tests_support::serialize();
        isle_arch::sim::set_core_id(5);
        set_current_task_id(17);
        assert_eq!(current_task_id(), 17);
        assert_eq!(task_id_on(5), 17);
        isle_arch::sim::set_core_id(6);
        set_current_task_id(23);
        assert_eq!(current_task_id(), 23);
        assert_eq!(task_id_on(5), 17, "writing core 6 leaves core 5 alone");
        isle_arch::sim::set_core_id(5);
        set_current_task_id(NO_TASK);
        isle_arch::sim::set_core_id(6);
        set_current_task_id(NO_TASK);
    }
}
