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
    percore,
    sync::atomic::AtomicCounter32,
    types::{CoreId, Tid, NO_CORE, NO_TASK},
};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};
use isle_arch as arch;

/// Recursive ticket spinlock owned by a task.
///
/// Tickets are granted in draw order, so waiters are served FIFO. The
/// owning task may re-enter; the lock is released when every acquisition
/// has been matched by a drop.
pub struct Spinlock<T: ?Sized> {
    queue: AtomicCounter32,
    dequeue: AtomicCounter32,
    owner: AtomicU32,
    depth: AtomicU32,
    data: UnsafeCell<T>,
}

pub struct SpinlockGuard<'a, T: ?Sized> {
    lock: &'a Spinlock<T>,
}

// Access to `data` is serialized by the ticket protocol.
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            queue: AtomicCounter32::new(0),
            dequeue: AtomicCounter32::new(1),
            owner: AtomicU32::new(NO_TASK),
            depth: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Spinlock<T> {
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let me: Tid = percore::current_task_id();
        // Re-entry is only meaningful once tasks exist; before that every
        // caller reads NO_TASK and must queue like anyone else.
        if me != NO_TASK && self.owner.load(Ordering::Acquire) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return SpinlockGuard { lock: self };
        }
        let ticket = self.queue.inc();
        while self.dequeue.read() != ticket {
            arch::pause();
        }
        self.owner.store(me, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
        SpinlockGuard { lock: self }
    }

    /// Current recursion depth, zero when free.
    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn tickets(&self) -> (i32, i32) {
        (self.queue.read(), self.dequeue.read())
    }
}

impl<T: ?Sized> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        if self.lock.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.lock.owner.store(NO_TASK, Ordering::Relaxed);
            self.lock.dequeue.inc();
        }
    }
}

impl<T: ?Sized> Deref for SpinlockGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinlockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

/// Recursive ticket spinlock owned by a core, taken with local interrupts
/// disabled.
///
/// The interrupt-enable state saved at the first acquisition is restored
/// by the final release, so nesting inside interrupt handlers and other
/// irq-save sections is safe.
pub struct SpinlockIrqSave<T: ?Sized> {
    queue: AtomicCounter32,
    dequeue: AtomicCounter32,
    owner: AtomicU32,
    depth: AtomicU32,
    saved_flags: AtomicUsize,
    data: UnsafeCell<T>,
}

pub struct SpinlockIrqSaveGuard<'a, T: ?Sized> {
    lock: &'a SpinlockIrqSave<T>,
}

// Access to `data` is serialized by the ticket protocol.
unsafe impl<T: ?Sized + Send> Send for SpinlockIrqSave<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinlockIrqSave<T> {}

impl<T> SpinlockIrqSave<T> {
    pub const fn new(data: T) -> Self {
        Self {
            queue: AtomicCounter32::new(0),
            dequeue: AtomicCounter32::new(1),
            owner: AtomicU32::new(NO_CORE),
            depth: AtomicU32::new(0),
            saved_flags: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinlockIrqSave<T> {
    pub fn lock(&self) -> SpinlockIrqSaveGuard<'_, T> {
        let flags = arch::disable_local_irq_save();
        let core = arch::current_core_id() as CoreId;
        if self.owner.load(Ordering::Acquire) == core && self.depth.load(Ordering::Relaxed) > 0 {
            // Nested on the same core. Interrupts were already off when
            // we got here, so the flag state of this disable is moot.
            self.depth.fetch_add(1, Ordering::Relaxed);
            return SpinlockIrqSaveGuard { lock: self };
        }
        let ticket = self.queue.inc();
        while self.dequeue.read() != ticket {
            arch::pause();
        }
        self.owner.store(core, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
        self.saved_flags.store(flags, Ordering::Relaxed);
        SpinlockIrqSaveGuard { lock: self }
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn tickets(&self) -> (i32, i32) {
        (self.queue.read(), self.dequeue.read())
    }
}

impl<T: ?Sized> Drop for SpinlockIrqSaveGuard<'_, T> {
    fn drop(&mut self) {
        if self.lock.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            let flags = self.lock.saved_flags.load(Ordering::Relaxed);
            self.lock.owner.store(NO_CORE, Ordering::Relaxed);
            self.lock.dequeue.inc();
            arch::enable_local_irq_restore(flags);
        }
    }
}

impl<T: ?Sized> Deref for SpinlockIrqSaveGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinlockIrqSaveGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
