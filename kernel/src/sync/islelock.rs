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

use crate::sync::atomic::AtomicCounter32;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};
use isle_arch as arch;

/// Plain ticket lock for resources shared between isles.
///
/// Not recursive and carries no owner identity; a second acquisition from
/// the same context deadlocks. Use it only for short cross-isle critical
/// sections.
pub struct IsleLock<T: ?Sized> {
    queue: AtomicCounter32,
    dequeue: AtomicCounter32,
    data: UnsafeCell<T>,
}

pub struct IsleLockGuard<'a, T: ?Sized> {
    lock: &'a IsleLock<T>,
}

// Access to `data` is serialized by the ticket protocol.
unsafe impl<T: ?Sized + Send> Send for IsleLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for IsleLock<T> {}

impl<T> IsleLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            queue: AtomicCounter32::new(0),
            dequeue: AtomicCounter32::new(1),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> IsleLock<T> {
    pub fn lock(&self) -> IsleLockGuard<'_, T> {
        let ticket = self.queue.inc();
        while self.dequeue.read() != ticket {
            arch::pause();
        }
        IsleLockGuard { lock: self }
    }
}

impl<T: ?Sized> Drop for IsleLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.dequeue.inc();
    }
}

impl<T: ?Sized> Deref for IsleLockGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for IsleLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_pair_advances_per_acquisition() {
        let l = IsleLock::new(());
        drop(l.lock());
        drop(l.lock());
        assert_eq!(l.queue.read(), 2);
        assert_eq!(l.dequeue.read(), 3);
    }

    #[test]
    fn excludes_concurrent_writers() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 10_000;
        static LOCK: IsleLock<u64> = IsleLock::new(0);
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..PER_THREAD {
                        *LOCK.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*LOCK.lock(), (THREADS * PER_THREAD) as u64);
    }
}
