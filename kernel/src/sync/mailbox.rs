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

//! Fixed-capacity message box built from two counting semaphores.
//!
//! `mails` counts readable slots, `boxes` counts free slots. Writers and
//! readers move through independent position locks, so a slow reader
//! never stalls a writer that still has free boxes.

use crate::{
    config::MAILBOX_SIZE,
    error::{code, Error},
    sync::{Semaphore, Spinlock},
};
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

/// Mailbox with the configured default capacity.
pub type MsgBox<T> = Mailbox<T, MAILBOX_SIZE>;

pub struct Mailbox<T, const N: usize> {
    buffer: UnsafeCell<[MaybeUninit<T>; N]>,
    wpos: Spinlock<usize>,
    rpos: Spinlock<usize>,
    mails: Semaphore,
    boxes: Semaphore,
}

// Slot access is serialized by the position locks and the two
// semaphores never hand out the same slot to a reader and a writer
// at the same time.
unsafe impl<T: Send, const N: usize> Sync for Mailbox<T, N> {}
unsafe impl<T: Send, const N: usize> Send for Mailbox<T, N> {}

impl<T, const N: usize> Mailbox<T, N> {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([const { MaybeUninit::uninit() }; N]),
            wpos: Spinlock::new(0),
            rpos: Spinlock::new(0),
            mails: Semaphore::new(0),
            boxes: Semaphore::new(N as isize),
        }
    }

    fn write_slot(&self, value: T) {
        let mut wpos = self.wpos.lock();
        // Slot ownership was granted by the boxes semaphore.
        unsafe { (*self.buffer.get())[*wpos].write(value) };
        *wpos = (*wpos + 1) % N;
    }

    fn read_slot(&self) -> T {
        let mut rpos = self.rpos.lock();
        let value = unsafe { (*self.buffer.get())[*rpos].assume_init_read() };
        *rpos = (*rpos + 1) % N;
        value
    }

    /// Deposit a message, blocking while the box is full.
    pub fn post(&self, value: T) -> Result<(), Error> {
        self.mails_post(value, None)
    }

    /// Deposit a message or fail with EBUSY when no box is free.
    pub fn try_post(&self, value: T) -> Result<(), Error> {
        if self.boxes.try_wait().is_err() {
            return Err(code::EBUSY);
        }
        self.write_slot(value);
        self.mails.post();
        Ok(())
    }

    fn mails_post(&self, value: T, timeout_ms: Option<u64>) -> Result<(), Error> {
        self.boxes.wait(timeout_ms)?;
        self.write_slot(value);
        self.mails.post();
        Ok(())
    }

    /// Take the oldest message, blocking until one arrives. A timeout
    /// bounds the wait and surfaces as ETIME.
    pub fn fetch(&self, timeout_ms: Option<u64>) -> Result<T, Error> {
        self.mails.wait(timeout_ms)?;
        let value = self.read_slot();
        self.boxes.post();
        Ok(value)
    }

    /// Take the oldest message or fail with ENOENT when empty.
    pub fn try_fetch(&self) -> Result<T, Error> {
        if self.mails.try_wait().is_err() {
            return Err(code::ENOENT);
        }
        let value = self.read_slot();
        self.boxes.post();
        Ok(value)
    }
}

impl<T, const N: usize> Default for Mailbox<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for Mailbox<T, N> {
    fn drop(&mut self) {
        while self.try_fetch().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_fifo_order() {
        let mbox: Mailbox<u32, 4> = Mailbox::new();
        for v in 0..4 {
            mbox.try_post(v).unwrap();
        }
        for v in 0..4 {
            assert_eq!(mbox.try_fetch().unwrap(), v);
        }
    }

    #[test]
    fn full_and_empty_are_reported() {
        let mbox: Mailbox<u32, 2> = Mailbox::new();
        mbox.try_post(1).unwrap();
        mbox.try_post(2).unwrap();
        assert_eq!(mbox.try_post(3), Err(code::EBUSY));
        assert_eq!(mbox.try_fetch(), Ok(1));
        mbox.try_post(3).unwrap();
        assert_eq!(mbox.try_fetch(), Ok(2));
        assert_eq!(mbox.try_fetch(), Ok(3));
        assert_eq!(mbox.try_fetch(), Err(code::ENOENT));
    }

    #[test]
    fn positions_wrap_around() {
        let mbox: Mailbox<u32, 3> = Mailbox::new();
        for round in 0..10u32 {
            mbox.try_post(round).unwrap();
            assert_eq!(mbox.try_fetch().unwrap(), round);
        }
    }

    #[test]
    fn drop_releases_unread_messages() {
        use std::rc::Rc;
        let item = Rc::new(17u32);
        {
            let mbox: Mailbox<Rc<u32>, 4> = Mailbox::new();
            mbox.try_post(item.clone()).unwrap();
            mbox.try_post(item.clone()).unwrap();
        }
        assert_eq!(Rc::strong_count(&item), 1);
    }
}
