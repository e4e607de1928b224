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

//! Counting semaphore with a bounded waiter queue.

use crate::{
    config::MAX_TASKS,
    error::{code, Error},
    scheduler,
    sync::{Ring, SpinlockIrqSave},
    timer,
    types::Tid,
};

struct SemInner {
    value: isize,
    waiters: Ring<Tid, MAX_TASKS>,
}

pub struct Semaphore {
    inner: SpinlockIrqSave<SemInner>,
}

impl Semaphore {
    pub const fn new(value: isize) -> Self {
        Self {
            inner: SpinlockIrqSave::new(SemInner {
                value,
                waiters: Ring::new(),
            }),
        }
    }

    /// Take one unit without blocking.
    pub fn try_wait(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            Ok(())
        } else {
            Err(code::ECANCELED)
        }
    }

    /// Take one unit, blocking until one is posted. With a timeout the
    /// wait parks on the timer queue and fails with ETIME once the
    /// deadline passes without a unit arriving.
    pub fn wait(&self, timeout_ms: Option<u64>) -> Result<(), Error> {
        let deadline = timeout_ms
            .map(|ms| timer::get_clock_tick() + (ms * crate::config::TIMER_FREQ).div_ceil(1_000).max(1));
        let tid = scheduler::current_task_id();
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.value > 0 {
                    inner.value -= 1;
                    return Ok(());
                }
                if let Some(deadline) = deadline {
                    if timer::get_clock_tick() >= deadline {
                        return Err(code::ETIME);
                    }
                }
                if inner.waiters.push(tid).is_err() {
                    return Err(code::EOVERFLOW);
                }
                match deadline {
                    Some(deadline) => scheduler::set_timer(deadline)?,
                    None => {
                        scheduler::block_current_task()?;
                    }
                }
            }
            scheduler::reschedule();
        }
    }

    /// Release one unit and wake a waiter if one is parked.
    pub fn post(&self) {
        let woken = {
            let mut inner = self.inner.lock();
            inner.value += 1;
            inner.waiters.pop()
        };
        if let Some(tid) = woken {
            // A timed-out waiter may already be gone. Not an error.
            let _ = scheduler::wakeup_task(tid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_refuses_at_zero() {
        let sem = Semaphore::new(2);
        assert!(sem.try_wait().is_ok());
        assert!(sem.try_wait().is_ok());
        assert_eq!(sem.try_wait(), Err(code::ECANCELED));
        sem.post();
        assert!(sem.try_wait().is_ok());
    }

    #[test]
    fn wait_succeeds_without_blocking_when_units_remain() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        isle_arch::sim::set_core_id(0);
        let sem = Semaphore::new(1);
        assert!(sem.wait(None).is_ok());
        sem.post();
        assert!(sem.wait(Some(50)).is_ok());
    }

    #[test]
    fn post_wakes_in_fifo_order() {
        let sem = Semaphore::new(0);
        {
            let mut inner = sem.inner.lock();
            inner.waiters.push(11).unwrap();
            inner.waiters.push(12).unwrap();
        }
        sem.post();
        sem.post();
        // Both were stale tids, so the units stayed available.
        assert!(sem.try_wait().is_ok());
        assert!(sem.try_wait().is_ok());
        assert_eq!(sem.try_wait(), Err(code::ECANCELED));
    }
}
