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

//! Cooperative task signals.
//!
//! A signal is a small integer delivered to a task's registered handler.
//! Delivery is never forced into the target's context: the target runs
//! its handler the next time it passes a delivery point (the idle loop,
//! a timer poll, or an explicit `deliver_pending` call). Signalling a
//! task that is running on another core posts the number to that core's
//! queue and kicks it with an IPI, so the target notices promptly.

use crate::{
    config::SIGNAL_QUEUE_SIZE,
    error::{code, Error},
    irq::{TrapFrame, SIGNAL_VECTOR},
    percore::PerCore,
    scheduler, task,
    types::{CacheAligned, Tid},
};
use core::sync::atomic::Ordering;
use isle_arch as arch;
use log::debug;

/// Highest deliverable signal number. Pending signals live in one u64
/// bitmap per task.
pub const MAX_SIGNAL: u8 = 63;

/// Task-side signal handler. Receives the signal number.
pub type SignalHandler = fn(u8);

#[derive(Clone, Copy)]
struct Posted {
    dest: Tid,
    signum: u8,
}

/// Signals addressed to a task currently running on that core. Drained
/// by the IPI handler into the task's pending bitmap.
static QUEUES: PerCore<crate::sync::Dequeue<Posted, SIGNAL_QUEUE_SIZE>> =
    PerCore::new([const { CacheAligned::new(crate::sync::Dequeue::new()) }; crate::config::MAX_CORES]);

/// Register the calling task's signal handler, replacing any previous one.
pub fn register_handler(handler: SignalHandler) -> Result<(), Error> {
    let task = task::get(scheduler::current_task_id()).ok_or(code::ENOENT)?;
    task.inner.lock().signal_handler = Some(handler);
    Ok(())
}

/// Post `signum` to task `tid`.
///
/// A blocked target is woken so it reaches a delivery point. A target
/// running on another core gets the signal via that core's queue and a
/// wakeup IPI.
pub fn kill(tid: Tid, signum: u8) -> Result<(), Error> {
    if signum > MAX_SIGNAL {
        return Err(code::EINVAL);
    }
    let task = task::get(tid).ok_or(code::ENOENT)?;
    let state = task.state();
    if state == task::TaskState::Invalid {
        return Err(code::ENOENT);
    }

    let target_core = task.last_core();
    if state == task::TaskState::Running && target_core != arch::current_core_id() {
        QUEUES.of(target_core).push(Posted { dest: tid, signum })?;
        arch::send_ipi(target_core, SIGNAL_VECTOR);
        return Ok(());
    }

    task.pending_signals.fetch_or(1 << signum, Ordering::AcqRel);
    if state == task::TaskState::Blocked {
        // Lost the race if it already ran to completion. Fine either way.
        let _ = scheduler::wakeup_task(tid);
    }
    Ok(())
}

/// True if the calling task has undelivered signals.
pub fn signal_pending() -> bool {
    task::get(scheduler::current_task_id())
        .map(|t| t.pending_signals.load(Ordering::Acquire) != 0)
        .unwrap_or(false)
}

/// IPI target: move this core's posted signals into pending bitmaps.
pub(crate) fn signal_irq_handler(_frame: &mut TrapFrame) {
    let queue = QUEUES.current();
    while let Ok(posted) = queue.pop() {
        match task::get(posted.dest) {
            Some(task) => {
                task.pending_signals
                    .fetch_or(1 << posted.signum, Ordering::AcqRel);
            }
            None => debug!("dropping signal {} for stale task {}", posted.signum, posted.dest),
        }
    }
}

/// Run the calling task's handler for each pending signal.
/// Safe to call from the idle task, which has no handler.
pub fn deliver_pending() {
    let Some(task) = task::get(scheduler::current_task_id()) else {
        return;
    };
    let mut pending = task.pending_signals.swap(0, Ordering::AcqRel);
    if pending == 0 {
        return;
    }
    let handler = task.inner.lock().signal_handler;
    let Some(handler) = handler else {
        debug!("task {} has pending signals but no handler", scheduler::current_task_id());
        return;
    };
    while pending != 0 {
        let signum = pending.trailing_zeros() as u8;
        pending &= pending - 1;
        handler(signum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU64;
    use isle_arch::sim;

    static SEEN: AtomicU64 = AtomicU64::new(0);

    fn recording_handler(signum: u8) {
        SEEN.fetch_or(1 << signum, Ordering::SeqCst);
    }

    #[test]
    fn kill_rejects_stale_and_out_of_range_targets() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(5);
        scheduler::init_core().unwrap();
        let tid = scheduler::current_task_id();
        assert_eq!(kill(tid, MAX_SIGNAL + 1), Err(code::EINVAL));
        assert_eq!(kill(crate::types::NO_TASK - 1, 3), Err(code::ENOENT));
    }

    #[test]
    fn pending_signals_reach_the_registered_handler() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(5);
        scheduler::init_core().unwrap();
        let tid = scheduler::current_task_id();
        register_handler(recording_handler).unwrap();
        SEEN.store(0, Ordering::SeqCst);

        kill(tid, 3).unwrap();
        kill(tid, 9).unwrap();
        assert!(signal_pending());
        deliver_pending();
        assert_eq!(SEEN.load(Ordering::SeqCst), (1 << 3) | (1 << 9));
        assert!(!signal_pending());
    }

    #[test]
    fn cross_core_kill_posts_an_ipi_and_the_irq_drains_it() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(6);
        scheduler::init_core().unwrap();
        let tid = scheduler::current_task_id();
        let task = task::get(tid).unwrap();
        task.pending_signals.store(0, Ordering::SeqCst);
        // Only a target running on its core takes the IPI path.
        task.set_state(task::TaskState::Running);

        sim::set_core_id(5);
        scheduler::init_core().unwrap();
        let _ = sim::take_ipis();
        kill(tid, 7).unwrap();
        assert!(sim::take_ipis().contains(&(6, SIGNAL_VECTOR)));

        // The target's IRQ handler folds the queue into the bitmap.
        sim::set_core_id(6);
        sim::raise(SIGNAL_VECTOR);
        assert_eq!(task.pending_signals.load(Ordering::SeqCst) & (1 << 7), 1 << 7);
        task.set_state(task::TaskState::Idle);
    }
}
