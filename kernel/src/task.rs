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
    config::{IST_STACK_SIZE, KERNEL_STACK_SIZE, MAX_TASKS},
    error::{code, Error},
    signal::SignalHandler,
    sync::{ring::Ring, SpinlockIrqSave},
    types::{Prio, Tid, NO_TASK},
};
use alloc::{boxed::Box, vec::Vec};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
};

/// Task lifecycle. Transitions go through `transfer_state`; everything not
/// listed there is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Free table slot.
    Invalid = 0,
    Ready = 1,
    Running = 2,
    Blocked = 3,
    /// The per-core idle task, never queued.
    Idle = 4,
    /// Ran to completion, awaiting reclamation.
    Finished = 5,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Blocked,
            4 => Self::Idle,
            5 => Self::Finished,
            _ => Self::Invalid,
        }
    }
}

pub type TaskEntry = fn(usize);

#[repr(align(16))]
pub(crate) struct FpuArea(pub [u8; 512]);

impl Default for FpuArea {
    fn default() -> Self {
        Self([0; 512])
    }
}

pub(crate) struct TaskStacks {
    pub stack: Box<[u8]>,
    pub ist: Box<[u8]>,
}

impl TaskStacks {
    fn try_alloc(size: usize) -> Result<Box<[u8]>, Error> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| code::ENOMEM)?;
        buf.resize(size, 0);
        Ok(buf.into_boxed_slice())
    }

    pub fn allocate() -> Result<Self, Error> {
        Ok(Self {
            stack: Self::try_alloc(KERNEL_STACK_SIZE)?,
            ist: Self::try_alloc(IST_STACK_SIZE)?,
        })
    }

    pub fn top(&self) -> usize {
        self.stack.as_ptr() as usize + self.stack.len()
    }
}

pub(crate) struct TaskInner {
    pub stacks: Option<TaskStacks>,
    pub entry: Option<(TaskEntry, usize)>,
    /// Task that spawned this one, NO_TASK for boot-time tasks.
    pub parent: Tid,
    pub join_waiters: Ring<Tid, MAX_TASKS>,
    pub signal_handler: Option<SignalHandler>,
    pub exit_code: i32,
    pub fpu: Option<Box<FpuArea>>,
}

impl TaskInner {
    const fn new() -> Self {
        Self {
            stacks: None,
            entry: None,
            parent: NO_TASK,
            join_waiters: Ring::new(),
            signal_handler: None,
            exit_code: 0,
            fpu: None,
        }
    }
}

/// One slot of the static task table. The slot index is the task id.
pub struct Task {
    state: AtomicU8,
    prio: AtomicU8,
    last_core: AtomicU32,
    /// Wake deadline in ticks while sleeping, 0 when unarmed.
    pub(crate) timeout: AtomicU64,
    pub(crate) pending_signals: AtomicU64,
    /// Stack pointer saved across context switches. Written by the switch
    /// path with the owning core's ready-queue lock held.
    sp: UnsafeCell<usize>,
    pub(crate) inner: SpinlockIrqSave<TaskInner>,
}

// `sp` is only touched under the scheduler's queue lock or from the
// switch primitive itself.
unsafe impl Sync for Task {}

impl Task {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Invalid as u8),
            prio: AtomicU8::new(0),
            last_core: AtomicU32::new(0),
            timeout: AtomicU64::new(0),
            pending_signals: AtomicU64::new(0),
            sp: UnsafeCell::new(0),
            inner: SpinlockIrqSave::new(TaskInner::new()),
        }
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move `from` -> `to` atomically. Fails with `EINVAL` when the task is
    /// no longer in `from`, without touching the state.
    pub fn transfer_state(&self, from: TaskState, to: TaskState) -> Result<(), Error> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| code::EINVAL)
    }

    /// Unconditional store, reserved for slot setup and reclamation.
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    #[inline]
    pub fn prio(&self) -> Prio {
        self.prio.load(Ordering::Relaxed)
    }

    pub(crate) fn set_prio(&self, prio: Prio) {
        self.prio.store(prio, Ordering::Relaxed);
    }

    #[inline]
    pub fn last_core(&self) -> usize {
        self.last_core.load(Ordering::Relaxed) as usize
    }

    pub(crate) fn set_last_core(&self, core: usize) {
        self.last_core.store(core as u32, Ordering::Relaxed);
    }

    pub(crate) fn sp_cell(&self) -> *mut usize {
        self.sp.get()
    }

    pub(crate) fn saved_sp(&self) -> usize {
        unsafe { *self.sp.get() }
    }

    pub(crate) fn set_saved_sp(&self, sp: usize) {
        unsafe { *self.sp.get() = sp };
    }
}

static TASK_TABLE: [Task; MAX_TASKS] = [const { Task::new() }; MAX_TASKS];
static TABLE_LOCK: SpinlockIrqSave<()> = SpinlockIrqSave::new(());

/// Borrow a table slot. Out-of-range ids yield `None`, freed slots a task
/// in `Invalid` state.
pub fn get(tid: Tid) -> Option<&'static Task> {
    TASK_TABLE.get(tid as usize)
}

/// Claim a free slot and initialize it in `Ready` state with freshly
/// allocated stacks. `ENOMEM` when the table or the heap is exhausted.
pub(crate) fn allocate(
    prio: Prio,
    core: usize,
    entry: TaskEntry,
    arg: usize,
) -> Result<Tid, Error> {
    let stacks = TaskStacks::allocate()?;
    let _table = TABLE_LOCK.lock();
    for (i, task) in TASK_TABLE.iter().enumerate() {
        if task.state() != TaskState::Invalid {
            continue;
        }
        task.set_prio(prio);
        task.set_last_core(core);
        task.timeout.store(0, Ordering::Relaxed);
        task.pending_signals.store(0, Ordering::Relaxed);
        {
            let mut inner = task.inner.lock();
            inner.entry = Some((entry, arg));
            inner.stacks = Some(stacks);
            inner.parent = crate::percore::current_task_id();
            inner.exit_code = 0;
            inner.signal_handler = None;
            inner.fpu = None;
        }
        task.set_state(TaskState::Ready);
        return Ok(i as Tid);
    }
    Err(code::ENOMEM)
}

/// Return a `Finished` task's slot to the free pool.
pub(crate) fn release(tid: Tid) {
    let Some(task) = get(tid) else { return };
    let _table = TABLE_LOCK.lock();
    {
        let mut inner = task.inner.lock();
        inner.stacks = None;
        inner.entry = None;
        inner.parent = NO_TASK;
        inner.fpu = None;
        while inner.join_waiters.pop().is_some() {}
    }
    task.set_state(TaskState::Invalid);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry(_arg: usize) {}

    #[test]
    fn transfer_state_is_compare_and_swap() {
        let _serial = crate::tests_support::serialize();
        let tid = allocate(8, 0, noop_entry, 0).unwrap();
        let task = get(tid).unwrap();
        assert_eq!(task.state(), TaskState::Ready);
        task.transfer_state(TaskState::Ready, TaskState::Running)
            .unwrap();
        // Stale transition: the task is no longer Ready.
        assert_eq!(
            task.transfer_state(TaskState::Ready, TaskState::Blocked),
            Err(code::EINVAL)
        );
        assert_eq!(task.state(), TaskState::Running);
        task.set_state(TaskState::Finished);
        release(tid);
        assert_eq!(task.state(), TaskState::Invalid);
    }

    #[test]
    fn released_slots_are_reused() {
        let _serial = crate::tests_support::serialize();
        let a = allocate(8, 0, noop_entry, 0).unwrap();
        get(a).unwrap().set_state(TaskState::Finished);
        release(a);
        let b = allocate(9, 0, noop_entry, 0).unwrap();
        assert_eq!(a, b, "lowest free slot is claimed first");
        assert_eq!(get(b).unwrap().prio(), 9);
        get(b).unwrap().set_state(TaskState::Finished);
        release(b);
    }

    #[test]
    fn allocation_keeps_stacks_until_release() {
        let _serial = crate::tests_support::serialize();
        let tid = allocate(8, 1, noop_entry, 7).unwrap();
        let task = get(tid).unwrap();
        {
            let inner = task.inner.lock();
            let stacks = inner.stacks.as_ref().unwrap();
            assert_eq!(stacks.stack.len(), KERNEL_STACK_SIZE);
            assert_eq!(stacks.ist.len(), IST_STACK_SIZE);
            assert_eq!(inner.entry.unwrap().1, 7);
            assert_eq!(inner.parent, crate::percore::current_task_id());
        }
        task.set_state(TaskState::Finished);
        release(tid);
        assert!(task.inner.lock().stacks.is_none());
    }
}
