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

//! Per-core monotonic ticks, fixed-period or dynamic.
//!
//! In fixed mode the timer interrupt increments the tick counter at
//! TIMER_FREQ. In dynamic mode the counter is derived from the cycle
//! counter on demand and the hardware one-shot fires only for the next
//! armed deadline, so an idle core takes no periodic interrupt.

use crate::{
    config::{MAX_CORES, TIMER_FREQ},
    error::Error,
    irq::{self, TrapFrame, APIC_TIMER_VECTOR, TIMER_VECTOR},
    percore::PerCore,
    scheduler,
    task::TaskState,
    types::CacheAligned,
};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use isle_arch as arch;
use log::debug;

static TICKS: PerCore<AtomicU64> =
    PerCore::new([const { CacheAligned::new(AtomicU64::new(0)) }; MAX_CORES]);

/// Cycle count at the last tick fold, 0 until primed. Dynamic mode only.
static LAST_CYCLES: PerCore<AtomicU64> =
    PerCore::new([const { CacheAligned::new(AtomicU64::new(0)) }; MAX_CORES]);

static DYNAMIC_TICKS: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn dynamic_ticks() -> bool {
    DYNAMIC_TICKS.load(Ordering::Relaxed)
}

pub(crate) fn set_dynamic_ticks(enabled: bool) {
    DYNAMIC_TICKS.store(enabled, Ordering::Relaxed);
    if !enabled {
        LAST_CYCLES.current().store(0, Ordering::Relaxed);
    }
}

#[inline]
fn cycles_per_tick() -> u64 {
    arch::cpu_freq_mhz() * 1_000_000 / TIMER_FREQ
}

fn timer_handler(_frame: &mut TrapFrame) {
    if !dynamic_ticks() {
        TICKS.current().fetch_add(1, Ordering::Relaxed);
    }
    // Dynamic mode: the tick counter advances in check_ticks, and the
    // dispatch epilogue runs the scheduler, which re-arms the one-shot.
}

/// Fold elapsed cycles into the calling core's tick counter.
pub fn check_ticks() {
    if !dynamic_ticks() {
        return;
    }
    let last_cell = LAST_CYCLES.current();
    let last = last_cell.load(Ordering::Relaxed);
    if last == 0 {
        last_cell.store(arch::cycles(), Ordering::Relaxed);
        return;
    }
    let cpt = cycles_per_tick();
    let elapsed = arch::cycles().saturating_sub(last);
    let ticks = elapsed / cpt;
    if ticks > 0 {
        TICKS.current().fetch_add(ticks, Ordering::Relaxed);
        last_cell.store(last + ticks * cpt, Ordering::Relaxed);
    }
}

/// Current tick count of the calling core.
pub fn get_clock_tick() -> u64 {
    check_ticks();
    TICKS.current().load(Ordering::Relaxed)
}

/// Re-arm the hardware one-shot for the new head of the timer queue, or
/// disarm it when no deadline is pending. Called with the owning core's
/// queue lock held so an arming can never be missed. No-op in fixed mode.
pub(crate) fn update_oneshot(next_deadline: Option<u64>) {
    if !dynamic_ticks() {
        return;
    }
    match next_deadline {
        Some(deadline) => {
            let now = get_clock_tick();
            let delta = deadline.saturating_sub(now).max(1);
            arch::timer_set_oneshot(delta * cycles_per_tick());
        }
        None => arch::timer_disable(),
    }
}

/// Sleep for at least `ticks` timer ticks.
///
/// The idle task must not block, so it polls, draining deferred work
/// between cycles. Everyone else parks on the timer queue.
pub fn timer_wait(ticks: u64) -> Result<(), Error> {
    let deadline = get_clock_tick() + ticks;
    let state = scheduler::get_task_state(scheduler::current_task_id())?;
    if state == TaskState::Idle {
        while get_clock_tick() < deadline {
            crate::signal::deliver_pending();
            arch::pause();
        }
        return Ok(());
    }
    loop {
        if get_clock_tick() >= deadline {
            return Ok(());
        }
        scheduler::set_timer(deadline)?;
        scheduler::reschedule();
    }
}

/// Milliseconds since this core started ticking.
pub fn uptime_ms() -> u64 {
    get_clock_tick() * 1_000 / TIMER_FREQ
}

pub fn msleep(ms: u64) -> Result<(), Error> {
    timer_wait((ms * TIMER_FREQ).div_ceil(1_000))
}

/// Hook the timer vectors and program the hardware source.
pub fn init(dynamic: bool) {
    set_dynamic_ticks(dynamic);
    // Both the PIT and the APIC timer land in the same handler.
    let _ = irq::install_handler(TIMER_VECTOR as u32, timer_handler);
    let _ = irq::install_handler(APIC_TIMER_VECTOR as u32, timer_handler);
    arch::timer_init(TIMER_FREQ, dynamic);
    debug!(
        "timer at {TIMER_FREQ} Hz, {} ticks",
        if dynamic { "dynamic" } else { "fixed" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use isle_arch::sim;

    #[test]
    fn fixed_mode_counts_timer_interrupts() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        let before = get_clock_tick();
        for _ in 0..3 {
            sim::raise(TIMER_VECTOR);
        }
        assert_eq!(get_clock_tick(), before + 3);
    }

    #[test]
    fn apic_vector_feeds_the_same_counter() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        let before = get_clock_tick();
        sim::raise(APIC_TIMER_VECTOR);
        assert_eq!(get_clock_tick(), before + 1);
    }

    #[test]
    fn uptime_follows_tick_rate() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        let before = uptime_ms();
        for _ in 0..(TIMER_FREQ as usize) {
            sim::raise(TIMER_VECTOR);
        }
        assert_eq!(uptime_ms(), before + 1_000);
    }

    #[test]
    fn dynamic_mode_derives_ticks_from_cycles() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        set_dynamic_ticks(true);
        let _ = get_clock_tick(); // prime the cycle baseline
        let before = get_clock_tick();
        sim::advance_cycles(3 * cycles_per_tick());
        assert!(get_clock_tick() >= before + 3);
        set_dynamic_ticks(false);
    }

    fn noop(_arg: usize) {}

    #[test]
    fn timer_wait_parks_and_resumes_past_the_deadline() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        if scheduler::queue_snapshot(0).2 == crate::types::NO_TASK {
            scheduler::init_core().unwrap();
        }
        let t = scheduler::spawn(noop, 0, 10).unwrap();
        scheduler::reschedule();
        assert_eq!(scheduler::current_task_id(), t);

        set_dynamic_ticks(true);
        let _ = get_clock_tick(); // prime the cycle baseline
        // Every clock read now crosses a full tick, so the deadline
        // expires while the caller sits parked on the timer queue.
        sim::set_cycles_per_read(cycles_per_tick());
        let _ = sim::take_oneshot_arms();
        let disarms = sim::oneshot_disarms();
        let before = get_clock_tick();

        timer_wait(2).unwrap();

        assert!(get_clock_tick() >= before + 2);
        assert_eq!(scheduler::current_task_id(), t);
        assert_eq!(scheduler::get_task_state(t).unwrap(), TaskState::Running);
        assert!(!sim::take_oneshot_arms().is_empty(), "deadline was armed");
        assert!(sim::oneshot_disarms() > disarms, "queue drained on wakeup");
        assert_eq!(scheduler::timer_queue_len(0), 0);

        sim::set_cycles_per_read(1_000);
        set_dynamic_ticks(false);
    }

    #[test]
    fn idle_task_polls_for_its_deadline_without_blocking() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(6);
        if scheduler::queue_snapshot(6).2 == crate::types::NO_TASK {
            scheduler::init_core().unwrap();
        }
        let idle = scheduler::current_task_id();
        assert_eq!(scheduler::get_task_state(idle).unwrap(), TaskState::Idle);

        set_dynamic_ticks(true);
        let _ = get_clock_tick();
        sim::set_cycles_per_read(cycles_per_tick());
        let switches = sim::switch_count();
        let before = get_clock_tick();

        timer_wait(3).unwrap();

        assert!(get_clock_tick() >= before + 3);
        assert_eq!(sim::switch_count(), switches, "idle must not context-switch");
        assert_eq!(scheduler::get_task_state(idle).unwrap(), TaskState::Idle);

        sim::set_cycles_per_read(1_000);
        set_dynamic_ticks(false);
    }

    #[test]
    fn oneshot_is_armed_for_head_and_disarmed_when_empty() {
        let _serial = crate::tests_support::serialize();
        crate::tests_support::init_kernel();
        sim::set_core_id(0);
        set_dynamic_ticks(true);
        let _ = get_clock_tick();
        let _ = sim::take_oneshot_arms();
        update_oneshot(Some(get_clock_tick() + 5));
        let arms = sim::take_oneshot_arms();
        assert_eq!(arms.len(), 1);
        assert!(arms[0] >= cycles_per_tick(), "at least one tick out");
        let disarms = sim::oneshot_disarms();
        update_oneshot(None);
        assert_eq!(sim::oneshot_disarms(), disarms + 1);
        set_dynamic_ticks(false);
    }
}
