// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The general purpose timer service: a fixed table of software timers
//! driven by one hardware tick.
//!
//! A [`Gpt`] owns a fixed-capacity table of timer slots. Foreground code
//! claims a slot with [`register`][Gpt::register], handing over a period (in
//! ticks) and a callback; the hardware tick interrupt calls
//! [`tick`][Gpt::tick] once per resolution unit, which counts every armed
//! slot down and invokes the callbacks that reach zero. A slot fires for the
//! first time after exactly its period, and every period thereafter, until
//! it is released.
//!
//! # The slot table
//!
//! Slots are a tagged state, `Free` or `Used`, never a magic value. A used
//! slot records its configured `period`, the `remaining` countdown, and a
//! shared reference to the collaborator's callback. The table does not own
//! the callback or its captured state; it only borrows it, which is why
//! [`Gpt`] carries a lifetime parameter. For the common firmware case the
//! table is a `static` and the callbacks are `'static` too (see the
//! `systick` module).
//!
//! Allocation is first-fit by index, nothing fancier: the lowest free slot
//! wins, and a released slot is reused by the very next registration.
//! A slot's identity is its index, wrapped in the opaque [`TimerId`].
//!
//! # Concurrency
//!
//! Exactly two actors touch the table: foreground code (register, change,
//! reset, release) and the tick handler running in interrupt context. Every
//! multi-field slot update happens inside `critical_section::with`, so a
//! tick can never observe a slot mid-mutation, and a mutation can never tear
//! a slot mid-tick. The critical section is scoped by construction: it is
//! released on every exit path, early returns included.
//!
//! Callbacks are invoked *outside* the critical section. This keeps the
//! masked window to a few loads and stores, and it means a callback may call
//! back into the service: a timer can release itself, change its own period,
//! or register another timer from within its own expiry. What a callback
//! must not do is call [`tick`][Gpt::tick]; the handler is non-reentrant and
//! a debug latch enforces that.
//!
//! Within one tick, callbacks run serialized in table order. A slow callback
//! delays every later slot in that same tick and, because the handler runs
//! to completion, delays the next tick's handling as well. Keep callbacks
//! short relative to the tick resolution.
//!
//! # Timing
//!
//! Periods are 16-bit tick counts, so one slot spans at most 65535 ticks:
//! about 65 seconds at 1 ms resolution, about 6.5 seconds at 0.1 ms.
//! Anything that needs to wait longer can count several expiries of a
//! shorter period.
//!
//! The service also maintains a free-running 32-bit tick counter, readable
//! with [`now`][Gpt::now]. It wraps silently when exhausted -- after about
//! 49 days at 1 ms resolution -- so durations should be computed with
//! [`Ticks::wrapping_since`], not raw subtraction.

use core::cell::RefCell;
use core::num::NonZeroU16;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use scopeguard::defer;

use crate::cheap_assert;

/// A timer expiry action: a zero-argument callable the service borrows.
///
/// The callback is invoked from interrupt context, while foreground code may
/// simultaneously hold references to the same object, hence `Sync`. The
/// service never assumes ownership; whatever state the callable captures
/// remains the property of the collaborator that registered it.
pub type Callback<'a> = &'a (dyn Fn() + Sync);

/// Tick resolution of the hardware tick source.
///
/// Chosen once, by the first successful [`Gpt::init`] call, for the lifetime
/// of the service. Collaborators that need periods longer than 6.5 seconds
/// should arrange for [`Ms1`][Resolution::Ms1]; ones that need sub-millisecond
/// cadence need [`Us100`][Resolution::Us100] and must live with the shorter
/// maximum period.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Resolution {
    /// One tick per millisecond.
    Ms1 = 1,
    /// One tick per 100 microseconds.
    Us100 = 2,
}

impl Resolution {
    /// Number of ticks in one second at this resolution.
    pub const fn ticks_per_second(self) -> u32 {
        match self {
            Resolution::Ms1 => 1_000,
            Resolution::Us100 => 10_000,
        }
    }

    /// Decodes the atomic encoding used by `Gpt`; `0` is "unset."
    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Resolution::Ms1),
            2 => Some(Resolution::Us100),
            _ => None,
        }
    }
}

/// Encoding of "no resolution chosen yet" in `Gpt::resolution`.
const RESOLUTION_UNSET: u8 = 0;

/// Opaque handle to a registered timer.
///
/// Issued by [`Gpt::register`] and meaningful only to the `Gpt` that issued
/// it. Handles stay valid until [`Gpt::release`]; operations on a handle
/// that has been released are silently ignored (see
/// [`Gpt::stale_handle_ops`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerId(usize);

/// A moment in time, as a snapshot of the free-running tick counter.
///
/// The counter is 32 bits and wraps silently, so `Ticks` values compare
/// meaningfully only within one wrap period. Use
/// [`wrapping_since`][Ticks::wrapping_since] for durations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Ticks(pub u32);

impl Ticks {
    /// Ticks elapsed from `earlier` to `self`, modulo counter wrap.
    ///
    /// Correct for any interval shorter than the full 32-bit range, even
    /// when the counter wrapped in between.
    pub const fn wrapping_since(self, earlier: Ticks) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// `self` advanced by `ticks`, wrapping like the counter does.
    pub const fn wrapping_add(self, ticks: u32) -> Ticks {
        Ticks(self.0.wrapping_add(ticks))
    }
}

impl From<Ticks> for u32 {
    fn from(t: Ticks) -> Self {
        t.0
    }
}

/// One entry in the timer table.
enum Slot<'a> {
    /// Nobody has claimed this slot.
    Free,
    /// Claimed. `remaining` counts down once per tick; hitting zero fires
    /// `callback` and rearms to `period`. Outside the expiry instant,
    /// `1 <= remaining <= period` holds.
    Used {
        period: NonZeroU16,
        remaining: u16,
        callback: Callback<'a>,
    },
}

impl<'a> Slot<'a> {
    /// Named constant so `[Slot::FREE; N]` works without `Slot: Copy`.
    const FREE: Slot<'a> = Slot::Free;
}

/// The slot array plus its occupancy count, updated together under one
/// critical section.
struct Table<'a, const SLOTS: usize> {
    slots: [Slot<'a>; SLOTS],
    /// Number of `Used` slots; lets `register` bail out without scanning
    /// when the table is full.
    live: usize,
}

impl<'a, const SLOTS: usize> Table<'a, SLOTS> {
    const fn new() -> Self {
        Self {
            slots: [Slot::FREE; SLOTS],
            live: 0,
        }
    }
}

/// A general purpose timer service: `SLOTS` software timers multiplexed onto
/// one hardware tick.
///
/// `Gpt::new` is `const`, so the usual home for one of these is a `static`:
///
/// ```ignore
/// static GPT: Gpt<'static, 10> = Gpt::new();
/// ```
///
/// All operations take `&self`; interior state is guarded by critical
/// sections and atomics, making the service shareable between foreground
/// code and the interrupt handler that calls [`tick`][Gpt::tick].
///
/// ```
/// use core::num::NonZeroU16;
/// use core::sync::atomic::{AtomicUsize, Ordering};
/// use tickmux::gpt::Gpt;
///
/// let hits = AtomicUsize::new(0);
/// let count = || { hits.fetch_add(1, Ordering::Relaxed); };
///
/// let gpt: Gpt<'_, 4> = Gpt::new();
/// let id = gpt.register(NonZeroU16::new(3).unwrap(), &count).unwrap();
///
/// for _ in 0..9 {
///     gpt.tick();
/// }
/// assert_eq!(hits.load(Ordering::Relaxed), 3);
///
/// gpt.release(id);
/// ```
pub struct Gpt<'a, const SLOTS: usize> {
    /// The timer table. Mutated only inside critical sections.
    table: Mutex<RefCell<Table<'a, SLOTS>>>,
    /// Free-running tick counter; wraps silently.
    ticks: AtomicU32,
    /// Chosen resolution, or `RESOLUTION_UNSET`. Written once by the first
    /// `init`.
    resolution: AtomicU8,
    /// Reentrancy latch for `tick`.
    in_tick: AtomicBool,
    /// Count of operations dropped because their handle was out of range or
    /// already released.
    stale_ops: AtomicU32,
}

impl<'a, const SLOTS: usize> Gpt<'a, SLOTS> {
    /// Creates an empty service: all slots free, tick counter at zero,
    /// resolution unset.
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new(Table::new())),
            ticks: AtomicU32::new(0),
            resolution: AtomicU8::new(RESOLUTION_UNSET),
            in_tick: AtomicBool::new(false),
            stale_ops: AtomicU32::new(0),
        }
    }

    /// Marks the service initialized at `resolution`.
    ///
    /// The first call wins: it clears the slot table and records the
    /// resolution, which is then returned by this and every later call.
    /// Later calls change nothing, so independent collaborators can each
    /// initialize defensively and agree on whatever the first one chose --
    /// check the return value if the cadence matters to you.
    ///
    /// Note that the first call wipes the table: slots registered before
    /// anyone called `init` are discarded. Register after initialization.
    ///
    /// This records bookkeeping only. Configuring the actual tick source to
    /// interrupt at `resolution` is the frontend's job (on ARM, see
    /// `systick::initialize_gpt`, which calls this).
    pub fn init(&self, resolution: Resolution) -> Resolution {
        match self.resolution.compare_exchange(
            RESOLUTION_UNSET,
            resolution as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                critical_section::with(|cs| {
                    *self.table.borrow_ref_mut(cs) = Table::new();
                });
                resolution
            }
            // The stored value was written from a `Resolution`, so decoding
            // cannot actually fail; the fallback keeps this panic-free.
            Err(prev) => Resolution::from_raw(prev).unwrap_or(resolution),
        }
    }

    /// Returns the resolution chosen by the first `init`, or `None` if the
    /// service has not been initialized yet.
    pub fn resolution(&self) -> Option<Resolution> {
        Resolution::from_raw(self.resolution.load(Ordering::Acquire))
    }

    /// Reads the free-running tick counter.
    ///
    /// Monotonic between wraps; wraps silently at `u32::MAX` ticks. See
    /// [`Ticks`].
    pub fn now(&self) -> Ticks {
        Ticks(self.ticks.load(Ordering::Relaxed))
    }

    /// Claims a free slot for a timer firing every `period` ticks.
    ///
    /// The callback fires for the first time `period` ticks from now and
    /// every `period` ticks after that, until the returned id is passed to
    /// [`release`][Gpt::release]. Returns `None`, with no side effects, if
    /// every slot is taken; callers are expected to degrade gracefully.
    ///
    /// Allocation is first-fit: the lowest free slot is claimed.
    pub fn register(
        &self,
        period: NonZeroU16,
        callback: Callback<'a>,
    ) -> Option<TimerId> {
        critical_section::with(|cs| {
            let mut guard = self.table.borrow_ref_mut(cs);
            let table = &mut *guard;
            if table.live == SLOTS {
                return None;
            }
            let index = table
                .slots
                .iter()
                .position(|slot| matches!(slot, Slot::Free))?;
            table.slots[index] = Slot::Used {
                period,
                remaining: period.get(),
                callback,
            };
            table.live += 1;
            Some(TimerId(index))
        })
    }

    /// Changes a timer's period, restarting its countdown.
    ///
    /// Both the period and the remaining count are overwritten, so the next
    /// expiry is exactly `period` ticks from now -- the stale interval is
    /// abandoned, not completed. Use this when a cadence change should take
    /// effect immediately.
    ///
    /// Silently ignored if `id` is out of range or already released.
    pub fn set_period(&self, id: TimerId, period: NonZeroU16) {
        critical_section::with(|cs| {
            let mut table = self.table.borrow_ref_mut(cs);
            let Some(Slot::Used { period: p, remaining, .. }) =
                table.slots.get_mut(id.0)
            else {
                self.stale_ops.fetch_add(1, Ordering::Relaxed);
                return;
            };
            *p = period;
            *remaining = period.get();
        });
    }

    /// Rearms a timer's countdown to its full period without changing the
    /// period.
    ///
    /// This is the watchdog idiom: an external event calls `reset` to push
    /// the next expiry back out, so the callback only fires when the events
    /// stop arriving for a whole period.
    ///
    /// Silently ignored if `id` is out of range or already released.
    pub fn reset(&self, id: TimerId) {
        critical_section::with(|cs| {
            let mut table = self.table.borrow_ref_mut(cs);
            let Some(Slot::Used { period, remaining, .. }) =
                table.slots.get_mut(id.0)
            else {
                self.stale_ops.fetch_add(1, Ordering::Relaxed);
                return;
            };
            *remaining = period.get();
        });
    }

    /// Releases a timer slot, making it available to the next `register`.
    ///
    /// Takes effect no later than the next tick after this returns; a
    /// callback that is already executing is allowed to complete. Releasing
    /// an already-free or out-of-range id is safe and does nothing (beyond
    /// bumping [`stale_handle_ops`][Gpt::stale_handle_ops]).
    pub fn release(&self, id: TimerId) {
        critical_section::with(|cs| {
            let mut guard = self.table.borrow_ref_mut(cs);
            let table = &mut *guard;
            match table.slots.get_mut(id.0) {
                Some(slot @ Slot::Used { .. }) => {
                    *slot = Slot::Free;
                    table.live -= 1;
                }
                _ => {
                    self.stale_ops.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    /// Number of slots currently in use.
    pub fn in_use(&self) -> usize {
        critical_section::with(|cs| self.table.borrow_ref(cs).live)
    }

    /// Total slot capacity.
    pub const fn capacity(&self) -> usize {
        SLOTS
    }

    /// Count of operations ignored because their id was out of range or
    /// referred to a released slot.
    ///
    /// Dropping such operations silently is deliberate -- collaborators are
    /// written against best-effort semantics and there is no error channel
    /// below the interrupt boundary -- but a nonzero value here usually
    /// means somebody is holding a timer id past its release. Diagnostic
    /// only; the counter has no effect on behavior.
    pub fn stale_handle_ops(&self) -> u32 {
        self.stale_ops.load(Ordering::Relaxed)
    }

    /// Advances time by one tick: the state transition the hardware tick
    /// interrupt exists to trigger.
    ///
    /// Increments the tick counter, then walks the table in index order.
    /// Every used slot is counted down once; a slot reaching zero is rearmed
    /// to its full period and its callback invoked synchronously, before the
    /// walk moves on. Callbacks therefore run serialized, in slot order,
    /// and a new registration made by a callback participates in the walk
    /// only where its slot index has not been passed yet.
    ///
    /// Non-reentrant: must not be called from a timer callback, and the
    /// platform must not deliver a second tick while one is being handled
    /// (interrupt hardware serializes its own vector; test harnesses must
    /// do the same). Reentry trips a latch and panics.
    pub fn tick(&self) {
        let reentered = self.in_tick.swap(true, Ordering::Acquire);
        cheap_assert!(!reentered);
        defer! {
            self.in_tick.store(false, Ordering::Release);
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);

        for index in 0..SLOTS {
            // Count the slot down inside the critical section, but keep the
            // callback invocation outside it, so callbacks can re-enter the
            // foreground operations.
            let expired = critical_section::with(|cs| {
                let mut table = self.table.borrow_ref_mut(cs);
                let Slot::Used { period, remaining, callback } =
                    &mut table.slots[index]
                else {
                    return None;
                };
                *remaining -= 1;
                if *remaining == 0 {
                    *remaining = period.get();
                    Some(*callback)
                } else {
                    None
                }
            });
            if let Some(callback) = expired {
                callback();
            }
        }
    }
}

impl<const SLOTS: usize> Default for Gpt<'_, SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Implement Debug by hand: the table itself is only observable inside a
/// critical section, and callbacks have nothing useful to print.
impl<const SLOTS: usize> core::fmt::Debug for Gpt<'_, SLOTS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Gpt")
            .field("capacity", &SLOTS)
            .field("in_use", &self.in_use())
            .field("now", &self.now())
            .field("resolution", &self.resolution())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::num::NonZeroU16;
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, OnceLock};

    fn p(n: u16) -> NonZeroU16 {
        NonZeroU16::new(n).unwrap()
    }

    fn advance<const N: usize>(gpt: &Gpt<'_, N>, n: u32) {
        for _ in 0..n {
            gpt.tick();
        }
    }

    #[test]
    fn test_fires_after_exactly_period_ticks() {
        let hits = AtomicUsize::new(0);
        let cb = || {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        let gpt: Gpt<'_, 4> = Gpt::new();

        gpt.register(p(3), &cb).unwrap();

        advance(&gpt, 2);
        assert_eq!(hits.load(Ordering::Relaxed), 0, "fired early");
        advance(&gpt, 1);
        assert_eq!(hits.load(Ordering::Relaxed), 1, "did not fire at period");
        // And every period thereafter.
        advance(&gpt, 3);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        advance(&gpt, 2);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        advance(&gpt, 1);
        assert_eq!(hits.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_blink_scenario() {
        // init at 1 ms, a 1000-tick blinker, three seconds of ticks.
        let fired_at: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        let gpt: Gpt<'_, 10> = Gpt::new();
        let blink = || {
            fired_at.lock().unwrap().push(gpt.now().0);
        };

        assert_eq!(gpt.init(Resolution::Ms1), Resolution::Ms1);
        gpt.register(p(1000), &blink).unwrap();

        advance(&gpt, 3000);
        assert_eq!(*fired_at.lock().unwrap(), vec![1000, 2000, 3000]);
    }

    #[test]
    fn test_full_table_rejects_registration() {
        let hits = AtomicUsize::new(0);
        let cb = || {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        let gpt: Gpt<'_, 3> = Gpt::new();

        for _ in 0..3 {
            assert!(gpt.register(p(2), &cb).is_some());
        }
        assert_eq!(gpt.in_use(), 3);

        // Fourth registration bounces, with no side effects.
        assert!(gpt.register(p(1), &cb).is_none());
        assert_eq!(gpt.in_use(), 3);

        // The resident timers keep their schedule.
        advance(&gpt, 2);
        assert_eq!(hits.load(Ordering::Relaxed), 3);
        advance(&gpt, 2);
        assert_eq!(hits.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_all_slots_fire_in_index_order() {
        let order: Mutex<Vec<usize>> = Mutex::new(Vec::new());
        let callbacks: Vec<Box<dyn Fn() + Sync + '_>> = (0..10)
            .map(|i| {
                let order = &order;
                Box::new(move || order.lock().unwrap().push(i))
                    as Box<dyn Fn() + Sync + '_>
            })
            .collect();
        let gpt: Gpt<'_, 10> = Gpt::new();

        for cb in &callbacks {
            assert!(gpt.register(p(1), cb.as_ref()).is_some());
        }

        gpt.tick();
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_init_is_idempotent() {
        let gpt: Gpt<'_, 2> = Gpt::new();
        assert_eq!(gpt.resolution(), None);

        assert_eq!(gpt.init(Resolution::Us100), Resolution::Us100);
        // Asking for something else later doesn't reconfigure anything.
        assert_eq!(gpt.init(Resolution::Ms1), Resolution::Us100);
        assert_eq!(gpt.init(Resolution::Us100), Resolution::Us100);
        assert_eq!(gpt.resolution(), Some(Resolution::Us100));
    }

    #[test]
    fn test_init_discards_preinit_registrations() {
        let hits = AtomicUsize::new(0);
        let cb = || {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        let gpt: Gpt<'_, 2> = Gpt::new();

        gpt.register(p(1), &cb).unwrap();
        assert_eq!(gpt.in_use(), 1);

        gpt.init(Resolution::Ms1);
        assert_eq!(gpt.in_use(), 0);

        advance(&gpt, 3);
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_release_then_register_reuses_slot() {
        let old_hits = AtomicUsize::new(0);
        let new_hits = AtomicUsize::new(0);
        let old_cb = || {
            old_hits.fetch_add(1, Ordering::Relaxed);
        };
        let new_cb = || {
            new_hits.fetch_add(1, Ordering::Relaxed);
        };
        let filler = || {};
        let gpt: Gpt<'_, 4> = Gpt::new();

        let a = gpt.register(p(5), &filler).unwrap();
        let b = gpt.register(p(1), &old_cb).unwrap();
        let _c = gpt.register(p(5), &filler).unwrap();

        gpt.tick();
        assert_eq!(old_hits.load(Ordering::Relaxed), 1);

        gpt.release(b);
        let d = gpt.register(p(1), &new_cb).unwrap();
        // First fit: slot b is the lowest free index, so d reuses it.
        assert_eq!(d, b);
        assert_ne!(d, a);

        gpt.tick();
        assert_eq!(new_hits.load(Ordering::Relaxed), 1);
        // The old callback must not fire again through the reused slot.
        assert_eq!(old_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_reset_restarts_countdown() {
        let hits = AtomicUsize::new(0);
        let cb = || {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        let gpt: Gpt<'_, 2> = Gpt::new();

        let id = gpt.register(p(5), &cb).unwrap();
        advance(&gpt, 4); // one tick away from firing
        gpt.reset(id);

        advance(&gpt, 1);
        assert_eq!(hits.load(Ordering::Relaxed), 0, "reset did not rearm");
        advance(&gpt, 4);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_set_period_takes_effect_immediately() {
        let hits = AtomicUsize::new(0);
        let cb = || {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        let gpt: Gpt<'_, 2> = Gpt::new();

        let id = gpt.register(p(100), &cb).unwrap();
        advance(&gpt, 20); // remaining is now 80
        gpt.set_period(id, p(5));

        advance(&gpt, 5);
        assert_eq!(hits.load(Ordering::Relaxed), 1, "new period not honored");
        advance(&gpt, 5);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_release_is_idempotent() {
        let cb = || {};
        let gpt: Gpt<'_, 2> = Gpt::new();

        let a = gpt.register(p(1), &cb).unwrap();
        let _b = gpt.register(p(1), &cb).unwrap();

        gpt.release(a);
        assert_eq!(gpt.in_use(), 1);
        // Double release must not corrupt the live count.
        gpt.release(a);
        assert_eq!(gpt.in_use(), 1);

        assert!(gpt.register(p(1), &cb).is_some());
        assert!(gpt.register(p(1), &cb).is_none());
    }

    #[test]
    fn test_stale_handles_are_ignored_and_counted() {
        let hits = AtomicUsize::new(0);
        let cb = || {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        let gpt: Gpt<'_, 2> = Gpt::new();

        let id = gpt.register(p(3), &cb).unwrap();
        gpt.release(id);
        assert_eq!(gpt.stale_handle_ops(), 0);

        // Operations on the released id fall on the floor.
        gpt.set_period(id, p(1));
        gpt.reset(id);
        assert_eq!(gpt.in_use(), 0);
        assert_eq!(gpt.stale_handle_ops(), 2);

        // As do operations on an id that was never issued.
        gpt.set_period(TimerId(99), p(1));
        assert_eq!(gpt.stale_handle_ops(), 3);

        advance(&gpt, 5);
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_callback_can_release_itself() {
        let slot: OnceLock<TimerId> = OnceLock::new();
        let hits = AtomicUsize::new(0);
        let gpt: Gpt<'_, 2> = Gpt::new();
        let cb = || {
            hits.fetch_add(1, Ordering::Relaxed);
            gpt.release(*slot.get().unwrap());
        };

        slot.set(gpt.register(p(1), &cb).unwrap()).unwrap();

        gpt.tick();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(gpt.in_use(), 0);

        // One-shot: the slot is gone, nothing fires again.
        advance(&gpt, 3);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_callback_can_change_its_own_period() {
        let slot: OnceLock<TimerId> = OnceLock::new();
        let fired_at: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        let gpt: Gpt<'_, 2> = Gpt::new();
        let cb = || {
            fired_at.lock().unwrap().push(gpt.now().0);
            gpt.set_period(*slot.get().unwrap(), p(3));
        };

        slot.set(gpt.register(p(1), &cb).unwrap()).unwrap();

        advance(&gpt, 7);
        // Fires at 1, then every 3 ticks.
        assert_eq!(*fired_at.lock().unwrap(), vec![1, 4, 7]);
    }

    #[test]
    fn test_callback_can_register_another_timer() {
        let spawned_hits = AtomicUsize::new(0);
        let spawned = || {
            spawned_hits.fetch_add(1, Ordering::Relaxed);
        };
        let once = AtomicBool::new(false);
        let filler = || {};
        let filler_slot: OnceLock<TimerId> = OnceLock::new();
        let gpt: Gpt<'_, 2> = Gpt::new();
        let spawner = || {
            if !once.swap(true, Ordering::Relaxed) {
                // Free slot 0, then claim it for the new timer. Slot 0 has
                // already been walked this tick, so the fresh countdown is
                // untouched until the next tick.
                gpt.release(*filler_slot.get().unwrap());
                gpt.register(p(1), &spawned).unwrap();
            }
        };

        filler_slot.set(gpt.register(p(1), &filler).unwrap()).unwrap();
        gpt.register(p(1), &spawner).unwrap();

        gpt.tick();
        assert_eq!(spawned_hits.load(Ordering::Relaxed), 0);
        gpt.tick();
        assert_eq!(spawned_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic]
    fn test_tick_reentry_trips_latch() {
        let gpt: Gpt<'_, 2> = Gpt::new();
        let evil = || gpt.tick();
        gpt.register(p(1), &evil).unwrap();
        gpt.tick();
    }

    #[test]
    fn test_now_advances_and_wraps() {
        let gpt: Gpt<'_, 2> = Gpt::new();
        assert_eq!(gpt.now(), Ticks(0));
        // The counter runs even with an empty table.
        advance(&gpt, 5);
        assert_eq!(gpt.now(), Ticks(5));

        assert_eq!(Ticks(u32::MAX).wrapping_add(1), Ticks(0));
        assert_eq!(Ticks(2).wrapping_since(Ticks(u32::MAX - 1)), 4);
    }

    #[test]
    fn test_capacity_accessor() {
        let gpt: Gpt<'_, 7> = Gpt::new();
        assert_eq!(gpt.capacity(), 7);
        assert_eq!(gpt.in_use(), 0);
    }
}
