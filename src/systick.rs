// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cortex-M frontend: the SysTick timer as the hardware tick source.
//!
//! **Note:** this module is only available on ARM targets with the
//! `systick` feature, which is on by default.
//!
//! This wires the portable timer service to the one piece of timing
//! hardware every Cortex-M has: a process-wide table of [`GPT_SLOTS`]
//! timers, a SysTick configuration helper, and the exception handler that
//! advances the table.
//!
//! Application startup calls [`initialize_gpt`] once with the core clock
//! frequency and the desired [`Resolution`]; every driver that wants a
//! periodic callback then goes through [`gpt()`]:
//!
//! ```ignore
//! let mut cp = cortex_m::Peripherals::take().unwrap();
//! systick::initialize_gpt(&mut cp.SYST, 16_000_000, Resolution::Ms1);
//!
//! let id = systick::gpt()
//!     .register(NonZeroU16::new(500).unwrap(), &toggle_led)
//!     .expect("timer table full");
//! ```
//!
//! Initialization is idempotent: only the first call programs SysTick, and
//! every call returns the resolution actually in effect. Drivers that are
//! indifferent to who boots the timer can all call `initialize_gpt`
//! defensively and then check the returned resolution against their own
//! timing needs.
//!
//! If SysTick is unavailable (some vendors' low-power modes stop it) or a
//! different resolution is needed, skip this module: instantiate your own
//! `static` [`Gpt`] and call its `tick` from whatever timer interrupt you
//! configure. This module has no special privileges.

use cortex_m::peripheral::{syst::SystClkSource, SYST};
use cortex_m_rt::exception;

use crate::gpt::{Gpt, Resolution};

/// Capacity of the shared timer table.
pub const GPT_SLOTS: usize = 10;

/// The process-wide timer table, advanced by the SysTick exception.
static GPT: Gpt<'static, GPT_SLOTS> = Gpt::new();

/// Returns the shared timer service.
///
/// Callable from anywhere, including timer callbacks; note that before
/// [`initialize_gpt`] has run, registered timers exist but do not advance
/// (and the first initialization discards them).
pub fn gpt() -> &'static Gpt<'static, GPT_SLOTS> {
    &GPT
}

/// Configures SysTick as the tick source and initializes the shared timer
/// table, assuming a CPU core clock of `clock_hz`.
///
/// Only the first call does anything: it programs SysTick to interrupt at
/// the requested resolution (1 kHz or 10 kHz), enables the counter, and
/// records the resolution. Any later call returns the recorded resolution
/// without touching the hardware, so the tick cadence never changes once
/// chosen.
pub fn initialize_gpt(
    syst: &mut SYST,
    clock_hz: u32,
    resolution: Resolution,
) -> Resolution {
    if let Some(configured) = GPT.resolution() {
        return configured;
    }

    let reload = clock_hz / resolution.ticks_per_second();
    syst.set_reload(reload - 1);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_interrupt();
    syst.enable_counter();

    GPT.init(resolution)
}

/// Tick ISR. Counts every armed timer down and fires the due ones.
#[doc(hidden)]
#[exception]
fn SysTick() {
    GPT.tick();
}
