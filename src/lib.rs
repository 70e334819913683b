//! A software timer multiplexer for bare-metal systems.
//!
//! Small microcontrollers have a handful of hardware timers and an
//! application's worth of things that want periodic attention: motor phase
//! sequencing, display multiplexing, keep-alive blinking, protocol timeouts.
//! `tickmux` spends *one* hardware timer -- any peripheral that can raise a
//! periodic interrupt at a fixed resolution -- and multiplexes it into a
//! fixed-size table of software timers, each with its own period and
//! callback.
//!
//! # Design principles
//!
//! 1. Be compact. No allocation, no collections, no panicking APIs. The
//!    whole service is a fixed array of slots plus a tick counter.
//!
//! 2. Be predictable. Slots fire in table order within a tick, registration
//!    is first-fit by index, and a timer registered with period `p` fires
//!    after exactly `p` ticks -- not `p ± 1`.
//!
//! 3. Be portable. The core does not touch hardware. It runs anywhere
//!    `critical-section` has an implementation, which includes the host:
//!    the test suite drives [`gpt::Gpt::tick`] directly instead of needing a
//!    target board.
//!
//! # About the service
//!
//! The [`gpt`] module is the heart of the crate: a table of timer slots,
//! foreground operations to claim and manage them, and the tick handler that
//! the hardware interrupt calls once per resolution unit. See its module
//! docs for the concurrency story.
//!
//! The [`extint`] module is the same table idiom applied to edge-triggered
//! input lines: a fixed array of (trigger, callback) entries dispatched
//! directly from interrupt context, with no tick involved.
//!
//! On ARM targets the `systick` module (feature `"systick"`) provides a
//! ready-made frontend: a `static` ten-slot table, SysTick configuration for
//! 1 ms or 0.1 ms resolution, and the exception handler that drives it.
//! On other targets, or with the feature off, you own the hardware timer and
//! call `tick()` from its interrupt yourself.
//!
//! # Using it
//!
//! ```ignore
//! use tickmux::gpt::Resolution;
//! use tickmux::systick;
//!
//! fn blink() {
//!     // toggle the alive LED
//! }
//!
//! // At startup, once:
//! let mut cp = cortex_m::Peripherals::take().unwrap();
//! systick::initialize_gpt(&mut cp.SYST, CLOCK_HZ, Resolution::Ms1);
//!
//! // Anywhere afterwards:
//! let blinker = systick::gpt()
//!     .register(core::num::NonZeroU16::new(1000).unwrap(), &blink);
//! ```
//!
//! Initialization is idempotent on purpose: independent drivers can each
//! call `initialize_gpt` defensively, and only the first call configures
//! hardware. The rest observe the resolution the first caller chose.

#![cfg_attr(not(test), no_std)]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

/// Internal assert macro that doesn't stringify its expression or generate any
/// fancy messages. This means failures must be diagnosed by file:line only, so,
/// don't use this more than once on the same line. In exchange, this makes
/// asserts significantly smaller in terms of text size.
macro_rules! cheap_assert {
    ($x:expr) => {
        if !$x { panic!(); };
    }
}
pub(crate) use cheap_assert;

pub mod gpt;

#[cfg(feature = "extint")]
pub mod extint;

#[cfg(all(feature = "systick", target_arch = "arm"))]
pub mod systick;
