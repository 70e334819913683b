// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dispatch table for external edge-triggered interrupt lines.
//!
//! This is the timer table's simpler sibling: a fixed array of input lines,
//! each of which can be claimed by exactly one callback, fired directly from
//! the line's interrupt handler. No tick, no countdown -- just event in,
//! callback out.
//!
//! The split of responsibilities is deliberate. This module owns the
//! bookkeeping: which line is claimed, with what trigger, by which callback.
//! The application owns the hardware: it programs its pin/EXTI registers
//! from the recorded [`Trigger`] when a claim succeeds, and its interrupt
//! handlers call [`ExtInt::dispatch`] with the line number that fired.
//!
//! ```ignore
//! static BUTTONS: ExtInt<'static> = ExtInt::new();
//!
//! fn on_limit_switch() { /* stop the motor */ }
//!
//! // Foreground setup:
//! BUTTONS.claim(3, Trigger::FallingEdge, &on_limit_switch).unwrap();
//! // ...program the vendor EXTI registers for line 3, falling edge...
//!
//! // In the line-3 interrupt handler:
//! BUTTONS.dispatch(3);
//! ```
//!
//! Unlike the timer table there is no first-fit allocation: a line number is
//! a physical identity, so you claim the line you wired. Claiming a line
//! someone else holds is refused; releasing is unconditional.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::gpt::Callback;

/// Number of physical edge-interrupt lines on the reference hardware.
pub const EXTINT_LINES: usize = 8;

/// Hardware sense condition a claimed line should fire on.
///
/// The discriminants follow the conventional two-bit sense-control encoding,
/// so `trigger as u8` can be shifted straight into a configuration register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Trigger {
    /// Fire for as long as the line is held low.
    LevelLow = 0,
    /// Fire on any logical change.
    AnyEdge = 1,
    /// Fire on a falling edge.
    FallingEdge = 2,
    /// Fire on a rising edge.
    RisingEdge = 3,
}

/// Why a [`claim`][ExtInt::claim] was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClaimError {
    /// The line number does not exist on this table.
    LineOutOfRange,
    /// Another callback already holds the line; release it first.
    LineInUse,
}

/// A claimed line: the requested sense condition and the callback to run.
struct Line<'a> {
    trigger: Trigger,
    callback: Callback<'a>,
}

impl<'a> Line<'a> {
    /// Named constant so `[Line::NONE; N]` works without `Line: Copy`.
    const NONE: Option<Line<'a>> = None;
}

/// Fixed-size dispatch table mapping interrupt lines to callbacks.
///
/// `LINES` defaults to [`EXTINT_LINES`]. Like the timer table, `new` is
/// `const` and all operations take `&self`, so the natural home is a
/// `static` shared between setup code and interrupt handlers.
pub struct ExtInt<'a, const LINES: usize = EXTINT_LINES> {
    lines: Mutex<RefCell<[Option<Line<'a>>; LINES]>>,
}

impl<'a, const LINES: usize> ExtInt<'a, LINES> {
    /// Creates a table with every line unclaimed.
    pub const fn new() -> Self {
        Self {
            lines: Mutex::new(RefCell::new([Line::NONE; LINES])),
        }
    }

    /// Claims `line`, recording the trigger condition and the callback to
    /// invoke when it fires.
    ///
    /// Fails if the line number is out of range or the line is already
    /// claimed; an existing claim is never overwritten. On success the
    /// caller is expected to configure the matching hardware sense bits
    /// (see the module docs).
    pub fn claim(
        &self,
        line: usize,
        trigger: Trigger,
        callback: Callback<'a>,
    ) -> Result<(), ClaimError> {
        critical_section::with(|cs| {
            let mut lines = self.lines.borrow_ref_mut(cs);
            let slot =
                lines.get_mut(line).ok_or(ClaimError::LineOutOfRange)?;
            if slot.is_some() {
                return Err(ClaimError::LineInUse);
            }
            *slot = Some(Line { trigger, callback });
            Ok(())
        })
    }

    /// Releases `line` unconditionally.
    ///
    /// Releasing an unclaimed or out-of-range line does nothing. The caller
    /// should disable the line's interrupt before releasing, or tolerate a
    /// final dispatch that finds the line unclaimed (which is silent).
    pub fn release(&self, line: usize) {
        critical_section::with(|cs| {
            if let Some(slot) = self.lines.borrow_ref_mut(cs).get_mut(line) {
                *slot = None;
            }
        });
    }

    /// Trigger condition recorded for `line`, or `None` if unclaimed.
    ///
    /// This is what hardware glue reads back to program sense-control
    /// registers.
    pub fn trigger(&self, line: usize) -> Option<Trigger> {
        critical_section::with(|cs| {
            self.lines
                .borrow_ref(cs)
                .get(line)
                .and_then(|slot| slot.as_ref().map(|l| l.trigger))
        })
    }

    /// Invokes the callback claimed on `line`, if any.
    ///
    /// This is the interrupt-context entry point: call it from the line's
    /// interrupt handler. Unclaimed and out-of-range lines are silently
    /// ignored, which covers the window between a hardware event and a
    /// racing [`release`][ExtInt::release].
    ///
    /// The callback runs outside the table's critical section, so it may
    /// claim or release lines itself, including its own.
    pub fn dispatch(&self, line: usize) {
        let callback = critical_section::with(|cs| {
            self.lines
                .borrow_ref(cs)
                .get(line)
                .and_then(|slot| slot.as_ref().map(|l| l.callback))
        });
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl<const LINES: usize> Default for ExtInt<'_, LINES> {
    fn default() -> Self {
        Self::new()
    }
}

/// Implement Debug by hand: callbacks have nothing useful to print, so show
/// the claim map instead.
impl<const LINES: usize> core::fmt::Debug for ExtInt<'_, LINES> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut claimed = [None; LINES];
        critical_section::with(|cs| {
            let lines = self.lines.borrow_ref(cs);
            for (slot, out) in lines.iter().zip(claimed.iter_mut()) {
                *out = slot.as_ref().map(|l| l.trigger);
            }
        });
        f.debug_struct("ExtInt").field("lines", &claimed).finish()
    }
}
