//! Drive state and the two-tier head-step engine
//!
//! Step pulses arrive on a high-priority external interrupt that must
//! never delay the flux DMA paths, so it only records the pulse and
//! raises a low-priority soft-IRQ. The soft-IRQ latches the step and arms
//! a timer; the timer moves the head, drives track-0 and the speaker, and
//! walks the settle window. A settle completing under a fresh pulse loses
//! the final compare-and-swap and is silently dropped.

use crate::clock::{stamp_add, stamp_ms, SoftTimer, Stamp};
use crate::hal::{FloppyHal, Speaker};
use crate::outputs::{pin, OutputMux};
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// Pulse recorded by the high-priority ISR, cleared by the soft-IRQ.
pub const STEP_STARTED: u8 = 1;
/// Latched by the soft-IRQ, cleared by the timer.
pub const STEP_LATCHED: u8 = 2;
/// A step is in progress in either tier.
pub const STEP_ACTIVE: u8 = STEP_STARTED | STEP_LATCHED;
/// Head moved, settle window running.
pub const STEP_SETTLING: u8 = 4;

/// Delay from pulse to latch, absorbing direction-line skew.
const LATCH_MS: u32 = 2;

/// Outward steps from beyond this cylinder snap here first, absorbing a
/// fast step-back from cylinder 255.
const OUTWARD_CLAMP_CYL: u8 = 84;

/// The head-step state machine. All fields are shared with interrupt
/// context; the `state` byte is the handshake.
pub struct StepMachine {
    state: AtomicU8,
    inward: AtomicBool,
    start: AtomicU32,
    pub timer: SoftTimer,
}

impl StepMachine {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
            inward: AtomicBool::new(false),
            start: AtomicU32::new(0),
            timer: SoftTimer::new(),
        }
    }

    /// High-priority pulse entry. Returns true if the pulse was accepted
    /// and the caller should raise the soft-IRQ. Pulses during an
    /// in-progress step are ignored; a pulse during settle restarts.
    pub fn pulse(&self, now: Stamp, inward: bool) -> bool {
        if self.state.load(Ordering::Acquire) & STEP_ACTIVE != 0 {
            return false;
        }
        // Direction and start time land before the state publishes them.
        self.inward.store(inward, Ordering::Relaxed);
        self.start.store(now, Ordering::Relaxed);
        self.state.store(STEP_STARTED, Ordering::Release);
        true
    }

    /// Low-priority soft-IRQ: latch the pulse and arm the movement timer.
    pub fn soft_irq(&self) {
        if self.state.load(Ordering::Acquire) == STEP_STARTED {
            self.timer.cancel();
            self.state.store(STEP_LATCHED, Ordering::Release);
            self.timer
                .set(stamp_add(self.start(), stamp_ms(LATCH_MS)));
        }
    }

    pub fn raw_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn settling(&self) -> bool {
        self.raw_state() & STEP_SETTLING != 0
    }

    pub fn active(&self) -> bool {
        self.raw_state() & STEP_ACTIVE != 0
    }

    /// Stamp of the most recent accepted pulse.
    pub fn start(&self) -> Stamp {
        self.start.load(Ordering::Relaxed)
    }

    pub fn inward(&self) -> bool {
        self.inward.load(Ordering::Relaxed)
    }

    /// Drop all step state, e.g. on eject.
    pub fn clear(&self) {
        self.timer.cancel();
        self.state.store(0, Ordering::Release);
    }
}

impl Default for StepMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// The emulated unit. Tracks head movement and side changes at all times,
/// even while the drive is empty.
pub struct Drive {
    pub cyl: AtomicU8,
    pub head: AtomicU8,
    pub sel: AtomicBool,
    pub step: StepMachine,
}

impl Drive {
    pub const fn new() -> Self {
        Self {
            cyl: AtomicU8::new(0),
            head: AtomicU8::new(0),
            sel: AtomicBool::new(false),
            step: StepMachine::new(),
        }
    }

    pub fn selected(&self) -> bool {
        self.sel.load(Ordering::Relaxed)
    }

    /// Image track for the current head position.
    pub fn track(&self) -> u16 {
        self.cyl.load(Ordering::Relaxed) as u16 * 2 + self.head.load(Ordering::Relaxed) as u16
    }

    /// Step timer service routine, called at the low tier when the step
    /// timer fires.
    pub fn step_timer<H: FloppyHal>(&self, mux: &OutputMux, hal: &mut H, settle_ms: u32) {
        match self.step.state.load(Ordering::Acquire) {
            STEP_STARTED => {
                // Stale deadline; the soft-IRQ re-arms it.
            }
            STEP_LATCHED => {
                hal.speaker().click();
                let inward = self.step.inward();
                let mut cyl = self.cyl.load(Ordering::Relaxed);
                if cyl >= OUTWARD_CLAMP_CYL && !inward {
                    cyl = OUTWARD_CLAMP_CYL;
                }
                if inward {
                    cyl = cyl.saturating_add(1);
                } else if cyl > 0 {
                    cyl -= 1;
                }
                self.cyl.store(cyl, Ordering::Relaxed);
                self.step
                    .timer
                    .set(stamp_add(self.step.start(), stamp_ms(settle_ms)));
                mux.change(hal.port(), self.selected(), pin::TRK0, cyl == 0);
                // New state last; the cylinder write must be visible
                // before the high tier may accept another pulse.
                self.step.state.store(STEP_SETTLING, Ordering::Release);
            }
            STEP_SETTLING => {
                // Can race a fresh pulse; the pulse wins.
                let _ = self.step.state.compare_exchange(
                    STEP_SETTLING,
                    0,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            _ => {}
        }
    }
}

impl Default for Drive {
    fn default() -> Self {
        Self::new()
    }
}
