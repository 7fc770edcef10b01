//! Hardware Abstraction Layer for the flux engine
//!
//! The engine drives five hardware resources: the pulse timer + DMA pair
//! behind the read-data pin, the capture timer + DMA pair behind the
//! write-data pin, the status output port, the interrupt controller, and
//! the step speaker. Boards implement these traits over their registers;
//! the `mock` module implements them over plain state for host tests.

use crate::clock::Stamp;
use embedded_hal::digital::OutputPin;

/// Error types for HAL operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// GPIO operation failed
    GpioError,
    /// Timer or DMA configuration failed
    TimingError,
    /// Interrupt configuration failed
    InterruptError,
    /// Hardware not initialized
    NotInitialized,
}

#[cfg(feature = "std")]
impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HalError::GpioError => write!(f, "GPIO operation failed"),
            HalError::TimingError => write!(f, "Timer/DMA operation failed"),
            HalError::InterruptError => write!(f, "Interrupt configuration failed"),
            HalError::NotInitialized => write!(f, "Hardware not initialized"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// The read-data side: a PWM timer emitting fixed-width pulses whose
/// spacing is reloaded from a ring buffer by circular DMA.
pub trait FluxOutput {
    /// Point the DMA channel at the sample ring. Called once per mount.
    fn configure(&mut self, buf: *const u16, len: u16);

    /// Enable DMA and timer. The output pin switches to its timer
    /// function only while the drive is selected.
    fn start(&mut self, selected: bool);

    /// Disable DMA and timer; the pin reverts to its idle level.
    fn stop(&mut self);

    /// Route or isolate the pin on a drive-select edge mid-stream.
    fn gate_output(&mut self, selected: bool);

    /// Remaining DMA transfer count (the controller's own consumer state).
    fn residue(&self) -> u16;

    /// Sysclk ticks left in the sample currently playing.
    fn sample_remaining(&self) -> u32;
}

/// The write-data side: an input-capture timer sampling a free-running
/// counter on each falling edge, copied into a ring by circular DMA.
pub trait FluxCapture {
    /// Point the DMA channel at the sample ring. Called once per mount.
    fn configure(&mut self, buf: *mut u16, len: u16);

    /// Reset the transfer count and start capturing edges.
    fn start(&mut self);

    fn stop(&mut self);

    /// Remaining DMA transfer count (the controller's own producer state).
    fn residue(&self) -> u16;
}

/// Status outputs toward the host cable. `mask` is a logical pin mask
/// (see [`crate::outputs::pin`]); boards map it onto physical pins.
pub trait StatusPort {
    fn write_pins(&mut self, mask: u16, active: bool);
}

/// Interrupt plumbing the engine pokes directly: re-pending its own DMA
/// service routines and raising the low-priority step soft-IRQ.
pub trait IrqController {
    fn pend_rdata(&mut self);
    fn pend_wdata(&mut self);
    fn pend_step(&mut self);
    fn enable_flux_irqs(&mut self);
    fn disable_flux_irqs(&mut self);
}

/// Drive-click transducer.
pub trait Speaker {
    fn click(&mut self);
}

/// Monotonic microsecond clock with a short precise delay.
pub trait Clock {
    fn now(&self) -> Stamp;

    /// Busy-wait. Only used for sub-5ms slack at read start and the
    /// write-start settle delay.
    fn delay_us(&self, us: u32);
}

/// Complete board interface for the flux engine.
pub trait FloppyHal {
    type Rdata: FluxOutput;
    type Wdata: FluxCapture;
    type Port: StatusPort;
    type Irq: IrqController;
    type Spkr: Speaker;
    type Clk: Clock;

    fn rdata(&mut self) -> &mut Self::Rdata;
    fn wdata(&mut self) -> &mut Self::Wdata;
    fn port(&mut self) -> &mut Self::Port;
    fn irq(&mut self) -> &mut Self::Irq;
    fn speaker(&mut self) -> &mut Self::Spkr;
    fn clock(&self) -> &Self::Clk;
}

/// Speaker over any push-pull output pin: each click flips the level,
/// which is enough to tick a piezo disc.
pub struct PushPullSpeaker<P> {
    pin: P,
    level: bool,
}

impl<P> PushPullSpeaker<P>
where
    P: OutputPin,
{
    pub fn new(pin: P) -> Self {
        Self { pin, level: false }
    }
}

impl<P> Speaker for PushPullSpeaker<P>
where
    P: OutputPin,
{
    fn click(&mut self) {
        self.level = !self.level;
        let _ = if self.level {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Mock implementations for testing

    use super::*;
    use crate::ring::RING_LEN;
    use core::sync::atomic::{AtomicU32, Ordering};

    /// Mock pulse-timer/DMA pair. Tests move the DMA consumer by setting
    /// the residue and account for in-flight sample progress explicitly.
    #[derive(Default)]
    pub struct MockFluxOutput {
        pub configured: bool,
        pub running: bool,
        pub output_gated: bool,
        pub residue: u16,
        pub sample_remaining: u32,
        pub starts: u32,
    }

    impl MockFluxOutput {
        pub fn new() -> Self {
            Self {
                residue: RING_LEN as u16,
                ..Self::default()
            }
        }

        /// Advance the simulated DMA consumer by `n` samples.
        pub fn consume(&mut self, n: u16) {
            let pos = RING_LEN as u16 - self.residue;
            let new_pos = (pos + n) % RING_LEN as u16;
            self.residue = RING_LEN as u16 - new_pos;
        }
    }

    impl FluxOutput for MockFluxOutput {
        fn configure(&mut self, _buf: *const u16, len: u16) {
            assert_eq!(len as usize, RING_LEN);
            self.configured = true;
        }

        fn start(&mut self, selected: bool) {
            self.running = true;
            self.output_gated = selected;
            self.starts += 1;
        }

        fn stop(&mut self) {
            self.running = false;
            self.output_gated = false;
            self.residue = RING_LEN as u16;
        }

        fn gate_output(&mut self, selected: bool) {
            self.output_gated = selected;
        }

        fn residue(&self) -> u16 {
            self.residue
        }

        fn sample_remaining(&self) -> u32 {
            self.sample_remaining
        }
    }

    /// Mock capture-timer/DMA pair. Tests write captured samples into the
    /// engine's ring directly and advance the producer via the residue.
    #[derive(Default)]
    pub struct MockFluxCapture {
        pub configured: bool,
        pub running: bool,
        pub residue: u16,
        pub starts: u32,
    }

    impl MockFluxCapture {
        pub fn new() -> Self {
            Self {
                residue: RING_LEN as u16,
                ..Self::default()
            }
        }

        /// Advance the simulated DMA producer by `n` samples.
        pub fn produce(&mut self, n: u16) {
            let pos = RING_LEN as u16 - self.residue;
            let new_pos = (pos + n) % RING_LEN as u16;
            self.residue = RING_LEN as u16 - new_pos;
        }
    }

    impl FluxCapture for MockFluxCapture {
        fn configure(&mut self, _buf: *mut u16, len: u16) {
            assert_eq!(len as usize, RING_LEN);
            self.configured = true;
        }

        fn start(&mut self) {
            self.residue = RING_LEN as u16;
            self.running = true;
            self.starts += 1;
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn residue(&self) -> u16 {
            self.residue
        }
    }

    /// Mock status port recording the levels actually driven on the cable.
    #[derive(Default)]
    pub struct MockStatusPort {
        pub pins: u16,
        pub writes: u32,
    }

    impl MockStatusPort {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_active(&self, mask: u16) -> bool {
            self.pins & mask == mask
        }
    }

    impl StatusPort for MockStatusPort {
        fn write_pins(&mut self, mask: u16, active: bool) {
            if active {
                self.pins |= mask;
            } else {
                self.pins &= !mask;
            }
            self.writes += 1;
        }
    }

    /// Mock interrupt controller counting pend requests.
    #[derive(Default)]
    pub struct MockIrqController {
        pub rdata_pends: u32,
        pub wdata_pends: u32,
        pub step_pends: u32,
        pub flux_irqs_enabled: bool,
    }

    impl MockIrqController {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl IrqController for MockIrqController {
        fn pend_rdata(&mut self) {
            self.rdata_pends += 1;
        }

        fn pend_wdata(&mut self) {
            self.wdata_pends += 1;
        }

        fn pend_step(&mut self) {
            self.step_pends += 1;
        }

        fn enable_flux_irqs(&mut self) {
            self.flux_irqs_enabled = true;
        }

        fn disable_flux_irqs(&mut self) {
            self.flux_irqs_enabled = false;
        }
    }

    /// Mock speaker counting clicks.
    #[derive(Default)]
    pub struct MockSpeaker {
        pub clicks: u32,
    }

    impl MockSpeaker {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Speaker for MockSpeaker {
        fn click(&mut self) {
            self.clicks += 1;
        }
    }

    /// Manually-advanced clock. `delay_us` advances time, so busy-waits
    /// terminate under test.
    pub struct MockClock {
        now: AtomicU32,
    }

    impl MockClock {
        pub fn new() -> Self {
            Self {
                now: AtomicU32::new(0),
            }
        }

        pub fn advance_us(&self, us: u32) {
            self.now.fetch_add(us, Ordering::Relaxed);
        }

        pub fn advance_ms(&self, ms: u32) {
            self.advance_us(ms * 1000);
        }

        pub fn set(&self, t: Stamp) {
            self.now.store(t, Ordering::Relaxed);
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Stamp {
            self.now.load(Ordering::Relaxed)
        }

        fn delay_us(&self, us: u32) {
            self.now.fetch_add(us, Ordering::Relaxed);
        }
    }

    /// Mock board aggregating all the pieces.
    #[derive(Default)]
    pub struct MockFloppyHal {
        pub rdata: MockFluxOutput,
        pub wdata: MockFluxCapture,
        pub port: MockStatusPort,
        pub irq: MockIrqController,
        pub speaker: MockSpeaker,
        pub clock: MockClock,
    }

    impl MockFloppyHal {
        pub fn new() -> Self {
            Self {
                rdata: MockFluxOutput::new(),
                wdata: MockFluxCapture::new(),
                ..Self::default()
            }
        }
    }

    impl FloppyHal for MockFloppyHal {
        type Rdata = MockFluxOutput;
        type Wdata = MockFluxCapture;
        type Port = MockStatusPort;
        type Irq = MockIrqController;
        type Spkr = MockSpeaker;
        type Clk = MockClock;

        fn rdata(&mut self) -> &mut Self::Rdata {
            &mut self.rdata
        }

        fn wdata(&mut self) -> &mut Self::Wdata {
            &mut self.wdata
        }

        fn port(&mut self) -> &mut Self::Port {
            &mut self.port
        }

        fn irq(&mut self) -> &mut Self::Irq {
            &mut self.irq
        }

        fn speaker(&mut self) -> &mut Self::Spkr {
            &mut self.speaker
        }

        fn clock(&self) -> &Self::Clk {
            &self.clock
        }
    }
}
