//! Core data types for the floppy emulation engine

use core::sync::atomic::{AtomicU8, Ordering};

/// State of one DMA-driven flux channel.
///
/// Read side (RDATA): `Inactive` means no activity and an empty ring;
/// `Starting` means the ring is filling but DMA and timer are not yet
/// running; `Active` means DMA is feeding the timer; `Stopping` means DMA
/// and timer are halted and the ring is waiting to be cleared.
///
/// Write side (WDATA): `Starting` means flux capture is already running and
/// the MFM buffer is filling; `Active` means writeback to mass storage is
/// in progress; `Stopping` means capture is halted and the buffers are
/// draining.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DmaState {
    /// No activity. -> {Starting, Active}
    Inactive = 0,
    /// Buffers filling. -> {Active, Stopping}
    Starting = 1,
    /// Stream running. -> {Stopping}
    Active = 2,
    /// Halted, buffers draining. -> {Inactive}
    Stopping = 3,
}

impl DmaState {
    const fn from_bits(bits: u8) -> DmaState {
        match bits {
            0 => DmaState::Inactive,
            1 => DmaState::Starting,
            2 => DmaState::Active,
            _ => DmaState::Stopping,
        }
    }
}

/// A [`DmaState`] shared between ISR and foreground contexts.
///
/// The state field is the sole synchronisation protocol between the DMA
/// service routines and the foreground loop, so every access is SeqCst.
pub struct AtomicDmaState(AtomicU8);

impl AtomicDmaState {
    pub const fn new(state: DmaState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> DmaState {
        DmaState::from_bits(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: DmaState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Resolves races on the Starting boundary (e.g. start vs. stop).
    pub fn compare_exchange(&self, current: DmaState, new: DmaState) -> Result<(), DmaState> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(DmaState::from_bits)
    }
}

/// Drive geometry and timing configuration.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FloppyConfig {
    /// One revolution, in milliseconds (300 RPM).
    pub ms_per_rev: u32,
    /// Index pulse width, in milliseconds.
    pub index_pulse_ms: u32,
    /// Head settle time after a step, in milliseconds.
    pub settle_ms: u32,
    /// Rotational window allowed for loading a new track before the read
    /// stream must start, in milliseconds.
    pub seek_ahead_ms: u32,
    /// Delay after write capture starts, in microseconds. Some hosts
    /// (X-Copy style) glitch the first edge without it.
    pub write_settle_us: u32,
}

impl Default for FloppyConfig {
    fn default() -> Self {
        Self {
            ms_per_rev: 200,
            index_pulse_ms: 2,
            settle_ms: 12,
            seek_ahead_ms: 10,
            write_settle_us: 100,
        }
    }
}

impl FloppyConfig {
    /// Create a configuration with validation.
    pub fn new(
        ms_per_rev: u32,
        index_pulse_ms: u32,
        settle_ms: u32,
        seek_ahead_ms: u32,
    ) -> Result<Self, &'static str> {
        if ms_per_rev < 100 || ms_per_rev > 400 {
            return Err("revolution must be between 100ms and 400ms");
        }
        if index_pulse_ms == 0 || index_pulse_ms >= ms_per_rev {
            return Err("index pulse must be shorter than a revolution");
        }
        if settle_ms > 100 {
            return Err("settle time must be <= 100ms");
        }
        if seek_ahead_ms == 0 || seek_ahead_ms >= ms_per_rev / 2 {
            return Err("seek-ahead must be under half a revolution");
        }
        Ok(Self {
            ms_per_rev,
            index_pulse_ms,
            settle_ms,
            seek_ahead_ms,
            ..Self::default()
        })
    }

    /// Nominal drive speed in RPM.
    pub fn rpm(&self) -> u32 {
        60_000 / self.ms_per_rev
    }
}
