//! Read engine: image flux out to the read-data pin
//!
//! The pulse timer emits a fixed-width pulse per flux transition; circular
//! DMA reloads the inter-pulse interval from the sample ring. The
//! foreground loop arms a read against a sync deadline tied to the virtual
//! index, prefills the ring, starts the stream on time, and keeps the
//! image's staging buffers topped up. The DMA service routine refills the
//! ring and, when the image wraps its internal index mark, re-synchronises
//! the index timer to the emitted bitstream.

use crate::clock::{
    stamp_add, stamp_delta, stamp_ms, stamp_since, sysclk_us, ticks_to_us, Stamp,
};
use crate::hal::{Clock, FloppyHal, FluxOutput, IrqController};
use crate::image::{Image, Seek, TrackBuffers};
use crate::index::IndexScheduler;
use crate::ring::{dma_pos, ReadRing, RING_LEN, RING_MASK};
use crate::step::{Drive, STEP_ACTIVE, STEP_SETTLING};
use crate::types::{AtomicDmaState, DmaState, FloppyConfig};
use core::sync::atomic::{AtomicBool, Ordering};

/// Slack below which the foreground loop busy-waits for the sync deadline
/// instead of yielding.
const SYNC_WAIT_MS: u32 = 5;

pub struct ReadEngine {
    pub(crate) state: AtomicDmaState,
    /// Set by the DMA service routine when the image buffers ran dry.
    kick_dma_irq: AtomicBool,
    pub(crate) ring: ReadRing,
    /// Deadline at which the stream must start so the image's index mark
    /// lands on the emulated rotational index.
    sync_time: Stamp,
    /// Worst observed track-buffering time, microseconds.
    max_read_us: u32,
}

impl ReadEngine {
    pub const fn new() -> Self {
        Self {
            state: AtomicDmaState::new(DmaState::Inactive),
            kick_dma_irq: AtomicBool::new(false),
            ring: ReadRing::new(),
            sync_time: 0,
            max_read_us: 0,
        }
    }

    pub fn state(&self) -> DmaState {
        self.state.load()
    }

    /// Ring storage for pointing the DMA channel at.
    pub fn buf(&self) -> (*const u16, u16) {
        (self.ring.buf.as_ptr(), RING_LEN as u16)
    }

    /// Fresh-mount / post-eject reset.
    pub fn reset(&mut self) {
        self.state.store(DmaState::Inactive);
        self.kick_dma_irq.store(false, Ordering::Relaxed);
        self.ring.reset();
        self.max_read_us = 0;
    }

    /// Force a pass through the Stopping arm, clearing any stale stream.
    pub fn force_stop(&self) {
        self.state.store(DmaState::Stopping);
    }

    /// Foreground service. Returns true if the caller should re-enter
    /// soon (a seek is still in flight).
    pub fn handle<H: FloppyHal, I: Image>(
        &mut self,
        hal: &mut H,
        image: &mut I,
        bufs: &mut TrackBuffers,
        drive: &Drive,
        index: &IndexScheduler,
        wdata_state: &AtomicDmaState,
        cfg: &FloppyConfig,
    ) -> bool {
        match self.state.load() {
            DmaState::Inactive => {
                let now = hal.clock().now();
                // Allow a rotational window to load the new track.
                let mut delay = stamp_ms(cfg.seek_ahead_ms) as i32;
                // Allow extra if the heads are still settling.
                if drive.step.raw_state() & STEP_SETTLING != 0 {
                    let settle_end =
                        stamp_add(drive.step.start(), stamp_ms(cfg.settle_ms));
                    delay = delay.max(stamp_delta(now, settle_end));
                }
                // No data fetch while stepping. The settle check above
                // must precede this load.
                if drive.step.raw_state() & STEP_ACTIVE != 0 {
                    return false;
                }
                // Where in the new track to start reading from.
                let index_time = index.prev_time();
                let mut pos = stamp_since(now, index_time) + delay;
                if pos > stamp_ms(cfg.ms_per_rev) as i32 {
                    pos -= stamp_ms(cfg.ms_per_rev) as i32;
                }
                let track = drive.track();
                let mut pos_ticks = sysclk_us(pos as u32);
                if image.seek_track(track, Some(&mut pos_ticks)) == Seek::Busy {
                    return true;
                }
                // Set the deadline from the codec-aligned position.
                self.sync_time = stamp_add(index_time, ticks_to_us(pos_ticks));
                if stamp_delta(now, self.sync_time) < 0 {
                    self.sync_time =
                        stamp_add(self.sync_time, stamp_ms(cfg.ms_per_rev));
                }
                // Publish the state, then re-check for a racing step,
                // side change or write-gate.
                self.state.store(DmaState::Starting);
                if drive.step.raw_state() & STEP_ACTIVE != 0
                    || track != drive.track()
                    || wdata_state.load() != DmaState::Inactive
                {
                    self.state.store(DmaState::Stopping);
                }
            }

            DmaState::Starting => {
                self.read_data(hal, image, bufs);
                self.sync_flux(hal, image, bufs, drive);
            }

            DmaState::Active => {
                self.read_data(hal, image, bufs);
            }

            DmaState::Stopping => {
                self.state.store(DmaState::Inactive);
                // Reinitialise the ring to empty.
                self.ring.reset();
                // Resume the free-running index timer.
                if !index.active() {
                    index
                        .timer
                        .set(stamp_add(index.prev_time(), stamp_ms(cfg.ms_per_rev)));
                }
            }
        }

        false
    }

    /// Replenish image staging and kick the DMA service routine if it
    /// asked for more data.
    fn read_data<H: FloppyHal, I: Image>(
        &mut self,
        hal: &mut H,
        image: &mut I,
        bufs: &mut TrackBuffers,
    ) {
        let before = hal.clock().now();
        if image.read_track(bufs) && self.kick_dma_irq.load(Ordering::Acquire) {
            self.kick_dma_irq.store(false, Ordering::Release);
            hal.irq().pend_rdata();
        }
        let read_us = stamp_since(hal.clock().now(), before).max(0) as u32;
        if read_us > self.max_read_us {
            self.max_read_us = read_us;
            #[cfg(feature = "defmt")]
            defmt::info!("new max: read_us={}", read_us);
        }
    }

    /// Prefill the ring and start the stream on the sync deadline.
    fn sync_flux<H: FloppyHal, I: Image>(
        &mut self,
        hal: &mut H,
        image: &mut I,
        bufs: &mut TrackBuffers,
        drive: &Drive,
    ) {
        let prod = self.ring.prod as usize;
        let nr = RING_LEN - prod - 1;
        if nr != 0 {
            let done = image.rdata_flux(bufs, &mut self.ring.buf[prod..prod + nr]);
            self.ring.prod += done as u16;
        }

        if (self.ring.prod as usize) < RING_LEN / 2 {
            return;
        }

        let now = hal.clock().now();
        let slack = stamp_delta(now, self.sync_time) - 1;
        if slack > stamp_ms(SYNC_WAIT_MS) as i32 {
            // Ages to wait; go do other work.
            return;
        }
        if slack > 0 {
            hal.clock().delay_us(slack as u32);
        }
        let _sync_us = stamp_delta(hal.clock().now(), self.sync_time);
        self.start(hal, drive.selected());
        #[cfg(feature = "defmt")]
        defmt::info!("trk {}: sync_us={}", image.current_track(), _sync_us);
    }

    /// Start DMA and timer. Loses to a concurrent stop.
    fn start<H: FloppyHal>(&self, hal: &mut H, selected: bool) {
        critical_section::with(|_| {
            if self
                .state
                .compare_exchange(DmaState::Starting, DmaState::Active)
                .is_ok()
            {
                hal.rdata().start(selected);
            }
        });
    }

    /// Stop the stream. Safe from interrupt context.
    pub fn stop<H: FloppyHal>(&self, hal: &mut H) {
        let prev = self.state.load();
        if prev == DmaState::Inactive {
            return;
        }
        self.state.store(DmaState::Stopping);
        // Peripherals were only touched once Active.
        if prev != DmaState::Active {
            return;
        }
        hal.rdata().stop();
    }

    /// DMA half/full-transfer service routine.
    pub fn dma_isr<H: FloppyHal, I: Image>(
        &mut self,
        hal: &mut H,
        image: &mut I,
        bufs: &mut TrackBuffers,
        index: &IndexScheduler,
    ) {
        // Called in the wrong state (e.g. a drain kick after stop): bail.
        if self.state.load() != DmaState::Active {
            return;
        }

        let dmacons = dma_pos(hal.rdata().residue());
        if self.ring.underrun(dmacons) {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "rdata underrun! {:x}-{:x}-{:x}",
                self.ring.cons,
                self.ring.prod,
                dmacons
            );
        }
        self.ring.cons = dmacons;

        // Largest contiguous stretch we can fill.
        let nr_to_cons = dmacons.wrapping_sub(self.ring.prod).wrapping_sub(1) & RING_MASK;
        let nr = (RING_LEN as u16 - self.ring.prod).min(nr_to_cons);
        if nr == 0 {
            return; // ring already full
        }

        let prev_ticks_since_index = image.ticks_since_index();
        let prod = self.ring.prod as usize;
        let done = image.rdata_flux(bufs, &mut self.ring.buf[prod..prod + nr as usize]);
        self.ring.prod = (self.ring.prod + done as u16) & RING_MASK;
        if done != nr as usize {
            // Image staging ran dry: kick us when more data arrives.
            self.kick_dma_irq.store(true, Ordering::Release);
        } else if nr != nr_to_cons {
            // Didn't reach the consumer: re-enter to fill past the wrap.
            hal.irq().pend_rdata();
        }

        // Done unless the image just wrapped across its index mark.
        if image.ticks_since_index() >= prev_ticks_since_index {
            return;
        }

        // Synchronise the index pulse to the bitstream: total ticks still
        // queued ahead of the mark, taken from a consistent snapshot of
        // the in-flight sample and the DMA position.
        let (mut ticks, snap_cons, now) = loop {
            let now = hal.clock().now();
            let in_sample = hal.rdata().sample_remaining();
            let dmacons = dma_pos(hal.rdata().residue());
            if dmacons == self.ring.cons {
                break (in_sample, dmacons, now);
            }
            // Another sample loaded meanwhile; try again.
            self.ring.cons = dmacons;
        };
        let mut i = snap_cons;
        while i != self.ring.prod {
            ticks += self.ring.buf[i as usize] as u32 + 1;
            i = (i + 1) & RING_MASK;
        }
        // Remove the flux already past the mark.
        ticks -= image.ticks_since_index();
        index.timer.set(stamp_add(now, ticks_to_us(ticks)));
    }
}

impl Default for ReadEngine {
    fn default() -> Self {
        Self::new()
    }
}
