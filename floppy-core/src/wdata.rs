//! Write engine: host flux edges in, MFM bits out to the image
//!
//! An input-capture timer samples its free-running counter on every
//! falling write-data edge; circular DMA lands the samples in the ring.
//! The DMA service routine turns inter-edge deltas into MFM bits in the
//! image's staging buffer; the foreground loop drains those bits toward
//! mass storage and runs the end-of-write flush protocol.

use crate::clock::{stamp_ms, stamp_since, sysclk_us};
use crate::hal::{Clock, FloppyHal, FluxCapture, IrqController};
use crate::image::{Image, TrackBuffers};
use crate::index::IndexScheduler;
use crate::mfm::MfmWriter;
use crate::ring::{dma_pos, WriteRing, RING_LEN, RING_MASK};
use crate::types::{AtomicDmaState, DmaState, FloppyConfig};

pub struct WriteEngine {
    pub(crate) state: AtomicDmaState,
    pub(crate) ring: WriteRing,
}

impl WriteEngine {
    pub const fn new() -> Self {
        Self {
            state: AtomicDmaState::new(DmaState::Inactive),
            ring: WriteRing::new(),
        }
    }

    pub fn state(&self) -> DmaState {
        self.state.load()
    }

    /// Ring storage for pointing the DMA channel at.
    pub fn buf(&mut self) -> (*mut u16, u16) {
        (self.ring.buf.as_mut_ptr(), RING_LEN as u16)
    }

    /// Fresh-mount / post-eject reset.
    pub fn reset(&mut self) {
        self.state.store(DmaState::Inactive);
        self.ring.reset();
    }

    /// Write-gate asserted. Called from interrupt context.
    pub fn start<H: FloppyHal, I: Image>(
        &mut self,
        hal: &mut H,
        image: &mut I,
        index: &IndexScheduler,
        cfg: &FloppyConfig,
    ) {
        if self.state.load() != DmaState::Inactive {
            // A previous write is still draining; drop this one.
            #[cfg(feature = "defmt")]
            defmt::warn!("missed write");
            return;
        }
        self.state.store(DmaState::Starting);

        hal.wdata().start();

        // Rotational position at which writing began, so the codec can
        // place the data on the track.
        let now = hal.clock().now();
        let pos_us =
            (stamp_since(now, index.prev_time()).max(0) as u32) % stamp_ms(cfg.ms_per_rev);
        image.set_write_start(sysclk_us(pos_us));
        #[cfg(feature = "defmt")]
        defmt::info!("write start {} us", pos_us);

        // Some hosts glitch the first edge; let the line settle.
        hal.clock().delay_us(cfg.write_settle_us);
    }

    /// Write-gate deasserted. Called from interrupt context.
    pub fn stop<H: FloppyHal>(&self, hal: &mut H) {
        let prev = self.state.load();
        if prev == DmaState::Inactive || prev == DmaState::Stopping {
            return;
        }
        self.state.store(DmaState::Stopping);

        hal.wdata().stop();

        // One more pass to flush captured samples out of the ring.
        hal.irq().pend_wdata();
    }

    /// DMA half/full-transfer service routine: decode new capture samples
    /// into the MFM staging buffer.
    pub fn dma_isr<H: FloppyHal, I: Image>(
        &mut self,
        hal: &mut H,
        image: &mut I,
        bufs: &mut TrackBuffers,
    ) {
        if self.state.load() == DmaState::Inactive {
            return;
        }

        let prod = dma_pos(hal.wdata().residue());
        let syncword = image.syncword();

        let (words, cursor) = bufs.write_mfm_parts();
        let mut writer = MfmWriter::resume(words, cursor.prod, syncword);
        let mut prev = self.ring.prev_sample;
        let mut cons = self.ring.cons;
        while cons != prod {
            let next = self.ring.buf[cons as usize];
            // Wrap arithmetic: samples are monotonic within a counter
            // wrap; revolution-scale gaps are the codec's problem.
            writer.push_interval(next.wrapping_sub(prev) as u32);
            prev = next;
            cons = (cons + 1) & RING_MASK;
        }
        cursor.prod = writer.finish();

        // Save progress for next time.
        self.ring.cons = cons;
        self.ring.prev_sample = prev;
    }
}

impl Default for WriteEngine {
    fn default() -> Self {
        Self::new()
    }
}
