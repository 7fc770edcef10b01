//! Floppy interface control
//!
//! [`FloppyCore`] owns the whole emulation: the drive state, both flux
//! engines, the index scheduler, the output mux, the staging buffers and
//! the board HAL. The main event loop owns the value and calls
//! [`FloppyCore::handle`] repeatedly; interrupt handlers reach it through
//! a board-provided static slot and call the `on_*` entry points.

use crate::clock::{stamp_add, stamp_ms, Stamp};
use crate::hal::{Clock, FloppyHal, FluxCapture, FluxOutput, IrqController};
use crate::image::{Image, Seek, Slot, TrackBuffers};
use crate::index::IndexScheduler;
use crate::outputs::{pin, OutputMux};
use crate::rdata::ReadEngine;
use crate::ring::dma_pos;
use crate::step::Drive;
use crate::types::{DmaState, FloppyConfig};
use crate::wdata::WriteEngine;
use core::sync::atomic::{fence, Ordering};

pub struct FloppyCore<H: FloppyHal, I: Image> {
    hal: H,
    image: I,
    cfg: FloppyConfig,
    pub drive: Drive,
    pub index: IndexScheduler,
    pub outputs: OutputMux,
    rdata: ReadEngine,
    wdata: WriteEngine,
    bufs: TrackBuffers,
    slot: Option<Slot>,
    opened: bool,
    writable: bool,
}

impl<H: FloppyHal, I: Image> FloppyCore<H, I> {
    pub fn new(hal: H, image: I) -> Self {
        Self::with_config(hal, image, FloppyConfig::default())
    }

    pub fn with_config(hal: H, image: I, cfg: FloppyConfig) -> Self {
        Self {
            hal,
            image,
            cfg,
            drive: Drive::new(),
            index: IndexScheduler::new(),
            outputs: OutputMux::new(),
            rdata: ReadEngine::new(),
            wdata: WriteEngine::new(),
            bufs: TrackBuffers::new(),
            slot: None,
            opened: false,
            writable: false,
        }
    }

    /// One-time setup after board bring-up: an empty drive reports disk
    /// changed, protected, and at track 0.
    pub fn init(&mut self) {
        let sel = self.drive.selected();
        self.outputs.change(
            self.hal.port(),
            sel,
            pin::DSKCHG | pin::WRPROT | pin::TRK0,
            true,
        );
    }

    /// Mount an image slot: provision the flux channels and start the
    /// rotation. The image itself opens lazily from `handle`.
    pub fn insert(&mut self, slot: Slot) {
        self.slot = Some(slot);
        self.opened = false;
        self.writable = false;
        self.bufs.reset();
        self.rdata.reset();
        self.wdata.reset();

        let now = self.hal.clock().now();
        self.index.start(now, &self.cfg);

        let (rd_buf, rd_len) = self.rdata.buf();
        self.hal.rdata().configure(rd_buf, rd_len);
        let (wr_buf, wr_len) = self.wdata.buf();
        self.hal.wdata().configure(wr_buf, wr_len);
        self.hal.irq().enable_flux_irqs();

        let sel = self.drive.selected();
        self.outputs.change(self.hal.port(), sel, pin::RDY, true);
    }

    /// Eject: tear the streams down, clear soft state, park the outputs
    /// for an empty drive.
    pub fn cancel(&mut self) {
        // Initialised? Bail if not.
        if self.slot.is_none() {
            return;
        }

        // Stop DMA/timer work.
        self.hal.irq().disable_flux_irqs();
        self.index.stop();
        self.rdata.stop(&mut self.hal);
        self.wdata.stop(&mut self.hal);

        // Clear soft state.
        self.slot = None;
        self.opened = false;
        self.writable = false;
        self.drive.step.clear();
        self.rdata.reset();
        self.wdata.reset();
        self.bufs.reset();

        // Set outputs for empty drive.
        let sel = self.drive.selected();
        self.outputs
            .change(self.hal.port(), sel, pin::INDEX | pin::RDY, false);
        self.outputs
            .change(self.hal.port(), sel, pin::DSKCHG | pin::WRPROT, true);
    }

    /// Current head position for display layers.
    pub fn track(&self) -> (u8, u8) {
        (
            self.drive.cyl.load(Ordering::Relaxed),
            self.drive.head.load(Ordering::Relaxed),
        )
    }

    /// A disk image is mounted and open.
    pub fn ready(&self) -> bool {
        self.opened
    }

    /// Foreground service, called from the main event loop. Returns true
    /// if it wants to be re-entered soon.
    pub fn handle(&mut self) -> bool {
        let Some(slot) = self.slot.as_ref() else {
            return true; // empty drive, nothing to run
        };

        if !self.opened {
            let Ok(info) = self.image.open(slot) else {
                return true; // stays not-ready; retried on re-entry
            };
            self.opened = true;
            self.writable = info.writable;
            self.rdata.force_stop();
            if info.writable {
                let sel = self.drive.selected();
                self.outputs
                    .change(self.hal.port(), sel, pin::WRPROT, false);
            }
        }

        match self.wdata.state() {
            DmaState::Inactive => {
                if self.rdata_handle() {
                    return true;
                }
            }

            DmaState::Starting => {
                // Bail out of read mode first.
                if self.rdata.state() != DmaState::Inactive {
                    assert_eq!(self.rdata.state(), DmaState::Stopping);
                    if self.rdata_handle() {
                        return true;
                    }
                    assert_eq!(self.rdata.state(), DmaState::Inactive);
                }
                // Make sure we're on the correct track.
                let track = self.drive.track();
                if self.image.seek_track(track, None) == Seek::Busy {
                    return true;
                }
                // May race the write-gate deasserting.
                let _ = self
                    .wdata
                    .state
                    .compare_exchange(DmaState::Starting, DmaState::Active);
            }

            DmaState::Active => {
                self.image.write_track(&mut self.bufs, false);
            }

            DmaState::Stopping => {
                // Wait for the flux ring to drain into the MFM buffer,
                // pushing data to mass storage meanwhile.
                let prod = dma_pos(self.hal.wdata().residue());
                let cons = self.wdata.ring.cons;
                fence(Ordering::Acquire); // take dma indexes, then process the tail
                self.image.write_track(&mut self.bufs, cons == prod);
                if cons != prod {
                    return false;
                }
                // Drained: clear the ring and cursors, flush the file.
                self.wdata.ring.reset();
                self.bufs.reset_write();
                self.image.sync_file();
                fence(Ordering::Release); // reactivation of the write path last
                self.wdata.state.store(DmaState::Inactive);
            }
        }

        false
    }

    fn rdata_handle(&mut self) -> bool {
        self.rdata.handle(
            &mut self.hal,
            &mut self.image,
            &mut self.bufs,
            &self.drive,
            &self.index,
            &self.wdata.state,
            &self.cfg,
        )
    }

    /// Drive-select edge (high-priority interrupt context).
    pub fn on_select(&mut self, selected: bool) {
        self.drive.sel.store(selected, Ordering::Relaxed);
        self.outputs.replay(self.hal.port(), selected);
        if self.rdata.state() == DmaState::Active {
            self.hal.rdata().gate_output(selected);
        }
    }

    /// Side-select edge (high-priority interrupt context).
    pub fn on_side(&mut self, side: u8) {
        self.drive.head.store(side & 1, Ordering::Relaxed);
        // The stream no longer matches the head; drain it.
        self.rdata.stop(&mut self.hal);
    }

    /// Write-gate edge (high-priority interrupt context).
    pub fn on_write_gate(&mut self, asserted: bool) {
        if asserted {
            if !self.opened || !self.writable {
                return;
            }
            self.rdata.stop(&mut self.hal);
            self.wdata
                .start(&mut self.hal, &mut self.image, &self.index, &self.cfg);
        } else {
            self.wdata.stop(&mut self.hal);
        }
    }

    /// Step pulse (high-priority interrupt context).
    pub fn on_step_pulse(&mut self, inward: bool) {
        let now = self.hal.clock().now();
        if self.drive.step.pulse(now, inward) {
            // The playing track is about to be wrong; drain it.
            self.rdata.stop(&mut self.hal);
            self.hal.irq().pend_step();
        }
    }

    /// Step soft-IRQ (low-priority interrupt context).
    pub fn on_step_soft_irq(&mut self) {
        self.drive.step.soft_irq();
    }

    /// Step timer deadline service.
    pub fn on_step_timer(&mut self) {
        self.drive
            .step_timer(&self.outputs, &mut self.hal, self.cfg.settle_ms);
    }

    /// Index timer deadline service.
    pub fn on_index_timer(&mut self) {
        let rdata_active = self.rdata.state() == DmaState::Active;
        let sel = self.drive.selected();
        self.index
            .service(&self.outputs, &mut self.hal, sel, rdata_active, &self.cfg);
    }

    /// RDATA DMA interrupt service.
    pub fn on_rdata_dma(&mut self) {
        self.rdata
            .dma_isr(&mut self.hal, &mut self.image, &mut self.bufs, &self.index);
    }

    /// WDATA DMA interrupt service.
    pub fn on_wdata_dma(&mut self) {
        self.wdata
            .dma_isr(&mut self.hal, &mut self.image, &mut self.bufs);
    }

    /// Fire any due software timers. Boards with a hardware timer per
    /// deadline can instead call the individual services directly.
    pub fn poll_timers(&mut self) {
        let now = self.hal.clock().now();
        if self.drive.step.timer.poll(now) {
            self.on_step_timer();
        }
        if self.index.timer.poll(now) {
            self.on_index_timer();
        }
    }

    /// Earliest armed software-timer deadline, for scheduling sleeps.
    pub fn next_timer_deadline(&self) -> Option<Stamp> {
        let now = self.hal.clock().now();
        let mut next: Option<Stamp> = None;
        for timer in [&self.drive.step.timer, &self.index.timer] {
            if !timer.armed() {
                continue;
            }
            let d = timer.deadline();
            next = Some(match next {
                Some(n) if crate::clock::stamp_delta(now, n) <= crate::clock::stamp_delta(now, d) => n,
                _ => d,
            });
        }
        next
    }

    /// Rotation stamp helper: when the next revolution starts if nothing
    /// preempts the free-running scheduler.
    pub fn next_index_time(&self) -> Stamp {
        stamp_add(self.index.prev_time(), stamp_ms(self.cfg.ms_per_rev))
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl<H: FloppyHal, I: Image> FloppyCore<H, I> {
    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn image_ref(&self) -> &I {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut I {
        &mut self.image
    }

    pub fn rdata_state(&self) -> DmaState {
        self.rdata.state()
    }

    pub fn wdata_state(&self) -> DmaState {
        self.wdata.state()
    }

    pub fn read_ring(&self) -> &crate::ring::ReadRing {
        &self.rdata.ring
    }

    pub fn write_ring_mut(&mut self) -> &mut crate::ring::WriteRing {
        &mut self.wdata.ring
    }

    pub fn buffers(&self) -> &TrackBuffers {
        &self.bufs
    }

    pub fn buffers_mut(&mut self) -> &mut TrackBuffers {
        &mut self.bufs
    }
}
