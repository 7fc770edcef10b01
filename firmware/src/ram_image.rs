//! Bring-up image: a blank DD track generated in RAM
//!
//! Stands in for the real codec stack while the mass-storage side is
//! brought up: every track reads as a uniform 4us-cell stream and writes
//! are accepted and discarded. The real image layer replaces this.

use floppy_core::clock::SYSCLK_MHZ;
use floppy_core::image::{Image, ImageError, ImageInfo, Seek, Slot, TrackBuffers};

/// One flux transition per two DD bitcells.
const BLANK_SAMPLE: u16 = (4 * SYSCLK_MHZ - 1) as u16;

/// Nominal DD revolution in sysclk ticks.
const TRACK_TICKS: u32 = 200_000 * SYSCLK_MHZ;

pub struct RamImage {
    track: u16,
    ticks_since_index: u32,
    write_start: u32,
}

impl RamImage {
    pub const fn new() -> Self {
        Self {
            track: 0,
            ticks_since_index: 0,
            write_start: 0,
        }
    }
}

impl Default for RamImage {
    fn default() -> Self {
        Self::new()
    }
}

impl Image for RamImage {
    fn open(&mut self, _slot: &Slot) -> Result<ImageInfo, ImageError> {
        Ok(ImageInfo { writable: true })
    }

    fn syncword(&self) -> u32 {
        0x4489_4489 // IBM MFM sector sync
    }

    fn current_track(&self) -> u16 {
        self.track
    }

    fn seek_track(&mut self, track: u16, start_pos: Option<&mut u32>) -> Seek {
        self.track = track;
        let span = BLANK_SAMPLE as u32 + 1;
        self.ticks_since_index = match start_pos {
            Some(pos) => {
                // Align to the next cell boundary.
                let aligned = (*pos % TRACK_TICKS).next_multiple_of(span);
                *pos = aligned;
                aligned
            }
            None => 0,
        };
        Seek::Complete
    }

    fn read_track(&mut self, _bufs: &mut TrackBuffers) -> bool {
        true // nothing to stage; flux is synthesised
    }

    fn rdata_flux(&mut self, _bufs: &mut TrackBuffers, out: &mut [u16]) -> usize {
        for slot in out.iter_mut() {
            *slot = BLANK_SAMPLE;
            self.ticks_since_index += BLANK_SAMPLE as u32 + 1;
            if self.ticks_since_index >= TRACK_TICKS {
                self.ticks_since_index -= TRACK_TICKS;
            }
        }
        out.len()
    }

    fn write_track(&mut self, bufs: &mut TrackBuffers, _flush: bool) {
        // Accept and discard.
        let (_, cursor) = bufs.write_mfm_parts();
        cursor.cons = cursor.prod;
    }

    fn ticks_since_index(&self) -> u32 {
        self.ticks_since_index
    }

    fn set_write_start(&mut self, ticks: u32) {
        self.write_start = ticks;
    }

    fn sync_file(&mut self) {}
}
