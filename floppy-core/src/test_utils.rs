//! Test utilities: flux pattern builders and an in-memory image

pub mod patterns {
    //! Flux interval construction for tests

    use crate::mfm::CELL_TICKS;
    use heapless::Vec;

    /// Timer reload samples for an MFM bit string (a sample of N emits a
    /// transition after N+1 ticks). The string must end on a `1`.
    pub fn samples_from_bits<const N: usize>(bits: &str) -> Vec<u16, N> {
        let mut out = Vec::new();
        let mut zeros = 0u32;
        for c in bits.chars() {
            match c {
                '0' => zeros += 1,
                '1' => {
                    let interval = CELL_TICKS * (zeros + 1);
                    out.push((interval - 1) as u16).unwrap();
                    zeros = 0;
                }
                _ => panic!("bit strings are 0s and 1s"),
            }
        }
        assert_eq!(zeros, 0, "flux streams end on a transition");
        out
    }

    /// A track of identical cells: `count` samples of `cells` bitcells each.
    pub fn uniform_samples<const N: usize>(cells: u32, count: usize) -> Vec<u16, N> {
        let mut out = Vec::new();
        for _ in 0..count {
            out.push((CELL_TICKS * cells - 1) as u16).unwrap();
        }
        out
    }

    /// Capture-timer samples (absolute counter values) for a sequence of
    /// inter-edge intervals, starting from counter value `base`.
    pub fn capture_samples<const N: usize>(base: u16, intervals: &[u16]) -> Vec<u16, N> {
        let mut out = Vec::new();
        let mut t = base;
        for &iv in intervals {
            t = t.wrapping_add(iv);
            out.push(t).unwrap();
        }
        out
    }
}

pub mod mem_image {
    //! In-memory image codec for host tests

    use crate::image::{BufCursor, Image, ImageError, ImageInfo, Seek, Slot, TrackBuffers};
    use crate::mfm::mfm_bit;
    use heapless::Vec;

    /// A single-track in-memory image. The flux samples loop forever, so
    /// any read length works; written MFM bits are collected for
    /// inspection instead of going to a file.
    pub struct MemImage {
        pub writable: bool,
        pub fail_open: bool,
        pub syncword: u32,
        pub track: u16,
        /// Remaining `Seek::Busy` responses before a seek completes.
        pub seek_busy: u32,
        /// One revolution of reload samples.
        pub flux: Vec<u16, 4096>,
        pub track_ticks: u32,
        pos: usize,
        tsi: u32,
        /// `rdata_flux` returns 0 samples for this many calls.
        pub starve_flux: u32,
        /// Value `read_track` reports (did it buffer more data).
        pub buffer_more: bool,
        /// MFM bits drained by `write_track`.
        pub written: Vec<bool, 4096>,
        pub write_start: u32,
        pub flushed: bool,
        pub open_calls: u32,
        pub seek_calls: u32,
        pub sync_calls: u32,
    }

    impl MemImage {
        pub fn new(flux: &[u16]) -> Self {
            let mut v = Vec::new();
            v.extend_from_slice(flux).unwrap();
            let track_ticks = flux.iter().map(|&s| s as u32 + 1).sum();
            Self {
                writable: true,
                fail_open: false,
                syncword: 0x4489_4489,
                track: 0,
                seek_busy: 0,
                flux: v,
                track_ticks,
                pos: 0,
                tsi: 0,
                starve_flux: 0,
                buffer_more: true,
                written: Vec::new(),
                write_start: 0,
                flushed: false,
                open_calls: 0,
                seek_calls: 0,
                sync_calls: 0,
            }
        }

        /// A track of `count` uniform double-cell samples.
        pub fn uniform(count: usize) -> Self {
            let mut flux = Vec::<u16, 4096>::new();
            for _ in 0..count {
                flux.push((2 * crate::mfm::CELL_TICKS - 1) as u16).unwrap();
            }
            Self::new(&flux)
        }

        pub fn read_only(mut self) -> Self {
            self.writable = false;
            self
        }

        /// Written bits as a string, for direct comparison.
        #[cfg(any(feature = "std", test))]
        pub fn written_str(&self) -> std::string::String {
            self.written
                .iter()
                .map(|&b| if b { '1' } else { '0' })
                .collect()
        }
    }

    impl Image for MemImage {
        fn open(&mut self, _slot: &Slot) -> Result<ImageInfo, ImageError> {
            self.open_calls += 1;
            if self.fail_open {
                return Err(ImageError::Open);
            }
            Ok(ImageInfo {
                writable: self.writable,
            })
        }

        fn syncword(&self) -> u32 {
            self.syncword
        }

        fn current_track(&self) -> u16 {
            self.track
        }

        fn seek_track(&mut self, track: u16, start_pos: Option<&mut u32>) -> Seek {
            self.seek_calls += 1;
            if self.seek_busy > 0 {
                self.seek_busy -= 1;
                return Seek::Busy;
            }
            self.track = track;
            self.pos = 0;
            self.tsi = 0;
            if let Some(pos) = start_pos {
                // Align the requested tick offset up to the next sample
                // boundary, preserving the caller's revolution offset.
                let in_track = *pos % self.track_ticks;
                let mut acc = 0u32;
                while acc < in_track {
                    acc += self.flux[self.pos] as u32 + 1;
                    self.pos = (self.pos + 1) % self.flux.len();
                }
                self.tsi = acc;
                *pos = *pos - in_track + acc;
            }
            Seek::Complete
        }

        fn read_track(&mut self, _bufs: &mut TrackBuffers) -> bool {
            self.buffer_more
        }

        fn rdata_flux(&mut self, _bufs: &mut TrackBuffers, out: &mut [u16]) -> usize {
            if self.starve_flux > 0 {
                self.starve_flux -= 1;
                return 0;
            }
            for slot in out.iter_mut() {
                let s = self.flux[self.pos];
                *slot = s;
                self.pos = (self.pos + 1) % self.flux.len();
                self.tsi += s as u32 + 1;
                if self.tsi >= self.track_ticks {
                    self.tsi -= self.track_ticks; // crossed the index mark
                }
            }
            out.len()
        }

        fn write_track(&mut self, bufs: &mut TrackBuffers, flush: bool) {
            let (words, cursor) = bufs.write_mfm_parts();
            let BufCursor { prod, cons } = *cursor;
            for bit in cons..prod {
                self.written.push(mfm_bit(words, bit)).unwrap();
            }
            cursor.cons = prod;
            if flush {
                self.flushed = true;
            }
        }

        fn ticks_since_index(&self) -> u32 {
            self.tsi
        }

        fn set_write_start(&mut self, ticks: u32) {
            self.write_start = ticks;
        }

        fn sync_file(&mut self) {
            self.sync_calls += 1;
        }
    }
}

pub mod harness {
    //! Shorthand drivers for whole-core scenarios

    use super::mem_image::MemImage;
    use crate::clock::stamp_ms;
    use crate::floppy::FloppyCore;
    use crate::hal::mock::MockFloppyHal;
    use crate::image::Slot;

    pub type TestCore = FloppyCore<MockFloppyHal, MemImage>;

    /// A mounted, opened, selected core positioned at the given time.
    pub fn mounted_core(image: MemImage, now_us: u32) -> TestCore {
        let mut core = FloppyCore::new(MockFloppyHal::new(), image);
        core.hal().clock.set(now_us);
        core.init();
        core.insert(Slot::new(0, "test.img", false));
        core.on_select(true);
        assert!(!core.handle()); // opens the image
        assert!(core.ready());
        core
    }

    /// Run one complete host step: pulse, soft-IRQ, latch wait, movement,
    /// settle wait, completion.
    pub fn step_once(core: &mut TestCore, inward: bool) {
        core.on_step_pulse(inward);
        core.on_step_soft_irq();
        core.hal().clock.advance_ms(2);
        core.poll_timers(); // latched: move the head
        core.hal().clock.advance_ms(12);
        core.poll_timers(); // settling: back to idle
    }

    /// Advance the clock in `step_us` increments, servicing software
    /// timers and the foreground loop as a firmware main loop would.
    pub fn run_for(core: &mut TestCore, duration_ms: u32, step_us: u32) {
        let end = stamp_ms(duration_ms) / step_us;
        for _ in 0..end {
            core.hal().clock.advance_us(step_us);
            core.poll_timers();
            core.handle();
        }
    }
}
