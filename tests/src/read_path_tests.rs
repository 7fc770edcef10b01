//! Read-path scenarios: stream content, sync timing, step interactions

use floppy_core::test_utils::harness::{mounted_core, run_for, TestCore};
use floppy_core::test_utils::mem_image::MemImage;
use floppy_core::test_utils::patterns::samples_from_bits;
use floppy_core::types::DmaState;

/// Advance in 1ms slices until the stream runs.
fn spin_to_active(core: &mut TestCore) {
    for _ in 0..64 {
        if core.rdata_state() == DmaState::Active {
            return;
        }
        core.hal().clock.advance_us(1000);
        core.poll_timers();
        core.handle();
    }
    panic!("read stream never started");
}

#[cfg(test)]
mod tests {
    use super::*;
    use floppy_core::Clock;

    #[test]
    fn test_emitted_stream_is_the_image_track() {
        let pattern = "10010001001010010001001001000101";
        let samples = samples_from_bits::<64>(pattern);
        let mut core = mounted_core(MemImage::new(&samples), 0);
        spin_to_active(&mut core);

        // The ring starts somewhere in the track (seek alignment), then
        // must follow the source cycle exactly.
        let ring = core.read_ring();
        let flux = &core.image_ref().flux;
        let n = flux.len();
        let off = (0..n)
            .find(|&off| (0..n).all(|i| flux[(off + i) % n] == ring.buf[i]))
            .expect("ring content not a rotation of the track");
        for i in 0..256 {
            assert_eq!(ring.buf[i], flux[(off + i) % n]);
        }
    }

    #[test]
    fn test_stream_starts_on_the_sync_deadline() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);
        spin_to_active(&mut core);
        // Mounted at t=0 with a 10ms seek-ahead window: the busy-wait
        // runs the clock to one microsecond short of the deadline.
        assert_eq!(core.hal().clock.now(), 9_999);
    }

    #[test]
    fn test_head_settle_extends_the_seek_ahead_window() {
        use floppy_core::hal::mock::MockFloppyHal;
        use floppy_core::{FloppyConfig, FloppyCore, Slot};

        // A drive with a slow 20ms settle, so the settle window reaches
        // past the 10ms seek-ahead.
        let cfg = FloppyConfig {
            settle_ms: 20,
            ..FloppyConfig::default()
        };
        let mut core = FloppyCore::with_config(MockFloppyHal::new(), MemImage::uniform(2048), cfg);
        core.init();
        core.insert(Slot::new(0, "slow.img", false));
        core.on_select(true);
        assert!(!core.handle());

        // Step at t=0; walk it to the settle window.
        core.on_step_pulse(true);
        core.on_step_soft_irq();
        core.hal().clock.advance_ms(2);
        core.poll_timers();
        assert!(core.drive.step.settling());

        // The read arms mid-settle, but its sync deadline lands where
        // the heads are stable (t=20ms), not one seek-ahead out (t=12ms).
        spin_to_active(&mut core);
        assert_eq!(core.hal().clock.now(), 19_999);
    }

    #[test]
    fn test_step_during_active_read_drains_the_stream() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);
        spin_to_active(&mut core);

        core.on_step_pulse(true);
        assert_eq!(core.rdata_state(), DmaState::Stopping);
        assert!(!core.hal().rdata.running);

        // Finish the step the way the firmware would.
        core.on_step_soft_irq();
        core.hal().clock.advance_ms(2);
        core.poll_timers();
        core.hal().clock.advance_ms(12);
        core.poll_timers();

        // Within a revolution the new track streams.
        run_for(&mut core, 30, 500);
        assert_eq!(core.rdata_state(), DmaState::Active);
        assert_eq!(core.image_ref().track, 2); // cyl 1, head 0
    }

    #[test]
    fn test_seek_busy_is_reported_as_retry() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);
        core.image_mut().seek_busy = 3;

        assert!(core.handle());
        assert!(core.handle());
        assert!(core.handle());
        assert_eq!(core.rdata_state(), DmaState::Inactive);

        assert!(!core.handle());
        assert_eq!(core.rdata_state(), DmaState::Starting);
    }
}
