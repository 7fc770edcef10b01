//! Head-step scenarios: clamps, floors, settle restarts, select gating

use floppy_core::outputs::pin;
use floppy_core::test_utils::harness::{mounted_core, step_once};
use floppy_core::test_utils::mem_image::MemImage;

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering;

    #[test]
    fn test_outward_sweep_parks_at_track_zero() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);
        core.drive.cyl.store(5, Ordering::Relaxed);

        for _ in 0..10 {
            step_once(&mut core, false);
        }
        assert_eq!(core.track(), (0, 0));
        assert!(core.outputs.is_active(pin::TRK0));

        // Further outward pulses stay floored.
        step_once(&mut core, false);
        assert_eq!(core.track(), (0, 0));
        assert!(core.outputs.is_active(pin::TRK0));
    }

    #[test]
    fn test_fast_step_back_from_cyl_255() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);
        core.drive.cyl.store(255, Ordering::Relaxed);

        // First outward pulse absorbs the phantom upper range.
        step_once(&mut core, false);
        assert_eq!(core.track().0, 83);

        // From there it walks normally.
        step_once(&mut core, false);
        assert_eq!(core.track().0, 82);
    }

    #[test]
    fn test_pulse_during_settle_restarts_the_step() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);

        // First step through to the settle window.
        core.on_step_pulse(true);
        core.on_step_soft_irq();
        core.hal().clock.advance_ms(2);
        core.poll_timers();
        assert!(core.drive.step.settling());
        assert_eq!(core.track().0, 1);

        // Second pulse lands mid-settle and restarts the machinery.
        core.on_step_pulse(true);
        core.on_step_soft_irq();
        core.hal().clock.advance_ms(2);
        core.poll_timers();
        assert_eq!(core.track().0, 2);
        core.hal().clock.advance_ms(12);
        core.poll_timers();
        assert_eq!(core.drive.step.raw_state(), 0);

        assert_eq!(core.hal().speaker.clicks, 2);
    }

    #[test]
    fn test_trk0_output_follows_cylinder() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);
        assert!(core.outputs.is_active(pin::TRK0));

        step_once(&mut core, true);
        assert!(!core.outputs.is_active(pin::TRK0));

        step_once(&mut core, false);
        assert!(core.outputs.is_active(pin::TRK0));
    }

    #[test]
    fn test_deselected_step_updates_shadow_not_port() {
        let mut core = mounted_core(MemImage::uniform(2048), 0);
        core.on_select(false);

        step_once(&mut core, true);
        assert!(!core.outputs.is_active(pin::TRK0));
        assert_eq!(core.hal().port.pins, 0);

        // Re-select replays the shadow onto the cable.
        core.on_select(true);
        assert!(!core.hal().port.is_active(pin::TRK0));
        assert!(core.hal().port.is_active(pin::RDY));
    }
}
