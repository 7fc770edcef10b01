//! Engine tests: whole-core scenarios over the mock HAL and an
//! in-memory image.

use crate::clock::sysclk_us;
use crate::hal::mock::MockFloppyHal;
use crate::hal::Clock;
use crate::image::{Image, Slot, TrackBuffers};
use crate::index::IndexScheduler;
use crate::outputs::pin;
use crate::rdata::ReadEngine;
use crate::test_utils::harness::{mounted_core, step_once, TestCore};
use crate::test_utils::mem_image::MemImage;
use crate::test_utils::patterns::capture_samples;
use crate::types::DmaState;
use crate::FloppyCore;

/// Advance time 1ms at a slice until the read stream is running.
fn spin_to_read_active(core: &mut TestCore) {
    for _ in 0..64 {
        if core.rdata_state() == DmaState::Active {
            return;
        }
        core.hal().clock.advance_us(1000);
        core.poll_timers();
        core.handle();
    }
    panic!(
        "read engine stuck in {:?}",
        core.rdata_state()
    );
}

#[test]
fn test_insert_open_asserts_outputs() {
    let core = mounted_core(MemImage::uniform(4096), 0);
    assert!(core.outputs.is_active(pin::RDY));
    // Writable image: write-protect dropped on open.
    assert!(!core.outputs.is_active(pin::WRPROT));
    assert!(core.hal().rdata.configured);
    assert!(core.hal().wdata.configured);
    assert!(core.hal().irq.flux_irqs_enabled);
}

#[test]
fn test_read_only_image_keeps_wrprot() {
    let core = mounted_core(MemImage::uniform(4096).read_only(), 0);
    assert!(core.outputs.is_active(pin::WRPROT));
}

#[test]
fn test_open_failure_keeps_drive_not_ready() {
    let mut image = MemImage::uniform(64);
    image.fail_open = true;
    let mut core = FloppyCore::new(MockFloppyHal::new(), image);
    core.init();
    core.insert(Slot::new(0, "bad.img", false));
    assert!(core.handle());
    assert!(core.handle());
    assert!(!core.ready());
    assert_eq!(core.image_ref().open_calls, 2);
}

#[test]
fn test_read_lifecycle_reaches_active_on_sync_deadline() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);

    // First pass arms the read against a sync deadline one seek-ahead
    // window into the rotation.
    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Starting);

    // Prefill happens immediately, but with ~10ms of slack the loop
    // declines to start the stream yet.
    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Starting);
    assert!(!core.hal().rdata.running);
    assert!(core.read_ring().prod as usize >= crate::ring::RING_LEN / 2);

    // Inside the busy-wait window the stream starts, on the deadline.
    core.hal().clock.set(6_000);
    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Active);
    assert!(core.hal().rdata.running);
    assert!(core.hal().rdata.output_gated);
    assert_eq!(core.hal().clock.now(), 9_999); // busy-waited to sync - 1us

    // The ring holds the image's flux verbatim.
    let ring = core.read_ring();
    for i in 0..8 {
        assert_eq!(ring.buf[i], core.image_ref().flux[i % 4096]);
    }
}

#[test]
fn test_seek_busy_retries_without_state_change() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    core.image_mut().seek_busy = 1;

    assert!(core.handle()); // please re-enter
    assert_eq!(core.rdata_state(), DmaState::Inactive);

    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Starting);
}

#[test]
fn test_no_read_arm_while_stepping() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    core.on_step_pulse(true);

    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Inactive);

    // Step completes; the next pass arms the read.
    step_once(&mut core, false);
    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Starting);
}

#[test]
fn test_dma_isr_refills_behind_consumer() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    spin_to_read_active(&mut core);

    core.hal_mut().rdata.consume(256);
    core.on_rdata_dma();
    // Fill stopped at the wrap; the ISR re-pended itself.
    assert_eq!(core.hal().irq.rdata_pends, 1);
    core.on_rdata_dma();
    assert_eq!(core.read_ring().prod, 255);
    assert_eq!(core.read_ring().cons, 256);
}

#[test]
fn test_underrun_kick_resumes_stream() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    spin_to_read_active(&mut core);

    // Image staging dry: the ISR produces nothing and asks for a kick.
    core.image_mut().starve_flux = 1;
    core.hal_mut().rdata.consume(256);
    let pends = core.hal().irq.rdata_pends;
    core.on_rdata_dma();
    assert_eq!(core.hal().irq.rdata_pends, pends);

    // Foreground buffers more data and re-pends the DMA IRQ once.
    assert!(!core.handle());
    assert_eq!(core.hal().irq.rdata_pends, pends + 1);
    assert!(!core.handle());
    assert_eq!(core.hal().irq.rdata_pends, pends + 1);
}

#[test]
fn test_side_change_drains_active_read() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    spin_to_read_active(&mut core);

    core.on_side(1);
    assert_eq!(core.rdata_state(), DmaState::Stopping);
    assert!(!core.hal().rdata.running);

    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Inactive);
    assert_eq!(core.read_ring().prod, 0);

    // Next arm seeks the other side's track.
    assert!(!core.handle());
    assert_eq!(core.image_ref().track, 1);
}

#[test]
fn test_index_resync_ties_pulse_to_bitstream() {
    let mut engine = ReadEngine::new();
    let mut hal = MockFloppyHal::new();
    let mut image = MemImage::uniform(64); // 64 samples, 18432 ticks around
    let mut bufs = TrackBuffers::new();
    let index = IndexScheduler::new();

    engine.state.store(DmaState::Active);
    hal.clock.set(50_000);
    hal.rdata.sample_remaining = 100;
    hal.rdata.residue = crate::ring::RING_LEN as u16; // DMA at position 0

    // Position the image a few samples short of its index mark.
    let mut pos = 17_000;
    image.seek_track(0, Some(&mut pos));
    let prev_tsi = image.ticks_since_index();
    engine.dma_isr(&mut hal, &mut image, &mut bufs, &index);

    // The fill looped the 64-sample track across the mark.
    assert!(image.ticks_since_index() < prev_tsi);
    assert!(index.timer.armed());

    // Remaining stream ahead of the mark: the in-flight sample plus every
    // queued sample, minus the flux already past the index.
    let queued: u32 = 1023 * 288;
    let expect = 100 + queued - image.ticks_since_index();
    assert_eq!(
        index.timer.deadline(),
        50_000 + expect / crate::clock::SYSCLK_MHZ
    );
}

#[test]
fn test_write_follows_read_with_no_overlap() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    spin_to_read_active(&mut core);

    core.on_write_gate(true);
    // Read tears down before any write processing; nothing on the pin.
    assert_eq!(core.rdata_state(), DmaState::Stopping);
    assert!(!core.hal().rdata.running);
    assert_eq!(core.wdata_state(), DmaState::Starting);
    assert!(core.hal().wdata.running);

    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Inactive);
    assert_eq!(core.wdata_state(), DmaState::Active);
    // Rotational write-start position recorded for the codec.
    let pos_us = core.hal().clock.now() % 200_000;
    assert!(core.image_ref().write_start <= sysclk_us(pos_us));
}

#[test]
fn test_write_capture_decodes_and_flushes() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    spin_to_read_active(&mut core);
    core.on_write_gate(true);
    assert!(!core.handle()); // Starting -> Active

    // Host writes six MFM bits: edges at 1, 01, 1, 01 cell spacings.
    let samples = capture_samples::<8>(0, &[144, 288, 144, 288]);
    core.write_ring_mut().buf[..4].copy_from_slice(&samples);
    core.hal_mut().wdata.produce(4);
    core.on_wdata_dma();
    assert_eq!(core.buffers().write_mfm.prod, 6);

    assert!(!core.handle()); // drains toward the image
    assert_eq!(core.image_ref().written_str(), "101101");

    core.on_write_gate(false);
    assert_eq!(core.wdata_state(), DmaState::Stopping);
    assert!(!core.hal().wdata.running);
    assert_eq!(core.hal().irq.wdata_pends, 1);
    core.on_wdata_dma(); // the re-pended drain pass

    assert!(!core.handle());
    assert_eq!(core.wdata_state(), DmaState::Inactive);
    assert!(core.image_ref().flushed);
    assert_eq!(core.image_ref().sync_calls, 1);
    assert_eq!(core.buffers().write_mfm.prod, 0);

    // Only now may the read path resume.
    assert!(!core.handle());
    assert_eq!(core.rdata_state(), DmaState::Starting);
}

#[test]
fn test_second_write_gate_is_dropped_while_draining() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    core.on_write_gate(true);
    assert_eq!(core.hal().wdata.starts, 1);

    core.on_write_gate(true); // missed write: logged and dropped
    assert_eq!(core.hal().wdata.starts, 1);
    assert_eq!(core.wdata_state(), DmaState::Starting);
}

#[test]
fn test_write_gate_ignored_without_writable_image() {
    let mut core = mounted_core(MemImage::uniform(4096).read_only(), 0);
    core.on_write_gate(true);
    assert_eq!(core.wdata_state(), DmaState::Inactive);
    assert!(!core.hal().wdata.running);
}

#[test]
fn test_select_gates_outputs_and_rdata_pin() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    spin_to_read_active(&mut core);

    core.on_select(false);
    assert_eq!(core.hal().port.pins, 0);
    assert!(!core.hal().rdata.output_gated);
    // Stream itself keeps running; only the pins are isolated.
    assert!(core.hal().rdata.running);

    core.on_select(true);
    assert!(core.hal().port.is_active(pin::RDY));
    assert!(core.hal().rdata.output_gated);
}

#[test]
fn test_cancel_parks_outputs_and_stops_everything() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);
    spin_to_read_active(&mut core);

    core.cancel();
    assert!(!core.outputs.is_active(pin::RDY));
    assert!(!core.outputs.is_active(pin::INDEX));
    assert!(core.outputs.is_active(pin::DSKCHG | pin::WRPROT));
    assert!(!core.hal().irq.flux_irqs_enabled);
    assert!(!core.hal().rdata.running);
    assert!(!core.index.timer.armed());
    assert_eq!(core.rdata_state(), DmaState::Inactive);
    assert_eq!(core.wdata_state(), DmaState::Inactive);
    assert!(core.handle()); // empty drive: nothing to run
}

#[test]
fn test_step_cylinder_boundaries_through_core() {
    let mut core = mounted_core(MemImage::uniform(4096), 0);

    step_once(&mut core, true);
    step_once(&mut core, true);
    assert_eq!(core.track(), (2, 0));
    assert_eq!(core.hal().speaker.clicks, 2);

    // Fast step back from cylinder 255 snaps through the clamp.
    core.drive.cyl.store(255, core::sync::atomic::Ordering::Relaxed);
    step_once(&mut core, false);
    assert_eq!(core.track().0, 83);

    // Outward at the floor stays at track 0 with TRK0 asserted.
    core.drive.cyl.store(1, core::sync::atomic::Ordering::Relaxed);
    step_once(&mut core, false);
    step_once(&mut core, false);
    assert_eq!(core.track().0, 0);
    assert!(core.outputs.is_active(pin::TRK0));
}
