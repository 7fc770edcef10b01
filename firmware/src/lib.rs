#![no_std]

//! Firmware library: board layers and the static core slot

pub use embassy_executor::Spawner;
pub use embassy_time::Duration;
pub use static_cell::StaticCell;

pub use floppy_core::*;

#[cfg(feature = "gotek")]
pub mod gotek_hardware;
#[cfg(feature = "touch")]
pub mod touch_hardware;

#[cfg(feature = "gotek")]
pub use gotek_hardware as board;
#[cfg(feature = "touch")]
pub use touch_hardware as board;

pub mod ram_image;
mod time_driver;

/// Start the embassy tick source. Call once before spawning tasks.
pub fn time_driver_start() {
    time_driver::start();
}

use board::BoardHal;
use core::cell::UnsafeCell;
use ram_image::RamImage;

pub type Core = FloppyCore<BoardHal, RamImage>;

/// Static slot handing the core to interrupt handlers.
///
/// The core is created once at boot and never moved. Interrupt entry
/// points and the foreground task all obtain `&mut` through this slot;
/// exclusivity is by construction: this is a single-core part, each ISR
/// entry touches only the state its context owns, and every field shared
/// across contexts inside the core is atomic, with the engine state
/// machines as the handshake (see floppy-core's concurrency rules).
pub struct CoreSlot {
    inner: UnsafeCell<Option<Core>>,
}

unsafe impl Sync for CoreSlot {}

impl CoreSlot {
    const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(None),
        }
    }
}

static CORE: CoreSlot = CoreSlot::new();

/// Install the core at boot. Call exactly once, before interrupts are
/// unmasked.
pub fn init_core(hal: BoardHal, image: RamImage) -> &'static mut Core {
    let slot = unsafe { &mut *CORE.inner.get() };
    *slot = Some(FloppyCore::new(hal, image));
    slot.as_mut().unwrap()
}

/// Core access for interrupt handlers and tasks.
///
/// # Safety
///
/// Only call after [`init_core`], from this device's interrupt handlers
/// or the single foreground executor, per the exclusivity rules on
/// [`CoreSlot`].
pub unsafe fn core() -> &'static mut Core {
    (*CORE.inner.get()).as_mut().unwrap_unchecked()
}

pub mod tasks {
    //! Embassy tasks driving the core

    use super::*;
    use embassy_time::Timer;

    /// Foreground loop: the only caller into the image layer for bulk
    /// work. Backs off briefly when the core reports a transient wait.
    #[embassy_executor::task]
    pub async fn foreground_task() {
        #[cfg(feature = "defmt")]
        defmt::info!("floppy foreground task started");

        loop {
            let again = unsafe { core() }.handle();
            if again {
                Timer::after(Duration::from_micros(500)).await;
            } else {
                Timer::after(Duration::from_micros(100)).await;
            }
        }
    }

    /// Software-timer pump for the index scheduler and step engine.
    #[embassy_executor::task]
    pub async fn timer_task() {
        loop {
            unsafe { core() }.poll_timers();
            Timer::after(Duration::from_micros(250)).await;
        }
    }
}
