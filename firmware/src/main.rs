#![no_std]
#![no_main]

#[cfg(feature = "defmt")]
use defmt_rtt as _;

// Panic handler
use panic_halt as _;

use cortex_m_rt as _;

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};

use rustyfloppy_firmware::ram_image::RamImage;
use rustyfloppy_firmware::tasks::{foreground_task, timer_task};
use rustyfloppy_firmware::{board, init_core, Slot};

/// Main firmware entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    #[cfg(feature = "defmt")]
    defmt::info!("rustyfloppy {} starting", rustyfloppy_firmware::VERSION);

    rustyfloppy_firmware::time_driver_start();
    let hal = board::init();

    let core = init_core(hal, RamImage::new());
    core.init();

    // Until the storage stack hands us a real slot, mount the bring-up
    // image so the bus comes alive.
    core.insert(Slot::new(0, "blank.dd", false));

    spawner.must_spawn(foreground_task());
    spawner.must_spawn(timer_task());

    #[cfg(feature = "defmt")]
    defmt::info!("floppy interface ready");

    // Supervision loop.
    loop {
        Timer::after(Duration::from_secs(1)).await;
        #[cfg(feature = "defmt")]
        {
            let (cyl, head) = unsafe { rustyfloppy_firmware::core() }.track();
            defmt::trace!("heartbeat cyl={} head={}", cyl, head);
        }
    }
}
