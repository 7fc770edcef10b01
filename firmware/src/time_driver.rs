//! Embassy time driver over SysTick
//!
//! 1 MHz tick domain. SysTick fires at 1 kHz and carries the high bits;
//! the current-value register fills in the microseconds. One alarm slot
//! is enough for this executor.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};
use critical_section::Mutex;
use embassy_time_driver::{AlarmHandle, Driver};

const SYSTICK_CSR: u32 = 0xe000_e010;
const SYSTICK_RVR: u32 = 0xe000_e014;
const SYSTICK_CVR: u32 = 0xe000_e018;

/// Core clock ticks per millisecond tick.
const RELOAD: u32 = 72_000;

// Context is carried as usize so the alarm slot stays Send.
type Alarm = (u64, fn(*mut ()), usize);

struct SysTickDriver {
    millis: AtomicU32,
    alarm: Mutex<Cell<Option<Alarm>>>,
}

impl SysTickDriver {
    /// Start the 1 kHz tick. Called once from board init.
    pub fn start(&self) {
        unsafe {
            core::ptr::write_volatile(SYSTICK_RVR as *mut u32, RELOAD - 1);
            core::ptr::write_volatile(SYSTICK_CVR as *mut u32, 0);
            // Core clock source, interrupt, enable.
            core::ptr::write_volatile(SYSTICK_CSR as *mut u32, 0b111);
        }
    }

    /// SysTick interrupt: advance time, fire a due alarm.
    pub fn tick(&self) {
        let now = self.millis.fetch_add(1, Ordering::Relaxed) as u64 * 1000;
        critical_section::with(|cs| {
            let slot = self.alarm.borrow(cs);
            if let Some((at, callback, ctx)) = slot.get() {
                if now >= at {
                    slot.set(None);
                    callback(ctx as *mut ());
                }
            }
        });
    }
}

impl Driver for SysTickDriver {
    fn now(&self) -> u64 {
        let ms = self.millis.load(Ordering::Relaxed) as u64;
        let sub = unsafe { core::ptr::read_volatile(SYSTICK_CVR as *const u32) };
        ms * 1000 + ((RELOAD - 1 - sub) / 72) as u64
    }

    unsafe fn allocate_alarm(&self) -> Option<AlarmHandle> {
        Some(AlarmHandle::new(0))
    }

    fn set_alarm_callback(&self, _alarm: AlarmHandle, callback: fn(*mut ()), ctx: *mut ()) {
        critical_section::with(|cs| {
            let slot = self.alarm.borrow(cs);
            let at = slot.get().map(|(at, _, _)| at).unwrap_or(u64::MAX);
            slot.set(Some((at, callback, ctx as usize)));
        });
    }

    fn set_alarm(&self, _alarm: AlarmHandle, timestamp: u64) -> bool {
        critical_section::with(|cs| {
            let slot = self.alarm.borrow(cs);
            if let Some((_, callback, ctx)) = slot.get() {
                slot.set(Some((timestamp, callback, ctx)));
            }
        });
        timestamp > self.now()
    }
}

embassy_time_driver::time_driver_impl!(static DRIVER: SysTickDriver = SysTickDriver {
    millis: AtomicU32::new(0),
    alarm: Mutex::new(Cell::new(None)),
});

/// Start the tick source. Call from board init before spawning tasks.
pub fn start() {
    DRIVER.start();
}

#[no_mangle]
pub extern "C" fn SysTick() {
    DRIVER.tick();
}
