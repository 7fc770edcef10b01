//! Gotek (STM32F105, 72 MHz) board layer
//!
//! Shugart interface wiring:
//!
//! | Signal  | Pin  | Peripheral                          |
//! |---------|------|-------------------------------------|
//! | SEL0    | PA0  | EXTI0, both edges                   |
//! | STEP    | PA1  | EXTI1, falling edge                 |
//! | DIR     | PB0  | sampled in the STEP handler         |
//! | SIDE    | PB4  | EXTI4, both edges                   |
//! | WGATE   | PB9  | EXTI9_5, both edges                 |
//! | WDATA   | PA15 | TIM2 CH1 capture -> DMA1 ch5        |
//! | RDATA   | PA7  | TIM3 CH2 PWM, ARR fed by DMA1 ch3   |
//! | outputs | PB2/3/5/7/8 (INDEX/RDY/WRPROT/DSKCHG/TRK0)|
//! | speaker | PA2  |                                     |
//!
//! Status outputs are active-low open-drain toward the bus. The step
//! soft-IRQ borrows the unused vector 43, pended from the EXTI1 handler
//! at the lowest priority so it never delays a DMA refill.

use floppy_core::clock::{sysclk_ns, Stamp, SYSCLK_MHZ};
use floppy_core::hal::{
    Clock, FloppyHal, FluxCapture, FluxOutput, IrqController, Speaker, StatusPort,
};
use floppy_core::outputs::pin;

mod regs {
    pub const RCC_AHBENR: u32 = 0x4002_1014;
    pub const RCC_APB2ENR: u32 = 0x4002_1018;
    pub const RCC_APB1ENR: u32 = 0x4002_101c;

    pub const GPIOA: u32 = 0x4001_0800;
    pub const GPIOA_IDR: u32 = 0x4001_0808;
    pub const GPIOA_BSRR: u32 = 0x4001_0810;
    pub const GPIOB: u32 = 0x4001_0c00;
    pub const GPIOB_IDR: u32 = 0x4001_0c08;
    pub const GPIOB_BSRR: u32 = 0x4001_0c10;

    pub const AFIO_MAPR: u32 = 0x4001_0004;
    pub const AFIO_EXTICR2: u32 = 0x4001_000c;
    pub const AFIO_EXTICR3: u32 = 0x4001_0010;

    pub const EXTI_IMR: u32 = 0x4001_0400;
    pub const EXTI_RTSR: u32 = 0x4001_0408;
    pub const EXTI_FTSR: u32 = 0x4001_040c;
    pub const EXTI_PR: u32 = 0x4001_0414;

    pub const TIM2_CR1: u32 = 0x4000_0000;
    pub const TIM2_DIER: u32 = 0x4000_000c;
    pub const TIM2_SR: u32 = 0x4000_0010;
    pub const TIM2_EGR: u32 = 0x4000_0014;
    pub const TIM2_CCMR1: u32 = 0x4000_0018;
    pub const TIM2_CCER: u32 = 0x4000_0020;
    pub const TIM2_PSC: u32 = 0x4000_0028;
    pub const TIM2_ARR: u32 = 0x4000_002c;
    pub const TIM2_CCR1: u32 = 0x4000_0034;

    pub const TIM3_CR1: u32 = 0x4000_0400;
    pub const TIM3_DIER: u32 = 0x4000_040c;
    pub const TIM3_EGR: u32 = 0x4000_0414;
    pub const TIM3_CCMR1: u32 = 0x4000_0418;
    pub const TIM3_CCER: u32 = 0x4000_0420;
    pub const TIM3_CNT: u32 = 0x4000_0424;
    pub const TIM3_PSC: u32 = 0x4000_0428;
    pub const TIM3_ARR: u32 = 0x4000_042c;
    pub const TIM3_CCR2: u32 = 0x4000_0438;

    pub const DMA1_IFCR: u32 = 0x4002_0004;
    pub const DMA1_CCR3: u32 = 0x4002_0030;
    pub const DMA1_CNDTR3: u32 = 0x4002_0034;
    pub const DMA1_CPAR3: u32 = 0x4002_0038;
    pub const DMA1_CMAR3: u32 = 0x4002_003c;
    pub const DMA1_CCR5: u32 = 0x4002_0058;
    pub const DMA1_CNDTR5: u32 = 0x4002_005c;
    pub const DMA1_CPAR5: u32 = 0x4002_0060;
    pub const DMA1_CMAR5: u32 = 0x4002_0064;

    pub const NVIC_ISER0: u32 = 0xe000_e100;
    pub const NVIC_ISER1: u32 = 0xe000_e104;
    pub const NVIC_ICER0: u32 = 0xe000_e180;
    pub const NVIC_ISPR0: u32 = 0xe000_e200;
    pub const NVIC_ISPR1: u32 = 0xe000_e204;
    pub const NVIC_IPR: u32 = 0xe000_e400;

    pub const DCB_DEMCR: u32 = 0xe000_edfc;
    pub const DWT_CTRL: u32 = 0xe000_1000;
    pub const DWT_CYCCNT: u32 = 0xe000_1004;
}

#[inline(always)]
fn write_reg(addr: u32, val: u32) {
    unsafe { core::ptr::write_volatile(addr as *mut u32, val) }
}

#[inline(always)]
fn read_reg(addr: u32) -> u32 {
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

#[inline(always)]
fn set_bits(addr: u32, bits: u32) {
    write_reg(addr, read_reg(addr) | bits);
}

// GPIO CRL/CRH configuration nibbles.
const GPI_BUS: u32 = 0x4; // floating input
const GPO_BUS: u32 = 0x2; // push-pull output, 2MHz
const AFO_BUS: u32 = 0xa; // alternate-function push-pull, 2MHz

/// Set one pin's 4-bit configuration field.
fn configure_pin(gpio: u32, pin: u32, cfg: u32) {
    let reg = gpio + if pin < 8 { 0x0 } else { 0x4 };
    let shift = (pin % 8) * 4;
    let val = read_reg(reg) & !(0xf << shift);
    write_reg(reg, val | (cfg << shift));
}

/// Interrupt numbers this board uses.
pub mod irqn {
    pub const EXTI0: u32 = 6; // SEL0
    pub const EXTI1: u32 = 7; // STEP
    pub const EXTI4: u32 = 10; // SIDE
    pub const EXTI9_5: u32 = 23; // WGATE
    pub const DMA1_CH3: u32 = 13; // RDATA
    pub const DMA1_CH5: u32 = 15; // WDATA
    /// Unused vector drafted as the low-priority step soft-IRQ.
    pub const STEP_SOFT: u32 = 43;
}

/// Physical PB bit for each logical status pin.
fn port_bits(mask: u16) -> u32 {
    let mut bits = 0;
    if mask & pin::INDEX != 0 {
        bits |= 1 << 2;
    }
    if mask & pin::RDY != 0 {
        bits |= 1 << 3;
    }
    if mask & pin::WRPROT != 0 {
        bits |= 1 << 5;
    }
    if mask & pin::DSKCHG != 0 {
        bits |= 1 << 7;
    }
    if mask & pin::TRK0 != 0 {
        bits |= 1 << 8;
    }
    bits
}

/// RDATA: TIM3 CH2 in PWM mode 1, counter at full SYSCLK. The compare
/// value pins the pulse at 400ns; circular DMA rewrites ARR from the
/// sample ring, so the gap between pulses is the flux interval.
pub struct RdataChannel {
    len: u16,
}

// DMA channel CCR bits.
const DMA_CCR_BASE: u32 = (0b10 << 12) | (1 << 10) | (1 << 8) | (1 << 7) | (1 << 5) | (1 << 2) | (1 << 1);
const DMA_CCR_DIR_M2P: u32 = 1 << 4;
const DMA_CCR_EN: u32 = 1;

impl RdataChannel {
    fn set_pin_af(&self, timer_owned: bool) {
        // PA7 belongs to TIM3 while streaming, reverts to a plain output
        // at the idle level otherwise.
        configure_pin(regs::GPIOA, 7, if timer_owned { AFO_BUS } else { GPO_BUS });
    }
}

impl FluxOutput for RdataChannel {
    fn configure(&mut self, buf: *const u16, len: u16) {
        self.len = len;

        write_reg(regs::TIM3_PSC, 0);
        // CH2 output, PWM mode 1.
        write_reg(regs::TIM3_CCMR1, 0b110 << 12);
        // Active low toward the bus: CC2E + CC2P.
        write_reg(regs::TIM3_CCER, (1 << 4) | (1 << 5));
        write_reg(regs::TIM3_CCR2, sysclk_ns(400));
        // Update event drives the DMA request.
        write_reg(regs::TIM3_DIER, 1 << 8);

        write_reg(regs::DMA1_CPAR3, regs::TIM3_ARR);
        write_reg(regs::DMA1_CMAR3, buf as u32);
        write_reg(regs::DMA1_CNDTR3, len as u32);
    }

    fn start(&mut self, selected: bool) {
        write_reg(regs::DMA1_CCR3, DMA_CCR_BASE | DMA_CCR_DIR_M2P | DMA_CCR_EN);
        // Load the first sample before the counter runs.
        write_reg(regs::TIM3_EGR, 1);
        write_reg(regs::TIM3_CR1, 1);
        if selected {
            self.set_pin_af(true);
        }
    }

    fn stop(&mut self) {
        self.set_pin_af(false);
        write_reg(regs::TIM3_CR1, 0);
        write_reg(regs::DMA1_CCR3, 0);
        write_reg(regs::DMA1_CNDTR3, self.len as u32);
    }

    fn gate_output(&mut self, selected: bool) {
        self.set_pin_af(selected);
    }

    fn residue(&self) -> u16 {
        read_reg(regs::DMA1_CNDTR3) as u16
    }

    fn sample_remaining(&self) -> u32 {
        read_reg(regs::TIM3_ARR).wrapping_sub(read_reg(regs::TIM3_CNT)) & 0xffff
    }
}

/// WDATA: TIM2 CH1 input capture on the falling edge of PA15 (partial
/// remap), free-running 16-bit counter at full SYSCLK, captures copied
/// into the ring by circular DMA.
pub struct WdataChannel {
    len: u16,
}

impl FluxCapture for WdataChannel {
    fn configure(&mut self, buf: *mut u16, len: u16) {
        self.len = len;

        write_reg(regs::TIM2_PSC, 0);
        write_reg(regs::TIM2_ARR, 0xffff);
        // CH1 input, TI1, no filter or prescale.
        write_reg(regs::TIM2_CCMR1, 0b01);
        // Capture event drives the DMA request.
        write_reg(regs::TIM2_DIER, 1 << 9);

        write_reg(regs::DMA1_CPAR5, regs::TIM2_CCR1);
        write_reg(regs::DMA1_CMAR5, buf as u32);
    }

    fn start(&mut self) {
        write_reg(regs::DMA1_CNDTR5, self.len as u32);
        write_reg(regs::DMA1_CCR5, DMA_CCR_BASE | DMA_CCR_EN);
        // CC1E + CC1P: falling edges.
        write_reg(regs::TIM2_CCER, (1 << 0) | (1 << 1));
        write_reg(regs::TIM2_EGR, 1);
        write_reg(regs::TIM2_SR, 0); // settles the forced update
        write_reg(regs::TIM2_CR1, 1);
    }

    fn stop(&mut self) {
        write_reg(regs::TIM2_CCER, 0);
        write_reg(regs::TIM2_CR1, 0);
        write_reg(regs::DMA1_CCR5, 0);
    }

    fn residue(&self) -> u16 {
        read_reg(regs::DMA1_CNDTR5) as u16
    }
}

/// Status outputs on port B, active low.
pub struct BusPort;

impl StatusPort for BusPort {
    fn write_pins(&mut self, mask: u16, active: bool) {
        let bits = port_bits(mask);
        if active {
            write_reg(regs::GPIOB_BSRR, bits << 16); // drive low
        } else {
            write_reg(regs::GPIOB_BSRR, bits); // release high
        }
    }
}

pub struct NvicIrq;

impl NvicIrq {
    fn pend(&self, n: u32) {
        let reg = if n < 32 {
            regs::NVIC_ISPR0
        } else {
            regs::NVIC_ISPR1
        };
        write_reg(reg, 1 << (n % 32));
    }
}

impl IrqController for NvicIrq {
    fn pend_rdata(&mut self) {
        self.pend(irqn::DMA1_CH3);
    }

    fn pend_wdata(&mut self) {
        self.pend(irqn::DMA1_CH5);
    }

    fn pend_step(&mut self) {
        self.pend(irqn::STEP_SOFT);
    }

    fn enable_flux_irqs(&mut self) {
        write_reg(regs::DMA1_IFCR, (0xf << 8) | (0xf << 16)); // clear ch3/ch5
        write_reg(
            regs::NVIC_ISER0,
            (1 << irqn::DMA1_CH3) | (1 << irqn::DMA1_CH5),
        );
    }

    fn disable_flux_irqs(&mut self) {
        write_reg(
            regs::NVIC_ICER0,
            (1 << irqn::DMA1_CH3) | (1 << irqn::DMA1_CH5),
        );
    }
}

/// Piezo on PA2; a level flip per step is click enough.
pub struct ClickSpeaker {
    level: bool,
}

impl Speaker for ClickSpeaker {
    fn click(&mut self) {
        self.level = !self.level;
        let bit = 1u32 << 2;
        write_reg(
            regs::GPIOA_BSRR,
            if self.level { bit } else { bit << 16 },
        );
    }
}

/// Microsecond clock from the DWT cycle counter.
pub struct CycleClock;

impl Clock for CycleClock {
    fn now(&self) -> Stamp {
        read_reg(regs::DWT_CYCCNT) / SYSCLK_MHZ
    }

    fn delay_us(&self, us: u32) {
        let start = read_reg(regs::DWT_CYCCNT);
        let ticks = us * SYSCLK_MHZ;
        while read_reg(regs::DWT_CYCCNT).wrapping_sub(start) < ticks {}
    }
}

pub struct BoardHal {
    rdata: RdataChannel,
    wdata: WdataChannel,
    port: BusPort,
    irq: NvicIrq,
    speaker: ClickSpeaker,
    clock: CycleClock,
}

impl FloppyHal for BoardHal {
    type Rdata = RdataChannel;
    type Wdata = WdataChannel;
    type Port = BusPort;
    type Irq = NvicIrq;
    type Spkr = ClickSpeaker;
    type Clk = CycleClock;

    fn rdata(&mut self) -> &mut Self::Rdata {
        &mut self.rdata
    }

    fn wdata(&mut self) -> &mut Self::Wdata {
        &mut self.wdata
    }

    fn port(&mut self) -> &mut Self::Port {
        &mut self.port
    }

    fn irq(&mut self) -> &mut Self::Irq {
        &mut self.irq
    }

    fn speaker(&mut self) -> &mut Self::Spkr {
        &mut self.speaker
    }

    fn clock(&self) -> &Self::Clk {
        &self.clock
    }
}

/// Bring the board up and hand back the HAL. Interrupt priorities run
/// flux DMA above the bus EXTIs, with the step soft-IRQ below everything.
pub fn init() -> BoardHal {
    // Clocks: port A/B + AFIO, TIM2/TIM3, DMA1.
    set_bits(regs::RCC_APB2ENR, (1 << 0) | (1 << 2) | (1 << 3));
    set_bits(regs::RCC_APB1ENR, (1 << 0) | (1 << 1));
    set_bits(regs::RCC_AHBENR, 1 << 0);

    // Cycle counter for the microsecond clock.
    set_bits(regs::DCB_DEMCR, 1 << 24);
    set_bits(regs::DWT_CTRL, 1);

    // TIM2 CH1 on PA15.
    set_bits(regs::AFIO_MAPR, 0b01 << 8);

    // Bus inputs.
    configure_pin(regs::GPIOA, 0, GPI_BUS); // SEL0
    configure_pin(regs::GPIOA, 1, GPI_BUS); // STEP
    configure_pin(regs::GPIOA, 15, GPI_BUS); // WDATA
    configure_pin(regs::GPIOB, 0, GPI_BUS); // DIR
    configure_pin(regs::GPIOB, 4, GPI_BUS); // SIDE
    configure_pin(regs::GPIOB, 9, GPI_BUS); // WGATE

    // Status outputs, released high before the drivers enable.
    write_reg(regs::GPIOB_BSRR, port_bits(pin::ALL));
    for p in [2, 3, 5, 7, 8] {
        configure_pin(regs::GPIOB, p, GPO_BUS);
    }
    configure_pin(regs::GPIOA, 2, GPO_BUS); // speaker
    configure_pin(regs::GPIOA, 7, GPO_BUS); // RDATA idle

    // EXTI routing: lines 0/1 default to port A; line 4 and 9 to port B.
    set_bits(regs::AFIO_EXTICR2, 0b0001);
    set_bits(regs::AFIO_EXTICR3, 0b0001 << 4);

    // SEL/SIDE/WGATE on both edges, STEP falling only.
    set_bits(regs::EXTI_RTSR, (1 << 0) | (1 << 4) | (1 << 9));
    set_bits(regs::EXTI_FTSR, (1 << 0) | (1 << 1) | (1 << 4) | (1 << 9));
    set_bits(regs::EXTI_IMR, (1 << 0) | (1 << 1) | (1 << 4) | (1 << 9));

    // Priorities, most urgent first.
    unsafe {
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::DMA1_CH3) as *mut u8, 0x10);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::DMA1_CH5) as *mut u8, 0x20);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::EXTI0) as *mut u8, 0x30);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::EXTI1) as *mut u8, 0x30);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::EXTI4) as *mut u8, 0x30);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::EXTI9_5) as *mut u8, 0x30);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::STEP_SOFT) as *mut u8, 0xe0);
    }

    // Step is edge-only: start clear. Level-derived lines are primed by
    // pending them once so the handlers latch the cable's state.
    write_reg(regs::EXTI_PR, 1 << 1);
    write_reg(
        regs::NVIC_ISER0,
        (1 << irqn::EXTI0) | (1 << irqn::EXTI1) | (1 << irqn::EXTI4) | (1 << irqn::EXTI9_5),
    );
    write_reg(regs::NVIC_ISER1, 1 << (irqn::STEP_SOFT - 32));
    write_reg(regs::NVIC_ISPR0, (1 << irqn::EXTI0) | (1 << irqn::EXTI4) | (1 << irqn::EXTI9_5));

    BoardHal {
        rdata: RdataChannel { len: 0 },
        wdata: WdataChannel { len: 0 },
        port: BusPort,
        irq: NvicIrq,
        speaker: ClickSpeaker { level: false },
        clock: CycleClock,
    }
}

// Interrupt handlers. The bus inputs are active low.

fn bus_input(bit: u32) -> bool {
    read_reg(regs::GPIOB_IDR) & (1 << bit) == 0
}

#[no_mangle]
pub extern "C" fn EXTI0() {
    write_reg(regs::EXTI_PR, 1 << 0);
    let selected = read_reg(regs::GPIOA_IDR) & 1 == 0;
    unsafe { crate::core() }.on_select(selected);
}

#[no_mangle]
pub extern "C" fn EXTI1() {
    write_reg(regs::EXTI_PR, 1 << 1);
    // Direction latched from DIR at the pulse edge: low means inward.
    let inward = bus_input(0);
    unsafe { crate::core() }.on_step_pulse(inward);
}

#[no_mangle]
pub extern "C" fn EXTI4() {
    write_reg(regs::EXTI_PR, 1 << 4);
    let side = if bus_input(4) { 1 } else { 0 };
    unsafe { crate::core() }.on_side(side);
}

#[no_mangle]
pub extern "C" fn EXTI9_5() {
    write_reg(regs::EXTI_PR, 1 << 9);
    unsafe { crate::core() }.on_write_gate(bus_input(9));
}

#[no_mangle]
pub extern "C" fn DMA1_CHANNEL3() {
    write_reg(regs::DMA1_IFCR, 0xf << 8);
    unsafe { crate::core() }.on_rdata_dma();
}

#[no_mangle]
pub extern "C" fn DMA1_CHANNEL5() {
    write_reg(regs::DMA1_IFCR, 0xf << 16);
    unsafe { crate::core() }.on_wdata_dma();
}

/// Vector 43: the step soft-IRQ.
#[no_mangle]
pub extern "C" fn STEP_SOFT_IRQ() {
    unsafe { crate::core() }.on_step_soft_irq();
}
