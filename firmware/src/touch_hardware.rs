//! Touch-display board (STM32F103, 72 MHz) layer
//!
//! Same engine wiring as the Gotek build with the bus moved off the
//! display pins: RDATA on TIM3 CH1/PA6 (DMA1 ch3 from TIM3_UP), WDATA on
//! TIM4 CH1/PB6 (DMA1 ch1 from TIM4_CC1), status outputs on PC0..PC4,
//! bus inputs on PC6..PC9, speaker on PB1. Only what differs from the
//! Gotek layer is spelled out here; the flux programming model is
//! identical.

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
    pub const GPIOB: u32 = 0x4001_0c00;
    pub const GPIOB_BSRR: u32 = 0x4001_0c10;
    pub const GPIOC: u32 = 0x4001_1000;
    pub const GPIOC_IDR: u32 = 0x4001_1008;
    pub const GPIOC_BSRR: u32 = 0x4001_1010;

    pub const AFIO_EXTICR2: u32 = 0x4001_000c;
    pub const AFIO_EXTICR3: u32 = 0x4001_0010;

    pub const EXTI_RTSR: u32 = 0x4001_0408;
    pub const EXTI_FTSR: u32 = 0x4001_040c;
    pub const EXTI_IMR: u32 = 0x4001_0400;
    pub const EXTI_PR: u32 = 0x4001_0414;

    pub const TIM3_CR1: u32 = 0x4000_0400;
    pub const TIM3_DIER: u32 = 0x4000_040c;
    pub const TIM3_EGR: u32 = 0x4000_0414;
    pub const TIM3_CCMR1: u32 = 0x4000_0418;
    pub const TIM3_CCER: u32 = 0x4000_0420;
    pub const TIM3_CNT: u32 = 0x4000_0424;
    pub const TIM3_PSC: u32 = 0x4000_0428;
    pub const TIM3_ARR: u32 = 0x4000_042c;
    pub const TIM3_CCR1: u32 = 0x4000_0434;

    pub const TIM4_CR1: u32 = 0x4000_0800;
    pub const TIM4_DIER: u32 = 0x4000_080c;
    pub const TIM4_SR: u32 = 0x4000_0810;
    pub const TIM4_EGR: u32 = 0x4000_0814;
    pub const TIM4_CCMR1: u32 = 0x4000_0818;
    pub const TIM4_CCER: u32 = 0x4000_0820;
    pub const TIM4_PSC: u32 = 0x4000_0828;
    pub const TIM4_ARR: u32 = 0x4000_082c;
    pub const TIM4_CCR1: u32 = 0x4000_0834;

    pub const DMA1_IFCR: u32 = 0x4002_0004;
    pub const DMA1_CCR1: u32 = 0x4002_0008;
    pub const DMA1_CNDTR1: u32 = 0x4002_000c;
    pub const DMA1_CPAR1: u32 = 0x4002_0010;
    pub const DMA1_CMAR1: u32 = 0x4002_0014;
    pub const DMA1_CCR3: u32 = 0x4002_0030;
    pub const DMA1_CNDTR3: u32 = 0x4002_0034;
    pub const DMA1_CPAR3: u32 = 0x4002_0038;
    pub const DMA1_CMAR3: u32 = 0x4002_003c;

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

const GPI_BUS: u32 = 0x4;
const GPO_BUS: u32 = 0x2;
const AFO_BUS: u32 = 0xa;

fn configure_pin(gpio: u32, p: u32, cfg: u32) {
    let reg = gpio + if p < 8 { 0x0 } else { 0x4 };
    let shift = (p % 8) * 4;
    let val = read_reg(reg) & !(0xf << shift);
    write_reg(reg, val | (cfg << shift));
}

pub mod irqn {
    pub const EXTI9_5: u32 = 23; // SEL0 (PC6), STEP (PC7), SIDE (PC8), WGATE (PC9)
    pub const DMA1_CH3: u32 = 13; // RDATA
    pub const DMA1_CH1: u32 = 11; // WDATA
    pub const STEP_SOFT: u32 = 43;
}

const DMA_CCR_BASE: u32 =
    (0b10 << 12) | (1 << 10) | (1 << 8) | (1 << 7) | (1 << 5) | (1 << 2) | (1 << 1);
const DMA_CCR_DIR_M2P: u32 = 1 << 4;
const DMA_CCR_EN: u32 = 1;

/// Status outputs on PC0..PC4 in logical-mask order, active low.
fn port_bits(mask: u16) -> u32 {
    (mask & pin::ALL) as u32
}

pub struct RdataChannel {
    len: u16,
}

impl FluxOutput for RdataChannel {
    fn configure(&mut self, buf: *const u16, len: u16) {
        self.len = len;
        write_reg(regs::TIM3_PSC, 0);
        write_reg(regs::TIM3_CCMR1, 0b110 << 4); // CH1 PWM mode 1
        write_reg(regs::TIM3_CCER, (1 << 0) | (1 << 1));
        write_reg(regs::TIM3_CCR1, sysclk_ns(400));
        write_reg(regs::TIM3_DIER, 1 << 8);

        write_reg(regs::DMA1_CPAR3, regs::TIM3_ARR);
        write_reg(regs::DMA1_CMAR3, buf as u32);
        write_reg(regs::DMA1_CNDTR3, len as u32);
    }

    fn start(&mut self, selected: bool) {
        write_reg(regs::DMA1_CCR3, DMA_CCR_BASE | DMA_CCR_DIR_M2P | DMA_CCR_EN);
        write_reg(regs::TIM3_EGR, 1);
        write_reg(regs::TIM3_CR1, 1);
        if selected {
            configure_pin(regs::GPIOA, 6, AFO_BUS);
        }
    }

    fn stop(&mut self) {
        configure_pin(regs::GPIOA, 6, GPO_BUS);
        write_reg(regs::TIM3_CR1, 0);
        write_reg(regs::DMA1_CCR3, 0);
        write_reg(regs::DMA1_CNDTR3, self.len as u32);
    }

    fn gate_output(&mut self, selected: bool) {
        configure_pin(regs::GPIOA, 6, if selected { AFO_BUS } else { GPO_BUS });
    }

    fn residue(&self) -> u16 {
        read_reg(regs::DMA1_CNDTR3) as u16
    }

    fn sample_remaining(&self) -> u32 {
        read_reg(regs::TIM3_ARR).wrapping_sub(read_reg(regs::TIM3_CNT)) & 0xffff
    }
}

pub struct WdataChannel {
    len: u16,
}

impl FluxCapture for WdataChannel {
    fn configure(&mut self, buf: *mut u16, len: u16) {
        self.len = len;
        write_reg(regs::TIM4_PSC, 0);
        write_reg(regs::TIM4_ARR, 0xffff);
        write_reg(regs::TIM4_CCMR1, 0b01); // CH1 input from TI1
        write_reg(regs::TIM4_DIER, 1 << 9);

        write_reg(regs::DMA1_CPAR1, regs::TIM4_CCR1);
        write_reg(regs::DMA1_CMAR1, buf as u32);
    }

    fn start(&mut self) {
        write_reg(regs::DMA1_CNDTR1, self.len as u32);
        write_reg(regs::DMA1_CCR1, DMA_CCR_BASE | DMA_CCR_EN);
        write_reg(regs::TIM4_CCER, (1 << 0) | (1 << 1)); // falling edges
        write_reg(regs::TIM4_EGR, 1);
        write_reg(regs::TIM4_SR, 0);
        write_reg(regs::TIM4_CR1, 1);
    }

    fn stop(&mut self) {
        write_reg(regs::TIM4_CCER, 0);
        write_reg(regs::TIM4_CR1, 0);
        write_reg(regs::DMA1_CCR1, 0);
    }

    fn residue(&self) -> u16 {
        read_reg(regs::DMA1_CNDTR1) as u16
    }
}

pub struct BusPort;

impl StatusPort for BusPort {
    fn write_pins(&mut self, mask: u16, active: bool) {
        let bits = port_bits(mask);
        if active {
            write_reg(regs::GPIOC_BSRR, bits << 16);
        } else {
            write_reg(regs::GPIOC_BSRR, bits);
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
        self.pend(irqn::DMA1_CH1);
    }

    fn pend_step(&mut self) {
        self.pend(irqn::STEP_SOFT);
    }

    fn enable_flux_irqs(&mut self) {
        write_reg(regs::DMA1_IFCR, 0xf | (0xf << 8));
        write_reg(
            regs::NVIC_ISER0,
            (1 << irqn::DMA1_CH3) | (1 << irqn::DMA1_CH1),
        );
    }

    fn disable_flux_irqs(&mut self) {
        write_reg(
            regs::NVIC_ICER0,
            (1 << irqn::DMA1_CH3) | (1 << irqn::DMA1_CH1),
        );
    }
}

pub struct ClickSpeaker {
    level: bool,
}

impl Speaker for ClickSpeaker {
    fn click(&mut self) {
        self.level = !self.level;
        let bit = 1u32 << 1; // PB1
        write_reg(regs::GPIOB_BSRR, if self.level { bit } else { bit << 16 });
    }
}

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

pub fn init() -> BoardHal {
    set_bits(regs::RCC_APB2ENR, (1 << 0) | (1 << 2) | (1 << 3) | (1 << 4));
    set_bits(regs::RCC_APB1ENR, (1 << 1) | (1 << 2)); // TIM3, TIM4
    set_bits(regs::RCC_AHBENR, 1 << 0);

    set_bits(regs::DCB_DEMCR, 1 << 24);
    set_bits(regs::DWT_CTRL, 1);

    for p in [6, 7, 8, 9] {
        configure_pin(regs::GPIOC, p, GPI_BUS); // SEL0/STEP/SIDE/WGATE
    }
    configure_pin(regs::GPIOC, 5, GPI_BUS); // DIR
    configure_pin(regs::GPIOB, 6, GPI_BUS); // WDATA

    write_reg(regs::GPIOC_BSRR, port_bits(pin::ALL));
    for p in 0..5 {
        configure_pin(regs::GPIOC, p, GPO_BUS);
    }
    configure_pin(regs::GPIOB, 1, GPO_BUS); // speaker
    configure_pin(regs::GPIOA, 6, GPO_BUS); // RDATA idle

    // EXTI 6..9 from port C.
    set_bits(regs::AFIO_EXTICR2, 0b0010 << 8 | 0b0010 << 12);
    set_bits(regs::AFIO_EXTICR3, 0b0010 | 0b0010 << 4);
    set_bits(regs::EXTI_RTSR, (1 << 6) | (1 << 8) | (1 << 9));
    set_bits(regs::EXTI_FTSR, (1 << 6) | (1 << 7) | (1 << 8) | (1 << 9));
    set_bits(regs::EXTI_IMR, (1 << 6) | (1 << 7) | (1 << 8) | (1 << 9));

    unsafe {
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::DMA1_CH3) as *mut u8, 0x10);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::DMA1_CH1) as *mut u8, 0x20);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::EXTI9_5) as *mut u8, 0x30);
        core::ptr::write_volatile((regs::NVIC_IPR + irqn::STEP_SOFT) as *mut u8, 0xe0);
    }

    // Edge-only step line starts clear; the level-derived lines prime.
    write_reg(regs::EXTI_PR, 1 << 7);
    write_reg(regs::NVIC_ISER0, 1 << irqn::EXTI9_5);
    write_reg(regs::NVIC_ISER1, 1 << (irqn::STEP_SOFT - 32));
    write_reg(regs::NVIC_ISPR0, 1 << irqn::EXTI9_5);

    BoardHal {
        rdata: RdataChannel { len: 0 },
        wdata: WdataChannel { len: 0 },
        port: BusPort,
        irq: NvicIrq,
        speaker: ClickSpeaker { level: false },
        clock: CycleClock,
    }
}

fn bus_input(bit: u32) -> bool {
    read_reg(regs::GPIOC_IDR) & (1 << bit) == 0
}

/// All four bus lines share EXTI9_5 on this board.
#[no_mangle]
pub extern "C" fn EXTI9_5() {
    let pending = read_reg(regs::EXTI_PR) & 0x3c0;
    write_reg(regs::EXTI_PR, pending);
    let core = unsafe { crate::core() };
    if pending & (1 << 6) != 0 {
        core.on_select(bus_input(6));
    }
    if pending & (1 << 7) != 0 {
        core.on_step_pulse(bus_input(5)); // DIR low means inward
    }
    if pending & (1 << 8) != 0 {
        core.on_side(if bus_input(8) { 1 } else { 0 });
    }
    if pending & (1 << 9) != 0 {
        core.on_write_gate(bus_input(9));
    }
}

#[no_mangle]
pub extern "C" fn DMA1_CHANNEL3() {
    write_reg(regs::DMA1_IFCR, 0xf << 8);
    unsafe { crate::core() }.on_rdata_dma();
}

#[no_mangle]
pub extern "C" fn DMA1_CHANNEL1() {
    write_reg(regs::DMA1_IFCR, 0xf);
    unsafe { crate::core() }.on_wdata_dma();
}

/// Vector 43: the step soft-IRQ.
#[no_mangle]
pub extern "C" fn STEP_SOFT_IRQ() {
    unsafe { crate::core() }.on_step_soft_irq();
}
