//! Solar surplus load diverter on a blue pill board
//!
//! Analog inputs, conditioned around a floating ground at half of the ADC range:
//!   PA0 = reference (floating ground)
//!   PA1 = grid voltage
//!   PA2 = generated current
//!   PA3 = consumed current
//!   PA4 = left open, its noise seeds the refresh jitter
//!
//! Solid state relays on PB6, PB7, PB8 as push pull outputs
//! Manual/automatic switches on PB12, PB13, PB14 as inputs with internal pullup (open = automatic)
//! 433MHz transmitter data input on PB9
//!
//! The event lines are written to the semihosting console, so a debugger must be
//! attached: without it the first semihosting call halts the core.
#![no_main]
#![no_std]

use panic_halt as _;

use core::cell::Cell;
use core::fmt::Write;

use cortex_m::peripheral::{DCB, DWT};
use cortex_m_rt::{entry, exception, ExceptionFrame};
use cortex_m_semihosting::hio::{self, HostStream};
use embedded_hal::adc::OneShot;
use stm32f1xx_hal::{
    adc::Adc,
    gpio::{ErasedPin, Input, Output, PullUp, PushPull},
    pac,
    prelude::*,
    rcc::Clocks,
    watchdog::IndependentWatchdog,
};
use surplus_pill::{
    actuator::Actuator,
    controller::Controller,
    loads::{LoadConfig, Loads, RadioLink, N_LOADS_MAX},
    pins::PinBank,
    quantity::{QuantityConfig, QuantityEngine},
    radio::{Radio, RadioModel, GMOMXSEN_CODES},
    sampler::{
        AdcSampler, AnalogSimulation, SelectableSource, Simulation, Sampler, SyntheticSampler,
        MAINS_FREQ_HZ, SAMPLES_PER_CYCLE,
    },
    schedule::{Schedule, ScheduleConfig},
    time::{MicroSeconds, Time, TimeSource},
    Error,
};

/// the ADC of the STM32F103 has 12 bits
const ADC_STEPS: u16 = 4096;
/// bench setting, replaces the inputs when not `Off`
const SIMULATION: Simulation = Simulation::Off;

const LOADS: [LoadConfig; N_LOADS_MAX] = [
    LoadConfig {
        name: "boil",
        power_w: 1500.0,
        lock_on_s: 300,
        lock_off_s: 120,
        output: Some(0),
        mode_input: Some(0),
        radio: Some(RadioLink {
            model: RadioModel::Gmomxsen,
            channel: 1,
        }),
    },
    LoadConfig {
        name: "heat",
        power_w: 800.0,
        lock_on_s: 120,
        lock_off_s: 120,
        output: Some(1),
        mode_input: Some(1),
        radio: Some(RadioLink {
            model: RadioModel::Gmomxsen,
            channel: 2,
        }),
    },
    LoadConfig {
        name: "pump",
        power_w: 300.0,
        lock_on_s: 60,
        lock_off_s: 60,
        output: Some(2),
        mode_input: Some(2),
        radio: None,
    },
];

/// Extends the 32 bit cycle counter of the DWT into microseconds and seconds.
/// Must be read at least once per counter wrap around (a minute at 72MHz).
pub struct DwtClock {
    cycles_per_us: u32,
    last: Cell<u32>,
    residue: Cell<u32>,
    micros: Cell<u32>,
    sub_second: Cell<u32>,
    seconds: Cell<u32>,
}

impl DwtClock {
    pub fn new(mut dwt: DWT, mut dcb: DCB, clocks: Clocks) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();

        // now the CYCCNT counter can't be stopped or resetted
        drop(dwt);

        DwtClock {
            cycles_per_us: (clocks.sysclk().raw() / 1_000_000).max(1),
            last: Cell::new(DWT::cycle_count()),
            residue: Cell::new(0),
            micros: Cell::new(0),
            sub_second: Cell::new(0),
            seconds: Cell::new(0),
        }
    }

    fn update(&self) -> u32 {
        let now = DWT::cycle_count();
        let cycles = now.wrapping_sub(self.last.get()).wrapping_add(self.residue.get());
        self.last.set(now);

        let us = cycles / self.cycles_per_us;
        self.residue.set(cycles % self.cycles_per_us);

        let sub_second = self.sub_second.get() + us;
        self.seconds
            .set(self.seconds.get().wrapping_add(sub_second / 1_000_000));
        self.sub_second.set(sub_second % 1_000_000);

        let micros = self.micros.get().wrapping_add(us);
        self.micros.set(micros);
        micros
    }

    /// Free running seconds counter
    pub fn seconds(&self) -> u32 {
        self.update();
        self.seconds.get()
    }
}

impl TimeSource<u32, MicroSeconds> for &DwtClock {
    fn now(&self) -> Time<u32, MicroSeconds> {
        Time::from(self.update())
    }
}

#[entry]
fn main() -> ! {
    let device = pac::Peripherals::take().unwrap();
    let core = cortex_m::Peripherals::take().unwrap();

    let mut watchdog = IndependentWatchdog::new(device.IWDG);
    watchdog.start(2_000.millis());

    let mut console = hio::hstdout().unwrap();

    if let Err(e) = run(device, core, &mut watchdog, &mut console) {
        let _ = writeln!(console, "halted: {}", e);
    }

    // the watchdog restarts the board
    loop {
        cortex_m::asm::wfi();
    }
}

fn run(
    device: pac::Peripherals,
    core: cortex_m::Peripherals,
    watchdog: &mut IndependentWatchdog,
    console: &mut HostStream,
) -> Result<(), Error> {
    let mut flash = device.FLASH.constrain();
    let rcc = device.RCC.constrain();
    let clocks = rcc
        .cfgr
        .use_hse(8.MHz())
        .sysclk(72.MHz())
        .hclk(72.MHz())
        .pclk1(36.MHz())
        .pclk2(72.MHz())
        .adcclk(9.MHz()) //ADC clock: PCLK2 / 8
        .freeze(&mut flash.acr);
    watchdog.feed();

    let mut gpioa = device.GPIOA.split();
    let mut gpiob = device.GPIOB.split();

    // analog inputs:
    let reference = gpioa.pa0.into_analog(&mut gpioa.crl);
    let voltage = gpioa.pa1.into_analog(&mut gpioa.crl);
    let generated = gpioa.pa2.into_analog(&mut gpioa.crl);
    let consumed = gpioa.pa3.into_analog(&mut gpioa.crl);
    let mut open = gpioa.pa4.into_analog(&mut gpioa.crl);

    let mut adc = Adc::adc1(device.ADC1, clocks);
    let seed: u16 = nb::block!(adc.read(&mut open)).unwrap_or(0);

    // relays and mode switches:
    let mut pins: PinBank<ErasedPin<Output<PushPull>>, ErasedPin<Input<PullUp>>, N_LOADS_MAX> =
        PinBank::new();
    pins.add_output(gpiob.pb6.into_push_pull_output(&mut gpiob.crl).erase())?;
    pins.add_output(gpiob.pb7.into_push_pull_output(&mut gpiob.crl).erase())?;
    pins.add_output(gpiob.pb8.into_push_pull_output(&mut gpiob.crh).erase())?;
    pins.add_input(gpiob.pb12.into_pull_up_input(&mut gpiob.crh).erase())?;
    pins.add_input(gpiob.pb13.into_pull_up_input(&mut gpiob.crh).erase())?;
    pins.add_input(gpiob.pb14.into_pull_up_input(&mut gpiob.crh).erase())?;

    let clock = DwtClock::new(core.DWT, core.DCB, clocks);
    let radio = Radio::new(
        gpiob.pb9.into_push_pull_output(&mut gpiob.crh),
        &clock,
        &GMOMXSEN_CODES,
    )?;
    watchdog.feed();

    let real = AdcSampler::<pac::ADC1, _, _, _, _, _>::new(adc, reference, voltage, generated, consumed);
    let mut source = SelectableSource::new(
        real,
        SyntheticSampler::<SAMPLES_PER_CYCLE>::new(ADC_STEPS, AnalogSimulation {
            reference: (ADC_STEPS / 2) as i32,
            ..AnalogSimulation::default()
        }),
    );
    source.set_simulation(SIMULATION);

    let mut controller: Controller<_, _, _> = Controller::new(
        Sampler::new(source, &clock, MAINS_FREQ_HZ),
        QuantityEngine::new(QuantityConfig::default()),
        Loads::new(),
        Schedule::new(ScheduleConfig::default(), seed as u64 ^ DWT::cycle_count() as u64),
        Actuator::new(radio),
    );
    for config in LOADS.iter() {
        controller.add_load(*config, &mut pins)?;
    }

    let _ = writeln!(console, "started...");

    loop {
        watchdog.feed();

        // failed commands are sent again at the next refresh
        if let Err(e) = controller.iterate(clock.seconds(), &mut pins, console) {
            let _ = writeln!(console, "error: {}", e);
        }
    }
}

#[exception]
unsafe fn HardFault(ef: &ExceptionFrame) -> ! {
    panic!("{:#?}", ef);
}

#[exception]
unsafe fn DefaultHandler(irqn: i16) {
    panic!("Unhandled exception (IRQn = {})", irqn);
}
