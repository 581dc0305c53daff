//! Samples the four analog inputs during one grid cycle
//!
//! Hardware conditioning of the voltage and current inputs must ensure a floating ground
//! at the reference input and an amplitude that stays inside the ADC input range.
//! A complete grid cycle is measured but the phase at which it starts is not fixed.
//! `Sampler::get_cycle` blocks for one grid cycle.

use core::marker::PhantomData;

use crate::error::Error;
use crate::time::{wait_until, Duration, MicroSeconds, Time, TimeExt, TimeSource};
use embedded_hal::adc::{Channel, OneShot};
use num_traits::Float;

/// nominal frequency of the grid
pub const MAINS_FREQ_HZ: u32 = 50;
/// samples taken from a whole grid cycle
pub const SAMPLES_PER_CYCLE: usize = 40;
/// must match the resolution of the ADC
pub const ADC_RESOLUTION_STEPS: u16 = 1024;

/// One reading of all four inputs, in ADC counts
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct RawSample {
    pub reference: u16,
    pub voltage: u16,
    pub generated: u16,
    pub consumed: u16,
}

/// Powers injected instead of the measured ones, both given as positive watts
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct SimulatedPower {
    pub generated_w: f32,
    pub consumed_w: f32,
}

/// Time aligned readings of one grid cycle: sample `i` of every channel was taken together.
#[derive(Debug, Clone)]
pub struct SampleCycle<const N: usize> {
    pub reference: [u16; N],
    pub voltage: [u16; N],
    pub generated: [u16; N],
    pub consumed: [u16; N],
    /// time spent converting the four inputs of each sample
    pub acquisition_us: [u32; N],
    pub start: Time<u32, MicroSeconds>,
    pub previous_start: Option<Time<u32, MicroSeconds>>,
    pub simulated_power: Option<SimulatedPower>,
}

impl<const N: usize> SampleCycle<N> {
    pub fn new(
        start: Time<u32, MicroSeconds>,
        previous_start: Option<Time<u32, MicroSeconds>>,
    ) -> Self {
        SampleCycle {
            reference: [0; N],
            voltage: [0; N],
            generated: [0; N],
            consumed: [0; N],
            acquisition_us: [0; N],
            start,
            previous_start,
            simulated_power: None,
        }
    }

    pub fn len(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        N == 0
    }

    pub fn set(&mut self, index: usize, sample: RawSample, acquisition_us: u32) {
        self.reference[index] = sample.reference;
        self.voltage[index] = sample.voltage;
        self.generated[index] = sample.generated;
        self.consumed[index] = sample.consumed;
        self.acquisition_us[index] = acquisition_us;
    }
}

/// Where the readings of a cycle of `N` samples come from
pub trait SampleSource<const N: usize> {
    /// `index` is the position of the sample inside the cycle
    fn read(&mut self, index: usize) -> Result<RawSample, Error>;

    /// Powers which replace the computed ones, if simulated
    fn simulated_power(&self) -> Option<SimulatedPower> {
        None
    }
}

/// Real analog inputs converted by a one-shot ADC of type `A`
pub struct AdcSampler<A, ADC, REF, VX, IG, IC> {
    adc: ADC,
    reference: REF,
    voltage: VX,
    generated: IG,
    consumed: IC,
    kind: PhantomData<A>,
}

impl<A, ADC, REF, VX, IG, IC> AdcSampler<A, ADC, REF, VX, IG, IC> {
    pub fn new(adc: ADC, reference: REF, voltage: VX, generated: IG, consumed: IC) -> Self {
        AdcSampler {
            adc,
            reference,
            voltage,
            generated,
            consumed,
            kind: PhantomData,
        }
    }
}

impl<A, ADC, REF, VX, IG, IC, const N: usize> SampleSource<N>
    for AdcSampler<A, ADC, REF, VX, IG, IC>
where
    REF: Channel<A>,
    VX: Channel<A>,
    IG: Channel<A>,
    IC: Channel<A>,
    ADC: OneShot<A, u16, REF>
        + OneShot<A, u16, VX>
        + OneShot<A, u16, IG>
        + OneShot<A, u16, IC>,
{
    fn read(&mut self, _index: usize) -> Result<RawSample, Error> {
        let reference =
            nb::block!(<ADC as OneShot<A, u16, REF>>::read(&mut self.adc, &mut self.reference))
                .map_err(|_| Error::Io)?;
        let generated =
            nb::block!(<ADC as OneShot<A, u16, IG>>::read(&mut self.adc, &mut self.generated))
                .map_err(|_| Error::Io)?;
        // the grid voltage is read between both currents to minimize their phase delay
        let voltage = nb::block!(<ADC as OneShot<A, u16, VX>>::read(&mut self.adc, &mut self.voltage))
            .map_err(|_| Error::Io)?;
        let consumed =
            nb::block!(<ADC as OneShot<A, u16, IC>>::read(&mut self.adc, &mut self.consumed))
                .map_err(|_| Error::Io)?;

        Ok(RawSample {
            reference,
            voltage,
            generated,
            consumed,
        })
    }
}

/// Sine waves injected instead of the analog inputs, in ADC counts
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnalogSimulation {
    pub generated_amplitude: i32,
    pub consumed_amplitude: i32,
    pub voltage_amplitude: i32,
    /// phase shift in sampling periods
    pub generated_shift: usize,
    /// phase shift in sampling periods
    pub consumed_shift: usize,
    pub reference: i32,
}

impl Default for AnalogSimulation {
    fn default() -> Self {
        AnalogSimulation {
            generated_amplitude: 200,
            consumed_amplitude: 100,
            voltage_amplitude: 410,
            generated_shift: 0,
            consumed_shift: 0,
            reference: 512,
        }
    }
}

/// A cycle of `N` samples holds one period of the sine waves
pub struct SyntheticSampler<const N: usize> {
    /// sin(2*pi*i/N) * 1000
    sine: [i32; N],
    resolution: u16,
    pub settings: AnalogSimulation,
}

impl<const N: usize> SyntheticSampler<N> {
    pub fn new(resolution: u16, settings: AnalogSimulation) -> Self {
        let mut sine = [0i32; N];
        for (i, s) in sine.iter_mut().enumerate() {
            let phase = 2.0 * core::f32::consts::PI * (i as f32) / (N as f32);
            *s = Float::round(1000.0 * Float::sin(phase)) as i32;
        }

        SyntheticSampler {
            sine,
            resolution,
            settings,
        }
    }

    fn wave(&self, amplitude: i32, index: usize) -> u16 {
        let value = self.settings.reference + amplitude * self.sine[index % N] / 1000;
        value.clamp(0, self.resolution as i32) as u16
    }
}

impl<const N: usize> SampleSource<N> for SyntheticSampler<N> {
    fn read(&mut self, index: usize) -> Result<RawSample, Error> {
        let s = self.settings;
        Ok(RawSample {
            reference: s.reference.clamp(0, self.resolution as i32) as u16,
            voltage: self.wave(s.voltage_amplitude, index),
            generated: self.wave(s.generated_amplitude, index + s.generated_shift),
            consumed: self.wave(s.consumed_amplitude, index + s.consumed_shift),
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Simulation {
    Off,
    /// the analog inputs are replaced by sine waves
    Analog(AnalogSimulation),
    /// the inputs are measured but the powers are replaced
    Power(SimulatedPower),
}

/// Switches between the real inputs and the simulated ones at run time
pub struct SelectableSource<REAL, const N: usize> {
    real: REAL,
    synthetic: SyntheticSampler<N>,
    simulation: Simulation,
}

impl<REAL, const N: usize> SelectableSource<REAL, N>
where
    REAL: SampleSource<N>,
{
    pub fn new(real: REAL, synthetic: SyntheticSampler<N>) -> Self {
        SelectableSource {
            real,
            synthetic,
            simulation: Simulation::Off,
        }
    }

    pub fn simulation(&self) -> Simulation {
        self.simulation
    }

    pub fn set_simulation(&mut self, simulation: Simulation) {
        if let Simulation::Analog(settings) = simulation {
            self.synthetic.settings = settings;
        }
        self.simulation = simulation;
    }
}

impl<REAL, const N: usize> SampleSource<N> for SelectableSource<REAL, N>
where
    REAL: SampleSource<N>,
{
    fn read(&mut self, index: usize) -> Result<RawSample, Error> {
        match self.simulation {
            Simulation::Analog(_) => self.synthetic.read(index),
            Simulation::Off | Simulation::Power(_) => self.real.read(index),
        }
    }

    fn simulated_power(&self) -> Option<SimulatedPower> {
        match self.simulation {
            Simulation::Power(power) => Some(power),
            _ => None,
        }
    }
}

/// Paces the readings of a source evenly over one grid cycle
pub struct Sampler<SOURCE, CLOCK, const N: usize> {
    source: SOURCE,
    clock: CLOCK,
    period: Duration<u32, MicroSeconds>,
    previous_start: Option<Time<u32, MicroSeconds>>,
}

impl<SOURCE, CLOCK, const N: usize> Sampler<SOURCE, CLOCK, N>
where
    SOURCE: SampleSource<N>,
    CLOCK: TimeSource<u32, MicroSeconds>,
{
    pub fn new(source: SOURCE, clock: CLOCK, mains_hz: u32) -> Self {
        let samples = N.max(1) as u32;
        Sampler {
            source,
            clock,
            period: (1_000_000 / mains_hz.max(1) / samples).us(),
            previous_start: None,
        }
    }

    pub fn period(&self) -> Duration<u32, MicroSeconds> {
        self.period
    }

    pub fn source_mut(&mut self) -> &mut SOURCE {
        &mut self.source
    }

    /// Reads and stores the inputs once per sampling period during one grid cycle.
    ///
    /// An aborted cycle is forgotten: the next one still measures its interval from
    /// the start of the last complete cycle.
    pub fn get_cycle(&mut self) -> Result<SampleCycle<N>, Error> {
        let start = self.clock.now();
        let mut cycle = SampleCycle::new(start, self.previous_start);

        let mut offset = Duration::default();
        for i in 0..N {
            let sampling_start = self.clock.now();
            let sample = self.source.read(i)?;
            let acquisition = self.clock.now() - sampling_start;
            cycle.set(i, sample, acquisition.count());

            // waiting for the next sampling period
            offset = offset + self.period;
            wait_until(&self.clock, start, offset);
        }

        cycle.simulated_power = self.source.simulated_power();
        self.previous_start = Some(start);
        Ok(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::sim::SimClock;

    pub struct MockAdc {
        conversions: u32,
        order: std::vec::Vec<u8>,
    }

    pub struct MockPin(u8);

    impl Channel<MockAdc> for MockPin {
        type ID = u8;
        fn channel() -> u8 {
            0
        }
    }

    impl OneShot<MockAdc, u16, MockPin> for MockAdc {
        type Error = ();

        fn read(&mut self, pin: &mut MockPin) -> nb::Result<u16, ()> {
            self.conversions += 1;
            if self.conversions % 2 == 1 {
                // every conversion takes a second poll
                return Err(nb::Error::WouldBlock);
            }
            if pin.0 == 9 {
                return Err(nb::Error::Other(()));
            }
            self.order.push(pin.0);
            Ok(100 * pin.0 as u16)
        }
    }

    #[test]
    fn adc_reads_voltage_between_the_currents() {
        let adc = MockAdc {
            conversions: 0,
            order: std::vec::Vec::new(),
        };
        let mut sampler = AdcSampler::<MockAdc, _, _, _, _, _>::new(adc, MockPin(1), MockPin(2), MockPin(3), MockPin(4));

        let sample = SampleSource::<40>::read(&mut sampler, 0).unwrap();

        assert_eq!(
            sample,
            RawSample {
                reference: 100,
                voltage: 200,
                generated: 300,
                consumed: 400
            }
        );
        assert_eq!(sampler.adc.order, [1, 3, 2, 4]);
    }

    #[test]
    fn adc_failure_is_an_io_error() {
        let adc = MockAdc {
            conversions: 0,
            order: std::vec::Vec::new(),
        };
        let mut sampler = AdcSampler::<MockAdc, _, _, _, _, _>::new(adc, MockPin(1), MockPin(9), MockPin(3), MockPin(4));
        assert_eq!(SampleSource::<40>::read(&mut sampler, 0), Err(Error::Io));
    }

    #[test]
    fn synthetic_waves_follow_the_sine_table() {
        let mut synthetic = SyntheticSampler::<40>::new(1024, AnalogSimulation::default());

        let first = synthetic.read(0).unwrap();
        assert_eq!(first.reference, 512);
        assert_eq!(first.voltage, 512);

        // a quarter period is the crest
        let crest = synthetic.read(10).unwrap();
        assert_eq!(crest.voltage, 512 + 410);
        assert_eq!(crest.generated, 512 + 200);
        assert_eq!(crest.consumed, 512 + 100);

        let trough = synthetic.read(30).unwrap();
        assert_eq!(trough.voltage, 512 - 410);
    }

    #[test]
    fn synthetic_shift_and_clamp() {
        let settings = AnalogSimulation {
            generated_amplitude: 900,
            consumed_shift: 20,
            ..AnalogSimulation::default()
        };
        let mut synthetic = SyntheticSampler::<40>::new(1024, settings);

        let crest = synthetic.read(10).unwrap();
        assert_eq!(crest.generated, 1024);
        // half a period shifted: opposite phase
        assert_eq!(crest.consumed, 512 - 100);
        assert_eq!(synthetic.read(30).unwrap().generated, 0);
    }

    #[test]
    fn cycle_is_paced_over_one_grid_period() {
        let clock = SimClock::new(5_000, 1);
        let synthetic = SyntheticSampler::<40>::new(1024, AnalogSimulation::default());
        let mut sampler: Sampler<_, _, 40> = Sampler::new(synthetic, clock.clone(), MAINS_FREQ_HZ);
        assert!(sampler.period() == 500u32.us());

        let first = sampler.get_cycle().unwrap();
        assert_eq!(first.start.instant(), 5_000);
        assert!(first.previous_start.is_none());
        // two readings of the simulated clock around the conversion
        assert!(first.acquisition_us.iter().all(|&us| us == 1));
        assert_eq!(first.voltage[10], 922);

        let elapsed = clock.peek() - 5_000;
        assert!((20_000..20_010).contains(&elapsed), "{}", elapsed);

        let second = sampler.get_cycle().unwrap();
        assert_eq!(second.previous_start.map(|t| t.instant()), Some(5_000));
        assert!(second.start - first.start >= 20_000u32.us());
    }

    #[test]
    fn sine_table_has_the_length_of_the_cycle() {
        let clock = SimClock::new(0, 1);
        let synthetic = SyntheticSampler::new(1024, AnalogSimulation::default());
        let mut sampler = Sampler::<_, _, 8>::new(synthetic, clock, MAINS_FREQ_HZ);

        let cycle = sampler.get_cycle().unwrap();
        assert_eq!(cycle.voltage[2], 512 + 410);
        assert_eq!(cycle.voltage[6], 512 - 410);
    }

    /// Sine waves with a conversion that may fail
    struct Flaky {
        wave: SyntheticSampler<8>,
        fail_at: Option<usize>,
    }

    impl SampleSource<8> for Flaky {
        fn read(&mut self, index: usize) -> Result<RawSample, Error> {
            if self.fail_at == Some(index) {
                return Err(Error::Io);
            }
            self.wave.read(index)
        }
    }

    #[test]
    fn aborted_cycle_keeps_the_previous_start() {
        let clock = SimClock::new(0, 1);
        let source = Flaky {
            wave: SyntheticSampler::new(1024, AnalogSimulation::default()),
            fail_at: None,
        };
        let mut sampler: Sampler<_, _, 8> = Sampler::new(source, clock, MAINS_FREQ_HZ);

        let first = sampler.get_cycle().unwrap();
        sampler.source_mut().fail_at = Some(3);
        assert_eq!(sampler.get_cycle().err(), Some(Error::Io));
        sampler.source_mut().fail_at = None;

        let third = sampler.get_cycle().unwrap();
        assert_eq!(third.previous_start.map(|t| t.instant()), Some(first.start.instant()));
        // the interval spans the aborted cycle too
        assert!(third.start - first.start > 20_000u32.us());
    }

    #[test]
    fn power_simulation_reads_the_real_inputs() {
        let real = SyntheticSampler::<40>::new(1024, AnalogSimulation::default());
        let fake = SyntheticSampler::<40>::new(
            1024,
            AnalogSimulation {
                reference: 300,
                ..AnalogSimulation::default()
            },
        );
        let mut source = SelectableSource::new(real, fake);
        assert_eq!(source.read(0).unwrap().reference, 512);
        assert_eq!(source.simulated_power(), None);

        let power = SimulatedPower {
            generated_w: 1500.0,
            consumed_w: 400.0,
        };
        source.set_simulation(Simulation::Power(power));
        assert_eq!(source.read(0).unwrap().reference, 512);
        assert_eq!(source.simulated_power(), Some(power));

        source.set_simulation(Simulation::Analog(AnalogSimulation {
            reference: 256,
            ..AnalogSimulation::default()
        }));
        assert_eq!(source.read(0).unwrap().reference, 256);
        assert_eq!(source.simulated_power(), None);
    }

    #[test]
    fn cycle_carries_the_simulated_power() {
        let clock = SimClock::new(0, 1);
        let real = SyntheticSampler::<8>::new(1024, AnalogSimulation::default());
        let synthetic = SyntheticSampler::<8>::new(1024, AnalogSimulation::default());
        let mut source = SelectableSource::new(real, synthetic);
        let power = SimulatedPower {
            generated_w: 10.0,
            consumed_w: 20.0,
        };
        source.set_simulation(Simulation::Power(power));

        let mut sampler: Sampler<_, _, 8> = Sampler::new(source, clock, MAINS_FREQ_HZ);
        assert_eq!(sampler.get_cycle().unwrap().simulated_power, Some(power));
    }
}
