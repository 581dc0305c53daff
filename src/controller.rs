//! One iteration of the control loop: sample a grid cycle, compute the quantities,
//! advance the schedule, decide and actuate.

use core::fmt::Write;

use crate::actuator::Actuator;
use crate::error::Error;
use crate::loads::{LoadConfig, Loads, Transition, N_LOADS_MAX};
use crate::pins::LoadPins;
use crate::quantity::{Quantities, QuantityEngine};
use crate::radio::Transmitter;
use crate::sampler::{SampleSource, Sampler, SAMPLES_PER_CYCLE};
use crate::schedule::{Schedule, Ticks};
use crate::time::{MicroSeconds, TimeSource};

/// What happened during one iteration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Iteration {
    pub ticks: Ticks,
    pub transition: Option<Transition>,
}

pub struct Controller<
    SOURCE,
    CLOCK,
    RADIO,
    const S: usize = SAMPLES_PER_CYCLE,
    const N: usize = N_LOADS_MAX,
> {
    sampler: Sampler<SOURCE, CLOCK, S>,
    engine: QuantityEngine,
    loads: Loads<N>,
    schedule: Schedule,
    actuator: Actuator<RADIO>,
}

impl<SOURCE, CLOCK, RADIO, const S: usize, const N: usize> Controller<SOURCE, CLOCK, RADIO, S, N>
where
    SOURCE: SampleSource<S>,
    CLOCK: TimeSource<u32, MicroSeconds>,
    RADIO: Transmitter,
{
    pub fn new(
        sampler: Sampler<SOURCE, CLOCK, S>,
        engine: QuantityEngine,
        loads: Loads<N>,
        schedule: Schedule,
        actuator: Actuator<RADIO>,
    ) -> Self {
        Controller {
            sampler,
            engine,
            loads,
            schedule,
            actuator,
        }
    }

    /// Registers the next load, with lower priority than the previous ones
    pub fn add_load<P: LoadPins>(&mut self, config: LoadConfig, pins: &mut P) -> Result<usize, Error> {
        self.loads.add(config, pins)
    }

    pub fn loads(&self) -> &Loads<N> {
        &self.loads
    }

    pub fn quantities(&self) -> &Quantities {
        self.engine.quantities()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn sampler_mut(&mut self) -> &mut Sampler<SOURCE, CLOCK, S> {
        &mut self.sampler
    }

    pub fn actuator_mut(&mut self) -> &mut Actuator<RADIO> {
        &mut self.actuator
    }

    /// Runs one loop iteration, blocking for a grid cycle and for the radio transmissions.
    ///
    /// `seconds` is a free running seconds counter. Without a sample cycle nothing is
    /// decided nor driven. Otherwise the loads are always actuated, and the first error
    /// of the decision or of the actuation is returned.
    pub fn iterate<P, W>(&mut self, seconds: u32, pins: &mut P, log: &mut W) -> Result<Iteration, Error>
    where
        P: LoadPins,
        W: Write,
    {
        let cycle = self.sampler.get_cycle()?;
        let quantities = *self.engine.compute(&cycle);

        let ticks = self.schedule.update(seconds);
        let stepped = self.loads.step(ticks, &quantities, pins);
        let activated = self.actuator.activate(
            &mut self.loads,
            ticks,
            &quantities,
            pins,
            self.schedule.uptime(),
            log,
        );

        let transition = stepped?;
        activated?;
        Ok(Iteration { ticks, transition })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loads::tests::{load, Lines};
    use crate::loads::{Cause, RadioLink};
    use crate::quantity::QuantityConfig;
    use crate::radio::RadioModel;
    use crate::sampler::{
        AnalogSimulation, RawSample, SelectableSource, SimulatedPower, Simulation,
        SyntheticSampler, MAINS_FREQ_HZ,
    };
    use crate::schedule::ScheduleConfig;
    use crate::time::sim::SimClock;
    use std::string::String;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder(Vec<(u8, bool)>);

    impl Transmitter for Recorder {
        fn send(&mut self, _model: RadioModel, channel: u8, on: bool) -> Result<(), Error> {
            self.0.push((channel, on));
            Ok(())
        }
    }

    type Source = SelectableSource<SyntheticSampler<8>, 8>;

    fn controller(power: SimulatedPower) -> Controller<Source, SimClock, Recorder, 8, 3> {
        let real = SyntheticSampler::new(1024, AnalogSimulation::default());
        let synthetic = SyntheticSampler::new(1024, AnalogSimulation::default());
        let mut source = SelectableSource::new(real, synthetic);
        source.set_simulation(Simulation::Power(power));

        Controller::new(
            Sampler::new(source, SimClock::new(0, 1), MAINS_FREQ_HZ),
            QuantityEngine::new(QuantityConfig::default()),
            Loads::new(),
            Schedule::new(ScheduleConfig::default(), 7),
            Actuator::new(Recorder::default()),
        )
    }

    #[test]
    fn surplus_switches_the_load_on_at_the_first_decision() {
        let mut controller = controller(SimulatedPower {
            generated_w: 2000.0,
            consumed_w: 300.0,
        });
        let mut lines = Lines::default();
        let mut config = load("boil", 1500.0);
        config.output = Some(0);
        config.radio = Some(RadioLink {
            model: RadioModel::Gmomxsen,
            channel: 2,
        });
        controller.add_load(config, &mut lines).unwrap();
        let mut log = String::new();

        // the initial off state is driven at once
        let first = controller.iterate(0, &mut lines, &mut log).unwrap();
        assert_eq!(first.ticks, Ticks::default());
        assert!(log.starts_with("00:00:00 Load \"boil\" set to Off"));
        assert!(log.ends_with("cause: program start\n"));
        assert_eq!(controller.actuator_mut().radio().0, [(2, false)]);

        let mut transitions = Vec::new();
        for second in 1..=5 {
            let iteration = controller.iterate(second, &mut lines, &mut log).unwrap();
            transitions.extend(iteration.transition.map(|t| (second, t)));
        }

        assert_eq!(transitions.len(), 1);
        let (second, t) = transitions[0];
        assert_eq!(second, 5);
        assert_eq!((t.index, t.on, t.cause), (0, true, Cause::EnoughExcedentAndMargin));
        assert_eq!(lines.outputs[0], Some(true));
        assert_eq!(controller.actuator_mut().radio().0.last(), Some(&(2, true)));
        assert_eq!(controller.quantities().net_filtered, 1700.0);
        assert_eq!(controller.quantities().margin, 3000.0);
        assert!(log.lines().last().unwrap().starts_with("00:00:05 Load \"boil\" set to On "));
    }

    #[test]
    fn deficit_keeps_the_loads_off() {
        let mut controller = controller(SimulatedPower {
            generated_w: 200.0,
            consumed_w: 900.0,
        });
        let mut lines = Lines::default();
        controller.add_load(load("boil", 1500.0), &mut lines).unwrap();
        controller.add_load(load("pump", 100.0), &mut lines).unwrap();
        let mut log = String::new();

        for second in 0..=20 {
            let iteration = controller.iterate(second, &mut lines, &mut log).unwrap();
            assert_eq!(iteration.transition, None);
        }
        assert!(controller.loads().iter().all(|l| !l.on));
        assert_eq!(controller.schedule().uptime().count(), 20);
    }

    #[test]
    fn failing_output_is_reported_after_the_decision() {
        let mut controller = controller(SimulatedPower {
            generated_w: 2000.0,
            consumed_w: 0.0,
        });
        let mut lines = Lines::default();
        let mut config = load("boil", 1000.0);
        config.output = Some(1);
        controller.add_load(config, &mut lines).unwrap();
        let mut log = String::new();
        for second in 0..5 {
            controller.iterate(second, &mut lines, &mut log).unwrap();
        }

        lines.broken = Some(1);
        assert_eq!(controller.iterate(5, &mut lines, &mut log), Err(Error::Io));
        // decided and logged even so
        assert!(controller.loads().get(0).unwrap().on);
        assert!(!controller.loads().get(0).unwrap().pending);
    }

    /// An ADC which never converts
    struct Dead;

    impl SampleSource<8> for Dead {
        fn read(&mut self, _index: usize) -> Result<RawSample, Error> {
            Err(Error::Io)
        }
    }

    #[test]
    fn missing_cycle_skips_the_iteration() {
        let mut controller: Controller<Dead, SimClock, Recorder, 8, 3> = Controller::new(
            Sampler::new(Dead, SimClock::new(0, 1), MAINS_FREQ_HZ),
            QuantityEngine::new(QuantityConfig::default()),
            Loads::new(),
            Schedule::new(ScheduleConfig::default(), 7),
            Actuator::new(Recorder::default()),
        );
        let mut lines = Lines::default();
        let mut config = load("boil", 1500.0);
        config.output = Some(0);
        config.radio = Some(RadioLink {
            model: RadioModel::Gmomxsen,
            channel: 2,
        });
        controller.add_load(config, &mut lines).unwrap();
        // forget the switch off at registration
        lines.outputs = [None; 4];
        let mut log = String::new();

        for second in 0..=10 {
            assert_eq!(controller.iterate(second, &mut lines, &mut log), Err(Error::Io));
        }

        // not even the start up state was driven
        assert!(log.is_empty());
        assert_eq!(lines.outputs[0], None);
        assert!(controller.actuator_mut().radio().0.is_empty());
        assert!(controller.loads().get(0).unwrap().pending);
        assert_eq!(controller.schedule().uptime().count(), 0);
    }

    #[test]
    fn simulation_can_be_switched_at_run_time() {
        let mut controller = controller(SimulatedPower {
            generated_w: 1000.0,
            consumed_w: 200.0,
        });
        let mut lines = Lines::default();
        let mut log = String::new();
        controller.iterate(0, &mut lines, &mut log).unwrap();
        assert_eq!(controller.quantities().generated_power, 1000.0);

        // back to the analog inputs: sine waves in phase
        controller
            .sampler_mut()
            .source_mut()
            .set_simulation(Simulation::Off);
        controller.iterate(0, &mut lines, &mut log).unwrap();
        let q = controller.quantities();
        assert!(q.generated_power > 1000.0, "{}", q.generated_power);
        assert!(q.consumed_power < -500.0, "{}", q.consumed_power);
    }
}
