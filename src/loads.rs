//! The roster of switchable loads and the decision which of them runs.
//!
//! Priority is the registration order: the first load added has the highest priority and
//! the roster is never reordered. Every decide period at most one load changes its state,
//! which keeps the step response to one load per period and avoids thrashing.

use core::fmt;
use heapless::Vec;

use crate::error::Error;
use crate::pins::LoadPins;
use crate::quantity::Quantities;
use crate::radio::RadioModel;
use crate::schedule::Ticks;

/// max number of loads to be managed
pub const N_LOADS_MAX: usize = 3;
/// the power of a load shed to solve a priority inversion is reduced by this factor,
/// in order not to compute a too optimistic available power
pub const POWER_REDUCTION_FACTOR: f32 = 0.85;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// follows the surplus
    Automatic,
    /// runs whenever the consumption margin allows
    Manual,
}

/// Reason of the latest state change
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cause {
    ProgramStart,
    NoMargin,
    NoExcedent,
    PriorityInversion,
    EnoughMargin,
    EnoughExcedentAndMargin,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cause::ProgramStart => "program start",
            Cause::NoMargin => "no margin",
            Cause::NoExcedent => "no excedent",
            Cause::PriorityInversion => "priority inversion",
            Cause::EnoughMargin => "enough margin",
            Cause::EnoughExcedentAndMargin => "enough excedent and margin",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RadioLink {
    pub model: RadioModel,
    /// 1 based
    pub channel: u8,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LoadConfig {
    /// max 5 characters fit on the display
    pub name: &'static str,
    /// nominal power (W)
    pub power_w: f32,
    /// an activated load is kept on at least this long
    pub lock_on_s: u32,
    /// a deactivated load is kept off at least this long
    pub lock_off_s: u32,
    /// line of the relay output
    pub output: Option<usize>,
    /// line of the manual/automatic switch, always automatic without one
    pub mode_input: Option<usize>,
    /// remote switch
    pub radio: Option<RadioLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub config: LoadConfig,
    pub mode: Mode,
    /// the new state has not been driven out yet
    pub pending: bool,
    pub on: bool,
    /// seconds until the state may change again
    pub lock_s: u32,
}

impl Load {
    fn automatic(&self) -> bool {
        self.mode == Mode::Automatic
    }

    fn unlocked(&self) -> bool {
        self.lock_s == 0
    }

    fn switch(&mut self, on: bool) {
        self.on = on;
        self.pending = true;
        self.lock_s = if on {
            self.config.lock_on_s
        } else {
            self.config.lock_off_s
        };
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transition {
    pub index: usize,
    pub on: bool,
    pub cause: Cause,
}

pub struct Loads<const N: usize = N_LOADS_MAX> {
    loads: Vec<Load, N>,
    cause: Cause,
    reduction_factor: f32,
}

impl<const N: usize> Default for Loads<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Loads<N> {
    pub fn new() -> Self {
        Loads {
            loads: Vec::new(),
            cause: Cause::ProgramStart,
            reduction_factor: POWER_REDUCTION_FACTOR,
        }
    }

    pub fn with_reduction_factor(mut self, factor: f32) -> Self {
        self.reduction_factor = factor;
        self
    }

    /// Adds the next load, with lower priority than the previous ones.
    ///
    /// The load starts off and pending, so its outputs are driven at the first activation.
    pub fn add<P: LoadPins>(&mut self, config: LoadConfig, pins: &mut P) -> Result<usize, Error> {
        if self.loads.is_full() {
            return Err(Error::TooManyLoads);
        }

        if let Some(line) = config.output {
            pins.set_output(line, false)?;
        }
        let mode = match config.mode_input {
            Some(line) => read_mode(pins, line)?,
            None => Mode::Automatic,
        };

        self.loads
            .push(Load {
                config,
                mode,
                pending: true,
                on: false,
                lock_s: 0,
            })
            .map_err(|_| Error::TooManyLoads)?;
        Ok(self.loads.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Load> {
        self.loads.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Load> {
        self.loads.iter()
    }

    pub(crate) fn loads_mut(&mut self) -> &mut [Load] {
        &mut self.loads
    }

    /// reason of the most recent change
    pub fn cause(&self) -> Cause {
        self.cause
    }

    /// Runs the tasks raised in `ticks`: the per second bookkeeping, then the decision.
    pub fn step<P: LoadPins>(
        &mut self,
        ticks: Ticks,
        quantities: &Quantities,
        pins: &mut P,
    ) -> Result<Option<Transition>, Error> {
        let aged = if ticks.one_second {
            self.tick_second(pins)
        } else {
            Ok(())
        };
        let transition = if ticks.decide {
            self.decide(quantities)
        } else {
            None
        };
        aged.map(|_| transition)
    }

    /// Every second: updates the modes from their switches and ages the lock timers.
    /// All loads are updated even if a switch can not be read, the first error is returned.
    pub fn tick_second<P: LoadPins>(&mut self, pins: &mut P) -> Result<(), Error> {
        let mut result = Ok(());
        for load in self.loads.iter_mut() {
            if let Some(line) = load.config.mode_input {
                match read_mode(pins, line) {
                    Ok(mode) => load.mode = mode,
                    Err(e) => result = result.and(Err(e)),
                }
            }
            load.lock_s = load.lock_s.saturating_sub(1);
        }
        result
    }

    /// Decides whether a load must be activated or deactivated according to the
    /// consumption margin and the surplus. Changes one load at most.
    pub fn decide(&mut self, quantities: &Quantities) -> Option<Transition> {
        let transition = self.choose(quantities.margin, quantities.net_filtered)?;

        self.loads[transition.index].switch(transition.on);
        self.cause = transition.cause;

        log::info!(
            "load {} set {} ({})",
            self.loads[transition.index].config.name,
            if transition.on { "on" } else { "off" },
            transition.cause
        );
        Some(transition)
    }

    fn choose(&self, margin: f32, surplus: f32) -> Option<Transition> {
        let off = |index, cause| Transition {
            index,
            on: false,
            cause,
        };

        // no consumption margin: the active load with the least priority goes off
        // regardless its lock, before the grid protection trips
        if margin <= 0.0 {
            if let Some(i) = self.loads.iter().rposition(|l| l.on) {
                return Some(off(i, Cause::NoMargin));
            }
        }

        // deficit: the active automatic load with the least priority goes off
        if surplus <= 0.0 {
            if let Some(i) = self
                .loads
                .iter()
                .rposition(|l| l.on && l.automatic() && l.unlocked())
            {
                return Some(off(i, Cause::NoExcedent));
            }
        }

        // a lower priority load occupies the power a higher priority one would need:
        // shed it, so the next period can activate the higher priority load
        for (i, high) in self.loads.iter().enumerate() {
            if high.on || !high.automatic() || !high.unlocked() {
                continue;
            }
            for (j, low) in self.loads.iter().enumerate().skip(i + 1) {
                if low.on
                    && low.automatic()
                    && low.unlocked()
                    && low.config.power_w * self.reduction_factor + surplus >= high.config.power_w
                {
                    return Some(off(j, Cause::PriorityInversion));
                }
            }
        }

        // the first load whose power fits into the margin, and into the surplus if automatic
        self.loads
            .iter()
            .position(|l| {
                !l.on
                    && l.unlocked()
                    && l.config.power_w < margin
                    && (!l.automatic() || l.config.power_w < surplus)
            })
            .map(|i| Transition {
                index: i,
                on: true,
                cause: if self.loads[i].automatic() {
                    Cause::EnoughExcedentAndMargin
                } else {
                    Cause::EnoughMargin
                },
            })
    }
}

fn read_mode<P: LoadPins>(pins: &mut P, line: usize) -> Result<Mode, Error> {
    Ok(if pins.mode_switch(line)? {
        Mode::Automatic
    } else {
        Mode::Manual
    })
}
