//! Digital lines of the loads: solid state relay outputs and manual/automatic mode switches.
//!
//! The loads refer to their lines by number, so a roster of loads can share one bank of
//! pins of the same (erased) type.

use embedded_hal::digital::v2::{InputPin, OutputPin};
use heapless::Vec;

use crate::error::Error;

pub trait LoadPins {
    /// Drives the output line of a load, high = on
    fn set_output(&mut self, line: usize, on: bool) -> Result<(), Error>;

    /// Reads a mode switch: `true` in automatic mode.
    /// The switch pulls down a pulled up input, so open = high = automatic.
    fn mode_switch(&mut self, line: usize) -> Result<bool, Error>;
}

pub struct PinBank<OUT, IN, const N: usize> {
    outputs: Vec<OUT, N>,
    inputs: Vec<IN, N>,
}

impl<OUT, IN, const N: usize> PinBank<OUT, IN, N>
where
    OUT: OutputPin,
    IN: InputPin,
{
    pub fn new() -> Self {
        PinBank {
            outputs: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Takes an output and drives it low (load off); returns its line number
    pub fn add_output(&mut self, mut pin: OUT) -> Result<usize, Error> {
        pin.set_low().map_err(|_| Error::Io)?;
        self.outputs.push(pin).map_err(|_| Error::TooManyLoads)?;
        Ok(self.outputs.len() - 1)
    }

    /// Takes a mode switch input; returns its line number
    pub fn add_input(&mut self, pin: IN) -> Result<usize, Error> {
        self.inputs.push(pin).map_err(|_| Error::TooManyLoads)?;
        Ok(self.inputs.len() - 1)
    }
}

impl<OUT, IN, const N: usize> Default for PinBank<OUT, IN, N>
where
    OUT: OutputPin,
    IN: InputPin,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<OUT, IN, const N: usize> LoadPins for PinBank<OUT, IN, N>
where
    OUT: OutputPin,
    IN: InputPin,
{
    fn set_output(&mut self, line: usize, on: bool) -> Result<(), Error> {
        let pin = self.outputs.get_mut(line).ok_or(Error::Io)?;
        if on {
            pin.set_high().map_err(|_| Error::Io)
        } else {
            pin.set_low().map_err(|_| Error::Io)
        }
    }

    fn mode_switch(&mut self, line: usize) -> Result<bool, Error> {
        let pin = self.inputs.get(line).ok_or(Error::Io)?;
        pin.is_high().map_err(|_| Error::Io)
    }
}
