//! Remote switch radio protocol, cloned from the GMOMXSEN brand remotes
// ```
//         guard       1           0           0           0       ...
// ________________|‾‾‾‾‾‾‾|___|‾‾‾|_______|‾‾‾|_______|‾‾‾|_______|‾‾ ...
//      7000us     1190 665 591  1263   591  1263   591  1263
// ```
// bit 0 = 591us high + 1263us low
// bit 1 = 1190us high + 665us low
// FRAME: 7000us low guard followed by the bits of the code, sent 5 times
// The codes are not computed: the off and on code of every channel is recorded from
// the factory remote and stored in a `CodeTable`.

use core::convert::TryFrom;
use embedded_hal::digital::v2::OutputPin;

use crate::error::Error;
use crate::time::{wait_until, Duration, MicroSeconds, TimeExt, TimeSource};

// pulse durations for bit = 0
pub const HIGH_SHORT_US: u32 = 591;
pub const LOW_LONG_US: u32 = 1263;

// pulse durations for bit = 1
pub const HIGH_LONG_US: u32 = 1190;
pub const LOW_SHORT_US: u32 = 665;

// repetitions of the code
pub const WAIT_REPEAT_US: u32 = 7000;
pub const NUM_REPEATS: u32 = 5;

/// Radio protocol of a remote switch
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RadioModel {
    NoRadio,
    Gmomxsen,
}

impl TryFrom<u8> for RadioModel {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self, Error> {
        match code {
            0 => Ok(RadioModel::NoRadio),
            1 => Ok(RadioModel::Gmomxsen),
            _ => Err(Error::UnsupportedRadioModel),
        }
    }
}

/// `[off code, on code]` of every channel, channel 1 first
pub type CodeTable = [[&'static str; 2]];

pub const GMOMXSEN_CODES: [[&str; 2]; 3] = [
    // off code                           on code
    ["100000011011010000110100000000000", "100011101011010000110100000000000"], // channel 1
    ["101011101011010000110100000000000", "101001101011010000110100000000000"], // channel 2
    ["100111101011010000110100000000000", "100101101011010000110100000000000"], // channel 3
];

/// high and low duration of a bit
fn pulses(bit: u8) -> (u32, u32) {
    if bit == b'0' {
        (HIGH_SHORT_US, LOW_LONG_US)
    } else {
        (HIGH_LONG_US, LOW_SHORT_US)
    }
}

/// Duration of a full transmission of `code`, including the guards
pub fn transmission_us(code: &str) -> u32 {
    let bits: u32 = code
        .bytes()
        .map(|bit| {
            let (high, low) = pulses(bit);
            high + low
        })
        .sum();
    NUM_REPEATS * (WAIT_REPEAT_US + bits)
}

/// Something which can switch a remote switch on or off
pub trait Transmitter {
    fn send(&mut self, model: RadioModel, channel: u8, on: bool) -> Result<(), Error>;
}

/// Modulates the radio transmitter through a digital output.
///
/// `send` busy waits through every pulse: the whole loop is blocked for
/// `transmission_us` of the code, about a third of a second.
pub struct Radio<PIN, CLOCK> {
    pin: PIN,
    clock: CLOCK,
    codes: &'static CodeTable,
}

impl<PIN, CLOCK> Radio<PIN, CLOCK>
where
    PIN: OutputPin,
    CLOCK: TimeSource<u32, MicroSeconds>,
{
    pub fn new(mut pin: PIN, clock: CLOCK, codes: &'static CodeTable) -> Result<Self, Error> {
        pin.set_low().map_err(|_| Error::Io)?;
        Ok(Radio { pin, clock, codes })
    }

    pub fn channels(&self) -> usize {
        self.codes.len()
    }

    /// The code switching `channel` (1 based) on or off
    pub fn code(&self, channel: u8, on: bool) -> Result<&'static str, Error> {
        let index = (channel as usize)
            .checked_sub(1)
            .filter(|&i| i < self.codes.len())
            .ok_or(Error::InvalidChannel)?;
        Ok(self.codes[index][on as usize])
    }

    fn send_gmomxsen(&mut self, channel: u8, on: bool) -> Result<(), Error> {
        let code = self.code(channel, on)?;

        let origin = self.clock.now();
        let mut offset: Duration<u32, MicroSeconds> = Duration::default();

        for _ in 0..NUM_REPEATS {
            // the line stays low during the guard
            offset = offset + WAIT_REPEAT_US.us();
            wait_until(&self.clock, origin, offset);

            for bit in code.bytes() {
                let (high, low) = pulses(bit);

                self.pin.set_high().map_err(|_| Error::Io)?;
                offset = offset + high.us();
                wait_until(&self.clock, origin, offset);

                self.pin.set_low().map_err(|_| Error::Io)?;
                offset = offset + low.us();
                wait_until(&self.clock, origin, offset);
            }
        }

        Ok(())
    }
}

impl<PIN, CLOCK> Transmitter for Radio<PIN, CLOCK>
where
    PIN: OutputPin,
    CLOCK: TimeSource<u32, MicroSeconds>,
{
    /// Sends an activation or deactivation code to the remote switch of `channel`
    fn send(&mut self, model: RadioModel, channel: u8, on: bool) -> Result<(), Error> {
        match model {
            RadioModel::Gmomxsen => self.send_gmomxsen(channel, on),
            RadioModel::NoRadio => Err(Error::UnsupportedRadioModel),
        }
    }
}
