//! Drives the decided load states out to the relays and to the remote switches.
//!
//! Changed loads are serviced at once. On a refresh tick every load is sent again,
//! to cope with radio interference which prevented a remote switch from receiving an
//! earlier command.

use core::fmt::{self, Write};

use crate::error::Error;
use crate::loads::{Cause, Load, Loads};
use crate::pins::LoadPins;
use crate::quantity::Quantities;
use crate::radio::{RadioModel, Transmitter};
use crate::schedule::Ticks;
use crate::time::{Duration, Seconds};

/// `HH:MM:SS` of an uptime
pub struct Stamp(pub Duration<u32, Seconds>);

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s) = self.0.to_hms();
        write!(f, "{:02}:{:02}:{:02}", h, m, s)
    }
}

/// Log line of a decided state change
pub struct ChangeRecord<'a> {
    pub uptime: Duration<u32, Seconds>,
    pub load: &'a Load,
    pub quantities: &'a Quantities,
    pub cause: Cause,
}

impl fmt::Display for ChangeRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quantities;
        write!(
            f,
            "{} Load \"{}\" set to {} \tPg_W:{} \tPc_W:{} \texcedent_W:{} \tmargin_W:{} \tcause: {}",
            Stamp(self.uptime),
            self.load.config.name,
            if self.load.on { "On " } else { "Off" },
            watts(q.generated_filtered),
            watts(q.consumed_filtered),
            watts(q.generated_filtered + q.consumed_filtered),
            watts(q.margin),
            self.cause
        )
    }
}

/// Log line of a periodic refresh
pub struct RefreshRecord<'a> {
    pub uptime: Duration<u32, Seconds>,
    pub load: &'a Load,
}

impl fmt::Display for RefreshRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Load \"{}\" refreshed ({})",
            Stamp(self.uptime),
            self.load.config.name,
            if self.load.on { "On" } else { "Off" }
        )
    }
}

fn watts(power: f32) -> i32 {
    num_traits::Float::round(power) as i32
}

pub struct Actuator<RADIO> {
    radio: RADIO,
}

impl<RADIO> Actuator<RADIO>
where
    RADIO: Transmitter,
{
    pub fn new(radio: RADIO) -> Self {
        Actuator { radio }
    }

    pub fn radio(&mut self) -> &mut RADIO {
        &mut self.radio
    }

    /// Switches the relay and sends the radio command of every load which changed,
    /// or of all loads on a refresh tick, and writes a line per load into `log`.
    ///
    /// A failing load does not stop the others: all of them are serviced and the first
    /// error is returned, it is not logged here. Nothing is retried until the next refresh.
    pub fn activate<P, W, const N: usize>(
        &mut self,
        loads: &mut Loads<N>,
        ticks: Ticks,
        quantities: &Quantities,
        pins: &mut P,
        uptime: Duration<u32, Seconds>,
        log: &mut W,
    ) -> Result<(), Error>
    where
        P: LoadPins,
        W: Write,
    {
        let cause = loads.cause();
        let mut result = Ok(());

        for load in loads.loads_mut().iter_mut() {
            if !load.pending && !ticks.refresh {
                continue;
            }

            // an unwritable log must not block the loads
            let _ = if load.pending {
                writeln!(
                    log,
                    "{}",
                    ChangeRecord {
                        uptime,
                        load,
                        quantities,
                        cause,
                    }
                )
            } else {
                writeln!(log, "{}", RefreshRecord { uptime, load })
            };

            load.pending = false;

            if let Some(line) = load.config.output {
                result = result.and(pins.set_output(line, load.on));
            }

            if let Some(link) = load.config.radio {
                if link.model != RadioModel::NoRadio {
                    result = result.and(self.radio.send(link.model, link.channel, load.on));
                }
            }
        }

        result
    }
}
