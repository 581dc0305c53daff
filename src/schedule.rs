//! Counts the elapsed seconds and raises the flags of the periodic tasks.
//!
//! `update` must be called once every loop iteration, and an iteration must last less
//! than one second. The flags stay raised for a single iteration.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::time::{Duration, Seconds, TimeExt};

/// Flags of the periodic tasks of the current loop iteration
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Ticks {
    pub one_second: bool,
    pub decide: bool,
    pub refresh: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// should be several filtering time constants long, so the powers are settled
    pub decide_period_s: u32,
    /// mean period of the refresh of the remote switches
    pub refresh_period_s: u32,
    /// max random deviation (plus or minus) of the refresh period
    pub refresh_jitter_s: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            decide_period_s: 5,
            refresh_period_s: 30,
            refresh_jitter_s: 5,
        }
    }
}

pub struct Schedule {
    config: ScheduleConfig,
    rng: SmallRng,
    last_second: Option<u32>,
    uptime_s: u32,
    decide_countdown: u32,
    refresh_countdown: u32,
    ticks: Ticks,
}

impl Schedule {
    /// `seed` should be different at every start, like a reading of a floating analog input
    pub fn new(config: ScheduleConfig, seed: u64) -> Self {
        Schedule {
            config,
            rng: SmallRng::seed_from_u64(seed),
            last_second: None,
            uptime_s: 0,
            decide_countdown: config.decide_period_s,
            refresh_countdown: config.refresh_period_s,
            ticks: Ticks::default(),
        }
    }

    pub fn ticks(&self) -> Ticks {
        self.ticks
    }

    pub fn uptime(&self) -> Duration<u32, Seconds> {
        self.uptime_s.s()
    }

    /// seconds until the next decision
    pub fn to_decide(&self) -> u32 {
        self.decide_countdown
    }

    /// `seconds` is a free running seconds counter, only its changes matter
    pub fn update(&mut self, seconds: u32) -> Ticks {
        self.ticks = Ticks::default();

        let elapsed = match self.last_second {
            Some(last) => seconds.wrapping_sub(last),
            None => {
                self.last_second = Some(seconds);
                0
            }
        };
        if elapsed == 0 {
            return self.ticks;
        }
        // a late iteration catches up one second at a time
        self.last_second = self.last_second.map(|last| last.wrapping_add(1));

        self.ticks.one_second = true;
        self.uptime_s += 1;

        self.decide_countdown = self.decide_countdown.saturating_sub(1);
        if self.decide_countdown == 0 {
            self.decide_countdown = self.config.decide_period_s.max(1);
            self.ticks.decide = true;
        }

        self.refresh_countdown = self.refresh_countdown.saturating_sub(1);
        if self.refresh_countdown == 0 {
            // some random variation desynchronizes the refresh from other periodic activity
            let jitter = self.config.refresh_jitter_s as i64;
            let variation = if jitter > 0 {
                self.rng.gen_range(-jitter..jitter)
            } else {
                0
            };
            let next = self.config.refresh_period_s as i64 + variation;
            self.refresh_countdown = next.max(1) as u32;
            self.ticks.refresh = true;
        }

        self.ticks
    }
}
