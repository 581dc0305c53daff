//! Computes the electrical magnitudes of the circuit from the samples of one grid cycle:
//! RMS voltage and currents, powers, power factors and their time filtered values.
//! Important notes:
//! - the sign convention is positive for generated power and for surplus exported to the
//!   grid, negative for consumed power and for deficit imported from the grid
//! - the wiring polarity of the current sensors does not matter
//! - failing inputs never fault the computation, everything is clamped to sane ranges

use crate::sampler::SampleCycle;
use num_traits::Float;

/// DC voltage at the reference input, the floating ground of the other inputs
pub const V0_REF_V: f32 = 2.5;
/// largest expected amplitude at the inputs, reached at their nominal RMS value
pub const MAX_AMPL_V: f32 = 2.0;
/// filtering time constant of the powers
pub const TIME_CONSTANT_US: f32 = 1.0e6;

const SQRT_2: f32 = 1.4142;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuantityConfig {
    /// RMS grid voltage giving the max amplitude at its input
    pub nominal_voltage: f32,
    /// RMS generated current giving the max amplitude at its input
    pub nominal_generated_current: f32,
    /// RMS consumed current giving the max amplitude at its input
    pub nominal_consumed_current: f32,
    /// consumption above this can trip the grid protections (W)
    pub max_consumption_w: f32,
    pub reference_v: f32,
    pub max_amplitude_v: f32,
    pub time_constant_us: f32,
}

impl Default for QuantityConfig {
    fn default() -> Self {
        QuantityConfig {
            nominal_voltage: 230.0,
            nominal_generated_current: 20.0,
            nominal_consumed_current: 20.0,
            max_consumption_w: 3300.0,
            reference_v: V0_REF_V,
            max_amplitude_v: MAX_AMPL_V,
            time_constant_us: TIME_CONSTANT_US,
        }
    }
}

/// Figures of the last computed grid cycle
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Quantities {
    /// average of the reference samples (counts)
    pub offset_counts: f32,
    pub volts_per_count: f32,
    pub voltage_rms: f32,
    pub generated_current_rms: f32,
    pub consumed_current_rms: f32,
    /// always >= 0
    pub generated_power: f32,
    /// always <= 0
    pub consumed_power: f32,
    /// surplus if > 0, deficit if < 0
    pub net_power: f32,
    pub generated_power_factor: f32,
    pub consumed_power_factor: f32,
    pub generated_filtered: f32,
    pub consumed_filtered: f32,
    /// sum of the filtered components
    pub net_filtered: f32,
    /// headroom until the max consumption, negative when exceeded
    pub margin: f32,
    /// since the start of the previous cycle, 0 if there is none
    pub interval_us: u32,
    pub sampling_avg_us: u32,
}

pub struct QuantityEngine {
    config: QuantityConfig,
    voltage_ratio: f32,
    generated_ratio: f32,
    consumed_ratio: f32,
    primed: bool,
    quantities: Quantities,
}

impl QuantityEngine {
    pub fn new(config: QuantityConfig) -> Self {
        let amplitude = config.max_amplitude_v;
        QuantityEngine {
            config,
            voltage_ratio: config.nominal_voltage * SQRT_2 / amplitude,
            generated_ratio: config.nominal_generated_current * SQRT_2 / amplitude,
            consumed_ratio: config.nominal_consumed_current * SQRT_2 / amplitude,
            primed: false,
            quantities: Quantities {
                margin: config.max_consumption_w,
                ..Quantities::default()
            },
        }
    }

    pub fn config(&self) -> &QuantityConfig {
        &self.config
    }

    pub fn quantities(&self) -> &Quantities {
        &self.quantities
    }

    /// Computes the magnitudes of a cycle, filtering on top of the previous results.
    pub fn compute<const N: usize>(&mut self, cycle: &SampleCycle<N>) -> &Quantities {
        let n = N.max(1) as i64;
        let q = &mut self.quantities;

        let acquisition: i64 = cycle.acquisition_us.iter().map(|&us| us as i64).sum();
        q.sampling_avg_us = (acquisition / n) as u32;

        // offset value and conversion scaling factor
        let offset = cycle.reference.iter().map(|&v| v as i64).sum::<i64>() / n;
        q.offset_counts = offset as f32;
        let vpc = self.config.reference_v / q.offset_counts.max(1.0);
        q.volts_per_count = vpc;

        let voltage_scale = vpc * self.voltage_ratio;
        let generated_scale = vpc * self.generated_ratio;
        let consumed_scale = vpc * self.consumed_ratio;

        let voltage_rms = rms(&cycle.voltage, offset, n) * voltage_scale;
        let generated_rms = rms(&cycle.generated, offset, n) * generated_scale;
        let consumed_rms = rms(&cycle.consumed, offset, n) * consumed_scale;

        let mut generated = Float::abs(
            mean_product(&cycle.generated, &cycle.voltage, offset, n)
                * generated_scale
                * voltage_scale,
        );
        let mut consumed = -Float::abs(
            mean_product(&cycle.consumed, &cycle.voltage, offset, n)
                * consumed_scale
                * voltage_scale,
        );
        let generated_pf = generated / (voltage_rms * generated_rms).max(1.0);
        let consumed_pf = -consumed / (voltage_rms * consumed_rms).max(1.0);

        if let Some(simulated) = cycle.simulated_power {
            generated = simulated.generated_w;
            consumed = -simulated.consumed_w;
        }

        let net = generated + consumed;

        // clipping extreme values of failing inputs
        q.voltage_rms = voltage_rms.clamp(0.0, 999.0);
        q.generated_current_rms = generated_rms.clamp(0.0, 99.0);
        q.consumed_current_rms = consumed_rms.clamp(0.0, 99.0);
        q.generated_power = generated.clamp(0.0, 9999.0);
        q.consumed_power = consumed.clamp(-9999.0, 0.0);
        q.net_power = net.clamp(-9999.0, 9999.0);
        q.generated_power_factor = generated_pf.clamp(0.0, 0.99);
        q.consumed_power_factor = consumed_pf.clamp(0.0, 0.99);

        q.interval_us = cycle
            .previous_start
            .map(|previous| (cycle.start - previous).count())
            .unwrap_or(0);

        if q.interval_us == 0 || !self.primed {
            q.generated_filtered = q.generated_power;
            q.consumed_filtered = q.consumed_power;
            q.net_filtered = q.net_power;
            self.primed = true;
        } else {
            // weight of the newest cycle
            let alpha = (q.interval_us as f32 / self.config.time_constant_us.max(1.0)).min(1.0);
            q.generated_filtered += alpha * (q.generated_power - q.generated_filtered);
            q.consumed_filtered += alpha * (q.consumed_power - q.consumed_filtered);
            // not filtered on its own, stays consistent with its components
            q.net_filtered = q.generated_filtered + q.consumed_filtered;
        }

        q.margin = self.config.max_consumption_w + q.consumed_filtered;

        log::debug!(
            "V={} Ig={} Ic={} Pg={} Pc={} Pn~={} margin={}",
            q.voltage_rms,
            q.generated_current_rms,
            q.consumed_current_rms,
            q.generated_power,
            q.consumed_power,
            q.net_filtered,
            q.margin
        );

        &self.quantities
    }
}

/// RMS of the offset free samples, in counts
fn rms(samples: &[u16], offset: i64, n: i64) -> f32 {
    let sum: i64 = samples
        .iter()
        .map(|&v| {
            let v = v as i64 - offset;
            v * v
        })
        .sum();
    Float::sqrt(sum as f32 / n as f32)
}

/// Mean of the product of two offset free channels, in counts squared
fn mean_product(a: &[u16], b: &[u16], offset: i64, n: i64) -> f32 {
    let sum: i64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as i64 - offset) * (y as i64 - offset))
        .sum();
    sum as f32 / n as f32
}
