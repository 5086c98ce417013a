//! Retention coefficients and stable step length.
//!
//! The lag time of each reservoir is derived from cell size and downslope
//! gradient; the basin-wide minima over those lag times bound the largest
//! step the explicit integration can take. Per-cell coefficients are floored
//! at the minima so no cell ever responds faster than the step assumes.

use rivgis_core::Raster;
use tracing::warn;

use crate::config::{SimulationConfig, StepLength};
use crate::error::{Result, SimError};
use crate::topology::DrainageTopology;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Lag time of an overland or channel reservoir in days.
/// `param` and `stages` are the cascade pair, `cell_km` the cell size in km.
fn lag_time(param: f64, stages: usize, cell_km: f64, gradient: f64) -> f64 {
    param / (2.0 * stages as f64) * cell_km / gradient.powf(0.1)
}

/// Lag time of the base-flow reservoir in days (reference length 50 km)
fn base_lag_time(param: f64, cell_km: f64) -> f64 {
    param * cell_km / 50.0
}

/// Mean maximum velocity (km/h) a cascade admits at its minimum lag time
fn velocity(cell_km: f64, k_min: f64, stages: usize) -> f64 {
    cell_km / k_min / stages as f64 / 24.0
}

/// Basin-wide minimum lag times and the resulting step length
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub k_min_overland: f64,
    pub k_min_channel: f64,
    pub k_min_main: Option<f64>,
    pub k_min_base: f64,
    /// Governing minimum over the enabled surface types
    pub k_min: f64,
    /// Largest mean velocity over the enabled types, km/h
    pub v_max: f64,
    /// Step length in seconds
    pub step_seconds: f64,
}

impl StepPlan {
    /// Derive the plan from the maximum observed gradients.
    ///
    /// `grad_max_channel` must be given when main-channel handling is
    /// enabled in the configuration.
    pub fn compute(
        config: &SimulationConfig,
        cell_size_m: f64,
        grad_max: f64,
        grad_max_channel: Option<f64>,
    ) -> Result<Self> {
        if !(grad_max > 0.0) {
            return Err(SimError::Config(
                "terrain has no positive gradient, nothing can be routed".into(),
            ));
        }
        let cell_km = cell_size_m / 1000.0;

        let mut k_min_overland = lag_time(
            config.overland.param,
            config.overland.stages,
            cell_km,
            grad_max,
        );
        let mut k_min_channel = lag_time(
            config.channel.param,
            config.channel.stages,
            cell_km,
            grad_max,
        );
        let k_min_base = base_lag_time(config.base_param, cell_km);

        let mut k_min_main = match (&config.main_channel, grad_max_channel) {
            (Some(mc), Some(g)) if g > 0.0 => Some(lag_time(mc.param, mc.stages, cell_km, g)),
            (Some(_), _) => {
                return Err(SimError::MissingChannelGrid("channel gradient"));
            }
            (None, _) => None,
        };

        let v_overland = velocity(cell_km, k_min_overland, config.overland.stages);
        let v_channel = velocity(cell_km, k_min_channel, config.channel.stages);
        let v_main = config
            .main_channel
            .as_ref()
            .zip(k_min_main)
            .map(|(mc, k)| velocity(cell_km, k, mc.stages));

        let mut v_max = v_channel.max(v_overland);
        if let Some(v) = v_main {
            v_max = v_max.max(v);
        }

        // Enforcing a ceiling may only slow reservoirs down, never speed
        // them up
        if let Some(ceiling) = config.velocity_ceiling {
            if ceiling < v_max {
                v_max = ceiling;
                let k = cell_km / v_max / config.channel.stages as f64 / 24.0;
                if k > k_min_channel {
                    k_min_channel = k;
                }
                let k = cell_km / v_max / config.overland.stages as f64 / 24.0;
                if k > k_min_overland {
                    k_min_overland = k;
                }
                if let (Some(mc), Some(k_main)) = (&config.main_channel, k_min_main.as_mut()) {
                    let k = cell_km / v_max / mc.stages as f64 / 24.0;
                    if k > *k_main {
                        *k_main = k;
                    }
                }
            } else {
                warn!(
                    ceiling,
                    v_max, "velocity ceiling above the computed maximum, ignored"
                );
            }
        }

        let mut k_min = k_min_channel.min(k_min_overland);
        if let Some(k) = k_min_main {
            k_min = k_min.min(k);
        }

        if k_min_base < k_min {
            warn!(
                k_min_base,
                k_min, "base flow has the shortest lag time, parameters are suspicious"
            );
        }

        if k_min * SECONDS_PER_DAY <= 1.0 {
            return Err(SimError::StepTooShort(k_min * SECONDS_PER_DAY));
        }

        let max_step = k_min * SECONDS_PER_DAY;
        let step_seconds = match config.step {
            StepLength::Automatic => max_step,
            StepLength::Fixed(s) if s >= max_step => max_step,
            StepLength::Fixed(s) => s,
        };

        Ok(Self {
            k_min_overland,
            k_min_channel,
            k_min_main,
            k_min_base,
            k_min,
            v_max,
            step_seconds,
        })
    }
}

/// Per-cell retention coefficients, one slot per reservoir type.
///
/// Flat and no-data cells carry the sentinel -1 in all slots: their stores
/// accumulate vertical inflow but nothing decays it, and the step engine
/// treats them through the forced-discharge branch.
#[derive(Debug, Clone)]
pub struct RetentionField {
    pub overland: Raster<f64>,
    pub channel: Raster<f64>,
    pub base: Raster<f64>,
}

impl RetentionField {
    pub fn build(
        config: &SimulationConfig,
        dtm: &Raster<f64>,
        topology: &DrainageTopology,
        channel_mask: Option<&Raster<f64>>,
        plan: &StepPlan,
    ) -> Self {
        let (rows, cols) = dtm.shape();
        let cell_km = dtm.cell_size() / 1000.0;

        let mut overland = dtm.like(-1.0);
        let mut channel = dtm.like(-1.0);
        let mut base = dtm.like(-1.0);

        for row in 0..rows {
            for col in 0..cols {
                let grad = unsafe { topology.gradient.get_unchecked(row, col) };
                let z = unsafe { dtm.get_unchecked(row, col) };
                if dtm.is_nodata(z) || grad <= 0.0 {
                    continue;
                }

                let is_main = match (&config.main_channel, channel_mask) {
                    (Some(_), Some(mask)) => (unsafe { mask.get_unchecked(row, col) }) != 0.0,
                    _ => false,
                };
                let (c_params, c_floor) = if is_main {
                    // k_min_main exists whenever main_channel is configured
                    (
                        config.main_channel.as_ref().unwrap_or(&config.channel),
                        plan.k_min_main.unwrap_or(plan.k_min_channel),
                    )
                } else {
                    (&config.channel, plan.k_min_channel)
                };

                let k_o = lag_time(config.overland.param, config.overland.stages, cell_km, grad);
                let k_c = lag_time(c_params.param, c_params.stages, cell_km, grad);
                let k_b = base_lag_time(config.base_param, cell_km);

                unsafe {
                    overland.set_unchecked(row, col, k_o.max(plan.k_min_overland));
                    channel.set_unchecked(row, col, k_c.max(c_floor));
                    base.set_unchecked(row, col, k_b.max(plan.k_min_base));
                }
            }
        }

        Self {
            overland,
            channel,
            base,
        }
    }
}
