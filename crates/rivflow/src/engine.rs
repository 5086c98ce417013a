//! Simulation driver.
//!
//! Wires the static preparation (topology, step plan, retention field,
//! basin labels) to the step loop and the calendar, reloading forcing data
//! at day boundaries and withdrawal demand at month boundaries. Reporting
//! is optional; a run without a [`RunReporter`] produces only the returned
//! outputs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use rivgis_core::io::write_geotiff;
use rivgis_core::Raster;
use tracing::{info, warn};

use crate::accounting::WaterBalance;
use crate::basin::{self, BasinLabels, CHANNEL_LABEL};
use crate::cache;
use crate::clock::{available_days, SimClock};
use crate::config::{SimulationConfig, SubBasinMode};
use crate::error::{FaultLog, Result, SimError};
use crate::flux::{DailyFlux, VerticalFluxSource, WithdrawalSource};
use crate::report::RunReporter;
use crate::retention::{RetentionField, StepPlan, SECONDS_PER_DAY};
use crate::state::SimulationState;
use crate::step::{run_step, StepContext};
use crate::topology::DrainageTopology;
use crate::withdrawal::allocate;

/// Static grids and file locations of one run
pub struct SimulationInputs {
    pub dtm: Raster<f64>,
    /// Main-channel mask, nonzero on channel cells
    pub channel: Option<Raster<f64>>,
    /// Static withdrawal grid, mm/s per cell
    pub static_withdrawal: Option<Raster<f64>>,
    /// Cascade cache to warm-start from
    pub cache_in: Option<PathBuf>,
    /// Where to save the cascade cache at the end of the run
    pub cache_out: Option<PathBuf>,
    /// Saved overland store to warm-start from
    pub overland_in: Option<Raster<f64>>,
    /// Saved base-flow store to warm-start from
    pub base_in: Option<Raster<f64>>,
}

impl SimulationInputs {
    pub fn new(dtm: Raster<f64>) -> Self {
        Self {
            dtm,
            channel: None,
            static_withdrawal: None,
            cache_in: None,
            cache_out: None,
            overland_in: None,
            base_in: None,
        }
    }
}

/// Final state and bookkeeping of a finished run
pub struct RunOutputs {
    pub state: SimulationState,
    pub balance: WaterBalance,
    pub faults: FaultLog,
    pub plan: StepPlan,
    pub labels: BasinLabels,
    /// Number of days actually simulated
    pub days_run: u32,
}

/// Run a complete simulation.
///
/// `withdrawal` must be given when a dynamic allocation mode is configured;
/// likewise the static grid when static withdrawal is on. Raising `stop`
/// from another thread ends the run cleanly at the next step boundary.
pub fn run(
    config: &SimulationConfig,
    inputs: &SimulationInputs,
    flux: &mut dyn VerticalFluxSource,
    mut withdrawal: Option<&mut dyn WithdrawalSource>,
    mut reporter: Option<&mut RunReporter>,
    stop: Option<&AtomicBool>,
) -> Result<RunOutputs> {
    config.validate()?;
    if config.withdrawal.mode.is_some() && withdrawal.is_none() {
        return Err(SimError::NoWithdrawalSource);
    }
    if config.withdrawal.use_static && inputs.static_withdrawal.is_none() {
        return Err(SimError::NoWithdrawalSource);
    }
    if config.main_channel.is_some() && inputs.channel.is_none() {
        return Err(SimError::MissingChannelGrid("main-channel mask"));
    }

    let dtm = &inputs.dtm;
    let topology = DrainageTopology::derive(dtm, inputs.channel.as_ref());

    let grad_max = topology
        .gradient
        .statistics()
        .max
        .filter(|&g| g > 0.0)
        .ok_or_else(|| {
            SimError::Config("terrain has no positive gradient, nothing can be routed".into())
        })?;
    let grad_max_channel = topology
        .channel_gradient
        .as_ref()
        .and_then(|cg| cg.statistics().max);

    let plan = StepPlan::compute(config, dtm.cell_size(), grad_max, grad_max_channel)?;
    info!(
        step_seconds = plan.step_seconds,
        k_min = plan.k_min,
        v_max = plan.v_max,
        "step plan derived"
    );

    let retention = RetentionField::build(config, dtm, &topology, inputs.channel.as_ref(), &plan);

    let labels = match inputs.channel.as_ref() {
        Some(mask) => basin::basin_share(dtm, &topology, mask)?,
        // without a channel grid every cell is its own catchment
        None => BasinLabels {
            share: dtm.like(CHANNEL_LABEL),
            inflow_cells: dtm.with_same_meta(),
        },
    };

    let mut days = config.days;
    match available_days(config.start_year) {
        Some(avail) if days > avail => {
            warn!(
                requested = days,
                available = avail,
                "forcing data runs out before the requested day count, run shortened"
            );
            days = avail;
        }
        Some(_) => {}
        None => {
            return Err(SimError::Config(format!(
                "start year {} is outside the supported data range",
                config.start_year
            )));
        }
    }

    let stride = config
        .main_channel
        .map(|mc| mc.stages)
        .unwrap_or(0)
        .max(config.channel.stages);
    let mut state = SimulationState::new(dtm, stride);
    let mut balance = WaterBalance::new();
    let mut faults = FaultLog::new();

    if config.warm_start {
        let path = inputs
            .cache_in
            .as_ref()
            .ok_or_else(|| SimError::Config("warm start requested without a cache file".into()))?;
        let (rows, cols) = dtm.shape();
        state.cascade = cache::load_cascade(path, rows, cols, stride)?;
        for row in 0..rows {
            for col in 0..cols {
                state
                    .channel_total
                    .set(row, col, state.cascade.total(row, col))?;
            }
        }
        if let Some(grid) = inputs.overland_in.as_ref() {
            state.overland = grid.clone();
        }
        if let Some(grid) = inputs.base_in.as_ref() {
            state.base = grid.clone();
        }
        // restored storage enters the books as inflow so the imbalance
        // check stays meaningful
        let mut restored = state.cascade.grand_total();
        for grid in [&state.overland, &state.base] {
            for &v in grid.data().iter() {
                restored += v;
            }
        }
        balance.system.add_in(restored);
        balance.basin.add_in(restored);
        info!(restored, "stored water restored from caches");
    }

    let mut clock = SimClock::new(config.start_year);
    let mut warmup_remaining = config.withdrawal.warmup_days;
    let mut today: DailyFlux = flux.for_day(clock.year, clock.day_of_year)?;

    if let Some(source) = withdrawal.as_deref_mut() {
        if let Some(mode) = config.withdrawal.mode {
            let demand = source.for_month(clock.year, clock.month)?;
            state.dynamic_withdrawal = allocate(mode, &demand, dtm, &labels)?;
        }
    }

    // the traced sub-basin variant walks the DTM once up front
    let sub_basin_share = match config.sub_basin.as_ref() {
        Some(d) if d.mode == SubBasinMode::Traced => {
            Some(basin::upstream_share(dtm, &topology, (d.row, d.col))?)
        }
        _ => None,
    };

    if let Some(rep) = reporter.as_deref_mut() {
        rep.write_parameters(config, &plan)?;
    }

    let dt = plan.step_seconds;
    let cell_area = dtm.cell_size() * dtm.cell_size();

    loop {
        if stop.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
            info!(day = clock.day_index, "stop requested, run ended early");
            break;
        }
        let ctx = StepContext {
            config,
            dtm,
            topology: &topology,
            retention: &retention,
            channel: inputs.channel.as_ref(),
            share: &labels.share,
            static_withdrawal: inputs.static_withdrawal.as_ref(),
            runoff: &today.runoff,
            drainage: &today.drainage,
            dt,
            cell_area,
            warmup_over: warmup_remaining == 0,
        };
        run_step(&ctx, &mut state, &mut balance, &mut faults)?;

        let closed_year = clock.year;
        let closed_doy = clock.day_of_year;
        let closed_month = clock.month;
        let closed_day_index = clock.day_index;
        let tick = clock.advance(dt);

        if tick.day_rolled {
            close_day(
                config,
                dtm,
                &labels,
                &mut state,
                &mut balance,
                reporter.as_deref_mut(),
                closed_day_index,
                closed_year,
                closed_doy,
            )?;
            if warmup_remaining > 0 {
                warmup_remaining -= 1;
            }

            if tick.month_rolled {
                close_month(
                    config,
                    dtm,
                    &labels,
                    sub_basin_share.as_ref(),
                    &state,
                    &mut balance,
                    reporter.as_deref_mut(),
                    closed_year,
                    closed_month,
                )?;
                if let Some(source) = withdrawal.as_deref_mut() {
                    if let Some(mode) = config.withdrawal.mode {
                        let demand = source.for_month(clock.year, clock.month)?;
                        state.dynamic_withdrawal = allocate(mode, &demand, dtm, &labels)?;
                    }
                }
            }

            if closed_day_index >= days {
                break;
            }
            if clock.out_of_range() {
                warn!(
                    year = clock.year,
                    day = clock.day_of_year,
                    "clock left the supported data range, run stopped early"
                );
                break;
            }
            today = flux.for_day(clock.year, clock.day_of_year)?;
        }
    }

    if config.save_cache {
        let path = inputs
            .cache_out
            .as_ref()
            .ok_or_else(|| SimError::Config("cache save requested without a path".into()))?;
        cache::save_cascade(path, &state.cascade, &state.inflow_carry)?;
        info!(path = %path.display(), "cascade cache saved");
    }

    if let Some(rep) = reporter.as_deref_mut() {
        rep.write_faults(&faults)?;
        let grids = rep.grids_dir();
        write_geotiff(&state.flux_sum, grids.join("flux_sum.tif"))?;
        write_geotiff(&labels.share, grids.join("basin_share.tif"))?;
        write_geotiff(&state.overland, grids.join("store_overland.tif"))?;
        write_geotiff(&state.base, grids.join("store_base.tif"))?;
        if config.withdrawal.enabled() {
            write_geotiff(
                &state.withdrawal_demand_sum,
                grids.join("withdrawal_demand.tif"),
            )?;
            write_geotiff(
                &state.withdrawal_taken_sum,
                grids.join("withdrawal_taken.tif"),
            )?;
            write_geotiff(
                &state.withdrawal_unmet_sum,
                grids.join("withdrawal_unmet.tif"),
            )?;
        }
    }

    let days_run = clock.day_index - 1;
    info!(days_run, faults = faults.total(), "simulation finished");

    Ok(RunOutputs {
        state,
        balance,
        faults,
        plan,
        labels,
        days_run,
    })
}

#[allow(clippy::too_many_arguments)]
fn close_day(
    config: &SimulationConfig,
    dtm: &Raster<f64>,
    labels: &BasinLabels,
    state: &mut SimulationState,
    balance: &mut WaterBalance,
    reporter: Option<&mut RunReporter>,
    day_index: u32,
    year: i32,
    day_of_year: u32,
) -> Result<()> {
    let (rows, cols) = dtm.shape();
    let mut stored_system = 0.0;
    let mut stored_basin = 0.0;
    for row in 0..rows {
        for col in 0..cols {
            if dtm.is_nodata_at(row, col)? {
                continue;
            }
            let stored = state.stored_at(row, col);
            stored_system += stored;
            if labels.share.get(row, col)? >= 0.0 {
                stored_basin += stored;
            }
        }
    }

    let cascade_total = state.cascade.grand_total();
    let basin_record = balance.basin.day_flush(day_index, stored_basin, cascade_total);
    let system_record = balance
        .system
        .day_flush(day_index, stored_system, cascade_total);

    if let Some(rep) = reporter {
        rep.day_records(&basin_record, &system_record)?;
        for point in &config.eval_points {
            let volume = state.channel_flow.get(point.row, point.col)?;
            rep.point_value(&point.name, day_index, volume / SECONDS_PER_DAY)?;
        }
        rep.river_balance(year, day_of_year, dtm, &labels.share, state)?;
    }

    state.channel_flow.fill(0.0);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn close_month(
    config: &SimulationConfig,
    dtm: &Raster<f64>,
    labels: &BasinLabels,
    traced_share: Option<&Raster<f64>>,
    state: &SimulationState,
    balance: &mut WaterBalance,
    reporter: Option<&mut RunReporter>,
    year: i32,
    month: u32,
) -> Result<()> {
    let record = balance.month.flush(year, month);

    if let Some(rep) = reporter {
        rep.month_record(&record)?;

        if let Some(diag) = config.sub_basin.as_ref() {
            let share = match diag.mode {
                SubBasinMode::Labels => &labels.share,
                // computed once at startup whenever the mode is Traced
                SubBasinMode::Traced => traced_share.unwrap_or(&labels.share),
            };
            let totals = basin::sub_basin_totals(
                dtm,
                share,
                (diag.row, diag.col),
                &state.flux_sum,
                &state.withdrawal_demand_sum,
                &state.withdrawal_taken_sum,
                &state.withdrawal_unmet_sum,
            )?;
            rep.sub_basin(year, month, &totals)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::ConstantFlux;
    use approx::assert_relative_eq;
    use rivgis_core::GeoTransform;

    fn strip_inputs() -> SimulationInputs {
        let mut dtm = Raster::from_vec(vec![30.0, 20.0, 10.0, 0.0], 1, 4).unwrap();
        dtm.set_transform(GeoTransform::new(0.0, 1.0, 1000.0, -1000.0));
        SimulationInputs::new(dtm)
    }

    /// Slow cascades so the automatic step stays a sizable fraction of a day
    fn slow_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.channel.param = 0.5;
        config
    }

    #[test]
    fn short_run_completes_and_balances() {
        let config = SimulationConfig {
            days: 3,
            ..slow_config()
        };
        let inputs = strip_inputs();
        let mut flux = ConstantFlux::uniform(1, 4, 1e-8, 5e-9);

        let out = run(&config, &inputs, &mut flux, None, None, None).unwrap();
        assert_eq!(out.days_run, 3);
        assert_eq!(out.faults.total(), 0);
        assert!(out.balance.system.total_in() > 0.0);
    }

    #[test]
    fn dynamic_mode_without_source_is_rejected() {
        let mut config = slow_config();
        config.withdrawal.mode = Some(crate::config::AllocationMode::Exact);
        let inputs = strip_inputs();
        let mut flux = ConstantFlux::uniform(1, 4, 1e-8, 5e-9);

        assert!(matches!(
            run(&config, &inputs, &mut flux, None, None, None),
            Err(SimError::NoWithdrawalSource)
        ));
    }

    #[test]
    fn run_is_shortened_to_the_available_data() {
        let config = SimulationConfig {
            start_year: 2009,
            days: 100_000,
            ..slow_config()
        };
        let inputs = strip_inputs();
        let mut flux = ConstantFlux::uniform(1, 4, 1e-8, 5e-9);

        let out = run(&config, &inputs, &mut flux, None, None, None).unwrap();
        assert_eq!(out.days_run, 365);
    }

    #[test]
    fn cache_roundtrip_restores_the_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cascade.txt");

        let mut config = SimulationConfig {
            days: 5,
            save_cache: true,
            ..slow_config()
        };
        let mut inputs = strip_inputs();
        inputs.cache_out = Some(cache_path.clone());
        let mut flux = ConstantFlux::uniform(1, 4, 1e-8, 5e-9);
        let first = run(&config, &inputs, &mut flux, None, None, None).unwrap();

        // saving folds the pending carry into the first stage
        let saved: f64 = first.state.cascade.grand_total()
            + (0..4)
                .map(|c| first.state.inflow_carry.get(0, c).unwrap().max(0.0))
                .sum::<f64>();

        config.save_cache = false;
        config.warm_start = true;
        config.days = 1;
        inputs.cache_out = None;
        inputs.cache_in = Some(cache_path);
        // with zero forcing, everything in the second run's books came
        // from the restored cache
        let mut zero_flux = ConstantFlux::uniform(1, 4, 0.0, 0.0);
        let second = run(&config, &inputs, &mut zero_flux, None, None, None).unwrap();
        assert_relative_eq!(second.balance.system.total_in(), saved, max_relative = 1e-12);
    }
}
