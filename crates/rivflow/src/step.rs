//! One integration step over the grid.
//!
//! Each cell first absorbs the day's vertical fluxes into its overland and
//! base stores, advances its channel cascade on the inflow routed to it in
//! the previous step, applies withdrawal against the resulting outflow and
//! finally hands the net volume to its downslope neighbor's next-step
//! accumulators. Cells without a downslope neighbor discharge their entire
//! store out of the system instead.

use rivgis_core::Raster;

use crate::accounting::WaterBalance;
use crate::basin::OUTSIDE_LABEL;
use crate::cascade::linear_outflow;
use crate::config::{ManipulationMode, SimulationConfig, WithdrawalUnit};
use crate::error::{FaultLog, Result};
use crate::retention::{RetentionField, SECONDS_PER_DAY};
use crate::state::SimulationState;
use crate::topology::DrainageTopology;

/// Nominal month length for converting monthly demand totals to rates
const NOMINAL_MONTH_DAYS: f64 = 30.0;

/// Everything a step reads but never writes
pub struct StepContext<'a> {
    pub config: &'a SimulationConfig,
    pub dtm: &'a Raster<f64>,
    pub topology: &'a DrainageTopology,
    pub retention: &'a RetentionField,
    /// Main-channel mask, nonzero on channel cells
    pub channel: Option<&'a Raster<f64>>,
    /// Basin-share labels, negative outside the basin
    pub share: &'a Raster<f64>,
    pub static_withdrawal: Option<&'a Raster<f64>>,
    /// Today's surface runoff rates, m/s
    pub runoff: &'a Raster<f64>,
    /// Today's drainage rates, m/s
    pub drainage: &'a Raster<f64>,
    /// Step length in seconds
    pub dt: f64,
    /// Cell area in m2
    pub cell_area: f64,
    /// False while the warmup period still suppresses withdrawal
    pub warmup_over: bool,
}

impl StepContext<'_> {
    fn is_main_channel(&self, row: usize, col: usize) -> Result<bool> {
        match (self.config.main_channel.as_ref(), self.channel) {
            (Some(_), Some(mask)) => Ok(mask.get(row, col)? != 0.0),
            _ => Ok(false),
        }
    }

    fn in_basin(&self, row: usize, col: usize) -> Result<bool> {
        Ok(self.share.get(row, col)? > OUTSIDE_LABEL)
    }
}

/// Advance the whole grid by one step
pub fn run_step(
    ctx: &StepContext<'_>,
    state: &mut SimulationState,
    balance: &mut WaterBalance,
    faults: &mut FaultLog,
) -> Result<()> {
    let (rows, cols) = ctx.dtm.shape();
    state.begin_step();

    for row in 0..rows {
        for col in 0..cols {
            if ctx.dtm.is_nodata_at(row, col)? {
                continue;
            }
            if ctx.config.basin_only && !ctx.in_basin(row, col)? {
                continue;
            }
            update_cell(row, col, ctx, state, balance, faults)?;
        }
    }

    state.commit_step();
    Ok(())
}

fn update_cell(
    row: usize,
    col: usize,
    ctx: &StepContext<'_>,
    state: &mut SimulationState,
    balance: &mut WaterBalance,
    faults: &mut FaultLog,
) -> Result<()> {
    let cfg = ctx.config;
    let dt = ctx.dt;
    let area = ctx.cell_area;
    let in_basin = ctx.in_basin(row, col)?;

    // vertical inflow volumes for this step
    let runoff_rate = ctx.runoff.get(row, col)?;
    let drainage_rate = ctx.drainage.get(row, col)?;
    let run = ((runoff_rate * (1.0 - cfg.runoff_reduction) * area) + cfg.runoff_offset) * dt;
    let reduced = runoff_rate * cfg.runoff_reduction;
    let drain = if cfg.auto_compensate_drainage {
        (drainage_rate + reduced) * area * dt
    } else {
        ((drainage_rate * (1.0 - cfg.drainage_reduction) * area) + cfg.drainage_offset) * dt
    };

    state.flux_sum.add(row, col, run + drain)?;
    balance.system.add_in(run + drain);
    if in_basin {
        balance.basin.add_in(run + drain);
        balance.month.runoff += run;
        balance.month.drainage += drain;
    }

    // withdrawal demand of this step, suppressed during warmup
    let mut con = 0.0;
    if ctx.warmup_over && cfg.withdrawal.enabled() {
        if cfg.withdrawal.use_static {
            if let Some(grid) = ctx.static_withdrawal {
                con += grid.get(row, col)? / 1000.0 * area * dt;
            }
        }
        if cfg.withdrawal.mode.is_some() {
            let raw = state.dynamic_withdrawal.get(row, col)?;
            con += match cfg.withdrawal.unit {
                WithdrawalUnit::PerSecond => raw / 1000.0 * area * dt,
                WithdrawalUnit::Monthly => {
                    raw / 1000.0 / SECONDS_PER_DAY / NOMINAL_MONTH_DAYS * area * dt
                }
            };
        }
        state.withdrawal_demand_sum.add(row, col, con)?;
        if in_basin {
            balance.month.demand += con;
        }
    }

    if ctx.topology.is_sink(row, col) {
        return sink_discharge(row, col, ctx, state, balance, con, run, drain, in_basin);
    }

    // overland and base reservoirs; sentinel lag times pass nothing on
    let k_o = ctx.retention.overland.get(row, col)?;
    let k_b = ctx.retention.base.get(row, col)?;
    let overland_store = state.overland.get(row, col)? + run;
    let g_out = linear_outflow(overland_store, k_o, dt);
    state.overland.set(row, col, overland_store - g_out)?;
    let base_store = state.base.get(row, col)? + drain;
    let b_out = linear_outflow(base_store, k_b, dt);
    state.base.set(row, col, base_store - b_out)?;

    // channel cascade, fed by the inflow routed here in the previous step
    let is_main = ctx.is_main_channel(row, col)?;
    let stages = if is_main {
        // is_main implies the main-channel cascade is configured
        cfg.main_channel.map(|mc| mc.stages).unwrap_or(cfg.channel.stages)
    } else {
        cfg.channel.stages
    };
    let k_c = ctx.retention.channel.get(row, col)?;
    let carry_in = state.inflow_carry.get(row, col)?;
    let mut c_out = state
        .cascade
        .advance(row, col, carry_in, stages, k_c, dt, faults);

    // point manipulations override the channel outflow at fixed cells
    for m in &cfg.manipulations {
        if m.row != row || m.col != col {
            continue;
        }
        let reference = match m.mode {
            ManipulationMode::ScaleOutflow => c_out,
            ManipulationMode::ScaleStore => state.channel_total.get(row, col)?,
        };
        let overridden = reference * m.q + m.a * dt;
        if overridden < 0.0 {
            faults.manipulation_reverted();
        } else {
            balance.add_manipulation(overridden - c_out);
            c_out = overridden;
        }
    }

    let flow_factor = if is_main {
        cfg.flow_factor_channel()
    } else {
        cfg.flow_factor_cells()
    };
    let gross = g_out + b_out + c_out;
    let res_flow = gross * flow_factor;
    let factor_loss = gross - res_flow;
    if factor_loss > 0.0 {
        balance.system.add_out(factor_loss);
        if in_basin {
            balance.basin.add_out(factor_loss);
        }
    }

    // withdrawal against the available outflow
    let mut unmet = 0.0;
    if con > 0.0 {
        if is_main && cfg.withdrawal.threshold > 0.0 {
            let reserve = cfg.withdrawal.threshold * dt;
            if res_flow >= reserve {
                let headroom = res_flow - reserve;
                if con > headroom {
                    unmet = con - headroom;
                    con = headroom;
                    faults.withdrawal_over_threshold_headroom();
                }
            } else {
                unmet = con;
                con = 0.0;
                faults.flow_below_threshold();
            }
        } else if con > res_flow {
            unmet = con - res_flow;
            con = res_flow;
            faults.withdrawal_over_flow();
        }
    }
    if ctx.warmup_over && cfg.withdrawal.enabled() {
        state.withdrawal_taken_sum.add(row, col, con)?;
        state.withdrawal_unmet_sum.add(row, col, unmet)?;
        balance.system.add_withdrawn(con);
        balance.system.add_out(con);
        if in_basin {
            balance.basin.add_withdrawn(con);
            balance.basin.add_out(con);
            balance.month.taken += con;
            balance.month.unmet += unmet;
        }
    }

    let net = res_flow - con;

    // the cell's own cascade content becomes its next-step channel store
    state.next_channel.add(row, col, state.cascade.total(row, col))?;

    match ctx.topology.downslope(row, col) {
        Some((nr, nc)) if !ctx.dtm.is_nodata_at(nr, nc)? => {
            route_to_neighbor(row, col, nr, nc, net, ctx, state, balance, in_basin)?;
        }
        _ => {
            // routed off the grid edge or into nodata terrain
            balance.system.add_out(net);
            if in_basin {
                balance.basin.add_out(net);
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn route_to_neighbor(
    row: usize,
    col: usize,
    nr: usize,
    nc: usize,
    net: f64,
    ctx: &StepContext<'_>,
    state: &mut SimulationState,
    balance: &mut WaterBalance,
    in_basin: bool,
) -> Result<()> {
    state.next_channel.add(nr, nc, net)?;
    state.next_carry.add(nr, nc, net)?;
    state.channel_flow.add(nr, nc, net)?;

    if in_basin && !ctx.in_basin(nr, nc)? {
        balance.basin.add_out(net);
    }
    if ctx.config.basin_outlet == Some((row, col)) {
        balance.month.river_out += net;
    }
    Ok(())
}

/// Forced discharge of a cell with no downslope neighbor: fresh vertical
/// inflow replaces the stores, everything previously held leaves through
/// the sink after withdrawal is served from it. Inflow carried to a sink
/// is already part of its channel store and is dropped, not injected.
#[allow(clippy::too_many_arguments)]
fn sink_discharge(
    row: usize,
    col: usize,
    ctx: &StepContext<'_>,
    state: &mut SimulationState,
    balance: &mut WaterBalance,
    demand: f64,
    run: f64,
    drain: f64,
    in_basin: bool,
) -> Result<()> {
    let o1 = state.overland.get(row, col)?;
    let o2 = state.base.get(row, col)?;
    let available = state.channel_total.get(row, col)? + o1 + o2;

    let (taken, unmet) = if demand <= available {
        (demand, 0.0)
    } else {
        (available, demand - available)
    };
    let out = available - taken;

    state.overland.set(row, col, run)?;
    state.base.set(row, col, drain)?;
    // nothing is added to next_channel: the sink keeps no channel store

    if ctx.warmup_over && ctx.config.withdrawal.enabled() {
        state.withdrawal_taken_sum.add(row, col, taken)?;
        state.withdrawal_unmet_sum.add(row, col, unmet)?;
        balance.system.add_withdrawn(taken);
        balance.system.add_out(taken);
        if in_basin {
            balance.basin.add_withdrawn(taken);
            balance.basin.add_out(taken);
            balance.month.taken += taken;
            balance.month.unmet += unmet;
        }
    }

    balance.system.add_sink(out);
    if in_basin {
        balance.basin.add_sink(out);
    }
    Ok(())
}
