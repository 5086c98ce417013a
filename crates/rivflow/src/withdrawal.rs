//! Allocation of monthly withdrawal demand onto the grid.
//!
//! The raw demand grids carry water-use totals wherever the census placed
//! them; the simulation needs the demand at the cells the router actually
//! drains. Demand at cells without a basin-share label is dropped, so the
//! allocated total equals the raw total over the labeled basin.

use std::collections::HashMap;

use rivgis_core::Raster;

use crate::basin::{unpack, BasinLabels, CHANNEL_LABEL};
use crate::config::AllocationMode;
use crate::error::Result;

/// Redistribute a raw demand grid according to the allocation mode.
///
/// `ChannelOnly` concentrates each sub-catchment's demand on its
/// main-channel cell. `Proportional` spreads it over the sub-catchment's
/// cells by their inflow-cell weights, falling back to the channel cell
/// when the catchment carries no weight at all. `Exact` keeps the raw
/// grid as it is.
pub fn allocate(
    mode: AllocationMode,
    demand: &Raster<f64>,
    dtm: &Raster<f64>,
    labels: &BasinLabels,
) -> Result<Raster<f64>> {
    if mode == AllocationMode::Exact {
        return Ok(demand.clone());
    }

    let (rows, cols) = dtm.shape();
    let mut allocated: Raster<f64> = dtm.with_same_meta();

    // demand and weight totals per sub-catchment, keyed by the packed
    // coordinate of its channel cell
    let mut catchments: HashMap<u64, (f64, f64)> = HashMap::new();

    for row in 0..rows {
        for col in 0..cols {
            if dtm.is_nodata_at(row, col)? {
                continue;
            }
            let label = labels.share.get(row, col)?;
            let key = if label == CHANNEL_LABEL {
                crate::basin::pack(row, col)? as u64
            } else if label > 0.0 {
                label as u64
            } else {
                continue;
            };
            let entry = catchments.entry(key).or_insert((0.0, 0.0));
            entry.0 += demand.get(row, col)?;
            entry.1 += labels.inflow_cells.get(row, col)?.max(0.0);
        }
    }

    match mode {
        AllocationMode::ChannelOnly => {
            for (&key, &(total, _)) in &catchments {
                let (cr, cc) = unpack(key as f64);
                allocated.set(cr, cc, total)?;
            }
        }
        AllocationMode::Proportional => {
            for row in 0..rows {
                for col in 0..cols {
                    if dtm.is_nodata_at(row, col)? {
                        continue;
                    }
                    let label = labels.share.get(row, col)?;
                    let key = if label == CHANNEL_LABEL {
                        crate::basin::pack(row, col)? as u64
                    } else if label > 0.0 {
                        label as u64
                    } else {
                        continue;
                    };
                    let (total, weight_sum) = catchments[&key];
                    if weight_sum > 0.0 {
                        let w = labels.inflow_cells.get(row, col)?.max(0.0);
                        allocated.add(row, col, total * w / weight_sum)?;
                    } else if label == CHANNEL_LABEL {
                        // weightless catchment: everything on the channel cell
                        allocated.set(row, col, total)?;
                    }
                }
            }
        }
        AllocationMode::Exact => unreachable!(),
    }

    Ok(allocated)
}
