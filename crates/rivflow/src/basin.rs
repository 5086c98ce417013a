//! Basin and sub-catchment labeling.
//!
//! Each non-channel cell inside the basin is labeled with the packed
//! coordinate of the main-channel cell its flow path first reaches; channel
//! cells get 0 and cells outside the basin keep the sentinel -1. The packed
//! form `10000 * row + col` is unambiguous only while both indices stay
//! below 10000, which is checked rather than silently relied on.

use rivgis_core::Raster;

use crate::error::{Result, SimError};
use crate::topology::DrainageTopology;

/// Label of a main-channel cell inside a share grid
pub const CHANNEL_LABEL: f64 = 0.0;
/// Label of a cell outside the basin
pub const OUTSIDE_LABEL: f64 = -1.0;

const PACK_LIMIT: usize = 10_000;

/// Pack a cell coordinate into a share label
pub fn pack(row: usize, col: usize) -> Result<f64> {
    if row >= PACK_LIMIT || col >= PACK_LIMIT {
        return Err(SimError::PackedCoordOverflow { row, col });
    }
    Ok((PACK_LIMIT * row + col) as f64)
}

/// Recover the cell coordinate from a packed share label
pub fn unpack(label: f64) -> (usize, usize) {
    let v = label as usize;
    (v / PACK_LIMIT, v % PACK_LIMIT)
}

/// Basin-share labels and the inflow-cell weights that fall out of the
/// same traversal
#[derive(Debug, Clone)]
pub struct BasinLabels {
    /// -1 outside, 0 on channel cells, packed target coordinate inside
    pub share: Raster<f64>,
    /// Number of upstream cells routed through each cell
    pub inflow_cells: Raster<f64>,
}

/// Label every cell with the main-channel cell it drains into.
///
/// Walks the terrain from the ridges down: for every summit cell the flow
/// path is followed to the first channel cell, counting path cells into the
/// inflow weights on the way, then walked again to stamp the channel cell's
/// packed coordinate onto the path. Paths ending in a sink stay unlabeled.
pub fn basin_share(
    dtm: &Raster<f64>,
    topology: &DrainageTopology,
    channel: &Raster<f64>,
) -> Result<BasinLabels> {
    let mut share = dtm.like(OUTSIDE_LABEL);
    let mut weights: Raster<f64> = dtm.with_same_meta();

    for (start_row, start_col) in dtm.cells_sorted_desc() {
        // only summits start a walk; anything already weighted was reached
        // from a higher cell and its branch is done
        if weights.get(start_row, start_col)? != 0.0 {
            continue;
        }

        let (mut row, mut col) = (start_row, start_col);
        let mut fresh_count = 1.0;

        while !dtm.is_nodata_at(row, col)? && channel.get(row, col)? == 0.0 {
            match topology.downslope(row, col) {
                Some((nr, nc)) => {
                    let w = weights.get(nr, nc)?;
                    let new_w = if w <= 0.0 {
                        let v = fresh_count;
                        fresh_count += 1.0;
                        v
                    } else {
                        // branch below was walked before, keep its count
                        w + fresh_count
                    };
                    weights.set(nr, nc, new_w)?;
                    row = nr;
                    col = nc;
                }
                None => {
                    // sink: negate the weight so the cell never restarts
                    let w = weights.get(row, col)?;
                    weights.set(row, col, -w)?;
                    break;
                }
            }
        }

        if !dtm.is_nodata_at(row, col)? && channel.get(row, col)? != 0.0 {
            share.set(row, col, CHANNEL_LABEL)?;
            let label = pack(row, col)?;

            let (mut row, mut col) = (start_row, start_col);
            while !dtm.is_nodata_at(row, col)? && channel.get(row, col)? == 0.0 {
                match topology.downslope(row, col) {
                    Some((nr, nc)) => {
                        share.set(row, col, label)?;
                        row = nr;
                        col = nc;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(BasinLabels {
        share,
        inflow_cells: weights,
    })
}

/// Label the cells whose flow path reaches one target channel cell.
///
/// Same labeling convention as [`basin_share`], but the walk crosses other
/// channel cells: the result is the full upstream area of the target, not
/// its immediate sub-catchment.
pub fn upstream_share(
    dtm: &Raster<f64>,
    topology: &DrainageTopology,
    target: (usize, usize),
) -> Result<Raster<f64>> {
    let label = pack(target.0, target.1)?;
    let mut share = dtm.like(OUTSIDE_LABEL);

    for (start_row, start_col) in dtm.cells_sorted_desc() {
        let (mut row, mut col) = (start_row, start_col);

        while !dtm.is_nodata_at(row, col)? && (row, col) != target {
            match topology.downslope(row, col) {
                Some((nr, nc)) => {
                    if (nr, nc) == target {
                        // path hits the target: walk it again and mark it
                        let (mut mr, mut mc) = (start_row, start_col);
                        while !dtm.is_nodata_at(mr, mc)? && (mr, mc) != target {
                            match topology.downslope(mr, mc) {
                                Some(next) => {
                                    share.set(mr, mc, label)?;
                                    (mr, mc) = next;
                                }
                                None => break,
                            }
                        }
                    }
                    row = nr;
                    col = nc;
                }
                None => break,
            }
        }
    }

    Ok(share)
}

/// Accumulated diagnostics of one sub-catchment
#[derive(Debug, Clone, Copy, Default)]
pub struct SubBasinTotals {
    pub cells: usize,
    pub flux: f64,
    pub demand: f64,
    pub taken: f64,
    pub unmet: f64,
}

/// Sum the diagnostic rasters over the sub-catchment of one channel cell.
///
/// `share` is either the basin-share grid or an [`upstream_share`] grid;
/// the target cell's own values are always included.
pub fn sub_basin_totals(
    dtm: &Raster<f64>,
    share: &Raster<f64>,
    target: (usize, usize),
    flux_sum: &Raster<f64>,
    demand_sum: &Raster<f64>,
    taken_sum: &Raster<f64>,
    unmet_sum: &Raster<f64>,
) -> Result<SubBasinTotals> {
    let label = pack(target.0, target.1)?;
    let (rows, cols) = dtm.shape();

    let mut totals = SubBasinTotals {
        cells: 1,
        flux: flux_sum.get(target.0, target.1)?,
        demand: demand_sum.get(target.0, target.1)?,
        taken: taken_sum.get(target.0, target.1)?,
        unmet: unmet_sum.get(target.0, target.1)?,
    };

    for row in 0..rows {
        for col in 0..cols {
            if (row, col) == target || dtm.is_nodata_at(row, col)? {
                continue;
            }
            if share.get(row, col)? == label {
                totals.cells += 1;
                totals.flux += flux_sum.get(row, col)?;
                totals.demand += demand_sum.get(row, col)?;
                totals.taken += taken_sum.get(row, col)?;
                totals.unmet += unmet_sum.get(row, col)?;
            }
        }
    }

    Ok(totals)
}
