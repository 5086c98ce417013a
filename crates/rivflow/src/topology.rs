//! Drainage topology derived once from the DTM.
//!
//! For every cell the steepest-descent neighbor direction (D8 code, 0 for
//! local sinks and flats) and the downslope gradient, drop over
//! center-to-center distance. Main-channel cells additionally get their
//! gradient mirrored into a channel-gradient grid so the step-length
//! derivation can find the channel maximum directly.

use rayon::prelude::*;
use rivgis_core::raster::d8;
use rivgis_core::Raster;

/// Per-cell routing direction and gradient
#[derive(Debug, Clone)]
pub struct DrainageTopology {
    /// D8 direction code, 0 = no lower neighbor
    pub direction: Raster<u8>,
    /// Downslope gradient (dz over distance), 0 for sinks and flats
    pub gradient: Raster<f64>,
    /// Gradient restricted to main-channel cells, 0 elsewhere
    pub channel_gradient: Option<Raster<f64>>,
}

impl DrainageTopology {
    /// Derive directions and gradients from a DTM, optionally marking the
    /// gradients of main-channel cells separately
    pub fn derive(dtm: &Raster<f64>, channel: Option<&Raster<f64>>) -> Self {
        let (rows, cols) = dtm.shape();
        let cell_size = dtm.cell_size();

        let per_row: Vec<Vec<(u8, f64)>> = (0..rows)
            .into_par_iter()
            .map(|row| {
                (0..cols)
                    .map(|col| steepest_descent(dtm, row, col, cell_size))
                    .collect()
            })
            .collect();

        let mut direction: Raster<u8> = dtm.with_same_meta();
        let mut gradient: Raster<f64> = dtm.with_same_meta();
        for (row, cells) in per_row.iter().enumerate() {
            for (col, &(dir, grad)) in cells.iter().enumerate() {
                // Bounds follow from the loop ranges
                unsafe {
                    direction.set_unchecked(row, col, dir);
                    gradient.set_unchecked(row, col, grad);
                }
            }
        }

        let channel_gradient = channel.map(|mask| {
            let mut cg: Raster<f64> = dtm.with_same_meta();
            for row in 0..rows {
                for col in 0..cols {
                    unsafe {
                        if mask.get_unchecked(row, col) != 0.0 {
                            cg.set_unchecked(row, col, gradient.get_unchecked(row, col));
                        }
                    }
                }
            }
            cg
        });

        Self {
            direction,
            gradient,
            channel_gradient,
        }
    }

    /// Downslope neighbor of a cell, if it has one
    pub fn downslope(&self, row: usize, col: usize) -> Option<(usize, usize)> {
        let dir = self.direction.get(row, col).ok()?;
        d8::neighbor(row, col, dir, self.direction.rows(), self.direction.cols())
    }

    /// Whether a cell is a local sink (no lower neighbor)
    pub fn is_sink(&self, row: usize, col: usize) -> bool {
        matches!(self.direction.get(row, col), Ok(0))
    }
}

fn steepest_descent(dtm: &Raster<f64>, row: usize, col: usize, cell_size: f64) -> (u8, f64) {
    let z = match dtm.get(row, col) {
        Ok(v) if !dtm.is_nodata(v) => v,
        _ => return (0, 0.0),
    };

    let mut best_dir = 0u8;
    let mut best_grad = 0.0;
    for dir in 1..=8u8 {
        if let Some((nr, nc)) = d8::neighbor(row, col, dir, dtm.rows(), dtm.cols()) {
            let zn = unsafe { dtm.get_unchecked(nr, nc) };
            if dtm.is_nodata(zn) {
                continue;
            }
            let grad = (z - zn) / (d8::DISTANCES[dir as usize] * cell_size);
            if grad > best_grad {
                best_grad = grad;
                best_dir = dir;
            }
        }
    }

    (best_dir, best_grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rivgis_core::GeoTransform;

    fn sloped_row() -> Raster<f64> {
        // 1x5 strip falling to the east
        let mut dtm = Raster::from_vec(vec![40.0, 30.0, 20.0, 10.0, 0.0], 1, 5).unwrap();
        dtm.set_transform(GeoTransform::new(0.0, 5.0, 1000.0, -1000.0));
        dtm
    }

    #[test]
    fn east_facing_slope_routes_east() {
        let topo = DrainageTopology::derive(&sloped_row(), None);
        for col in 0..4 {
            assert_eq!(topo.direction.get(0, col).unwrap(), 1);
            assert_relative_eq!(topo.gradient.get(0, col).unwrap(), 10.0 / 1000.0);
            assert_eq!(topo.downslope(0, col), Some((0, col + 1)));
        }
        // lowest cell is a sink
        assert!(topo.is_sink(0, 4));
        assert_eq!(topo.gradient.get(0, 4).unwrap(), 0.0);
    }

    #[test]
    fn channel_gradient_masks_non_channel_cells() {
        let mask = Raster::from_vec(vec![0.0, 0.0, 0.0, 1.0, 1.0], 1, 5).unwrap();
        let topo = DrainageTopology::derive(&sloped_row(), Some(&mask));
        let cg = topo.channel_gradient.unwrap();
        assert_eq!(cg.get(0, 1).unwrap(), 0.0);
        assert_relative_eq!(cg.get(0, 3).unwrap(), 10.0 / 1000.0);
    }

    #[test]
    fn nodata_cells_are_sinks() {
        let mut dtm = sloped_row();
        dtm.set_nodata(Some(-9999.0));
        dtm.set(0, 2, -9999.0).unwrap();
        let topo = DrainageTopology::derive(&dtm, None);
        assert_eq!(topo.direction.get(0, 2).unwrap(), 0);
        // neighbor of a nodata cell never routes into it
        assert_ne!(topo.downslope(0, 1), Some((0, 2)));
    }
}
