//! External forcing sources.
//!
//! The engine pulls a pair of vertical-flux grids per simulated day and,
//! when dynamic withdrawal is on, a raw demand grid per month. The legacy
//! directory naming is one implementation of these traits; tests feed
//! synthetic grids through the in-memory sources.

use std::path::PathBuf;

use rivgis_core::io::read_geotiff;
use rivgis_core::Raster;

use crate::error::{Result, SimError};

/// Surface runoff and drainage rates for one day, m/s per cell
#[derive(Debug, Clone)]
pub struct DailyFlux {
    pub runoff: Raster<f64>,
    pub drainage: Raster<f64>,
}

/// Supplier of the daily vertical-flux grids
pub trait VerticalFluxSource {
    fn for_day(&mut self, year: i32, day_of_year: u32) -> Result<DailyFlux>;
}

/// Supplier of the monthly raw withdrawal-demand grids
pub trait WithdrawalSource {
    fn for_month(&mut self, year: i32, month: u32) -> Result<Raster<f64>>;
}

/// Flux grids laid out as `<dir>/<year>/srunoff_<year>_<day>.tif` and
/// `<dir>/<year>/drainage_<year>_<day>.tif`
#[derive(Debug, Clone)]
pub struct FluxFiles {
    dir: PathBuf,
}

impl FluxFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn grid(&self, stem: &str, year: i32, day: u32) -> Result<Raster<f64>> {
        let path = self
            .dir
            .join(year.to_string())
            .join(format!("{stem}_{year}_{day}.tif"));
        read_geotiff(&path).map_err(|_| SimError::MissingFluxData {
            year,
            day,
            path: path.display().to_string(),
        })
    }
}

impl VerticalFluxSource for FluxFiles {
    fn for_day(&mut self, year: i32, day_of_year: u32) -> Result<DailyFlux> {
        Ok(DailyFlux {
            runoff: self.grid("srunoff", year, day_of_year)?,
            drainage: self.grid("drainage", year, day_of_year)?,
        })
    }
}

/// Demand grids laid out as `<dir>/TotalWUse_<year>_<month>.tif`.
///
/// Years past `last_year` reuse that year's grids; the historical demand
/// data ends before the flux data does.
#[derive(Debug, Clone)]
pub struct WithdrawalFiles {
    dir: PathBuf,
    last_year: i32,
}

impl WithdrawalFiles {
    pub fn new(dir: impl Into<PathBuf>, last_year: i32) -> Self {
        Self {
            dir: dir.into(),
            last_year,
        }
    }
}

impl WithdrawalSource for WithdrawalFiles {
    fn for_month(&mut self, year: i32, month: u32) -> Result<Raster<f64>> {
        let year = year.min(self.last_year);
        let path = self.dir.join(format!("TotalWUse_{year}_{month}.tif"));
        read_geotiff(&path).map_err(|_| SimError::MissingWithdrawalData {
            year,
            month,
            path: path.display().to_string(),
        })
    }
}

/// Constant in-memory flux source for tests and steady-state experiments
#[derive(Debug, Clone)]
pub struct ConstantFlux {
    pub flux: DailyFlux,
}

impl ConstantFlux {
    pub fn new(runoff: Raster<f64>, drainage: Raster<f64>) -> Self {
        Self {
            flux: DailyFlux { runoff, drainage },
        }
    }

    /// Uniform rates over a grid of the given shape
    pub fn uniform(rows: usize, cols: usize, runoff: f64, drainage: f64) -> Self {
        Self::new(
            Raster::filled(rows, cols, runoff),
            Raster::filled(rows, cols, drainage),
        )
    }
}

impl VerticalFluxSource for ConstantFlux {
    fn for_day(&mut self, _year: i32, _day_of_year: u32) -> Result<DailyFlux> {
        Ok(self.flux.clone())
    }
}

/// Constant in-memory demand source
#[derive(Debug, Clone)]
pub struct ConstantWithdrawal {
    pub demand: Raster<f64>,
}

impl WithdrawalSource for ConstantWithdrawal {
    fn for_month(&mut self, _year: i32, _month: u32) -> Result<Raster<f64>> {
        Ok(self.demand.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_flux_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FluxFiles::new(dir.path());
        match source.for_day(1995, 200) {
            Err(SimError::MissingFluxData { year, day, .. }) => {
                assert_eq!(year, 1995);
                assert_eq!(day, 200);
            }
            other => panic!("expected missing flux data, got {other:?}"),
        }
    }

    #[test]
    fn withdrawal_years_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let grid: Raster<f64> = Raster::filled(2, 2, 3.0);
        rivgis_core::io::write_geotiff(&grid, dir.path().join("TotalWUse_2000_7.tif")).unwrap();

        let mut source = WithdrawalFiles::new(dir.path(), 2000);
        // 2005 falls back to the 2000 grids
        let demand = source.for_month(2005, 7).unwrap();
        assert_eq!(demand.get(1, 1).unwrap(), 3.0);
    }
}
