//! Run directory and report files.
//!
//! Every run writes into a fresh directory named after the wall-clock
//! start time (`ddmmyy_HHMM`), with `grids/` for raster output and
//! `balance/` for the daily per-cell balance dumps. The monitoring logs are
//! plain whitespace-separated tables, appended to as the run crosses day
//! and month boundaries.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use rivgis_core::Raster;
use tracing::info;

use crate::accounting::{DayRecord, MonthRecord};
use crate::basin::SubBasinTotals;
use crate::config::SimulationConfig;
use crate::error::{FaultLog, Result};
use crate::retention::StepPlan;
use crate::state::SimulationState;

const DAY_HEADER: &str =
    "day day_in day_out total_in total_out stored imbalance sink withdrawn cascade";

/// Writer for all per-run report files
pub struct RunReporter {
    root: PathBuf,
    basin_log: BufWriter<File>,
    system_log: BufWriter<File>,
    month_log: BufWriter<File>,
    sub_basin_log: Option<BufWriter<File>>,
    point_logs: HashMap<String, BufWriter<File>>,
}

impl RunReporter {
    /// Create a timestamped run directory under `base` and open the logs
    pub fn create(base: impl AsRef<Path>) -> Result<Self> {
        let stamp = Local::now().format("%d%m%y_%H%M").to_string();
        let root = base.as_ref().join(stamp);
        Self::at(root)
    }

    /// Open the report files in an explicit directory
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("grids"))?;
        fs::create_dir_all(root.join("balance"))?;
        info!(dir = %root.display(), "run directory created");

        let mut basin_log = log_file(&root, "Monitoring_RivBasin.txt")?;
        let mut system_log = log_file(&root, "Monitoring_WSystem.txt")?;
        let mut month_log = log_file(&root, "Monitoring_monthWUseRivBasin.txt")?;
        writeln!(basin_log, "{DAY_HEADER}")?;
        writeln!(system_log, "{DAY_HEADER}")?;
        writeln!(month_log, "year month runoff drainage river_out demand taken unmet")?;

        Ok(Self {
            root,
            basin_log,
            system_log,
            month_log,
            sub_basin_log: None,
            point_logs: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory raster output belongs in
    pub fn grids_dir(&self) -> PathBuf {
        self.root.join("grids")
    }

    /// Dump the effective configuration and the derived step plan
    pub fn write_parameters(&self, config: &SimulationConfig, plan: &StepPlan) -> Result<()> {
        let mut out = log_file(&self.root, "SimParameters.txt")?;
        writeln!(out, "{config:#?}")?;
        writeln!(out)?;
        writeln!(out, "{plan:#?}")?;
        out.flush()?;
        Ok(())
    }

    /// Append one closed day to both monitoring logs
    pub fn day_records(&mut self, basin: &DayRecord, system: &DayRecord) -> Result<()> {
        for (log, r) in [(&mut self.basin_log, basin), (&mut self.system_log, system)] {
            writeln!(
                log,
                "{} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3}",
                r.day_index,
                r.day_in,
                r.day_out,
                r.total_in,
                r.total_out,
                r.stored,
                r.imbalance,
                r.sink_total,
                r.day_withdrawn,
                r.cascade_total,
            )?;
            log.flush()?;
        }
        Ok(())
    }

    /// Append one closed month to the water-use log
    pub fn month_record(&mut self, r: &MonthRecord) -> Result<()> {
        writeln!(
            self.month_log,
            "{} {} {:.3} {:.3} {:.3} {:.3} {:.3} {:.3}",
            r.year, r.month, r.runoff, r.drainage, r.river_out, r.demand, r.taken, r.unmet,
        )?;
        self.month_log.flush()?;
        Ok(())
    }

    /// Append one month of sub-catchment totals
    pub fn sub_basin(&mut self, year: i32, month: u32, totals: &SubBasinTotals) -> Result<()> {
        if self.sub_basin_log.is_none() {
            let mut log = log_file(&self.root, "Monitoring_SubBasin.txt")?;
            writeln!(log, "year month cells flux demand taken unmet")?;
            self.sub_basin_log = Some(log);
        }
        if let Some(log) = self.sub_basin_log.as_mut() {
            writeln!(
                log,
                "{} {} {} {:.3} {:.3} {:.3} {:.3}",
                year, month, totals.cells, totals.flux, totals.demand, totals.taken, totals.unmet,
            )?;
            log.flush()?;
        }
        Ok(())
    }

    /// Append a daily mean discharge (m3/s) to an evaluation point's file
    pub fn point_value(&mut self, name: &str, day_index: u32, discharge: f64) -> Result<()> {
        if !self.point_logs.contains_key(name) {
            let mut log = log_file(&self.root, &format!("{name}.txt"))?;
            writeln!(log, "day discharge")?;
            self.point_logs.insert(name.to_string(), log);
        }
        if let Some(log) = self.point_logs.get_mut(name) {
            writeln!(log, "{day_index} {discharge:.4}")?;
            log.flush()?;
        }
        Ok(())
    }

    /// Dump the per-cell store contents of the basin for one day
    pub fn river_balance(
        &self,
        year: i32,
        day_of_year: u32,
        dtm: &Raster<f64>,
        share: &Raster<f64>,
        state: &SimulationState,
    ) -> Result<()> {
        let path = self
            .root
            .join("balance")
            .join(format!("RivWaterBalance_{year}-{day_of_year}.txt"));
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "row col overland base channel flow")?;

        let (rows, cols) = dtm.shape();
        for row in 0..rows {
            for col in 0..cols {
                if dtm.is_nodata_at(row, col)? || share.get(row, col)? < 0.0 {
                    continue;
                }
                writeln!(
                    out,
                    "{} {} {:.4} {:.4} {:.4} {:.4}",
                    row,
                    col,
                    state.overland.get(row, col)?,
                    state.base.get(row, col)?,
                    state.channel_total.get(row, col)?,
                    state.channel_flow.get(row, col)?,
                )?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Write the fault counters collected over the run
    pub fn write_faults(&self, faults: &FaultLog) -> Result<()> {
        let mut out = log_file(&self.root, "ErrorLog.txt")?;
        writeln!(out, "negative_cascade_total {}", faults.negative_cascade_total)?;
        writeln!(
            out,
            "withdrawal_over_threshold_headroom {}",
            faults.withdrawal_over_threshold_headroom
        )?;
        writeln!(out, "flow_below_threshold {}", faults.flow_below_threshold)?;
        writeln!(out, "withdrawal_over_flow {}", faults.withdrawal_over_flow)?;
        writeln!(out, "manipulation_reverted {}", faults.manipulation_reverted)?;
        writeln!(out, "total {}", faults.total())?;
        out.flush()?;
        Ok(())
    }
}

fn log_file(root: &Path, name: &str) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(root.join(name))?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = RunReporter::at(dir.path().join("run")).unwrap();
        assert!(reporter.grids_dir().is_dir());
        assert!(reporter.root().join("balance").is_dir());
        assert!(reporter.root().join("Monitoring_RivBasin.txt").is_file());
        assert!(reporter.root().join("Monitoring_WSystem.txt").is_file());
    }

    #[test]
    fn point_log_accumulates_days() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = RunReporter::at(dir.path().join("run")).unwrap();
        reporter.point_value("gauge_a", 1, 12.5).unwrap();
        reporter.point_value("gauge_a", 2, 11.0).unwrap();

        let text = fs::read_to_string(reporter.root().join("gauge_a.txt")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1 "));
        assert!(lines[2].starts_with("2 "));
    }

    #[test]
    fn month_log_row_per_month() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = RunReporter::at(dir.path().join("run")).unwrap();
        let record = MonthRecord {
            year: 1995,
            month: 3,
            runoff: 1.0,
            drainage: 2.0,
            river_out: 3.0,
            demand: 4.0,
            taken: 3.5,
            unmet: 0.5,
        };
        reporter.month_record(&record).unwrap();
        let text =
            fs::read_to_string(reporter.root().join("Monitoring_monthWUseRivBasin.txt")).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("1995 3 "));
    }
}
