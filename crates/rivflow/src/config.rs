//! Simulation configuration.
//!
//! Built once before a run and treated as immutable afterwards. The CLI
//! deserializes it from a JSON file; tests construct it directly.

use serde::Deserialize;

use crate::error::{Result, SimError};

/// Step length selection
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLength {
    /// Derive the largest stable step from the minimum lag time
    Automatic,
    /// Fixed step in seconds, capped at the largest stable step
    Fixed(f64),
}

/// Stage count and physical parameter of one cascade type
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CascadeParams {
    pub stages: usize,
    pub param: f64,
}

/// Allocation mode for dynamically computed withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Take each sub-catchment's demand entirely from its main-channel cell
    ChannelOnly,
    /// Distribute each sub-catchment's demand by inflow-cell weights
    Proportional,
    /// Use the raw demand grid unchanged
    Exact,
}

/// Unit of the dynamic withdrawal demand grids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalUnit {
    /// mm/s equivalent (0.001 m3 per m2 per second)
    #[default]
    PerSecond,
    /// Monthly totals, converted with a nominal 30-day month
    Monthly,
}

/// Withdrawal policy
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WithdrawalConfig {
    /// Use the static per-cell withdrawal grid
    pub use_static: bool,
    /// Dynamic allocation mode, if dynamic withdrawal is enabled
    pub mode: Option<AllocationMode>,
    /// Unit of the dynamic demand grids
    pub unit: WithdrawalUnit,
    /// Days to simulate before any withdrawal is applied
    pub warmup_days: u32,
    /// Minimum flow (m3/s) main-channel cells must keep after withdrawal
    pub threshold: f64,
}

impl WithdrawalConfig {
    pub fn enabled(&self) -> bool {
        self.use_static || self.mode.is_some()
    }
}

/// How a point manipulation derives its override value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManipulationMode {
    /// Scale and offset the computed channel outflow
    ScaleOutflow,
    /// Scale and offset the pre-update stored channel total instead
    ScaleStore,
}

/// Outflow override at one fixed cell
#[derive(Debug, Clone, Deserialize)]
pub struct PointManipulation {
    pub row: usize,
    pub col: usize,
    pub mode: ManipulationMode,
    /// Multiplicative factor
    pub q: f64,
    /// Additive rate in m3/s, scaled by the step length
    pub a: f64,
}

/// Fixed cell whose daily mean discharge is written to a report file
#[derive(Debug, Clone, Deserialize)]
pub struct EvalPoint {
    pub name: String,
    pub row: usize,
    pub col: usize,
}

/// How the sub-basin diagnostic identifies its contributing cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubBasinMode {
    /// Cells whose basin-share label points at the target cell
    Labels,
    /// Cells whose flow path reaches the target cell, traced from the DTM
    Traced,
}

/// Monthly diagnostic over the sub-catchment of one main-channel cell
#[derive(Debug, Clone, Deserialize)]
pub struct SubBasinDiagnostic {
    pub row: usize,
    pub col: usize,
    pub mode: SubBasinMode,
}

/// Complete configuration of one simulation run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Calendar year the simulation starts in (January 1st)
    pub start_year: i32,
    /// Number of days to simulate
    pub days: u32,
    pub step: StepLength,
    /// Restrict the cell loop to cells inside the basin
    pub basin_only: bool,

    /// Overland cascade (stage count is 1 in practice)
    pub overland: CascadeParams,
    /// Ordinary channel cascade
    pub channel: CascadeParams,
    /// Main-channel cascade; `None` disables main-channel handling
    pub main_channel: Option<CascadeParams>,
    /// Base-flow retention parameter
    pub base_param: f64,
    /// Mean velocity ceiling in km/h, enforced by slowing reservoirs down
    pub velocity_ceiling: Option<f64>,

    /// Fraction of cell outflow withheld at ordinary cells
    pub loss_fraction_cells: f64,
    /// Fraction of cell outflow withheld at main-channel cells
    pub loss_fraction_channel: f64,
    /// Fraction of surface runoff removed before injection
    pub runoff_reduction: f64,
    /// Fraction of drainage removed before injection
    pub drainage_reduction: f64,
    /// Absolute runoff offset per cell in m3/s, within [-1, 1]
    pub runoff_offset: f64,
    /// Absolute drainage offset per cell in m3/s, within [-1, 1]
    pub drainage_offset: f64,
    /// Add the runoff reduction amount to drainage instead of reducing drainage
    pub auto_compensate_drainage: bool,

    pub withdrawal: WithdrawalConfig,
    pub manipulations: Vec<PointManipulation>,
    pub eval_points: Vec<EvalPoint>,
    pub sub_basin: Option<SubBasinDiagnostic>,
    /// Basin outlet cell whose outflow is tallied as river discharge
    pub basin_outlet: Option<(usize, usize)>,

    /// Warm-start the stores from the supplied cache grids and cascade file
    pub warm_start: bool,
    /// Write the cascade cache at the end of the run
    pub save_cache: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_year: 1990,
            days: 365,
            step: StepLength::Automatic,
            basin_only: false,
            overland: CascadeParams {
                stages: 1,
                param: 17.87e-2,
            },
            channel: CascadeParams {
                stages: 3,
                param: 9.92e-4,
            },
            main_channel: None,
            base_param: 50.0,
            velocity_ceiling: None,
            loss_fraction_cells: 0.0,
            loss_fraction_channel: 0.0,
            runoff_reduction: 0.0,
            drainage_reduction: 0.0,
            runoff_offset: 0.0,
            drainage_offset: 0.0,
            auto_compensate_drainage: false,
            withdrawal: WithdrawalConfig::default(),
            manipulations: Vec::new(),
            eval_points: Vec::new(),
            sub_basin: None,
            basin_outlet: None,
            warm_start: false,
            save_cache: false,
        }
    }
}

impl SimulationConfig {
    /// Check the settings that are wrong regardless of the input grids
    pub fn validate(&self) -> Result<()> {
        if self.days == 0 {
            return Err(SimError::Config("day count must be at least 1".into()));
        }
        if let StepLength::Fixed(s) = self.step {
            if !(s > 0.0) {
                return Err(SimError::Config(format!(
                    "fixed step length must be positive, got {s}"
                )));
            }
        }
        for (name, c) in [("overland", &self.overland), ("channel", &self.channel)]
            .into_iter()
            .chain(self.main_channel.iter().map(|c| ("main_channel", c)))
        {
            if c.stages == 0 {
                return Err(SimError::Config(format!(
                    "{name} cascade must have at least one stage"
                )));
            }
            if !(c.param > 0.0) {
                return Err(SimError::Config(format!(
                    "{name} parameter must be positive, got {}",
                    c.param
                )));
            }
        }
        if !(self.base_param > 0.0) {
            return Err(SimError::Config("base parameter must be positive".into()));
        }
        for (name, f) in [
            ("loss_fraction_cells", self.loss_fraction_cells),
            ("loss_fraction_channel", self.loss_fraction_channel),
            ("runoff_reduction", self.runoff_reduction),
            ("drainage_reduction", self.drainage_reduction),
        ] {
            if !(0.0..=1.0).contains(&f) {
                return Err(SimError::Config(format!(
                    "{name} must lie in [0, 1], got {f}"
                )));
            }
        }
        for (name, o) in [
            ("runoff_offset", self.runoff_offset),
            ("drainage_offset", self.drainage_offset),
        ] {
            if !(-1.0..=1.0).contains(&o) {
                return Err(SimError::Config(format!(
                    "{name} must lie in [-1, 1] m3/s, got {o}"
                )));
            }
        }
        if self.manipulations.len() > 2 {
            return Err(SimError::Config(
                "at most two point manipulations are supported".into(),
            ));
        }
        if self.withdrawal.threshold < 0.0 {
            return Err(SimError::Config(
                "withdrawal threshold must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Outflow pass-through factor for ordinary cells
    pub fn flow_factor_cells(&self) -> f64 {
        1.0 - self.loss_fraction_cells
    }

    /// Outflow pass-through factor for main-channel cells
    pub fn flow_factor_channel(&self) -> f64 {
        1.0 - self.loss_fraction_channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_stages() {
        let mut cfg = SimulationConfig::default();
        cfg.channel.stages = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        let cfg = SimulationConfig {
            loss_fraction_cells: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_bound_offsets() {
        let cfg = SimulationConfig {
            runoff_offset: -1000.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = SimulationConfig {
            drainage_offset: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = SimulationConfig {
            runoff_offset: -0.5,
            drainage_offset: 1.0,
            ..Default::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "start_year": 1995,
            "days": 30,
            "step": { "fixed": 3600.0 },
            "main_channel": { "stages": 5, "param": 0.0008 },
            "withdrawal": { "mode": "proportional", "unit": "monthly", "warmup_days": 10 }
        }"#;
        let cfg: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.start_year, 1995);
        assert_eq!(cfg.step, StepLength::Fixed(3600.0));
        assert_eq!(cfg.main_channel.unwrap().stages, 5);
        assert_eq!(cfg.withdrawal.mode, Some(AllocationMode::Proportional));
        assert_eq!(cfg.withdrawal.unit, WithdrawalUnit::Monthly);
        cfg.validate().unwrap();
    }
}
