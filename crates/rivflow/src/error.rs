//! Error taxonomy for the routing engine.
//!
//! Fatal conditions become [`SimError`] and abort the run. Recoverable
//! numerical faults are clamped, counted in a [`FaultLog`] and logged once
//! per fault class so a long run cannot flood the log.

use thiserror::Error;
use tracing::warn;

/// Fatal simulation errors
#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Core(#[from] rivgis_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("main-channel routing enabled but the {0} grid is missing")]
    MissingChannelGrid(&'static str),

    #[error("minimum lag time allows a step of only {0:.4} s; grid and parameters cannot support a viable step")]
    StepTooShort(f64),

    #[error("withdrawal enabled but no demand source is available")]
    NoWithdrawalSource,

    #[error("no vertical flux data for year {year}, day {day} ({path})")]
    MissingFluxData {
        year: i32,
        day: u32,
        path: String,
    },

    #[error("no withdrawal data for year {year}, month {month} ({path})")]
    MissingWithdrawalData {
        year: i32,
        month: u32,
        path: String,
    },

    #[error("cascade cache holds {found} records, expected {expected}")]
    CacheShape { expected: usize, found: usize },

    #[error("cascade cache parse error at line {line}: {reason}")]
    CacheParse { line: usize, reason: String },

    #[error("cell ({row}, {col}) exceeds the packed-label coordinate limit of 10000")]
    PackedCoordOverflow { row: usize, col: usize },
}

/// Result type alias for simulation operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Occurrence counters for the recoverable fault classes.
///
/// Each class warns on its first occurrence only; the counters keep the full
/// magnitude available for a post-run audit.
#[derive(Debug, Clone, Default)]
pub struct FaultLog {
    pub negative_cascade_total: u64,
    pub withdrawal_over_threshold_headroom: u64,
    pub flow_below_threshold: u64,
    pub withdrawal_over_flow: u64,
    pub manipulation_reverted: u64,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn negative_cascade_total(&mut self) {
        if self.negative_cascade_total == 0 {
            warn!("negative cascade stage total computed, outflow clamped to zero");
        }
        self.negative_cascade_total += 1;
    }

    pub fn withdrawal_over_threshold_headroom(&mut self) {
        if self.withdrawal_over_threshold_headroom == 0 {
            warn!("withdrawal reduced to keep channel flow above the configured threshold");
        }
        self.withdrawal_over_threshold_headroom += 1;
    }

    pub fn flow_below_threshold(&mut self) {
        if self.flow_below_threshold == 0 {
            warn!("channel flow below the configured threshold, withdrawal suspended");
        }
        self.flow_below_threshold += 1;
    }

    pub fn withdrawal_over_flow(&mut self) {
        if self.withdrawal_over_flow == 0 {
            warn!("withdrawal demand exceeds cell outflow, reduced to the feasible amount");
        }
        self.withdrawal_over_flow += 1;
    }

    pub fn manipulation_reverted(&mut self) {
        if self.manipulation_reverted == 0 {
            warn!("point manipulation produced a negative outflow, reverted for this step");
        }
        self.manipulation_reverted += 1;
    }

    /// Total number of recoverable faults over the run
    pub fn total(&self) -> u64 {
        self.negative_cascade_total
            + self.withdrawal_over_threshold_headroom
            + self.flow_below_threshold
            + self.withdrawal_over_flow
            + self.manipulation_reverted
    }
}
