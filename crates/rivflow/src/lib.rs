//! # RivGis RivFlow
//!
//! Distributed hydrological routing over a digital terrain model.
//!
//! Every grid cell carries a set of linear reservoirs: one overland store,
//! one base-flow store and an N-stage channel cascade (ordinary channel
//! cells and main-channel cells use different stage counts and parameters).
//! Each time step the engine injects external vertical fluxes (surface
//! runoff and drainage), advances the reservoirs, applies withdrawals and
//! routes the resulting outflow to the steepest-descent neighbor. Step
//! length is chosen automatically from the fastest reservoir in the basin
//! so the explicit integration stays stable.
//!
//! The entry point is [`engine::run`]; everything it needs is described by
//! [`config::SimulationConfig`] and [`engine::SimulationInputs`].

pub mod accounting;
pub mod basin;
pub mod cache;
pub mod cascade;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod flux;
pub mod report;
pub mod retention;
pub mod state;
pub mod step;
pub mod topology;
pub mod withdrawal;

pub use config::SimulationConfig;
pub use engine::{run, RunOutputs, SimulationInputs};
pub use error::{FaultLog, Result, SimError};
