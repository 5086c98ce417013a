//! # RivGis Core
//!
//! Core types and I/O for the RivGis hydrological analysis toolkit.
//!
//! This crate provides:
//! - `Raster<T>`: generic grid type with no-data handling and statistics
//! - `GeoTransform`: affine georeferencing
//! - D8 neighbor tables shared by the routing tools
//! - Native GeoTIFF persistence

pub mod error;
pub mod io;
pub mod raster;

pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
}
