//! sargeo: SAR geocoding and radiometric terrain correction
//!
//! Maps radar-geometry rasters (slant range / azimuth time) onto geographic
//! grids. The building blocks are:
//!
//! - [`crate::core::geometry`]: range-Doppler `geo2rdr` / `rdr2geo` against an orbit,
//!   a Doppler LUT and a DEM
//! - [`crate::core::facet`]: area-projection integration of radar facets over output
//!   cells, producing area-weighted values and RTC area factors
//! - [`crate::core::blocks`]: memory-bounded block decomposition
//! - [`crate::core::geocode`]: the block-parallel geocoding engine (INTERP and
//!   AREA_PROJECTION modes)
//!
//! Rasters are accessed through the [`crate::io::raster::RasterSource`] and
//! [`crate::io::raster::RasterSink`] traits; an in-memory implementation is always
//! available and a GDAL-backed one with the `gdal` feature.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::config::{GeocodeConfig, GeocodeOutputMode};
pub use crate::core::{
    compute_rtc, CoordinateMapper, GeocodeEngine, GeocodeOutputs, GeocodeSummary, InputRadiometry,
    InterpMethod, MemoryMode, RtcAlgorithm, RtcAreaMode,
};
pub use crate::io::{DemInterpolator, Lut2d, MemoryRaster, Orbit, OrbitInterpMethod, RasterSink, RasterSource};
pub use crate::types::{
    GeoGrid, GeoTransform, LookSide, RadarGrid, SarComplex, SarComplex64, SarError, SarResult,
    StateVector, Vector3,
};
