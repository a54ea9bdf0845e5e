//! Core geocoding modules

pub mod blocks;
pub mod carrier;
pub mod ellipsoid;
pub mod facet;
pub mod geocode;
pub mod geometry;
pub mod interpolate;
pub mod projection;
pub mod rtc;
pub mod stats;

// Re-export main types
pub use blocks::{get_block_size, plan_blocks, BlockDescriptor, BlockLayout, BlockSizeConfig, MemoryMode};
pub use carrier::{CarrierConfig, PhaseCarrier, Poly2d, ZeroCarrier};
pub use ellipsoid::Ellipsoid;
pub use facet::{AccumulatorGrid, FacetIntegrator};
pub use geocode::{GeocodeEngine, GeocodeOutputs, GeocodeSummary};
pub use geometry::{geo2rdr, rdr2geo, CoordinateMapper, Geo2RdrParams, Rdr2GeoParams};
pub use interpolate::InterpMethod;
pub use projection::Projection;
pub use rtc::{compute_rtc, InputRadiometry, RtcAlgorithm, RtcAreaMode, RtcOptions};
pub use stats::{compute_raster_stats, RasterStats};
