//! Input adapters: orbits, LUTs, DEMs and rasters

pub mod dem;
pub mod doppler;
pub mod orbit;
pub mod raster;

pub use dem::{ConstantDem, DemInterpolator, DemProvider};
pub use doppler::Lut2d;
pub use orbit::{Orbit, OrbitInterpMethod};
pub use raster::{MemoryRaster, RasterSink, RasterSource, Sample};

#[cfg(feature = "gdal")]
pub use raster::GdalRaster;
