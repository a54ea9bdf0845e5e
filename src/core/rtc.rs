//! Radiometric terrain correction options and the stand-alone RTC product

use crate::config::GeocodeConfig;
use crate::core::geocode::GeocodeEngine;
use crate::io::doppler::Lut2d;
use crate::io::orbit::Orbit;
use crate::io::raster::{MemoryRaster, RasterSource};
use crate::types::{GeoGrid, RadarGrid, SarError, SarResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Radiometric convention of the radar input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputRadiometry {
    BetaNaught,
    SigmaNaughtEllipsoid,
}

impl Default for InputRadiometry {
    fn default() -> Self {
        InputRadiometry::BetaNaught
    }
}

impl std::str::FromStr for InputRadiometry {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BETA_NAUGHT" | "BETA0" => Ok(InputRadiometry::BetaNaught),
            "SIGMA_NAUGHT_ELLIPSOID" | "SIGMA0" => Ok(InputRadiometry::SigmaNaughtEllipsoid),
            _ => Err(SarError::InvalidParameter(format!(
                "Invalid terrain radiometry: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for InputRadiometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputRadiometry::BetaNaught => write!(f, "BETA_NAUGHT"),
            InputRadiometry::SigmaNaughtEllipsoid => write!(f, "SIGMA_NAUGHT_ELLIPSOID"),
        }
    }
}

/// RTC output quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RtcAreaMode {
    /// Accumulated illuminated area (m^2)
    Area,
    /// Illuminated area over reference area
    AreaFactor,
}

impl Default for RtcAreaMode {
    fn default() -> Self {
        RtcAreaMode::AreaFactor
    }
}

impl std::str::FromStr for RtcAreaMode {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AREA" => Ok(RtcAreaMode::Area),
            "AREA_FACTOR" => Ok(RtcAreaMode::AreaFactor),
            _ => Err(SarError::InvalidParameter(format!("Invalid RTC area mode: {}", s))),
        }
    }
}

impl std::fmt::Display for RtcAreaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtcAreaMode::Area => write!(f, "AREA"),
            RtcAreaMode::AreaFactor => write!(f, "AREA_FACTOR"),
        }
    }
}

/// How facet areas are distributed to output cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RtcAlgorithm {
    /// Facet area spread over the four cells nearest its centroid
    BilinearDistribution,
    /// Exact facet/cell intersection
    AreaProjection,
}

impl Default for RtcAlgorithm {
    fn default() -> Self {
        RtcAlgorithm::AreaProjection
    }
}

impl std::str::FromStr for RtcAlgorithm {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BILINEAR_DISTRIBUTION" => Ok(RtcAlgorithm::BilinearDistribution),
            "AREA_PROJECTION" => Ok(RtcAlgorithm::AreaProjection),
            _ => Err(SarError::InvalidParameter(format!("Invalid RTC algorithm: {}", s))),
        }
    }
}

impl std::fmt::Display for RtcAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtcAlgorithm::BilinearDistribution => write!(f, "BILINEAR_DISTRIBUTION"),
            RtcAlgorithm::AreaProjection => write!(f, "AREA_PROJECTION"),
        }
    }
}

/// Radiometric terrain correction settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcOptions {
    pub input_radiometry: InputRadiometry,
    pub area_mode: RtcAreaMode,
    pub algorithm: RtcAlgorithm,
    /// Cells with an area factor below this (dB) are invalid
    pub min_value_db: Option<f64>,
    /// Facet subdivision per radar cell side
    pub geogrid_upsampling: usize,
    /// Normalise area-projected values by the illuminated area
    pub apply_rtc: bool,
}

impl Default for RtcOptions {
    fn default() -> Self {
        Self {
            input_radiometry: InputRadiometry::BetaNaught,
            area_mode: RtcAreaMode::AreaFactor,
            algorithm: RtcAlgorithm::AreaProjection,
            min_value_db: None,
            geogrid_upsampling: 1,
            apply_rtc: false,
        }
    }
}

impl RtcOptions {
    /// Linear area-factor threshold, if any
    pub fn min_value(&self) -> Option<f64> {
        self.min_value_db.map(|db| 10f64.powf(db / 10.0))
    }
}

/// Compute the RTC area (or area factor) over `geogrid` without input data
pub fn compute_rtc(
    radar_grid: &RadarGrid,
    orbit: &Orbit,
    doppler: &Lut2d,
    geogrid: &GeoGrid,
    dem_raster: &dyn RasterSource<f32>,
    config: &GeocodeConfig,
) -> SarResult<Array2<f32>> {
    log::info!("Computing RTC {} ({})", config.rtc.area_mode, config.rtc.algorithm);
    let engine = GeocodeEngine::new(radar_grid.clone(), orbit, doppler, *geogrid, config.clone())?;
    let mut output = MemoryRaster::filled(geogrid.width, geogrid.length, 1, f32::NAN);
    engine.compute_rtc_area(dem_raster, &mut output)?;
    Ok(output.into_bands().remove(0))
}
