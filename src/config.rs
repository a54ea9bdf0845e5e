//! Run configuration for geocoding and RTC
//!
//! Every field has a default, so a YAML file only needs the keys it changes:
//!
//! ```yaml
//! output_mode: AREA_PROJECTION
//! memory_mode: BLOCKS_GEOGRID
//! rtc:
//!   input_radiometry: SIGMA_NAUGHT_ELLIPSOID
//!   min_value_db: -30.0
//! ```

use crate::core::blocks::{BlockSizeConfig, MemoryMode};
use crate::core::carrier::CarrierConfig;
use crate::core::geometry::{Geo2RdrParams, Rdr2GeoParams};
use crate::core::interpolate::InterpMethod;
use crate::core::rtc::RtcOptions;
use crate::types::{SarError, SarResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How radar samples reach the output grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeocodeOutputMode {
    /// One resampled value per output cell
    Interp,
    /// Facet area integration
    AreaProjection,
}

impl Default for GeocodeOutputMode {
    fn default() -> Self {
        GeocodeOutputMode::Interp
    }
}

impl std::fmt::Display for GeocodeOutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeOutputMode::Interp => write!(f, "INTERP"),
            GeocodeOutputMode::AreaProjection => write!(f, "AREA_PROJECTION"),
        }
    }
}

impl std::str::FromStr for GeocodeOutputMode {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INTERP" => Ok(GeocodeOutputMode::Interp),
            "AREA_PROJECTION" => Ok(GeocodeOutputMode::AreaProjection),
            _ => Err(SarError::InvalidParameter(format!(
                "Invalid geocode output mode: {}",
                s
            ))),
        }
    }
}

/// Geocoding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub output_mode: GeocodeOutputMode,
    pub interp_method: InterpMethod,
    pub memory_mode: MemoryMode,
    pub block_size: BlockSizeConfig,
    pub geo2rdr: Geo2RdrParams,
    pub rdr2geo: Rdr2GeoParams,
    pub rtc: RtcOptions,
    /// 0 selects 1 for real and 2 for complex area-projected input
    pub exponent: u32,
    pub abs_cal_factor: f64,
    pub clip_min: Option<f64>,
    pub clip_max: Option<f64>,
    /// Cells with fewer looks are invalid (area projection)
    pub min_nlooks: Option<f64>,
    /// Looks carried by each radar sample
    pub radar_grid_nlooks: f64,
    /// Emit cross-products of complex bands (area projection)
    pub full_covariance: bool,
    /// Remove the geometric range phase from resampled complex data
    pub flatten: bool,
    /// Flatten with the corrected rather than the geometric slant range
    pub flatten_with_corrected_srange: bool,
    pub azimuth_carrier: CarrierConfig,
    pub range_carrier: CarrierConfig,
    /// Radar samples added around each block's radar bounding box
    pub radar_block_margin: usize,
    /// Output cells added around each block when loading DEM windows
    pub dem_block_margin: usize,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            output_mode: GeocodeOutputMode::Interp,
            interp_method: InterpMethod::Biquintic,
            memory_mode: MemoryMode::Auto,
            block_size: BlockSizeConfig::default(),
            geo2rdr: Geo2RdrParams::default(),
            rdr2geo: Rdr2GeoParams::default(),
            rtc: RtcOptions::default(),
            exponent: 0,
            abs_cal_factor: 1.0,
            clip_min: None,
            clip_max: None,
            min_nlooks: None,
            radar_grid_nlooks: 1.0,
            full_covariance: false,
            flatten: true,
            flatten_with_corrected_srange: false,
            azimuth_carrier: CarrierConfig::Zero,
            range_carrier: CarrierConfig::Zero,
            radar_block_margin: 10,
            dem_block_margin: 20,
        }
    }
}

impl GeocodeConfig {
    pub fn from_yaml_str(yaml: &str) -> SarResult<Self> {
        let config: GeocodeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        log::info!("Loading geocode configuration: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> SarResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject settings that would make processing meaningless
    pub fn validate(&self) -> SarResult<()> {
        if !(self.geo2rdr.threshold > 0.0) || self.geo2rdr.max_iterations == 0 {
            return Err(SarError::InvalidParameter(format!(
                "geo2rdr needs a positive threshold and iteration cap, got {} / {}",
                self.geo2rdr.threshold, self.geo2rdr.max_iterations
            )));
        }
        if !(self.rdr2geo.threshold > 0.0) || self.rdr2geo.max_iterations == 0 {
            return Err(SarError::InvalidParameter(format!(
                "rdr2geo needs a positive threshold and iteration cap, got {} / {}",
                self.rdr2geo.threshold, self.rdr2geo.max_iterations
            )));
        }
        self.block_size.validate()?;
        if self.rtc.geogrid_upsampling == 0 {
            return Err(SarError::InvalidParameter(
                "geogrid upsampling must be at least 1".to_string(),
            ));
        }
        if !(self.abs_cal_factor.is_finite() && self.abs_cal_factor > 0.0) {
            return Err(SarError::InvalidParameter(format!(
                "absolute calibration factor must be positive, got {}",
                self.abs_cal_factor
            )));
        }
        if let (Some(lo), Some(hi)) = (self.clip_min, self.clip_max) {
            if lo > hi {
                return Err(SarError::InvalidParameter(format!(
                    "clip min ({}) is greater than clip max ({})",
                    lo, hi
                )));
            }
        }
        if !(self.radar_grid_nlooks > 0.0) {
            return Err(SarError::InvalidParameter(format!(
                "radar grid looks must be positive, got {}",
                self.radar_grid_nlooks
            )));
        }
        if matches!(self.min_nlooks, Some(n) if !(n >= 0.0)) {
            return Err(SarError::InvalidParameter(
                "minimum number of looks must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective exponent for the given input type
    pub fn effective_exponent(&self, input_is_complex: bool) -> u32 {
        match (self.exponent, self.output_mode) {
            (0, GeocodeOutputMode::AreaProjection) if input_is_complex => 2,
            (0, _) => 1,
            (n, _) => n,
        }
    }
}
