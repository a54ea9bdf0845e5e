use chrono::{DateTime, Utc};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Complex-valued SAR data type (I + jQ)
pub type SarComplex = Complex<f32>;

/// Double precision complex sample used internally for resampling and accumulation
pub type SarComplex64 = Complex<f64>;

/// Simple 3D vector for geometric calculations (ECEF metres unless stated otherwise)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction; the zero vector is returned unchanged
    pub fn normalized(&self) -> Vector3 {
        let n = self.norm();
        if n > 0.0 {
            *self * (1.0 / n)
        } else {
            *self
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;
    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;
    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

/// Side of the platform the antenna is pointing to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookSide {
    Left,
    Right,
}

impl LookSide {
    /// +1 for left-looking, -1 for right-looking geometry
    pub fn sign(self) -> f64 {
        match self {
            LookSide::Left => 1.0,
            LookSide::Right => -1.0,
        }
    }
}

impl std::fmt::Display for LookSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookSide::Left => write!(f, "left"),
            LookSide::Right => write!(f, "right"),
        }
    }
}

impl std::str::FromStr for LookSide {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" => Ok(LookSide::Left),
            "right" => Ok(LookSide::Right),
            _ => Err(SarError::InvalidParameter(format!("Invalid look side: {}", s))),
        }
    }
}

/// Orbit state vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVector {
    pub time: DateTime<Utc>,
    pub position: [f64; 3],  // [x, y, z] in meters
    pub velocity: [f64; 3],  // [vx, vy, vz] in m/s
}

/// Precise orbit information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitData {
    pub state_vectors: Vec<StateVector>,
    pub reference_time: DateTime<Utc>,
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn new(top_left_x: f64, pixel_width: f64, top_left_y: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Radar (slant range / azimuth time) sampling grid
///
/// Azimuth times are seconds since `ref_epoch`, which must match the epoch of
/// the orbit the grid is used with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarGrid {
    pub ref_epoch: DateTime<Utc>,
    /// Azimuth time of the first line (s since `ref_epoch`)
    pub sensing_start: f64,
    /// Radar wavelength (m)
    pub wavelength: f64,
    /// Pulse repetition frequency (Hz); the line spacing is `1 / prf`
    pub prf: f64,
    /// Slant range of the first sample (m)
    pub starting_range: f64,
    /// Slant range sample spacing (m)
    pub range_pixel_spacing: f64,
    pub look_side: LookSide,
    /// Number of azimuth lines
    pub length: usize,
    /// Number of range samples
    pub width: usize,
}

impl RadarGrid {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.prf > 0.0 && self.prf.is_finite()) {
            return Err(SarError::InvalidParameter(format!(
                "radar grid PRF must be positive, got {}",
                self.prf
            )));
        }
        if !(self.range_pixel_spacing > 0.0) {
            return Err(SarError::InvalidParameter(format!(
                "radar grid range spacing must be positive, got {}",
                self.range_pixel_spacing
            )));
        }
        if !(self.wavelength > 0.0) {
            return Err(SarError::InvalidParameter(format!(
                "radar wavelength must be positive, got {}",
                self.wavelength
            )));
        }
        if !(self.starting_range > 0.0) {
            return Err(SarError::InvalidParameter(format!(
                "radar grid starting range must be positive, got {}",
                self.starting_range
            )));
        }
        if self.length == 0 || self.width == 0 {
            return Err(SarError::InvalidParameter(format!(
                "radar grid must be non-empty, got {}x{}",
                self.length, self.width
            )));
        }
        Ok(())
    }

    pub fn sensing_time(&self, line: f64) -> f64 {
        self.sensing_start + line / self.prf
    }

    pub fn sensing_mid(&self) -> f64 {
        self.sensing_time((self.length as f64 - 1.0) / 2.0)
    }

    pub fn sensing_stop(&self) -> f64 {
        self.sensing_time(self.length as f64 - 1.0)
    }

    pub fn slant_range(&self, sample: f64) -> f64 {
        self.starting_range + sample * self.range_pixel_spacing
    }

    pub fn mid_range(&self) -> f64 {
        self.slant_range((self.width as f64 - 1.0) / 2.0)
    }

    pub fn end_range(&self) -> f64 {
        self.slant_range(self.width as f64 - 1.0)
    }

    /// Fractional line index of an azimuth time
    pub fn line_of(&self, az_time: f64) -> f64 {
        (az_time - self.sensing_start) * self.prf
    }

    /// Fractional sample index of a slant range
    pub fn sample_of(&self, slant_range: f64) -> f64 {
        (slant_range - self.starting_range) / self.range_pixel_spacing
    }

    /// Sub-grid starting at (`line_offset`, `sample_offset`)
    pub fn offset_and_resize(
        &self,
        line_offset: usize,
        sample_offset: usize,
        length: usize,
        width: usize,
    ) -> RadarGrid {
        RadarGrid {
            sensing_start: self.sensing_time(line_offset as f64),
            starting_range: self.slant_range(sample_offset as f64),
            length,
            width,
            ..self.clone()
        }
    }

    /// Grid logically shifted in time and range, modelling timing corrections
    pub fn shifted(&self, az_time_shift: f64, range_shift: f64) -> RadarGrid {
        RadarGrid {
            sensing_start: self.sensing_start + az_time_shift,
            starting_range: self.starting_range + range_shift,
            ..self.clone()
        }
    }
}

/// Output geographic grid
///
/// `start_x`/`start_y` locate the outer corner of the first cell, so cell
/// centres sit half a spacing inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoGrid {
    pub start_x: f64,
    pub start_y: f64,
    pub spacing_x: f64,
    pub spacing_y: f64,
    pub width: usize,
    pub length: usize,
    pub epsg: u32,
}

impl GeoGrid {
    pub fn new(
        start_x: f64,
        start_y: f64,
        spacing_x: f64,
        spacing_y: f64,
        width: usize,
        length: usize,
        epsg: u32,
    ) -> Self {
        Self {
            start_x,
            start_y,
            spacing_x,
            spacing_y,
            width,
            length,
            epsg,
        }
    }

    pub fn validate(&self) -> SarResult<()> {
        if self.spacing_x == 0.0 || !self.spacing_x.is_finite() {
            return Err(SarError::InvalidParameter(format!(
                "geogrid X spacing must be non-zero, got {}",
                self.spacing_x
            )));
        }
        if self.spacing_y == 0.0 || !self.spacing_y.is_finite() {
            return Err(SarError::InvalidParameter(format!(
                "geogrid Y spacing must be non-zero, got {}",
                self.spacing_y
            )));
        }
        if self.width == 0 || self.length == 0 {
            return Err(SarError::InvalidParameter(format!(
                "geogrid must have positive width and length, got {}x{}",
                self.width, self.length
            )));
        }
        if !(self.start_x.is_finite() && self.start_y.is_finite()) {
            return Err(SarError::InvalidParameter(
                "geogrid start coordinates must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn center_x(&self, col: usize) -> f64 {
        self.start_x + (col as f64 + 0.5) * self.spacing_x
    }

    pub fn center_y(&self, row: usize) -> f64 {
        self.start_y + (row as f64 + 0.5) * self.spacing_y
    }

    pub fn end_x(&self) -> f64 {
        self.start_x + self.width as f64 * self.spacing_x
    }

    pub fn end_y(&self) -> f64 {
        self.start_y + self.length as f64 * self.spacing_y
    }

    /// Area of one cell in projection units squared
    pub fn cell_area(&self) -> f64 {
        (self.spacing_x * self.spacing_y).abs()
    }

    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform::new(self.start_x, self.spacing_x, self.start_y, self.spacing_y)
    }

    /// Sub-grid covering rows `[row, row + length)` and columns `[col, col + width)`
    pub fn sub_grid(&self, row: usize, col: usize, length: usize, width: usize) -> GeoGrid {
        GeoGrid {
            start_x: self.start_x + col as f64 * self.spacing_x,
            start_y: self.start_y + row as f64 * self.spacing_y,
            width,
            length,
            ..*self
        }
    }
}

/// Error types for SAR geocoding
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration parsing error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Orbit interpolation requires at least {required} state vectors, got {available}")]
    OrbitInterpSizeError { available: usize, required: usize },

    #[error("Orbit interpolation time {time:.6} s is outside orbit coverage [{start:.6}, {end:.6}] s")]
    OrbitInterpDomainError { time: f64, start: f64, end: f64 },

    #[error("Unknown orbit interpolation method: {0}")]
    OrbitInterpUnknownMethod(String),

    #[error("Failed to converge after {iterations} iterations (last residual {residual:e})")]
    FailedToConverge { iterations: usize, residual: f64 },

    #[error("Target lies on the wrong side of the sensor for {expected}-looking geometry")]
    WrongLookSide { expected: LookSide },

    #[error("Out of bounds lookup: {what} = {value}")]
    OutOfBoundsLookup { what: &'static str, value: f64 },
}

impl SarError {
    /// Geometric failures that only invalidate the pixel being processed
    pub fn is_per_pixel(&self) -> bool {
        matches!(
            self,
            SarError::FailedToConverge { .. }
                | SarError::WrongLookSide { .. }
                | SarError::OutOfBoundsLookup { .. }
                | SarError::OrbitInterpDomainError { .. }
        )
    }
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;
