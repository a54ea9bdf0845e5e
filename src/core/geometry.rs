//! Range-Doppler coordinate transforms between radar and ground geometry
//!
//! `geo2rdr` solves for the azimuth time and slant range at which a ground
//! point satisfies the Doppler equation; `rdr2geo` intersects the
//! range-Doppler circle of a radar sample with the DEM surface.

use crate::core::ellipsoid::Ellipsoid;
use crate::io::dem::DemProvider;
use crate::io::doppler::Lut2d;
use crate::io::orbit::Orbit;
use crate::types::{LookSide, RadarGrid, SarError, SarResult, Vector3};
use serde::{Deserialize, Serialize};

/// Damping applied to rdr2geo updates after the base iteration budget
const EXTRA_ITERATION_DAMPING: f64 = 0.5;

/// Convergence settings for geo2rdr
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Geo2RdrParams {
    /// Azimuth time update below which the solution is accepted (s)
    pub threshold: f64,
    pub max_iterations: usize,
}

impl Default for Geo2RdrParams {
    fn default() -> Self {
        Self {
            threshold: 1e-8,
            max_iterations: 50,
        }
    }
}

/// Convergence settings for rdr2geo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rdr2GeoParams {
    /// Height residual below which the solution is accepted (m)
    pub threshold: f64,
    pub max_iterations: usize,
    /// Damped iterations run after `max_iterations` is exhausted
    pub extra_iterations: usize,
}

impl Default for Rdr2GeoParams {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            max_iterations: 25,
            extra_iterations: 10,
        }
    }
}

fn orbit_state(orbit: &Orbit, t: f64) -> SarResult<(Vector3, Vector3)> {
    orbit.interpolate(t).map_err(|e| match e {
        SarError::OrbitInterpDomainError { time, .. } => SarError::OutOfBoundsLookup {
            what: "azimuth time",
            value: time,
        },
        other => other,
    })
}

/// +1 when `target` lies left of the platform track, -1 when right
fn side_of_track(target: &Vector3, position: &Vector3, velocity: &Vector3) -> f64 {
    let left = position.normalized().cross(velocity);
    if (*target - *position).dot(&left) >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Ground (lon, lat, height; radians and metres) to radar (azimuth time, slant range)
///
/// `initial_az_time` seeds the Newton iteration; every intermediate estimate
/// must stay within orbit coverage.
#[allow(clippy::too_many_arguments)]
pub fn geo2rdr(
    llh: [f64; 3],
    ellipsoid: &Ellipsoid,
    orbit: &Orbit,
    doppler: &Lut2d,
    wavelength: f64,
    look_side: LookSide,
    initial_az_time: f64,
    params: &Geo2RdrParams,
) -> SarResult<(f64, f64)> {
    let target = ellipsoid.lon_lat_to_xyz(llh);
    let half_wavelength = 0.5 * wavelength;
    let mut t = initial_az_time;
    let mut residual = f64::NAN;

    for _ in 0..params.max_iterations {
        let (position, velocity) = orbit_state(orbit, t)?;
        let dr = target - position;
        let r = dr.norm();

        let fdop = half_wavelength * doppler.eval(t, r)?;
        let dfdop = half_wavelength * doppler.eval_dx(t, r)?;

        let f = dr.dot(&velocity) - fdop * r;
        let fprime = -velocity.dot(&velocity) + (fdop / r + dfdop) * velocity.dot(&dr);
        if fprime == 0.0 || !fprime.is_finite() {
            break;
        }

        let dt = f / fprime;
        residual = dt;
        t -= dt;

        if dt.abs() < params.threshold {
            let (position, velocity) = orbit_state(orbit, t)?;
            if side_of_track(&target, &position, &velocity) != look_side.sign() {
                return Err(SarError::WrongLookSide { expected: look_side });
            }
            return Ok((t, (target - position).norm()));
        }
    }

    Err(SarError::FailedToConverge {
        iterations: params.max_iterations,
        residual: residual.abs(),
    })
}

/// Radar (azimuth time, slant range) to ground (lon, lat, height)
///
/// The solution is parametrised on the circle of points at `slant_range`
/// that satisfy the Doppler equation; only the look angle on that circle is
/// iterated, so range and Doppler hold exactly at every step.
#[allow(clippy::too_many_arguments)]
pub fn rdr2geo(
    az_time: f64,
    slant_range: f64,
    ellipsoid: &Ellipsoid,
    orbit: &Orbit,
    doppler: &Lut2d,
    wavelength: f64,
    look_side: LookSide,
    dem: &dyn DemProvider,
    params: &Rdr2GeoParams,
) -> SarResult<[f64; 3]> {
    let (position, velocity) = orbit_state(orbit, az_time)?;
    let speed = velocity.norm();
    let vhat = velocity * (1.0 / speed);

    let doppler_term = 0.5 * wavelength * doppler.eval(az_time, slant_range)? * slant_range;
    let along_track = doppler_term / speed;
    let rho2 = slant_range * slant_range - along_track * along_track;
    if !(rho2 > 0.0) {
        return Err(SarError::FailedToConverge { iterations: 0, residual: rho2 });
    }
    let rho = rho2.sqrt();
    let center = position + vhat * along_track;

    let down = -position.normalized();
    let down_along = down.dot(&vhat);
    let e1_raw = down - vhat * down_along;
    let k = e1_raw.norm();
    if k < 1e-9 {
        return Err(SarError::FailedToConverge { iterations: 0, residual: k });
    }
    let e1 = e1_raw * (1.0 / k);
    let e2 = vhat.cross(&e1).normalized() * look_side.sign();

    // Law of cosines against a sphere at the sub-satellite radius plus reference height
    let sat_llh = ellipsoid.xyz_to_lon_lat(&position);
    let a = position.norm();
    let b = ellipsoid.surface_radius(sat_llh[1]) + dem.ref_height();
    let cos_psi = (a * a + slant_range * slant_range - b * b) / (2.0 * a * slant_range);
    if cos_psi > 1.0 {
        return Err(SarError::FailedToConverge { iterations: 0, residual: cos_psi - 1.0 });
    }
    let cos_theta = (slant_range * cos_psi - along_track * down_along) / (rho * k);
    let mut theta = cos_theta.clamp(-1.0, 1.0).acos().max(1e-6);

    let point = |theta: f64| center + (e1 * theta.cos() + e2 * theta.sin()) * rho;
    let min_slope = 1e-6 * rho;

    let total = params.max_iterations + params.extra_iterations;
    let mut residual = f64::NAN;
    for iter in 0..total {
        let xyz = point(theta);
        let llh = ellipsoid.xyz_to_lon_lat(&xyz);
        let dem_height = dem.elevation(llh[0], llh[1]);
        residual = llh[2] - dem_height;
        if residual.abs() < params.threshold {
            return Ok(llh);
        }

        let tangent = (e2 * theta.cos() - e1 * theta.sin()) * rho;
        let mut slope = ellipsoid.normal(llh[0], llh[1]).dot(&tangent);
        if slope.abs() < min_slope {
            slope = if slope > 0.0 { min_slope } else { -min_slope };
        }

        let damping = if iter < params.max_iterations {
            1.0
        } else {
            EXTRA_ITERATION_DAMPING
        };
        theta = (theta - damping * residual / slope).clamp(1e-6, std::f64::consts::PI - 1e-6);
    }

    Err(SarError::FailedToConverge {
        iterations: total,
        residual: residual.abs(),
    })
}

/// Coordinate mapper bound to one acquisition geometry
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper<'a> {
    pub ellipsoid: Ellipsoid,
    pub orbit: &'a Orbit,
    pub doppler: &'a Lut2d,
    pub wavelength: f64,
    pub look_side: LookSide,
    pub geo2rdr_params: Geo2RdrParams,
    pub rdr2geo_params: Rdr2GeoParams,
}

impl<'a> CoordinateMapper<'a> {
    pub fn new(
        radar_grid: &RadarGrid,
        orbit: &'a Orbit,
        doppler: &'a Lut2d,
        ellipsoid: Ellipsoid,
    ) -> Self {
        Self {
            ellipsoid,
            orbit,
            doppler,
            wavelength: radar_grid.wavelength,
            look_side: radar_grid.look_side,
            geo2rdr_params: Geo2RdrParams::default(),
            rdr2geo_params: Rdr2GeoParams::default(),
        }
    }

    pub fn with_params(mut self, geo2rdr: Geo2RdrParams, rdr2geo: Rdr2GeoParams) -> Self {
        self.geo2rdr_params = geo2rdr;
        self.rdr2geo_params = rdr2geo;
        self
    }

    pub fn geo2rdr(&self, llh: [f64; 3], initial_az_time: f64) -> SarResult<(f64, f64)> {
        geo2rdr(
            llh,
            &self.ellipsoid,
            self.orbit,
            self.doppler,
            self.wavelength,
            self.look_side,
            initial_az_time,
            &self.geo2rdr_params,
        )
    }

    pub fn rdr2geo(&self, az_time: f64, slant_range: f64, dem: &dyn DemProvider) -> SarResult<[f64; 3]> {
        rdr2geo(
            az_time,
            slant_range,
            &self.ellipsoid,
            self.orbit,
            self.doppler,
            self.wavelength,
            self.look_side,
            dem,
            &self.rdr2geo_params,
        )
    }

    /// Platform position and velocity at `az_time`
    pub fn platform_state(&self, az_time: f64) -> SarResult<(Vector3, Vector3)> {
        orbit_state(self.orbit, az_time)
    }
}
