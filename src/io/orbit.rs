use crate::types::{OrbitData, SarError, SarResult, StateVector, Vector3};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of state vectors used by Legendre interpolation
const LEGENDRE_ORDER: usize = 9;

/// Orbit interpolation methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrbitInterpMethod {
    /// Cubic Hermite between the two bracketing state vectors (positions and velocities)
    Hermite,
    /// 9-point Lagrange polynomial
    Legendre,
}

impl Default for OrbitInterpMethod {
    fn default() -> Self {
        OrbitInterpMethod::Hermite
    }
}

impl OrbitInterpMethod {
    pub fn min_state_vectors(self) -> usize {
        match self {
            OrbitInterpMethod::Hermite => 2,
            OrbitInterpMethod::Legendre => LEGENDRE_ORDER,
        }
    }
}

impl std::fmt::Display for OrbitInterpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrbitInterpMethod::Hermite => write!(f, "HERMITE"),
            OrbitInterpMethod::Legendre => write!(f, "LEGENDRE"),
        }
    }
}

impl std::str::FromStr for OrbitInterpMethod {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HERMITE" => Ok(OrbitInterpMethod::Hermite),
            "LEGENDRE" => Ok(OrbitInterpMethod::Legendre),
            _ => Err(SarError::OrbitInterpUnknownMethod(s.to_string())),
        }
    }
}

/// Seconds elapsed from `epoch` to `time`
pub fn seconds_since(epoch: DateTime<Utc>, time: DateTime<Utc>) -> f64 {
    let delta = time - epoch;
    delta
        .num_microseconds()
        .map(|us| us as f64 * 1e-6)
        .unwrap_or_else(|| delta.num_milliseconds() as f64 * 1e-3)
}

/// Interpolating orbit accessor
///
/// State vector times are stored as seconds since `reference_epoch`; all
/// queries use the same time base as `RadarGrid::sensing_start`.
#[derive(Debug, Clone)]
pub struct Orbit {
    reference_epoch: DateTime<Utc>,
    times: Vec<f64>,
    positions: Vec<Vector3>,
    velocities: Vec<Vector3>,
    method: OrbitInterpMethod,
}

impl Orbit {
    /// Build an orbit from state vectors with absolute UTC times
    pub fn from_state_vectors(
        state_vectors: &[StateVector],
        reference_epoch: DateTime<Utc>,
        method: OrbitInterpMethod,
    ) -> SarResult<Self> {
        let required = method.min_state_vectors();
        if state_vectors.len() < required {
            return Err(SarError::OrbitInterpSizeError {
                available: state_vectors.len(),
                required,
            });
        }

        let times: Vec<f64> = state_vectors
            .iter()
            .map(|sv| seconds_since(reference_epoch, sv.time))
            .collect();
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SarError::InvalidParameter(
                "orbit state vectors must be strictly increasing in time".to_string(),
            ));
        }

        Self::validate_orbit_data(state_vectors);

        Ok(Self {
            reference_epoch,
            times,
            positions: state_vectors.iter().map(|sv| Vector3::from_array(sv.position)).collect(),
            velocities: state_vectors.iter().map(|sv| Vector3::from_array(sv.velocity)).collect(),
            method,
        })
    }

    /// Build an orbit from parsed orbit data, keeping its reference time
    pub fn from_orbit_data(orbit: &OrbitData, method: OrbitInterpMethod) -> SarResult<Self> {
        Self::from_state_vectors(&orbit.state_vectors, orbit.reference_time, method)
    }

    pub fn reference_epoch(&self) -> DateTime<Utc> {
        self.reference_epoch
    }

    pub fn method(&self) -> OrbitInterpMethod {
        self.method
    }

    pub fn size(&self) -> usize {
        self.times.len()
    }

    /// First state vector time (s since reference epoch)
    pub fn start_time(&self) -> f64 {
        self.times[0]
    }

    /// Last state vector time (s since reference epoch)
    pub fn end_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn mid_time(&self) -> f64 {
        0.5 * (self.start_time() + self.end_time())
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_time() && t <= self.end_time()
    }

    /// Interpolated (position, velocity) at `t` seconds since the reference epoch
    pub fn interpolate(&self, t: f64) -> SarResult<(Vector3, Vector3)> {
        if !self.contains(t) {
            return Err(SarError::OrbitInterpDomainError {
                time: t,
                start: self.start_time(),
                end: self.end_time(),
            });
        }
        Ok(match self.method {
            OrbitInterpMethod::Hermite => self.hermite_interpolate(t),
            OrbitInterpMethod::Legendre => self.lagrange_interpolate(t),
        })
    }

    pub fn position(&self, t: f64) -> SarResult<Vector3> {
        Ok(self.interpolate(t)?.0)
    }

    pub fn velocity(&self, t: f64) -> SarResult<Vector3> {
        Ok(self.interpolate(t)?.1)
    }

    /// Index `i` such that `times[i] <= t <= times[i + 1]`
    fn binary_search_bracket(&self, t: f64) -> usize {
        let n = self.times.len();
        let mut left = 0;
        let mut right = n - 1;
        while right - left > 1 {
            let mid = left + (right - left) / 2;
            if self.times[mid] <= t {
                left = mid;
            } else {
                right = mid;
            }
        }
        left
    }

    fn hermite_interpolate(&self, t: f64) -> (Vector3, Vector3) {
        let i = self.binary_search_bracket(t);
        let h = self.times[i + 1] - self.times[i];
        let s = (t - self.times[i]) / h;
        let (s2, s3) = (s * s, s * s * s);

        let (p0, p1) = (self.positions[i], self.positions[i + 1]);
        let (v0, v1) = (self.velocities[i] * h, self.velocities[i + 1] * h);

        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        let position = p0 * h00 + v0 * h10 + p1 * h01 + v1 * h11;

        let d00 = 6.0 * s2 - 6.0 * s;
        let d10 = 3.0 * s2 - 4.0 * s + 1.0;
        let d01 = -6.0 * s2 + 6.0 * s;
        let d11 = 3.0 * s2 - 2.0 * s;
        let velocity = (p0 * d00 + v0 * d10 + p1 * d01 + v1 * d11) * (1.0 / h);

        (position, velocity)
    }

    fn lagrange_interpolate(&self, t: f64) -> (Vector3, Vector3) {
        let n = self.times.len();
        let i = self.binary_search_bracket(t);
        let start = i
            .saturating_sub(LEGENDRE_ORDER / 2 - 1)
            .min(n - LEGENDRE_ORDER);
        let nodes = start..start + LEGENDRE_ORDER;

        let mut position = Vector3::default();
        let mut velocity = Vector3::default();
        for k in nodes.clone() {
            let mut weight = 1.0;
            for j in nodes.clone() {
                if j != k {
                    weight *= (t - self.times[j]) / (self.times[k] - self.times[j]);
                }
            }
            position = position + self.positions[k] * weight;
            velocity = velocity + self.velocities[k] * weight;
        }
        (position, velocity)
    }

    /// Log warnings for implausible low-Earth-orbit state vectors
    fn validate_orbit_data(state_vectors: &[StateVector]) {
        for sv in state_vectors {
            let speed = Vector3::from_array(sv.velocity).norm();
            if !(3000.0..=9000.0).contains(&speed) {
                log::warn!(
                    "Unusual orbital velocity: {:.1} m/s at {}",
                    speed,
                    sv.time.format("%Y-%m-%d %H:%M:%S")
                );
            }
            let radius = Vector3::from_array(sv.position).norm();
            if !(6_500_000.0..=8_500_000.0).contains(&radius) {
                log::warn!(
                    "Unusual orbital radius: {:.1} km at {}",
                    radius / 1000.0,
                    sv.time.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        log::debug!("Orbit data validation completed ({} state vectors)", state_vectors.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2020-01-03T17:08:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Circular equatorial orbit, 7000 km radius
    fn circular_state_vectors(count: usize, step: f64) -> Vec<StateVector> {
        let r = 7_000_000.0_f64;
        let omega = (3.986_004_418e14 / r.powi(3)).sqrt();
        (0..count)
            .map(|k| {
                let t = k as f64 * step;
                let (s, c) = (omega * t).sin_cos();
                StateVector {
                    time: epoch() + Duration::milliseconds((t * 1000.0) as i64),
                    position: [r * c, r * s, 0.0],
                    velocity: [-r * omega * s, r * omega * c, 0.0],
                }
            })
            .collect()
    }

    fn analytic(t: f64) -> (Vector3, Vector3) {
        let r = 7_000_000.0_f64;
        let omega = (3.986_004_418e14 / r.powi(3)).sqrt();
        let (s, c) = (omega * t).sin_cos();
        (
            Vector3::new(r * c, r * s, 0.0),
            Vector3::new(-r * omega * s, r * omega * c, 0.0),
        )
    }

    #[test]
    fn test_hermite_matches_circular_orbit() {
        let orbit = Orbit::from_state_vectors(
            &circular_state_vectors(20, 10.0),
            epoch(),
            OrbitInterpMethod::Hermite,
        )
        .unwrap();
        for &t in &[0.0, 3.3, 57.25, 190.0] {
            let (p, v) = orbit.interpolate(t).unwrap();
            let (pe, ve) = analytic(t);
            assert!((p - pe).norm() < 1e-3, "position error {}", (p - pe).norm());
            assert!((v - ve).norm() < 1e-3, "velocity error {}", (v - ve).norm());
        }
    }

    #[test]
    fn test_legendre_matches_circular_orbit() {
        let orbit = Orbit::from_state_vectors(
            &circular_state_vectors(20, 10.0),
            epoch(),
            OrbitInterpMethod::Legendre,
        )
        .unwrap();
        for &t in &[0.5, 95.0, 188.8] {
            let (p, v) = orbit.interpolate(t).unwrap();
            let (pe, ve) = analytic(t);
            assert!((p - pe).norm() < 1e-3);
            assert!((v - ve).norm() < 1e-4);
        }
    }

    #[test]
    fn test_orbit_errors() {
        let svs = circular_state_vectors(5, 10.0);
        assert!(matches!(
            Orbit::from_state_vectors(&svs[..1], epoch(), OrbitInterpMethod::Hermite),
            Err(SarError::OrbitInterpSizeError { available: 1, required: 2 })
        ));
        assert!(matches!(
            Orbit::from_state_vectors(&svs, epoch(), OrbitInterpMethod::Legendre),
            Err(SarError::OrbitInterpSizeError { available: 5, required: 9 })
        ));

        let orbit = Orbit::from_state_vectors(&svs, epoch(), OrbitInterpMethod::Hermite).unwrap();
        assert!(matches!(
            orbit.interpolate(40.5),
            Err(SarError::OrbitInterpDomainError { .. })
        ));
        assert!(matches!(
            "spline".parse::<OrbitInterpMethod>(),
            Err(SarError::OrbitInterpUnknownMethod(_))
        ));
        assert_eq!("legendre".parse::<OrbitInterpMethod>().unwrap(), OrbitInterpMethod::Legendre);
    }
}
