//! Reference ellipsoid and geodetic / ECEF conversions

use crate::types::Vector3;
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = 0.006_694_379_990_14;

/// Oblate reference ellipsoid. Angles are in radians throughout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub a: f64,
    pub e2: f64,
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl Ellipsoid {
    pub const fn new(a: f64, e2: f64) -> Self {
        Self { a, e2 }
    }

    pub const fn wgs84() -> Self {
        Self::new(WGS84_A, WGS84_E2)
    }

    pub fn b(&self) -> f64 {
        self.a * (1.0 - self.e2).sqrt()
    }

    /// Prime vertical radius of curvature
    pub fn r_east(&self, lat: f64) -> f64 {
        self.a / (1.0 - self.e2 * lat.sin().powi(2)).sqrt()
    }

    /// Meridional radius of curvature
    pub fn r_north(&self, lat: f64) -> f64 {
        self.a * (1.0 - self.e2) / (1.0 - self.e2 * lat.sin().powi(2)).powf(1.5)
    }

    /// Geocentric distance from the centre to the ellipsoid surface at `lat`
    pub fn surface_radius(&self, lat: f64) -> f64 {
        let n = self.r_east(lat);
        let (s, c) = lat.sin_cos();
        let xy = n * c;
        let z = n * (1.0 - self.e2) * s;
        (xy * xy + z * z).sqrt()
    }

    /// (lon, lat, height) to ECEF
    pub fn lon_lat_to_xyz(&self, llh: [f64; 3]) -> Vector3 {
        let [lon, lat, h] = llh;
        let n = self.r_east(lat);
        let (slat, clat) = lat.sin_cos();
        let (slon, clon) = lon.sin_cos();
        Vector3::new(
            (n + h) * clat * clon,
            (n + h) * clat * slon,
            (n * (1.0 - self.e2) + h) * slat,
        )
    }

    /// ECEF to (lon, lat, height)
    pub fn xyz_to_lon_lat(&self, xyz: &Vector3) -> [f64; 3] {
        let p = (xyz.x * xyz.x + xyz.y * xyz.y).sqrt();
        let lon = xyz.y.atan2(xyz.x);

        if p < 1e-9 {
            let lat = std::f64::consts::FRAC_PI_2.copysign(xyz.z);
            return [lon, lat, xyz.z.abs() - self.b()];
        }

        let mut lat = xyz.z.atan2(p * (1.0 - self.e2));
        let mut h = 0.0;
        for _ in 0..8 {
            let n = self.r_east(lat);
            let (slat, clat) = lat.sin_cos();
            h = p * clat + xyz.z * slat - self.a * (1.0 - self.e2 * slat * slat).sqrt();
            let next = xyz.z.atan2(p * (1.0 - self.e2 * n / (n + h)));
            let done = (next - lat).abs() < 1e-14;
            lat = next;
            if done {
                break;
            }
        }
        [lon, lat, h]
    }

    /// Outward geodetic surface normal at (lon, lat)
    pub fn normal(&self, lon: f64, lat: f64) -> Vector3 {
        let (slat, clat) = lat.sin_cos();
        let (slon, clon) = lon.sin_cos();
        Vector3::new(clat * clon, clat * slon, slat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geodetic_round_trip() {
        let ellps = Ellipsoid::wgs84();
        for &(lon, lat, h) in &[
            (-115.6_f64, 34.8_f64, 120.0),
            (179.9, -65.0, 2500.0),
            (0.0, 0.0, -30.0),
            (45.0, 89.5, 10.0),
        ] {
            let llh = [lon.to_radians(), lat.to_radians(), h];
            let xyz = ellps.lon_lat_to_xyz(llh);
            let back = ellps.xyz_to_lon_lat(&xyz);
            assert!((back[0] - llh[0]).abs() < 1e-12);
            assert!((back[1] - llh[1]).abs() < 1e-12);
            assert!((back[2] - h).abs() < 1e-6);
        }
    }

    #[test]
    fn test_equator_and_pole() {
        let ellps = Ellipsoid::wgs84();
        let eq = ellps.lon_lat_to_xyz([0.0, 0.0, 0.0]);
        assert!((eq.x - WGS84_A).abs() < 1e-6);
        assert!((ellps.surface_radius(std::f64::consts::FRAC_PI_2) - ellps.b()).abs() < 1e-6);

        let pole = ellps.xyz_to_lon_lat(&Vector3::new(0.0, 0.0, ellps.b() + 5.0));
        assert!((pole[2] - 5.0).abs() < 1e-9);
    }
}
