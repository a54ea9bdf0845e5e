//! Map projections for output geogrids (EPSG:4326 and UTM zones)
//!
//! UTM uses the transverse Mercator series of Snyder, "Map Projections: A
//! Working Manual" (USGS Professional Paper 1395, eqs. 8-9 to 8-25), on WGS84.

use crate::core::ellipsoid::Ellipsoid;
use crate::types::{SarError, SarResult};

const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Projection of an output grid, identified by EPSG code
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Geographic longitude/latitude in degrees (EPSG:4326)
    LonLat,
    /// Universal Transverse Mercator on WGS84 (EPSG:326xx north, 327xx south)
    Utm { zone: u8, north: bool },
}

impl Projection {
    pub fn from_epsg(epsg: u32) -> SarResult<Self> {
        match epsg {
            4326 => Ok(Projection::LonLat),
            32601..=32660 => Ok(Projection::Utm {
                zone: (epsg - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Projection::Utm {
                zone: (epsg - 32700) as u8,
                north: false,
            }),
            _ => Err(SarError::InvalidParameter(format!(
                "Unsupported EPSG code: {}",
                epsg
            ))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match *self {
            Projection::LonLat => 4326,
            Projection::Utm { zone, north: true } => 32600 + zone as u32,
            Projection::Utm { zone, north: false } => 32700 + zone as u32,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Projection::LonLat)
    }

    /// Longitude/latitude (radians) to projected coordinates
    pub fn forward(&self, lon: f64, lat: f64) -> [f64; 2] {
        match *self {
            Projection::LonLat => [lon.to_degrees(), lat.to_degrees()],
            Projection::Utm { zone, north } => utm_forward(zone, north, lon, lat),
        }
    }

    /// Projected coordinates to longitude/latitude (radians)
    pub fn inverse(&self, x: f64, y: f64) -> [f64; 2] {
        match *self {
            Projection::LonLat => [x.to_radians(), y.to_radians()],
            Projection::Utm { zone, north } => utm_inverse(zone, north, x, y),
        }
    }
}

fn central_meridian(zone: u8) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

fn meridian_arc(ellps: &Ellipsoid, lat: f64) -> f64 {
    let e2 = ellps.e2;
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    ellps.a
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

fn utm_forward(zone: u8, north: bool, lon: f64, lat: f64) -> [f64; 2] {
    let ellps = Ellipsoid::wgs84();
    let ep2 = ellps.e2 / (1.0 - ellps.e2);

    let (slat, clat) = lat.sin_cos();
    let n = ellps.r_east(lat);
    let t = (slat / clat).powi(2);
    let c = ep2 * clat * clat;
    let a = (lon - central_meridian(zone)) * clat;
    let m = meridian_arc(&ellps, lat);

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;
    let mut y = UTM_K0
        * (m + n * slat / clat
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if !north {
        y += UTM_FALSE_NORTHING_SOUTH;
    }
    [x, y]
}

fn utm_inverse(zone: u8, north: bool, x: f64, y: f64) -> [f64; 2] {
    let ellps = Ellipsoid::wgs84();
    let e2 = ellps.e2;
    let ep2 = e2 / (1.0 - e2);
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    let northing = if north { y } else { y - UTM_FALSE_NORTHING_SOUTH };
    let m = northing / UTM_K0;
    let mu = m / (ellps.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let sq = (1.0 - e2).sqrt();
    let e1 = (1.0 - sq) / (1.0 + sq);

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (s1, c1) = phi1.sin_cos();
    let cc = ep2 * c1 * c1;
    let t1 = (s1 / c1).powi(2);
    let n1 = ellps.r_east(phi1);
    let r1 = ellps.r_north(phi1);
    let d = (x - UTM_FALSE_EASTING) / (n1 * UTM_K0);

    let lat = phi1
        - (n1 * s1 / c1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * cc - 4.0 * cc * cc - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * cc + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * cc * cc)
                    * d.powi(6)
                    / 720.0);
    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + cc) * d.powi(3) / 6.0
            + (5.0 - 2.0 * cc + 28.0 * t1 - 3.0 * cc * cc + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / c1;
    [lon, lat]
}
