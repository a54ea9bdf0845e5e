//! Synthetic acquisition shared by the integration tests
//!
//! A circular orbit heading north about 4 degrees east of the scene, a
//! left-looking radar grid sized to cover the scene geogrid, a flat (zero)
//! DEM, and radar rasters whose values are the longitude and latitude of
//! each radar pixel.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use ndarray::Array2;
use sargeo::core::{CoordinateMapper, Ellipsoid, Rdr2GeoParams};
use sargeo::io::ConstantDem;
use sargeo::{
    GeoGrid, GeoTransform, LookSide, Lut2d, MemoryRaster, Orbit, OrbitInterpMethod, RadarGrid,
    SarComplex, StateVector, Vector3,
};
use std::sync::OnceLock;

pub const GM: f64 = 3.986_004_418e14;
pub const ORBIT_RADIUS: f64 = 7_000_000.0;
pub const WAVELENGTH: f64 = 0.24;
pub const PRI: f64 = 0.0029;
pub const RANGE_SPACING: f64 = 30.0;
/// Radar pixels added around the footprint of the scene geogrid
pub const RADAR_MARGIN: usize = 20;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2020-01-03T17:08:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Northbound circular orbit over (34.8N, 111.55W) at t = 100 s
pub fn orbit() -> Orbit {
    orbit_for(LookSide::Left, false)
}

/// Circular orbit 4 degrees east or west of the scene, placed on the side
/// opposite to where a `look_side` antenna points, heading south when
/// `descending`
pub fn orbit_for(look_side: LookSide, descending: bool) -> Orbit {
    let looks_west = (look_side == LookSide::Left) != descending;
    let offset = if looks_west { 4.0 } else { -4.0 };
    let lat0 = 34.8_f64.to_radians();
    let lon0 = (-115.55_f64 + offset).to_radians();
    let omega = (GM / ORBIT_RADIUS.powi(3)).sqrt();

    let e1 = Vector3::new(lat0.cos() * lon0.cos(), lat0.cos() * lon0.sin(), lat0.sin());
    let north = Vector3::new(-lat0.sin() * lon0.cos(), -lat0.sin() * lon0.sin(), lat0.cos());
    let e2 = if descending { -north } else { north };

    let svs: Vec<StateVector> = (0..=20)
        .map(|k| {
            let t = 10.0 * k as f64;
            let (s, c) = (omega * (t - 100.0)).sin_cos();
            let position = (e1 * c + e2 * s) * ORBIT_RADIUS;
            let velocity = (e2 * c - e1 * s) * (ORBIT_RADIUS * omega);
            StateVector {
                time: epoch() + Duration::seconds(10 * k as i64),
                position: position.to_array(),
                velocity: velocity.to_array(),
            }
        })
        .collect();
    Orbit::from_state_vectors(&svs, epoch(), OrbitInterpMethod::Hermite).unwrap()
}

/// 500 x 500 cells of 0.0002 x 0.00008 degrees
pub fn scene_geogrid() -> GeoGrid {
    GeoGrid::new(-115.65, 34.84, 0.0002, -0.00008, 500, 500, 4326)
}

fn dem_transform() -> GeoTransform {
    GeoTransform::new(-115.8, 0.001, 34.95, -0.001)
}

/// Zero DEM comfortably larger than the scene
pub fn flat_dem() -> MemoryRaster<f32> {
    MemoryRaster::filled(400, 250, 1, 0.0_f32).with_geo_transform(dem_transform(), 4326)
}

/// DEM covering the same area as [`flat_dem`] with heights from `height(lon, lat)`
/// (degrees) sampled at pixel centres
pub fn dem_from_fn(height: impl Fn(f64, f64) -> f64) -> MemoryRaster<f32> {
    let gt = dem_transform();
    let dem = Array2::from_shape_fn((250, 400), |(r, c)| {
        let lon = gt.top_left_x + (c as f64 + 0.5) * gt.pixel_width;
        let lat = gt.top_left_y + (r as f64 + 0.5) * gt.pixel_height;
        height(lon, lat) as f32
    });
    MemoryRaster::from_array(dem).with_geo_transform(gt, 4326)
}

/// Metres per degree of longitude at the scene latitude
pub fn metres_per_degree_lon() -> f64 {
    let ellipsoid = Ellipsoid::wgs84();
    let lat = 34.8_f64.to_radians();
    ellipsoid.r_east(lat) * lat.cos() * 1_f64.to_radians()
}

/// Plane rising toward the west by `slope` (radians), zero at `lon0` (degrees)
pub fn tilted_dem(slope: f64, lon0: f64) -> MemoryRaster<f32> {
    let scale = metres_per_degree_lon();
    dem_from_fn(move |lon, _| -(lon - lon0) * scale * slope.tan())
}

/// Rolling hills of 40 m amplitude with a period of about 400 m
pub fn hilly_dem() -> MemoryRaster<f32> {
    let period = 0.004_f64;
    dem_from_fn(move |lon, lat| {
        let k = 2.0 * std::f64::consts::PI / period;
        40.0 * (k * lon).sin() * (k * lat).cos() + 25.0
    })
}

/// Orbit and radar grid covering `geogrid` for the given look side and pass direction
pub fn geometry(geogrid: &GeoGrid, look_side: LookSide, descending: bool) -> (Orbit, RadarGrid) {
    let orbit = orbit_for(look_side, descending);
    let radar_grid = radar_grid_over(geogrid, &orbit, &Lut2d::default(), look_side);
    (orbit, radar_grid)
}

fn radar_grid_over(geogrid: &GeoGrid, orbit: &Orbit, doppler: &Lut2d, look_side: LookSide) -> RadarGrid {
    let nominal = RadarGrid {
        ref_epoch: epoch(),
        sensing_start: 100.0,
        wavelength: WAVELENGTH,
        prf: 1.0 / PRI,
        starting_range: 700_000.0,
        range_pixel_spacing: RANGE_SPACING,
        look_side,
        length: 1,
        width: 1,
    };
    let mapper = CoordinateMapper::new(&nominal, orbit, doppler, Ellipsoid::wgs84());

    let (mut t0, mut t1, mut r0, mut r1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for fy in [0.0, 0.5, 1.0] {
        for fx in [0.0, 0.5, 1.0] {
            let x = geogrid.start_x + fx * (geogrid.end_x() - geogrid.start_x);
            let y = geogrid.start_y + fy * (geogrid.end_y() - geogrid.start_y);
            let (t, r) = mapper
                .geo2rdr([x.to_radians(), y.to_radians(), 0.0], 100.0)
                .unwrap();
            t0 = t0.min(t);
            t1 = t1.max(t);
            r0 = r0.min(r);
            r1 = r1.max(r);
        }
    }

    let margin = RADAR_MARGIN as f64;
    RadarGrid {
        sensing_start: t0 - margin * PRI,
        starting_range: r0 - margin * RANGE_SPACING,
        length: ((t1 - t0) / PRI).ceil() as usize + 2 * RADAR_MARGIN + 1,
        width: ((r1 - r0) / RANGE_SPACING).ceil() as usize + 2 * RADAR_MARGIN + 1,
        ..nominal
    }
}

pub struct Scene {
    pub orbit: Orbit,
    pub doppler: Lut2d,
    pub radar_grid: RadarGrid,
    pub geogrid: GeoGrid,
    pub dem: MemoryRaster<f32>,
    /// Longitude and latitude (degrees) of every radar pixel
    pub lon_lat: MemoryRaster<f64>,
}

impl Scene {
    fn build() -> Self {
        let orbit = orbit();
        let doppler = Lut2d::default();
        let geogrid = scene_geogrid();
        let radar_grid = radar_grid_over(&geogrid, &orbit, &doppler, LookSide::Left);

        let tight = Rdr2GeoParams {
            threshold: 1e-7,
            max_iterations: 50,
            extra_iterations: 10,
        };
        let mapper = CoordinateMapper::new(&radar_grid, &orbit, &doppler, Ellipsoid::wgs84())
            .with_params(Default::default(), tight);
        let flat = ConstantDem::new(0.0);

        let shape = (radar_grid.length, radar_grid.width);
        let mut lon = Array2::from_elem(shape, f64::NAN);
        let mut lat = Array2::from_elem(shape, f64::NAN);
        for ((i, j), v) in lon.indexed_iter_mut() {
            let t = radar_grid.sensing_time(i as f64);
            let r = radar_grid.slant_range(j as f64);
            if let Ok(llh) = mapper.rdr2geo(t, r, &flat) {
                *v = llh[0].to_degrees();
                lat[[i, j]] = llh[1].to_degrees();
            }
        }

        Self {
            lon_lat: MemoryRaster::new(vec![lon, lat]).unwrap(),
            orbit,
            doppler,
            radar_grid,
            geogrid,
            dem: flat_dem(),
        }
    }

    /// Unit phasors carrying the pixel longitude and latitude (radians) as phase
    pub fn slc(&self) -> MemoryRaster<SarComplex> {
        let bands = self
            .lon_lat
            .clone()
            .into_bands()
            .into_iter()
            .map(|b| {
                b.mapv(|deg| {
                    let (s, c) = deg.to_radians().sin_cos();
                    SarComplex::new(c as f32, s as f32)
                })
            })
            .collect();
        MemoryRaster::new(bands).unwrap()
    }

    /// 60 x 80 cell window inside the scene
    pub fn small_geogrid(&self) -> GeoGrid {
        self.geogrid.sub_grid(200, 150, 60, 80)
    }
}

/// Scene built once per test binary
pub fn scene() -> &'static Scene {
    static SCENE: OnceLock<Scene> = OnceLock::new();
    SCENE.get_or_init(Scene::build)
}
