mod common;

use common::{geometry, init_logging, metres_per_degree_lon, scene, tilted_dem, Scene};
use ndarray::Array2;
use sargeo::core::{BlockDescriptor, CoordinateMapper, Ellipsoid, FacetIntegrator, Rdr2GeoParams, RtcOptions};
use sargeo::io::ConstantDem;
use sargeo::{
    compute_rtc, GeoGrid, GeocodeConfig, GeocodeEngine, GeocodeOutputMode, GeocodeOutputs, InputRadiometry,
    LookSide, Lut2d, MemoryRaster, RtcAlgorithm, RtcAreaMode, SarComplex, SarComplex64, Vector3,
};

fn grid_raster<T: Clone>(grid: &GeoGrid, bands: usize, fill: T) -> MemoryRaster<T> {
    MemoryRaster::filled(grid.width, grid.length, bands, fill)
}

fn area_config() -> GeocodeConfig {
    GeocodeConfig {
        output_mode: GeocodeOutputMode::AreaProjection,
        ..Default::default()
    }
}

/// Cosine of the ellipsoid incidence angle at a cell centre
fn cos_incidence(s: &Scene, lon_deg: f64, lat_deg: f64) -> f64 {
    let ellipsoid = Ellipsoid::wgs84();
    let mapper = CoordinateMapper::new(&s.radar_grid, &s.orbit, &s.doppler, ellipsoid);
    let llh = [lon_deg.to_radians(), lat_deg.to_radians(), 0.0];
    let (t, _) = mapper.geo2rdr(llh, s.radar_grid.sensing_mid()).unwrap();
    let (sensor, _) = mapper.platform_state(t).unwrap();
    let target = ellipsoid.lon_lat_to_xyz(llh);
    ellipsoid.normal(llh[0], llh[1]).dot(&(sensor - target).normalized())
}

fn tight_rdr2geo() -> Rdr2GeoParams {
    Rdr2GeoParams {
        threshold: 1e-7,
        max_iterations: 50,
        extra_iterations: 10,
    }
}

#[test]
fn test_facets_tile_interior_cells() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let doppler = Lut2d::default();
    let dem = ConstantDem::new(0.0);

    for (look_side, descending) in [
        (LookSide::Left, false),
        (LookSide::Right, false),
        (LookSide::Left, true),
        (LookSide::Right, true),
    ] {
        let (orbit, radar_grid) = geometry(&grid, look_side, descending);
        let window = BlockDescriptor::full(radar_grid.length, radar_grid.width, 1);
        let mut weights: Vec<Array2<f64>> = Vec::new();

        for n_arenas in [1, 3] {
            let integrator = FacetIntegrator {
                mapper: CoordinateMapper::new(&radar_grid, &orbit, &doppler, Ellipsoid::wgs84()),
                radar_grid: &radar_grid,
                dem: &dem,
                input_radiometry: InputRadiometry::BetaNaught,
                algorithm: RtcAlgorithm::AreaProjection,
                upsampling: 1,
                radar_grid_nlooks: 1.0,
                apply_rtc: false,
                n_arenas,
            };
            let acc = integrator.integrate(&window, &grid, &[]).unwrap();

            for ((i, j), &w) in acc.weight.indexed_iter() {
                assert!(
                    (w - 1.0).abs() < 1e-6,
                    "{} descending={}: cell ({}, {}) weight {}",
                    look_side,
                    descending,
                    i,
                    j,
                    w
                );
                let looks = acc.nlooks[[i, j]];
                assert!(looks > 0.05 && looks < 0.5, "cell ({}, {}) looks {}", i, j, looks);
            }
            weights.push(acc.weight);
        }
        // Splitting lines over more arenas only reorders the sums
        for (a, b) in weights[0].iter().zip(weights[1].iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}

#[test]
fn test_area_projection_averages_coordinates() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let engine = GeocodeEngine::new(s.radar_grid.clone(), &s.orbit, &s.doppler, grid, area_config()).unwrap();

    let mut output = grid_raster(&grid, 2, f64::NAN);
    let mut nlooks = grid_raster(&grid, 1, f32::NAN);
    let mut aux = GeocodeOutputs {
        nlooks: Some(&mut nlooks),
        ..Default::default()
    };
    let summary = engine
        .geocode::<f64, f64>(&s.lon_lat, &mut output, &s.dem, &mut aux)
        .unwrap();
    assert_eq!(summary.n_valid, summary.n_cells);

    // Values are footprint-weighted means of whole radar pixels
    for ((i, j), &lon) in output.band(0).indexed_iter() {
        assert!((lon - grid.center_x(j)).abs() < 1e-3);
        assert!((output.band(1)[[i, j]] - grid.center_y(i)).abs() < 1e-3);
    }
    assert!(nlooks.band(0).iter().all(|n| n.is_finite() && *n > 0.0));
}

#[test]
fn test_default_exponent_gives_power() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let engine = GeocodeEngine::new(s.radar_grid.clone(), &s.orbit, &s.doppler, grid, area_config()).unwrap();
    assert_eq!(engine.output_band_count(2, true), 2);

    let slc = s.slc();
    let mut output = grid_raster(&grid, 2, f32::NAN);
    engine
        .geocode::<SarComplex, f32>(&slc, &mut output, &s.dem, &mut GeocodeOutputs::default())
        .unwrap();
    for band in 0..2 {
        assert!(output.band(band).iter().all(|&p| (p - 1.0).abs() < 1e-5));
    }
}

#[test]
fn test_full_covariance_cross_products() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let config = GeocodeConfig {
        exponent: 1,
        full_covariance: true,
        ..area_config()
    };
    let engine = GeocodeEngine::new(s.radar_grid.clone(), &s.orbit, &s.doppler, grid, config).unwrap();
    assert_eq!(engine.output_band_count(2, true), 3);
    assert_eq!(engine.output_band_count(3, true), 6);
    assert_eq!(engine.output_band_count(2, false), 2);

    let c = SarComplex64::new(0.6, 0.8);
    let phasors = s.slc().into_bands().remove(0).mapv(|v| SarComplex64::new(v.re as f64, v.im as f64));
    let constant = phasors.mapv(|_| c);
    let input = MemoryRaster::new(vec![phasors, constant]).unwrap();

    let nan = SarComplex64::new(f64::NAN, f64::NAN);
    let mut output = grid_raster(&grid, 3, nan);
    let summary = engine
        .geocode::<SarComplex64, SarComplex64>(&input, &mut output, &s.dem, &mut GeocodeOutputs::default())
        .unwrap();
    assert_eq!(summary.stats.len(), 3);

    for ((i, j), &x1) in output.band(0).indexed_iter() {
        let x2 = output.band(1)[[i, j]];
        let x12 = output.band(2)[[i, j]];
        assert!((x2 - c).norm() < 1e-9);
        assert!((x12 - x1 * c.conj()).norm() < 1e-9);
        assert!(x1.norm() > 0.999);
    }
}

#[test]
fn test_rtc_factor_on_flat_terrain() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();

    let run = |radiometry: InputRadiometry, area_mode: RtcAreaMode| {
        let config = GeocodeConfig {
            rtc: RtcOptions {
                input_radiometry: radiometry,
                area_mode,
                ..Default::default()
            },
            ..area_config()
        };
        compute_rtc(&s.radar_grid, &s.orbit, &s.doppler, &grid, &s.dem, &config).unwrap()
    };
    let sigma = run(InputRadiometry::SigmaNaughtEllipsoid, RtcAreaMode::AreaFactor);
    let beta = run(InputRadiometry::BetaNaught, RtcAreaMode::AreaFactor);
    let area = run(InputRadiometry::BetaNaught, RtcAreaMode::Area);

    let ellipsoid = Ellipsoid::wgs84();
    for ((i, j), &factor) in sigma.indexed_iter() {
        let (lon, lat) = (grid.center_x(j), grid.center_y(i));
        let cos_inc = cos_incidence(s, lon, lat);
        let sin_inc = (1.0 - cos_inc * cos_inc).sqrt();
        assert!((factor as f64 - cos_inc).abs() < 1e-3, "sigma factor {} vs {}", factor, cos_inc);
        assert!((beta[[i, j]] as f64 - cos_inc / sin_inc).abs() < 2e-3);

        let lat_rad = lat.to_radians();
        let cell_area = ellipsoid.r_east(lat_rad) * lat_rad.cos() * grid.spacing_x.abs().to_radians()
            * ellipsoid.r_north(lat_rad)
            * grid.spacing_y.abs().to_radians();
        let expected = cell_area * cos_inc;
        assert!((area[[i, j]] as f64 - expected).abs() < 1e-3 * expected);
    }
}

#[test]
fn test_apply_rtc_normalises_by_illuminated_area() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let config = GeocodeConfig {
        rtc: RtcOptions {
            input_radiometry: InputRadiometry::SigmaNaughtEllipsoid,
            apply_rtc: true,
            ..Default::default()
        },
        ..area_config()
    };
    let engine = GeocodeEngine::new(s.radar_grid.clone(), &s.orbit, &s.doppler, grid, config).unwrap();

    let input = MemoryRaster::filled(s.radar_grid.width, s.radar_grid.length, 1, 1.0_f32);
    let mut output = grid_raster(&grid, 1, f32::NAN);
    let mut rtc = grid_raster(&grid, 1, f32::NAN);
    let mut aux = GeocodeOutputs {
        rtc: Some(&mut rtc),
        ..Default::default()
    };
    engine
        .geocode::<f32, f32>(&input, &mut output, &s.dem, &mut aux)
        .unwrap();

    for (value, factor) in output.band(0).iter().zip(rtc.band(0).iter()) {
        assert!((value * factor - 1.0).abs() < 1e-4, "value {} factor {}", value, factor);
        assert!(*value > 1.0);
    }
}

#[test]
fn test_thresholds_invalidate_cells() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let input = MemoryRaster::filled(s.radar_grid.width, s.radar_grid.length, 1, 1.0_f32);

    let mut by_factor = area_config();
    by_factor.rtc.min_value_db = Some(10.0);
    let mut by_looks = area_config();
    by_looks.min_nlooks = Some(5.0);

    for config in [by_factor, by_looks] {
        let check_factor = config.rtc.min_value_db.is_some();
        let engine = GeocodeEngine::new(s.radar_grid.clone(), &s.orbit, &s.doppler, grid, config).unwrap();
        let mut output = grid_raster(&grid, 1, 0.0_f32);
        let mut rtc = grid_raster(&grid, 1, 0.0_f32);
        let mut nlooks = grid_raster(&grid, 1, 0.0_f32);
        let mut aux = GeocodeOutputs {
            rtc: Some(&mut rtc),
            nlooks: Some(&mut nlooks),
            ..Default::default()
        };
        let summary = engine
            .geocode::<f32, f32>(&input, &mut output, &s.dem, &mut aux)
            .unwrap();
        assert_eq!(summary.n_valid, 0);
        assert!(output.band(0).iter().all(|v| v.is_nan()));
        // Looks are still reported where the footprint reached
        assert!(nlooks.band(0).iter().all(|v| v.is_finite()));
        if check_factor {
            assert!(rtc.band(0).iter().all(|v| v.is_nan()));
        } else {
            assert!(rtc.band(0).iter().all(|v| v.is_finite()));
        }
    }
}

#[test]
fn test_upsampled_facets_agree() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let mut config = area_config();
    let base = compute_rtc(&s.radar_grid, &s.orbit, &s.doppler, &grid, &s.dem, &config).unwrap();
    config.rtc.geogrid_upsampling = 2;
    let fine = compute_rtc(&s.radar_grid, &s.orbit, &s.doppler, &grid, &s.dem, &config).unwrap();

    for (a, b) in base.iter().zip(fine.iter()) {
        assert!((a - b).abs() < 1e-3 * a.abs(), "{} vs {}", a, b);
    }
}

#[test]
fn test_rtc_factor_on_tilted_plane() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let lon0 = grid.start_x + 0.5 * grid.width as f64 * grid.spacing_x;
    let ellipsoid = Ellipsoid::wgs84();
    let mapper = CoordinateMapper::new(&s.radar_grid, &s.orbit, &s.doppler, ellipsoid);

    // Positive slopes face the sensor, which lies east of the scene
    for slope_deg in [10.0_f64, -10.0] {
        let slope = slope_deg.to_radians();
        let dem = tilted_dem(slope, lon0);
        let run = |radiometry: InputRadiometry| {
            let config = GeocodeConfig {
                rdr2geo: tight_rdr2geo(),
                rtc: RtcOptions {
                    input_radiometry: radiometry,
                    ..Default::default()
                },
                ..area_config()
            };
            compute_rtc(&s.radar_grid, &s.orbit, &s.doppler, &grid, &dem, &config).unwrap()
        };
        let sigma = run(InputRadiometry::SigmaNaughtEllipsoid);
        let beta = run(InputRadiometry::BetaNaught);

        for ((i, j), &factor) in sigma.indexed_iter() {
            let (lon, lat) = (grid.center_x(j), grid.center_y(i));
            let height = -(lon - lon0) * metres_per_degree_lon() * slope.tan();
            let llh = [lon.to_radians(), lat.to_radians(), height];
            let (t, _) = mapper.geo2rdr(llh, s.radar_grid.sensing_mid()).unwrap();
            let (sensor, _) = mapper.platform_state(t).unwrap();
            let look = (sensor - ellipsoid.lon_lat_to_xyz(llh)).normalized();

            let up = ellipsoid.normal(llh[0], llh[1]);
            let east = Vector3::new(-llh[0].sin(), llh[0].cos(), 0.0);
            let normal = east * slope.sin() + up * slope.cos();
            let expected_sigma = normal.dot(&look) / slope.cos();
            let cos_inc = up.dot(&look);
            let expected_beta = expected_sigma / (1.0 - cos_inc * cos_inc).sqrt();

            assert!(
                (factor as f64 - expected_sigma).abs() < 2e-3 * expected_sigma,
                "slope {}: sigma factor {} vs {}",
                slope_deg,
                factor,
                expected_sigma
            );
            let b = beta[[i, j]] as f64;
            assert!((b - expected_beta).abs() < 2e-3 * expected_beta, "slope {}: beta factor {} vs {}", slope_deg, b, expected_beta);
        }
    }
}

#[test]
fn test_bilinear_distribution_matches_area_projection() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let run = |algorithm: RtcAlgorithm| {
        let config = GeocodeConfig {
            rtc: RtcOptions {
                input_radiometry: InputRadiometry::SigmaNaughtEllipsoid,
                algorithm,
                ..Default::default()
            },
            ..area_config()
        };
        compute_rtc(&s.radar_grid, &s.orbit, &s.doppler, &grid, &s.dem, &config).unwrap()
    };
    let area = run(RtcAlgorithm::AreaProjection);
    let bilinear = run(RtcAlgorithm::BilinearDistribution);

    for ((i, j), &a) in area.indexed_iter() {
        let b = bilinear[[i, j]];
        assert!(a.is_finite());
        assert!(b.is_finite(), "cell ({}, {}) has no bilinear contribution", i, j);
        assert!((a - b).abs() < 1e-3 * a, "cell ({}, {}): {} vs {}", i, j, a, b);
    }
}

#[test]
fn test_bilinear_apply_rtc_is_consistent() {
    init_logging();
    let s = scene();
    let grid = s.small_geogrid();
    let input = MemoryRaster::filled(s.radar_grid.width, s.radar_grid.length, 1, 1.0_f32);

    let mut corrected = Vec::new();
    for algorithm in [RtcAlgorithm::AreaProjection, RtcAlgorithm::BilinearDistribution] {
        let config = GeocodeConfig {
            rtc: RtcOptions {
                input_radiometry: InputRadiometry::SigmaNaughtEllipsoid,
                algorithm,
                apply_rtc: true,
                ..Default::default()
            },
            ..area_config()
        };
        let engine = GeocodeEngine::new(s.radar_grid.clone(), &s.orbit, &s.doppler, grid, config).unwrap();
        let mut output = grid_raster(&grid, 1, f32::NAN);
        let mut rtc = grid_raster(&grid, 1, f32::NAN);
        let mut aux = GeocodeOutputs {
            rtc: Some(&mut rtc),
            ..Default::default()
        };
        let summary = engine
            .geocode::<f32, f32>(&input, &mut output, &s.dem, &mut aux)
            .unwrap();
        assert_eq!(summary.n_valid, summary.n_cells, "{}", algorithm);

        // A uniform input divided by the cell's own area factor
        for (value, factor) in output.band(0).iter().zip(rtc.band(0).iter()) {
            assert!((value * factor - 1.0).abs() < 1e-4, "{}: value {} factor {}", algorithm, value, factor);
        }
        corrected.push(output);
    }
    for (a, b) in corrected[0].band(0).iter().zip(corrected[1].band(0).iter()) {
        assert!((a - b).abs() < 1e-3 * a, "{} vs {}", a, b);
    }
}
