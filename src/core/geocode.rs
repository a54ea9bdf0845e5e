//! Geocoding engine: radar-grid rasters onto a geographic grid
//!
//! Work is split into blocks by the block scheduler. Blocks are processed in
//! parallel waves and flushed to the output in block order. Two modes exist:
//! INTERP resamples one radar value per output cell; AREA_PROJECTION
//! integrates radar facets over the output cells and can apply radiometric
//! terrain correction.

use crate::config::{GeocodeConfig, GeocodeOutputMode};
use crate::core::blocks::{arenas_per_block, nbytes_to_string, plan_blocks, BlockDescriptor, BlockLayout, MemoryMode};
use crate::core::carrier::PhaseCarrier;
use crate::core::ellipsoid::Ellipsoid;
use crate::core::facet::{AccumulatorGrid, FacetIntegrator};
use crate::core::geometry::CoordinateMapper;
use crate::core::interpolate::interpolate;
use crate::core::projection::Projection;
use crate::core::rtc::RtcAreaMode;
use crate::core::stats::{log_stats, RasterStats};
use crate::io::dem::{DemInterpolator, DemProvider};
use crate::io::doppler::Lut2d;
use crate::io::orbit::Orbit;
use crate::io::raster::{RasterSink, RasterSource, Sample};
use crate::types::{GeoGrid, RadarGrid, SarComplex64, SarError, SarResult};
use ndarray::{s, Array2, Zip};
use rayon::prelude::*;
use std::f64::consts::PI;

/// Points sampled along each edge when bounding a block
const PERIMETER_SAMPLES: usize = 32;

/// DEM pixels added around each DEM window
const DEM_MARGIN_PIXELS: usize = 2;

/// Optional per-cell outputs written alongside the geocoded data
#[derive(Default)]
pub struct GeocodeOutputs<'o> {
    /// Equivalent number of looks (AREA_PROJECTION)
    pub nlooks: Option<&'o mut dyn RasterSink<f32>>,
    /// RTC area or area factor (AREA_PROJECTION)
    pub rtc: Option<&'o mut dyn RasterSink<f32>>,
    /// Two bands: radar line and sample of each cell centre
    pub geo_rdr: Option<&'o mut dyn RasterSink<f64>>,
    /// DEM height at each cell centre
    pub dem: Option<&'o mut dyn RasterSink<f32>>,
}

/// Outcome of a geocoding run
#[derive(Debug, Clone)]
pub struct GeocodeSummary {
    pub memory_mode: MemoryMode,
    pub n_blocks: usize,
    /// Cells with a finite value in the first band
    pub n_valid: usize,
    pub n_cells: usize,
    pub stats: Vec<RasterStats>,
}

impl GeocodeSummary {
    pub fn coverage(&self) -> f64 {
        if self.n_cells == 0 {
            0.0
        } else {
            self.n_valid as f64 / self.n_cells as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AuxRequest {
    nlooks: bool,
    rtc: bool,
    geo_rdr: bool,
    dem: bool,
}

impl AuxRequest {
    fn cell_geometry(&self) -> bool {
        self.geo_rdr || self.dem
    }
}

/// What one run produces
#[derive(Debug, Clone, Copy)]
struct Job {
    mode: GeocodeOutputMode,
    n_out: usize,
    input_is_complex: bool,
    output_is_complex: bool,
    exponent: u32,
    full_covariance: bool,
    with_data: bool,
    aux: AuxRequest,
}

/// Radar position of an output cell centre
#[derive(Debug, Clone, Copy)]
struct CellRadarCoords {
    slant_range: f64,
    corrected_range: f64,
    line: f64,
    sample: f64,
}

#[derive(Debug, Clone, Copy)]
struct CellGeometry {
    height: f64,
    radar: Option<CellRadarCoords>,
}

/// Finished block awaiting its turn to be written
struct BlockOutput {
    block: BlockDescriptor,
    bands: Vec<Array2<SarComplex64>>,
    nlooks: Option<Array2<f32>>,
    rtc: Option<Array2<f32>>,
    geo_rdr: Option<[Array2<f64>; 2]>,
    dem: Option<Array2<f32>>,
}

impl BlockOutput {
    fn invalid(block: BlockDescriptor, job: &Job) -> Self {
        let shape = (block.length, block.width);
        Self {
            block,
            bands: (0..job.n_out).map(|_| Array2::from_elem(shape, nan_c64())).collect(),
            nlooks: job.aux.nlooks.then(|| Array2::from_elem(shape, f32::NAN)),
            rtc: job.aux.rtc.then(|| Array2::from_elem(shape, f32::NAN)),
            geo_rdr: job
                .aux
                .geo_rdr
                .then(|| [Array2::from_elem(shape, f64::NAN), Array2::from_elem(shape, f64::NAN)]),
            dem: job.aux.dem.then(|| Array2::from_elem(shape, f32::NAN)),
        }
    }

    fn set_cell_geometry(&mut self, cells: &[CellGeometry]) {
        let width = self.block.width;
        for (k, cell) in cells.iter().enumerate() {
            let (i, j) = (k / width, k % width);
            if let Some(dem) = self.dem.as_mut() {
                dem[[i, j]] = cell.height as f32;
            }
            if let (Some([lines, samples]), Some(rc)) = (self.geo_rdr.as_mut(), cell.radar) {
                lines[[i, j]] = rc.line;
                samples[[i, j]] = rc.sample;
            }
        }
    }
}

/// Per-wave inputs shared by the blocks processed together
struct BlockContext<'a> {
    dem_raster: &'a dyn RasterSource<f32>,
    /// DEM of the whole geogrid, unless blocks load their own
    shared_dem: Option<&'a DemInterpolator>,
    ref_height: f64,
    /// Accumulation arenas each area-projection block may hold
    n_arenas: usize,
}

/// Loads the radar samples of a window (absolute radar indices)
type WindowLoader<'l> = dyn Fn(&BlockDescriptor) -> SarResult<Vec<Array2<SarComplex64>>> + Sync + 'l;

fn nan_c64() -> SarComplex64 {
    SarComplex64::new(f64::NAN, f64::NAN)
}

fn is_finite_c64(v: &SarComplex64) -> bool {
    v.re.is_finite() && v.im.is_finite()
}

/// |v|^n as a real sample; `n == 1` keeps the value unchanged
fn apply_exponent(v: SarComplex64, exponent: u32) -> SarComplex64 {
    match exponent {
        1 => v,
        2 => SarComplex64::new(v.norm_sqr(), 0.0),
        n => SarComplex64::new(v.norm().powi(n as i32), 0.0),
    }
}

/// Smallest index window holding all `points` (line, sample) plus `margin`
fn radar_window<I: Iterator<Item = (f64, f64)>>(
    points: I,
    margin: usize,
    radar_grid: &RadarGrid,
    upsampling: usize,
) -> Option<BlockDescriptor> {
    let (mut l0, mut l1, mut c0, mut c1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    let mut any = false;
    for (line, sample) in points {
        l0 = l0.min(line);
        l1 = l1.max(line);
        c0 = c0.min(sample);
        c1 = c1.max(sample);
        any = true;
    }
    if !any {
        return None;
    }
    let m = margin as f64;
    let clamp = |v: f64, n: usize| v.max(0.0).min(n as f64) as usize;
    let line_start = clamp(l0.floor() - m, radar_grid.length);
    let line_end = clamp(l1.ceil() + m + 1.0, radar_grid.length);
    let col_start = clamp(c0.floor() - m, radar_grid.width);
    let col_end = clamp(c1.ceil() + m + 1.0, radar_grid.width);
    if line_end <= line_start || col_end <= col_start {
        return None;
    }
    Some(BlockDescriptor {
        line_start,
        length: line_end - line_start,
        col_start,
        width: col_end - col_start,
        upsampling,
    })
}

/// Points along the outline of `[x0, x1] x [y0, y1]`
fn perimeter(x0: f64, x1: f64, y0: f64, y1: f64, nx: usize, ny: usize) -> Vec<(f64, f64)> {
    let (nx, ny) = (nx.clamp(1, PERIMETER_SAMPLES), ny.clamp(1, PERIMETER_SAMPLES));
    let mut points = Vec::with_capacity(2 * (nx + ny + 2));
    for k in 0..=nx {
        let x = x0 + (x1 - x0) * k as f64 / nx as f64;
        points.push((x, y0));
        points.push((x, y1));
    }
    for k in 1..ny {
        let y = y0 + (y1 - y0) * k as f64 / ny as f64;
        points.push((x0, y));
        points.push((x1, y));
    }
    points
}

fn check_sink<X>(
    sink: &dyn RasterSink<X>,
    name: &str,
    geogrid: &GeoGrid,
    bands: usize,
) -> SarResult<()> {
    if sink.width() != geogrid.width || sink.length() != geogrid.length {
        return Err(SarError::InvalidParameter(format!(
            "{} raster is {}x{}, geogrid is {}x{}",
            name,
            sink.width(),
            sink.length(),
            geogrid.width,
            geogrid.length
        )));
    }
    if sink.num_bands() < bands {
        return Err(SarError::InvalidParameter(format!(
            "{} raster has {} band(s), {} required",
            name,
            sink.num_bands(),
            bands
        )));
    }
    Ok(())
}

fn write_georef<X>(sink: &mut dyn RasterSink<X>, geogrid: &GeoGrid) -> SarResult<()> {
    sink.set_geo_transform(geogrid.geo_transform())?;
    sink.set_epsg(geogrid.epsg)
}

/// Geocoder bound to one acquisition and one output grid
pub struct GeocodeEngine<'a> {
    radar_grid: RadarGrid,
    orbit: &'a Orbit,
    doppler: &'a Lut2d,
    geogrid: GeoGrid,
    projection: Projection,
    ellipsoid: Ellipsoid,
    config: GeocodeConfig,
    az_time_correction: Lut2d,
    slant_range_correction: Lut2d,
    azimuth_carrier: Box<dyn PhaseCarrier>,
    range_carrier: Box<dyn PhaseCarrier>,
}

impl<'a> GeocodeEngine<'a> {
    /// Validate inputs and configuration; fails before any block is processed
    pub fn new(
        radar_grid: RadarGrid,
        orbit: &'a Orbit,
        doppler: &'a Lut2d,
        geogrid: GeoGrid,
        config: GeocodeConfig,
    ) -> SarResult<Self> {
        radar_grid.validate()?;
        geogrid.validate()?;
        config.validate()?;
        let projection = Projection::from_epsg(geogrid.epsg)?;

        if radar_grid.ref_epoch != orbit.reference_epoch() {
            return Err(SarError::InvalidParameter(format!(
                "radar grid epoch {} differs from orbit epoch {}",
                radar_grid.ref_epoch,
                orbit.reference_epoch()
            )));
        }
        // The acquisition itself must be covered by the orbit
        orbit.interpolate(radar_grid.sensing_start)?;
        orbit.interpolate(radar_grid.sensing_stop())?;
        doppler.eval(radar_grid.sensing_mid(), radar_grid.mid_range())?;

        let azimuth_carrier = config.azimuth_carrier.build()?;
        let range_carrier = config.range_carrier.build()?;

        Ok(Self {
            radar_grid,
            orbit,
            doppler,
            geogrid,
            projection,
            ellipsoid: Ellipsoid::wgs84(),
            config,
            az_time_correction: Lut2d::default(),
            slant_range_correction: Lut2d::default(),
            azimuth_carrier,
            range_carrier,
        })
    }

    /// Additive azimuth-time (s) and slant-range (m) corrections applied to
    /// geo2rdr solutions before resampling
    pub fn with_corrections(mut self, az_time_correction: Lut2d, slant_range_correction: Lut2d) -> Self {
        self.az_time_correction = az_time_correction;
        self.slant_range_correction = slant_range_correction;
        self
    }

    pub fn radar_grid(&self) -> &RadarGrid {
        &self.radar_grid
    }

    pub fn geogrid(&self) -> &GeoGrid {
        &self.geogrid
    }

    pub fn config(&self) -> &GeocodeConfig {
        &self.config
    }

    /// Number of output bands for `n_in` input bands
    pub fn output_band_count(&self, n_in: usize, input_is_complex: bool) -> usize {
        if self.covariance(n_in, input_is_complex) {
            n_in * (n_in + 1) / 2
        } else {
            n_in
        }
    }

    fn covariance(&self, n_in: usize, input_is_complex: bool) -> bool {
        self.config.output_mode == GeocodeOutputMode::AreaProjection
            && self.config.full_covariance
            && input_is_complex
            && n_in > 1
    }

    fn mapper(&self) -> CoordinateMapper<'_> {
        CoordinateMapper::new(&self.radar_grid, self.orbit, self.doppler, self.ellipsoid)
            .with_params(self.config.geo2rdr, self.config.rdr2geo)
    }

    /// Dump the processing parameters
    pub fn print_parameters(&self) {
        let rg = &self.radar_grid;
        let gg = &self.geogrid;
        let cfg = &self.config;
        log::info!("🛰️  Radar grid:");
        log::info!("   reference epoch: {}", rg.ref_epoch);
        log::info!("   sensing start: {:.6} s, PRF: {:.3} Hz", rg.sensing_start, rg.prf);
        log::info!(
            "   starting range: {:.3} m, range spacing: {:.4} m",
            rg.starting_range,
            rg.range_pixel_spacing
        );
        log::info!("   wavelength: {:.6} m, look side: {}", rg.wavelength, rg.look_side);
        log::info!("   size: {} lines x {} samples", rg.length, rg.width);
        log::info!("🌍 Geogrid:");
        log::info!("   EPSG: {}", gg.epsg);
        log::info!("   start: ({:.9}, {:.9})", gg.start_x, gg.start_y);
        log::info!("   spacing: ({:.9}, {:.9})", gg.spacing_x, gg.spacing_y);
        log::info!("   end: ({:.9}, {:.9})", gg.end_x(), gg.end_y());
        log::info!("   size: {} rows x {} columns", gg.length, gg.width);
        log::info!("⚙️  Geocode options:");
        log::info!("   output mode: {}", cfg.output_mode);
        log::info!("   memory mode: {}", cfg.memory_mode);
        log::info!(
            "   block size: {} - {}, {} block(s) per thread",
            nbytes_to_string(cfg.block_size.min_block_size),
            nbytes_to_string(cfg.block_size.max_block_size),
            cfg.block_size.blocks_per_thread
        );
        log::info!(
            "   geo2rdr: threshold {:e}, {} iterations",
            cfg.geo2rdr.threshold,
            cfg.geo2rdr.max_iterations
        );
        log::info!(
            "   rdr2geo: threshold {:e}, {} (+{}) iterations",
            cfg.rdr2geo.threshold,
            cfg.rdr2geo.max_iterations,
            cfg.rdr2geo.extra_iterations
        );
        match cfg.output_mode {
            GeocodeOutputMode::Interp => {
                log::info!("   interpolation: {}", cfg.interp_method);
                log::info!(
                    "   flatten: {} (corrected range: {})",
                    cfg.flatten,
                    cfg.flatten_with_corrected_srange
                );
                log::info!(
                    "   carriers: azimuth {}, range {}",
                    if self.azimuth_carrier.is_zero() { "none" } else { "on" },
                    if self.range_carrier.is_zero() { "none" } else { "on" }
                );
            }
            GeocodeOutputMode::AreaProjection => {
                log::info!("   terrain radiometry: {}", cfg.rtc.input_radiometry);
                log::info!("   RTC area mode: {}", cfg.rtc.area_mode);
                log::info!("   RTC algorithm: {}", cfg.rtc.algorithm);
                log::info!("   apply RTC: {}", cfg.rtc.apply_rtc);
                log::info!("   geogrid upsampling: {}", cfg.rtc.geogrid_upsampling);
                if let Some(db) = cfg.rtc.min_value_db {
                    log::info!("   RTC min value: {} dB", db);
                }
                log::info!("   radar grid looks: {}", cfg.radar_grid_nlooks);
                if let Some(n) = cfg.min_nlooks {
                    log::info!("   min looks: {}", n);
                }
                log::info!("   full covariance: {}", cfg.full_covariance);
            }
        }
        log::info!("   exponent: {}", cfg.exponent);
        log::info!("   abs cal factor: {}", cfg.abs_cal_factor);
        if cfg.clip_min.is_some() || cfg.clip_max.is_some() {
            log::info!("   clip: [{:?}, {:?}]", cfg.clip_min, cfg.clip_max);
        }
    }

    /// Geocode every band of `input` into `output`
    ///
    /// `input` must match the radar grid; `output` and the requested `aux`
    /// rasters must match the geogrid. Cells without a valid solution are
    /// written as NaN.
    pub fn geocode<T: Sample, U: Sample>(
        &self,
        input: &dyn RasterSource<T>,
        output: &mut dyn RasterSink<U>,
        dem_raster: &dyn RasterSource<f32>,
        aux: &mut GeocodeOutputs<'_>,
    ) -> SarResult<GeocodeSummary> {
        if input.width() != self.radar_grid.width || input.length() != self.radar_grid.length {
            return Err(SarError::InvalidParameter(format!(
                "input raster is {}x{}, radar grid is {}x{}",
                input.width(),
                input.length(),
                self.radar_grid.width,
                self.radar_grid.length
            )));
        }
        let n_in = input.num_bands();
        if n_in == 0 {
            return Err(SarError::InvalidParameter("input raster has no bands".to_string()));
        }
        let n_out = self.output_band_count(n_in, T::IS_COMPLEX);
        check_sink(output, "output", &self.geogrid, n_out)?;

        let mode = self.config.output_mode;
        if mode == GeocodeOutputMode::Interp && (aux.nlooks.is_some() || aux.rtc.is_some()) {
            return Err(SarError::InvalidParameter(
                "number-of-looks and RTC outputs require AREA_PROJECTION mode".to_string(),
            ));
        }
        if let Some(sink) = aux.nlooks.as_deref() {
            check_sink(sink, "nlooks", &self.geogrid, 1)?;
        }
        if let Some(sink) = aux.rtc.as_deref() {
            check_sink(sink, "RTC", &self.geogrid, 1)?;
        }
        if let Some(sink) = aux.geo_rdr.as_deref() {
            check_sink(sink, "radar coordinates", &self.geogrid, 2)?;
        }
        if let Some(sink) = aux.dem.as_deref() {
            check_sink(sink, "DEM", &self.geogrid, 1)?;
        }

        self.print_parameters();

        let job = Job {
            mode,
            n_out,
            input_is_complex: T::IS_COMPLEX,
            output_is_complex: U::IS_COMPLEX,
            exponent: self.config.effective_exponent(T::IS_COMPLEX),
            full_covariance: self.covariance(n_in, T::IS_COMPLEX),
            with_data: true,
            aux: AuxRequest {
                nlooks: aux.nlooks.is_some(),
                rtc: aux.rtc.is_some(),
                geo_rdr: aux.geo_rdr.is_some(),
                dem: aux.dem.is_some(),
            },
        };
        if job.full_covariance {
            log::info!("Geocoding {} band(s) into {} covariance band(s)", n_in, n_out);
        }

        let (memory_mode, layout) = self.plan(n_out, std::mem::size_of::<U>(), &job)?;

        // Radar data shared by all blocks unless the radar grid is tiled too
        let shared: Option<Vec<Array2<SarComplex64>>> = match memory_mode {
            MemoryMode::BlocksGeogridAndRadarGrid => None,
            _ => {
                log::info!(
                    "Reading radar raster: {} band(s) of {}x{}",
                    n_in,
                    self.radar_grid.length,
                    self.radar_grid.width
                );
                let bands = (0..n_in)
                    .map(|b| {
                        input
                            .read_block(b, 0, 0, self.radar_grid.width, self.radar_grid.length)
                            .map(|a| a.mapv(T::to_c64))
                    })
                    .collect::<SarResult<Vec<_>>>()?;
                Some(bands)
            }
        };
        let loader = |window: &BlockDescriptor| -> SarResult<Vec<Array2<SarComplex64>>> {
            match &shared {
                Some(bands) => Ok(bands
                    .iter()
                    .map(|b| {
                        b.slice(s![window.line_start..window.line_end(), window.col_start..window.col_end()])
                            .to_owned()
                    })
                    .collect()),
                None => (0..n_in)
                    .map(|b| {
                        input
                            .read_block(b, window.col_start, window.line_start, window.width, window.length)
                            .map(|a| a.mapv(T::to_c64))
                    })
                    .collect(),
            }
        };

        write_georef(output, &self.geogrid)?;
        if let Some(sink) = aux.nlooks.as_deref_mut() {
            write_georef(sink, &self.geogrid)?;
        }
        if let Some(sink) = aux.rtc.as_deref_mut() {
            write_georef(sink, &self.geogrid)?;
        }
        if let Some(sink) = aux.geo_rdr.as_deref_mut() {
            write_georef(sink, &self.geogrid)?;
        }
        if let Some(sink) = aux.dem.as_deref_mut() {
            write_georef(sink, &self.geogrid)?;
        }

        let mut stats = vec![RasterStats::default(); n_out];
        let mut n_valid = 0;
        self.run_blocks(memory_mode, &layout, dem_raster, &loader, &job, |out| {
            let (x, y) = (out.block.col_start, out.block.line_start);
            for (b, band) in out.bands.iter().enumerate() {
                let converted = band.mapv(U::from_c64);
                converted.iter().for_each(|&v| stats[b].push(v));
                if b == 0 {
                    n_valid += band.iter().filter(|v| is_finite_c64(v)).count();
                }
                output.write_block(b, x, y, converted.view())?;
            }
            if let (Some(sink), Some(data)) = (aux.nlooks.as_deref_mut(), out.nlooks.as_ref()) {
                sink.write_block(0, x, y, data.view())?;
            }
            if let (Some(sink), Some(data)) = (aux.rtc.as_deref_mut(), out.rtc.as_ref()) {
                sink.write_block(0, x, y, data.view())?;
            }
            if let (Some(sink), Some([lines, samples])) = (aux.geo_rdr.as_deref_mut(), out.geo_rdr.as_ref()) {
                sink.write_block(0, x, y, lines.view())?;
                sink.write_block(1, x, y, samples.view())?;
            }
            if let (Some(sink), Some(data)) = (aux.dem.as_deref_mut(), out.dem.as_ref()) {
                sink.write_block(0, x, y, data.view())?;
            }
            Ok(())
        })?;

        let summary = GeocodeSummary {
            memory_mode,
            n_blocks: layout.n_blocks(),
            n_valid,
            n_cells: self.geogrid.width * self.geogrid.length,
            stats,
        };
        log::info!(
            "✅ Geocoding complete: {}/{} valid cells ({:.1}%)",
            summary.n_valid,
            summary.n_cells,
            100.0 * summary.coverage()
        );
        log_stats("geocoded", &summary.stats);
        Ok(summary)
    }

    /// Write the RTC area or area factor of the geogrid into `output`
    pub fn compute_rtc_area(
        &self,
        dem_raster: &dyn RasterSource<f32>,
        output: &mut dyn RasterSink<f32>,
    ) -> SarResult<()> {
        check_sink(output, "RTC", &self.geogrid, 1)?;
        write_georef(output, &self.geogrid)?;

        let job = Job {
            mode: GeocodeOutputMode::AreaProjection,
            n_out: 0,
            input_is_complex: false,
            output_is_complex: false,
            exponent: 1,
            full_covariance: false,
            with_data: false,
            aux: AuxRequest {
                rtc: true,
                ..Default::default()
            },
        };
        let (memory_mode, layout) = self.plan(1, std::mem::size_of::<f32>(), &job)?;
        let loader = |_: &BlockDescriptor| -> SarResult<Vec<Array2<SarComplex64>>> { Ok(Vec::new()) };

        let mut stats = RasterStats::default();
        self.run_blocks(memory_mode, &layout, dem_raster, &loader, &job, |out| {
            if let Some(rtc) = out.rtc {
                rtc.iter().for_each(|&v| stats.push(v));
                output.write_block(0, out.block.col_start, out.block.line_start, rtc.view())?;
            }
            Ok(())
        })?;
        log_stats(&format!("RTC {}", self.config.rtc.area_mode), &[stats]);
        Ok(())
    }

    /// Block layout for `job`, counting the accumulation arenas of area
    /// projection against the block budget
    fn plan(&self, nbands: usize, type_size: usize, job: &Job) -> SarResult<(MemoryMode, BlockLayout)> {
        let (upsampling, scratch_bytes) = match job.mode {
            GeocodeOutputMode::AreaProjection => {
                let value_bands = if job.with_data { job.n_out } else { 0 };
                (self.config.rtc.geogrid_upsampling, AccumulatorGrid::bytes_per_cell(value_bands))
            }
            GeocodeOutputMode::Interp => (1, 0),
        };
        plan_blocks(
            self.config.memory_mode,
            self.geogrid.length,
            self.geogrid.width,
            nbands,
            type_size,
            scratch_bytes,
            upsampling,
            &self.config.block_size,
        )
    }

    /// Process blocks in parallel waves and hand them to `flush` in order
    fn run_blocks<F>(
        &self,
        memory_mode: MemoryMode,
        layout: &BlockLayout,
        dem_raster: &dyn RasterSource<f32>,
        loader: &WindowLoader<'_>,
        job: &Job,
        mut flush: F,
    ) -> SarResult<()>
    where
        F: FnMut(BlockOutput) -> SarResult<()>,
    {
        let shared_dem = match memory_mode {
            MemoryMode::BlocksGeogridAndRadarGrid => None,
            _ => Some(self.load_dem(dem_raster, &self.geogrid)?),
        };
        // One seed height for the whole run keeps results independent of tiling
        let ref_height = match &shared_dem {
            Some(dem) => dem.ref_height(),
            None => self.reference_height(dem_raster)?,
        };
        log::debug!("DEM reference height: {:.3} m", ref_height);

        let blocks: Vec<BlockDescriptor> = layout.blocks().collect();
        let n_blocks = blocks.len();
        let threads = self.config.block_size.threads();
        let wave = threads;
        for (w, chunk) in blocks.chunks(wave).enumerate() {
            let ctx = BlockContext {
                dem_raster,
                shared_dem: shared_dem.as_ref(),
                ref_height,
                n_arenas: arenas_per_block(threads, chunk.len()),
            };
            let results: Vec<SarResult<BlockOutput>> = chunk
                .par_iter()
                .map(|block| self.process_block(block, &ctx, loader, job))
                .collect();
            for (k, result) in results.into_iter().enumerate() {
                let out = result?;
                log::debug!(
                    "Block {}/{}: rows {}..{}, cols {}..{}",
                    w * wave + k + 1,
                    n_blocks,
                    out.block.line_start,
                    out.block.line_end(),
                    out.block.col_start,
                    out.block.col_end()
                );
                flush(out)?;
            }
        }
        Ok(())
    }

    fn process_block(
        &self,
        block: &BlockDescriptor,
        ctx: &BlockContext<'_>,
        loader: &WindowLoader<'_>,
        job: &Job,
    ) -> SarResult<BlockOutput> {
        let geo = self
            .geogrid
            .sub_grid(block.line_start, block.col_start, block.length, block.width);
        let local_dem;
        let dem: &DemInterpolator = match ctx.shared_dem {
            Some(dem) => dem,
            None => {
                local_dem = self.load_dem(ctx.dem_raster, &geo)?.with_ref_height(ctx.ref_height);
                &local_dem
            }
        };
        match job.mode {
            GeocodeOutputMode::Interp => self.interp_block(block, &geo, dem, loader, job),
            GeocodeOutputMode::AreaProjection => self.area_block(block, &geo, dem, loader, job, ctx.n_arenas),
        }
    }

    /// DEM window covering `geo` plus the configured margin
    fn load_dem(&self, dem_raster: &dyn RasterSource<f32>, geo: &GeoGrid) -> SarResult<DemInterpolator> {
        let (x0, x1, y0, y1) = self.dem_bounds(dem_raster, geo)?;
        DemInterpolator::load_window(dem_raster, x0, x1, y0, y1, DEM_MARGIN_PIXELS)
    }

    /// Mean height of the DEM window of the whole geogrid, without loading it
    fn reference_height(&self, dem_raster: &dyn RasterSource<f32>) -> SarResult<f64> {
        let (x0, x1, y0, y1) = self.dem_bounds(dem_raster, &self.geogrid)?;
        DemInterpolator::window_mean_height(dem_raster, x0, x1, y0, y1, DEM_MARGIN_PIXELS)
    }

    /// Bounds of `geo` plus the configured margin in DEM projection units
    fn dem_bounds(&self, dem_raster: &dyn RasterSource<f32>, geo: &GeoGrid) -> SarResult<(f64, f64, f64, f64)> {
        let dem_projection = Projection::from_epsg(dem_raster.epsg().unwrap_or(4326))?;
        let m = self.config.dem_block_margin as f64;
        let points = perimeter(
            geo.start_x - m * geo.spacing_x,
            geo.end_x() + m * geo.spacing_x,
            geo.start_y - m * geo.spacing_y,
            geo.end_y() + m * geo.spacing_y,
            geo.width,
            geo.length,
        );
        let (mut x0, mut x1, mut y0, mut y1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for (x, y) in points {
            let [lon, lat] = self.projection.inverse(x, y);
            let [dx, dy] = dem_projection.forward(lon, lat);
            x0 = x0.min(dx);
            x1 = x1.max(dx);
            y0 = y0.min(dy);
            y1 = y1.max(dy);
        }
        Ok((x0, x1, y0, y1))
    }

    fn carrier_phase(&self, az_time: f64, slant_range: f64) -> SarResult<f64> {
        Ok(self.azimuth_carrier.eval(az_time, slant_range)? + self.range_carrier.eval(az_time, slant_range)?)
    }

    fn has_carrier(&self) -> bool {
        !(self.azimuth_carrier.is_zero() && self.range_carrier.is_zero())
    }

    /// geo2rdr of a ground point with timing corrections; `None` when it
    /// falls outside the radar grid
    fn radar_coords(&self, mapper: &CoordinateMapper<'_>, llh: [f64; 3]) -> SarResult<Option<CellRadarCoords>> {
        let (az_time, slant_range) = mapper.geo2rdr(llh, self.radar_grid.sensing_mid())?;
        let corrected_time = az_time + self.az_time_correction.eval(az_time, slant_range)?;
        let corrected_range = slant_range + self.slant_range_correction.eval(az_time, slant_range)?;
        let line = self.radar_grid.line_of(corrected_time);
        let sample = self.radar_grid.sample_of(corrected_range);
        let max_line = (self.radar_grid.length - 1) as f64;
        let max_sample = (self.radar_grid.width - 1) as f64;
        if !(line >= 0.0 && line <= max_line && sample >= 0.0 && sample <= max_sample) {
            return Ok(None);
        }
        Ok(Some(CellRadarCoords {
            slant_range,
            corrected_range,
            line,
            sample,
        }))
    }

    fn cell_geometry(
        &self,
        mapper: &CoordinateMapper<'_>,
        geo: &GeoGrid,
        row: usize,
        col: usize,
        dem: &dyn DemProvider,
    ) -> SarResult<CellGeometry> {
        let [lon, lat] = self.projection.inverse(geo.center_x(col), geo.center_y(row));
        let height = dem.elevation(lon, lat);
        let radar = match self.radar_coords(mapper, [lon, lat, height]) {
            Ok(coords) => coords,
            Err(e) if e.is_per_pixel() => None,
            Err(e) => return Err(e),
        };
        Ok(CellGeometry { height, radar })
    }

    fn block_cell_geometry(
        &self,
        mapper: &CoordinateMapper<'_>,
        block: &BlockDescriptor,
        geo: &GeoGrid,
        dem: &dyn DemProvider,
    ) -> SarResult<Vec<CellGeometry>> {
        (0..block.length)
            .into_par_iter()
            .flat_map_iter(|i| (0..block.width).map(move |j| (i, j)))
            .map(|(i, j)| self.cell_geometry(mapper, geo, i, j, dem))
            .collect()
    }

    fn interp_block(
        &self,
        block: &BlockDescriptor,
        geo: &GeoGrid,
        dem: &dyn DemProvider,
        loader: &WindowLoader<'_>,
        job: &Job,
    ) -> SarResult<BlockOutput> {
        let mapper = self.mapper();
        let cells = self.block_cell_geometry(&mapper, block, geo, dem)?;
        let mut out = BlockOutput::invalid(*block, job);
        out.set_cell_geometry(&cells);

        let margin = self.config.interp_method.margin() + 1;
        let window = radar_window(
            cells.iter().filter_map(|c| c.radar.map(|r| (r.line, r.sample))),
            margin,
            &self.radar_grid,
            1,
        );
        let Some(window) = window else {
            log::debug!("Block at ({}, {}) is outside the radar grid", block.line_start, block.col_start);
            return Ok(out);
        };
        let data = loader(&window)?;

        for (band, data) in out.bands.iter_mut().zip(data.iter()) {
            let values: Vec<SarComplex64> = cells
                .par_iter()
                .map(|cell| self.interp_value(cell, data, &window, job))
                .collect();
            *band = Array2::from_shape_vec((block.length, block.width), values)
                .map_err(|e| SarError::Processing(format!("Failed to assemble block: {}", e)))?;
        }
        Ok(out)
    }

    fn interp_value(
        &self,
        cell: &CellGeometry,
        data: &Array2<SarComplex64>,
        window: &BlockDescriptor,
        job: &Job,
    ) -> SarComplex64 {
        let Some(rc) = cell.radar else {
            return nan_c64();
        };
        let line = rc.line - window.line_start as f64;
        let sample = rc.sample - window.col_start as f64;
        let value = if job.input_is_complex && self.has_carrier() {
            self.interp_with_carrier(data, window, line, sample, &rc)
        } else {
            interpolate(&data.view(), line, sample, self.config.interp_method)
        };
        let Some(mut value) = value else {
            return nan_c64();
        };
        if !is_finite_c64(&value) {
            return nan_c64();
        }

        if job.input_is_complex && self.config.flatten {
            let range = if self.config.flatten_with_corrected_srange {
                rc.corrected_range
            } else {
                rc.slant_range
            };
            value *= SarComplex64::from_polar(1.0, 4.0 * PI * range / self.radar_grid.wavelength);
        }
        self.calibrate(apply_exponent(value, job.exponent), job.output_is_complex)
    }

    /// Remove the carrier around the sample, resample, then restore it at
    /// the resampled position
    fn interp_with_carrier(
        &self,
        data: &Array2<SarComplex64>,
        window: &BlockDescriptor,
        line: f64,
        sample: f64,
        rc: &CellRadarCoords,
    ) -> Option<SarComplex64> {
        let m = self.config.interp_method.margin().max(1) as isize;
        let (rows, cols) = data.dim();
        let (fl, fs) = (line.floor() as isize, sample.floor() as isize);
        let r0 = (fl - m).max(0) as usize;
        let r1 = ((fl + m + 1).max(0) as usize).min(rows);
        let c0 = (fs - m).max(0) as usize;
        let c1 = ((fs + m + 1).max(0) as usize).min(cols);
        if r1 <= r0 || c1 <= c0 {
            return None;
        }

        let mut chip = Array2::zeros((r1 - r0, c1 - c0));
        for ((i, j), v) in chip.indexed_iter_mut() {
            let az_time = self.radar_grid.sensing_time((window.line_start + r0 + i) as f64);
            let slant_range = self.radar_grid.slant_range((window.col_start + c0 + j) as f64);
            let phase = self.carrier_phase(az_time, slant_range).ok()?;
            *v = data[[r0 + i, c0 + j]] * SarComplex64::from_polar(1.0, -phase);
        }

        let value = interpolate(
            &chip.view(),
            line - r0 as f64,
            sample - c0 as f64,
            self.config.interp_method,
        )?;
        let phase = self
            .carrier_phase(self.radar_grid.sensing_time(rc.line), self.radar_grid.slant_range(rc.sample))
            .ok()?;
        Some(value * SarComplex64::from_polar(1.0, phase))
    }

    /// Absolute calibration then clipping; complex values are clipped in magnitude
    fn calibrate(&self, value: SarComplex64, output_is_complex: bool) -> SarComplex64 {
        let v = value * self.config.abs_cal_factor;
        let (lo, hi) = (self.config.clip_min, self.config.clip_max);
        if lo.is_none() && hi.is_none() {
            return v;
        }
        if output_is_complex {
            let magnitude = v.norm();
            let clipped = magnitude
                .max(lo.unwrap_or(f64::MIN))
                .min(hi.unwrap_or(f64::MAX));
            if magnitude > 0.0 && clipped != magnitude {
                v * (clipped / magnitude)
            } else {
                v
            }
        } else {
            SarComplex64::new(
                v.re.max(lo.unwrap_or(f64::MIN)).min(hi.unwrap_or(f64::MAX)),
                0.0,
            )
        }
    }

    /// Radar window seen by the outline of a block, with margin
    fn block_radar_window(
        &self,
        mapper: &CoordinateMapper<'_>,
        geo: &GeoGrid,
        dem: &dyn DemProvider,
    ) -> SarResult<Option<BlockDescriptor>> {
        let points = perimeter(geo.start_x, geo.end_x(), geo.start_y, geo.end_y(), geo.width, geo.length);
        let coords = points
            .par_iter()
            .map(|&(x, y)| {
                let [lon, lat] = self.projection.inverse(x, y);
                let llh = [lon, lat, dem.elevation(lon, lat)];
                match mapper.geo2rdr(llh, self.radar_grid.sensing_mid()) {
                    Ok((t, r)) => Ok(Some((self.radar_grid.line_of(t), self.radar_grid.sample_of(r)))),
                    Err(e) if e.is_per_pixel() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .collect::<SarResult<Vec<_>>>()?;
        Ok(radar_window(
            coords.into_iter().flatten(),
            self.config.radar_block_margin,
            &self.radar_grid,
            self.config.rtc.geogrid_upsampling,
        ))
    }

    /// Input bands raised to the exponent, followed by the cross products
    /// `x_i * conj(x_j)` (i < j) when full covariance is requested
    fn transform_bands(&self, bands: Vec<Array2<SarComplex64>>, job: &Job) -> Vec<Array2<SarComplex64>> {
        let mut out: Vec<Array2<SarComplex64>> =
            bands.iter().map(|b| b.mapv(|v| apply_exponent(v, job.exponent))).collect();
        if job.full_covariance {
            for i in 0..bands.len() {
                for j in i + 1..bands.len() {
                    out.push(Zip::from(&bands[i]).and(&bands[j]).map_collect(|a, b| a * b.conj()));
                }
            }
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn area_block(
        &self,
        block: &BlockDescriptor,
        geo: &GeoGrid,
        dem: &dyn DemProvider,
        loader: &WindowLoader<'_>,
        job: &Job,
        n_arenas: usize,
    ) -> SarResult<BlockOutput> {
        let mapper = self.mapper();
        let mut out = BlockOutput::invalid(*block, job);
        if job.aux.cell_geometry() {
            let cells = self.block_cell_geometry(&mapper, block, geo, dem)?;
            out.set_cell_geometry(&cells);
        }

        let Some(window) = self.block_radar_window(&mapper, geo, dem)? else {
            log::debug!("Block at ({}, {}) is outside the radar grid", block.line_start, block.col_start);
            return Ok(out);
        };
        let values = if job.with_data {
            self.transform_bands(loader(&window)?, job)
        } else {
            Vec::new()
        };

        let integrator = FacetIntegrator {
            mapper,
            radar_grid: &self.radar_grid,
            dem,
            input_radiometry: self.config.rtc.input_radiometry,
            algorithm: self.config.rtc.algorithm,
            upsampling: self.config.rtc.geogrid_upsampling,
            radar_grid_nlooks: self.config.radar_grid_nlooks,
            apply_rtc: self.config.rtc.apply_rtc,
            n_arenas,
        };
        let acc = integrator.integrate(&window, geo, &values)?;
        self.finalize_area(&acc, &mut out, job);
        Ok(out)
    }

    fn finalize_area(&self, acc: &AccumulatorGrid, out: &mut BlockOutput, job: &Job) {
        let min_factor = self.config.rtc.min_value();
        let (length, width) = acc.dim();
        for i in 0..length {
            for j in 0..width {
                let weight = acc.weight[[i, j]];
                let ill_area = acc.ill_area[[i, j]];
                let factor = acc.area_factor(i, j);
                let nlooks = acc.nlooks[[i, j]];
                let above_min = min_factor.map_or(true, |min| factor >= min);

                if let Some(rtc) = out.rtc.as_mut() {
                    let value = match self.config.rtc.area_mode {
                        RtcAreaMode::Area if weight > 0.0 => ill_area,
                        RtcAreaMode::Area => f64::NAN,
                        RtcAreaMode::AreaFactor => factor,
                    };
                    rtc[[i, j]] = if above_min { value as f32 } else { f32::NAN };
                }
                if let Some(looks) = out.nlooks.as_mut() {
                    looks[[i, j]] = if weight > 0.0 { nlooks as f32 } else { f32::NAN };
                }

                let enough_looks = self.config.min_nlooks.map_or(true, |min| nlooks >= min);
                if !(weight > 0.0 && above_min && enough_looks) {
                    continue;
                }
                let norm = if self.config.rtc.apply_rtc { ill_area } else { weight };
                if !(norm > 0.0) {
                    continue;
                }
                for (band, sums) in out.bands.iter_mut().zip(acc.values.iter()) {
                    band[[i, j]] = self.calibrate(sums[[i, j]] / norm, job.output_is_complex);
                }
            }
        }
    }
}
