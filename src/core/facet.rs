//! Area-projection facet integration
//!
//! Radar cells are projected to the ground through their corner points,
//! split into two triangles and intersected exactly with the cells of the
//! output grid. Each triangle contributes its overlap (footprint weight), its
//! illuminated and reference areas, and the radar values it carries to the
//! per-block accumulator arena.
//!
//! Lines of the radar window are split into a fixed number of contiguous
//! chunks, each owning one arena, so the memory held by a block is bounded
//! by the arena count rather than by the rayon split pattern.

use crate::core::blocks::BlockDescriptor;
use crate::core::ellipsoid::Ellipsoid;
use crate::core::geometry::CoordinateMapper;
use crate::core::projection::Projection;
use crate::core::rtc::{InputRadiometry, RtcAlgorithm};
use crate::io::dem::DemProvider;
use crate::types::{GeoGrid, RadarGrid, SarComplex64, SarResult, Vector3};
use ndarray::Array2;
use rayon::prelude::*;

/// Footprints smaller than this (in output cell units) are skipped
const DEGENERATE_AREA: f64 = 1e-12;

/// Overlaps below this are numerical noise
const OVERLAP_EPS: f64 = 1e-14;

/// Upper bound on the per-side subdivision of a bilinearly distributed facet
const MAX_SPLAT_SUBDIVISION: usize = 64;

/// Maps geodetic coordinates onto fractional output-cell coordinates
#[derive(Debug, Clone, Copy)]
pub struct CellMapper {
    projection: Projection,
    grid: GeoGrid,
    center_lon_deg: f64,
}

impl CellMapper {
    pub fn new(grid: &GeoGrid) -> SarResult<Self> {
        Ok(Self {
            projection: Projection::from_epsg(grid.epsg)?,
            grid: *grid,
            center_lon_deg: grid.start_x + 0.5 * grid.width as f64 * grid.spacing_x,
        })
    }

    /// (column, row) in cell units; cell (i, j) spans [j, j+1) x [i, i+1)
    pub fn to_cell(&self, lon: f64, lat: f64) -> [f64; 2] {
        let [mut x, y] = self.projection.forward(lon, lat);
        if self.projection.is_geographic() {
            // Unwrap longitude toward the grid centre for antimeridian grids
            x = self.center_lon_deg + (x - self.center_lon_deg + 180.0).rem_euclid(360.0) - 180.0;
        }
        [
            (x - self.grid.start_x) / self.grid.spacing_x,
            (y - self.grid.start_y) / self.grid.spacing_y,
        ]
    }
}

/// Integral of clamp(t, 0, 1)
fn ramp_integral(t: f64) -> f64 {
    if t <= 0.0 {
        0.0
    } else if t < 1.0 {
        0.5 * t * t
    } else {
        t - 0.5
    }
}

/// Signed area of a 2-D triangle (positive when counter-clockwise)
pub fn signed_area(tri: &[[f64; 2]; 3]) -> f64 {
    0.5 * ((tri[1][0] - tri[0][0]) * (tri[2][1] - tri[0][1])
        - (tri[2][0] - tri[0][0]) * (tri[1][1] - tri[0][1]))
}

/// Exact overlap of a triangle with the cells of an `n_rows` x `n_cols`
/// unit grid, by column-wise integration of the clipped edges.
///
/// `emit(row, col, area)` is called for every cell with positive overlap.
/// Returns the absolute triangle area, or 0 for degenerate triangles.
pub fn triangle_cell_overlaps<F: FnMut(usize, usize, f64)>(
    tri: &[[f64; 2]; 3],
    n_rows: usize,
    n_cols: usize,
    scratch: &mut Vec<f64>,
    mut emit: F,
) -> f64 {
    let signed = signed_area(tri);
    if !signed.is_finite() || signed.abs() < DEGENERATE_AREA {
        return 0.0;
    }
    let orientation = signed.signum();

    let umin = tri[0][0].min(tri[1][0]).min(tri[2][0]);
    let umax = tri[0][0].max(tri[1][0]).max(tri[2][0]);
    let vmin = tri[0][1].min(tri[1][1]).min(tri[2][1]);
    let vmax = tri[0][1].max(tri[1][1]).max(tri[2][1]);
    if umax <= 0.0 || vmax <= 0.0 || umin >= n_cols as f64 || vmin >= n_rows as f64 {
        return signed.abs();
    }

    let j0 = umin.floor().max(0.0) as usize;
    let j1 = (umax.ceil() as usize).min(n_cols);
    let i0 = vmin.floor().max(0.0) as usize;
    let i1 = (vmax.ceil() as usize).min(n_rows);

    scratch.clear();
    scratch.resize(i1 - i0, 0.0);

    for j in j0..j1 {
        scratch.iter_mut().for_each(|v| *v = 0.0);
        let (xl, xr) = (j as f64, j as f64 + 1.0);

        for e in 0..3 {
            let p = tri[e];
            let q = tri[(e + 1) % 3];
            if p[0] == q[0] {
                continue;
            }
            let direction = if q[0] > p[0] { 1.0 } else { -1.0 };
            let (a, b) = if p[0] < q[0] { (p, q) } else { (q, p) };
            let cu0 = a[0].max(xl);
            let cu1 = b[0].min(xr);
            if cu1 <= cu0 {
                continue;
            }
            let slope = (b[1] - a[1]) / (b[0] - a[0]);
            let va = a[1] + slope * (cu0 - a[0]);
            let vb = a[1] + slope * (cu1 - a[0]);
            let width = cu1 - cu0;

            for (r, acc) in scratch.iter_mut().enumerate() {
                let row = (i0 + r) as f64;
                let g0 = va - row;
                let g1 = vb - row;
                let integral = if (g1 - g0).abs() < 1e-12 {
                    (0.5 * (g0 + g1)).clamp(0.0, 1.0) * width
                } else {
                    width * (ramp_integral(g1) - ramp_integral(g0)) / (g1 - g0)
                };
                *acc += direction * integral;
            }
        }

        for (r, &acc) in scratch.iter().enumerate() {
            let area = -orientation * acc;
            if area > OVERLAP_EPS {
                emit(i0 + r, j, area);
            }
        }
    }
    signed.abs()
}

/// Add the bilinear weights of a point at cell coordinates `c` to the four
/// surrounding cell centres
fn splat_point<F: FnMut(usize, usize, f64)>(c: [f64; 2], mass: f64, n_rows: usize, n_cols: usize, emit: &mut F) {
    let cu = c[0] - 0.5;
    let cv = c[1] - 0.5;
    let (j0, i0) = (cu.floor(), cv.floor());
    let (fu, fv) = (cu - j0, cv - i0);
    for (di, dj, w) in [
        (0.0, 0.0, (1.0 - fu) * (1.0 - fv)),
        (0.0, 1.0, fu * (1.0 - fv)),
        (1.0, 0.0, (1.0 - fu) * fv),
        (1.0, 1.0, fu * fv),
    ] {
        let (i, j) = (i0 + di, j0 + dj);
        if i < 0.0 || j < 0.0 || i >= n_rows as f64 || j >= n_cols as f64 || w <= 0.0 {
            continue;
        }
        emit(i as usize, j as usize, mass * w);
    }
}

/// Distribute a unit mass spread uniformly over a triangle to cell centres
/// with bilinear weights.
///
/// The triangle is split into n^2 congruent sub-triangles with edges of at
/// most half a cell and each sub-triangle centroid is splatted, so every
/// cell the footprint touches receives a share. Weights falling outside the
/// grid are dropped.
pub fn splat_bilinear<F: FnMut(usize, usize, f64)>(tri: &[[f64; 2]; 3], n_rows: usize, n_cols: usize, mut emit: F) {
    let edge = |a: [f64; 2], b: [f64; 2]| (a[0] - b[0]).hypot(a[1] - b[1]);
    let longest = edge(tri[0], tri[1]).max(edge(tri[1], tri[2])).max(edge(tri[2], tri[0]));
    if !longest.is_finite() {
        return;
    }
    let umin = tri[0][0].min(tri[1][0]).min(tri[2][0]);
    let umax = tri[0][0].max(tri[1][0]).max(tri[2][0]);
    let vmin = tri[0][1].min(tri[1][1]).min(tri[2][1]);
    let vmax = tri[0][1].max(tri[1][1]).max(tri[2][1]);
    if umax <= -0.5 || vmax <= -0.5 || umin >= n_cols as f64 + 0.5 || vmin >= n_rows as f64 + 0.5 {
        return;
    }
    let n = ((2.0 * longest).ceil() as usize).clamp(1, MAX_SPLAT_SUBDIVISION);
    let mass = 1.0 / (n * n) as f64;
    let step = 1.0 / n as f64;
    let at = |a: f64, b: f64| {
        [
            tri[0][0] + a * (tri[1][0] - tri[0][0]) + b * (tri[2][0] - tri[0][0]),
            tri[0][1] + a * (tri[1][1] - tri[0][1]) + b * (tri[2][1] - tri[0][1]),
        ]
    };
    for p in 0..n {
        for q in 0..n - p {
            let (a, b) = (p as f64 * step, q as f64 * step);
            splat_point(at(a + step / 3.0, b + step / 3.0), mass, n_rows, n_cols, &mut emit);
            if p + q + 1 < n {
                splat_point(at(a + 2.0 * step / 3.0, b + 2.0 * step / 3.0), mass, n_rows, n_cols, &mut emit);
            }
        }
    }
}

/// Split `n_lines` into at most `n_chunks` contiguous ranges of near-equal size
pub fn line_chunks(n_lines: usize, n_chunks: usize) -> Vec<std::ops::Range<usize>> {
    let n_chunks = n_chunks.clamp(1, n_lines.max(1));
    let base = n_lines / n_chunks;
    let extra = n_lines % n_chunks;
    let mut start = 0;
    (0..n_chunks)
        .map(|k| {
            let len = base + usize::from(k < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .filter(|range| !range.is_empty())
        .collect()
}

/// Reusable buffers for the overlap computation of one worker
#[derive(Debug, Default)]
struct OverlapScratch {
    columns: Vec<f64>,
    overlaps: Vec<(usize, usize, f64)>,
}

/// Per-cell accumulation arena for one output block
#[derive(Debug, Clone)]
pub struct AccumulatorGrid {
    /// Geometric footprint overlap in cell units
    pub weight: Array2<f64>,
    /// Illuminated (gamma) area, m^2
    pub ill_area: Array2<f64>,
    /// Reference (beta or sigma-ellipsoid) area, m^2
    pub ref_area: Array2<f64>,
    /// Equivalent number of radar looks
    pub nlooks: Array2<f64>,
    /// Weighted value sums, one per output band
    pub values: Vec<Array2<SarComplex64>>,
}

impl AccumulatorGrid {
    pub fn new(length: usize, width: usize, nbands: usize) -> Self {
        Self {
            weight: Array2::zeros((length, width)),
            ill_area: Array2::zeros((length, width)),
            ref_area: Array2::zeros((length, width)),
            nlooks: Array2::zeros((length, width)),
            values: (0..nbands).map(|_| Array2::zeros((length, width))).collect(),
        }
    }

    /// Bytes held per cell by one arena with `nbands` value bands
    pub fn bytes_per_cell(nbands: usize) -> usize {
        4 * std::mem::size_of::<f64>() + nbands * std::mem::size_of::<SarComplex64>()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.weight.dim()
    }

    pub fn merge(mut self, other: AccumulatorGrid) -> AccumulatorGrid {
        self.weight += &other.weight;
        self.ill_area += &other.ill_area;
        self.ref_area += &other.ref_area;
        self.nlooks += &other.nlooks;
        for (mine, theirs) in self.values.iter_mut().zip(other.values.iter()) {
            *mine += theirs;
        }
        self
    }

    /// Illuminated over reference area; NaN where nothing was accumulated
    pub fn area_factor(&self, row: usize, col: usize) -> f64 {
        let reference = self.ref_area[[row, col]];
        if reference > 0.0 {
            self.ill_area[[row, col]] / reference
        } else {
            f64::NAN
        }
    }
}

/// Ground projection of a facet vertex
#[derive(Debug, Clone, Copy)]
struct Vertex {
    cell: [f64; 2],
    xyz: Vector3,
    xyz_ellipsoid: Vector3,
    up: Vector3,
}

/// Illuminated and reference areas of a ground triangle
pub fn facet_areas(
    p: [Vector3; 3],
    p_ellipsoid: [Vector3; 3],
    up: Vector3,
    sensor: Vector3,
    radiometry: InputRadiometry,
) -> (f64, f64) {
    let centroid = (p[0] + p[1] + p[2]) * (1.0 / 3.0);
    let look = (sensor - centroid).normalized();

    let cross = (p[1] - p[0]).cross(&(p[2] - p[0]));
    let area_3d = 0.5 * cross.norm();
    let mut normal = cross.normalized();
    if normal.dot(&up) < 0.0 {
        normal = -normal;
    }
    let cos_local = normal.dot(&look);
    let illuminated = if cos_local > 0.0 { area_3d * cos_local } else { 0.0 };

    let cross_ell = (p_ellipsoid[1] - p_ellipsoid[0]).cross(&(p_ellipsoid[2] - p_ellipsoid[0]));
    let area_ellipsoid = 0.5 * cross_ell.norm();
    let reference = match radiometry {
        InputRadiometry::BetaNaught => {
            let cos_ell = up.dot(&look).clamp(-1.0, 1.0);
            area_ellipsoid * (1.0 - cos_ell * cos_ell).sqrt()
        }
        InputRadiometry::SigmaNaughtEllipsoid => area_ellipsoid,
    };
    (illuminated, reference)
}

/// Area-projection integrator for one acquisition
pub struct FacetIntegrator<'a> {
    pub mapper: CoordinateMapper<'a>,
    pub radar_grid: &'a RadarGrid,
    pub dem: &'a dyn DemProvider,
    pub input_radiometry: InputRadiometry,
    pub algorithm: RtcAlgorithm,
    /// Facet subdivision per radar cell side
    pub upsampling: usize,
    pub radar_grid_nlooks: f64,
    /// Weight values by reference area (terrain-corrected output)
    pub apply_rtc: bool,
    /// Accumulation arenas alive at once; lines are chunked accordingly
    pub n_arenas: usize,
}

impl<'a> FacetIntegrator<'a> {
    fn ellipsoid(&self) -> &Ellipsoid {
        &self.mapper.ellipsoid
    }

    /// Vertex lattice covering `window` (radar grid indices) at half-pixel
    /// corners, subdivided `upsampling` times per cell side
    fn compute_vertices(&self, window: &BlockDescriptor, cells: &CellMapper) -> Vec<Option<Vertex>> {
        let up = self.upsampling.max(1);
        let n_rows = window.length * up + 1;
        let n_cols = window.width * up + 1;
        let step = 1.0 / up as f64;
        let ellipsoid = *self.ellipsoid();

        (0..n_rows)
            .into_par_iter()
            .flat_map_iter(|k| {
                let line = window.line_start as f64 - 0.5 + k as f64 * step;
                let az_time = self.radar_grid.sensing_time(line);
                (0..n_cols).map(move |m| {
                    let sample = window.col_start as f64 - 0.5 + m as f64 * step;
                    let slant_range = self.radar_grid.slant_range(sample);
                    let llh = self.mapper.rdr2geo(az_time, slant_range, self.dem).ok()?;
                    Some(Vertex {
                        cell: cells.to_cell(llh[0], llh[1]),
                        xyz: ellipsoid.lon_lat_to_xyz(llh),
                        xyz_ellipsoid: ellipsoid.lon_lat_to_xyz([llh[0], llh[1], 0.0]),
                        up: ellipsoid.normal(llh[0], llh[1]),
                    })
                })
            })
            .collect()
    }

    /// Integrate all facets of radar `window` into the cells of `geogrid`
    ///
    /// `values` holds one window-shaped array per output band and may be
    /// empty when only areas are needed.
    pub fn integrate(
        &self,
        window: &BlockDescriptor,
        geogrid: &GeoGrid,
        values: &[Array2<SarComplex64>],
    ) -> SarResult<AccumulatorGrid> {
        let cells = CellMapper::new(geogrid)?;
        let (n_rows, n_cols) = (geogrid.length, geogrid.width);
        let nbands = values.len();
        if window.length == 0 || window.width == 0 {
            return Ok(AccumulatorGrid::new(n_rows, n_cols, nbands));
        }

        let vertices = self.compute_vertices(window, &cells);
        let up = self.upsampling.max(1);
        let triangle_share = 1.0 / (2 * up * up) as f64;

        let arenas: Vec<AccumulatorGrid> = line_chunks(window.length, self.n_arenas)
            .into_par_iter()
            .map(|lines| {
                let mut acc = AccumulatorGrid::new(n_rows, n_cols, nbands);
                let mut scratch = OverlapScratch::default();
                for l in lines {
                    self.integrate_line(window, l, &vertices, values, triangle_share, &mut acc, &mut scratch);
                }
                acc
            })
            .collect();

        Ok(arenas
            .into_iter()
            .reduce(AccumulatorGrid::merge)
            .unwrap_or_else(|| AccumulatorGrid::new(n_rows, n_cols, nbands)))
    }

    /// Accumulate the facets of window line `l`
    #[allow(clippy::too_many_arguments)]
    fn integrate_line(
        &self,
        window: &BlockDescriptor,
        l: usize,
        vertices: &[Option<Vertex>],
        values: &[Array2<SarComplex64>],
        triangle_share: f64,
        acc: &mut AccumulatorGrid,
        scratch: &mut OverlapScratch,
    ) {
        let up = self.upsampling.max(1);
        let vertex_cols = window.width * up + 1;
        let line = window.line_start + l;
        let Ok((sensor, _)) = self.mapper.platform_state(self.radar_grid.sensing_time(line as f64)) else {
            return;
        };

        let mut pixel_values: Vec<SarComplex64> = Vec::with_capacity(values.len());
        for s in 0..window.width {
            pixel_values.clear();
            pixel_values.extend(values.iter().map(|band| band[[l, s]]));
            if pixel_values.iter().any(|v| !(v.re.is_finite() && v.im.is_finite())) {
                continue;
            }
            for a in 0..up {
                for b in 0..up {
                    let k0 = l * up + a;
                    let m0 = s * up + b;
                    let quad = [
                        vertices[k0 * vertex_cols + m0],
                        vertices[k0 * vertex_cols + m0 + 1],
                        vertices[(k0 + 1) * vertex_cols + m0 + 1],
                        vertices[(k0 + 1) * vertex_cols + m0],
                    ];
                    let [Some(v00), Some(v01), Some(v11), Some(v10)] = quad else {
                        continue;
                    };
                    for tri in [[v00, v01, v11], [v00, v11, v10]] {
                        self.accumulate_triangle(&tri, sensor, &pixel_values, triangle_share, acc, scratch);
                    }
                }
            }
        }
    }

    fn accumulate_triangle(
        &self,
        tri: &[Vertex; 3],
        sensor: Vector3,
        pixel_values: &[SarComplex64],
        triangle_share: f64,
        acc: &mut AccumulatorGrid,
        scratch: &mut OverlapScratch,
    ) {
        let footprint = [tri[0].cell, tri[1].cell, tri[2].cell];
        let (n_rows, n_cols) = acc.dim();

        let (illuminated, reference) = facet_areas(
            [tri[0].xyz, tri[1].xyz, tri[2].xyz],
            [tri[0].xyz_ellipsoid, tri[1].xyz_ellipsoid, tri[2].xyz_ellipsoid],
            tri[0].up,
            sensor,
            self.input_radiometry,
        );

        let OverlapScratch { columns, overlaps } = scratch;
        overlaps.clear();
        let total = triangle_cell_overlaps(&footprint, n_rows, n_cols, columns, |i, j, area| {
            overlaps.push((i, j, area));
        });
        if total == 0.0 {
            return;
        }

        // Terrain-corrected values must share the spatial weighting of the
        // illuminated area they are normalised by
        let bilinear = self.algorithm == RtcAlgorithm::BilinearDistribution;
        let values_follow_areas = self.apply_rtc && bilinear;

        let looks = triangle_share * self.radar_grid_nlooks;
        let value_weight = if self.apply_rtc { reference } else { total };
        for &(i, j, overlap) in overlaps.iter() {
            let fraction = overlap / total;
            acc.weight[[i, j]] += overlap;
            acc.nlooks[[i, j]] += fraction * looks;
            if !values_follow_areas {
                let w = fraction * value_weight;
                for (band, &value) in acc.values.iter_mut().zip(pixel_values) {
                    band[[i, j]] += value * w;
                }
            }
            if !bilinear {
                acc.ill_area[[i, j]] += fraction * illuminated;
                acc.ref_area[[i, j]] += fraction * reference;
            }
        }

        if bilinear {
            splat_bilinear(&footprint, n_rows, n_cols, |i, j, w| {
                acc.ill_area[[i, j]] += w * illuminated;
                acc.ref_area[[i, j]] += w * reference;
                if values_follow_areas {
                    for (band, &value) in acc.values.iter_mut().zip(pixel_values) {
                        band[[i, j]] += value * (w * reference);
                    }
                }
            });
        }
    }
}
