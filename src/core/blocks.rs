//! Memory-bounded block decomposition of geocoding grids

use crate::types::{SarError, SarResult};
use serde::{Deserialize, Serialize};

/// Block sizing limits and load-balancing target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSizeConfig {
    /// Smallest block footprint in bytes
    pub min_block_size: u64,
    /// Largest block footprint in bytes
    pub max_block_size: u64,
    /// Number of blocks each worker thread should receive
    pub blocks_per_thread: usize,
    /// Worker thread count; `None` uses the rayon pool size
    pub n_threads: Option<usize>,
}

impl Default for BlockSizeConfig {
    fn default() -> Self {
        Self {
            min_block_size: 1 << 18, // 256 KiB
            max_block_size: 1 << 30, // 1 GiB
            blocks_per_thread: 4,
            n_threads: None,
        }
    }
}

impl BlockSizeConfig {
    pub fn validate(&self) -> SarResult<()> {
        if self.min_block_size == 0 {
            return Err(SarError::InvalidParameter(
                "minimum block size must be positive".to_string(),
            ));
        }
        if self.min_block_size > self.max_block_size {
            return Err(SarError::InvalidParameter(format!(
                "minimum block size ({}) is greater than maximum block size ({})",
                nbytes_to_string(self.min_block_size),
                nbytes_to_string(self.max_block_size)
            )));
        }
        if self.blocks_per_thread == 0 {
            return Err(SarError::InvalidParameter(
                "blocks per thread must be at least 1".to_string(),
            ));
        }
        if self.n_threads == Some(0) {
            return Err(SarError::InvalidParameter(
                "number of threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.n_threads.unwrap_or_else(rayon::current_num_threads).max(1)
    }
}

/// Which grid extents drive block partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryMode {
    /// SINGLE_BLOCK when the problem fits `max_block_size`, BLOCKS_GEOGRID otherwise
    Auto,
    SingleBlock,
    /// Geogrid split in full-width strips; radar data read once and shared
    BlocksGeogrid,
    /// Geogrid split in both directions; radar and DEM windows read per block
    BlocksGeogridAndRadarGrid,
}

impl Default for MemoryMode {
    fn default() -> Self {
        MemoryMode::Auto
    }
}

impl std::fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MemoryMode::Auto => "AUTO",
            MemoryMode::SingleBlock => "SINGLE_BLOCK",
            MemoryMode::BlocksGeogrid => "BLOCKS_GEOGRID",
            MemoryMode::BlocksGeogridAndRadarGrid => "BLOCKS_GEOGRID_AND_RADARGRID",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for MemoryMode {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AUTO" => Ok(MemoryMode::Auto),
            "SINGLE_BLOCK" => Ok(MemoryMode::SingleBlock),
            "BLOCKS_GEOGRID" => Ok(MemoryMode::BlocksGeogrid),
            "BLOCKS_GEOGRID_AND_RADARGRID" => Ok(MemoryMode::BlocksGeogridAndRadarGrid),
            _ => Err(SarError::InvalidParameter(format!("Invalid memory mode: {}", s))),
        }
    }
}

/// Rectangular sub-region of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDescriptor {
    pub line_start: usize,
    pub length: usize,
    pub col_start: usize,
    pub width: usize,
    /// Oversampling factor applied when the block is processed
    pub upsampling: usize,
}

impl BlockDescriptor {
    pub fn full(length: usize, width: usize, upsampling: usize) -> Self {
        Self {
            line_start: 0,
            length,
            col_start: 0,
            width,
            upsampling,
        }
    }

    pub fn line_end(&self) -> usize {
        self.line_start + self.length
    }

    pub fn col_end(&self) -> usize {
        self.col_start + self.width
    }
}

/// Compute block dimensions (length, width) for an array
///
/// Each cell costs `nbands * type_size` output bytes per upsampled sample
/// plus `scratch_bytes` of accumulation arena held by the worker processing
/// the block. Width is chosen first (square-ish blocks when `tile_x`, full
/// width otherwise), then length fills the byte budget.
#[allow(clippy::too_many_arguments)]
pub fn get_block_size(
    array_length: usize,
    array_width: usize,
    nbands: usize,
    type_size: usize,
    scratch_bytes: usize,
    upsampling: usize,
    tile_x: bool,
    config: &BlockSizeConfig,
) -> SarResult<(usize, usize)> {
    config.validate()?;
    if array_length == 0 || array_width == 0 {
        return Err(SarError::InvalidParameter(format!(
            "cannot split empty array {}x{}",
            array_length, array_width
        )));
    }
    if nbands == 0 || type_size == 0 || upsampling == 0 {
        return Err(SarError::InvalidParameter(format!(
            "invalid block sizing inputs: nbands={}, type_size={}, upsampling={}",
            nbands, type_size, upsampling
        )));
    }

    let bytes_per_sample = cell_bytes(nbands, type_size, scratch_bytes, upsampling, 1);
    let total = array_length as u64 * array_width as u64 * bytes_per_sample;
    let n_jobs = (config.threads() * config.blocks_per_thread) as u64;
    let block_bytes = total
        .div_ceil(n_jobs)
        .clamp(config.min_block_size, config.max_block_size);
    let samples = (block_bytes / bytes_per_sample).max(1) as usize;

    let block_width = if tile_x {
        ((samples as f64).sqrt().floor() as usize).clamp(1, array_width)
    } else {
        array_width
    };
    let block_length = (samples / block_width).clamp(1, array_length);

    if block_width as u64 * bytes_per_sample > config.max_block_size {
        log::warn!(
            "A single line of {} samples ({}) exceeds the maximum block size ({})",
            block_width,
            nbytes_to_string(block_width as u64 * bytes_per_sample),
            nbytes_to_string(config.max_block_size)
        );
    }

    Ok((block_length, block_width))
}

/// Regular tiling of a grid into blocks; trailing blocks take the remainder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub grid_length: usize,
    pub grid_width: usize,
    pub block_length: usize,
    pub block_width: usize,
    pub upsampling: usize,
}

impl BlockLayout {
    pub fn single(grid_length: usize, grid_width: usize, upsampling: usize) -> Self {
        Self {
            grid_length,
            grid_width,
            block_length: grid_length,
            block_width: grid_width,
            upsampling,
        }
    }

    pub fn n_blocks_y(&self) -> usize {
        self.grid_length.div_ceil(self.block_length)
    }

    pub fn n_blocks_x(&self) -> usize {
        self.grid_width.div_ceil(self.block_width)
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks_y() * self.n_blocks_x()
    }

    /// Block `index` in row-major order
    pub fn block(&self, index: usize) -> BlockDescriptor {
        let by = index / self.n_blocks_x();
        let bx = index % self.n_blocks_x();
        let line_start = by * self.block_length;
        let col_start = bx * self.block_width;
        BlockDescriptor {
            line_start,
            length: self.block_length.min(self.grid_length - line_start),
            col_start,
            width: self.block_width.min(self.grid_width - col_start),
            upsampling: self.upsampling,
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockDescriptor> + '_ {
        (0..self.n_blocks()).map(move |i| self.block(i))
    }
}

/// Bytes held per grid cell by a block using `arenas` accumulation arenas
fn cell_bytes(nbands: usize, type_size: usize, scratch_bytes: usize, upsampling: usize, arenas: usize) -> u64 {
    (nbands * type_size * upsampling * upsampling + scratch_bytes * arenas) as u64
}

/// Accumulation arenas each block may hold when `blocks_in_wave` blocks run
/// at once, so that no more than one arena per worker thread is alive
pub fn arenas_per_block(threads: usize, blocks_in_wave: usize) -> usize {
    (threads / blocks_in_wave.max(1)).max(1)
}

/// Resolve AUTO against the estimated problem size in bytes
pub fn resolve_memory_mode(mode: MemoryMode, total_bytes: u64, config: &BlockSizeConfig) -> MemoryMode {
    match mode {
        MemoryMode::Auto if total_bytes <= config.max_block_size => MemoryMode::SingleBlock,
        MemoryMode::Auto => MemoryMode::BlocksGeogrid,
        other => other,
    }
}

/// Partition a geogrid of `length` x `width` cells according to `mode`
///
/// `scratch_bytes` is the per-cell size of one accumulation arena (zero when
/// the processing keeps none). A single block runs with one arena per worker
/// thread; tiled blocks run one per thread with one arena each.
#[allow(clippy::too_many_arguments)]
pub fn plan_blocks(
    mode: MemoryMode,
    length: usize,
    width: usize,
    nbands: usize,
    type_size: usize,
    scratch_bytes: usize,
    upsampling: usize,
    config: &BlockSizeConfig,
) -> SarResult<(MemoryMode, BlockLayout)> {
    config.validate()?;
    let single_bytes = length as u64
        * width as u64
        * cell_bytes(nbands.max(1), type_size, scratch_bytes, upsampling, config.threads());
    let mode = resolve_memory_mode(mode, single_bytes, config);

    let layout = match mode {
        MemoryMode::SingleBlock | MemoryMode::Auto => {
            if length == 0 || width == 0 || upsampling == 0 {
                return Err(SarError::InvalidParameter(format!(
                    "invalid grid {}x{} with upsampling {}",
                    length, width, upsampling
                )));
            }
            BlockLayout::single(length, width, upsampling)
        }
        MemoryMode::BlocksGeogrid | MemoryMode::BlocksGeogridAndRadarGrid => {
            let tile_x = mode == MemoryMode::BlocksGeogridAndRadarGrid;
            let (block_length, block_width) = get_block_size(
                length,
                width,
                nbands,
                type_size,
                scratch_bytes,
                upsampling,
                tile_x,
                config,
            )?;
            BlockLayout {
                grid_length: length,
                grid_width: width,
                block_length,
                block_width,
                upsampling,
            }
        }
    };

    log::info!(
        "Memory mode {}: {} block(s) of up to {}x{} ({} total)",
        mode,
        layout.n_blocks(),
        layout.block_length,
        layout.block_width,
        nbytes_to_string(single_bytes)
    );
    Ok((mode, layout))
}

/// Human readable byte count
pub fn nbytes_to_string(nbytes: u64) -> String {
    const KB: f64 = 1024.0;
    let n = nbytes as f64;
    if n < KB {
        format!("{} B", nbytes)
    } else if n < KB * KB {
        format!("{:.2} KB", n / KB)
    } else if n < KB * KB * KB {
        format!("{:.2} MB", n / (KB * KB))
    } else {
        format!("{:.2} GB", n / (KB * KB * KB))
    }
}
