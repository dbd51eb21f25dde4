pub mod file;
pub mod heightmap;
pub mod landscape_data;
pub mod resample;
pub mod tile_factory;
pub mod writer;

use std::fmt;

use crate::extents::{Extents, Point, Resolution};

pub use file::RasterFile;
pub use landscape_data::RasterLandscapeData;
pub use tile_factory::RasterTileFactory;
pub use writer::HeightmapWriter;

/// Row-major 2D buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Grid<T> {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); width * height],
        }
    }

    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }
}

impl<T: Copy> Grid<T> {
    /// `None` if `data` does not hold exactly `width * height` values.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        if data.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[y * self.width + x] = value;
    }

    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies the `width x height` window starting at (`x0`, `y0`).
    pub fn sub_grid(&self, x0: usize, y0: usize, width: usize, height: usize) -> Grid<T> {
        let mut data = Vec::with_capacity(width * height);
        for y in y0..y0 + height {
            data.extend_from_slice(&self.row(y)[x0..x0 + width]);
        }
        Grid {
            width,
            height,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// One sub-tile of a satellite image for a landscape tile.
#[derive(Debug, Clone)]
pub struct ColorData {
    pub data: Grid<Color>,
    pub base_filename: String,
    pub number_tiles_x: usize,
    pub number_tiles_y: usize,
}

/// Texture grids produced for one landscape tile.
#[derive(Debug, Clone, Default)]
pub struct TileConfig {
    pub number_tiles_x: usize,
    pub number_tiles_y: usize,
    pub textures: Vec<Grid<Color>>,
}

/// Metadata of one raster source or synthesized tile, with optional pixels.
#[derive(Debug, Clone)]
pub struct RasterData {
    pub min_altitude: f64,
    pub max_altitude: f64,
    pub extents: Extents,
    pub number_of_sections: usize,
    pub quads_per_section: usize,
    pub import_resolution: Resolution,
    pub landscape_resolution: Resolution,
    /// Y is negative for north-up rasters.
    pub meter_per_pixel: Point,
    pub filename: String,
    pub original_filename: String,
    /// `EPSG:<code>`
    pub projection: String,
    pub projection_wkt: String,
    pub height_data: Option<Grid<f64>>,
    pub color_data: Option<Grid<Color>>,
    pub no_data_value: f64,
    pub error: Option<String>,
    pub band_count: usize,
}

impl Default for RasterData {
    fn default() -> Self {
        Self {
            min_altitude: 65535.0,
            max_altitude: -65535.0,
            extents: Extents::default(),
            number_of_sections: 0,
            quads_per_section: 0,
            import_resolution: Resolution::default(),
            landscape_resolution: Resolution::default(),
            meter_per_pixel: Point::ZERO,
            filename: String::new(),
            original_filename: String::new(),
            projection: String::new(),
            projection_wkt: String::new(),
            height_data: None,
            color_data: None,
            no_data_value: 0.0,
            error: None,
            band_count: 1,
        }
    }
}

impl RasterData {
    /// A descriptor carrying only an error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Touching extents count as overlap.
    pub fn is_overlapping(&self, other: &RasterData) -> bool {
        self.extents.is_overlapping(&other.extents)
    }

    pub fn with_error(self, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..self
        }
    }

    pub fn with_height_data(self, grid: Grid<f64>) -> Self {
        Self {
            height_data: Some(grid),
            ..self
        }
    }

    pub fn with_landscape_layout(
        self,
        quads_per_section: usize,
        number_of_sections: usize,
        landscape_resolution: Resolution,
    ) -> Self {
        Self {
            quads_per_section,
            number_of_sections,
            landscape_resolution,
            ..self
        }
    }
}

impl fmt::Display for RasterData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Extents: {} - {} - Import Res: {} - Landscape Res: {} - Meter Per Pixel: {} - Altitude: {} to {} - BandCount: {} - {}",
            self.extents,
            self.projection,
            self.import_resolution,
            self.landscape_resolution,
            self.meter_per_pixel,
            self.min_altitude,
            self.max_altitude,
            self.band_count,
            self.filename
        )
    }
}
