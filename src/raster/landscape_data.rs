//! 入力ラスタ群の集約とランドスケープ解像度の量子化

use std::fmt;
use std::path::Path;

use tracing::{error, info};

use super::file::{has_extension, RasterFile, TempFiles};
use super::RasterData;
use crate::config::ImportOptions;
use crate::crs::CoordinateReferenceSystem;
use crate::error::{LandscapeError, Result};
use crate::extents::{Extents, Point, Resolution};
use crate::info::LandscapingInfos;

const QUADS_PER_SECTION: [usize; 7] = [15, 31, 63, 127, 255, 511, 1023];
const SECTIONS_PER_COMPONENT: [usize; 2] = [1, 2];
const MAX_COMPONENTS: usize = 255;

/// Quantized terrain grid layout for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandscapeLayout {
    pub quads_per_section: usize,
    pub number_of_sections: usize,
    pub components: Resolution,
    pub resolution: Resolution,
}

/// Smallest `quads * sections * components + 1` covering `import` on both axes.
pub fn landscape_layout_for(import: Resolution) -> LandscapeLayout {
    let mut quads = QUADS_PER_SECTION[0];
    let mut sections = SECTIONS_PER_COMPONENT[0];
    let mut components = Resolution::new(1, 1);

    'quads: for &q in &QUADS_PER_SECTION {
        let limit = (q + 1).min(MAX_COMPONENTS);
        let mut found = false;
        for &s in &SECTIONS_PER_COMPONENT {
            let fits = |size: usize| (1..=limit).find(|c| q * s * c + 1 >= size);
            let cx = fits(import.x);
            let cy = fits(import.y);
            quads = q;
            sections = s;
            components = Resolution::new(cx.unwrap_or(limit), cy.unwrap_or(limit));
            found = cx.is_some() && cy.is_some();
            // セクション 1 で収まらない場合、2 は次のクアッド数で試す
            if !found && q < limit {
                break;
            }
        }
        if found {
            break 'quads;
        }
    }

    LandscapeLayout {
        quads_per_section: quads,
        number_of_sections: sections,
        components,
        resolution: Resolution::new(
            quads * sections * components.x + 1,
            quads * sections * components.y + 1,
        ),
    }
}

/// Everything a file read needs from the session, shareable across threads.
pub struct ReadContext<'a> {
    pub infos: &'a LandscapingInfos,
    pub options: &'a ImportOptions,
    pub working_dir: &'a Path,
    pub temp_files: &'a TempFiles,
}

/// Aggregate of the raster descriptors read or merged for one import.
#[derive(Debug, Clone)]
pub struct RasterLandscapeData {
    pub raster_datas: Vec<RasterData>,
    pub meter_per_pixel: Point,
    pub tile_size: Resolution,
    pub number_tiles_x: usize,
    pub number_tiles_y: usize,
    pub extents: Extents,
    pub min_altitude: f64,
    pub max_altitude: f64,
}

impl Default for RasterLandscapeData {
    fn default() -> Self {
        Self {
            raster_datas: Vec::new(),
            meter_per_pixel: Point::ZERO,
            tile_size: Resolution::default(),
            number_tiles_x: 1,
            number_tiles_y: 1,
            extents: Extents::default(),
            min_altitude: 65535.0,
            max_altitude: -65535.0,
        }
    }
}

impl fmt::Display for RasterLandscapeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TileSize: {} - Meter Per Pixel: {} - Extents: {} Number of Tiles: {} {} - Altitude: {} to {}",
            self.tile_size,
            self.meter_per_pixel,
            self.extents,
            self.number_tiles_x,
            self.number_tiles_y,
            self.min_altitude,
            self.max_altitude
        )
    }
}

impl RasterLandscapeData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_datas(raster_datas: Vec<RasterData>) -> Self {
        Self {
            raster_datas,
            ..Self::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Folds extents, finest pixel size and altitude range of every descriptor
    /// into the aggregate. A zero aggregate field counts as unset.
    pub fn update_landscape_data(&mut self) {
        let mut extents = self.extents;
        let mut mpp = self.meter_per_pixel;
        let mut min_altitude = self.min_altitude;
        let mut max_altitude = self.max_altitude;

        for data in &self.raster_datas {
            if extents.left == 0.0 || data.extents.left < extents.left {
                extents.left = data.extents.left;
            }
            if extents.right == 0.0 || data.extents.right > extents.right {
                extents.right = data.extents.right;
            }
            if extents.top == 0.0 || data.extents.top > extents.top {
                extents.top = data.extents.top;
            }
            if extents.bottom == 0.0 || data.extents.bottom < extents.bottom {
                extents.bottom = data.extents.bottom;
            }
            if mpp.x == 0.0 || data.meter_per_pixel.x < mpp.x {
                mpp.x = data.meter_per_pixel.x;
            }
            // 符号は保持したまま絶対値が小さい方
            if mpp.y == 0.0 || data.meter_per_pixel.y.abs() < mpp.y.abs() {
                mpp.y = data.meter_per_pixel.y;
            }
            min_altitude = min_altitude.min(data.min_altitude);
            max_altitude = max_altitude.max(data.max_altitude);
        }

        self.extents = extents;
        self.meter_per_pixel = mpp;
        self.min_altitude = min_altitude;
        self.max_altitude = max_altitude;
    }

    /// Replaces every descriptor with one carrying its quantized landscape layout.
    pub fn calculate_landscape_resolution(&mut self) -> Result<()> {
        if self.raster_datas.is_empty() {
            error!("No RasterData for Landscape with extents {}", self.extents);
            return Err(LandscapeError::Consistency(
                "No RasterData to calculate the landscape resolution".to_string(),
            ));
        }
        self.raster_datas = std::mem::take(&mut self.raster_datas)
            .into_iter()
            .map(|data| {
                let layout = landscape_layout_for(data.import_resolution);
                data.with_landscape_layout(
                    layout.quads_per_section,
                    layout.number_of_sections,
                    layout.resolution,
                )
            })
            .collect();
        Ok(())
    }

    /// Pixel size used for tiling: native or `custom_raster_pixel_size`.
    /// Y is positive unless `preserve_sign`.
    pub fn raster_pixel_size(&self, options: &ImportOptions, preserve_sign: bool) -> Point {
        let y = if preserve_sign {
            self.meter_per_pixel.y
        } else {
            self.meter_per_pixel.y.abs()
        };
        let sign = if preserve_sign {
            if self.meter_per_pixel.y < 0.0 {
                -1.0
            } else {
                1.0
            }
        } else {
            1.0
        };
        if options.native_raster_pixel_size {
            Point::new(self.meter_per_pixel.x, y)
        } else {
            Point::new(
                options.custom_raster_pixel_size,
                options.custom_raster_pixel_size * sign,
            )
        }
    }

    /// Reads `path` and appends its descriptor, unless the file is skipped.
    pub fn add_raster_data(&mut self, path: &str, tile_index: usize, ctx: &ReadContext<'_>) {
        if let Some(data) = Self::load_raster_data(path, tile_index, ctx) {
            self.raster_datas.push(data);
        }
    }

    /// Descriptor for `path` in the level CRS, warping when needed.
    ///
    /// `None` means a colour raster outside the target tile, which is skipped
    /// without error. Failures come back as a descriptor carrying only `error`.
    pub fn load_raster_data(path: &str, tile_index: usize, ctx: &ReadContext<'_>) -> Option<RasterData> {
        let crs = ctx.infos.crs();
        let file = match RasterFile::open_read_only(path) {
            Ok(file) => file,
            Err(e) => return Some(RasterData::failed(format!("{:#}", e))),
        };
        let projection = file.projection();
        let epsg = CoordinateReferenceSystem::find_authority_id(&projection).unwrap_or(0);
        if epsg == 0 && !has_extension(path, "asc") {
            return Some(RasterData::failed(format!("No projection info for file {}", path)));
        }

        // 衛星画像は対象タイルと重ならなければ読み込まない
        if file.band_count() >= 3 {
            if ctx.infos.tiles.is_empty() {
                return Some(RasterData::failed(format!(
                    "Multi-band raster detected. Please use only single-band raster for heightmap import {}",
                    path
                )));
            }
            let Some(tile) = ctx.infos.tiles.get(tile_index) else {
                return Some(RasterData::failed(format!(
                    "Invalid tile index {} for file {}",
                    tile_index, path
                )));
            };
            let file_extents = file.extents();
            let overlapping = if crs.is_same_as_level_crs(&projection) {
                file_extents.is_overlapping(&tile.extents)
            } else {
                match (
                    crs.convert_to_geog_cs_from(&file_extents, &projection),
                    crs.convert_to_geog_cs(&tile.extents),
                ) {
                    (Ok(file_geog), Ok(tile_geog)) => file_geog.is_overlapping(&tile_geog),
                    // 比較できない場合は読み込む
                    _ => true,
                }
            };
            if !overlapping {
                info!("Skipping {} - outside of tile {}", path, tile_index);
                return None;
            }
        }

        if crs.is_same_as_level_crs(&projection) {
            return Some(Self::get_raster_data(&file, path, path, crs));
        }

        let warped_path = ctx.temp_files.unique_path(
            path,
            ctx.working_dir,
            ctx.options.use_in_memory_files,
            "tif",
        );
        let warped = file
            .warp(&warped_path, crs.wkt(), ctx.options.resample_algorithm.to_gdal())
            .and_then(|_| RasterFile::open_read_only(&warped_path));
        match warped {
            Ok(warped) => Some(Self::get_raster_data(&warped, path, &warped_path, crs)),
            Err(e) => {
                error!("{:#}", e);
                Some(RasterData::failed(format!(
                    "Could not reproject from EPSG:{} to EPSG:{} on file {}",
                    epsg,
                    crs.authority_id(),
                    path
                )))
            }
        }
    }

    /// Metadata of an opened raster that must already be in the level CRS.
    pub fn get_raster_data(
        file: &RasterFile,
        original_filename: &str,
        actual_filename: &str,
        crs: &CoordinateReferenceSystem,
    ) -> RasterData {
        let projection = file.projection();
        let epsg = CoordinateReferenceSystem::find_authority_id(&projection).unwrap_or(0);
        if !crs.is_same_as_level_crs(&projection) && epsg != crs.authority_id() {
            return RasterData::failed(format!(
                "Authority ID of {} does not match: EPSG:{} - It should be EPSG:{}",
                actual_filename,
                epsg,
                crs.authority_id()
            ));
        }

        let (rows, cols, bands) = file.dimensions();
        let data = RasterData {
            projection: format!("EPSG:{}", epsg),
            projection_wkt: projection,
            filename: actual_filename.to_string(),
            original_filename: original_filename.to_string(),
            extents: file.extents(),
            meter_per_pixel: file.meter_per_pixel(),
            import_resolution: Resolution::new(cols, rows),
            band_count: bands,
            ..Default::default()
        };

        match file.min_and_max_altitude(1) {
            Ok((min_altitude, max_altitude)) => RasterData {
                min_altitude,
                max_altitude,
                no_data_value: file.no_data_value(),
                ..data
            },
            Err(e) => data.with_error(e.to_string()),
        }
    }
}
