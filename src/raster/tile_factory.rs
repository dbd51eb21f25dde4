//! インポートセッション全体の制御: 読み込み、タイル計画、マージ、正規化、衛星画像

use std::ffi::CString;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::ptr;

use anyhow::Context;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use super::file::{RasterFile, TempFiles};
use super::heightmap::{height_window, normalize, smooth};
use super::landscape_data::{RasterLandscapeData, ReadContext};
use super::resample::resize_colors;
use super::{ColorData, Grid, RasterData, TileConfig};
use crate::config::{ImportOptions, ProjectionMode};
use crate::crs::CoordinateReferenceSystem;
use crate::error::{LandscapeError, Result};
use crate::extents::{Extents, Point, Resolution};
use crate::info::{Bounds, LandscapingInfo, LandscapingInfos};

// 往復変換の比較桁数
fn extents_key(e: &Extents) -> String {
    format!("{:.6},{:.6},{:.6},{:.6}", e.bottom, e.left, e.top, e.right)
}

/// One square tile layout accepted by tiled heightmap import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileImportConfiguration {
    pub num_components: usize,
    pub num_sections_per_component: usize,
    pub num_quads_per_section: usize,
    pub size: usize,
}

/// All layouts of up to 32 components, sorted by size then component count.
pub fn square_configurations() -> Vec<TileImportConfiguration> {
    let mut configs = Vec::new();
    for num_components in 1..=32 {
        for num_sections_per_component in 1..=2 {
            for quads_exp in 3..=8 {
                let num_quads_per_section = (1usize << quads_exp) - 1;
                configs.push(TileImportConfiguration {
                    num_components,
                    num_sections_per_component,
                    num_quads_per_section,
                    size: num_components * num_sections_per_component * num_quads_per_section + 1,
                });
            }
        }
    }
    configs.sort_by(|a, b| a.size.cmp(&b.size).then(a.num_components.cmp(&b.num_components)));
    configs
}

/// PROJ と GDAL のプロセス全体の設定。アダプタを作る前に一度だけ呼ぶ
fn configure_gdal(options: &ImportOptions) {
    if options.proj_search_paths.is_empty() {
        debug!("No PROJ search paths given - using the PROJ defaults");
    } else {
        let paths: Vec<CString> = options
            .proj_search_paths
            .iter()
            .filter_map(|p| CString::new(p.to_string_lossy().as_bytes()).ok())
            .collect();
        let mut ptrs: Vec<*const c_char> = paths.iter().map(|p| p.as_ptr()).collect();
        ptrs.push(ptr::null());
        unsafe { gdal_sys::OSRSetPROJSearchPaths(ptrs.as_ptr()) };
        info!("PROJ search paths: {:?}", options.proj_search_paths);
    }
    if let Err(e) = gdal::config::set_config_option("GDAL_DISABLE_READDIR_ON_OPEN", "TRUE") {
        warn!("Failed to set GDAL_DISABLE_READDIR_ON_OPEN: {}", e);
    }
    match &options.gdal_data_path {
        Some(path) => {
            if let Err(e) = gdal::config::set_config_option("GDAL_DATA", &path.to_string_lossy()) {
                error!("Failed to set GDAL_DATA: {}", e);
            }
        }
        None => debug!("No gdal-data path given - OSM file types might not be supported"),
    }
}

pub struct RasterTileFactory {
    options: ImportOptions,
    working_dir: PathBuf,
    landscape_datas: Vec<RasterLandscapeData>,
    temp_files: TempFiles,
}

impl RasterTileFactory {
    pub fn new(options: ImportOptions) -> Self {
        configure_gdal(&options);
        Self {
            options,
            working_dir: std::env::temp_dir(),
            landscape_datas: Vec::new(),
            temp_files: TempFiles::new(),
        }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn set_working_dir(&mut self, working_dir: impl Into<PathBuf>) {
        self.working_dir = working_dir.into();
        info!("Set Working Directory to {}", self.working_dir.display());
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn temp_files(&self) -> &TempFiles {
        &self.temp_files
    }

    pub fn landscape_datas(&self) -> &[RasterLandscapeData] {
        &self.landscape_datas
    }

    /// Reads every file into one batch and returns the per-file errors.
    ///
    /// On the first import this also chooses the level CRS. A single-band
    /// batch sets the level extents and the geographic cropped extents.
    pub fn read_files(&mut self, files: &[String], tile_index: usize, infos: &mut LandscapingInfos) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(first_file) = files.first() else {
            errors.push("No Files to read from".to_string());
            return errors;
        };
        if infos.tiles.is_empty() {
            if let Err(e) = self.fetch_authority_id(first_file, infos) {
                error!("Fetch Authority ID: {}", e);
                errors.push(format!(
                    "File {} does not contain valid GIS information or could not be projected to desired CRS",
                    first_file
                ));
                return errors;
            }
        }

        self.landscape_datas.clear();
        let ctx = ReadContext {
            infos: &*infos,
            options: &self.options,
            working_dir: &self.working_dir,
            temp_files: &self.temp_files,
        };
        let datas: Vec<RasterData> = if self.options.read_parallel && files.len() > 1 {
            files
                .par_iter()
                .filter_map(|file| RasterLandscapeData::load_raster_data(file, tile_index, &ctx))
                .collect()
        } else {
            files
                .iter()
                .filter_map(|file| {
                    info!("Read file {}", file);
                    RasterLandscapeData::load_raster_data(file, tile_index, &ctx)
                })
                .collect()
        };
        let mut landscape_data = RasterLandscapeData::from_datas(datas);

        errors.extend(landscape_data.raster_datas.iter().filter_map(|d| d.error.clone()));
        if !errors.is_empty() {
            for e in &errors {
                error!("{}", e);
            }
            return errors;
        }

        // 高さデータ (1 バンド) の場合のみ範囲を更新する
        let is_height_data = landscape_data
            .raster_datas
            .first()
            .map(|d| d.band_count == 1)
            .unwrap_or(false);
        if is_height_data {
            landscape_data.update_landscape_data();
            let crs = infos.crs();
            match crs.convert_to_geog_cs(&landscape_data.extents) {
                Ok(geog) => {
                    info!("LandscapeData.Extents: {} - CroppedExtentsGeogCS: {}", landscape_data.extents, geog);
                    let reversible = crs
                        .convert_from_geog_cs(&geog)
                        .map(|proj| extents_key(&proj) == extents_key(&landscape_data.extents))
                        .unwrap_or(false);
                    if !reversible {
                        warn!(
                            "Something is wrong with the spatial reference of file {}. Projection is not reversable.",
                            first_file
                        );
                        errors.push(
                            "Settings do not fit the input file - is the file unit 'meter'?\nIf it shows 'CRS not set', please use projection mode 'auto-utm' or a custom CRS".to_string(),
                        );
                    }
                    infos.set_cropped_extents(geog);
                }
                Err(e) => {
                    warn!("Could not convert extents {} to geographic CS: {}", landscape_data.extents, e);
                    errors.push(format!(
                        "Settings do not fit the input file - extents of {} cannot be converted to geographic coordinates",
                        first_file
                    ));
                }
            }
            infos.extents = landscape_data.extents;
        }
        self.landscape_datas.push(landscape_data);
        errors
    }

    /// Chooses the level authority for the first import according to the projection mode.
    pub fn fetch_authority_id(&self, file: &str, infos: &mut LandscapingInfos) -> Result<()> {
        info!("Fetch AuthorityID with file {}", file);
        let crs = infos.crs_mut();
        if crs.is_authority_id_valid() {
            info!("Already got a valid Authority ID EPSG:{}", crs.authority_id());
            return Ok(());
        }
        if crs.projection_mode() == ProjectionMode::CustomCrs {
            crs.set_authority_id(self.options.target_epsg, "")?;
            info!("Mode Custom CRS -> Authority ID EPSG:{}", crs.authority_id());
            return Ok(());
        }

        let raster = RasterFile::open_read_only(file)?;
        let projection = raster.projection();
        let epsg = CoordinateReferenceSystem::find_authority_id(&projection).unwrap_or(0);
        info!("Authority of {} is EPSG:{}", file, epsg);
        if !CoordinateReferenceSystem::is_epsg_valid(epsg) {
            return Err(LandscapeError::InvalidInput(format!(
                "No projection info or invalid info for file {} \nIf you are trying to import ASCII, make sure to provide a corresponding .prj file with projection info in the same folder or set a custom CRS.",
                file
            )));
        }

        match crs.projection_mode() {
            ProjectionMode::UseSourceCrs => {
                crs.set_authority_id(epsg, &projection)?;
                info!("Mode Use Source CRS -> Authority ID EPSG:{}", crs.authority_id());
            }
            _ => {
                let gt = raster.geo_transform();
                let geog = crs.convert_point_to_geog_cs(gt[0], gt[3], &projection, "", false)?;
                info!("GeogCSPoint: {}", geog);
                let utm = CoordinateReferenceSystem::utm_authority_id(geog.x, geog.y);
                crs.set_authority_id(utm, "")?;
                info!("Mode Auto Reproject to UTM -> Authority ID EPSG:{}", crs.authority_id());
            }
        }
        Ok(())
    }

    /// Writes downloaded slippy-map tiles as GeoTIFFs in EPSG:3857.
    ///
    /// Returns the colour tile files, or for height tiles the single merged file.
    pub fn write_files(&self, datas: Vec<RasterData>, infos: &LandscapingInfos) -> Result<Vec<String>> {
        info!("Write {} Files", datas.len());
        let mut out_filenames = Vec::new();
        let Some(band_count) = datas.first().map(|d| d.band_count) else {
            error!("No Data to write");
            return Ok(out_filenames);
        };
        let crs = infos.crs();

        let datas = datas
            .into_iter()
            .map(|data| {
                let extents = crs.convert_from_to(&data.extents, "EPSG:4326", "EPSG:3857")?;
                let meter_per_pixel = Point::new(
                    (extents.right - extents.left).abs() / data.import_resolution.x.max(1) as f64,
                    (extents.bottom - extents.top) / data.import_resolution.y.max(1) as f64,
                );
                Ok(RasterData {
                    projection: "EPSG:3857".to_string(),
                    projection_wkt: String::new(),
                    extents,
                    meter_per_pixel,
                    ..data
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut cached = 0;
        for data in &datas {
            if band_count == 3 {
                out_filenames.push(data.filename.clone());
            }
            if Path::new(&data.filename).exists() {
                cached += 1;
                continue;
            }
            if !data.filename.is_empty() {
                if let Err(e) = RasterFile::create(data) {
                    error!("{:#}", e);
                }
            }
        }
        info!("Wrote {} files (found {} in cache)", datas.len() - cached, cached);

        if band_count == 1 {
            let mut lefts: Vec<f64> = Vec::new();
            let mut tops: Vec<f64> = Vec::new();
            for data in &datas {
                if !lefts.contains(&data.extents.left) {
                    lefts.push(data.extents.left);
                }
                if !tops.contains(&data.extents.top) {
                    tops.push(data.extents.top);
                }
            }
            let left = lefts.iter().copied().fold(f64::INFINITY, f64::min);
            let top = tops.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let first = &datas[0];
            let merged = RasterData {
                import_resolution: Resolution::new(
                    first.import_resolution.x * lefts.len(),
                    first.import_resolution.y * tops.len(),
                ),
                filename: self.temp_files.unique_path("Mapbox", &self.working_dir, false, "tif"),
                band_count: first.band_count,
                extents: Extents::new(0.0, left, top, 0.0),
                meter_per_pixel: first.meter_per_pixel,
                projection: first.projection.clone(),
                ..Default::default()
            };
            let mut mosaicked = RasterFile::create(&merged)?;
            for data in &datas {
                let source = RasterFile::open_read_only(&data.filename)?;
                if let Err(e) = source.mosaic(
                    &mut mosaicked,
                    &data.projection,
                    self.options.resample_algorithm.to_gdal(),
                    self.options.resample_memory_bytes(),
                ) {
                    error!("{:#}", e);
                }
            }
            out_filenames.push(merged.filename);
        }
        Ok(out_filenames)
    }

    /// Plans the tile grid and merges every batch into tiles, appending them to `infos`.
    pub fn prepare_import(&mut self, infos: &mut LandscapingInfos) -> Result<()> {
        let cropped = infos.cropped_extents();
        if !cropped.is_empty() {
            let first_wkt = self
                .landscape_datas
                .first()
                .and_then(|l| l.raster_datas.first())
                .map(|d| d.projection_wkt.clone());
            if let Some(wkt) = first_wkt {
                info!("Crop extents: {}", cropped);
                infos.extents = infos.crs().convert_from_geog_cs_to(&cropped, &wkt)?;
            }
        }
        if infos.tiles.is_empty() {
            let origin = Point::new(infos.extents.left, infos.extents.top);
            infos.set_origin(origin);
        }

        for index in 0..self.landscape_datas.len() {
            let mut data = std::mem::take(&mut self.landscape_datas[index]);
            if !cropped.is_empty() {
                data.extents.left = data.extents.left.max(infos.extents.left);
                data.extents.top = data.extents.top.min(infos.extents.top);
                data.extents.right = data.extents.right.min(infos.extents.right);
                data.extents.bottom = data.extents.bottom.max(infos.extents.bottom);
            }
            self.plan_tiles(&mut data, infos)?;

            let pixel_count = data.tile_size.x as u64 * data.tile_size.y as u64;
            if pixel_count > i32::MAX as u64 || (self.options.import_as_mesh && pixel_count * 6 > i32::MAX as u64) {
                error!("Exceeding size limit for Array - please set the desired max tile size to a lower value or disable resample to first tile. Aborting.");
                return Err(LandscapeError::Resource("Tile size too big - cannot import.".to_string()));
            }

            let merged = self.merge_overlapping(data, infos);
            if merged.raster_datas.is_empty() {
                return Err(LandscapeError::Consistency("No valid data found".to_string()));
            }
            self.landscape_datas[index] = merged;
            self.refresh_landscaping_infos(index, infos)?;
        }
        Ok(())
    }

    // タイル数とタイルサイズ (頂点数) を決める
    fn plan_tiles(&self, data: &mut RasterLandscapeData, infos: &LandscapingInfos) -> Result<()> {
        let total_x = data.extents.width();
        let total_y = data.extents.height();

        if let Some(first) = infos.tiles.first() {
            if self.options.resample_to_first_tile {
                data.tile_size = first.import_resolution;
                data.meter_per_pixel = Point::new(first.meter_per_pixel_x, first.meter_per_pixel_y);
            } else {
                let px = data.raster_pixel_size(&self.options, false);
                if px.x == 0.0 || px.y == 0.0 {
                    return Err(LandscapeError::InvalidInput(format!("Invalid raster pixel size {}", px)));
                }
                data.tile_size = Resolution::new(
                    (first.import_resolution.x as f64 * first.meter_per_pixel_x / px.x).ceil() as usize,
                    (first.import_resolution.y as f64 * first.meter_per_pixel_y.abs() / px.y).ceil() as usize,
                );
            }
            let px = data.raster_pixel_size(&self.options, false);
            if px.x == 0.0 || px.y == 0.0 || data.tile_size.is_zero() {
                return Err(LandscapeError::InvalidInput(format!("Invalid raster pixel size {}", px)));
            }
            data.number_tiles_x = (total_x / (data.tile_size.x as f64 * px.x)).ceil().max(1.0) as usize;
            data.number_tiles_y = (total_y / (data.tile_size.y as f64 * px.y)).ceil().max(1.0) as usize;
        } else {
            let px = data.raster_pixel_size(&self.options, false);
            if px.x == 0.0 || px.y == 0.0 {
                return Err(LandscapeError::InvalidInput(format!("Invalid raster pixel size {}", px)));
            }
            let max_size = self.options.desired_max_tile_size.max(1) as f64;
            // 隣接タイルは境界の 1 列を共有する
            let quad_x = (total_x - px.x.abs()).max(0.0);
            let quad_y = (total_y - px.y.abs()).max(0.0);
            while quad_x / data.number_tiles_x as f64 > max_size {
                data.number_tiles_x *= 2;
            }
            while quad_y / data.number_tiles_y as f64 > max_size {
                data.number_tiles_y *= 2;
            }
            let vertices = |quad: f64, n: usize, px: f64| (quad / n as f64 / px - 1e-6).ceil().max(0.0) as usize + 1;
            data.tile_size.x = vertices(quad_x, data.number_tiles_x, px.x);
            if self.options.square_tiles {
                if let Some(config) = square_configurations()
                    .into_iter()
                    .find(|c| c.size >= data.tile_size.x)
                {
                    data.tile_size.x = config.size;
                }
                data.tile_size.y = data.tile_size.x;
            } else {
                data.tile_size.y = vertices(quad_y, data.number_tiles_y, px.y);
            }
            info!(
                "TotalWidthXInMeters: {}, TotalWidthYInMeters: {}, TileSize: {}, Number Of Tiles: {}, {}",
                total_x, total_y, data.tile_size, data.number_tiles_x, data.number_tiles_y
            );
        }
        info!(
            "TileSize: {} Number of Tiles X={} Y={}, PixelSize: {}",
            data.tile_size,
            data.number_tiles_x,
            data.number_tiles_y,
            data.raster_pixel_size(&self.options, false)
        );
        Ok(())
    }

    fn create_blank_tile(
        &self,
        data: &RasterLandscapeData,
        x: usize,
        y: usize,
        tiles_left: f64,
        tiles_top: f64,
        crs: &CoordinateReferenceSystem,
    ) -> RasterData {
        let px = data.raster_pixel_size(&self.options, false);
        let signed = data.raster_pixel_size(&self.options, true);
        let left = tiles_left + x as f64 * ((data.tile_size.x as f64 - 1.0) * px.x);
        let top = tiles_top + y as f64 * ((data.tile_size.y as f64 - 1.0) * signed.y);
        let filename = self.temp_files.unique_path(
            &format!("Tile_x{}_y{}", x, y),
            &self.working_dir,
            self.options.use_in_memory_files,
            "tif",
        );
        let descriptor = RasterData {
            extents: Extents::new(
                top + signed.y * data.tile_size.y as f64,
                left,
                top,
                left + px.x * data.tile_size.x as f64,
            ),
            meter_per_pixel: signed,
            import_resolution: data.tile_size,
            band_count: data.raster_datas.first().map(|d| d.band_count).unwrap_or(1),
            projection: crs.authority_id_str(),
            projection_wkt: crs.wkt().to_string(),
            no_data_value: 0.0,
            filename: filename.clone(),
            ..Default::default()
        };
        match RasterFile::create(&descriptor) {
            Ok(file) => {
                let blank = RasterLandscapeData::get_raster_data(&file, &filename, &filename, crs);
                if blank.is_ok() {
                    return blank;
                }
                debug!("Blank tile {}: {:?}", filename, blank.error);
            }
            Err(e) => debug!("Blank tile {}: {:#}", filename, e),
        }
        descriptor.with_error(format!("Raster file creation error {}", filename))
    }

    // 空タイルを作り、粗い解像度から順にモザイクする
    fn merge_overlapping(&self, mut data: RasterLandscapeData, infos: &LandscapingInfos) -> RasterLandscapeData {
        let crs = infos.crs();
        let mut tiles_left = data.extents.left;
        let mut tiles_top = data.extents.top;

        if let Some(first) = infos.tiles.first() {
            data.tile_size = first.import_resolution;
            data.meter_per_pixel = Point::new(first.meter_per_pixel_x, first.meter_per_pixel_y);
            match crs.convert_from_geog_cs(&infos.cropped_extents()) {
                Ok(cropped) => {
                    let shift_left = ((first.import_resolution.x as f64 - 1.0) * first.meter_per_pixel_x
                        + first.meter_per_pixel_x * 0.5)
                        .abs();
                    let shift_top = ((first.import_resolution.y as f64 - 1.0) * first.meter_per_pixel_y
                        + first.meter_per_pixel_y * 0.5)
                        .abs();
                    // 既存タイルのグリッドを基準に、切り抜き範囲を覆うまで左上へずらす
                    // 起点は先頭タイルの右下
                    tiles_left = infos.tiles.iter().map(|t| t.extents.left).fold(first.extents.right, f64::max);
                    tiles_top = infos.tiles.iter().map(|t| t.extents.top).fold(first.extents.bottom, f64::min);
                    if shift_left > 0.0 {
                        while cropped.left < tiles_left {
                            tiles_left -= shift_left;
                            data.number_tiles_x += 1;
                        }
                    }
                    if shift_top > 0.0 {
                        while cropped.top > tiles_top {
                            tiles_top += shift_top;
                            data.number_tiles_y += 1;
                        }
                    }
                }
                Err(e) => warn!("Cropped extents cannot be converted to the level CRS: {}", e),
            }
        }

        if data.raster_datas.is_empty() {
            error!("Can't merge because we got no data");
            return RasterLandscapeData::new();
        }

        let (nx, ny) = (data.number_tiles_x, data.number_tiles_y);
        let parallel = self.options.read_parallel && nx * ny > 1;
        let create = |i: usize| self.create_blank_tile(&data, i % nx, i / nx, tiles_left, tiles_top, crs);
        let blank_tiles: Vec<RasterData> = if parallel {
            (0..nx * ny).into_par_iter().map(create).collect()
        } else {
            (0..nx * ny).map(create).collect()
        };
        info!("Created {} blank tiles ({}x{})", blank_tiles.len(), nx, ny);

        // 粗い解像度を先に、細かいものを最後に重ねる
        let mut sources = data.raster_datas.clone();
        sources.sort_by(|a, b| b.meter_per_pixel.x.abs().total_cmp(&a.meter_per_pixel.x.abs()));

        let merge = |blank: &RasterData| self.mosaic_blank_tile(blank, &sources, crs);
        let merged: Vec<RasterData> = if parallel {
            blank_tiles.par_iter().filter_map(merge).collect()
        } else {
            blank_tiles.iter().filter_map(merge).collect()
        };

        let mut result = RasterLandscapeData::from_datas(merged);
        result.update_landscape_data();
        result
    }

    fn mosaic_blank_tile(
        &self,
        blank: &RasterData,
        sources: &[RasterData],
        crs: &CoordinateReferenceSystem,
    ) -> Option<RasterData> {
        if let Some(e) = &blank.error {
            error!("{}", e);
            return None;
        }
        let overlapping: Vec<&RasterData> = sources.iter().filter(|s| blank.is_overlapping(s)).collect();
        if overlapping.is_empty() {
            info!("No merging for {} (there was no overlap)", blank.filename);
            return None;
        }
        let mut target = match RasterFile::open(&blank.filename) {
            Ok(target) => target,
            Err(e) => {
                error!("{:#}", e);
                return None;
            }
        };
        for source in overlapping {
            let result = RasterFile::open_read_only(&source.filename).and_then(|file| {
                file.mosaic(
                    &mut target,
                    &source.projection_wkt,
                    self.options.resample_algorithm.to_gdal(),
                    self.options.resample_memory_bytes(),
                )
            });
            if let Err(e) = result {
                error!("Mosaicking failed: {:#}", e);
            }
        }
        let tile = RasterLandscapeData::get_raster_data(&target, &blank.filename, &blank.filename, crs);
        // 一様なタイル (データ無し) は捨てる
        if tile.is_ok() && tile.min_altitude != tile.max_altitude {
            Some(tile)
        } else {
            debug!("Dropping tile {}: {:?}", blank.filename, tile.error);
            None
        }
    }

    fn refresh_landscaping_infos(&mut self, index: usize, infos: &mut LandscapingInfos) -> Result<()> {
        self.landscape_datas[index].calculate_landscape_resolution()?;
        let first_wkt = self
            .landscape_datas
            .first()
            .and_then(|l| l.raster_datas.first())
            .map(|d| d.projection_wkt.clone())
            .unwrap_or_default();
        let landscape_data = &self.landscape_datas[index];
        let origin = infos.crs().origin();

        for data in &landscape_data.raster_datas {
            let crs = infos.crs();
            let wgs84_extents = crs
                .convert_to_geog_cs_from(&data.extents, &first_wkt)
                .unwrap_or_else(|e| {
                    warn!("WGS84 extents of {} not available: {}", data.filename, e);
                    Extents::default()
                });
            let mut tile = LandscapingInfo {
                extents: data.extents,
                wgs84_extents,
                import_resolution: data.import_resolution,
                landscape_resolution: data.landscape_resolution,
                meter_per_pixel_x: data.meter_per_pixel.x,
                meter_per_pixel_y: data.meter_per_pixel.y,
                min_altitude: landscape_data.min_altitude,
                max_altitude: landscape_data.max_altitude,
                number_of_sections: data.number_of_sections,
                quads_per_section: data.quads_per_section,
                filename: data.filename.clone(),
                original_filename: data.original_filename.clone(),
                projection: data.projection.clone(),
                ..Default::default()
            };
            tile.calculate_scale(&self.options);
            tile.calculate_location(origin);
            // ロード判定用の大まかな範囲
            tile.bounds = Bounds::from_points(
                crs.convert_crs_point_to_engine(data.extents.left_top()),
                crs.convert_crs_point_to_engine(data.extents.right_bottom()),
            );
            info!("Add tile {}: {}", infos.tiles.len(), data);
            infos.tiles.push(tile);
        }
        Ok(())
    }

    pub fn has_raster_file(&self, index: usize) -> bool {
        self.landscape_datas
            .get(index)
            .map(|l| !l.raster_datas.is_empty())
            .unwrap_or(false)
    }

    /// First merged tile of batch `index`, optionally with its height grid.
    pub fn first_raster_data(&self, index: usize, with_band_data: bool) -> RasterData {
        let Some(data) = self.landscape_datas.get(index).and_then(|l| l.raster_datas.first()) else {
            return RasterData::failed("No Data");
        };
        if with_band_data {
            Self::with_band_data(data.clone())
        } else {
            data.clone()
        }
    }

    /// Merged tile `raster_index` of batch `index` with its height grid.
    pub fn next_raster_data(&self, index: usize, raster_index: usize) -> RasterData {
        match self.landscape_datas.get(index).and_then(|l| l.raster_datas.get(raster_index)) {
            Some(data) => Self::with_band_data(data.clone()),
            None => RasterData::failed("No Data"),
        }
    }

    fn with_band_data(data: RasterData) -> RasterData {
        let band = RasterFile::open_read_only(&data.filename).and_then(|file| file.raster_band(1));
        match band {
            Ok(grid) if !grid.is_empty() => data.with_height_data(grid),
            _ => {
                let message = format!("Invalid raster data in file {}", data.filename);
                data.with_error(message)
            }
        }
    }

    pub fn raster_data_count(&self, index: usize) -> usize {
        self.landscape_datas.get(index).map(|l| l.raster_datas.len()).unwrap_or(0)
    }

    pub fn landscape_data_count(&self) -> usize {
        self.landscape_datas.len()
    }

    pub fn meter_per_pixel(&self) -> Point {
        match self.landscape_datas.first() {
            Some(l) if !l.raster_datas.is_empty() => l.meter_per_pixel,
            _ => Point::splat(1.0),
        }
    }

    /// Smooths and normalizes one tile's heights into 16-bit values.
    ///
    /// A custom Z scale that does not fit falls back to high-detail mode and
    /// recalculates the tile's scale.
    pub fn import(&self, heights: Grid<f64>, tile_index: usize, infos: &mut LandscapingInfos) -> Result<Vec<u16>> {
        let tile = infos.tiles.get_mut(tile_index).ok_or_else(|| {
            LandscapeError::InvalidInput(format!("Invalid tile index {}", tile_index))
        })?;
        let heights = if self.options.smooth_steps > 0 {
            info!("Smoothing tile {} with {} steps", tile_index, self.options.smooth_steps);
            smooth(&heights, self.options.smooth_steps, self.options.smooth_edges)
        } else {
            heights
        };

        let window = height_window(
            tile.max_altitude - tile.min_altitude,
            self.options.high_detail_z_scale,
            self.options.z_scale,
        );
        if window.fell_back {
            warn!("invalid Custom Z-Scale. Falling back to High Detail Z-Scale for Tile {}", tile_index);
            let options = ImportOptions {
                high_detail_z_scale: true,
                ..self.options.clone()
            };
            tile.calculate_scale(&options);
        }
        Ok(normalize(&heights, tile.min_altitude, tile.max_altitude, window))
    }

    /// Mosaics every satellite source of a tile into one RGB image, split into
    /// sub-tiles for decals.
    pub fn get_color_data(&self, tile_index: usize, as_decal: bool, infos: &LandscapingInfos) -> Result<Vec<ColorData>> {
        let tile = infos.tiles.get(tile_index).ok_or_else(|| {
            error!("Invalid TileIndex when attempting to create texture: {}", tile_index);
            LandscapeError::InvalidInput(format!("Invalid tile index {}", tile_index))
        })?;
        let crs = infos.crs();
        let algorithm = self.options.resample_algorithm.to_gdal();

        // 衛星画像の解像度を落とさないよう、最も細かいピクセルサイズを使う
        let finer = |current: f64, candidate: f64| {
            if current.abs() <= candidate.abs() {
                current
            } else {
                candidate
            }
        };
        let mut mpp = Point::new(tile.meter_per_pixel_x, tile.meter_per_pixel_y);
        let mut sources = Vec::new();

        if !tile.satellite_filenames.is_empty() {
            for satellite in &tile.satellite_filenames {
                info!("Create Satellite Texture from downloaded tiles for Tile {}", tile_index);
                let file = RasterFile::open_read_only(satellite)?;
                let path = if crs.is_same_as_level_crs(&file.projection()) {
                    satellite.clone()
                } else {
                    let warped = self.temp_files.unique_path(
                        satellite,
                        &self.working_dir,
                        self.options.use_in_memory_files,
                        "tif",
                    );
                    file.warp(&warped, crs.wkt(), algorithm).map_err(|e| {
                        LandscapeError::Projection(format!(
                            "Projecting Texture {} to EPSG:{} failed: {:#}",
                            satellite,
                            crs.authority_id(),
                            e
                        ))
                    })?;
                    warped
                };
                let gt = RasterFile::open_read_only(&path)?.geo_transform();
                mpp = Point::new(finer(mpp.x, gt[1]), finer(mpp.y, gt[5]));
                info!("Add file (downloaded) {}", path);
                sources.push(path);
            }
        } else if self.has_raster_file(0) {
            info!("Create Satellite Texture from files for Tile {}", tile_index);
            for data in self.landscape_datas.iter().flat_map(|l| &l.raster_datas) {
                info!("Add file (selected) {}", data.filename);
                sources.push(data.filename.clone());
                mpp = Point::new(finer(mpp.x, data.meter_per_pixel.x), finer(mpp.y, data.meter_per_pixel.y));
            }
        } else {
            return Err(LandscapeError::Resource("No file or data for creating a texture".to_string()));
        }
        if sources.is_empty() {
            return Err(LandscapeError::Resource("No files or data for this area".to_string()));
        }

        let (meter_per_pixel, resolution) = if mpp.x.abs() < tile.meter_per_pixel_x.abs() {
            (
                mpp,
                Resolution::new(
                    (tile.import_resolution.x as f64 * tile.meter_per_pixel_x / mpp.x) as usize,
                    (tile.import_resolution.y as f64 * tile.meter_per_pixel_y / mpp.y).abs() as usize,
                ),
            )
        } else {
            (
                Point::new(tile.meter_per_pixel_x, tile.meter_per_pixel_y),
                tile.import_resolution,
            )
        };
        let base_filename = format!("SatTex_Tile_{}", tile_index);
        let descriptor = RasterData {
            filename: self.temp_files.unique_path(
                &base_filename,
                &self.working_dir,
                self.options.use_in_memory_files,
                "tif",
            ),
            extents: Extents::new(
                tile.extents.top + meter_per_pixel.y * resolution.y as f64,
                tile.extents.left,
                tile.extents.top,
                tile.extents.left + meter_per_pixel.x * resolution.x as f64,
            ),
            meter_per_pixel,
            import_resolution: resolution,
            band_count: 3,
            projection: crs.authority_id_str(),
            projection_wkt: crs.wkt().to_string(),
            ..Default::default()
        };
        let mut target = RasterFile::create(&descriptor)
            .context("There was a problem creating the target image")?;
        for source in &sources {
            let result = RasterFile::open_read_only(source).and_then(|file| {
                file.mosaic(&mut target, crs.wkt(), algorithm, self.options.resample_memory_bytes())
            });
            if let Err(e) = result {
                error!("Merging {} failed: {:#}", source, e);
            }
        }

        let colors = target.color_band()?;
        let (width, height) = (colors.width(), colors.height());
        let (mut tiles_x, mut tiles_y) = (1, 1);
        if as_decal {
            let max = self.options.max_decal_texture_size.max(1);
            while width / tiles_x > max {
                tiles_x += 1;
            }
            while height / tiles_y > max {
                tiles_y += 1;
            }
        }
        let tile_width = width / tiles_x;
        let tile_height = height / tiles_y;

        let mut color_datas = Vec::with_capacity(tiles_x * tiles_y);
        for y_tile in 0..tiles_y {
            for x_tile in 0..tiles_x {
                color_datas.push(ColorData {
                    data: colors.sub_grid(x_tile * tile_width, y_tile * tile_height, tile_width, tile_height),
                    base_filename: base_filename.clone(),
                    number_tiles_x: tiles_x,
                    number_tiles_y: tiles_y,
                });
            }
        }
        Ok(color_datas)
    }

    /// Square `texture_size` textures for a tile, one per decal sub-tile or a single one.
    pub fn create_texture(&self, tile_index: usize, as_decal: bool, infos: &LandscapingInfos) -> Result<TileConfig> {
        let datas = self.get_color_data(tile_index, as_decal, infos)?;
        let Some(first) = datas.first() else {
            return Ok(TileConfig::default());
        };
        let size = self.options.texture_size;
        let textures = if as_decal {
            datas.par_iter().map(|d| resize_colors(&d.data, size, size)).collect()
        } else {
            vec![resize_colors(&first.data, size, size)]
        };
        Ok(TileConfig {
            number_tiles_x: first.number_tiles_x,
            number_tiles_y: first.number_tiles_y,
            textures,
        })
    }
}
