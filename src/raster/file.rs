//! GDAL データセット 1 つを所有するラッパー。Drop 時にハンドルを閉じる。

use std::collections::BTreeSet;
use std::ffi::CString;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, ColorInterpretation};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use gdal_sys::{CPLErr, GDALResampleAlg};
use tracing::{debug, error, warn};

use super::{Color, Grid, RasterData};
use crate::crs::spatial_ref_from;
use crate::extents::{Extents, Point};

// 標高の妥当範囲 (m)
pub const MIN_ALTITUDE: f64 = -12000.0;
pub const MAX_ALTITUDE: f64 = 9000.0;

fn is_plausible_altitude(min: f64, max: f64) -> bool {
    (MIN_ALTITUDE..=MAX_ALTITUDE).contains(&min) && (MIN_ALTITUDE..=MAX_ALTITUDE).contains(&max)
}

/// `EPSG:<code>` は WKT に解決し、それ以外はそのまま返す
fn to_wkt(proj: &str) -> Result<String> {
    if proj.starts_with("EPSG:") {
        let srs = spatial_ref_from(proj).with_context(|| format!("Failed to resolve {}", proj))?;
        return srs.to_wkt().context("Failed to convert SpatialRef to WKT");
    }
    Ok(proj.to_string())
}

// 高さデータを優先し、無ければカラーデータのチャンネルを使う
fn band_values(data: &RasterData, band_index: usize) -> Vec<f32> {
    if let Some(height) = &data.height_data {
        return height.data().iter().map(|&v| v as f32).collect();
    }
    match &data.color_data {
        Some(color) => color
            .data()
            .iter()
            .map(|c| match band_index {
                1 => c.r as f32,
                2 => c.g as f32,
                3 => c.b as f32,
                _ => c.a as f32,
            })
            .collect(),
        None => Vec::new(),
    }
}

pub struct RasterFile {
    dataset: Dataset,
    filename: String,
    rows: usize,
    cols: usize,
    bands: usize,
    geo_transform: [f64; 6],
}

impl std::fmt::Debug for RasterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterFile")
            .field("filename", &self.filename)
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("bands", &self.bands)
            .finish()
    }
}

impl RasterFile {
    /// Opens an existing raster for update.
    pub fn open(filename: &str) -> Result<Self> {
        let options = DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
            ..Default::default()
        };
        let dataset = Dataset::open_ex(filename, options)
            .with_context(|| format!("Failed to open raster {}", filename))?;
        Self::from_dataset(dataset, filename)
    }

    pub fn open_read_only(filename: &str) -> Result<Self> {
        let dataset =
            Dataset::open(filename).with_context(|| format!("Failed to open raster {}", filename))?;
        Self::from_dataset(dataset, filename)
    }

    /// Wraps an already opened dataset.
    pub fn from_dataset(dataset: Dataset, filename: &str) -> Result<Self> {
        let (cols, rows) = dataset.raster_size();
        let bands = dataset.raster_count();
        // ジオトランスフォームが無い形式は GDAL の既定値を使う
        let geo_transform = dataset
            .geo_transform()
            .unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        Ok(Self {
            dataset,
            filename: filename.to_string(),
            rows,
            cols,
            bands,
            geo_transform,
        })
    }

    /// Creates a Float32 GeoTIFF described by `data`, writing its height or
    /// colour grid when present.
    pub fn create(data: &RasterData) -> Result<Self> {
        let cols = data.import_resolution.x;
        let rows = data.import_resolution.y;
        if cols == 0 || rows == 0 {
            bail!("Could not create Raster {} with resolution {}", data.filename, data.import_resolution);
        }

        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

        // カラー画像用の作成オプション
        let mut create_options = CslStringList::new();
        if data.band_count >= 3 {
            create_options
                .set_name_value("PHOTOMETRIC", "RGB")
                .context("Failed to set PHOTOMETRIC option")?;
            create_options
                .set_name_value("PROFILE", "GeoTIFF")
                .context("Failed to set PROFILE option")?;
        }

        let mut dataset = driver
            .create_with_band_type_with_options::<f32, _>(
                &data.filename,
                cols,
                rows,
                data.band_count,
                &create_options,
            )
            .with_context(|| format!("Could not create Raster {}", data.filename))?;

        dataset
            .set_geo_transform(&[
                data.extents.left,
                data.meter_per_pixel.x,
                0.0,
                data.extents.top,
                0.0,
                data.meter_per_pixel.y,
            ])
            .context("Failed to set geo transform")?;

        let projection = if data.projection_wkt.is_empty() {
            to_wkt(&data.projection)?
        } else {
            data.projection_wkt.clone()
        };
        if !projection.is_empty() {
            dataset
                .set_projection(&projection)
                .context("Failed to set projection")?;
        }

        if data.height_data.is_some() || data.color_data.is_some() {
            for band_index in 1..=data.band_count {
                let values = band_values(data, band_index);
                if values.len() != cols * rows {
                    bail!(
                        "Raster data of {} has {} values, expected {}",
                        data.filename,
                        values.len(),
                        cols * rows
                    );
                }
                let mut band = dataset
                    .rasterband(band_index)
                    .with_context(|| format!("Failed to get raster band {}", band_index))?;
                band.set_no_data_value(Some(data.no_data_value))
                    .context("Failed to set no data value")?;
                let mut buffer = Buffer::new((cols, rows), values);
                band.write((0, 0), (cols, rows), &mut buffer)
                    .context("Failed to write raster data")?;
            }
        }

        if data.band_count >= 3 {
            let interpretations = [
                ColorInterpretation::RedBand,
                ColorInterpretation::GreenBand,
                ColorInterpretation::BlueBand,
            ];
            for (i, interp) in interpretations.into_iter().enumerate() {
                let mut band = dataset
                    .rasterband(i + 1)
                    .with_context(|| format!("Failed to get raster band {}", i + 1))?;
                band.set_color_interpretation(interp)
                    .context("Failed to set color interpretation")?;
            }
        }

        Self::from_dataset(dataset, &data.filename)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// (rows, columns, bands)
    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.bands)
    }

    pub fn band_count(&self) -> usize {
        self.bands
    }

    pub fn geo_transform(&self) -> [f64; 6] {
        self.geo_transform
    }

    /// Projection WKT; empty when the file carries none.
    pub fn projection(&self) -> String {
        self.dataset.projection()
    }

    /// Pixel size; Y is negative for north-up rasters.
    pub fn meter_per_pixel(&self) -> Point {
        Point::new(self.geo_transform[1], self.geo_transform[5])
    }

    pub fn extents(&self) -> Extents {
        let left = self.geo_transform[0];
        let top = self.geo_transform[3];
        let right = left + self.geo_transform[1] * self.cols as f64;
        let bottom = top + self.geo_transform[5] * self.rows as f64;
        Extents::new(bottom, left, top, right)
    }

    /// No-data value of band 1, 0 when none is set.
    pub fn no_data_value(&self) -> f64 {
        self.dataset
            .rasterband(1)
            .ok()
            .and_then(|band| band.no_data_value())
            .unwrap_or(0.0)
    }

    /// Metadata, then statistics, then a full scan; errors if the range is
    /// still implausible.
    pub fn min_and_max_altitude(&self, band_index: usize) -> Result<(f64, f64)> {
        let band = self
            .dataset
            .rasterband(band_index)
            .with_context(|| format!("Failed to get raster band {}", band_index))?;

        let mut has_min = 0;
        let mut has_max = 0;
        let (mut min, mut max) = unsafe {
            (
                gdal_sys::GDALGetRasterMinimum(band.c_rasterband(), &mut has_min),
                gdal_sys::GDALGetRasterMaximum(band.c_rasterband(), &mut has_max),
            )
        };
        if has_min == 0 || has_max == 0 {
            min = 0.0;
            max = 0.0;
        }

        if (min == 0.0 && max == 0.0) || !is_plausible_altitude(min, max) {
            // キャッシュ済みの統計値ではなく再計算する
            let (mut mean, mut std_dev) = (0.0, 0.0);
            let rv = unsafe {
                gdal_sys::GDALComputeRasterStatistics(
                    band.c_rasterband(),
                    0,
                    &mut min,
                    &mut max,
                    &mut mean,
                    &mut std_dev,
                    None,
                    ptr::null_mut(),
                )
            };
            if rv != CPLErr::CE_None {
                debug!("Compute statistics failed on {}", self.filename);
            }
        }

        if !is_plausible_altitude(min, max) {
            if let Ok(min_max) = band.compute_raster_min_max(false) {
                min = min_max.min;
                max = min_max.max;
            }
        }

        if !is_plausible_altitude(min, max) {
            bail!(
                "Min ({:.6}) and Max ({:.6}) Altitude cannot be calculated",
                min,
                max
            );
        }
        Ok((min, max))
    }

    /// Reads one band as doubles, row-major. GDAL converts any native pixel type.
    pub fn raster_band(&self, band_index: usize) -> Result<Grid<f64>> {
        let band = self
            .dataset
            .rasterband(band_index)
            .with_context(|| format!("Failed to get raster band {}", band_index))?;
        let buffer = band
            .read_as::<f64>((0, 0), (self.cols, self.rows), (self.cols, self.rows), None)
            .with_context(|| format!("Failed to read band {} of {}", band_index, self.filename))?;
        let (_, data) = buffer.into_shape_and_vec();
        Grid::from_vec(self.cols, self.rows, data)
            .with_context(|| format!("Unexpected buffer size reading {}", self.filename))
    }

    /// Bands 1-3 as RGB.
    pub fn color_band(&self) -> Result<Grid<Color>> {
        if self.bands < 3 {
            bail!("{} has {} bands, 3 are needed for colour data", self.filename, self.bands);
        }
        let r = self.raster_band(1)?;
        let g = self.raster_band(2)?;
        let b = self.raster_band(3)?;
        let data = r
            .data()
            .iter()
            .zip(g.data())
            .zip(b.data())
            .map(|((&r, &g), &b)| {
                Color::rgb(
                    r.clamp(0.0, 255.0) as u8,
                    g.clamp(0.0, 255.0) as u8,
                    b.clamp(0.0, 255.0) as u8,
                )
            })
            .collect();
        Grid::from_vec(self.cols, self.rows, data).context("Unexpected colour buffer size")
    }

    /// Reprojects the whole dataset into a new GeoTIFF at `new_filename`.
    pub fn warp(
        &self,
        new_filename: &str,
        target_projection: &str,
        algorithm: GDALResampleAlg::Type,
    ) -> Result<()> {
        let target_wkt = CString::new(to_wkt(target_projection)?)
            .context("Target projection contains a NUL byte")?;
        let handle = unsafe {
            gdal_sys::GDALAutoCreateWarpedVRT(
                self.dataset.c_dataset(),
                ptr::null(),
                target_wkt.as_ptr(),
                algorithm,
                0.0,
                ptr::null(),
            )
        };
        if handle.is_null() {
            bail!("Failed to create warped VRT for {}", self.filename);
        }
        // VRT は Drop で閉じる
        let warped = unsafe { Dataset::from_c_dataset(handle) };
        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;
        warped
            .create_copy(&driver, new_filename, &CslStringList::new())
            .with_context(|| format!("Failed to write warped raster {}", new_filename))?;
        Ok(())
    }

    /// Reprojects this dataset into `target`, keeping target pixels where the
    /// source has no data. Both datasets are interpreted in `projection`.
    pub fn mosaic(
        &self,
        target: &mut RasterFile,
        projection: &str,
        algorithm: GDALResampleAlg::Type,
        memory_limit_bytes: f64,
    ) -> Result<()> {
        let wkt = CString::new(to_wkt(projection)?).context("Projection contains a NUL byte")?;
        let rv = unsafe {
            gdal_sys::GDALReprojectImage(
                self.dataset.c_dataset(),
                wkt.as_ptr(),
                target.dataset.c_dataset(),
                wkt.as_ptr(),
                algorithm,
                memory_limit_bytes,
                0.0,
                None,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if rv != CPLErr::CE_None {
            error!("Mosaic {} into {} failed", self.filename, target.filename);
            bail!("Failed to mosaic {} into {}", self.filename, target.filename);
        }
        target.dataset.flush_cache().context("Failed to flush mosaicked raster")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.dataset.flush_cache().context("Failed to flush raster")
    }
}

/// Temporary rasters of one import session. `/vsimem/` files are unlinked on drop.
#[derive(Debug, Default)]
pub struct TempFiles {
    in_memory: Mutex<BTreeSet<String>>,
}

// /vsimem/ はプロセス全体で共有されるのでセッションをまたいで数える
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<stem>_Landscaping_<millis>_<n>.<ext>` under `/vsimem/` or `working_dir`.
    /// In-memory paths are tracked.
    pub fn unique_path(&self, source: &str, working_dir: &Path, in_memory: bool, ext: &str) -> String {
        let stem = Path::new(source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("raster");
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        // 並列読み込みでもミリ秒が衝突しないように連番を付ける
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}_Landscaping_{}_{}.{}", stem, millis, n, ext);
        if in_memory {
            let path = format!("/vsimem/{}", name);
            self.track(&path);
            path
        } else {
            working_dir.join(name).to_string_lossy().into_owned()
        }
    }

    /// Records a `/vsimem/` path; other paths are ignored.
    pub fn track(&self, path: &str) {
        if !path.starts_with("/vsimem/") {
            return;
        }
        let mut files = self.in_memory.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(path.to_string());
    }

    pub fn tracked(&self) -> Vec<String> {
        let files = self.in_memory.lock().unwrap_or_else(|e| e.into_inner());
        files.iter().cloned().collect()
    }

    pub fn release_all(&self) {
        let mut files = self.in_memory.lock().unwrap_or_else(|e| e.into_inner());
        for path in files.iter() {
            if let Err(e) = gdal::vsi::unlink_mem_file(path) {
                warn!("Failed to unlink {}: {}", path, e);
            }
        }
        files.clear();
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// `true` when the file name has the given extension (case-insensitive).
pub fn has_extension(filename: &str, ext: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}
