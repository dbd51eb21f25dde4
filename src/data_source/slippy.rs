//! Web Mercator スリッピーマップタイルのデータソース

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use super::{Completion, DataSource, FetchHandle, RequestDataType};
use crate::extents::{Extents, Point, Resolution};
use crate::raster::RasterData;
use crate::terrain_rgb;

pub const TILE_DIM: usize = 256;
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 21;
pub const MAX_VECTOR_ZOOM: u8 = 30;
/// Highest zoom served by the 2x terrain DEM tileset.
pub const MAX_DEM_ZOOM: u8 = 14;
pub const MIN_LATITUDE: f64 = -85.0511;
pub const MAX_LATITUDE: f64 = 85.0511;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

const TERRAIN_NO_DATA: f64 = -99999.0;

pub fn lon_to_tile_x(lon: f64, zoom: u8) -> i64 {
    ((lon + 180.0) / 360.0 * (1u64 << zoom) as f64).floor() as i64
}

pub fn lat_to_tile_y(lat: f64, zoom: u8) -> i64 {
    let lat_rad = lat.to_radians();
    ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * (1u64 << zoom) as f64).floor() as i64
}

pub fn tile_x_to_lon(x: i64, zoom: u8) -> f64 {
    x as f64 / (1u64 << zoom) as f64 * 360.0 - 180.0
}

pub fn tile_y_to_lat(y: i64, zoom: u8) -> f64 {
    let n = PI - 2.0 * PI * y as f64 / (1u64 << zoom) as f64;
    (0.5 * (n.exp() - (-n).exp())).atan().to_degrees()
}

#[derive(Debug, Clone)]
pub struct SlippyTileOptions {
    /// Zoom for height tiles.
    pub zoom: u8,
    pub zoom_satellite: u8,
    pub zoom_vector: u8,
    /// Request the 512x512 terrain DEM tileset instead of 256x256 terrain-RGB.
    pub terrain_dem_v1: bool,
    /// Log a warning when a request exceeds this many tiles (0 disables).
    pub tile_download_warn_limit: usize,
    pub max_parallel_requests: usize,
}

impl Default for SlippyTileOptions {
    fn default() -> Self {
        Self {
            zoom: 14,
            zoom_satellite: 16,
            zoom_vector: 14,
            terrain_dem_v1: true,
            tile_download_warn_limit: 0,
            max_parallel_requests: 8,
        }
    }
}

/// One tile to download. `data` is the descriptor the fetched payload is decoded into.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub kind: RequestDataType,
    pub x: i64,
    pub y: i64,
    pub zoom: u8,
    pub tileset: &'static str,
    pub format: &'static str,
    pub data: RasterData,
}

/// Decoded response of a tile request.
#[derive(Debug, Clone)]
pub enum TilePayload {
    /// Row-major RGBA pixels.
    Image { width: usize, height: usize, rgba: Vec<u8> },
    /// Raw file content (vector tiles).
    Bytes(Vec<u8>),
}

/// Transport used by [`SlippyTileSource`]. Implementations perform the HTTP
/// request and image decoding.
pub trait TileFetcher: Send + Sync + 'static {
    fn fetch(&self, request: &TileRequest) -> anyhow::Result<TilePayload>;

    fn is_available(&self) -> bool {
        true
    }
}

pub struct SlippyTileSource<F: TileFetcher> {
    fetcher: Arc<F>,
    options: SlippyTileOptions,
    working_dir: PathBuf,
    extents: Extents,
    tile_index: usize,
}

impl<F: TileFetcher> SlippyTileSource<F> {
    pub fn new(fetcher: F, options: SlippyTileOptions) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            options,
            working_dir: std::env::temp_dir(),
            extents: Extents::default(),
            tile_index: 0,
        }
    }

    fn zoom_for(&self, kind: RequestDataType) -> u8 {
        match kind {
            RequestDataType::Satellite => self.options.zoom_satellite,
            RequestDataType::Vector => self.options.zoom_vector,
            RequestDataType::Terrain if self.options.terrain_dem_v1 => self.options.zoom.min(MAX_DEM_ZOOM),
            RequestDataType::Terrain => self.options.zoom,
        }
    }

    pub fn validate(&self, kind: RequestDataType) -> Result<(), String> {
        let max_zoom = if kind == RequestDataType::Vector {
            MAX_VECTOR_ZOOM
        } else {
            MAX_ZOOM
        };
        let zoom = self.zoom_for(kind);
        if !(MIN_ZOOM..=max_zoom).contains(&zoom) {
            return Err(format!("RequestedZoom out of valid Range ({}-{})", MIN_ZOOM, max_zoom));
        }
        if self.extents.top > MAX_LATITUDE {
            return Err(format!(
                "Top Latitude value out of range ({:.6}-{:.6})",
                MIN_LATITUDE, MAX_LATITUDE
            ));
        }
        if self.extents.bottom < MIN_LATITUDE {
            return Err(format!(
                "Bottom Latitude value out of range ({:.6}-{:.6})",
                MIN_LATITUDE, MAX_LATITUDE
            ));
        }
        if self.extents.right > MAX_LONGITUDE {
            return Err(format!(
                "Right Longitude value out of range ({:.6}-{:.6})",
                MIN_LONGITUDE, MAX_LONGITUDE
            ));
        }
        if self.extents.left < MIN_LONGITUDE {
            return Err(format!(
                "Left Longitude value out of range ({:.6}-{:.6})",
                MIN_LONGITUDE, MAX_LONGITUDE
            ));
        }
        Ok(())
    }

    /// One request per slippy tile covering the extents, column by column.
    pub fn plan_requests(&self, kind: RequestDataType) -> Vec<TileRequest> {
        let zoom = self.zoom_for(kind);
        let (tileset, format, dim) = match kind {
            RequestDataType::Satellite => ("mapbox.satellite", ".jpg90", TILE_DIM),
            RequestDataType::Vector => ("mapbox.mapbox-streets-v8", ".vector.pbf", TILE_DIM),
            RequestDataType::Terrain if self.options.terrain_dem_v1 => {
                ("mapbox.mapbox-terrain-dem-v1", "@2x.pngraw", 2 * TILE_DIM)
            }
            RequestDataType::Terrain => ("mapbox.terrain-rgb", ".pngraw", TILE_DIM),
        };

        let last_tile = (1i64 << zoom) - 1;
        let mut min_x = lon_to_tile_x(self.extents.left, zoom);
        let mut max_x = lon_to_tile_x(self.extents.right, zoom);
        let mut min_y = lat_to_tile_y(self.extents.top, zoom);
        let mut max_y = lat_to_tile_y(self.extents.bottom, zoom);
        // 衛星画像とベクタは 1 タイル分の余白を取る
        if kind != RequestDataType::Terrain {
            min_x = (min_x - 1).max(0);
            min_y = (min_y - 1).max(0);
            max_x = (max_x + 1).min(last_tile);
            max_y = (max_y + 1).min(last_tile);
        }

        let mut requests = Vec::new();
        for x in min_x..=max_x {
            for y in min_y..=max_y {
                let filename = match kind {
                    RequestDataType::Vector => format!("x{}y{}z{}.pbf", x, y, zoom),
                    RequestDataType::Satellite => format!("x{}y{}z{}_sat.tif", x, y, zoom),
                    RequestDataType::Terrain => format!("x{}y{}z{}.tif", x, y, zoom),
                };
                let extents = Extents::new(
                    tile_y_to_lat(y + 1, zoom),
                    tile_x_to_lon(x, zoom),
                    tile_y_to_lat(y, zoom),
                    tile_x_to_lon(x + 1, zoom),
                );
                let data = RasterData {
                    filename: self.working_dir.join(filename).to_string_lossy().into_owned(),
                    import_resolution: Resolution::new(dim, dim),
                    projection: "EPSG:4326".to_string(),
                    meter_per_pixel: Point::new(
                        (extents.right - extents.left) / dim as f64,
                        (extents.bottom - extents.top) / dim as f64,
                    ),
                    extents,
                    band_count: if kind == RequestDataType::Satellite { 3 } else { 1 },
                    ..Default::default()
                };
                requests.push(TileRequest {
                    kind,
                    x,
                    y,
                    zoom,
                    tileset,
                    format,
                    data,
                });
            }
        }
        requests
    }

    fn run(fetcher: &F, request: TileRequest, completion: Completion) {
        match fetcher.fetch(&request).and_then(|payload| decode_payload(request.clone(), payload)) {
            Ok(data) => completion.finish(data),
            Err(e) => {
                error!(
                    "Could not retrieve expected data for tile x{} y{} z{}: {:#}",
                    request.x, request.y, request.zoom, e
                );
                completion.abort();
            }
        }
    }
}

/// Decodes a fetched payload into the request's descriptor.
pub fn decode_payload(request: TileRequest, payload: TilePayload) -> anyhow::Result<RasterData> {
    let mut data = request.data;
    match (request.kind, payload) {
        (RequestDataType::Vector, TilePayload::Bytes(bytes)) => {
            fs::write(&data.filename, bytes)
                .with_context(|| format!("Could not save vector file {}", data.filename))?;
            Ok(data)
        }
        (RequestDataType::Terrain, TilePayload::Image { width, height, rgba }) => {
            let (cols, rows) = (data.import_resolution.x, data.import_resolution.y);
            if width < cols || height < rows {
                bail!("Data does not match ({}x{}), (Rows: {} Columns: {})", width, height, rows, cols);
            }
            let Some(grid) = terrain_rgb::decode_rgba(width, height, &rgba) else {
                bail!("Data does not match ({} bytes), (Rows: {} Columns: {})", rgba.len(), rows, cols);
            };
            data.no_data_value = TERRAIN_NO_DATA;
            Ok(data.with_height_data(grid.sub_grid(0, 0, cols, rows)))
        }
        (RequestDataType::Satellite, TilePayload::Image { width, height, rgba }) => {
            let (cols, rows) = (data.import_resolution.x, data.import_resolution.y);
            let Some(grid) = terrain_rgb::colors_from_rgba(width, height, &rgba) else {
                bail!("Data does not match ({} bytes), (Rows: {} Columns: {})", rgba.len(), rows, cols);
            };
            if width < cols || height < rows {
                bail!("Data does not match ({}x{}), (Rows: {} Columns: {})", width, height, rows, cols);
            }
            data.color_data = Some(grid.sub_grid(0, 0, cols, rows));
            Ok(data)
        }
        (kind, _) => bail!("Unexpected payload for a {} request", kind),
    }
}

impl<F: TileFetcher> DataSource for SlippyTileSource<F> {
    fn is_valid(&self) -> bool {
        self.fetcher.is_available()
    }

    fn set_working_dir(&mut self, dir: &Path) {
        self.working_dir = dir.to_path_buf();
    }

    fn set_extents(&mut self, extents: Extents, tile_index: usize) {
        info!("Set Extents for slippy tile data source {} - Tile: {}", extents, tile_index);
        self.extents = extents;
        self.tile_index = tile_index;
    }

    fn fetch_data(&self, kind: RequestDataType) -> FetchHandle {
        info!("Fetch {} data from slippy tile data source", kind);
        if let Err(e) = self.validate(kind) {
            error!("{}", e);
            return FetchHandle::ready(vec![RasterData::failed(e)], self.tile_index);
        }
        let requests = self.plan_requests(kind);
        if requests.is_empty() {
            return FetchHandle::ready(
                vec![RasterData::failed(
                    "No Requests launched - Please check your Map Bounding Box!",
                )],
                self.tile_index,
            );
        }
        if self.options.tile_download_warn_limit > 0 && requests.len() > self.options.tile_download_warn_limit {
            warn!(
                "With zoom-level {} you are going to import {} tiles",
                self.zoom_for(kind),
                requests.len()
            );
        }

        let (handle, completions) = FetchHandle::channel(requests.len(), self.tile_index);
        let mut pending = Vec::new();
        for (request, completion) in requests.into_iter().zip(completions) {
            // キャッシュ済みのファイルはそのまま使う
            if Path::new(&request.data.filename).exists() {
                completion.finish(request.data);
            } else {
                pending.push((request, completion));
            }
        }
        if pending.is_empty() {
            return handle;
        }

        // ブロッキング I/O はグローバルな rayon ワーカーとは別のプールで行う
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_parallel_requests.clamp(1, pending.len()))
            .thread_name(|i| format!("tile-fetch-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                error!("Failed to start download workers: {}", e);
                for (request, completion) in pending {
                    completion.finish(request.data.with_error(format!("Failed to start download workers: {}", e)));
                }
                return handle;
            }
        };
        for (request, completion) in pending {
            let fetcher = Arc::clone(&self.fetcher);
            pool.spawn(move || Self::run(&fetcher, request, completion));
        }
        handle
    }
}
