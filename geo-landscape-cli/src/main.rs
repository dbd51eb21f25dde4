use anyhow::{bail, Context, Result};
use clap::Parser;
use geo_landscape::raster::{Grid, HeightmapWriter};
use geo_landscape::{
    Extents, ImportOptions, LandscapingInfos, ProjectionMode, RasterData, RasterTileFactory,
    ResampleAlgorithm, Resolution, VectorTileFactory,
};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

// GDAL で読めるラスタの拡張子
const RASTER_EXTENSIONS: [&str; 12] = [
    "tif", "tiff", "asc", "hgt", "dem", "img", "vrt", "bil", "xyz", "dt0", "dt1", "dt2",
];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raster files or directories (searched recursively)
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    /// Vector files to clip against the imported tiles
    #[arg(long, value_name = "FILE")]
    vector: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Number of worker threads (default: number of CPU cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Maximum landscape tile size in pixels
    #[arg(long, default_value_t = 8192)]
    max_tile_size: u32,

    /// Resampling algorithm used for warping
    #[arg(long, default_value = "bilinear")]
    resample: ResampleAlgorithm,

    /// Warp memory limit in gigabytes
    #[arg(long, default_value_t = 8.0)]
    resample_memory_gb: f64,

    /// Gaussian smoothing passes applied to each tile
    #[arg(long, default_value_t = 0)]
    smooth_steps: u32,

    /// Also smooth the tile borders
    #[arg(long)]
    smooth_edges: bool,

    /// Fixed Z scale in percent (disables high-detail Z scale)
    #[arg(long)]
    z_scale: Option<f64>,

    /// Use square landscape tiles
    #[arg(long)]
    square_tiles: bool,

    /// Keep every file at its own resolution instead of the first file's
    #[arg(long)]
    no_resample_to_first_tile: bool,

    /// Output pixel size in metres (default: native pixel size)
    #[arg(long)]
    pixel_size: Option<f64>,

    /// Projection mode: auto-utm, source or custom
    #[arg(long, default_value = "auto-utm")]
    projection: ProjectionMode,

    /// Target EPSG code for the custom projection mode
    #[arg(long, default_value_t = 0)]
    epsg: i32,

    /// Transform vector data through geographic coordinates
    #[arg(long)]
    extended_crs: bool,

    /// Join same-named line fragments
    #[arg(long)]
    connect_linestrings: bool,

    /// Only read polygon features and their names
    #[arg(long)]
    landuse: bool,

    /// Read files one after another
    #[arg(long)]
    serial: bool,

    /// Keep intermediate rasters on disk instead of /vsimem/
    #[arg(long)]
    on_disk: bool,

    /// Crop to "bottom,left,top,right" in lon/lat
    #[arg(long, value_name = "BBOX", allow_hyphen_values = true)]
    crop: Option<Extents>,

    /// Also write a Terrain-RGB GeoTIFF per tile
    #[arg(long)]
    terrain_rgb: bool,

    /// Additional PROJ search paths
    #[arg(long, value_name = "DIR")]
    proj_path: Vec<PathBuf>,

    /// GDAL data directory
    #[arg(long, value_name = "DIR")]
    gdal_data: Option<PathBuf>,
}

impl Args {
    fn import_options(&self) -> ImportOptions {
        ImportOptions {
            desired_max_tile_size: self.max_tile_size,
            resample_algorithm: self.resample,
            resample_memory_gb: self.resample_memory_gb,
            smooth_steps: self.smooth_steps,
            smooth_edges: self.smooth_edges,
            high_detail_z_scale: self.z_scale.is_none(),
            z_scale: self.z_scale.unwrap_or(100.0),
            square_tiles: self.square_tiles,
            resample_to_first_tile: !self.no_resample_to_first_tile,
            native_raster_pixel_size: self.pixel_size.is_none(),
            custom_raster_pixel_size: self.pixel_size.unwrap_or(1.0),
            projection_mode: self.projection,
            target_epsg: self.epsg,
            extended_crs_compatibility: self.extended_crs,
            connect_linestrings: self.connect_linestrings,
            read_parallel: !self.serial,
            use_in_memory_files: !self.on_disk,
            proj_search_paths: self.proj_path.clone(),
            gdal_data_path: self.gdal_data.clone(),
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    // CLI引数の解析
    let args = Args::parse();

    // ログの初期化
    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    // 出力ディレクトリの作成
    fs::create_dir_all(&args.output)?;

    let options = args.import_options();
    let mut infos = LandscapingInfos::new(&options);

    let raster_files = collect_raster_files(&args.inputs)?;
    info!("Found {} raster files", raster_files.len());
    if raster_files.is_empty() && args.vector.is_empty() {
        bail!("No raster or vector input files found");
    }

    if !raster_files.is_empty() {
        import_rasters(&args, &options, &raster_files, &mut infos)?;
    }
    if !args.vector.is_empty() {
        import_vectors(&args, &options, &mut infos)?;
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}

fn import_rasters(
    args: &Args,
    options: &ImportOptions,
    files: &[String],
    infos: &mut LandscapingInfos,
) -> Result<()> {
    let mut factory = RasterTileFactory::new(options.clone());
    factory.set_working_dir(args.output.clone());

    // タイル作成の前にエラーをまとめて報告する
    let errors = factory.read_files(files, 0, infos);
    if !errors.is_empty() {
        error!("Failed to read {} files:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        bail!("{} errors while reading raster files", errors.len());
    }
    if let Some(crop) = args.crop {
        info!("Crop to {}", crop);
        infos.set_cropped_extents(crop);
    }

    factory.prepare_import(infos)?;
    let count = factory.raster_data_count(0);
    info!("Creating {} landscape tiles", count);

    let writer = HeightmapWriter::new();
    let mut failed = 0;
    for index in 0..count {
        let data = factory.next_raster_data(0, index);
        let heights = match (&data.error, &data.height_data) {
            (None, Some(heights)) => heights.clone(),
            (error, _) => {
                error!("Tile {}: {}", index, error.as_deref().unwrap_or("No height data"));
                failed += 1;
                continue;
            }
        };
        let values = factory.import(heights.clone(), index, infos)?;
        write_tile(&writer, args, index, &data, &heights, &values)?;

        if let Some(tile) = infos.tiles.get(index) {
            info!(
                "Tile {}: {} - resolution {} - scale {} - location {}",
                index,
                tile.extents,
                tile.landscape_resolution,
                infos.crs().landscape_scale(tile),
                infos.crs().landscape_location(tile)
            );
        }
    }

    if failed > 0 {
        bail!("{} of {} tiles failed", failed, count);
    }
    Ok(())
}

fn write_tile(
    writer: &HeightmapWriter,
    args: &Args,
    index: usize,
    data: &RasterData,
    heights: &Grid<f64>,
    values: &[u16],
) -> Result<()> {
    let layout = RasterData {
        import_resolution: Resolution::new(heights.width(), heights.height()),
        height_data: None,
        ..data.clone()
    };
    let output_path = args.output.join(format!("tile_{}.tif", index));
    writer.write_heightmap(&layout, values, &output_path)?;
    info!("Written heightmap: {:?}", output_path);

    if args.terrain_rgb {
        let output_path = args.output.join(format!("tile_{}_terrain_rgb.tif", index));
        writer.write_terrain_rgb(&layout, heights, &output_path)?;
        info!("Written Terrain-RGB: {:?}", output_path);
    }
    Ok(())
}

fn import_vectors(args: &Args, options: &ImportOptions, infos: &mut LandscapingInfos) -> Result<()> {
    let mut factory = VectorTileFactory::new(options.clone(), args.landuse);
    // 複数タイルの場合はタイルごとの切り出しに任せる
    let check_extents = infos.tiles.len() == 1;
    for path in &args.vector {
        let filename = path.to_string_lossy();
        match factory.add_file(&filename, 0, check_extents, infos) {
            Ok(()) => info!("Added vector file {}", filename),
            Err(e) => warn!("Add vector file {} failed: {}", filename, e),
        }
    }
    if !factory.has_vector_files() {
        bail!("None of the vector files could be imported");
    }

    let classes = factory.available_feature_classes(&[], false);
    info!("Feature classes: {}", classes.join(", "));

    if infos.tiles.is_empty() {
        let objects = factory.objects(infos);
        info!("{} shapes without landscape tiles", objects.len());
        return Ok(());
    }
    for index in 0..infos.tiles.len() {
        let shapes = factory.shapes(index, !args.landuse, infos);
        info!("Tile {}: {} shapes", index, shapes.len());
    }
    Ok(())
}

fn collect_raster_files(inputs: &[PathBuf]) -> Result<Vec<String>> {
    let collected: Result<Vec<Vec<PathBuf>>> = inputs
        .par_iter()
        .map(|input| {
            if input.is_dir() {
                collect_from_dir(input)
            } else if input.is_file() {
                Ok(vec![input.clone()])
            } else {
                bail!("Input path must be a file or directory: {:?}", input)
            }
        })
        .collect();
    let mut files: Vec<String> = collected?
        .into_iter()
        .flatten()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    // 読み込み順を安定させる
    files.sort();
    Ok(files)
}

fn collect_from_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            // サブディレクトリを再帰的に探索
            files.extend(collect_from_dir(&path)?);
        } else if is_raster(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

fn is_raster(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| RASTER_EXTENSIONS.iter().any(|r| ext.eq_ignore_ascii_case(r)))
        .unwrap_or(false)
}
