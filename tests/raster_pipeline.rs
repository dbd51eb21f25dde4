use gdal::DriverManager;
use geo_landscape::raster::{Grid, RasterFile};
use geo_landscape::{
    Extents, ImportOptions, LandscapingInfos, Point, ProjectionMode, RasterData,
    RasterTileFactory, Resolution,
};
use std::path::Path;
use tempfile::TempDir;

fn gtiff_available() -> bool {
    DriverManager::get_driver_by_name("GTiff").is_ok()
}

const LEFT: f64 = 400_000.0;
const TOP: f64 = 5_000_000.0;

// UTM 33N の単バンド GeoTIFF を書き出す
fn write_dem(
    dir: &Path,
    name: &str,
    left: f64,
    cols: usize,
    rows: usize,
    pixel_size: f64,
    height: impl Fn(f64, f64) -> f64,
) -> String {
    let filename = dir.join(name).to_string_lossy().into_owned();
    let mut grid = Grid::filled(cols, rows, 0.0);
    for y in 0..rows {
        for x in 0..cols {
            let east = left + x as f64 * pixel_size;
            let south = y as f64 * pixel_size;
            grid.set(x, y, height(east, south));
        }
    }
    let data = RasterData {
        filename: filename.clone(),
        extents: Extents::new(
            TOP - rows as f64 * pixel_size,
            left,
            TOP,
            left + cols as f64 * pixel_size,
        ),
        meter_per_pixel: Point::new(pixel_size, -pixel_size),
        import_resolution: Resolution::new(cols, rows),
        projection: "EPSG:32633".to_string(),
        height_data: Some(grid),
        ..Default::default()
    };
    RasterFile::create(&data).unwrap();
    filename
}

fn options(dir: &TempDir) -> (RasterTileFactory, LandscapingInfos) {
    let options = ImportOptions {
        desired_max_tile_size: 1024,
        projection_mode: ProjectionMode::UseSourceCrs,
        use_in_memory_files: false,
        ..Default::default()
    };
    let mut factory = RasterTileFactory::new(options.clone());
    factory.set_working_dir(dir.path());
    (factory, LandscapingInfos::new(&options))
}

fn slope(east: f64, south: f64) -> f64 {
    100.0 + (east - LEFT) * 0.01 + south * 0.02
}

#[test]
fn test_abutting_files_become_one_tile() {
    if !gtiff_available() {
        eprintln!("Skipping test: GDAL GTiff driver not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    // 2 枚は境界の 1 列を共有し、合計 1025 x 1025 px になる
    let west = write_dem(dir.path(), "west.tif", LEFT, 513, 1025, 1.0, slope);
    let east = write_dem(dir.path(), "east.tif", LEFT + 512.0, 513, 1025, 1.0, slope);

    let (mut factory, mut infos) = options(&dir);
    let errors = factory.read_files(&[west, east], 0, &mut infos);
    assert!(errors.is_empty(), "{:?}", errors);
    assert_eq!(infos.crs().authority_id(), 32633);
    assert_eq!(infos.extents.width(), 1025.0);

    factory.prepare_import(&mut infos).unwrap();
    assert_eq!(infos.tiles.len(), 1);
    assert_eq!(factory.raster_data_count(0), 1);

    let tile = &infos.tiles[0];
    assert_eq!(tile.import_resolution, Resolution::new(1025, 1025));
    assert!(tile.landscape_resolution.x >= 1025);
    assert!(tile.landscape_resolution.y >= 1025);
    // 地理座標との往復誤差のみ
    assert!((tile.extents.left - LEFT).abs() < 1e-6);
    assert!((tile.extents.top - TOP).abs() < 1e-6);
    assert!(tile.min_altitude >= 99.9);
    assert!(tile.max_altitude <= 100.0 + 10.24 + 20.48 + 0.1);

    let data = factory.next_raster_data(0, 0);
    assert!(data.error.is_none(), "{:?}", data.error);
    let heights = data.height_data.unwrap();
    assert_eq!((heights.width(), heights.height()), (1025, 1025));
    // 東側のファイルから来た値
    assert!((heights.get(1000, 10) - slope(LEFT + 1000.0, 10.0)).abs() < 1e-3);

    let values = factory.import(heights, 0, &mut infos).unwrap();
    assert_eq!(values.len(), 1025 * 1025);
    assert!(values[0] < values[values.len() - 1]);
}

fn mosaic(files: &[String], dir: &TempDir) -> (Grid<f64>, Extents) {
    let (mut factory, mut infos) = options(dir);
    let errors = factory.read_files(files, 0, &mut infos);
    assert!(errors.is_empty(), "{:?}", errors);
    factory.prepare_import(&mut infos).unwrap();
    assert_eq!(infos.tiles.len(), 1);
    let data = factory.next_raster_data(0, 0);
    (data.height_data.unwrap(), infos.tiles[0].extents)
}

#[test]
fn test_finer_source_wins_regardless_of_order() {
    if !gtiff_available() {
        eprintln!("Skipping test: GDAL GTiff driver not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    let coarse = write_dem(dir.path(), "coarse.tif", LEFT, 21, 21, 10.0, |_, _| 100.0);
    let fine = write_dem(dir.path(), "fine.tif", LEFT, 51, 51, 2.0, |_, _| 200.0);

    let (a, extents) = mosaic(&[coarse.clone(), fine.clone()], &dir);
    let (b, _) = mosaic(&[fine, coarse], &dir);

    // 最も細かい 2 m で 210 m を覆う
    assert_eq!((a.width(), a.height()), (105, 105));
    assert!((extents.left - LEFT).abs() < 1e-6);
    assert_eq!(a.data(), b.data());
    assert_eq!(a.get(10, 10), 200.0);
    assert_eq!(a.get(95, 95), 100.0);
}

#[test]
fn test_second_import_extends_existing_grid() {
    if !gtiff_available() {
        eprintln!("Skipping test: GDAL GTiff driver not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    let first = write_dem(dir.path(), "first.tif", LEFT, 65, 65, 1.0, slope);
    let (mut factory, mut infos) = options(&dir);
    let errors = factory.read_files(&[first], 0, &mut infos);
    assert!(errors.is_empty(), "{:?}", errors);
    factory.prepare_import(&mut infos).unwrap();
    assert_eq!(infos.tiles.len(), 1);
    assert_eq!(infos.tiles[0].import_resolution, Resolution::new(65, 65));
    assert!((infos.tiles[0].extents.right - (LEFT + 65.0)).abs() < 1e-3);

    // 西側に 1 列だけ重なる 2 枚目
    let west = write_dem(dir.path(), "west.tif", LEFT - 40.0, 41, 60, 1.0, slope);
    let errors = factory.read_files(&[west], 1, &mut infos);
    assert!(errors.is_empty(), "{:?}", errors);
    factory.prepare_import(&mut infos).unwrap();
    assert!(infos.tiles.len() > 1);

    // 右下 (LEFT + 65, TOP - 65) から 64.5 m ずつずらした格子に載る
    let added = &infos.tiles[1..];
    assert!(added.iter().all(|t| t.import_resolution == Resolution::new(65, 65)));
    for tile in added {
        let column = (tile.extents.left - (LEFT - 64.0)) / 64.0;
        assert!((column - column.round()).abs() < 1e-6, "{}", tile.extents.left);
        let row = (TOP + 64.0 - tile.extents.top) / 64.0;
        assert!((row - row.round()).abs() < 1e-6, "{}", tile.extents.top);
    }
    let covering = added
        .iter()
        .find(|t| (t.extents.left - (LEFT - 64.0)).abs() < 1e-3 && (t.extents.top - TOP).abs() < 1e-3)
        .unwrap();
    assert!((covering.extents.right - (LEFT + 1.0)).abs() < 1e-3);
    assert!((covering.extents.bottom - (TOP - 65.0)).abs() < 1e-3);
}
