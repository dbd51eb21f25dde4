use geo_landscape::{
    Bounds, Extents, GeometryKind, ImportOptions, LandscapingInfo, LandscapingInfos, Point,
    VectorTileFactory,
};
use std::fs;
use tempfile::TempDir;

fn geojson_available() -> bool {
    gdal::DriverManager::get_driver_by_name("GeoJSON").is_ok()
}

const UTM_FEATURES: &str = r#"{
  "type": "FeatureCollection",
  "name": "survey",
  "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::32633" } },
  "features": [
    { "type": "Feature", "properties": { "highway": "track", "name": "Forest Track" },
      "geometry": { "type": "LineString", "coordinates": [[400500.0, 4999500.0], [402000.0, 4999500.0]] } },
    { "type": "Feature", "properties": { "landuse": "meadow" },
      "geometry": { "type": "Polygon", "coordinates": [[[400100.0, 4999900.0], [400200.0, 4999900.0], [400200.0, 4999800.0], [400100.0, 4999900.0]]] } },
    { "type": "Feature", "properties": { "landuse": "forest" },
      "geometry": { "type": "Polygon", "coordinates": [[[403000.0, 4990000.0], [403100.0, 4990000.0], [403100.0, 4989900.0], [403000.0, 4990000.0]]] } }
  ]
}"#;

const LONLAT_FEATURES: &str = r#"{
  "type": "FeatureCollection",
  "name": "paths",
  "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
  "features": [
    { "type": "Feature", "properties": { "highway": "path", "name": "Ridge Path" },
      "geometry": { "type": "LineString", "coordinates": [[11.390, 47.260], [11.392, 47.262]] } },
    { "type": "Feature", "properties": { "natural": "peak" },
      "geometry": { "type": "Point", "coordinates": [11.395, 47.258] } }
  ]
}"#;

// 32633 の 1 km 四方のタイルを 1 枚持つ状態
fn infos_with_utm_tile(options: &ImportOptions) -> LandscapingInfos {
    let mut infos = LandscapingInfos::new(options);
    infos.crs_mut().set_authority_id(32633, "").unwrap();
    infos.set_origin(Point::new(400_000.0, 5_000_000.0));
    let extents = Extents::new(4_999_000.0, 400_000.0, 5_000_000.0, 401_000.0);
    let crs = infos.crs().clone();
    let bounds = Bounds::from_points(
        crs.convert_crs_point_to_engine(extents.left_top()),
        crs.convert_crs_point_to_engine(extents.right_bottom()),
    );
    infos.extents = extents;
    infos.tiles.push(LandscapingInfo {
        extents,
        bounds,
        ..Default::default()
    });
    infos
}

#[test]
fn test_vector_file_clipped_to_tile() {
    if !geojson_available() {
        eprintln!("GeoJSON driver not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("survey.geojson");
    fs::write(&path, UTM_FEATURES).unwrap();

    let options = ImportOptions::default();
    let mut infos = infos_with_utm_tile(&options);
    let mut factory = VectorTileFactory::new(options, false);
    factory
        .add_file(&path.to_string_lossy(), 0, false, &mut infos)
        .unwrap();
    assert!(factory.has_vector_files());
    assert_eq!(
        factory.available_feature_classes(&[GeometryKind::Polygon], true),
        vec!["meadow".to_string(), "forest".to_string()]
    );

    let bounds = infos.tiles[0].bounds;
    let cropped = factory.shapes(0, true, &infos);
    // 外側の森は落ちる
    assert_eq!(cropped.len(), 2);
    let track = cropped
        .iter()
        .find(|shape| shape.name == "Forest Track")
        .unwrap();
    assert_eq!(track.points.len(), 2);
    let inside = infos
        .crs()
        .convert_crs_point_to_engine(Point::new(400_500.0, 4_999_500.0));
    assert!((track.points[0].x - inside.x).abs() < 1e-6);
    assert_eq!(track.points[1].x, bounds.max.x);
    assert!((track.points[1].y - inside.y).abs() < 1e-6);
    assert_eq!(track.points_original[1], Point::new(402_000.0, 4_999_500.0));

    let whole = factory.shapes(0, false, &infos);
    assert_eq!(whole.len(), 1);
    assert_eq!(whole[0].feature_class_without_tag(), "meadow");
}

#[test]
fn test_vector_only_import_derives_crs() {
    if !geojson_available() {
        eprintln!("GeoJSON driver not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("paths.geojson");
    fs::write(&path, LONLAT_FEATURES).unwrap();

    let options = ImportOptions::default();
    let mut infos = LandscapingInfos::new(&options);
    let mut factory = VectorTileFactory::new(options, false);
    factory
        .add_file(&path.to_string_lossy(), 0, true, &mut infos)
        .unwrap();

    // 11.39E は UTM 32N
    assert_eq!(infos.crs().authority_id(), 32632);
    assert!(infos.tiles.is_empty());

    let objects = factory.objects(&infos);
    assert_eq!(objects.len(), 2);
    let path = objects
        .iter()
        .find(|shape| shape.kind == GeometryKind::LineString)
        .unwrap();
    // 原点は最初の点
    assert!(path.points[0].x.abs() < 1e-3);
    assert!(path.points[0].y.abs() < 1e-3);
    assert!(path.points[1].x > 0.0);
    // 北はエンジン空間の負の Y
    assert!(path.points[1].y < 0.0);
}
