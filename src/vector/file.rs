//! ベクタファイル 1 つの読み込みとレベル CRS への変換

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, CoordTransformOptions, SpatialRef};
use gdal::vector::{FieldValue, Geometry, LayerAccess, OGRwkbGeometryType};
use gdal::{Dataset, DatasetOptions, GdalOpenFlags};
use tracing::{debug, error, info};

use super::{GeometryKind, VectorData};
use crate::config::ImportOptions;
use crate::crs::{spatial_ref_from, CoordinateReferenceSystem};
use crate::data_source::slippy::{tile_x_to_lon, tile_y_to_lat};
use crate::extents::{Extents, Point};

/// Fields tried in order to find the feature class.
pub const FIELD_NAMES: [&str; 6] = ["fclass", "natural", "leisure", "landuse", "landarea", "class"];

// Mapbox ベクタタイルの座標範囲
const MVT_EXTENT: f64 = 4096.0;

fn is_boolean_like(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "false"
}

/// `x<tx>y<ty>z<zoom>.pbf`, but not `.osm.pbf`.
pub fn is_mapbox_tile(filename: &str) -> bool {
    filename.ends_with(".pbf") && !filename.ends_with(".osm.pbf")
}

/// Parses `x2968y6448z14.pbf` into `(2968, 6448, 14)`.
pub fn parse_tile_name(filename: &str) -> Option<(i64, i64, u8)> {
    let stem = Path::new(filename).file_stem()?.to_str()?;
    let rest = stem.strip_prefix('x')?;
    let (x, rest) = rest.split_once('y')?;
    let (y, zoom) = rest.split_once('z')?;
    Some((x.parse().ok()?, y.parse().ok()?, zoom.parse().ok()?))
}

fn invalid_tile_name(filename: &str) -> anyhow::Error {
    anyhow!(
        "pbf filename {} invalid. Should be x<tilenr>y<tilenr>z<zoomlevel>.pbf e.g. x2968y6448z14.pbf",
        filename
    )
}

fn geog_of(srs: &SpatialRef) -> Result<SpatialRef> {
    let mut geog = srs.geog_cs().context("Failed to get geographic CS")?;
    geog.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(geog)
}

fn transform_point(transform: &CoordTransform, point: Point) -> Option<Point> {
    let mut xs = [point.x];
    let mut ys = [point.y];
    let mut zs = [point.z];
    transform.transform_coords(&mut xs, &mut ys, &mut zs).ok()?;
    Some(Point::new3(xs[0], ys[0], zs[0]))
}

/// 地物のリーフ (点列) をジオメトリから再帰的に取り出す
fn collect_leaves(geometry: &Geometry, in_polygon: bool, out: &mut Vec<(GeometryKind, Vec<Point>)>) {
    let geometry_type = unsafe { gdal_sys::OGR_GT_Flatten(geometry.geometry_type()) };
    match geometry_type {
        OGRwkbGeometryType::wkbPolygon
        | OGRwkbGeometryType::wkbMultiPoint
        | OGRwkbGeometryType::wkbMultiLineString
        | OGRwkbGeometryType::wkbMultiPolygon
        | OGRwkbGeometryType::wkbGeometryCollection => {
            let in_polygon = in_polygon || geometry_type == OGRwkbGeometryType::wkbPolygon;
            for i in 0..geometry.geometry_count() {
                collect_leaves(&geometry.get_geometry(i), in_polygon, out);
            }
        }
        OGRwkbGeometryType::wkbPoint
        | OGRwkbGeometryType::wkbLineString
        | OGRwkbGeometryType::wkbLinearRing => {
            let kind = if geometry_type == OGRwkbGeometryType::wkbPoint {
                GeometryKind::Point
            } else if in_polygon {
                GeometryKind::Polygon
            } else {
                GeometryKind::LineString
            };
            let mut raw_points = Vec::new();
            geometry.get_points(&mut raw_points);
            let points = raw_points
                .into_iter()
                .map(|(x, y, z)| Point::new3(x, y, z))
                .collect();
            out.push((kind, points));
        }
        _ => debug!("Skipping unsupported geometry {}", geometry.geometry_name()),
    }
}

/// Attributes and labels shared by every leaf of one feature.
/// Returns `None` when no feature class can be determined.
fn feature_template(fields: &[(String, Option<FieldValue>)], layer_name: &str, landuse: bool) -> Option<VectorData> {
    let mut template = VectorData::new(GeometryKind::LineString);
    for field_name in FIELD_NAMES {
        let value = fields
            .iter()
            .find(|(name, _)| name == field_name)
            .and_then(|(_, value)| value.clone())
            .and_then(FieldValue::into_string);
        if let Some(value) = value {
            if !value.is_empty() && !is_boolean_like(&value) {
                template.feature_class = value;
                break;
            }
        }
    }

    if landuse {
        if let Some((_, Some(value))) = fields.iter().find(|(name, _)| name == "name") {
            template.name = value.clone().into_string().unwrap_or_default();
        }
    } else {
        for (name, value) in fields {
            let Some(value) = value else {
                continue;
            };
            match value {
                FieldValue::IntegerValue(v) => {
                    template.integer_attributes.insert(name.clone(), *v);
                }
                FieldValue::Integer64Value(v) => {
                    template.integer64_attributes.insert(name.clone(), *v);
                }
                FieldValue::RealValue(v) => {
                    template.double_attributes.insert(name.clone(), *v);
                }
                FieldValue::StringValue(v) => {
                    template.string_attributes.insert(name.clone(), v.clone());
                    if name == "name" {
                        template.name = v.clone();
                    } else if template.feature_class.is_empty()
                        && name != "id"
                        && name != "type"
                        && !v.is_empty()
                        && !is_boolean_like(v)
                    {
                        template.feature_class = v.clone();
                    }
                }
                other => {
                    let v = other.clone().into_string().unwrap_or_default();
                    template.string_attributes.insert(name.clone(), v);
                }
            }
        }
    }

    if template.feature_class.is_empty() {
        template.feature_class = layer_name.to_string();
    }
    if template.feature_class.is_empty() {
        return None;
    }
    Some(template)
}

/// Tile-local MVT coordinates (0..4096) to EPSG:3857.
#[derive(Debug, Clone, Copy)]
struct TileOrigin {
    origin: Point,
    resolution_x: f64,
    resolution_y: f64,
}

impl TileOrigin {
    fn new(x: i64, y: i64, zoom: u8, crs: &CoordinateReferenceSystem) -> Result<Self> {
        let origin = crs
            .convert_point_to_geog_cs(tile_x_to_lon(x, zoom), tile_y_to_lat(y, zoom), "EPSG:3857", "", true)
            .context("Failed to convert tile origin to EPSG:3857")?;
        let max = crs
            .convert_point_to_geog_cs(tile_x_to_lon(x + 1, zoom), tile_y_to_lat(y + 1, zoom), "EPSG:3857", "", true)
            .context("Failed to convert tile end to EPSG:3857")?;
        let span_x = max.x - origin.x;
        let span_y = (max.y - origin.y).abs();
        if span_x <= 0.0 || span_y <= 0.0 {
            bail!("Invalid tile span for x{} y{} z{}", x, y, zoom);
        }
        // MVT の Y は下向きのため南端を原点にする
        let tile = Self {
            origin: Point::new(origin.x, max.y),
            resolution_x: MVT_EXTENT / span_x,
            resolution_y: MVT_EXTENT / span_y,
        };
        info!(
            "pbf file x: {} y: {} zoom: {} - Origin: {} - Resolution: {},{}",
            x, y, zoom, tile.origin, tile.resolution_x, tile.resolution_y
        );
        Ok(tile)
    }

    fn apply(&self, point: Point) -> Point {
        Point::new3(
            point.x / self.resolution_x + self.origin.x,
            point.y / self.resolution_y + self.origin.y,
            point.z,
        )
    }
}

pub struct VectorFile {
    dataset: Dataset,
    filename: String,
    source_projection: String,
    tile_origin: Option<TileOrigin>,
    clip_extents: Extents,
    check_extents: bool,
    landuse: bool,
    extended_crs_compatibility: bool,
    connect_linestrings: bool,
}

impl std::fmt::Debug for VectorFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorFile")
            .field("filename", &self.filename)
            .field("source_projection", &self.source_projection)
            .field("clip_extents", &self.clip_extents)
            .finish()
    }
}

impl VectorFile {
    /// Opens a vector dataset and determines its source projection.
    ///
    /// The projection is taken from the dataset, then from the first layer that
    /// has one, then from the sibling `.prj` of a Shapefile, then from the tile
    /// number encoded in a Mapbox pbf filename. Anything else is EPSG:4326.
    pub fn open(
        filename: &str,
        options: &ImportOptions,
        landuse: bool,
        crs: &CoordinateReferenceSystem,
    ) -> Result<Self> {
        if filename.is_empty() {
            bail!("Reading failed, filename not specified");
        }
        let dataset = if is_mapbox_tile(filename) {
            Self::open_mvt(filename)?
        } else {
            Dataset::open_ex(
                filename,
                DatasetOptions {
                    open_flags: GdalOpenFlags::GDAL_OF_VECTOR | GdalOpenFlags::GDAL_OF_READONLY,
                    ..Default::default()
                },
            )
            .with_context(|| format!("Open {} failed", filename))?
        };

        let mut file = Self {
            dataset,
            filename: filename.to_string(),
            source_projection: String::new(),
            tile_origin: None,
            clip_extents: Extents::default(),
            check_extents: false,
            landuse,
            extended_crs_compatibility: options.extended_crs_compatibility,
            connect_linestrings: options.connect_linestrings,
        };
        file.fetch_source_projection(crs)?;
        Ok(file)
    }

    // MVT ドライバは <z>-<x>-<y>.pbf の名前を期待する
    fn open_mvt(filename: &str) -> Result<Dataset> {
        let (x, y, zoom) = parse_tile_name(filename).ok_or_else(|| invalid_tile_name(filename))?;
        let dir = Path::new(filename).parent().unwrap_or_else(|| Path::new(""));
        let destination: PathBuf = dir.join(format!("{}-{}-{}.pbf", zoom, x, y));
        if !destination.exists() {
            fs::copy(filename, &destination)
                .with_context(|| format!("Failed to copy {} to {}", filename, destination.display()))?;
        }
        let open_options = [format!("X={}", x), format!("Y={}", y), format!("Z={}", zoom)];
        let open_options: Vec<&str> = open_options.iter().map(String::as_str).collect();
        Dataset::open_ex(
            &destination,
            DatasetOptions {
                open_flags: GdalOpenFlags::GDAL_OF_VECTOR | GdalOpenFlags::GDAL_OF_READONLY,
                allowed_drivers: Some(&["MVT"]),
                open_options: Some(&open_options),
                ..Default::default()
            },
        )
        .with_context(|| format!("Open {} failed", destination.display()))
    }

    fn fetch_source_projection(&mut self, crs: &CoordinateReferenceSystem) -> Result<()> {
        let projection = self.dataset.projection();
        if !projection.is_empty() {
            self.source_projection = projection;
            return Ok(());
        }
        for layer in self.dataset.layers() {
            if let Some(srs) = layer.spatial_ref() {
                if let Ok(wkt) = srs.to_wkt() {
                    if !wkt.is_empty() {
                        self.source_projection = wkt;
                        return Ok(());
                    }
                }
            }
        }

        let extension = Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if is_mapbox_tile(&self.filename) {
            let (x, y, zoom) = parse_tile_name(&self.filename).ok_or_else(|| invalid_tile_name(&self.filename))?;
            self.tile_origin = Some(TileOrigin::new(x, y, zoom, crs)?);
            self.source_projection = "EPSG:3857".to_string();
            info!("Set Source Projection of {} to EPSG:3857", self.filename);
        } else if extension == "shp" {
            let prj = Path::new(&self.filename).with_extension("prj");
            self.source_projection = fs::read_to_string(&prj).with_context(|| {
                format!(
                    "Could not find GeoReference for vector data at {}. Please make sure you have also the .prj and .shx file in the same directory.",
                    prj.display()
                )
            })?;
        } else {
            info!("{} file without projection info - assuming EPSG:4326", extension);
            self.source_projection = "EPSG:4326".to_string();
        }
        Ok(())
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `EPSG:<code>` or WKT of the source data.
    pub fn source_projection(&self) -> &str {
        &self.source_projection
    }

    /// Restricts extracted features to those with a vertex inside `extents`
    /// (level CRS). Empty extents or `check_extents == false` keep everything.
    pub fn set_clip_extents(&mut self, extents: Extents, check_extents: bool) {
        self.clip_extents = extents;
        self.check_extents = check_extents;
    }

    fn target_spatial_ref(&self, crs: &CoordinateReferenceSystem, source: &SpatialRef) -> Result<SpatialRef> {
        if !crs.wkt().is_empty() {
            return Ok(spatial_ref_from(crs.wkt())?);
        }
        if crs.is_authority_id_valid() {
            return Ok(spatial_ref_from(&crs.authority_id_str())?);
        }
        geog_of(source)
    }

    /// Reads every feature of every layer, transformed into the level CRS.
    pub fn shapes(&self, crs: &CoordinateReferenceSystem) -> Result<Vec<VectorData>> {
        let source = spatial_ref_from(&self.source_projection)
            .with_context(|| format!("Failed to read source projection of {}", self.filename))?;
        let source_geog = geog_of(&source)?;
        let target = self.target_spatial_ref(crs, &source)?;

        // タイル原点で計算した点は EPSG:3857 から直接変換する
        let tile_transform = match self.tile_origin {
            Some(_) => Some(CoordTransform::new(&source, &target).context("Transformation creation failed")?),
            None => None,
        };
        let extended = self.extended_crs_compatibility && tile_transform.is_none();

        let geog_clip = if self.clip_extents.is_empty() || crs.wkt().is_empty() {
            None
        } else {
            crs.convert_to_geog_cs(&self.clip_extents).ok()
        };
        let clip = if extended {
            geog_clip.unwrap_or_default()
        } else {
            self.clip_extents
        };
        let check = self.check_extents && !clip.is_empty();

        let mut transform_options = CoordTransformOptions::new()?;
        if let Some(aoi) = &geog_clip {
            transform_options.set_area_of_interest(aoi.left, aoi.bottom, aoi.right, aoi.top)?;
        }
        let feature_target = if extended { &source_geog } else { &target };
        let transform = CoordTransform::new_with_options(&source, feature_target, &transform_options)
            .with_context(|| format!("Transformation creation for {} failed", self.filename))?;

        let mut geometries = Vec::new();
        info!("Found {} layers in {}", self.dataset.layer_count(), self.filename);
        for mut layer in self.dataset.layers() {
            let layer_name = layer.name();
            for feature in layer.features() {
                let Some(geometry) = feature.geometry() else {
                    continue;
                };
                let geometry_type = unsafe { gdal_sys::OGR_GT_Flatten(geometry.geometry_type()) };
                if self.landuse
                    && !matches!(
                        geometry_type,
                        OGRwkbGeometryType::wkbPolygon
                            | OGRwkbGeometryType::wkbMultiPolygon
                            | OGRwkbGeometryType::wkbGeometryCollection
                    )
                {
                    continue;
                }
                let fields: Vec<(String, Option<FieldValue>)> = feature.fields().collect();
                let Some(template) = feature_template(&fields, &layer_name, self.landuse) else {
                    continue;
                };

                let mut leaves = Vec::new();
                if tile_transform.is_some() {
                    collect_leaves(geometry, false, &mut leaves);
                } else {
                    let mut geometry = geometry.clone();
                    if let Err(e) = geometry.transform_inplace(&transform) {
                        error!("Transforming {} for {} failed: {}", template.feature_class, self.filename, e);
                        continue;
                    }
                    collect_leaves(&geometry, false, &mut leaves);
                }

                for (kind, points) in leaves {
                    let points: Vec<Point> = match (&self.tile_origin, &tile_transform) {
                        (Some(origin), Some(transform)) => points
                            .into_iter()
                            .filter_map(|p| transform_point(transform, origin.apply(p)))
                            .collect(),
                        _ => points,
                    };
                    if points.is_empty() {
                        continue;
                    }
                    if check && !points.iter().any(|p| clip.contains_point(p)) {
                        continue;
                    }
                    let mut data = template.clone();
                    data.kind = kind;
                    data.feature_class = format!("{} ({})", data.feature_class, kind.tag());
                    data.id = format!("{}_{}_{}", self.filename, data.feature_class, points[0]);
                    data.points_original = points.clone();
                    data.points = points;
                    geometries.push(data);
                }
            }
        }

        if extended {
            // 地理座標系から目標 CRS へ点ごとに変換し、失敗した点はそのまま残す
            let to_target = CoordTransform::new(&source_geog, &target).context("Transformation creation failed")?;
            for data in geometries.iter_mut() {
                for point in data.points.iter_mut() {
                    if let Some(converted) = transform_point(&to_target, *point) {
                        *point = converted;
                    }
                }
                data.points_original = data.points.clone();
            }
        }
        info!("Get {} shapes from file {}", geometries.len(), self.filename);

        if self.connect_linestrings && !geometries.is_empty() {
            geometries = connect_linestrings(geometries);
        }
        Ok(geometries)
    }

    /// First vertex of the first layer, in the source CRS.
    pub fn first_point(&self) -> Result<Point> {
        let mut layer = self.dataset.layer(0).context("Vector file has no layers")?;
        for feature in layer.features() {
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            let mut leaves = Vec::new();
            collect_leaves(geometry, false, &mut leaves);
            if let Some(point) = leaves.into_iter().find_map(|(_, points)| points.first().copied()) {
                return Ok(match &self.tile_origin {
                    Some(origin) => origin.apply(point),
                    None => point,
                });
            }
        }
        bail!("Could not find valid reference point in {}", self.filename)
    }
}

fn end_to_start_distance(from: &VectorData, to: &VectorData) -> f64 {
    match (from.points.last(), to.points.first()) {
        (Some(end), Some(start)) => {
            let dx = end.x - start.x;
            let dy = end.y - start.y;
            dx * dx + dy * dy
        }
        _ => 0.0,
    }
}

// 最も離れた終点→始点の組の始点側から連結を始める
fn first_object_index(group: &[VectorData]) -> usize {
    let mut farthest = 0.0;
    let mut index = 0;
    for a in group {
        for (j, b) in group.iter().enumerate() {
            let distance = end_to_start_distance(a, b);
            if distance > farthest {
                farthest = distance;
                index = j;
            }
        }
    }
    index
}

fn next_object_index(current: &VectorData, group: &[VectorData], used: &[bool]) -> Option<usize> {
    group
        .iter()
        .enumerate()
        .filter(|(i, _)| !used[*i])
        .map(|(i, candidate)| (i, end_to_start_distance(current, candidate)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Chains same-named linestrings head to tail, nearest start point first.
///
/// Best effort: the result depends on the seed and is not an exact polyline
/// reconstruction. Unnamed geometries and non-linestrings pass through unchanged.
pub fn connect_linestrings(geometries: Vec<VectorData>) -> Vec<VectorData> {
    let mut result = Vec::new();
    let mut groups: Vec<Vec<VectorData>> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    for data in geometries {
        if data.name.is_empty() || data.kind != GeometryKind::LineString || data.points.is_empty() {
            result.push(data);
            continue;
        }
        match group_index.get(&data.name) {
            Some(&i) => groups[i].push(data),
            None => {
                group_index.insert(data.name.clone(), groups.len());
                groups.push(vec![data]);
            }
        }
    }

    for group in groups {
        let first = first_object_index(&group);
        let mut used = vec![false; group.len()];
        used[first] = true;
        let mut merged = group[first].clone();
        let mut used_points: Vec<Point> = merged.points.clone();
        let mut current = first;
        while let Some(next) = next_object_index(&group[current], &group, &used) {
            used[next] = true;
            for point in group[next].points.iter().skip(1) {
                if used_points.contains(point) {
                    continue;
                }
                merged.points.push(*point);
                used_points.push(*point);
            }
            current = next;
        }
        merged.points_original = merged.points.clone();
        if group.len() > 1 {
            debug!("Connected {} parts of {}", group.len(), merged.name);
        }
        result.push(merged);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn geojson_available() -> bool {
        gdal::DriverManager::get_driver_by_name("GeoJSON").is_ok()
    }

    fn line(name: &str, points: &[(f64, f64)]) -> VectorData {
        let mut data = VectorData::new(GeometryKind::LineString);
        data.name = name.to_string();
        data.points = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
        data.points_original = data.points.clone();
        data
    }

    const FIXTURE: &str = r#"{
  "type": "FeatureCollection",
  "name": "roads",
  "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:OGC:1.3:CRS84" } },
  "features": [
    { "type": "Feature", "properties": { "fclass": "primary", "name": "Main Street", "lanes": 2, "width": 7.5 },
      "geometry": { "type": "LineString", "coordinates": [[11.390, 47.260], [11.392, 47.262]] } },
    { "type": "Feature", "properties": { "fclass": "true", "surface": "asphalt", "name": "Side Road" },
      "geometry": { "type": "MultiLineString", "coordinates": [[[11.393, 47.263], [11.394, 47.264]], [[11.395, 47.265], [11.396, 47.266]]] } },
    { "type": "Feature", "properties": { "natural": "water" },
      "geometry": { "type": "Polygon", "coordinates": [[[11.391, 47.261], [11.392, 47.261], [11.392, 47.262], [11.391, 47.261]]] } },
    { "type": "Feature", "properties": { "fclass": "peak" },
      "geometry": { "type": "Point", "coordinates": [12.5, 48.5] } }
  ]
}"#;

    fn write_fixture(dir: &TempDir) -> String {
        let path = dir.path().join("roads.geojson");
        fs::write(&path, FIXTURE).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_parse_tile_name() {
        assert_eq!(parse_tile_name("/tmp/x2968y6448z14.pbf"), Some((2968, 6448, 14)));
        assert_eq!(parse_tile_name("2968y6448z14.pbf"), None);
        assert_eq!(parse_tile_name("x2968_6448z14.pbf"), None);
        assert!(is_mapbox_tile("x1y2z3.pbf"));
        assert!(!is_mapbox_tile("germany.osm.pbf"));
    }

    #[test]
    fn test_boolean_like_values() {
        assert!(is_boolean_like(" True "));
        assert!(is_boolean_like("false"));
        assert!(!is_boolean_like("forest"));
    }

    #[test]
    fn test_connect_linestrings_chains_fragments() {
        let parts = vec![
            line("river", &[(2.0, 0.0), (3.0, 0.0)]),
            line("river", &[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]),
            line("", &[(9.0, 9.0), (10.0, 9.0)]),
        ];
        let connected = connect_linestrings(parts);
        assert_eq!(connected.len(), 2);
        assert_eq!(connected[0].name, "");
        let xs: Vec<f64> = connected[1].points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_connect_linestrings_skips_used_points() {
        let parts = vec![
            line("trail", &[(0.0, 0.0), (1.0, 0.0)]),
            line("trail", &[(1.0, 0.0), (0.0, 0.0), (2.0, 0.0)]),
        ];
        let connected = connect_linestrings(parts);
        assert_eq!(connected.len(), 1);
        let xs: Vec<f64> = connected[0].points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_read_geojson_features() {
        if !geojson_available() {
            eprintln!("GeoJSON driver not available, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let filename = write_fixture(&dir);
        let options = ImportOptions::default();
        let crs = CoordinateReferenceSystem::new(&options);
        let file = VectorFile::open(&filename, &options, false, &crs).unwrap();
        assert!(!file.source_projection().is_empty());

        let first = file.first_point().unwrap();
        assert!((first.x - 11.390).abs() < 1e-9);
        assert!((first.y - 47.260).abs() < 1e-9);

        let shapes = file.shapes(&crs).unwrap();
        // 1 + 2 (multi) + 1 (ring) + 1 (point)
        assert_eq!(shapes.len(), 5);
        assert_eq!(shapes[0].feature_class, "primary (LINESTRING)");
        assert_eq!(shapes[0].name, "Main Street");
        assert_eq!(shapes[0].integer_attributes.get("lanes"), Some(&2));
        assert_eq!(shapes[0].double_attributes.get("width"), Some(&7.5));
        assert!(shapes[0].id.starts_with(&filename));
        // "true" は無視され、最初の文字列属性が使われる
        assert_eq!(shapes[1].feature_class, "asphalt (LINESTRING)");
        assert_eq!(shapes[2].feature_class, shapes[1].feature_class);
        assert_eq!(shapes[3].kind, GeometryKind::Polygon);
        assert_eq!(shapes[3].feature_class, "water (POLYGON)");
        assert_eq!(shapes[4].kind, GeometryKind::Point);
    }

    #[test]
    fn test_clip_extents_and_landuse() {
        if !geojson_available() {
            eprintln!("GeoJSON driver not available, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let filename = write_fixture(&dir);
        let options = ImportOptions::default();
        let crs = CoordinateReferenceSystem::new(&options);

        let mut file = VectorFile::open(&filename, &options, false, &crs).unwrap();
        file.set_clip_extents(Extents::new(48.0, 12.0, 49.0, 13.0), true);
        let shapes = file.shapes(&crs).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].kind, GeometryKind::Point);

        file.set_clip_extents(Extents::new(48.0, 12.0, 49.0, 13.0), false);
        assert_eq!(file.shapes(&crs).unwrap().len(), 5);

        let landuse = VectorFile::open(&filename, &options, true, &crs).unwrap();
        let shapes = landuse.shapes(&crs).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].kind, GeometryKind::Polygon);
        assert!(shapes[0].string_attributes.is_empty());
    }

    #[test]
    fn test_shapefile_without_prj() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.shp");
        let result = VectorFile::open(&path.to_string_lossy(), &ImportOptions::default(), false, &CoordinateReferenceSystem::default());
        assert!(result.is_err());
    }
}
