//! ベクタ地物を集約し、タイル範囲で切り出してエンジン座標に写像する

use tracing::{error, info};

use super::{segment_intersection_2d, GeometryKind, VectorData, VectorFile};
use crate::config::{ImportOptions, ProjectionMode};
use crate::crs::CoordinateReferenceSystem;
use crate::error::{LandscapeError, Result};
use crate::extents::Point;
use crate::info::{Bounds, LandscapingInfos};

fn vector_error(err: anyhow::Error) -> LandscapeError {
    LandscapeError::Vector(format!("{:#}", err))
}

// 属性だけを引き継いだ空の地物
fn empty_like(shape: &VectorData) -> VectorData {
    VectorData {
        points: Vec::new(),
        points_original: Vec::new(),
        bounds: Bounds::default(),
        ..shape.clone()
    }
}

/// Moves `outside` onto the first bounds edge (top, right, bottom, left) that the
/// segment to `inside` crosses. Keeps `outside` when no edge is crossed.
fn clip_to_edge(outside: Point, inside: Point, bounds: &Bounds) -> Point {
    let upper_left = Point::new(bounds.min.x, bounds.min.y);
    let upper_right = Point::new(bounds.max.x, bounds.min.y);
    let lower_left = Point::new(bounds.min.x, bounds.max.y);
    let lower_right = Point::new(bounds.max.x, bounds.max.y);
    let edges = [
        (upper_left, upper_right),
        (upper_right, lower_right),
        (lower_right, lower_left),
        (lower_left, upper_left),
    ];
    edges
        .iter()
        .find_map(|&(a, b)| segment_intersection_2d(outside, inside, a, b))
        .unwrap_or(outside)
}

/// Shapes of all added vector files for one import session.
#[derive(Debug)]
pub struct VectorTileFactory {
    options: ImportOptions,
    landuse: bool,
    shapes: Vec<VectorData>,
    has_vector_files: bool,
}

impl VectorTileFactory {
    pub fn new(options: ImportOptions, landuse: bool) -> Self {
        Self {
            options,
            landuse,
            shapes: Vec::new(),
            has_vector_files: false,
        }
    }

    pub fn has_vector_files(&self) -> bool {
        self.has_vector_files
    }

    /// Shapes in the level CRS, as read.
    pub fn raw_shapes(&self) -> &[VectorData] {
        &self.shapes
    }

    fn open(&self, filename: &str, crs: &CoordinateReferenceSystem) -> Result<VectorFile> {
        VectorFile::open(filename, &self.options, self.landuse, crs).map_err(vector_error)
    }

    // タイルが無い場合に CRS と原点を最初の点から決める
    fn bootstrap_crs(&self, filename: &str, infos: &mut LandscapingInfos) -> Result<()> {
        if !infos.crs().is_authority_id_valid() {
            match infos.crs().projection_mode() {
                ProjectionMode::CustomCrs => {
                    infos.crs_mut().set_authority_id(self.options.target_epsg, "")?;
                }
                ProjectionMode::AutoUtm => {
                    let file = self.open(filename, infos.crs())?;
                    let reference = file.first_point().map_err(vector_error)?;
                    info!("VectorFile ReferencePoint: {}", reference);
                    let geog = infos.crs().convert_point_to_geog_cs(
                        reference.x,
                        reference.y,
                        file.source_projection(),
                        "",
                        false,
                    )?;
                    let utm = CoordinateReferenceSystem::utm_authority_id(geog.x, geog.y);
                    infos.crs_mut().set_authority_id(utm, "")?;
                }
                ProjectionMode::UseSourceCrs => {
                    return Err(LandscapeError::InvalidInput(
                        "Projection Mode 'Use Source Projection' not available on VectorFile only import"
                            .to_string(),
                    ));
                }
            }
        }

        let file = self.open(filename, infos.crs())?;
        let first = file.first_point().map_err(vector_error)?;
        let left_top = infos.crs().convert_point_to_geog_cs(
            first.x,
            first.y,
            file.source_projection(),
            infos.crs().wkt(),
            false,
        )?;
        infos.set_origin(left_top);
        if infos.extents.is_empty() {
            infos.extents.left = left_top.x;
            infos.extents.top = left_top.y;
        }
        Ok(())
    }

    /// Reads a vector file, clipped to the extents of tile `tile_index` when that
    /// tile exists. Without tiles the level CRS and origin are derived from the
    /// file's first point.
    pub fn add_file(
        &mut self,
        filename: &str,
        tile_index: usize,
        check_extents: bool,
        infos: &mut LandscapingInfos,
    ) -> Result<()> {
        let tile_extents = infos.tiles.get(tile_index).map(|tile| tile.extents).unwrap_or_default();
        if tile_extents.is_empty() {
            self.bootstrap_crs(filename, infos)?;
        }

        let mut file = self.open(filename, infos.crs())?;
        file.set_clip_extents(tile_extents, check_extents);
        let new_shapes = file.shapes(infos.crs()).map_err(|e| {
            error!("Add Vectorfile - {:#}", e);
            vector_error(e)
        })?;
        self.shapes.extend(new_shapes);

        if self.shapes.is_empty() {
            let hint = if self.options.extended_crs_compatibility {
                ""
            } else {
                " - you might enable extended CRS compatibility"
            };
            let msg = format!("Could not find shapes in Bounds of the Landscape{}", hint);
            error!("Add File failed: {}", msg);
            return Err(LandscapeError::Vector(msg));
        }
        self.has_vector_files = true;
        Ok(())
    }

    /// Distinct feature classes, optionally restricted to `filter` kinds.
    pub fn available_feature_classes(&self, filter: &[GeometryKind], strip_geometry_name: bool) -> Vec<String> {
        let mut classes: Vec<String> = Vec::new();
        for shape in &self.shapes {
            if !filter.is_empty() && !filter.contains(&shape.kind) {
                continue;
            }
            let class = if strip_geometry_name {
                shape.feature_class_without_tag()
            } else {
                shape.feature_class.as_str()
            };
            if !classes.iter().any(|c| c == class) {
                classes.push(class.to_string());
            }
        }
        classes
    }

    fn tile_bounds(&self, tile_index: usize, infos: &LandscapingInfos) -> Option<Bounds> {
        let bounds = infos.tiles.get(tile_index).map(|tile| tile.bounds)?;
        bounds.is_valid().then_some(bounds)
    }

    /// Every shape mapped to engine space, cut at the bounds of tile `tile_index`.
    ///
    /// An outside point next to an inside point is moved onto the bounds edge.
    pub fn objects_in_bounds(&self, tile_index: usize, infos: &LandscapingInfos) -> Vec<VectorData> {
        let Some(bounds) = self.tile_bounds(tile_index, infos) else {
            error!("Get Objects In Bounds - Bounds not valid for Tile {}", tile_index);
            return Vec::new();
        };
        let crs = infos.crs();
        let mut objects = Vec::new();
        for shape in &self.shapes {
            let mapped: Vec<Point> = shape.points.iter().map(|p| crs.convert_crs_point_to_engine(*p)).collect();
            let mut object = empty_like(shape);
            for (j, &point) in mapped.iter().enumerate() {
                let mut point = point;
                let mut keep = bounds.contains(&point);
                if !keep {
                    if let Some(next) = mapped.get(j + 1).filter(|next| bounds.contains(next)) {
                        point = clip_to_edge(point, *next, &bounds);
                        keep = true;
                    }
                }
                if !keep && j > 0 {
                    let previous = mapped[j - 1];
                    if bounds.contains(&previous) {
                        point = clip_to_edge(point, previous, &bounds);
                        keep = true;
                    }
                }
                if keep {
                    object.points_original.push(shape.points[j]);
                    object.points.push(point);
                }
            }
            if !object.points.is_empty() {
                object.update_bounds();
                objects.push(object);
            }
        }
        info!("Got {} shapes in Bounds for Tile {}", objects.len(), tile_index);
        objects
    }

    /// Whole polygons whose bounding box intersects the bounds of tile
    /// `tile_index`, mapped to engine space and sorted north to south.
    pub fn mapped_objects(&self, tile_index: usize, infos: &LandscapingInfos) -> Vec<VectorData> {
        let Some(bounds) = self.tile_bounds(tile_index, infos) else {
            error!("Get Mapped Objects - Bounds not valid for Tile {}", tile_index);
            return Vec::new();
        };
        let mut objects: Vec<VectorData> = self
            .shapes
            .iter()
            .filter(|shape| shape.kind == GeometryKind::Polygon && !shape.points.is_empty())
            .map(|shape| self.mapped(shape, infos.crs()))
            .filter(|object| object.bounds.intersects(&bounds))
            .collect();
        objects.sort_by(|a, b| a.bounds.min.y.total_cmp(&b.bounds.min.y));
        info!("Got {} shapes in or intersecting Bounds for Tile {}", objects.len(), tile_index);
        objects
    }

    fn mapped(&self, shape: &VectorData, crs: &CoordinateReferenceSystem) -> VectorData {
        let mut object = empty_like(shape);
        object.points_original = shape.points.clone();
        object.points = shape.points.iter().map(|p| crs.convert_crs_point_to_engine(*p)).collect();
        object.update_bounds();
        object
    }

    /// Every shape mapped to engine space.
    pub fn objects(&self, infos: &LandscapingInfos) -> Vec<VectorData> {
        let mut objects: Vec<VectorData> = self
            .shapes
            .iter()
            .filter(|shape| !shape.points.is_empty())
            .map(|shape| self.mapped(shape, infos.crs()))
            .collect();
        objects.sort_by(|a, b| a.bounds.min.y.total_cmp(&b.bounds.min.y));
        info!("Got {} shapes from file", objects.len());
        objects
    }

    /// Cropped shapes with `crop`, whole polygons otherwise.
    pub fn shapes(&self, tile_index: usize, crop: bool, infos: &LandscapingInfos) -> Vec<VectorData> {
        if crop {
            self.objects_in_bounds(tile_index, infos)
        } else {
            self.mapped_objects(tile_index, infos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extents::Extents;
    use crate::info::LandscapingInfo;

    fn shape(kind: GeometryKind, class: &str, points: &[(f64, f64)]) -> VectorData {
        let mut data = VectorData::new(kind);
        data.feature_class = format!("{} ({})", class, kind.tag());
        data.points = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
        data.points_original = data.points.clone();
        data
    }

    // 原点 (0, 100)、1 単位 = 100 エンジン単位
    fn infos_with_tile() -> LandscapingInfos {
        let mut infos = LandscapingInfos::new(&ImportOptions::default());
        infos.set_origin(Point::new(0.0, 100.0));
        let crs = infos.crs().clone();
        let extents = Extents::new(0.0, 0.0, 100.0, 100.0);
        let bounds = Bounds::from_points(
            crs.convert_crs_point_to_engine(extents.left_top()),
            crs.convert_crs_point_to_engine(extents.right_bottom()),
        );
        infos.tiles.push(LandscapingInfo {
            extents,
            bounds,
            ..Default::default()
        });
        infos
    }

    fn factory_with(shapes: Vec<VectorData>) -> VectorTileFactory {
        let mut factory = VectorTileFactory::new(ImportOptions::default(), false);
        factory.shapes = shapes;
        factory
    }

    #[test]
    fn test_clip_at_right_edge() {
        let infos = infos_with_tile();
        let factory = factory_with(vec![shape(
            GeometryKind::LineString,
            "road",
            &[(50.0, 50.0), (150.0, 70.0)],
        )]);
        let objects = factory.objects_in_bounds(0, &infos);
        assert_eq!(objects.len(), 1);
        let points = &objects[0].points;
        assert_eq!(points.len(), 2);
        let bounds = infos.tiles[0].bounds;
        assert_eq!(points[1].x, bounds.max.x);
        assert!((points[1].y - 4000.0).abs() < 1e-6);
        assert!(bounds.contains(&points[1]));
        // 元の座標は保持される
        assert_eq!(objects[0].points_original[1], Point::new(150.0, 70.0));
    }

    #[test]
    fn test_clip_entering_from_top() {
        let infos = infos_with_tile();
        let factory = factory_with(vec![shape(
            GeometryKind::LineString,
            "river",
            &[(20.0, 140.0), (20.0, 120.0), (20.0, 80.0), (20.0, 60.0)],
        )]);
        let objects = factory.objects_in_bounds(0, &infos);
        let points = &objects[0].points;
        // 最初の点は隣が外なので落ちる
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], Point::new(2000.0, infos.tiles[0].bounds.min.y));
        assert_eq!(points[0].y, 0.0);
    }

    #[test]
    fn test_fully_outside_is_dropped() {
        let infos = infos_with_tile();
        let factory = factory_with(vec![shape(
            GeometryKind::LineString,
            "road",
            &[(150.0, 50.0), (160.0, 50.0)],
        )]);
        assert!(factory.objects_in_bounds(0, &infos).is_empty());
        assert!(factory.objects_in_bounds(5, &infos).is_empty());
    }

    #[test]
    fn test_mapped_objects_sorted_polygons() {
        let infos = infos_with_tile();
        let factory = factory_with(vec![
            shape(GeometryKind::Polygon, "lake", &[(10.0, 20.0), (30.0, 20.0), (30.0, 10.0)]),
            shape(GeometryKind::LineString, "road", &[(10.0, 10.0), (20.0, 20.0)]),
            shape(GeometryKind::Polygon, "forest", &[(10.0, 90.0), (130.0, 90.0), (130.0, 80.0)]),
            shape(GeometryKind::Polygon, "far", &[(200.0, 90.0), (230.0, 90.0)]),
        ]);
        let objects = factory.mapped_objects(0, &infos);
        let classes: Vec<&str> = objects.iter().map(|o| o.feature_class.as_str()).collect();
        assert_eq!(classes, vec!["forest (POLYGON)", "lake (POLYGON)"]);
        // 切り取らない
        assert_eq!(objects[0].points.len(), 3);
        assert_eq!(objects[0].points[1].x, 13_000.0);
    }

    #[test]
    fn test_mapped_objects_without_inner_vertex() {
        let infos = infos_with_tile();
        let factory = factory_with(vec![
            // タイル全体を覆う
            shape(
                GeometryKind::Polygon,
                "meadow",
                &[(-10.0, -10.0), (110.0, -10.0), (110.0, 110.0), (-10.0, 110.0)],
            ),
            // 頂点はすべて外側で、帯状に横切る
            shape(
                GeometryKind::Polygon,
                "river",
                &[(-20.0, 40.0), (120.0, 40.0), (120.0, 60.0), (-20.0, 60.0)],
            ),
            shape(
                GeometryKind::Polygon,
                "far",
                &[(200.0, 40.0), (230.0, 40.0), (230.0, 60.0)],
            ),
        ]);
        let objects = factory.mapped_objects(0, &infos);
        let mut classes: Vec<&str> = objects.iter().map(|o| o.feature_class_without_tag()).collect();
        classes.sort();
        assert_eq!(classes, vec!["meadow", "river"]);
        let bounds = infos.tiles[0].bounds;
        assert!(objects.iter().all(|o| o.points.iter().all(|p| !bounds.contains(p))));
        // crop 無しの shapes も同じ結果
        assert_eq!(factory.shapes(0, false, &infos).len(), 2);
    }

    #[test]
    fn test_available_feature_classes() {
        let factory = factory_with(vec![
            shape(GeometryKind::Polygon, "forest", &[(0.0, 0.0)]),
            shape(GeometryKind::LineString, "road", &[(0.0, 0.0)]),
            shape(GeometryKind::Polygon, "forest", &[(1.0, 1.0)]),
        ]);
        assert_eq!(
            factory.available_feature_classes(&[], false),
            vec!["forest (POLYGON)", "road (LINESTRING)"]
        );
        assert_eq!(
            factory.available_feature_classes(&[GeometryKind::Polygon], true),
            vec!["forest"]
        );
    }

    #[test]
    fn test_use_source_crs_rejected() {
        let options = ImportOptions {
            projection_mode: ProjectionMode::UseSourceCrs,
            ..Default::default()
        };
        let mut infos = LandscapingInfos::new(&options);
        let mut factory = VectorTileFactory::new(options, false);
        let err = factory.add_file("does-not-matter.geojson", 0, true, &mut infos).unwrap_err();
        assert!(err.to_string().contains("Use Source Projection"));
        assert!(!factory.has_vector_files());
    }
}
