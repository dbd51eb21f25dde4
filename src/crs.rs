//! Level coordinate reference system: target authority, origin, scale and
//! every point/extents conversion between source projections and level space.

use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use tracing::{error, info, warn};

use crate::config::{ImportOptions, ProjectionMode};
use crate::error::{LandscapeError, Result};
use crate::extents::{Extents, Point};
use crate::info::LandscapingInfo;

pub const MIN_EPSG: i32 = 1000;
pub const MAX_EPSG: i32 = 32768;

#[derive(Debug, Clone)]
pub struct CoordinateReferenceSystem {
    authority_id: i32,
    wkt: String,
    origin: Point,
    // 常に地理座標系 (lon/lat) で保持
    cropped_extents: Extents,
    landscape_scale_factor: f64,
    vector_scale: Point,
    xy_offset: Point,
    projection_mode: ProjectionMode,
}

impl Default for CoordinateReferenceSystem {
    fn default() -> Self {
        Self {
            authority_id: 0,
            wkt: String::new(),
            origin: Point::ZERO,
            cropped_extents: Extents::default(),
            landscape_scale_factor: 1.0,
            vector_scale: Point::splat(100.0),
            xy_offset: Point::ZERO,
            projection_mode: ProjectionMode::AutoUtm,
        }
    }
}

/// Parses `EPSG:<code>` or any WKT/PROJ definition with traditional GIS axis order.
pub fn spatial_ref_from(proj: &str) -> Result<SpatialRef> {
    let mut srs = match proj.strip_prefix("EPSG:") {
        Some(code) => {
            let epsg: u32 = code.trim().parse().map_err(|_| {
                LandscapeError::Projection(format!("Invalid EPSG code '{}'", proj))
            })?;
            SpatialRef::from_epsg(epsg)?
        }
        None => SpatialRef::from_definition(proj)?,
    };
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

fn has_geog_cs(wkt: &str) -> bool {
    wkt.contains("GEOGCS") || wkt.contains("GEOGCRS")
}

impl CoordinateReferenceSystem {
    pub fn new(options: &ImportOptions) -> Self {
        let mut crs = Self {
            landscape_scale_factor: options.landscape_scale_factor,
            vector_scale: Point::splat(options.vector_scale),
            projection_mode: options.projection_mode,
            ..Self::default()
        };
        if options.projection_mode == ProjectionMode::CustomCrs {
            if let Err(e) = crs.set_authority_id(options.target_epsg, "") {
                warn!("Custom CRS EPSG:{} not applied: {}", options.target_epsg, e);
            }
        }
        crs
    }

    /// Valid authority and a non-zero origin.
    pub fn is_valid(&self) -> bool {
        self.is_authority_id_valid() && self.is_origin_valid()
    }

    pub fn authority_id(&self) -> i32 {
        self.authority_id
    }

    pub fn authority_id_str(&self) -> String {
        format!("EPSG:{}", self.authority_id)
    }

    pub fn is_authority_id_valid(&self) -> bool {
        Self::is_epsg_valid(self.authority_id)
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn set_origin(&mut self, origin: Point) {
        self.origin = origin;
    }

    pub fn is_origin_valid(&self) -> bool {
        !self.origin.is_zero()
    }

    pub fn projection_mode(&self) -> ProjectionMode {
        self.projection_mode
    }

    pub fn set_projection_mode(&mut self, mode: ProjectionMode) {
        self.projection_mode = mode;
    }

    /// EPSG codes strictly between `MIN_EPSG` and `MAX_EPSG` are accepted.
    pub fn is_epsg_valid(epsg: i32) -> bool {
        epsg > MIN_EPSG && epsg < MAX_EPSG
    }

    pub fn is_wkt_valid(wkt: &str, check_projected: bool) -> bool {
        if wkt.is_empty() {
            warn!("Wkt empty");
            return false;
        }
        match SpatialRef::from_wkt(wkt) {
            Ok(srs) => {
                if !check_projected || srs.is_projected() {
                    true
                } else {
                    error!("Wkt is not projected: {}", wkt);
                    false
                }
            }
            Err(e) => {
                error!("Wkt not valid ({}): {}", e, wkt);
                false
            }
        }
    }

    /// Sets the level authority. An empty `wkt` is resolved from `epsg`;
    /// a given `wkt` must describe a projected CRS. State is unchanged on error.
    pub fn set_authority_id(&mut self, epsg: i32, wkt: &str) -> Result<()> {
        let epsg_valid = Self::is_epsg_valid(epsg);
        if !epsg_valid && wkt.is_empty() {
            if epsg != 0 {
                error!("EPSG:{} out of valid range", epsg);
                if self.projection_mode != ProjectionMode::AutoUtm {
                    error!("You might still import the file when switching the projection mode to auto-utm");
                }
            }
            return Err(LandscapeError::Projection(format!(
                "Please use only valid CRS (Projected Coordinate Reference Systems), got EPSG:{}",
                epsg
            )));
        }

        if wkt.is_empty() {
            info!("Try setting Projection WKT of EPSG:{}", epsg);
            let srs = SpatialRef::from_epsg(epsg as u32).map_err(|e| {
                LandscapeError::Projection(format!(
                    "Load spatial ref from EPSG:{} failed: {}",
                    epsg, e
                ))
            })?;
            let resolved = srs.to_wkt().map_err(|e| {
                LandscapeError::Projection(format!("Export to WKT from EPSG:{} failed: {}", epsg, e))
            })?;
            self.authority_id = epsg;
            self.wkt = resolved;
            info!("Successfully determined Projection WKT for EPSG:{}", epsg);
            return Ok(());
        }

        if Self::is_wkt_valid(wkt, true) {
            self.authority_id = epsg;
            self.wkt = wkt.to_string();
            Ok(())
        } else {
            Err(LandscapeError::Projection(format!(
                "Projection of EPSG:{} is not a valid projected CRS",
                epsg
            )))
        }
    }

    /// Forgets the authority, WKT and origin.
    pub fn reset(&mut self) {
        self.authority_id = 0;
        self.wkt.clear();
        self.origin = Point::ZERO;
        self.cropped_extents.reset();
    }

    pub fn set_cropped_extents(&mut self, extents: Extents) {
        self.cropped_extents = extents;
    }

    /// Parses `"bottom,left,top,right"`; leaves the stored extents untouched on error.
    pub fn set_cropped_extents_str(&mut self, bbox: &str) -> Result<()> {
        self.cropped_extents = bbox.parse()?;
        Ok(())
    }

    pub fn cropped_extents(&self) -> Extents {
        self.cropped_extents
    }

    pub fn is_same_as_level_crs(&self, proj: &str) -> bool {
        let level = match SpatialRef::from_wkt(&self.wkt) {
            Ok(srs) => srs,
            Err(e) => {
                error!("Import Level WKT failed ({})", e);
                return false;
            }
        };
        match SpatialRef::from_definition(proj) {
            Ok(file) => file == level,
            Err(e) => {
                error!("Import file WKT failed ({})", e);
                false
            }
        }
    }

    /// Transforms one point between two projections (`EPSG:<code>` or WKT).
    ///
    /// An empty `to` means the geographic CS of `from` when it has one, else EPSG:4326.
    /// With `switch_direction` the point is transformed from `to` into `from`.
    pub fn convert_point_to_geog_cs(
        &self,
        x: f64,
        y: f64,
        from: &str,
        to: &str,
        switch_direction: bool,
    ) -> Result<Point> {
        if from.is_empty() {
            return Err(LandscapeError::Projection(
                "Convert Point failed - no Wkt".to_string(),
            ));
        }
        let source = spatial_ref_from(from)?;
        let target = if to.is_empty() && !from.starts_with("EPSG:") && has_geog_cs(from) {
            let mut geog = source.geog_cs()?;
            geog.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
            geog
        } else if !to.is_empty() {
            spatial_ref_from(to)?
        } else {
            spatial_ref_from("EPSG:4326")?
        };

        let transform = if switch_direction {
            CoordTransform::new(&target, &source)?
        } else {
            CoordTransform::new(&source, &target)?
        };
        let mut xs = [x];
        let mut ys = [y];
        transform
            .transform_coords(&mut xs, &mut ys, &mut [])
            .map_err(|e| {
                LandscapeError::Projection(format!(
                    "Convert Point ({}, {}) failed on transform: {}",
                    x, y, e
                ))
            })?;
        Ok(Point::new(xs[0], ys[0]))
    }

    // 左下と右上の2点のみを変換する
    fn convert_corners(&self, extents: &Extents, from: &str, to: &str, switch: bool) -> Result<Extents> {
        let left_bottom =
            self.convert_point_to_geog_cs(extents.left, extents.bottom, from, to, switch)?;
        let right_top =
            self.convert_point_to_geog_cs(extents.right, extents.top, from, to, switch)?;
        Ok(Extents::new(
            left_bottom.y,
            left_bottom.x,
            right_top.y,
            right_top.x,
        ))
    }

    /// Converts extents between two projections using only the bottom-left and
    /// top-right corners.
    pub fn convert_from_to(&self, extents: &Extents, from: &str, to: &str) -> Result<Extents> {
        self.convert_corners(extents, from, to, false)
    }

    /// Extents in `from_wkt` to lon/lat.
    pub fn convert_to_geog_cs_from(&self, extents: &Extents, from_wkt: &str) -> Result<Extents> {
        self.convert_corners(extents, from_wkt, "", false)
    }

    /// Lon/lat extents into `wkt`.
    pub fn convert_from_geog_cs_to(&self, extents: &Extents, wkt: &str) -> Result<Extents> {
        self.convert_corners(extents, wkt, "", true)
    }

    /// Level-CRS extents to lon/lat.
    pub fn convert_to_geog_cs(&self, extents: &Extents) -> Result<Extents> {
        self.convert_corners(extents, &self.wkt, "", false)
    }

    /// Lon/lat extents into the level CRS.
    pub fn convert_from_geog_cs(&self, extents: &Extents) -> Result<Extents> {
        self.convert_corners(extents, &self.wkt, "", true)
    }

    /// EPSG code of any projection definition, if one can be identified.
    pub fn find_authority_id(proj: &str) -> Option<i32> {
        let mut srs = SpatialRef::from_definition(proj).ok()?;
        // 失敗しても既存の AUTHORITY を参照する
        let _ = srs.auto_identify_epsg();
        srs.auth_code().ok()
    }

    pub fn dump_projection_to_log(proj: &str, filename: &str) {
        let pretty = SpatialRef::from_definition(proj).and_then(|srs| srs.to_pretty_wkt());
        match pretty {
            Ok(pretty) => {
                info!("{}:\n{}", filename, pretty);
                if pretty.contains("meter") || pretty.contains("metre") {
                    info!("File's unit appears to be meter and can be imported with the source projection mode");
                } else {
                    warn!("File's unit does not appear to be meter - please use projection mode auto-utm (recommended) or a custom CRS");
                }
            }
            Err(e) => {
                error!("{}: {}", filename, e);
                warn!("File's unit unclear or projection missing - please use a custom CRS and specify the file's CRS");
            }
        }
    }

    /// Multiplier from the level CRS linear unit to metres.
    pub fn linear_units(&self) -> Result<f64> {
        let srs = SpatialRef::from_epsg(self.authority_id as u32)?;
        Ok(srs.linear_units())
    }

    /// EPSG code of the WGS84 UTM zone containing (lon, lat).
    pub fn utm_authority_id(lon: f64, lat: f64) -> i32 {
        let zone = (((lon + 180.0) / 6.0).floor() as i64).rem_euclid(60) + 1;
        let base = if lat >= 0.0 { 32600 } else { 32700 };
        base + zone as i32
    }

    pub fn landscape_scale(&self, info: &LandscapingInfo) -> Point {
        info.landscape_scale * self.landscape_scale_factor
    }

    pub fn landscape_location(&self, info: &LandscapingInfo) -> Point {
        info.location() * self.landscape_scale_factor
    }

    pub fn landscape_scale_factor(&self) -> f64 {
        self.landscape_scale_factor
    }

    pub fn set_landscape_scale_factor(&mut self, factor: f64) {
        self.landscape_scale_factor = factor;
    }

    pub fn set_vector_scale(&mut self, scale: Point) {
        self.vector_scale = scale;
    }

    pub fn set_xy_offset(&mut self, offset: Point) {
        self.xy_offset = offset;
    }

    /// Maps a point already in the level CRS into engine space. Y is flipped.
    pub fn convert_crs_point_to_engine(&self, point: Point) -> Point {
        let scale = self.vector_scale * self.landscape_scale_factor;
        Point::new(
            (point.x - self.origin.x) * scale.x.abs() + self.xy_offset.x,
            (point.y - self.origin.y) * scale.y.abs() * -1.0 + self.xy_offset.y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proj_available() -> bool {
        SpatialRef::from_epsg(4326).is_ok()
    }

    #[test]
    fn test_utm_zone_formula() {
        assert_eq!(CoordinateReferenceSystem::utm_authority_id(-122.4, 37.8), 32610);
        assert_eq!(CoordinateReferenceSystem::utm_authority_id(151.2, -33.9), 32756);
        assert_eq!(CoordinateReferenceSystem::utm_authority_id(-180.0, 0.0), 32601);
        assert_eq!(CoordinateReferenceSystem::utm_authority_id(179.9, 10.0), 32660);
        assert_eq!(CoordinateReferenceSystem::utm_authority_id(11.5, 47.2), 32632);
    }

    #[test]
    fn test_epsg_range() {
        assert!(!CoordinateReferenceSystem::is_epsg_valid(0));
        assert!(!CoordinateReferenceSystem::is_epsg_valid(1000));
        assert!(CoordinateReferenceSystem::is_epsg_valid(3857));
        assert!(CoordinateReferenceSystem::is_epsg_valid(32632));
        assert!(!CoordinateReferenceSystem::is_epsg_valid(32768));
    }

    #[test]
    fn test_origin_maps_to_offset() {
        let mut crs = CoordinateReferenceSystem::default();
        crs.set_origin(Point::new(500_000.0, 5_200_000.0));
        crs.set_xy_offset(Point::new(12.5, -7.0));
        crs.set_vector_scale(Point::splat(-100.0));
        let mapped = crs.convert_crs_point_to_engine(crs.origin());
        assert_eq!(mapped.x, 12.5);
        assert_eq!(mapped.y, -7.0);
    }

    #[test]
    fn test_engine_mapping_flips_y() {
        let mut crs = CoordinateReferenceSystem::default();
        crs.set_origin(Point::new(100.0, 200.0));
        crs.set_landscape_scale_factor(2.0);
        let mapped = crs.convert_crs_point_to_engine(Point::new(101.0, 201.0));
        assert_eq!(mapped.x, 200.0);
        assert_eq!(mapped.y, -200.0);
    }

    #[test]
    fn test_invalid_authority_is_rejected() {
        let mut crs = CoordinateReferenceSystem::default();
        assert!(crs.set_authority_id(0, "").is_err());
        assert!(crs.set_authority_id(99, "").is_err());
        assert_eq!(crs.authority_id(), 0);
        assert!(crs.wkt().is_empty());
        assert!(!crs.is_valid());
    }

    #[test]
    fn test_set_authority_resolves_wkt() {
        if !proj_available() {
            eprintln!("Skipping test: PROJ database not available");
            return;
        }
        let mut crs = CoordinateReferenceSystem::default();
        crs.set_authority_id(32633, "").unwrap();
        assert_eq!(crs.authority_id(), 32633);
        assert!(crs.wkt().contains("UTM"));
        assert!(!crs.is_valid());
        crs.set_origin(Point::new(1.0, 1.0));
        assert!(crs.is_valid());
    }

    #[test]
    fn test_geographic_wkt_is_rejected() {
        if !proj_available() {
            eprintln!("Skipping test: PROJ database not available");
            return;
        }
        let wgs84 = SpatialRef::from_epsg(4326).unwrap().to_wkt().unwrap();
        let mut crs = CoordinateReferenceSystem::default();
        assert!(crs.set_authority_id(4326, &wgs84).is_err());
        assert!(crs.wkt().is_empty());
    }

    #[test]
    fn test_point_round_trip() {
        if !proj_available() {
            eprintln!("Skipping test: PROJ database not available");
            return;
        }
        let mut crs = CoordinateReferenceSystem::default();
        crs.set_authority_id(32632, "").unwrap();
        let wkt = crs.wkt().to_string();
        let lonlat = crs
            .convert_point_to_geog_cs(500_000.0, 5_000_000.0, &wkt, "", false)
            .unwrap();
        // UTM 32 中央経線は 9°E
        assert!((lonlat.x - 9.0).abs() < 1e-6);
        assert!(lonlat.y > 45.0 && lonlat.y < 45.2);
        let back = crs
            .convert_point_to_geog_cs(lonlat.x, lonlat.y, &wkt, "", true)
            .unwrap();
        assert!((back.x - 500_000.0).abs() < 1e-3);
        assert!((back.y - 5_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_point_at_origin_is_not_an_error() {
        if !proj_available() {
            eprintln!("Skipping test: PROJ database not available");
            return;
        }
        let crs = CoordinateReferenceSystem::default();
        let p = crs
            .convert_point_to_geog_cs(0.0, 0.0, "EPSG:3857", "EPSG:4326", false)
            .unwrap();
        assert!(p.x.abs() < 1e-9 && p.y.abs() < 1e-9);
    }

    #[test]
    fn test_empty_source_is_an_error() {
        let crs = CoordinateReferenceSystem::default();
        assert!(crs.convert_point_to_geog_cs(1.0, 1.0, "", "", false).is_err());
    }

    #[test]
    fn test_extents_use_two_corners() {
        if !proj_available() {
            eprintln!("Skipping test: PROJ database not available");
            return;
        }
        let crs = CoordinateReferenceSystem::default();
        let extents = Extents::new(5_000_000.0, 400_000.0, 5_100_000.0, 600_000.0);
        let geog = crs
            .convert_from_to(&extents, "EPSG:32632", "EPSG:4326")
            .unwrap();
        let lb = crs
            .convert_point_to_geog_cs(400_000.0, 5_000_000.0, "EPSG:32632", "EPSG:4326", false)
            .unwrap();
        let rt = crs
            .convert_point_to_geog_cs(600_000.0, 5_100_000.0, "EPSG:32632", "EPSG:4326", false)
            .unwrap();
        // 角の2点だけで組み立てられ、真の外接矩形ではない
        assert_eq!(geog.left, lb.x);
        assert_eq!(geog.bottom, lb.y);
        assert_eq!(geog.right, rt.x);
        assert_eq!(geog.top, rt.y);
        let lt = crs
            .convert_point_to_geog_cs(400_000.0, 5_100_000.0, "EPSG:32632", "EPSG:4326", false)
            .unwrap();
        assert!(lt.x != geog.left);
    }

    #[test]
    fn test_find_authority_id() {
        if !proj_available() {
            eprintln!("Skipping test: PROJ database not available");
            return;
        }
        let wkt = SpatialRef::from_epsg(32610).unwrap().to_wkt().unwrap();
        assert_eq!(CoordinateReferenceSystem::find_authority_id(&wkt), Some(32610));
    }

    #[test]
    fn test_same_as_level_crs() {
        if !proj_available() {
            eprintln!("Skipping test: PROJ database not available");
            return;
        }
        let mut crs = CoordinateReferenceSystem::default();
        crs.set_authority_id(3857, "").unwrap();
        let same = SpatialRef::from_epsg(3857).unwrap().to_wkt().unwrap();
        let other = SpatialRef::from_epsg(32633).unwrap().to_wkt().unwrap();
        assert!(crs.is_same_as_level_crs(&same));
        assert!(!crs.is_same_as_level_crs(&other));
    }
}
