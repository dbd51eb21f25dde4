//! Per-tile landscape records and the session state that owns them.

use tracing::{error, info, warn};

use crate::config::ImportOptions;
use crate::crs::CoordinateReferenceSystem;
use crate::error::{LandscapeError, Result};
use crate::extents::{Extents, Point, Resolution};

/// Engine-space axis-aligned box.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn from_points(a: Point, b: Point) -> Self {
        Self {
            min: Point::new3(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point::new3(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Smallest box around `points`.
    pub fn around(points: &[Point]) -> Option<Self> {
        let first = *points.first()?;
        Some(points.iter().fold(Self::from_points(first, first), |b, p| Self {
            min: Point::new3(b.min.x.min(p.x), b.min.y.min(p.y), b.min.z.min(p.z)),
            max: Point::new3(b.max.x.max(p.x), b.max.y.max(p.y), b.max.z.max(p.z)),
        }))
    }

    /// Inside or on the border, in XY.
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Boxes sharing only an edge still intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// A zero-area box counts as not set.
    pub fn is_valid(&self) -> bool {
        self.min.x < self.max.x && self.min.y < self.max.y
    }
}

/// One imported landscape tile.
#[derive(Debug, Clone)]
pub struct LandscapingInfo {
    pub extents: Extents,
    pub wgs84_extents: Extents,
    pub min_altitude: f64,
    pub max_altitude: f64,
    pub landscape_scale: Point,
    pub location_x: f64,
    pub location_y: f64,
    pub location_z: f64,
    pub number_of_sections: usize,
    pub quads_per_section: usize,
    pub import_resolution: Resolution,
    pub landscape_resolution: Resolution,
    pub bounds: Bounds,
    pub meter_per_pixel_x: f64,
    pub meter_per_pixel_y: f64,
    pub filename: String,
    pub original_filename: String,
    pub satellite_filenames: Vec<String>,
    pub projection: String,
}

impl Default for LandscapingInfo {
    fn default() -> Self {
        Self {
            extents: Extents::default(),
            wgs84_extents: Extents::default(),
            min_altitude: 65535.0,
            max_altitude: -65535.0,
            landscape_scale: Point::ZERO,
            location_x: 0.0,
            location_y: 0.0,
            location_z: 0.0,
            number_of_sections: 0,
            quads_per_section: 0,
            import_resolution: Resolution::default(),
            landscape_resolution: Resolution::default(),
            bounds: Bounds::default(),
            meter_per_pixel_x: 0.0,
            meter_per_pixel_y: 0.0,
            filename: String::new(),
            original_filename: String::new(),
            satellite_filenames: Vec::new(),
            projection: String::new(),
        }
    }
}

impl LandscapingInfo {
    /// Landscape scale in engine units (cm) per landscape vertex.
    pub fn calculate_scale(&mut self, options: &ImportOptions) {
        if self.landscape_resolution.is_zero() {
            error!("Landscape Resolution not valid - unable to calculate Scale");
            self.landscape_scale = Point::splat(100.0);
            return;
        }
        let x = self.import_resolution.x as f64 * self.meter_per_pixel_x
            / self.landscape_resolution.x as f64
            * 100.0;
        let y = self.import_resolution.y as f64 * self.meter_per_pixel_y.abs()
            / self.landscape_resolution.y as f64
            * 100.0;
        let z = if options.high_detail_z_scale {
            self.scale_z()
        } else {
            options.z_scale
        };
        self.landscape_scale = Point::new3(x, y, z);
    }

    /// Z scale that fits the altitude range into half of the 16-bit height range.
    pub fn scale_z(&self) -> f64 {
        // 512m がハイトマップの最大値、16bit の半分のみ使用するため * 2
        (self.max_altitude - self.min_altitude) / 5.12 * 2.0
    }

    pub fn calculate_location(&mut self, origin: Point) {
        if self.landscape_scale.x == 0.0 || self.landscape_scale.y == 0.0 {
            error!("Landscape Scale not valid - unable to calculate Location, calculate the scale first");
            return;
        }
        self.location_x = (self.extents.left - origin.x) * 100.0;
        self.location_y = -(self.extents.top - origin.y) * 100.0;
        self.location_z =
            (self.max_altitude - (self.max_altitude - self.min_altitude) * 0.5) * 100.0;
    }

    pub fn location(&self) -> Point {
        Point::new3(self.location_x, self.location_y, self.location_z)
    }
}

/// Import session state: level CRS, tiles and the current level extents.
#[derive(Debug, Clone)]
pub struct LandscapingInfos {
    crs: CoordinateReferenceSystem,
    pub tiles: Vec<LandscapingInfo>,
    /// Extents of the current import in the level CRS.
    pub extents: Extents,
}

impl LandscapingInfos {
    pub fn new(options: &ImportOptions) -> Self {
        Self {
            crs: CoordinateReferenceSystem::new(options),
            tiles: Vec::new(),
            extents: Extents::default(),
        }
    }

    pub fn crs(&self) -> &CoordinateReferenceSystem {
        &self.crs
    }

    pub fn crs_mut(&mut self) -> &mut CoordinateReferenceSystem {
        &mut self.crs
    }

    /// Sets the origin only if none is set yet.
    pub fn set_origin(&mut self, origin: Point) {
        if !self.crs.is_origin_valid() {
            info!("Set Origin to {}", origin);
            self.crs.set_origin(origin);
        }
    }

    pub fn cropped_extents(&self) -> Extents {
        self.crs.cropped_extents()
    }

    pub fn set_cropped_extents(&mut self, extents: Extents) {
        self.crs.set_cropped_extents(extents);
    }

    pub fn set_cropped_extents_str(&mut self, bbox: &str) -> Result<()> {
        self.crs.set_cropped_extents_str(bbox)
    }

    /// Drops the CRS; ignored (returns false) while tiles exist.
    pub fn reset_crs(&mut self) -> bool {
        if !self.tiles.is_empty() {
            warn!("Reset CRS called, but there are Tiles in this Level. Ignoring call.");
            return false;
        }
        self.crs.reset();
        self.extents.reset();
        warn!("Reset CRS successful.");
        true
    }

    /// Replaces the level CRS with `EPSG:<code>` and a new origin, dropping all tiles.
    pub fn set_crs(&mut self, authority: &str, origin: Point) -> Result<i32> {
        let code = authority
            .strip_prefix("EPSG:")
            .and_then(|c| c.trim().parse::<i32>().ok())
            .ok_or_else(|| {
                LandscapeError::InvalidInput(format!("Expected 'EPSG:<code>', got '{}'", authority))
            })?;
        self.tiles.clear();
        self.reset_crs();
        self.crs.set_authority_id(code, "")?;
        self.crs.set_origin(origin);
        Ok(self.crs.authority_id())
    }

    /// Index of the first tile whose extents overlap `extents`.
    pub fn tile_index_at(&self, extents: &Extents) -> Option<usize> {
        self.tiles
            .iter()
            .position(|tile| tile.extents.is_overlapping_strict(extents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tile() -> LandscapingInfo {
        LandscapingInfo {
            extents: Extents::new(5_000_000.0, 400_000.0, 5_001_008.0, 401_008.0),
            min_altitude: 100.0,
            max_altitude: 612.0,
            import_resolution: Resolution::new(1009, 1009),
            landscape_resolution: Resolution::new(1009, 1009),
            meter_per_pixel_x: 1.0,
            meter_per_pixel_y: -1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_bounds_intersects() {
        let tile = Bounds::from_points(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let cover = Bounds::from_points(Point::new(-5.0, -5.0), Point::new(15.0, 15.0));
        let edge = Bounds::from_points(Point::new(10.0, 2.0), Point::new(20.0, 3.0));
        let apart = Bounds::from_points(Point::new(11.0, 0.0), Point::new(20.0, 10.0));
        assert!(tile.intersects(&cover));
        assert!(cover.intersects(&tile));
        assert!(tile.intersects(&edge));
        assert!(!tile.intersects(&apart));
    }

    #[test]
    fn test_scale_high_detail() {
        let mut tile = sample_tile();
        tile.calculate_scale(&ImportOptions::default());
        assert!((tile.landscape_scale.x - 100.0).abs() < 1e-9);
        assert!((tile.landscape_scale.y - 100.0).abs() < 1e-9);
        assert!((tile.landscape_scale.z - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_scale_custom_z() {
        let mut tile = sample_tile();
        let options = ImportOptions {
            high_detail_z_scale: false,
            z_scale: 42.0,
            ..Default::default()
        };
        tile.calculate_scale(&options);
        assert_eq!(tile.landscape_scale.z, 42.0);
    }

    #[test]
    fn test_scale_without_landscape_resolution() {
        let mut tile = sample_tile();
        tile.landscape_resolution = Resolution::default();
        tile.calculate_scale(&ImportOptions::default());
        assert_eq!(tile.landscape_scale, Point::splat(100.0));
    }

    #[test]
    fn test_location() {
        let mut tile = sample_tile();
        tile.calculate_scale(&ImportOptions::default());
        tile.calculate_location(Point::new(399_000.0, 5_002_008.0));
        assert_eq!(tile.location_x, 100_000.0);
        assert_eq!(tile.location_y, 100_000.0);
        assert_eq!(tile.location_z, 35_600.0);
    }

    #[test]
    fn test_origin_is_set_once() {
        let mut infos = LandscapingInfos::new(&ImportOptions::default());
        infos.set_origin(Point::new(1.0, 2.0));
        infos.set_origin(Point::new(3.0, 4.0));
        assert_eq!(infos.crs().origin(), Point::new(1.0, 2.0));
    }

    #[test]
    fn test_reset_crs_ignored_with_tiles() {
        let mut infos = LandscapingInfos::new(&ImportOptions::default());
        infos.set_origin(Point::new(1.0, 2.0));
        infos.tiles.push(sample_tile());
        assert!(!infos.reset_crs());
        assert!(infos.crs().is_origin_valid());
        infos.tiles.clear();
        assert!(infos.reset_crs());
        assert!(!infos.crs().is_origin_valid());
    }

    #[test]
    fn test_set_crs_rejects_non_epsg() {
        let mut infos = LandscapingInfos::new(&ImportOptions::default());
        assert!(infos.set_crs("32633", Point::new(1.0, 1.0)).is_err());
    }
}
