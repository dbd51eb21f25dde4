use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

use crate::error::LandscapeError;

/// 2D/3D coordinate in some CRS's linear units (or engine units after mapping).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub const ZERO: Point = Point {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub const fn new3(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: f64) -> Self {
        Self { x: v, y: v, z: v }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    pub fn distance_squared(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new3(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new3(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, rhs: f64) -> Point {
        Point::new3(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={} Y={} Z={}", self.x, self.y, self.z)
    }
}

/// Pixel or vertex counts per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolution {
    pub x: usize,
    pub y: usize,
}

impl Resolution {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    pub fn pixel_count(&self) -> usize {
        self.x * self.y
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 || self.y == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Axis-aligned bounding rectangle, ordered (bottom, left, top, right).
///
/// All four fields being exactly zero marks the extents as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extents {
    pub bottom: f64,
    pub left: f64,
    pub top: f64,
    pub right: f64,
}

// 比較時の許容誤差
const EQUALITY_TOLERANCE: f64 = 0.1;

impl Extents {
    pub const fn new(bottom: f64, left: f64, top: f64, right: f64) -> Self {
        Self {
            bottom,
            left,
            top,
            right,
        }
    }

    /// Builds extents from two corners; `None` if either corner is the origin.
    pub fn from_corners(left_bottom: Point, right_top: Point) -> Option<Self> {
        if (left_bottom.x == 0.0 && left_bottom.y == 0.0)
            || (right_top.x == 0.0 && right_top.y == 0.0)
        {
            return None;
        }
        Some(Self::new(left_bottom.y, left_bottom.x, right_top.y, right_top.x))
    }

    pub fn is_empty(&self) -> bool {
        self.bottom == 0.0 && self.left == 0.0 && self.top == 0.0 && self.right == 0.0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Touching edges count as overlap.
    pub fn is_overlapping(&self, other: &Extents) -> bool {
        if self.left > other.right || other.left > self.right {
            return false;
        }
        if self.top < other.bottom || other.top < self.bottom {
            return false;
        }
        true
    }

    /// Touching edges do not count as overlap.
    pub fn is_overlapping_strict(&self, other: &Extents) -> bool {
        if self.left >= other.right || other.left >= self.right {
            return false;
        }
        if self.top <= other.bottom || other.top <= self.bottom {
            return false;
        }
        true
    }

    /// Strictly inside `other` (no shared edge).
    pub fn is_inside(&self, other: &Extents) -> bool {
        self.left > other.left
            && self.top < other.top
            && self.right < other.right
            && self.bottom > other.bottom
    }

    pub fn contains_point(&self, point: &Point) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.bottom && point.y <= self.top
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).abs()
    }

    pub fn height(&self) -> f64 {
        (self.top - self.bottom).abs()
    }

    /// Area in km², only meaningful when the units are metres.
    pub fn area_km2(&self) -> f64 {
        self.width() / 1000.0 * self.height() / 1000.0
    }

    pub fn left_bottom(&self) -> Point {
        Point::new(self.left, self.bottom)
    }

    pub fn right_top(&self) -> Point {
        Point::new(self.right, self.top)
    }

    pub fn left_top(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub fn right_bottom(&self) -> Point {
        Point::new(self.right, self.bottom)
    }

    /// Smallest extents covering both; unset extents are ignored.
    pub fn union(&self, other: &Extents) -> Extents {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Extents::new(
            self.bottom.min(other.bottom),
            self.left.min(other.left),
            self.top.max(other.top),
            self.right.max(other.right),
        )
    }
}

impl PartialEq for Extents {
    fn eq(&self, other: &Self) -> bool {
        (self.bottom - other.bottom).abs() < EQUALITY_TOLERANCE
            && (self.left - other.left).abs() < EQUALITY_TOLERANCE
            && (self.top - other.top).abs() < EQUALITY_TOLERANCE
            && (self.right - other.right).abs() < EQUALITY_TOLERANCE
    }
}

impl fmt::Display for Extents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.bottom, self.left, self.top, self.right)
    }
}

fn is_plain_decimal(s: &str) -> bool {
    // ^-?(0|[1-9][0-9]*)(\.[0-9]+)?$
    let s = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let int_ok = int_part == "0"
        || (!int_part.is_empty()
            && !int_part.starts_with('0')
            && int_part.bytes().all(|b| b.is_ascii_digit()));
    let frac_ok = match frac_part {
        Some(f) => !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    };
    int_ok && frac_ok
}

impl FromStr for Extents {
    type Err = LandscapeError;

    /// Parses `"bottom,left,top,right"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 || !parts.iter().all(|p| is_plain_decimal(p)) {
            return Err(LandscapeError::InvalidInput(format!(
                "Invalid bounding box '{}' - expected 'bottom,left,top,right'",
                s
            )));
        }
        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part.parse().map_err(|_| {
                LandscapeError::InvalidInput(format!("Invalid number '{}' in '{}'", part, s))
            })?;
        }
        Ok(Extents::new(values[0], values[1], values[2], values[3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(Extents::default().is_empty());
        assert!(!Extents::new(0.0, 0.0, 0.0, 1.0).is_empty());
        assert!(!Extents::new(-1.0, 0.0, 0.0, 0.0).is_empty());
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let cases = [
            (
                Extents::new(0.0, 0.0, 10.0, 10.0),
                Extents::new(5.0, 5.0, 15.0, 15.0),
            ),
            (
                Extents::new(0.0, 0.0, 10.0, 10.0),
                Extents::new(0.0, 10.0, 10.0, 20.0),
            ),
            (
                Extents::new(0.0, 0.0, 10.0, 10.0),
                Extents::new(20.0, 20.0, 30.0, 30.0),
            ),
            (
                Extents::new(0.0, 0.0, 10.0, 10.0),
                Extents::new(2.0, 2.0, 3.0, 3.0),
            ),
        ];
        for (a, b) in cases {
            assert_eq!(a.is_overlapping(&b), b.is_overlapping(&a));
            assert_eq!(a.is_overlapping_strict(&b), b.is_overlapping_strict(&a));
        }
    }

    #[test]
    fn test_touching_edges() {
        let a = Extents::new(0.0, 0.0, 10.0, 10.0);
        let b = Extents::new(0.0, 10.0, 10.0, 20.0);
        assert!(a.is_overlapping(&b));
        assert!(!a.is_overlapping_strict(&b));
    }

    #[test]
    fn test_is_inside_is_strict() {
        let outer = Extents::new(0.0, 0.0, 10.0, 10.0);
        assert!(Extents::new(1.0, 1.0, 9.0, 9.0).is_inside(&outer));
        assert!(!Extents::new(0.0, 1.0, 9.0, 9.0).is_inside(&outer));
        assert!(!outer.is_inside(&outer));
    }

    #[test]
    fn test_equality_tolerance() {
        let a = Extents::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(a, Extents::new(1.05, 2.05, 2.95, 3.95));
        assert_ne!(a, Extents::new(1.2, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_area_km2() {
        let e = Extents::new(0.0, 0.0, 2000.0, 3000.0);
        assert!((e.area_km2() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_and_display() {
        let e: Extents = "47.1,11.2,47.3,11.5".parse().unwrap();
        assert_eq!(e.bottom, 47.1);
        assert_eq!(e.left, 11.2);
        assert_eq!(e.top, 47.3);
        assert_eq!(e.right, 11.5);
        assert_eq!(e.to_string(), "47.1,11.2,47.3,11.5");

        let negative: Extents = "-33.9,-70,-33.1,-69.5".parse().unwrap();
        assert_eq!(negative.left, -70.0);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("1,2,3".parse::<Extents>().is_err());
        assert!("1,2,3,abc".parse::<Extents>().is_err());
        assert!("01,2,3,4".parse::<Extents>().is_err());
        assert!("1.,2,3,4".parse::<Extents>().is_err());
        assert!("1e3,2,3,4".parse::<Extents>().is_err());
        // 空の要素も不正
        assert!("1,,2,3,4".parse::<Extents>().is_err());
        assert!("1,2,3,4,".parse::<Extents>().is_err());
    }

    #[test]
    fn test_from_corners_rejects_origin() {
        assert!(Extents::from_corners(Point::ZERO, Point::new(1.0, 1.0)).is_none());
        let e = Extents::from_corners(Point::new(1.0, 2.0), Point::new(3.0, 4.0)).unwrap();
        assert_eq!(e, Extents::new(2.0, 1.0, 4.0, 3.0));
    }

    #[test]
    fn test_union_ignores_empty() {
        let a = Extents::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.union(&Extents::default()), a);
        let b = Extents::new(-5.0, 5.0, 5.0, 20.0);
        assert_eq!(a.union(&b), Extents::new(-5.0, 0.0, 10.0, 20.0));
    }
}
