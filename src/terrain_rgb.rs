use crate::raster::{Color, Grid};

const BASE_ELEVATION: f64 = -10000.0;
const INTERVAL: f64 = 0.1;

pub fn elevation_to_rgb(elevation: f64) -> (u8, u8, u8) {
    let encoded = ((elevation - BASE_ELEVATION) / INTERVAL).round() as i64;
    let encoded = encoded.clamp(0, 0xFF_FFFF);

    let r = ((encoded >> 16) & 0xFF) as u8;
    let g = ((encoded >> 8) & 0xFF) as u8;
    let b = (encoded & 0xFF) as u8;

    (r, g, b)
}

/// `-10000 + (R * 65536 + G * 256 + B) * 0.1`
pub fn rgb_to_elevation(r: u8, g: u8, b: u8) -> f64 {
    let encoded = ((r as i64) << 16) | ((g as i64) << 8) | (b as i64);
    BASE_ELEVATION + encoded as f64 * INTERVAL
}

/// Decodes row-major RGBA pixels of a terrain-RGB tile.
/// Returns `None` when the buffer holds fewer than `width * height` pixels.
pub fn decode_rgba(width: usize, height: usize, rgba: &[u8]) -> Option<Grid<f64>> {
    if rgba.len() < width * height * 4 {
        return None;
    }
    let values = rgba
        .chunks_exact(4)
        .take(width * height)
        .map(|p| rgb_to_elevation(p[0], p[1], p[2]))
        .collect();
    Grid::from_vec(width, height, values)
}

/// Row-major RGBA pixels as a colour grid.
pub fn colors_from_rgba(width: usize, height: usize, rgba: &[u8]) -> Option<Grid<Color>> {
    if rgba.len() < width * height * 4 {
        return None;
    }
    let values = rgba
        .chunks_exact(4)
        .take(width * height)
        .map(|p| Color {
            r: p[0],
            g: p[1],
            b: p[2],
            a: p[3],
        })
        .collect();
    Grid::from_vec(width, height, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_rgb_conversion() {
        let test_elevations = vec![0.0, 100.0, 1000.0, -100.0, 8848.0];

        for elevation in test_elevations {
            let (r, g, b) = elevation_to_rgb(elevation);
            let decoded = rgb_to_elevation(r, g, b);

            assert!(
                (elevation - decoded).abs() < 0.1,
                "Elevation {} decoded to {} (diff: {})",
                elevation,
                decoded,
                (elevation - decoded).abs()
            );
        }
    }

    #[test]
    fn test_known_values() {
        assert_eq!(rgb_to_elevation(0, 0, 0), -10000.0);
        // 1 * 65536 + 134 * 256 + 160 = 100000 -> 0m
        assert!(rgb_to_elevation(1, 134, 160).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rgba() {
        let mut rgba = Vec::new();
        for _ in 0..4 {
            rgba.extend_from_slice(&[1, 134, 160, 255]);
        }
        let grid = decode_rgba(2, 2, &rgba).unwrap();
        assert_eq!(grid.width(), 2);
        assert!(grid.data().iter().all(|v| v.abs() < 1e-9));
        assert!(decode_rgba(3, 2, &rgba).is_none());
    }

    #[test]
    fn test_colors_from_rgba() {
        let rgba = vec![10, 20, 30, 255, 40, 50, 60, 255];
        let grid = colors_from_rgba(2, 1, &rgba).unwrap();
        assert_eq!(grid.get(1, 0), Color { r: 40, g: 50, b: 60, a: 255 });
    }
}
