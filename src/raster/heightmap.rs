//! ハイトマップの平滑化と 16bit への正規化

use rayon::prelude::*;

use super::Grid;

/// Full 16-bit height range.
pub const HEIGHT_RANGE_MAX: i32 = 65535;
/// Middle half of the 16-bit range, used in high-detail mode.
pub const HIGH_DETAIL_MIN: i32 = 16383;
pub const HIGH_DETAIL_MAX: i32 = 49152;
// これを超えるとカスタム Z スケールでは余白が足りない
const CUSTOM_Z_SCALE_LIMIT: i32 = 60000;

const BLUR_SIGMA: f64 = 3.0;
const BLUR_PASSES: usize = 3;
const EASE_OUT_EXPONENT: i32 = 15;

// ガウシアンを近似する箱フィルタの幅
fn box_sizes(sigma: f64, n: usize) -> Vec<usize> {
    let nf = n as f64;
    let w_ideal = (12.0 * sigma * sigma / nf + 1.0).sqrt();
    let mut wl = w_ideal.floor() as i64;
    if wl % 2 == 0 {
        wl -= 1;
    }
    let wu = wl + 2;
    let wlf = wl as f64;
    let m_ideal = (12.0 * sigma * sigma - nf * wlf * wlf - 4.0 * nf * wlf - 3.0 * nf) / (-4.0 * wlf - 4.0);
    let m = m_ideal.round() as usize;
    (0..n)
        .map(|i| if i < m { wl as usize } else { wu as usize })
        .collect()
}

fn box_blur_horizontal(src: &[f64], dst: &mut [f64], width: usize, radius: usize) {
    let r = radius as isize;
    let last = width as isize - 1;
    let scale = 1.0 / (2 * radius + 1) as f64;
    dst.par_chunks_mut(width)
        .zip(src.par_chunks(width))
        .for_each(|(out, row)| {
            for (x, value) in out.iter_mut().enumerate() {
                let x = x as isize;
                let sum: f64 = (x - r..=x + r).map(|k| row[k.clamp(0, last) as usize]).sum();
                *value = sum * scale;
            }
        });
}

fn box_blur_vertical(src: &[f64], dst: &mut [f64], width: usize, height: usize, radius: usize) {
    let r = radius as isize;
    let last = height as isize - 1;
    let scale = 1.0 / (2 * radius + 1) as f64;
    dst.par_chunks_mut(width).enumerate().for_each(|(y, out)| {
        let y = y as isize;
        for (x, value) in out.iter_mut().enumerate() {
            let sum: f64 = (y - r..=y + r)
                .map(|k| src[k.clamp(0, last) as usize * width + x])
                .sum();
            *value = sum * scale;
        }
    });
}

/// Box-filter approximation of a Gaussian blur with clamped borders.
pub fn gaussian_blur(input: &Grid<f64>, sigma: f64) -> Grid<f64> {
    let (width, height) = (input.width(), input.height());
    let mut data = input.data().to_vec();
    if data.is_empty() {
        return input.clone();
    }
    let mut tmp = vec![0.0; data.len()];
    for size in box_sizes(sigma, BLUR_PASSES) {
        let radius = (size - 1) / 2;
        box_blur_horizontal(&data, &mut tmp, width, radius);
        box_blur_vertical(&tmp, &mut data, width, height, radius);
    }
    Grid::from_vec(width, height, data).unwrap_or_else(|| input.clone())
}

/// `a + (b - a) * (1 - (1 - alpha)^exp)`
pub fn interp_ease_out(a: f64, b: f64, alpha: f64, exp: i32) -> f64 {
    let modified = 1.0 - (1.0 - alpha).powi(exp);
    a + (b - a) * modified
}

// 中央で 1、端で 0
fn edge_alpha(index: usize, size: usize) -> f64 {
    let half = ((size as f64 - 1.0) * 0.5).max(f64::EPSILON);
    if index as f64 <= size as f64 * 0.5 {
        index as f64 / half
    } else {
        (size - index - 1) as f64 / half
    }
}

/// Blurs `steps` times. Unless `smooth_edges`, the result is blended back to
/// the input towards the borders so neighbouring tiles keep matching edges.
pub fn smooth(heights: &Grid<f64>, steps: u32, smooth_edges: bool) -> Grid<f64> {
    if steps == 0 || heights.is_empty() {
        return heights.clone();
    }
    let mut blurred = heights.clone();
    for _ in 0..steps {
        blurred = gaussian_blur(&blurred, BLUR_SIGMA);
    }
    if smooth_edges {
        return blurred;
    }

    let (width, height) = (heights.width(), heights.height());
    let mut out = heights.clone();
    out.data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let alpha_y = edge_alpha(y, height);
            for (x, value) in row.iter_mut().enumerate() {
                let alpha = edge_alpha(x, width) * alpha_y;
                *value = interp_ease_out(*value, blurred.get(x, y), alpha, EASE_OUT_EXPONENT);
            }
        });
    out
}

/// Target 16-bit window for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightWindow {
    pub min: i32,
    pub max: i32,
    /// Custom Z scale did not fit and high-detail mode was used instead.
    pub fell_back: bool,
}

/// Window for an altitude span of `altitude_range` metres.
pub fn height_window(altitude_range: f64, high_detail: bool, z_scale: f64) -> HeightWindow {
    let high_detail_window = |fell_back| HeightWindow {
        min: HIGH_DETAIL_MIN,
        max: HIGH_DETAIL_MAX,
        fell_back,
    };
    if high_detail {
        return high_detail_window(false);
    }
    let needed = (altitude_range / z_scale * 100.0 * 128.0) as i32;
    if needed > CUSTOM_Z_SCALE_LIMIT {
        return high_detail_window(true);
    }
    let remainder = HEIGHT_RANGE_MAX - needed;
    HeightWindow {
        min: remainder / 2,
        max: HEIGHT_RANGE_MAX - remainder / 2,
        fell_back: false,
    }
}

/// Linear map of `[min_altitude, max_altitude]` onto the window.
/// A flat tile maps to `window.min`.
pub fn normalize(heights: &Grid<f64>, min_altitude: f64, max_altitude: f64, window: HeightWindow) -> Vec<u16> {
    let range = max_altitude - min_altitude;
    let span = (window.max - window.min) as f64;
    let base = window.min as f64;
    heights
        .data()
        .par_iter()
        .map(|&h| {
            if range <= 0.0 {
                return window.min as u16;
            }
            (span * (h - min_altitude) / range + base) as u16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_sizes_for_sigma_three() {
        assert_eq!(box_sizes(3.0, 3), vec![5, 5, 7]);
    }

    #[test]
    fn test_blur_keeps_constant_field() {
        let grid = Grid::filled(7, 5, 42.0);
        let blurred = gaussian_blur(&grid, 3.0);
        for v in blurred.data() {
            assert!((v - 42.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_blur_spreads_spike() {
        let mut grid = Grid::filled(21, 21, 0.0);
        grid.set(10, 10, 100.0);
        let blurred = gaussian_blur(&grid, 3.0);
        assert!(blurred.get(10, 10) < 100.0);
        assert!(blurred.get(11, 10) > 0.0);
        let total: f64 = blurred.data().iter().sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_smooth_preserves_edges() {
        let mut grid = Grid::new(9, 9);
        for y in 0..9 {
            for x in 0..9 {
                grid.set(x, y, ((x * 7 + y * 13) % 11) as f64);
            }
        }
        let smoothed = smooth(&grid, 2, false);
        for i in 0..9 {
            assert_eq!(smoothed.get(0, i), grid.get(0, i));
            assert_eq!(smoothed.get(i, 0), grid.get(i, 0));
            assert_eq!(smoothed.get(8, i), grid.get(8, i));
            assert_eq!(smoothed.get(i, 8), grid.get(i, 8));
        }
        assert_ne!(smoothed.get(4, 4), grid.get(4, 4));
    }

    #[test]
    fn test_zero_steps_is_identity() {
        let grid = Grid::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(smooth(&grid, 0, false), grid);
    }

    #[test]
    fn test_ease_out() {
        assert_eq!(interp_ease_out(10.0, 20.0, 0.0, 15), 10.0);
        assert_eq!(interp_ease_out(10.0, 20.0, 1.0, 15), 20.0);
        assert!(interp_ease_out(10.0, 20.0, 0.2, 15) > 19.0);
    }

    #[test]
    fn test_high_detail_range() {
        let window = height_window(512.0, true, 100.0);
        assert_eq!((window.min, window.max), (HIGH_DETAIL_MIN, HIGH_DETAIL_MAX));
        let heights = Grid::from_vec(5, 1, vec![100.0, 150.5, 300.0, 499.9, 612.0]).unwrap();
        let out = normalize(&heights, 100.0, 612.0, window);
        assert_eq!(out[0], 16383);
        assert_eq!(out[4], 49152);
        assert!(out.iter().all(|&v| (16383..=49152).contains(&v)));
    }

    #[test]
    fn test_custom_z_scale_window() {
        // 100m 差、Z スケール 100 → 12800 値
        let window = height_window(100.0, false, 100.0);
        assert!(!window.fell_back);
        assert_eq!(window.min, (65535 - 12800) / 2);
        assert_eq!(window.max, 65535 - (65535 - 12800) / 2);
    }

    #[test]
    fn test_custom_z_scale_falls_back() {
        let window = height_window(8000.0, false, 100.0);
        assert!(window.fell_back);
        assert_eq!((window.min, window.max), (HIGH_DETAIL_MIN, HIGH_DETAIL_MAX));
    }

    #[test]
    fn test_flat_tile() {
        let heights = Grid::filled(2, 2, 5.0);
        let window = height_window(0.0, true, 100.0);
        assert_eq!(normalize(&heights, 5.0, 5.0, window), vec![16383; 4]);
    }
}
