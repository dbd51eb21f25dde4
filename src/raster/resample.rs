use rayon::prelude::*;

use super::{Color, Grid};

// 出力ピクセル中心に対応する入力座標と補間重み
fn source_coords(index: usize, dst_size: usize, src_size: usize) -> (usize, usize, f64) {
    let scale = src_size as f64 / dst_size as f64;
    let pos = ((index as f64 + 0.5) * scale - 0.5).clamp(0.0, (src_size - 1) as f64);
    let i0 = pos.floor() as usize;
    let i1 = (i0 + 1).min(src_size - 1);
    (i0, i1, pos - i0 as f64)
}

fn resize_with<T, F>(src: &Grid<T>, width: usize, height: usize, sample: F) -> Grid<T>
where
    T: Copy + Default + Send + Sync,
    F: Fn([T; 4], f64, f64) -> T + Sync,
{
    if src.is_empty() || width == 0 || height == 0 {
        return Grid::new(width, height);
    }
    let mut out = Grid::new(width, height);
    out.data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let (y0, y1, fy) = source_coords(y, height, src.height());
            for (x, value) in row.iter_mut().enumerate() {
                let (x0, x1, fx) = source_coords(x, width, src.width());
                *value = sample(
                    [src.get(x0, y0), src.get(x1, y0), src.get(x0, y1), src.get(x1, y1)],
                    fx,
                    fy,
                );
            }
        });
    out
}

fn lerp2(v: [f64; 4], fx: f64, fy: f64) -> f64 {
    let top = v[0] + (v[1] - v[0]) * fx;
    let bottom = v[2] + (v[3] - v[2]) * fx;
    top + (bottom - top) * fy
}

/// Bilinear resize of a height grid.
pub fn resize_heights(src: &Grid<f64>, width: usize, height: usize) -> Grid<f64> {
    resize_with(src, width, height, lerp2)
}

/// Bilinear resize of a colour grid, per channel.
pub fn resize_colors(src: &Grid<Color>, width: usize, height: usize) -> Grid<Color> {
    resize_with(src, width, height, |c, fx, fy| {
        let channel = |f: fn(&Color) -> u8| {
            lerp2([f(&c[0]) as f64, f(&c[1]) as f64, f(&c[2]) as f64, f(&c[3]) as f64], fx, fy)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        Color {
            r: channel(|c| c.r),
            g: channel(|c| c.g),
            b: channel(|c| c.b),
            a: channel(|c| c.a),
        }
    })
}
