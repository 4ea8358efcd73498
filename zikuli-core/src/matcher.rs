//! Single-resolution template correlation.
//!
//! Method selection follows SikuliX's native matcher exactly (§4.3 /
//! §9 open question): a target is "plain color" when the sum of its
//! per-channel standard deviations is `<= PLAIN_COLOR_STDDEV`. Plain
//! targets use squared-difference-normalized correlation (`SQDIFF_NORMED`)
//! on native pixels, transformed to a similarity by `1 - result`; an
//! additionally-black target (sum of per-channel means `<= 1e-5`) has both
//! images bitwise-inverted first, since `SQDIFF_NORMED` against an
//! all-zero template is otherwise numerically degenerate (every window
//! scores identically near zero). All other targets use the normalized
//! cross-correlation coefficient (`CCOEFF_NORMED`).

use rayon::prelude::*;

use crate::geometry::{Point, Rectangle};
use crate::image::{channel_stats, Image};

/// Sum of per-channel standard deviations at or below this threshold
/// marks a target as a plain color.
pub const PLAIN_COLOR_STDDEV: f64 = 1e-5;

/// A dense grid of correlation scores, one per valid template position.
/// `(x, y)` indexes the top-left corner of the template window in the
/// source image, so the grid is `source.w - target.w + 1` wide and
/// `source.h - target.h + 1` tall.
#[derive(Debug, Clone)]
pub struct CorrelationMap {
    width: usize,
    height: usize,
    values: Vec<f64>,
}

impl CorrelationMap {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            values: vec![f64::NEG_INFINITY; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.width + x]
    }

    fn set(&mut self, x: usize, y: usize, v: f64) {
        self.values[y * self.width + x] = v;
    }

    /// Position and value of the maximum score. Raster-scan order breaks
    /// ties (first occurrence wins), matching §8 invariant 5.
    pub fn argmax(&self) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                let v = self.get(x, y);
                match best {
                    Some((_, _, bv)) if v <= bv => {}
                    _ => best = Some((x, y, v)),
                }
            }
        }
        best
    }

    /// Zero out an axis-aligned box centered on `(x, y)` so a subsequent
    /// `argmax` finds the next peak. Used by `findAll`'s erase-and-rescan
    /// loop.
    pub fn erase_around(&mut self, x: usize, y: usize, xmargin: usize, ymargin: usize) {
        let x0 = x.saturating_sub(xmargin);
        let y0 = y.saturating_sub(ymargin);
        let x1 = (x + xmargin + 1).min(self.width);
        let y1 = (y + ymargin + 1).min(self.height);
        for row in y0..y1 {
            for col in x0..x1 {
                self.set(col, row, f64::NEG_INFINITY);
            }
        }
    }
}

/// `true` when the sum of `target`'s per-channel standard deviations is
/// at or below [`PLAIN_COLOR_STDDEV`].
pub fn is_plain_color(target: &Image) -> bool {
    let (_, stddevs) = channel_stats(target);
    stddevs.iter().sum::<f64>() <= PLAIN_COLOR_STDDEV
}

/// `true` when `target` is plain-colored *and* that color is black (sum
/// of per-channel means `<= 1e-5`).
pub fn is_black(target: &Image) -> bool {
    let (means, _) = channel_stats(target);
    means.iter().sum::<f64>() <= 1e-5
}

/// Restrict a region-of-interest to the set of positions where `target`
/// fits entirely inside `source`, further clamped to `roi` if given.
fn valid_search_area(source: &Image, target: &Image, roi: Option<Rectangle>) -> Option<Rectangle> {
    if target.width() > source.width() || target.height() > source.height() {
        return None;
    }
    let max_w = source.width() - target.width() + 1;
    let max_h = source.height() - target.height() + 1;
    let full = Rectangle::new(0, 0, max_w, max_h);
    let area = match roi {
        Some(r) => r.intersection(&full),
        None => full,
    };
    if area.is_empty() {
        None
    } else {
        Some(area)
    }
}

fn channel_count(img: &Image) -> usize {
    img.format().bytes_per_pixel()
}

/// Bitwise-invert every channel byte of `img`, returning a new `Image`.
fn invert(img: &Image) -> Image {
    let mut out = img.clone();
    for y in 0..img.height() {
        for x in 0..img.width() {
            let src = img.get_pixel(x, y);
            let inverted: Vec<u8> = src.iter().map(|b| 255 - b).collect();
            out.set_pixel(x, y, &inverted);
        }
    }
    out
}

/// Squared-difference-normalized correlation at window origin `(wx, wy)`:
/// `sum((T-I)^2) / sqrt(sum(T^2) * sum(I^2))`. Lower is a better match;
/// callers invert to a similarity via `1.0 - result`.
fn sqdiff_normed_at(source: &Image, target: &Image, wx: u32, wy: u32) -> f64 {
    let channels = channel_count(target);
    let mut diff_sq = 0.0f64;
    let mut t_sq = 0.0f64;
    let mut i_sq = 0.0f64;

    for ty in 0..target.height() {
        for tx in 0..target.width() {
            let t_px = target.get_pixel(tx, ty);
            let s_px = source.get_pixel(wx + tx, wy + ty);
            for c in 0..channels {
                let t = t_px[c] as f64;
                let s = s_px[c] as f64;
                diff_sq += (t - s) * (t - s);
                t_sq += t * t;
                i_sq += s * s;
            }
        }
    }

    let denom = (t_sq * i_sq).sqrt();
    if denom <= f64::EPSILON {
        0.0
    } else {
        diff_sq / denom
    }
}

/// Normalized cross-correlation coefficient at window origin `(wx, wy)`:
/// Pearson correlation between the template and the window, treating all
/// channels as one concatenated vector.
fn ccoeff_normed_at(source: &Image, target: &Image, wx: u32, wy: u32, target_mean: f64) -> f64 {
    let channels = channel_count(target);
    let n = (target.width() as u64 * target.height() as u64 * channels as u64).max(1) as f64;

    // Window mean.
    let mut window_sum = 0.0f64;
    for ty in 0..target.height() {
        for tx in 0..target.width() {
            let s_px = source.get_pixel(wx + tx, wy + ty);
            for c in 0..channels {
                window_sum += s_px[c] as f64;
            }
        }
    }
    let window_mean = window_sum / n;

    let mut numerator = 0.0f64;
    let mut t_var = 0.0f64;
    let mut w_var = 0.0f64;
    for ty in 0..target.height() {
        for tx in 0..target.width() {
            let t_px = target.get_pixel(tx, ty);
            let s_px = source.get_pixel(wx + tx, wy + ty);
            for c in 0..channels {
                let td = t_px[c] as f64 - target_mean;
                let wd = s_px[c] as f64 - window_mean;
                numerator += td * wd;
                t_var += td * td;
                w_var += wd * wd;
            }
        }
    }

    let denom = (t_var * w_var).sqrt();
    if denom <= f64::EPSILON {
        // A perfectly flat window against a non-flat template (or vice
        // versa) has no meaningful correlation.
        0.0
    } else {
        (numerator / denom).clamp(-1.0, 1.0)
    }
}

/// Compute the full correlation map of `target` against `source`,
/// restricted to `roi` (the whole valid search area if `None`).
///
/// Returns scores already transformed into "higher is better, 1.0 is a
/// perfect match" similarity space, regardless of which underlying method
/// was used.
pub fn correlate(source: &Image, target: &Image, roi: Option<Rectangle>) -> Option<CorrelationMap> {
    let area = valid_search_area(source, target, roi)?;

    let plain = is_plain_color(target);
    let black = plain && is_black(target);

    let (source, target): (std::borrow::Cow<Image>, std::borrow::Cow<Image>) = if black {
        (std::borrow::Cow::Owned(invert(source)), std::borrow::Cow::Owned(invert(target)))
    } else {
        (std::borrow::Cow::Borrowed(source), std::borrow::Cow::Borrowed(target))
    };

    let target_mean = if !plain {
        let (means, _) = channel_stats(&target);
        means.iter().sum::<f64>() / means.len().max(1) as f64
    } else {
        0.0
    };

    let mut map = CorrelationMap::new(area.w as usize, area.h as usize);
    let width = map.width;
    // Each row is an independent sweep over the template; farm rows out to
    // rayon's pool since a single full-resolution correlation map can be a
    // few million window evaluations.
    map.values.par_chunks_mut(width).enumerate().for_each(|(row, cells)| {
        let wy = area.y as u32 + row as u32;
        for (col, cell) in cells.iter_mut().enumerate() {
            let wx = area.x as u32 + col as u32;
            *cell = if plain {
                1.0 - sqdiff_normed_at(&source, &target, wx, wy)
            } else {
                ccoeff_normed_at(&source, &target, wx, wy, target_mean)
            };
        }
    });

    Some(map)
}

/// Run [`correlate`] and return the best `(score, top_left)` pair, where
/// `top_left` is in the search area's local coordinates (offset by
/// `roi.x/roi.y` already applied).
pub fn find_best(source: &Image, roi: Option<Rectangle>, target: &Image) -> Option<(f64, Point)> {
    let area = valid_search_area(source, target, roi)?;
    let map = correlate(source, target, roi)?;
    let (mx, my, score) = map.argmax()?;
    Some((score, Point::new(area.x + mx as i32, area.y + my as i32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PixelFormat;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Image {
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..(w * h) {
            data.extend_from_slice(&rgba);
        }
        Image::new(data, w, h, PixelFormat::Rgba).unwrap()
    }

    fn patch(base: &mut Image, rect: Rectangle, rgba: [u8; 4]) {
        for y in 0..rect.h {
            for x in 0..rect.w {
                base.set_pixel((rect.x as u32) + x, (rect.y as u32) + y, &rgba);
            }
        }
    }

    #[test]
    fn exact_match_scores_near_one() {
        let mut source = solid(100, 100, [50, 150, 200, 255]);
        patch(&mut source, Rectangle::new(30, 40, 10, 10), [255, 0, 0, 255]);
        let target = solid(10, 10, [255, 0, 0, 255]);

        let (score, loc) = find_best(&source, None, &target).unwrap();
        assert_eq!(loc, Point::new(30, 40));
        assert!(score >= 0.999, "score was {score}");
    }

    #[test]
    fn plain_black_target_uses_inverted_sqdiff_path() {
        assert!(is_plain_color(&solid(8, 8, [0, 0, 0, 255])));
        assert!(is_black(&solid(8, 8, [0, 0, 0, 255])));

        let mut source = solid(50, 50, [120, 130, 140, 255]);
        patch(&mut source, Rectangle::new(5, 5, 8, 8), [0, 0, 0, 255]);
        let target = solid(8, 8, [0, 0, 0, 255]);

        let (score, loc) = find_best(&source, None, &target).unwrap();
        assert_eq!(loc, Point::new(5, 5));
        assert!(score >= 0.95, "score was {score}");
    }

    #[test]
    fn non_matching_target_scores_low() {
        let mut source = solid(100, 100, [50, 150, 200, 255]);
        patch(&mut source, Rectangle::new(30, 40, 10, 10), [255, 0, 0, 255]);
        let target = solid(10, 10, [0, 255, 0, 255]);

        let (score, _loc) = find_best(&source, None, &target).unwrap();
        assert!(score < 0.9, "score was {score}");
    }

    #[test]
    fn erase_around_clears_a_box() {
        let mut map = CorrelationMap::new(10, 10);
        for y in 0..10 {
            for x in 0..10 {
                map.set(x, y, 1.0);
            }
        }
        map.erase_around(5, 5, 2, 2);
        assert_eq!(map.get(5, 5), f64::NEG_INFINITY);
        assert_eq!(map.get(0, 0), 1.0);
        assert_eq!(map.get(9, 9), 1.0);
    }

    #[test]
    fn argmax_breaks_ties_by_raster_order() {
        let mut map = CorrelationMap::new(3, 3);
        map.set(2, 0, 0.9);
        map.set(0, 1, 0.9);
        let (x, y, v) = map.argmax().unwrap();
        assert_eq!((x, y), (2, 0));
        assert_eq!(v, 0.9);
    }
}
