//! Coarse-to-fine pyramid search on top of [`crate::matcher`]'s
//! single-resolution correlation.
//!
//! A target is matched at a sequence of shrink ratios, coarsest first,
//! each pass restricting the search area to a halo around the previous
//! pass's best location. A pass scoring at or above [`REMATCH_THRESHOLD`]
//! short-circuits straight to a full-resolution confirmation, skipping
//! any remaining intermediate ratios -- the common case where a cheap
//! downscaled pass already nails the location.

use crate::geometry::{Point, Rectangle};
use crate::image::{Image, PixelFormat};
use crate::matcher;

/// Multipliers of the base pyramid ratio tried in a pyramid search, in
/// this order (see [`pyramid_factors`]).
pub const RESIZE_RATIOS: [f64; 4] = [1.0, 0.75, 0.5, 0.25];

/// Dimension floor (pixels) used to compute the base pyramid ratio for
/// `find_best`/`wait`/`exists`.
pub const MIN_TARGET_DIMENSION: u32 = 12;

/// `find_all` uses a higher floor when computing its own coarse
/// pre-filter ratio: an enumerated pattern is usually small relative to
/// the matches required to stay distinguishable from its neighbors once
/// shrunk.
pub const MIN_TARGET_DIMENSION_FIND_ALL: u32 = 50;

/// A score at or above this, found at any non-final pyramid level, is
/// treated as confident enough to skip straight to full-resolution
/// confirmation.
pub const REMATCH_THRESHOLD: f64 = 0.9;

/// Half the "erase" box subtracted from a correlation map's neighborhood
/// around a found match, so `find_all`'s next pass doesn't re-report the
/// same target immediately next to itself.
fn erase_margin(target: &Image) -> (usize, usize) {
    ((target.width() / 3).max(1) as usize, (target.height() / 3).max(1) as usize)
}

/// Base pyramid factor for a `target_w x target_h` template: the target's
/// smaller dimension divided down to `min_dim`, floored at `1.0` (a
/// template already at or below the floor is never downscaled).
fn base_ratio(target_w: u32, target_h: u32, min_dim: u32) -> f64 {
    (target_w.min(target_h) as f64 / min_dim as f64).max(1.0)
}

/// Pyramid shrink factors for a `target_w x target_h` template: for each
/// `r` in [`RESIZE_RATIOS`] (tried in that order -- coarsest, i.e.
/// largest factor, first), `factor = ratio * r` is included only when
/// `factor >= 1.0`. A factor of `f` means the source/target are
/// downsampled to `1/f` of their original size before matching.
fn pyramid_factors(target_w: u32, target_h: u32, min_dim: u32) -> Vec<f64> {
    let ratio = base_ratio(target_w, target_h, min_dim);
    RESIZE_RATIOS.iter().copied().map(|r| ratio * r).filter(|&factor| factor >= 1.0).collect()
}

/// Dimensions of `w x h` after scaling by `ratio`, each floored at 1px.
fn scaled_size(w: u32, h: u32, ratio: f64) -> (u32, u32) {
    (((w as f64 * ratio).round().max(1.0)) as u32, ((h as f64 * ratio).round().max(1.0)) as u32)
}

/// Resize `img` to `ratio` of its original size using triangle
/// (bilinear) filtering; `ratio == 1.0` is a cheap clone.
fn resize_image(img: &Image, ratio: f64) -> Image {
    if (ratio - 1.0).abs() < f64::EPSILON {
        return img.clone();
    }
    let rgba = img.convert(PixelFormat::Rgba);
    let (new_w, new_h) = scaled_size(rgba.width(), rgba.height(), ratio);

    let buf = image::RgbaImage::from_raw(rgba.width(), rgba.height(), rgba.data().to_vec())
        .expect("rgba buffer sized exactly to width*height*4");
    let resized = image::imageops::resize(&buf, new_w, new_h, image::imageops::FilterType::Triangle);

    Image::new(resized.into_raw(), new_w, new_h, PixelFormat::Rgba)
        .expect("resized buffer sized exactly to width*height*4")
        .convert(img.format())
}

fn scale_rect(rect: Rectangle, ratio: f64) -> Rectangle {
    Rectangle::new(
        (rect.x as f64 * ratio).round() as i32,
        (rect.y as f64 * ratio).round() as i32,
        ((rect.w as f64 * ratio).round().max(1.0)) as u32,
        ((rect.h as f64 * ratio).round().max(1.0)) as u32,
    )
}

fn scale_point(point: Point, ratio: f64) -> Point {
    Point::new((point.x as f64 * ratio).round() as i32, (point.y as f64 * ratio).round() as i32)
}

/// A halo window around `center` sized `target`'s dimensions plus a
/// generous margin, clamped into `bounds`. Used both by the still-there
/// cache and by inter-level refinement.
fn halo_roi(center: Point, target_w: u32, target_h: u32, bounds: Rectangle) -> Rectangle {
    let margin_x = target_w.max(16) as i32;
    let margin_y = target_h.max(16) as i32;
    Rectangle::new(
        center.x - margin_x,
        center.y - margin_y,
        target_w + 2 * margin_x as u32,
        target_h + 2 * margin_y as u32,
    )
    .clamp_to(&bounds)
}

/// Result of a successful pyramid search: a match score and the
/// top-left corner of the matched window, both in `source`'s original
/// (ratio-1.0) coordinate space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidMatch {
    pub score: f64,
    pub location: Point,
}

/// Search `source` for `target`, optionally restricted to `roi` and
/// optionally seeded by a `last_seen` hint (the still-there cache: the
/// region a prior match occupied, searched first before falling back to
/// the full pyramid).
///
/// Returns the best match at or above `min_similarity`, or `None`.
pub fn find_best(
    source: &Image,
    target: &Image,
    min_similarity: f64,
    roi: Option<Rectangle>,
    last_seen: Option<Rectangle>,
) -> Option<PyramidMatch> {
    let bounds = roi.unwrap_or_else(|| source.bounds());

    if let Some(seen) = last_seen {
        let halo = seen.grow(seen.w.max(seen.h).max(8) as i32).clamp_to(&bounds);
        let relaxed = (min_similarity - 0.01).max(0.0);
        if let Some((score, loc)) = matcher::find_best(source, Some(halo), target) {
            if score >= relaxed {
                log::debug!("still-there cache hit at {loc:?} (score {score:.4})");
                return Some(PyramidMatch { score, location: loc });
            }
        }
        log::debug!("still-there cache miss around {seen:?}, falling back to full pyramid search");
    }

    let factors = pyramid_factors(target.width(), target.height(), MIN_TARGET_DIMENSION);
    let mut current_roi = Some(bounds);

    for (i, &factor) in factors.iter().enumerate() {
        let scale = 1.0 / factor;
        let scaled_source = resize_image(source, scale);
        let scaled_target = resize_image(target, scale);
        let scaled_roi = current_roi.map(|r| scale_rect(r, scale).clamp_to(&scaled_source.bounds()));

        let Some((score, loc)) = matcher::find_best(&scaled_source, scaled_roi, &scaled_target) else {
            continue;
        };
        let full_res_loc = scale_point(loc, factor);

        if score >= min_similarity.max(REMATCH_THRESHOLD) {
            // Confident enough: confirm directly at full resolution and
            // stop, skipping any remaining finer levels.
            let confirm_roi = halo_roi(full_res_loc, target.width(), target.height(), bounds);
            return matcher::find_best(source, Some(confirm_roi), target)
                .map(|(score, location)| PyramidMatch { score, location })
                .filter(|m| m.score >= min_similarity);
        }

        // Otherwise narrow the next level's search area around this guess.
        if let Some(&next_factor) = factors.get(i + 1) {
            let next_scale = 1.0 / next_factor;
            let (next_w, next_h) = scaled_size(target.width(), target.height(), next_scale);
            let window = halo_roi(scale_point(full_res_loc, next_scale), next_w, next_h, scale_rect(bounds, next_scale));
            current_roi = Some(window);
        }
    }

    // No pyramid level reached the threshold: fall back to a single pass
    // at original resolution over the whole search area.
    matcher::find_best(source, Some(bounds), target)
        .map(|(score, location)| PyramidMatch { score, location })
        .filter(|m| m.score >= min_similarity)
}

/// A coarse downsampled correlation pass narrows the full-resolution
/// search area to the union of every candidate neighborhood scoring
/// above a relaxed floor, using [`MIN_TARGET_DIMENSION_FIND_ALL`] as the
/// dimension floor for the downscale ratio. Returns `area` unchanged
/// when the target is already at or below that floor (too little signal
/// survives downsampling that small) or when the coarse pass finds
/// nothing worth narrowing around.
fn find_all_prefilter_region(source: &Image, target: &Image, min_similarity: f64, area: Rectangle) -> Rectangle {
    let ratio = base_ratio(target.width(), target.height(), MIN_TARGET_DIMENSION_FIND_ALL);
    if ratio <= 1.0 {
        return area;
    }
    let scale = 1.0 / ratio;
    let scaled_source = resize_image(source, scale);
    let scaled_target = resize_image(target, scale);
    let scaled_area = scale_rect(area, scale).clamp_to(&scaled_source.bounds());

    let Some(map) = matcher::correlate(&scaled_source, &scaled_target, Some(scaled_area)) else {
        return area;
    };

    // Generous margin below min_similarity: a downsampled pass loses
    // fidelity, so this only needs to avoid dropping true matches, not
    // to be a tight filter.
    let relaxed = (min_similarity - 0.15).max(0.0);
    let mut union: Option<Rectangle> = None;
    for y in 0..map.height() {
        for x in 0..map.width() {
            if map.get(x, y) < relaxed {
                continue;
            }
            let coarse_point = Point::new(scaled_area.x + x as i32, scaled_area.y + y as i32);
            let full_point = scale_point(coarse_point, ratio);
            let halo = halo_roi(full_point, target.width(), target.height(), area);
            union = Some(match union {
                Some(u) => u.union(&halo),
                None => halo,
            });
        }
    }
    union.unwrap_or(area)
}

/// Find every non-overlapping occurrence of `target` in `source` at or
/// above `min_similarity`, by repeatedly taking the correlation map's
/// argmax and erasing a halo around it (§4.4's erase-and-rescan loop).
///
/// The final enumeration itself always runs at full resolution --
/// findAll's accuracy requirement (distinguish closely-packed, possibly
/// overlapping matches) outweighs the pyramid's speed benefit -- but
/// [`find_all_prefilter_region`] first uses a coarse downsampled pass to
/// narrow the area that full-resolution enumeration has to cover.
pub fn find_all(source: &Image, target: &Image, min_similarity: f64, roi: Option<Rectangle>) -> Vec<PyramidMatch> {
    let area = roi.unwrap_or_else(|| source.bounds());
    let search_area = find_all_prefilter_region(source, target, min_similarity, area);

    let Some(mut map) = matcher::correlate(source, target, Some(search_area)) else {
        return Vec::new();
    };
    let (mx, my) = erase_margin(target);

    let mut matches = Vec::new();
    loop {
        let Some((x, y, score)) = map.argmax() else {
            break;
        };
        if score < min_similarity {
            break;
        }
        matches.push(PyramidMatch {
            score,
            location: Point::new(search_area.x + x as i32, search_area.y + y as i32),
        });
        map.erase_around(x, y, mx, my);
    }
    matches
}
