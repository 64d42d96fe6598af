//! Pixel diff engine.
//!
//! Two pixels are compared by their perceived color: both are blended onto a
//! white background according to their alpha, converted to YIQ, and the
//! weighted squared distance is tested against `MAX_YIQ_DELTA * threshold²`.
//!
//! A differing pixel is treated as anti-aliasing (and not counted unless
//! `include_aa` is set) when, in either image, it sits on an edge whose
//! darkest or brightest neighbour lies in a flat region of both images. Edge
//! means: at most two of its 3×3 neighbours share its brightness, and it has
//! both a darker and a brighter neighbour. Flat means: more than two of the
//! neighbour's own neighbours are identical to it.
//!
//! Pixels outside either image's source extent (canvas padding) are never
//! anti-aliasing: padding is a real difference wherever it differs.

use crate::{CompareOptions, Error, RasterImage, Result};

/// Largest possible weighted YIQ delta between two colors
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Outcome of a pixel comparison
#[derive(Debug, Clone)]
pub struct DiffSummary {
    /// Pixels counted as real differences
    pub diff_pixels: u64,
    /// Differing pixels that were classified as anti-aliasing
    pub aa_pixels: u64,
    /// Visualization of the comparison
    pub diff: RasterImage,
}

/// Compare two rasters of identical dimensions.
///
/// Unchanged pixels are drawn as faded grayscale of `a`, real differences in
/// `diff_color` (or `diff_color_alt` when `b` is darker) and anti-aliased
/// pixels in `aa_color`. With `diff_mask` only the differences are drawn.
pub fn diff(a: &RasterImage, b: &RasterImage, options: &CompareOptions) -> Result<DiffSummary> {
    diff_padded(a, b, a.dimensions(), b.dimensions(), options)
}

/// [`diff`] for canvases padded from smaller sources: `extent_a` and
/// `extent_b` are the top-left anchored source sizes inside `a` and `b`.
pub fn diff_padded(
    a: &RasterImage,
    b: &RasterImage,
    extent_a: (u32, u32),
    extent_b: (u32, u32),
    options: &CompareOptions,
) -> Result<DiffSummary> {
    if a.dimensions() != b.dimensions() {
        return Err(Error::InvalidInputError(format!(
            "diff needs equal dimensions, got {}x{} and {}x{}",
            a.width(),
            a.height(),
            b.width(),
            b.height()
        )));
    }

    let width = a.width() as usize;
    let height = a.height() as usize;
    let (img1, img2) = (a.as_bytes(), b.as_bytes());
    let mut diff = RasterImage::new(a.width(), a.height());
    let out = diff.as_bytes_mut();

    if img1 == img2 {
        if !options.diff_mask {
            for pos in (0..img1.len()).step_by(4) {
                draw_gray_pixel(img1, pos, options.alpha, out);
            }
        }
        return Ok(DiffSummary { diff_pixels: 0, aa_pixels: 0, diff });
    }

    let max_delta = MAX_YIQ_DELTA * options.threshold * options.threshold;
    let mut diff_pixels = 0u64;
    let mut aa_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let pos = (y * width + x) * 4;
            let delta = color_delta(img1, img2, pos, pos, false);

            if delta.abs() > max_delta {
                let is_aa = !options.include_aa
                    && within(x, y, extent_a)
                    && within(x, y, extent_b)
                    && (antialiased(img1, x, y, width, height, img2)
                        || antialiased(img2, x, y, width, height, img1));
                if is_aa {
                    aa_pixels += 1;
                    if !options.diff_mask {
                        draw_pixel(out, pos, options.aa_color);
                    }
                } else {
                    // b is darker when the signed delta is negative
                    let color = match options.diff_color_alt {
                        Some(alt) if delta < 0.0 => alt,
                        _ => options.diff_color,
                    };
                    draw_pixel(out, pos, color);
                    diff_pixels += 1;
                }
            } else if !options.diff_mask {
                draw_gray_pixel(img1, pos, options.alpha, out);
            }
        }
    }

    Ok(DiffSummary { diff_pixels, aa_pixels, diff })
}

fn within(x: usize, y: usize, (width, height): (u32, u32)) -> bool {
    x < width as usize && y < height as usize
}

/// Whether the pixel at `(x1, y1)` of `img` looks like an anti-aliased edge
/// pixel, using `other` to confirm its flat neighbours.
fn antialiased(img: &[u8], x1: usize, y1: usize, width: usize, height: usize, other: &[u8]) -> bool {
    let x0 = x1.saturating_sub(1);
    let y0 = y1.saturating_sub(1);
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let pos = (y1 * width + x1) * 4;

    // pixels on the image border have one implicit equal neighbour
    let mut zeroes = usize::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);
    let (mut min, mut max) = (0.0f64, 0.0f64);
    let (mut min_at, mut max_at) = ((0, 0), (0, 0));

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let delta = color_delta(img, img, pos, (y * width + x) * 4, true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_at = (x, y);
            } else if delta > max {
                max = delta;
                max_at = (x, y);
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    let flat_in_both = |(x, y): (usize, usize)| {
        has_many_siblings(img, x, y, width, height) && has_many_siblings(other, x, y, width, height)
    };
    flat_in_both(min_at) || flat_in_both(max_at)
}

/// More than two identical neighbours around `(x1, y1)`
fn has_many_siblings(img: &[u8], x1: usize, y1: usize, width: usize, height: usize) -> bool {
    let x0 = x1.saturating_sub(1);
    let y0 = y1.saturating_sub(1);
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let pos = (y1 * width + x1) * 4;
    let center = &img[pos..pos + 4];

    let mut zeroes = usize::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);
    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let pos2 = (y * width + x) * 4;
            if center == &img[pos2..pos2 + 4] {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }
    false
}

/// Signed perceptual distance between pixel `k` of `img1` and pixel `m` of
/// `img2`. Negative when the second pixel is darker. With `y_only` the
/// signed brightness difference is returned instead.
fn color_delta(img1: &[u8], img2: &[u8], k: usize, m: usize, y_only: bool) -> f64 {
    let p1 = &img1[k..k + 4];
    let p2 = &img2[m..m + 4];
    if p1 == p2 {
        return 0.0;
    }

    let (r1, g1, b1) = blend_onto_white(p1);
    let (r2, g2, b2) = blend_onto_white(p2);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;
    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;

    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

fn blend_onto_white(p: &[u8]) -> (f64, f64, f64) {
    let (r, g, b, a) = (p[0] as f64, p[1] as f64, p[2] as f64, p[3]);
    if a == 255 {
        return (r, g, b);
    }
    let a = a as f64 / 255.0;
    (blend(r, a), blend(g, a), blend(b, a))
}

fn blend(c: f64, a: f64) -> f64 {
    255.0 + (c - 255.0) * a
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

fn draw_pixel(out: &mut [u8], pos: usize, [r, g, b]: [u8; 3]) {
    out[pos..pos + 4].copy_from_slice(&[r, g, b, 255]);
}

fn draw_gray_pixel(img: &[u8], pos: usize, alpha: f64, out: &mut [u8]) {
    let y = rgb2y(img[pos] as f64, img[pos + 1] as f64, img[pos + 2] as f64);
    let value = blend(y, alpha * img[pos + 3] as f64 / 255.0).clamp(0.0, 255.0) as u8;
    draw_pixel(out, pos, [value, value, value]);
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    #[test]
    fn identical_images_have_no_difference() {
        let a = RasterImage::filled(8, 8, [40, 80, 120, 255]);
        let summary = diff(&a, &a.clone(), &CompareOptions { threshold: 0.0, ..Default::default() }).unwrap();
        assert_eq!(summary.diff_pixels, 0);
        // unchanged pixels are drawn faded and opaque
        assert_eq!(summary.diff.pixel(3, 3)[3], 255);
    }

    #[test]
    fn single_black_white_pixel_is_counted() {
        let mut a = RasterImage::filled(2, 2, WHITE);
        let b = RasterImage::filled(2, 2, WHITE);
        a.put_pixel(0, 0, BLACK);
        let summary = diff(&a, &b, &CompareOptions::default()).unwrap();
        assert_eq!(summary.diff_pixels, 1);
        assert_eq!(summary.diff.pixel(0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn alt_color_marks_pixels_that_got_darker() {
        let a = RasterImage::filled(3, 3, WHITE);
        let mut b = a.clone();
        b.put_pixel(1, 1, BLACK);
        let opts = CompareOptions {
            diff_color_alt: Some([0, 255, 0]),
            include_aa: true,
            ..Default::default()
        };
        let summary = diff(&a, &b, &opts).unwrap();
        assert_eq!(summary.diff.pixel(1, 1), [0, 255, 0, 255]);
    }

    #[test]
    fn small_color_shift_is_within_threshold() {
        let a = RasterImage::filled(4, 4, [100, 100, 100, 255]);
        let b = RasterImage::filled(4, 4, [103, 100, 100, 255]);
        let loose = diff(&a, &b, &CompareOptions::default()).unwrap();
        assert_eq!(loose.diff_pixels, 0);
        let exact = diff(&a, &b, &CompareOptions { threshold: 0.0, ..Default::default() }).unwrap();
        assert_eq!(exact.diff_pixels, 16);
    }

    #[test]
    fn transparent_pixels_blend_onto_white() {
        let a = RasterImage::filled(2, 2, [0, 0, 0, 0]);
        let b = RasterImage::filled(2, 2, WHITE);
        let summary = diff(&a, &b, &CompareOptions { threshold: 0.0, ..Default::default() }).unwrap();
        assert_eq!(summary.diff_pixels, 0);
    }

    #[test]
    fn diff_mask_leaves_unchanged_pixels_transparent() {
        let a = RasterImage::filled(3, 3, WHITE);
        let mut b = a.clone();
        b.put_pixel(2, 2, BLACK);
        let opts = CompareOptions { diff_mask: true, ..Default::default() };
        let summary = diff(&a, &b, &opts).unwrap();
        assert_eq!(summary.diff.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(summary.diff.pixel(2, 2), [255, 0, 0, 255]);
    }

    #[test]
    fn padded_pixels_are_never_anti_aliasing() {
        // a 1px gray line between white and black looks like an AA edge
        let mut a = RasterImage::filled(6, 3, WHITE);
        for x in 0..6 {
            a.put_pixel(x, 2, BLACK);
        }
        let mut b = a.clone();
        for x in 0..6 {
            a.put_pixel(x, 1, [128, 128, 128, 255]);
            b.put_pixel(x, 1, [160, 160, 160, 255]);
        }
        let full = diff(&a, &b, &CompareOptions::default()).unwrap();
        // the left end's brightest neighbour is a corner with too few siblings
        assert_eq!(full.diff_pixels, 1);
        assert_eq!(full.aa_pixels, 5);

        // the same canvases where `a` was only 6x1 before padding
        let padded = diff_padded(&a, &b, (6, 1), (6, 3), &CompareOptions::default()).unwrap();
        assert_eq!(padded.diff_pixels, 6);
        assert_eq!(padded.aa_pixels, 0);
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let a = RasterImage::new(2, 2);
        let b = RasterImage::new(3, 2);
        assert!(matches!(diff(&a, &b, &CompareOptions::default()), Err(Error::InvalidInputError(_))));
    }

    #[test]
    fn color_delta_is_signed_by_brightness() {
        let white = WHITE;
        let black = BLACK;
        let darker = color_delta(&white, &black, 0, 0, false);
        let lighter = color_delta(&black, &white, 0, 0, false);
        assert!(darker < 0.0);
        assert!(lighter > 0.0);
        // black and white differ in brightness only
        assert!((lighter - 0.5053 * 255.0 * 255.0).abs() < 1.0);
        assert!(lighter < MAX_YIQ_DELTA);
    }
}
