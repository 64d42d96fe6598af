//! Canvas normalization: pad two rasters to their common bounding size.

use crate::RasterImage;
use std::borrow::Cow;

/// Bring `a` and `b` to the same dimensions, `(max width, max height)`.
///
/// Each image is copied top-left anchored into a fully transparent canvas;
/// nothing is scaled or cropped. Images that already have the target size
/// are borrowed as-is.
pub fn normalize<'a>(a: &'a RasterImage, b: &'a RasterImage) -> (Cow<'a, RasterImage>, Cow<'a, RasterImage>) {
    let width = a.width().max(b.width());
    let height = a.height().max(b.height());
    (pad_to(a, width, height), pad_to(b, width, height))
}

fn pad_to(img: &RasterImage, width: u32, height: u32) -> Cow<'_, RasterImage> {
    if img.dimensions() == (width, height) {
        return Cow::Borrowed(img);
    }
    let mut canvas = RasterImage::new(width, height);
    img.blit_into(&mut canvas);
    Cow::Owned(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_size_is_borrowed() {
        let a = RasterImage::filled(4, 4, [1, 1, 1, 255]);
        let b = RasterImage::filled(4, 4, [2, 2, 2, 255]);
        let (na, nb) = normalize(&a, &b);
        assert!(matches!(na, Cow::Borrowed(_)));
        assert!(matches!(nb, Cow::Borrowed(_)));
    }

    #[test]
    fn pads_to_bounding_rectangle_with_transparency() {
        let wide = RasterImage::filled(5, 2, [9, 9, 9, 255]);
        let tall = RasterImage::filled(2, 4, [7, 7, 7, 255]);
        let (na, nb) = normalize(&wide, &tall);
        assert_eq!(na.dimensions(), (5, 4));
        assert_eq!(nb.dimensions(), (5, 4));

        assert_eq!(na.pixel(4, 1), [9, 9, 9, 255]);
        assert_eq!(na.pixel(4, 2), [0, 0, 0, 0]);
        assert_eq!(nb.pixel(1, 3), [7, 7, 7, 255]);
        assert_eq!(nb.pixel(2, 0), [0, 0, 0, 0]);
    }
}
