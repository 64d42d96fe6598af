//! RGBA raster buffers and their file representation

use crate::{Error, Result};
use image::ImageEncoder;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// A decoded image: row-major RGBA, 4 bytes per pixel.
///
/// The buffer length always equals `width * height * 4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RasterImage {
    /// A fully transparent (all zero) image
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; byte_len(width, height)],
        }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height);
        if data.len() != expected {
            return Err(Error::InvalidInputError(format!(
                "RGBA buffer for {}x{} must be {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    /// An image where every pixel is `rgba`
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(byte_len(width, height) / 4);
        Self { width, height, data }
    }

    /// Decode an encoded image (PNG or JPEG)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| Error::ImageDecodeError(e.to_string()))?
            .into_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self {
            width,
            height,
            data: decoded.into_raw(),
        })
    }

    /// Read and decode an image file
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::decode(&bytes).map_err(|e| match e {
            Error::ImageDecodeError(reason) => {
                Error::ImageDecodeError(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(&self.data, self.width, self.height, image::ExtendedColorType::Rgba8)
            .map_err(|e| Error::RenderError(format!("PNG encoding failed: {}", e)))?;
        Ok(out)
    }

    /// Encode as PNG and write to `path`, creating parent directories
    pub fn save_png(&self, path: &Path) -> Result<()> {
        let png = self.encode_png()?;
        persist(path, &png)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Pixel at `(x, y)`; panics when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    /// Copy this image into `target` anchored at the top-left corner,
    /// clipping whatever does not fit.
    pub fn blit_into(&self, target: &mut RasterImage) {
        let cols = self.width.min(target.width) as usize * 4;
        let rows = self.height.min(target.height) as usize;
        let src_stride = self.width as usize * 4;
        let dst_stride = target.width as usize * 4;
        for row in 0..rows {
            let src = &self.data[row * src_stride..row * src_stride + cols];
            target.data[row * dst_stride..row * dst_stride + cols].copy_from_slice(src);
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        assert!(x < self.width && y < self.height, "pixel ({}, {}) out of bounds", x, y);
        (y as usize * self.width as usize + x as usize) * 4
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Write `bytes` to `path` so that a reader never sees a partial file:
/// the data goes to a uniquely named sibling temp file which is then renamed
/// into place. The temp file is removed if any step fails.
pub(crate) fn persist(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.file_name().is_none() {
        return Err(Error::InvalidInputError(format!(
            "output path '{}' has no file name",
            path.display()
        )));
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    temp.write_all(bytes).map_err(|e| Error::io(temp.path(), e))?;
    temp.flush().map_err(|e| Error::io(temp.path(), e))?;
    temp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgba_checks_length() {
        assert!(RasterImage::from_rgba(2, 2, vec![0; 16]).is_ok());
        let err = RasterImage::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, Error::InvalidInputError(_)));
    }

    #[test]
    fn png_roundtrip_preserves_pixels() {
        let mut img = RasterImage::filled(3, 2, [10, 20, 30, 255]);
        img.put_pixel(2, 1, [200, 100, 0, 128]);
        let decoded = RasterImage::decode(&img.encode_png().unwrap()).unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = RasterImage::decode(b"definitely not a png").unwrap_err();
        assert!(matches!(err, Error::ImageDecodeError(_)));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = RasterImage::open(Path::new("/nonexistent/dir/missing.png")).unwrap_err();
        assert!(matches!(err, Error::FileIoError { .. }));
    }

    #[test]
    fn blit_clips_to_target() {
        let src = RasterImage::filled(4, 4, [1, 2, 3, 4]);
        let mut dst = RasterImage::new(2, 3);
        src.blit_into(&mut dst);
        assert!(dst.as_bytes().chunks(4).all(|p| p == [1, 2, 3, 4]));
    }

    #[test]
    fn persist_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.png");
        persist(&path, b"abc").unwrap();
        persist(&path, b"replaced").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"replaced");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("out.png")]);
    }

    #[test]
    fn concurrent_writers_to_one_path_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.png");
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 64 * 1024]).collect();

        std::thread::scope(|scope| {
            for payload in &payloads {
                let path = &path;
                scope.spawn(move || persist(path, payload).unwrap());
            }
        });

        let written = std::fs::read(&path).unwrap();
        assert!(payloads.contains(&written));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        // a directory already occupies the target name, so the rename fails
        let path = dir.path().join("taken.png");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let err = persist(&path, b"abc").unwrap_err();
        assert!(matches!(err, Error::FileIoError { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
