//! Side-by-side compositing of the map and grid captures.

use super::raster::MAX_CANVAS_SIDE;
use super::{pixel_digest, Bitmap};
use crate::{Error, Result};
use base64::Engine as _;
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;

/// Largest composite we are willing to allocate, in pixels
pub const MAX_CANVAS_AREA: u64 = 268_435_456;
pub const COMPOSITE_BACKGROUND: [u8; 4] = [255, 255, 255, 255];

/// The final exported image
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pixels: RgbaImage,
}

impl CompositeResult {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Hex SHA-256 over dimensions and raw pixels
    pub fn digest(&self) -> String {
        pixel_digest(&self.pixels)
    }

    /// Encode as PNG
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(self.pixels.clone())
            .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)?;
        Ok(buf)
    }

    /// `data:image/png;base64,...` form of the PNG
    pub fn to_data_url(&self) -> Result<String> {
        let png = self.to_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}

/// Place `map` at the origin and `grid` directly to its right on a white canvas.
///
/// The canvas is exactly as wide as both captures together and as tall as the
/// taller one. Captures are drawn at their native size.
pub fn compose(map: &Bitmap, grid: &Bitmap) -> Result<CompositeResult> {
    let width = map
        .width()
        .checked_add(grid.width())
        .ok_or_else(|| Error::CompositionError("composite width overflows".into()))?;
    let height = map.height().max(grid.height());
    if width == 0 || height == 0 {
        return Err(Error::CompositionError(format!("empty {}x{} composite", width, height)));
    }
    if width > MAX_CANVAS_SIDE || height > MAX_CANVAS_SIDE || width as u64 * height as u64 > MAX_CANVAS_AREA {
        return Err(Error::CompositionError(format!(
            "{}x{} composite exceeds canvas limits",
            width, height
        )));
    }

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba(COMPOSITE_BACKGROUND));
    imageops::overlay(&mut canvas, map.pixels(), 0, 0);
    imageops::overlay(&mut canvas, grid.pixels(), map.width() as i64, 0);
    Ok(CompositeResult { pixels: canvas })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Bitmap {
        Bitmap::new(RgbaImage::from_pixel(w, h, Rgba(rgba)))
    }

    #[test]
    fn sizes_are_sum_and_max() {
        let map = solid(30, 20, [0, 0, 255, 255]);
        let grid = solid(10, 50, [255, 0, 0, 255]);
        let c = compose(&map, &grid).unwrap();
        assert_eq!((c.width(), c.height()), (40, 50));
        assert_eq!(c.pixels().get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(c.pixels().get_pixel(30, 0).0, [255, 0, 0, 255]);
        // below the shorter map the background shows
        assert_eq!(c.pixels().get_pixel(5, 30).0, COMPOSITE_BACKGROUND);
    }

    #[test]
    fn transparent_pixels_show_white() {
        let map = solid(4, 4, [0, 0, 0, 0]);
        let grid = solid(4, 4, [0, 0, 0, 0]);
        let c = compose(&map, &grid).unwrap();
        assert!(c.pixels().pixels().all(|p| p.0 == COMPOSITE_BACKGROUND));
    }

    #[test]
    fn oversized_composite_is_a_composition_error() {
        let map = Bitmap::new(RgbaImage::new(MAX_CANVAS_SIDE, 1));
        let grid = Bitmap::new(RgbaImage::new(1, 1));
        assert!(matches!(compose(&map, &grid), Err(Error::CompositionError(_))));
    }

    #[test]
    fn png_and_data_url_encode() {
        let c = compose(&solid(2, 2, [1, 2, 3, 255]), &solid(2, 2, [4, 5, 6, 255])).unwrap();
        let png = c.to_png().unwrap();
        assert_eq!(&png[0..8], b"\x89PNG\r\n\x1a\n");
        assert!(c.to_data_url().unwrap().starts_with("data:image/png;base64,iVBOR"));
    }
}
