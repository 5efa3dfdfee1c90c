//! Rendering: display lists, rasterization and compositing.
//!
//! Both surfaces are turned into a list of `PaintCommand`s and executed by
//! the same rasterizer, so map and grid captures share one pixel pipeline.

pub mod composite;
pub mod grid;
pub mod layout;
pub mod map;
pub mod paint;
pub mod raster;

pub use composite::{compose, CompositeResult};
pub use grid::GridRasterizer;
pub use map::MapRasterizer;

use image::RgbaImage;
use sha2::{Digest, Sha256};

/// Immutable capture of one surface
#[derive(Debug, Clone)]
pub struct Bitmap {
    pixels: RgbaImage,
}

impl Bitmap {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

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
}

pub(crate) fn pixel_digest(pixels: &RgbaImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pixels.width().to_be_bytes());
    hasher.update(pixels.height().to_be_bytes());
    hasher.update(pixels.as_raw());
    hex::encode(hasher.finalize())
}
