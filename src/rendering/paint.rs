/// Display-list commands shared by the map and grid rasterizers.
///
/// Coordinates are CSS pixels; the rasterizer applies the device pixel ratio.

use image::RgbaImage;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub rgba: [u8; 4],
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        rgba: [u8; 4],
    },
    Circle {
        cx: f64,
        cy: f64,
        radius: f64,
        fill: Option<[u8; 4]>,
        stroke: Option<Stroke>,
    },
    /// Closed polygon, filled with the even-odd rule
    Polygon {
        points: Vec<(f64, f64)>,
        fill: Option<[u8; 4]>,
        stroke: Option<Stroke>,
    },
    /// Image drawn into the given box, resampled if the sizes differ
    Image {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        image: Arc<RgbaImage>,
        opacity: f32,
    },
    /// One line of text in block glyphs; `y` is the top of the line box
    Text {
        x: f64,
        y: f64,
        text: String,
        rgba: [u8; 4],
        bold: bool,
    },
}
