/// Software rasterizer executing `PaintCommand` lists onto an RGBA canvas.

use crate::rendering::paint::{PaintCommand, Stroke};
use crate::rendering::Bitmap;
use image::imageops::{self, FilterType};
use image::{GenericImageView, Rgba, RgbaImage};
use std::borrow::Cow;

/// Horizontal advance of one block glyph, in CSS pixels
pub const GLYPH_ADVANCE: f64 = 8.0;
/// Height of one text line box, in CSS pixels
pub const LINE_HEIGHT: f64 = 8.0;
/// Largest canvas side we are willing to allocate, in device pixels
pub const MAX_CANVAS_SIDE: u32 = 32_767;

/// Rasterize `commands` onto a `width`×`height` (CSS px) canvas at `scale` device pixels per CSS px.
pub fn rasterize(
    width: u32,
    height: u32,
    scale: f64,
    background: [u8; 4],
    commands: &[PaintCommand],
) -> std::result::Result<Bitmap, String> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(format!("invalid pixel ratio {}", scale));
    }
    let dw = (width as f64 * scale).ceil();
    let dh = (height as f64 * scale).ceil();
    if dw < 1.0 || dh < 1.0 {
        return Err(format!("cannot capture an empty {}x{} surface", width, height));
    }
    if dw > MAX_CANVAS_SIDE as f64 || dh > MAX_CANVAS_SIDE as f64 {
        return Err(format!("capture of {}x{} device pixels exceeds canvas limits", dw, dh));
    }

    let mut canvas = Canvas {
        img: RgbaImage::from_pixel(dw as u32, dh as u32, Rgba(background)),
        scale,
    };
    for cmd in commands {
        canvas.execute(cmd);
    }
    Ok(Bitmap::new(canvas.img))
}

struct Canvas {
    img: RgbaImage,
    scale: f64,
}

impl Canvas {
    fn execute(&mut self, cmd: &PaintCommand) {
        let s = self.scale;
        match cmd {
            PaintCommand::SolidRect { x, y, width, height, rgba } => {
                self.fill_rect(x * s, y * s, width * s, height * s, *rgba)
            }
            PaintCommand::Circle { cx, cy, radius, fill, stroke } => {
                let (cx, cy, r) = (cx * s, cy * s, radius * s);
                if let Some(fill) = fill {
                    self.paint_where(cx - r, cy - r, cx + r, cy + r, *fill, |px, py| {
                        (px - cx).hypot(py - cy) <= r
                    });
                }
                if let Some(Stroke { rgba, width }) = stroke {
                    let hw = width * s / 2.0;
                    self.paint_where(cx - r - hw, cy - r - hw, cx + r + hw, cy + r + hw, *rgba, |px, py| {
                        ((px - cx).hypot(py - cy) - r).abs() <= hw
                    });
                }
            }
            PaintCommand::Polygon { points, fill, stroke } => {
                let pts: Vec<(f64, f64)> = points.iter().map(|(x, y)| (x * s, y * s)).collect();
                if let Some(fill) = fill {
                    self.fill_polygon(&pts, *fill);
                }
                if let Some(stroke) = stroke {
                    self.stroke_polygon(&pts, stroke.rgba, stroke.width * s / 2.0);
                }
            }
            PaintCommand::Image { x, y, width, height, image, opacity } => {
                self.draw_image(x * s, y * s, width * s, height * s, image, *opacity)
            }
            PaintCommand::Text { x, y, text, rgba, bold } => {
                let glyph_w = if *bold { 7.0 } else { 5.0 };
                for (i, ch) in text.chars().enumerate() {
                    if ch.is_whitespace() {
                        continue;
                    }
                    let gx = x + i as f64 * GLYPH_ADVANCE + 1.0;
                    self.fill_rect(gx * s, (y + 1.0) * s, glyph_w * s, (LINE_HEIGHT - 2.0) * s, *rgba);
                }
            }
        }
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, rgba: [u8; 4]) {
        let (x0, y0) = (self.clamp_x(x.round()), self.clamp_y(y.round()));
        let (x1, y1) = (self.clamp_x((x + w).round()), self.clamp_y((y + h).round()));
        for py in y0..y1 {
            for px in x0..x1 {
                blend(self.img.get_pixel_mut(px, py), rgba);
            }
        }
    }

    /// Blend `rgba` into every pixel of the box whose centre satisfies `inside`
    fn paint_where<F>(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, rgba: [u8; 4], inside: F)
    where
        F: Fn(f64, f64) -> bool,
    {
        let (px0, py0) = (self.clamp_x(x0.floor()), self.clamp_y(y0.floor()));
        let (px1, py1) = (self.clamp_x(x1.ceil()), self.clamp_y(y1.ceil()));
        for py in py0..py1 {
            for px in px0..px1 {
                if inside(px as f64 + 0.5, py as f64 + 0.5) {
                    blend(self.img.get_pixel_mut(px, py), rgba);
                }
            }
        }
    }

    fn fill_polygon(&mut self, pts: &[(f64, f64)], rgba: [u8; 4]) {
        if pts.len() < 3 {
            return;
        }
        let min_y = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_y = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        let (row0, row1) = (self.clamp_y(min_y.floor()), self.clamp_y(max_y.ceil()));
        let mut xs = Vec::new();
        for row in row0..row1 {
            let yc = row as f64 + 0.5;
            xs.clear();
            for i in 0..pts.len() {
                let (a, b) = (pts[i], pts[(i + 1) % pts.len()]);
                if (a.1 <= yc) != (b.1 <= yc) {
                    xs.push(a.0 + (yc - a.1) * (b.0 - a.0) / (b.1 - a.1));
                }
            }
            xs.sort_by(|a, b| a.total_cmp(b));
            for pair in xs.chunks_exact(2) {
                let start = self.clamp_x((pair[0] - 0.5).ceil());
                let end = self.clamp_x((pair[1] - 0.5).ceil());
                for px in start..end {
                    blend(self.img.get_pixel_mut(px, row), rgba);
                }
            }
        }
    }

    fn stroke_polygon(&mut self, pts: &[(f64, f64)], rgba: [u8; 4], hw: f64) {
        if pts.len() < 2 || hw <= 0.0 {
            return;
        }
        let min_x = pts.iter().map(|p| p.0).fold(f64::INFINITY, f64::min) - hw;
        let max_x = pts.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max) + hw;
        let min_y = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min) - hw;
        let max_y = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max) + hw;
        let n = pts.len();
        self.paint_where(min_x, min_y, max_x, max_y, rgba, |px, py| {
            (0..n).any(|i| dist_to_segment((px, py), pts[i], pts[(i + 1) % n]) <= hw)
        });
    }

    /// Draw `image` into the device box. Only the part of the box that lies on
    /// the canvas is ever resampled, however large the box is.
    fn draw_image(&mut self, x: f64, y: f64, w: f64, h: f64, image: &RgbaImage, opacity: f32) {
        let (dw, dh) = (w.round(), h.round());
        let (iw, ih) = image.dimensions();
        if dw < 1.0 || dh < 1.0 || opacity <= 0.0 || iw == 0 || ih == 0 {
            return;
        }
        let (ox, oy) = (x.round(), y.round());
        let vx0 = ox.max(0.0);
        let vy0 = oy.max(0.0);
        let vx1 = (ox + dw).min(self.img.width() as f64);
        let vy1 = (oy + dh).min(self.img.height() as f64);
        if vx0 >= vx1 || vy0 >= vy1 {
            return;
        }
        let (vw, vh) = ((vx1 - vx0) as u32, (vy1 - vy0) as u32);
        let (left, top) = (vx0 as u32, vy0 as u32);
        let (skip_x, skip_y) = (vx0 - ox, vy0 - oy);

        if dw <= iw as f64 && dh <= ih as f64 {
            // same size or smaller: the resampled image is never larger than the source
            let src: Cow<'_, RgbaImage> = if (iw as f64, ih as f64) == (dw, dh) {
                Cow::Borrowed(image)
            } else {
                Cow::Owned(imageops::resize(image, dw as u32, dh as u32, FilterType::Triangle))
            };
            let visible = imageops::crop_imm(&*src, skip_x as u32, skip_y as u32, vw, vh);
            for (sx, sy, p) in visible.pixels() {
                self.blend_image_pixel(left + sx, top + sy, p.0, opacity);
            }
        } else {
            for py in 0..vh {
                let v = (skip_y + py as f64 + 0.5) / dh;
                for px in 0..vw {
                    let u = (skip_x + px as f64 + 0.5) / dw;
                    if let Some(p) = imageops::sample_bilinear(image, u as f32, v as f32) {
                        self.blend_image_pixel(left + px, top + py, p.0, opacity);
                    }
                }
            }
        }
    }

    fn blend_image_pixel(&mut self, x: u32, y: u32, p: [u8; 4], opacity: f32) {
        let a = (p[3] as f32 * opacity.min(1.0)).round() as u8;
        blend(self.img.get_pixel_mut(x, y), [p[0], p[1], p[2], a]);
    }

    fn clamp_x(&self, v: f64) -> u32 {
        v.clamp(0.0, self.img.width() as f64) as u32
    }

    fn clamp_y(&self, v: f64) -> u32 {
        v.clamp(0.0, self.img.height() as f64) as u32
    }
}

fn dist_to_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    (p.0 - (a.0 + t * dx)).hypot(p.1 - (a.1 + t * dy))
}

/// Source-over blend of a straight-alpha colour into a pixel
fn blend(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for i in 0..3 {
        let c = (src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) / out_a;
        dst[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const RED: [u8; 4] = [255, 0, 0, 255];

    #[test]
    fn background_and_size_follow_scale() {
        let b = rasterize(10, 5, 2.0, WHITE, &[]).unwrap();
        assert_eq!((b.width(), b.height()), (20, 10));
        assert!(b.pixels().pixels().all(|p| p.0 == WHITE));
    }

    #[test]
    fn empty_surface_is_rejected() {
        assert!(rasterize(0, 10, 1.0, WHITE, &[]).is_err());
        assert!(rasterize(10, 10, 0.0, WHITE, &[]).is_err());
    }

    #[test]
    fn solid_rect_is_scaled() {
        let cmd = PaintCommand::SolidRect { x: 1.0, y: 1.0, width: 2.0, height: 2.0, rgba: RED };
        let b = rasterize(4, 4, 2.0, WHITE, &[cmd]).unwrap();
        assert_eq!(b.pixels().get_pixel(2, 2).0, RED);
        assert_eq!(b.pixels().get_pixel(5, 5).0, RED);
        assert_eq!(b.pixels().get_pixel(6, 6).0, WHITE);
        assert_eq!(b.pixels().get_pixel(1, 1).0, WHITE);
    }

    #[test]
    fn half_transparent_fill_blends_over_white() {
        let cmd = PaintCommand::Circle { cx: 5.0, cy: 5.0, radius: 3.0, fill: Some([0, 0, 255, 128]), stroke: None };
        let b = rasterize(10, 10, 1.0, WHITE, &[cmd]).unwrap();
        let p = b.pixels().get_pixel(5, 5).0;
        assert_eq!(p[2], 255);
        assert!(p[0] > 120 && p[0] < 135);
        assert_eq!(b.pixels().get_pixel(0, 0).0, WHITE);
    }

    #[test]
    fn polygon_fill_uses_even_odd() {
        let square = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let cmd = PaintCommand::Polygon { points: square, fill: Some(RED), stroke: None };
        let b = rasterize(12, 12, 1.0, WHITE, &[cmd]).unwrap();
        assert_eq!(b.pixels().get_pixel(0, 0).0, RED);
        assert_eq!(b.pixels().get_pixel(9, 9).0, RED);
        assert_eq!(b.pixels().get_pixel(10, 10).0, WHITE);
    }

    #[test]
    fn image_is_resampled_into_its_box() {
        let img = Arc::new(RgbaImage::from_pixel(2, 2, Rgba(RED)));
        let cmd = PaintCommand::Image { x: 2.0, y: 2.0, width: 4.0, height: 4.0, image: img, opacity: 1.0 };
        let b = rasterize(8, 8, 1.0, WHITE, &[cmd]).unwrap();
        assert_eq!(b.pixels().get_pixel(3, 3).0, RED);
        assert_eq!(b.pixels().get_pixel(6, 6).0, WHITE);
    }

    #[test]
    fn partly_visible_image_keeps_its_alignment() {
        // left half red, right half blue; only the blue half lands on the canvas
        let img = RgbaImage::from_fn(4, 2, |x, _| if x < 2 { Rgba(RED) } else { Rgba([0, 0, 255, 255]) });
        let cmd = PaintCommand::Image { x: -4.0, y: 0.0, width: 8.0, height: 4.0, image: Arc::new(img), opacity: 1.0 };
        let b = rasterize(6, 4, 1.0, WHITE, &[cmd]).unwrap();
        assert_eq!(b.pixels().get_pixel(1, 1).0, [0, 0, 255, 255]);
        assert_eq!(b.pixels().get_pixel(3, 3).0, [0, 0, 255, 255]);
        assert_eq!(b.pixels().get_pixel(4, 1).0, WHITE);
    }

    #[test]
    fn huge_stretch_only_samples_the_canvas() {
        // a 256px tile stretched 4096 times; the box is far larger than anything we could allocate
        let tile = Arc::new(RgbaImage::from_pixel(256, 256, Rgba([10, 200, 30, 255])));
        let side = 256.0 * 4096.0;
        let cmd = PaintCommand::Image { x: -side / 2.0, y: -side / 2.0, width: side, height: side, image: tile, opacity: 1.0 };
        let b = rasterize(64, 64, 1.0, WHITE, &[cmd]).unwrap();
        assert!(b.pixels().pixels().all(|p| p.0 == [10, 200, 30, 255]));
    }

    #[test]
    fn image_outside_the_canvas_draws_nothing() {
        let img = Arc::new(RgbaImage::from_pixel(8, 8, Rgba(RED)));
        let cmd = PaintCommand::Image { x: 1.0e12, y: 0.0, width: 1.0e9, height: 1.0e9, image: img, opacity: 1.0 };
        let b = rasterize(8, 8, 1.0, WHITE, &[cmd]).unwrap();
        assert!(b.pixels().pixels().all(|p| p.0 == WHITE));
    }

    #[test]
    fn text_leaves_ink_only_for_non_space() {
        let cmd = PaintCommand::Text { x: 0.0, y: 0.0, text: "a b".into(), rgba: [0, 0, 0, 255], bold: false };
        let b = rasterize(24, 8, 1.0, WHITE, &[cmd]).unwrap();
        assert_eq!(b.pixels().get_pixel(2, 3).0, [0, 0, 0, 255]);
        assert_eq!(b.pixels().get_pixel(10, 3).0, WHITE);
        assert_eq!(b.pixels().get_pixel(18, 3).0, [0, 0, 0, 255]);
    }
}
