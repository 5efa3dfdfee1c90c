//! Spherical Web Mercator, in world pixels of a 256px-tile pyramid.

use crate::layers::LatLng;

pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;
const EARTH_CIRCUMFERENCE_M: f64 = 40_075_016.686;
const TILE_EXTENT: f64 = 256.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Side length of the world in pixels at `zoom`
pub fn world_size(zoom: f64) -> f64 {
    TILE_EXTENT * 2f64.powf(zoom)
}

/// Project a position to world pixels at `zoom`
pub fn project(pos: LatLng, zoom: f64) -> Point {
    let size = world_size(zoom);
    let lat = pos.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (pos.lng + 180.0) / 360.0 * size;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * size;
    Point::new(x, y)
}

/// Ground resolution at a latitude
pub fn metres_per_pixel(lat: f64, zoom: f64) -> f64 {
    EARTH_CIRCUMFERENCE_M * lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians().cos() / world_size(zoom)
}

/// Maps positions to pixels of a fixed-size view centred on a position
#[derive(Debug, Clone, Copy)]
pub struct ViewTransform {
    pub zoom: f64,
    /// World-pixel coordinate of the view's top-left corner
    pub origin: Point,
}

impl ViewTransform {
    pub fn new(center: LatLng, zoom: f64, width: u32, height: u32) -> Self {
        let c = project(center, zoom);
        Self {
            zoom,
            origin: Point::new(c.x - width as f64 / 2.0, c.y - height as f64 / 2.0),
        }
    }

    pub fn to_view(&self, pos: LatLng) -> Point {
        let p = project(pos, self.zoom);
        Point::new(p.x - self.origin.x, p.y - self.origin.y)
    }
}
