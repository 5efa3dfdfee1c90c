//! Re-creating snapshot layers on an offscreen surface.

use super::projection::{self, Point};
use super::tiles::tile_url;
use super::{LoadKey, MarkerOverlay, OffscreenSurface, PathOverlay, PlacedTile, TileLayerState};
use crate::layers::{
    CircleDescriptor, LayerDescriptor, LayerKind, MarkerDescriptor, PathStyle, PolygonDescriptor,
    TileDescriptor,
};
use crate::rendering::paint::Stroke;

/// Upper bound on tiles a single layer may request for one surface
const MAX_TILES_PER_LAYER: usize = 4096;

/// Outcome of replicating a snapshot's layers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub tiles: usize,
    pub markers: usize,
    pub circles: usize,
    pub polygons: usize,
    /// Descriptors that could not be replicated
    pub failed: usize,
}

impl ReplicationStats {
    pub fn replicated(&self) -> usize {
        self.tiles + self.markers + self.circles + self.polygons
    }

    fn count(&mut self, kind: LayerKind) {
        match kind {
            LayerKind::Tile => self.tiles += 1,
            LayerKind::Marker => self.markers += 1,
            LayerKind::Circle => self.circles += 1,
            LayerKind::Polygon => self.polygons += 1,
        }
    }
}

impl OffscreenSurface {
    /// Add an independent copy of every descriptor to this surface.
    ///
    /// Tile layers go first so that overlays end up above the base imagery.
    /// A descriptor that fails is logged and counted; the others still get added.
    pub fn replicate(&mut self, layers: &[LayerDescriptor]) -> ReplicationStats {
        let mut ordered: Vec<&LayerDescriptor> = layers.iter().collect();
        // stable: relative order within each group is kept
        ordered.sort_by_key(|l| l.kind() != LayerKind::Tile);

        let mut stats = ReplicationStats::default();
        for desc in ordered {
            match self.add_layer(desc) {
                Ok(()) => stats.count(desc.kind()),
                Err(e) => {
                    log::warn!("surface {}: could not replicate {} layer: {}", self.id, desc.kind(), e);
                    stats.failed += 1;
                }
            }
        }
        log::debug!(
            "surface {}: replicated {} layers ({} failed), {} loads started",
            self.id,
            stats.replicated(),
            stats.failed,
            self.pending_loads()
        );
        stats
    }

    fn add_layer(&mut self, desc: &LayerDescriptor) -> std::result::Result<(), String> {
        desc.validate()?;
        match desc {
            LayerDescriptor::Tile(t) => self.add_tile_layer(t),
            LayerDescriptor::Marker(m) => {
                self.add_marker(m);
                Ok(())
            }
            LayerDescriptor::Circle(c) => {
                self.add_circle(c);
                Ok(())
            }
            LayerDescriptor::Polygon(p) => {
                self.add_polygon(p);
                Ok(())
            }
        }
    }

    fn add_tile_layer(&mut self, desc: &TileDescriptor) -> std::result::Result<(), String> {
        let opts = &desc.options;
        let max_native = opts.max_native_zoom.unwrap_or(opts.max_zoom).min(opts.max_zoom);
        let tile_zoom = (self.zoom.round() as i64).clamp(opts.min_zoom as i64, max_native as i64);
        // Beyond the native zoom tiles are stretched rather than dropped.
        let scale = 2f64.powf(self.zoom - tile_zoom as f64);
        let ts = opts.tile_size as f64;

        let origin = Point::new(self.view.origin.x / scale, self.view.origin.y / scale);
        let span_x = self.size.width as f64 / scale;
        let span_y = self.size.height as f64 / scale;
        let per_side = (projection::world_size(tile_zoom as f64) / ts).ceil().max(1.0) as i64;

        let x0 = (origin.x / ts).floor() as i64;
        let x1 = ((origin.x + span_x) / ts).ceil() as i64 - 1;
        let y0 = ((origin.y / ts).floor() as i64).max(0);
        let y1 = (((origin.y + span_y) / ts).ceil() as i64 - 1).min(per_side - 1);

        let count = (x1 - x0 + 1).max(0) as usize * (y1 - y0 + 1).max(0) as usize;
        if count > MAX_TILES_PER_LAYER {
            return Err(format!("layer would need {} tiles (limit {})", count, MAX_TILES_PER_LAYER));
        }

        let mut tiles = Vec::with_capacity(count);
        for ty in y0..=y1 {
            for tx in x0..=x1 {
                let url = tile_url(&desc.url_template, opts, tile_zoom, tx.rem_euclid(per_side), ty)?;
                tiles.push(PlacedTile {
                    url,
                    origin: Point::new(
                        tx as f64 * ts * scale - self.view.origin.x,
                        ty as f64 * ts * scale - self.view.origin.y,
                    ),
                    size: ts * scale,
                });
            }
        }

        let layer = self.tile_layers.len();
        for (index, tile) in tiles.iter().enumerate() {
            self.start_load(LoadKey::Tile { layer, index }, tile.url.clone(), opts.cross_origin.clone());
        }
        self.tile_layers.push(TileLayerState { opacity: opts.opacity.clamp(0.0, 1.0), tiles });
        Ok(())
    }

    fn add_marker(&mut self, desc: &MarkerDescriptor) {
        let p = self.view.to_view(desc.position);
        let (ax, ay) = desc.icon.anchor_point();
        let marker = self.markers.len();
        if let Some(url) = &desc.icon.url {
            self.start_load(LoadKey::Icon { marker }, url.clone(), None);
        }
        self.markers.push(MarkerOverlay {
            top_left: Point::new((p.x - ax as f64).round(), (p.y - ay as f64).round()),
            size: desc.icon.size,
            icon_url: desc.icon.url.clone(),
        });
    }

    fn add_circle(&mut self, desc: &CircleDescriptor) {
        let center = self.view.to_view(desc.center);
        let radius = desc.radius / projection::metres_per_pixel(desc.center.lat, self.zoom);
        let (fill, stroke) = resolve_style(&desc.style);
        self.paths.push(PathOverlay::Circle { center, radius, fill, stroke });
    }

    fn add_polygon(&mut self, desc: &PolygonDescriptor) {
        let points = desc.points.iter().map(|p| self.view.to_view(*p)).collect();
        let (fill, stroke) = resolve_style(&desc.style);
        self.paths.push(PathOverlay::Polygon { points, fill, stroke });
    }
}

fn with_alpha(rgba: [u8; 4], factor: f32) -> [u8; 4] {
    let a = (rgba[3] as f32 * factor.clamp(0.0, 1.0)).round() as u8;
    [rgba[0], rgba[1], rgba[2], a]
}

// Colours were checked by `validate`; a failed parse here just drops that part.
fn resolve_style(style: &PathStyle) -> (Option<[u8; 4]>, Option<Stroke>) {
    let fill = if style.fill {
        style.fill_rgba().map(|c| with_alpha(c, style.fill_opacity))
    } else {
        None
    };
    let stroke = if style.stroke && style.weight > 0.0 {
        style
            .stroke_rgba()
            .map(|c| Stroke { rgba: with_alpha(c, style.opacity), width: style.weight as f64 })
    } else {
        None
    };
    (fill, stroke)
}
