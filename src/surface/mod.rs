//! Offscreen map surface.
//!
//! A surface is built fresh for every export from a `SurfaceSnapshot`: a
//! container node attached outside the visible viewport and a headless map
//! view bound to it, at a larger size and a higher zoom than the live map.
//! Nothing on it is shared with the live map.

pub mod projection;
pub mod replicate;
pub mod tiles;

pub use replicate::ReplicationStats;
pub use tiles::{MemoryTileLoader, TileError, TileImage, TileLoader, TileRequest};
#[cfg(feature = "http-tiles")]
pub use tiles::HttpTileLoader;

use crate::dom::{AttachedNode, Document, NodeId, NodeKind, NodeSpec, Placement, RunId};
use crate::layers::LatLng;
use crate::rendering::paint::{PaintCommand, Stroke};
use crate::snapshot::SurfaceSnapshot;
use crate::{Error, ExportConfig, Result, Viewport};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use image::RgbaImage;
use projection::{Point, ViewTransform};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Leaflet-style container grey, visible where no tile has been drawn
pub const MAP_BACKGROUND: [u8; 4] = [221, 221, 221, 255];
const DEFAULT_MARKER_FILL: [u8; 4] = [42, 129, 203, 255];
const DEFAULT_MARKER_STROKE: [u8; 4] = [23, 82, 135, 255];

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Chrome and interaction switches of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub interactive: bool,
    pub zoom_control: bool,
    pub attribution_control: bool,
}

impl SurfaceOptions {
    /// No controls, no attribution, no input handling
    pub fn headless() -> Self {
        Self { interactive: false, zoom_control: false, attribution_control: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LoadKey {
    Tile { layer: usize, index: usize },
    Icon { marker: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct PlacedTile {
    pub url: String,
    pub origin: Point,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct TileLayerState {
    pub opacity: f32,
    pub tiles: Vec<PlacedTile>,
}

#[derive(Debug, Clone)]
pub(crate) enum PathOverlay {
    Circle { center: Point, radius: f64, fill: Option<[u8; 4]>, stroke: Option<Stroke> },
    Polygon { points: Vec<Point>, fill: Option<[u8; 4]>, stroke: Option<Stroke> },
}

#[derive(Debug, Clone)]
pub(crate) struct MarkerOverlay {
    pub top_left: Point,
    pub size: [u32; 2],
    pub icon_url: Option<String>,
}

struct LoadedImage {
    pixels: Arc<RgbaImage>,
    tainted: bool,
    url: String,
}

type PendingLoad = BoxFuture<'static, (LoadKey, String, std::result::Result<TileImage, TileError>)>;

/// Headless map view living in an offscreen container
pub struct OffscreenSurface {
    id: u64,
    document: Document,
    container: Option<AttachedNode>,
    listeners_bound: bool,
    options: SurfaceOptions,
    center: LatLng,
    zoom: f64,
    size: Viewport,
    view: ViewTransform,
    loader: Arc<dyn TileLoader>,
    pub(crate) tile_layers: Vec<TileLayerState>,
    pub(crate) paths: Vec<PathOverlay>,
    pub(crate) markers: Vec<MarkerOverlay>,
    pending: FuturesUnordered<PendingLoad>,
    images: HashMap<LoadKey, LoadedImage>,
    failed_loads: usize,
}

impl std::fmt::Debug for OffscreenSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffscreenSurface")
            .field("id", &self.id)
            .field("container", &self.container.as_ref().map(|c| c.id()))
            .field("zoom", &self.zoom)
            .field("size", &self.size)
            .field("tile_layers", &self.tile_layers.len())
            .field("paths", &self.paths.len())
            .field("markers", &self.markers.len())
            .finish()
    }
}

impl OffscreenSurface {
    /// Attach an offscreen container for `run` and create a surface seeded from `snapshot`.
    ///
    /// The surface is `config.offscreen` large and zoomed `config.zoom_increment`
    /// levels past the live zoom. No layers are added yet; see `replicate`.
    pub fn build(
        document: &Document,
        snapshot: &SurfaceSnapshot,
        config: &ExportConfig,
        run: RunId,
        loader: Arc<dyn TileLoader>,
    ) -> Result<Self> {
        let size = config.offscreen;
        if size.width == 0 || size.height == 0 {
            return Err(Error::ConfigError("offscreen surface size must be non-zero".into()));
        }
        if !snapshot.center.is_finite() || !snapshot.zoom.is_finite() {
            return Err(Error::Other(format!(
                "live map view is not finite (center {:?}, zoom {})",
                snapshot.center, snapshot.zoom
            )));
        }

        let id = NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed);
        let container = document.attach_scoped(NodeSpec {
            kind: NodeKind::OffscreenContainer,
            html: format!("<div id=\"export-map-{}\"></div>", id),
            classes: BTreeSet::from(["export-map-container".to_string()]),
            placement: Placement {
                left: config.offscreen_offset,
                top: 0,
                width: Some(size.width),
                height: Some(size.height),
            },
            owner: Some(run),
        })?;
        // Map views follow window size changes; the binding must go with the surface.
        document.add_listener("resize", id);

        let zoom = snapshot.zoom + config.zoom_increment;
        let view = ViewTransform::new(snapshot.center, zoom, size.width, size.height);
        log::debug!(
            "offscreen surface {} built: {}x{} at zoom {} (live zoom {})",
            id,
            size.width,
            size.height,
            zoom,
            snapshot.zoom
        );

        Ok(Self {
            id,
            document: document.clone(),
            container: Some(container),
            listeners_bound: true,
            options: SurfaceOptions::headless(),
            center: snapshot.center,
            zoom,
            size,
            view,
            loader,
            tile_layers: Vec::new(),
            paths: Vec::new(),
            markers: Vec::new(),
            pending: FuturesUnordered::new(),
            images: HashMap::new(),
            failed_loads: 0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn center(&self) -> LatLng {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn size(&self) -> Viewport {
        self.size
    }

    pub fn options(&self) -> SurfaceOptions {
        self.options
    }

    pub fn container_id(&self) -> Option<NodeId> {
        self.container.as_ref().map(|c| c.id())
    }

    pub(crate) fn view(&self) -> &ViewTransform {
        &self.view
    }

    /// Loads started but not yet finished
    pub fn pending_loads(&self) -> usize {
        self.pending.len()
    }

    pub fn loaded_images(&self) -> usize {
        self.images.len()
    }

    pub fn failed_loads(&self) -> usize {
        self.failed_loads
    }

    pub(crate) fn start_load(&mut self, key: LoadKey, url: String, cross_origin: Option<String>) {
        let fut = self.loader.load(TileRequest { url: url.clone(), cross_origin });
        self.pending.push(Box::pin(async move { (key, url, fut.await) }));
    }

    /// Let pending loads run for exactly `delay`, then stop waiting.
    ///
    /// Loads that complete inside the window become drawable; the rest stay
    /// pending and are not drawn.
    pub async fn settle(&mut self, delay: Duration) {
        let deadline = tokio::time::Instant::now() + delay;
        let pending = &mut self.pending;
        let images = &mut self.images;
        let failed = &mut self.failed_loads;
        let drive = async {
            while let Some((key, url, res)) = pending.next().await {
                match res {
                    Ok(img) => {
                        images.insert(
                            key,
                            LoadedImage { pixels: Arc::new(img.pixels), tainted: img.tainted, url },
                        );
                    }
                    Err(e) => {
                        log::warn!("image load failed: {}", e);
                        *failed += 1;
                    }
                }
            }
        };
        let _ = tokio::time::timeout_at(deadline, drive).await;
        tokio::time::sleep_until(deadline).await;
        if !self.pending.is_empty() {
            log::debug!(
                "surface {}: {} loads still pending after {:?}; they will not be drawn",
                self.id,
                self.pending.len(),
                delay
            );
        }
    }

    /// Paint commands for the current state: tiles, then vector paths, then markers.
    ///
    /// Fails if any image that would be drawn is tainted.
    pub fn display_list(&self) -> Result<Vec<PaintCommand>> {
        let mut cmds = Vec::new();

        for (layer_idx, layer) in self.tile_layers.iter().enumerate() {
            for (index, tile) in layer.tiles.iter().enumerate() {
                if let Some(img) = self.images.get(&LoadKey::Tile { layer: layer_idx, index }) {
                    self.check_taint(img)?;
                    cmds.push(PaintCommand::Image {
                        x: tile.origin.x,
                        y: tile.origin.y,
                        width: tile.size,
                        height: tile.size,
                        image: img.pixels.clone(),
                        opacity: layer.opacity,
                    });
                }
            }
        }

        for path in &self.paths {
            cmds.push(match path {
                PathOverlay::Circle { center, radius, fill, stroke } => PaintCommand::Circle {
                    cx: center.x,
                    cy: center.y,
                    radius: *radius,
                    fill: *fill,
                    stroke: *stroke,
                },
                PathOverlay::Polygon { points, fill, stroke } => PaintCommand::Polygon {
                    points: points.iter().map(|p| (p.x, p.y)).collect(),
                    fill: *fill,
                    stroke: *stroke,
                },
            });
        }

        for (marker_idx, marker) in self.markers.iter().enumerate() {
            let (w, h) = (marker.size[0] as f64, marker.size[1] as f64);
            match (&marker.icon_url, self.images.get(&LoadKey::Icon { marker: marker_idx })) {
                (Some(_), Some(img)) => {
                    self.check_taint(img)?;
                    cmds.push(PaintCommand::Image {
                        x: marker.top_left.x,
                        y: marker.top_left.y,
                        width: w,
                        height: h,
                        image: img.pixels.clone(),
                        opacity: 1.0,
                    });
                }
                // icon image not available (yet): nothing to draw, like a broken <img>
                (Some(_), None) => {}
                (None, _) => cmds.extend(default_pin(marker.top_left, w, h)),
            }
        }

        Ok(cmds)
    }

    fn check_taint(&self, img: &LoadedImage) -> Result<()> {
        if img.tainted {
            return Err(Error::map_raster(format!(
                "image {} is cross-origin and taints the canvas",
                img.url
            )));
        }
        Ok(())
    }

    /// Unbind the surface's event listeners. Safe to call more than once.
    pub fn unbind_listeners(&mut self) -> usize {
        if !self.listeners_bound {
            return 0;
        }
        self.listeners_bound = false;
        self.document.remove_listeners(self.id)
    }

    /// Hand the container guard to the caller for removal
    pub fn take_container(&mut self) -> Option<AttachedNode> {
        self.container.take()
    }
}

impl Drop for OffscreenSurface {
    fn drop(&mut self) {
        self.unbind_listeners();
    }
}

// Pin-shaped default marker: a round head over a point at the anchor.
fn default_pin(top_left: Point, w: f64, h: f64) -> Vec<PaintCommand> {
    let r = w / 2.0;
    let cx = top_left.x + r;
    let cy = top_left.y + r;
    let tip = (cx, top_left.y + h);
    vec![
        PaintCommand::Polygon {
            points: vec![(cx - r * 0.8, cy + r * 0.5), (cx + r * 0.8, cy + r * 0.5), tip],
            fill: Some(DEFAULT_MARKER_FILL),
            stroke: None,
        },
        PaintCommand::Circle {
            cx,
            cy,
            radius: r,
            fill: Some(DEFAULT_MARKER_FILL),
            stroke: Some(Stroke { rgba: DEFAULT_MARKER_STROKE, width: 1.0 }),
        },
        PaintCommand::Circle {
            cx,
            cy,
            radius: r * 0.35,
            fill: Some([255, 255, 255, 255]),
            stroke: None,
        },
    ]
}
