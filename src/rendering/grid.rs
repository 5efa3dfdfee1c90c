//! Grid capture.
//!
//! The live grid node is deep-copied, tagged with the export class (which
//! lifts the scroll clipping of the live view) and attached off-screen at
//! its full natural size. Capture itself is callback based and runs on a
//! worker thread; `rasterize` turns it into a future and drops the clone as
//! soon as the callback has fired.

use super::layout::{self, GridLayout, BORDER};
use super::paint::PaintCommand;
use super::raster;
use super::Bitmap;
use crate::dom::{AttachedNode, Document, NodeId, NodeKind, NodeSpec, Placement, RunId};
use crate::{Error, ExportConfig, Result};
use scraper::Html;
use tokio::sync::oneshot;

const GRID_BACKGROUND: [u8; 4] = [255, 255, 255, 255];
const HEADER_BACKGROUND: [u8; 4] = [242, 242, 242, 255];
const BORDER_COLOR: [u8; 4] = [208, 208, 208, 255];
const TEXT_COLOR: [u8; 4] = [33, 33, 33, 255];

/// Rasterizes a grid node at an increased pixel density
#[derive(Debug, Clone)]
pub struct GridRasterizer {
    pixel_ratio: f64,
    export_class: String,
    offscreen_offset: i32,
}

impl GridRasterizer {
    pub fn new(pixel_ratio: f64, export_class: impl Into<String>, offscreen_offset: i32) -> Self {
        Self { pixel_ratio, export_class: export_class.into(), offscreen_offset }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(config.grid_pixel_ratio, config.export_class.clone(), config.offscreen_offset)
    }

    /// Deep-copy the live grid node into an off-screen clone owned by `run`
    pub fn clone_grid(&self, document: &Document, live: NodeId, run: RunId) -> Result<AttachedNode> {
        let node = document
            .node(live)
            .ok_or_else(|| Error::grid_raster("live grid node is not attached"))?;
        let fragment = Html::parse_fragment(&node.html);
        let natural = layout::layout_grid(&fragment, None);

        let mut classes = node.classes.clone();
        classes.insert(self.export_class.clone());
        document.attach_scoped(NodeSpec {
            kind: NodeKind::GridClone,
            html: node.html,
            classes,
            placement: Placement {
                left: self.offscreen_offset,
                top: 0,
                width: Some(natural.width),
                height: Some(natural.natural_height),
            },
            owner: Some(run),
        })
    }

    /// Capture the node `id` on a worker thread and report through `callback`
    pub fn capture_with_callback<F>(&self, document: &Document, id: NodeId, callback: F)
    where
        F: FnOnce(Result<Bitmap>) + Send + 'static,
    {
        let document = document.clone();
        let ratio = self.pixel_ratio;
        let export_class = self.export_class.clone();
        std::thread::spawn(move || {
            let res = capture_node(&document, id, ratio, &export_class);
            callback(res);
        });
    }

    /// Clone, capture and remove: the grid half of an export
    pub async fn rasterize(&self, document: &Document, live: NodeId, run: RunId) -> Result<Bitmap> {
        let clone = self.clone_grid(document, live, run)?;

        let (tx, rx) = oneshot::channel();
        self.capture_with_callback(document, clone.id(), move |res| {
            let _ = tx.send(res);
        });
        let res = rx.await;

        if !clone.remove() {
            log::debug!("grid clone was already detached");
        }
        res.map_err(|e| Error::grid_raster(format!("capture canceled: {}", e)))?
    }
}

fn capture_node(document: &Document, id: NodeId, ratio: f64, export_class: &str) -> Result<Bitmap> {
    let node = document
        .node(id)
        .ok_or_else(|| Error::grid_raster("grid node detached before capture"))?;
    let fragment = Html::parse_fragment(&node.html);
    let clip = if node.classes.contains(export_class) {
        None
    } else {
        layout::live_clip(layout::root_style(&fragment).as_deref())
    };
    let grid = layout::layout_grid(&fragment, clip);
    if grid.is_empty() {
        return Err(Error::grid_raster("grid has no cells to capture"));
    }
    let commands = paint_grid(&grid);
    let bitmap = raster::rasterize(grid.width, grid.height, ratio, GRID_BACKGROUND, &commands)
        .map_err(Error::grid_raster)?;
    log::debug!(
        "grid captured: {} rows x {} columns -> {}x{} px",
        grid.rows,
        grid.columns,
        bitmap.width(),
        bitmap.height()
    );
    Ok(bitmap)
}

fn paint_grid(grid: &GridLayout) -> Vec<PaintCommand> {
    let mut cmds = Vec::with_capacity(grid.cells.len() * 4 + 2);
    let b = BORDER as f64;
    for cell in &grid.cells {
        let r = &cell.lb.rect;
        let (x, y, w, h) = (r.x as f64, r.y as f64, r.width as f64, r.height as f64);
        if cell.header {
            cmds.push(PaintCommand::SolidRect { x, y, width: w, height: h, rgba: HEADER_BACKGROUND });
        }
        // top and left edges; the table's right and bottom edges close the grid
        cmds.push(PaintCommand::SolidRect { x, y, width: w, height: b, rgba: BORDER_COLOR });
        cmds.push(PaintCommand::SolidRect { x, y, width: b, height: h, rgba: BORDER_COLOR });
        let (tx, ty) = cell.lb.content_origin();
        cmds.push(PaintCommand::Text {
            x: tx as f64,
            y: ty as f64,
            text: cell.text.clone(),
            rgba: TEXT_COLOR,
            bold: cell.header,
        });
    }
    let (w, h) = (grid.width as f64, grid.natural_height as f64);
    cmds.push(PaintCommand::SolidRect { x: w - b, y: 0.0, width: b, height: h, rgba: BORDER_COLOR });
    cmds.push(PaintCommand::SolidRect { x: 0.0, y: h - b, width: w, height: b, rgba: BORDER_COLOR });
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID: &str = r#"<div class="grid" style="max-height: 30px; overflow-y: auto"><table>
        <tr><th>Id</th><th>Name</th></tr>
        <tr><td>1</td><td>Alpha</td></tr>
        <tr><td>2</td><td>Beta</td></tr>
        <tr><td>3</td><td>Gamma</td></tr>
        </table></div>"#;

    #[test]
    fn clone_is_offscreen_and_marked_for_export() {
        let doc = Document::new();
        let live = doc.attach(NodeSpec::live(GRID)).unwrap();
        let r = GridRasterizer::new(2.0, "export-mode", -10000);
        let clone = r.clone_grid(&doc, live, RunId(3)).unwrap();
        let node = doc.node(clone.id()).unwrap();
        assert_eq!(node.kind, NodeKind::GridClone);
        assert!(node.classes.contains("export-mode"));
        assert!(node.classes.contains("grid"));
        assert_eq!(node.placement.height, Some(4 * 21 + 1));
        assert_eq!(node.owner, Some(RunId(3)));
        // live node untouched
        assert!(!doc.node(live).unwrap().classes.contains("export-mode"));
    }

    #[tokio::test]
    async fn rasterize_renders_full_table_and_removes_clone() {
        let doc = Document::new();
        let live = doc.attach(NodeSpec::live(GRID)).unwrap();
        let r = GridRasterizer::new(2.0, "export-mode", -10000);
        let bmp = r.rasterize(&doc, live, RunId(1)).await.unwrap();
        // natural height, not the 30px clip, at 2x
        assert_eq!(bmp.height(), (4 * 21 + 1) * 2);
        assert_eq!(doc.attached_of_kind(NodeKind::GridClone), 0);
        assert_eq!(doc.created_of_kind(NodeKind::GridClone), 1);
    }

    #[tokio::test]
    async fn live_capture_respects_clip() {
        let doc = Document::new();
        let live = doc.attach(NodeSpec::live(GRID)).unwrap();
        let r = GridRasterizer::new(1.0, "export-mode", -10000);
        let (tx, rx) = oneshot::channel();
        r.capture_with_callback(&doc, live, move |res| {
            let _ = tx.send(res);
        });
        let bmp = rx.await.unwrap().unwrap();
        assert_eq!(bmp.height(), 30);
    }

    #[tokio::test]
    async fn empty_grid_fails_and_still_cleans_up() {
        let doc = Document::new();
        let live = doc.attach(NodeSpec::live("<div class=\"grid\"><p>Loading</p></div>")).unwrap();
        let r = GridRasterizer::new(2.0, "export-mode", -10000);
        let err = r.rasterize(&doc, live, RunId(1)).await.unwrap_err();
        assert!(matches!(err, Error::RasterizationError(crate::RasterTarget::Grid, _)));
        assert_eq!(doc.attached_count(), 1);
    }
}
