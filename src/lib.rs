//! Visual export
//!
//! Produces a single PNG that shows a case map next to its data grid. The
//! live map is never captured directly: its view and overlays are read into a
//! snapshot, replicated onto an offscreen surface at a higher zoom, and
//! rasterized there, while the grid is cloned without its scroll clipping and
//! rasterized at an increased pixel density. The two bitmaps are composited
//! side by side and handed to a download sink.
//!
//! # Features
//!
//! - **http-tiles** (default): `HttpTileLoader`, fetching tiles with `reqwest`
//!   and applying canvas taint rules to cross-origin images
//! - Pluggable `TileLoader`, `DownloadSink`, `Translator` and `Notifier` seams
//! - Re-entrancy guard: one run per pipeline, everything attached is released
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use visual_export::dom::{Document, NodeSpec};
//! use visual_export::emit::{DirectorySink, DownloadEmitter, IdentityTranslator};
//! use visual_export::snapshot::JsonLiveMap;
//! use visual_export::surface::MemoryTileLoader;
//! use visual_export::{ExportConfig, ExportPipeline, ExportRequest};
//!
//! # async fn demo() -> visual_export::Result<()> {
//! let document = Document::new();
//! let grid = document.attach(NodeSpec::live("<table><tr><td>C-1</td></tr></table>"))?;
//! let map = JsonLiveMap::from_json_str(r#"{"center": [52.5, 13.4], "zoom": 11, "layers": []}"#)?;
//!
//! let emitter = DownloadEmitter::new(Box::new(IdentityTranslator), Box::new(DirectorySink::new("out")));
//! let pipeline = ExportPipeline::new(
//!     ExportConfig::default(),
//!     document,
//!     Arc::new(MemoryTileLoader::new()),
//!     emitter,
//! );
//! let report = pipeline
//!     .run(&ExportRequest { map: Some(&map), grid: Some(grid), filename_stem: "Case map" })
//!     .await?;
//! println!("wrote {} ({}x{})", report.filename, report.width, report.height);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
pub use error::{Error, RasterTarget, Result, SourceKind};

pub mod dom;
pub mod emit;
pub mod layers;
pub mod pipeline;
pub mod reaper;
pub mod rendering;
pub mod snapshot;
pub mod surface;

pub use layers::{LatLng, LayerDescriptor};
pub use pipeline::{ExportPipeline, ExportReport, ExportRequest, Notifier, PipelineState};
pub use rendering::CompositeResult;

/// Export configuration
///
/// The defaults match the behaviour users expect from the report screen:
/// - the map is re-rendered on a 2000x2000 surface, two zoom levels closer
/// - tiles get 500 ms to arrive before the map is captured
/// - the grid is captured at twice its CSS pixel size
///
/// Partial JSON documents override only the fields they name.
///
/// # Examples
///
/// ```
/// let cfg = visual_export::ExportConfig::default();
/// assert_eq!(cfg.offscreen.width, 2000);
/// assert_eq!(cfg.zoom_increment, 2.0);
///
/// let cfg = visual_export::ExportConfig::from_json_str(r#"{"stabilization_delay_ms": 50}"#).unwrap();
/// assert_eq!(cfg.stabilization_delay_ms, 50);
/// assert_eq!(cfg.grid_pixel_ratio, 2.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Size of the offscreen map surface
    pub offscreen: Viewport,
    /// Zoom levels added to the live zoom
    pub zoom_increment: f64,
    /// How long tiles may load before the map is captured
    pub stabilization_delay_ms: u64,
    /// Device pixel ratio used for the grid capture
    pub grid_pixel_ratio: f64,
    /// Horizontal offset that keeps offscreen nodes out of the viewport
    pub offscreen_offset: i32,
    /// Class that switches a grid clone to its full, unclipped layout
    pub export_class: String,
    /// Per-request timeout for tile fetches
    pub tile_timeout_ms: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            offscreen: Viewport { width: 2000, height: 2000 },
            zoom_increment: 2.0,
            stabilization_delay_ms: 500,
            grid_pixel_ratio: 2.0,
            offscreen_offset: -10000,
            export_class: "export-mode".to_string(),
            tile_timeout_ms: 10000,
        }
    }
}

impl ExportConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.offscreen.width == 0 || self.offscreen.height == 0 {
            return Err(Error::ConfigError("offscreen size must be non-zero".into()));
        }
        if !self.zoom_increment.is_finite() {
            return Err(Error::ConfigError("zoom_increment must be finite".into()));
        }
        if !self.grid_pixel_ratio.is_finite() || self.grid_pixel_ratio <= 0.0 {
            return Err(Error::ConfigError(format!(
                "grid_pixel_ratio must be positive, got {}",
                self.grid_pixel_ratio
            )));
        }
        let offscreen_end = self.offscreen_offset as i64 + self.offscreen.width as i64;
        if offscreen_end > 0 {
            return Err(Error::ConfigError(format!(
                "offscreen_offset {} would place the surface inside the viewport",
                self.offscreen_offset
            )));
        }
        if self.export_class.trim().is_empty() {
            return Err(Error::ConfigError("export_class must not be empty".into()));
        }
        Ok(())
    }
}

/// Width and height in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ExportConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.stabilization_delay(), Duration::from_millis(500));
        assert_eq!(cfg.export_class, "export-mode");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ExportConfig::from_json_str(r#"{"offscreen": {"width": 800, "height": 600}}"#).unwrap();
        assert_eq!(cfg.offscreen, Viewport { width: 800, height: 600 });
        assert_eq!(cfg.zoom_increment, 2.0);
    }

    #[test]
    fn stale_extension_setting_is_ignored() {
        let cfg = ExportConfig::from_json_str(r#"{"file_extension": "jpg"}"#).unwrap();
        assert_eq!(cfg.stabilization_delay_ms, 500);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for json in [
            r#"{"grid_pixel_ratio": 0}"#,
            r#"{"offscreen": {"width": 0, "height": 10}}"#,
            r#"{"offscreen_offset": 0}"#,
            r#"{"zoom_increment": "two"}"#,
        ] {
            let err = ExportConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, Error::ConfigError(_)), "{} -> {:?}", json, err);
        }
    }
}
