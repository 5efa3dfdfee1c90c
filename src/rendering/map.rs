//! Map capture.

use super::raster;
use super::Bitmap;
use crate::surface::{OffscreenSurface, MAP_BACKGROUND};
use crate::{Error, Result};
use std::time::Duration;

/// Captures an offscreen surface after a fixed stabilization delay.
///
/// The delay stands in for per-tile completion tracking: whatever has loaded
/// when it elapses is drawn, the rest is not.
#[derive(Debug, Clone, Copy)]
pub struct MapRasterizer {
    delay: Duration,
}

impl MapRasterizer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn rasterize(&self, surface: &mut OffscreenSurface) -> Result<Bitmap> {
        surface.settle(self.delay).await;
        let commands = surface.display_list()?;
        let size = surface.size();
        let bitmap = raster::rasterize(size.width, size.height, 1.0, MAP_BACKGROUND, &commands)
            .map_err(Error::map_raster)?;
        log::debug!(
            "map captured: {} commands, {} images loaded, {} failed, {} pending",
            commands.len(),
            surface.loaded_images(),
            surface.failed_loads(),
            surface.pending_loads()
        );
        Ok(bitmap)
    }
}
