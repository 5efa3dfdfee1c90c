//! Export orchestration and the re-entrancy guard.
//!
//! A run moves the pipeline `Idle -> Running -> CleaningUp -> Idle`. The
//! transition out of `Running` lives in `RunGuard::drop`, so it happens on
//! success, on error, on panic and when the run future is dropped mid-way.

use crate::dom::{Document, NodeId, RunId};
use crate::emit::DownloadEmitter;
use crate::reaper::{ReapReport, ResourceReaper};
use crate::rendering::{compose, GridRasterizer, MapRasterizer};
use crate::snapshot::{read_snapshot, LiveMap};
use crate::surface::{OffscreenSurface, ReplicationStats, TileLoader};
use crate::{Error, ExportConfig, Result, SourceKind, Viewport};
use futures::future::try_join;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The one message users see when an export fails
pub const EXPORT_FAILED_MESSAGE: &str = "Export failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    CleaningUp,
}

/// Receives user-facing failure notices
pub trait Notifier: Send + Sync {
    fn export_failed(&self, message: &str);
}

/// Reports failures through the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn export_failed(&self, message: &str) {
        log::error!("{}", message);
    }
}

/// The two sources of one export
#[derive(Clone, Copy)]
pub struct ExportRequest<'a> {
    pub map: Option<&'a dyn LiveMap>,
    /// Live grid node in the pipeline's document
    pub grid: Option<NodeId>,
    /// Untranslated title; the file name is derived from its translation
    pub filename_stem: &'a str,
}

impl std::fmt::Debug for ExportRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRequest")
            .field("map", &self.map.is_some())
            .field("grid", &self.grid)
            .field("filename_stem", &self.filename_stem)
            .finish()
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub run: RunId,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub map_size: Viewport,
    pub grid_size: Viewport,
    pub layers: ReplicationStats,
    /// Overlays of the live map that were not recognised
    pub skipped_overlays: usize,
    /// Image loads that had not finished when the map was captured
    pub unsettled_loads: usize,
    /// sha256 of the composite pixels
    pub digest: String,
    /// Size of the encoded PNG
    pub bytes: usize,
}

pub struct ExportPipeline {
    config: ExportConfig,
    document: Document,
    loader: Arc<dyn TileLoader>,
    emitter: DownloadEmitter,
    notifier: Box<dyn Notifier>,
    state: Mutex<PipelineState>,
    next_run: AtomicU64,
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl ExportPipeline {
    pub fn new(
        config: ExportConfig,
        document: Document,
        loader: Arc<dyn TileLoader>,
        emitter: DownloadEmitter,
    ) -> Self {
        Self {
            config,
            document,
            loader,
            emitter,
            notifier: Box::new(LogNotifier),
            state: Mutex::new(PipelineState::Idle),
            next_run: AtomicU64::new(1),
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_idle(&self) -> bool {
        self.state() == PipelineState::Idle
    }

    fn begin(&self) -> Result<RunGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != PipelineState::Idle {
            return Err(Error::Busy);
        }
        *state = PipelineState::Running;
        let run = RunId(self.next_run.fetch_add(1, Ordering::Relaxed));
        Ok(RunGuard { state: &self.state, reaper: ResourceReaper::new(self.document.clone(), run) })
    }

    /// Export the map and grid of `request` as one PNG.
    ///
    /// Returns `Err(Error::Busy)` without touching anything if a run is
    /// already in progress. Whatever the outcome, the pipeline is `Idle` again
    /// once the returned future completes.
    pub async fn run(&self, request: &ExportRequest<'_>) -> Result<ExportReport> {
        let mut guard = self.begin()?;
        let run = guard.reaper.run();
        log::info!("export run {} started ({:?})", run.0, request);

        let result = self.execute(request, &mut guard).await;
        drop(guard);

        match &result {
            Ok(report) => log::info!(
                "export run {} wrote {} ({}x{}, {} bytes)",
                run.0,
                report.filename,
                report.width,
                report.height,
                report.bytes
            ),
            Err(e) => log::warn!("export run {} failed: {}", run.0, e),
        }
        result
    }

    /// `run`, with failures turned into a single user notification.
    ///
    /// A trigger while busy is ignored.
    pub async fn trigger(&self, request: &ExportRequest<'_>) -> Option<ExportReport> {
        match self.run(request).await {
            Ok(report) => Some(report),
            Err(Error::Busy) => {
                log::debug!("export already in progress; trigger ignored");
                None
            }
            Err(e) => {
                log::error!("export failed: {}", e);
                let message = self.emitter.translator().translate(EXPORT_FAILED_MESSAGE);
                self.notifier.export_failed(&message);
                None
            }
        }
    }

    async fn execute(&self, request: &ExportRequest<'_>, guard: &mut RunGuard<'_>) -> Result<ExportReport> {
        let map = request.map.ok_or(Error::MissingSourceError(SourceKind::Map))?;
        let grid = match request.grid {
            Some(id) if self.document.is_attached(id) => id,
            _ => return Err(Error::MissingSourceError(SourceKind::Grid)),
        };

        let (snapshot, stats) = read_snapshot(Some(map))?;
        let run = guard.reaper.run();
        let surface = OffscreenSurface::build(&self.document, &snapshot, &self.config, run, self.loader.clone())?;
        let surface = guard.reaper.adopt_surface(surface);
        let layers = surface.replicate(&snapshot.layers);

        let map_rasterizer = MapRasterizer::new(self.config.stabilization_delay());
        let grid_rasterizer = GridRasterizer::from_config(&self.config);
        let (map_bitmap, grid_bitmap) = try_join(
            map_rasterizer.rasterize(&mut *surface),
            grid_rasterizer.rasterize(&self.document, grid, run),
        )
        .await?;
        let unsettled_loads = surface.pending_loads();

        let composite = compose(&map_bitmap, &grid_bitmap)?;
        let file = self.emitter.emit(&composite, request.filename_stem)?;

        Ok(ExportReport {
            run,
            filename: file.filename,
            width: composite.width(),
            height: composite.height(),
            map_size: Viewport { width: map_bitmap.width(), height: map_bitmap.height() },
            grid_size: Viewport { width: grid_bitmap.width(), height: grid_bitmap.height() },
            layers,
            skipped_overlays: stats.skipped,
            unsettled_loads,
            digest: composite.digest(),
            bytes: file.bytes,
        })
    }
}

struct RunGuard<'a> {
    state: &'a Mutex<PipelineState>,
    reaper: ResourceReaper,
}

impl RunGuard<'_> {
    fn set(&self, next: PipelineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.set(PipelineState::CleaningUp);
        let report: ReapReport = self.reaper.reap();
        log::debug!("run {} cleanup: {:?}", self.reaper.run().0, report);
        self.set(PipelineState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeSpec;
    use crate::emit::{DownloadSink, IdentityTranslator};
    use crate::snapshot::JsonLiveMap;
    use crate::surface::MemoryTileLoader;

    struct NullSink;

    impl DownloadSink for NullSink {
        fn save(&self, _filename: &str, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn pipeline(doc: &Document) -> ExportPipeline {
        let config = ExportConfig {
            offscreen: Viewport { width: 64, height: 64 },
            stabilization_delay_ms: 1,
            ..Default::default()
        };
        let emitter = DownloadEmitter::new(Box::new(IdentityTranslator), Box::new(NullSink));
        ExportPipeline::new(config, doc.clone(), Arc::new(MemoryTileLoader::new()), emitter)
    }

    #[test]
    fn begin_rejects_while_running_and_guard_restores_idle() {
        let doc = Document::new();
        let p = pipeline(&doc);
        let guard = p.begin().unwrap();
        assert_eq!(p.state(), PipelineState::Running);
        assert!(matches!(p.begin(), Err(Error::Busy)));
        drop(guard);
        assert!(p.is_idle());
    }

    #[test]
    fn run_ids_increase() {
        let doc = Document::new();
        let p = pipeline(&doc);
        let a = p.begin().unwrap().reaper.run();
        let b = p.begin().unwrap().reaper.run();
        assert!(b.0 > a.0);
    }

    #[tokio::test]
    async fn missing_map_fails_before_any_attach() {
        let doc = Document::new();
        let grid = doc.attach(NodeSpec::live("<table><tr><td>1</td></tr></table>")).unwrap();
        let p = pipeline(&doc);
        let req = ExportRequest { map: None, grid: Some(grid), filename_stem: "x" };
        let err = p.run(&req).await.unwrap_err();
        assert!(matches!(err, Error::MissingSourceError(SourceKind::Map)));
        assert_eq!(doc.attached_count(), 1);
        assert!(p.is_idle());
    }

    #[tokio::test]
    async fn detached_grid_counts_as_missing() {
        let doc = Document::new();
        let grid = doc.attach(NodeSpec::live("<table><tr><td>1</td></tr></table>")).unwrap();
        doc.detach(grid);
        let map = JsonLiveMap::from_json_str(r#"{"center": [0, 0], "zoom": 1, "layers": []}"#).unwrap();
        let p = pipeline(&doc);
        let req = ExportRequest { map: Some(&map), grid: Some(grid), filename_stem: "x" };
        let err = p.run(&req).await.unwrap_err();
        assert!(matches!(err, Error::MissingSourceError(SourceKind::Grid)));
        assert_eq!(doc.created_of_kind(crate::dom::NodeKind::OffscreenContainer), 0);
    }
}
