use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use visual_export::dom::{Document, NodeSpec};
use visual_export::emit::{CatalogTranslator, DirectorySink, DownloadEmitter, IdentityTranslator, Translator};
use visual_export::snapshot::JsonLiveMap;
use visual_export::surface::HttpTileLoader;
use visual_export::{ExportConfig, ExportPipeline, ExportRequest};

/// Export a map snapshot and its data grid as one PNG
#[derive(Debug, Parser)]
#[command(name = "visual-export", version)]
struct Args {
    /// Live map state as JSON: {"center": [lat, lng], "zoom": z, "layers": [...]}
    #[arg(long)]
    map: PathBuf,
    /// Grid markup (an HTML fragment containing a table)
    #[arg(long)]
    grid: PathBuf,
    /// Report title; translated through the catalog to form the file name
    #[arg(long)]
    title: String,
    /// Directory the PNG is written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Translation catalog: {"key": "label"}
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// JSON configuration overriding the defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stabilization delay in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Origin the export runs under; tiles from other origins need CORS
    #[arg(long)]
    origin: Option<String>,
}

fn read(path: &PathBuf) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExportConfig::from_json_str(&read(path)?)?,
        None => ExportConfig::default(),
    };
    if let Some(ms) = args.delay_ms {
        config.stabilization_delay_ms = ms;
    }
    config.validate()?;

    let translator: Box<dyn Translator> = match &args.catalog {
        Some(path) => Box::new(CatalogTranslator::from_json_str(&read(path)?)?),
        None => Box::new(IdentityTranslator),
    };
    let map = JsonLiveMap::from_json_str(&read(&args.map)?)?;

    let document = Document::new();
    let grid = document.attach(NodeSpec::live(read(&args.grid)?))?;

    let loader = HttpTileLoader::new(args.origin.as_deref(), config.tile_timeout_ms)?;
    let emitter = DownloadEmitter::new(translator, Box::new(DirectorySink::new(&args.out_dir)));
    let pipeline = ExportPipeline::new(config, document, Arc::new(loader), emitter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let request = ExportRequest { map: Some(&map), grid: Some(grid), filename_stem: &args.title };
    let report = match runtime.block_on(pipeline.run(&request)) {
        Ok(report) => report,
        Err(e) => bail!("export failed: {}", e),
    };

    if report.skipped_overlays > 0 || report.layers.failed > 0 {
        log::warn!(
            "{} overlay(s) skipped, {} layer(s) failed to replicate",
            report.skipped_overlays,
            report.layers.failed
        );
    }
    println!(
        "{} {}x{} sha256:{}",
        args.out_dir.join(&report.filename).display(),
        report.width,
        report.height,
        report.digest
    );
    Ok(())
}
