//! HTTP tile loading: origin checks and canvas taint
#![cfg(feature = "http-tiles")]

use image::{ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::{Arc, Once};
use tiny_http::{Header, Response, Server};
use visual_export::dom::{Document, NodeKind, NodeSpec};
use visual_export::emit::{DownloadEmitter, DownloadSink, IdentityTranslator};
use visual_export::snapshot::JsonLiveMap;
use visual_export::surface::{HttpTileLoader, TileError, TileLoader, TileRequest};
use visual_export::{Error, ExportConfig, ExportPipeline, ExportRequest, RasterTarget, Viewport};

static INIT: Once = Once::new();
const BASE: &str = "http://127.0.0.1:18183";
const FOREIGN_PAGE: &str = "https://cases.example.org";

fn tile_png() -> Vec<u8> {
    let img = RgbaImage::from_pixel(256, 256, Rgba([40, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

fn start_tile_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18183").unwrap();
            let png = tile_png();
            for request in server.incoming_requests() {
                let url = request.url().to_string();
                let png_header = "Content-Type: image/png".parse::<Header>().unwrap();
                if url.starts_with("/plain/") {
                    let _ = request.respond(Response::from_data(png.clone()).with_header(png_header));
                } else if url.starts_with("/cors/") {
                    let acao = "Access-Control-Allow-Origin: *".parse::<Header>().unwrap();
                    let resp = Response::from_data(png.clone()).with_header(png_header).with_header(acao);
                    let _ = request.respond(resp);
                } else if url.starts_with("/garbage/") {
                    let _ = request.respond(Response::from_string("not an image").with_header(png_header));
                } else {
                    let _ = request.respond(Response::from_string("missing").with_status_code(404));
                }
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
    });
    BASE.to_string()
}

fn request(url: String, cross_origin: Option<&str>) -> TileRequest {
    TileRequest { url, cross_origin: cross_origin.map(str::to_string) }
}

#[tokio::test]
async fn same_origin_tiles_are_clean() {
    let base = start_tile_server();
    let loader = HttpTileLoader::new(Some(&base), 5000).unwrap();
    let tile = loader.load(request(format!("{}/plain/1/0/0.png", base), None)).await.unwrap();
    assert!(!tile.tainted);
    assert_eq!(tile.pixels.get_pixel(10, 10).0, [40, 120, 200, 255]);
}

#[tokio::test]
async fn foreign_tiles_without_cors_mode_taint() {
    let base = start_tile_server();
    let loader = HttpTileLoader::new(Some(FOREIGN_PAGE), 5000).unwrap();
    let tile = loader.load(request(format!("{}/plain/1/0/0.png", base), None)).await.unwrap();
    assert!(tile.tainted);
}

#[tokio::test]
async fn cors_mode_needs_server_approval() {
    let base = start_tile_server();
    let loader = HttpTileLoader::new(Some(FOREIGN_PAGE), 5000).unwrap();

    let err = loader
        .load(request(format!("{}/plain/1/0/0.png", base), Some("anonymous")))
        .await
        .unwrap_err();
    assert!(matches!(err, TileError::Load(ref m) if m.contains("CORS")), "{:?}", err);

    let tile = loader
        .load(request(format!("{}/cors/1/0/0.png", base), Some("anonymous")))
        .await
        .unwrap();
    assert!(!tile.tainted);
}

#[tokio::test]
async fn missing_and_undecodable_tiles_are_errors() {
    let base = start_tile_server();
    let loader = HttpTileLoader::new(Some(&base), 5000).unwrap();
    let err = loader.load(request(format!("{}/nothing/0/0/0.png", base), None)).await.unwrap_err();
    assert!(matches!(err, TileError::NotFound(_)));
    let err = loader.load(request(format!("{}/garbage/0/0/0.png", base), None)).await.unwrap_err();
    assert!(matches!(err, TileError::Decode(_)));
}

#[test]
fn invalid_page_origin_is_a_config_error() {
    let err = HttpTileLoader::new(Some("not a url"), 5000).unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}

struct NullSink;

impl DownloadSink for NullSink {
    fn save(&self, _filename: &str, _bytes: &[u8]) -> visual_export::Result<()> {
        Ok(())
    }
}

fn pipeline(document: &Document, page_origin: &str) -> ExportPipeline {
    let config = ExportConfig {
        offscreen: Viewport { width: 256, height: 256 },
        stabilization_delay_ms: 400,
        ..Default::default()
    };
    let loader = HttpTileLoader::new(Some(page_origin), 5000).unwrap();
    let emitter = DownloadEmitter::new(Box::new(IdentityTranslator), Box::new(NullSink));
    ExportPipeline::new(config, document.clone(), Arc::new(loader), emitter)
}

fn live_map(base: &str, prefix: &str, cross_origin: bool) -> JsonLiveMap {
    JsonLiveMap::from_value(serde_json::json!({
        "center": [0.0, 0.0],
        "zoom": 0,
        "layers": [{
            "type": "tileLayer",
            "url": format!("{}/{}/{{z}}/{{x}}/{{y}}.png", base, prefix),
            "options": { "crossOrigin": cross_origin }
        }]
    }))
    .unwrap()
}

#[tokio::test]
async fn tainted_tile_fails_export_and_cleans_up() {
    let base = start_tile_server();
    let document = Document::new();
    let grid = document.attach(NodeSpec::live("<table><tr><td>C-1</td></tr></table>")).unwrap();
    let p = pipeline(&document, FOREIGN_PAGE);
    let map = live_map(&base, "plain", false);

    let err = p
        .run(&ExportRequest { map: Some(&map), grid: Some(grid), filename_stem: "tiles" })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RasterizationError(RasterTarget::Map, _)), "{:?}", err);
    assert_eq!(document.attached_of_kind(NodeKind::OffscreenContainer), 0);
    assert!(p.is_idle());
}

#[tokio::test]
async fn cors_approved_tiles_export() {
    let base = start_tile_server();
    let document = Document::new();
    let grid = document.attach(NodeSpec::live("<table><tr><td>C-1</td></tr></table>")).unwrap();
    let p = pipeline(&document, FOREIGN_PAGE);
    let map = live_map(&base, "cors", true);

    let report = p
        .run(&ExportRequest { map: Some(&map), grid: Some(grid), filename_stem: "tiles" })
        .await
        .unwrap();
    assert_eq!(report.layers.tiles, 1);
    assert_eq!(report.unsettled_loads, 0);
    assert_eq!(report.map_size, Viewport { width: 256, height: 256 });
    assert!(p.is_idle());
}
