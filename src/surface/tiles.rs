//! Tile and icon image loading.
//!
//! Loads are started when a layer is replicated and finish on their own
//! schedule; the map rasterizer only waits a fixed time for them. A loaded
//! image remembers whether it came from another origin without CORS
//! approval, because such an image makes the captured canvas unreadable.

use crate::layers::TileOptions;
use futures::future::BoxFuture;
use image::RgbaImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// One image fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub url: String,
    /// CORS mode requested by the layer (`anonymous`, `use-credentials`); None for plain loads
    pub cross_origin: Option<String>,
}

/// A decoded image
#[derive(Debug, Clone)]
pub struct TileImage {
    pub pixels: RgbaImage,
    /// Came from another origin without CORS approval
    pub tainted: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TileError {
    #[error("tile not found: {0}")]
    NotFound(String),
    #[error("tile load failed: {0}")]
    Load(String),
    #[error("tile decode failed: {0}")]
    Decode(String),
}

/// Source of tile and icon images
pub trait TileLoader: Send + Sync {
    fn load(&self, request: TileRequest) -> BoxFuture<'static, Result<TileImage, TileError>>;
}

fn tms_row(z: i64, y: i64) -> Result<i64, String> {
    u32::try_from(z)
        .ok()
        .filter(|z| *z < 63)
        .and_then(|z| (1i64 << z).checked_sub(1)?.checked_sub(y))
        .ok_or_else(|| format!("zoom {} is out of range for a TMS row flip", z))
}

/// Expand a tile URL template (`{s}`, `{z}`, `{x}`, `{y}`, `{r}` and option keys)
pub fn tile_url(template: &str, options: &TileOptions, z: i64, x: i64, y: i64) -> Result<String, String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in `{}`", template))?;
        let key = &after[..close];
        match key {
            "z" => out.push_str(&z.to_string()),
            "x" => out.push_str(&x.to_string()),
            "y" => {
                let y = if options.tms { tms_row(z, y)? } else { y };
                out.push_str(&y.to_string());
            }
            "s" => {
                if options.subdomains.is_empty() {
                    return Err("template uses {s} but no subdomains are configured".into());
                }
                let idx = (x + y).unsigned_abs() as usize % options.subdomains.len();
                out.push_str(&options.subdomains[idx]);
            }
            "r" => {}
            other => match options.extra.get(other) {
                Some(serde_json::Value::String(s)) => out.push_str(s),
                Some(serde_json::Value::Number(n)) => out.push_str(&n.to_string()),
                _ => return Err(format!("no value provided for template variable `{}`", other)),
            },
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// In-memory loader serving fixed images, used by tests and offline renders
#[derive(Debug, Default)]
pub struct MemoryTileLoader {
    tiles: HashMap<String, RgbaImage>,
    fallback: Option<RgbaImage>,
    tainted_marker: Option<String>,
    requests: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl MemoryTileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` for exactly `url`
    pub fn with_tile(mut self, url: impl Into<String>, image: RgbaImage) -> Self {
        self.tiles.insert(url.into(), image);
        self
    }

    /// Serve `image` for any URL without an exact entry
    pub fn with_fallback(mut self, image: RgbaImage) -> Self {
        self.fallback = Some(image);
        self
    }

    /// Treat URLs containing `marker` as cross-origin without CORS approval
    pub fn with_tainted(mut self, marker: impl Into<String>) -> Self {
        self.tainted_marker = Some(marker.into());
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// URLs requested so far, in order
    pub fn requested_urls(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl TileLoader for MemoryTileLoader {
    fn load(&self, request: TileRequest) -> BoxFuture<'static, Result<TileImage, TileError>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(request.url.clone());
        }
        let tainted = self
            .tainted_marker
            .as_deref()
            .is_some_and(|m| request.url.contains(m));
        let res = self
            .tiles
            .get(&request.url)
            .or(self.fallback.as_ref())
            .cloned()
            .map(|pixels| TileImage { pixels, tainted })
            .ok_or(TileError::NotFound(request.url));
        Box::pin(futures::future::ready(res))
    }
}

#[cfg(feature = "http-tiles")]
pub use http::HttpTileLoader;

#[cfg(feature = "http-tiles")]
mod http {
    use super::{TileError, TileImage, TileLoader, TileRequest};
    use crate::{Error, Result};
    use futures::future::BoxFuture;
    use std::time::Duration;

    /// Fetches tiles over HTTP and applies the browser's canvas-taint rules
    /// relative to the page origin.
    #[derive(Debug, Clone)]
    pub struct HttpTileLoader {
        client: reqwest::Client,
        page_origin: Option<url::Origin>,
    }

    impl HttpTileLoader {
        /// `page_origin` is the origin the export runs under; None treats every tile as foreign.
        pub fn new(page_origin: Option<&str>, timeout_ms: u64) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
            let page_origin = page_origin
                .map(|o| {
                    url::Url::parse(o)
                        .map(|u| u.origin())
                        .map_err(|e| Error::ConfigError(format!("Invalid page origin `{}`: {}", o, e)))
                })
                .transpose()?;
            Ok(Self { client, page_origin })
        }
    }

    impl TileLoader for HttpTileLoader {
        fn load(&self, request: TileRequest) -> BoxFuture<'static, std::result::Result<TileImage, TileError>> {
            let client = self.client.clone();
            let page_origin = self.page_origin.clone();
            Box::pin(async move {
                let tile_url = url::Url::parse(&request.url)
                    .map_err(|e| TileError::Load(format!("{}: {}", request.url, e)))?;
                let same_origin = page_origin.as_ref() == Some(&tile_url.origin());

                let mut req = client.get(tile_url.clone());
                if let (Some(origin), Some(_)) = (&page_origin, &request.cross_origin) {
                    req = req.header("Origin", origin.ascii_serialization());
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| TileError::Load(format!("{}: {}", request.url, e)))?;
                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(TileError::NotFound(request.url));
                }
                if !resp.status().is_success() {
                    return Err(TileError::Load(format!("{}: HTTP {}", request.url, resp.status())));
                }

                let cors_ok = resp
                    .headers()
                    .get("access-control-allow-origin")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|allowed| {
                        allowed == "*"
                            || page_origin.as_ref().is_some_and(|o| o.ascii_serialization() == allowed)
                    });

                let tainted = if same_origin {
                    false
                } else if request.cross_origin.is_some() {
                    // A CORS request the server did not approve never yields an image.
                    if !cors_ok {
                        return Err(TileError::Load(format!("{}: blocked by CORS policy", request.url)));
                    }
                    false
                } else {
                    true
                };

                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| TileError::Load(format!("{}: {}", request.url, e)))?;
                let pixels = image::load_from_memory(&bytes)
                    .map_err(|e| TileError::Decode(format!("{}: {}", request.url, e)))?
                    .to_rgba8();
                Ok(TileImage { pixels, tainted })
            })
        }
    }
}
