//! Overlay descriptors extracted from a live map.
//!
//! A `LayerDescriptor` is plain data: geometry and style, nothing else. It
//! never refers back to the live primitive it was read from, so the offscreen
//! surface built from it shares no state with the view the user is looking at.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "LatLngRepr")]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

// Live views serialise positions either as `[lat, lng]` or `{lat, lng}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum LatLngRepr {
    Pair([f64; 2]),
    Object {
        lat: f64,
        #[serde(alias = "lon")]
        lng: f64,
    },
}

impl From<LatLngRepr> for LatLng {
    fn from(r: LatLngRepr) -> Self {
        match r {
            LatLngRepr::Pair([lat, lng]) => LatLng { lat, lng },
            LatLngRepr::Object { lat, lng } => LatLng { lat, lng },
        }
    }
}

/// Discriminant of a `LayerDescriptor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    Tile,
    Marker,
    Circle,
    Polygon,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayerKind::Tile => "tile",
            LayerKind::Marker => "marker",
            LayerKind::Circle => "circle",
            LayerKind::Polygon => "polygon",
        };
        f.write_str(s)
    }
}

/// An overlay primitive, reduced to what is needed to rebuild it elsewhere
#[derive(Debug, Clone, PartialEq)]
pub enum LayerDescriptor {
    Tile(TileDescriptor),
    Marker(MarkerDescriptor),
    Circle(CircleDescriptor),
    Polygon(PolygonDescriptor),
}

impl LayerDescriptor {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerDescriptor::Tile(_) => LayerKind::Tile,
            LayerDescriptor::Marker(_) => LayerKind::Marker,
            LayerDescriptor::Circle(_) => LayerKind::Circle,
            LayerDescriptor::Polygon(_) => LayerKind::Polygon,
        }
    }

    /// Check that the descriptor can be turned into a drawable primitive.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            LayerDescriptor::Tile(t) => {
                for key in ["{z}", "{x}", "{y}"] {
                    if !t.url_template.contains(key) {
                        return Err(format!("tile template `{}` lacks {}", t.url_template, key));
                    }
                }
                if t.options.tile_size == 0 {
                    return Err("tile size must be positive".into());
                }
                if t.options.min_zoom > t.options.max_zoom {
                    return Err(format!(
                        "min zoom {} exceeds max zoom {}",
                        t.options.min_zoom, t.options.max_zoom
                    ));
                }
                Ok(())
            }
            LayerDescriptor::Marker(m) => {
                if !m.position.is_finite() {
                    return Err("marker position is not finite".into());
                }
                if m.icon.size[0] == 0 || m.icon.size[1] == 0 {
                    return Err("marker icon has zero size".into());
                }
                Ok(())
            }
            LayerDescriptor::Circle(c) => {
                if !c.center.is_finite() {
                    return Err("circle center is not finite".into());
                }
                if !c.radius.is_finite() || c.radius <= 0.0 {
                    return Err(format!("circle radius {} is not positive", c.radius));
                }
                c.style.validate()
            }
            LayerDescriptor::Polygon(p) => {
                if p.points.len() < 3 {
                    return Err(format!("polygon has {} points, need at least 3", p.points.len()));
                }
                if p.points.iter().any(|pt| !pt.is_finite()) {
                    return Err("polygon has a non-finite vertex".into());
                }
                p.style.validate()
            }
        }
    }
}

/// A raster tile source
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileDescriptor {
    #[serde(alias = "url", alias = "template")]
    pub url_template: String,
    #[serde(default)]
    pub options: TileOptions,
}

/// Tile layer options, named after the keys live views already emit
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TileOptions {
    #[serde(deserialize_with = "de_subdomains")]
    pub subdomains: Vec<String>,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub max_native_zoom: Option<u8>,
    pub tile_size: u32,
    pub tms: bool,
    pub opacity: f32,
    #[serde(deserialize_with = "de_cross_origin")]
    pub cross_origin: Option<String>,
    /// Any other option; string and number values are available to the URL template
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            subdomains: vec!["a".into(), "b".into(), "c".into()],
            min_zoom: 0,
            max_zoom: 18,
            max_native_zoom: None,
            tile_size: 256,
            tms: false,
            opacity: 1.0,
            cross_origin: None,
            extra: BTreeMap::new(),
        }
    }
}

fn de_subdomains<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subdomains {
        Chars(String),
        List(Vec<String>),
    }
    Ok(match Subdomains::deserialize(d)? {
        Subdomains::Chars(s) => s.chars().map(|c| c.to_string()).collect(),
        Subdomains::List(v) => v,
    })
}

fn de_cross_origin<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Bool(true) => Some("anonymous".into()),
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}

/// A point marker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerDescriptor {
    #[serde(alias = "latlng")]
    pub position: LatLng,
    #[serde(default)]
    pub icon: IconRef,
}

/// Marker icon reference. Without a URL the default pin is drawn.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IconRef {
    #[serde(alias = "iconUrl")]
    pub url: Option<String>,
    #[serde(alias = "iconSize")]
    pub size: [u32; 2],
    /// Pixel inside the icon placed on the marker position; bottom centre when absent
    #[serde(alias = "iconAnchor")]
    pub anchor: Option<[i32; 2]>,
}

impl Default for IconRef {
    fn default() -> Self {
        Self { url: None, size: [25, 41], anchor: None }
    }
}

impl IconRef {
    pub fn anchor_point(&self) -> (i32, i32) {
        self.anchor
            .map(|[x, y]| (x, y))
            .unwrap_or((self.size[0] as i32 / 2, self.size[1] as i32))
    }
}

/// A circle with a radius in metres
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleDescriptor {
    #[serde(alias = "latlng")]
    pub center: LatLng,
    pub radius: f64,
    #[serde(default, alias = "options")]
    pub style: PathStyle,
}

/// A closed polygon (outer ring only)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolygonDescriptor {
    #[serde(alias = "latlngs", deserialize_with = "de_ring")]
    pub points: Vec<LatLng>,
    #[serde(default, alias = "options")]
    pub style: PathStyle,
}

fn de_ring<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<LatLng>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Rings {
        Flat(Vec<LatLng>),
        Nested(Vec<Vec<LatLng>>),
    }
    Ok(match Rings::deserialize(d)? {
        Rings::Flat(v) => v,
        Rings::Nested(rings) => rings.into_iter().next().unwrap_or_default(),
    })
}

/// Stroke and fill style for vector paths
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathStyle {
    pub stroke: bool,
    pub color: String,
    pub weight: f32,
    pub opacity: f32,
    pub fill: bool,
    pub fill_color: Option<String>,
    pub fill_opacity: f32,
}

impl Default for PathStyle {
    fn default() -> Self {
        Self {
            stroke: true,
            color: "#3388ff".into(),
            weight: 3.0,
            opacity: 1.0,
            fill: true,
            fill_color: None,
            fill_opacity: 0.2,
        }
    }
}

impl PathStyle {
    pub fn stroke_rgba(&self) -> Option<[u8; 4]> {
        parse_color(&self.color)
    }

    /// Fill colour falls back to the stroke colour
    pub fn fill_rgba(&self) -> Option<[u8; 4]> {
        parse_color(self.fill_color.as_deref().unwrap_or(&self.color))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.stroke_rgba().is_none() {
            return Err(format!("unparseable color `{}`", self.color));
        }
        if self.fill_rgba().is_none() {
            return Err(format!("unparseable fill color `{}`", self.fill_color.as_deref().unwrap_or("")));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(format!("invalid stroke weight {}", self.weight));
        }
        Ok(())
    }
}

/// Parse a CSS-ish colour: `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(..)`, `rgba(..)` or a basic name.
pub fn parse_color(s: &str) -> Option<[u8; 4]> {
    let s = s.trim().to_ascii_lowercase();
    if let Some(hex) = s.strip_prefix('#') {
        let digit = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok();
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        return match hex.len() {
            3 => Some([digit(0)? * 17, digit(1)? * 17, digit(2)? * 17, 255]),
            6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
            8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
            _ => None,
        };
    }
    if let Some(args) = s
        .strip_prefix("rgba(")
        .or_else(|| s.strip_prefix("rgb("))
        .and_then(|r| r.strip_suffix(')'))
    {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        if parts.len() != 3 && parts.len() != 4 {
            return None;
        }
        let mut out = [0u8, 0, 0, 255];
        for (i, p) in parts.iter().take(3).enumerate() {
            out[i] = p.parse::<u8>().ok()?;
        }
        if let Some(a) = parts.get(3) {
            let a = a.parse::<f32>().ok()?;
            out[3] = (a.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        return Some(out);
    }
    let named = match s.as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "gray" | "grey" => [128, 128, 128],
        _ => return None,
    };
    Some([named[0], named[1], named[2], 255])
}
